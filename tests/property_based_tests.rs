//! Property tests for the two-track type environment's merge laws (§8
//! Invariant #1: commutative, associative, idempotent, and the `Tracked`
//! promotion rule). Distances are drawn from a small finite alphabet
//! (`Zero`, `Tracked`, two distinct symbolic expressions) since the
//! laws only depend on equality/inequality between tracks, not on the
//! expressions' actual structure.

use checkdp::ast::Expr;
use checkdp::types::{BaseType, Distance, TypeEnv, VarType};
use proptest::prelude::*;

fn arb_distance() -> impl Strategy<Value = Distance> {
    prop_oneof![
        Just(Distance::Zero),
        Just(Distance::Tracked),
        Just(Distance::from_expr(Expr::IntLit(1))),
        Just(Distance::from_expr(Expr::IntLit(2))),
    ]
}

fn env_with(name: &str, aligned: Distance, shadow: Distance) -> TypeEnv {
    let mut env = TypeEnv::new();
    env.declare(name, VarType { aligned, shadow, base: BaseType::Int, is_array: false });
    env
}

proptest! {
    #[test]
    fn test_merge_is_commutative(a_al in arb_distance(), a_sh in arb_distance(), b_al in arb_distance(), b_sh in arb_distance()) {
        let a = env_with("x", a_al, a_sh);
        let b = env_with("x", b_al, b_sh);
        prop_assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_is_idempotent(al in arb_distance(), sh in arb_distance()) {
        let a = env_with("x", al, sh);
        prop_assert_eq!(a.merge(&a.clone()), a);
    }

    #[test]
    fn test_merge_is_associative(
        a_al in arb_distance(), a_sh in arb_distance(),
        b_al in arb_distance(), b_sh in arb_distance(),
        c_al in arb_distance(), c_sh in arb_distance(),
    ) {
        let a = env_with("x", a_al, a_sh);
        let b = env_with("x", b_al, b_sh);
        let c = env_with("x", c_al, c_sh);
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    /// `merge(A,B).aligned = Tracked` iff the two sides differ or either
    /// side is already `Tracked` (§8 Invariant #1, second clause).
    #[test]
    fn test_merge_tracked_promotion_matches_spec(a_al in arb_distance(), b_al in arb_distance()) {
        let a = env_with("x", a_al.clone(), Distance::Zero);
        let b = env_with("x", b_al.clone(), Distance::Zero);
        let merged = a.merge(&b);
        let expected_tracked = a_al != b_al || a_al == Distance::Tracked || b_al == Distance::Tracked;
        prop_assert_eq!(merged.get("x").unwrap().aligned == Distance::Tracked, expected_tracked);
    }
}
