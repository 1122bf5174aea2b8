// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A small, isolated constant-folding/identity-eliminating simplifier
//! (§9 "small CAS"), used by the transformer when it builds distance
//! expressions and by the alignment template generator when it builds
//! affine combinations. Pure function on the AST: no divisions are ever
//! introduced here (the preprocessor's LCM scaling guarantees none are
//! needed), and `^` never appears in target output because the dialect
//! has no exponentiation operator to begin with.

use crate::ast::{BinOp, Expr, UnaryOp};

pub fn simplify(expr: Expr) -> Expr {
    match expr {
        Expr::Unary(op, inner) => {
            let inner = simplify(*inner);
            match (op, &inner) {
                (UnaryOp::Neg, Expr::IntLit(n)) => Expr::IntLit(-n),
                (UnaryOp::Neg, Expr::Unary(UnaryOp::Neg, x)) => (**x).clone(),
                _ => Expr::Unary(op, Box::new(inner)),
            }
        }
        Expr::Binary(op, l, r) => {
            let l = simplify(*l);
            let r = simplify(*r);
            match (op, &l, &r) {
                (BinOp::Add, Expr::IntLit(0), _) => r,
                (BinOp::Add, _, Expr::IntLit(0)) => l,
                (BinOp::Add, Expr::IntLit(a), Expr::IntLit(b)) => Expr::IntLit(a + b),
                (BinOp::Sub, _, Expr::IntLit(0)) => l,
                (BinOp::Sub, Expr::IntLit(a), Expr::IntLit(b)) => Expr::IntLit(a - b),
                (BinOp::Mul, Expr::IntLit(0), _) | (BinOp::Mul, _, Expr::IntLit(0)) => Expr::IntLit(0),
                (BinOp::Mul, Expr::IntLit(1), _) => r,
                (BinOp::Mul, _, Expr::IntLit(1)) => l,
                (BinOp::Mul, Expr::IntLit(a), Expr::IntLit(b)) => Expr::IntLit(a * b),
                _ => Expr::Binary(op, Box::new(l), Box::new(r)),
            }
        }
        Expr::Ternary(c, t, f) => {
            let c = simplify(*c);
            let t = simplify(*t);
            let f = simplify(*f);
            Expr::Ternary(Box::new(c), Box::new(t), Box::new(f))
        }
        Expr::Index(base, idx) => Expr::Index(Box::new(simplify(*base)), Box::new(simplify(*idx))),
        other => other,
    }
}

/// Builds `cond ? a : b`, running the result through `simplify` so a
/// constant-true/false condition collapses immediately.
pub fn ternary(cond: Expr, a: Expr, b: Expr) -> Expr {
    simplify(Expr::Ternary(Box::new(cond), Box::new(a), Box::new(b)))
}

/// Builds `|e|` as `(e >= 0) ? e : -e`, the dialect's only way to express
/// absolute value since it has no built-in abs intrinsic.
pub fn abs(e: Expr) -> Expr {
    let cond = Expr::Binary(BinOp::Ge, Box::new(e.clone()), Box::new(Expr::IntLit(0)));
    ternary(cond, e.clone(), Expr::Unary(UnaryOp::Neg, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_zero_identity() {
        let e = Expr::Binary(BinOp::Add, Box::new(Expr::Ident("x".into())), Box::new(Expr::IntLit(0)));
        assert_eq!(simplify(e), Expr::Ident("x".into()));
    }

    #[test]
    fn test_mul_zero_collapses() {
        let e = Expr::Binary(BinOp::Mul, Box::new(Expr::Ident("x".into())), Box::new(Expr::IntLit(0)));
        assert_eq!(simplify(e), Expr::IntLit(0));
    }

    #[test]
    fn test_double_negation_collapses() {
        let e = Expr::Unary(UnaryOp::Neg, Box::new(Expr::Unary(UnaryOp::Neg, Box::new(Expr::Ident("x".into())))));
        assert_eq!(simplify(e), Expr::Ident("x".into()));
    }

    #[test]
    fn test_constant_folding() {
        let e = Expr::Binary(BinOp::Add, Box::new(Expr::IntLit(2)), Box::new(Expr::IntLit(3)));
        assert_eq!(simplify(e), Expr::IntLit(5));
    }
}
