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

//! The two-track type environment that drives the transformer's fixed
//! point inference. Carries, per variable, an `aligned` and a `shadow`
//! distance: `Zero` (the two runs provably agree here), `Tracked`
//! (a companion `aligned_x`/`shadow_x` variable exists and is live), or
//! `Expr` (a closed-form expression over other variables that exactly
//! equals the difference). A tagged variant is used instead of the
//! sentinel strings `"0"`/`"*"` of the original implementation to keep
//! string parsing out of the merge/compare logic; string form is
//! produced only at emission time via `Distance::render`.

use crate::ast::{print_expr, Expr};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A per-track distance, following the tagged-variant design noted in
/// §9 rather than the sentinel strings `"0"`/`"*"` of the original
/// implementation. `Expr` carries an actual AST node (not just its
/// printed text) so that further structural recursion — e.g. combining
/// two analytically-known distances under a binary operator — can
/// operate on it directly; `render`/`to_expr` are the only places that
/// flatten it back to source text or a standalone expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Zero,
    Tracked,
    Expr(Box<Expr>),
}

impl Distance {
    pub fn is_tracked(&self) -> bool {
        matches!(self, Distance::Tracked)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Distance::Zero)
    }

    /// Renders the distance to the string form consumed by the template
    /// emitter: `"0"`, `"*"`, or the literal expression text.
    pub fn render(&self) -> String {
        match self {
            Distance::Zero => "0".to_string(),
            Distance::Tracked => "*".to_string(),
            Distance::Expr(e) => print_expr(e),
        }
    }

    /// The distance as a standalone AST expression, for splicing into
    /// instrumentation the transformer emits. `Tracked` has no closed
    /// form here; callers resolve it through the variable's
    /// `aligned_x`/`shadow_x` companion instead.
    pub fn to_expr(&self) -> Expr {
        match self {
            Distance::Zero => Expr::IntLit(0),
            Distance::Tracked => panic!("Distance::Tracked has no closed-form expression"),
            Distance::Expr(e) => (**e).clone(),
        }
    }

    pub fn from_expr(expr: Expr) -> Self {
        Distance::Expr(Box::new(expr))
    }
}

/// `merge(A,B)` per-track: `Tracked` if either side is `Tracked` or the
/// two sides differ, else the common value. Associative, commutative,
/// idempotent by construction.
pub fn merge_distance(a: &Distance, b: &Distance) -> Distance {
    if a == b {
        a.clone()
    } else {
        Distance::Tracked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseType {
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarType {
    pub aligned: Distance,
    pub shadow: Distance,
    pub base: BaseType,
    pub is_array: bool,
}

impl VarType {
    pub fn zero(base: BaseType, is_array: bool) -> Self {
        Self { aligned: Distance::Zero, shadow: Distance::Zero, base, is_array }
    }
}

/// The type environment `Gamma`: a mapping from variable name to its
/// two-track distance record. Mergeable, and used both during the
/// transformer's per-statement walk and as the fixed point computed for
/// while loops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEnv {
    vars: HashMap<String, VarType>,
    /// Declaration order, preserved so that emitted distance-variable
    /// declarations follow source order (matters for diffability of
    /// generated drivers, not for correctness).
    order: Vec<String>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, ty: VarType) {
        if !self.vars.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.vars.insert(name.to_string(), ty);
    }

    pub fn get(&self, name: &str) -> Option<&VarType> {
        self.vars.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VarType> {
        self.vars.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn update_distance(&mut self, name: &str, aligned: Distance, shadow: Distance) {
        if let Some(v) = self.vars.get_mut(name) {
            v.aligned = aligned;
            v.shadow = shadow;
        }
    }

    pub fn update_base_type(&mut self, name: &str, base: BaseType, is_array: bool) {
        if let Some(v) = self.vars.get_mut(name) {
            v.base = base;
            v.is_array = is_array;
        } else {
            self.declare(name, VarType { aligned: Distance::Zero, shadow: Distance::Zero, base, is_array });
        }
    }

    /// Merges two environments: `merge(A,B)` yields, per name and per
    /// track, `Tracked` if either side is `Tracked` or the two sides
    /// differ, else the common value (see Testable Properties, Invariant
    /// #1). Names present in only one side are merged against an
    /// implicit `Zero` baseline, consistent with a variable that has not
    /// yet come into scope on the other branch.
    pub fn merge(&self, other: &TypeEnv) -> TypeEnv {
        let mut result = TypeEnv::new();
        let mut names: Vec<&str> = self.order.iter().map(|s| s.as_str()).collect();
        for n in &other.order {
            if !self.vars.contains_key(n) {
                names.push(n.as_str());
            }
        }
        for name in names {
            let a = self.vars.get(name);
            let b = other.vars.get(name);
            let merged = match (a, b) {
                (Some(a), Some(b)) => VarType {
                    aligned: merge_distance(&a.aligned, &b.aligned),
                    shadow: merge_distance(&a.shadow, &b.shadow),
                    base: a.base,
                    is_array: a.is_array,
                },
                (Some(a), None) => VarType {
                    aligned: merge_distance(&a.aligned, &Distance::Zero),
                    shadow: merge_distance(&a.shadow, &Distance::Zero),
                    base: a.base,
                    is_array: a.is_array,
                },
                (None, Some(b)) => VarType {
                    aligned: merge_distance(&Distance::Zero, &b.aligned),
                    shadow: merge_distance(&Distance::Zero, &b.shadow),
                    base: b.base,
                    is_array: b.is_array,
                },
                (None, None) => unreachable!(),
            };
            result.declare(name, merged);
        }
        result
    }

    /// The tracked locals that need `aligned_x`/`shadow_x` declarations
    /// emitted ahead of the function body.
    pub fn tracked_locals(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|n| {
                let v = &self.vars[n.as_str()];
                v.aligned.is_tracked() || v.shadow.is_tracked()
            })
            .map(|s| s.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(name: &str, aligned: Distance, shadow: Distance) -> TypeEnv {
        let mut env = TypeEnv::new();
        env.declare(name, VarType { aligned, shadow, base: BaseType::Int, is_array: false });
        env
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = env_with("x", Distance::Zero, Distance::Zero);
        let b = env_with("x", Distance::Tracked, Distance::Zero);
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = env_with("x", Distance::from_expr(Expr::Ident("y".to_string())), Distance::Zero);
        assert_eq!(a.merge(&a), a);
    }

    #[test]
    fn test_merge_associative() {
        let a = env_with("x", Distance::Zero, Distance::Zero);
        let b = env_with("x", Distance::Tracked, Distance::Zero);
        let c = env_with("x", Distance::from_expr(Expr::Ident("z".to_string())), Distance::Zero);
        assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn test_merge_differing_concrete_becomes_tracked() {
        let a = env_with("x", Distance::from_expr(Expr::IntLit(1)), Distance::Zero);
        let b = env_with("x", Distance::from_expr(Expr::IntLit(2)), Distance::Zero);
        let merged = a.merge(&b);
        assert_eq!(merged.get("x").unwrap().aligned, Distance::Tracked);
    }
}
