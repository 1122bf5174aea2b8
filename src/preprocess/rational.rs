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

//! A small self-contained rational-arithmetic helper used only to clear
//! denominators out of `Lap` scales and the goal expression before the
//! rest of the pipeline ever sees a fraction (§4.1 "Numeric scaling").
//! Not a general-purpose numeric tower: CheckDP's non-goals explicitly
//! exclude floating-point reasoning, so this exists purely to compute an
//! integer scale factor.

use crate::ast::{BinOp, Expr, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "rational with zero denominator");
        Self { num, den }
    }

    pub fn reduced(self) -> Self {
        let g = gcd(self.num.abs(), self.den.abs()).max(1);
        let sign = if self.den < 0 { -1 } else { 1 };
        Rational { num: sign * self.num / g, den: sign * self.den / g }
    }
}

pub fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}

pub fn lcm(a: i64, b: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b) * b).abs()
}

/// Attempts to read a closed-form rational constant out of an
/// expression: integer literals, `a / b` of two such constants, and
/// unary negation of either. Any expression mentioning an identifier
/// (e.g. a `Lap` scale parameterized by `epsilon`) is not a constant and
/// yields `None` — such scales do not contribute a denominator to the
/// LCM, matching the reference implementation's handling of symbolic
/// scales.
pub fn try_extract_rational(expr: &Expr) -> Option<Rational> {
    match expr {
        Expr::IntLit(n) => Some(Rational::new(*n, 1).reduced()),
        Expr::Unary(UnaryOp::Neg, inner) => {
            let r = try_extract_rational(inner)?;
            Some(Rational::new(-r.num, r.den).reduced())
        }
        Expr::Binary(BinOp::Div, l, r) => {
            let l = try_extract_rational(l)?;
            let r = try_extract_rational(r)?;
            if r.num == 0 {
                return None;
            }
            Some(Rational::new(l.num * r.den, l.den * r.num).reduced())
        }
        Expr::Binary(BinOp::Mul, l, r) => {
            let l = try_extract_rational(l)?;
            let r = try_extract_rational(r)?;
            Some(Rational::new(l.num * r.num, l.den * r.den).reduced())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(1, 1), 1);
    }

    #[test]
    fn test_extract_int_literal() {
        assert_eq!(try_extract_rational(&Expr::IntLit(4)), Some(Rational::new(4, 1)));
    }

    #[test]
    fn test_extract_division() {
        let e = Expr::Binary(BinOp::Div, Box::new(Expr::IntLit(1)), Box::new(Expr::IntLit(4)));
        assert_eq!(try_extract_rational(&e), Some(Rational::new(1, 4)));
    }

    #[test]
    fn test_extract_symbolic_scale_is_none() {
        let e = Expr::Binary(BinOp::Div, Box::new(Expr::IntLit(1)), Box::new(Expr::Ident("epsilon".to_string())));
        assert_eq!(try_extract_rational(&e), None);
    }

    #[test]
    fn test_reduced_normalizes_sign_of_denominator() {
        let r = Rational::new(1, -4).reduced();
        assert_eq!(r, Rational::new(-1, 4));
    }
}
