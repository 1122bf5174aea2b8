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

//! A small typed SMT-LIB fragment, just expressive enough to build the
//! byte-packed cost-summing optimization objective §4.6 appends to every
//! path constraint the symbolic executor hands back. This is not a
//! general verification-condition solver — CheckDP never builds or
//! discharges arbitrary VCs against this AST, it only uses it to render
//! the one family of queries `symex::Z3` needs, the way a `kquery` file
//! is extended with `(get-value ...)`/`(maximize ...)` lines before being
//! handed to the `z3` binary.

use std::fmt;

/// A bitvector-select reference: `(select ARR (_ bvN 32))`.
#[derive(Debug, Clone)]
pub struct ByteSelect {
    pub array: String,
    pub byte_index: usize,
}

impl fmt::Display for ByteSelect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(select {} (_ bv{} 32))", self.array, self.byte_index)
    }
}

/// SMT-LIB formula fragment used to build the cost objective.
#[derive(Debug, Clone)]
pub enum Formula {
    Select(ByteSelect),
    /// Zero-padding concatenation used to widen a 32-bit sum so the
    /// running `bvadd` cannot overflow (§4.6 supplemented feature #4,
    /// "8-byte overflow padding").
    ConcatPad { pad_hex: &'static str, inner: Box<Formula> },
    Concat(Box<Formula>, Box<Formula>),
    BvAdd(Box<Formula>, Box<Formula>),
    Maximize(Box<Formula>),
    Minimize(Box<Formula>),
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formula::Select(s) => write!(f, "{}", s),
            Formula::ConcatPad { pad_hex, inner } => write!(f, "(concat {} {})", pad_hex, inner),
            Formula::Concat(a, b) => write!(f, "(concat {} {})", a, b),
            Formula::BvAdd(a, b) => write!(f, "(bvadd {} {})", a, b),
            Formula::Maximize(inner) => write!(f, "(maximize {})", inner),
            Formula::Minimize(inner) => write!(f, "(minimize {})", inner),
        }
    }
}

/// Builds the 4-byte-group selects for one `symbolic_cost` word:
/// `(concat #x0000 (concat (concat (concat b0 b1) b2) b3))`, matching
/// the reference's widen-by-8-bytes-then-concat-four-bytes construction.
fn word(array: &str, byte_index: usize) -> Formula {
    let b = |i: usize| Formula::Select(ByteSelect { array: array.to_string(), byte_index: i });
    let inner = Formula::Concat(
        Box::new(Formula::Concat(Box::new(b(byte_index)), Box::new(b(byte_index + 1)))),
        Box::new(b(byte_index + 2)),
    );
    let inner = Formula::Concat(Box::new(inner), Box::new(b(byte_index + 3)));
    Formula::ConcatPad { pad_hex: "#x0000", inner: Box::new(inner) }
}

/// Builds `(maximize ...)` / `(minimize ...)` over the full
/// `symbolic_cost` array, summing every 4-byte word with `bvadd`
/// (§4.6's "Optimization contract with the solver").
pub fn cost_objective(array: &str, array_len: usize, is_maximize: bool) -> Formula {
    assert!(array_len % 4 == 0, "symbolic_cost arrays are always a whole number of 32-bit words");
    let mut words: Vec<Formula> = (0..array_len / 4).map(|i| word(array, i * 4)).collect();
    let mut sum = words.pop().expect("symbolic_cost array must have at least one word");
    while let Some(w) = words.pop() {
        sum = Formula::BvAdd(Box::new(w), Box::new(sum));
    }
    if is_maximize {
        Formula::Maximize(Box::new(sum))
    } else {
        Formula::Minimize(Box::new(sum))
    }
}

/// Thin wrapper bundling the rendered SMT-LIB query text that
/// `symex::Z3::solve` appends to a `kquery`-derived constraint set
/// before invoking the `z3` binary. Not a solver itself — the actual
/// solving happens out-of-process; this only assembles the query.
#[derive(Debug, Default)]
pub struct SmtSolver {
    constraints: Vec<String>,
}

impl SmtSolver {
    pub fn new() -> Self {
        Self { constraints: Vec::new() }
    }

    pub fn assert_raw(&mut self, smtlib: impl Into<String>) -> &mut Self {
        self.constraints.push(smtlib.into());
        self
    }

    pub fn with_cost_objective(&mut self, array: &str, array_len: usize, is_maximize: bool) -> &mut Self {
        self.constraints.push(cost_objective(array, array_len, is_maximize).to_string());
        self
    }

    pub fn render(&self) -> String {
        self.constraints.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_renders_four_byte_concat_with_padding() {
        let rendered = word("symbolic_cost", 0).to_string();
        assert!(rendered.starts_with("(concat #x0000"));
        assert!(rendered.contains("(select symbolic_cost (_ bv0 32))"));
        assert!(rendered.contains("(select symbolic_cost (_ bv3 32))"));
    }

    #[test]
    fn test_cost_objective_sums_multiple_words_with_bvadd() {
        let objective = cost_objective("symbolic_cost", 8, true).to_string();
        assert!(objective.starts_with("(maximize (bvadd"));
    }

    #[test]
    fn test_minimize_objective_keyword() {
        let objective = cost_objective("symbolic_cost", 4, false).to_string();
        assert!(objective.starts_with("(minimize"));
    }

    #[test]
    fn test_smt_solver_render_joins_constraints() {
        let mut solver = SmtSolver::new();
        solver.assert_raw("(check-sat)").with_cost_objective("symbolic_cost", 4, true);
        let rendered = solver.render();
        assert!(rendered.contains("(check-sat)"));
        assert!(rendered.contains("(maximize"));
    }
}
