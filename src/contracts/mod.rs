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

//! Precondition classes: the abstract description of admissible input
//! pairs a CheckDP program is checked against (§4.1, §4.5). Parsed out of
//! the second leading annotation string by `preprocess`, and consumed by
//! `template` when seeding the driver's symbolic-input assumptions.

use crate::error::{ConfigError, SourceLocation};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionClass {
    /// Exactly one index of `query` differs between the two runs.
    OneDiffer,
    /// Every index of `query` may differ by at most 1 between the two runs.
    AllDiffer,
    /// Every index may only decrease, by at most 1.
    Decreasing,
    /// Every index may only increase, by at most 1.
    Increasing,
}

impl PreconditionClass {
    pub fn parse(text: &str, location: &SourceLocation) -> Result<Self, ConfigError> {
        match text {
            "ONE_DIFFER" => Ok(PreconditionClass::OneDiffer),
            "ALL_DIFFER" => Ok(PreconditionClass::AllDiffer),
            "DECREASING" => Ok(PreconditionClass::Decreasing),
            "INCREASING" => Ok(PreconditionClass::Increasing),
            other => Err(ConfigError::UnknownPreconditionClass { class: other.to_string(), location: location.clone() }),
        }
    }
}

impl fmt::Display for PreconditionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PreconditionClass::OneDiffer => "ONE_DIFFER",
            PreconditionClass::AllDiffer => "ALL_DIFFER",
            PreconditionClass::Decreasing => "DECREASING",
            PreconditionClass::Increasing => "INCREASING",
        };
        write!(f, "{}", s)
    }
}

/// A user-supplied `ASSUME(expr)` / `ASSUME_HOLE(expr)` clause collected
/// alongside the precondition class. `is_hole` distinguishes the variant
/// that only applies while searching alignments (holes), matching the
/// grammar in §4.1.
#[derive(Debug, Clone)]
pub struct AssumeClause {
    pub expr_text: String,
    pub is_hole: bool,
}

/// The fully parsed precondition annotation: a class plus zero or more
/// `ASSUME`/`ASSUME_HOLE` clauses in source order.
#[derive(Debug, Clone)]
pub struct Precondition {
    pub class: PreconditionClass,
    pub assumes: Vec<AssumeClause>,
}

impl Precondition {
    /// Per-index distance bound used when seeding the symbolic query
    /// array in the driver (§4.5 item 3, "If alignments are fixed and
    /// inputs symbolic"). Returns `(lo, hi)` for `delta_q[i]` bounds that
    /// hold for every index under this class (the `ONE_DIFFER` class
    /// additionally restricts exactly one index to be nonzero, encoded
    /// separately via `ONE_DIFFER_INDEX`).
    pub fn per_index_bounds(&self) -> (i64, i64) {
        match self.class {
            PreconditionClass::AllDiffer => (-1, 1),
            PreconditionClass::OneDiffer => (-1, 1),
            PreconditionClass::Decreasing => (-1, 0),
            PreconditionClass::Increasing => (0, 1),
        }
    }

    /// Whether this class restricts the difference to a single index
    /// (`ONE_DIFFER`), requiring the driver to introduce the private
    /// `checkdp_one_differ_index` selector.
    pub fn is_single_index(&self) -> bool {
        matches!(self.class, PreconditionClass::OneDiffer)
    }
}
