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

//! SMT-facing pieces of the CEGIS loop (§4.6 "Optimization contract with
//! the solver"): a small `Formula` AST for the byte-packed cost-summing
//! objective the symbolic executor's path constraints get augmented
//! with, plus the query-and-response plumbing `symex::Z3` drives.

pub mod solver;

pub use solver::{Formula, SmtSolver};
