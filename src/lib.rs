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

//! CheckDP — type-directed verification of epsilon-differential privacy
//! for a small imperative language (§1).
//!
//! The pipeline (§2) runs leaves first: [`preprocess`] validates and
//! scales the input program, [`transform`] runs the two-track type
//! inference and instruments it with aligned/shadow distance updates,
//! [`alignment`] generates the parametric alignment template,
//! [`postprocess`] lifts distances into the function signature,
//! [`template`] emits the self-contained driver program, and
//! [`cegis`] drives the alternating maximize/minimize search against
//! the external symbolic executor ([`symex`], [`clang`],
//! [`verification`]) until it proves privacy or returns a
//! counterexample ([`validate`]). [`pipeline`] wires the stages
//! together; [`config`] holds the run-wide switches.

pub mod alignment;
pub mod ast;
pub mod cegis;
pub mod clang;
pub mod concurrency;
pub mod config;
pub mod constants;
pub mod contracts;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod profiling;
pub mod simplify;
pub mod symex;
pub mod template;
pub mod transform;
pub mod types;
pub mod validate;
pub mod verification;

pub use config::RunOptions;
pub use error::CheckDpError;
pub use pipeline::{run, Verdict};
