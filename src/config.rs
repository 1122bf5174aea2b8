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

//! Run configuration (§6 "CLI surface (thin wrapper)"): the set of
//! external-collaborator paths and pipeline switches the CLI lowers its
//! parsed arguments into, analogous to the teacher's `CompileOptions`.

use std::path::PathBuf;

/// Which symbolic-executor backend(s) to race (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchHeuristic {
    /// Race `stp` and `z3`, take the first to finish.
    Race,
    /// `stp` only.
    Stp,
    /// `z3` only.
    Z3,
}

impl Default for SearchHeuristic {
    fn default() -> Self {
        SearchHeuristic::Race
    }
}

/// Exponent override for the probabilistic validator's ratio check
/// (§4.7, §9 Open Question (b)): exposed as a per-run override rather
/// than the original's filename-substring match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatioExponent(pub u32);

impl Default for RatioExponent {
    fn default() -> Self {
        RatioExponent(1)
    }
}

/// Paths to and switches for every external collaborator named in §6,
/// plus the pipeline-level switches (`transform_only`, `enable_shadow`).
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory `checkdp` writes the persisted run layout into (§6
    /// "Persisted layout"): `preprocessed.c`, `template.c`,
    /// `generate-{inputs|alignments}-<iter>.{c,bc}`,
    /// `counterexample_badoutput_{0,1}.{c,bin}`, `run.log`.
    pub output_dir: PathBuf,
    pub clang: PathBuf,
    pub klee: PathBuf,
    pub kleaver: PathBuf,
    pub stp: PathBuf,
    pub z3: PathBuf,
    /// Optional PSI probabilistic-validator binary and model-template
    /// source (§4.7); `None` skips validation and reports a bare
    /// counterexample.
    pub psi: Option<PathBuf>,
    pub psi_source: Option<PathBuf>,
    pub ratio_exponent: RatioExponent,
    pub search_heuristic: SearchHeuristic,
    /// Stop after the template is emitted; used for `--transform-only`
    /// debugging (§6).
    pub transform_only: bool,
    pub enable_shadow: bool,
    pub log_level: String,
    /// Upper bound on CEGIS iterations, a safety valve the original
    /// implementation does not need (it is driven interactively) but a
    /// batch CLI should have.
    pub max_iterations: u32,
    /// Bound on `query_size` used when instantiating the driver's
    /// concrete query array (§4.5 item 1); CheckDP only reasons about
    /// small, fixed-size instances per run, same as the reference's
    /// per-scenario harnesses.
    pub query_size: i64,
    /// Persist the frozen two-track type environment (post-transform
    /// fixed point) as `type_env.json`, for debugging the transformer
    /// independent of the rendered `template.c` text.
    pub dump_type_env: bool,
    /// Persist the alignment template generator's output (per-`η` live
    /// conditions/variables and slot tags) as `alignment_templates.json`.
    pub dump_template: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./checkdp-out"),
            clang: PathBuf::from("clang"),
            klee: PathBuf::from("klee"),
            kleaver: PathBuf::from("kleaver"),
            stp: PathBuf::from("stp"),
            z3: PathBuf::from("z3"),
            psi: None,
            psi_source: None,
            ratio_exponent: RatioExponent::default(),
            search_heuristic: SearchHeuristic::default(),
            transform_only: false,
            enable_shadow: false,
            log_level: "info".to_string(),
            max_iterations: 256,
            query_size: 4,
            dump_type_env: false,
            dump_template: false,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn transform_only(mut self, enable: bool) -> Self {
        self.transform_only = enable;
        self
    }

    pub fn enable_shadow(mut self, enable: bool) -> Self {
        self.enable_shadow = enable;
        self
    }

    pub fn search_heuristic(mut self, heuristic: SearchHeuristic) -> Self {
        self.search_heuristic = heuristic;
        self
    }

    pub fn psi(mut self, psi: Option<PathBuf>, source: Option<PathBuf>) -> Self {
        self.psi = psi;
        self.psi_source = source;
        self
    }

    pub fn ratio_exponent(mut self, k: u32) -> Self {
        self.ratio_exponent = RatioExponent(k);
        self
    }

    pub fn query_size(mut self, size: i64) -> Self {
        self.query_size = size;
        self
    }

    pub fn dump_type_env(mut self, enable: bool) -> Self {
        self.dump_type_env = enable;
        self
    }

    pub fn dump_template(mut self, enable: bool) -> Self {
        self.dump_template = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_search_heuristic_is_race() {
        assert_eq!(RunOptions::default().search_heuristic, SearchHeuristic::Race);
    }

    #[test]
    fn test_builder_overrides_transform_only() {
        let opts = RunOptions::new().transform_only(true);
        assert!(opts.transform_only);
    }

    #[test]
    fn test_default_ratio_exponent_is_one() {
        assert_eq!(RunOptions::default().ratio_exponent, RatioExponent(1));
    }
}
