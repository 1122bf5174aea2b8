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

//! The CEGIS core (§4.6): alternates "maximize cost over inputs" and
//! "minimize cost over alignments" symbolic queries until either an
//! alignment survives every input the executor can find (PROVED), or
//! the last counterexample input cannot be covered by any alignment
//! (COUNTEREXAMPLE).
//!
//! The state machine (`CegisState::advance`) is kept free of process
//! I/O so its transition logic — including the "flip-twice" escalation
//! into final validation and the wipe of counterexamples accumulated
//! during a round that gets re-covered — can be driven and tested
//! directly. `CegisRunner` is the thin async loop around it that
//! actually renders drivers, invokes clang, and calls the symbolic
//! executor.

use crate::alignment::AlignmentSlotTag;
use crate::ast::Function;
use crate::clang::Clang;
use crate::contracts::Precondition;
use crate::error::ToolError;
use crate::postprocess::PostprocessOutput;
use crate::symex::{Model, SolveOutcome, SymexConfig};
use crate::template::{self, ConcreteValue, Concretes, DriverOptions, SearchMode};
use std::path::PathBuf;

/// What the driver loop should do after feeding one executor outcome
/// into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Proved,
    CounterExample,
}

/// Pure CEGIS state (§4.6). No process I/O lives here, only the
/// bookkeeping the spec's case analysis describes.
#[derive(Debug, Clone)]
pub struct CegisState {
    pub counterexamples: Vec<Concretes>,
    pub alignments: Vec<Concretes>,
    pub find_inputs: bool,
    pub final_validate: bool,
    pub jump_out: bool,
    /// Bumped by 1000 on every escalation into final validation, so the
    /// executor's scratch directory and generated-file names never
    /// collide with a prior round (§4.6 "restart the executor cleanly").
    pub iteration: u32,
    final_validate_checkpoint: usize,
}

impl CegisState {
    /// `alignments` starts as `[default_alignment]` — all zeros — per
    /// §4.6's initial state.
    pub fn new(default_alignment: Concretes) -> Self {
        Self {
            counterexamples: Vec::new(),
            alignments: vec![default_alignment],
            find_inputs: true,
            final_validate: false,
            jump_out: false,
            iteration: 0,
            final_validate_checkpoint: 0,
        }
    }

    pub fn search_mode(&self) -> SearchMode {
        if self.find_inputs {
            SearchMode::SearchInputs
        } else {
            SearchMode::SearchAlignments
        }
    }

    /// The concretes passed to the driver: the list *opposite* the
    /// current search object, sliced to only the most recent entry
    /// while `final_validate ∧ ¬jump_out` (§4.6 step 1).
    pub fn fixed_concretes(&self) -> &[Concretes] {
        let list = if self.find_inputs { &self.alignments } else { &self.counterexamples };
        if self.final_validate && !self.jump_out && !list.is_empty() {
            &list[list.len() - 1..]
        } else {
            list
        }
    }

    /// Feeds one executor outcome (a model, or none) into the state
    /// machine and returns what the driver loop does next (§4.6 step 4
    /// case analysis, step 5 toggle folded into each arm).
    pub fn advance(&mut self, model: Option<Concretes>) -> StepOutcome {
        match (self.find_inputs, model) {
            (true, Some(m)) => {
                self.counterexamples.push(m);
                self.jump_out = false;
                self.find_inputs = false;
                StepOutcome::Continue
            }
            (true, None) => StepOutcome::Proved,
            (false, Some(m)) => {
                if self.final_validate {
                    self.alignments.push(m);
                    self.counterexamples.truncate(self.final_validate_checkpoint);
                    self.final_validate = false;
                    self.jump_out = true;
                } else if let Some(last) = self.alignments.last_mut() {
                    *last = m;
                } else {
                    self.alignments.push(m);
                }
                self.find_inputs = true;
                StepOutcome::Continue
            }
            (false, None) => {
                if self.final_validate {
                    StepOutcome::CounterExample
                } else {
                    self.final_validate = true;
                    self.final_validate_checkpoint = self.counterexamples.len();
                    self.iteration += 1000;
                    // find_inputs stays false: "flipping the search flag
                    // twice" nets to no change, so the next round still
                    // searches alignments, now under final validation.
                    StepOutcome::Continue
                }
            }
        }
    }
}

/// `default_alignment` the state machine starts from: every slot zero.
pub fn default_alignment(tags: &[AlignmentSlotTag]) -> Concretes {
    let mut concretes = Concretes::new();
    concretes.insert(crate::constants::ALIGNMENT_ARRAY.to_string(), ConcreteValue::Sequence(vec![0; tags.len().max(1)]));
    concretes
}

/// Why the loop stopped.
#[derive(Debug, Clone)]
pub enum Outcome {
    Proved { alignments: Vec<Concretes> },
    CounterExample { counterexample: Concretes, related_input: Concretes, bad_output_a: i64, bad_output_b: i64 },
}

/// Everything the async driver loop needs besides the state machine:
/// the rendered function, the external collaborators, and where to
/// persist the run layout (§6).
pub struct CegisRunner<'a> {
    pub function: &'a Function,
    pub post: &'a PostprocessOutput,
    pub tags: &'a [AlignmentSlotTag],
    pub precondition: &'a Precondition,
    pub query_size: i64,
    pub goal: i64,
    pub clang: &'a Clang,
    pub symex: &'a SymexConfig,
    pub output_dir: PathBuf,
    pub max_iterations: u32,
}

impl<'a> CegisRunner<'a> {
    pub async fn run(&self) -> Result<Outcome, ToolError> {
        let mut state = CegisState::new(default_alignment(self.tags));
        let mut rounds = 0u32;

        loop {
            rounds += 1;
            if rounds > self.max_iterations {
                return Err(ToolError::ExecutorFailed { backend: "cegis".to_string(), message: "iteration budget exhausted".to_string() });
            }

            let model = self.search_one_round(&state).await?;
            match state.advance(model) {
                StepOutcome::Continue => continue,
                StepOutcome::Proved => return Ok(Outcome::Proved { alignments: state.alignments.clone() }),
                StepOutcome::CounterExample => return self.counterexample_phase(&state).await,
            }
        }
    }

    /// Renders the driver for the current search object, compiles it to
    /// bytecode, runs the executor, and solves the first satisfying
    /// path's constraints, returning the model if one exists (§4.6 steps
    /// 1-3).
    async fn search_one_round(&self, state: &CegisState) -> Result<Option<Concretes>, ToolError> {
        let mode = state.search_mode();
        let is_maximize = state.find_inputs;
        let concretes = state.fixed_concretes().to_vec();
        let label = if state.find_inputs { "inputs" } else { "alignments" };

        let opts = DriverOptions { concretes: &concretes, query_size: self.query_size, goal: self.goal, add_symbolic_cost: true, mode, precondition: self.precondition };
        let rendered = template::render(self.function, self.post, self.tags, &opts);

        let stem = self.output_dir.join(format!("generate-{}-{}", label, state.iteration));
        let c_file = stem.with_extension("c");
        let bc_file = stem.with_extension("bc");
        std::fs::write(&c_file, &rendered)?;
        self.clang.compile_bytecode(&c_file, &bc_file).await?;

        let scratch = self.symex.run_klee(&bc_file).await?;
        let markers = self.symex.assert_markers()?;
        let cost_array_len_bytes = concretes.len().max(1) * 4;

        for marker in markers {
            let kquery = self.symex.constraint_file_for(&marker);
            match self.symex.solve(&kquery, cost_array_len_bytes, is_maximize).await? {
                SolveOutcome::Sat(Model { values }) => return Ok(Some(values)),
                SolveOutcome::Unsat => continue,
            }
        }
        let _ = scratch;
        Ok(None)
    }

    /// On COUNTEREXAMPLE: build the related neighbor input `q' = q +
    /// aligned_q` and run the instrumented binary twice, zero-aligned,
    /// to collect the two bad outputs (§4.6 "Counterexample phase").
    async fn counterexample_phase(&self, state: &CegisState) -> Result<Outcome, ToolError> {
        let counterexample = state.counterexamples.last().cloned().unwrap_or_default();
        let query_name = self.function.params[0].name.clone();
        let aligned_name = crate::constants::aligned_distance_name(&query_name);
        let related_input = related_input(&counterexample, &query_name, &aligned_name);

        let bad_output_a = self.run_concrete(&counterexample, 0).await?;
        let bad_output_b = self.run_concrete(&related_input, 1).await?;

        Ok(Outcome::CounterExample { counterexample, related_input, bad_output_a, bad_output_b })
    }

    /// Compiles and runs one zero-alignment concrete re-execution,
    /// persisting it as `counterexample_badoutput_{index}.{c,bin}` (§6
    /// "Persisted layout"), and returns the first integer the
    /// instrumented program's `OUTPUT` macro printed.
    async fn run_concrete(&self, concrete: &Concretes, index: usize) -> Result<i64, ToolError> {
        let concretes = vec![concrete.clone()];
        let opts = DriverOptions { concretes: &concretes, query_size: self.query_size, goal: self.goal, add_symbolic_cost: false, mode: SearchMode::ConcreteRun, precondition: self.precondition };
        let rendered = template::render(self.function, self.post, self.tags, &opts);

        let stem = self.output_dir.join(format!("counterexample_badoutput_{}", index));
        let c_file = stem.with_extension("c");
        let bin_file = stem.clone();
        std::fs::write(&c_file, &rendered)?;
        self.clang.compile_binary(&c_file, &bin_file).await?;

        let output = tokio::process::Command::new(&bin_file)
            .output()
            .await
            .map_err(|e| ToolError::ExecutorFailed { backend: "counterexample-run".to_string(), message: e.to_string() })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .and_then(|l| l.trim().parse::<i64>().ok())
            .ok_or_else(|| ToolError::ExecutorFailed { backend: "counterexample-run".to_string(), message: format!("no OUTPUT observed: {}", stdout) })
    }
}

/// `related_inputs(counterexample)[query] = query + aligned_distance_query`,
/// elementwise (§8 Testable Properties, invariant 5).
fn related_input(counterexample: &Concretes, query_name: &str, aligned_name: &str) -> Concretes {
    let mut related = counterexample.clone();
    let query = counterexample.get(query_name).cloned();
    let aligned = counterexample.get(aligned_name).cloned();
    if let (Some(ConcreteValue::Sequence(q)), Some(ConcreteValue::Sequence(d))) = (query, aligned) {
        let combined: Vec<i64> = q.iter().zip(d.iter()).map(|(a, b)| a + b).collect();
        related.insert(query_name.to_string(), ConcreteValue::Sequence(combined));
    }
    related
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::AlignmentSlotTag;

    fn scalar_model(n: i64) -> Concretes {
        let mut m = Concretes::new();
        m.insert("x".to_string(), ConcreteValue::Scalar(n));
        m
    }

    #[test]
    fn test_no_model_while_searching_inputs_proves() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        assert_eq!(state.advance(None), StepOutcome::Proved);
    }

    #[test]
    fn test_model_while_searching_inputs_appends_counterexample_and_toggles() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        let outcome = state.advance(Some(scalar_model(1)));
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.counterexamples.len(), 1);
        assert!(!state.find_inputs);
    }

    #[test]
    fn test_model_while_searching_alignments_replaces_last_alignment() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        state.find_inputs = false;
        let outcome = state.advance(Some(scalar_model(7)));
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.alignments.len(), 1);
        assert!(state.find_inputs);
        match &state.alignments[0].get("x") {
            Some(ConcreteValue::Scalar(7)) => {}
            other => panic!("expected replaced alignment, got {:?}", other),
        }
    }

    #[test]
    fn test_no_model_while_searching_alignments_escalates_to_final_validation() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        state.find_inputs = false;
        let outcome = state.advance(None);
        assert_eq!(outcome, StepOutcome::Continue);
        assert!(state.final_validate);
        assert!(!state.find_inputs);
        assert_eq!(state.iteration, 1000);
    }

    #[test]
    fn test_no_model_in_final_validation_reports_counterexample() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        state.find_inputs = false;
        state.final_validate = true;
        let outcome = state.advance(None);
        assert_eq!(outcome, StepOutcome::CounterExample);
    }

    #[test]
    fn test_model_in_final_validation_reenters_and_wipes_round_counterexamples() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        state.counterexamples.push(scalar_model(1));
        state.final_validate_checkpoint = 1;
        state.counterexamples.push(scalar_model(2));
        state.find_inputs = false;
        state.final_validate = true;

        let outcome = state.advance(Some(scalar_model(3)));
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(state.alignments.len(), 2);
        assert_eq!(state.counterexamples.len(), 1);
        assert!(!state.final_validate);
        assert!(state.jump_out);
        assert!(state.find_inputs);
    }

    #[test]
    fn test_fixed_concretes_slices_to_most_recent_during_final_validation() {
        let mut state = CegisState::new(default_alignment(&[AlignmentSlotTag::Constant]));
        state.counterexamples.push(scalar_model(1));
        state.counterexamples.push(scalar_model(2));
        state.find_inputs = false;
        state.final_validate = true;
        state.jump_out = false;
        assert_eq!(state.fixed_concretes().len(), 1);

        state.jump_out = true;
        assert_eq!(state.fixed_concretes().len(), 2);
    }

    #[test]
    fn test_related_input_adds_aligned_distance_elementwise() {
        let mut counterexample = Concretes::new();
        counterexample.insert("query".to_string(), ConcreteValue::Sequence(vec![1, 2, 3]));
        counterexample.insert("aligned_query".to_string(), ConcreteValue::Sequence(vec![1, 0, -1]));
        let related = related_input(&counterexample, "query", "aligned_query");
        match related.get("query") {
            Some(ConcreteValue::Sequence(v)) => assert_eq!(v, &vec![2, 2, 2]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_alignment_is_all_zero_sequence() {
        let alignment = default_alignment(&[AlignmentSlotTag::Constant, AlignmentSlotTag::Variable]);
        match alignment.get(crate::constants::ALIGNMENT_ARRAY) {
            Some(ConcreteValue::Sequence(v)) => assert_eq!(v, &vec![0, 0]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
