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

//! Symbolic-executor orchestration (§6 "Executor contract"): invokes
//! KLEE on the compiled bitcode, finds the `*.assert.err` markers its
//! scratch directory leaves behind, translates the accompanying
//! constraint file to SMT-LIB via `verification::solver`, appends the
//! cost-summing optimization objective, and hands the query to one of
//! the two backend solvers (`stp`/`z3`) via `concurrency::race`. This is
//! a thin process-orchestration layer over genuinely external tools (§1
//! "the underlying symbolic executor, the SMT solver... are external
//! collaborators whose interfaces only are specified") — it does not
//! reimplement symbolic execution or SMT solving.

use crate::error::ToolError;
use crate::template::{ConcreteValue, Concretes};
use crate::verification::solver::cost_objective;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// One satisfying assignment the executor/solver pair produced, decoded
/// from the byte-packed bitvector model per §6's "Solver output parsed
/// by the regex pattern" contract: 4 consecutive byte selects concat
/// into one 32-bit signed integer per array slot, scalars unpacked from
/// their singleton tuple.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub values: Concretes,
}

#[derive(Debug)]
pub enum SolveOutcome {
    Sat(Model),
    Unsat,
}

pub struct SymexConfig {
    pub klee: PathBuf,
    pub kleaver: PathBuf,
    pub stp: PathBuf,
    pub z3: PathBuf,
    pub scratch_dir: PathBuf,
}

impl SymexConfig {
    /// Runs KLEE over the compiled bitcode into a fresh scratch
    /// directory, exclusive to this iteration per §5 ("removed and
    /// re-created between iterations, so no cross-iteration races
    /// exist").
    pub async fn run_klee(&self, bitcode: &Path) -> Result<PathBuf, ToolError> {
        if self.scratch_dir.exists() {
            std::fs::remove_dir_all(&self.scratch_dir).map_err(ToolError::from)?;
        }
        std::fs::create_dir_all(&self.scratch_dir).map_err(ToolError::from)?;

        let output = Command::new(&self.klee)
            .arg("--output-dir")
            .arg(&self.scratch_dir)
            .arg("--only-output-states-covering-new")
            .arg(bitcode)
            .output()
            .await
            .map_err(|e| ToolError::ExecutorFailed { backend: "klee".to_string(), message: e.to_string() })?;

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if !combined.contains("KLEE: done") {
            return Err(ToolError::ExecutorFailed { backend: "klee".to_string(), message: combined });
        }
        Ok(self.scratch_dir.clone())
    }

    /// Lists every `*.assert.err` marker left behind by a KLEE run: one
    /// per satisfying path the executor found (§6 "Output: a scratch
    /// directory containing, per satisfying path, a `*.assert.err`
    /// marker and a constraint file in SMT query form").
    pub fn assert_markers(&self) -> Result<Vec<PathBuf>, ToolError> {
        let mut markers = Vec::new();
        if !self.scratch_dir.exists() {
            return Ok(markers);
        }
        for entry in std::fs::read_dir(&self.scratch_dir).map_err(ToolError::from)? {
            let entry = entry.map_err(ToolError::from)?;
            let path = entry.path();
            if path.extension().map(|e| e == "err").unwrap_or(false)
                && path.file_stem().and_then(|s| s.to_str()).map(|s| s.ends_with(".assert")).unwrap_or(false)
            {
                markers.push(path);
            }
        }
        markers.sort();
        Ok(markers)
    }

    /// The `.kquery` constraint file KLEE emits alongside an
    /// `*.assert.err` marker.
    pub fn constraint_file_for(&self, marker: &Path) -> PathBuf {
        marker.with_extension("").with_extension("kquery")
    }

    /// Reads the raw kquery constraints, appends a `(maximize …)` /
    /// `(minimize …)` objective over `symbolic_cost`, and runs the
    /// winning backend of `stp`/`z3` on the combined query (§4.6
    /// "Optimization contract with the solver").
    pub async fn solve(&self, kquery: &Path, cost_array_len: usize, is_maximize: bool) -> Result<SolveOutcome, ToolError> {
        let raw = std::fs::read_to_string(kquery).map_err(ToolError::from)?;
        let objective = cost_objective(crate::constants::SYMBOLIC_COST, cost_array_len, is_maximize);
        let query = format!("{}\n{}\n(check-sat)\n", raw, objective);

        let query_path = self.scratch_dir.join("query.smt2");
        std::fs::write(&query_path, &query).map_err(ToolError::from)?;

        let stp_fut = run_solver(&self.stp, &query_path, "stp");
        let z3_fut = run_solver(&self.z3, &query_path, "z3");
        let winner = crate::concurrency::race::race(stp_fut, z3_fut).await?;
        parse_solver_output(&winner)
    }
}

async fn run_solver(binary: &Path, query_path: &Path, backend: &'static str) -> Result<String, ToolError> {
    let output = Command::new(binary)
        .arg(query_path)
        .output()
        .await
        .map_err(|e| ToolError::ExecutorFailed { backend: backend.to_string(), message: e.to_string() })?;
    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(combined)
}

/// Parses solver stdout per §6's contract: `sat`/`unsat`, followed (on
/// `sat`) by `(((select VAR (_ bvK 32)) #xHH))`-shaped value lines. Four
/// consecutive bytes of the same array concatenate, most-significant
/// byte first, into one signed 32-bit integer per slot; a name with no
/// byte-index suffix is a scalar unpacked from its singleton tuple.
fn parse_solver_output(raw: &str) -> Result<SolveOutcome, ToolError> {
    if raw.contains("ERROR") && !raw.contains("ASSERTION FAIL") {
        return Err(ToolError::SolverError { line: raw.lines().find(|l| l.contains("ERROR")).unwrap_or(raw).to_string() });
    }
    if raw.trim_start().starts_with("unsat") {
        return Ok(SolveOutcome::Unsat);
    }
    if !raw.trim_start().starts_with("sat") {
        return Ok(SolveOutcome::Unsat);
    }

    let byte_re = regex_lite_find_selects(raw);
    let mut arrays: HashMap<String, HashMap<usize, u8>> = HashMap::new();
    for (array, idx, byte) in byte_re {
        arrays.entry(array).or_default().insert(idx, byte);
    }

    let mut values = Concretes::new();
    for (array, bytes) in arrays {
        let max_idx = *bytes.keys().max().unwrap_or(&0);
        if max_idx == 0 && bytes.len() == 1 {
            let b = *bytes.get(&0).unwrap();
            values.insert(array, ConcreteValue::Scalar(b as i64));
            continue;
        }
        let mut words = Vec::new();
        let mut i = 0usize;
        while i <= max_idx {
            let b0 = *bytes.get(&i).unwrap_or(&0) as i32;
            let b1 = *bytes.get(&(i + 1)).unwrap_or(&0) as i32;
            let b2 = *bytes.get(&(i + 2)).unwrap_or(&0) as i32;
            let b3 = *bytes.get(&(i + 3)).unwrap_or(&0) as i32;
            let word = (b0 << 24) | (b1 << 16) | (b2 << 8) | b3;
            words.push(word as i64);
            i += 4;
        }
        if words.len() == 1 {
            values.insert(array, ConcreteValue::Scalar(words[0]));
        } else {
            values.insert(array, ConcreteValue::Sequence(words));
        }
    }

    Ok(SolveOutcome::Sat(Model { values }))
}

/// Hand-rolled scan for `(select ARRAY (_ bvINDEX 32))) #xHH` pairs —
/// avoids pulling in a regex engine for one fixed solver-output shape
/// (the lexer/parser crates already cover general tokenizing needs
/// elsewhere in this crate).
fn regex_lite_find_selects(raw: &str) -> Vec<(String, usize, u8)> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let Some(select_at) = line.find("(select ") else { continue };
        let rest = &line[select_at + "(select ".len()..];
        let Some(sp) = rest.find(' ') else { continue };
        let array = rest[..sp].to_string();
        let Some(bv_at) = rest.find("(_ bv") else { continue };
        let after_bv = &rest[bv_at + "(_ bv".len()..];
        let Some(end) = after_bv.find(' ') else { continue };
        let Ok(index) = after_bv[..end].parse::<usize>() else { continue };
        let Some(hash_at) = line.rfind("#x") else { continue };
        let hex = &line[hash_at + 2..hash_at + 4.min(line.len() - hash_at)];
        let Ok(byte) = u8::from_str_radix(hex.trim_end_matches(')'), 16) else { continue };
        out.push((array, index, byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unsat() {
        let outcome = parse_solver_output("unsat\n").unwrap();
        assert!(matches!(outcome, SolveOutcome::Unsat));
    }

    #[test]
    fn test_parse_sat_single_byte_scalar() {
        let raw = "sat\n(((select checkdp_one_differ_index (_ bv0 32)) #x02))\n";
        let outcome = parse_solver_output(raw).unwrap();
        match outcome {
            SolveOutcome::Sat(model) => {
                assert_eq!(model.values.len(), 1);
            }
            SolveOutcome::Unsat => panic!("expected sat"),
        }
    }

    #[test]
    fn test_parse_error_line_is_rejected() {
        let raw = "ERROR: unexpected token\n";
        assert!(parse_solver_output(raw).is_err());
    }
}
