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

//! Probabilistic validator (§4.7): an external collaborator interface
//! only — PSI (or an equivalent probabilistic model checker) computes
//! the exact output probability of a bad-output sequence under two
//! concrete, one-key-differing inputs. CheckDP's own job is just the
//! substitution and the ratio check (§4.7, "`max(p_a,p_b)/min(p_a,p_b)
//! > e^(k·ε)`"); the probability computation itself is out of scope
//! per §1.

use crate::error::ToolError;
use crate::template::Concretes;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Two concrete input maps differing in exactly one key, paired with
/// the bad-output sequence observed for each (§4.6 "Counterexample
/// phase" produces exactly this shape).
pub struct ValidationRequest<'a> {
    pub model_template: &'a Path,
    pub input_a: &'a Concretes,
    pub input_b: &'a Concretes,
    pub bad_outputs: &'a [i64],
}

/// The exact output probabilities PSI reports under each input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probabilities {
    pub p_a: f64,
    pub p_b: f64,
}

impl Probabilities {
    /// `max(p_a,p_b) / min(p_a,p_b) > e^(k*epsilon)` — the ratio check
    /// §4.7 runs after validation; `k` defaults to 1 and is overridden
    /// to 2 for the one algorithm family named in §9 Open Question (b),
    /// resolved here as a caller-supplied exponent rather than a
    /// filename-substring match (see DESIGN.md).
    pub fn exceeds_bound(&self, epsilon: f64, k: u32) -> bool {
        let (hi, lo) = if self.p_a >= self.p_b { (self.p_a, self.p_b) } else { (self.p_b, self.p_a) };
        if lo <= 0.0 {
            return hi > 0.0;
        }
        hi / lo > (k as f64 * epsilon).exp()
    }
}

pub struct ProbabilisticValidator {
    pub binary: PathBuf,
}

impl ProbabilisticValidator {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Substitutes the two concrete input maps and the bad-output
    /// sequence into the model template, invokes PSI, and parses its
    /// two reported probabilities (`p_a p_b` on stdout, whitespace
    /// separated, matching the reference's `concretize_probability`
    /// output contract).
    pub async fn validate(&self, request: ValidationRequest<'_>) -> Result<Probabilities, ToolError> {
        let concretized = concretize(request.model_template, request.input_a, request.input_b, request.bad_outputs)?;
        let scratch = std::env::temp_dir().join(format!("checkdp-psi-{}.psi", std::process::id()));
        std::fs::write(&scratch, &concretized).map_err(ToolError::from)?;

        let output = Command::new(&self.binary)
            .arg(&scratch)
            .output()
            .await
            .map_err(|e| ToolError::ValidatorFailed { message: e.to_string() })?;
        let _ = std::fs::remove_file(&scratch);

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut nums = stdout.split_whitespace().filter_map(|tok| tok.parse::<f64>().ok());
        let p_a = nums.next().ok_or_else(|| ToolError::ValidatorFailed { message: format!("no probability in output: {}", stdout) })?;
        let p_b = nums.next().ok_or_else(|| ToolError::ValidatorFailed { message: format!("only one probability in output: {}", stdout) })?;
        Ok(Probabilities { p_a, p_b })
    }
}

/// Textual substitution of the two concrete maps and bad-output values
/// into the PSI model-template source. PSI's modeling language is out of
/// scope (§1); this only performs the placeholder substitution the
/// reference's `concretize_probability` does before invoking PSI.
fn concretize(template_path: &Path, input_a: &Concretes, input_b: &Concretes, bad_outputs: &[i64]) -> Result<String, ToolError> {
    let mut text = std::fs::read_to_string(template_path).map_err(ToolError::from)?;
    for (name, value) in input_a {
        text = text.replace(&format!("{{{{a.{}}}}}", name), &crate::template::render_concrete_value_for_validator(value));
    }
    for (name, value) in input_b {
        text = text.replace(&format!("{{{{b.{}}}}}", name), &crate::template::render_concrete_value_for_validator(value));
    }
    let outputs_str = bad_outputs.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ");
    text = text.replace("{{bad_outputs}}", &outputs_str);
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_within_bound_for_k_1() {
        let p = Probabilities { p_a: 1.0, p_b: 1.0 };
        assert!(!p.exceeds_bound(1.0, 1));
    }

    #[test]
    fn test_ratio_exceeds_bound_when_one_side_zero() {
        let p = Probabilities { p_a: 0.5, p_b: 0.0 };
        assert!(p.exceeds_bound(1.0, 1));
    }

    #[test]
    fn test_k_2_widens_the_allowed_ratio() {
        let p = Probabilities { p_a: 3.0, p_b: 1.0 };
        assert!(p.exceeds_bound(1.0, 1));
        assert!(!p.exceeds_bound(1.0, 2));
    }
}
