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

//! End-to-end verification pipeline (§2 "System Overview").
//!
//! Wires every phase in leaves-first order: preprocess, transform,
//! alignment template generation, postprocess, driver rendering, then
//! (unless `--transform-only`) the CEGIS loop and, on a counterexample,
//! optional probabilistic validation. Persists the run layout named in
//! §6 under `RunOptions::output_dir` as it goes.

use crate::alignment;
use crate::cegis::{CegisRunner, Outcome as CegisOutcome};
use crate::clang::Clang;
use crate::config::RunOptions;
use crate::error::CheckDpError;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::postprocess::{self, PostprocessOutput};
use crate::preprocess;
use crate::profiling::PipelineProfiler;
use crate::symex::SymexConfig;
use crate::template::{self, Concretes};
use crate::validate::{Probabilities, ProbabilisticValidator, ValidationRequest};
use crate::{ast, profile_phase};
use tracing::Instrument;

/// Final disposition of a run: either the core verdict from the CEGIS
/// loop, or an early stop at `--transform-only`.
#[derive(Debug, Clone)]
pub enum Verdict {
    Proved { alignments: Vec<Concretes> },
    CounterExample {
        counterexample: Concretes,
        related_input: Concretes,
        bad_output_a: i64,
        bad_output_b: i64,
        /// `Some` only when a validator was configured (§4.7); its
        /// `bool` is the outcome of the ratio check, `true` meaning the
        /// counterexample is confirmed a genuine privacy violation.
        validation: Option<(Probabilities, bool)>,
    },
    TransformOnly,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub verdict: Verdict,
    /// The rendered driver source with every concrete unbound, the text
    /// persisted as `template.c`.
    pub template: String,
}

/// Runs the whole pipeline over one source file's text, returning the
/// verdict and persisting the run layout (§6) under `opts.output_dir`.
pub async fn run(source: &str, file_name: String, opts: &RunOptions) -> Result<PipelineResult, CheckDpError> {
    std::fs::create_dir_all(&opts.output_dir)?;

    let mut profiler = PipelineProfiler::new();
    profiler.start_run();

    let span = tracing::info_span!("lex-parse");
    let (function, annotations) = {
        let _enter = span.enter();
        let _timer = profiler.start_phase("lex-parse");
        let mut lexer = Lexer::new(source, file_name.clone());
        let tokens = lexer.tokenize()?;
        let mut parser = Parser::new(tokens);
        let (annotations, function) = parser.parse_program()?;
        tracing::info!(function = %function.name, "parsed");
        (function, annotations)
    };

    let pre = profile_phase!(profiler, "preprocess", {
        preprocess::preprocess(annotations, function)?
    });
    tracing::info!(goal = pre.goal, scale_factor = pre.scale_factor, "preprocessed");

    let preprocessed_text = ast::print_function(&pre.function);
    std::fs::write(opts.output_dir.join("preprocessed.c"), &preprocessed_text)?;

    let transformed = profile_phase!(profiler, "transform", {
        crate::transform::transform(pre.function, pre.type_env, opts.enable_shadow)?
    });
    tracing::info!(
        samples = transformed.samples.len(),
        lap_inside_loops = transformed.lap_inside_loops,
        lap_outside_loops = transformed.lap_outside_loops,
        "transformed"
    );

    if opts.dump_type_env {
        let json = serde_json::to_string_pretty(&transformed.type_env).map_err(|e| CheckDpError::Internal { message: e.to_string() })?;
        std::fs::write(opts.output_dir.join("type_env.json"), json)?;
    }

    let templates = profile_phase!(profiler, "alignment", {
        alignment::generate_templates(&transformed.function, &transformed.samples, opts.enable_shadow)
    });
    tracing::info!(slots = templates.tags.len(), "alignment templates generated");

    if opts.dump_template {
        let json = serde_json::to_string_pretty(&templates).map_err(|e| CheckDpError::Internal { message: e.to_string() })?;
        std::fs::write(opts.output_dir.join("alignment_templates.json"), json)?;
    }

    let spliced_function = profile_phase!(profiler, "splice-alignment", {
        crate::transform::splice_alignment(transformed.function, &templates)
    });

    let post: PostprocessOutput = profile_phase!(profiler, "postprocess", {
        postprocess::postprocess(
            spliced_function,
            &transformed.type_env,
            &pre.precondition,
            transformed.lap_inside_loops,
            transformed.lap_outside_loops,
        )?
    });
    tracing::debug!(holes = ?post.holes, "postprocessed");

    let template_text = profile_phase!(profiler, "render-template", {
        template::fill_default(&post.function, &post, &templates.tags, &pre.precondition, pre.goal, opts.query_size)
    });
    std::fs::write(opts.output_dir.join("template.c"), &template_text)?;
    tracing::debug!(source = %template_text, "rendered default template");

    if opts.transform_only {
        profiler.print_summary();
        return Ok(PipelineResult { verdict: Verdict::TransformOnly, template: template_text });
    }

    let clang = Clang::new(opts.clang.clone());
    let symex = SymexConfig {
        klee: opts.klee.clone(),
        kleaver: opts.kleaver.clone(),
        stp: opts.stp.clone(),
        z3: opts.z3.clone(),
        scratch_dir: opts.output_dir.join("scratch"),
    };

    let runner = CegisRunner {
        function: &post.function,
        post: &post,
        tags: &templates.tags,
        precondition: &pre.precondition,
        query_size: opts.query_size,
        goal: pre.goal,
        clang: &clang,
        symex: &symex,
        output_dir: opts.output_dir.clone(),
        max_iterations: opts.max_iterations,
    };

    let outcome = profile_phase!(profiler, "cegis", { runner.run().instrument(tracing::info_span!("cegis")).await? });

    let verdict = match outcome {
        CegisOutcome::Proved { alignments } => {
            tracing::info!(rounds = alignments.len(), "PROVED");
            Verdict::Proved { alignments }
        }
        CegisOutcome::CounterExample { counterexample, related_input, bad_output_a, bad_output_b } => {
            tracing::info!(bad_output_a, bad_output_b, "COUNTEREXAMPLE");
            let validation =
                validate_counterexample(opts, pre.goal, pre.scale_factor, &counterexample, &related_input, bad_output_a, bad_output_b).await?;
            Verdict::CounterExample { counterexample, related_input, bad_output_a, bad_output_b, validation }
        }
    };

    profiler.print_summary();
    Ok(PipelineResult { verdict, template: template_text })
}

/// Runs the optional probabilistic validator (§4.7) over a reported
/// counterexample and applies the ratio-exponent check; returns `None`
/// when no validator is configured, in which case the counterexample is
/// reported unvalidated.
async fn validate_counterexample(
    opts: &RunOptions,
    goal: i64,
    scale_factor: i64,
    counterexample: &Concretes,
    related_input: &Concretes,
    bad_output_a: i64,
    bad_output_b: i64,
) -> Result<Option<(Probabilities, bool)>, CheckDpError> {
    let (Some(psi), Some(psi_source)) = (&opts.psi, &opts.psi_source) else {
        return Ok(None);
    };

    let validator = ProbabilisticValidator::new(psi.clone());
    let request = ValidationRequest {
        model_template: psi_source,
        input_a: counterexample,
        input_b: related_input,
        bad_outputs: &[bad_output_a, bad_output_b],
    };
    let probabilities = validator.validate(request).await?;

    // The goal is the unscaled epsilon multiplied by the LCM scale
    // factor applied in preprocessing (§4.1 "numeric scaling"); recover
    // the original claimed epsilon by undoing that scale.
    let epsilon = goal as f64 / scale_factor as f64;
    let exceeds = probabilities.exceeds_bound(epsilon, opts.ratio_exponent.0);
    tracing::info!(p_a = probabilities.p_a, p_b = probabilities.p_b, epsilon, exceeds, "validated counterexample");
    Ok(Some((probabilities, exceeds)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunOptions;
    use tempfile::tempdir;

    fn partial_sum_source() -> &'static str {
        r#"
        "q: <*, 0>; size:<0,0>; epsilon:<0,0>";
        "PRECONDITION:ALL_DIFFER";
        "CHECK:(1)";
        int f(int q[], int size, float epsilon) {
            float result;
            int i;
            result = 0;
            i = 0;
            while (i < size) {
                float eta = Lap(1);
                result = result + q[i] + eta;
                OUTPUT(result);
                i = i + 1;
            }
        }
        "#
    }

    #[tokio::test]
    async fn test_transform_only_persists_preprocessed_and_template() {
        let dir = tempdir().unwrap();
        let opts = RunOptions::new().output_dir(dir.path().to_path_buf()).transform_only(true);

        let result = run(partial_sum_source(), "partial_sum.c".to_string(), &opts).await.unwrap();
        assert!(matches!(result.verdict, Verdict::TransformOnly));
        assert!(dir.path().join("preprocessed.c").exists());
        assert!(dir.path().join("template.c").exists());
        assert!(result.template.contains("main"));
    }

    #[tokio::test]
    async fn test_dump_flags_persist_json_artifacts() {
        let dir = tempdir().unwrap();
        let opts = RunOptions::new()
            .output_dir(dir.path().to_path_buf())
            .transform_only(true)
            .dump_type_env(true)
            .dump_template(true);

        run(partial_sum_source(), "partial_sum.c".to_string(), &opts).await.unwrap();
        assert!(dir.path().join("type_env.json").exists());
        assert!(dir.path().join("alignment_templates.json").exists());

        let type_env_json = std::fs::read_to_string(dir.path().join("type_env.json")).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&type_env_json).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_source_surfaces_as_config_error() {
        let dir = tempdir().unwrap();
        let opts = RunOptions::new().output_dir(dir.path().to_path_buf()).transform_only(true);
        let bad_source = r#"
        "not a valid annotation";
        "PRECONDITION:ALL_DIFFER";
        "CHECK:(1)";
        int f(int q[], int size, float epsilon) {
            int i;
            i = 0;
        }
        "#;
        let err = run(bad_source, "bad.c".to_string(), &opts).await.unwrap_err();
        assert!(matches!(err, CheckDpError::Config { .. }));
    }
}
