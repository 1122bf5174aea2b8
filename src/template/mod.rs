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

//! The driver/template emitter (§4.5). Renders the postprocessed
//! function plus a `main` that declares symbolic inputs, seeds
//! assumptions from the precondition class or the alignment search mode,
//! calls the transformed function once per *concrete*, and forces the
//! symbolic executor to emit a model once the cost bound is crossed.
//!
//! Output is plain text in the same restricted dialect the rest of the
//! pipeline works in, plus the handful of textual constructs (macros,
//! `main`) that dialect has no AST node for — there is no ambiguity to
//! round-trip here, so it is built directly as a string rather than
//! forced through `Expr`/`Statement`.

use crate::alignment::AlignmentSlotTag;
use crate::ast::{print_block, print_expr, Function, Type};
use crate::contracts::{Precondition, PreconditionClass};
use crate::postprocess::PostprocessOutput;
use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone)]
pub enum ConcreteValue {
    Scalar(i64),
    Sequence(Vec<i64>),
}

pub type Concretes = HashMap<String, ConcreteValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Inputs fixed, alignment symbolic: the CEGIS loop is minimizing cost
    /// over alignments.
    SearchAlignments,
    /// Alignment fixed, inputs symbolic: maximizing cost over inputs.
    SearchInputs,
    /// Everything fixed: a plain concrete re-execution (used for
    /// `--transform-only` debugging and the counterexample phase's
    /// bad-output runs), with no solver-facing macros at all.
    ConcreteRun,
}

impl SearchMode {
    /// The `cost_i ⊙ goal` comparison guarding the assert-forcing scope
    /// (§4.5 item 4); `ConcreteRun` has nothing to force, so there is no
    /// scope to open at all.
    fn comparison_operator(self) -> Option<&'static str> {
        match self {
            SearchMode::SearchInputs => Some(">"),
            SearchMode::SearchAlignments => Some("<"),
            SearchMode::ConcreteRun => None,
        }
    }
}

pub struct DriverOptions<'a> {
    pub concretes: &'a [Concretes],
    pub query_size: i64,
    pub goal: i64,
    pub add_symbolic_cost: bool,
    pub mode: SearchMode,
    pub precondition: &'a Precondition,
}

fn ty_str(ty: Type) -> &'static str {
    match ty {
        Type::Int => "int",
        Type::Float => "float",
    }
}

fn emit_macros(out: &mut String, search_mode: bool) {
    if search_mode {
        out.push_str("#define ASSERT(cond) do { if (!(cond)) return checkdp_goal + 1; } while (0)\n");
        out.push_str("#define OUTPUT(expr) ((void) 0)\n");
        out.push_str("#define ASSUME(cond) klee_assume(cond)\n");
        out.push_str("#define ASSUME_HOLE(cond) klee_assume(cond)\n");
    } else {
        out.push_str("#define ASSERT(cond) do { if (!(cond)) fprintf(stderr, \"assertion failed: %s:%d\\n\", __FILE__, __LINE__); } while (0)\n");
        out.push_str("#define OUTPUT(expr) printf(\"%d\\n\", (expr))\n");
        out.push_str("#define ASSUME(cond) ((void) 0)\n");
        out.push_str("#define ASSUME_HOLE(cond) ((void) 0)\n");
    }
}

fn render_function(function: &Function) -> String {
    let mut out = String::new();
    let params: Vec<String> = function
        .params
        .iter()
        .map(|p| if p.is_array { format!("{} {}[]", ty_str(p.ty), p.name) } else { format!("{} {}", ty_str(p.ty), p.name) })
        .collect();
    let _ = write!(out, "int {}({}) {{\n", function.name, params.join(", "));
    out.push_str(&print_block(&function.body, 1));
    out.push_str("\n}\n");
    out
}

fn per_index_comment(class: PreconditionClass) -> &'static str {
    match class {
        PreconditionClass::AllDiffer => "delta_q[i] in [-1, 1] for every i",
        PreconditionClass::OneDiffer => "exactly one index differs, by at most 1",
        PreconditionClass::Decreasing => "delta_q[i] in [-1, 0] for every i",
        PreconditionClass::Increasing => "delta_q[i] in [0, 1] for every i",
    }
}

fn seed_input_assumptions(out: &mut String, opts: &DriverOptions, query_name: &str, aligned_query_name: &str) {
    let (lo, hi) = opts.precondition.per_index_bounds();
    let _ = writeln!(out, "    // {}", per_index_comment(opts.precondition.class));
    let _ = writeln!(out, "    for (int i = 0; i < size; i++) {{");
    let _ = writeln!(out, "        klee_assume({}[i] >= -10 && {}[i] <= 10);", query_name, query_name);
    if opts.precondition.is_single_index() {
        let _ = writeln!(out, "        klee_assume(i == checkdp_one_differ_index ? ({}[i] >= {} && {}[i] <= {}) : {}[i] == 0);", aligned_query_name, lo, aligned_query_name, hi, aligned_query_name);
    } else {
        let _ = writeln!(out, "        klee_assume({}[i] >= {} && {}[i] <= {});", aligned_query_name, lo, aligned_query_name, hi);
    }
    let _ = writeln!(out, "    }}");
    for assume in &opts.precondition.assumes {
        if assume.is_hole {
            continue;
        }
        let text = assume.expr_text.replace("size", &opts.query_size.to_string());
        let _ = writeln!(out, "    ASSUME({});", text);
    }
}

fn seed_alignment_assumptions(out: &mut String, tags: &[AlignmentSlotTag]) {
    for (i, tag) in tags.iter().enumerate() {
        match tag {
            AlignmentSlotTag::Selector => {
                let _ = writeln!(out, "    klee_assume(alignment_array[{}] == 0 || alignment_array[{}] == 1);", i, i);
            }
            _ => {
                let _ = writeln!(out, "    klee_assume(alignment_array[{}] >= -4 && alignment_array[{}] <= 4);", i, i);
                let _ = writeln!(out, "    ASSUME_HOLE(alignment_array[{}] == 0);", i);
            }
        }
    }
}

fn render_concrete_value(value: &ConcreteValue) -> String {
    match value {
        ConcreteValue::Scalar(n) => n.to_string(),
        ConcreteValue::Sequence(items) => format!("{{{}}}", items.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ")),
    }
}

/// Same rendering, exposed for the probabilistic validator (§4.7), which
/// substitutes concrete values into a PSI model template rather than a C
/// driver but needs the identical C-literal textual form.
pub fn render_concrete_value_for_validator(value: &ConcreteValue) -> String {
    render_concrete_value(value)
}

/// Renders the complete driver program per §4.5.
pub fn render(function: &Function, post: &PostprocessOutput, tags: &[AlignmentSlotTag], opts: &DriverOptions) -> String {
    let is_search_mode = !matches!(opts.mode, SearchMode::ConcreteRun);
    let mut out = String::new();
    out.push_str("#include <stdio.h>\n");
    if is_search_mode {
        out.push_str("#include <klee/klee.h>\n");
    }
    let _ = writeln!(out, "static const int checkdp_goal = {};", opts.goal);
    out.push('\n');
    emit_macros(&mut out, is_search_mode);
    out.push('\n');
    out.push_str(&render_function(function));
    out.push('\n');

    out.push_str("int main(void) {\n");
    let sample_len = post.sample_size.sample_size(opts.query_size);
    let _ = writeln!(out, "    int size = {};", opts.query_size);
    let _ = writeln!(out, "    int query[{}];", opts.query_size);
    let _ = writeln!(out, "    float symbolic_cost[{}];", opts.concretes.len().max(1));
    let _ = writeln!(out, "    float sample_array[{}];", sample_len.max(1));
    let _ = writeln!(out, "    float alignment_array[{}];", tags.len().max(1));

    let query_name = &function.params[0].name;
    let aligned_query_name = format!("aligned_{}", query_name);

    match opts.mode {
        SearchMode::SearchAlignments => seed_input_assumptions(&mut out, opts, query_name, &aligned_query_name),
        SearchMode::SearchInputs => seed_alignment_assumptions(&mut out, tags),
        SearchMode::ConcreteRun => {}
    }

    for (i, concrete) in opts.concretes.iter().enumerate() {
        let _ = writeln!(out, "    // concrete {}", i);
        for (name, value) in concrete {
            let _ = writeln!(out, "    {} = {};", name, render_concrete_value(value));
        }
        let _ = writeln!(out, "    float cost_{} = {}(query, size, epsilon, {}, {}, sample_array, alignment_array);", i, function.name, aligned_query_name, "0");
        if let Some(op) = opts.mode.comparison_operator() {
            let _ = writeln!(out, "    if (cost_{} {} checkdp_goal) {{", i, op);
            if opts.add_symbolic_cost {
                let _ = writeln!(out, "        ASSUME(cost_{} == symbolic_cost[{}]);", i, i);
            }
            let _ = writeln!(out, "        ASSERT(0);");
            let _ = writeln!(out, "    }}");
        }
    }

    out.push_str("    return 0;\n");
    out.push_str("}\n");
    out
}

/// Convenience wrapper used by tests and `--transform-only` debugging: a
/// single concrete run with the all-zero alignment and no symbolic
/// search, just executing the instrumented function.
pub fn fill_default(function: &Function, post: &PostprocessOutput, tags: &[AlignmentSlotTag], precondition: &Precondition, goal: i64, query_size: i64) -> String {
    let concretes = vec![Concretes::new()];
    let opts = DriverOptions { concretes: &concretes, query_size, goal, add_symbolic_cost: false, mode: SearchMode::ConcreteRun, precondition };
    render(function, post, tags, &opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Param, Statement};
    use crate::contracts::PreconditionClass;
    use crate::error::SourceLocation;
    use crate::postprocess::SampleSizeClosure;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn function() -> Function {
        Function {
            name: "checkdp_main".to_string(),
            params: vec![
                Param { name: "query".to_string(), ty: Type::Int, is_array: true, source_location: loc() },
                Param { name: "size".to_string(), ty: Type::Int, is_array: false, source_location: loc() },
                Param { name: "epsilon".to_string(), ty: Type::Float, is_array: false, source_location: loc() },
            ],
            return_type: Type::Int,
            body: vec![Statement::Return { value: print_expr_zero(), source_location: loc() }],
            source_location: loc(),
        }
    }

    fn print_expr_zero() -> crate::ast::Expr {
        crate::ast::Expr::IntLit(0)
    }

    fn post_output(function: Function) -> PostprocessOutput {
        PostprocessOutput { function, sample_size: SampleSizeClosure { inside_loops: 1, outside_loops: 0 }, holes: Vec::new() }
    }

    #[test]
    fn test_render_includes_search_macros_for_alignment_search() {
        let precondition = Precondition { class: PreconditionClass::AllDiffer, assumes: Vec::new() };
        let concretes = vec![Concretes::new()];
        let opts = DriverOptions { concretes: &concretes, query_size: 4, goal: 1, add_symbolic_cost: false, mode: SearchMode::SearchAlignments, precondition: &precondition };
        let post = post_output(function());
        let rendered = render(&function(), &post, &[AlignmentSlotTag::Constant], &opts);
        assert!(rendered.contains("klee_assume"));
        assert!(rendered.contains("checkdp_main"));
    }

    #[test]
    fn test_fill_default_produces_concrete_run_macros() {
        let precondition = Precondition { class: PreconditionClass::OneDiffer, assumes: Vec::new() };
        let post = post_output(function());
        let rendered = fill_default(&function(), &post, &[], &precondition, 1, 8);
        assert!(rendered.contains("printf"));
        assert!(!rendered.contains("klee_assume"));
    }
}
