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

//! The postprocessor (§4.4): rewrites the instrumented function's
//! signature so the distance variables, the sample array, the alignment
//! array, and user-defined holes all become explicit parameters, and
//! retypes the function to return `int`. Also computes the sample-size
//! closure the driver uses to size the sample array.

use crate::ast::{Expr, Function, Param, Type};
use crate::constants;
use crate::contracts::Precondition;
use crate::error::{ConfigError, SourceLocation};
use crate::preprocess::parse_expr_text;
use crate::types::TypeEnv;
use std::collections::HashSet;

/// `sample_size(query_size) = inside_loops * query_size + outside_loops`,
/// derived from the `Lap` counts `transform` tallies during its walk.
#[derive(Debug, Clone, Copy)]
pub struct SampleSizeClosure {
    pub inside_loops: i64,
    pub outside_loops: i64,
}

impl SampleSizeClosure {
    pub fn sample_size(&self, query_size: i64) -> i64 {
        self.inside_loops * query_size + self.outside_loops
    }
}

pub struct PostprocessOutput {
    pub function: Function,
    pub sample_size: SampleSizeClosure,
    pub holes: Vec<String>,
}

fn param(name: &str, ty: Type, is_array: bool, location: &SourceLocation) -> Param {
    Param { name: name.to_string(), ty, is_array, source_location: location.clone() }
}

/// Extracts user-defined hole names from `ASSUME_HOLE` clauses: any
/// identifier in the clause's expression that isn't already a function
/// parameter is a fresh hole the driver must declare and feed in.
fn collect_holes(precondition: &Precondition, known: &HashSet<String>, location: &SourceLocation) -> Result<Vec<String>, ConfigError> {
    let mut holes = Vec::new();
    let mut seen: HashSet<String> = known.clone();
    for assume in &precondition.assumes {
        if !assume.is_hole {
            continue;
        }
        let expr = parse_expr_text(&assume.expr_text, location)?;
        let mut free = HashSet::new();
        collect_idents(&expr, &mut free);
        let mut names: Vec<&String> = free.iter().collect();
        names.sort();
        for name in names {
            if seen.insert(name.clone()) {
                holes.push(name.clone());
            }
        }
    }
    Ok(holes)
}

fn collect_idents(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Ident(name) => {
            out.insert(name.clone());
        }
        Expr::Index(base, idx) => {
            collect_idents(base, out);
            collect_idents(idx, out);
        }
        Expr::Unary(_, e) => collect_idents(e, out),
        Expr::Binary(_, l, r) => {
            collect_idents(l, out);
            collect_idents(r, out);
        }
        Expr::Ternary(c, t, f) => {
            collect_idents(c, out);
            collect_idents(t, out);
            collect_idents(f, out);
        }
        Expr::Lap(s) => collect_idents(s, out),
        Expr::Call(_, args) => {
            for a in args {
                collect_idents(a, out);
            }
        }
        Expr::IntLit(_) => {}
    }
}

pub fn postprocess(
    mut function: Function,
    type_env: &TypeEnv,
    precondition: &Precondition,
    lap_inside_loops: usize,
    lap_outside_loops: usize,
) -> Result<PostprocessOutput, ConfigError> {
    let location = function.source_location.clone();
    let query_name = function.params[0].name.clone();

    let mut new_params = Vec::new();
    if let Some(vt) = type_env.get(&query_name) {
        if vt.aligned.is_tracked() {
            new_params.push(param(&constants::aligned_distance_name(&query_name), Type::Float, true, &location));
        }
    }
    for p in function.params.iter().skip(1) {
        if let Some(vt) = type_env.get(&p.name) {
            if vt.shadow.is_tracked() {
                new_params.push(param(&constants::shadow_distance_name(&p.name), p.ty, p.is_array, &location));
            }
        }
    }

    new_params.push(param(constants::SAMPLE_ARRAY, Type::Float, true, &location));
    new_params.push(param(constants::ALIGNMENT_ARRAY, Type::Float, true, &location));

    let known: HashSet<String> = function.params.iter().map(|p| p.name.clone()).collect();
    let holes = collect_holes(precondition, &known, &location)?;
    for hole in &holes {
        new_params.push(param(hole, Type::Int, false, &location));
    }

    function.params.extend(new_params);
    function.return_type = Type::Int;

    Ok(PostprocessOutput {
        function,
        sample_size: SampleSizeClosure { inside_loops: lap_inside_loops as i64, outside_loops: lap_outside_loops as i64 },
        holes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use crate::contracts::{AssumeClause, PreconditionClass};
    use crate::types::{BaseType, Distance, VarType};

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn base_function() -> Function {
        Function {
            name: "f".to_string(),
            params: vec![param("q", Type::Int, true, &loc()), param("size", Type::Int, false, &loc()), param("epsilon", Type::Float, false, &loc())],
            return_type: Type::Int,
            body: Vec::<Statement>::new(),
            source_location: loc(),
        }
    }

    #[test]
    fn test_lifts_query_aligned_distance_as_parameter() {
        let mut env = TypeEnv::new();
        env.declare("q", VarType { aligned: Distance::Tracked, shadow: Distance::Zero, base: BaseType::Int, is_array: true });
        let precondition = Precondition { class: PreconditionClass::AllDiffer, assumes: Vec::new() };
        let out = postprocess(base_function(), &env, &precondition, 1, 2).unwrap();
        assert!(out.function.params.iter().any(|p| p.name == "aligned_q"));
        assert_eq!(out.function.return_type, Type::Int);
    }

    #[test]
    fn test_sample_size_closure() {
        let env = TypeEnv::new();
        let precondition = Precondition { class: PreconditionClass::AllDiffer, assumes: Vec::new() };
        let out = postprocess(base_function(), &env, &precondition, 3, 1).unwrap();
        assert_eq!(out.sample_size.sample_size(10), 31);
    }

    #[test]
    fn test_assume_hole_introduces_hole_parameter() {
        let env = TypeEnv::new();
        let precondition = Precondition {
            class: PreconditionClass::AllDiffer,
            assumes: vec![AssumeClause { expr_text: "h1 > 0".to_string(), is_hole: true }],
        };
        let out = postprocess(base_function(), &env, &precondition, 0, 0).unwrap();
        assert_eq!(out.holes, vec!["h1".to_string()]);
        assert!(out.function.params.iter().any(|p| p.name == "h1"));
    }
}
