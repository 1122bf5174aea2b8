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

//! The preprocessor (§4.1): validates the input program, parses the three
//! leading annotation strings (distances, precondition, goal), rewrites
//! `Lap` scales and the goal to clear rational denominators, and builds
//! the initial two-track type environment handed to the transformer.

mod rational;

pub use rational::Rational;

use crate::ast::{Expr, Function, Statement, Type};
use crate::constants::PREFIX;
use crate::contracts::{AssumeClause, Precondition, PreconditionClass};
use crate::error::{ConfigError, SourceLocation};
use crate::parser::Parser;
use crate::lexer::Lexer;
use crate::types::{BaseType, Distance, TypeEnv, VarType};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Annotation {
    D0,
    DStar,
}

impl Annotation {
    fn to_distance(self) -> Distance {
        match self {
            Annotation::D0 => Distance::Zero,
            Annotation::DStar => Distance::Tracked,
        }
    }
}

/// Output of preprocessing: a cleaned function (annotation statements
/// already stripped by the parser), the initial type environment, the
/// parsed precondition, and the scaled goal.
pub struct PreprocessOutput {
    pub function: Function,
    pub type_env: TypeEnv,
    pub precondition: Precondition,
    pub goal: i64,
    pub scale_factor: i64,
}

pub fn preprocess(annotations: Vec<String>, mut function: Function) -> Result<PreprocessOutput, ConfigError> {
    if annotations.len() != 3 {
        return Err(ConfigError::MalformedAnnotation {
            text: annotations.join(";"),
            reason: "expected exactly three leading annotation strings".to_string(),
            location: function.source_location.clone(),
        });
    }

    validate_contract(&function)?;

    let distances = parse_distance_annotation(&annotations[0], &function.source_location)?;
    let precondition = parse_precondition_annotation(&annotations[1], &function.source_location)?;
    let goal_expr = parse_goal_annotation(&annotations[2], &function.source_location)?;

    let mut type_env = TypeEnv::new();
    for param in &function.params {
        let (aligned, shadow) = distances.get(&param.name).copied().ok_or_else(|| ConfigError::MissingParameterAnnotation {
            name: param.name.clone(),
            location: param.source_location.clone(),
        })?;
        let base = match param.ty {
            Type::Int => BaseType::Int,
            Type::Float => BaseType::Float,
        };
        type_env.declare(
            &param.name,
            VarType { aligned: aligned.to_distance(), shadow: shadow.to_distance(), base, is_array: param.is_array },
        );
    }
    for name in distances.keys() {
        if !function.params.iter().any(|p| &p.name == name) {
            return Err(ConfigError::ExtraAnnotation { name: name.clone(), location: function.source_location.clone() });
        }
    }

    let scales = collect_lap_scales(&function.body);
    let mut denominators: Vec<i64> = Vec::new();
    for scale in &scales {
        if let Some(r) = rational::try_extract_rational(scale) {
            // denominator(1/scale) == numerator(scale), once reduced.
            let inv = Rational::new(r.den, r.num).reduced();
            denominators.push(inv.den);
        }
    }
    let goal_rational = rational::try_extract_rational(&goal_expr).unwrap_or(Rational::new(0, 1));
    denominators.push(goal_rational.den);

    let scale_factor = denominators.into_iter().fold(1i64, rational::lcm);

    if scale_factor != 1 {
        rescale_laps(&mut function.body, scale_factor);
    }
    let goal = goal_rational.num * scale_factor / goal_rational.den;

    Ok(PreprocessOutput { function, type_env, precondition, goal, scale_factor })
}

fn validate_contract(function: &Function) -> Result<(), ConfigError> {
    if function.params.len() < 3 {
        return Err(ConfigError::TooFewParameters { location: function.source_location.clone() });
    }
    let query = &function.params[0];
    if !query.is_array {
        return Err(ConfigError::WrongParameterShape {
            index: 0,
            name: query.name.clone(),
            expected: "an array".to_string(),
            location: query.source_location.clone(),
        });
    }
    let size = &function.params[1];
    if size.is_array || size.ty != Type::Int {
        return Err(ConfigError::WrongParameterShape {
            index: 1,
            name: size.name.clone(),
            expected: "a scalar int".to_string(),
            location: size.source_location.clone(),
        });
    }
    let epsilon = &function.params[2];
    if epsilon.is_array {
        return Err(ConfigError::WrongParameterShape {
            index: 2,
            name: epsilon.name.clone(),
            expected: "a scalar numeric".to_string(),
            location: epsilon.source_location.clone(),
        });
    }

    for param in &function.params {
        check_reserved_name(&param.name, &param.source_location)?;
    }
    check_block(&function.body, false)?;
    Ok(())
}

fn check_reserved_name(name: &str, location: &SourceLocation) -> Result<(), ConfigError> {
    if name.starts_with(PREFIX) {
        return Err(ConfigError::ReservedNameCollision { name: name.to_string(), prefix: PREFIX.to_string(), location: location.clone() });
    }
    Ok(())
}

fn check_block(block: &[Statement], in_branch: bool) -> Result<(), ConfigError> {
    for stmt in block {
        match stmt {
            Statement::Decl { name, is_array, init, source_location, .. } => {
                check_reserved_name(name, source_location)?;
                if *is_array && in_branch {
                    return Err(ConfigError::ArrayInBranch { name: name.clone(), location: source_location.clone() });
                }
                if let Some(e) = init {
                    check_expr(e, source_location)?;
                }
            }
            Statement::Assign { target, value, source_location } => {
                check_reserved_name(target.base_name(), source_location)?;
                check_expr(value, source_location)?;
            }
            Statement::If { cond, then_branch, else_branch, source_location } => {
                check_expr(cond, source_location)?;
                check_block(then_branch, true)?;
                check_block(else_branch, true)?;
            }
            Statement::While { cond, body, source_location } => {
                check_expr(cond, source_location)?;
                check_block(body, true)?;
            }
            Statement::Output { value, source_location } => check_expr(value, source_location)?,
            Statement::Assert { cond, source_location } => check_expr(cond, source_location)?,
            Statement::Return { source_location, .. } => {
                return Err(ConfigError::ReturnInUserCode { location: source_location.clone() });
            }
        }
    }
    Ok(())
}

fn check_expr(expr: &Expr, location: &SourceLocation) -> Result<(), ConfigError> {
    match expr {
        Expr::IntLit(_) | Expr::Ident(_) => Ok(()),
        Expr::Index(base, idx) => {
            check_expr(base, location)?;
            check_expr(idx, location)
        }
        Expr::Unary(_, e) => check_expr(e, location),
        Expr::Binary(_, l, r) => {
            check_expr(l, location)?;
            check_expr(r, location)
        }
        Expr::Ternary(c, t, f) => {
            check_expr(c, location)?;
            check_expr(t, location)?;
            check_expr(f, location)
        }
        Expr::Lap(scale) => check_expr(scale, location),
        Expr::Call(name, args) => {
            if name != "OUTPUT" {
                return Err(ConfigError::UnsupportedCall { name: name.clone(), location: location.clone() });
            }
            for a in args {
                check_expr(a, location)?;
            }
            Ok(())
        }
    }
}

fn collect_lap_scales(block: &[Statement]) -> Vec<Expr> {
    let mut scales = Vec::new();
    fn walk_expr(expr: &Expr, out: &mut Vec<Expr>) {
        if let Expr::Lap(scale) = expr {
            out.push((**scale).clone());
        }
        match expr {
            Expr::Index(a, b) | Expr::Binary(_, a, b) => {
                walk_expr(a, out);
                walk_expr(b, out);
            }
            Expr::Unary(_, e) => walk_expr(e, out),
            Expr::Ternary(a, b, c) => {
                walk_expr(a, out);
                walk_expr(b, out);
                walk_expr(c, out);
            }
            Expr::Lap(s) => walk_expr(s, out),
            Expr::Call(_, args) => {
                for a in args {
                    walk_expr(a, out);
                }
            }
            Expr::IntLit(_) | Expr::Ident(_) => {}
        }
    }
    fn walk_block(block: &[Statement], out: &mut Vec<Expr>) {
        for stmt in block {
            match stmt {
                Statement::Decl { init: Some(e), .. } => walk_expr(e, out),
                Statement::Decl { .. } => {}
                Statement::Assign { value, .. } => walk_expr(value, out),
                Statement::If { cond, then_branch, else_branch, .. } => {
                    walk_expr(cond, out);
                    walk_block(then_branch, out);
                    walk_block(else_branch, out);
                }
                Statement::While { cond, body, .. } => {
                    walk_expr(cond, out);
                    walk_block(body, out);
                }
                Statement::Output { value, .. } => walk_expr(value, out),
                Statement::Assert { cond, .. } => walk_expr(cond, out),
                Statement::Return { value, .. } => walk_expr(value, out),
            }
        }
    }
    walk_block(block, &mut scales);
    scales
}

fn rescale_laps(block: &mut [Statement], factor: i64) {
    fn rescale_expr(expr: &mut Expr, factor: i64) {
        if let Expr::Lap(scale) = expr {
            let old = std::mem::replace(scale.as_mut(), Expr::IntLit(0));
            *scale.as_mut() = Expr::Binary(crate::ast::BinOp::Div, Box::new(old), Box::new(Expr::IntLit(factor)));
            return;
        }
        match expr {
            Expr::Index(a, b) | Expr::Binary(_, a, b) => {
                rescale_expr(a, factor);
                rescale_expr(b, factor);
            }
            Expr::Unary(_, e) => rescale_expr(e, factor),
            Expr::Ternary(a, b, c) => {
                rescale_expr(a, factor);
                rescale_expr(b, factor);
                rescale_expr(c, factor);
            }
            Expr::Call(_, args) => {
                for a in args {
                    rescale_expr(a, factor);
                }
            }
            Expr::IntLit(_) | Expr::Ident(_) | Expr::Lap(_) => {}
        }
    }
    for stmt in block.iter_mut() {
        match stmt {
            Statement::Decl { init: Some(e), .. } => rescale_expr(e, factor),
            Statement::Decl { .. } => {}
            Statement::Assign { value, .. } => rescale_expr(value, factor),
            Statement::If { cond, then_branch, else_branch, .. } => {
                rescale_expr(cond, factor);
                rescale_laps(then_branch, factor);
                rescale_laps(else_branch, factor);
            }
            Statement::While { cond, body, .. } => {
                rescale_expr(cond, factor);
                rescale_laps(body, factor);
            }
            Statement::Output { value, .. } => rescale_expr(value, factor),
            Statement::Assert { cond, .. } => rescale_expr(cond, factor),
            Statement::Return { value, .. } => rescale_expr(value, factor),
        }
    }
}

fn parse_distance_annotation(text: &str, location: &SourceLocation) -> Result<HashMap<String, (Annotation, Annotation)>, ConfigError> {
    let mut out = HashMap::new();
    for segment in text.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, rest) = segment.split_once(':').ok_or_else(|| ConfigError::MalformedAnnotation {
            text: segment.to_string(),
            reason: "expected 'name : <D, D>'".to_string(),
            location: location.clone(),
        })?;
        let name = name.trim();
        check_reserved_name(name, location)?;
        let rest = rest.trim();
        let inner = rest
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or_else(|| ConfigError::MalformedAnnotation {
                text: segment.to_string(),
                reason: "distance pair must be wrapped in '<' and '>'".to_string(),
                location: location.clone(),
            })?;
        let (aligned_s, shadow_s) = inner.split_once(',').ok_or_else(|| ConfigError::MalformedAnnotation {
            text: segment.to_string(),
            reason: "expected two comma-separated distances".to_string(),
            location: location.clone(),
        })?;
        let aligned = parse_distance_token(aligned_s.trim(), segment, location)?;
        let shadow = parse_distance_token(shadow_s.trim(), segment, location)?;
        out.insert(name.to_string(), (aligned, shadow));
    }
    Ok(out)
}

fn parse_distance_token(token: &str, segment: &str, location: &SourceLocation) -> Result<Annotation, ConfigError> {
    match token {
        "0" => Ok(Annotation::D0),
        "*" => Ok(Annotation::DStar),
        other => Err(ConfigError::MalformedAnnotation {
            text: segment.to_string(),
            reason: format!("distance must be '0' or '*', found '{}'", other),
            location: location.clone(),
        }),
    }
}

fn parse_precondition_annotation(text: &str, location: &SourceLocation) -> Result<Precondition, ConfigError> {
    let mut parts = text.split(';').map(str::trim).filter(|s| !s.is_empty());
    let head = parts.next().ok_or_else(|| ConfigError::MalformedAnnotation {
        text: text.to_string(),
        reason: "expected 'PRECONDITION:CLASS'".to_string(),
        location: location.clone(),
    })?;
    let class_text = head.strip_prefix("PRECONDITION:").ok_or_else(|| ConfigError::MalformedAnnotation {
        text: head.to_string(),
        reason: "expected a leading 'PRECONDITION:' tag".to_string(),
        location: location.clone(),
    })?;
    let class = PreconditionClass::parse(class_text.trim(), location)?;

    let mut assumes = Vec::new();
    for part in parts {
        let (is_hole, inner) = if let Some(inner) = part.strip_prefix("ASSUME_HOLE(") {
            (true, inner)
        } else if let Some(inner) = part.strip_prefix("ASSUME(") {
            (false, inner)
        } else {
            return Err(ConfigError::MalformedAnnotation {
                text: part.to_string(),
                reason: "expected 'ASSUME(expr)' or 'ASSUME_HOLE(expr)'".to_string(),
                location: location.clone(),
            });
        };
        let expr_text = inner.strip_suffix(')').ok_or_else(|| ConfigError::MalformedAnnotation {
            text: part.to_string(),
            reason: "unbalanced parentheses".to_string(),
            location: location.clone(),
        })?;
        assumes.push(AssumeClause { expr_text: expr_text.trim().to_string(), is_hole });
    }
    Ok(Precondition { class, assumes })
}

fn parse_goal_annotation(text: &str, location: &SourceLocation) -> Result<Expr, ConfigError> {
    let text = text.trim();
    let inner = text.strip_prefix("CHECK:").ok_or_else(|| ConfigError::MalformedAnnotation {
        text: text.to_string(),
        reason: "expected a leading 'CHECK:' tag".to_string(),
        location: location.clone(),
    })?;
    parse_expr_text(inner.trim(), location)
}

pub fn parse_expr_text(text: &str, location: &SourceLocation) -> Result<Expr, ConfigError> {
    let text = text.trim().trim_start_matches('(').trim_end_matches(')');
    let mut lexer = Lexer::new(text, location.file.clone());
    let tokens = lexer.tokenize().map_err(|e| ConfigError::MalformedAnnotation {
        text: text.to_string(),
        reason: e.to_string(),
        location: location.clone(),
    })?;
    let mut parser = Parser::new(tokens);
    parser.parse_expr().map_err(|e| ConfigError::MalformedAnnotation {
        text: text.to_string(),
        reason: e.to_string(),
        location: location.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Param;

    fn dummy_function(params: Vec<Param>, body: Vec<Statement>) -> Function {
        Function { name: "f".to_string(), params, return_type: Type::Int, body, source_location: SourceLocation::unknown() }
    }

    fn query_param() -> Param {
        Param { name: "q".to_string(), ty: Type::Int, is_array: true, source_location: SourceLocation::unknown() }
    }
    fn size_param() -> Param {
        Param { name: "size".to_string(), ty: Type::Int, is_array: false, source_location: SourceLocation::unknown() }
    }
    fn epsilon_param() -> Param {
        Param { name: "epsilon".to_string(), ty: Type::Float, is_array: false, source_location: SourceLocation::unknown() }
    }

    #[test]
    fn test_parse_distance_annotation() {
        let map = parse_distance_annotation("q: <*, 0>; size:<0,0>;epsilon:<0,0>", &SourceLocation::unknown()).unwrap();
        assert_eq!(map.get("q"), Some(&(Annotation::DStar, Annotation::D0)));
        assert_eq!(map.get("size"), Some(&(Annotation::D0, Annotation::D0)));
    }

    #[test]
    fn test_parse_precondition_with_assume() {
        let p = parse_precondition_annotation("PRECONDITION:ALL_DIFFER;ASSUME(size>0)", &SourceLocation::unknown()).unwrap();
        assert_eq!(p.class, PreconditionClass::AllDiffer);
        assert_eq!(p.assumes.len(), 1);
        assert_eq!(p.assumes[0].expr_text, "size>0");
        assert!(!p.assumes[0].is_hole);
    }

    #[test]
    fn test_parse_goal() {
        let e = parse_goal_annotation("CHECK:(1)", &SourceLocation::unknown()).unwrap();
        match e {
            Expr::IntLit(1) => {}
            other => panic!("expected IntLit(1), got {:?}", other),
        }
    }

    #[test]
    fn test_preprocess_builds_type_env_from_params() {
        let params = vec![query_param(), size_param(), epsilon_param()];
        let function = dummy_function(params, vec![]);
        let annotations = vec![
            "q: <*, 0>; size:<0,0>; epsilon:<0,0>".to_string(),
            "PRECONDITION:ALL_DIFFER".to_string(),
            "CHECK:(1)".to_string(),
        ];
        let out = preprocess(annotations, function).unwrap();
        assert!(out.type_env.get("q").unwrap().aligned.is_tracked());
        assert_eq!(out.goal, 1);
        assert_eq!(out.scale_factor, 1);
    }

    #[test]
    fn test_preprocess_rejects_missing_parameter_annotation() {
        let params = vec![query_param(), size_param(), epsilon_param()];
        let function = dummy_function(params, vec![]);
        let annotations = vec![
            "q: <*, 0>; size:<0,0>".to_string(),
            "PRECONDITION:ALL_DIFFER".to_string(),
            "CHECK:(1)".to_string(),
        ];
        assert!(preprocess(annotations, function).is_err());
    }

    #[test]
    fn test_preprocess_rejects_too_few_parameters() {
        let function = dummy_function(vec![query_param()], vec![]);
        let annotations = vec!["q: <*, 0>".to_string(), "PRECONDITION:ALL_DIFFER".to_string(), "CHECK:(1)".to_string()];
        assert!(preprocess(annotations, function).is_err());
    }

    #[test]
    fn test_preprocess_rejects_return_in_user_code() {
        let params = vec![query_param(), size_param(), epsilon_param()];
        let body = vec![Statement::Return { value: Expr::IntLit(0), source_location: SourceLocation::unknown() }];
        let function = dummy_function(params, body);
        let annotations = vec![
            "q: <*, 0>; size:<0,0>; epsilon:<0,0>".to_string(),
            "PRECONDITION:ALL_DIFFER".to_string(),
            "CHECK:(1)".to_string(),
        ];
        assert!(preprocess(annotations, function).is_err());
    }

    #[test]
    fn test_lcm_scaling_rewrites_scale_and_goal() {
        let params = vec![query_param(), size_param(), epsilon_param()];
        let body = vec![Statement::Decl {
            name: "eta".to_string(),
            ty: Type::Float,
            is_array: false,
            array_len: None,
            init: Some(Expr::Lap(Box::new(Expr::IntLit(4)))),
            source_location: SourceLocation::unknown(),
        }];
        let function = dummy_function(params, body);
        let annotations = vec![
            "q: <*, 0>; size:<0,0>; epsilon:<0,0>".to_string(),
            "PRECONDITION:ALL_DIFFER".to_string(),
            "CHECK:(1)".to_string(),
        ];
        let out = preprocess(annotations, function).unwrap();
        assert_eq!(out.scale_factor, 4);
        assert_eq!(out.goal, 4);
    }
}
