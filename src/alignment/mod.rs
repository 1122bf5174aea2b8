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

//! The alignment template generator (§4.3). For each random sample `η`
//! emitted by `transform`, finds the branch conditions and dynamically
//! tracked variables that are *live* at `η`'s point of use, then emits a
//! parametric expression — a nested conditional over those conditions,
//! bottoming out in an affine combination of the live variables — whose
//! coefficients are holes drawn from a single shared `alignment_array`.
//!
//! Per-`η` dependence analysis runs sequentially (it walks the whole
//! function body once), but template *shape* construction is independent
//! per `η` — each gets its own locally-numbered slot range — and only the
//! final merge into the shared array needs to happen in program order, so
//! that stage runs the `η`s through `rayon` before the slots are
//! renumbered into one contiguous range.

use crate::ast::{BinOp, Expr, Function, Statement};
use crate::constants;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AlignmentSlotTag {
    Constant,
    Variable,
    Selector,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct EtaProfile {
    pub live_conditions: Vec<Expr>,
    pub live_variables: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AlignmentTemplates {
    pub random_distance: HashMap<String, Expr>,
    pub selector: HashMap<String, Expr>,
    pub tags: Vec<AlignmentSlotTag>,
}

/// Collects free identifiers (array bases and subscripts both count) in
/// an expression.
fn free_idents(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Ident(name) => {
            out.insert(name.clone());
        }
        Expr::Index(base, idx) => {
            free_idents(base, out);
            free_idents(idx, out);
        }
        Expr::Unary(_, e) => free_idents(e, out),
        Expr::Binary(_, l, r) => {
            free_idents(l, out);
            free_idents(r, out);
        }
        Expr::Ternary(c, t, f) => {
            free_idents(c, out);
            free_idents(t, out);
            free_idents(f, out);
        }
        Expr::Lap(s) => free_idents(s, out),
        Expr::Call(_, args) => {
            for a in args {
                free_idents(a, out);
            }
        }
        Expr::IntLit(_) => {}
    }
}

fn transitive_closure(start: &HashSet<String>, def_atoms: &HashMap<String, HashSet<String>>) -> HashSet<String> {
    let mut result = HashSet::new();
    let mut stack: Vec<String> = start.iter().cloned().collect();
    while let Some(n) = stack.pop() {
        if result.insert(n.clone()) {
            if let Some(atoms) = def_atoms.get(&n) {
                for a in atoms {
                    if !result.contains(a) {
                        stack.push(a.clone());
                    }
                }
            }
        }
    }
    result
}

struct AnalysisState {
    def_atoms: HashMap<String, HashSet<String>>,
    defined: HashSet<String>,
    cond_stack: Vec<Expr>,
    defined_at_sample: HashMap<String, HashSet<String>>,
    profiles: HashMap<String, EtaProfile>,
    samples: HashSet<String>,
}

impl AnalysisState {
    fn record_def(&mut self, name: &str, value: &Expr) {
        let mut free = HashSet::new();
        free_idents(value, &mut free);
        self.def_atoms.insert(name.to_string(), free);
        self.defined.insert(name.to_string());
    }

    fn visit_block(&mut self, block: &[Statement]) {
        for stmt in block {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Decl { name, init, .. } => {
                if let Some(value) = init {
                    self.record_def(name, value);
                    if self.samples.contains(name) {
                        self.defined_at_sample.insert(name.clone(), self.defined.clone());
                    }
                } else {
                    self.def_atoms.insert(name.clone(), HashSet::new());
                    self.defined.insert(name.clone());
                }
            }
            Statement::Assign { target, value, .. } => {
                self.record_def(target.base_name(), value);
            }
            Statement::If { cond, then_branch, else_branch, .. } => {
                self.cond_stack.push(cond.clone());
                let snapshot_defined = self.defined.clone();
                let snapshot_atoms = self.def_atoms.clone();
                self.visit_block(then_branch);
                let after_then_defined = std::mem::replace(&mut self.defined, snapshot_defined);
                let after_then_atoms = std::mem::replace(&mut self.def_atoms, snapshot_atoms);
                self.visit_block(else_branch);
                self.defined.extend(after_then_defined);
                for (k, v) in after_then_atoms {
                    self.def_atoms.entry(k).or_insert(v);
                }
                self.cond_stack.pop();
            }
            Statement::While { cond, body, .. } => {
                self.cond_stack.push(cond.clone());
                self.visit_block(body);
                self.cond_stack.pop();
            }
            Statement::Assert { cond, .. } => self.visit_assert(cond),
            Statement::Output { .. } | Statement::Return { .. } => {}
        }
    }

    fn visit_assert(&mut self, cond: &Expr) {
        let mut free = HashSet::new();
        free_idents(cond, &mut free);
        let reached = transitive_closure(&free, &self.def_atoms);

        let sample_names: Vec<String> = reached.iter().filter(|n| self.samples.contains(n.as_str())).cloned().collect();
        for eta in &sample_names {
            let Some(live_at_eta) = self.defined_at_sample.get(eta).cloned() else { continue };
            let profile = self.profiles.entry(eta.clone()).or_default();

            for c in &self.cond_stack {
                let mut cond_atoms = HashSet::new();
                free_idents(c, &mut cond_atoms);
                if cond_atoms.is_subset(&live_at_eta) {
                    let text = crate::ast::print_expr(c);
                    if !profile.live_conditions.iter().any(|existing| crate::ast::print_expr(existing) == text) {
                        profile.live_conditions.push(c.clone());
                    }
                }
            }

            for name in &reached {
                if name == eta || self.samples.contains(name.as_str()) {
                    continue;
                }
                if !live_at_eta.contains(name) {
                    continue;
                }
                if !profile.live_variables.contains(name) {
                    profile.live_variables.push(name.clone());
                }
            }
        }
    }
}

pub fn analyze(function: &Function, samples: &[String]) -> HashMap<String, EtaProfile> {
    let mut state = AnalysisState {
        def_atoms: HashMap::new(),
        defined: HashSet::new(),
        cond_stack: Vec::new(),
        defined_at_sample: HashMap::new(),
        profiles: HashMap::new(),
        samples: samples.iter().cloned().collect(),
    };
    for p in &function.params {
        state.defined.insert(p.name.clone());
        state.def_atoms.insert(p.name.clone(), HashSet::new());
    }
    state.visit_block(&function.body);
    for name in samples {
        state.profiles.entry(name.clone()).or_default();
    }
    state.profiles
}

fn alignment_slot(index: usize) -> Expr {
    Expr::Index(Box::new(Expr::Ident(constants::ALIGNMENT_ARRAY.to_string())), Box::new(Expr::IntLit(index as i64)))
}

fn build_random_distance_rec(conds: &[Expr], vars: &[String], tags: &mut Vec<AlignmentSlotTag>) -> Expr {
    match conds.split_first() {
        None => {
            let k = tags.len();
            tags.push(AlignmentSlotTag::Constant);
            let mut expr = alignment_slot(k);
            for v in vars {
                let slot = tags.len();
                tags.push(AlignmentSlotTag::Variable);
                let term = Expr::Binary(BinOp::Mul, Box::new(alignment_slot(slot)), Box::new(Expr::Ident(v.clone())));
                expr = Expr::Binary(BinOp::Add, Box::new(expr), Box::new(term));
            }
            expr
        }
        Some((c0, rest)) => {
            let t = build_random_distance_rec(rest, vars, tags);
            let f = build_random_distance_rec(rest, vars, tags);
            Expr::Ternary(Box::new(c0.clone()), Box::new(t), Box::new(f))
        }
    }
}

fn build_selector_rec(conds: &[Expr], tags: &mut Vec<AlignmentSlotTag>) -> Expr {
    match conds.split_first() {
        None => {
            let k = tags.len();
            tags.push(AlignmentSlotTag::Selector);
            alignment_slot(k)
        }
        Some((c0, rest)) => {
            let t = build_selector_rec(rest, tags);
            let f = build_selector_rec(rest, tags);
            Expr::Ternary(Box::new(c0.clone()), Box::new(t), Box::new(f))
        }
    }
}

fn selector_template(conds: &[Expr], tags: &mut Vec<AlignmentSlotTag>) -> Expr {
    if conds.is_empty() {
        Expr::IntLit(constants::SELECT_ALIGNED.parse().unwrap_or(0))
    } else {
        build_selector_rec(conds, tags)
    }
}

/// Shifts every `alignment_array[k]` read in `expr` by `offset`, used to
/// splice a locally-numbered per-`η` template into the shared array.
fn shift_slots(expr: Expr, offset: usize) -> Expr {
    match expr {
        Expr::Index(base, idx) => {
            if matches!(base.as_ref(), Expr::Ident(n) if n == constants::ALIGNMENT_ARRAY) {
                if let Expr::IntLit(n) = idx.as_ref() {
                    return Expr::Index(base, Box::new(Expr::IntLit(n + offset as i64)));
                }
            }
            Expr::Index(Box::new(shift_slots(*base, offset)), Box::new(shift_slots(*idx, offset)))
        }
        Expr::Unary(op, e) => Expr::Unary(op, Box::new(shift_slots(*e, offset))),
        Expr::Binary(op, l, r) => Expr::Binary(op, Box::new(shift_slots(*l, offset)), Box::new(shift_slots(*r, offset))),
        Expr::Ternary(c, t, f) => Expr::Ternary(Box::new(shift_slots(*c, offset)), Box::new(shift_slots(*t, offset)), Box::new(shift_slots(*f, offset))),
        other => other,
    }
}

struct LocalTemplate {
    name: String,
    distance_expr: Expr,
    distance_tags: Vec<AlignmentSlotTag>,
    selector_expr: Option<Expr>,
    selector_tags: Vec<AlignmentSlotTag>,
}

pub fn generate_templates(function: &Function, samples: &[String], enable_shadow: bool) -> AlignmentTemplates {
    let profiles = analyze(function, samples);

    let locals: Vec<LocalTemplate> = samples
        .par_iter()
        .map(|name| {
            let empty = EtaProfile::default();
            let profile = profiles.get(name).unwrap_or(&empty);
            let mut distance_tags = Vec::new();
            let distance_expr = build_random_distance_rec(&profile.live_conditions, &profile.live_variables, &mut distance_tags);

            let (selector_expr, selector_tags) = if enable_shadow {
                let mut tags = Vec::new();
                let expr = selector_template(&profile.live_conditions, &mut tags);
                (Some(expr), tags)
            } else {
                (None, Vec::new())
            };

            LocalTemplate { name: name.clone(), distance_expr, distance_tags, selector_expr, selector_tags }
        })
        .collect();

    let mut tags = Vec::new();
    let mut random_distance = HashMap::new();
    let mut selector = HashMap::new();
    for local in locals {
        let offset = tags.len();
        tags.extend(local.distance_tags);
        random_distance.insert(local.name.clone(), shift_slots(local.distance_expr, offset));

        if let Some(sel_expr) = local.selector_expr {
            let offset = tags.len();
            tags.extend(local.selector_tags);
            selector.insert(local.name, shift_slots(sel_expr, offset));
        }
    }

    AlignmentTemplates { random_distance, selector, tags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Param, Type};
    use crate::error::SourceLocation;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn func(body: Vec<Statement>) -> Function {
        Function {
            name: "f".to_string(),
            params: vec![Param { name: "size".to_string(), ty: Type::Int, is_array: false, source_location: loc() }],
            return_type: Type::Int,
            body,
            source_location: loc(),
        }
    }

    #[test]
    fn test_template_with_no_conditions_is_affine_leaf() {
        let body = vec![
            Statement::Decl { name: "eta".to_string(), ty: Type::Float, is_array: false, array_len: None, init: Some(Expr::IntLit(0)), source_location: loc() },
            Statement::Assert { cond: Expr::Binary(BinOp::Eq, Box::new(Expr::Ident("eta".to_string())), Box::new(Expr::IntLit(0))), source_location: loc() },
        ];
        let templates = generate_templates(&func(body), &["eta".to_string()], false);
        assert!(templates.random_distance.contains_key("eta"));
        assert!(!templates.tags.is_empty());
        assert!(matches!(templates.tags[0], AlignmentSlotTag::Constant));
    }

    #[test]
    fn test_selector_collapses_to_literal_when_no_conditions() {
        let body = vec![
            Statement::Decl { name: "eta".to_string(), ty: Type::Float, is_array: false, array_len: None, init: Some(Expr::IntLit(0)), source_location: loc() },
            Statement::Assert { cond: Expr::Ident("eta".to_string()), source_location: loc() },
        ];
        let templates = generate_templates(&func(body), &["eta".to_string()], true);
        let sel = templates.selector.get("eta").unwrap();
        assert!(matches!(sel, Expr::IntLit(_)));
    }

    #[test]
    fn test_branch_condition_becomes_live_when_assert_reaches_eta() {
        let body = vec![
            Statement::Decl { name: "eta".to_string(), ty: Type::Float, is_array: false, array_len: None, init: Some(Expr::IntLit(0)), source_location: loc() },
            Statement::If {
                cond: Expr::Binary(BinOp::Gt, Box::new(Expr::Ident("size".to_string())), Box::new(Expr::IntLit(0))),
                then_branch: vec![Statement::Assert { cond: Expr::Ident("eta".to_string()), source_location: loc() }],
                else_branch: vec![],
                source_location: loc(),
            },
        ];
        let profiles = analyze(&func(body), &["eta".to_string()]);
        assert_eq!(profiles["eta"].live_conditions.len(), 1);
    }
}
