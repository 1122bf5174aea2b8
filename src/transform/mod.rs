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

//! The transformer (§4.2): the two-track type-directed instrumentation
//! pass. Walks the preprocessed AST carrying the type environment `Γ`, a
//! `pc` flag recording whether the enclosing control flow is
//! shadow-divergent, and a `loop_level` counter that suppresses
//! statement emission while a `while` loop's fixed point is still being
//! searched. Produces an instrumented function body plus bookkeeping
//! (`TransformOutput`) the alignment generator and postprocessor consume.

use crate::ast::{BinOp, Expr, Function, LValue, Statement, Type, UnaryOp};
use crate::constants;
use crate::error::{ConfigError, SourceLocation};
use crate::simplify::{abs, simplify};
use crate::types::{BaseType, Distance, TypeEnv, VarType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Track {
    Aligned,
    Shadow,
}

/// Per-pass bookkeeping threaded through the recursive walk. Kept in an
/// explicit context object rather than globals (§9 "shared mutable
/// state"), since `sample_index`/`v_epsilon` allocation and the
/// alignment-array slot allocator are all process-wide within a single
/// transformation pass, not truly global state.
struct Ctx {
    enable_shadow: bool,
    /// >0 while a `while` loop's own fixed point is being searched;
    /// side effects (sample/selector bookkeeping) are suppressed so a
    /// speculative pass doesn't get double-counted.
    exploring: u32,
    /// Tracks lexical while-nesting depth, used only to classify each
    /// `Lap` call as inside or outside a size-indexed loop for the
    /// sample-array sizing closure computed by `postprocess`.
    loop_depth: u32,
    samples: Vec<String>,
    selectors: Vec<String>,
    lap_outside_loops: usize,
    lap_inside_loops: usize,
}

impl Ctx {
    fn new(enable_shadow: bool) -> Self {
        Self { enable_shadow, exploring: 0, loop_depth: 0, samples: Vec::new(), selectors: Vec::new(), lap_outside_loops: 0, lap_inside_loops: 0 }
    }
}

pub struct TransformOutput {
    pub function: Function,
    pub type_env: TypeEnv,
    /// Random-variable names in program order, the table §4.3 consumes.
    pub samples: Vec<String>,
    /// Names of random variables that need a `selector_<name>` driver
    /// parameter (only populated when shadow tracking is enabled).
    pub selectors: Vec<String>,
    pub lap_outside_loops: usize,
    pub lap_inside_loops: usize,
}

pub fn transform(function: Function, env: TypeEnv, enable_shadow: bool) -> Result<TransformOutput, ConfigError> {
    let mut ctx = Ctx::new(enable_shadow);
    let (body, final_env) = transform_block(&function.body, env, false, &mut ctx)?;

    let param_names: Vec<&str> = function.params.iter().map(|p| p.name.as_str()).collect();
    let mut prelude = vec![
        decl(Type::Float, constants::V_EPSILON, Some(Expr::IntLit(0)), &function.source_location),
        decl(Type::Int, constants::SAMPLE_INDEX, Some(Expr::IntLit(0)), &function.source_location),
    ];
    for name in final_env.tracked_locals() {
        if param_names.contains(&name) {
            continue;
        }
        let vt = final_env.get(name).unwrap();
        if vt.aligned.is_tracked() {
            prelude.push(decl(Type::Float, &constants::aligned_distance_name(name), Some(Expr::IntLit(0)), &function.source_location));
        }
        if vt.shadow.is_tracked() {
            prelude.push(decl(Type::Float, &constants::shadow_distance_name(name), Some(Expr::IntLit(0)), &function.source_location));
        }
    }
    for name in &ctx.selectors {
        prelude.push(decl(Type::Int, &constants::selector_name(name), Some(Expr::IntLit(0)), &function.source_location));
    }

    let mut full_body = prelude;
    full_body.extend(body);
    full_body.push(Statement::Return { value: Expr::Ident(constants::V_EPSILON.to_string()), source_location: function.source_location.clone() });

    Ok(TransformOutput {
        function: Function { body: full_body, ..function },
        type_env: final_env,
        samples: ctx.samples,
        selectors: ctx.selectors,
        lap_outside_loops: ctx.lap_outside_loops,
        lap_inside_loops: ctx.lap_inside_loops,
    })
}

fn decl(ty: Type, name: &str, init: Option<Expr>, location: &SourceLocation) -> Statement {
    Statement::Decl { name: name.to_string(), ty, is_array: false, array_len: None, init, source_location: location.clone() }
}

fn assign(name: &str, value: Expr, location: &SourceLocation) -> Statement {
    Statement::Assign { target: LValue::Name(name.to_string()), value, source_location: location.clone() }
}

fn assert_stmt(cond: Expr, location: &SourceLocation) -> Statement {
    Statement::Assert { cond, source_location: location.clone() }
}

// --- distance computation over expressions (T-Assign's structural recursion) ----

fn distance_of_concrete(expr: &Expr, env: &TypeEnv, track: Track) -> Distance {
    match expr {
        Expr::IntLit(_) => Distance::Zero,
        Expr::Ident(name) => lookup_distance(name, None, env, track),
        Expr::Index(base, idx) => {
            if let Expr::Ident(name) = base.as_ref() {
                lookup_distance(name, Some(idx.as_ref()), env, track)
            } else {
                Distance::Tracked
            }
        }
        Expr::Unary(op, inner) => {
            let d = distance_of_concrete(inner, env, track);
            match d {
                Distance::Zero => Distance::Zero,
                Distance::Tracked => Distance::Tracked,
                Distance::Expr(e) => Distance::from_expr(simplify(Expr::Unary(*op, e))),
            }
        }
        Expr::Binary(op, l, r) => {
            let dl = distance_of_concrete(l, env, track);
            let dr = distance_of_concrete(r, env, track);
            combine(*op, dl, dr)
        }
        Expr::Ternary(c, t, f) => {
            let dc = distance_of_concrete(c, env, track);
            let dt = distance_of_concrete(t, env, track);
            let df = distance_of_concrete(f, env, track);
            if dc.is_zero() && dt.is_zero() && df.is_zero() {
                Distance::Zero
            } else if dc.is_tracked() || dt.is_tracked() || df.is_tracked() {
                Distance::Tracked
            } else {
                Distance::from_expr(simplify(Expr::Ternary(Box::new(dc.to_expr()), Box::new(dt.to_expr()), Box::new(df.to_expr()))))
            }
        }
        Expr::Lap(_) => Distance::Tracked,
        Expr::Call(_, _) => Distance::Tracked,
    }
}

fn lookup_distance(name: &str, idx: Option<&Expr>, env: &TypeEnv, track: Track) -> Distance {
    let Some(vt) = env.get(name) else { return Distance::Zero };
    let d = match track {
        Track::Aligned => &vt.aligned,
        Track::Shadow => &vt.shadow,
    };
    match d {
        Distance::Zero => Distance::Zero,
        Distance::Tracked => {
            let var_name = match track {
                Track::Aligned => constants::aligned_distance_name(name),
                Track::Shadow => constants::shadow_distance_name(name),
            };
            let base = Expr::Ident(var_name);
            match idx {
                Some(i) if vt.is_array => Distance::from_expr(Expr::Index(Box::new(base), Box::new(i.clone()))),
                _ => Distance::from_expr(base),
            }
        }
        Distance::Expr(e) => Distance::Expr(e.clone()),
    }
}

fn combine(op: BinOp, l: Distance, r: Distance) -> Distance {
    if l.is_zero() && r.is_zero() {
        return Distance::Zero;
    }
    if l.is_tracked() || r.is_tracked() {
        return Distance::Tracked;
    }
    Distance::from_expr(simplify(Expr::Binary(op, Box::new(l.to_expr()), Box::new(r.to_expr()))))
}

fn is_nonzero_distance(d: &Distance) -> bool {
    match d {
        Distance::Zero => false,
        Distance::Tracked => true,
        Distance::Expr(e) => !matches!(e.as_ref(), Expr::IntLit(0)),
    }
}

fn shadow_diverges(env: &TypeEnv, cond: &Expr) -> bool {
    is_nonzero_distance(&distance_of_concrete(cond, env, Track::Shadow))
}

fn aligned_diverges(env: &TypeEnv, cond: &Expr) -> bool {
    is_nonzero_distance(&distance_of_concrete(cond, env, Track::Aligned))
}

// --- statement-level transformation ------------------------------------

fn transform_block(block: &[Statement], mut env: TypeEnv, pc: bool, ctx: &mut Ctx) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    let mut out = Vec::new();
    for stmt in block {
        let (stmts, new_env) = transform_stmt(stmt, env, pc, ctx)?;
        out.extend(stmts);
        env = new_env;
    }
    Ok((out, env))
}

fn transform_stmt(stmt: &Statement, env: TypeEnv, pc: bool, ctx: &mut Ctx) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    match stmt {
        Statement::Decl { name, ty, is_array, array_len, init: Some(Expr::Lap(scale)), source_location } => {
            transform_laplace(name, *ty, *is_array, array_len.clone(), scale, source_location, env, pc, ctx)
        }
        Statement::Decl { name, ty, is_array, array_len, init, source_location } => {
            transform_decl(name, *ty, *is_array, array_len.clone(), init.clone(), source_location, env, pc, ctx)
        }
        Statement::Assign { target, value, source_location } => transform_assign(target, value, source_location, env, pc, ctx),
        Statement::If { cond, then_branch, else_branch, source_location } => {
            transform_if(cond, then_branch, else_branch, source_location, env, pc, ctx)
        }
        Statement::While { cond, body, source_location } => transform_while(cond, body, source_location, env, pc, ctx),
        Statement::Output { value, source_location } => transform_output(value, source_location, env, pc),
        Statement::Assert { .. } | Statement::Return { .. } => Ok((vec![stmt.clone()], env)),
    }
}

fn transform_decl(
    name: &str,
    ty: Type,
    is_array: bool,
    array_len: Option<Box<Expr>>,
    init: Option<Expr>,
    location: &SourceLocation,
    mut env: TypeEnv,
    pc: bool,
    ctx: &mut Ctx,
) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    let base = match ty {
        Type::Int => BaseType::Int,
        Type::Float => BaseType::Float,
    };
    let Some(init_expr) = init.clone() else {
        env.declare(name, VarType::zero(base, is_array));
        return Ok((vec![Statement::Decl { name: name.to_string(), ty, is_array, array_len, init, source_location: location.clone() }], env));
    };

    let aligned_e = distance_of_concrete(&init_expr, &env, Track::Aligned);
    let shadow_e = distance_of_concrete(&init_expr, &env, Track::Shadow);
    let new_aligned = if is_nonzero_distance(&aligned_e) { Distance::Tracked } else { Distance::Zero };
    let new_shadow = if is_nonzero_distance(&shadow_e) { Distance::Tracked } else { Distance::Zero };
    env.declare(name, VarType { aligned: new_aligned.clone(), shadow: new_shadow.clone(), base, is_array });

    let mut out = vec![Statement::Decl { name: name.to_string(), ty, is_array, array_len, init, source_location: location.clone() }];
    if ctx.loop_depth == 0 || ctx.exploring == 0 {
        if new_aligned.is_tracked() {
            out.push(assign(&constants::aligned_distance_name(name), aligned_e.to_expr(), location));
        }
        if new_shadow.is_tracked() {
            out.push(assign(&constants::shadow_distance_name(name), shadow_e.to_expr(), location));
        }
    }
    Ok((out, env))
}

fn transform_assign(
    target: &LValue,
    value: &Expr,
    location: &SourceLocation,
    mut env: TypeEnv,
    pc: bool,
    ctx: &mut Ctx,
) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    let name = target.base_name();
    let aligned_e = distance_of_concrete(value, &env, Track::Aligned);
    let shadow_e = distance_of_concrete(value, &env, Track::Shadow);

    let old = env.get(name).cloned();
    let old_aligned_tracked = old.as_ref().map(|v| v.aligned.is_tracked()).unwrap_or(false);
    let old_shadow_tracked = old.as_ref().map(|v| v.shadow.is_tracked()).unwrap_or(false);

    let new_aligned = if old_aligned_tracked || is_nonzero_distance(&aligned_e) { Distance::Tracked } else { Distance::Zero };
    let new_shadow = if pc || old_shadow_tracked || is_nonzero_distance(&shadow_e) { Distance::Tracked } else { Distance::Zero };

    if old.is_some() {
        env.update_distance(name, new_aligned.clone(), new_shadow.clone());
    } else {
        let base = BaseType::Int;
        env.declare(name, VarType { aligned: new_aligned.clone(), shadow: new_shadow.clone(), base, is_array: matches!(target, LValue::Index(..)) });
    }

    let mut out = Vec::new();
    let emit = ctx.loop_depth == 0 || ctx.exploring == 0;
    let shadow_name = shadow_distance_target(target);
    let aligned_name = aligned_distance_target(target);

    if emit && pc && new_shadow.is_tracked() {
        // shadow_x := x + shadow_x - e, inserted before the assignment to
        // preserve the invariant shadow_x = x_shadow - x across the mutation.
        let lhs_expr = lvalue_to_expr(target);
        let shadow_ident = shadow_value_ident(target);
        let rhs = simplify(Expr::Binary(
            BinOp::Sub,
            Box::new(Expr::Binary(BinOp::Add, Box::new(lhs_expr), Box::new(shadow_ident))),
            Box::new(value.clone()),
        ));
        out.push(assign_lvalue_str(&shadow_name, target, rhs, location));
    }

    out.push(Statement::Assign { target: target.clone(), value: value.clone(), source_location: location.clone() });

    if emit {
        if new_aligned.is_tracked() {
            out.push(assign_lvalue_str(&aligned_name, target, aligned_e.to_expr(), location));
        }
        if !pc && new_shadow.is_tracked() {
            out.push(assign_lvalue_str(&shadow_name, target, shadow_e.to_expr(), location));
        }
    }

    Ok((out, env))
}

fn lvalue_to_expr(target: &LValue) -> Expr {
    match target {
        LValue::Name(n) => Expr::Ident(n.clone()),
        LValue::Index(n, idx) => Expr::Index(Box::new(Expr::Ident(n.clone())), idx.clone()),
    }
}

fn shadow_value_ident(target: &LValue) -> Expr {
    match target {
        LValue::Name(n) => Expr::Ident(constants::shadow_distance_name(n)),
        LValue::Index(n, idx) => Expr::Index(Box::new(Expr::Ident(constants::shadow_distance_name(n))), idx.clone()),
    }
}

fn aligned_distance_target(target: &LValue) -> String {
    constants::aligned_distance_name(target.base_name())
}

fn shadow_distance_target(target: &LValue) -> String {
    constants::shadow_distance_name(target.base_name())
}

fn assign_lvalue_str(distance_var: &str, target: &LValue, value: Expr, location: &SourceLocation) -> Statement {
    let lvalue = match target {
        LValue::Name(_) => LValue::Name(distance_var.to_string()),
        LValue::Index(_, idx) => LValue::Index(distance_var.to_string(), idx.clone()),
    };
    Statement::Assign { target: lvalue, value, source_location: location.clone() }
}

fn transform_laplace(
    name: &str,
    ty: Type,
    is_array: bool,
    array_len: Option<Box<Expr>>,
    scale: &Expr,
    location: &SourceLocation,
    mut env: TypeEnv,
    pc: bool,
    ctx: &mut Ctx,
) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    if pc {
        return Err(ConfigError::RandomUnderDivergentPc { name: name.to_string(), location: location.clone() });
    }
    env.declare(name, VarType { aligned: Distance::Tracked, shadow: Distance::Zero, base: BaseType::Float, is_array });

    let mut out = vec![Statement::Decl {
        name: name.to_string(),
        ty,
        is_array,
        array_len,
        init: Some(Expr::Index(Box::new(Expr::Ident(constants::SAMPLE_ARRAY.to_string())), Box::new(Expr::Ident(constants::SAMPLE_INDEX.to_string())))),
        source_location: location.clone(),
    }];
    out.push(assign(constants::SAMPLE_INDEX, Expr::Binary(BinOp::Add, Box::new(Expr::Ident(constants::SAMPLE_INDEX.to_string())), Box::new(Expr::IntLit(1))), location));

    // Align this sample's distance with its generated template (§4.3);
    // the template itself doesn't exist yet (it is built from this very
    // transformed body), so this assigns a placeholder identifier that
    // `splice_alignment` resolves once `alignment::generate_templates`
    // has run.
    out.push(assign(
        &constants::aligned_distance_name(name),
        Expr::Ident(constants::random_distance_macro_name(name)),
        location,
    ));
    let aligned_eta = Expr::Ident(constants::aligned_distance_name(name));
    if ctx.enable_shadow {
        let selector = constants::selector_name(name);
        out.push(assign(&selector, Expr::Ident(constants::selector_macro_name(name)), location));
        let select_shadow: i64 = constants::SELECT_SHADOW.parse().unwrap_or(1);
        let overwrite_cond = Expr::Binary(BinOp::Eq, Box::new(Expr::Ident(selector.clone())), Box::new(Expr::IntLit(select_shadow)));
        let mut overwrite_body = Vec::new();
        for tracked in env.tracked_locals() {
            if tracked == name {
                continue;
            }
            let vt = env.get(tracked).unwrap();
            if vt.aligned.is_tracked() && vt.shadow.is_tracked() {
                overwrite_body.push(assign(
                    &constants::aligned_distance_name(tracked),
                    Expr::Ident(constants::shadow_distance_name(tracked)),
                    location,
                ));
            }
        }
        if !overwrite_body.is_empty() {
            out.push(Statement::If { cond: overwrite_cond, then_branch: overwrite_body, else_branch: Vec::new(), source_location: location.clone() });
        }
        if ctx.exploring == 0 {
            ctx.selectors.push(name.to_string());
        }
    }

    let cost_term = simplify(Expr::Binary(BinOp::Div, Box::new(abs(aligned_eta)), Box::new(scale.clone())));
    out.push(assign(
        constants::V_EPSILON,
        Expr::Binary(BinOp::Add, Box::new(Expr::Ident(constants::V_EPSILON.to_string())), Box::new(cost_term)),
        location,
    ));

    if ctx.exploring == 0 {
        ctx.samples.push(name.to_string());
        if ctx.loop_depth > 0 {
            ctx.lap_inside_loops += 1;
        } else {
            ctx.lap_outside_loops += 1;
        }
    }

    Ok((out, env))
}

fn transform_output(value: &Expr, location: &SourceLocation, env: TypeEnv, _pc: bool) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    let aligned = distance_of_concrete(value, &env, Track::Aligned);
    let mut out = Vec::new();
    if is_nonzero_distance(&aligned) {
        out.push(assert_stmt(Expr::Binary(BinOp::Eq, Box::new(aligned.to_expr()), Box::new(Expr::IntLit(0))), location));
    }
    out.push(Statement::Output { value: value.clone(), source_location: location.clone() });
    Ok((out, env))
}

fn transform_if(
    cond: &Expr,
    then_branch: &[Statement],
    else_branch: &[Statement],
    location: &SourceLocation,
    env: TypeEnv,
    pc: bool,
    ctx: &mut Ctx,
) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    let new_pc = pc || shadow_diverges(&env, cond);
    let aligned_divergent = aligned_diverges(&env, cond);

    let (mut then_stmts, env_t) = transform_block(then_branch, env.clone(), new_pc, ctx)?;
    let (mut else_stmts, env_f) = transform_block(else_branch, env.clone(), new_pc, ctx)?;
    let merged = env_t.merge(&env_f);

    if ctx.exploring == 0 {
        if aligned_divergent {
            then_stmts.insert(0, assert_stmt(cond.clone(), location));
            else_stmts.insert(0, assert_stmt(Expr::Unary(UnaryOp::Not, Box::new(cond.clone())), location));
        }

        for name in merged.names() {
            let merged_vt = merged.get(name).unwrap();
            if merged_vt.aligned.is_tracked() {
                if let Some(t_vt) = env_t.get(name) {
                    if !t_vt.aligned.is_tracked() {
                        then_stmts.push(assign(&constants::aligned_distance_name(name), t_vt.aligned.to_expr(), location));
                    }
                }
                if let Some(f_vt) = env_f.get(name) {
                    if !f_vt.aligned.is_tracked() {
                        else_stmts.push(assign(&constants::aligned_distance_name(name), f_vt.aligned.to_expr(), location));
                    }
                }
            }
            if merged_vt.shadow.is_tracked() {
                if let Some(t_vt) = env_t.get(name) {
                    if !t_vt.shadow.is_tracked() {
                        then_stmts.push(assign(&constants::shadow_distance_name(name), t_vt.shadow.to_expr(), location));
                    }
                }
                if let Some(f_vt) = env_f.get(name) {
                    if !f_vt.shadow.is_tracked() {
                        else_stmts.push(assign(&constants::shadow_distance_name(name), f_vt.shadow.to_expr(), location));
                    }
                }
            }
        }
    }

    let mut out = vec![Statement::If { cond: cond.clone(), then_branch: then_stmts, else_branch: else_stmts, source_location: location.clone() }];

    // Shadow mirror: only emitted on a genuine pc transition (false -> true)
    // at this frame, and only the reconciling assignments a single pass can
    // establish without re-deriving a full parallel execution.
    if ctx.enable_shadow && ctx.exploring == 0 && !pc && new_pc {
        let shadow_cond = substitute_shadow(cond, &env);
        let mut shadow_then = Vec::new();
        let mut shadow_else = Vec::new();
        for name in merged.names() {
            let merged_vt = merged.get(name).unwrap();
            if !merged_vt.shadow.is_tracked() {
                continue;
            }
            if let Some(t_vt) = env_t.get(name) {
                if !t_vt.shadow.is_tracked() {
                    shadow_then.push(assign(&constants::shadow_distance_name(name), t_vt.shadow.to_expr(), location));
                }
            }
            if let Some(f_vt) = env_f.get(name) {
                if !f_vt.shadow.is_tracked() {
                    shadow_else.push(assign(&constants::shadow_distance_name(name), f_vt.shadow.to_expr(), location));
                }
            }
        }
        if !shadow_then.is_empty() || !shadow_else.is_empty() {
            out.push(Statement::If { cond: shadow_cond, then_branch: shadow_then, else_branch: shadow_else, source_location: location.clone() });
        }
    }

    Ok((out, merged))
}

/// Builds the shadow-world reading of a condition: every shadow-tracked
/// identifier `x` is replaced by `x + shadow_x`, since `shadow_x` is
/// maintained as `x_shadow - x`.
fn substitute_shadow(expr: &Expr, env: &TypeEnv) -> Expr {
    match expr {
        Expr::Ident(name) => {
            if env.get(name).map(|v| v.shadow.is_tracked()).unwrap_or(false) {
                Expr::Binary(BinOp::Add, Box::new(Expr::Ident(name.clone())), Box::new(Expr::Ident(constants::shadow_distance_name(name))))
            } else {
                expr.clone()
            }
        }
        Expr::Index(base, idx) => Expr::Index(Box::new(substitute_shadow(base, env)), Box::new(substitute_shadow(idx, env))),
        Expr::Unary(op, e) => Expr::Unary(*op, Box::new(substitute_shadow(e, env))),
        Expr::Binary(op, l, r) => Expr::Binary(*op, Box::new(substitute_shadow(l, env)), Box::new(substitute_shadow(r, env))),
        Expr::Ternary(c, t, f) => Expr::Ternary(Box::new(substitute_shadow(c, env)), Box::new(substitute_shadow(t, env)), Box::new(substitute_shadow(f, env))),
        other => other.clone(),
    }
}

fn transform_while(
    cond: &Expr,
    body: &[Statement],
    location: &SourceLocation,
    env: TypeEnv,
    pc: bool,
    ctx: &mut Ctx,
) -> Result<(Vec<Statement>, TypeEnv), ConfigError> {
    // Fixed-point search: the lattice "0 ⊑ expr ⊑ *" is finite per name, so
    // repeated merge-with-one-more-iteration termiantes (Testable Property #2).
    ctx.exploring += 1;
    ctx.loop_depth += 1;
    let mut fp_env = env.clone();
    loop {
        let iter_pc = pc || shadow_diverges(&fp_env, cond);
        let (_discarded, after) = transform_block(body, fp_env.clone(), iter_pc, ctx)?;
        let merged = fp_env.merge(&after);
        if merged == fp_env {
            break;
        }
        fp_env = merged;
    }
    ctx.loop_depth -= 1;
    ctx.exploring -= 1;

    // Final pass at the now-stable environment: statement emission
    // resumes (unless we are still nested inside an outer while's own
    // exploration), so per-iteration instrumentation actually re-executes
    // on every real loop iteration in the generated program.
    let new_pc = pc || shadow_diverges(&fp_env, cond);
    ctx.loop_depth += 1;
    let (body_out, body_env) = transform_block(body, fp_env.clone(), new_pc, ctx)?;
    ctx.loop_depth -= 1;
    let final_env = fp_env.merge(&body_env);

    let mut out = Vec::new();
    if ctx.exploring == 0 && aligned_diverges(&env, cond) {
        out.push(assert_stmt(cond.clone(), location));
    }

    if ctx.exploring == 0 {
        for name in final_env.names() {
            let final_vt = final_env.get(name).unwrap();
            if let Some(pre_vt) = env.get(name) {
                if final_vt.aligned.is_tracked() && !pre_vt.aligned.is_tracked() {
                    out.push(assign(&constants::aligned_distance_name(name), pre_vt.aligned.to_expr(), location));
                }
                if final_vt.shadow.is_tracked() && !pre_vt.shadow.is_tracked() {
                    out.push(assign(&constants::shadow_distance_name(name), pre_vt.shadow.to_expr(), location));
                }
            }
        }
    }

    out.push(Statement::While { cond: cond.clone(), body: body_out, source_location: location.clone() });
    Ok((out, final_env))
}

// --- alignment-template splice --------------------------------------

/// Resolves every `RANDOM_DISTANCE_<eta>`/`SELECTOR_<eta>` placeholder
/// `transform_laplace` left behind into the real per-`eta` template
/// `alignment::generate_templates` built from this same (already
/// instrumented) body. Mirrors the original's macro expansion
/// (`#define CHECKDP_RANDOM_DISTANCE_eta (template)`), except the
/// substitution happens over the AST directly rather than via the C
/// preprocessor.
pub fn splice_alignment(function: Function, templates: &crate::alignment::AlignmentTemplates) -> Function {
    let body = splice_block(function.body, templates);
    Function { body, ..function }
}

fn splice_block(block: Vec<Statement>, templates: &crate::alignment::AlignmentTemplates) -> Vec<Statement> {
    block.into_iter().map(|stmt| splice_stmt(stmt, templates)).collect()
}

fn splice_stmt(stmt: Statement, templates: &crate::alignment::AlignmentTemplates) -> Statement {
    match stmt {
        Statement::Decl { name, ty, is_array, array_len, init, source_location } => Statement::Decl {
            name,
            ty,
            is_array,
            array_len: array_len.map(|e| Box::new(splice_expr(*e, templates))),
            init: init.map(|e| splice_expr(e, templates)),
            source_location,
        },
        Statement::Assign { target, value, source_location } => {
            Statement::Assign { target: splice_lvalue(target, templates), value: splice_expr(value, templates), source_location }
        }
        Statement::If { cond, then_branch, else_branch, source_location } => Statement::If {
            cond: splice_expr(cond, templates),
            then_branch: splice_block(then_branch, templates),
            else_branch: splice_block(else_branch, templates),
            source_location,
        },
        Statement::While { cond, body, source_location } => {
            Statement::While { cond: splice_expr(cond, templates), body: splice_block(body, templates), source_location }
        }
        Statement::Output { value, source_location } => Statement::Output { value: splice_expr(value, templates), source_location },
        Statement::Assert { cond, source_location } => Statement::Assert { cond: splice_expr(cond, templates), source_location },
        Statement::Return { value, source_location } => Statement::Return { value: splice_expr(value, templates), source_location },
    }
}

fn splice_lvalue(target: LValue, templates: &crate::alignment::AlignmentTemplates) -> LValue {
    match target {
        LValue::Name(n) => LValue::Name(n),
        LValue::Index(n, idx) => LValue::Index(n, Box::new(splice_expr(*idx, templates))),
    }
}

fn splice_expr(expr: Expr, templates: &crate::alignment::AlignmentTemplates) -> Expr {
    match expr {
        Expr::Ident(name) => {
            if let Some(eta) = constants::strip_random_distance_macro(&name) {
                if let Some(template) = templates.random_distance.get(eta) {
                    return template.clone();
                }
            }
            if let Some(eta) = constants::strip_selector_macro(&name) {
                if let Some(template) = templates.selector.get(eta) {
                    return template.clone();
                }
            }
            Expr::Ident(name)
        }
        Expr::Index(base, idx) => Expr::Index(Box::new(splice_expr(*base, templates)), Box::new(splice_expr(*idx, templates))),
        Expr::Unary(op, e) => Expr::Unary(op, Box::new(splice_expr(*e, templates))),
        Expr::Binary(op, l, r) => Expr::Binary(op, Box::new(splice_expr(*l, templates)), Box::new(splice_expr(*r, templates))),
        Expr::Ternary(c, t, f) => {
            Expr::Ternary(Box::new(splice_expr(*c, templates)), Box::new(splice_expr(*t, templates)), Box::new(splice_expr(*f, templates)))
        }
        Expr::Lap(s) => Expr::Lap(Box::new(splice_expr(*s, templates))),
        Expr::Call(name, args) => Expr::Call(name, args.into_iter().map(|a| splice_expr(a, templates)).collect()),
        Expr::IntLit(n) => Expr::IntLit(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Param;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    fn base_env() -> TypeEnv {
        let mut env = TypeEnv::new();
        env.declare("q", VarType { aligned: Distance::Tracked, shadow: Distance::Zero, base: BaseType::Int, is_array: true });
        env.declare("size", VarType::zero(BaseType::Int, false));
        env.declare("epsilon", VarType::zero(BaseType::Float, false));
        env
    }

    fn simple_function(body: Vec<Statement>) -> Function {
        Function {
            name: "f".to_string(),
            params: vec![
                Param { name: "q".to_string(), ty: Type::Int, is_array: true, source_location: loc() },
                Param { name: "size".to_string(), ty: Type::Int, is_array: false, source_location: loc() },
                Param { name: "epsilon".to_string(), ty: Type::Float, is_array: false, source_location: loc() },
            ],
            return_type: Type::Int,
            body,
            source_location: loc(),
        }
    }

    #[test]
    fn test_laplace_rewrites_to_sample_array_read() {
        let body = vec![Statement::Decl {
            name: "eta".to_string(),
            ty: Type::Float,
            is_array: false,
            array_len: None,
            init: Some(Expr::Lap(Box::new(Expr::IntLit(2)))),
            source_location: loc(),
        }];
        let out = transform(simple_function(body), base_env(), false).unwrap();
        assert_eq!(out.samples, vec!["eta".to_string()]);
        assert_eq!(out.lap_outside_loops, 1);
        assert!(out.type_env.get("eta").unwrap().aligned.is_tracked());
    }

    #[test]
    fn test_if_emits_aligned_assertions_when_condition_diverges() {
        let body = vec![Statement::If {
            cond: Expr::Binary(BinOp::Gt, Box::new(Expr::Index(Box::new(Expr::Ident("q".to_string())), Box::new(Expr::IntLit(0)))), Box::new(Expr::IntLit(0))),
            then_branch: vec![Statement::Assign { target: LValue::Name("size".to_string()), value: Expr::IntLit(1), source_location: loc() }],
            else_branch: vec![],
            source_location: loc(),
        }];
        let out = transform(simple_function(body), base_env(), false).unwrap();
        let has_assert = out.function.body.iter().any(|s| matches!(s, Statement::If { then_branch, .. } if matches!(then_branch.first(), Some(Statement::Assert { .. }))));
        assert!(has_assert);
    }

    #[test]
    fn test_random_under_divergent_pc_is_rejected() {
        let body = vec![Statement::If {
            cond: Expr::Binary(BinOp::Gt, Box::new(Expr::Index(Box::new(Expr::Ident("q".to_string())), Box::new(Expr::IntLit(0)))), Box::new(Expr::IntLit(0))),
            then_branch: vec![Statement::Decl {
                name: "eta".to_string(),
                ty: Type::Float,
                is_array: false,
                array_len: None,
                init: Some(Expr::Lap(Box::new(Expr::IntLit(1)))),
                source_location: loc(),
            }],
            else_branch: vec![],
            source_location: loc(),
        }];
        let result = transform(simple_function(body), base_env(), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_while_reaches_fixed_point_and_emits_loop() {
        let body = vec![Statement::While {
            cond: Expr::Binary(BinOp::Lt, Box::new(Expr::Ident("i".to_string())), Box::new(Expr::Ident("size".to_string()))),
            body: vec![
                Statement::Decl { name: "eta".to_string(), ty: Type::Float, is_array: false, array_len: None, init: Some(Expr::Lap(Box::new(Expr::IntLit(1)))), source_location: loc() },
                Statement::Assign {
                    target: LValue::Name("i".to_string()),
                    value: Expr::Binary(BinOp::Add, Box::new(Expr::Ident("i".to_string())), Box::new(Expr::IntLit(1))),
                    source_location: loc(),
                },
            ],
            source_location: loc(),
        }];
        let mut env = base_env();
        env.declare("i", VarType::zero(BaseType::Int, false));
        let out = transform(simple_function(body), env, false).unwrap();
        assert_eq!(out.samples, vec!["eta".to_string()]);
        assert_eq!(out.lap_inside_loops, 1);
        assert!(out.function.body.iter().any(|s| matches!(s, Statement::While { .. })));
    }

    fn contains_ident(stmts: &[Statement], name: &str) -> bool {
        fn expr_has(e: &Expr, name: &str) -> bool {
            match e {
                Expr::Ident(n) => n == name,
                Expr::Index(b, i) => expr_has(b, name) || expr_has(i, name),
                Expr::Unary(_, e) => expr_has(e, name),
                Expr::Binary(_, l, r) => expr_has(l, name) || expr_has(r, name),
                Expr::Ternary(c, t, f) => expr_has(c, name) || expr_has(t, name) || expr_has(f, name),
                Expr::Lap(s) => expr_has(s, name),
                Expr::Call(_, args) => args.iter().any(|a| expr_has(a, name)),
                Expr::IntLit(_) => false,
            }
        }
        stmts.iter().any(|s| match s {
            Statement::Decl { init: Some(e), .. } => expr_has(e, name),
            Statement::Assign { value, .. } => expr_has(value, name),
            Statement::If { cond, then_branch, else_branch, .. } => expr_has(cond, name) || contains_ident(then_branch, name) || contains_ident(else_branch, name),
            Statement::While { cond, body, .. } => expr_has(cond, name) || contains_ident(body, name),
            Statement::Output { value, .. } => expr_has(value, name),
            Statement::Assert { cond, .. } => expr_has(cond, name),
            Statement::Return { value, .. } => expr_has(value, name),
            _ => false,
        })
    }

    #[test]
    fn test_laplace_emits_placeholder_assignment_before_cost_term() {
        let body = vec![Statement::Decl {
            name: "eta".to_string(),
            ty: Type::Float,
            is_array: false,
            array_len: None,
            init: Some(Expr::Lap(Box::new(Expr::IntLit(2)))),
            source_location: loc(),
        }];
        let out = transform(simple_function(body), base_env(), false).unwrap();
        assert!(contains_ident(&out.function.body, &constants::random_distance_macro_name("eta")));
    }

    #[test]
    fn test_shadow_mode_declares_and_assigns_selector() {
        let body = vec![Statement::Decl {
            name: "eta".to_string(),
            ty: Type::Float,
            is_array: false,
            array_len: None,
            init: Some(Expr::Lap(Box::new(Expr::IntLit(2)))),
            source_location: loc(),
        }];
        let out = transform(simple_function(body), base_env(), true).unwrap();
        let selector_decl = constants::selector_name("eta");
        assert!(out.function.body.iter().any(|s| matches!(s, Statement::Decl { name, .. } if name == &selector_decl)));
        assert!(contains_ident(&out.function.body, &constants::selector_macro_name("eta")));
    }

    #[test]
    fn test_splice_alignment_resolves_placeholders_into_templates() {
        let body = vec![
            Statement::Decl {
                name: constants::aligned_distance_name("eta"),
                ty: Type::Float,
                is_array: false,
                array_len: None,
                init: Some(Expr::Ident(constants::random_distance_macro_name("eta"))),
                source_location: loc(),
            },
            Statement::Assert { cond: Expr::Ident(constants::aligned_distance_name("eta")), source_location: loc() },
        ];
        let function = simple_function(body);

        let mut random_distance = std::collections::HashMap::new();
        random_distance.insert(
            "eta".to_string(),
            Expr::Index(Box::new(Expr::Ident(constants::ALIGNMENT_ARRAY.to_string())), Box::new(Expr::IntLit(0))),
        );
        let templates = crate::alignment::AlignmentTemplates { random_distance, selector: std::collections::HashMap::new(), tags: Vec::new() };

        let spliced = splice_alignment(function, &templates);
        assert!(!contains_ident(&spliced.body, &constants::random_distance_macro_name("eta")));
        assert!(contains_ident(&spliced.body, constants::ALIGNMENT_ARRAY));
    }
}
