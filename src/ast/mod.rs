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

//! Abstract syntax tree for the restricted C-like dialect CheckDP accepts:
//! integer literals, identifiers, array references, unary/binary/ternary
//! expressions, assignment, declaration, if/else, while, and calls
//! restricted to the `Lap` and `OUTPUT` intrinsics. No globals, no
//! user-level `return`.

use crate::error::SourceLocation;
use serde::{Deserialize, Serialize};

/// A whole program: exactly one function plus its three leading
/// annotation strings, already stripped out by the time parsing is done
/// (the preprocessor consumes them; see `preprocess`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub function: Function,
    pub source_location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Block,
    pub source_location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub is_array: bool,
    pub source_location: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Int,
    Float,
}

pub type Block = Vec<Statement>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    Decl {
        name: String,
        ty: Type,
        is_array: bool,
        array_len: Option<Box<Expr>>,
        init: Option<Expr>,
        source_location: SourceLocation,
    },
    Assign {
        target: LValue,
        value: Expr,
        source_location: SourceLocation,
    },
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Block,
        source_location: SourceLocation,
    },
    While {
        cond: Expr,
        body: Block,
        source_location: SourceLocation,
    },
    Output {
        value: Expr,
        source_location: SourceLocation,
    },
    /// `assert(cond)`, always internally generated by the transformer
    /// (never parsed from user source).
    Assert {
        cond: Expr,
        source_location: SourceLocation,
    },
    /// `return expr;` — only ever emitted by the transformer itself for
    /// `return v_epsilon;`; forbidden in user source (enforced by the
    /// preprocessor).
    Return {
        value: Expr,
        source_location: SourceLocation,
    },
}

impl Statement {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Statement::Decl { source_location, .. }
            | Statement::Assign { source_location, .. }
            | Statement::If { source_location, .. }
            | Statement::While { source_location, .. }
            | Statement::Output { source_location, .. }
            | Statement::Assert { source_location, .. }
            | Statement::Return { source_location, .. } => source_location,
        }
    }
}

/// The left-hand side of an assignment: a bare name or a subscripted
/// array element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LValue {
    Name(String),
    Index(String, Box<Expr>),
}

impl LValue {
    pub fn base_name(&self) -> &str {
        match self {
            LValue::Name(n) => n,
            LValue::Index(n, _) => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    IntLit(i64),
    Ident(String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `Lap(scale)` — only legal as a declaration initializer.
    Lap(Box<Expr>),
    /// A bare function call used only for internally generated hole
    /// placeholders (e.g. `HOLE_3`) and for re-threading already-lowered
    /// calls; user code may not introduce new ones beyond `Lap`/`OUTPUT`.
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Pretty-printer used for both debug dumps and source generation in the
/// template driver. The printed grammar round-trips through the parser
/// (needed for `related_inputs` idempotence, see Testable Properties).
pub fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::IntLit(n) => n.to_string(),
        Expr::Ident(name) => name.clone(),
        Expr::Index(base, idx) => format!("{}[{}]", print_expr(base), print_expr(idx)),
        Expr::Unary(UnaryOp::Neg, e) => format!("(-{})", print_expr(e)),
        Expr::Unary(UnaryOp::Not, e) => format!("(!{})", print_expr(e)),
        Expr::Binary(op, l, r) => format!("({} {} {})", print_expr(l), op.as_str(), print_expr(r)),
        Expr::Ternary(c, t, f) => format!("({} ? {} : {})", print_expr(c), print_expr(t), print_expr(f)),
        Expr::Lap(scale) => format!("Lap({})", print_expr(scale)),
        Expr::Call(name, args) => {
            let rendered: Vec<String> = args.iter().map(print_expr).collect();
            format!("{}({})", name, rendered.join(", "))
        }
    }
}

pub fn print_statement(stmt: &Statement, indent: usize) -> String {
    let pad = "    ".repeat(indent);
    match stmt {
        Statement::Decl { name, ty, is_array, array_len, init, .. } => {
            let ty_str = match ty { Type::Int => "int", Type::Float => "float" };
            let decl = if *is_array {
                format!("{} {}[{}]", ty_str, name, array_len.as_ref().map(|e| print_expr(e)).unwrap_or_default())
            } else {
                format!("{} {}", ty_str, name)
            };
            match init {
                Some(e) => format!("{}{} = {};", pad, decl, print_expr(e)),
                None => format!("{}{};", pad, decl),
            }
        }
        Statement::Assign { target, value, .. } => {
            let lhs = match target {
                LValue::Name(n) => n.clone(),
                LValue::Index(n, idx) => format!("{}[{}]", n, print_expr(idx)),
            };
            format!("{}{} = {};", pad, lhs, print_expr(value))
        }
        Statement::If { cond, then_branch, else_branch, .. } => {
            let mut out = format!("{}if ({}) {{\n", pad, print_expr(cond));
            for s in then_branch {
                out.push_str(&print_statement(s, indent + 1));
                out.push('\n');
            }
            out.push_str(&format!("{}}}", pad));
            if !else_branch.is_empty() {
                out.push_str(" else {\n");
                for s in else_branch {
                    out.push_str(&print_statement(s, indent + 1));
                    out.push('\n');
                }
                out.push_str(&format!("{}}}", pad));
            }
            out
        }
        Statement::While { cond, body, .. } => {
            let mut out = format!("{}while ({}) {{\n", pad, print_expr(cond));
            for s in body {
                out.push_str(&print_statement(s, indent + 1));
                out.push('\n');
            }
            out.push_str(&format!("{}}}", pad));
            out
        }
        Statement::Output { value, .. } => format!("{}OUTPUT({});", pad, print_expr(value)),
        Statement::Assert { cond, .. } => format!("{}ASSERT({});", pad, print_expr(cond)),
        Statement::Return { value, .. } => format!("{}return {};", pad, print_expr(value)),
    }
}

pub fn print_block(block: &Block, indent: usize) -> String {
    block.iter().map(|s| print_statement(s, indent)).collect::<Vec<_>>().join("\n")
}

/// Renders a whole function definition, used to persist intermediate
/// pipeline stages (e.g. `preprocessed.c`) as readable C text.
pub fn print_function(function: &Function) -> String {
    let ty_str = |ty: Type| match ty {
        Type::Int => "int",
        Type::Float => "float",
    };
    let params: Vec<String> = function
        .params
        .iter()
        .map(|p| if p.is_array { format!("{} {}[]", ty_str(p.ty), p.name) } else { format!("{} {}", ty_str(p.ty), p.name) })
        .collect();
    format!("{} {}({}) {{\n{}\n}}\n", ty_str(function.return_type), function.name, params.join(", "), print_block(&function.body, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    #[test]
    fn test_print_binary_expr() {
        let e = Expr::Binary(BinOp::Add, Box::new(Expr::Ident("x".into())), Box::new(Expr::IntLit(1)));
        assert_eq!(print_expr(&e), "(x + 1)");
    }

    #[test]
    fn test_print_assign_statement() {
        let s = Statement::Assign {
            target: LValue::Name("x".into()),
            value: Expr::IntLit(5),
            source_location: loc(),
        };
        assert_eq!(print_statement(&s, 0), "x = 5;");
    }

    #[test]
    fn test_print_index_lvalue() {
        let s = Statement::Assign {
            target: LValue::Index("q".into(), Box::new(Expr::Ident("i".into()))),
            value: Expr::IntLit(0),
            source_location: loc(),
        };
        assert_eq!(print_statement(&s, 0), "q[i] = 0;");
    }
}
