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

//! Recursive-descent parser for the restricted C-like dialect, with
//! precedence climbing for expressions.

use crate::ast::*;
use crate::error::{ParserError, SourceLocation};
use crate::lexer::{Keyword, Token, TokenType};

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, position: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn location(&self) -> SourceLocation {
        self.peek().location.clone()
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        tok
    }

    fn check(&self, tt: &TokenType) -> bool {
        &self.peek().token_type == tt
    }

    fn expect(&mut self, tt: TokenType, what: &str) -> Result<Token, ParserError> {
        if self.check(&tt) {
            Ok(self.advance())
        } else {
            Err(ParserError::UnexpectedToken {
                found: self.peek().lexeme.clone(),
                expected: what.to_string(),
                location: self.location(),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParserError> {
        match self.peek().token_type.clone() {
            TokenType::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(ParserError::UnexpectedToken {
                found: self.peek().lexeme.clone(),
                expected: "identifier".to_string(),
                location: self.location(),
            }),
        }
    }

    /// Parses the three leading annotation-string statement literals,
    /// then a single function definition. The annotations themselves are
    /// interpreted by `preprocess`, not here; the parser only recognizes
    /// the shape `"..."; "..."; "..."; <function>`.
    pub fn parse_program(&mut self) -> Result<(Vec<String>, Function), ParserError> {
        let mut annotations = Vec::new();
        while annotations.len() < 3 {
            match self.peek().token_type.clone() {
                TokenType::StringLiteral(s) => {
                    self.advance();
                    self.expect(TokenType::Semicolon, "';'")?;
                    annotations.push(s);
                }
                _ => {
                    return Err(ParserError::UnexpectedToken {
                        found: self.peek().lexeme.clone(),
                        expected: "annotation string literal".to_string(),
                        location: self.location(),
                    });
                }
            }
        }
        let function = self.parse_function()?;
        Ok((annotations, function))
    }

    fn parse_type(&mut self) -> Result<Type, ParserError> {
        match self.peek().token_type {
            TokenType::Keyword(Keyword::Int) => {
                self.advance();
                Ok(Type::Int)
            }
            TokenType::Keyword(Keyword::Float) => {
                self.advance();
                Ok(Type::Float)
            }
            _ => Err(ParserError::UnexpectedToken {
                found: self.peek().lexeme.clone(),
                expected: "type ('int' or 'float')".to_string(),
                location: self.location(),
            }),
        }
    }

    fn parse_function(&mut self) -> Result<Function, ParserError> {
        let location = self.location();
        let return_type = self.parse_type()?;
        let name = self.expect_identifier()?;
        self.expect(TokenType::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenType::RParen) {
            loop {
                let param_loc = self.location();
                let ty = self.parse_type()?;
                let pname = self.expect_identifier()?;
                let is_array = if self.check(&TokenType::LBracket) {
                    self.advance();
                    self.expect(TokenType::RBracket, "']'")?;
                    true
                } else {
                    false
                };
                params.push(Param { name: pname, ty, is_array, source_location: param_loc });
                if self.check(&TokenType::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenType::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Function { name, params, return_type, body, source_location: location })
    }

    fn parse_block(&mut self) -> Result<Block, ParserError> {
        self.expect(TokenType::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenType::RBrace) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenType::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParserError> {
        let location = self.location();
        match self.peek().token_type.clone() {
            TokenType::Keyword(Keyword::Int) | TokenType::Keyword(Keyword::Float) => self.parse_decl(),
            TokenType::Keyword(Keyword::If) => self.parse_if(),
            TokenType::Keyword(Keyword::While) => self.parse_while(),
            TokenType::Keyword(Keyword::Return) => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(TokenType::Semicolon, "';'")?;
                Ok(Statement::Return { value, source_location: location })
            }
            TokenType::Identifier(name) if name == "OUTPUT" => {
                self.advance();
                self.expect(TokenType::LParen, "'('")?;
                let value = self.parse_expr()?;
                self.expect(TokenType::RParen, "')'")?;
                self.expect(TokenType::Semicolon, "';'")?;
                Ok(Statement::Output { value, source_location: location })
            }
            _ => self.parse_assignment_statement(),
        }
    }

    fn parse_decl(&mut self) -> Result<Statement, ParserError> {
        let location = self.location();
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        let (is_array, array_len) = if self.check(&TokenType::LBracket) {
            self.advance();
            let len = if !self.check(&TokenType::RBracket) { Some(Box::new(self.parse_expr()?)) } else { None };
            self.expect(TokenType::RBracket, "']'")?;
            (true, len)
        } else {
            (false, None)
        };
        let init = if self.check(&TokenType::Assign) {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenType::Semicolon, "';'")?;
        Ok(Statement::Decl { name, ty, is_array, array_len, init, source_location: location })
    }

    fn parse_if(&mut self) -> Result<Statement, ParserError> {
        let location = self.location();
        self.advance();
        self.expect(TokenType::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(TokenType::RParen, "')'")?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.check(&TokenType::Keyword(Keyword::Else)) {
            self.advance();
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Statement::If { cond, then_branch, else_branch, source_location: location })
    }

    fn parse_while(&mut self) -> Result<Statement, ParserError> {
        let location = self.location();
        self.advance();
        self.expect(TokenType::LParen, "'('")?;
        let cond = self.parse_expr()?;
        self.expect(TokenType::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Statement::While { cond, body, source_location: location })
    }

    fn parse_assignment_statement(&mut self) -> Result<Statement, ParserError> {
        let location = self.location();
        let name = self.expect_identifier()?;
        let target = if self.check(&TokenType::LBracket) {
            self.advance();
            let idx = self.parse_expr()?;
            self.expect(TokenType::RBracket, "']'")?;
            LValue::Index(name, Box::new(idx))
        } else {
            LValue::Name(name)
        };
        self.expect(TokenType::Assign, "'='")?;
        let value = self.parse_expr()?;
        self.expect(TokenType::Semicolon, "';'")?;
        Ok(Statement::Assign { target, value, source_location: location })
    }

    // --- expressions, precedence climbing -------------------------------
    // ternary < logical-or < logical-and < equality < relational < additive
    // < multiplicative < unary < postfix/primary

    pub fn parse_expr(&mut self) -> Result<Expr, ParserError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParserError> {
        let cond = self.parse_logical_or()?;
        if self.check(&TokenType::Question) {
            self.advance();
            let then_expr = self.parse_expr()?;
            self.expect(TokenType::Colon, "':'")?;
            let else_expr = self.parse_ternary()?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then_expr), Box::new(else_expr)))
        } else {
            Ok(cond)
        }
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_logical_and()?;
        while self.check(&TokenType::OrOr) {
            self.advance();
            let right = self.parse_logical_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenType::AndAnd) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::EqEq => BinOp::Eq,
                TokenType::NotEq => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Lt => BinOp::Lt,
                TokenType::Le => BinOp::Le,
                TokenType::Gt => BinOp::Gt,
                TokenType::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Plus => BinOp::Add,
                TokenType::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParserError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().token_type {
                TokenType::Star => BinOp::Mul,
                TokenType::Slash => BinOp::Div,
                TokenType::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParserError> {
        match self.peek().token_type {
            TokenType::Minus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            TokenType::Bang => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(&TokenType::LBracket) {
                self.advance();
                let idx = self.parse_expr()?;
                self.expect(TokenType::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(idx));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParserError> {
        let location = self.location();
        match self.peek().token_type.clone() {
            TokenType::IntLiteral(n) => {
                self.advance();
                Ok(Expr::IntLit(n))
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenType::RParen, "')'")?;
                Ok(expr)
            }
            TokenType::Identifier(name) => {
                self.advance();
                if name == "Lap" {
                    self.expect(TokenType::LParen, "'('")?;
                    let scale = self.parse_expr()?;
                    self.expect(TokenType::RParen, "')'")?;
                    return Ok(Expr::Lap(Box::new(scale)));
                }
                if self.check(&TokenType::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenType::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.check(&TokenType::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::RParen, "')'")?;
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Ident(name))
            }
            _ => Err(ParserError::UnexpectedToken {
                found: self.peek().lexeme.clone(),
                expected: "expression".to_string(),
                location,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse_fn(src: &str) -> Function {
        let mut lexer = Lexer::new(src, "t.c".to_string());
        let tokens = lexer.tokenize().unwrap();
        let mut parser = Parser::new(tokens);
        parser.parse_function().unwrap()
    }

    #[test]
    fn test_parse_function_signature() {
        let f = parse_fn("int f(int q[], int size, int epsilon) { return 0; }");
        assert_eq!(f.name, "f");
        assert_eq!(f.params.len(), 3);
        assert!(f.params[0].is_array);
    }

    #[test]
    fn test_ternary_precedence() {
        let mut lexer = Lexer::new("x > 0 ? 1 : -1", "t.c".to_string());
        let tokens = lexer.tokenize().unwrap();
        let mut parser = Parser::new(tokens);
        let e = parser.parse_expr().unwrap();
        match e {
            Expr::Ternary(..) => {}
            _ => panic!("expected ternary"),
        }
    }

    #[test]
    fn test_while_loop_with_assignment() {
        let f = parse_fn("int f(int q[], int size, int epsilon) { int i = 0; while (i < size) { i = i + 1; } return 0; }");
        assert_eq!(f.body.len(), 3);
    }
}
