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

//! Lexer for the restricted C-like dialect.

use crate::error::{LexerError, SourceLocation};
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    IntLiteral(i64),
    StringLiteral(String),
    Identifier(String),
    Keyword(Keyword),
    // punctuation / operators
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Colon,
    Question,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Int,
    Float,
    If,
    Else,
    While,
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub location: SourceLocation,
    pub lexeme: String,
}

/// Char-array based stateful lexer with line/column tracking, in the
/// same shape as a conventional hand-written scanner: a grapheme buffer,
/// a cursor, and a keyword table consulted once an identifier is fully
/// scanned.
pub struct Lexer {
    graphemes: Vec<String>,
    position: usize,
    line: usize,
    column: usize,
    file_name: String,
    keywords: HashMap<&'static str, Keyword>,
}

impl Lexer {
    pub fn new(input: &str, file_name: String) -> Self {
        let graphemes = input.graphemes(true).map(|g| g.to_string()).collect();
        let mut keywords = HashMap::new();
        keywords.insert("int", Keyword::Int);
        keywords.insert("float", Keyword::Float);
        keywords.insert("if", Keyword::If);
        keywords.insert("else", Keyword::Else);
        keywords.insert("while", Keyword::While);
        keywords.insert("return", Keyword::Return);

        Self { graphemes, position: 0, line: 1, column: 1, file_name, keywords }
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.file_name.clone(), self.line, self.column, self.position)
    }

    fn peek(&self) -> Option<&str> {
        self.graphemes.get(self.position).map(|s| s.as_str())
    }

    fn peek_at(&self, offset: usize) -> Option<&str> {
        self.graphemes.get(self.position + offset).map(|s| s.as_str())
    }

    fn advance(&mut self) -> Option<String> {
        let g = self.graphemes.get(self.position).cloned();
        if let Some(ref s) = g {
            self.position += 1;
            if s == "\n" {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        g
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let location = self.current_location();
            let Some(ch) = self.peek().map(|s| s.to_string()) else {
                tokens.push(Token { token_type: TokenType::Eof, location, lexeme: String::new() });
                break;
            };

            let token = if ch == "\"" {
                self.scan_string(location)?
            } else if ch.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.scan_number(location)?
            } else if ch.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false) {
                self.scan_identifier(location)
            } else {
                self.scan_operator(location)?
            };
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.chars().all(|c| c.is_whitespace()) => {
                    self.advance();
                }
                Some("/") if self.peek_at(1) == Some("/") => {
                    while self.peek().is_some() && self.peek() != Some("\n") {
                        self.advance();
                    }
                }
                Some("/") if self.peek_at(1) == Some("*") => {
                    self.advance();
                    self.advance();
                    while self.peek().is_some() && !(self.peek() == Some("*") && self.peek_at(1) == Some("/")) {
                        self.advance();
                    }
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self, location: SourceLocation) -> Result<Token, LexerError> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(LexerError::UnterminatedString { location }),
                Some("\"") => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    value.push_str(c);
                    self.advance();
                }
            }
        }
        Ok(Token { lexeme: format!("\"{}\"", value), token_type: TokenType::StringLiteral(value), location })
    }

    fn scan_number(&mut self, location: SourceLocation) -> Result<Token, LexerError> {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                lexeme.push_str(c);
                self.advance();
            } else {
                break;
            }
        }
        let value: i64 = lexeme.parse().map_err(|_| LexerError::InvalidNumber { value: lexeme.clone(), location: location.clone() })?;
        Ok(Token { token_type: TokenType::IntLiteral(value), location, lexeme })
    }

    fn scan_identifier(&mut self, location: SourceLocation) -> Token {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.chars().next().map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false) {
                lexeme.push_str(c);
                self.advance();
            } else {
                break;
            }
        }
        let token_type = match self.keywords.get(lexeme.as_str()) {
            Some(kw) => TokenType::Keyword(*kw),
            None => TokenType::Identifier(lexeme.clone()),
        };
        Token { token_type, location, lexeme }
    }

    fn scan_operator(&mut self, location: SourceLocation) -> Result<Token, LexerError> {
        let c = self.advance().unwrap();
        macro_rules! two_char {
            ($second:literal, $two:expr, $one:expr) => {{
                if self.peek() == Some($second) {
                    self.advance();
                    (format!("{}{}", c, $second), $two)
                } else {
                    (c.clone(), $one)
                }
            }};
        }

        let (lexeme, token_type) = match c.as_str() {
            "(" => (c.clone(), TokenType::LParen),
            ")" => (c.clone(), TokenType::RParen),
            "{" => (c.clone(), TokenType::LBrace),
            "}" => (c.clone(), TokenType::RBrace),
            "[" => (c.clone(), TokenType::LBracket),
            "]" => (c.clone(), TokenType::RBracket),
            ";" => (c.clone(), TokenType::Semicolon),
            "," => (c.clone(), TokenType::Comma),
            ":" => (c.clone(), TokenType::Colon),
            "?" => (c.clone(), TokenType::Question),
            "+" => (c.clone(), TokenType::Plus),
            "-" => (c.clone(), TokenType::Minus),
            "*" => (c.clone(), TokenType::Star),
            "/" => (c.clone(), TokenType::Slash),
            "%" => (c.clone(), TokenType::Percent),
            "=" => two_char!("=", TokenType::EqEq, TokenType::Assign),
            "!" => two_char!("=", TokenType::NotEq, TokenType::Bang),
            "<" => two_char!("=", TokenType::Le, TokenType::Lt),
            ">" => two_char!("=", TokenType::Ge, TokenType::Gt),
            "&" => {
                if self.peek() == Some("&") {
                    self.advance();
                    ("&&".to_string(), TokenType::AndAnd)
                } else {
                    return Err(LexerError::UnexpectedCharacter { character: '&', location });
                }
            }
            "|" => {
                if self.peek() == Some("|") {
                    self.advance();
                    ("||".to_string(), TokenType::OrOr)
                } else {
                    return Err(LexerError::UnexpectedCharacter { character: '|', location });
                }
            }
            other => {
                return Err(LexerError::UnexpectedCharacter {
                    character: other.chars().next().unwrap_or('?'),
                    location,
                });
            }
        };
        Ok(Token { token_type, location, lexeme })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple_assignment() {
        let mut lexer = Lexer::new("x = 1 + 2;", "t.c".to_string());
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].token_type, TokenType::Identifier("x".to_string()));
        assert_eq!(tokens[1].token_type, TokenType::Assign);
        assert_eq!(tokens[2].token_type, TokenType::IntLiteral(1));
        assert_eq!(tokens[3].token_type, TokenType::Plus);
        assert_eq!(tokens[4].token_type, TokenType::IntLiteral(2));
        assert_eq!(tokens[5].token_type, TokenType::Semicolon);
        assert_eq!(tokens.last().unwrap().token_type, TokenType::Eof);
    }

    #[test]
    fn test_tokenize_keywords_and_operators() {
        let mut lexer = Lexer::new("while (x <= 4) { y = y + 1; }", "t.c".to_string());
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].token_type, TokenType::Keyword(Keyword::While));
        assert_eq!(tokens[3].token_type, TokenType::Le);
    }

    #[test]
    fn test_string_literal_annotation() {
        let mut lexer = Lexer::new("\"PRECONDITION:ALL_DIFFER\";", "t.c".to_string());
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].token_type, TokenType::StringLiteral("PRECONDITION:ALL_DIFFER".to_string()));
    }

    #[test]
    fn test_unterminated_string_errors() {
        let mut lexer = Lexer::new("\"abc", "t.c".to_string());
        assert!(lexer.tokenize().is_err());
    }
}
