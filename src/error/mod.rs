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

//! Error handling for CheckDP
//!
//! Three error families, matching the three error kinds the pipeline can
//! surface: configuration errors (bad annotations, unsupported syntax),
//! external tool errors (compiler/executor/solver failures), and the
//! aggregate error consumed at the CLI boundary.

use std::fmt;
use thiserror::Error;

/// Source location information for error reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl SourceLocation {
    pub fn new(file: String, line: usize, column: usize, offset: usize) -> Self {
        Self { file, line, column, offset }
    }

    pub fn unknown() -> Self {
        Self { file: "<unknown>".to_string(), line: 0, column: 0, offset: 0 }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Source span covering a range of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

impl SourceSpan {
    pub fn new(start: SourceLocation, end: SourceLocation) -> Self {
        Self { start, end }
    }

    pub fn single(location: SourceLocation) -> Self {
        Self { start: location.clone(), end: location }
    }
}

/// Lexical analysis errors.
#[derive(Error, Debug, Clone)]
pub enum LexerError {
    #[error("Unexpected character '{character}' at {location}")]
    UnexpectedCharacter { character: char, location: SourceLocation },

    #[error("Unterminated string literal at {location}")]
    UnterminatedString { location: SourceLocation },

    #[error("Invalid number format '{value}' at {location}")]
    InvalidNumber { value: String, location: SourceLocation },
}

/// Parsing errors.
#[derive(Error, Debug, Clone)]
pub enum ParserError {
    #[error("Unexpected token {found}, expected {expected} at {location}")]
    UnexpectedToken { found: String, expected: String, location: SourceLocation },

    #[error("Unexpected end of file, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("Invalid construct '{construct}' at {location}")]
    InvalidConstruct { construct: String, location: SourceLocation },

    #[error("Unimplemented feature '{feature}' at {location}")]
    Unimplemented { feature: String, location: SourceLocation },

    #[error("Lexer error: {source}")]
    LexerError {
        #[from]
        source: LexerError,
    },
}

/// Configuration errors: malformed annotations, unsupported constructs,
/// reserved-name collisions, missing parameter distances. Per the error
/// handling design, these abort the pipeline immediately and are never
/// retried.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Malformed distance annotation '{text}' at {location}: {reason}")]
    MalformedAnnotation { text: String, reason: String, location: SourceLocation },

    #[error("Unknown precondition class '{class}' at {location}")]
    UnknownPreconditionClass { class: String, location: SourceLocation },

    #[error("Parameter '{name}' is missing a distance annotation at {location}")]
    MissingParameterAnnotation { name: String, location: SourceLocation },

    #[error("Annotation for '{name}' does not correspond to any parameter at {location}")]
    ExtraAnnotation { name: String, location: SourceLocation },

    #[error("Function must declare at least 3 parameters (query[], size, epsilon, ...) at {location}")]
    TooFewParameters { location: SourceLocation },

    #[error("Parameter {index} ('{name}') must be {expected} at {location}")]
    WrongParameterShape { index: usize, name: String, expected: String, location: SourceLocation },

    #[error("Identifier '{name}' uses the reserved prefix '{prefix}' at {location}")]
    ReservedNameCollision { name: String, prefix: String, location: SourceLocation },

    #[error("Unsupported statement '{kind}' at {location}")]
    UnsupportedStatement { kind: String, location: SourceLocation },

    #[error("Call to unsupported function '{name}' at {location}; only Lap and OUTPUT are permitted")]
    UnsupportedCall { name: String, location: SourceLocation },

    #[error("'return' is not permitted in user code at {location}")]
    ReturnInUserCode { location: SourceLocation },

    #[error("Random sample '{name}' declared while the control-flow condition is shadow-divergent, at {location}")]
    RandomUnderDivergentPc { name: String, location: SourceLocation },

    #[error("Array '{name}' declared inside a branch has undefined shadow semantics at {location}")]
    ArrayInBranch { name: String, location: SourceLocation },

    #[error("Exactly one function must be present in the input (found {count})")]
    NotExactlyOneFunction { count: usize },
}

/// External tool errors: compiler rejection, executor crash, an
/// unexpected `ERROR` line from the solver. These are not recoverable;
/// the CEGIS loop does not attempt to continue after one.
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("clang rejected '{file}': {message}")]
    CompilerRejected { file: String, message: String },

    #[error("symbolic executor '{backend}' crashed or produced no 'KLEE: done' marker: {message}")]
    ExecutorFailed { backend: String, message: String },

    #[error("solver reported an unexpected error line: {line}")]
    SolverError { line: String },

    #[error("probabilistic validator failed: {message}")]
    ValidatorFailed { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Io { message: err.to_string() }
    }
}

/// Aggregate error type consumed at the CLI boundary.
#[derive(Error, Debug, Clone)]
pub enum CheckDpError {
    #[error("lexer error: {source}")]
    Lexer {
        #[from]
        source: LexerError,
    },

    #[error("parser error: {source}")]
    Parser {
        #[from]
        source: ParserError,
    },

    #[error("configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("external tool error: {source}")]
    Tool {
        #[from]
        source: ToolError,
    },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<std::io::Error> for CheckDpError {
    fn from(err: std::io::Error) -> Self {
        CheckDpError::Io { message: err.to_string() }
    }
}

/// Diagnostic severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A diagnostic message with location and severity.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceSpan>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: String, location: Option<SourceSpan>) -> Self {
        Self { severity: Severity::Error, message, location, help: None }
    }

    pub fn warning(message: String, location: Option<SourceSpan>) -> Self {
        Self { severity: Severity::Warning, message, location, help: None }
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }
}

/// Renders diagnostics to stderr, used by the CLI.
pub struct ErrorReporter {
    use_colors: bool,
}

impl ErrorReporter {
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    pub fn report(&self, diagnostic: &Diagnostic) {
        let color = if self.use_colors {
            match diagnostic.severity {
                Severity::Error => "\x1b[31m",
                Severity::Warning => "\x1b[33m",
                Severity::Info => "\x1b[34m",
            }
        } else {
            ""
        };
        let reset = if self.use_colors { "\x1b[0m" } else { "" };

        if let Some(span) = &diagnostic.location {
            eprintln!("{}{}{}: {} {}", color, diagnostic.severity, reset, span.start, diagnostic.message);
        } else {
            eprintln!("{}{}{}: {}", color, diagnostic.severity, reset, diagnostic.message);
        }

        if let Some(help) = &diagnostic.help {
            eprintln!("  = help: {}", help);
        }
    }

    pub fn report_error(&self, error: &CheckDpError) {
        self.report(&Diagnostic::error(error.to_string(), None));
    }
}

/// Suggests a correction for an unrecognized keyword (e.g. a mistyped
/// precondition class), via simple edit-distance matching against the
/// known candidates.
pub fn suggest_correction(input: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .min_by_key(|candidate| edit_distance(input, candidate))
        .filter(|candidate| edit_distance(input, candidate) <= 2)
        .map(|s| s.to_string())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    let mut dp = vec![vec![0; b_len + 1]; a_len + 1];
    for (i, row) in dp.iter_mut().enumerate().take(a_len + 1) {
        row[0] = i;
    }
    for j in 0..=b_len {
        dp[0][j] = j;
    }
    for i in 1..=a_len {
        for j in 1..=b_len {
            if a_chars[i - 1] == b_chars[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            } else {
                dp[i][j] = 1 + std::cmp::min(std::cmp::min(dp[i - 1][j], dp[i][j - 1]), dp[i - 1][j - 1]);
            }
        }
    }
    dp[a_len][b_len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_display() {
        let loc = SourceLocation::new("test.c".to_string(), 10, 5, 100);
        assert_eq!(loc.to_string(), "test.c:10:5");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("hello", "hello"), 0);
        assert_eq!(edit_distance("hello", "helo"), 1);
    }

    #[test]
    fn test_suggest_correction() {
        let candidates = &["ONE_DIFFER", "ALL_DIFFER", "DECREASING", "INCREASING"];
        assert_eq!(suggest_correction("ONE_DIFER", candidates), Some("ONE_DIFFER".to_string()));
        assert_eq!(suggest_correction("xyz", candidates), None);
    }
}
