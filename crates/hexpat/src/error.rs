// Error types for the pattern language

use thiserror::Error;

/// Lexer error
#[derive(Debug, Clone, PartialEq, Error)]
#[error("lex error at line {line}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
}

impl LexError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Parse error. Parsing stops at the first one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("parse error at line {line}: {message}")]
pub struct ParseError {
    pub message: String,
    /// 1-based line of the offending token
    pub line: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// Evaluation error
#[derive(Debug, Clone, PartialEq, Error)]
#[error("eval error{}: {message}", location_suffix(.line, .node))]
pub struct EvalError {
    pub message: String,
    /// Source line of the construct being evaluated, when known
    pub line: Option<u32>,
    /// Name of the declaration being evaluated, when known
    pub node: Option<String>,
}

fn location_suffix(line: &Option<u32>, node: &Option<String>) -> String {
    match (line, node) {
        (Some(line), Some(node)) => format!(" at line {} ('{}')", line, node),
        (Some(line), None) => format!(" at line {}", line),
        (None, Some(node)) => format!(" in '{}'", node),
        (None, None) => String::new(),
    }
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            node: None,
        }
    }

    pub fn at_line(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            node: None,
        }
    }

    /// Set the line if not already present.
    /// The innermost construct wins, so outer frames never overwrite it.
    pub fn with_line_if_none(mut self, line: u32) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Set the offending node name if not already present
    pub fn with_node_if_none(mut self, node: &str) -> Self {
        if self.node.is_none() && !node.is_empty() {
            self.node = Some(node.to_string());
        }
        self
    }
}

/// Top-level error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl Error {
    /// Source line the error points at, if any
    pub fn line(&self) -> Option<u32> {
        match self {
            Error::Lex(e) => Some(e.line),
            Error::Parse(e) => Some(e.line),
            Error::Eval(e) => e.line,
        }
    }
}
