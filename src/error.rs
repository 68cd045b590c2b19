// ABOUTME: The flat, kind-tagged error taxonomy (wire-visible names in ErrorKind) plus one
// thiserror enum per pipeline stage, unified by InterpreterError for `?`-propagation across
// stage boundaries and by `format_error` for the single-line LLM-facing rendering.

use crate::value::Value;
use serde::Serialize;
use thiserror::Error;

/// The wire-visible error kind taxonomy (§6). `MaxPrintLength` is a limit marker, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    InvalidArity,
    InvalidForm,
    InvalidWhereForm,
    InvalidWhereOperator,
    InvalidCallToolName,
    InvalidCondForm,
    InvalidThreadForm,
    UnsupportedPattern,
    UnboundVar,
    TypeError,
    ArithmeticError,
    IterationLimit,
    NotCallable,
    ToolError,
    UnknownTool,
    Timeout,
    MemoryExceeded,
    MaxTurnsExceeded,
    MemoryLimitExceeded,
    LlmError,
    ValidationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::InvalidArity => "invalid_arity",
            ErrorKind::InvalidForm => "invalid_form",
            ErrorKind::InvalidWhereForm => "invalid_where_form",
            ErrorKind::InvalidWhereOperator => "invalid_where_operator",
            ErrorKind::InvalidCallToolName => "invalid_call_tool_name",
            ErrorKind::InvalidCondForm => "invalid_cond_form",
            ErrorKind::InvalidThreadForm => "invalid_thread_form",
            ErrorKind::UnsupportedPattern => "unsupported_pattern",
            ErrorKind::UnboundVar => "unbound_var",
            ErrorKind::TypeError => "type_error",
            ErrorKind::ArithmeticError => "arithmetic_error",
            ErrorKind::IterationLimit => "iteration_limit",
            ErrorKind::NotCallable => "not_callable",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MemoryExceeded => "memory_exceeded",
            ErrorKind::MaxTurnsExceeded => "max_turns_exceeded",
            ErrorKind::MemoryLimitExceeded => "memory_limit_exceeded",
            ErrorKind::LlmError => "llm_error",
            ErrorKind::ValidationError => "validation_error",
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("Parse error: {message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Error, Debug, Clone)]
#[error("{kind_str}: {message}")]
pub struct AnalyzeError {
    pub kind: ErrorKind,
    pub message: String,
    kind_str: &'static str,
}

impl AnalyzeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        AnalyzeError { kind, message: message.into(), kind_str: kind.as_str() }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind_str}: {message}")]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    kind_str: &'static str,
}

impl EvalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        EvalError { kind, message: message.into(), kind_str: kind.as_str() }
    }

    pub fn unbound_var(name: &str) -> Self {
        Self::new(ErrorKind::UnboundVar, format!("Unbound variable: {name}"))
    }

    pub fn type_error(function: &str, expected: &str, actual: &Value) -> Self {
        Self::new(
            ErrorKind::TypeError,
            format!("{function}: expected {expected}, got {}", actual.type_name()),
        )
    }

    pub fn arity_error(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        let expected = expected.into();
        Self::new(
            ErrorKind::InvalidArity,
            format!("{function}: expected {expected} argument(s), got {actual}"),
        )
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArithmeticError, message.into())
    }

    pub fn not_callable(actual: &Value) -> Self {
        Self::new(ErrorKind::NotCallable, format!("value of type {} is not callable", actual.type_name()))
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorKind::UnknownTool, format!("Unknown tool: {name}"))
    }

    pub fn tool_error(name: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolError, format!("{name}: {}", message.into()))
    }

    pub fn iteration_limit(limit: usize) -> Self {
        Self::new(ErrorKind::IterationLimit, format!("iteration limit of {limit} exceeded"))
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind_str}: {message}")]
pub struct SandboxError {
    pub kind: ErrorKind,
    pub message: String,
    kind_str: &'static str,
}

impl SandboxError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        SandboxError { kind, message: message.into(), kind_str: kind.as_str() }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(ErrorKind::Timeout, format!("evaluation exceeded {timeout_ms}ms timeout"))
    }

    pub fn memory_exceeded(max_heap: usize) -> Self {
        Self::new(ErrorKind::MemoryExceeded, format!("evaluation exceeded {max_heap} byte heap cap"))
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind_str}: {message}")]
pub struct LoopError {
    pub kind: ErrorKind,
    pub message: String,
    kind_str: &'static str,
}

impl LoopError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        LoopError { kind, message: message.into(), kind_str: kind.as_str() }
    }
}

/// Control-flow signal threaded through evaluator results: `return`/`fail` are typed early exits,
/// never generic exceptions, per the design note in §9.
#[derive(Debug, Clone)]
pub enum Signal {
    Error(EvalError),
    Return(Value),
    Fail { reason: String, message: String },
}

impl From<EvalError> for Signal {
    fn from(e: EvalError) -> Self {
        Signal::Error(e)
    }
}

pub type EvalResult<T> = Result<T, Signal>;

#[derive(Error, Debug, Clone)]
pub enum InterpreterError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Loop(#[from] LoopError),
}

impl InterpreterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InterpreterError::Parse(_) => ErrorKind::ParseError,
            InterpreterError::Analyze(e) => e.kind,
            InterpreterError::Eval(e) => e.kind,
            InterpreterError::Sandbox(e) => e.kind,
            InterpreterError::Loop(e) => e.kind,
        }
    }
}

impl From<Signal> for InterpreterError {
    fn from(s: Signal) -> Self {
        match s {
            Signal::Error(e) => InterpreterError::Eval(e),
            Signal::Return(_) => InterpreterError::Eval(EvalError::new(ErrorKind::TypeError, "unexpected return outside a turn boundary")),
            Signal::Fail { reason, message } => InterpreterError::Loop(LoopError::new(ErrorKind::ValidationError, format!("{reason}: {message}"))),
        }
    }
}

/// External API entry: a short, imperative, LLM-friendly one-liner.
pub fn format_error(error: &InterpreterError) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_matches_wire_taxonomy() {
        assert_eq!(ErrorKind::ParseError.as_str(), "parse_error");
        assert_eq!(ErrorKind::MemoryLimitExceeded.as_str(), "memory_limit_exceeded");
    }

    #[test]
    fn format_error_includes_kind_and_message() {
        let e = InterpreterError::Eval(EvalError::arithmetic("division by zero"));
        let msg = format_error(&e);
        assert!(msg.contains("arithmetic_error"));
        assert!(msg.contains("division by zero"));
    }
}
