// ABOUTME: Tool trait system for extending the Lisp with native Rust capabilities, kept to the
// teacher's Send + Sync trait-object shape but narrowed to the single-map-argument contract (§6):
// a tool is `fn(Map) -> Value`; a `{:error, reason}` map is a recoverable failure, a Rust panic or
// `Err` is caught and reported as `tool_error`, and nothing is auto-unwrapped on success.

use crate::error::EvalError;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A tool callable from `(call "name" {...})`. Implementors decide for themselves what counts as
/// a recoverable failure (return `{:error "..."}`) versus an `Err` (always reported as `tool_error`).
pub trait Tool: Send + Sync {
    fn call(&self, args: &Value) -> Result<Value, EvalError>;
    fn name(&self) -> &str;
    fn help(&self) -> &str;
}

/// Wraps a plain function pointer as a `Tool`, for tests and simple host integrations.
pub struct SimpleTool {
    name: String,
    help: String,
    func: fn(&Value) -> Result<Value, EvalError>,
}

impl SimpleTool {
    pub fn new(name: &str, help: &str, func: fn(&Value) -> Result<Value, EvalError>) -> Self {
        SimpleTool { name: name.to_string(), help: help.to_string(), func }
    }
}

impl Tool for SimpleTool {
    fn call(&self, args: &Value) -> Result<Value, EvalError> {
        (self.func)(args)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }
}

/// The set of tools available to a single evaluation. Looked up by name from `(call ...)`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Invokes `name` with `args`, translating a tool panic into a `tool_error` rather than
    /// unwinding into the evaluator.
    pub fn call(&self, name: &str, args: &Value) -> Result<Value, EvalError> {
        let tool = self.get(name).ok_or_else(|| EvalError::unknown_tool(name))?;
        let tool = Arc::clone(tool);
        let args = args.clone();
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| tool.call(&args)))
            .unwrap_or_else(|_| Err(EvalError::tool_error(name, "tool panicked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn echo(args: &Value) -> Result<Value, EvalError> {
        Ok(args.clone())
    }

    fn boom(_args: &Value) -> Result<Value, EvalError> {
        panic!("boom");
    }

    #[test]
    fn registers_and_calls_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SimpleTool::new("echo", "returns its input", echo)));
        let result = registry.call("echo", &Value::map(BTreeMap::new())).unwrap();
        assert_eq!(result, Value::map(BTreeMap::new()));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", &Value::Nil).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::UnknownTool);
    }

    #[test]
    fn panicking_tool_becomes_tool_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SimpleTool::new("boom", "always panics", boom)));
        let err = registry.call("boom", &Value::Nil).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ToolError);
    }
}
