// ABOUTME: Crate-wide defaults shared between the CLI flag defaults and each stage's own
// `Default` impl, so a bare `run(source, RunOptions::default())` and the CLI agree.

pub const VERSION: &str = "1.0.0";
pub const WELCOME_MESSAGE: &str = "lisp-llm-sandbox REPL";
pub const WELCOME_SUBTITLE: &str = "a sandboxed Lisp for LLM tool orchestration";

/// Wall-clock ceiling per evaluation (§4.5).
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
/// Approximate heap cap per evaluation (§4.5).
pub const DEFAULT_MAX_HEAP: usize = 10 * 1024 * 1024;
/// `loop`/`recur` and equivalent iteration cap (§4.5).
pub const DEFAULT_ITERATION_LIMIT: usize = 1000;
/// Per-`println` truncation length (§4.5).
pub const DEFAULT_MAX_PRINT_LENGTH: usize = 2000;
/// Typical agentic-loop turn ceiling (§4.6).
pub const DEFAULT_MAX_TURNS: usize = 10;
/// Serialized-memory ceiling before `memory_limit_exceeded` (§4.6).
pub const DEFAULT_MEMORY_LIMIT: usize = 1024 * 1024;
/// Bounded worker-pool size for `pmap`/`pcalls` (§5).
pub const DEFAULT_PARALLEL_POOL_SIZE: usize = 8;

pub const HELP_TEXT: &str = r#"
Available REPL commands:
  (quit) or (exit)     - Exit the REPL
  (clear)              - Clear the screen

Type any Lisp expression to evaluate it through `run`. Use Ctrl-D or (quit) to exit.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        assert_eq!(DEFAULT_TIMEOUT_MS, 1000);
        assert_eq!(DEFAULT_ITERATION_LIMIT, 1000);
        assert_eq!(DEFAULT_MAX_PRINT_LENGTH, 2000);
    }
}
