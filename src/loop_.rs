// ABOUTME: Drives a SubAgent's turn-by-turn conversation with an LLM callback (§4.6): builds the
// per-turn input, invokes the callback, extracts a code block, runs it through the Sandbox,
// applies the memory-merge contract, and decides whether the agent is done. `TurnState` models
// the per-turn state machine of §4.7 as a plain enum matched in `run_loop`'s driving loop, rather
// than a trait-object state machine, since the set of states is small and closed.

use crate::config::{DEFAULT_MAX_HEAP, DEFAULT_MAX_PRINT_LENGTH, DEFAULT_MAX_TURNS, DEFAULT_MEMORY_LIMIT, DEFAULT_TIMEOUT_MS};
use crate::error::ErrorKind;
use crate::eval::{call_value, EvalCtx};
use crate::sandbox::{run_turn, RunOptions};
use crate::step::{Step, TraceEntry, Usage};
use crate::tools::ToolRegistry;
use crate::value::Value;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message { role: Role::Assistant, content: content.into() }
    }
}

/// What the Loop hands the LLM callback each turn (§4.6 step 1).
#[derive(Debug, Clone)]
pub struct LlmInput {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub turn: usize,
    pub memory: Value,
    pub tool_names: Vec<String>,
}

/// `fn(input) -> {:ok, text} | {:error, reason}` from §6, expressed as a native callback rather
/// than a wire-format enum since both sides of this boundary are Rust.
pub type LlmFn<'a> = dyn Fn(&LlmInput) -> Result<String, String> + 'a;

/// `agent` from §6's `run_loop(agent, options)`: the per-agent configuration that stays fixed
/// across turns. Signature validation is a plain callable predicate applied to the final return
/// value rather than a parsed schema object, since signature *parsing* is an explicit non-goal
/// (§1) — callers that want schema validation supply it as a closure over their own schema.
pub struct AgentOptions {
    pub prompt: String,
    pub signature: Option<Value>,
    pub tools: Rc<ToolRegistry>,
    pub max_turns: usize,
    pub timeout_ms: u64,
    pub max_heap: usize,
    pub max_print_length: usize,
    pub memory_limit: usize,
    pub system_prompt: Option<String>,
}

impl AgentOptions {
    pub fn new(prompt: impl Into<String>, tools: Rc<ToolRegistry>) -> Self {
        AgentOptions {
            prompt: prompt.into(),
            signature: None,
            tools,
            max_turns: DEFAULT_MAX_TURNS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_heap: DEFAULT_MAX_HEAP,
            max_print_length: DEFAULT_MAX_PRINT_LENGTH,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            system_prompt: None,
        }
    }
}

/// `options` from §6's `run_loop(agent, options)`: the LLM callback plus the turn's starting
/// `ctx`/`memory`. `llm_registry` lets a caller name alternate models per turn; `run_loop` itself
/// only ever dispatches to `llm`, the registry is carried through to `LlmInput` callers that want
/// to pick from it themselves.
pub struct LoopOptions<'a> {
    pub llm: &'a LlmFn<'a>,
    pub llm_registry: HashMap<String, &'a LlmFn<'a>>,
    pub context: Value,
    pub memory: Value,
}

impl<'a> LoopOptions<'a> {
    pub fn new(llm: &'a LlmFn<'a>) -> Self {
        LoopOptions { llm, llm_registry: HashMap::new(), context: Value::Nil, memory: Value::Nil }
    }
}

/// One turn's pipeline stage (§4.7). `RecoveryMessage` is the edge every non-`AwaitingLlm` state
/// takes on a recoverable error, looping back to `AwaitingLlm` for the next turn; `Decided` is
/// the sole path to the terminal `Done`.
enum TurnState {
    AwaitingLlm,
    Parsing(String),
    Executing(String),
    RecoveryMessage(String),
    Decided(Step),
}

fn extract_code(text: &str) -> Option<String> {
    for fence in ["```clojure", "```lisp"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            if let Some(end) = body.find("```") {
                let code = body[..end].trim();
                if !code.is_empty() {
                    return Some(code.to_string());
                }
            }
        }
    }
    // Fall back to the first balanced, top-level s-expression in the raw text.
    let bytes = text.as_bytes();
    let start = text.find('(')?;
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn renumber_trace(mut trace: Vec<TraceEntry>, turn: usize) -> Vec<TraceEntry> {
    for entry in trace.iter_mut() {
        entry.turn = turn;
    }
    trace
}

fn accumulate_usage(total: &mut Usage, turn_usage: Usage) {
    total.turns += 1;
    total.duration_ms += turn_usage.duration_ms;
    total.memory_bytes = turn_usage.memory_bytes;
}

fn serialized_memory_size(memory: &Value) -> usize {
    serde_json::to_vec(&memory.to_json()).map(|bytes| bytes.len()).unwrap_or(0)
}

/// Applies `agent.signature` (a one-argument callable) to the candidate return value, producing
/// `validation_error` on a falsy result. A missing signature always validates.
fn validate_signature(agent: &AgentOptions, candidate: &Value) -> Result<(), String> {
    let Some(signature) = &agent.signature else { return Ok(()) };
    let ctx = EvalCtx::new(
        Value::Nil,
        Value::Nil,
        Rc::clone(&agent.tools),
        Instant::now() + std::time::Duration::from_millis(agent.timeout_ms),
        crate::config::DEFAULT_ITERATION_LIMIT,
        agent.max_heap,
        agent.max_print_length,
    );
    match call_value(signature, vec![candidate.clone()], &ctx) {
        Ok(v) if v.truthy() => Ok(()),
        Ok(_) => Err(format!("return value failed signature check: {}", candidate.to_string_display())),
        Err(signal) => Err(format!("signature check raised an error: {signal:?}")),
    }
}

/// Drives a SubAgent invocation across at most `agent.max_turns` turns (§4.6). Every terminal
/// path — `return`, `fail`, `max_turns_exceeded`, `memory_limit_exceeded`, `llm_error`,
/// `validation_error` — produces a `Step` whose `trace` covers every turn taken, not just the
/// last one.
pub fn run_loop(agent: &AgentOptions, options: &LoopOptions) -> Step {
    let start = Instant::now();
    let mut messages = vec![Message::user(agent.prompt.clone())];
    let mut memory = options.memory.clone();
    let mut journal = Value::Nil;
    let mut trace: Vec<TraceEntry> = Vec::new();
    let mut usage = Usage::default();
    let mut turn = 0usize;
    let tool_names: Vec<String> = agent.tools.names().into_iter().map(String::from).collect();

    let mut state = TurnState::AwaitingLlm;
    loop {
        state = match state {
            TurnState::AwaitingLlm => {
                turn += 1;
                if turn > agent.max_turns {
                    break Step::failed(
                        ErrorKind::MaxTurnsExceeded,
                        format!("exceeded {} turn(s)", agent.max_turns),
                        memory,
                        usage,
                        trace,
                    );
                }
                let input = LlmInput {
                    system: agent.system_prompt.clone(),
                    messages: messages.clone(),
                    turn,
                    memory: memory.clone(),
                    tool_names: tool_names.clone(),
                };
                info!(turn, "awaiting llm");
                match (options.llm)(&input) {
                    Ok(text) => TurnState::Parsing(text),
                    Err(reason) => break Step::failed(ErrorKind::LlmError, reason, memory, usage, trace),
                }
            }
            TurnState::Parsing(text) => match extract_code(&text) {
                Some(source) => {
                    messages.push(Message::assistant(text));
                    TurnState::Executing(source)
                }
                None => {
                    warn!(turn, "no code block found in llm response");
                    messages.push(Message::assistant(text));
                    TurnState::RecoveryMessage("No valid PTC-Lisp code found".to_string())
                }
            },
            TurnState::Executing(source) => {
                let turn_options = RunOptions {
                    context: options.context.clone(),
                    memory: memory.clone(),
                    tools: Rc::clone(&agent.tools),
                    timeout_ms: agent.timeout_ms,
                    max_heap: agent.max_heap,
                    max_print_length: agent.max_print_length,
                    iteration_limit: crate::config::DEFAULT_ITERATION_LIMIT,
                    float_precision: None,
                    journal: journal.clone(),
                };
                let (step, journal_after, explicit_return, explicit_fail) = run_turn(&source, &turn_options);
                debug!(turn, failed = step.fail.is_some(), "turn executed");
                journal = journal_after;
                accumulate_usage(&mut usage, step.usage);
                trace.extend(renumber_trace(step.trace.clone(), turn));

                match step.fail {
                    Some(failure) if !explicit_fail => {
                        TurnState::RecoveryMessage(format!("{}: {}", failure.reason.as_str(), failure.message))
                    }
                    Some(failure) => break Step::failed(failure.reason, failure.message, step.memory, usage, trace),
                    None => {
                        memory = step.memory.clone();
                        let candidate = step.return_value.clone().unwrap_or(Value::Nil);
                        let done = explicit_return || agent.max_turns == 1;
                        if !done {
                            messages.push(Message::user(
                                "Turn executed. Call (return ...) when the task is complete, or continue with another step.".to_string(),
                            ));
                            if serialized_memory_size(&memory) > agent.memory_limit {
                                break Step::failed(
                                    ErrorKind::MemoryLimitExceeded,
                                    format!("memory exceeded {} byte limit", agent.memory_limit),
                                    memory,
                                    usage,
                                    trace,
                                );
                            }
                            TurnState::AwaitingLlm
                        } else if let Err(message) = validate_signature(agent, &candidate) {
                            break Step::failed(ErrorKind::ValidationError, message, memory, usage, trace);
                        } else {
                            let delta = step.memory_delta.clone();
                            TurnState::Decided(Step::succeeded(candidate, memory.clone(), delta, usage, trace.clone()))
                        }
                    }
                }
            }
            TurnState::RecoveryMessage(message) => {
                messages.push(Message::user(message));
                if serialized_memory_size(&memory) > agent.memory_limit {
                    break Step::failed(
                        ErrorKind::MemoryLimitExceeded,
                        format!("memory exceeded {} byte limit", agent.memory_limit),
                        memory,
                        usage,
                        trace,
                    );
                }
                TurnState::AwaitingLlm
            }
            TurnState::Decided(step) => break step,
        };
    }
    .tap_duration(start)
}

/// Small extension trait so the loop above can stamp final wall-clock duration onto the
/// already-built `Step` without threading an extra mutable binding through every break arm.
trait TapDuration {
    fn tap_duration(self, start: Instant) -> Step;
}

impl TapDuration for Step {
    fn tap_duration(mut self, start: Instant) -> Step {
        self.usage.duration_ms = start.elapsed().as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapKey;
    use std::cell::Cell;

    #[test]
    fn extract_code_prefers_the_clojure_fence() {
        let text = "here you go\n```clojure\n(+ 1 2)\n```\ndone";
        assert_eq!(extract_code(text), Some("(+ 1 2)".to_string()));
    }

    #[test]
    fn extract_code_falls_back_to_a_raw_s_expression() {
        let text = "sure, try (+ 1 2) and see";
        assert_eq!(extract_code(text), Some("(+ 1 2)".to_string()));
    }

    #[test]
    fn extract_code_returns_none_without_any_form() {
        assert_eq!(extract_code("no code here"), None);
    }

    #[test]
    fn single_shot_agent_terminates_after_one_turn_without_an_explicit_return() {
        let calls = Cell::new(0);
        let llm: &LlmFn = &|_input| {
            calls.set(calls.get() + 1);
            Ok("```clojure\n(+ 1 2)\n```".to_string())
        };
        let agent = AgentOptions { max_turns: 1, ..AgentOptions::new("add please", Rc::new(ToolRegistry::new())) };
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.return_value, Some(Value::Int(3)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn multi_turn_agent_continues_until_return_is_called() {
        let call = Cell::new(0);
        let llm: &LlmFn = &|_input| {
            let n = call.get();
            call.set(n + 1);
            if n == 0 {
                Ok("```clojure\n(memory/put :seen true)\n```".to_string())
            } else {
                Ok("```clojure\n(return 42)\n```".to_string())
            }
        };
        let agent = AgentOptions::new("count to something", Rc::new(ToolRegistry::new()));
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.return_value, Some(Value::Int(42)));
        assert_eq!(step.usage.turns, 2);
        let Value::Map(mem) = &step.memory else { panic!("expected map memory") };
        assert_eq!(mem.get(&MapKey::Keyword("seen".into())), Some(&Value::Bool(true)));
    }

    #[test]
    fn llm_error_terminates_the_loop() {
        let llm: &LlmFn = &|_input| Err("upstream unavailable".to_string());
        let agent = AgentOptions::new("anything", Rc::new(ToolRegistry::new()));
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.fail.unwrap().reason, ErrorKind::LlmError);
    }

    #[test]
    fn missing_code_block_feeds_back_and_counts_toward_max_turns() {
        let calls = Cell::new(0);
        let llm: &LlmFn = &|_input| {
            calls.set(calls.get() + 1);
            Ok("I don't have any code for you.".to_string())
        };
        let agent = AgentOptions { max_turns: 2, ..AgentOptions::new("do something", Rc::new(ToolRegistry::new())) };
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.fail.unwrap().reason, ErrorKind::MaxTurnsExceeded);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn explicit_fail_terminates_with_the_programs_reason() {
        let llm: &LlmFn = &|_input| Ok("```clojure\n(fail :bad-input \"nope\")\n```".to_string());
        let agent = AgentOptions::new("do something", Rc::new(ToolRegistry::new()));
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.fail.unwrap().reason, ErrorKind::ValidationError);
    }

    #[test]
    fn sandbox_error_is_recoverable_and_fed_back_to_the_llm() {
        let calls = Cell::new(0);
        let llm: &LlmFn = &|input: &LlmInput| {
            let n = calls.get();
            calls.set(n + 1);
            if n == 0 {
                assert_eq!(input.turn, 1);
                Ok("```clojure\n(+ 1 \"nope\")\n```".to_string())
            } else {
                assert!(input.messages.iter().any(|m| m.content.contains("type_error")));
                Ok("```clojure\n(+ 1 2)\n```".to_string())
            }
        };
        let agent = AgentOptions { max_turns: 3, ..AgentOptions::new("recover please", Rc::new(ToolRegistry::new())) };
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.return_value, Some(Value::Int(3)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn signature_mismatch_fails_validation() {
        let llm: &LlmFn = &|_input| Ok("```clojure\n(+ 1 2)\n```".to_string());
        let mut agent = AgentOptions::new("add please", Rc::new(ToolRegistry::new()));
        agent.max_turns = 1;
        agent.signature = Some(Value::BuiltIn(|args, _ctx| Ok(Value::Bool(matches!(args.first(), Some(Value::String(_)))))));
        let options = LoopOptions::new(llm);
        let step = run_loop(&agent, &options);
        assert_eq!(step.fail.unwrap().reason, ErrorKind::ValidationError);
    }
}
