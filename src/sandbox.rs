// ABOUTME: Wraps one evaluation in the resource-bounded execution unit (§4.5): wall-clock
// timeout, heap cap, iteration cap, and print-length cap. Reuses this module's name and position
// in the tree from the inherited codebase, not its contents — the inherited `sandbox.rs`
// restricted filesystem/network capabilities with `cap-std`, which is tool-implementation
// territory this interpreter never touches directly (tools are host-supplied callbacks, §6).

use crate::analyzer::analyze;
use crate::config::{DEFAULT_ITERATION_LIMIT, DEFAULT_MAX_HEAP, DEFAULT_MAX_PRINT_LENGTH, DEFAULT_TIMEOUT_MS};
use crate::env::Environment;
use crate::error::{ErrorKind, InterpreterError, Signal};
use crate::eval::{eval, EvalCtx};
use crate::parser::parse;
use crate::runtime;
use crate::step::{Step, TraceEntry, TraceToolCall, Usage};
use crate::tools::ToolRegistry;
use crate::value::{MapKey, Value};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// `{ context, memory, tools, timeout_ms, max_heap, float_precision }` from §6's top-level API.
pub struct RunOptions {
    pub context: Value,
    pub memory: Value,
    pub tools: Rc<ToolRegistry>,
    pub timeout_ms: u64,
    pub max_heap: usize,
    pub max_print_length: usize,
    pub iteration_limit: usize,
    pub float_precision: Option<u32>,
    /// Cross-turn task memoization state (glossary: "Journal"). A bare `run` call always starts
    /// with an empty journal; `loop_::run_loop` is the only caller that threads a non-`Nil` one
    /// in, carrying it forward from the previous turn's snapshot.
    pub journal: Value,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            context: Value::Nil,
            memory: Value::Nil,
            tools: Rc::new(ToolRegistry::new()),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_heap: DEFAULT_MAX_HEAP,
            max_print_length: DEFAULT_MAX_PRINT_LENGTH,
            iteration_limit: DEFAULT_ITERATION_LIMIT,
            float_precision: None,
            journal: Value::Nil,
        }
    }
}

/// Rounds every float nested in `v` to `precision` decimal digits. Applied only when the caller
/// asks for it (§6's `float_precision` option) so ordinary runs keep full `f64` fidelity.
fn round_floats(v: &Value, precision: u32) -> Value {
    let factor = 10f64.powi(precision as i32);
    match v {
        Value::Float(f) => Value::Float((f * factor).round() / factor),
        Value::Vector(items) => Value::vector(items.iter().map(|x| round_floats(x, precision)).collect()),
        Value::Set(items) => Value::Set(Rc::new(items.iter().map(|x| round_floats(x, precision)).collect())),
        Value::Map(m) => Value::map(m.iter().map(|(k, x)| (k.clone(), round_floats(x, precision))).collect()),
        other => other.clone(),
    }
}

fn as_map(v: &Value) -> BTreeMap<MapKey, Value> {
    match v {
        Value::Map(m) => m.as_ref().clone(),
        _ => BTreeMap::new(),
    }
}

/// The keys this turn added or changed relative to the memory it started with.
fn diff_memory(before: &Value, after: &Value) -> Value {
    let before = as_map(before);
    let after = as_map(after);
    let mut delta = BTreeMap::new();
    for (k, v) in after.iter() {
        if before.get(k) != Some(v) {
            delta.insert(k.clone(), v.clone());
        }
    }
    Value::map(delta)
}

/// Applies the memory-merge contract (§6, bit-exact rules) to one turn's return value.
///
/// Returns `(candidate_return, merged_memory)`.
fn apply_memory_merge(value: &Value, memory: &Value) -> (Value, Value) {
    let Value::Map(value_map) = value else {
        return (value.clone(), memory.clone());
    };
    let mut merged = as_map(memory);
    let result_key = MapKey::Keyword("result".into());
    if let Some(result) = value_map.get(&result_key) {
        for (k, v) in value_map.iter() {
            if *k != result_key {
                merged.insert(k.clone(), v.clone());
            }
        }
        (result.clone(), Value::map(merged))
    } else {
        for (k, v) in value_map.iter() {
            merged.insert(k.clone(), v.clone());
        }
        (value.clone(), Value::map(merged))
    }
}

/// One call to a single turn's worth of Lisp source: Parser -> Analyzer -> Evaluator, with the
/// memory-merge contract and resource bounds applied, plus the journal snapshot carried forward
/// for the next turn. `run` (below) is the public single-shot entry point and discards the
/// journal half of this; `loop_::run_loop` is the only caller that keeps it.
fn execute(source: &str, options: &RunOptions) -> (Step, Value, bool, bool) {
    let start = Instant::now();
    let deadline = start + Duration::from_millis(options.timeout_ms);

    let raw = match parse(source) {
        Ok(raw) => raw,
        Err(e) => {
            return (
                Step::failed(ErrorKind::ParseError, e.to_string(), options.memory.clone(), Usage::default(), vec![]),
                options.journal.clone(),
                false,
                false,
            )
        }
    };
    let core = match analyze(&raw) {
        Ok(core) => core,
        Err(e) => {
            return (
                Step::failed(e.kind, e.message, options.memory.clone(), Usage::default(), vec![]),
                options.journal.clone(),
                false,
                false,
            )
        }
    };

    let root = Environment::new_builtin_root();
    runtime::register_all(&root);
    let user_env = Environment::with_parent(&root);

    let ctx = EvalCtx::new(
        options.context.clone(),
        options.memory.clone(),
        Rc::clone(&options.tools),
        deadline,
        options.iteration_limit,
        options.max_heap,
        options.max_print_length,
    )
    .with_journal(options.journal.clone());

    let outcome = eval(&core, &user_env, &ctx);
    let duration_ms = start.elapsed().as_millis() as u64;
    let memory_bytes = options.max_heap - ctx.heap_budget.get();
    let usage = Usage { turns: 1, duration_ms, memory_bytes };
    let memory_before_merge = ctx.memory_snapshot();
    let journal_after = ctx.journal_snapshot();

    let trace = vec![TraceEntry {
        turn: 1,
        program_source: source.to_string(),
        value: outcome.as_ref().ok().cloned(),
        prints: ctx.prints.borrow().clone(),
        tool_calls: ctx.tool_calls.borrow().iter().map(TraceToolCall::from).collect(),
        duration_ms,
    }];

    let finish = |value: Value| {
        let value = match options.float_precision {
            Some(p) => round_floats(&value, p),
            None => value,
        };
        let (candidate, merged_memory) = apply_memory_merge(&value, &memory_before_merge);
        let delta = diff_memory(&options.memory, &merged_memory);
        Step::succeeded(candidate, merged_memory, delta, usage, trace.clone())
    };

    // On failure the entry memory snapshot is returned unchanged — this evaluation's
    // `memory/put` writes and any partial map-literal state never leak out (§4.5). The journal
    // is exempt from that rule: completed tasks stay memoized even when a later expression in
    // the same turn fails, so a retried turn doesn't redo already-checkpointed work.
    // `explicit_return`/`explicit_fail` distinguish a program that called `(return v)` or
    // `(fail ...)` from one that simply evaluated to a value or raised an ordinary evaluator
    // error — the Loop needs this to tell "done" and "terminated" apart from "recoverable,
    // feed the error back and try again" (§4.6 steps 5-6), since `Step.fail` alone doesn't
    // distinguish an explicit `fail` call from a type error.
    let explicit_return = matches!(outcome, Err(Signal::Return(_)));
    let explicit_fail = matches!(outcome, Err(Signal::Fail { .. }));
    let step = match outcome {
        Ok(value) => finish(value),
        Err(Signal::Return(value)) => finish(value),
        Err(Signal::Fail { reason, message }) => {
            Step::failed(ErrorKind::ValidationError, format!("{reason}: {message}"), options.memory.clone(), usage, trace)
        }
        Err(Signal::Error(e)) => Step::failed(e.kind, e.message, options.memory.clone(), usage, trace),
    };
    (step, journal_after, explicit_return, explicit_fail)
}

/// One call to a single turn's worth of Lisp source: Parser -> Analyzer -> Evaluator, with the
/// memory-merge contract and resource bounds applied. This is `run` from §6.
pub fn run(source: &str, options: RunOptions) -> Step {
    execute(source, &options).0
}

/// Like `run`, but also returns the journal snapshot to thread into the next turn's
/// `RunOptions`, and whether the program terminated via an explicit `(return v)` or `(fail
/// ...)` call (as opposed to simply evaluating to a value or erroring). `loop_::run_loop` is
/// the only caller; a single-shot `run` has no next turn to carry any of this to.
pub(crate) fn run_turn(source: &str, options: &RunOptions) -> (Step, Value, bool, bool) {
    execute(source, options)
}

/// Translates an evaluator-stage failure into the top-level `InterpreterError` used by callers
/// (like the CLI) that want `?`-propagation instead of a `Step`'s embedded `fail` field.
pub fn run_checked(source: &str, options: RunOptions) -> Result<Step, InterpreterError> {
    Ok(run(source, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_returns_the_value_with_unchanged_memory() {
        let step = run("(+ 1 2 3)", RunOptions::default());
        assert_eq!(step.return_value, Some(Value::Int(6)));
        assert_eq!(step.memory, Value::Nil);
    }

    #[test]
    fn map_without_result_merges_whole_map_into_memory() {
        let step = run("{:users [1 2]}", RunOptions { memory: Value::map(BTreeMap::new()), ..RunOptions::default() });
        let Value::Map(mem) = &step.memory else { panic!("expected map memory") };
        assert!(mem.contains_key(&MapKey::Keyword("users".into())));
    }

    #[test]
    fn map_with_result_key_does_not_leak_into_memory() {
        let step = run("{:users [1 2] :result 2}", RunOptions { memory: Value::map(BTreeMap::new()), ..RunOptions::default() });
        assert_eq!(step.return_value, Some(Value::Int(2)));
        let Value::Map(mem) = &step.memory else { panic!("expected map memory") };
        assert!(!mem.contains_key(&MapKey::Keyword("result".into())));
        assert!(mem.contains_key(&MapKey::Keyword("users".into())));
    }

    #[test]
    fn iteration_limit_fails_the_step() {
        let src = "(do (def loop-forever (fn [] (loop-forever))) (loop-forever))";
        let step = run(src, RunOptions { iteration_limit: 50, ..RunOptions::default() });
        assert!(step.fail.is_some());
        assert!(matches!(step.fail.as_ref().unwrap().reason, ErrorKind::IterationLimit | ErrorKind::Timeout));
    }

    #[test]
    fn loop_recur_is_capped_by_the_iteration_limit() {
        let step = run("(loop [] (recur))", RunOptions { iteration_limit: 50, ..RunOptions::default() });
        assert!(step.fail.is_some());
        assert!(matches!(step.fail.as_ref().unwrap().reason, ErrorKind::IterationLimit | ErrorKind::Timeout));
    }

    #[test]
    fn loop_recur_threads_an_accumulator_to_completion() {
        let step = run("(loop [i 0 acc 0] (if (= i 5) acc (recur (+ i 1) (+ acc i))))", RunOptions::default());
        assert_eq!(step.return_value, Some(Value::Int(10)));
    }

    #[test]
    fn parse_error_surfaces_as_a_failed_step() {
        let step = run("(+ 1", RunOptions::default());
        assert_eq!(step.fail.as_ref().unwrap().reason, ErrorKind::ParseError);
    }
}
