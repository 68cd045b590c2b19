// ABOUTME: The six concrete end-to-end scenarios: one `run` or `run_loop` call each, asserting
// on the resulting `Step` exactly the way a host embedding this crate would.

use lisp_llm_sandbox::error::{EvalError, ErrorKind};
use lisp_llm_sandbox::loop_::{AgentOptions, LlmFn, LoopOptions, run_loop};
use lisp_llm_sandbox::sandbox::{run, RunOptions};
use lisp_llm_sandbox::tools::{SimpleTool, ToolRegistry};
use lisp_llm_sandbox::value::{MapKey, Value};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

#[test]
fn arithmetic() {
    let step = run("(+ 1 2 3)", RunOptions::default());
    assert_eq!(step.return_value, Some(Value::Int(6)));
    assert_eq!(step.memory, Value::Nil);
    assert!(step.fail.is_none());
}

#[test]
fn filter_and_count_via_where() {
    let source = r#"(count (filter (where :active) [{:active true} {:active false} {:active true}]))"#;
    let step = run(source, RunOptions::default());
    assert_eq!(step.return_value, Some(Value::Int(2)));
}

#[test]
fn memory_contract_single_shot() {
    let memory = Value::map(BTreeMap::new());
    let step = run("{:users [1 2] :result 2}", RunOptions { memory, ..RunOptions::default() });
    assert_eq!(step.return_value, Some(Value::Int(2)));
    let Value::Map(mem) = &step.memory else { panic!("expected map memory") };
    assert_eq!(mem.get(&MapKey::Keyword("users".into())), Some(&Value::vector(vec![Value::Int(1), Value::Int(2)])));
    assert!(!mem.contains_key(&MapKey::Keyword("result".into())));
}

fn get_x_tool(_args: &Value) -> Result<Value, EvalError> {
    Ok(Value::Int(42))
}

/// Turn 1 calls a tool and merges its result into memory; turn 2 reads it back out of memory and
/// returns it. The value crosses the turn boundary through memory rather than a `def`, since each
/// turn gets a fresh environment (see DESIGN.md).
#[test]
fn multi_turn_completion_via_loop() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(SimpleTool::new("get-x", "returns 42", get_x_tool)));
    let tools = Rc::new(tools);

    let call = Cell::new(0);
    let llm: &LlmFn = &|_input| {
        let n = call.get();
        call.set(n + 1);
        if n == 0 {
            Ok("```clojure\n{:x (call \"get-x\" {})}\n```".to_string())
        } else {
            Ok("```clojure\n(return memory/x)\n```".to_string())
        }
    };
    let agent = AgentOptions::new("fetch x and return it", tools);
    let options = LoopOptions::new(llm);
    let step = run_loop(&agent, &options);

    assert_eq!(step.return_value, Some(Value::Int(42)));
    assert_eq!(step.usage.turns, 2);
    assert!(step.fail.is_none());
}

#[test]
fn error_recovery_via_loop() {
    let call = Cell::new(0);
    let llm: &LlmFn = &|_input| {
        let n = call.get();
        call.set(n + 1);
        if n == 0 {
            Ok("```clojure\n(/ 1 0)\n```".to_string())
        } else {
            Ok("```clojure\n(return 1)\n```".to_string())
        }
    };
    let agent = AgentOptions::new("divide", Rc::new(ToolRegistry::new()));
    let options = LoopOptions::new(llm);
    let step = run_loop(&agent, &options);

    assert_eq!(step.return_value, Some(Value::Int(1)));
    assert_eq!(step.usage.turns, 2);
}

#[test]
fn timeout() {
    let src = "(loop [] (recur))";
    let step = run(src, RunOptions { timeout_ms: 50, ..RunOptions::default() });
    assert!(step.fail.is_some());
    let failure = step.fail.unwrap();
    assert!(matches!(failure.reason, ErrorKind::Timeout | ErrorKind::IterationLimit));
}
