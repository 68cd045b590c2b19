// ABOUTME: The testable properties independent of any single scenario: short-circuit evaluation,
// comparison arity strictness, flex-get, keywords as callables, and `pmap`'s discard-on-caller
// contract for a worker's side effects.

use lisp_llm_sandbox::error::ErrorKind;
use lisp_llm_sandbox::sandbox::{run, RunOptions};
use lisp_llm_sandbox::value::Value;

#[test]
fn and_short_circuits_on_the_first_falsy_value() {
    let step = run(r#"(and false (println "should not run"))"#, RunOptions::default());
    assert_eq!(step.return_value, Some(Value::Bool(false)));
    assert!(step.trace[0].prints.is_empty());
}

#[test]
fn or_short_circuits_on_the_first_truthy_value() {
    let step = run(r#"(or 1 (println "should not run"))"#, RunOptions::default());
    assert_eq!(step.return_value, Some(Value::Int(1)));
    assert!(step.trace[0].prints.is_empty());
}

#[test]
fn comparisons_are_strictly_binary_not_chained() {
    let step = run("(< 1 2 3)", RunOptions::default());
    assert_eq!(step.fail.as_ref().unwrap().reason, ErrorKind::InvalidArity);
}

#[test]
fn flex_get_prefers_the_keyword_key_but_falls_back_to_string() {
    let keyword_wins = run(r#"(get {:a 1 "a" 2} :a)"#, RunOptions::default());
    assert_eq!(keyword_wins.return_value, Some(Value::Int(1)));

    let string_fallback = run(r#"(get {"a" 2} :a)"#, RunOptions::default());
    assert_eq!(string_fallback.return_value, Some(Value::Int(2)));
}

#[test]
fn keywords_are_callable_as_accessor_functions() {
    let step = run(r#"(filter :active [{:active true} {:active false}])"#, RunOptions::default());
    assert_eq!(step.return_value, Some(Value::vector(vec![Value::map(std::collections::BTreeMap::from([(
        lisp_llm_sandbox::value::MapKey::Keyword("active".into()),
        Value::Bool(true),
    )]))])));
}

/// A worker's `println` must never reach the caller's trace: `pmap` runs each unit of work
/// against its own throwaway context.
#[test]
fn pmap_discards_worker_side_effects() {
    let step = run(r#"(pmap (fn [x] (println "noisy") (* x x)) [1 2 3])"#, RunOptions::default());
    assert_eq!(step.return_value, Some(Value::vector(vec![Value::Int(1), Value::Int(4), Value::Int(9)])));
    assert!(step.trace[0].prints.is_empty());
}
