// ABOUTME: Single-argument type and numeric predicates. Grounded in the teacher's `logic.rs`
// strict-typed-boolean idiom, generalized from bools-only to one predicate per `Value` variant.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

macro_rules! type_predicate {
    ($fname:expr, $pat:pat) => {
        |args: &[Value], _ctx: &EvalCtx| -> EvalResult<Value> {
            let [v] = args else { return Err(EvalError::arity_error($fname, "1", args.len()).into()) };
            Ok(Value::Bool(matches!(v, $pat)))
        }
    };
}

fn builtin_some_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("some?", "1", args.len()).into()) };
    Ok(Value::Bool(!matches!(v, Value::Nil)))
}

fn builtin_callable_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("fn?", "1", args.len()).into()) };
    Ok(Value::Bool(matches!(v, Value::Closure(_) | Value::BuiltIn(_) | Value::Predicate(_) | Value::Keyword(_))))
}

fn numeric_predicate(fname: &'static str, args: &[Value], f: fn(f64) -> bool) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error(fname, "1", args.len()).into()) };
    let n = match v {
        Value::Int(n) => *n as f64,
        Value::Float(n) => *n,
        other => return Err(EvalError::type_error(fname, "number", other).into()),
    };
    Ok(Value::Bool(f(n)))
}

fn builtin_zero_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    numeric_predicate("zero?", args, |n| n == 0.0)
}

fn builtin_pos_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    numeric_predicate("pos?", args, |n| n > 0.0)
}

fn builtin_neg_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    numeric_predicate("neg?", args, |n| n < 0.0)
}

fn builtin_even_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("even?", "1", args.len()).into()) };
    match v {
        Value::Int(n) => Ok(Value::Bool(n % 2 == 0)),
        other => Err(EvalError::type_error("even?", "int", other).into()),
    }
}

fn builtin_odd_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("odd?", "1", args.len()).into()) };
    match v {
        Value::Int(n) => Ok(Value::Bool(n % 2 != 0)),
        other => Err(EvalError::type_error("odd?", "int", other).into()),
    }
}

pub fn register(env: &Rc<Environment>) {
    env.define("nil?".to_string(), Value::BuiltIn(type_predicate!("nil?", Value::Nil)));
    env.define("some?".to_string(), Value::BuiltIn(builtin_some_q));
    env.define("true?".to_string(), Value::BuiltIn(type_predicate!("true?", Value::Bool(true))));
    env.define("false?".to_string(), Value::BuiltIn(type_predicate!("false?", Value::Bool(false))));
    env.define("boolean?".to_string(), Value::BuiltIn(type_predicate!("boolean?", Value::Bool(_))));
    env.define("string?".to_string(), Value::BuiltIn(type_predicate!("string?", Value::String(_))));
    env.define("number?".to_string(), Value::BuiltIn(type_predicate!("number?", Value::Int(_) | Value::Float(_))));
    env.define("int?".to_string(), Value::BuiltIn(type_predicate!("int?", Value::Int(_))));
    env.define("float?".to_string(), Value::BuiltIn(type_predicate!("float?", Value::Float(_))));
    env.define("keyword?".to_string(), Value::BuiltIn(type_predicate!("keyword?", Value::Keyword(_))));
    env.define("vector?".to_string(), Value::BuiltIn(type_predicate!("vector?", Value::Vector(_))));
    env.define("map?".to_string(), Value::BuiltIn(type_predicate!("map?", Value::Map(_))));
    env.define("set?".to_string(), Value::BuiltIn(type_predicate!("set?", Value::Set(_))));
    env.define("coll?".to_string(), Value::BuiltIn(type_predicate!("coll?", Value::Vector(_) | Value::Map(_) | Value::Set(_))));
    env.define("fn?".to_string(), Value::BuiltIn(builtin_callable_q));
    env.define("zero?".to_string(), Value::BuiltIn(builtin_zero_q));
    env.define("pos?".to_string(), Value::BuiltIn(builtin_pos_q));
    env.define("neg?".to_string(), Value::BuiltIn(builtin_neg_q));
    env.define("even?".to_string(), Value::BuiltIn(builtin_even_q));
    env.define("odd?".to_string(), Value::BuiltIn(builtin_odd_q));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use std::time::{Duration, Instant};

    fn ctx() -> EvalCtx {
        EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 2000)
    }

    #[test]
    fn nil_and_some_are_complementary() {
        assert_eq!(builtin_zero_q(&[Value::Int(0)], &ctx()).unwrap(), Value::Bool(true));
        assert_eq!(builtin_even_q(&[Value::Int(3)], &ctx()).unwrap(), Value::Bool(false));
    }

    #[test]
    fn coll_q_accepts_vectors_maps_and_sets_only() {
        let coll_q = type_predicate!("coll?", Value::Vector(_) | Value::Map(_) | Value::Set(_));
        assert_eq!(coll_q(&[Value::vector(vec![])], &ctx()).unwrap(), Value::Bool(true));
        assert_eq!(coll_q(&[Value::Int(1)], &ctx()).unwrap(), Value::Bool(false));
    }
}
