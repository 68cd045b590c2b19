// ABOUTME: The strictly-binary comparison operators the analyzer already enforces arity for
// (§4.2); these only ever see exactly two arguments. `=`/`not=` use Value's structural,
// type-distinguishing equality, `<`/`>`/`<=`/`>=` are numeric-only.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

fn as_f64(fname: &str, v: &Value) -> EvalResult<f64> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(EvalError::type_error(fname, "number", other).into()),
    }
}

fn builtin_eq(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(args[0] == args[1]))
}

fn builtin_not_eq(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(args[0] != args[1]))
}

fn builtin_lt(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(as_f64("<", &args[0])? < as_f64("<", &args[1])?))
}

fn builtin_gt(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(as_f64(">", &args[0])? > as_f64(">", &args[1])?))
}

fn builtin_lte(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(as_f64("<=", &args[0])? <= as_f64("<=", &args[1])?))
}

fn builtin_gte(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(as_f64(">=", &args[0])? >= as_f64(">=", &args[1])?))
}

pub fn register(env: &Rc<Environment>) {
    env.define("=".to_string(), Value::BuiltIn(builtin_eq));
    env.define("not=".to_string(), Value::BuiltIn(builtin_not_eq));
    env.define("<".to_string(), Value::BuiltIn(builtin_lt));
    env.define(">".to_string(), Value::BuiltIn(builtin_gt));
    env.define("<=".to_string(), Value::BuiltIn(builtin_lte));
    env.define(">=".to_string(), Value::BuiltIn(builtin_gte));
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
    fn eq_is_type_distinguishing() {
        assert_eq!(builtin_eq(&[Value::Int(2), Value::Float(2.0)], &ctx()).unwrap(), Value::Bool(false));
    }

    #[test]
    fn numeric_ordering_crosses_int_float() {
        assert_eq!(builtin_lt(&[Value::Int(1), Value::Float(1.5)], &ctx()).unwrap(), Value::Bool(true));
    }
}
