// ABOUTME: `return` and `fail` unwind straight to the Loop as a `Signal` rather than producing an
// ordinary `Value` — the same early-exit idiom `eval::call_value` already uses for errors, just
// surfaced as callable builtins instead of evaluator-internal control flow.

use crate::env::Environment;
use crate::error::{EvalError, EvalResult, Signal};
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

fn builtin_return(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let value = match args {
        [] => Value::Nil,
        [v] => v.clone(),
        _ => return Err(EvalError::arity_error("return", "0 or 1", args.len()).into()),
    };
    Err(Signal::Return(value))
}

fn builtin_fail(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let (reason, message) = match args {
        [Value::Keyword(r)] => (r.to_string(), String::new()),
        [Value::Keyword(r), Value::String(m)] => (r.to_string(), m.to_string()),
        _ => return Err(EvalError::arity_error("fail", "(reason) or (reason message)", args.len()).into()),
    };
    Err(Signal::Fail { reason, message })
}

pub fn register(env: &Rc<Environment>) {
    env.define("return".to_string(), Value::BuiltIn(builtin_return));
    env.define("fail".to_string(), Value::BuiltIn(builtin_fail));
}
