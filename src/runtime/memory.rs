// ABOUTME: `memory/get` and `memory/put`, the one door the program has into the turn's memory
// snapshot besides reading `memory/x` directly (§4.3, §4.4). A write lands in `EvalCtx`'s overlay,
// not the snapshot itself, which stays the immutable value the turn started with.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

fn key_name(fname: &str, v: &Value) -> EvalResult<String> {
    match v {
        Value::Keyword(k) | Value::String(k) => Ok(k.to_string()),
        other => Err(EvalError::type_error(fname, "keyword or string", other).into()),
    }
}

fn builtin_memory_get(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    match args {
        [k] => Ok(ctx.memory_get(&key_name("memory/get", k)?)),
        [k, default] => {
            let v = ctx.memory_get(&key_name("memory/get", k)?);
            Ok(if matches!(v, Value::Nil) { default.clone() } else { v })
        }
        _ => Err(EvalError::arity_error("memory/get", "1 or 2", args.len()).into()),
    }
}

fn builtin_memory_put(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [k, v] = args else { return Err(EvalError::arity_error("memory/put", "2", args.len()).into()) };
    let key = key_name("memory/put", k)?;
    ctx.memory_put(&key, v.clone());
    Ok(v.clone())
}

pub fn register(env: &Rc<Environment>) {
    env.define("memory/get".to_string(), Value::BuiltIn(builtin_memory_get));
    env.define("memory/put".to_string(), Value::BuiltIn(builtin_memory_put));
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
    fn put_then_get_round_trips() {
        let ctx = ctx();
        builtin_memory_put(&[Value::keyword("count"), Value::Int(1)], &ctx).unwrap();
        assert_eq!(builtin_memory_get(&[Value::keyword("count")], &ctx).unwrap(), Value::Int(1));
    }

    #[test]
    fn put_overlay_is_folded_into_the_snapshot() {
        let ctx = ctx();
        builtin_memory_put(&[Value::keyword("a"), Value::Int(1)], &ctx).unwrap();
        let Value::Map(m) = ctx.memory_snapshot() else { panic!("expected map") };
        assert_eq!(m.get(&crate::value::MapKey::Keyword("a".into())), Some(&Value::Int(1)));
    }

    #[test]
    fn get_falls_back_to_default_when_missing() {
        assert_eq!(builtin_memory_get(&[Value::keyword("missing"), Value::Int(7)], &ctx()).unwrap(), Value::Int(7));
    }
}
