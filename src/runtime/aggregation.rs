// ABOUTME: Summarizing operators over collections of maps: sum/avg plus the keyword-or-path
// variants (`sum-by`, `avg-by`, `min-by`, `max-by`, `pluck`) that drive agent reporting code
// without a separate `map` step first. Builds on the flex-get rule `maps.rs` already implements.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

fn as_items<'a>(fname: &str, v: &'a Value) -> EvalResult<&'a [Value]> {
    match v {
        Value::Vector(items) => Ok(items.as_ref()),
        other => Err(EvalError::type_error(fname, "vector", other).into()),
    }
}

fn as_f64(fname: &str, v: &Value) -> EvalResult<f64> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(EvalError::type_error(fname, "number", other).into()),
    }
}

fn builtin_sum(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("sum", "1", args.len()).into()) };
    let items = as_items("sum", v)?;
    let mut all_int = true;
    let mut total = 0.0;
    for item in items {
        if !matches!(item, Value::Int(_)) {
            all_int = false;
        }
        total += as_f64("sum", item)?;
    }
    Ok(if all_int { Value::Int(total as i64) } else { Value::Float(total) })
}

fn builtin_avg(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("avg", "1", args.len()).into()) };
    let items = as_items("avg", v)?;
    if items.is_empty() {
        return Err(EvalError::arithmetic("avg of an empty collection").into());
    }
    let mut total = 0.0;
    for item in items {
        total += as_f64("avg", item)?;
    }
    Ok(Value::Float(total / items.len() as f64))
}

/// Applies `keyfn` (a keyword, a path vector of keywords, or any callable) to every map in
/// `coll` and returns the resulting numbers.
fn pluck_values(fname: &str, keyfn: &Value, coll: &Value, ctx: &EvalCtx) -> EvalResult<Vec<Value>> {
    let items = as_items(fname, coll)?;
    items.iter().map(|item| ctx.apply(keyfn, vec![item.clone()])).collect()
}

fn builtin_sum_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [keyfn, coll] = args else { return Err(EvalError::arity_error("sum-by", "2", args.len()).into()) };
    builtin_sum(&[Value::vector(pluck_values("sum-by", keyfn, coll, ctx)?)], ctx)
}

fn builtin_avg_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [keyfn, coll] = args else { return Err(EvalError::arity_error("avg-by", "2", args.len()).into()) };
    builtin_avg(&[Value::vector(pluck_values("avg-by", keyfn, coll, ctx)?)], ctx)
}

fn extremum_by(fname: &'static str, args: &[Value], ctx: &EvalCtx, better: fn(f64, f64) -> bool) -> EvalResult<Value> {
    let [keyfn, coll] = args else { return Err(EvalError::arity_error(fname, "2", args.len()).into()) };
    let items = as_items(fname, coll)?;
    let mut best: Option<(Value, f64)> = None;
    for item in items {
        let key = as_f64(fname, &ctx.apply(keyfn, vec![item.clone()])?)?;
        match &best {
            Some((_, best_key)) if !better(key, *best_key) => {}
            _ => best = Some((item.clone(), key)),
        }
    }
    Ok(best.map(|(item, _)| item).unwrap_or(Value::Nil))
}

fn builtin_min_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    extremum_by("min-by", args, ctx, |a, b| a < b)
}

fn builtin_max_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    extremum_by("max-by", args, ctx, |a, b| a > b)
}

fn builtin_pluck(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [keyfn, coll] = args else { return Err(EvalError::arity_error("pluck", "2", args.len()).into()) };
    Ok(Value::vector(pluck_values("pluck", keyfn, coll, ctx)?))
}

pub fn register(env: &Rc<Environment>) {
    env.define("sum".to_string(), Value::BuiltIn(builtin_sum));
    env.define("avg".to_string(), Value::BuiltIn(builtin_avg));
    env.define("sum-by".to_string(), Value::BuiltIn(builtin_sum_by));
    env.define("avg-by".to_string(), Value::BuiltIn(builtin_avg_by));
    env.define("min-by".to_string(), Value::BuiltIn(builtin_min_by));
    env.define("max-by".to_string(), Value::BuiltIn(builtin_max_by));
    env.define("pluck".to_string(), Value::BuiltIn(builtin_pluck));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use crate::value::MapKey;
    use std::time::{Duration, Instant};

    fn ctx() -> EvalCtx {
        EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 2000)
    }

    fn orders() -> Value {
        Value::vector(vec![
            Value::map(std::collections::BTreeMap::from([(MapKey::Keyword("total".into()), Value::Int(10))])),
            Value::map(std::collections::BTreeMap::from([(MapKey::Keyword("total".into()), Value::Int(30))])),
        ])
    }

    #[test]
    fn sum_stays_int_for_all_int_input() {
        let v = Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(builtin_sum(&[v], &ctx()).unwrap(), Value::Int(6));
    }

    #[test]
    fn avg_of_empty_is_an_error() {
        assert!(builtin_avg(&[Value::vector(vec![])], &ctx()).is_err());
    }

    #[test]
    fn sum_by_applies_the_keyword_accessor_to_each_map() {
        let total = builtin_sum_by(&[Value::keyword("total"), orders()], &ctx()).unwrap();
        assert_eq!(total, Value::Int(40));
    }

    #[test]
    fn max_by_returns_the_winning_element_not_its_key() {
        let winner = builtin_max_by(&[Value::keyword("total"), orders()], &ctx()).unwrap();
        assert_eq!(winner, Value::map(std::collections::BTreeMap::from([(MapKey::Keyword("total".into()), Value::Int(30))])));
    }

    #[test]
    fn pluck_collects_one_field_from_every_map() {
        let totals = builtin_pluck(&[Value::keyword("total"), orders()], &ctx()).unwrap();
        assert_eq!(totals, Value::vector(vec![Value::Int(10), Value::Int(30)]));
    }
}
