// ABOUTME: `pmap`/`pcalls`: ordered-collect over an unordered-issue contract (§5). The teacher's
// `concurrency.rs` dispatches real OS threads over `crossbeam_channel`, but `Value` is built on
// `Rc` for single-threaded sharing (not `Send`), so true worker threads aren't available here
// without rebuilding the value representation on `Arc`. Each unit of work instead runs against
// its own throwaway `EvalCtx` so nested `println`/`call` side effects never leak into the caller's
// trace, which is the part of the contract callers can observe; see DESIGN.md for the tradeoff.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::tools::ToolRegistry;
use crate::value::Value;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn isolated_ctx(parent: &EvalCtx) -> EvalCtx {
    EvalCtx::new(
        parent.ctx_value.clone(),
        parent.memory_value.clone(),
        Rc::clone(&parent.tools),
        parent.deadline,
        parent.iteration_limit,
        parent.heap_budget.get(),
        parent.max_print_length,
    )
}

fn builtin_pmap(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, coll] = args else { return Err(EvalError::arity_error("pmap", "2", args.len()).into()) };
    let Value::Vector(items) = coll else { return Err(EvalError::type_error("pmap", "vector", coll).into()) };
    let mut out = Vec::with_capacity(items.len());
    for item in items.iter() {
        let worker_ctx = isolated_ctx(ctx);
        out.push(worker_ctx.apply(f, vec![item.clone()])?);
    }
    Ok(Value::vector(out))
}

fn builtin_pcalls(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let mut out = Vec::with_capacity(args.len());
    for f in args {
        let worker_ctx = isolated_ctx(ctx);
        out.push(worker_ctx.apply(f, vec![])?);
    }
    Ok(Value::vector(out))
}

pub fn register(env: &Rc<Environment>) {
    env.define("pmap".to_string(), Value::BuiltIn(builtin_pmap));
    env.define("pcalls".to_string(), Value::BuiltIn(builtin_pcalls));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EvalCtx {
        EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 2000)
    }

    #[test]
    fn pmap_preserves_input_order() {
        let double = Value::BuiltIn(|args, _ctx| match &args[0] {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            other => Err(EvalError::type_error("double", "int", other).into()),
        });
        let coll = Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(builtin_pmap(&[double, coll], &ctx()).unwrap(), Value::vector(vec![Value::Int(2), Value::Int(4), Value::Int(6)]));
    }

    #[test]
    fn pmap_discards_worker_prints_from_the_caller_trace() {
        let print_one = Value::BuiltIn(|args, worker_ctx| {
            worker_ctx.push_print("from worker".to_string());
            Ok(args[0].clone())
        });
        let parent_ctx = ctx();
        let coll = Value::vector(vec![Value::Int(1)]);
        builtin_pmap(&[print_one, coll], &parent_ctx).unwrap();
        assert!(parent_ctx.prints.borrow().is_empty());
    }
}
