// ABOUTME: `task`/`step-done`/`task-reset`, the journaling forms for splitting an agent's work
// into checkpointed steps memoized across turns (glossary: "Journal"). The analyzer wraps
// `task`'s body in a zero-argument closure (`analyzer::analyze_task`), so a cache hit here just
// means never calling that thunk at all; the cached value is carried in `EvalCtx::journal_value`,
// which `loop_::run_loop` threads from one turn's journal snapshot into the next turn's
// `RunOptions`, the same way it already threads `memory`.

use crate::env::Environment;
use crate::error::{EvalError, EvalResult};
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

fn task_id(fname: &str, v: &Value) -> EvalResult<String> {
    match v {
        Value::Keyword(k) | Value::String(k) => Ok(k.to_string()),
        other => Err(EvalError::type_error(fname, "keyword or string", other).into()),
    }
}

fn builtin_task(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [id, thunk] = args else { return Err(EvalError::arity_error("task", "2", args.len()).into()) };
    let id = task_id("task", id)?;
    if ctx.journal_has(&id) {
        return Ok(ctx.journal_get(&id));
    }
    let result = ctx.apply(thunk, vec![])?;
    ctx.journal_put(&id, result.clone());
    Ok(result)
}

fn builtin_step_done(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let value = match args {
        [] => Value::Nil,
        [v] => v.clone(),
        _ => return Err(EvalError::arity_error("step-done", "0 or 1", args.len()).into()),
    };
    Err(crate::error::Signal::Return(value))
}

fn builtin_task_reset(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [id] = args else { return Err(EvalError::arity_error("task-reset", "1", args.len()).into()) };
    ctx.journal_reset(&task_id("task-reset", id)?);
    Ok(Value::Nil)
}

pub fn register(env: &Rc<Environment>) {
    env.define("task".to_string(), Value::BuiltIn(builtin_task));
    env.define("step-done".to_string(), Value::BuiltIn(builtin_step_done));
    env.define("task-reset".to_string(), Value::BuiltIn(builtin_task_reset));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Signal;
    use crate::tools::ToolRegistry;
    use std::time::{Duration, Instant};

    fn ctx() -> EvalCtx {
        EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 2000)
    }

    #[test]
    fn task_runs_its_thunk_and_records_it_in_the_journal() {
        let thunk = Value::BuiltIn(|_args, _ctx| Ok(Value::Int(42)));
        let ctx = ctx();
        assert_eq!(builtin_task(&[Value::keyword("step-one"), thunk], &ctx).unwrap(), Value::Int(42));
        assert!(ctx.journal_has("step-one"));
    }

    #[test]
    fn task_is_skipped_on_a_second_call_with_the_same_id() {
        let ctx = ctx();
        ctx.journal_put("done-already", Value::Int(7));
        let thunk = Value::BuiltIn(|_args, _ctx| panic!("thunk should not run on a cache hit"));
        assert_eq!(builtin_task(&[Value::keyword("done-already"), thunk], &ctx).unwrap(), Value::Int(7));
    }

    #[test]
    fn task_reset_clears_a_seeded_journal_entry() {
        let seeded = Value::map(std::collections::BTreeMap::from([(
            crate::value::MapKey::Keyword("seen".into()),
            Value::Int(1),
        )]));
        let ctx = EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 2000)
            .with_journal(seeded);
        assert!(ctx.journal_has("seen"));
        builtin_task_reset(&[Value::keyword("seen")], &ctx).unwrap();
        assert!(!ctx.journal_has("seen"));
    }

    #[test]
    fn step_done_raises_return() {
        match builtin_step_done(&[Value::Int(1)], &ctx()) {
            Err(Signal::Return(Value::Int(1))) => {}
            other => panic!("expected Signal::Return(1), got {other:?}"),
        }
    }
}
