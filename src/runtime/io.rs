// ABOUTME: `print`/`println`/`pr-str` append to the evaluation's print bag (`EvalCtx::prints`)
// instead of writing straight to stdout the way the teacher's `console.rs` did — the host
// decides what to do with a turn's captured output, the program never touches a stream directly.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::Value;
use std::rc::Rc;

fn builtin_print(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let text = args.iter().map(|v| v.to_string_display()).collect::<Vec<_>>().join(" ");
    ctx.push_print(text);
    Ok(Value::Nil)
}

fn builtin_println(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let mut text = args.iter().map(|v| v.to_string_display()).collect::<Vec<_>>().join(" ");
    text.push('\n');
    ctx.push_print(text);
    Ok(Value::Nil)
}

fn builtin_print_str(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::string(args.iter().map(|v| v.to_string_display()).collect::<Vec<_>>().join(" ")))
}

fn builtin_pr_str(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("pr-str", "1", args.len()).into()) };
    Ok(Value::string(v.to_string()))
}

pub fn register(env: &Rc<Environment>) {
    env.define("print".to_string(), Value::BuiltIn(builtin_print));
    env.define("println".to_string(), Value::BuiltIn(builtin_println));
    env.define("print-str".to_string(), Value::BuiltIn(builtin_print_str));
    env.define("pr-str".to_string(), Value::BuiltIn(builtin_pr_str));
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
    fn println_appends_to_the_print_bag_not_stdout() {
        let ctx = ctx();
        builtin_println(&[Value::string("hi")], &ctx).unwrap();
        assert_eq!(ctx.prints.borrow().as_slice(), &["hi\n".to_string()]);
    }

    #[test]
    fn print_bag_entries_are_truncated_past_max_length() {
        let ctx = EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 5);
        builtin_print(&[Value::string("0123456789")], &ctx).unwrap();
        assert!(ctx.prints.borrow()[0].starts_with("01234"));
    }
}
