// ABOUTME: Walks Core AST and produces values. Tail calls to user closures trampoline through
// `apply_closure`'s loop instead of recursing, the same way this interpreter's ancestor avoided
// growing the native stack on `loop`/`recur`-shaped user code, just lifted onto an explicit Core
// AST instead of re-matching raw S-expressions on every step.

use crate::env::Environment;
use crate::error::{ErrorKind, EvalError, EvalResult, Signal};
use crate::tools::ToolRegistry;
use crate::value::{Closure, CoreExpr, MapKey, PredData, Pattern, Value, WhereOp};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Instant;

/// One recorded `(call "name" {...})` for this evaluation's trace (§4.6, §7).
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: Result<Value, String>,
}

/// Threads the per-evaluation state builtins need: the print bag, the tool-call bag, the
/// cooperative deadline/iteration/heap budgets, and the turn's `ctx`/`memory` maps. Replaces the
/// inherited thread-local sandbox statics with an explicit value passed to every builtin.
pub struct EvalCtx {
    pub ctx_value: Value,
    pub memory_value: Value,
    pub tools: Rc<ToolRegistry>,
    pub deadline: Instant,
    pub iteration_limit: usize,
    pub iterations: Cell<usize>,
    pub heap_budget: Cell<usize>,
    pub max_print_length: usize,
    pub prints: RefCell<Vec<String>>,
    pub tool_calls: RefCell<Vec<ToolCallRecord>>,
    /// Writes from `(memory/put k v)` within this evaluation. `memory_value` itself stays the
    /// immutable snapshot the turn started with; `memory/get` and the final merge both check this
    /// overlay first. Kept separate rather than making `memory_value` a `RefCell` so every other
    /// reader of `ctx.memory_value` keeps seeing a plain `Value`.
    pub memory_overlay: RefCell<BTreeMap<MapKey, Value>>,
    /// The journal snapshot `task` memoizes against, carried turn to turn by the Loop the same
    /// way `memory_value` is (journal entries outlive a single evaluation).
    pub journal_value: Value,
    /// `None` marks a key `task-reset` cleared this evaluation; `Some` marks a `task` write.
    pub journal_overlay: RefCell<BTreeMap<MapKey, Option<Value>>>,
}

impl EvalCtx {
    pub fn new(
        ctx_value: Value,
        memory_value: Value,
        tools: Rc<ToolRegistry>,
        deadline: Instant,
        iteration_limit: usize,
        max_heap: usize,
        max_print_length: usize,
    ) -> Self {
        EvalCtx {
            ctx_value,
            memory_value,
            tools,
            deadline,
            iteration_limit,
            iterations: Cell::new(0),
            heap_budget: Cell::new(max_heap),
            max_print_length,
            prints: RefCell::new(Vec::new()),
            tool_calls: RefCell::new(Vec::new()),
            memory_overlay: RefCell::new(BTreeMap::new()),
            journal_value: Value::Nil,
            journal_overlay: RefCell::new(BTreeMap::new()),
        }
    }

    /// Seeds the journal snapshot `task` memoizes against. Separate from `new()`'s parameter list
    /// since only `sandbox::run`, threading the Loop's carried-forward journal in, needs it —
    /// every other caller is happy with the default empty journal.
    pub fn with_journal(mut self, journal: Value) -> Self {
        self.journal_value = journal;
        self
    }

    pub fn journal_get(&self, key: &str) -> Value {
        if let Some(entry) = self.journal_overlay.borrow().get(&MapKey::Keyword(key.into())) {
            return entry.clone().unwrap_or(Value::Nil);
        }
        get_field(&self.journal_value, key)
    }

    /// `None` signals the key was never touched this evaluation; distinguishes "not cached" from
    /// "explicitly reset" so `task-reset` can mask a stale entry still in `journal_value`.
    fn journal_overlay_has(&self, key: &str) -> Option<Option<Value>> {
        self.journal_overlay.borrow().get(&MapKey::Keyword(key.into())).cloned()
    }

    pub fn journal_has(&self, key: &str) -> bool {
        match self.journal_overlay_has(key) {
            Some(Some(_)) => true,
            Some(None) => false,
            None => !matches!(get_field(&self.journal_value, key), Value::Nil),
        }
    }

    pub fn journal_put(&self, key: &str, value: Value) {
        self.journal_overlay.borrow_mut().insert(MapKey::Keyword(key.into()), Some(value));
    }

    pub fn journal_reset(&self, key: &str) {
        self.journal_overlay.borrow_mut().insert(MapKey::Keyword(key.into()), None);
    }

    /// The journal snapshot to carry into the next turn: `journal_value` with this evaluation's
    /// `task` writes folded in and `task-reset` keys removed.
    pub fn journal_snapshot(&self) -> Value {
        let mut m = match &self.journal_value {
            Value::Map(m) => m.as_ref().clone(),
            _ => BTreeMap::new(),
        };
        for (k, v) in self.journal_overlay.borrow().iter() {
            match v {
                Some(v) => {
                    m.insert(k.clone(), v.clone());
                }
                None => {
                    m.remove(k);
                }
            }
        }
        Value::map(m)
    }

    /// Looks up a memory key, preferring anything written this evaluation via `memory/put`.
    pub fn memory_get(&self, key: &str) -> Value {
        if let Some(v) = self.memory_overlay.borrow().get(&MapKey::Keyword(key.into())) {
            return v.clone();
        }
        get_field(&self.memory_value, key)
    }

    pub fn memory_put(&self, key: &str, value: Value) {
        self.memory_overlay.borrow_mut().insert(MapKey::Keyword(key.into()), value);
    }

    /// The `memory_value` snapshot with this evaluation's `memory/put` writes folded in, for the
    /// Loop to carry into the next turn alongside the memory-merge contract's own writes.
    pub fn memory_snapshot(&self) -> Value {
        let mut m = match &self.memory_value {
            Value::Map(m) => m.as_ref().clone(),
            _ => BTreeMap::new(),
        };
        for (k, v) in self.memory_overlay.borrow().iter() {
            m.insert(k.clone(), v.clone());
        }
        Value::map(m)
    }

    pub fn check_deadline(&self) -> EvalResult<()> {
        if Instant::now() >= self.deadline {
            return Err(Signal::Error(EvalError::new(ErrorKind::Timeout, "evaluation exceeded its timeout")));
        }
        Ok(())
    }

    pub fn tick_iteration(&self) -> EvalResult<()> {
        self.check_deadline()?;
        let n = self.iterations.get() + 1;
        if n > self.iteration_limit {
            return Err(Signal::Error(EvalError::iteration_limit(self.iteration_limit)));
        }
        self.iterations.set(n);
        Ok(())
    }

    pub fn charge_heap(&self, bytes: usize) -> EvalResult<()> {
        let remaining = self.heap_budget.get();
        if bytes > remaining {
            return Err(Signal::Error(EvalError::new(ErrorKind::MemoryExceeded, "evaluation exceeded its heap budget")));
        }
        self.heap_budget.set(remaining - bytes);
        Ok(())
    }

    pub fn push_print(&self, mut s: String) {
        if s.len() > self.max_print_length {
            s.truncate(self.max_print_length);
            s.push_str("...(truncated)");
        }
        self.prints.borrow_mut().push(s);
    }

    pub fn call_tool(&self, name: &str, args: Value) -> EvalResult<Value> {
        let result = self.tools.call(name, &args);
        let recorded = match &result {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(e.message.clone()),
        };
        self.tool_calls.borrow_mut().push(ToolCallRecord { name: name.to_string(), args, result: recorded });
        result.map_err(Signal::Error)
    }

    /// Calls any callable `Value` (closure, builtin, keyword-as-accessor, or predicate) with
    /// already-evaluated arguments. The entry point `runtime/*` builtins use for higher-order ops.
    pub fn apply(&self, f: &Value, args: Vec<Value>) -> EvalResult<Value> {
        call_value(f, args, self)
    }
}

enum TailOutcome {
    Value(Value),
    TailCall(Rc<Closure>, Vec<Value>),
}

pub fn eval(expr: &CoreExpr, env: &Rc<Environment>, ctx: &EvalCtx) -> EvalResult<Value> {
    match eval_tail(expr, env, ctx)? {
        TailOutcome::Value(v) => Ok(v),
        TailOutcome::TailCall(c, args) => apply_closure(&c, args, ctx),
    }
}

fn apply_closure(c0: &Rc<Closure>, args0: Vec<Value>, ctx: &EvalCtx) -> EvalResult<Value> {
    let mut closure = Rc::clone(c0);
    let mut args = args0;
    loop {
        ctx.tick_iteration()?;
        let call_env = Environment::with_parent(&closure.env);
        bind_params(&closure.params, &closure.rest, args, &call_env, closure.name.as_deref())?;
        match eval_tail(&closure.body, &call_env, ctx)? {
            TailOutcome::Value(v) => return Ok(v),
            TailOutcome::TailCall(next, next_args) => {
                closure = next;
                args = next_args;
            }
        }
    }
}

fn eval_tail(expr: &CoreExpr, env: &Rc<Environment>, ctx: &EvalCtx) -> EvalResult<TailOutcome> {
    ctx.check_deadline()?;
    match expr {
        CoreExpr::If(c, t, e) => {
            let cond = eval(c, env, ctx)?;
            eval_tail(if cond.truthy() { t } else { e }, env, ctx)
        }
        CoreExpr::Do(exprs) => match exprs.split_last() {
            None => Ok(TailOutcome::Value(Value::Nil)),
            Some((last, init)) => {
                for e in init {
                    eval(e, env, ctx)?;
                }
                eval_tail(last, env, ctx)
            }
        },
        CoreExpr::Let(bindings, body) => {
            let let_env = Environment::with_parent(env);
            for (pat, vexpr) in bindings {
                let v = eval(vexpr, &let_env, ctx)?;
                bind_pattern(pat, v, &let_env)?;
            }
            match body.split_last() {
                None => Ok(TailOutcome::Value(Value::Nil)),
                Some((last, init)) => {
                    for e in init {
                        eval(e, &let_env, ctx)?;
                    }
                    eval_tail(last, &let_env, ctx)
                }
            }
        }
        CoreExpr::Call(f, argexprs) => {
            let fval = eval(f, env, ctx)?;
            let argv = argexprs.iter().map(|e| eval(e, env, ctx)).collect::<EvalResult<Vec<_>>>()?;
            match fval {
                Value::Closure(c) => Ok(TailOutcome::TailCall(c, argv)),
                other => Ok(TailOutcome::Value(call_value(&other, argv, ctx)?)),
            }
        }
        _ => Ok(TailOutcome::Value(eval_simple(expr, env, ctx)?)),
    }
}

fn eval_simple(expr: &CoreExpr, env: &Rc<Environment>, ctx: &EvalCtx) -> EvalResult<Value> {
    match expr {
        CoreExpr::Literal(v) => Ok(v.clone()),
        CoreExpr::Quote(v) => Ok(v.clone()),
        CoreExpr::Var(name) => env.get(name).ok_or_else(|| Signal::Error(EvalError::unbound_var(name))),
        CoreExpr::Ctx(name) => Ok(get_field(&ctx.ctx_value, name)),
        CoreExpr::Memory(name) => Ok(ctx.memory_get(name)),
        CoreExpr::Vector(items) => {
            let items = items.iter().map(|e| eval(e, env, ctx)).collect::<EvalResult<Vec<_>>>()?;
            ctx.charge_heap(items.len() * std::mem::size_of::<Value>())?;
            Ok(Value::vector(items))
        }
        CoreExpr::Set(items) => {
            let items = items.iter().map(|e| eval(e, env, ctx)).collect::<EvalResult<Vec<_>>>()?;
            ctx.charge_heap(items.len() * std::mem::size_of::<Value>())?;
            Ok(Value::Set(Rc::new(items.into_iter().collect::<BTreeSet<_>>())))
        }
        CoreExpr::Map(pairs) => {
            let mut m = BTreeMap::new();
            for (k, v) in pairs {
                let kv = eval(k, env, ctx)?;
                let key = kv.as_map_key().ok_or_else(|| Signal::Error(EvalError::type_error("map literal", "a hashable key", &kv)))?;
                m.insert(key, eval(v, env, ctx)?);
            }
            ctx.charge_heap(m.len() * std::mem::size_of::<Value>())?;
            Ok(Value::map(m))
        }
        CoreExpr::Fn { params, rest, body, name } => Ok(Value::Closure(Rc::new(Closure {
            params: params.clone(),
            rest: rest.clone(),
            body: Rc::new(CoreExpr::Do(body.clone())),
            env: Rc::clone(env),
            name: name.clone(),
        }))),
        CoreExpr::And(args) => {
            let mut last = Value::Bool(true);
            for a in args {
                last = eval(a, env, ctx)?;
                if !last.truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        CoreExpr::Or(args) => {
            let mut last = Value::Bool(false);
            for a in args {
                last = eval(a, env, ctx)?;
                if last.truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        CoreExpr::Where(path, op, vexpr) => {
            let value = eval(vexpr, env, ctx)?;
            Ok(Value::Predicate(Rc::new(PredData::Where(path.clone(), *op, value))))
        }
        CoreExpr::PredCombinator(kind, args) => {
            let preds = args.iter().map(|e| eval(e, env, ctx)).collect::<EvalResult<Vec<_>>>()?;
            Ok(Value::Predicate(Rc::new(PredData::Combinator(*kind, preds))))
        }
        CoreExpr::CallTool(name, argexpr) => {
            let args = eval(argexpr, env, ctx)?;
            if !matches!(args, Value::Map(_)) {
                return Err(Signal::Error(EvalError::type_error(name, "map", &args)));
            }
            ctx.call_tool(name, args)
        }
        CoreExpr::Def(name, vexpr) => {
            let v = eval(vexpr, env, ctx)?;
            env.define_global(name.clone(), v.clone());
            Ok(v)
        }
        CoreExpr::If(..) | CoreExpr::Do(..) | CoreExpr::Let(..) | CoreExpr::Call(..) => unreachable!("handled by eval_tail"),
    }
}

/// Reads a field off `ctx`/`memory` maps: keyword key first, string key fallback, `nil` if absent.
fn get_field(map: &Value, name: &str) -> Value {
    let Value::Map(m) = map else { return Value::Nil };
    m.get(&MapKey::Keyword(name.into())).or_else(|| m.get(&MapKey::String(name.into()))).cloned().unwrap_or(Value::Nil)
}

fn bind_pattern(pat: &Pattern, value: Value, env: &Rc<Environment>) -> EvalResult<()> {
    match pat {
        Pattern::Symbol(name) => {
            env.define(name.clone(), value);
            Ok(())
        }
        Pattern::Vector { items, rest } => {
            let elems: Vec<Value> = match &value {
                Value::Vector(v) => v.as_ref().clone(),
                Value::Nil => Vec::new(),
                other => return Err(Signal::Error(EvalError::type_error("destructuring", "vector", other))),
            };
            for (i, item_pat) in items.iter().enumerate() {
                bind_pattern(item_pat, elems.get(i).cloned().unwrap_or(Value::Nil), env)?;
            }
            if let Some(rest_name) = rest {
                let tail = elems.into_iter().skip(items.len()).collect();
                env.define(rest_name.clone(), Value::vector(tail));
            }
            Ok(())
        }
        Pattern::Map { keys, as_name } => {
            for (binding_name, source_key, default) in keys {
                let field = get_field(&value, source_key);
                let bound = if matches!(field, Value::Nil) { default.clone().unwrap_or(Value::Nil) } else { field };
                env.define(binding_name.clone(), bound);
            }
            if let Some(as_name) = as_name {
                env.define(as_name.clone(), value);
            }
            Ok(())
        }
    }
}

fn bind_params(params: &[Pattern], rest: &Option<String>, args: Vec<Value>, env: &Rc<Environment>, fn_name: Option<&str>) -> EvalResult<()> {
    if rest.is_none() && args.len() != params.len() {
        return Err(Signal::Error(EvalError::arity_error(fn_name.unwrap_or("<fn>"), params.len().to_string(), args.len())));
    }
    if rest.is_some() && args.len() < params.len() {
        return Err(Signal::Error(EvalError::arity_error(fn_name.unwrap_or("<fn>"), format!("at least {}", params.len()), args.len())));
    }
    let mut iter = args.into_iter();
    for p in params {
        bind_pattern(p, iter.next().unwrap(), env)?;
    }
    if let Some(rest_name) = rest {
        env.define(rest_name.clone(), Value::vector(iter.collect()));
    }
    Ok(())
}

/// Applies any callable value to already-evaluated arguments: closures, native builtins,
/// keywords/maps used as accessor functions (§3), and predicate values from `where`/`all-of`.
pub fn call_value(f: &Value, args: Vec<Value>, ctx: &EvalCtx) -> EvalResult<Value> {
    match f {
        Value::Closure(c) => apply_closure(c, args, ctx),
        Value::BuiltIn(func) => func(&args, ctx),
        Value::Keyword(k) => {
            let (subject, default) = match args.as_slice() {
                [m] => (m, Value::Nil),
                [m, d] => (m, d.clone()),
                _ => return Err(Signal::Error(EvalError::arity_error(&format!(":{k}"), "1 or 2", args.len()))),
            };
            let found = get_field(subject, k);
            Ok(if matches!(found, Value::Nil) { default } else { found })
        }
        Value::Predicate(p) => {
            let [subject] = args.as_slice() else {
                return Err(Signal::Error(EvalError::arity_error("predicate", "1", args.len())));
            };
            apply_predicate(p, subject)
        }
        other => Err(Signal::Error(EvalError::not_callable(other))),
    }
}

fn apply_predicate(p: &PredData, subject: &Value) -> EvalResult<Value> {
    match p {
        PredData::Where(path, op, expected) => {
            let mut current = subject.clone();
            for key in path {
                current = get_field(&current, key);
            }
            Ok(Value::Bool(where_matches(*op, &current, expected)))
        }
        PredData::Combinator(kind, preds) => {
            let scratch = scratch_ctx();
            let mut results = Vec::with_capacity(preds.len());
            for pred in preds {
                results.push(call_value(pred, vec![subject.clone()], &scratch)?.truthy());
            }
            Ok(Value::Bool(match kind {
                crate::value::PredKind::AllOf => results.into_iter().all(|b| b),
                crate::value::PredKind::AnyOf => results.into_iter().any(|b| b),
                crate::value::PredKind::NoneOf => results.into_iter().all(|b| !b),
            }))
        }
    }
}

/// A scratch context for the closures nested inside a predicate combinator. These never touch
/// tools, ctx, or memory, so a generous throwaway budget is fine.
fn scratch_ctx() -> EvalCtx {
    EvalCtx::new(
        Value::Nil,
        Value::Nil,
        Rc::new(ToolRegistry::new()),
        Instant::now() + std::time::Duration::from_secs(3600),
        1_000_000,
        usize::MAX,
        usize::MAX,
    )
}

fn where_matches(op: WhereOp, actual: &Value, expected: &Value) -> bool {
    match op {
        WhereOp::Truthy => actual.truthy(),
        WhereOp::Eq => actual == expected,
        WhereOp::NotEq => actual != expected,
        WhereOp::Gt => numeric_cmp(actual, expected).map(|o| o.is_gt()).unwrap_or(false),
        WhereOp::Lt => numeric_cmp(actual, expected).map(|o| o.is_lt()).unwrap_or(false),
        WhereOp::Gte => numeric_cmp(actual, expected).map(|o| o.is_ge()).unwrap_or(false),
        WhereOp::Lte => numeric_cmp(actual, expected).map(|o| o.is_le()).unwrap_or(false),
        WhereOp::Includes => match actual {
            Value::Vector(v) => v.contains(expected),
            Value::Set(s) => s.contains(expected),
            Value::String(s) => match expected {
                Value::String(needle) => s.contains(needle.as_ref()),
                _ => false,
            },
            _ => false,
        },
        WhereOp::In => match expected {
            Value::Vector(v) => v.contains(actual),
            Value::Set(s) => s.contains(actual),
            _ => false,
        },
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let af = as_f64(a)?;
    let bf = as_f64(b)?;
    af.partial_cmp(&bf)
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::parser::parse;

    fn run(src: &str) -> Value {
        let raw = parse(src).unwrap();
        let core = analyze(&raw).unwrap();
        let root = Environment::new_builtin_root();
        crate::runtime::register_all(&root);
        let user_env = Environment::with_parent(&root);
        let ctx = EvalCtx::new(
            Value::Nil,
            Value::Nil,
            Rc::new(ToolRegistry::new()),
            Instant::now() + std::time::Duration::from_secs(5),
            1000,
            10 * 1024 * 1024,
            2000,
        );
        eval(&core, &user_env, &ctx).unwrap()
    }

    #[test]
    fn if_picks_the_right_branch() {
        assert_eq!(run("(if true 1 2)"), Value::Int(1));
        assert_eq!(run("(if false 1 2)"), Value::Int(2));
    }

    #[test]
    fn and_or_short_circuit() {
        assert_eq!(run("(and 1 false 2)"), Value::Bool(false));
        assert_eq!(run("(or false nil 3)"), Value::Int(3));
    }

    #[test]
    fn let_destructures_vector_with_rest() {
        assert_eq!(run("(let [[a & rest] [1 2 3]] rest)"), Value::vector(vec![Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn fn_call_and_recursion_via_def() {
        let src = "(do (def count-down (fn [n] (if (<= n 0) :done (count-down (- n 1))))) (count-down 5))";
        assert_eq!(run(src), Value::keyword("done"));
    }

    #[test]
    fn keyword_as_function_reads_map_field() {
        assert_eq!(run("(:a {:a 1})"), Value::Int(1));
        assert_eq!(run("(:missing {:a 1} :default)"), Value::keyword("default"));
    }

    #[test]
    fn where_truthy_predicate() {
        assert_eq!(run("((where :active) {:active true})"), Value::Bool(true));
    }

    #[test]
    fn where_with_operator() {
        assert_eq!(run("((where :age > 18) {:age 21})"), Value::Bool(true));
        assert_eq!(run("((where :age > 18) {:age 10})"), Value::Bool(false));
    }
}
