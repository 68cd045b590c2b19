// ABOUTME: Walks Raw AST and produces Core AST: classifies special forms, desugars `when`/`cond`/
// `->`/`->>`/`#(...)`, and validates arity/shape up front so the Evaluator never has to.
//
// This pass has no counterpart in the codebase this grew from, which recognizes special forms
// directly inside its evaluator; the set of recognized head symbols and their meaning is kept
// the same, just lifted into its own stage that emits an explicit intermediate tree.

use crate::error::{AnalyzeError, ErrorKind};
use crate::value::{CoreExpr, MapKey, Pattern, PredKind, RawExpr, Value, WhereOp};
use std::collections::BTreeMap;

type AResult<T> = Result<T, AnalyzeError>;

fn invalid_form(msg: impl Into<String>) -> AnalyzeError {
    AnalyzeError::new(ErrorKind::InvalidForm, msg)
}

fn invalid_arity(msg: impl Into<String>) -> AnalyzeError {
    AnalyzeError::new(ErrorKind::InvalidArity, msg)
}

pub fn analyze(raw: &RawExpr) -> AResult<CoreExpr> {
    match raw {
        RawExpr::Nil => Ok(CoreExpr::Literal(Value::Nil)),
        RawExpr::Bool(b) => Ok(CoreExpr::Literal(Value::Bool(*b))),
        RawExpr::Int(n) => Ok(CoreExpr::Literal(Value::Int(*n))),
        RawExpr::Float(f) => Ok(CoreExpr::Literal(Value::Float(*f))),
        RawExpr::StringLit(s) => Ok(CoreExpr::Literal(Value::string(s.as_str()))),
        RawExpr::KeywordLit(name) => {
            if name.contains('/') {
                return Err(AnalyzeError::new(ErrorKind::InvalidForm, format!("namespaced keywords are not supported: :{name}")));
            }
            Ok(CoreExpr::Literal(Value::keyword(name.as_str())))
        }
        RawExpr::Symbol(name) => Ok(CoreExpr::Var(name.clone())),
        RawExpr::NsSymbol(ns, name) => analyze_ns_symbol(ns, name),
        RawExpr::Vector(items) => Ok(CoreExpr::Vector(items.iter().map(analyze).collect::<AResult<_>>()?)),
        RawExpr::Set(items) => Ok(CoreExpr::Set(items.iter().map(analyze).collect::<AResult<_>>()?)),
        RawExpr::Map(pairs) => {
            let analyzed = pairs.iter().map(|(k, v)| Ok((analyze(k)?, analyze(v)?))).collect::<AResult<_>>()?;
            Ok(CoreExpr::Map(analyzed))
        }
        RawExpr::ShortFn(body) => analyze_short_fn(body),
        RawExpr::List(items) => analyze_list(items),
    }
}

fn analyze_ns_symbol(ns: &str, name: &str) -> AResult<CoreExpr> {
    match ns {
        "ctx" => Ok(CoreExpr::Ctx(name.to_string())),
        "memory" => Ok(CoreExpr::Memory(name.to_string())),
        "Double" => match name {
            "POSITIVE_INFINITY" => Ok(CoreExpr::Literal(Value::Float(f64::INFINITY))),
            "NEGATIVE_INFINITY" => Ok(CoreExpr::Literal(Value::Float(f64::NEG_INFINITY))),
            "NaN" => Ok(CoreExpr::Literal(Value::Float(f64::NAN))),
            _ => Ok(CoreExpr::Var(format!("{ns}/{name}"))),
        },
        _ => Ok(CoreExpr::Var(format!("{ns}/{name}"))),
    }
}

fn analyze_list(items: &[RawExpr]) -> AResult<CoreExpr> {
    if items.is_empty() {
        return Err(invalid_form("empty list is not callable"));
    }
    if let RawExpr::Symbol(head) = &items[0] {
        let args = &items[1..];
        match head.as_str() {
            "quote" => {
                if args.len() != 1 {
                    return Err(invalid_arity("quote: expected 1 argument"));
                }
                return Ok(CoreExpr::Quote(raw_to_quoted_value(&args[0])));
            }
            "let" => return analyze_let(args),
            "loop" => return analyze_loop(args),
            "recur" => {
                return Ok(CoreExpr::Call(
                    Box::new(CoreExpr::Var(LOOP_RECUR_BINDING.to_string())),
                    args.iter().map(analyze).collect::<AResult<_>>()?,
                ))
            }
            "if" => return analyze_if(args),
            "when" => return analyze_when(args),
            "cond" => return analyze_cond(args),
            "fn" => return analyze_fn(args, None),
            "do" => return Ok(CoreExpr::Do(args.iter().map(analyze).collect::<AResult<_>>()?)),
            "def" => return analyze_def(args),
            "and" => return Ok(CoreExpr::And(args.iter().map(analyze).collect::<AResult<_>>()?)),
            "or" => return Ok(CoreExpr::Or(args.iter().map(analyze).collect::<AResult<_>>()?)),
            "where" => return analyze_where(args),
            "all-of" => return analyze_pred_combinator(PredKind::AllOf, args),
            "any-of" => return analyze_pred_combinator(PredKind::AnyOf, args),
            "none-of" => return analyze_pred_combinator(PredKind::NoneOf, args),
            "call" => return analyze_call_tool(args),
            "->" => return analyze_thread(args, false),
            "->>" => return analyze_thread(args, true),
            "task" => return analyze_task(args),
            "step-done" | "task-reset" => {
                return Ok(CoreExpr::Call(
                    Box::new(CoreExpr::Var(head.clone())),
                    args.iter().map(analyze).collect::<AResult<_>>()?,
                ))
            }
            "=" | "not=" | "<" | ">" | "<=" | ">=" => {
                if args.len() != 2 {
                    return Err(invalid_arity(format!("{head}: expected exactly 2 arguments, got {}", args.len())));
                }
                return Ok(CoreExpr::Call(
                    Box::new(CoreExpr::Var(head.clone())),
                    vec![analyze(&args[0])?, analyze(&args[1])?],
                ));
            }
            _ => {}
        }
    }
    let fn_expr = analyze(&items[0])?;
    let args = items[1..].iter().map(analyze).collect::<AResult<_>>()?;
    Ok(CoreExpr::Call(Box::new(fn_expr), args))
}

/// `quote` stores the raw, unevaluated form as a `Value` (only literals/collections survive
/// quoting meaningfully here; quoted symbols become keywords-as-data via their name).
fn raw_to_quoted_value(raw: &RawExpr) -> Value {
    match raw {
        RawExpr::Nil => Value::Nil,
        RawExpr::Bool(b) => Value::Bool(*b),
        RawExpr::Int(n) => Value::Int(*n),
        RawExpr::Float(f) => Value::Float(*f),
        RawExpr::StringLit(s) => Value::string(s.as_str()),
        RawExpr::KeywordLit(k) => Value::keyword(k.as_str()),
        RawExpr::Symbol(s) => Value::keyword(s.as_str()),
        RawExpr::NsSymbol(ns, name) => Value::keyword(format!("{ns}/{name}")),
        RawExpr::List(items) => Value::vector(items.iter().map(raw_to_quoted_value).collect()),
        RawExpr::Vector(items) => Value::vector(items.iter().map(raw_to_quoted_value).collect()),
        RawExpr::Set(items) => Value::Set(std::rc::Rc::new(items.iter().map(raw_to_quoted_value).collect())),
        RawExpr::Map(pairs) => {
            let mut m = BTreeMap::new();
            for (k, v) in pairs {
                if let Some(key) = raw_to_quoted_value(k).as_map_key() {
                    m.insert(key, raw_to_quoted_value(v));
                }
            }
            Value::map(m)
        }
        RawExpr::ShortFn(body) => raw_to_quoted_value(body),
    }
}

fn keyword_name(raw: &RawExpr) -> Option<String> {
    match raw {
        RawExpr::KeywordLit(k) => Some(k.clone()),
        _ => None,
    }
}

fn analyze_pattern(raw: &RawExpr) -> AResult<Pattern> {
    match raw {
        RawExpr::Symbol(s) => Ok(Pattern::Symbol(s.clone())),
        RawExpr::Vector(items) => {
            let mut out = Vec::new();
            let mut rest = None;
            let mut i = 0;
            while i < items.len() {
                if let RawExpr::Symbol(s) = &items[i] {
                    if s == "&" {
                        let RawExpr::Symbol(name) = items.get(i + 1).ok_or_else(|| invalid_form("`&` must be followed by a binding"))? else {
                            return Err(invalid_form("`&` rest binding must be a symbol"));
                        };
                        rest = Some(name.clone());
                        i += 2;
                        continue;
                    }
                }
                out.push(analyze_pattern(&items[i])?);
                i += 1;
            }
            Ok(Pattern::Vector { items: out, rest })
        }
        RawExpr::Map(pairs) => {
            let mut keys = Vec::new();
            let mut as_name = None;
            let mut defaults: BTreeMap<String, Value> = BTreeMap::new();
            for (k, v) in pairs {
                match keyword_name(k).as_deref() {
                    Some("keys") => {
                        let RawExpr::Vector(names) = v else { return Err(invalid_form(":keys expects a vector")) };
                        for n in names {
                            let RawExpr::Symbol(s) = n else { return Err(invalid_form(":keys entries must be symbols")) };
                            keys.push((s.clone(), s.clone(), None));
                        }
                    }
                    Some("or") => {
                        let RawExpr::Map(pairs) = v else { return Err(invalid_form(":or expects a map")) };
                        for (dk, dv) in pairs {
                            if let RawExpr::Symbol(s) = dk {
                                defaults.insert(s.clone(), raw_to_quoted_value(dv));
                            }
                        }
                    }
                    Some("as") => {
                        let RawExpr::Symbol(s) = v else { return Err(invalid_form(":as expects a symbol")) };
                        as_name = Some(s.clone());
                    }
                    _ => return Err(invalid_form("unsupported map destructuring key")),
                }
            }
            for (name, _, default) in keys.iter_mut() {
                *default = defaults.get(name).cloned();
            }
            Ok(Pattern::Map { keys, as_name })
        }
        _ => Err(AnalyzeError::new(ErrorKind::UnsupportedPattern, "unsupported binding pattern")),
    }
}

/// The lexically-scoped name a `(loop ...)`'s generated self-recursive closure is bound to, and
/// that `(recur ...)` calls resolve through. A fixed name is safe across nested loops because
/// `Let` introduces a fresh frame per loop; the inner loop's binding just shadows the outer one
/// the same way any other nested `let` would.
const LOOP_RECUR_BINDING: &str = "##loop-recur";

/// `(loop [a 1 b 2] body...)` desugars to calling a freshly named self-recursive closure with the
/// initial values; `recur` inside `body` is rewritten (above) into a tail call back to that same
/// closure, trampolining through the evaluator's existing closure-call TCO (§4.5's 1000-iteration
/// cap applies here exactly as it does to any other self-recursive closure).
fn analyze_loop(args: &[RawExpr]) -> AResult<CoreExpr> {
    let [bindings_raw, body @ ..] = args else {
        return Err(invalid_arity("loop: expected a bindings vector and at least one body form"));
    };
    let RawExpr::Vector(flat) = bindings_raw else {
        return Err(invalid_form("loop: bindings must be a vector"));
    };
    if flat.len() % 2 != 0 {
        return Err(invalid_form("loop: bindings vector must have an even number of forms"));
    }
    if body.is_empty() {
        return Err(invalid_arity("loop: expected at least one body form"));
    }
    let mut params = Vec::new();
    let mut inits = Vec::new();
    for pair in flat.chunks(2) {
        params.push(analyze_pattern(&pair[0])?);
        inits.push(analyze(&pair[1])?);
    }
    let body = body.iter().map(analyze).collect::<AResult<_>>()?;
    let loop_fn = CoreExpr::Fn { params, rest: None, body, name: Some(LOOP_RECUR_BINDING.to_string()) };
    Ok(CoreExpr::Let(
        vec![(Pattern::Symbol(LOOP_RECUR_BINDING.to_string()), loop_fn)],
        vec![CoreExpr::Call(Box::new(CoreExpr::Var(LOOP_RECUR_BINDING.to_string())), inits)],
    ))
}

fn analyze_let(args: &[RawExpr]) -> AResult<CoreExpr> {
    let [bindings_raw, body @ ..] = args else {
        return Err(invalid_arity("let: expected a bindings vector and at least one body form"));
    };
    let RawExpr::Vector(flat) = bindings_raw else {
        return Err(invalid_form("let: bindings must be a vector"));
    };
    if flat.len() % 2 != 0 {
        return Err(invalid_form("let: bindings vector must have an even number of forms"));
    }
    if body.is_empty() {
        return Err(invalid_arity("let: expected at least one body form"));
    }
    let mut bindings = Vec::new();
    for pair in flat.chunks(2) {
        bindings.push((analyze_pattern(&pair[0])?, analyze(&pair[1])?));
    }
    let body = body.iter().map(analyze).collect::<AResult<_>>()?;
    Ok(CoreExpr::Let(bindings, body))
}

fn analyze_if(args: &[RawExpr]) -> AResult<CoreExpr> {
    if args.len() != 3 {
        return Err(invalid_arity(format!("if: expected 3 arguments (condition, then, else), got {}", args.len())));
    }
    Ok(CoreExpr::If(Box::new(analyze(&args[0])?), Box::new(analyze(&args[1])?), Box::new(analyze(&args[2])?)))
}

fn analyze_when(args: &[RawExpr]) -> AResult<CoreExpr> {
    let [cond, body @ ..] = args else {
        return Err(invalid_arity("when: expected a condition and at least one body form"));
    };
    let then = if body.len() == 1 { analyze(&body[0])? } else { CoreExpr::Do(body.iter().map(analyze).collect::<AResult<_>>()?) };
    Ok(CoreExpr::If(Box::new(analyze(cond)?), Box::new(then), Box::new(CoreExpr::Literal(Value::Nil))))
}

fn analyze_cond(args: &[RawExpr]) -> AResult<CoreExpr> {
    let mut clauses: Vec<(RawExpr, RawExpr)> = Vec::new();
    let mut default = CoreExpr::Literal(Value::Nil);
    let mut i = 0;
    while i < args.len() {
        if let RawExpr::KeywordLit(k) = &args[i] {
            if k == "else" {
                let Some(d) = args.get(i + 1) else { return Err(AnalyzeError::new(ErrorKind::InvalidCondForm, "cond: :else missing a result form")) };
                default = analyze(d)?;
                i += 2;
                continue;
            }
        }
        let Some(result) = args.get(i + 1) else { return Err(AnalyzeError::new(ErrorKind::InvalidCondForm, "cond: clause missing a result form")) };
        clauses.push((args[i].clone(), result.clone()));
        i += 2;
    }
    let mut expr = default;
    for (cond, result) in clauses.into_iter().rev() {
        expr = CoreExpr::If(Box::new(analyze(&cond)?), Box::new(analyze(&result)?), Box::new(expr));
    }
    Ok(expr)
}

fn analyze_fn(args: &[RawExpr], name: Option<String>) -> AResult<CoreExpr> {
    let [params_raw, body @ ..] = args else {
        return Err(invalid_arity("fn: expected a parameter vector and at least one body form"));
    };
    let RawExpr::Vector(flat) = params_raw else {
        return Err(invalid_form("fn: parameters must be a vector"));
    };
    if body.is_empty() {
        return Err(invalid_arity("fn: expected at least one body form"));
    }
    let mut params = Vec::new();
    let mut rest = None;
    let mut i = 0;
    while i < flat.len() {
        if let RawExpr::Symbol(s) = &flat[i] {
            if s == "&" {
                let RawExpr::Symbol(rname) = flat.get(i + 1).ok_or_else(|| invalid_form("fn: `&` must be followed by a binding"))? else {
                    return Err(invalid_form("fn: `&` rest binding must be a symbol"));
                };
                rest = Some(rname.clone());
                i += 2;
                continue;
            }
        }
        params.push(analyze_pattern(&flat[i])?);
        i += 1;
    }
    let body = body.iter().map(analyze).collect::<AResult<_>>()?;
    Ok(CoreExpr::Fn { params, rest, body, name })
}

fn analyze_def(args: &[RawExpr]) -> AResult<CoreExpr> {
    if args.len() != 2 {
        return Err(invalid_arity("def: expected a name and a value"));
    }
    let RawExpr::Symbol(name) = &args[0] else {
        return Err(invalid_form("def: first argument must be a symbol"));
    };
    Ok(CoreExpr::Def(name.clone(), Box::new(analyze(&args[1])?)))
}

fn path_from_raw(raw: &RawExpr) -> AResult<Vec<String>> {
    match raw {
        RawExpr::KeywordLit(k) => Ok(vec![k.clone()]),
        RawExpr::Vector(items) => items
            .iter()
            .map(|i| keyword_name(i).ok_or_else(|| AnalyzeError::new(ErrorKind::InvalidWhereForm, "where: path entries must be keywords")))
            .collect(),
        _ => Err(AnalyzeError::new(ErrorKind::InvalidWhereForm, "where: path must be a keyword or vector of keywords")),
    }
}

fn analyze_where(args: &[RawExpr]) -> AResult<CoreExpr> {
    match args.len() {
        1 => Ok(CoreExpr::Where(path_from_raw(&args[0])?, WhereOp::Truthy, Box::new(CoreExpr::Literal(Value::Nil)))),
        3 => {
            let op = match &args[1] {
                RawExpr::Symbol(s) => match s.as_str() {
                    "eq" | "=" => WhereOp::Eq,
                    "not_eq" | "not=" => WhereOp::NotEq,
                    "gt" | ">" => WhereOp::Gt,
                    "lt" | "<" => WhereOp::Lt,
                    "gte" | ">=" => WhereOp::Gte,
                    "lte" | "<=" => WhereOp::Lte,
                    "includes" => WhereOp::Includes,
                    "in" => WhereOp::In,
                    "truthy" => WhereOp::Truthy,
                    other => return Err(AnalyzeError::new(ErrorKind::InvalidWhereOperator, format!("unknown where operator: {other}"))),
                },
                _ => return Err(AnalyzeError::new(ErrorKind::InvalidWhereOperator, "where: operator must be a symbol")),
            };
            Ok(CoreExpr::Where(path_from_raw(&args[0])?, op, Box::new(analyze(&args[2])?)))
        }
        _ => Err(AnalyzeError::new(ErrorKind::InvalidWhereForm, "where: expected (where path) or (where path op value)")),
    }
}

fn analyze_pred_combinator(kind: PredKind, args: &[RawExpr]) -> AResult<CoreExpr> {
    Ok(CoreExpr::PredCombinator(kind, args.iter().map(analyze).collect::<AResult<_>>()?))
}

fn analyze_call_tool(args: &[RawExpr]) -> AResult<CoreExpr> {
    let [name_raw, argmap_raw] = args else {
        return Err(invalid_arity("call: expected a tool name and an argument map"));
    };
    let RawExpr::StringLit(name) = name_raw else {
        return Err(AnalyzeError::new(ErrorKind::InvalidCallToolName, "call: tool name must be a string literal"));
    };
    Ok(CoreExpr::CallTool(name.clone(), Box::new(analyze(argmap_raw)?)))
}

fn analyze_thread(args: &[RawExpr], append: bool) -> AResult<CoreExpr> {
    let [seed, steps @ ..] = args else {
        return Err(AnalyzeError::new(ErrorKind::InvalidThreadForm, "threading macro: expected a seed and at least one step"));
    };
    let mut acc = seed.clone();
    for step in steps {
        acc = match step {
            RawExpr::List(items) if !items.is_empty() => {
                let mut items = items.clone();
                if append {
                    items.push(acc);
                } else {
                    items.insert(1, acc);
                }
                RawExpr::List(items)
            }
            RawExpr::Symbol(_) => RawExpr::List(vec![step.clone(), acc]),
            _ => return Err(AnalyzeError::new(ErrorKind::InvalidThreadForm, "threading macro: each step must be a call form")),
        };
    }
    analyze(&acc)
}

fn analyze_task(args: &[RawExpr]) -> AResult<CoreExpr> {
    let [id, body] = args else {
        return Err(invalid_arity("task: expected an id and a body expression"));
    };
    let thunk = CoreExpr::Fn { params: vec![], rest: None, body: vec![analyze(body)?], name: None };
    Ok(CoreExpr::Call(Box::new(CoreExpr::Var("task".to_string())), vec![analyze(id)?, thunk]))
}

fn analyze_short_fn(body: &RawExpr) -> AResult<CoreExpr> {
    let mut max_n = 0usize;
    let mut has_rest = false;
    collect_placeholders(body, &mut max_n, &mut has_rest);
    let params = (1..=max_n).map(|n| Pattern::Symbol(format!("%{n}"))).collect();
    let rest = has_rest.then(|| "%&".to_string());
    let body = vec![analyze(body)?];
    Ok(CoreExpr::Fn { params, rest, body, name: None })
}

fn collect_placeholders(raw: &RawExpr, max_n: &mut usize, has_rest: &mut bool) {
    match raw {
        RawExpr::Symbol(s) => {
            if s == "%" {
                *max_n = (*max_n).max(1);
            } else if s == "%&" {
                *has_rest = true;
            } else if let Some(n) = s.strip_prefix('%').and_then(|n| n.parse::<usize>().ok()) {
                *max_n = (*max_n).max(n);
            }
        }
        RawExpr::List(items) | RawExpr::Vector(items) | RawExpr::Set(items) => {
            for item in items {
                collect_placeholders(item, max_n, has_rest);
            }
        }
        RawExpr::Map(pairs) => {
            for (k, v) in pairs {
                collect_placeholders(k, max_n, has_rest);
                collect_placeholders(v, max_n, has_rest);
            }
        }
        RawExpr::ShortFn(b) => collect_placeholders(b, max_n, has_rest),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn analyze_src(src: &str) -> CoreExpr {
        analyze(&parse(src).unwrap()).unwrap()
    }

    #[test]
    fn if_requires_three_args() {
        let raw = parse("(if true 1)").unwrap();
        assert!(analyze(&raw).is_err());
    }

    #[test]
    fn when_desugars_to_if_with_nil_else() {
        match analyze_src("(when true 1)") {
            CoreExpr::If(_, _, else_) => assert!(matches!(*else_, CoreExpr::Literal(Value::Nil))),
            _ => panic!("expected If"),
        }
    }

    #[test]
    fn comparison_ops_are_strictly_binary() {
        let raw = parse("(< 1 2 3)").unwrap();
        assert!(analyze(&raw).is_err());
    }

    #[test]
    fn call_requires_string_tool_name() {
        let raw = parse("(call foo {})").unwrap();
        assert!(analyze(&raw).is_err());
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(analyze(&RawExpr::List(vec![])).is_err());
    }

    #[test]
    fn thread_first_inserts_as_second_arg() {
        match analyze_src("(-> 1 (+ 2))") {
            CoreExpr::Call(_, args) => assert_eq!(args.len(), 2),
            _ => panic!("expected Call"),
        }
    }

    #[test]
    fn loop_desugars_to_a_let_bound_self_recursive_closure() {
        match analyze_src("(loop [x 0] (recur x))") {
            CoreExpr::Let(bindings, body) => {
                assert_eq!(bindings.len(), 1);
                assert!(matches!(&bindings[0].1, CoreExpr::Fn { name: Some(n), .. } if n == LOOP_RECUR_BINDING));
                assert_eq!(body.len(), 1);
            }
            _ => panic!("expected Let"),
        }
    }

    #[test]
    fn recur_outside_a_loop_still_analyzes_as_a_call() {
        // Lexically unresolvable references are a runtime concern (`unbound_var`), not an
        // analyze-time error, same as any other free variable.
        assert!(matches!(analyze_src("(recur 1)"), CoreExpr::Call(..)));
    }

    #[test]
    fn where_single_arg_defaults_to_truthy() {
        match analyze_src("(where :active)") {
            CoreExpr::Where(path, WhereOp::Truthy, _) => assert_eq!(path, vec!["active".to_string()]),
            _ => panic!("expected Where"),
        }
    }

    #[test]
    fn short_fn_binds_percent_placeholders() {
        match analyze_src("#(+ % 1)") {
            CoreExpr::Fn { params, .. } => assert_eq!(params.len(), 1),
            _ => panic!("expected Fn"),
        }
    }
}
