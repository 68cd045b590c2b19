// ABOUTME: Sequence construction, traversal and the higher-order operators (map/filter/reduce)
// that drive most agent programs. Generalizes the teacher's cons/car/cdr/list/length/empty? from
// hand-rolled linked lists onto the shared `Value::Vector` representation.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::{MapKey, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

fn as_vec<'a>(fname: &str, v: &'a Value) -> EvalResult<std::borrow::Cow<'a, Vec<Value>>> {
    match v {
        Value::Vector(items) => Ok(std::borrow::Cow::Borrowed(items.as_ref())),
        Value::Set(items) => Ok(std::borrow::Cow::Owned(items.iter().cloned().collect())),
        Value::Nil => Ok(std::borrow::Cow::Owned(Vec::new())),
        other => Err(EvalError::type_error(fname, "vector or set", other).into()),
    }
}

fn builtin_list(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::vector(args.to_vec()))
}

fn builtin_cons(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [head, tail] = args else { return Err(EvalError::arity_error("cons", "2", args.len()).into()) };
    let mut items = as_vec("cons", tail)?.into_owned();
    items.insert(0, head.clone());
    Ok(Value::vector(items))
}

fn builtin_first(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("first", "1", args.len()).into()) };
    Ok(as_vec("first", v)?.first().cloned().unwrap_or(Value::Nil))
}

fn builtin_rest(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("rest", "1", args.len()).into()) };
    let items = as_vec("rest", v)?;
    Ok(Value::vector(items.iter().skip(1).cloned().collect()))
}

fn builtin_last(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("last", "1", args.len()).into()) };
    Ok(as_vec("last", v)?.last().cloned().unwrap_or(Value::Nil))
}

/// Like `rest`, but `nil` once the tail is empty rather than an empty vector.
fn builtin_next(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("next", "1", args.len()).into()) };
    let items = as_vec("next", v)?;
    if items.len() <= 1 {
        return Ok(Value::Nil);
    }
    Ok(Value::vector(items.iter().skip(1).cloned().collect()))
}

fn builtin_ffirst(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    builtin_first(&[builtin_first(args, ctx)?], ctx)
}

fn builtin_fnext(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    builtin_first(&[builtin_next(args, ctx)?], ctx)
}

fn builtin_nfirst(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    builtin_next(&[builtin_first(args, ctx)?], ctx)
}

fn builtin_nnext(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    builtin_next(&[builtin_next(args, ctx)?], ctx)
}

fn builtin_nth(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v, idx] = args else { return Err(EvalError::arity_error("nth", "2", args.len()).into()) };
    let Value::Int(i) = idx else { return Err(EvalError::type_error("nth", "int", idx).into()) };
    let items = as_vec("nth", v)?;
    Ok(usize::try_from(*i).ok().and_then(|i| items.get(i)).cloned().unwrap_or(Value::Nil))
}

fn builtin_count(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("count", "1", args.len()).into()) };
    let n = match v {
        Value::String(s) => s.chars().count(),
        Value::Map(m) => m.len(),
        other => as_vec("count", other)?.len(),
    };
    Ok(Value::Int(n as i64))
}

fn builtin_empty_q(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(builtin_count(args, ctx)?, Value::Int(0))))
}

fn builtin_conj(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [coll, item] = args else { return Err(EvalError::arity_error("conj", "2", args.len()).into()) };
    match coll {
        Value::Set(s) => {
            let mut s = s.as_ref().clone();
            s.insert(item.clone());
            Ok(Value::Set(Rc::new(s)))
        }
        other => {
            let mut items = as_vec("conj", other)?.into_owned();
            items.push(item.clone());
            Ok(Value::vector(items))
        }
    }
}

fn builtin_concat(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let mut out = Vec::new();
    for a in args {
        out.extend(as_vec("concat", a)?.iter().cloned());
    }
    Ok(Value::vector(out))
}

fn builtin_reverse(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("reverse", "1", args.len()).into()) };
    let mut items = as_vec("reverse", v)?.into_owned();
    items.reverse();
    Ok(Value::vector(items))
}

fn builtin_take(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [n, v] = args else { return Err(EvalError::arity_error("take", "2", args.len()).into()) };
    let Value::Int(n) = n else { return Err(EvalError::type_error("take", "int", n).into()) };
    let items = as_vec("take", v)?;
    Ok(Value::vector(items.iter().take((*n).max(0) as usize).cloned().collect()))
}

fn builtin_drop(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [n, v] = args else { return Err(EvalError::arity_error("drop", "2", args.len()).into()) };
    let Value::Int(n) = n else { return Err(EvalError::type_error("drop", "int", n).into()) };
    let items = as_vec("drop", v)?;
    Ok(Value::vector(items.iter().skip((*n).max(0) as usize).cloned().collect()))
}

fn builtin_range(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let (start, end) = match args {
        [Value::Int(end)] => (0, *end),
        [Value::Int(start), Value::Int(end)] => (*start, *end),
        _ => return Err(EvalError::arity_error("range", "1 or 2 ints", args.len()).into()),
    };
    Ok(Value::vector((start..end).map(Value::Int).collect()))
}

fn builtin_map(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("map", "2", args.len()).into()) };
    let items = as_vec("map", v)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items.iter() {
        out.push(ctx.apply(f, vec![item.clone()])?);
    }
    Ok(Value::vector(out))
}

fn builtin_filter(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("filter", "2", args.len()).into()) };
    let items = as_vec("filter", v)?;
    let mut out = Vec::new();
    for item in items.iter() {
        if ctx.apply(f, vec![item.clone()])?.truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::vector(out))
}

fn builtin_remove(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("remove", "2", args.len()).into()) };
    let items = as_vec("remove", v)?;
    let mut out = Vec::new();
    for item in items.iter() {
        if !ctx.apply(f, vec![item.clone()])?.truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::vector(out))
}

fn builtin_reduce(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let (f, init, coll) = match args {
        [f, init, coll] => (f, init.clone(), coll),
        [f, coll] => {
            let items = as_vec("reduce", coll)?;
            let Some((first, rest)) = items.split_first() else { return Ok(Value::Nil) };
            let mut acc = first.clone();
            for item in rest {
                acc = ctx.apply(f, vec![acc, item.clone()])?;
            }
            return Ok(acc);
        }
        _ => return Err(EvalError::arity_error("reduce", "2 or 3", args.len()).into()),
    };
    let items = as_vec("reduce", coll)?;
    let mut acc = init;
    for item in items.iter() {
        acc = ctx.apply(f, vec![acc, item.clone()])?;
    }
    Ok(acc)
}

fn builtin_mapv(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    builtin_map(args, ctx)
}

fn builtin_find(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("find", "2", args.len()).into()) };
    let items = as_vec("find", v)?;
    for item in items.iter() {
        if ctx.apply(f, vec![item.clone()])?.truthy() {
            return Ok(item.clone());
        }
    }
    Ok(Value::Nil)
}

fn builtin_map_indexed(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("map-indexed", "2", args.len()).into()) };
    let items = as_vec("map-indexed", v)?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        out.push(ctx.apply(f, vec![Value::Int(i as i64), item.clone()])?);
    }
    Ok(Value::vector(out))
}

fn builtin_take_while(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("take-while", "2", args.len()).into()) };
    let items = as_vec("take-while", v)?;
    let mut out = Vec::new();
    for item in items.iter() {
        if !ctx.apply(f, vec![item.clone()])?.truthy() {
            break;
        }
        out.push(item.clone());
    }
    Ok(Value::vector(out))
}

fn builtin_drop_while(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("drop-while", "2", args.len()).into()) };
    let items = as_vec("drop-while", v)?;
    let mut out = Vec::new();
    let mut dropping = true;
    for item in items.iter() {
        if dropping && ctx.apply(f, vec![item.clone()])?.truthy() {
            continue;
        }
        dropping = false;
        out.push(item.clone());
    }
    Ok(Value::vector(out))
}

fn builtin_distinct_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("distinct-by", "2", args.len()).into()) };
    let items = as_vec("distinct-by", v)?;
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for item in items.iter() {
        let key = ctx.apply(f, vec![item.clone()])?;
        let key = key.as_map_key().ok_or_else(|| EvalError::type_error("distinct-by", "a hashable key function result", &key))?;
        if seen.insert(key) {
            out.push(item.clone());
        }
    }
    Ok(Value::vector(out))
}

fn builtin_partition(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [n, v] = args else { return Err(EvalError::arity_error("partition", "2", args.len()).into()) };
    let Value::Int(n) = n else { return Err(EvalError::type_error("partition", "int", n).into()) };
    if *n <= 0 {
        return Err(EvalError::arithmetic("partition: size must be positive").into());
    }
    let items = as_vec("partition", v)?;
    let n = *n as usize;
    Ok(Value::vector(items.chunks_exact(n).map(|c| Value::vector(c.to_vec())).collect()))
}

fn builtin_interpose(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [sep, v] = args else { return Err(EvalError::arity_error("interpose", "2", args.len()).into()) };
    let items = as_vec("interpose", v)?;
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(sep.clone());
        }
        out.push(item.clone());
    }
    Ok(Value::vector(out))
}

fn builtin_mapcat(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("mapcat", "2", args.len()).into()) };
    let items = as_vec("mapcat", v)?;
    let mut out = Vec::new();
    for item in items.iter() {
        let mapped = ctx.apply(f, vec![item.clone()])?;
        out.extend(as_vec("mapcat", &mapped)?.iter().cloned());
    }
    Ok(Value::vector(out))
}

fn builtin_zipmap(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [ks, vs] = args else { return Err(EvalError::arity_error("zipmap", "2", args.len()).into()) };
    let ks = as_vec("zipmap", ks)?;
    let vs = as_vec("zipmap", vs)?;
    let mut m = BTreeMap::new();
    for (k, v) in ks.iter().zip(vs.iter()) {
        let k = k.as_map_key().ok_or_else(|| EvalError::type_error("zipmap", "a hashable key", k))?;
        m.insert(k, v.clone());
    }
    Ok(Value::map(m))
}

fn builtin_group_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("group-by", "2", args.len()).into()) };
    let items = as_vec("group-by", v)?;
    let mut groups: BTreeMap<MapKey, Vec<Value>> = BTreeMap::new();
    for item in items.iter() {
        let key = ctx.apply(f, vec![item.clone()])?;
        let key = key.as_map_key().ok_or_else(|| EvalError::type_error("group-by", "a hashable key function result", &key))?;
        groups.entry(key).or_default().push(item.clone());
    }
    Ok(Value::map(groups.into_iter().map(|(k, v)| (k, Value::vector(v))).collect()))
}

fn builtin_frequencies(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("frequencies", "1", args.len()).into()) };
    let items = as_vec("frequencies", v)?;
    let mut counts: BTreeMap<MapKey, i64> = BTreeMap::new();
    for item in items.iter() {
        let key = item.as_map_key().ok_or_else(|| EvalError::type_error("frequencies", "a hashable element", item))?;
        *counts.entry(key).or_insert(0) += 1;
    }
    Ok(Value::map(counts.into_iter().map(|(k, n)| (k, Value::Int(n))).collect()))
}

fn builtin_sort(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("sort", "1", args.len()).into()) };
    let mut items = as_vec("sort", v)?.into_owned();
    items.sort();
    Ok(Value::vector(items))
}

fn builtin_sort_by(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [f, v] = args else { return Err(EvalError::arity_error("sort-by", "2", args.len()).into()) };
    let items = as_vec("sort-by", v)?.into_owned();
    let mut keyed = items
        .into_iter()
        .map(|item| ctx.apply(f, vec![item.clone()]).map(|k| (k, item)))
        .collect::<EvalResult<Vec<_>>>()?;
    keyed.sort_by(|(ka, _), (kb, _)| ka.cmp(kb));
    Ok(Value::vector(keyed.into_iter().map(|(_, v)| v).collect()))
}

fn builtin_distinct(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [v] = args else { return Err(EvalError::arity_error("distinct", "1", args.len()).into()) };
    let items = as_vec("distinct", v)?;
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for item in items.iter() {
        if seen.insert(item.clone()) {
            out.push(item.clone());
        }
    }
    Ok(Value::vector(out))
}

fn builtin_flatten(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    fn go(v: &Value, out: &mut Vec<Value>) {
        if let Value::Vector(items) = v {
            for item in items.iter() {
                go(item, out);
            }
        } else {
            out.push(v.clone());
        }
    }
    let [v] = args else { return Err(EvalError::arity_error("flatten", "1", args.len()).into()) };
    let mut out = Vec::new();
    go(v, &mut out);
    Ok(Value::vector(out))
}

fn builtin_into(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [target, source] = args else { return Err(EvalError::arity_error("into", "2", args.len()).into()) };
    let items = as_vec("into", source)?;
    match target {
        Value::Set(s) => {
            let mut s = s.as_ref().clone();
            s.extend(items.iter().cloned());
            Ok(Value::Set(Rc::new(s)))
        }
        _ => {
            let mut base = as_vec("into", target)?.into_owned();
            base.extend(items.iter().cloned());
            Ok(Value::vector(base))
        }
    }
}

pub fn register(env: &Rc<Environment>) {
    env.define("list".to_string(), Value::BuiltIn(builtin_list));
    env.define("cons".to_string(), Value::BuiltIn(builtin_cons));
    env.define("first".to_string(), Value::BuiltIn(builtin_first));
    env.define("rest".to_string(), Value::BuiltIn(builtin_rest));
    env.define("last".to_string(), Value::BuiltIn(builtin_last));
    env.define("next".to_string(), Value::BuiltIn(builtin_next));
    env.define("ffirst".to_string(), Value::BuiltIn(builtin_ffirst));
    env.define("fnext".to_string(), Value::BuiltIn(builtin_fnext));
    env.define("nfirst".to_string(), Value::BuiltIn(builtin_nfirst));
    env.define("nnext".to_string(), Value::BuiltIn(builtin_nnext));
    env.define("nth".to_string(), Value::BuiltIn(builtin_nth));
    env.define("count".to_string(), Value::BuiltIn(builtin_count));
    env.define("empty?".to_string(), Value::BuiltIn(builtin_empty_q));
    env.define("conj".to_string(), Value::BuiltIn(builtin_conj));
    env.define("concat".to_string(), Value::BuiltIn(builtin_concat));
    env.define("reverse".to_string(), Value::BuiltIn(builtin_reverse));
    env.define("take".to_string(), Value::BuiltIn(builtin_take));
    env.define("drop".to_string(), Value::BuiltIn(builtin_drop));
    env.define("take-while".to_string(), Value::BuiltIn(builtin_take_while));
    env.define("drop-while".to_string(), Value::BuiltIn(builtin_drop_while));
    env.define("range".to_string(), Value::BuiltIn(builtin_range));
    env.define("map".to_string(), Value::BuiltIn(builtin_map));
    env.define("mapv".to_string(), Value::BuiltIn(builtin_mapv));
    env.define("map-indexed".to_string(), Value::BuiltIn(builtin_map_indexed));
    env.define("mapcat".to_string(), Value::BuiltIn(builtin_mapcat));
    env.define("filter".to_string(), Value::BuiltIn(builtin_filter));
    env.define("remove".to_string(), Value::BuiltIn(builtin_remove));
    env.define("find".to_string(), Value::BuiltIn(builtin_find));
    env.define("reduce".to_string(), Value::BuiltIn(builtin_reduce));
    env.define("sort".to_string(), Value::BuiltIn(builtin_sort));
    env.define("sort-by".to_string(), Value::BuiltIn(builtin_sort_by));
    env.define("distinct".to_string(), Value::BuiltIn(builtin_distinct));
    env.define("distinct-by".to_string(), Value::BuiltIn(builtin_distinct_by));
    env.define("flatten".to_string(), Value::BuiltIn(builtin_flatten));
    env.define("into".to_string(), Value::BuiltIn(builtin_into));
    env.define("partition".to_string(), Value::BuiltIn(builtin_partition));
    env.define("interpose".to_string(), Value::BuiltIn(builtin_interpose));
    env.define("zipmap".to_string(), Value::BuiltIn(builtin_zipmap));
    env.define("group-by".to_string(), Value::BuiltIn(builtin_group_by));
    env.define("frequencies".to_string(), Value::BuiltIn(builtin_frequencies));
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
    fn filter_then_count_matches_where_predicate() {
        use crate::value::{PredData, WhereOp};
        let pred = Value::Predicate(Rc::new(PredData::Where(vec!["active".to_string()], WhereOp::Truthy, Value::Nil)));
        let mut m1 = std::collections::BTreeMap::new();
        m1.insert(crate::value::MapKey::Keyword("active".into()), Value::Bool(true));
        let mut m2 = std::collections::BTreeMap::new();
        m2.insert(crate::value::MapKey::Keyword("active".into()), Value::Bool(false));
        let coll = Value::vector(vec![Value::map(m1), Value::map(m2)]);
        let filtered = builtin_filter(&[pred, coll], &ctx()).unwrap();
        assert_eq!(builtin_count(&[filtered], &ctx()).unwrap(), Value::Int(1));
    }

    #[test]
    fn reduce_without_init_uses_first_element() {
        let coll = Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let plus = Value::BuiltIn(|args, _ctx| Ok(Value::Int(match (&args[0], &args[1]) { (Value::Int(a), Value::Int(b)) => a + b, _ => 0 })));
        assert_eq!(builtin_reduce(&[plus, coll], &ctx()).unwrap(), Value::Int(6));
    }

    #[test]
    fn next_is_nil_once_the_tail_is_exhausted() {
        assert_eq!(builtin_next(&[Value::vector(vec![Value::Int(1)])], &ctx()).unwrap(), Value::Nil);
        assert_eq!(
            builtin_next(&[Value::vector(vec![Value::Int(1), Value::Int(2)])], &ctx()).unwrap(),
            Value::vector(vec![Value::Int(2)])
        );
    }

    #[test]
    fn partition_drops_a_trailing_incomplete_chunk() {
        let v = Value::vector((1..=5).map(Value::Int).collect());
        let result = builtin_partition(&[Value::Int(2), v], &ctx()).unwrap();
        assert_eq!(
            result,
            Value::vector(vec![
                Value::vector(vec![Value::Int(1), Value::Int(2)]),
                Value::vector(vec![Value::Int(3), Value::Int(4)]),
            ])
        );
    }

    #[test]
    fn zipmap_pairs_keys_with_values_positionally() {
        let ks = Value::vector(vec![Value::keyword("a"), Value::keyword("b")]);
        let vs = Value::vector(vec![Value::Int(1), Value::Int(2)]);
        let Value::Map(m) = builtin_zipmap(&[ks, vs], &ctx()).unwrap() else { panic!("expected map") };
        assert_eq!(m.get(&crate::value::MapKey::Keyword("a".into())), Some(&Value::Int(1)));
    }

    #[test]
    fn sort_by_orders_using_key_function() {
        let keyword_len = Value::BuiltIn(|args, _ctx| match &args[0] {
            Value::String(s) => Ok(Value::Int(s.len() as i64)),
            _ => Ok(Value::Int(0)),
        });
        let coll = Value::vector(vec![Value::string("ccc"), Value::string("a"), Value::string("bb")]);
        let sorted = builtin_sort_by(&[keyword_len, coll], &ctx()).unwrap();
        assert_eq!(sorted, Value::vector(vec![Value::string("a"), Value::string("bb"), Value::string("ccc")]));
    }
}
