// ABOUTME: Set operations and the bare collection constructors (§4.4 Sets / Construction). New
// module: the teacher's `Value` had no `Set` variant at all, so there is no teacher counterpart
// to generalize — grounded directly on `collections.rs`'s vector-ops shape instead.

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::{MapKey, Value};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::rc::Rc;

fn as_set<'a>(fname: &str, v: &'a Value) -> EvalResult<std::borrow::Cow<'a, BTreeSet<Value>>> {
    match v {
        Value::Set(s) => Ok(std::borrow::Cow::Borrowed(s.as_ref())),
        Value::Vector(items) => Ok(std::borrow::Cow::Owned(items.iter().cloned().collect())),
        Value::Nil => Ok(std::borrow::Cow::Owned(BTreeSet::new())),
        other => Err(EvalError::type_error(fname, "set or vector", other).into()),
    }
}

fn builtin_set(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [items] = args else { return Err(EvalError::arity_error("set", "1", args.len()).into()) };
    Ok(Value::Set(Rc::new(as_set("set", items)?.into_owned())))
}

/// `(vector 1 2 3)` builds a vector from its arguments; `(vec coll)` coerces an existing
/// collection into one. Both variants are registered since §4.4 lists them separately.
fn builtin_vector(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    Ok(Value::vector(args.to_vec()))
}

fn builtin_vec(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [coll] = args else { return Err(EvalError::arity_error("vec", "1", args.len()).into()) };
    match coll {
        Value::Vector(items) => Ok(Value::vector(items.as_ref().clone())),
        Value::Set(items) => Ok(Value::vector(items.iter().cloned().collect())),
        Value::Map(m) => Ok(Value::vector(m.iter().map(|(k, v)| Value::vector(vec![Value::from_map_key(k), v.clone()])).collect())),
        Value::Nil => Ok(Value::vector(vec![])),
        other => Err(EvalError::type_error("vec", "a collection", other).into()),
    }
}

fn map_from_pairs(fname: &str, args: &[Value]) -> EvalResult<Value> {
    if args.len() % 2 != 0 {
        return Err(EvalError::arity_error(fname, "an even number of key/value arguments", args.len()).into());
    }
    let mut m = BTreeMap::new();
    for pair in args.chunks(2) {
        let key = pair[0].as_map_key().ok_or_else(|| EvalError::type_error(fname, "a hashable key", &pair[0]))?;
        m.insert(key, pair[1].clone());
    }
    Ok(Value::map(m))
}

fn builtin_hash_map(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    map_from_pairs("hash-map", args)
}

/// `Value::Map` is already a `BTreeMap` keyed in sorted order, so there is no distinct
/// representation for `sorted-map` to provide here; it is the same constructor under the name
/// Clojure programs reach for when order matters to the reader.
fn builtin_sorted_map(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    map_from_pairs("sorted-map", args)
}

fn builtin_contains_q(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [coll, key] = args else { return Err(EvalError::arity_error("contains?", "2", args.len()).into()) };
    match coll {
        Value::Set(s) => Ok(Value::Bool(s.contains(key))),
        Value::Map(m) => Ok(Value::Bool(match key.as_map_key() {
            Some(k) => m.contains_key(&k),
            None => false,
        })),
        other => Err(EvalError::type_error("contains?", "set or map", other).into()),
    }
}

fn builtin_disj(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [set, items @ ..] = args else { return Err(EvalError::arity_error("disj", "at least 1", args.len()).into()) };
    let mut s = as_set("disj", set)?.into_owned();
    for item in items {
        s.remove(item);
    }
    Ok(Value::Set(Rc::new(s)))
}

fn builtin_union(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let mut out = BTreeSet::new();
    for a in args {
        out.extend(as_set("union", a)?.iter().cloned());
    }
    Ok(Value::Set(Rc::new(out)))
}

fn builtin_intersection(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [first, rest @ ..] = args else { return Err(EvalError::arity_error("intersection", "at least 1", args.len()).into()) };
    let mut out = as_set("intersection", first)?.into_owned();
    for a in rest {
        let other = as_set("intersection", a)?;
        out.retain(|v| other.contains(v));
    }
    Ok(Value::Set(Rc::new(out)))
}

fn builtin_difference(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [first, rest @ ..] = args else { return Err(EvalError::arity_error("difference", "at least 1", args.len()).into()) };
    let mut out = as_set("difference", first)?.into_owned();
    for a in rest {
        for item in as_set("difference", a)?.iter() {
            out.remove(item);
        }
    }
    Ok(Value::Set(Rc::new(out)))
}

pub fn register(env: &Rc<Environment>) {
    env.define("set".to_string(), Value::BuiltIn(builtin_set));
    env.define("vec".to_string(), Value::BuiltIn(builtin_vec));
    env.define("vector".to_string(), Value::BuiltIn(builtin_vector));
    env.define("hash-map".to_string(), Value::BuiltIn(builtin_hash_map));
    env.define("sorted-map".to_string(), Value::BuiltIn(builtin_sorted_map));
    env.define("contains?".to_string(), Value::BuiltIn(builtin_contains_q));
    env.define("disj".to_string(), Value::BuiltIn(builtin_disj));
    env.define("union".to_string(), Value::BuiltIn(builtin_union));
    env.define("intersection".to_string(), Value::BuiltIn(builtin_intersection));
    env.define("difference".to_string(), Value::BuiltIn(builtin_difference));
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
    fn set_dedupes_a_vector() {
        let v = Value::vector(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        let Value::Set(s) = builtin_set(&[v], &ctx()).unwrap() else { panic!("expected set") };
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn vec_coerces_a_map_into_entry_pairs() {
        let m = Value::map(BTreeMap::from([(MapKey::Keyword("a".into()), Value::Int(1))]));
        let v = builtin_vec(&[m], &ctx()).unwrap();
        assert_eq!(v, Value::vector(vec![Value::vector(vec![Value::keyword("a"), Value::Int(1)])]));
    }

    #[test]
    fn contains_q_checks_set_membership_and_map_keys() {
        let s = Value::Set(Rc::new(BTreeSet::from([Value::Int(1), Value::Int(2)])));
        assert_eq!(builtin_contains_q(&[s, Value::Int(2)], &ctx()).unwrap(), Value::Bool(true));
        let m = Value::map(BTreeMap::from([(MapKey::Keyword("a".into()), Value::Int(1))]));
        assert_eq!(builtin_contains_q(&[m, Value::keyword("a")], &ctx()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn union_intersection_difference_compose() {
        let a = Value::Set(Rc::new(BTreeSet::from([Value::Int(1), Value::Int(2)])));
        let b = Value::Set(Rc::new(BTreeSet::from([Value::Int(2), Value::Int(3)])));
        let Value::Set(u) = builtin_union(&[a.clone(), b.clone()], &ctx()).unwrap() else { panic!("expected set") };
        assert_eq!(u.len(), 3);
        let Value::Set(i) = builtin_intersection(&[a.clone(), b.clone()], &ctx()).unwrap() else { panic!("expected set") };
        assert_eq!(*i, BTreeSet::from([Value::Int(2)]));
        let Value::Set(d) = builtin_difference(&[a, b], &ctx()).unwrap() else { panic!("expected set") };
        assert_eq!(*d, BTreeSet::from([Value::Int(1)]));
    }

    #[test]
    fn disj_removes_elements() {
        let s = Value::Set(Rc::new(BTreeSet::from([Value::Int(1), Value::Int(2), Value::Int(3)])));
        let Value::Set(result) = builtin_disj(&[s, Value::Int(2)], &ctx()).unwrap() else { panic!("expected set") };
        assert_eq!(*result, BTreeSet::from([Value::Int(1), Value::Int(3)]));
    }
}
