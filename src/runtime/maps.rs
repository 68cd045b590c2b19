// ABOUTME: Map construction and access, generalized from the teacher's keyword-only `map-get`
// into the flex-get rule the spec requires: an atom (keyword/int/bool) key wins over a string key
// of the same name, and vice versa when only the string key was ever set (§4.4).

use crate::env::Environment;
use crate::error::EvalError;
use crate::error::EvalResult;
use crate::eval::EvalCtx;
use crate::value::{MapKey, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

fn as_map<'a>(fname: &str, v: &'a Value) -> EvalResult<&'a BTreeMap<MapKey, Value>> {
    match v {
        Value::Map(m) => Ok(m),
        other => Err(EvalError::type_error(fname, "map", other).into()),
    }
}

fn as_key(fname: &str, key: &Value) -> EvalResult<MapKey> {
    key.as_map_key().ok_or_else(|| EvalError::type_error(fname, "a hashable key", key).into())
}

/// Flex-get: try the key's own space first, then fall back across the atom/string divide.
fn flex_lookup(m: &BTreeMap<MapKey, Value>, key: &Value) -> Option<Value> {
    if let Some(k) = key.as_map_key() {
        if let Some(v) = m.get(&k) {
            return Some(v.clone());
        }
    }
    match key {
        Value::Keyword(k) | Value::String(k) => m
            .get(&MapKey::Keyword(k.clone()))
            .or_else(|| m.get(&MapKey::String(k.clone())))
            .cloned(),
        _ => None,
    }
}

fn builtin_get(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let (map, key, default) = match args {
        [m, k] => (m, k, Value::Nil),
        [m, k, d] => (m, k, d.clone()),
        _ => return Err(EvalError::arity_error("get", "2 or 3", args.len()).into()),
    };
    let m = as_map("get", map)?;
    Ok(flex_lookup(m, key).unwrap_or(default))
}

fn builtin_get_in(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let (map, path, default) = match args {
        [m, p] => (m, p, Value::Nil),
        [m, p, d] => (m, p, d.clone()),
        _ => return Err(EvalError::arity_error("get-in", "2 or 3", args.len()).into()),
    };
    let Value::Vector(path) = path else { return Err(EvalError::type_error("get-in", "vector", path).into()) };
    let mut cur = map.clone();
    for key in path.iter() {
        cur = match &cur {
            Value::Map(m) => flex_lookup(m, key).unwrap_or(Value::Nil),
            _ => return Ok(default),
        };
    }
    Ok(cur)
}

fn builtin_assoc(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, pairs @ ..] = args else { return Err(EvalError::arity_error("assoc", "at least 1", args.len()).into()) };
    if pairs.len() % 2 != 0 {
        return Err(EvalError::arity_error("assoc", "an odd total count (map plus key/value pairs)", args.len()).into());
    }
    let mut m = as_map("assoc", map)?.clone();
    for pair in pairs.chunks(2) {
        m.insert(as_key("assoc", &pair[0])?, pair[1].clone());
    }
    Ok(Value::map(m))
}

fn assoc_in_rec(v: &Value, path: &[Value], value: &Value) -> EvalResult<Value> {
    let mut m = match v {
        Value::Map(m) => m.as_ref().clone(),
        _ => BTreeMap::new(),
    };
    let key = as_key("assoc-in", &path[0])?;
    if path.len() == 1 {
        m.insert(key, value.clone());
    } else {
        let nested = flex_lookup(&m, &path[0]).unwrap_or(Value::Nil);
        m.insert(key, assoc_in_rec(&nested, &path[1..], value)?);
    }
    Ok(Value::map(m))
}

fn builtin_assoc_in(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, path, value] = args else { return Err(EvalError::arity_error("assoc-in", "3", args.len()).into()) };
    let Value::Vector(path) = path else { return Err(EvalError::type_error("assoc-in", "vector", path).into()) };
    if path.is_empty() {
        return Err(EvalError::arity_error("assoc-in", "a non-empty path", 0).into());
    }
    assoc_in_rec(map, path, value)
}

fn builtin_update(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, pairs @ ..] = args else { return Err(EvalError::arity_error("update", "at least 1", args.len()).into()) };
    if pairs.len() % 2 != 0 {
        return Err(EvalError::arity_error("update", "an odd total count (map plus key/fn pairs)", args.len()).into());
    }
    let mut m = as_map("update", map)?.clone();
    for pair in pairs.chunks(2) {
        let key = as_key("update", &pair[0])?;
        let current = flex_lookup(&m, &pair[0]).unwrap_or(Value::Nil);
        let updated = ctx.apply(&pair[1], vec![current])?;
        m.insert(key, updated);
    }
    Ok(Value::map(m))
}

fn builtin_update_in(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, path, f, extra @ ..] = args else { return Err(EvalError::arity_error("update-in", "at least 3", args.len()).into()) };
    let Value::Vector(path) = path else { return Err(EvalError::type_error("update-in", "vector", path).into()) };
    if path.is_empty() {
        return Err(EvalError::arity_error("update-in", "a non-empty path", 0).into());
    }
    let current = builtin_get_in(&[map.clone(), Value::vector(path.as_ref().clone())], ctx)?;
    let mut call_args = vec![current];
    call_args.extend(extra.iter().cloned());
    let updated = ctx.apply(f, call_args)?;
    assoc_in_rec(map, path, &updated)
}

fn builtin_dissoc(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, keys @ ..] = args else { return Err(EvalError::arity_error("dissoc", "at least 1", args.len()).into()) };
    let mut m = as_map("dissoc", map)?.clone();
    for key in keys {
        if let Some(k) = key.as_map_key() {
            m.remove(&k);
        }
    }
    Ok(Value::map(m))
}

fn builtin_merge(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let mut m = BTreeMap::new();
    for a in args {
        for (k, v) in as_map("merge", a)? {
            m.insert(k.clone(), v.clone());
        }
    }
    Ok(Value::map(m))
}

fn builtin_select_keys(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, keys] = args else { return Err(EvalError::arity_error("select-keys", "2", args.len()).into()) };
    let m = as_map("select-keys", map)?;
    let Value::Vector(keys) = keys else { return Err(EvalError::type_error("select-keys", "vector", keys).into()) };
    let mut out = BTreeMap::new();
    for key in keys.iter() {
        if let Some(k) = key.as_map_key() {
            if let Some(v) = flex_lookup(m, key) {
                out.insert(k, v);
            }
        }
    }
    Ok(Value::map(out))
}

fn builtin_update_vals(args: &[Value], ctx: &EvalCtx) -> EvalResult<Value> {
    let [map, f] = args else { return Err(EvalError::arity_error("update-vals", "2", args.len()).into()) };
    let m = as_map("update-vals", map)?;
    let mut out = BTreeMap::new();
    for (k, v) in m {
        out.insert(k.clone(), ctx.apply(f, vec![v.clone()])?);
    }
    Ok(Value::map(out))
}

fn builtin_keys(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map] = args else { return Err(EvalError::arity_error("keys", "1", args.len()).into()) };
    let m = as_map("keys", map)?;
    Ok(Value::vector(m.keys().map(Value::from_map_key).collect()))
}

fn builtin_vals(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map] = args else { return Err(EvalError::arity_error("vals", "1", args.len()).into()) };
    let m = as_map("vals", map)?;
    Ok(Value::vector(m.values().cloned().collect()))
}

fn builtin_entries(args: &[Value], _ctx: &EvalCtx) -> EvalResult<Value> {
    let [map] = args else { return Err(EvalError::arity_error("entries", "1", args.len()).into()) };
    let m = as_map("entries", map)?;
    Ok(Value::vector(m.iter().map(|(k, v)| Value::vector(vec![Value::from_map_key(k), v.clone()])).collect()))
}

pub fn register(env: &Rc<Environment>) {
    env.define("get".to_string(), Value::BuiltIn(builtin_get));
    env.define("get-in".to_string(), Value::BuiltIn(builtin_get_in));
    env.define("assoc".to_string(), Value::BuiltIn(builtin_assoc));
    env.define("assoc-in".to_string(), Value::BuiltIn(builtin_assoc_in));
    env.define("update".to_string(), Value::BuiltIn(builtin_update));
    env.define("update-in".to_string(), Value::BuiltIn(builtin_update_in));
    env.define("dissoc".to_string(), Value::BuiltIn(builtin_dissoc));
    env.define("merge".to_string(), Value::BuiltIn(builtin_merge));
    env.define("select-keys".to_string(), Value::BuiltIn(builtin_select_keys));
    env.define("update-vals".to_string(), Value::BuiltIn(builtin_update_vals));
    env.define("keys".to_string(), Value::BuiltIn(builtin_keys));
    env.define("vals".to_string(), Value::BuiltIn(builtin_vals));
    env.define("entries".to_string(), Value::BuiltIn(builtin_entries));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use std::time::{Duration, Instant};

    fn ctx() -> EvalCtx {
        EvalCtx::new(Value::Nil, Value::Nil, Rc::new(ToolRegistry::new()), Instant::now() + Duration::from_secs(1), 1000, 1 << 20, 2000)
    }

    fn map_of(pairs: Vec<(MapKey, Value)>) -> Value {
        Value::map(pairs.into_iter().collect())
    }

    #[test]
    fn flex_get_falls_back_from_keyword_to_string() {
        let m = map_of(vec![(MapKey::String("name".into()), Value::string("Ada"))]);
        let result = builtin_get(&[m, Value::keyword("name")], &ctx()).unwrap();
        assert_eq!(result, Value::string("Ada"));
    }

    #[test]
    fn flex_get_prefers_atom_key_even_when_falsy() {
        let m = map_of(vec![
            (MapKey::Keyword("active".into()), Value::Bool(false)),
            (MapKey::String("active".into()), Value::Bool(true)),
        ]);
        let result = builtin_get(&[m, Value::keyword("active")], &ctx()).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn assoc_is_immutable_and_variadic() {
        let m = map_of(vec![(MapKey::Keyword("x".into()), Value::Int(1))]);
        let updated = builtin_assoc(&[m.clone(), Value::keyword("y"), Value::Int(2), Value::keyword("z"), Value::Int(3)], &ctx()).unwrap();
        assert_eq!(builtin_keys(&[m], &ctx()).unwrap(), Value::vector(vec![Value::keyword("x")]));
        let Value::Map(updated) = updated else { panic!("expected map") };
        assert_eq!(updated.len(), 3);
    }

    #[test]
    fn get_in_walks_nested_maps_and_falls_back_to_default() {
        let inner = map_of(vec![(MapKey::Keyword("b".into()), Value::Int(1))]);
        let outer = map_of(vec![(MapKey::Keyword("a".into()), inner)]);
        let path = Value::vector(vec![Value::keyword("a"), Value::keyword("b")]);
        assert_eq!(builtin_get_in(&[outer.clone(), path], &ctx()).unwrap(), Value::Int(1));

        let missing = Value::vector(vec![Value::keyword("a"), Value::keyword("c")]);
        assert_eq!(builtin_get_in(&[outer, missing, Value::Int(-1)], &ctx()).unwrap(), Value::Int(-1));
    }

    #[test]
    fn assoc_in_creates_intermediate_maps() {
        let path = Value::vector(vec![Value::keyword("a"), Value::keyword("b")]);
        let result = builtin_assoc_in(&[Value::Nil, path, Value::Int(5)], &ctx()).unwrap();
        assert_eq!(
            builtin_get_in(&[result, Value::vector(vec![Value::keyword("a"), Value::keyword("b")])], &ctx()).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn dissoc_removes_multiple_keys() {
        let m = map_of(vec![
            (MapKey::Keyword("a".into()), Value::Int(1)),
            (MapKey::Keyword("b".into()), Value::Int(2)),
            (MapKey::Keyword("c".into()), Value::Int(3)),
        ]);
        let result = builtin_dissoc(&[m, Value::keyword("a"), Value::keyword("c")], &ctx()).unwrap();
        let Value::Map(m) = result else { panic!("expected map") };
        assert_eq!(m.len(), 1);
        assert!(m.contains_key(&MapKey::Keyword("b".into())));
    }

    #[test]
    fn select_keys_drops_everything_else() {
        let m = map_of(vec![
            (MapKey::Keyword("a".into()), Value::Int(1)),
            (MapKey::Keyword("b".into()), Value::Int(2)),
        ]);
        let result = builtin_select_keys(&[m, Value::vector(vec![Value::keyword("a")])], &ctx()).unwrap();
        let Value::Map(m) = result else { panic!("expected map") };
        assert_eq!(m.len(), 1);
    }
}
