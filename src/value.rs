// ABOUTME: The Value tagged union the interpreter computes over, plus the AST types it shares a
// module with (Raw AST is parser output, Core AST is analyzer output).

use crate::env::Environment;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// A map key: keywords and strings are distinct key spaces in source, but `get`'s flex-get rule
/// (§4.4) needs both to live in one ordered map so lookup can fall back from one to the other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Keyword(Rc<str>),
    String(Rc<str>),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Keyword(k) => write!(f, ":{k}"),
            MapKey::String(s) => write!(f, "{s:?}"),
            MapKey::Int(n) => write!(f, "{n}"),
            MapKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

pub type BuiltinFn = fn(&[Value], &crate::eval::EvalCtx) -> crate::error::EvalResult<Value>;

/// A predicate value produced by evaluating `where`/`all-of`/`any-of`/`none-of` (§3, §4.3).
/// Combinator members are themselves callables: `Predicate`, `Closure`, `BuiltIn` or `Keyword`.
#[derive(Debug, Clone)]
pub enum PredData {
    Where(Vec<String>, WhereOp, Value),
    Combinator(PredKind, Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<Pattern>,
    pub rest: Option<String>,
    pub body: Rc<CoreExpr>,
    pub env: Rc<Environment>,
    pub name: Option<String>,
}

/// A binding pattern: a plain symbol, or a destructuring pattern lowered to `Let` bindings.
#[derive(Debug, Clone)]
pub enum Pattern {
    Symbol(String),
    Vector { items: Vec<Pattern>, rest: Option<String> },
    Map { keys: Vec<(String, String, Option<Value>)>, as_name: Option<String> },
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Keyword(Rc<str>),
    Vector(Rc<Vec<Value>>),
    Map(Rc<BTreeMap<MapKey, Value>>),
    Set(Rc<BTreeSet<Value>>),
    Closure(Rc<Closure>),
    BuiltIn(BuiltinFn),
    Regex(Rc<Regex>),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Predicate(Rc<PredData>),
}

impl Value {
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Closure(_) => "closure",
            Value::BuiltIn(_) => "builtin",
            Value::Regex(_) => "regex",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Predicate(_) => "predicate",
        }
    }

    pub fn as_map_key(&self) -> Option<MapKey> {
        match self {
            Value::Keyword(k) => Some(MapKey::Keyword(k.clone())),
            Value::String(s) => Some(MapKey::String(s.clone())),
            Value::Int(n) => Some(MapKey::Int(*n)),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            _ => None,
        }
    }

    pub fn from_map_key(k: &MapKey) -> Value {
        match k {
            MapKey::Keyword(s) => Value::Keyword(s.clone()),
            MapKey::String(s) => Value::String(s.clone()),
            MapKey::Int(n) => Value::Int(*n),
            MapKey::Bool(b) => Value::Bool(*b),
        }
    }

    pub fn string<S: Into<Rc<str>>>(s: S) -> Value {
        Value::String(s.into())
    }

    pub fn keyword<S: Into<Rc<str>>>(s: S) -> Value {
        Value::Keyword(s.into())
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(items))
    }

    pub fn map(items: BTreeMap<MapKey, Value>) -> Value {
        Value::Map(Rc::new(items))
    }

    /// Like `Display`, but strings render as their raw content instead of quoted reader syntax.
    /// Used by `str`/`join`/`println` where the point is human text, not re-readable code.
    pub fn to_string_display(&self) -> String {
        match self {
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    /// Projects a `Value` onto `serde_json::Value` for the `Step`/trace wire format (§6a). Not
    /// 1:1 with the reader syntax: keywords become `{"__keyword__": "name"}` objects, sets become
    /// arrays, and closures/builtins/regex/datetime become their `Display` string since none of
    /// those round-trip through JSON as anything richer.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(n) => json!(n),
            Value::Float(n) => json!(n),
            Value::String(s) => json!(s.as_ref()),
            Value::Keyword(k) => json!({ "__keyword__": k.as_ref() }),
            Value::Vector(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m.iter() {
                    let key = match k {
                        MapKey::Keyword(s) | MapKey::String(s) => s.to_string(),
                        MapKey::Int(n) => n.to_string(),
                        MapKey::Bool(b) => b.to_string(),
                    };
                    obj.insert(key, v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::Set(s) => serde_json::Value::Array(s.iter().map(Value::to_json).collect()),
            Value::Closure(_) | Value::BuiltIn(_) | Value::Regex(_) | Value::Predicate(_) => json!(self.to_string()),
            Value::DateTime(dt) => json!(dt.to_rfc3339()),
            Value::Date(d) => json!(d.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total ordering so `Value` can live inside a `BTreeSet`. Cross-type comparisons are ordered by
/// a fixed type-rank, not meaningful for user-visible sorting (see `runtime::collections::sort`).
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Nil => 0,
                Value::Bool(_) => 1,
                Value::Int(_) => 2,
                Value::Float(_) => 3,
                Value::String(_) => 4,
                Value::Keyword(_) => 5,
                Value::Vector(_) => 6,
                Value::Map(_) => 7,
                Value::Set(_) => 8,
                Value::DateTime(_) => 9,
                Value::Date(_) => 10,
                Value::Closure(_) | Value::BuiltIn(_) | Value::Regex(_) | Value::Predicate(_) => 11,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Keyword(a), Value::Keyword(b)) => a.cmp(b),
            (Value::Vector(a), Value::Vector(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => {
                if n.is_infinite() {
                    write!(f, "{}", if *n > 0.0 { "##Inf" } else { "##-Inf" })
                } else if n.is_nan() {
                    write!(f, "##NaN")
                } else if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            Value::String(s) => write!(f, "{s:?}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{k} {v}")?;
                }
                write!(f, "}}")
            }
            Value::Set(s) => {
                write!(f, "#{{")?;
                for (i, v) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
            Value::Closure(c) => write!(f, "#<closure{}>", c.name.as_deref().map(|n| format!(":{n}")).unwrap_or_default()),
            Value::BuiltIn(_) => write!(f, "#<builtin>"),
            Value::Regex(r) => write!(f, "#\"{}\"", r.as_str()),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Predicate(_) => write!(f, "#<predicate>"),
        }
    }
}

/// Raw AST: the Parser's output. No desugaring, no validation beyond structural well-formedness.
#[derive(Debug, Clone, PartialEq)]
pub enum RawExpr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    StringLit(String),
    KeywordLit(String),
    Symbol(String),
    NsSymbol(String, String),
    List(Vec<RawExpr>),
    Vector(Vec<RawExpr>),
    Map(Vec<(RawExpr, RawExpr)>),
    Set(Vec<RawExpr>),
    ShortFn(Box<RawExpr>),
}

/// `where` comparison operators (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOp {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Includes,
    In,
    Truthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredKind {
    AllOf,
    AnyOf,
    NoneOf,
}

/// Core AST: the Analyzer's output. Every desugarable form has been rewritten away.
#[derive(Debug, Clone)]
pub enum CoreExpr {
    Literal(Value),
    Var(String),
    Ctx(String),
    Memory(String),
    Vector(Vec<CoreExpr>),
    Map(Vec<(CoreExpr, CoreExpr)>),
    Set(Vec<CoreExpr>),
    If(Box<CoreExpr>, Box<CoreExpr>, Box<CoreExpr>),
    Let(Vec<(Pattern, CoreExpr)>, Vec<CoreExpr>),
    Fn { params: Vec<Pattern>, rest: Option<String>, body: Vec<CoreExpr>, name: Option<String> },
    And(Vec<CoreExpr>),
    Or(Vec<CoreExpr>),
    Where(Vec<String>, WhereOp, Box<CoreExpr>),
    PredCombinator(PredKind, Vec<CoreExpr>),
    CallTool(String, Box<CoreExpr>),
    Call(Box<CoreExpr>, Vec<CoreExpr>),
    Def(String, Box<CoreExpr>),
    Do(Vec<CoreExpr>),
    Quote(Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_reader_syntax() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::keyword("active").to_string(), ":active");
    }

    #[test]
    fn map_display_is_key_sorted() {
        let mut m = BTreeMap::new();
        m.insert(MapKey::Keyword("b".into()), Value::Int(2));
        m.insert(MapKey::Keyword("a".into()), Value::Int(1));
        assert_eq!(Value::map(m).to_string(), "{:a 1 :b 2}");
    }

    #[test]
    fn equality_is_type_distinguishing() {
        assert_ne!(Value::Int(2), Value::Float(2.0));
        assert_eq!(Value::Int(2), Value::Int(2));
    }

    #[test]
    fn map_equality_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert(MapKey::Keyword("x".into()), Value::Int(1));
        a.insert(MapKey::Keyword("y".into()), Value::Int(2));
        let mut b = BTreeMap::new();
        b.insert(MapKey::Keyword("y".into()), Value::Int(2));
        b.insert(MapKey::Keyword("x".into()), Value::Int(1));
        assert_eq!(Value::map(a), Value::map(b));
    }
}
