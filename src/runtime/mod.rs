//! Runtime library: built-in functions, one category per module, each exposing a plain
//! `pub fn register(env: &Rc<Environment>)`. [`register_all`] calls each in turn to populate a
//! builtin-root [`Environment`] before any user or agent code runs.

use crate::env::Environment;
use std::rc::Rc;

pub mod aggregation;
pub mod arithmetic;
pub mod collections;
pub mod comparison;
pub mod control;
pub mod io;
pub mod journal;
pub mod maps;
pub mod memory;
pub mod parallel;
pub mod predicates;
pub mod sets;
pub mod strings;

pub fn register_all(env: &Rc<Environment>) {
    arithmetic::register(env);
    comparison::register(env);
    predicates::register(env);
    collections::register(env);
    sets::register(env);
    maps::register(env);
    strings::register(env);
    aggregation::register(env);
    io::register(env);
    parallel::register(env);
    memory::register(env);
    journal::register(env);
    control::register(env);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_populates_a_representative_builtin_from_each_category() {
        let root = Environment::new_builtin_root();
        register_all(&root);
        for name in [
            "+", "rem", "=", "map", "get", "assoc", "str", "re-pattern", "split", "sum-by", "contains?", "union", "set",
            "println", "pmap", "memory/get", "task", "return", "coll?",
        ] {
            assert!(root.get(name).is_some(), "expected builtin `{name}` to be registered");
        }
    }
}
