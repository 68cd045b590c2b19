// ABOUTME: Lexically scoped environment chain; each frame maps name -> Value with a parent
// pointer. `Def` walks to the outermost user frame so top-level defs never shadow the builtin
// root itself, only each other.

use crate::error::EvalError;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct Environment {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Environment>>,
    is_builtin_root: bool,
}

impl Environment {
    /// The root frame, seeded once with the runtime library. Never holds user `def`s.
    pub fn new_builtin_root() -> Rc<Self> {
        Rc::new(Environment { bindings: RefCell::new(HashMap::new()), parent: None, is_builtin_root: true })
    }

    /// Creates a new child environment with a parent.
    pub fn with_parent(parent: &Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment { bindings: RefCell::new(HashMap::new()), parent: Some(Rc::clone(parent)), is_builtin_root: false })
    }

    /// Defines a binding in THIS scope (doesn't walk the parent chain).
    pub fn define(&self, name: String, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    /// Looks up a symbol in this scope and parent scopes recursively.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), EvalError> {
        if self.bindings.borrow().contains_key(name) {
            self.bindings.borrow_mut().insert(name.to_string(), value);
            return Ok(());
        }
        if let Some(ref parent) = self.parent {
            return parent.set(name, value);
        }
        Err(EvalError::unbound_var(name))
    }

    /// `(def name value)` target: the outermost frame that is not the builtin root.
    pub fn define_global(self: &Rc<Self>, name: String, value: Value) {
        let mut node = Rc::clone(self);
        loop {
            let stop = match &node.parent {
                None => true,
                Some(p) if p.is_builtin_root => true,
                _ => false,
            };
            if stop {
                break;
            }
            node = Rc::clone(node.parent.as_ref().unwrap());
        }
        node.define(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get() {
        let env = Environment::new_builtin_root();
        env.define("x".to_string(), Value::Int(42));
        assert_eq!(env.get("x"), Some(Value::Int(42)));
    }

    #[test]
    fn undefined_symbol() {
        let env = Environment::new_builtin_root();
        assert!(env.get("undefined").is_none());
    }

    #[test]
    fn shadowing() {
        let parent = Environment::new_builtin_root();
        parent.define("x".to_string(), Value::Int(42));
        let child = Environment::with_parent(&parent);
        child.define("x".to_string(), Value::Int(100));
        assert_eq!(child.get("x"), Some(Value::Int(100)));
    }

    #[test]
    fn parent_lookup() {
        let parent = Environment::new_builtin_root();
        parent.define("x".to_string(), Value::Int(42));
        let child = Environment::with_parent(&parent);
        assert_eq!(child.get("x"), Some(Value::Int(42)));
    }

    #[test]
    fn multiple_levels() {
        let grandparent = Environment::new_builtin_root();
        grandparent.define("a".to_string(), Value::Int(1));
        let parent = Environment::with_parent(&grandparent);
        parent.define("b".to_string(), Value::Int(2));
        let child = Environment::with_parent(&parent);
        child.define("c".to_string(), Value::Int(3));

        assert_eq!(child.get("a"), Some(Value::Int(1)));
        assert_eq!(child.get("b"), Some(Value::Int(2)));
        assert_eq!(child.get("c"), Some(Value::Int(3)));
    }

    #[test]
    fn define_global_targets_outermost_user_frame() {
        let builtins = Environment::new_builtin_root();
        let user_top = Environment::with_parent(&builtins);
        let call_frame = Environment::with_parent(&user_top);

        call_frame.define_global("x".to_string(), Value::Int(7));

        assert!(user_top.get("x").is_some());
        assert!(builtins.bindings.borrow().get("x").is_none());
    }
}
