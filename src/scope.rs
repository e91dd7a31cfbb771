// ABOUTME: Lexical scope as a singly-linked chain of one binding per node

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::EvalError;
use crate::import::Searchable;
use crate::value::Value;

/// Regular bindings and macro bindings live in two parallel namespaces;
/// lookups only ever search one of them depending on where the name is used.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VarKind {
    Regular,
    Macro,
}

/// The four words the language reserves outright: rebinding any of them, in
/// any scope or namespace, is fatal at definition time. Distinct from the
/// special-form keywords in `special_forms.rs`, which user code may shadow
/// locally.
pub const RESERVED_WORDS: &[&str] = &["currentScope", "true", "false", "unit"];

/// Checked at every binding site (lambda parameters, `let`/`macro` names,
/// `import` aliases) before the name is ever extended into a scope.
pub fn check_not_reserved(name: &str) -> Result<(), EvalError> {
    if RESERVED_WORDS.contains(&name) {
        Err(EvalError::ReservedKeyword(name.to_string()))
    } else {
        Ok(())
    }
}

struct ScopeNode {
    name: String,
    // A cell rather than a plain Value so a self-recursive `let` binding can
    // be created as a placeholder, closed over by the value expression it
    // names, and patched to the real value once that expression finishes
    // evaluating (see `extend_regular_placeholder`/`resolve_placeholder`).
    value: RefCell<Value>,
    kind: VarKind,
    file: Rc<dyn Searchable>,
    parent: Option<Scope>,
}

/// A lexical scope. Cloning is a pointer bump: every extension allocates a
/// new node and keeps the old scope, matching the source's
/// `addScopedRegularValue`/`addScopedMacroValue` single-insert API rather
/// than a mutable binding-map.
#[derive(Clone)]
pub struct Scope(Rc<ScopeNode>);

impl Scope {
    /// The empty scope at the root of a file, before any bindings are added.
    pub fn root(file: Rc<dyn Searchable>) -> Scope {
        Scope(Rc::new(ScopeNode {
            name: String::new(),
            value: RefCell::new(Value::Unit),
            kind: VarKind::Regular,
            file,
            parent: None,
        }))
    }

    pub fn file(&self) -> Rc<dyn Searchable> {
        Rc::clone(&self.0.file)
    }

    pub fn extend_regular(&self, name: impl Into<String>, value: Value) -> Scope {
        Scope(Rc::new(ScopeNode {
            name: name.into(),
            value: RefCell::new(value),
            kind: VarKind::Regular,
            file: self.file(),
            parent: Some(self.clone()),
        }))
    }

    pub fn extend_macro(&self, name: impl Into<String>, value: Value) -> Scope {
        Scope(Rc::new(ScopeNode {
            name: name.into(),
            value: RefCell::new(value),
            kind: VarKind::Macro,
            file: self.file(),
            parent: Some(self.clone()),
        }))
    }

    /// Extends scope with a Regular binding of `name` to a placeholder,
    /// patched later via `resolve_placeholder` once its real value is known.
    /// This is what lets a `let`-bound lambda close over its own name: the
    /// lambda's closure is this scope, shared (not copied) with the one the
    /// caller patches, so a lookup made after patching sees the real value
    /// even though the closure was captured before it existed.
    pub fn extend_regular_placeholder(&self, name: impl Into<String>) -> Scope {
        self.extend_regular(name, Value::Unit)
    }

    /// Patches the binding this exact scope was extended with, in place.
    /// Only meaningful on a scope returned by `extend_regular_placeholder`:
    /// every clone of it (and anything built with it as a closure) observes
    /// the new value immediately, since they all share the same `Rc<ScopeNode>`.
    pub fn resolve_placeholder(&self, value: Value) {
        *self.0.value.borrow_mut() = value;
    }

    /// Walks the chain looking for the nearest binding of `name` in the
    /// requested namespace. Shadowing is resolved by nearest-wins, since the
    /// walk starts at `self` and only recurses into `parent`.
    pub fn lookup(&self, name: &str, kind: VarKind) -> Option<Value> {
        let mut node = self;
        loop {
            if node.0.kind == kind && node.0.name == name {
                return Some(node.0.value.borrow().clone());
            }
            match &node.0.parent {
                Some(parent) => node = parent,
                None => return None,
            }
        }
    }

    pub fn get_regular(&self, name: &str) -> Option<Value> {
        self.lookup(name, VarKind::Regular)
    }

    pub fn get_macro(&self, name: &str) -> Option<Value> {
        self.lookup(name, VarKind::Macro)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::Folder;

    fn root() -> Scope {
        let file: Rc<dyn Searchable> = Rc::new(Folder::new("root"));
        Scope::root(file)
    }

    #[test]
    fn each_reserved_word_is_rejected() {
        for word in RESERVED_WORDS {
            assert!(matches!(check_not_reserved(word), Err(EvalError::ReservedKeyword(_))));
        }
    }

    #[test]
    fn an_ordinary_name_is_accepted() {
        assert!(check_not_reserved("loop").is_ok());
    }

    #[test]
    fn resolving_a_placeholder_is_visible_through_every_clone() {
        let base = root();
        let extended = base.extend_regular_placeholder("loop");
        let alias = extended.clone();
        extended.resolve_placeholder(Value::Number(42.0));
        match alias.get_regular("loop") {
            Some(Value::Number(n)) => assert_eq!(n, 42.0),
            other => panic!("expected the patched value through the clone, got {other:?}"),
        }
    }
}
