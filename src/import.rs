// ABOUTME: Minimal import resolution: an in-memory tree of named, loadable values

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::EvalError;
use crate::value::Value;

/// Something `import` can resolve a dotted path down to. The production
/// system layers folders, lisp packages and host packages with lazy
/// compilation and a primary/fallback library chain; this reference
/// implementation only needs enough of that shape to exercise `import`
/// itself and the circular-import error path, so it collapses the
/// hierarchy to two kinds: `Leaf` (a pre-built value) and `Container`
/// (a named grouping of further `Searchable`s).
pub trait Searchable: fmt::Debug {
    fn name(&self) -> &str;

    /// Resolve one path segment to a child, if this node is a container.
    fn child(&self, segment: &str) -> Option<Rc<dyn Searchable>>;

    /// The value this node resolves to, if it is a leaf.
    fn value(&self) -> Option<Value>;
}

#[derive(Debug)]
pub struct Leaf {
    name: String,
    value: Value,
}

impl Leaf {
    pub fn new(name: impl Into<String>, value: Value) -> Rc<Leaf> {
        Rc::new(Leaf {
            name: name.into(),
            value,
        })
    }
}

impl Searchable for Leaf {
    fn name(&self) -> &str {
        &self.name
    }

    fn child(&self, _segment: &str) -> Option<Rc<dyn Searchable>> {
        None
    }

    fn value(&self) -> Option<Value> {
        Some(self.value.clone())
    }
}

#[derive(Debug)]
pub struct Folder {
    name: String,
    children: HashMap<String, Rc<dyn Searchable>>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Folder {
        Folder {
            name: name.into(),
            children: HashMap::new(),
        }
    }

    pub fn with_child(mut self, child: Rc<dyn Searchable>) -> Folder {
        self.children.insert(child.name().to_string(), child);
        self
    }
}

impl Searchable for Folder {
    fn name(&self) -> &str {
        &self.name
    }

    fn child(&self, segment: &str) -> Option<Rc<dyn Searchable>> {
        self.children.get(segment).cloned()
    }

    fn value(&self) -> Option<Value> {
        None
    }
}

/// Resolves dotted import paths against a root `Searchable` and tracks which
/// leaves are currently mid-load, so a leaf that (directly or transitively)
/// imports itself is reported rather than recursing forever.
pub struct Importer {
    root: Rc<dyn Searchable>,
    in_progress: RefCell<Vec<String>>,
}

impl Importer {
    pub fn new(root: Rc<dyn Searchable>) -> Importer {
        Importer {
            root,
            in_progress: RefCell::new(Vec::new()),
        }
    }

    fn resolve(&self, path: &str) -> Result<Rc<dyn Searchable>, EvalError> {
        let mut node = Rc::clone(&self.root);
        for segment in path.split('.') {
            node = node
                .child(segment)
                .ok_or_else(|| EvalError::ImportNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    /// Resolves `path` and returns its value, failing if `path` is already
    /// being loaded higher up the current import chain.
    pub fn load(&self, path: &str) -> Result<Value, EvalError> {
        if self.in_progress.borrow().iter().any(|p| p == path) {
            return Err(EvalError::CircularImport(path.to_string()));
        }
        let node = self.resolve(path)?;
        let value = node
            .value()
            .ok_or_else(|| EvalError::ImportNotFound(path.to_string()))?;
        self.in_progress.borrow_mut().push(path.to_string());
        Ok(value)
    }

    /// Marks `path` as finished loading so later, unrelated imports of the
    /// same path don't spuriously look circular.
    pub fn finish(&self, path: &str) {
        self.in_progress.borrow_mut().retain(|p| p != path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Rc<dyn Searchable> {
        Rc::new(
            Folder::new("root")
                .with_child(Leaf::new("a", Value::Number(1.0)))
                .with_child(Rc::new(
                    Folder::new("nested").with_child(Leaf::new("b", Value::Number(2.0))),
                )),
        )
    }

    #[test]
    fn resolves_a_dotted_path_to_its_value() {
        let importer = Importer::new(tree());
        match importer.load("nested.b").unwrap() {
            Value::Number(n) => assert_eq!(n, 2.0),
            _ => panic!("expected a number"),
        }
    }

    #[test]
    fn unknown_path_is_not_found() {
        let importer = Importer::new(tree());
        assert!(matches!(
            importer.load("missing"),
            Err(EvalError::ImportNotFound(_))
        ));
    }

    #[test]
    fn reentering_a_path_still_in_progress_is_circular() {
        let importer = Importer::new(tree());
        importer.load("a").unwrap();
        assert!(matches!(
            importer.load("a"),
            Err(EvalError::CircularImport(_))
        ));
        importer.finish("a");
        assert!(importer.load("a").is_ok());
    }
}
