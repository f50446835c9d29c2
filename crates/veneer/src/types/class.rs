use indexmap::IndexMap;

use crate::{heap::HeapId, value::Value};

// ============================================================================
// Class Object
// ============================================================================

/// A user-defined class: a named attribute namespace with an optional base.
///
/// Attribute lookup walks the base chain linearly. Functions stored in the
/// namespace become instance methods (bound on access); classmethod and
/// staticmethod markers change that binding, and decorated callables
/// re-derive their binding on every access.
#[derive(Debug, Clone)]
pub(crate) struct ClassObject {
    name: String,
    base: Option<HeapId>,
    namespace: IndexMap<String, Value>,
}

impl ClassObject {
    pub fn new(name: &str, base: Option<HeapId>) -> Self {
        Self {
            name: name.to_owned(),
            base,
            namespace: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<HeapId> {
        self.base
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.namespace.get(name).copied()
    }

    pub fn set_attr(&mut self, name: &str, value: Value) {
        self.namespace.insert(name.to_owned(), value);
    }

    pub fn del_attr(&mut self, name: &str) -> bool {
        self.namespace.shift_remove(name).is_some()
    }
}

// ============================================================================
// Instance
// ============================================================================

/// An instance of a user-defined class.
///
/// Instance attributes shadow class attributes; values read from the instance
/// dictionary are returned as stored, without binding.
#[derive(Debug, Clone)]
pub(crate) struct Instance {
    class_id: HeapId,
    attrs: IndexMap<String, Value>,
}

impl Instance {
    pub fn new(class_id: HeapId) -> Self {
        Self {
            class_id,
            attrs: IndexMap::new(),
        }
    }

    pub fn class_id(&self) -> HeapId {
        self.class_id
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.attrs.get(name).copied()
    }

    pub fn set_attr(&mut self, name: &str, value: Value) {
        self.attrs.insert(name.to_owned(), value);
    }

    pub fn del_attr(&mut self, name: &str) -> bool {
        self.attrs.shift_remove(name).is_some()
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, Value)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

// ============================================================================
// Bound Method
// ============================================================================

/// A bound method created from attribute access on an instance or classmethod.
///
/// Bound methods bundle the underlying function together with the bound `self`
/// (or `cls`) value; calling one injects that value as the implicit first
/// argument.
#[derive(Debug, Clone)]
pub(crate) struct BoundMethod {
    func: Value,
    self_arg: Value,
}

impl BoundMethod {
    pub fn new(func: Value, self_arg: Value) -> Self {
        Self { func, self_arg }
    }

    pub fn func(&self) -> Value {
        self.func
    }

    pub fn self_arg(&self) -> Value {
        self.self_arg
    }
}

// ============================================================================
// ClassMethod / StaticMethod Markers
// ============================================================================

/// A classmethod marker around a function.
///
/// When accessed on a class or instance, the class itself is injected as the
/// implicit first argument.
#[derive(Debug, Clone)]
pub(crate) struct ClassMethod {
    func: Value,
}

impl ClassMethod {
    pub fn new(func: Value) -> Self {
        Self { func }
    }

    pub fn func(&self) -> Value {
        self.func
    }
}

/// A staticmethod marker around a function.
///
/// When accessed on a class or instance, the wrapped function is returned
/// directly without binding; no implicit first argument is ever injected.
#[derive(Debug, Clone)]
pub(crate) struct StaticMethod {
    func: Value,
}

impl StaticMethod {
    pub fn new(func: Value) -> Self {
        Self { func }
    }

    pub fn func(&self) -> Value {
        self.func
    }
}
