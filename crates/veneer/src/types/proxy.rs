use indexmap::IndexMap;

use crate::value::Value;

/// Attribute names with this prefix belong to the wrapper's private extension
/// namespace and are never forwarded to the target.
pub(crate) const EXTENSION_PREFIX: &str = "_self_";

/// Returns true when an attribute name addresses the extension namespace.
pub(crate) fn is_extension_attr(name: &str) -> bool {
    name.starts_with(EXTENSION_PREFIX)
}

/// A transparent object proxy.
///
/// Holds exactly one reference to the wrapped target plus a private extension
/// namespace for wrapper-owned state. All structural behavior is forwarded to
/// the target by the machine; the only interceptions are `__wrapped__`, the
/// `_self_*` namespace, type-identity masquerade, and repr.
#[derive(Debug, Clone)]
pub(crate) struct ObjectProxy {
    target: Value,
    vars: IndexMap<String, Value>,
}

impl ObjectProxy {
    pub fn new(target: Value) -> Self {
        Self {
            target,
            vars: IndexMap::new(),
        }
    }

    /// The wrapped target.
    pub fn target(&self) -> Value {
        self.target
    }

    pub fn var(&self, name: &str) -> Option<Value> {
        self.vars.get(name).copied()
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_owned(), value);
    }

    pub fn del_var(&mut self, name: &str) -> bool {
        self.vars.shift_remove(name).is_some()
    }
}
