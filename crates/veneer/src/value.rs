use strum::{Display, EnumString, IntoStaticStr};

use crate::heap::HeapId;

/// Primary value type representing runtime objects.
///
/// This enum uses a hybrid design: small immediate values (`None`, `Bool`, `Int`,
/// `Float`) are stored inline, while structured values (strings, containers,
/// classes, functions, proxies, wrappers) live in the arena and are referenced
/// via `Ref(HeapId)`.
///
/// `Value` is `Copy`: the arena owns all structured data, so a value is either
/// an immediate or a slot handle. Equality on `Value` is identity equality for
/// `Ref`s; use [`Machine::eq`](crate::Machine::eq) for structural equality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// The absent/null singleton.
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Reference to a heap-allocated object.
    Ref(HeapId),
}

impl Value {
    /// Returns true when this is the `None` singleton.
    #[must_use]
    pub fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the heap ID when this is a reference value.
    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// Truthiness for immediate values; `None` for heap references, whose
    /// truthiness depends on the referenced object.
    #[must_use]
    pub(crate) fn immediate_truthy(self) -> Option<bool> {
        match self {
            Self::None => Some(false),
            Self::Bool(b) => Some(b),
            Self::Int(i) => Some(i != 0),
            Self::Float(f) => Some(f != 0.0),
            Self::Ref(_) => None,
        }
    }

    /// Numeric view for arithmetic and comparison, treating `Bool` as 0/1.
    #[must_use]
    pub(crate) fn as_number(self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(b))),
            Self::Int(i) => Some(Number::Int(i)),
            Self::Float(f) => Some(Number::Float(f)),
            _ => None,
        }
    }
}

/// Numeric view used by the arithmetic and comparison paths.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Runtime type tags for values.
///
/// The string representation follows conventional dynamic-runtime type names,
/// so error messages read naturally (e.g., "'int' object is not callable").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum Kind {
    #[strum(serialize = "NoneType")]
    None,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "method")]
    BoundMethod,
    #[strum(serialize = "classmethod")]
    ClassMethod,
    #[strum(serialize = "staticmethod")]
    StaticMethod,
    #[strum(serialize = "type")]
    Class,
    #[strum(serialize = "object")]
    Instance,
    /// Transparent object proxy.
    #[strum(serialize = "ObjectProxy")]
    Proxy,
    /// Top-level callable wrapper created by decoration.
    #[strum(serialize = "FunctionWrapper")]
    Wrapper,
    /// Callable wrapper derived by member access (carries a parent reference).
    #[strum(serialize = "BoundFunctionWrapper")]
    BoundWrapper,
    #[strum(serialize = "WeakProxy")]
    WeakProxy,
}

impl Kind {
    /// Returns true for the proxy lineage: every wrapper type that forwards to
    /// a target while masquerading as it.
    #[must_use]
    pub fn is_proxy(self) -> bool {
        matches!(self, Self::Proxy | Self::Wrapper | Self::BoundWrapper | Self::WeakProxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_truthiness() {
        assert_eq!(Value::None.immediate_truthy(), Some(false));
        assert_eq!(Value::Bool(true).immediate_truthy(), Some(true));
        assert_eq!(Value::Int(0).immediate_truthy(), Some(false));
        assert_eq!(Value::Float(0.5).immediate_truthy(), Some(true));
    }

    #[test]
    fn kind_names() {
        assert_eq!(Kind::Str.to_string(), "str");
        assert_eq!(Kind::Proxy.to_string(), "ObjectProxy");
        assert_eq!(Kind::BoundWrapper.to_string(), "BoundFunctionWrapper");
    }

    #[test]
    fn proxy_lineage() {
        assert!(Kind::Proxy.is_proxy());
        assert!(Kind::BoundWrapper.is_proxy());
        assert!(!Kind::Instance.is_proxy());
    }
}
