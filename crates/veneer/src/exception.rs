use std::fmt::{self, Display};

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Kind;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Error categories raised by the runtime.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the conventional error-class
/// name (e.g., `TargetExpired` -> "TargetExpiredError").
///
/// Errors produced by a forwarded operation keep whatever kind the underlying
/// operation raised; the proxy layer never remaps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Operation applied to a value of an unsupported shape, including calling
    /// a wrapper whose target is not invocable.
    TypeError,
    /// Attribute read/write/delete on a name the object does not have.
    AttributeError,
    /// Missing dictionary key.
    KeyError,
    /// Sequence index out of range.
    IndexError,
    ValueError,
    ZeroDivisionError,
    OverflowError,
    /// Call depth exceeded the configured limit.
    RecursionError,
    /// Live-object count exceeded the configured limit.
    MemoryError,
    /// A weakly referenced target's lifetime has ended.
    #[strum(serialize = "TargetExpiredError")]
    TargetExpired,
    /// The decorator factory could not determine a binding shape for a target.
    /// Raised at decoration or derivation time, never deferred to call time.
    #[strum(serialize = "BindingInferenceError")]
    BindingInference,
}

/// A runtime error: an [`ErrorKind`] plus a human-readable message.
///
/// Every error is a normal return-path failure; nothing here is fatal to the
/// process. Errors from delegated operations surface to the immediate caller
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    kind: ErrorKind,
    message: String,
}

impl RunError {
    /// Creates an error of the given kind with a message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RunError {}

impl ErrorKind {
    /// Creates an error of this kind with a message.
    #[must_use]
    pub fn msg(self, message: impl Into<String>) -> RunError {
        RunError::new(self, message)
    }

    /// Attribute lookup failure for the given object kind.
    pub(crate) fn attribute_error(kind: Kind, name: &str) -> RunError {
        RunError::new(
            Self::AttributeError,
            format!("'{kind}' object has no attribute '{name}'"),
        )
    }

    /// Invocation of a value that is not callable.
    pub(crate) fn not_callable(kind: Kind) -> RunError {
        RunError::new(Self::TypeError, format!("'{kind}' object is not callable"))
    }

    /// Binding inference failure for a target of the given kind.
    pub(crate) fn binding_inference(kind: Kind) -> RunError {
        RunError::new(
            Self::BindingInference,
            format!("cannot infer a binding shape for '{kind}' target"),
        )
    }

    /// Subscript access on a value that does not support it.
    pub(crate) fn not_subscriptable(kind: Kind) -> RunError {
        RunError::new(Self::TypeError, format!("'{kind}' object is not subscriptable"))
    }

    /// Unsupported binary operand combination.
    pub(crate) fn unsupported_operands(op: &str, lhs: Kind, rhs: Kind) -> RunError {
        RunError::new(
            Self::TypeError,
            format!("unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'"),
        )
    }
}
