//! Minimal weak-proxy support.
//!
//! A `WeakProxy` behaves like an object proxy but does not keep its target
//! alive. Forwarded operations after the target slot has been released fail
//! synchronously with a `TargetExpiredError` at the point of dereference.

use crate::{
    exception::{ErrorKind, RunError},
    heap::HeapId,
};

/// A non-owning proxy over a heap object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WeakProxy {
    target: HeapId,
}

impl WeakProxy {
    pub fn new(target: HeapId) -> Self {
        Self { target }
    }

    /// The referenced heap ID; liveness must be checked on every dereference.
    pub fn target(&self) -> HeapId {
        self.target
    }
}

/// Creates the error used when a weak proxy's target is dead.
pub(crate) fn target_expired_error() -> RunError {
    ErrorKind::TargetExpired.msg("weakly-referenced object no longer exists")
}
