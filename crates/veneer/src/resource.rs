use crate::exception::{ErrorKind, RunResult};

/// Default maximum call depth when no explicit limit is configured.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Resource limits applied by a [`Machine`](crate::Machine).
///
/// Allocation is checked when a heap slot is created; call depth is checked on
/// every call entry, before any work happens, so runaway recursion (for example
/// a wrapper function that re-enters itself) fails fast with a `RecursionError`
/// instead of exhausting the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of live heap objects, or `None` for unlimited.
    pub max_objects: Option<usize>,
    /// Maximum nested call depth.
    pub max_call_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_objects: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl ResourceLimits {
    /// Checks that one more live object may be allocated.
    pub(crate) fn check_objects(&self, live: usize) -> RunResult<()> {
        match self.max_objects {
            Some(max) if live >= max => {
                Err(ErrorKind::MemoryError.msg(format!("object limit of {max} exceeded")))
            }
            _ => Ok(()),
        }
    }

    /// Checks that one more call frame may be entered.
    pub(crate) fn check_call_depth(&self, depth: usize) -> RunResult<()> {
        if depth >= self.max_call_depth {
            Err(ErrorKind::RecursionError.msg("maximum call depth exceeded"))
        } else {
            Ok(())
        }
    }
}
