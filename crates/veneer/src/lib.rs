//! Transparent object proxies and binding-aware callable wrappers.
//!
//! The crate hosts a small dynamic object runtime, the [`Machine`], whose
//! values can be wrapped without changing how they look to the rest of the
//! program:
//!
//! - [`Machine::new_proxy`] wraps any value in a transparent proxy that
//!   forwards every structural operation (attributes, items, arithmetic,
//!   comparison, iteration, truthiness, repr) to its target, while keeping a
//!   private `_self_*` namespace and exposing the target via `__wrapped__`.
//! - [`decorator`] builds decorators from a single interception function.
//!   Decorated callables re-derive their binding every time they are fetched
//!   as a member, so the interception function always receives the wrapped
//!   callable already bound, the enclosing instance, and the caller's
//!   arguments as three separate things.
//! - [`Machine::new_weak_proxy`] wraps a heap object without keeping it
//!   alive; operations after the target's release fail with a
//!   `TargetExpiredError`.
//! - [`synchronized`] is a decorator that serializes calls through a
//!   process-global registry of reentrant locks keyed by object identity.
//!
//! ```
//! use veneer::{decorator, CallArgs, Machine, Value};
//!
//! let mut machine = Machine::new();
//! let add = machine.function("add", |_, args| {
//!     let (a, b) = args.get_two("add")?;
//!     match (a, b) {
//!         (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x + y)),
//!         _ => Ok(Value::None),
//!     }
//! })?;
//!
//! let passthrough = decorator(|machine, wrapped, _instance, args| {
//!     machine.call(wrapped, args)
//! });
//! let wrapped = passthrough.apply(&mut machine, add)?;
//!
//! let result = machine.call(wrapped, CallArgs::two(Value::Int(2), Value::Int(3)))?;
//! assert_eq!(result, Value::Int(5));
//! # Ok::<(), veneer::RunError>(())
//! ```

pub mod args;
pub mod decorator;
pub mod exception;
pub mod function;
pub mod heap;
pub mod machine;
pub mod resource;
pub mod sync;
pub mod tracer;
pub mod types;
pub mod value;

pub use args::CallArgs;
pub use decorator::{DecoratorBuilder, decorator};
pub use exception::{ErrorKind, RunError, RunResult};
pub use function::NativeFn;
pub use heap::HeapId;
pub use machine::{BinOp, CmpOp, Machine, WRAPPED_ATTR, WrapperInfo};
pub use resource::{DEFAULT_MAX_CALL_DEPTH, ResourceLimits};
pub use sync::{lock_for_key, synchronized};
pub use tracer::{MachineTracer, NoopTracer, RecordingTracer, TraceEvent};
pub use types::{BoundType, WrapperFn};
pub use value::{Kind, Value};
