/// Structured runtime object types.
///
/// Each module defines one heap-allocated object shape together with its
/// data-level operations; heap-spanning behavior (attribute resolution, call
/// dispatch, binding re-derivation) lives on [`Machine`](crate::Machine).
pub mod class;
pub mod dict;
pub mod list;
pub mod proxy;
pub mod weakref;
pub mod wrapper;

pub(crate) use class::{BoundMethod, ClassMethod, ClassObject, Instance, StaticMethod};
pub(crate) use dict::Dict;
pub(crate) use list::List;
pub(crate) use proxy::{ObjectProxy, is_extension_attr};
pub(crate) use weakref::{WeakProxy, target_expired_error};
pub(crate) use wrapper::FunctionWrapper;

pub use wrapper::{BoundType, WrapperFn};
