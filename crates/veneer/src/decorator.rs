//! Decorator factory.
//!
//! [`decorator`] turns one interception function into a reusable decorator.
//! Applying the decorator to a callable produces a
//! [`FunctionWrapper`](crate::value::Kind::Wrapper) whose binding state is
//! inferred from the target's shape at decoration time, so the interception
//! function always receives a pre-bound `wrapped` and the enclosing `instance`
//! separately, regardless of how the callable was defined or accessed.

use std::{fmt, rc::Rc};

use crate::{
    args::CallArgs,
    exception::RunResult,
    machine::Machine,
    types::WrapperFn,
    value::Value,
};

/// Builds a reusable decorator from an interception function.
///
/// The interception function receives `(machine, wrapped, instance, args)`:
/// `wrapped` is the ready-to-call target (already bound when the decorated
/// callable was fetched through an instance or class), `instance` is the
/// enclosing instance or class (`Value::None` for free functions and static
/// methods), and `args` carries only the caller-supplied arguments.
pub fn decorator<F>(wrapper: F) -> DecoratorBuilder
where
    F: Fn(&mut Machine, Value, Value, CallArgs) -> RunResult<Value> + 'static,
{
    DecoratorBuilder {
        wrapper: Rc::new(wrapper),
    }
}

/// A reusable decorator: applies one interception function to any number of
/// callables.
#[derive(Clone)]
pub struct DecoratorBuilder {
    wrapper: WrapperFn,
}

impl DecoratorBuilder {
    /// Wraps `target` in a callable wrapper carrying this decorator's
    /// interception function.
    ///
    /// Binding state is inferred from the target's shape here, at decoration
    /// time; an uninferable shape fails immediately with a
    /// `BindingInferenceError` rather than at first call.
    pub fn apply(&self, machine: &mut Machine, target: Value) -> RunResult<Value> {
        let (instance, bound_type) = machine.infer_decoration(target)?;
        machine.new_wrapper(target, Rc::clone(&self.wrapper), instance, bound_type, None)
    }
}

impl fmt::Debug for DecoratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorBuilder").finish_non_exhaustive()
    }
}
