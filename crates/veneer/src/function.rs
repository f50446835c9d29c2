use std::{fmt, rc::Rc};

use crate::{args::CallArgs, exception::RunResult, machine::Machine, value::Value};

/// Host closure type backing a runtime function.
///
/// Functions receive the machine so they can perform further runtime
/// operations (calls, attribute access, allocation) while executing.
pub type NativeFn = Rc<dyn Fn(&mut Machine, CallArgs) -> RunResult<Value>>;

/// A callable defined by the host.
///
/// This is the runtime's "plain function" shape: storing one on a class makes
/// it an instance method (bound on access), wrapping it in a
/// classmethod/staticmethod marker changes its binding, and decorating it
/// produces a [`FunctionWrapper`](crate::types::FunctionWrapper) around it.
#[derive(Clone)]
pub(crate) struct NativeFunction {
    name: String,
    func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: &str, func: NativeFn) -> Self {
        Self {
            name: name.to_owned(),
            func,
        }
    }

    /// The function name (used for error messages and repr).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> &NativeFn {
        &self.func
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
