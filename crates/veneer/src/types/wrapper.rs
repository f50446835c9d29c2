use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{args::CallArgs, exception::RunResult, heap::HeapId, machine::Machine, value::Value};

/// Host interception function invoked on every call through a wrapper.
///
/// Receives `(machine, wrapped, instance, args)` and is fully responsible for
/// deciding whether and how to invoke `wrapped`. The `wrapped` value is
/// already bound, so `args` only ever carries user-supplied arguments; the
/// enclosing instance (or class, for classmethods) arrives via `instance`,
/// which is `Value::None` for free functions and static methods.
pub type WrapperFn = Rc<dyn Fn(&mut Machine, Value, Value, CallArgs) -> RunResult<Value>>;

/// How a wrapped callable was bound at wrap (or derivation) time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum BoundType {
    /// A free function, or a method accessed on the class rather than an
    /// instance. Also the shape of a decorated class (calling it constructs
    /// instances through the wrapper function).
    #[strum(serialize = "function")]
    Function,
    /// A method bound to an enclosing instance.
    #[strum(serialize = "instancemethod")]
    BoundMethod,
    /// A classmethod; the enclosing "instance" is the class itself.
    #[strum(serialize = "classmethod")]
    ClassMethod,
    /// A staticmethod; never carries an enclosing instance and never receives
    /// an implicit first argument.
    #[strum(serialize = "staticmethod")]
    StaticMethod,
}

/// A callable wrapper: a transparent proxy that intercepts invocation and
/// tracks how its target is bound.
///
/// Created once by decoration (`parent` absent), and re-created with fresh
/// binding state every time it is fetched as a member of a class or instance
/// (`parent` then references the wrapper the access went through). The
/// interception function is shared across all wrappers derived from one
/// decoration.
#[derive(Clone)]
pub(crate) struct FunctionWrapper {
    target: Value,
    wrapper: WrapperFn,
    instance: Value,
    bound_type: BoundType,
    /// Non-owning back-reference to the wrapper this one was derived from.
    /// Used for introspection only, never for forwarding.
    parent: Option<HeapId>,
    vars: IndexMap<String, Value>,
}

impl FunctionWrapper {
    pub fn new(
        target: Value,
        wrapper: WrapperFn,
        instance: Value,
        bound_type: BoundType,
        parent: Option<HeapId>,
    ) -> Self {
        Self {
            target,
            wrapper,
            instance,
            bound_type,
            parent,
            vars: IndexMap::new(),
        }
    }

    pub fn target(&self) -> Value {
        self.target
    }

    pub fn wrapper(&self) -> &WrapperFn {
        &self.wrapper
    }

    pub fn instance(&self) -> Value {
        self.instance
    }

    pub fn bound_type(&self) -> BoundType {
        self.bound_type
    }

    pub fn parent(&self) -> Option<HeapId> {
        self.parent
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

impl fmt::Debug for FunctionWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionWrapper")
            .field("target", &self.target)
            .field("instance", &self.instance)
            .field("bound_type", &self.bound_type)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}
