use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    rc::Rc,
};

use ahash::{AHashMap, AHashSet};
use strum::{Display, IntoStaticStr};

use crate::{
    args::CallArgs,
    exception::{ErrorKind, RunResult},
    function::{NativeFn, NativeFunction},
    heap::{Heap, HeapData, HeapId},
    resource::ResourceLimits,
    tracer::{MachineTracer, NoopTracer},
    types::{
        BoundMethod, BoundType, ClassMethod, ClassObject, Dict, FunctionWrapper, Instance, List,
        ObjectProxy, StaticMethod, WeakProxy, WrapperFn, is_extension_attr, target_expired_error,
    },
    value::{Kind, Number, Value},
};

/// Attribute name that always yields the wrapped target of a proxy or wrapper.
pub const WRAPPED_ATTR: &str = "__wrapped__";

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum CmpOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
}

/// Introspection view of a callable wrapper's binding state.
#[derive(Clone)]
pub struct WrapperInfo {
    /// How the wrapped callable was bound at wrap time.
    pub bound_type: BoundType,
    /// The enclosing instance (or class for classmethods), `Value::None` when absent.
    pub instance: Value,
    /// The wrapper this one was derived from; `None` for top-level decorations.
    pub parent: Option<Value>,
    /// The shared interception function.
    pub wrapper: WrapperFn,
}

/// How a class attribute is being accessed, for binding purposes.
#[derive(Debug, Clone, Copy)]
enum Accessor {
    Instance { instance: Value, class: Value },
    Class { class: Value },
}

impl Accessor {
    fn class(self) -> Value {
        match self {
            Self::Instance { class, .. } | Self::Class { class } => class,
        }
    }
}

/// Read-phase result of attribute resolution, applied after heap borrows end.
enum AttrStep {
    Value(Value),
    Tag(&'static str),
    Owned(String),
    Forward(Value),
    Weak(HeapId),
    Missing(Kind),
    InstanceLookup { class_id: HeapId },
    ClassLookup { class_id: HeapId },
    Expired,
}

/// Write-phase plan for attribute assignment/deletion.
enum SetStep {
    Extension,
    Local,
    Forward(Value),
    Weak(HeapId),
    Reject(Kind),
}

/// The runtime: owns the heap and implements every structural operation.
///
/// The machine's attribute-resolution path is the member-lookup machinery:
/// fetching a callable wrapper as a member of a class or instance re-derives a
/// freshly bound wrapper here, exactly as ordinary functions are freshly bound
/// on each access.
pub struct Machine {
    heap: Heap,
    tracer: Box<dyn MachineTracer>,
    limits: ResourceLimits,
    call_depth: usize,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Creates a machine with default resource limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::default())
    }

    /// Creates a machine with explicit resource limits.
    #[must_use]
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            heap: Heap::new(limits),
            tracer: Box::new(NoopTracer),
            limits,
            call_depth: 0,
        }
    }

    /// Installs a tracer, replacing the previous one.
    pub fn set_tracer(&mut self, tracer: Box<dyn MachineTracer>) {
        self.tracer = tracer;
    }

    /// Number of live heap objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.heap.live_objects()
    }

    // ========================================================================
    // Value construction
    // ========================================================================

    /// Allocates a string value.
    pub fn str_value(&mut self, content: &str) -> RunResult<Value> {
        self.alloc(HeapData::Str(content.to_owned()))
    }

    /// Allocates a list value.
    pub fn list_value(&mut self, items: Vec<Value>) -> RunResult<Value> {
        self.alloc(HeapData::List(List::new(items)))
    }

    /// Allocates an empty dict value.
    pub fn dict_value(&mut self) -> RunResult<Value> {
        self.alloc(HeapData::Dict(Dict::new()))
    }

    /// Allocates a function backed by a host closure.
    pub fn function<F>(&mut self, name: &str, func: F) -> RunResult<Value>
    where
        F: Fn(&mut Self, CallArgs) -> RunResult<Value> + 'static,
    {
        let func: NativeFn = Rc::new(func);
        self.alloc(HeapData::Function(NativeFunction::new(name, func)))
    }

    /// Wraps a callable in a classmethod marker.
    pub fn classmethod(&mut self, func: Value) -> RunResult<Value> {
        self.alloc(HeapData::ClassMethod(ClassMethod::new(func)))
    }

    /// Wraps a callable in a staticmethod marker.
    pub fn staticmethod(&mut self, func: Value) -> RunResult<Value> {
        self.alloc(HeapData::StaticMethod(StaticMethod::new(func)))
    }

    /// Creates a class with no base.
    pub fn new_class(&mut self, name: &str) -> RunResult<Value> {
        self.alloc(HeapData::Class(ClassObject::new(name, None)))
    }

    /// Creates a class deriving from `base`.
    pub fn new_class_with_base(&mut self, name: &str, base: Value) -> RunResult<Value> {
        let base_id = self.expect_class_id(base)?;
        self.alloc(HeapData::Class(ClassObject::new(name, Some(base_id))))
    }

    /// Sets an attribute in a class namespace.
    pub fn set_class_attr(&mut self, class: Value, name: &str, value: Value) -> RunResult<()> {
        let id = self.expect_class_id(class)?;
        match self.heap.live_mut(id)? {
            HeapData::Class(cls) => {
                cls.set_attr(name, value);
                Ok(())
            }
            _ => Err(ErrorKind::TypeError.msg("expected a class")),
        }
    }

    /// Wraps any value in a transparent proxy.
    pub fn new_proxy(&mut self, target: Value) -> RunResult<Value> {
        self.alloc(HeapData::Proxy(ObjectProxy::new(target)))
    }

    /// Wraps a heap object in a weak proxy that does not keep it alive.
    pub fn new_weak_proxy(&mut self, target: Value) -> RunResult<Value> {
        let Some(id) = target.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "cannot create weak proxy to '{}' object",
                self.kind_of(target)?
            )));
        };
        self.heap.live(id)?;
        self.alloc(HeapData::WeakProxy(WeakProxy::new(id)))
    }

    /// Allocates a callable wrapper. Used by the decorator factory.
    pub(crate) fn new_wrapper(
        &mut self,
        target: Value,
        wrapper: WrapperFn,
        instance: Value,
        bound_type: BoundType,
        parent: Option<HeapId>,
    ) -> RunResult<Value> {
        self.alloc(HeapData::Wrapper(FunctionWrapper::new(
            target, wrapper, instance, bound_type, parent,
        )))
    }

    fn alloc(&mut self, data: HeapData) -> RunResult<Value> {
        self.heap.allocate(data).map(Value::Ref)
    }

    // ========================================================================
    // Identity and type queries
    // ========================================================================

    /// Returns the value's own type tag. Proxies report their proxy lineage
    /// here; use [`Machine::target_kind`] for the masqueraded tag.
    pub fn kind_of(&self, value: Value) -> RunResult<Kind> {
        match value {
            Value::None => Ok(Kind::None),
            Value::Bool(_) => Ok(Kind::Bool),
            Value::Int(_) => Ok(Kind::Int),
            Value::Float(_) => Ok(Kind::Float),
            Value::Ref(id) => Ok(self.heap.live(id)?.kind()),
        }
    }

    /// Returns the type tag of the value with all proxy layers resolved.
    pub fn target_kind(&self, value: Value) -> RunResult<Kind> {
        let resolved = self.resolve_operand(value)?;
        self.kind_of(resolved)
    }

    /// Reports whether `value` is an instance of the given class, resolving
    /// proxy layers so a proxy masquerades as its target's type.
    pub fn is_instance(&self, value: Value, class: Value) -> RunResult<bool> {
        let class_id = self.expect_class_id(class)?;
        let resolved = self.resolve_operand(value)?;
        let Some(id) = resolved.ref_id() else {
            return Ok(false);
        };
        let HeapData::Instance(inst) = self.heap.live(id)? else {
            return Ok(false);
        };
        let mut current = Some(inst.class_id());
        while let Some(cid) = current {
            if cid == class_id {
                return Ok(true);
            }
            current = match self.heap.live(cid)? {
                HeapData::Class(cls) => cls.base(),
                _ => None,
            };
        }
        Ok(false)
    }

    /// Stable identity token for a value.
    ///
    /// Heap objects use their allocation token (process-unique, never reused);
    /// immediates use a deterministic encoding of their payload.
    pub fn identity(&self, value: Value) -> RunResult<u64> {
        if let Value::Ref(id) = value {
            return self.heap.token(id).ok_or_else(target_expired_error);
        }
        let mut hasher = DefaultHasher::new();
        match value {
            Value::None => 0u8.hash(&mut hasher),
            Value::Bool(b) => (1u8, b).hash(&mut hasher),
            Value::Int(i) => (2u8, i).hash(&mut hasher),
            Value::Float(f) => (3u8, f.to_bits()).hash(&mut hasher),
            Value::Ref(_) => {}
        }
        Ok(hasher.finish())
    }

    /// Ends a heap object's lifetime, returning whether the slot was live.
    ///
    /// Weak proxies over the released object observe the expiry; strong access
    /// through stale references fails with a `TargetExpiredError`.
    pub fn release(&mut self, value: Value) -> bool {
        value.ref_id().is_some_and(|id| self.heap.release(id))
    }

    // ========================================================================
    // Proxy surface
    // ========================================================================

    /// Returns the wrapped target of a proxy, wrapper, or weak proxy.
    pub fn unwrap(&self, value: Value) -> RunResult<Value> {
        let Some(id) = value.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "'{}' object is not a proxy",
                self.kind_of(value)?
            )));
        };
        match self.heap.live(id)? {
            HeapData::Proxy(p) => Ok(p.target()),
            HeapData::Wrapper(w) => Ok(w.target()),
            HeapData::WeakProxy(wp) => {
                let target = wp.target();
                if self.heap.get_if_live(target).is_some() {
                    Ok(Value::Ref(target))
                } else {
                    Err(target_expired_error())
                }
            }
            other => Err(ErrorKind::TypeError.msg(format!(
                "'{}' object is not a proxy",
                other.kind()
            ))),
        }
    }

    /// Unwraps nested proxy layers down to the base target.
    pub fn unwrap_all(&self, value: Value) -> RunResult<Value> {
        self.resolve_operand(value)
    }

    /// Introspects a callable wrapper's binding state.
    pub fn wrapper_info(&self, value: Value) -> RunResult<WrapperInfo> {
        let Some(id) = value.ref_id() else {
            return Err(ErrorKind::TypeError.msg("not a function wrapper"));
        };
        match self.heap.live(id)? {
            HeapData::Wrapper(w) => Ok(WrapperInfo {
                bound_type: w.bound_type(),
                instance: w.instance(),
                parent: w.parent().map(Value::Ref),
                wrapper: w.wrapper().clone(),
            }),
            other => Err(ErrorKind::TypeError.msg(format!(
                "'{}' object is not a function wrapper",
                other.kind()
            ))),
        }
    }

    /// Resolves proxy layers (proxy, wrapper, live weak proxy) to the value
    /// they ultimately forward to.
    fn resolve_operand(&self, value: Value) -> RunResult<Value> {
        let mut current = value;
        loop {
            let Some(id) = current.ref_id() else {
                return Ok(current);
            };
            current = match self.heap.live(id)? {
                HeapData::Proxy(p) => p.target(),
                HeapData::Wrapper(w) => w.target(),
                HeapData::WeakProxy(wp) => {
                    let target = wp.target();
                    if self.heap.get_if_live(target).is_some() {
                        Value::Ref(target)
                    } else {
                        return Err(target_expired_error());
                    }
                }
                _ => return Ok(current),
            };
        }
    }

    // ========================================================================
    // Attribute protocol
    // ========================================================================

    /// Reads an attribute, performing binding on class-attribute access and
    /// transparent forwarding through proxy layers.
    pub fn getattr(&mut self, obj: Value, name: &str) -> RunResult<Value> {
        let Some(id) = obj.ref_id() else {
            return Err(ErrorKind::attribute_error(self.kind_of(obj)?, name));
        };
        let step = match self.heap.live(id)? {
            HeapData::Proxy(p) => {
                if name == WRAPPED_ATTR {
                    AttrStep::Value(p.target())
                } else if is_extension_attr(name) {
                    match p.var(name) {
                        Some(v) => AttrStep::Value(v),
                        None => AttrStep::Missing(Kind::Proxy),
                    }
                } else {
                    AttrStep::Forward(p.target())
                }
            }
            HeapData::Wrapper(w) => {
                let own_kind = if w.parent().is_some() { Kind::BoundWrapper } else { Kind::Wrapper };
                match name {
                    WRAPPED_ATTR => AttrStep::Value(w.target()),
                    "_self_instance" => AttrStep::Value(w.instance()),
                    "_self_parent" => AttrStep::Value(w.parent().map_or(Value::None, Value::Ref)),
                    "_self_bound_type" => AttrStep::Tag(w.bound_type().into()),
                    _ if is_extension_attr(name) => match w.var(name) {
                        Some(v) => AttrStep::Value(v),
                        None => AttrStep::Missing(own_kind),
                    },
                    _ => AttrStep::Forward(w.target()),
                }
            }
            HeapData::WeakProxy(wp) => {
                let target = wp.target();
                if self.heap.get_if_live(target).is_none() {
                    AttrStep::Expired
                } else if name == WRAPPED_ATTR {
                    AttrStep::Value(Value::Ref(target))
                } else {
                    AttrStep::Weak(target)
                }
            }
            HeapData::Instance(inst) => {
                if name == "__class__" {
                    AttrStep::Value(Value::Ref(inst.class_id()))
                } else if let Some(v) = inst.attr(name) {
                    AttrStep::Value(v)
                } else {
                    AttrStep::InstanceLookup {
                        class_id: inst.class_id(),
                    }
                }
            }
            HeapData::Class(cls) => {
                if name == "__name__" {
                    AttrStep::Owned(cls.name().to_owned())
                } else {
                    AttrStep::ClassLookup { class_id: id }
                }
            }
            HeapData::BoundMethod(bm) => match name {
                "__self__" => AttrStep::Value(bm.self_arg()),
                "__func__" => AttrStep::Value(bm.func()),
                _ => AttrStep::Missing(Kind::BoundMethod),
            },
            HeapData::ClassMethod(cm) => match name {
                "__func__" => AttrStep::Value(cm.func()),
                _ => AttrStep::Missing(Kind::ClassMethod),
            },
            HeapData::StaticMethod(sm) => match name {
                "__func__" => AttrStep::Value(sm.func()),
                _ => AttrStep::Missing(Kind::StaticMethod),
            },
            HeapData::Function(f) => match name {
                "__name__" => AttrStep::Owned(f.name().to_owned()),
                _ => AttrStep::Missing(Kind::Function),
            },
            other => AttrStep::Missing(other.kind()),
        };

        match step {
            AttrStep::Value(v) => Ok(v),
            AttrStep::Tag(tag) => self.str_value(tag),
            AttrStep::Owned(s) => self.str_value(&s),
            AttrStep::Forward(target) => self.getattr(target, name),
            AttrStep::Weak(target) => self.getattr(Value::Ref(target), name),
            AttrStep::Missing(kind) => Err(ErrorKind::attribute_error(kind, name)),
            AttrStep::Expired => Err(target_expired_error()),
            AttrStep::InstanceLookup { class_id } => {
                match self.lookup_class_chain(class_id, name)? {
                    Some(v) => self.bind_class_attr(
                        v,
                        Accessor::Instance {
                            instance: obj,
                            class: Value::Ref(class_id),
                        },
                    ),
                    None => {
                        let class_name = self.class_name(class_id)?;
                        Err(ErrorKind::AttributeError.msg(format!(
                            "'{class_name}' object has no attribute '{name}'"
                        )))
                    }
                }
            }
            AttrStep::ClassLookup { class_id } => {
                match self.lookup_class_chain(class_id, name)? {
                    Some(v) => self.bind_class_attr(
                        v,
                        Accessor::Class {
                            class: Value::Ref(class_id),
                        },
                    ),
                    None => {
                        let class_name = self.class_name(class_id)?;
                        Err(ErrorKind::AttributeError.msg(format!(
                            "type object '{class_name}' has no attribute '{name}'"
                        )))
                    }
                }
            }
        }
    }

    /// Writes an attribute. `_self_*` names on proxies and wrappers mutate the
    /// private extension namespace; everything else delegates to the target.
    pub fn setattr(&mut self, obj: Value, name: &str, value: Value) -> RunResult<()> {
        let Some(id) = obj.ref_id() else {
            return Err(ErrorKind::attribute_error(self.kind_of(obj)?, name));
        };
        let step = match self.heap.live(id)? {
            HeapData::Proxy(_) | HeapData::Wrapper(_) if is_extension_attr(name) => SetStep::Extension,
            HeapData::Proxy(p) => SetStep::Forward(p.target()),
            HeapData::Wrapper(w) => SetStep::Forward(w.target()),
            HeapData::WeakProxy(wp) => SetStep::Weak(wp.target()),
            HeapData::Instance(_) | HeapData::Class(_) => SetStep::Local,
            other => SetStep::Reject(other.kind()),
        };
        match step {
            SetStep::Extension => {
                match self.heap.live_mut(id)? {
                    HeapData::Proxy(p) => p.set_var(name, value),
                    HeapData::Wrapper(w) => w.set_var(name, value),
                    _ => {}
                }
                Ok(())
            }
            SetStep::Local => {
                match self.heap.live_mut(id)? {
                    HeapData::Instance(inst) => inst.set_attr(name, value),
                    HeapData::Class(cls) => cls.set_attr(name, value),
                    _ => {}
                }
                Ok(())
            }
            SetStep::Forward(target) => self.setattr(target, name, value),
            SetStep::Weak(target) => {
                if self.heap.get_if_live(target).is_some() {
                    self.setattr(Value::Ref(target), name, value)
                } else {
                    Err(target_expired_error())
                }
            }
            SetStep::Reject(kind) => Err(ErrorKind::TypeError.msg(format!(
                "'{kind}' object does not support attribute assignment"
            ))),
        }
    }

    /// Deletes an attribute, with the same interception rules as [`Machine::setattr`].
    pub fn delattr(&mut self, obj: Value, name: &str) -> RunResult<()> {
        let Some(id) = obj.ref_id() else {
            return Err(ErrorKind::attribute_error(self.kind_of(obj)?, name));
        };
        let step = match self.heap.live(id)? {
            HeapData::Proxy(_) | HeapData::Wrapper(_) if is_extension_attr(name) => SetStep::Extension,
            HeapData::Proxy(p) => SetStep::Forward(p.target()),
            HeapData::Wrapper(w) => SetStep::Forward(w.target()),
            HeapData::WeakProxy(wp) => SetStep::Weak(wp.target()),
            HeapData::Instance(_) | HeapData::Class(_) => SetStep::Local,
            other => SetStep::Reject(other.kind()),
        };
        match step {
            SetStep::Extension => {
                let removed = match self.heap.live_mut(id)? {
                    HeapData::Proxy(p) => p.del_var(name),
                    HeapData::Wrapper(w) => w.del_var(name),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(ErrorKind::attribute_error(self.kind_of(obj)?, name))
                }
            }
            SetStep::Local => {
                let removed = match self.heap.live_mut(id)? {
                    HeapData::Instance(inst) => inst.del_attr(name),
                    HeapData::Class(cls) => cls.del_attr(name),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(ErrorKind::attribute_error(self.kind_of(obj)?, name))
                }
            }
            SetStep::Forward(target) => self.delattr(target, name),
            SetStep::Weak(target) => {
                if self.heap.get_if_live(target).is_some() {
                    self.delattr(Value::Ref(target), name)
                } else {
                    Err(target_expired_error())
                }
            }
            SetStep::Reject(kind) => Err(ErrorKind::TypeError.msg(format!(
                "'{kind}' object does not support attribute deletion"
            ))),
        }
    }

    /// Walks the class base chain for an attribute.
    fn lookup_class_chain(&self, class_id: HeapId, name: &str) -> RunResult<Option<Value>> {
        let mut current = Some(class_id);
        while let Some(cid) = current {
            match self.heap.live(cid)? {
                HeapData::Class(cls) => {
                    if let Some(v) = cls.attr(name) {
                        return Ok(Some(v));
                    }
                    current = cls.base();
                }
                _ => break,
            }
        }
        Ok(None)
    }

    fn class_name(&self, class_id: HeapId) -> RunResult<String> {
        match self.heap.live(class_id)? {
            HeapData::Class(cls) => Ok(cls.name().to_owned()),
            other => Ok(other.kind().to_string()),
        }
    }

    fn expect_class_id(&self, class: Value) -> RunResult<HeapId> {
        let Some(id) = class.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "expected a class, not '{}'",
                self.kind_of(class)?
            )));
        };
        match self.heap.live(id)? {
            HeapData::Class(_) => Ok(id),
            other => Err(ErrorKind::TypeError.msg(format!(
                "expected a class, not '{}'",
                other.kind()
            ))),
        }
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Binds a value found in a class namespace for the given access path.
    ///
    /// Plain functions bind to the accessing instance, classmethods bind to
    /// the class, staticmethods unwrap, and callable wrappers re-derive.
    fn bind_class_attr(&mut self, value: Value, accessor: Accessor) -> RunResult<Value> {
        let Some(id) = value.ref_id() else {
            return Ok(value);
        };
        enum Plan {
            AsIs,
            BindInstance,
            BindClass(Value),
            Unwrapped(Value),
            Derive,
        }
        let plan = match self.heap.live(id)? {
            HeapData::Function(_) | HeapData::Proxy(_) | HeapData::WeakProxy(_) => match accessor {
                Accessor::Instance { .. } => Plan::BindInstance,
                Accessor::Class { .. } => Plan::AsIs,
            },
            HeapData::ClassMethod(cm) => Plan::BindClass(cm.func()),
            HeapData::StaticMethod(sm) => Plan::Unwrapped(sm.func()),
            HeapData::Wrapper(_) => Plan::Derive,
            _ => Plan::AsIs,
        };
        match plan {
            Plan::AsIs => Ok(value),
            Plan::BindInstance => {
                let Accessor::Instance { instance, .. } = accessor else {
                    return Ok(value);
                };
                self.alloc(HeapData::BoundMethod(BoundMethod::new(value, instance)))
            }
            Plan::BindClass(func) => {
                let class = accessor.class();
                self.alloc(HeapData::BoundMethod(BoundMethod::new(func, class)))
            }
            Plan::Unwrapped(func) => Ok(func),
            Plan::Derive => self.derive_wrapper(id, accessor),
        }
    }

    /// Produces a freshly bound wrapper for member access on `wrapper_id`.
    ///
    /// The interception function is carried over unchanged and the new wrapper
    /// records the access path: the bound instance (or class), the bound type,
    /// and a parent reference to the wrapper the access went through.
    fn derive_wrapper(&mut self, wrapper_id: HeapId, accessor: Accessor) -> RunResult<Value> {
        let (target, wrapper_fn) = match self.heap.live(wrapper_id)? {
            HeapData::Wrapper(w) => (w.target(), w.wrapper().clone()),
            other => {
                return Err(ErrorKind::TypeError.msg(format!(
                    "cannot derive binding through '{}' object",
                    other.kind()
                )));
            }
        };
        let (new_target, instance, bound_type) = self.derive_binding(target, accessor)?;
        self.tracer.derive(bound_type);
        self.new_wrapper(new_target, wrapper_fn, instance, bound_type, Some(wrapper_id))
    }

    /// Computes the bound target, enclosing instance, and bound type for a
    /// wrapped callable fetched through the given access path.
    fn derive_binding(
        &mut self,
        target: Value,
        accessor: Accessor,
    ) -> RunResult<(Value, Value, BoundType)> {
        let Some(id) = target.ref_id() else {
            return Err(ErrorKind::binding_inference(self.kind_of(target)?));
        };
        enum Shape {
            Callable,
            ClassMethod(Value),
            StaticMethod(Value),
            Nested,
            Bound(Value),
            Class,
            Other(Kind),
        }
        let shape = match self.heap.live(id)? {
            HeapData::Function(_) | HeapData::Proxy(_) | HeapData::WeakProxy(_) => Shape::Callable,
            HeapData::ClassMethod(cm) => Shape::ClassMethod(cm.func()),
            HeapData::StaticMethod(sm) => Shape::StaticMethod(sm.func()),
            HeapData::Wrapper(_) => Shape::Nested,
            HeapData::BoundMethod(bm) => Shape::Bound(bm.self_arg()),
            HeapData::Class(_) => Shape::Class,
            other => Shape::Other(other.kind()),
        };
        match shape {
            Shape::Callable => match accessor {
                Accessor::Instance { instance, .. } => {
                    let bound = self.alloc(HeapData::BoundMethod(BoundMethod::new(target, instance)))?;
                    Ok((bound, instance, BoundType::BoundMethod))
                }
                Accessor::Class { .. } => Ok((target, Value::None, BoundType::Function)),
            },
            Shape::ClassMethod(func) => {
                let class = accessor.class();
                let bound = self.alloc(HeapData::BoundMethod(BoundMethod::new(func, class)))?;
                Ok((bound, class, BoundType::ClassMethod))
            }
            Shape::StaticMethod(func) => Ok((func, Value::None, BoundType::StaticMethod)),
            Shape::Nested => {
                // Stacked decoration: bind the inner wrapper first so the
                // outer wrapper reports exactly what the inner marker would.
                let derived = self.derive_wrapper(id, accessor)?;
                let info = self.wrapper_info(derived)?;
                Ok((derived, info.instance, info.bound_type))
            }
            Shape::Bound(self_arg) => Ok((target, self_arg, BoundType::BoundMethod)),
            Shape::Class => Ok((target, Value::None, BoundType::Function)),
            Shape::Other(kind) => Err(ErrorKind::binding_inference(kind)),
        }
    }

    /// Infers decoration-time binding state from a target's shape.
    ///
    /// Returns `(instance, bound_type)`. Fails with `BindingInferenceError`
    /// for shapes that cannot carry a binding, at decoration time rather than
    /// call time.
    pub(crate) fn infer_decoration(&self, target: Value) -> RunResult<(Value, BoundType)> {
        let Some(id) = target.ref_id() else {
            return Err(ErrorKind::binding_inference(self.kind_of(target)?));
        };
        match self.heap.live(id)? {
            HeapData::Function(_) | HeapData::Class(_) => Ok((Value::None, BoundType::Function)),
            HeapData::BoundMethod(bm) => Ok((bm.self_arg(), BoundType::BoundMethod)),
            HeapData::ClassMethod(_) => Ok((Value::None, BoundType::ClassMethod)),
            HeapData::StaticMethod(_) => Ok((Value::None, BoundType::StaticMethod)),
            HeapData::Wrapper(w) => Ok((w.instance(), w.bound_type())),
            HeapData::Proxy(p) => {
                let inner = p.target();
                self.infer_decoration(inner)
            }
            HeapData::WeakProxy(wp) => {
                let target_id = wp.target();
                if self.heap.get_if_live(target_id).is_some() {
                    self.infer_decoration(Value::Ref(target_id))
                } else {
                    Err(target_expired_error())
                }
            }
            other => Err(ErrorKind::binding_inference(other.kind())),
        }
    }

    // ========================================================================
    // Call protocol
    // ========================================================================

    /// Invokes a callable value.
    pub fn call(&mut self, callee: Value, args: CallArgs) -> RunResult<Value> {
        self.limits.check_call_depth(self.call_depth)?;
        self.call_depth += 1;
        let result = self.call_inner(callee, args);
        self.call_depth -= 1;
        result
    }

    fn call_inner(&mut self, callee: Value, args: CallArgs) -> RunResult<Value> {
        let Some(id) = callee.ref_id() else {
            return Err(ErrorKind::not_callable(self.kind_of(callee)?));
        };
        enum CallPlan {
            Native(String, NativeFn),
            Bound(Value, Value),
            Construct(HeapId),
            Wrapped(Value, WrapperFn, Value, BoundType),
            Forward(Value),
            Weak(HeapId),
            Reject(Kind),
        }
        let plan = match self.heap.live(id)? {
            HeapData::Function(f) => CallPlan::Native(f.name().to_owned(), f.func().clone()),
            HeapData::BoundMethod(bm) => CallPlan::Bound(bm.func(), bm.self_arg()),
            HeapData::Class(_) => CallPlan::Construct(id),
            HeapData::Wrapper(w) => {
                CallPlan::Wrapped(w.target(), w.wrapper().clone(), w.instance(), w.bound_type())
            }
            HeapData::Proxy(p) => CallPlan::Forward(p.target()),
            HeapData::WeakProxy(wp) => CallPlan::Weak(wp.target()),
            other => CallPlan::Reject(other.kind()),
        };
        match plan {
            CallPlan::Native(name, func) => {
                self.tracer.call(&name);
                func(self, args)
            }
            CallPlan::Bound(func, self_arg) => {
                let mut args = args;
                args.prepend(self_arg);
                self.call_inner(func, args)
            }
            CallPlan::Construct(class_id) => self.instantiate(class_id, args),
            CallPlan::Wrapped(target, wrapper_fn, instance, bound_type) => {
                if !self.is_callable(target)? {
                    return Err(ErrorKind::not_callable(self.target_kind(target)?));
                }
                self.tracer.wrapper_call(bound_type);
                wrapper_fn(self, target, instance, args)
            }
            CallPlan::Forward(target) => self.call_inner(target, args),
            CallPlan::Weak(target) => {
                if self.heap.get_if_live(target).is_some() {
                    self.call_inner(Value::Ref(target), args)
                } else {
                    Err(target_expired_error())
                }
            }
            CallPlan::Reject(kind) => Err(ErrorKind::not_callable(kind)),
        }
    }

    /// Reports whether a value can be invoked, resolving proxy layers.
    ///
    /// A dead weak target reports callable so the expiry surfaces from the
    /// actual call rather than masquerading as a type error.
    pub fn is_callable(&self, value: Value) -> RunResult<bool> {
        let Some(id) = value.ref_id() else {
            return Ok(false);
        };
        match self.heap.live(id)? {
            HeapData::Function(_) | HeapData::BoundMethod(_) | HeapData::Class(_) => Ok(true),
            HeapData::Wrapper(w) => self.is_callable(w.target()),
            HeapData::Proxy(p) => self.is_callable(p.target()),
            HeapData::WeakProxy(wp) => {
                let target = wp.target();
                if self.heap.get_if_live(target).is_some() {
                    self.is_callable(Value::Ref(target))
                } else {
                    Ok(true)
                }
            }
            _ => Ok(false),
        }
    }

    fn instantiate(&mut self, class_id: HeapId, args: CallArgs) -> RunResult<Value> {
        let instance = self.alloc(HeapData::Instance(Instance::new(class_id)))?;
        match self.lookup_class_chain(class_id, "__init__")? {
            Some(init) => {
                let bound = self.bind_class_attr(
                    init,
                    Accessor::Instance {
                        instance,
                        class: Value::Ref(class_id),
                    },
                )?;
                self.call(bound, args)?;
            }
            None => {
                if !args.is_empty() {
                    let name = self.class_name(class_id)?;
                    return Err(ErrorKind::TypeError.msg(format!("{name}() takes no arguments")));
                }
            }
        }
        Ok(instance)
    }

    /// Looks up an attribute and calls it, with direct dispatch for builtin
    /// container methods.
    pub fn call_method(&mut self, obj: Value, name: &str, args: CallArgs) -> RunResult<Value> {
        if let Some(id) = obj.ref_id() {
            enum MethodPlan {
                List,
                Dict,
                Str,
                Forward(Value),
                Weak(HeapId),
                Attr,
            }
            let plan = match self.heap.live(id)? {
                HeapData::List(_) => MethodPlan::List,
                HeapData::Dict(_) => MethodPlan::Dict,
                HeapData::Str(_) => MethodPlan::Str,
                HeapData::Proxy(p) if !is_extension_attr(name) && name != WRAPPED_ATTR => {
                    MethodPlan::Forward(p.target())
                }
                HeapData::WeakProxy(wp) => MethodPlan::Weak(wp.target()),
                _ => MethodPlan::Attr,
            };
            match plan {
                MethodPlan::List => return self.call_list_method(id, name, args),
                MethodPlan::Dict => return self.call_dict_method(id, name, args),
                MethodPlan::Str => return self.call_str_method(id, name, args),
                MethodPlan::Forward(target) => return self.call_method(target, name, args),
                MethodPlan::Weak(target) => {
                    return if self.heap.get_if_live(target).is_some() {
                        self.call_method(Value::Ref(target), name, args)
                    } else {
                        Err(target_expired_error())
                    };
                }
                MethodPlan::Attr => {}
            }
        }
        let func = self.getattr(obj, name)?;
        self.call(func, args)
    }

    // ========================================================================
    // Builtin container methods
    // ========================================================================

    fn call_list_method(&mut self, id: HeapId, name: &str, args: CallArgs) -> RunResult<Value> {
        match name {
            "append" => {
                let value = args.get_one("append")?;
                if let HeapData::List(list) = self.heap.live_mut(id)? {
                    list.push(value);
                }
                Ok(Value::None)
            }
            "pop" => {
                args.check_zero("pop")?;
                let popped = match self.heap.live_mut(id)? {
                    HeapData::List(list) => list.pop(),
                    _ => None,
                };
                popped.ok_or_else(|| ErrorKind::IndexError.msg("pop from empty list"))
            }
            "clear" => {
                args.check_zero("clear")?;
                if let HeapData::List(list) = self.heap.live_mut(id)? {
                    list.clear();
                }
                Ok(Value::None)
            }
            "count" => {
                let needle = args.get_one("count")?;
                let items = match self.heap.live(id)? {
                    HeapData::List(list) => list.items().to_vec(),
                    _ => Vec::new(),
                };
                let mut count = 0i64;
                for item in items {
                    if self.eq(item, needle)? {
                        count += 1;
                    }
                }
                Ok(Value::Int(count))
            }
            _ => Err(ErrorKind::attribute_error(Kind::List, name)),
        }
    }

    fn call_dict_method(&mut self, id: HeapId, name: &str, args: CallArgs) -> RunResult<Value> {
        match name {
            "get" => {
                let (key, default) = args.get_one_two("get")?;
                let key = self.expect_str_key(key)?;
                let found = match self.heap.live(id)? {
                    HeapData::Dict(dict) => dict.get(&key),
                    _ => None,
                };
                Ok(found.unwrap_or(default.unwrap_or(Value::None)))
            }
            "keys" => {
                args.check_zero("keys")?;
                let keys: Vec<String> = match self.heap.live(id)? {
                    HeapData::Dict(dict) => dict.keys().map(str::to_owned).collect(),
                    _ => Vec::new(),
                };
                let mut items = Vec::with_capacity(keys.len());
                for key in keys {
                    items.push(self.str_value(&key)?);
                }
                self.list_value(items)
            }
            "values" => {
                args.check_zero("values")?;
                let values: Vec<Value> = match self.heap.live(id)? {
                    HeapData::Dict(dict) => dict.values().collect(),
                    _ => Vec::new(),
                };
                self.list_value(values)
            }
            _ => Err(ErrorKind::attribute_error(Kind::Dict, name)),
        }
    }

    fn call_str_method(&mut self, id: HeapId, name: &str, args: CallArgs) -> RunResult<Value> {
        let content = match self.heap.live(id)? {
            HeapData::Str(s) => s.clone(),
            _ => String::new(),
        };
        match name {
            "upper" => {
                args.check_zero("upper")?;
                self.str_value(&content.to_uppercase())
            }
            "lower" => {
                args.check_zero("lower")?;
                self.str_value(&content.to_lowercase())
            }
            "startswith" => {
                let prefix = args.get_one("startswith")?;
                let prefix = self.expect_str_key(prefix)?;
                Ok(Value::Bool(content.starts_with(&prefix)))
            }
            _ => Err(ErrorKind::attribute_error(Kind::Str, name)),
        }
    }

    fn expect_str_key(&self, value: Value) -> RunResult<String> {
        let resolved = self.resolve_operand(value)?;
        match resolved.ref_id() {
            Some(id) => match self.heap.live(id)? {
                HeapData::Str(s) => Ok(s.clone()),
                other => Err(ErrorKind::TypeError.msg(format!(
                    "expected 'str', got '{}'",
                    other.kind()
                ))),
            },
            None => Err(ErrorKind::TypeError.msg(format!(
                "expected 'str', got '{}'",
                self.kind_of(resolved)?
            ))),
        }
    }

    // ========================================================================
    // Structural operations
    // ========================================================================

    /// Truthiness, forwarding through proxy layers.
    pub fn truthy(&self, value: Value) -> RunResult<bool> {
        let resolved = self.resolve_operand(value)?;
        match resolved {
            Value::Ref(id) => Ok(match self.heap.live(id)? {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::List(list) => !list.is_empty(),
                HeapData::Dict(dict) => !dict.is_empty(),
                _ => true,
            }),
            immediate => Ok(immediate.immediate_truthy().unwrap_or(true)),
        }
    }

    /// Length of a sized container, forwarding through proxy layers.
    pub fn len(&self, value: Value) -> RunResult<usize> {
        let resolved = self.resolve_operand(value)?;
        let kind = self.kind_of(resolved)?;
        if let Some(id) = resolved.ref_id() {
            match self.heap.live(id)? {
                HeapData::Str(s) => return Ok(s.chars().count()),
                HeapData::List(list) => return Ok(list.len()),
                HeapData::Dict(dict) => return Ok(dict.len()),
                _ => {}
            }
        }
        Err(ErrorKind::TypeError.msg(format!("object of type '{kind}' has no len()")))
    }

    /// Structural equality, forwarding through proxy layers.
    pub fn eq(&self, a: Value, b: Value) -> RunResult<bool> {
        self.eq_inner(a, b, 0)
    }

    fn eq_inner(&self, a: Value, b: Value, depth: usize) -> RunResult<bool> {
        self.limits.check_call_depth(depth)?;
        let a = self.resolve_operand(a)?;
        let b = self.resolve_operand(b)?;
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            return Ok(match (x, y) {
                (Number::Int(i), Number::Int(j)) => i == j,
                (x, y) => x.as_f64() == y.as_f64(),
            });
        }
        match (a, b) {
            (Value::None, Value::None) => Ok(true),
            (Value::Ref(x), Value::Ref(y)) => {
                if x == y {
                    return Ok(true);
                }
                match (self.heap.live(x)?, self.heap.live(y)?) {
                    (HeapData::Str(s1), HeapData::Str(s2)) => Ok(s1 == s2),
                    (HeapData::List(l1), HeapData::List(l2)) => {
                        if l1.len() != l2.len() {
                            return Ok(false);
                        }
                        for (&i, &j) in l1.items().iter().zip(l2.items()) {
                            if !self.eq_inner(i, j, depth + 1)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    (HeapData::Dict(d1), HeapData::Dict(d2)) => {
                        if d1.len() != d2.len() {
                            return Ok(false);
                        }
                        for (key, v1) in d1.iter() {
                            let Some(v2) = d2.get(key) else {
                                return Ok(false);
                            };
                            if !self.eq_inner(v1, v2, depth + 1)? {
                                return Ok(false);
                            }
                        }
                        Ok(true)
                    }
                    (HeapData::Function(f1), HeapData::Function(f2)) => {
                        Ok(Rc::ptr_eq(f1.func(), f2.func()))
                    }
                    (HeapData::BoundMethod(m1), HeapData::BoundMethod(m2)) => {
                        let (f1, s1) = (m1.func(), m1.self_arg());
                        let (f2, s2) = (m2.func(), m2.self_arg());
                        Ok(self.eq_inner(f1, f2, depth + 1)? && self.eq_inner(s1, s2, depth + 1)?)
                    }
                    _ => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }

    /// Ordered comparison, forwarding through proxy layers.
    pub fn compare(&self, a: Value, op: CmpOp, b: Value) -> RunResult<bool> {
        match op {
            CmpOp::Eq => return self.eq(a, b),
            CmpOp::Ne => return Ok(!self.eq(a, b)?),
            _ => {}
        }
        let ra = self.resolve_operand(a)?;
        let rb = self.resolve_operand(b)?;
        if let (Some(x), Some(y)) = (ra.as_number(), rb.as_number()) {
            let ordering = match (x, y) {
                (Number::Int(i), Number::Int(j)) => i.partial_cmp(&j),
                (x, y) => x.as_f64().partial_cmp(&y.as_f64()),
            };
            return Ok(ordering.is_some_and(|ord| match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            }));
        }
        if let (Some(x), Some(y)) = (ra.ref_id(), rb.ref_id())
            && let (HeapData::Str(s1), HeapData::Str(s2)) = (self.heap.live(x)?, self.heap.live(y)?)
        {
            let ord = s1.cmp(s2);
            return Ok(match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            });
        }
        Err(ErrorKind::TypeError.msg(format!(
            "'{op}' not supported between instances of '{}' and '{}'",
            self.kind_of(ra)?,
            self.kind_of(rb)?
        )))
    }

    /// Binary arithmetic, forwarding through proxy layers.
    pub fn binary(&mut self, a: Value, op: BinOp, b: Value) -> RunResult<Value> {
        let ra = self.resolve_operand(a)?;
        let rb = self.resolve_operand(b)?;
        if let (Some(x), Some(y)) = (ra.as_number(), rb.as_number()) {
            return numeric_binary(x, op, y);
        }
        if let (Some(x), Some(y)) = (ra.ref_id(), rb.ref_id()) {
            enum ConcatPlan {
                Str(String),
                List(Vec<Value>),
                No,
            }
            let plan = match (self.heap.live(x)?, self.heap.live(y)?, op) {
                (HeapData::Str(s1), HeapData::Str(s2), BinOp::Add) => {
                    ConcatPlan::Str(format!("{s1}{s2}"))
                }
                (HeapData::List(l1), HeapData::List(l2), BinOp::Add) => {
                    let mut items = l1.items().to_vec();
                    items.extend_from_slice(l2.items());
                    ConcatPlan::List(items)
                }
                _ => ConcatPlan::No,
            };
            match plan {
                ConcatPlan::Str(s) => return self.str_value(&s),
                ConcatPlan::List(items) => return self.list_value(items),
                ConcatPlan::No => {}
            }
        }
        Err(ErrorKind::unsupported_operands(
            op.into(),
            self.kind_of(ra)?,
            self.kind_of(rb)?,
        ))
    }

    /// Membership test, forwarding through proxy layers.
    pub fn contains(&self, container: Value, item: Value) -> RunResult<bool> {
        let container = self.resolve_operand(container)?;
        let Some(id) = container.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "argument of type '{}' is not iterable",
                self.kind_of(container)?
            )));
        };
        enum Plan {
            List(Vec<Value>),
            Str(String),
            Dict(HeapId),
            No(Kind),
        }
        let plan = match self.heap.live(id)? {
            HeapData::List(list) => Plan::List(list.items().to_vec()),
            HeapData::Str(s) => Plan::Str(s.clone()),
            HeapData::Dict(_) => Plan::Dict(id),
            other => Plan::No(other.kind()),
        };
        match plan {
            Plan::List(items) => {
                for candidate in items {
                    if self.eq(candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Plan::Str(content) => {
                let needle = self.expect_str_key(item)?;
                Ok(content.contains(&needle))
            }
            Plan::Dict(dict_id) => {
                let key = self.expect_str_key(item)?;
                match self.heap.live(dict_id)? {
                    HeapData::Dict(dict) => Ok(dict.contains_key(&key)),
                    _ => Ok(false),
                }
            }
            Plan::No(kind) => Err(ErrorKind::TypeError.msg(format!(
                "argument of type '{kind}' is not iterable"
            ))),
        }
    }

    /// Item read (`container[key]`), forwarding through proxy layers.
    pub fn get_item(&mut self, container: Value, key: Value) -> RunResult<Value> {
        let container = self.resolve_operand(container)?;
        let Some(id) = container.ref_id() else {
            return Err(ErrorKind::not_subscriptable(self.kind_of(container)?));
        };
        enum Plan {
            Found(Value),
            Char(String),
            MissingIndex,
            NotInt(Kind, Kind),
            Dict(HeapId),
            No(Kind),
        }
        let plan = match self.heap.live(id)? {
            HeapData::List(list) => match self.resolve_operand(key)? {
                Value::Int(index) => match list.get(index) {
                    Some(v) => Plan::Found(v),
                    None => Plan::MissingIndex,
                },
                other => Plan::NotInt(Kind::List, self.kind_of(other)?),
            },
            HeapData::Str(s) => match self.resolve_operand(key)? {
                Value::Int(index) => {
                    let chars: Vec<char> = s.chars().collect();
                    #[expect(clippy::cast_possible_wrap)]
                    let len = chars.len() as i64;
                    let position = if index < 0 { index + len } else { index };
                    if (0..len).contains(&position) {
                        #[expect(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                        let ch = chars[position as usize];
                        Plan::Char(ch.to_string())
                    } else {
                        Plan::MissingIndex
                    }
                }
                other => Plan::NotInt(Kind::Str, self.kind_of(other)?),
            },
            HeapData::Dict(_) => Plan::Dict(id),
            other => Plan::No(other.kind()),
        };
        match plan {
            Plan::Found(v) => Ok(v),
            Plan::Char(c) => self.str_value(&c),
            Plan::MissingIndex => Err(ErrorKind::IndexError.msg("index out of range")),
            Plan::NotInt(kind, got) => Err(ErrorKind::TypeError.msg(format!(
                "{kind} indices must be integers, not '{got}'"
            ))),
            Plan::Dict(dict_id) => {
                let key = self.expect_str_key(key)?;
                let found = match self.heap.live(dict_id)? {
                    HeapData::Dict(dict) => dict.get(&key),
                    _ => None,
                };
                found.ok_or_else(|| ErrorKind::KeyError.msg(format!("'{key}'")))
            }
            Plan::No(kind) => Err(ErrorKind::not_subscriptable(kind)),
        }
    }

    /// Item write (`container[key] = value`), forwarding through proxy layers.
    pub fn set_item(&mut self, container: Value, key: Value, value: Value) -> RunResult<()> {
        let container = self.resolve_operand(container)?;
        let Some(id) = container.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "'{}' object does not support item assignment",
                self.kind_of(container)?
            )));
        };
        let kind = self.heap.live(id)?.kind();
        match kind {
            Kind::List => {
                let Value::Int(index) = self.resolve_operand(key)? else {
                    return Err(ErrorKind::TypeError.msg("list indices must be integers"));
                };
                let ok = match self.heap.live_mut(id)? {
                    HeapData::List(list) => list.set(index, value),
                    _ => false,
                };
                if ok {
                    Ok(())
                } else {
                    Err(ErrorKind::IndexError.msg("list assignment index out of range"))
                }
            }
            Kind::Dict => {
                let key = self.expect_str_key(key)?;
                if let HeapData::Dict(dict) = self.heap.live_mut(id)? {
                    dict.insert(&key, value);
                }
                Ok(())
            }
            other => Err(ErrorKind::TypeError.msg(format!(
                "'{other}' object does not support item assignment"
            ))),
        }
    }

    /// Item deletion (`del container[key]`), forwarding through proxy layers.
    pub fn del_item(&mut self, container: Value, key: Value) -> RunResult<()> {
        let container = self.resolve_operand(container)?;
        let Some(id) = container.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "'{}' object does not support item deletion",
                self.kind_of(container)?
            )));
        };
        let kind = self.heap.live(id)?.kind();
        match kind {
            Kind::List => {
                let Value::Int(index) = self.resolve_operand(key)? else {
                    return Err(ErrorKind::TypeError.msg("list indices must be integers"));
                };
                let removed = match self.heap.live_mut(id)? {
                    HeapData::List(list) => list.remove(index).is_some(),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(ErrorKind::IndexError.msg("list assignment index out of range"))
                }
            }
            Kind::Dict => {
                let key = self.expect_str_key(key)?;
                let removed = match self.heap.live_mut(id)? {
                    HeapData::Dict(dict) => dict.remove(&key).is_some(),
                    _ => false,
                };
                if removed {
                    Ok(())
                } else {
                    Err(ErrorKind::KeyError.msg(format!("'{key}'")))
                }
            }
            other => Err(ErrorKind::TypeError.msg(format!(
                "'{other}' object does not support item deletion"
            ))),
        }
    }

    /// Collects an iterable's elements, forwarding through proxy layers.
    pub fn iterate(&mut self, value: Value) -> RunResult<Vec<Value>> {
        let resolved = self.resolve_operand(value)?;
        let Some(id) = resolved.ref_id() else {
            return Err(ErrorKind::TypeError.msg(format!(
                "'{}' object is not iterable",
                self.kind_of(resolved)?
            )));
        };
        enum Plan {
            Items(Vec<Value>),
            Chars(Vec<String>),
            Keys(Vec<String>),
            No(Kind),
        }
        let plan = match self.heap.live(id)? {
            HeapData::List(list) => Plan::Items(list.items().to_vec()),
            HeapData::Str(s) => Plan::Chars(s.chars().map(|c| c.to_string()).collect()),
            HeapData::Dict(dict) => Plan::Keys(dict.keys().map(str::to_owned).collect()),
            other => Plan::No(other.kind()),
        };
        match plan {
            Plan::Items(items) => Ok(items),
            Plan::Chars(chars) => {
                let mut out = Vec::with_capacity(chars.len());
                for c in chars {
                    out.push(self.str_value(&c)?);
                }
                Ok(out)
            }
            Plan::Keys(keys) => {
                let mut out = Vec::with_capacity(keys.len());
                for key in keys {
                    out.push(self.str_value(&key)?);
                }
                Ok(out)
            }
            Plan::No(kind) => {
                Err(ErrorKind::TypeError.msg(format!("'{kind}' object is not iterable")))
            }
        }
    }

    /// Hashes a hashable value, forwarding through proxy layers.
    ///
    /// Numeric values that compare equal hash equal (`true`, `1`, and `1.0`).
    pub fn hash_value(&self, value: Value) -> RunResult<u64> {
        let resolved = self.resolve_operand(value)?;
        let mut hasher = DefaultHasher::new();
        match resolved {
            Value::None => 0u8.hash(&mut hasher),
            Value::Bool(b) => (1u8, i64::from(b)).hash(&mut hasher),
            Value::Int(i) => (1u8, i).hash(&mut hasher),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    #[expect(clippy::cast_possible_truncation)]
                    let whole = f as i64;
                    (1u8, whole).hash(&mut hasher);
                } else {
                    (2u8, f.to_bits()).hash(&mut hasher);
                }
            }
            Value::Ref(id) => match self.heap.live(id)? {
                HeapData::Str(s) => (3u8, s).hash(&mut hasher),
                HeapData::List(_) | HeapData::Dict(_) => {
                    return Err(ErrorKind::TypeError.msg(format!(
                        "unhashable type: '{}'",
                        self.heap.live(id)?.kind()
                    )));
                }
                _ => {
                    let token = self.heap.token(id).ok_or_else(target_expired_error)?;
                    (4u8, token).hash(&mut hasher);
                }
            },
        }
        Ok(hasher.finish())
    }

    // ========================================================================
    // Representation
    // ========================================================================

    /// Canonical representation string.
    pub fn repr(&self, value: Value) -> RunResult<String> {
        let mut out = String::new();
        let mut seen = AHashSet::new();
        self.repr_fmt(&mut out, value, &mut seen)?;
        Ok(out)
    }

    /// Display string: string content for `str` values, repr otherwise.
    pub fn str_of(&self, value: Value) -> RunResult<String> {
        if let Some(id) = value.ref_id()
            && let HeapData::Str(s) = self.heap.live(id)?
        {
            return Ok(s.clone());
        }
        self.repr(value)
    }

    fn repr_fmt(&self, out: &mut String, value: Value, seen: &mut AHashSet<HeapId>) -> RunResult<()> {
        use std::fmt::Write;
        match value {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Value::Float(f) => out.push_str(&format_float(f)),
            Value::Ref(id) => {
                let token = self.heap.token(id).ok_or_else(target_expired_error)?;
                match self.heap.live(id)? {
                    HeapData::Str(s) => out.push_str(&quote_str(s)),
                    HeapData::List(list) => {
                        if !seen.insert(id) {
                            out.push_str("[...]");
                            return Ok(());
                        }
                        out.push('[');
                        let items = list.items().to_vec();
                        for (i, item) in items.into_iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            self.repr_fmt(out, item, seen)?;
                        }
                        out.push(']');
                        seen.remove(&id);
                    }
                    HeapData::Dict(dict) => {
                        if !seen.insert(id) {
                            out.push_str("{...}");
                            return Ok(());
                        }
                        out.push('{');
                        let pairs: Vec<(String, Value)> =
                            dict.iter().map(|(k, v)| (k.to_owned(), v)).collect();
                        for (i, (key, item)) in pairs.into_iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            out.push_str(&quote_str(&key));
                            out.push_str(": ");
                            self.repr_fmt(out, item, seen)?;
                        }
                        out.push('}');
                        seen.remove(&id);
                    }
                    HeapData::Function(f) => {
                        let _ = write!(out, "<function {} at 0x{token:x}>", f.name());
                    }
                    HeapData::BoundMethod(_) => out.push_str("<bound method>"),
                    HeapData::ClassMethod(_) => out.push_str("<classmethod object>"),
                    HeapData::StaticMethod(_) => out.push_str("<staticmethod object>"),
                    HeapData::Class(cls) => {
                        let _ = write!(out, "<class '{}'>", cls.name());
                    }
                    HeapData::Instance(inst) => {
                        let class_name = self.class_name(inst.class_id())?;
                        let _ = write!(out, "<{class_name} object at 0x{token:x}>");
                    }
                    HeapData::Proxy(p) => {
                        // The target repr is rendered exactly once.
                        let _ = write!(out, "<ObjectProxy at 0x{token:x} for ");
                        self.repr_fmt(out, p.target(), seen)?;
                        out.push('>');
                    }
                    HeapData::Wrapper(w) => {
                        let kind = self.heap.live(id)?.kind();
                        let _ = write!(out, "<{kind} at 0x{token:x} for ");
                        self.repr_fmt(out, w.target(), seen)?;
                        out.push('>');
                    }
                    HeapData::WeakProxy(wp) => {
                        let target = wp.target();
                        match self.heap.get_if_live(target) {
                            Some(data) => {
                                let target_token = self.heap.token(target).unwrap_or(0);
                                let _ = write!(
                                    out,
                                    "<WeakProxy at 0x{token:x}; to '{}' at 0x{target_token:x}>",
                                    data.kind()
                                );
                            }
                            None => {
                                let _ = write!(out, "<WeakProxy at 0x{token:x}; dead>");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Copying
    // ========================================================================

    /// Shallow copy, forwarding through proxy layers. Immutable values and
    /// non-container objects are returned as-is.
    pub fn copy_value(&mut self, value: Value) -> RunResult<Value> {
        let resolved = self.resolve_operand(value)?;
        let Some(id) = resolved.ref_id() else {
            return Ok(resolved);
        };
        enum Plan {
            List(List),
            Dict(Dict),
            Instance(Instance),
            AsIs,
        }
        let plan = match self.heap.live(id)? {
            HeapData::List(list) => Plan::List(list.clone()),
            HeapData::Dict(dict) => Plan::Dict(dict.clone()),
            HeapData::Instance(inst) => Plan::Instance(inst.clone()),
            _ => Plan::AsIs,
        };
        match plan {
            Plan::List(list) => self.alloc(HeapData::List(list)),
            Plan::Dict(dict) => self.alloc(HeapData::Dict(dict)),
            Plan::Instance(inst) => self.alloc(HeapData::Instance(inst)),
            Plan::AsIs => Ok(resolved),
        }
    }

    /// Deep copy, forwarding through proxy layers. Shared and cyclic structure
    /// is preserved via a memo of already-copied objects.
    pub fn deep_copy(&mut self, value: Value) -> RunResult<Value> {
        let mut memo = AHashMap::new();
        self.deep_copy_inner(value, &mut memo)
    }

    fn deep_copy_inner(
        &mut self,
        value: Value,
        memo: &mut AHashMap<HeapId, Value>,
    ) -> RunResult<Value> {
        let resolved = self.resolve_operand(value)?;
        let Some(id) = resolved.ref_id() else {
            return Ok(resolved);
        };
        if let Some(copied) = memo.get(&id) {
            return Ok(*copied);
        }
        enum Plan {
            List(Vec<Value>),
            Dict(Vec<(String, Value)>),
            Instance(HeapId, Vec<(String, Value)>),
            AsIs,
        }
        let plan = match self.heap.live(id)? {
            HeapData::List(list) => Plan::List(list.items().to_vec()),
            HeapData::Dict(dict) => Plan::Dict(dict.iter().map(|(k, v)| (k.to_owned(), v)).collect()),
            HeapData::Instance(inst) => Plan::Instance(
                inst.class_id(),
                inst.attrs().map(|(k, v)| (k.to_owned(), v)).collect(),
            ),
            _ => Plan::AsIs,
        };
        match plan {
            Plan::List(items) => {
                let copy_id = self.heap.allocate(HeapData::List(List::new(Vec::new())))?;
                memo.insert(id, Value::Ref(copy_id));
                let mut copied = Vec::with_capacity(items.len());
                for item in items {
                    copied.push(self.deep_copy_inner(item, memo)?);
                }
                if let HeapData::List(list) = self.heap.live_mut(copy_id)? {
                    *list = List::new(copied);
                }
                Ok(Value::Ref(copy_id))
            }
            Plan::Dict(pairs) => {
                let copy_id = self.heap.allocate(HeapData::Dict(Dict::new()))?;
                memo.insert(id, Value::Ref(copy_id));
                for (key, item) in pairs {
                    let copied = self.deep_copy_inner(item, memo)?;
                    if let HeapData::Dict(dict) = self.heap.live_mut(copy_id)? {
                        dict.insert(&key, copied);
                    }
                }
                Ok(Value::Ref(copy_id))
            }
            Plan::Instance(class_id, attrs) => {
                let copy_id = self.heap.allocate(HeapData::Instance(Instance::new(class_id)))?;
                memo.insert(id, Value::Ref(copy_id));
                for (key, item) in attrs {
                    let copied = self.deep_copy_inner(item, memo)?;
                    if let HeapData::Instance(inst) = self.heap.live_mut(copy_id)? {
                        inst.set_attr(&key, copied);
                    }
                }
                Ok(Value::Ref(copy_id))
            }
            Plan::AsIs => Ok(resolved),
        }
    }

    // ========================================================================
    // Context-manager protocol
    // ========================================================================

    /// Enters a context manager (`__enter__`), forwarding through proxy layers.
    pub fn enter(&mut self, value: Value) -> RunResult<Value> {
        let resolved = self.resolve_operand(value)?;
        self.require_context_method(resolved, "__enter__")?;
        self.call_method(resolved, "__enter__", CallArgs::none())
    }

    /// Exits a context manager (`__exit__`), forwarding through proxy layers.
    ///
    /// The exit method receives the error message (or `None` on the normal
    /// path) and its truthiness decides whether the error is suppressed.
    pub fn exit(&mut self, value: Value, error: Option<&crate::exception::RunError>) -> RunResult<bool> {
        let resolved = self.resolve_operand(value)?;
        self.require_context_method(resolved, "__exit__")?;
        let arg = match error {
            Some(err) => self.str_value(&err.to_string())?,
            None => Value::None,
        };
        let result = self.call_method(resolved, "__exit__", CallArgs::one(arg))?;
        self.truthy(result)
    }

    fn require_context_method(&self, value: Value, name: &str) -> RunResult<()> {
        let missing = |kind: String| {
            ErrorKind::TypeError.msg(format!(
                "'{kind}' object does not support the context manager protocol"
            ))
        };
        let Some(id) = value.ref_id() else {
            return Err(missing(self.kind_of(value)?.to_string()));
        };
        match self.heap.live(id)? {
            HeapData::Instance(inst) => {
                let class_id = inst.class_id();
                if self.lookup_class_chain(class_id, name)?.is_some() {
                    Ok(())
                } else {
                    Err(missing(self.class_name(class_id)?))
                }
            }
            other => Err(missing(other.kind().to_string())),
        }
    }
}

/// Numeric arithmetic with overflow and zero-division checks.
fn numeric_binary(x: Number, op: BinOp, y: Number) -> RunResult<Value> {
    if let (Number::Int(i), Number::Int(j)) = (x, y) {
        let result = match op {
            BinOp::Add => i.checked_add(j),
            BinOp::Sub => i.checked_sub(j),
            BinOp::Mul => i.checked_mul(j),
            BinOp::Div => {
                if j == 0 {
                    return Err(ErrorKind::ZeroDivisionError.msg("division by zero"));
                }
                return Ok(Value::Float(i as f64 / j as f64));
            }
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| ErrorKind::OverflowError.msg("integer overflow"));
    }
    let (a, b) = (x.as_f64(), y.as_f64());
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ErrorKind::ZeroDivisionError.msg("float division by zero"));
            }
            a / b
        }
    };
    Ok(Value::Float(result))
}

/// Formats a float the way a dynamic runtime displays it (`2.0`, not `2`).
fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Single-quoted string repr with minimal escaping.
fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formatting() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn string_quoting() {
        assert_eq!(quote_str("ab"), "'ab'");
        assert_eq!(quote_str("a'b\n"), "'a\\'b\\n'");
    }

    #[test]
    fn numeric_binary_overflow_and_zero_division() {
        let err = numeric_binary(Number::Int(i64::MAX), BinOp::Add, Number::Int(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OverflowError);
        let err = numeric_binary(Number::Int(1), BinOp::Div, Number::Int(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ZeroDivisionError);
        assert_eq!(
            numeric_binary(Number::Int(7), BinOp::Div, Number::Int(2)).unwrap(),
            Value::Float(3.5)
        );
    }
}
