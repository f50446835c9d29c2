use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    exception::{ErrorKind, RunResult},
    function::NativeFunction,
    resource::ResourceLimits,
    types::{BoundMethod, ClassMethod, ClassObject, Dict, FunctionWrapper, Instance, List, ObjectProxy, StaticMethod, WeakProxy},
    value::Kind,
};

/// Unique identifier for objects stored on the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(u32);

impl HeapId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("heap index exceeds u32 range"))
    }

    /// Returns the raw slot index.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Process-wide identity token counter.
///
/// Tokens are stamped on every allocation and never reused, so object identity
/// is stable across machines within one process. This is what keys the
/// `synchronized` lock registry.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Heap-allocated object payloads.
#[derive(Debug)]
pub(crate) enum HeapData {
    Str(String),
    List(List),
    Dict(Dict),
    Function(NativeFunction),
    BoundMethod(BoundMethod),
    ClassMethod(ClassMethod),
    StaticMethod(StaticMethod),
    Class(ClassObject),
    Instance(Instance),
    Proxy(ObjectProxy),
    Wrapper(FunctionWrapper),
    WeakProxy(WeakProxy),
}

impl HeapData {
    /// Returns the type tag for this object.
    ///
    /// Derived callable wrappers (those carrying a parent reference) report a
    /// distinct tag from top-level wrappers, mirroring how bound wrappers are a
    /// separate type from the decoration-time wrapper while both remain part of
    /// the proxy lineage.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Str(_) => Kind::Str,
            Self::List(_) => Kind::List,
            Self::Dict(_) => Kind::Dict,
            Self::Function(_) => Kind::Function,
            Self::BoundMethod(_) => Kind::BoundMethod,
            Self::ClassMethod(_) => Kind::ClassMethod,
            Self::StaticMethod(_) => Kind::StaticMethod,
            Self::Class(_) => Kind::Class,
            Self::Instance(_) => Kind::Instance,
            Self::Proxy(_) => Kind::Proxy,
            Self::Wrapper(w) => {
                if w.parent().is_some() {
                    Kind::BoundWrapper
                } else {
                    Kind::Wrapper
                }
            }
            Self::WeakProxy(_) => Kind::WeakProxy,
        }
    }
}

#[derive(Debug)]
struct Slot {
    data: Option<HeapData>,
    token: u64,
}

/// Arena storage for all runtime objects.
///
/// Slots are addressed by [`HeapId`] and recycled after release. There is no
/// reference counting: objects stay live until [`Heap::release`] ends their
/// lifetime explicitly, and weak proxies observe death via [`Heap::get_if_live`].
#[derive(Debug)]
pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    limits: ResourceLimits,
}

impl Heap {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            limits,
        }
    }

    /// Allocates a new object, reusing a released slot when one is available.
    pub fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        self.limits.check_objects(self.live)?;
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(data);
            slot.token = token;
            Ok(HeapId(index))
        } else {
            let id = HeapId::new(self.slots.len());
            self.slots.push(Slot { data: Some(data), token });
            Ok(id)
        }
    }

    /// Returns the object at `id`, or a `TargetExpiredError` when the slot has
    /// been released.
    pub fn live(&self, id: HeapId) -> RunResult<&HeapData> {
        self.get_if_live(id).ok_or_else(released_error)
    }

    /// Mutable variant of [`Heap::live`].
    pub fn live_mut(&mut self, id: HeapId) -> RunResult<&mut HeapData> {
        self.slots
            .get_mut(id.index())
            .and_then(|slot| slot.data.as_mut())
            .ok_or_else(released_error)
    }

    /// Returns the object at `id` when its slot is still live.
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.slots.get(id.index()).and_then(|slot| slot.data.as_ref())
    }

    /// Ends an object's lifetime, returning whether the slot was live.
    pub fn release(&mut self, id: HeapId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return false;
        };
        if slot.data.take().is_some() {
            self.live -= 1;
            self.free.push(id.0);
            true
        } else {
            false
        }
    }

    /// Returns the identity token for a live object.
    pub fn token(&self, id: HeapId) -> Option<u64> {
        let slot = self.slots.get(id.index())?;
        slot.data.as_ref()?;
        Some(slot.token)
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.live
    }
}

fn released_error() -> crate::exception::RunError {
    ErrorKind::TargetExpired.msg("referenced object no longer exists")
}
