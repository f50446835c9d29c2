//! Observation hooks for machine activity.
//!
//! The machine reports call dispatch, wrapper interception, and binding
//! derivation through a [`MachineTracer`]. The default tracer discards
//! everything; [`RecordingTracer`] captures events for inspection in tests
//! and tooling. The proxy layer itself performs no logging of its own.

use std::{cell::RefCell, rc::Rc};

use crate::types::BoundType;

/// A single traced machine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A native function is about to run.
    Call { name: String },
    /// A wrapper's interception function is about to run.
    WrapperCall { bound_type: BoundType },
    /// A derived wrapper was produced by member access.
    Derive { bound_type: BoundType },
}

/// Receiver for machine events.
pub trait MachineTracer {
    /// Called before a native function body runs.
    fn call(&mut self, name: &str) {
        let _ = name;
    }

    /// Called before a wrapper's interception function runs.
    fn wrapper_call(&mut self, bound_type: BoundType) {
        let _ = bound_type;
    }

    /// Called when member access derives a freshly bound wrapper.
    fn derive(&mut self, bound_type: BoundType) {
        let _ = bound_type;
    }
}

/// Tracer that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl MachineTracer for NoopTracer {}

/// Tracer that records events into a shared buffer.
///
/// The buffer handle survives handing the tracer to a machine, so tests keep
/// a clone and inspect events afterwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the shared event buffer.
    #[must_use]
    pub fn events(&self) -> Rc<RefCell<Vec<TraceEvent>>> {
        Rc::clone(&self.events)
    }
}

impl MachineTracer for RecordingTracer {
    fn call(&mut self, name: &str) {
        self.events.borrow_mut().push(TraceEvent::Call { name: name.to_owned() });
    }

    fn wrapper_call(&mut self, bound_type: BoundType) {
        self.events.borrow_mut().push(TraceEvent::WrapperCall { bound_type });
    }

    fn derive(&mut self, bound_type: BoundType) {
        self.events.borrow_mut().push(TraceEvent::Derive { bound_type });
    }
}
