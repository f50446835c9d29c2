//! The `synchronized` decorator and its lock registry.
//!
//! Locks live in a process-global registry keyed by identity token, so two
//! machines (or two wrappers) that synchronize on the same object contend on
//! the same lock. Locks are reentrant: a synchronized callable may call
//! another callable synchronized on the same context without deadlocking.
//! Registry entries are never evicted; identity tokens are never reused, so a
//! stale entry can only waste memory, never alias a new object.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use parking_lot::ReentrantMutex;

use crate::{
    decorator::{DecoratorBuilder, decorator},
    machine::Machine,
};

static LOCK_REGISTRY: LazyLock<DashMap<u64, Arc<ReentrantMutex<()>>>> =
    LazyLock::new(DashMap::new);

/// Returns the shared lock for an identity token, creating it on first use.
///
/// Creation is atomic: concurrent callers racing on the same key observe one
/// lock.
#[must_use]
pub fn lock_for_key(key: u64) -> Arc<ReentrantMutex<()>> {
    let entry = LOCK_REGISTRY
        .entry(key)
        .or_insert_with(|| Arc::new(ReentrantMutex::new(())));
    Arc::clone(entry.value())
}

/// Builds a decorator that serializes calls on a per-context lock.
///
/// The synchronization context is the enclosing instance (or class, for
/// classmethods) when the wrapped callable is bound, and the fully unwrapped
/// callable itself otherwise. The lock is held for the duration of the call
/// and released on both the success and error paths.
#[must_use]
pub fn synchronized() -> DecoratorBuilder {
    decorator(|machine: &mut Machine, wrapped, instance, args| {
        let context = if instance.is_none() {
            machine.unwrap_all(wrapped)?
        } else {
            instance
        };
        let key = machine.identity(context)?;
        let lock = lock_for_key(key);
        let _guard = lock.lock();
        machine.call(wrapped, args)
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::{AtomicUsize, Ordering}, thread};

    use super::*;

    #[test]
    fn same_key_yields_same_lock() {
        let a = lock_for_key(u64::MAX - 1);
        let b = lock_for_key(u64::MAX - 1);
        let c = lock_for_key(u64::MAX - 2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn registry_lock_is_reentrant() {
        let lock = lock_for_key(u64::MAX - 3);
        let _outer = lock.lock();
        let _inner = lock.lock();
    }

    #[test]
    fn registry_serializes_threads() {
        static OVERLAP: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);
        let key = u64::MAX - 4;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(move || {
                    let lock = lock_for_key(key);
                    let _guard = lock.lock();
                    let inside = OVERLAP.fetch_add(1, Ordering::SeqCst) + 1;
                    PEAK.fetch_max(inside, Ordering::SeqCst);
                    thread::yield_now();
                    OVERLAP.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(PEAK.load(Ordering::SeqCst), 1);
    }
}
