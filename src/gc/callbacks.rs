//! Per-group GC prologue callback list.
//!
//! The runtime demultiplexes engine GC prologue events to the owning group
//! (see `runtime.rs`); the group fans each event out to every registered
//! `(callback, data)` pair, synchronously and in registration order.

use std::ffi::c_void;
use std::sync::Mutex;

use crate::engine::{GcCallbackFlags, GcType};

/// Callback signature for GC prologue notifications.
pub type GcCallback = fn(GcType, GcCallbackFlags, *mut c_void);

#[derive(Clone, Copy)]
struct GcCallbackEntry {
    cb: GcCallback,
    data: *mut c_void,
}

// SAFETY: the data pointer is an opaque token owned by the registrant; the
// core never dereferences it, only hands it back to the callback on the
// owning thread.
unsafe impl Send for GcCallbackEntry {}

/// Registered GC prologue callbacks for one context group.
///
/// Multiset semantics: the same pair may be registered more than once, and
/// unregistration removes every matching entry.
pub(crate) struct GcCallbackList {
    entries: Mutex<Vec<GcCallbackEntry>>,
}

impl GcCallbackList {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, cb: GcCallback, data: *mut c_void) {
        let mut entries = self.entries.lock().expect("gc callback list poisoned");
        entries.push(GcCallbackEntry { cb, data });
    }

    /// Remove every entry matching both the callback and the data pointer.
    /// Returns the number of entries removed.
    pub(crate) fn unregister(&self, cb: GcCallback, data: *mut c_void) -> usize {
        let mut entries = self.entries.lock().expect("gc callback list poisoned");
        let before = entries.len();
        entries.retain(|entry| !(std::ptr::fn_addr_eq(entry.cb, cb) && entry.data == data));
        before - entries.len()
    }

    /// Invoke every registered callback with the event's type and flags.
    ///
    /// Entries are snapshotted first so a callback may register or
    /// unregister without deadlocking on the list lock.
    pub(crate) fn invoke(&self, gc_type: GcType, flags: GcCallbackFlags) {
        let snapshot: Vec<GcCallbackEntry> = {
            let entries = self.entries.lock().expect("gc callback list poisoned");
            entries.clone()
        };

        for entry in snapshot {
            (entry.cb)(gc_type, flags, entry.data);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("gc callback list poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: GcType, _: GcCallbackFlags, _: *mut c_void) {}
    fn other(_: GcType, _: GcCallbackFlags, _: *mut c_void) {}

    #[test]
    fn test_register_then_unregister_leaves_nothing() {
        let list = GcCallbackList::new();
        list.register(noop, std::ptr::null_mut());
        assert_eq!(list.unregister(noop, std::ptr::null_mut()), 1);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_unregister_removes_all_matching_entries() {
        let list = GcCallbackList::new();
        list.register(noop, std::ptr::null_mut());
        list.register(noop, std::ptr::null_mut());
        assert_eq!(list.unregister(noop, std::ptr::null_mut()), 2);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_unregister_matches_both_fields() {
        let list = GcCallbackList::new();
        let token = 0xAB_usize as *mut c_void;
        list.register(noop, token);
        list.register(noop, std::ptr::null_mut());

        // Wrong data pointer or wrong callback removes nothing.
        assert_eq!(list.unregister(noop, 0xCD_usize as *mut c_void), 0);
        assert_eq!(list.unregister(other, token), 0);

        assert_eq!(list.unregister(noop, token), 1);
        assert_eq!(list.len(), 1);
    }
}
