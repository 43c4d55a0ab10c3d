//! Deferred finalization of values and contexts ("zombies").
//!
//! The host language's collector can release its last reference to a value
//! or context wrapper on any thread, but the engine-side disposal of that
//! object must happen on the group's owning thread. The two domains are
//! reconciled with a two-phase reclaim: any thread marks an object as a
//! zombie (phase 1), and the owning thread drains the zombie lists as the
//! first step of every dispatch cycle (phase 2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{Disposable, ScriptContext};

/// Exit code reported to a script process whose context was released by the
/// host while the process was still running.
pub const EXIT_CONTEXT_COLLECTED_WHILE_ACTIVE: i32 = 1001;

struct ZombieLists {
    values: Vec<Arc<dyn Disposable>>,
    contexts: Vec<Arc<dyn ScriptContext>>,
}

/// Per-group zombie lists with a lock-free pending check.
///
/// The guarding lock is dedicated to these lists and is never the dispatch
/// lock; callers take them strictly in zombie-then-dispatch order.
pub(crate) struct ZombieQueue {
    lists: Mutex<ZombieLists>,
    /// Fast check for pending entries (avoids lock acquisition on the
    /// drain's teardown path).
    pending: AtomicUsize,
}

impl ZombieQueue {
    pub(crate) fn new() -> Self {
        Self {
            lists: Mutex::new(ZombieLists {
                values: Vec::new(),
                contexts: Vec::new(),
            }),
            pending: AtomicUsize::new(0),
        }
    }

    /// Phase 1: record a value for owning-thread disposal.
    pub(crate) fn push_value(&self, value: Arc<dyn Disposable>) {
        let mut lists = self.lists.lock().expect("zombie lists poisoned");
        lists.values.push(value);
        self.pending.fetch_add(1, Ordering::Release);

        tracing::trace!("value marked zombie (pending: {})", self.len());
    }

    /// Phase 1: record a context for owning-thread disposal.
    pub(crate) fn push_context(&self, context: Arc<dyn ScriptContext>) {
        let mut lists = self.lists.lock().expect("zombie lists poisoned");
        lists.contexts.push(context);
        self.pending.fetch_add(1, Ordering::Release);

        tracing::trace!("context marked zombie (pending: {})", self.len());
    }

    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Phase 2: dispose everything marked so far, on the calling thread.
    ///
    /// Values are disposed unconditionally, in insertion order. A context
    /// that is not yet defunct means the host discarded its handle while
    /// the script process is still running; the process is forcibly
    /// terminated with a distinguished exit code before disposal, since an
    /// orphaned but running process would otherwise leak indefinitely.
    ///
    /// The lists are taken under the lock and processed outside it, so
    /// disposal callbacks may mark further zombies.
    pub(crate) fn reap(&self) {
        if !self.has_pending() {
            return;
        }

        let (values, contexts) = {
            let mut lists = self.lists.lock().expect("zombie lists poisoned");
            (
                std::mem::take(&mut lists.values),
                std::mem::take(&mut lists.contexts),
            )
        };

        let count = values.len() + contexts.len();
        if count == 0 {
            return;
        }

        for value in values {
            value.dispose();
        }

        for context in contexts {
            if !context.is_defunct() {
                log::error!(
                    "context released by host while its script process is still active; \
                     forcing exit with code {EXIT_CONTEXT_COLLECTED_WHILE_ACTIVE}"
                );
                context.terminate(EXIT_CONTEXT_COLLECTED_WHILE_ACTIVE);

                if cfg!(debug_assertions) {
                    log::error!(
                        "assertion failed: context collected but its process is still running"
                    );
                }
            }
            context.dispose();
        }

        self.pending.fetch_sub(count, Ordering::Release);

        tracing::trace!("reaped {count} zombies");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    impl Disposable for Marker {
        fn dispose(&self) {}
    }

    #[test]
    fn test_queue_starts_empty() {
        let queue = ZombieQueue::new();
        assert!(!queue.has_pending());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_pending_counter_tracks_marks_and_reaps() {
        let queue = ZombieQueue::new();
        queue.push_value(Arc::new(Marker));
        queue.push_value(Arc::new(Marker));
        assert_eq!(queue.len(), 2);

        queue.reap();
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_reap_on_empty_queue_is_noop() {
        let queue = ZombieQueue::new();
        queue.reap();
        assert!(!queue.has_pending());
    }
}
