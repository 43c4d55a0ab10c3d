//! Owning-thread event loop and the per-group wake mechanism.
//!
//! Each context group funnels all engine work onto one designated thread.
//! That thread drives an `EventLoop`: other threads enqueue work on the
//! group and trigger a `WakeHandle`, and the loop invokes the group's drain
//! on the owning thread.
//!
//! A `WakeHandle` is created on demand when a group has pending work and is
//! dropped as soon as the group drains empty; `run` returns once no live
//! handle remains, so an idle group never keeps its host loop alive.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Something the loop can wake: the owning-thread half of a dispatcher.
pub trait WakeTarget: Send + Sync {
    /// Invoked on the loop's driving thread once per delivered wake.
    fn on_wake(&self);
}

struct LoopState {
    /// Targets with a delivered, not-yet-drained wake.
    ready: VecDeque<Arc<dyn WakeTarget>>,
    /// Live wake handles; the loop exits when this reaches zero.
    handles: usize,
}

struct LoopShared {
    state: Mutex<LoopState>,
    wakeups: Condvar,
}

/// Handle to one event loop. Clones share the same loop.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<LoopShared>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState {
                    ready: VecDeque::new(),
                    handles: 0,
                }),
                wakeups: Condvar::new(),
            }),
        }
    }

    /// Register `target` with the loop, keeping the loop alive until the
    /// returned handle is dropped.
    pub fn register(&self, target: Arc<dyn WakeTarget>) -> WakeHandle {
        let mut state = self.shared.state.lock().expect("event loop state poisoned");
        state.handles += 1;
        log::trace!("wake handle registered (live: {})", state.handles);

        WakeHandle {
            shared: Arc::clone(&self.shared),
            target,
        }
    }

    /// Drive the loop on the calling thread.
    ///
    /// Delivers pending wakes in order, sleeping between them, and returns
    /// once every wake has been delivered and no live `WakeHandle` remains.
    /// Work scheduled after `run` returns requires another `run` call; the
    /// host owns that policy.
    pub fn run(&self) {
        let mut state = self.shared.state.lock().expect("event loop state poisoned");

        loop {
            while let Some(target) = state.ready.pop_front() {
                // Release the lock for the drain body so other threads can
                // trigger further wakes meanwhile.
                drop(state);
                target.on_wake();
                state = self.shared.state.lock().expect("event loop state poisoned");
            }

            if state.handles == 0 {
                return;
            }

            state = self
                .shared
                .wakeups
                .wait(state)
                .expect("event loop state poisoned");
        }
    }
}

/// Wake mechanism for one target: exists only while that target has
/// pending work scheduled.
pub struct WakeHandle {
    shared: Arc<LoopShared>,
    target: Arc<dyn WakeTarget>,
}

impl WakeHandle {
    /// Deliver a wake to the target on the loop's driving thread.
    pub fn send(&self) {
        let mut state = self.shared.state.lock().expect("event loop state poisoned");
        state.ready.push_back(Arc::clone(&self.target));
        self.shared.wakeups.notify_one();
    }
}

impl Drop for WakeHandle {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().expect("event loop state poisoned");
        state.handles -= 1;
        log::trace!("wake handle dropped (live: {})", state.handles);
        // The loop may now be free to exit.
        self.shared.wakeups.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl WakeTarget for Counter {
        fn on_wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_run_returns_immediately_when_idle() {
        let ev = EventLoop::new();
        ev.run();
    }

    #[test]
    fn test_wake_delivered_then_loop_exits() {
        let ev = EventLoop::new();
        let target = Arc::new(Counter(AtomicUsize::new(0)));

        let handle = ev.register(Arc::clone(&target) as Arc<dyn WakeTarget>);
        handle.send();
        drop(handle);

        ev.run();
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_live_handle_keeps_loop_alive() {
        let ev = EventLoop::new();
        let target = Arc::new(Counter(AtomicUsize::new(0)));
        let handle = ev.register(Arc::clone(&target) as Arc<dyn WakeTarget>);
        handle.send();

        // Drop the handle from another thread after a delay; run() must not
        // return before that happens.
        let dropper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(handle);
        });

        ev.run();
        dropper.join().unwrap();
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wakes_delivered_in_order() {
        let ev = EventLoop::new();
        let log: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        struct Logger(usize, Arc<Mutex<Vec<usize>>>);
        impl WakeTarget for Logger {
            fn on_wake(&self) {
                self.1.lock().unwrap().push(self.0);
            }
        }

        let handles: Vec<WakeHandle> = (0..3)
            .map(|i| ev.register(Arc::new(Logger(i, Arc::clone(&log))) as Arc<dyn WakeTarget>))
            .collect();
        for h in &handles {
            h.send();
        }
        drop(handles);

        ev.run();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }
}
