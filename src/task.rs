//! Units of deferred work delivered to a context group's owning thread.

use std::fmt;

/// Opaque reference into the host binding layer's object table.
///
/// The core never interprets these beyond passing them back to the entry
/// point that was registered for the descriptor's receiver kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostRef(pub u64);

/// Capability key identifying a receiver variant in the host binding layer.
///
/// Each variant registers its entry point once; descriptor delivery is a
/// single table lookup against this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverKind(pub u32);

/// Entry point registered by the host binding layer for one receiver kind.
pub trait HostEntryPoint: Send + Sync {
    /// Deliver `callback` to `receiver` on the owning thread.
    fn invoke(&self, receiver: HostRef, callback: HostRef);
}

/// One unit of deferred work, owned by the queue from enqueue to execution.
pub enum Task {
    /// A native closure, run directly on the owning thread.
    Native(Box<dyn FnOnce() + Send>),
    /// A host-callback descriptor, delivered through the entry point
    /// registered for `kind`.
    HostCallback {
        kind: ReceiverKind,
        receiver: HostRef,
        callback: HostRef,
    },
}

impl Task {
    /// Wrap a closure as a task.
    pub fn native(f: impl FnOnce() + Send + 'static) -> Self {
        Task::Native(Box::new(f))
    }

    /// Build a host-callback descriptor task.
    pub fn host_callback(kind: ReceiverKind, receiver: HostRef, callback: HostRef) -> Self {
        Task::HostCallback {
            kind,
            receiver,
            callback,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Native(_) => f.write_str("Task::Native"),
            Task::HostCallback {
                kind,
                receiver,
                callback,
            } => f
                .debug_struct("Task::HostCallback")
                .field("kind", kind)
                .field("receiver", receiver)
                .field("callback", callback)
                .finish(),
        }
    }
}
