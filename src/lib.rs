//! Lifecycle and cross-thread coordination for embedded JavaScript engine
//! context groups.
//!
//! A context group owns one engine instance (isolate) and all script
//! execution environments sharing it. The engine instance is
//! single-threaded-affine; this crate provides the owning-thread dispatcher
//! that marshals work onto that thread, the zombie protocol that defers
//! engine-side object disposal there after the host's collector releases an
//! object elsewhere, and the registries that route engine-global events
//! back to the right group. The engine itself stays behind the traits in
//! [`engine`].

pub mod alloc;
pub mod engine;
pub mod event_loop;
pub mod gc;
pub mod group;
pub mod runtime;
pub mod snapshot;
pub mod task;

// Core API
pub use group::ContextGroup;
pub use runtime::EngineRuntime;

pub use alloc::{ArrayBufferAllocator, GENERIC_ALLOCATOR, GenericAllocator};
pub use engine::{
    Disposable, Engine, GcCallbackFlags, GcPrologueHook, GcType, Isolate, IsolateId,
    IsolateParams, ScriptContext,
};
pub use event_loop::{EventLoop, WakeHandle, WakeTarget};
pub use gc::{EXIT_CONTEXT_COLLECTED_WHILE_ACTIVE, GcCallback};
pub use task::{HostEntryPoint, HostRef, ReceiverKind, Task};
