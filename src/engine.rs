//! Seams to the engine and to the wrapper types built on this core.
//!
//! The execution engine itself (parser, interpreter, heap) is an external
//! collaborator: this crate only needs to create and dispose engine
//! instances, install a GC prologue hook on them, and identify them in the
//! runtime registry. Everything else stays behind the `Engine`/`Isolate`
//! traits so the core carries no engine-specific code.
//!
//! The value/context wrapper types that schedule their disposal through a
//! context group are collaborators too; they appear here only as the
//! `Disposable` and `ScriptContext` traits.

use std::sync::Arc;

use crate::alloc::ArrayBufferAllocator;

/// Opaque identity of one engine instance, used as the registry key.
///
/// Engines assign ids; the core never interprets them beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolateId(pub u64);

/// Kind of garbage-collection pass announced by a prologue event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GcType {
    Scavenge = 1,
    MarkSweepCompact = 2,
    IncrementalMarking = 4,
    WeakCallbacks = 8,
}

/// Engine-defined flag bits accompanying a GC prologue event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcCallbackFlags(pub u32);

impl GcCallbackFlags {
    pub const NONE: GcCallbackFlags = GcCallbackFlags(0);
}

/// Hook the runtime installs on every registered isolate.
///
/// The engine must invoke it synchronously on the isolate's owning thread
/// immediately before each garbage-collection pass.
pub type GcPrologueHook = Arc<dyn Fn(IsolateId, GcType, GcCallbackFlags) + Send + Sync>;

/// Parameters for creating an engine instance.
pub struct IsolateParams<'a> {
    /// Serialized heap snapshot to start from, if any.
    pub snapshot: Option<&'a [u8]>,
    /// Allocator for engine-managed binary buffers.
    pub allocator: &'static dyn ArrayBufferAllocator,
    /// Whether the engine should run microtask checkpoints automatically.
    /// Set for instances this crate creates; adopted instances keep
    /// whatever policy their creator chose.
    pub auto_microtasks: bool,
}

/// One engine instance (heap, GC, execution state).
///
/// The instance is single-threaded-affine: only the owning thread of the
/// context group holding it may touch engine state. Dropping the last
/// reference disposes the instance.
pub trait Isolate: Send + Sync {
    /// Registry identity of this instance.
    fn id(&self) -> IsolateId;

    /// Install or remove the GC prologue hook for this instance.
    fn set_gc_prologue_hook(&self, hook: Option<GcPrologueHook>);
}

/// The engine's process-level surface.
pub trait Engine: Send + Sync {
    /// Bring up process-wide engine state. Called once per runtime, under
    /// the runtime lock, before the first isolate is created.
    fn initialize(&self);

    /// Tear down process-wide engine state. The core never calls this once
    /// the engine has been initialized: engines of this class cannot be
    /// re-initialized in-process, so teardown is deferred for the life of
    /// the process (see DESIGN.md).
    fn shutdown(&self);

    /// Create a fresh engine instance.
    fn new_isolate(&self, params: IsolateParams<'_>) -> Arc<dyn Isolate>;
}

/// A wrapper object whose native disposal must happen on the owning thread.
pub trait Disposable: Send + Sync {
    /// Release the engine-side state behind this object. Idempotent on the
    /// implementor's side; the core calls it at most once per registration.
    fn dispose(&self);
}

/// A script execution environment within an engine instance.
pub trait ScriptContext: Disposable {
    /// Whether this environment has already shut down.
    fn is_defunct(&self) -> bool;

    /// Forcibly terminate the script process running in this environment,
    /// reporting `exit_code` to it. Invoked by the zombie collector when a
    /// still-active context loses its last external owner.
    fn terminate(&self, exit_code: i32);
}
