//! Context groups: lifecycle, shared ownership, thread-affine dispatch.
//!
//! A `ContextGroup` owns one engine instance and every script execution
//! environment sharing it. The instance is only ever touched from the
//! group's owning thread (the thread that constructed the group); other
//! threads interact with the group exclusively by enqueueing tasks or
//! marking zombies, both of which are lock-protected appends followed by a
//! cross-thread wake.

use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

use crate::alloc::GENERIC_ALLOCATOR;
use crate::engine::{Disposable, Isolate, IsolateId, IsolateParams, ScriptContext};
use crate::event_loop::{EventLoop, WakeHandle, WakeTarget};
use crate::gc::{GcCallback, GcCallbackList, ZombieQueue};
use crate::runtime::EngineRuntime;
use crate::snapshot;
use crate::task::{HostEntryPoint, ReceiverKind, Task};

struct DispatchState {
    /// Pending tasks, strict FIFO.
    queue: VecDeque<Task>,
    /// Wake mechanism; exists only while a drain pass is scheduled or
    /// running. Guarded by the same lock as the queue it serves.
    wake: Option<WakeHandle>,
}

struct ManagedLists {
    values: Vec<Weak<dyn Disposable>>,
    contexts: Vec<Weak<dyn ScriptContext>>,
}

pub(crate) struct GroupInner {
    runtime: EngineRuntime,
    isolate: Mutex<Option<Arc<dyn Isolate>>>,
    isolate_id: IsolateId,
    /// True if this group created the isolate and must dispose it.
    owns_isolate: bool,
    owning_thread: ThreadId,
    event_loop: EventLoop,
    /// Monotonic: false until disposal, then true forever.
    defunct: AtomicBool,
    /// Owned snapshot blob backing the isolate, released at disposal.
    startup_data: Mutex<Option<Vec<u8>>>,
    dispatch: Mutex<DispatchState>,
    zombies: ZombieQueue,
    gc_callbacks: GcCallbackList,
    managed: Mutex<ManagedLists>,
    /// Host-callback entry points, keyed by receiver variant. Resolved at
    /// registration; delivery is one lookup.
    entry_points: Mutex<HashMap<ReceiverKind, Arc<dyn HostEntryPoint>>>,
}

/// Handle to one context group. Clones share ownership; the group is
/// disposed when explicitly requested or when the last handle drops.
#[derive(Clone)]
pub struct ContextGroup {
    inner: Arc<GroupInner>,
}

impl ContextGroup {
    /// Create a group with a fresh engine instance and its own event loop.
    pub fn new(runtime: &EngineRuntime) -> Self {
        Self::create(runtime, None)
    }

    /// Create a group with a fresh engine instance initialized from the
    /// snapshot at `path`. An unreadable or empty snapshot degrades to a
    /// default-initialized instance; this constructor does not fail.
    pub fn from_snapshot_file(runtime: &EngineRuntime, path: impl AsRef<Path>) -> Self {
        Self::create(runtime, snapshot::load_snapshot_file(path.as_ref()))
    }

    /// Adopt an engine instance created elsewhere, driven by an externally
    /// supplied event loop. The group borrows the instance: disposal
    /// releases the runtime refcount but leaves the instance to its
    /// creator.
    pub fn with_isolate(
        runtime: &EngineRuntime,
        isolate: Arc<dyn Isolate>,
        event_loop: EventLoop,
    ) -> Self {
        Self::finish(runtime, isolate, false, event_loop, None)
    }

    fn create(runtime: &EngineRuntime, startup_data: Option<Vec<u8>>) -> Self {
        runtime.acquire();
        let isolate = runtime.engine().new_isolate(IsolateParams {
            snapshot: startup_data.as_deref(),
            allocator: &GENERIC_ALLOCATOR,
            auto_microtasks: true,
        });
        Self::finish(runtime, isolate, true, EventLoop::new(), startup_data)
    }

    fn finish(
        runtime: &EngineRuntime,
        isolate: Arc<dyn Isolate>,
        owns_isolate: bool,
        event_loop: EventLoop,
        startup_data: Option<Vec<u8>>,
    ) -> Self {
        let isolate_id = isolate.id();

        let inner = Arc::new(GroupInner {
            runtime: runtime.clone(),
            isolate: Mutex::new(Some(Arc::clone(&isolate))),
            isolate_id,
            owns_isolate,
            owning_thread: thread::current().id(),
            event_loop,
            defunct: AtomicBool::new(false),
            startup_data: Mutex::new(startup_data),
            dispatch: Mutex::new(DispatchState {
                queue: VecDeque::new(),
                wake: None,
            }),
            zombies: ZombieQueue::new(),
            gc_callbacks: GcCallbackList::new(),
            managed: Mutex::new(ManagedLists {
                values: Vec::new(),
                contexts: Vec::new(),
            }),
            entry_points: Mutex::new(HashMap::new()),
        });

        runtime.register_group(isolate_id, Arc::downgrade(&inner));
        isolate.set_gc_prologue_hook(Some(runtime.prologue_hook()));

        log::debug!("context group created for isolate {isolate_id:?}");

        ContextGroup { inner }
    }

    /// The event loop the owning thread must drive for this group.
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// The engine instance, until disposal takes it.
    pub fn isolate(&self) -> Option<Arc<dyn Isolate>> {
        self.inner
            .isolate
            .lock()
            .expect("isolate slot poisoned")
            .clone()
    }

    pub fn isolate_id(&self) -> IsolateId {
        self.inner.isolate_id
    }

    /// The only thread permitted to touch the engine instance directly.
    pub fn owning_thread(&self) -> ThreadId {
        self.inner.owning_thread
    }

    pub fn is_defunct(&self) -> bool {
        self.inner.defunct.load(Ordering::Acquire)
    }

    /// Whether this group holds an owned snapshot blob.
    pub fn has_snapshot(&self) -> bool {
        self.inner
            .startup_data
            .lock()
            .expect("startup data poisoned")
            .is_some()
    }

    /// Enqueue a task for the owning thread. Callable from any thread;
    /// tasks execute in strict enqueue order.
    pub fn schedule(&self, task: Task) {
        let mut state = self.inner.dispatch.lock().expect("dispatch state poisoned");
        state.queue.push_back(task);
        GroupInner::ensure_wake(&self.inner, &mut state);
    }

    /// Run `f` on the owning thread and block until it has completed.
    ///
    /// Must not be called from the owning thread (self-deadlock; detected
    /// and panics), and the caller must not hold any lock the task body
    /// needs. Blocks indefinitely if the owning thread's loop is wedged.
    pub fn schedule_and_wait(&self, f: impl FnOnce() + Send + 'static) {
        assert_ne!(
            thread::current().id(),
            self.inner.owning_thread,
            "schedule_and_wait called from the owning thread would deadlock"
        );

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.schedule(Task::native(move || {
            f();
            let _ = tx.send(());
        }));

        if rx.blocking_recv().is_err() {
            log::error!("context group went away before a synchronous task completed");
        }
    }

    /// Register the entry point for one receiver variant of host-callback
    /// descriptors. Later registrations for the same kind replace earlier
    /// ones.
    pub fn register_entry_point(&self, kind: ReceiverKind, entry: Arc<dyn HostEntryPoint>) {
        let mut table = self
            .inner
            .entry_points
            .lock()
            .expect("entry point table poisoned");
        table.insert(kind, entry);
    }

    /// Register a GC prologue callback with its opaque data. Duplicate
    /// pairs are kept (multiset semantics).
    pub fn register_gc_callback(&self, cb: GcCallback, data: *mut c_void) {
        self.inner.gc_callbacks.register(cb, data);
    }

    /// Remove every registered entry matching both `cb` and `data`;
    /// returns the number removed.
    pub fn unregister_gc_callback(&self, cb: GcCallback, data: *mut c_void) -> usize {
        self.inner.gc_callbacks.unregister(cb, data)
    }

    /// Register a value for automatic disposal at group teardown. The
    /// group holds only a weak reference; an already-destroyed value is
    /// silently skipped at disposal.
    pub fn manage_value(&self, value: &Arc<dyn Disposable>) {
        let mut managed = self.inner.managed.lock().expect("managed lists poisoned");
        managed.values.push(Arc::downgrade(value));
    }

    /// Register a context for automatic disposal at group teardown.
    pub fn manage_context(&self, context: &Arc<dyn ScriptContext>) {
        let mut managed = self.inner.managed.lock().expect("managed lists poisoned");
        managed.contexts.push(Arc::downgrade(context));
    }

    /// Hand a released value to the zombie collector for owning-thread
    /// disposal. Callable from any thread.
    pub fn mark_value_zombie(&self, value: Arc<dyn Disposable>) {
        if self.is_self(Arc::as_ptr(&value) as *const ()) {
            return;
        }
        self.inner.zombies.push_value(value);
        self.inner.request_wake();
    }

    /// Hand a released context to the zombie collector. If the context is
    /// still active when drained, its script process is forcibly
    /// terminated first (see `gc::EXIT_CONTEXT_COLLECTED_WHILE_ACTIVE`).
    pub fn mark_context_zombie(&self, context: Arc<dyn ScriptContext>) {
        if self.is_self(Arc::as_ptr(&context) as *const ()) {
            return;
        }
        self.inner.zombies.push_context(context);
        self.inner.request_wake();
    }

    /// Tear the group down. Idempotent; see the module docs for the full
    /// sequence. Concurrent use of the group during disposal is undefined
    /// and must be prevented by the caller.
    pub fn dispose(&self) {
        // Hold a strong self-reference so a recursive release during the
        // teardown sequence cannot destroy the group mid-way.
        let _wait = Arc::clone(&self.inner);
        self.inner.dispose_inner();
    }

    /// Degenerate-cycle guard: an object whose identity coincides with the
    /// group itself must not become its own zombie.
    fn is_self(&self, data_ptr: *const ()) -> bool {
        std::ptr::eq(data_ptr, Arc::as_ptr(&self.inner) as *const ())
    }
}

impl GroupInner {
    pub(crate) fn gc_callbacks(&self) -> &GcCallbackList {
        &self.gc_callbacks
    }

    /// Ensure a wake is pending for the owning thread. If no wake handle
    /// exists, one is created and triggered immediately; if one exists, a
    /// drain pass is already pending and will pick up the new work.
    fn ensure_wake(inner: &Arc<Self>, state: &mut DispatchState) {
        if state.wake.is_none() {
            let handle = inner
                .event_loop
                .register(Arc::clone(inner) as Arc<dyn WakeTarget>);
            handle.send();
            state.wake = Some(handle);
        }
    }

    fn request_wake(self: &Arc<Self>) {
        let mut state = self.dispatch.lock().expect("dispatch state poisoned");
        Self::ensure_wake(self, &mut state);
    }

    fn run_task(&self, task: Task) {
        match task {
            Task::Native(f) => f(),
            Task::HostCallback {
                kind,
                receiver,
                callback,
            } => {
                let entry = {
                    let table = self.entry_points.lock().expect("entry point table poisoned");
                    table.get(&kind).cloned()
                };

                match entry {
                    Some(entry) => entry.invoke(receiver, callback),
                    None => {
                        // A descriptor for an unregistered receiver variant
                        // is a binding-layer programming error, not a
                        // runtime condition anything can recover from.
                        log::error!(
                            "no host entry point registered for {kind:?}; aborting"
                        );
                        std::process::abort();
                    }
                }
            }
        }
    }

    fn dispose_inner(&self) {
        if self.defunct.load(Ordering::Acquire) {
            log::debug!("dispose on defunct context group ignored");
            return;
        }

        // Nothing is delivered once teardown starts; dropping the wake
        // handle also lets an idle host loop exit.
        {
            let mut state = self.dispatch.lock().expect("dispatch state poisoned");
            if !state.queue.is_empty() {
                log::warn!("discarding {} pending tasks at disposal", state.queue.len());
            }
            state.queue.clear();
            state.wake = None;
        }

        // 1. Detach from GC prologue notifications.
        let isolate = self
            .isolate
            .lock()
            .expect("isolate slot poisoned")
            .clone();
        if let Some(iso) = &isolate {
            iso.set_gc_prologue_hook(None);
        }
        drop(isolate);

        // 2. Dispose still-live managed values, then contexts. Dead weak
        //    references are skipped silently.
        let (values, contexts) = {
            let mut managed = self.managed.lock().expect("managed lists poisoned");
            (
                std::mem::take(&mut managed.values),
                std::mem::take(&mut managed.contexts),
            )
        };
        for value in values {
            if let Some(value) = value.upgrade() {
                value.dispose();
            }
        }
        for context in contexts {
            if let Some(context) = context.upgrade() {
                context.dispose();
            }
        }

        // 3. Mark defunct.
        self.defunct.store(true, Ordering::Release);

        // 4. Flush pending zombies.
        self.zombies.reap();

        // 5. Deregister from the isolate registry.
        self.runtime.unregister_group(self.isolate_id);

        // 6. Drop our reference to the engine instance. An owned instance
        //    is disposed with its last reference; a borrowed one stays with
        //    its creator, and we release the runtime acquisition instead.
        let isolate = self.isolate.lock().expect("isolate slot poisoned").take();
        drop(isolate);
        if !self.owns_isolate {
            self.runtime.release();
        }

        // 7. Release the startup-data buffer.
        let startup = self
            .startup_data
            .lock()
            .expect("startup data poisoned")
            .take();
        drop(startup);

        log::debug!("context group for isolate {:?} disposed", self.isolate_id);
    }
}

impl WakeTarget for GroupInner {
    /// One drain pass, on the owning thread: zombies first, then tasks in
    /// strict FIFO order with the dispatch lock released around each body,
    /// then wake-mechanism teardown once both are empty.
    fn on_wake(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owning_thread,
            "context group drained off its owning thread"
        );

        loop {
            self.zombies.reap();

            loop {
                let task = {
                    let mut state = self.dispatch.lock().expect("dispatch state poisoned");
                    state.queue.pop_front()
                };
                let Some(task) = task else { break };
                self.run_task(task);
            }

            let mut state = self.dispatch.lock().expect("dispatch state poisoned");
            if !state.queue.is_empty() {
                // Enqueued while the last task body ran.
                continue;
            }
            if self.zombies.has_pending() {
                drop(state);
                continue;
            }

            // Idle: tear down the wake mechanism so the group does not keep
            // its host loop alive. The next schedule or zombie mark creates
            // a fresh one.
            state.wake = None;
            return;
        }
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        self.dispose_inner();
    }
}
