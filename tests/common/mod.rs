//! Shared test doubles for the engine and wrapper-collaborator seams.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;

use jsgroup::{
    Disposable, Engine, GcCallbackFlags, GcPrologueHook, GcType, Isolate, IsolateId,
    IsolateParams, ScriptContext,
};

/// In-memory engine with observable isolate creation and disposal.
#[derive(Clone)]
pub struct TestEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    next_id: AtomicU64,
    init_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    created: Mutex<Vec<(IsolateId, Weak<TestIsolate>)>>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared {
                next_id: AtomicU64::new(1),
                init_calls: AtomicUsize::new(0),
                shutdown_calls: AtomicUsize::new(0),
                created: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn init_calls(&self) -> usize {
        self.shared.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shared.shutdown_calls.load(Ordering::SeqCst)
    }

    /// Create an isolate directly, as a host would for an adopted group.
    pub fn create_isolate(&self) -> Arc<TestIsolate> {
        self.make_isolate(None, false)
    }

    /// Fetch a live isolate by id, if the owning group still holds it.
    pub fn isolate(&self, id: IsolateId) -> Option<Arc<TestIsolate>> {
        let created = self.shared.created.lock().unwrap();
        created
            .iter()
            .find(|(iso_id, _)| *iso_id == id)
            .and_then(|(_, weak)| weak.upgrade())
    }

    /// Whether the isolate with `id` has been dropped (disposed).
    pub fn isolate_gone(&self, id: IsolateId) -> bool {
        self.isolate(id).is_none()
    }

    fn make_isolate(&self, snapshot_len: Option<usize>, auto_microtasks: bool) -> Arc<TestIsolate> {
        let id = IsolateId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let isolate = Arc::new(TestIsolate {
            id,
            hook: Mutex::new(None),
            snapshot_len,
            auto_microtasks,
        });

        let mut created = self.shared.created.lock().unwrap();
        created.push((id, Arc::downgrade(&isolate)));
        isolate
    }
}

impl Engine for TestEngine {
    fn initialize(&self) {
        self.shared.init_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shared.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn new_isolate(&self, params: IsolateParams<'_>) -> Arc<dyn Isolate> {
        self.make_isolate(params.snapshot.map(<[u8]>::len), params.auto_microtasks)
    }
}

/// Engine instance double: records its GC hook and snapshot provenance.
pub struct TestIsolate {
    id: IsolateId,
    hook: Mutex<Option<GcPrologueHook>>,
    pub snapshot_len: Option<usize>,
    pub auto_microtasks: bool,
}

impl TestIsolate {
    pub fn has_gc_hook(&self) -> bool {
        self.hook.lock().unwrap().is_some()
    }

    /// Simulate the engine announcing a GC pass on this isolate.
    pub fn fire_gc_prologue(&self, gc_type: GcType, flags: GcCallbackFlags) {
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(self.id, gc_type, flags);
        }
    }
}

impl Isolate for TestIsolate {
    fn id(&self) -> IsolateId {
        self.id
    }

    fn set_gc_prologue_hook(&self, hook: Option<GcPrologueHook>) {
        *self.hook.lock().unwrap() = hook;
    }
}

/// Value wrapper double: records disposal, its thread, and its order.
pub struct TestValue {
    label: usize,
    disposed: AtomicBool,
    disposed_on: Mutex<Option<ThreadId>>,
    order_log: Option<Arc<Mutex<Vec<usize>>>>,
}

impl TestValue {
    pub fn new() -> Self {
        Self::labeled(0, None)
    }

    pub fn labeled(label: usize, order_log: Option<Arc<Mutex<Vec<usize>>>>) -> Self {
        Self {
            label,
            disposed: AtomicBool::new(false),
            disposed_on: Mutex::new(None),
            order_log,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn disposed_on(&self) -> Option<ThreadId> {
        *self.disposed_on.lock().unwrap()
    }
}

impl Disposable for TestValue {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        *self.disposed_on.lock().unwrap() = Some(std::thread::current().id());
        if let Some(log) = &self.order_log {
            log.lock().unwrap().push(self.label);
        }
    }
}

/// What happened to a test context, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    Terminated(i32),
    Disposed,
}

/// Context wrapper double with a switchable defunct flag and an event log.
pub struct TestContext {
    defunct: AtomicBool,
    events: Mutex<Vec<ContextEvent>>,
}

impl TestContext {
    /// A context whose script process is still running.
    pub fn active() -> Self {
        Self {
            defunct: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    /// A context whose script process has already shut down.
    pub fn defunct() -> Self {
        Self {
            defunct: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<ContextEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Disposable for TestContext {
    fn dispose(&self) {
        self.events.lock().unwrap().push(ContextEvent::Disposed);
    }
}

impl ScriptContext for TestContext {
    fn is_defunct(&self) -> bool {
        self.defunct.load(Ordering::SeqCst)
    }

    fn terminate(&self, exit_code: i32) {
        // Termination shuts the script process down.
        self.defunct.store(true, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(ContextEvent::Terminated(exit_code));
    }
}
