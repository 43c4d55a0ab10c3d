//! Engine runtime bring-up and the isolate-to-group registry.
//!
//! One `EngineRuntime` owns the process-level engine state: a reference
//! count of live acquirers, and the registry that routes engine-global
//! events (the GC prologue) back to the context group owning the isolate
//! they fired on. The runtime is an explicitly owned object injected into
//! every context group constructor; there is no ambient global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::engine::{Engine, GcCallbackFlags, GcPrologueHook, GcType, IsolateId};
use crate::group::GroupInner;

struct RuntimeState {
    /// Live acquirers (context groups that initialized through us).
    init_count: usize,
    /// Set on first acquire and never cleared: the engine is brought up
    /// once and its teardown is deferred for the life of the process.
    engine_initialized: bool,
    /// At most one context group per engine instance.
    groups: HashMap<IsolateId, Weak<GroupInner>>,
}

pub(crate) struct RuntimeInner {
    engine: Box<dyn Engine>,
    /// One lock covers both the refcount and the registry.
    state: Mutex<RuntimeState>,
    /// The single prologue hook installed on every registered isolate.
    prologue_hook: GcPrologueHook,
}

/// Handle to one engine runtime. Clones share the same runtime.
#[derive(Clone)]
pub struct EngineRuntime {
    inner: Arc<RuntimeInner>,
}

impl EngineRuntime {
    /// Wrap an engine in a runtime. The engine is not initialized until the
    /// first context group acquires it.
    pub fn new(engine: impl Engine + 'static) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let weak = weak.clone();
            RuntimeInner {
                engine: Box::new(engine),
                state: Mutex::new(RuntimeState {
                    init_count: 0,
                    engine_initialized: false,
                    groups: HashMap::new(),
                }),
                prologue_hook: Arc::new(move |id, gc_type, flags| {
                    if let Some(inner) = weak.upgrade() {
                        inner.gc_prologue(id, gc_type, flags);
                    }
                }),
            }
        });

        Self { inner }
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        &*self.inner.engine
    }

    pub(crate) fn prologue_hook(&self) -> GcPrologueHook {
        Arc::clone(&self.inner.prologue_hook)
    }

    /// Bump the acquirer count, bringing the engine up on the first call.
    pub(crate) fn acquire(&self) {
        let mut state = self.inner.state.lock().expect("runtime state poisoned");
        state.init_count += 1;

        if !state.engine_initialized {
            log::debug!("initializing engine runtime");
            self.inner.engine.initialize();
            state.engine_initialized = true;
        }
    }

    /// Drop one acquirer. Engine teardown is deliberately deferred even at
    /// zero: engines of this class cannot be re-initialized in-process, so
    /// the runtime stays up for the life of the process.
    pub(crate) fn release(&self) {
        let mut state = self.inner.state.lock().expect("runtime state poisoned");
        state.init_count = state.init_count.saturating_sub(1);

        if state.init_count == 0 {
            log::debug!("last engine runtime acquirer released; teardown deferred");
        }
    }

    pub(crate) fn register_group(&self, id: IsolateId, group: Weak<GroupInner>) {
        let mut state = self.inner.state.lock().expect("runtime state poisoned");
        if state.groups.insert(id, group).is_some() {
            log::warn!("isolate {id:?} was already registered; replacing its context group");
        }
    }

    pub(crate) fn unregister_group(&self, id: IsolateId) {
        let mut state = self.inner.state.lock().expect("runtime state poisoned");
        state.groups.remove(&id);
    }

    /// Whether a context group is currently registered for `id`.
    pub fn has_group(&self, id: IsolateId) -> bool {
        let state = self.inner.state.lock().expect("runtime state poisoned");
        state.groups.contains_key(&id)
    }
}

impl RuntimeInner {
    /// Route an engine GC prologue event to the group owning the isolate.
    ///
    /// The group's callback list is invoked in full before the registry
    /// lock is released; an isolate with no registered group is ignored
    /// (it may already be disposing).
    fn gc_prologue(&self, id: IsolateId, gc_type: GcType, flags: GcCallbackFlags) {
        let state = self.state.lock().expect("runtime state poisoned");

        if let Some(group) = state.groups.get(&id).and_then(Weak::upgrade) {
            group.gc_callbacks().invoke(gc_type, flags);
        }
    }
}
