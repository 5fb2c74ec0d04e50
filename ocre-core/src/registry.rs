//! Module registry (`spec.md` §4.2, component C2).

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{OcreError, Result};
use crate::runtime::GuestRuntime;
use crate::types::{ModuleId, ResourceType, RESOURCE_TYPE_COUNT};

/// Mutable fields of a module context, all protected by one per-context
/// mutex (`spec.md` §3 "A context-local mutex protecting the mutable fields").
pub struct ContextState<R: GuestRuntime> {
    pub last_activity: Instant,
    pub resource_counts: [u32; RESOURCE_TYPE_COUNT],
    pub dispatchers: [Option<R::Function>; RESOURCE_TYPE_COUNT],
}

impl<R: GuestRuntime> ContextState<R> {
    fn new() -> Self {
        ContextState {
            last_activity: Instant::now(),
            resource_counts: [0; RESOURCE_TYPE_COUNT],
            dispatchers: Default::default(),
        }
    }
}

// `[Option<T>; N]` only derives `Default` when `T: Default`, which
// `R::Function` need not be; build the all-`None` array by hand.
impl<R: GuestRuntime> Default for ContextState<R> {
    fn default() -> Self {
        ContextState {
            last_activity: Instant::now(),
            resource_counts: [0; RESOURCE_TYPE_COUNT],
            dispatchers: [None, None, None],
        }
    }
}

/// One registered guest module: immutable identity and exec env, plus the
/// mutable state behind its own mutex.
pub struct ModuleContext<R: GuestRuntime> {
    pub id: ModuleId,
    pub exec_env: R::ExecEnv,
    state: Mutex<ContextState<R>>,
}

impl<R: GuestRuntime> ModuleContext<R> {
    /// Runs `f` with the locked mutable state, refreshing nothing on its own
    /// — callers that want a last-activity bump call [`ModuleContext::touch`]
    /// explicitly so read-only accesses (e.g. `get_resource_count`) don't.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut ContextState<R>) -> T) -> T {
        let mut guard = self.state.lock().unwrap();
        f(&mut guard)
    }

    /// Refreshes `last_activity` to now (`spec.md` §3: "refreshed on any
    /// context access and on every successful dispatch").
    pub fn touch(&self) {
        self.state.lock().unwrap().last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.state.lock().unwrap().last_activity
    }

    pub fn resource_count(&self, ty: ResourceType) -> u32 {
        self.state.lock().unwrap().resource_counts[ty.index()]
    }

    pub fn increment(&self, ty: ResourceType) {
        self.state.lock().unwrap().resource_counts[ty.index()] += 1;
    }

    /// Saturating decrement (`spec.md` §3 invariant: "Resource counters are
    /// non-negative; the decrement operation saturates at zero").
    pub fn decrement(&self, ty: ResourceType) {
        let count = &mut self.state.lock().unwrap().resource_counts[ty.index()];
        *count = count.saturating_sub(1);
    }

    pub fn set_dispatcher(&self, ty: ResourceType, func: R::Function) {
        self.state.lock().unwrap().dispatchers[ty.index()] = Some(func);
    }

    /// Copies out the dispatcher for `ty`, if bound. `R::Function` must be
    /// cheap to clone (an `Arc`-backed handle in practice) since this escapes
    /// the context mutex before the guest call happens, per §4.4 step 3.
    pub fn dispatcher(&self, ty: ResourceType) -> Option<R::Function>
    where
        R::Function: Clone,
    {
        self.state.lock().unwrap().dispatchers[ty.index()].clone()
    }
}

/// Set of active module contexts (`spec.md` §4.2). A single mutex serializes
/// add/remove/lookup against concurrent mutation of the collection; per-entry
/// mutation uses the context's own mutex instead.
pub struct ModuleRegistry<R: GuestRuntime> {
    modules: Mutex<Vec<Arc<ModuleContext<R>>>>,
}

impl<R: GuestRuntime> ModuleRegistry<R> {
    pub fn new() -> Self {
        ModuleRegistry { modules: Mutex::new(Vec::new()) }
    }

    /// Registers `id` with the given exec env.
    ///
    /// Duplicate registration is **rejected** (`OcreError::Invalid`): see
    /// DESIGN.md for why this crate does not follow the original C source's
    /// untested, dedup-free append. Exactly one of the two Open-Question
    /// answers spec.md allows must be picked and tested; this is the one.
    pub fn register(&self, id: ModuleId, exec_env: R::ExecEnv) -> Result<Arc<ModuleContext<R>>> {
        let mut modules = self.modules.lock().unwrap();
        if modules.iter().any(|m| m.id == id) {
            return Err(OcreError::Invalid("module already registered"));
        }
        let ctx = Arc::new(ModuleContext {
            id,
            exec_env,
            state: Mutex::new(ContextState::default()),
        });
        modules.push(Arc::clone(&ctx));
        Ok(ctx)
    }

    /// Removes `id` from the registry and returns its context for the caller
    /// to run cleanup/teardown against, holding the registry mutex across the
    /// whole remove so no concurrent lookup can observe a dangling entry
    /// (`spec.md` §4.2 `unregister`).
    pub fn remove(&self, id: ModuleId) -> Option<Arc<ModuleContext<R>>> {
        let mut modules = self.modules.lock().unwrap();
        let idx = modules.iter().position(|m| m.id == id)?;
        Some(modules.remove(idx))
    }

    /// Linear scan under the registry mutex (`spec.md` §4.2 `find`:
    /// "acceptable at embedded scale").
    pub fn find(&self, id: ModuleId) -> Option<Arc<ModuleContext<R>>> {
        self.modules.lock().unwrap().iter().find(|m| m.id == id).cloned()
    }

    /// `find` + refresh last-activity (`spec.md` §4.2 `get_context`).
    pub fn get_context(&self, id: ModuleId) -> Option<Arc<ModuleContext<R>>> {
        let ctx = self.find(id)?;
        ctx.touch();
        Some(ctx)
    }

    pub fn len(&self) -> usize {
        self.modules.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every currently registered context, for shutdown sweeps.
    pub fn snapshot(&self) -> Vec<Arc<ModuleContext<R>>> {
        self.modules.lock().unwrap().clone()
    }
}

impl<R: GuestRuntime> Default for ModuleRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
