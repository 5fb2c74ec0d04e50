//! Dispatch worker pool (`spec.md` §4.4, component C4) and the ambient
//! "current module" reference (`spec.md` §3, §9).

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, warn};

use crate::config::CoreConfig;
use crate::dispatch::marshal_args;
use crate::queue::EventQueue;
use crate::registry::ModuleRegistry;
use crate::resources::CleanupTable;
use crate::runtime::GuestRuntime;
use crate::types::{EventRecord, ModuleId};

thread_local! {
    /// Per-worker-thread storage holding the module handle whose dispatch is
    /// currently executing. Written immediately before invoking a guest
    /// function and cleared immediately after return, on every exit path
    /// (success, retry exhaustion, or a guest exception) — `spec.md` §9
    /// calls out clearing on *all* exit paths as the part worth preserving
    /// from the original pattern.
    static CURRENT_MODULE: Cell<Option<ModuleId>> = const { Cell::new(None) };
}

/// Reads the module whose dispatcher is presently executing on the calling
/// thread, as seen by a guest-callable host function invoked from within
/// that dispatch. `None` outside of a dispatch invocation.
pub fn current_module() -> Option<ModuleId> {
    CURRENT_MODULE.with(|m| m.get())
}

struct CurrentModuleGuard;

impl CurrentModuleGuard {
    fn enter(module: ModuleId) -> Self {
        CURRENT_MODULE.with(|m| m.set(Some(module)));
        CurrentModuleGuard
    }
}

impl Drop for CurrentModuleGuard {
    fn drop(&mut self) {
        CURRENT_MODULE.with(|m| m.set(None));
    }
}

/// Fixed pool of dispatch worker threads, started at `Core::init` and joined
/// at `Core::shutdown`.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<R: GuestRuntime>(
        config: &CoreConfig,
        queue: Arc<EventQueue>,
        registry: Arc<ModuleRegistry<R>>,
        runtime: Arc<R>,
        cleanup: Arc<CleanupTable>,
        running: Arc<AtomicBool>,
    ) -> Self
    where
        R::Function: Clone,
    {
        let batch_size = config.batch_size;
        let max_retries = config.retry_limit;
        let retry_delay = Duration::from_millis(config.retry_delay_ms);

        let handles = (0..config.worker_count)
            .map(|idx| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let runtime = Arc::clone(&runtime);
                let cleanup = Arc::clone(&cleanup);
                let running = Arc::clone(&running);
                thread::Builder::new()
                    .name(format!("ocre-dispatch-{idx}"))
                    .stack_size(config.worker_stack_bytes)
                    .spawn(move || {
                        worker_loop(
                            &queue,
                            &registry,
                            &runtime,
                            &cleanup,
                            &running,
                            batch_size,
                            max_retries,
                            retry_delay,
                        )
                    })
                    .expect("failed to spawn dispatch worker thread")
            })
            .collect();

        WorkerPool { handles }
    }

    /// Blocks until every worker thread has exited. Replaces the original's
    /// "sleep `100ms` per worker and hope" with a real join, per the §9
    /// redesign flag.
    pub fn join(self) {
        for handle in self.handles {
            if let Err(panic) = handle.join() {
                error!("dispatch worker panicked during shutdown: {panic:?}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop<R: GuestRuntime>(
    queue: &EventQueue,
    registry: &ModuleRegistry<R>,
    runtime: &R,
    cleanup: &CleanupTable,
    running: &AtomicBool,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
) where
    R::Function: Clone,
{
    let _ = cleanup; // cleanup runs from unregister/shutdown, not per-dispatch; kept for symmetry with registry/runtime args.
    loop {
        // Step 1: acquire one availability permit (wait indefinitely).
        queue.wait_for_available();
        if !running.load(Ordering::Acquire) {
            return;
        }

        // Step 2: drain up to `batch_size` events. The permit consumed above
        // only guarantees the queue was non-empty at some point; a racing
        // worker may have already taken the event, so an empty batch here is
        // legal (spurious wakeup, `spec.md` §4.1).
        let batch = queue.drain(batch_size);

        for event in batch {
            dispatch_one(event, registry, runtime, max_retries, retry_delay);
        }
    }
}

/// Executes the per-event dispatch protocol (`spec.md` §4.4).
fn dispatch_one<R: GuestRuntime>(
    event: EventRecord,
    registry: &ModuleRegistry<R>,
    runtime: &R,
    max_retries: u32,
    retry_delay: Duration,
) where
    R::Function: Clone,
{
    // Step 2: target selection is the event's own owner field (§9 redesign).
    let Some(ctx) = registry.find(event.owner) else {
        warn!("dropping event: target module {:?} not registered", event.owner);
        return;
    };

    // Step 3: dispatcher lookup under the context mutex; exec_env and the
    // resolved function handle are copied out before the guest call, so no
    // core mutex is held across the invocation (§5 lock ordering rule).
    let Some(dispatcher) = ctx.dispatcher(event.kind) else {
        warn!("dropping event: no dispatcher bound for {:?} on {:?}", event.kind, event.owner);
        return;
    };

    // Step 4: argument marshalling.
    let args = marshal_args(&event);

    // Step 5: set ambient current-module context.
    let _guard = CurrentModuleGuard::enter(event.owner);

    // Step 6: invocation with retry. Exactly one of the `max_retries`
    // attempts needs to succeed; exhausting them is logged and the event is
    // dropped, never propagated to the poster (`spec.md` §7).
    let mut last_error = None;
    let mut succeeded = false;
    for attempt in 1..=max_retries.max(1) {
        match runtime.call(&ctx.exec_env, &dispatcher, &args) {
            Ok(()) => {
                succeeded = true;
                break;
            }
            Err(err) => {
                let exception = runtime.take_exception(&ctx.exec_env);
                warn!(
                    "dispatch attempt {attempt}/{max_retries} failed for {:?} on {:?}: {err}{}",
                    event.kind,
                    event.owner,
                    exception.map(|e| format!(" (exception: {e})")).unwrap_or_default(),
                );
                last_error = Some(err);
                if attempt < max_retries {
                    thread::sleep(retry_delay);
                }
            }
        }
    }

    // Step 7: clear ambient current-module context (via guard drop, covering
    // every exit path above including retry exhaustion).
    drop(_guard);

    if succeeded {
        // Step 8: accounting.
        ctx.touch();
        debug!("dispatched {:?} to {:?}", event.kind, event.owner);
    } else if let Some(err) = last_error {
        error!(
            "event {:?} for {:?} failed after {max_retries} attempts: {err}",
            event.kind, event.owner
        );
    }
}
