//! Abstraction over the guest WASM runtime (`spec.md` §1 "external collaborator").
//!
//! `ocre-core` never links an actual WASM engine; it consumes one through this
//! trait. The concrete adapter (backed by `wasmtime` in this repo's embedder,
//! `ocre-agent`) lives outside this crate.

use crate::error::Result;

/// One resolved guest export, ready to be invoked with integer arguments.
pub trait GuestFunction: Send + Sync {}

/// A module's execution environment: the guest runtime's per-call-stack state
/// bound to one module instance (`spec.md` GLOSSARY).
pub trait ExecEnv: Send + Sync {}

/// Capabilities the core needs from the guest runtime, resolved against one
/// instantiated module.
///
/// Implementations are expected to be cheap to clone (e.g. an `Arc` around the
/// engine handle) since the core holds one per registered module and workers
/// invoke through it without holding any core mutex (`spec.md` §5 lock
/// ordering: "never invoke a guest function while holding any core mutex").
pub trait GuestRuntime: Send + Sync + 'static {
    type ExecEnv: ExecEnv;
    type Function: GuestFunction;

    /// Creates a new execution environment for `module` with the given guest
    /// stack size in bytes (`spec.md` §2 `S_guest`).
    fn instantiate(&self, module: ModuleRef<'_>, stack_bytes: usize) -> Result<Self::ExecEnv>;

    /// Resolves a named export against the execution environment's module.
    /// Returns `Ok(None)` if the export does not exist (maps to
    /// [`crate::error::OcreError::NotFound`] at the call site).
    fn resolve_export(&self, env: &Self::ExecEnv, name: &str) -> Result<Option<Self::Function>>;

    /// Invokes `func` with the given integer arguments. Returns `Ok(())` on
    /// success. A guest-side trap/exception must be surfaced as `Err` so the
    /// dispatch retry loop (`spec.md` §4.4 step 6) can fetch and clear it.
    fn call(&self, env: &Self::ExecEnv, func: &Self::Function, args: &[u32]) -> Result<()>;

    /// Fetches and clears the last exception string recorded against this
    /// execution environment's module, if any.
    fn take_exception(&self, env: &Self::ExecEnv) -> Option<String>;

    /// Destroys an execution environment, releasing any guest-side resources.
    /// Called exactly once, from `unregister` (`spec.md` §4.2).
    fn destroy(&self, env: Self::ExecEnv);

    /// Writes a 32-bit value into `env`'s linear memory at `addr`, translating
    /// the guest address to a native one internally. Backs the guest-callable
    /// `get_event` host function, which writes the popped record's fields
    /// into guest-owned output slots (`spec.md` §6).
    ///
    /// An out-of-range `addr` must be reported as [`crate::error::OcreError::Invalid`],
    /// not [`crate::error::OcreError::RuntimeError`]: `spec.md` §6 specifies
    /// `get_event` returns *Invalid* on bad offsets, and `Core::get_event`
    /// propagates whatever this returns as-is.
    fn write_u32(&self, env: &Self::ExecEnv, addr: u32, value: u32) -> Result<()>;
}

/// Opaque reference an embedder passes to `instantiate` identifying which
/// already-instantiated guest module instance to bind the new exec env to.
/// `ocre-core` treats this as entirely opaque; only the `GuestRuntime`
/// implementation interprets it.
pub struct ModuleRef<'a>(pub &'a (dyn std::any::Any + Send + Sync));

impl<'a> ModuleRef<'a> {
    pub fn new(inner: &'a (dyn std::any::Any + Send + Sync)) -> Self {
        ModuleRef(inner)
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Address of the referenced guest module instance, used by
    /// [`crate::core::Core::register_module`] as the module's [`crate::types::ModuleId`].
    ///
    /// Two `ModuleRef`s built from references to the same guest-owned value
    /// carry the same identity, so registering the same guest module instance
    /// twice is detected as a duplicate (`spec.md` §4.2/§9 Open Question) —
    /// a freshly allocated id on every call, as this crate used to do, could
    /// never observe a repeat registration. This only drops the trait
    /// object's vtable; it performs no dereference.
    pub fn identity(&self) -> u64 {
        (self.0 as *const (dyn std::any::Any + Send + Sync) as *const ()) as u64
    }
}
