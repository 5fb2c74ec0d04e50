//! `wasmtime`-backed [`GuestRuntime`] implementation. This is the concrete
//! collaborator `ocre_core::runtime::GuestRuntime` was written to keep out of
//! the library crate: everything engine-specific lives here instead.

use std::sync::Mutex;

use ocre_core::error::{OcreError, Result};
use ocre_core::runtime::{ExecEnv, GuestFunction, GuestRuntime, ModuleRef};
use wasmtime::{Engine, Instance, Linker, Module, Store};

/// One guest module instance: its own store (memory + globals) and the
/// instance handle resolved against it. `wasmtime::Store` is not `Sync`, so
/// every access goes through the mutex — dispatch workers never call a guest
/// export while holding any `ocre-core` mutex (§5 lock ordering), but two
/// workers could race to invoke the same module's export if an embedder
/// somehow fanned two events to the same owner concurrently; this mutex is
/// what makes that safe rather than a correctness assumption we're relying on.
pub struct WasmExecEnv {
    inner: Mutex<StoreAndInstance>,
}

struct StoreAndInstance {
    store: Store<()>,
    instance: Instance,
}

impl ExecEnv for WasmExecEnv {}

/// A resolved export, identified by name and re-resolved against the store on
/// every call. `wasmtime::Func` borrows its store's lifetime awkwardly enough
/// that holding the name is simpler than holding the `Func` across calls.
#[derive(Clone)]
pub struct WasmFunction {
    name: String,
}

impl GuestFunction for WasmFunction {}

pub struct WasmRuntime {
    engine: Engine,
}

impl WasmRuntime {
    pub fn new() -> anyhow::Result<Self> {
        Ok(WasmRuntime { engine: Engine::default() })
    }

    /// Compiles a `.wasm`/`.wat` module from bytes, producing a [`ModuleRef`]
    /// target embedders pass to `Core::register_module`.
    pub fn compile(&self, bytes: &[u8]) -> anyhow::Result<Module> {
        Module::new(&self.engine, bytes)
    }
}

impl GuestRuntime for WasmRuntime {
    type ExecEnv = WasmExecEnv;
    type Function = WasmFunction;

    fn instantiate(&self, module: ModuleRef<'_>, _stack_bytes: usize) -> Result<Self::ExecEnv> {
        let compiled = module
            .downcast_ref::<Module>()
            .ok_or(OcreError::Invalid("module ref was not a compiled wasmtime::Module"))?;

        let linker: Linker<()> = Linker::new(&self.engine);
        let mut store = Store::new(&self.engine, ());
        let instance = linker
            .instantiate(&mut store, compiled)
            .map_err(|e| OcreError::RuntimeError(e.to_string()))?;

        Ok(WasmExecEnv { inner: Mutex::new(StoreAndInstance { store, instance }) })
    }

    fn resolve_export(&self, env: &Self::ExecEnv, name: &str) -> Result<Option<Self::Function>> {
        let guard = env.inner.lock().unwrap();
        let found = guard.instance.get_func(&guard.store, name).is_some();
        drop(guard);
        Ok(found.then(|| WasmFunction { name: name.to_string() }))
    }

    fn call(&self, env: &Self::ExecEnv, func: &Self::Function, args: &[u32]) -> Result<()> {
        let mut guard = env.inner.lock().unwrap();
        let StoreAndInstance { store, instance } = &mut *guard;
        let wasm_func = instance
            .get_func(&mut *store, &func.name)
            .ok_or(OcreError::NotFound("export vanished between resolve and call"))?;

        let wasm_args: Vec<wasmtime::Val> = args.iter().map(|a| wasmtime::Val::I32(*a as i32)).collect();
        wasm_func
            .call(&mut *store, &wasm_args, &mut [])
            .map_err(|e| OcreError::RuntimeError(e.to_string()))
    }

    fn take_exception(&self, _env: &Self::ExecEnv) -> Option<String> {
        // wasmtime surfaces traps as the `Err` from `call` directly; there is
        // no separate sticky exception slot to drain the way the original's
        // `ctx->last_exception` buffer worked, so this is always empty.
        None
    }

    fn destroy(&self, _env: Self::ExecEnv) {
        // Store and Instance drop their wasmtime-side resources on Drop.
    }

    fn write_u32(&self, env: &Self::ExecEnv, addr: u32, value: u32) -> Result<()> {
        let mut guard = env.inner.lock().unwrap();
        let StoreAndInstance { store, instance } = &mut *guard;
        let memory = instance
            .get_memory(&mut *store, "memory")
            .ok_or(OcreError::NotFound("module has no exported memory"))?;
        let bytes = value.to_le_bytes();
        // `wasmtime::Memory::write`'s only failure mode is the offset (plus
        // write length) falling outside the memory's current bounds — exactly
        // the "bad offset" case `spec.md` §6 calls out for `get_event`, so it
        // maps to `Invalid`, not `RuntimeError` (see the `GuestRuntime::write_u32`
        // doc).
        memory
            .write(&mut *store, addr as usize, &bytes)
            .map_err(|_| OcreError::Invalid("guest memory offset out of bounds"))
    }
}
