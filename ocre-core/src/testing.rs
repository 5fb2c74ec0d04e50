//! In-memory [`GuestRuntime`] mock, used by the scenario tests in this crate.
//! Exercising a real `wasmtime` module for dispatch-logic coverage is
//! unnecessary weight; `ocre-agent` exercises the real engine path instead.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{OcreError, Result};
use crate::runtime::{ExecEnv, GuestFunction, GuestRuntime, ModuleRef};

/// A guest export modeled as a plain closure over the call arguments.
/// `attempts_until_ok` lets a test simulate a dispatcher that traps on its
/// first N invocations before succeeding, exercising the retry loop.
#[derive(Clone)]
pub struct MockFunction {
    name: &'static str,
    attempts_until_ok: Arc<Mutex<u32>>,
}

impl GuestFunction for MockFunction {}

/// One mock module instance: a name (for lookups in the export table) and a
/// log of calls it has received, for assertions.
pub struct MockExecEnv {
    pub module_name: &'static str,
    pub calls: Mutex<Vec<(&'static str, Vec<u32>)>>,
    last_exception: Mutex<Option<String>>,
}

impl ExecEnv for MockExecEnv {}

/// One simulated linear memory page (64 KiB), matching the `wasmtime` adapter's
/// real guest memory granularity closely enough to exercise the same
/// out-of-bounds behavior in a unit test.
const MOCK_MEMORY_BYTES: u32 = 64 * 1024;

/// Maps a module's export table and records memory writes from `get_event`.
pub struct MockRuntime {
    exports: Mutex<HashMap<&'static str, HashMap<&'static str, MockFunction>>>,
    memory: Mutex<HashMap<u32, u32>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        MockRuntime { exports: Mutex::new(HashMap::new()), memory: Mutex::new(HashMap::new()) }
    }

    /// Registers `export_name` on `module_name`, failing after `attempts_until_ok - 1`
    /// calls before it starts succeeding. Pass `1` for an export that always succeeds.
    pub fn add_export(&self, module_name: &'static str, export_name: &'static str, attempts_until_ok: u32) {
        let mut exports = self.exports.lock().unwrap();
        exports.entry(module_name).or_default().insert(
            export_name,
            MockFunction { name: export_name, attempts_until_ok: Arc::new(Mutex::new(attempts_until_ok)) },
        );
    }

    pub fn read_memory(&self, addr: u32) -> Option<u32> {
        self.memory.lock().unwrap().get(&addr).copied()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestRuntime for MockRuntime {
    type ExecEnv = MockExecEnv;
    type Function = MockFunction;

    fn instantiate(&self, module: ModuleRef<'_>, _stack_bytes: usize) -> Result<Self::ExecEnv> {
        let module_name = module.downcast_ref::<&'static str>().copied().unwrap_or("anonymous");
        Ok(MockExecEnv {
            module_name,
            calls: Mutex::new(Vec::new()),
            last_exception: Mutex::new(None),
        })
    }

    fn resolve_export(&self, env: &Self::ExecEnv, name: &str) -> Result<Option<Self::Function>> {
        let exports = self.exports.lock().unwrap();
        Ok(exports.get(env.module_name).and_then(|m| m.get(name)).cloned())
    }

    fn call(&self, env: &Self::ExecEnv, func: &Self::Function, args: &[u32]) -> Result<()> {
        env.calls.lock().unwrap().push((func.name, args.to_vec()));
        let mut remaining = func.attempts_until_ok.lock().unwrap();
        if *remaining > 1 {
            *remaining -= 1;
            *env.last_exception.lock().unwrap() = Some(format!("{} trapped", func.name));
            Err(OcreError::RuntimeError(format!("{} trapped", func.name)))
        } else {
            Ok(())
        }
    }

    fn take_exception(&self, env: &Self::ExecEnv) -> Option<String> {
        env.last_exception.lock().unwrap().take()
    }

    fn destroy(&self, _env: Self::ExecEnv) {}

    fn write_u32(&self, _env: &Self::ExecEnv, addr: u32, value: u32) -> Result<()> {
        // Mirrors the real `wasmtime` adapter's contract (`spec.md` §6:
        // `get_event` returns *Invalid* on bad offsets) rather than silently
        // accepting any address.
        let in_bounds = matches!(addr.checked_add(4), Some(end) if end <= MOCK_MEMORY_BYTES);
        if !in_bounds {
            return Err(OcreError::Invalid("guest memory offset out of bounds"));
        }
        self.memory.lock().unwrap().insert(addr, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_u32_rejects_out_of_bounds_offset() {
        let runtime = MockRuntime::new();
        let env = runtime.instantiate(ModuleRef::new(&()), 0).unwrap();
        match runtime.write_u32(&env, MOCK_MEMORY_BYTES, 42) {
            Err(OcreError::Invalid(_)) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert!(runtime.read_memory(MOCK_MEMORY_BYTES).is_none());
    }

    #[test]
    fn write_u32_accepts_in_bounds_offset() {
        let runtime = MockRuntime::new();
        let env = runtime.instantiate(ModuleRef::new(&()), 0).unwrap();
        runtime.write_u32(&env, 0, 42).unwrap();
        assert_eq!(runtime.read_memory(0), Some(42));
    }
}
