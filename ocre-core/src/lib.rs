//! Event-dispatch and module-lifecycle core for an embedded WebAssembly
//! container runtime.
//!
//! This crate owns the queue, registry, dispatcher table, worker pool, and
//! resource accounting described by the public API on [`core::Core`]. It is
//! generic over the guest WASM engine through the [`runtime::GuestRuntime`]
//! trait and never links one itself; `ocre-agent` in this workspace wires a
//! concrete `wasmtime`-backed implementation.

pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod registry;
pub mod resources;
pub mod runtime;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use core::Core;
pub use error::{OcreError, Result};
pub use types::{EventRecord, ModuleId, PostedEvent, ResourceType};

/// Byte size of one queued [`types::EventRecord`], used to translate the
/// configured byte budget (`spec.md` §6 `Q`) into a record count.
pub fn queue_record_size() -> usize {
    std::mem::size_of::<types::EventRecord>()
}
