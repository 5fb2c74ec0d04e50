//! Resource accounting & cleanup (`spec.md` §4.5, component C5).
//!
//! Per-module counters live on [`crate::registry::ModuleContext`]; this module
//! holds the process-wide cleanup handler table.

use std::sync::Mutex;

use crate::error::{OcreError, Result};
use crate::types::{ModuleId, ResourceType, RESOURCE_TYPE_COUNT};

/// A cleanup callback: given the module being unregistered, release whatever
/// resources of its resource type that module holds.
pub type CleanupHandler = Box<dyn Fn(ModuleId) + Send + Sync>;

/// Process-wide table mapping resource type to an optional cleanup callback.
///
/// `spec.md` describes this table as "not guarded by a lock; it is expected
/// to be populated during initialization before any modules are registered."
/// We guard each slot with its own mutex anyway: `register_cleanup_handler`
/// allows replacement at any time (§8 round-trip property: "only `g` is
/// called on subsequent cleanups"), and an unsynchronized `Option` write
/// racing a concurrent read during `cleanup_module` would be undefined
/// behavior in Rust, not just a logic bug as it is in C. The mutex costs
/// nothing in the expected write-once-at-init usage and removes a footgun
/// for embedders who don't honor the convention. See DESIGN.md.
pub struct CleanupTable {
    slots: [Mutex<Option<CleanupHandler>>; RESOURCE_TYPE_COUNT],
}

impl CleanupTable {
    pub fn new() -> Self {
        CleanupTable {
            slots: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
        }
    }

    /// Stores or replaces the handler for `ty`. Set-once semantics are
    /// sufficient, but replacement is allowed (`spec.md` §4.5).
    pub fn register(&self, ty: ResourceType, handler: CleanupHandler) -> Result<()> {
        *self.slots[ty.index()].lock().unwrap() = Some(handler);
        Ok(())
    }

    /// Invokes every non-null handler with `module`, in resource-type order.
    /// Handlers are responsible for releasing their own resource type and
    /// decrementing its counter as they do so (`spec.md` §4.5 Cleanup
    /// protocol — the core itself never zeroes counters).
    pub fn cleanup_module(&self, module: ModuleId) {
        for ty in ResourceType::ALL {
            let handler = self.slots[ty.index()].lock().unwrap();
            if let Some(handler) = handler.as_ref() {
                handler(module);
            }
        }
    }
}

impl Default for CleanupTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a raw `u32` resource-type tag, mapping an out-of-range value to
/// [`OcreError::Invalid`] (used at API boundaries that take a raw tag).
pub fn validate_resource_type(raw: u32) -> Result<ResourceType> {
    ResourceType::from_index(raw).ok_or(OcreError::Invalid("unknown resource type"))
}
