//! Dispatcher table operations (`spec.md` §4.3, component C3).

use crate::error::{OcreError, Result};
use crate::registry::ModuleRegistry;
use crate::runtime::GuestRuntime;
use crate::types::{EventRecord, ModuleId, ResourceType};

/// Binds `name` (a guest export) as the dispatcher for `ty` on the module
/// identified by `module`. Rebinding a type replaces the previous binding;
/// there is no unbind operation (`spec.md` §4.3).
///
/// Unlike the original C API (`ocre_register_dispatcher(exec_env, type,
/// name)`, which recovers the module handle *from* the exec env), this takes
/// the module handle directly — the caller already has it, the exec env
/// belongs to exactly one module either way, and requiring a
/// guest-runtime-specific "reverse lookup" capability would bloat the
/// [`GuestRuntime`] trait for no behavioral difference. See DESIGN.md.
pub fn register_dispatcher<R: GuestRuntime>(
    registry: &ModuleRegistry<R>,
    runtime: &R,
    module: ModuleId,
    ty: ResourceType,
    name: &str,
) -> Result<()>
where
    R::Function: Clone,
{
    let ctx = registry
        .get_context(module)
        .ok_or(OcreError::NotFound("module not registered"))?;

    let func = runtime
        .resolve_export(&ctx.exec_env, name)?
        .ok_or(OcreError::NotFound("export not found"))?;

    ctx.set_dispatcher(ty, func);
    Ok(())
}

/// Marshals an [`EventRecord`] into the integer argument list the guest
/// dispatcher expects, per `spec.md` §4.4 step 4:
/// - Timer: `(id)`
/// - GPIO: `(id, state)`
/// - Sensor: `(id, port, state)`
pub fn marshal_args(event: &EventRecord) -> Vec<u32> {
    match event.kind {
        ResourceType::Timer => vec![event.id],
        ResourceType::Gpio => vec![event.id, event.state],
        ResourceType::Sensor => vec![event.id, event.port, event.state],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModuleId;

    fn ev(kind: ResourceType) -> EventRecord {
        EventRecord { kind, owner: ModuleId::from_raw(1), id: 7, port: 9, state: 42 }
    }

    #[test]
    fn marshals_timer_args() {
        assert_eq!(marshal_args(&ev(ResourceType::Timer)), vec![7]);
    }

    #[test]
    fn marshals_gpio_args() {
        assert_eq!(marshal_args(&ev(ResourceType::Gpio)), vec![7, 42]);
    }

    #[test]
    fn marshals_sensor_args() {
        assert_eq!(marshal_args(&ev(ResourceType::Sensor)), vec![7, 9, 42]);
    }
}
