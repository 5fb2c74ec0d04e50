//! Example embedder: wires `ocre-core` to a real `wasmtime` guest runtime and
//! to simulated timer/GPIO/sensor event producers, the way the teacher's
//! `user-agent` binary wires `shared` to a live scanner pipeline.

mod config;
mod logger;
mod producers;
mod wasm_runtime;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use ocre_core::core::Core;
use ocre_core::runtime::ModuleRef;
use ocre_core::types::ResourceType;

use crate::config::{find_config_file, AgentConfig};
use crate::wasm_runtime::WasmRuntime;

fn main() -> anyhow::Result<()> {
    let cfg_path = find_config_file();
    let cfg = match &cfg_path {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    let _logger_handle = logger::init_logger(&cfg.log_level)?;
    info!(
        "starting ocre-agent (config: {})",
        cfg_path.as_deref().map(PathBuf::as_path).map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".into())
    );

    let runtime = WasmRuntime::new()?;
    let module_bytes = include_bytes!("../demos/echo.wat");
    let compiled = runtime.compile(module_bytes)?;

    let core = Arc::new(Core::init(cfg.core.clone(), runtime)?);
    let module = core.register_module(ModuleRef::new(&compiled))?;

    core.register_dispatcher(module, ResourceType::Timer, "on_timer")
        .unwrap_or_else(|e| warn!("no on_timer export bound: {e}"));
    core.register_dispatcher(module, ResourceType::Gpio, "on_gpio")
        .unwrap_or_else(|e| warn!("no on_gpio export bound: {e}"));
    core.register_dispatcher(module, ResourceType::Sensor, "on_sensor")
        .unwrap_or_else(|e| warn!("no on_sensor export bound: {e}"));

    let running = Arc::new(AtomicBool::new(true));
    let interval = Duration::from_millis(cfg.producer_interval_ms);

    let timer_handle = producers::spawn_timer_producer(Arc::clone(&core), module, interval, Arc::clone(&running));
    let gpio_handle =
        producers::spawn_gpio_producer(Arc::clone(&core), module, 0, interval * 2, Arc::clone(&running));
    let sensor_handle =
        producers::spawn_sensor_producer(Arc::clone(&core), module, 0, 1, interval * 3, Arc::clone(&running));

    let shutdown_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("shutdown signal received");
        shutdown_flag.store(false, Ordering::Release);
    })?;

    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    for handle in [timer_handle, gpio_handle, sensor_handle] {
        if let Err(panic) = handle.join() {
            error!("producer thread panicked: {panic:?}");
        }
    }

    match Arc::try_unwrap(core) {
        Ok(core) => core.shutdown(),
        Err(_) => warn!("core still referenced after producers joined, skipping explicit shutdown"),
    }

    info!("ocre-agent stopped");
    Ok(())
}
