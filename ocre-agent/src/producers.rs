//! Simulated hardware event producers, grounded in the teacher's
//! `scanner/worker.rs` pattern: a named, config-interval thread loop that
//! keeps running until told to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use ocre_core::{Core, ModuleId, PostedEvent};
use ocre_core::runtime::GuestRuntime;

/// One simulated producer thread, posting events for a single owning module
/// on a fixed interval until `running` clears.
pub fn spawn_timer_producer<R: GuestRuntime>(
    core: Arc<Core<R>>,
    owner: ModuleId,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R::Function: Clone,
{
    thread::Builder::new()
        .name("ocre-producer-timer".into())
        .spawn(move || {
            let mut tick: u32 = 0;
            while running.load(Ordering::Acquire) {
                thread::sleep(interval);
                if !running.load(Ordering::Acquire) {
                    break;
                }
                tick = tick.wrapping_add(1);
                if let Err(e) = core.post_event(PostedEvent::Timer { owner, id: tick }) {
                    warn!("timer producer: post_event failed: {e}");
                } else {
                    debug!("timer producer: posted tick {tick}");
                }
            }
        })
        .expect("failed to spawn timer producer thread")
}

pub fn spawn_gpio_producer<R: GuestRuntime>(
    core: Arc<Core<R>>,
    owner: ModuleId,
    pin: u32,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R::Function: Clone,
{
    thread::Builder::new()
        .name("ocre-producer-gpio".into())
        .spawn(move || {
            let mut state = 0u32;
            while running.load(Ordering::Acquire) {
                thread::sleep(interval);
                if !running.load(Ordering::Acquire) {
                    break;
                }
                state ^= 1;
                if let Err(e) = core.post_event(PostedEvent::Gpio { owner, id: pin, state }) {
                    warn!("gpio producer: post_event failed: {e}");
                } else {
                    debug!("gpio producer: pin {pin} -> {state}");
                }
            }
        })
        .expect("failed to spawn gpio producer thread")
}

pub fn spawn_sensor_producer<R: GuestRuntime>(
    core: Arc<Core<R>>,
    owner: ModuleId,
    sensor_id: u32,
    port: u32,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R::Function: Clone,
{
    thread::Builder::new()
        .name("ocre-producer-sensor".into())
        .spawn(move || {
            let mut reading = 0u32;
            while running.load(Ordering::Acquire) {
                thread::sleep(interval);
                if !running.load(Ordering::Acquire) {
                    break;
                }
                reading = (reading + 7) % 1000;
                if let Err(e) = core.post_event(PostedEvent::Sensor { owner, id: sensor_id, port, state: reading })
                {
                    warn!("sensor producer: post_event failed: {e}");
                } else {
                    debug!("sensor producer: sensor {sensor_id} port {port} -> {reading}");
                }
            }
        })
        .expect("failed to spawn sensor producer thread")
}
