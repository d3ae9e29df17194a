//! [`FastLoop`] – the context that owns the bus.
//!
//! Every tick:
//!
//! 1. **Commands** – wait at most 10 ms for one request and answer it.
//! 2. **Probe updates** – take the latest 1-wire enumeration from the slow
//!    loop.
//! 3. **Motor service** – clear an expired command pulse (retried on the
//!    next tick if the write fails).
//! 4. **Attach** – re-probe every empty driver slot.
//! 5. **Poll** (every 50 ms) – read and publish motor and optical-module
//!    telemetry.
//! 6. **IP** (every 30 s, while unknown) – look the address up.
//! 7. **Heartbeat** (every 30 s) – publish a `watchdog` event.
//!
//! Each step handles its own errors, so a failing step never skips the ones
//! after it.  A panicking tick is logged and the loop carries on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use koruza_hal::device::DeviceIdentity;
use koruza_middleware::CommandChannel;
use tracing::{error, info};

use crate::controller::Controller;
use crate::dispatch::Dispatcher;
use crate::schedule::Schedule;

pub const DEVICE_POLL_PERIOD: Duration = Duration::from_millis(50);
pub const IP_REFRESH_PERIOD: Duration = Duration::from_secs(30);
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

const DEVICE_POLL: &str = "device_poll";
const IP_REFRESH: &str = "ip_refresh";
const HEARTBEAT: &str = "heartbeat";

pub struct FastLoop {
    controller: Controller,
    commands: CommandChannel,
    dispatcher: Dispatcher,
    probe_updates: mpsc::Receiver<Vec<DeviceIdentity>>,
    schedule: Schedule,
    shutdown: Arc<AtomicBool>,
}

impl FastLoop {
    pub fn new(
        controller: Controller,
        commands: CommandChannel,
        probe_updates: mpsc::Receiver<Vec<DeviceIdentity>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let mut schedule = Schedule::new();
        schedule.register(DEVICE_POLL, DEVICE_POLL_PERIOD);
        schedule.register(IP_REFRESH, IP_REFRESH_PERIOD);
        schedule.register(HEARTBEAT, HEARTBEAT_PERIOD);
        Self {
            controller,
            commands,
            dispatcher: Dispatcher::new(),
            probe_updates,
            schedule,
            shutdown,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run until the shutdown flag is raised.
    pub fn run(&mut self) {
        info!("fast loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            if panic::catch_unwind(AssertUnwindSafe(|| self.tick())).is_err() {
                error!("fast loop tick panicked");
            }
        }
        info!("fast loop stopped");
    }

    /// Run one iteration.
    pub fn tick(&mut self) {
        if let Some(pending) = self.commands.poll() {
            let reply = self
                .dispatcher
                .handle_frame(&mut self.controller, pending.frame());
            pending.respond(reply);
            self.controller.perform_pending_reboot();
        }

        while let Ok(probes) = self.probe_updates.try_recv() {
            self.controller.set_temperature_probes(probes);
        }

        self.controller.service_motor();
        self.controller.attach_devices();

        if self.schedule.due(DEVICE_POLL) {
            self.controller.poll_devices();
        }
        if self.schedule.due(IP_REFRESH) {
            self.controller.refresh_ip();
        }
        if self.schedule.due(HEARTBEAT) {
            self.controller.publish_heartbeat();
        }
    }
}
