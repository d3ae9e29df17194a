//! [`SlowLoop`] – filesystem and network polling on its own thread.
//!
//! The slow loop never touches the bus or the controller.  It owns the
//! 1-wire probes, and reports changes to the probe list to the fast loop
//! over a channel; everything else it produces is published on the message
//! bus.  It sleeps a flat second between iterations, so its periods are
//! soft upper bounds.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use koruza_hal::device::{Device, DeviceIdentity, Reading};
use koruza_hal::onewire::TemperatureProbe;
use koruza_middleware::MessageBus;
use koruza_types::{ProcessEvent, Topic};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::netmeasure::TelemetrySource;
use crate::report::StatusReport;
use crate::schedule::Schedule;

pub const SLOW_TICK: Duration = Duration::from_secs(1);
pub const TEMPERATURE_PERIOD: Duration = Duration::from_secs(15);
pub const NETMEASURE_PERIOD: Duration = Duration::from_secs(3);

const TEMPERATURE: &str = "temperature";
const NETMEASURE: &str = "netmeasure";

pub struct SlowLoop {
    onewire_dir: PathBuf,
    probes: Vec<TemperatureProbe>,
    source: Box<dyn TelemetrySource + Send>,
    bus: MessageBus,
    measurement_host: watch::Receiver<Option<String>>,
    probe_updates: mpsc::Sender<Vec<DeviceIdentity>>,
    schedule: Schedule,
    shutdown: Arc<AtomicBool>,
}

impl SlowLoop {
    pub fn new(
        onewire_dir: impl Into<PathBuf>,
        source: Box<dyn TelemetrySource + Send>,
        bus: MessageBus,
        measurement_host: watch::Receiver<Option<String>>,
        probe_updates: mpsc::Sender<Vec<DeviceIdentity>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let mut schedule = Schedule::new();
        schedule.register(TEMPERATURE, TEMPERATURE_PERIOD);
        schedule.register(NETMEASURE, NETMEASURE_PERIOD);
        Self {
            onewire_dir: onewire_dir.into(),
            probes: Vec::new(),
            source,
            bus,
            measurement_host,
            probe_updates,
            schedule,
            shutdown,
        }
    }

    /// Start the loop on a dedicated thread.
    ///
    /// # Errors
    ///
    /// The OS error if the thread cannot be spawned.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("slow-loop".to_string())
            .spawn(move || self.run())
    }

    /// Run until the shutdown flag is raised.
    pub fn run(mut self) {
        info!("slow loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            if panic::catch_unwind(AssertUnwindSafe(|| self.tick())).is_err() {
                error!("slow loop tick panicked");
            }
            thread::sleep(SLOW_TICK);
        }
        info!("slow loop stopped");
    }

    pub fn tick(&mut self) {
        if self.probes.is_empty() {
            self.probes = TemperatureProbe::enumerate(&self.onewire_dir);
            if !self.probes.is_empty() {
                self.announce_probes();
            }
        }

        if self.schedule.due(TEMPERATURE) {
            self.poll_temperatures();
        }

        if self.schedule.due(NETMEASURE) {
            self.poll_netmeasure();
        }
    }

    fn poll_temperatures(&mut self) {
        let before = self.probes.len();
        let bus = &self.bus;
        self.probes.retain_mut(|probe| match probe.read() {
            Reading::Ok(reading) => {
                StatusReport::Temperature(reading).publish(bus);
                true
            }
            Reading::Absent => true,
            Reading::Fault => {
                info!(device = probe.device(), "1-wire probe detached");
                false
            }
        });
        if self.probes.len() != before {
            self.announce_probes();
        }
    }

    fn poll_netmeasure(&mut self) {
        let host = self.measurement_host.borrow().clone();
        let Some(host) = host else {
            return;
        };
        match self.source.fetch(&host) {
            Ok(measurement) => {
                StatusReport::Netmeasure(measurement).publish(&self.bus);
            }
            Err(e) => {
                warn!(%host, error = %e, "link measurement failed");
                self.bus
                    .publish(Topic::Process, &ProcessEvent::error("netmeasure", e.to_string()));
            }
        }
    }

    fn announce_probes(&self) {
        let identities = self.probes.iter().map(Device::identity).collect();
        if self.probe_updates.send(identities).is_err() {
            debug!("fast loop is gone, probe update dropped");
        }
    }
}
