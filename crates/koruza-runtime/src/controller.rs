//! [`Controller`] – owner of the drivers, the configuration and the message
//! bus.
//!
//! The controller lives in the fast-loop context and is the single writer of
//! every driver slot and of the configuration.  Driver slots are plain
//! `Option`s: an empty slot is re-probed on every
//! [`attach_devices`][Controller::attach_devices] call, and a slot whose
//! device stops answering is emptied by
//! [`poll_devices`][Controller::poll_devices].

use koruza_hal::device::{Device, DeviceIdentity, Reading};
use koruza_hal::motor::{MOTOR_ADDRESS, Motor};
use koruza_hal::registry::BusRegistry;
use koruza_hal::sfp::{OpticalModule, SFP_DIAGNOSTICS_ADDRESS, SFP_IDENTITY_ADDRESS};
use koruza_middleware::MessageBus;
use koruza_types::{KoruzaError, Message, ProcessEvent, Topic};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::report::StatusReport;
use crate::system::{SystemControl, node_id};

/// Daemon version reported in status snapshots and the `started` event.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where the bus-attached devices are expected.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLayout {
    pub motor_bus: u8,
    pub motor_address: u8,
    /// One optical-module slot per listed bus.
    pub sfp_buses: Vec<u8>,
    pub sfp_identity_address: u8,
    pub sfp_diagnostics_address: u8,
}

impl Default for DeviceLayout {
    fn default() -> Self {
        Self {
            motor_bus: 1,
            motor_address: MOTOR_ADDRESS,
            sfp_buses: vec![1],
            sfp_identity_address: SFP_IDENTITY_ADDRESS,
            sfp_diagnostics_address: SFP_DIAGNOSTICS_ADDRESS,
        }
    }
}

/// Point-in-time view of the node, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub version: String,
    pub serial_number: Uuid,
    pub ip: Option<String>,
    pub config: Map<String, Value>,
    pub devices: Vec<DeviceIdentity>,
}

pub struct Controller {
    layout: DeviceLayout,
    config: ConfigStore,
    registry: BusRegistry,
    motor: Option<Motor>,
    sfps: Vec<Option<OpticalModule>>,
    temperature_probes: Vec<DeviceIdentity>,
    bus: MessageBus,
    system: Box<dyn SystemControl>,
    node_id: Uuid,
    ip: Option<String>,
    measurement_host: watch::Sender<Option<String>>,
    reboot_requested: bool,
}

impl Controller {
    pub fn new(
        layout: DeviceLayout,
        config: ConfigStore,
        registry: BusRegistry,
        bus: MessageBus,
        system: Box<dyn SystemControl>,
    ) -> Self {
        let node_id = node_id(system.mac_address().as_deref());
        let (measurement_host, _) =
            watch::channel(config.data_measurement_host().map(str::to_string));
        let sfps = layout.sfp_buses.iter().map(|_| None).collect();
        info!(%node_id, version = VERSION, "controller initialised");
        Self {
            layout,
            config,
            registry,
            motor: None,
            sfps,
            temperature_probes: Vec::new(),
            bus,
            system,
            node_id,
            ip: None,
            measurement_host,
            reboot_requested: false,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn motor_mut(&mut self) -> Option<&mut Motor> {
        self.motor.as_mut()
    }

    /// Receiver following the configured measurement host.
    pub fn measurement_host(&self) -> watch::Receiver<Option<String>> {
        self.measurement_host.subscribe()
    }

    pub fn status(&self) -> StatusSnapshot {
        let mut devices: Vec<DeviceIdentity> = self.motor.iter().map(Device::identity).collect();
        devices.extend(self.sfps.iter().flatten().map(Device::identity));
        devices.extend(self.temperature_probes.iter().cloned());
        StatusSnapshot {
            version: VERSION.to_string(),
            serial_number: self.node_id,
            ip: self.ip.clone(),
            config: self.config.values().clone(),
            devices,
        }
    }

    /// Merge `changes` into the configuration and apply its side effects.
    ///
    /// # Errors
    ///
    /// As [`ConfigStore::update`]; on error nothing changed.
    pub fn set_config(&mut self, changes: &Map<String, Value>) -> Result<StatusSnapshot, KoruzaError> {
        self.config.update(changes)?;
        self.apply_hostname();
        self.measurement_host
            .send_replace(self.config.data_measurement_host().map(str::to_string));
        Ok(self.status())
    }

    /// Write the configured name to the host name files.  Failures are
    /// published, not returned.
    pub fn apply_hostname(&self) {
        let name = self.config.name();
        if let Err(e) = self.system.set_hostname(name) {
            warn!(name, error = %e, "failed to apply hostname");
            self.bus
                .publish(Topic::Process, &ProcessEvent::error("hostname", e.to_string()));
        }
    }

    /// Forward an opaque payload to `application.<id>`.
    pub fn call_application(&self, application_id: &str, payload: Value) {
        self.bus
            .send(Message::new(Topic::Application(application_id.to_string()), payload));
    }

    /// Mark the node for reboot once the current reply has been sent.
    pub fn request_reboot(&mut self) {
        self.reboot_requested = true;
    }

    /// Issue a reboot requested through [`request_reboot`][Self::request_reboot].
    pub fn perform_pending_reboot(&mut self) {
        if !std::mem::take(&mut self.reboot_requested) {
            return;
        }
        if let Err(e) = self.system.reboot() {
            warn!(error = %e, "reboot failed");
            self.bus
                .publish(Topic::Process, &ProcessEvent::error("reboot", e.to_string()));
        }
    }

    /// Replace the known temperature probes (enumerated by the slow loop).
    pub fn set_temperature_probes(&mut self, probes: Vec<DeviceIdentity>) {
        debug!(count = probes.len(), "temperature probes updated");
        self.temperature_probes = probes;
    }

    // ────────────────────────────────────────────────────────────────────────
    // Scheduled work
    // ────────────────────────────────────────────────────────────────────────

    /// Try to build the driver of every empty slot.
    pub fn attach_devices(&mut self) {
        if self.motor.is_none() {
            let layout = &self.layout;
            match self
                .registry
                .get(layout.motor_bus)
                .and_then(|bus| Motor::probe(bus, layout.motor_address))
            {
                Ok(motor) => self.motor = Some(motor),
                Err(e) => debug!(error = %e, "motor not attached"),
            }
        }

        for (slot, &bus_id) in self.sfps.iter_mut().zip(&self.layout.sfp_buses) {
            if slot.is_some() {
                continue;
            }
            match self.registry.get(bus_id).and_then(|bus| {
                OpticalModule::probe(
                    bus,
                    self.layout.sfp_identity_address,
                    self.layout.sfp_diagnostics_address,
                )
            }) {
                Ok(module) => *slot = Some(module),
                Err(e) => debug!(bus = bus_id, error = %e, "optical module not attached"),
            }
        }
    }

    /// Read every attached bus device and publish its telemetry.
    ///
    /// A faulted device that no longer answers its probe is detached.
    pub fn poll_devices(&mut self) {
        let mut motor_gone = false;
        if let Some(motor) = self.motor.as_mut() {
            match motor.read() {
                Reading::Ok(state) => {
                    StatusReport::Motors(state).publish(&self.bus);
                }
                Reading::Absent => {}
                Reading::Fault => motor_gone = !motor.is_present(),
            }
        }
        if motor_gone {
            info!("motor controller detached");
            self.motor = None;
        }

        for slot in &mut self.sfps {
            let Some(module) = slot.as_mut() else {
                continue;
            };
            match module.read() {
                Reading::Ok(telemetry) => {
                    StatusReport::OpticalModule {
                        bus: module.bus_id(),
                        serial_number: module.serial_number().to_string(),
                        telemetry,
                    }
                    .publish(&self.bus);
                }
                Reading::Absent => {}
                Reading::Fault => {
                    if !module.is_present() {
                        info!(bus = module.bus_id(), "optical module detached");
                        *slot = None;
                    }
                }
            }
        }
    }

    /// Clear an expired motor command pulse.
    ///
    /// A failed clearing write is reported as a `process` error and retried
    /// on the next call.
    pub fn service_motor(&mut self) {
        let Some(motor) = self.motor.as_mut() else {
            return;
        };
        if let Err(e) = motor.service() {
            warn!(error = %e, "motor command clear failed, retrying");
            self.bus
                .publish(Topic::Process, &ProcessEvent::error("motors", e.to_string()));
        }
    }

    /// Look the IP address up again while it is unknown.
    pub fn refresh_ip(&mut self) {
        if self.ip.is_some() {
            return;
        }
        self.ip = self.system.ip_address();
        if let Some(ip) = &self.ip {
            info!(%ip, "IP address acquired");
        }
    }

    pub fn publish_heartbeat(&self) {
        self.bus.publish(Topic::Process, &ProcessEvent::watchdog_now());
    }

    pub fn publish_started(&self) {
        self.bus.publish(
            Topic::Process,
            &ProcessEvent::Started {
                version: VERSION.to_string(),
            },
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Test fixture
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fixture {
    use std::sync::Arc;

    use koruza_hal::bus::RawBus;
    use koruza_hal::codec::{MotorState, SFP_DIAGNOSTICS_LEN, SFP_IDENTITY_LEN};
    use koruza_hal::sim::SimBus;
    use tempfile::TempDir;

    use super::*;
    use crate::report::BusFaultReporter;
    use crate::system::RecordingSystem;

    pub const MAC: &str = "b8:27:eb:00:00:01";

    pub struct Fixture {
        pub controller: Controller,
        pub sim: SimBus,
        pub bus: MessageBus,
        pub system: RecordingSystem,
        pub dir: TempDir,
    }

    pub fn plug_motor(sim: &SimBus) {
        let state = MotorState {
            next_x: 100,
            next_y: 200,
            next_f: 300,
            speed: 50,
            accel: 10,
            ..MotorState::default()
        };
        sim.attach_with(MOTOR_ADDRESS, &state.encode());
    }

    pub fn plug_sfp(sim: &SimBus) {
        let mut identity = vec![b' '; SFP_IDENTITY_LEN];
        identity[68..84].copy_from_slice(b"SN-FIXTURE      ");
        sim.attach_with(SFP_IDENTITY_ADDRESS, &identity);
        let mut diag = vec![0u8; SFP_DIAGNOSTICS_LEN];
        diag[104..106].copy_from_slice(&10_000u16.to_be_bytes());
        sim.attach_with(SFP_DIAGNOSTICS_ADDRESS, &diag);
    }

    /// A controller over an empty simulated bus with an empty config.
    pub fn controller() -> Fixture {
        controller_with(|system| Box::new(system))
    }

    /// As [`controller`], with the recording system wrapped by `wrap`.
    pub fn controller_with(
        wrap: impl FnOnce(RecordingSystem) -> Box<dyn SystemControl>,
    ) -> Fixture {
        let sim = SimBus::new();
        let bus = MessageBus::default();
        let system = RecordingSystem::new(Some(MAC), Some("10.0.0.7"));
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::open(dir.path().join("config.json")).unwrap();

        let opener_sim = sim.clone();
        let registry = BusRegistry::new(
            Box::new(move |_| Ok(Box::new(opener_sim.clone()) as Box<dyn RawBus>)),
            Arc::new(BusFaultReporter::new(bus.clone())),
        );
        let controller = Controller::new(
            DeviceLayout::default(),
            config,
            registry,
            bus.clone(),
            wrap(system.clone()),
        );
        Fixture {
            controller,
            sim,
            bus,
            system,
            dir,
        }
    }
}
