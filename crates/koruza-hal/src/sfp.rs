//! Pluggable optical transceiver (SFP) driver.
//!
//! The identity block is decoded once at construction; every
//! [`read`][Device::read] decodes a fresh diagnostic-monitoring block.

use koruza_types::KoruzaError;
use tracing::info;

use crate::bus::BusHandle;
use crate::codec::{
    OpticalModuleIdentity, OpticalModuleTelemetry, SFP_DIAGNOSTICS_LEN, SFP_IDENTITY_LEN,
};
use crate::device::{Device, DeviceIdentity, Reading};

/// Default address of the identity block.
pub const SFP_IDENTITY_ADDRESS: u8 = 0x50;
/// Default address of the diagnostic-monitoring block.
pub const SFP_DIAGNOSTICS_ADDRESS: u8 = 0x51;

/// Driver for one optical module.
pub struct OpticalModule {
    bus: BusHandle,
    identity_address: u8,
    diagnostics_address: u8,
    identity: OpticalModuleIdentity,
}

impl OpticalModule {
    /// Probe for a module and decode its identity block.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::DeviceNotFound`] when the module does not answer or its
    /// identity block cannot be read and decoded.
    pub fn probe(
        bus: BusHandle,
        identity_address: u8,
        diagnostics_address: u8,
    ) -> Result<Self, KoruzaError> {
        bus.probe(identity_address)?;
        let block = bus
            .read_registers(identity_address, 0, SFP_IDENTITY_LEN)
            .map_err(|fault| {
                KoruzaError::DeviceNotFound(format!("optical module identity unreadable: {fault}"))
            })?;
        let identity = OpticalModuleIdentity::decode(&block).ok_or_else(|| {
            KoruzaError::DeviceNotFound("optical module identity block is short".to_string())
        })?;
        info!(
            bus = bus.id(),
            serial = %identity.serial_number,
            model = %identity.model,
            "optical module attached"
        );
        Ok(Self {
            bus,
            identity_address,
            diagnostics_address,
            identity,
        })
    }

    pub fn bus_id(&self) -> u8 {
        self.bus.id()
    }

    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    pub fn module_identity(&self) -> &OpticalModuleIdentity {
        &self.identity
    }

    /// Check that the module is still plugged in.
    pub fn is_present(&self) -> bool {
        self.bus.probe(self.identity_address).is_ok()
    }
}

impl Device for OpticalModule {
    type Record = OpticalModuleTelemetry;

    fn read(&mut self) -> Reading<OpticalModuleTelemetry> {
        match self
            .bus
            .read_registers(self.diagnostics_address, 0, SFP_DIAGNOSTICS_LEN)
        {
            Ok(block) => OpticalModuleTelemetry::decode(&block).map_or(Reading::Absent, Reading::Ok),
            Err(_) => Reading::Fault,
        }
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::OpticalModule {
            bus: self.bus.id(),
            address: self.identity_address,
            identity: self.identity.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sim::{RecordingSink, SimBus};

    fn plug_module(sim: &SimBus) {
        let mut identity = vec![b' '; SFP_IDENTITY_LEN];
        identity[40..56].copy_from_slice(b"SFP-1310-20KM   ");
        identity[68..84].copy_from_slice(b"SN000042        ");
        sim.attach_with(SFP_IDENTITY_ADDRESS, &identity);

        let mut diag = vec![0u8; SFP_DIAGNOSTICS_LEN];
        diag[96..98].copy_from_slice(&(25i16 * 256).to_be_bytes());
        diag[104..106].copy_from_slice(&5_000u16.to_be_bytes());
        sim.attach_with(SFP_DIAGNOSTICS_ADDRESS, &diag);
    }

    fn handle(sim: &SimBus) -> BusHandle {
        BusHandle::new(2, Box::new(sim.clone()), Arc::new(RecordingSink::default()))
    }

    #[test]
    fn probe_decodes_identity_once() {
        let sim = SimBus::new();
        plug_module(&sim);
        let module =
            OpticalModule::probe(handle(&sim), SFP_IDENTITY_ADDRESS, SFP_DIAGNOSTICS_ADDRESS)
                .unwrap();
        assert_eq!(module.serial_number(), "SN000042");
        assert_eq!(module.module_identity().model, "SFP-1310-20KM");

        // Changing the identity registers afterwards does not affect the driver.
        sim.set_registers(SFP_IDENTITY_ADDRESS, 68, b"OTHER");
        assert_eq!(module.serial_number(), "SN000042");
    }

    #[test]
    fn read_decodes_diagnostics() {
        let sim = SimBus::new();
        plug_module(&sim);
        let mut module =
            OpticalModule::probe(handle(&sim), SFP_IDENTITY_ADDRESS, SFP_DIAGNOSTICS_ADDRESS)
                .unwrap();
        let t = module.read().ok().unwrap();
        assert!((t.temperature_c - 25.0).abs() < 1e-9);
        assert!((t.rx_power_mw - 0.5).abs() < 1e-9);
    }

    #[test]
    fn missing_module_is_not_found() {
        let sim = SimBus::new();
        let result =
            OpticalModule::probe(handle(&sim), SFP_IDENTITY_ADDRESS, SFP_DIAGNOSTICS_ADDRESS);
        assert!(matches!(result, Err(KoruzaError::DeviceNotFound(_))));
    }

    #[test]
    fn unplugged_module_reads_fault() {
        let sim = SimBus::new();
        plug_module(&sim);
        let mut module =
            OpticalModule::probe(handle(&sim), SFP_IDENTITY_ADDRESS, SFP_DIAGNOSTICS_ADDRESS)
                .unwrap();
        sim.detach(SFP_IDENTITY_ADDRESS);
        sim.detach(SFP_DIAGNOSTICS_ADDRESS);
        assert!(module.read().is_fault());
        assert!(!module.is_present());
    }

    #[test]
    fn identity_serializes_with_sfp_tag() {
        let sim = SimBus::new();
        plug_module(&sim);
        let module =
            OpticalModule::probe(handle(&sim), SFP_IDENTITY_ADDRESS, SFP_DIAGNOSTICS_ADDRESS)
                .unwrap();
        let json = serde_json::to_value(module.identity()).unwrap();
        assert_eq!(json["type"], "sfp");
        assert_eq!(json["bus"], 2);
        assert_eq!(json["serial_number"], "SN000042");
    }
}
