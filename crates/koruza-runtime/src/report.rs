//! Payloads published on the `status` topic, and the bus-fault reporter that
//! turns Bus Adapter faults into `process` error events.

use koruza_hal::bus::{BusFault, FaultSink};
use koruza_hal::codec::{MotorState, OpticalModuleTelemetry};
use koruza_hal::onewire::TemperatureReading;
use koruza_middleware::MessageBus;
use koruza_types::{ProcessEvent, Topic};
use serde::Serialize;
use tracing::warn;

use crate::netmeasure::LinkMeasurement;

/// A telemetry record tagged by the kind of device that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StatusReport {
    #[serde(rename = "motors")]
    Motors(MotorState),
    #[serde(rename = "sfp")]
    OpticalModule {
        bus: u8,
        serial_number: String,
        #[serde(flatten)]
        telemetry: OpticalModuleTelemetry,
    },
    #[serde(rename = "1wire")]
    Temperature(TemperatureReading),
    #[serde(rename = "netmeasure")]
    Netmeasure(LinkMeasurement),
}

impl StatusReport {
    pub fn publish(&self, bus: &MessageBus) -> usize {
        bus.publish(Topic::Status, self)
    }
}

/// [`FaultSink`] publishing every bus fault as a `process` error event.
pub struct BusFaultReporter {
    bus: MessageBus,
}

impl BusFaultReporter {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }
}

impl FaultSink for BusFaultReporter {
    fn report(&self, fault: &BusFault) {
        warn!(
            bus = fault.bus,
            address = fault.address,
            offset = fault.offset,
            length = fault.length,
            details = %fault.details,
            "bus fault"
        );
        let event = ProcessEvent::bus_fault(
            fault.bus,
            fault.address,
            fault.offset,
            fault.length,
            &fault.details,
        );
        self.bus.publish(Topic::Process, &event);
    }
}
