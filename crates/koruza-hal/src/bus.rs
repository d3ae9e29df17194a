//! Bus Adapter – register-level access to a shared two-wire peripheral bus.
//!
//! [`RawBus`] is the byte-level transport (a Linux i2c-dev node in
//! production, [`SimBus`][crate::sim::SimBus] in tests).  [`BusHandle`]
//! layers the register protocol on top of it:
//!
//! * a read writes the offset byte, then reads `length` bytes one at a time;
//! * a write sends the offset byte followed by the payload in one transfer;
//! * a probe writes a single byte to the candidate address.
//!
//! Any I/O failure during a read or write aborts the whole transfer, drops
//! partial data and is reported to the handle's [`FaultSink`] before the
//! caller sees the error.  Probe failures are *not* reported: device absence
//! is an expected condition.
//!
//! Handles are `Rc`-shared and therefore `!Send`: every driver built on a
//! bus lives in the single context that owns the bus.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::Arc;

use koruza_types::KoruzaError;
use tracing::debug;

/// Byte-level transport to the devices on one physical bus.
pub trait RawBus {
    /// Write a single byte to the device at `address`.
    fn write_byte(&mut self, address: u8, value: u8) -> io::Result<()>;

    /// Read a single byte from the device at `address`.
    fn read_byte(&mut self, address: u8) -> io::Result<u8>;

    /// Write `data` to the device at `address` in a single transfer.
    fn write_block(&mut self, address: u8, data: &[u8]) -> io::Result<()>;

    /// Admission check for a device.  Defaults to writing a zero byte.
    fn probe(&mut self, address: u8) -> io::Result<()> {
        self.write_byte(address, 0)
    }
}

/// Context of a failed register transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFault {
    pub bus: u8,
    pub address: u8,
    pub offset: u8,
    pub length: usize,
    pub details: String,
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus {} address {:#04x} offset {} ({} bytes): {}",
            self.bus, self.address, self.offset, self.length, self.details
        )
    }
}

impl From<BusFault> for KoruzaError {
    fn from(fault: BusFault) -> Self {
        KoruzaError::BusFault {
            bus: fault.bus,
            address: fault.address,
            offset: fault.offset,
            length: fault.length,
            details: fault.details,
        }
    }
}

/// Side channel that receives every bus fault as it happens.
pub trait FaultSink: Send + Sync {
    fn report(&self, fault: &BusFault);
}

/// Shared, non-owning reference to an open bus.
///
/// Cloning is cheap; all clones talk to the same [`RawBus`].
#[derive(Clone)]
pub struct BusHandle {
    id: u8,
    raw: Rc<RefCell<Box<dyn RawBus>>>,
    sink: Arc<dyn FaultSink>,
}

impl BusHandle {
    pub fn new(id: u8, raw: Box<dyn RawBus>, sink: Arc<dyn FaultSink>) -> Self {
        Self {
            id,
            raw: Rc::new(RefCell::new(raw)),
            sink,
        }
    }

    /// Identifier of the physical bus (the `N` in `/dev/i2c-N`).
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Check whether a device answers at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`KoruzaError::DeviceNotFound`] when nothing acknowledges.
    pub fn probe(&self, address: u8) -> Result<(), KoruzaError> {
        self.raw.borrow_mut().probe(address).map_err(|e| {
            KoruzaError::DeviceNotFound(format!(
                "no device at {address:#04x} on bus {}: {e}",
                self.id
            ))
        })
    }

    /// Read `length` registers starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the [`BusFault`] (already reported to the sink) when any step
    /// of the transfer fails.  No partial data is ever returned.
    pub fn read_registers(&self, address: u8, offset: u8, length: usize) -> Result<Vec<u8>, BusFault> {
        let result = self.sequential_read(address, offset, length);
        result.map_err(|e| self.fault(address, offset, length, e))
    }

    fn sequential_read(&self, address: u8, offset: u8, length: usize) -> io::Result<Vec<u8>> {
        let mut raw = self.raw.borrow_mut();
        raw.write_byte(address, offset)?;
        let mut data = Vec::with_capacity(length);
        for _ in 0..length {
            data.push(raw.read_byte(address)?);
        }
        Ok(data)
    }

    /// Write `bytes` to consecutive registers starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the [`BusFault`] (already reported to the sink) on failure.
    pub fn write_registers(&self, address: u8, offset: u8, bytes: &[u8]) -> Result<(), BusFault> {
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(offset);
        frame.extend_from_slice(bytes);
        let result = self.raw.borrow_mut().write_block(address, &frame);
        result.map_err(|e| self.fault(address, offset, bytes.len(), e))
    }

    fn fault(&self, address: u8, offset: u8, length: usize, error: io::Error) -> BusFault {
        let fault = BusFault {
            bus: self.id,
            address,
            offset,
            length,
            details: error.to_string(),
        };
        debug!(%fault, "bus transfer failed");
        self.sink.report(&fault);
        fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{RecordingSink, SimBus};

    fn handle(sim: &SimBus) -> (BusHandle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let handle = BusHandle::new(1, Box::new(sim.clone()), sink.clone());
        (handle, sink)
    }

    #[test]
    fn read_registers_returns_requested_window() {
        let sim = SimBus::new();
        sim.attach_with(0x20, &[10, 11, 12, 13, 14]);
        let (bus, sink) = handle(&sim);

        assert_eq!(bus.read_registers(0x20, 1, 3).unwrap(), vec![11, 12, 13]);
        assert!(sink.faults().is_empty());
    }

    #[test]
    fn write_registers_lands_at_offset() {
        let sim = SimBus::new();
        sim.attach(0x20);
        let (bus, _) = handle(&sim);

        bus.write_registers(0x20, 4, &[7, 8]).unwrap();
        assert_eq!(&sim.registers(0x20)[4..6], &[7, 8]);
    }

    #[test]
    fn fault_mid_read_discards_data_and_reports() {
        let sim = SimBus::new();
        sim.attach_with(0x20, &[1, 2, 3, 4]);
        sim.fail_after_reads(2);
        let (bus, sink) = handle(&sim);

        let fault = bus.read_registers(0x20, 0, 4).unwrap_err();
        assert_eq!(fault.bus, 1);
        assert_eq!(fault.address, 0x20);
        assert_eq!(fault.offset, 0);
        assert_eq!(fault.length, 4);
        assert_eq!(sink.faults(), vec![fault]);
    }

    #[test]
    fn write_to_missing_device_reports_fault() {
        let sim = SimBus::new();
        let (bus, sink) = handle(&sim);

        assert!(bus.write_registers(0x30, 0, &[1]).is_err());
        assert_eq!(sink.faults().len(), 1);
    }

    #[test]
    fn probe_absence_is_not_reported_as_fault() {
        let sim = SimBus::new();
        let (bus, sink) = handle(&sim);

        let err = bus.probe(0x04).unwrap_err();
        assert!(matches!(err, KoruzaError::DeviceNotFound(_)));
        assert!(sink.faults().is_empty());
        assert_eq!(sim.probe_count(0x04), 1);
    }
}
