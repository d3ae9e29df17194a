//! In-process simulated bus for CI/CD testing without physical hardware.
//!
//! [`SimBus`] emulates register-addressed peripherals the way the motor
//! controller and optical modules behave on the wire: the first byte of a
//! write sets the register pointer, further bytes are stored at the pointer,
//! and single-byte reads return the register under the pointer before
//! advancing it.
//!
//! Clones share state, so a test can hand one clone to a
//! [`BusHandle`][crate::bus::BusHandle] and keep another to seed registers
//! and inspect what the drivers wrote.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use koruza_hal::bus::BusHandle;
//! use koruza_hal::sim::{RecordingSink, SimBus};
//!
//! let sim = SimBus::new();
//! sim.attach_with(0x50, b"hello");
//! let bus = BusHandle::new(1, Box::new(sim.clone()), Arc::new(RecordingSink::default()));
//! assert_eq!(bus.read_registers(0x50, 0, 5).unwrap(), b"hello".to_vec());
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;
use std::sync::Mutex;

use crate::bus::{BusFault, FaultSink, RawBus};

const REGISTER_SPACE: usize = 256;

// ────────────────────────────────────────────────────────────────────────────
// Simulated device
// ────────────────────────────────────────────────────────────────────────────

struct SimDevice {
    registers: Vec<u8>,
    pointer: u8,
    writes: Vec<Vec<u8>>,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            registers: vec![0; REGISTER_SPACE],
            pointer: 0,
            writes: Vec::new(),
        }
    }
}

#[derive(Default)]
struct SimState {
    devices: HashMap<u8, SimDevice>,
    probes: HashMap<u8, usize>,
    /// Successful reads left before the next injected failure.
    fail_after: Option<usize>,
}

fn nack(address: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no acknowledge from {address:#04x}"),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// SimBus
// ────────────────────────────────────────────────────────────────────────────

/// A simulated two-wire bus with attachable register devices.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

impl SimBus {
    /// Create an empty bus with no devices attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device with all registers zeroed.
    pub fn attach(&self, address: u8) {
        self.state
            .borrow_mut()
            .devices
            .insert(address, SimDevice::new());
    }

    /// Attach a device whose registers start with `registers`.
    pub fn attach_with(&self, address: u8, registers: &[u8]) {
        self.attach(address);
        self.set_registers(address, 0, registers);
    }

    /// Remove a device, simulating a hot-unplug.
    pub fn detach(&self, address: u8) {
        self.state.borrow_mut().devices.remove(&address);
    }

    /// Overwrite registers of an attached device.  No-op if absent.
    pub fn set_registers(&self, address: u8, offset: u8, bytes: &[u8]) {
        if let Some(dev) = self.state.borrow_mut().devices.get_mut(&address) {
            let start = usize::from(offset);
            let end = (start + bytes.len()).min(REGISTER_SPACE);
            dev.registers[start..end].copy_from_slice(&bytes[..end - start]);
        }
    }

    /// Snapshot of a device's register file (empty if absent).
    pub fn registers(&self, address: u8) -> Vec<u8> {
        self.state
            .borrow()
            .devices
            .get(&address)
            .map(|d| d.registers.clone())
            .unwrap_or_default()
    }

    /// Every block write a device received, offset byte first.
    pub fn writes(&self, address: u8) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .devices
            .get(&address)
            .map(|d| d.writes.clone())
            .unwrap_or_default()
    }

    /// Number of probes issued against `address`, present or not.
    pub fn probe_count(&self, address: u8) -> usize {
        self.state
            .borrow()
            .probes
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Let `reads` byte reads succeed, then fail the next one.
    pub fn fail_after_reads(&self, reads: usize) {
        self.state.borrow_mut().fail_after = Some(reads);
    }
}

impl RawBus for SimBus {
    fn write_byte(&mut self, address: u8, value: u8) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let dev = state.devices.get_mut(&address).ok_or_else(|| nack(address))?;
        dev.pointer = value;
        Ok(())
    }

    fn read_byte(&mut self, address: u8) -> io::Result<u8> {
        let mut state = self.state.borrow_mut();
        let fail_after = state.fail_after;
        match fail_after {
            Some(0) => {
                state.fail_after = None;
                return Err(io::Error::other("injected read fault"));
            }
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }
        let dev = state.devices.get_mut(&address).ok_or_else(|| nack(address))?;
        let value = dev.registers[usize::from(dev.pointer)];
        dev.pointer = dev.pointer.wrapping_add(1);
        Ok(value)
    }

    fn write_block(&mut self, address: u8, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.borrow_mut();
        let dev = state.devices.get_mut(&address).ok_or_else(|| nack(address))?;
        dev.writes.push(data.to_vec());
        if let Some((&offset, payload)) = data.split_first() {
            dev.pointer = offset;
            for &byte in payload {
                dev.registers[usize::from(dev.pointer)] = byte;
                dev.pointer = dev.pointer.wrapping_add(1);
            }
        }
        Ok(())
    }

    fn probe(&mut self, address: u8) -> io::Result<()> {
        *self.state.borrow_mut().probes.entry(address).or_insert(0) += 1;
        self.write_byte(address, 0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording sink
// ────────────────────────────────────────────────────────────────────────────

/// A [`FaultSink`] that stores every reported fault.
#[derive(Default)]
pub struct RecordingSink {
    faults: Mutex<Vec<BusFault>>,
}

impl RecordingSink {
    /// All faults reported so far.
    pub fn faults(&self) -> Vec<BusFault> {
        self.faults
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }
}

impl FaultSink for RecordingSink {
    fn report(&self, fault: &BusFault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(fault.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_auto_increments_across_reads() {
        let mut sim = SimBus::new();
        sim.attach_with(0x10, &[5, 6, 7]);
        sim.write_byte(0x10, 1).unwrap();
        assert_eq!(sim.read_byte(0x10).unwrap(), 6);
        assert_eq!(sim.read_byte(0x10).unwrap(), 7);
    }

    #[test]
    fn block_write_is_recorded_and_stored() {
        let mut sim = SimBus::new();
        sim.attach(0x10);
        sim.write_block(0x10, &[2, 0xAA, 0xBB]).unwrap();
        assert_eq!(&sim.registers(0x10)[2..4], &[0xAA, 0xBB]);
        assert_eq!(sim.writes(0x10), vec![vec![2, 0xAA, 0xBB]]);
    }

    #[test]
    fn detached_device_stops_answering() {
        let mut sim = SimBus::new();
        sim.attach(0x10);
        assert!(sim.probe(0x10).is_ok());
        sim.detach(0x10);
        assert!(sim.probe(0x10).is_err());
        assert_eq!(sim.probe_count(0x10), 2);
    }

    #[test]
    fn injected_fault_fires_once() {
        let mut sim = SimBus::new();
        sim.attach(0x10);
        sim.fail_after_reads(1);
        sim.write_byte(0x10, 0).unwrap();
        assert!(sim.read_byte(0x10).is_ok());
        assert!(sim.read_byte(0x10).is_err());
        assert!(sim.read_byte(0x10).is_ok());
    }
}
