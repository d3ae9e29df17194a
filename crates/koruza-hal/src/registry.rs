//! [`BusRegistry`] – open-once cache of bus handles.
//!
//! Every driver asks the registry for the bus it lives on.  The first
//! request opens the bus through the registry's opener; later requests get a
//! clone of the cached [`BusHandle`], so all drivers on the same physical
//! bus share one transport.  A failed open is not cached and is retried on
//! the next request.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use koruza_types::KoruzaError;
use tracing::debug;

use crate::bus::{BusHandle, FaultSink, RawBus};
use crate::i2c::LinuxI2cBus;

/// Opens the transport for a bus identifier.
pub type BusOpener = Box<dyn Fn(u8) -> io::Result<Box<dyn RawBus>>>;

/// Cache of open buses keyed by bus identifier.
pub struct BusRegistry {
    opener: BusOpener,
    sink: Arc<dyn FaultSink>,
    buses: HashMap<u8, BusHandle>,
}

impl BusRegistry {
    /// Create a registry that opens buses with `opener` and reports their
    /// faults to `sink`.
    pub fn new(opener: BusOpener, sink: Arc<dyn FaultSink>) -> Self {
        Self {
            opener,
            sink,
            buses: HashMap::new(),
        }
    }

    /// Registry backed by the Linux `/dev/i2c-N` character devices.
    pub fn linux(sink: Arc<dyn FaultSink>) -> Self {
        Self::new(
            Box::new(|id| LinuxI2cBus::open(id).map(|bus| Box::new(bus) as Box<dyn RawBus>)),
            sink,
        )
    }

    /// Return the handle for bus `id`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`KoruzaError::Io`] when the bus cannot be opened.
    pub fn get(&mut self, id: u8) -> Result<BusHandle, KoruzaError> {
        if let Some(handle) = self.buses.get(&id) {
            return Ok(handle.clone());
        }
        let raw = (self.opener)(id).map_err(|e| {
            debug!(bus = id, error = %e, "failed to open bus");
            KoruzaError::Io(e)
        })?;
        debug!(bus = id, "bus opened");
        let handle = BusHandle::new(id, raw, Arc::clone(&self.sink));
        self.buses.insert(id, handle.clone());
        Ok(handle)
    }

    /// Number of buses currently open.
    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}
