//! 1-wire temperature probes exposed by the kernel's `w1` subsystem.
//!
//! Each probe is a directory under the device root (usually
//! `/sys/bus/w1/devices/28-…`) containing a `w1_slave` text record:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The `t=` field is the temperature in millidegrees Celsius.

use std::fs;
use std::path::{Path, PathBuf};

use koruza_types::KoruzaError;
use serde::Serialize;
use tracing::{debug, info};

use crate::device::{Device, DeviceIdentity, Reading};

/// Default root of the 1-wire device nodes.
pub const DEFAULT_DEVICE_DIR: &str = "/sys/bus/w1/devices";

const RECORD_FILE: &str = "w1_slave";

/// A decoded probe reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureReading {
    pub device: String,
    pub temperature_c: f64,
}

/// Driver for one 1-wire temperature probe.
#[derive(Debug)]
pub struct TemperatureProbe {
    device: String,
    record: PathBuf,
}

impl TemperatureProbe {
    /// Build a driver for the probe directory `device_dir`, admitting it only
    /// if its record can be read.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::DeviceNotFound`] when the record is unreadable.
    pub fn probe(device_dir: &Path) -> Result<Self, KoruzaError> {
        let device = device_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| KoruzaError::DeviceNotFound(device_dir.display().to_string()))?;
        let record = device_dir.join(RECORD_FILE);
        fs::read_to_string(&record)
            .map_err(|e| KoruzaError::DeviceNotFound(format!("{}: {e}", record.display())))?;
        Ok(Self { device, record })
    }

    /// Every readable probe under `root`, sorted by device id.
    ///
    /// Bus-master entries and unreadable nodes are skipped; a missing root
    /// yields an empty list.
    pub fn enumerate(root: &Path) -> Vec<TemperatureProbe> {
        let Ok(entries) = fs::read_dir(root) else {
            debug!(root = %root.display(), "1-wire device root not available");
            return Vec::new();
        };
        let mut probes: Vec<TemperatureProbe> = entries
            .filter_map(Result::ok)
            .filter(|e| !e.file_name().to_string_lossy().starts_with("w1_bus_master"))
            .filter_map(|e| TemperatureProbe::probe(&e.path()).ok())
            .collect();
        probes.sort_by(|a, b| a.device.cmp(&b.device));
        for p in &probes {
            info!(device = %p.device, "1-wire probe attached");
        }
        probes
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Device for TemperatureProbe {
    type Record = TemperatureReading;

    fn read(&mut self) -> Reading<TemperatureReading> {
        let Ok(text) = fs::read_to_string(&self.record) else {
            return Reading::Fault;
        };
        match parse_record(&text) {
            Some(temperature_c) => Reading::Ok(TemperatureReading {
                device: self.device.clone(),
                temperature_c,
            }),
            None => Reading::Absent,
        }
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::TemperatureProbe {
            device: self.device.clone(),
        }
    }
}

/// Extract the temperature in °C from a `w1_slave` record.
///
/// Returns `None` when the CRC line reports `NO` or no integer `t=` field
/// is present.
pub fn parse_record(text: &str) -> Option<f64> {
    let crc_failed = text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().last())
        .is_some_and(|verdict| verdict == "NO");
    if crc_failed {
        return None;
    }
    let mut fields = text
        .split(|c: char| c.is_whitespace() || c == '=')
        .filter(|f| !f.is_empty());
    while let Some(field) = fields.next() {
        if field == "t" {
            let millidegrees: i64 = fields.next()?.parse().ok()?;
            return Some(millidegrees as f64 / 1000.0);
        }
    }
    None
}
