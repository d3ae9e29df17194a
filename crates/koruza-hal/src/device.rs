//! Capability set shared by every device driver.
//!
//! Drivers are constructed through a type-specific `probe` that fails with
//! [`KoruzaError::DeviceNotFound`][koruza_types::KoruzaError::DeviceNotFound]
//! when the hardware is absent.  Once built, every driver can
//! [`read`][Device::read] its telemetry and describe itself through
//! [`identity`][Device::identity] for status reporting.

use serde::Serialize;

use crate::codec::OpticalModuleIdentity;

/// Outcome of a single telemetry read.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading<T> {
    /// A freshly decoded record.
    Ok(T),
    /// No new data: a torn frame, short read or malformed record.
    Absent,
    /// The transport failed; the device may have been unplugged.
    Fault,
}

impl<T> Reading<T> {
    /// Convert into an `Option`, folding `Absent` and `Fault` into `None`.
    pub fn ok(self) -> Option<T> {
        match self {
            Reading::Ok(v) => Some(v),
            Reading::Absent | Reading::Fault => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Reading::Fault)
    }
}

/// Static identity of an attached driver, tagged by device kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum DeviceIdentity {
    #[serde(rename = "motors")]
    Motor { bus: u8, address: u8 },
    #[serde(rename = "sfp")]
    OpticalModule {
        bus: u8,
        address: u8,
        #[serde(flatten)]
        identity: OpticalModuleIdentity,
    },
    #[serde(rename = "1wire")]
    TemperatureProbe { device: String },
}

/// A telemetry-producing peripheral driver.
pub trait Device {
    /// Decoded telemetry record.
    type Record;

    /// Read and decode the device's current telemetry.
    fn read(&mut self) -> Reading<Self::Record>;

    /// Describe the device for status snapshots.
    fn identity(&self) -> DeviceIdentity;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_ok_folds_absent_and_fault() {
        assert_eq!(Reading::Ok(3).ok(), Some(3));
        assert_eq!(Reading::<u8>::Absent.ok(), None);
        assert_eq!(Reading::<u8>::Fault.ok(), None);
        assert!(Reading::<u8>::Fault.is_fault());
    }

    #[test]
    fn identity_is_tagged_by_kind() {
        let motor = serde_json::to_value(DeviceIdentity::Motor { bus: 1, address: 4 }).unwrap();
        assert_eq!(motor["type"], "motors");

        let probe = serde_json::to_value(DeviceIdentity::TemperatureProbe {
            device: "28-000005e2fdc3".into(),
        })
        .unwrap();
        assert_eq!(probe["type"], "1wire");
        assert_eq!(probe["device"], "28-000005e2fdc3");
    }
}
