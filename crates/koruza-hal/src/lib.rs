//! `koruza-hal` – Hardware Abstraction Layer
//!
//! Register-level access to the terminal's peripherals and the drivers built
//! on it.
//!
//! # Modules
//!
//! - [`bus`] – Bus Adapter: register reads/writes over a shared two-wire bus
//!   with fault reporting.
//! - [`i2c`] – Linux `i2c-dev` transport.
//! - [`sim`] – In-process simulated bus for tests.
//! - [`registry`] – Open-once cache of bus handles.
//! - [`codec`] – Binary layouts of the motor block and the optical-module
//!   identity/diagnostic blocks.
//! - [`device`] – Capability set shared by every driver.
//! - [`motor`] – Pan/tilt/focus motor controller.
//! - [`sfp`] – Pluggable optical transceiver.
//! - [`onewire`] – 1-wire temperature probes.

pub mod bus;
pub mod codec;
pub mod device;
pub mod i2c;
pub mod motor;
pub mod onewire;
pub mod registry;
pub mod sfp;
pub mod sim;

pub use bus::{BusFault, BusHandle, FaultSink, RawBus};
pub use device::{Device, DeviceIdentity, Reading};
pub use motor::Motor;
pub use onewire::{TemperatureProbe, TemperatureReading};
pub use registry::BusRegistry;
pub use sfp::OpticalModule;
