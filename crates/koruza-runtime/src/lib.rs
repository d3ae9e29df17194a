//! `koruza-runtime` – Controller and scheduling loops
//!
//! Ties the drivers of `koruza-hal` to the messaging layer of
//! `koruza-middleware` and keeps them running.
//!
//! # Modules
//!
//! - [`controller`] – [`Controller`][controller::Controller]: owns the driver
//!   slots, the persisted configuration and the message bus; produces status
//!   snapshots and applies configuration updates.
//! - [`dispatch`] – [`Dispatcher`][dispatch::Dispatcher]: the command table
//!   (`get_status`, `set_config`, `motor_move`, `motor_configure`,
//!   `call_application`, `reboot`).
//! - [`fast_loop`] – [`FastLoop`][fast_loop::FastLoop]: the only context that
//!   touches the bus; answers commands, re-attaches devices, publishes
//!   telemetry and heartbeats.
//! - [`slow_loop`] – [`SlowLoop`][slow_loop::SlowLoop]: 1-wire probes and
//!   link measurements on a background thread.
//! - [`schedule`] – [`Schedule`][schedule::Schedule]: per-task period timers.
//! - [`config`] – [`ConfigStore`][config::ConfigStore]: the persisted JSON
//!   configuration and its validators.
//! - [`system`] – [`SystemControl`][system::SystemControl]: reboot, host name,
//!   MAC and IP address.
//! - [`netmeasure`] – HTTP client for the peer's link counters.
//! - [`report`] – `status` payloads and the bus-fault reporter.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Single-writer rule
//!
//! Bus handles are `!Send`, so the controller and every bus driver are
//! pinned to the fast-loop thread by construction.  The slow loop reaches the
//! fast loop only through channels.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod fast_loop;
pub mod netmeasure;
pub mod report;
pub mod schedule;
pub mod slow_loop;
pub mod system;
pub mod telemetry;

pub use config::ConfigStore;
pub use controller::{Controller, DeviceLayout, StatusSnapshot};
pub use dispatch::Dispatcher;
pub use fast_loop::FastLoop;
pub use netmeasure::{NetmeasureClient, TelemetrySource};
pub use report::BusFaultReporter;
pub use slow_loop::SlowLoop;
pub use system::{LinuxSystem, SystemControl};
pub use telemetry::{TracerProviderGuard, init_tracing};
