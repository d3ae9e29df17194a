//! Daemon settings – reads `/etc/koruza/daemon.toml`.
//!
//! These are deployment settings (bus numbers, socket addresses, file
//! locations).  The node configuration that `set_config` edits lives in the
//! JSON file named by [`DaemonSettings::config_path`].

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use koruza_hal::motor::MOTOR_ADDRESS;
use koruza_hal::onewire::DEFAULT_DEVICE_DIR;
use koruza_hal::sfp::{SFP_DIAGNOSTICS_ADDRESS, SFP_IDENTITY_ADDRESS};
use koruza_runtime::DeviceLayout;
use koruza_runtime::system::LinuxSystem;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/koruza/daemon.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Persisted node configuration (JSON).
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// I2C bus of the motor controller.
    #[serde(default = "default_bus")]
    pub motor_bus: u8,

    #[serde(default = "default_motor_address")]
    pub motor_address: u8,

    /// One optical-module slot per listed bus.
    #[serde(default = "default_sfp_buses")]
    pub sfp_buses: Vec<u8>,

    #[serde(default = "default_sfp_identity_address")]
    pub sfp_identity_address: u8,

    #[serde(default = "default_sfp_diagnostics_address")]
    pub sfp_diagnostics_address: u8,

    /// 1-wire sysfs device directory.
    #[serde(default = "default_onewire_dir")]
    pub onewire_dir: PathBuf,

    /// Publish socket for on-node subscribers.
    #[serde(default = "default_local_publish_addr")]
    pub local_publish_addr: SocketAddr,

    /// Publish socket reachable from the peer unit.
    #[serde(default = "default_remote_publish_addr")]
    pub remote_publish_addr: SocketAddr,

    #[serde(default = "default_command_addr")]
    pub command_addr: SocketAddr,

    /// Interface whose MAC address seeds the node id.
    #[serde(default = "default_network_interface")]
    pub network_interface: String,

    #[serde(default = "default_hostname_path")]
    pub hostname_path: PathBuf,

    #[serde(default = "default_hosts_path")]
    pub hosts_path: PathBuf,

    /// Request timeout of the link-measurement client, in seconds.
    #[serde(default = "default_netmeasure_timeout_secs")]
    pub netmeasure_timeout_secs: u64,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/koruza/config.json")
}

fn default_bus() -> u8 {
    1
}

fn default_motor_address() -> u8 {
    MOTOR_ADDRESS
}

fn default_sfp_buses() -> Vec<u8> {
    vec![default_bus()]
}

fn default_sfp_identity_address() -> u8 {
    SFP_IDENTITY_ADDRESS
}

fn default_sfp_diagnostics_address() -> u8 {
    SFP_DIAGNOSTICS_ADDRESS
}

fn default_onewire_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE_DIR)
}

fn default_local_publish_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7100))
}

fn default_remote_publish_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7101))
}

fn default_command_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7102))
}

fn default_network_interface() -> String {
    "eth0".to_string()
}

fn default_hostname_path() -> PathBuf {
    PathBuf::from("/etc/hostname")
}

fn default_hosts_path() -> PathBuf {
    PathBuf::from("/etc/hosts")
}

fn default_netmeasure_timeout_secs() -> u64 {
    2
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            motor_bus: default_bus(),
            motor_address: default_motor_address(),
            sfp_buses: default_sfp_buses(),
            sfp_identity_address: default_sfp_identity_address(),
            sfp_diagnostics_address: default_sfp_diagnostics_address(),
            onewire_dir: default_onewire_dir(),
            local_publish_addr: default_local_publish_addr(),
            remote_publish_addr: default_remote_publish_addr(),
            command_addr: default_command_addr(),
            network_interface: default_network_interface(),
            hostname_path: default_hostname_path(),
            hosts_path: default_hosts_path(),
            netmeasure_timeout_secs: default_netmeasure_timeout_secs(),
        }
    }
}

impl DaemonSettings {
    pub fn layout(&self) -> DeviceLayout {
        DeviceLayout {
            motor_bus: self.motor_bus,
            motor_address: self.motor_address,
            sfp_buses: self.sfp_buses.clone(),
            sfp_identity_address: self.sfp_identity_address,
            sfp_diagnostics_address: self.sfp_diagnostics_address,
        }
    }

    pub fn system(&self) -> LinuxSystem {
        LinuxSystem {
            hostname_path: self.hostname_path.clone(),
            hosts_path: self.hosts_path.clone(),
            interface: self.network_interface.clone(),
        }
    }
}

/// Settings file location: `KORUZA_SETTINGS` or [`DEFAULT_SETTINGS_PATH`].
pub fn settings_path() -> PathBuf {
    std::env::var_os("KORUZA_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
}

/// Load settings from `path`.  Returns `Ok(None)` when the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<DaemonSettings>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read settings at {}: {}", path.display(), e))?;
    let settings: DaemonSettings = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse settings at {}: {}", path.display(), e))?;
    Ok(Some(settings))
}

/// Load from [`settings_path`], fall back to defaults, then apply
/// environment overrides.
pub fn load() -> Result<DaemonSettings, String> {
    let mut settings = load_from(&settings_path())?.unwrap_or_default();
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Apply `KORUZA_*` environment overrides on top of the file.
///
/// | Variable | Field |
/// |---|---|
/// | `KORUZA_CONFIG_PATH` | `config_path` |
/// | `KORUZA_I2C_BUS` | `motor_bus` and `sfp_buses` |
/// | `KORUZA_COMMAND_ADDR` | `command_addr` |
/// | `KORUZA_REMOTE_PUBLISH_ADDR` | `remote_publish_addr` |
/// | `KORUZA_ONEWIRE_DIR` | `onewire_dir` |
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut DaemonSettings) {
    if let Ok(path) = std::env::var("KORUZA_CONFIG_PATH") {
        settings.config_path = PathBuf::from(path);
    }
    if let Ok(raw) = std::env::var("KORUZA_I2C_BUS") {
        match raw.parse::<u8>() {
            Ok(bus) => {
                settings.motor_bus = bus;
                settings.sfp_buses = vec![bus];
            }
            Err(_) => warn!(value = %raw, "ignoring invalid KORUZA_I2C_BUS"),
        }
    }
    if let Ok(raw) = std::env::var("KORUZA_COMMAND_ADDR") {
        match raw.parse() {
            Ok(addr) => settings.command_addr = addr,
            Err(_) => warn!(value = %raw, "ignoring invalid KORUZA_COMMAND_ADDR"),
        }
    }
    if let Ok(raw) = std::env::var("KORUZA_REMOTE_PUBLISH_ADDR") {
        match raw.parse() {
            Ok(addr) => settings.remote_publish_addr = addr,
            Err(_) => warn!(value = %raw, "ignoring invalid KORUZA_REMOTE_PUBLISH_ADDR"),
        }
    }
    if let Ok(dir) = std::env::var("KORUZA_ONEWIRE_DIR") {
        settings.onewire_dir = PathBuf::from(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("daemon.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("daemon.toml");
        fs::write(
            &path,
            "motor_bus = 2\nsfp_buses = [2, 3]\ncommand_addr = \"0.0.0.0:9000\"\n",
        )
        .expect("write");

        let settings = load_from(&path).expect("load ok").expect("some");
        assert_eq!(settings.motor_bus, 2);
        assert_eq!(settings.sfp_buses, vec![2, 3]);
        assert_eq!(settings.command_addr.port(), 9000);
        assert_eq!(settings.motor_address, MOTOR_ADDRESS);
        assert_eq!(settings.config_path, default_config_path());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("daemon.toml");
        fs::write(&path, "motor_bus = \"one\"").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn layout_mirrors_the_bus_fields() {
        let settings = DaemonSettings {
            motor_bus: 4,
            sfp_buses: vec![5, 6],
            ..DaemonSettings::default()
        };
        let layout = settings.layout();
        assert_eq!(layout.motor_bus, 4);
        assert_eq!(layout.sfp_buses, vec![5, 6]);
        assert_eq!(layout.sfp_identity_address, SFP_IDENTITY_ADDRESS);
    }

    #[test]
    fn default_layout_matches_the_runtime_default() {
        assert_eq!(DaemonSettings::default().layout(), DeviceLayout::default());
    }

    // The env-override tests each touch a distinct variable.

    #[test]
    fn apply_env_overrides_changes_i2c_bus() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("KORUZA_I2C_BUS", "3") };
        let mut settings = DaemonSettings::default();
        apply_env_overrides(&mut settings);
        assert_eq!(settings.motor_bus, 3);
        assert_eq!(settings.sfp_buses, vec![3]);
        unsafe { std::env::remove_var("KORUZA_I2C_BUS") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_command_addr() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("KORUZA_COMMAND_ADDR", "not-an-addr") };
        let mut settings = DaemonSettings::default();
        apply_env_overrides(&mut settings);
        assert_eq!(settings.command_addr, default_command_addr());
        unsafe { std::env::remove_var("KORUZA_COMMAND_ADDR") };
    }

    #[test]
    fn apply_env_overrides_changes_onewire_dir() {
        // SAFETY: no other test reads this variable.
        unsafe { std::env::set_var("KORUZA_ONEWIRE_DIR", "/tmp/w1") };
        let mut settings = DaemonSettings::default();
        apply_env_overrides(&mut settings);
        assert_eq!(settings.onewire_dir, PathBuf::from("/tmp/w1"));
        unsafe { std::env::remove_var("KORUZA_ONEWIRE_DIR") };
    }
}
