//! Operating-system side effects: reboot, hostname, node identity and
//! address lookup.
//!
//! The controller only sees the [`SystemControl`] trait.  [`LinuxSystem`]
//! performs the real side effects; [`RecordingSystem`] records them for
//! tests.

use std::fs;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};

use koruza_types::KoruzaError;
use tracing::{info, warn};
use uuid::Uuid;

/// Loopback alias carrying the node's own name in the hosts file.
const LOOPBACK_ALIAS: &str = "127.0.1.1";

/// Side effects the controller needs from the host.
pub trait SystemControl {
    /// Ask the OS to reboot.
    fn reboot(&self) -> Result<(), KoruzaError>;

    /// Persist `name` as the host name.
    fn set_hostname(&self, name: &str) -> Result<(), KoruzaError>;

    /// Hardware address of the primary interface.
    fn mac_address(&self) -> Option<String>;

    /// Current IP address of the node, if it has one.
    fn ip_address(&self) -> Option<String>;
}

/// Stable node identifier derived from the MAC address.
///
/// Returns the nil UUID when no MAC address is available.
pub fn node_id(mac: Option<&str>) -> Uuid {
    match mac.map(str::trim).filter(|m| !m.is_empty()) {
        Some(mac) => Uuid::new_v5(&Uuid::NAMESPACE_OID, mac.to_ascii_lowercase().as_bytes()),
        None => {
            warn!("no MAC address available, node identifier is nil");
            Uuid::nil()
        }
    }
}

/// Replace (or append) the loopback-alias line of a hosts file.
pub fn rewrite_hosts(hosts: &str, name: &str) -> String {
    let alias = format!("{LOOPBACK_ALIAS}\t{name}");
    let mut replaced = false;
    let mut lines: Vec<String> = hosts
        .lines()
        .map(|line| {
            if line.split_whitespace().next() == Some(LOOPBACK_ALIAS) {
                replaced = true;
                alias.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(alias);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Linux
// ────────────────────────────────────────────────────────────────────────────

/// Real side effects on a Linux host.
pub struct LinuxSystem {
    pub hostname_path: PathBuf,
    pub hosts_path: PathBuf,
    pub interface: String,
}

impl Default for LinuxSystem {
    fn default() -> Self {
        Self {
            hostname_path: PathBuf::from("/etc/hostname"),
            hosts_path: PathBuf::from("/etc/hosts"),
            interface: "eth0".to_string(),
        }
    }
}

impl SystemControl for LinuxSystem {
    fn reboot(&self) -> Result<(), KoruzaError> {
        info!("rebooting");
        Command::new("reboot").spawn()?;
        Ok(())
    }

    fn set_hostname(&self, name: &str) -> Result<(), KoruzaError> {
        fs::write(&self.hostname_path, format!("{name}\n"))?;
        let hosts = match fs::read_to_string(&self.hosts_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        fs::write(&self.hosts_path, rewrite_hosts(&hosts, name))?;
        info!(name, "hostname applied");
        Ok(())
    }

    fn mac_address(&self) -> Option<String> {
        let path = format!("/sys/class/net/{}/address", self.interface);
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn ip_address(&self) -> Option<String> {
        // Connecting a UDP socket sends nothing; it only selects the route.
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:53").ok()?;
        let ip = socket.local_addr().ok()?.ip();
        (!ip.is_unspecified()).then(|| ip.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Test double
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Recorded {
    reboots: usize,
    hostnames: Vec<String>,
}

/// Records side effects instead of performing them.  Clones share state.
#[derive(Clone, Debug, Default)]
pub struct RecordingSystem {
    mac: Option<String>,
    ip: Option<String>,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingSystem {
    pub fn new(mac: Option<&str>, ip: Option<&str>) -> Self {
        Self {
            mac: mac.map(str::to_string),
            ip: ip.map(str::to_string),
            recorded: Arc::default(),
        }
    }

    pub fn reboots(&self) -> usize {
        self.recorded.lock().map(|r| r.reboots).unwrap_or_default()
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.recorded
            .lock()
            .map(|r| r.hostnames.clone())
            .unwrap_or_default()
    }
}

impl SystemControl for RecordingSystem {
    fn reboot(&self) -> Result<(), KoruzaError> {
        if let Ok(mut r) = self.recorded.lock() {
            r.reboots += 1;
        }
        Ok(())
    }

    fn set_hostname(&self, name: &str) -> Result<(), KoruzaError> {
        if let Ok(mut r) = self.recorded.lock() {
            r.hostnames.push(name.to_string());
        }
        Ok(())
    }

    fn mac_address(&self) -> Option<String> {
        self.mac.clone()
    }

    fn ip_address(&self) -> Option<String> {
        self.ip.clone()
    }
}
