//! Fixed-layout binary codecs for the motor register block and the optical
//! module's identity and diagnostic-monitoring blocks.
//!
//! # Motor register block (36 bytes, little-endian)
//!
//! | offset | field |
//! |---|---|
//! | 0, 4, 8 | `next_x`, `next_y`, `next_f` (`i32`) |
//! | 12, 16, 20 | `current_x`, `current_y`, `current_f` (`i32`) |
//! | 24, 25, 26 | `status_x`, `status_y`, `status_f` |
//! | 27 | sentinel, always `255` in an untorn frame |
//! | 28, 29 | `flash_status`, `flash_write_count` |
//! | 30, 31 | `command`, `laser` |
//! | 32, 34 | `speed`, `accel` (`u16`) |
//!
//! # Optical module (SFF-8472, big-endian)
//!
//! The identity block is the first 96 bytes at the identity address; the
//! diagnostic block is the 256 bytes at the diagnostics address, with live
//! readings at offsets 96..106 and status bits at 110.

use serde::Serialize;

// ────────────────────────────────────────────────────────────────────────────
// Motor
// ────────────────────────────────────────────────────────────────────────────

pub const MOTOR_BLOCK_LEN: usize = 36;
pub const MOTOR_TARGET_OFFSET: u8 = 0;
pub const MOTOR_TARGET_LEN: usize = 12;
pub const MOTOR_CONFIG_OFFSET: u8 = 30;
pub const MOTOR_CONFIG_LEN: usize = 6;
const MOTOR_SENTINEL_OFFSET: usize = 27;
/// Magic value of the sentinel byte in a valid frame.
pub const MOTOR_SENTINEL: u8 = 255;

/// Decoded motor controller registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotorState {
    pub next_x: i32,
    pub next_y: i32,
    pub next_f: i32,
    pub current_x: i32,
    pub current_y: i32,
    pub current_f: i32,
    pub status_x: u8,
    pub status_y: u8,
    pub status_f: u8,
    pub flash_status: u8,
    pub flash_write_count: u8,
    pub command: u8,
    pub laser: bool,
    pub speed: u16,
    pub accel: u16,
}

fn le_i32(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

impl MotorState {
    /// Decode a register block.
    ///
    /// Returns `None` for a short block or when the sentinel byte does not
    /// hold [`MOTOR_SENTINEL`] (a torn read).
    pub fn decode(block: &[u8]) -> Option<Self> {
        if block.len() < MOTOR_BLOCK_LEN || block[MOTOR_SENTINEL_OFFSET] != MOTOR_SENTINEL {
            return None;
        }
        Some(Self {
            next_x: le_i32(block, 0),
            next_y: le_i32(block, 4),
            next_f: le_i32(block, 8),
            current_x: le_i32(block, 12),
            current_y: le_i32(block, 16),
            current_f: le_i32(block, 20),
            status_x: block[24],
            status_y: block[25],
            status_f: block[26],
            flash_status: block[28],
            flash_write_count: block[29],
            command: block[30],
            laser: block[31] != 0,
            speed: le_u16(block, 32),
            accel: le_u16(block, 34),
        })
    }

    /// Encode the full register block, sentinel included.
    pub fn encode(&self) -> [u8; MOTOR_BLOCK_LEN] {
        let mut block = [0u8; MOTOR_BLOCK_LEN];
        block[..MOTOR_TARGET_LEN].copy_from_slice(&self.encode_targets());
        for (i, v) in [self.current_x, self.current_y, self.current_f].iter().enumerate() {
            block[12 + i * 4..16 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
        block[24] = self.status_x;
        block[25] = self.status_y;
        block[26] = self.status_f;
        block[MOTOR_SENTINEL_OFFSET] = MOTOR_SENTINEL;
        block[28] = self.flash_status;
        block[29] = self.flash_write_count;
        block[30..].copy_from_slice(&self.encode_config());
        block
    }

    /// The target-position region (`next_x`, `next_y`, `next_f`).
    pub fn encode_targets(&self) -> [u8; MOTOR_TARGET_LEN] {
        let mut out = [0u8; MOTOR_TARGET_LEN];
        out[0..4].copy_from_slice(&self.next_x.to_le_bytes());
        out[4..8].copy_from_slice(&self.next_y.to_le_bytes());
        out[8..12].copy_from_slice(&self.next_f.to_le_bytes());
        out
    }

    /// The configuration region (`command`, `laser`, `speed`, `accel`).
    pub fn encode_config(&self) -> [u8; MOTOR_CONFIG_LEN] {
        let mut out = [0u8; MOTOR_CONFIG_LEN];
        out[0] = self.command;
        out[1] = u8::from(self.laser);
        out[2..4].copy_from_slice(&self.speed.to_le_bytes());
        out[4..6].copy_from_slice(&self.accel.to_le_bytes());
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Optical module
// ────────────────────────────────────────────────────────────────────────────

pub const SFP_IDENTITY_LEN: usize = 96;
pub const SFP_DIAGNOSTICS_LEN: usize = 256;

/// Optical power below which the logarithmic value is pinned to the floor.
pub const POWER_FLOOR_MW: f64 = 1e-4;
/// Floor of the logarithmic power scale.
pub const POWER_FLOOR_DB: f64 = -10.0;

const STATUS_OFFSET: usize = 110;
const STATUS_TX_FAULT: u8 = 0b0000_0100;
const STATUS_RX_LOS: u8 = 0b0000_0010;

/// Identity fields of an optical module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpticalModuleIdentity {
    pub serial_number: String,
    pub model: String,
    pub vendor: String,
    pub vendor_oui: String,
    pub revision: String,
    pub date_code: String,
    pub bitrate_mbd: u32,
    pub wavelength_nm: u16,
    pub diagnostics_type: u8,
}

impl OpticalModuleIdentity {
    /// Decode the 96-byte identity block.  `None` if the block is short.
    pub fn decode(block: &[u8]) -> Option<Self> {
        if block.len() < SFP_IDENTITY_LEN {
            return None;
        }
        Some(Self {
            vendor: ascii(&block[20..36]),
            vendor_oui: format!("{:02x}:{:02x}:{:02x}", block[37], block[38], block[39]),
            model: ascii(&block[40..56]),
            revision: ascii(&block[56..60]),
            wavelength_nm: u16::from_be_bytes([block[60], block[61]]),
            serial_number: ascii(&block[68..84]),
            date_code: ascii(&block[84..92]),
            bitrate_mbd: u32::from(block[12]) * 100,
            diagnostics_type: block[92],
        })
    }
}

/// Live readings from the diagnostic-monitoring block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpticalModuleTelemetry {
    pub temperature_c: f64,
    pub supply_voltage_v: f64,
    pub tx_bias_ma: f64,
    pub tx_power_mw: f64,
    pub tx_power_db: f64,
    pub rx_power_mw: f64,
    pub rx_power_db: f64,
    pub rx_loss_of_signal: bool,
    pub tx_fault: bool,
}

impl OpticalModuleTelemetry {
    /// Decode the diagnostic block.  `None` if the block is short.
    pub fn decode(block: &[u8]) -> Option<Self> {
        if block.len() <= STATUS_OFFSET {
            return None;
        }
        let be_u16 = |at: usize| f64::from(u16::from_be_bytes([block[at], block[at + 1]]));
        let tx_power_mw = be_u16(102) / 10_000.0;
        let rx_power_mw = be_u16(104) / 10_000.0;
        let status = block[STATUS_OFFSET];
        Some(Self {
            temperature_c: f64::from(i16::from_be_bytes([block[96], block[97]])) / 256.0,
            supply_voltage_v: be_u16(98) / 10_000.0,
            tx_bias_ma: be_u16(100) / 500.0,
            tx_power_mw,
            tx_power_db: power_to_db(tx_power_mw),
            rx_power_mw,
            rx_power_db: power_to_db(rx_power_mw),
            rx_loss_of_signal: status & STATUS_RX_LOS != 0,
            tx_fault: status & STATUS_TX_FAULT != 0,
        })
    }
}

/// Convert optical power in milliwatts to the logarithmic scale
/// `10·log10(mW·10) − 10`, pinned to [`POWER_FLOOR_DB`] below
/// [`POWER_FLOOR_MW`].
pub fn power_to_db(power_mw: f64) -> f64 {
    if power_mw < POWER_FLOOR_MW {
        return POWER_FLOOR_DB;
    }
    10.0 * (power_mw * 10.0).log10() - 10.0
}

fn ascii(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_motor() -> MotorState {
        MotorState {
            next_x: 1200,
            next_y: -40,
            next_f: 7,
            current_x: 1100,
            current_y: -35,
            current_f: 7,
            status_x: 1,
            status_y: 2,
            status_f: 0,
            flash_status: 0,
            flash_write_count: 9,
            command: 0,
            laser: true,
            speed: 300,
            accel: 50,
        }
    }

    #[test]
    fn motor_block_decodes_fields_at_fixed_offsets() {
        let block = sample_motor().encode();
        assert_eq!(block[27], MOTOR_SENTINEL);
        assert_eq!(&block[0..4], &1200i32.to_le_bytes());
        assert_eq!(&block[32..34], &300u16.to_le_bytes());
        assert_eq!(MotorState::decode(&block), Some(sample_motor()));
    }

    #[test]
    fn motor_block_with_wrong_sentinel_is_rejected() {
        let mut block = sample_motor().encode();
        for bad in [0u8, 1, 127, 254] {
            block[27] = bad;
            assert_eq!(MotorState::decode(&block), None, "sentinel {bad}");
        }
    }

    #[test]
    fn short_motor_block_is_rejected() {
        let block = sample_motor().encode();
        assert_eq!(MotorState::decode(&block[..35]), None);
    }

    #[test]
    fn power_to_db_reference_points() {
        assert!((power_to_db(0.00005) - (-10.0)).abs() < 1e-9);
        assert!(power_to_db(1.0).abs() < 1e-9);
        assert!((power_to_db(10.0) - 10.0).abs() < 1e-9);
    }

    fn identity_block() -> Vec<u8> {
        let mut block = vec![0u8; SFP_IDENTITY_LEN];
        block[12] = 13;
        block[20..36].copy_from_slice(b"OPTOWAY         ");
        block[37..40].copy_from_slice(&[0x00, 0x1b, 0x21]);
        block[40..56].copy_from_slice(b"SPS-31-24G-LC\0\0\0");
        block[56..60].copy_from_slice(b"A1  ");
        block[60..62].copy_from_slice(&1310u16.to_be_bytes());
        block[68..84].copy_from_slice(b"OW14090123      ");
        block[84..92].copy_from_slice(b"140901  ");
        block[92] = 0x68;
        block
    }

    #[test]
    fn identity_block_decodes_trimmed_ascii() {
        let id = OpticalModuleIdentity::decode(&identity_block()).unwrap();
        assert_eq!(id.vendor, "OPTOWAY");
        assert_eq!(id.model, "SPS-31-24G-LC");
        assert_eq!(id.serial_number, "OW14090123");
        assert_eq!(id.revision, "A1");
        assert_eq!(id.date_code, "140901");
        assert_eq!(id.vendor_oui, "00:1b:21");
        assert_eq!(id.wavelength_nm, 1310);
        assert_eq!(id.bitrate_mbd, 1300);
        assert_eq!(id.diagnostics_type, 0x68);
        assert!(OpticalModuleIdentity::decode(&identity_block()[..95]).is_none());
    }

    #[test]
    fn diagnostic_block_applies_scale_factors() {
        let mut block = vec![0u8; SFP_DIAGNOSTICS_LEN];
        block[96..98].copy_from_slice(&(40i16 * 256 + 128).to_be_bytes());
        block[98..100].copy_from_slice(&33_000u16.to_be_bytes());
        block[100..102].copy_from_slice(&3_000u16.to_be_bytes());
        block[102..104].copy_from_slice(&10_000u16.to_be_bytes());
        block[104..106].copy_from_slice(&0u16.to_be_bytes());
        block[110] = STATUS_RX_LOS;

        let t = OpticalModuleTelemetry::decode(&block).unwrap();
        assert!((t.temperature_c - 40.5).abs() < 1e-9);
        assert!((t.supply_voltage_v - 3.3).abs() < 1e-9);
        assert!((t.tx_bias_ma - 6.0).abs() < 1e-9);
        assert!((t.tx_power_mw - 1.0).abs() < 1e-9);
        assert!(t.tx_power_db.abs() < 1e-9);
        assert_eq!(t.rx_power_mw, 0.0);
        assert_eq!(t.rx_power_db, POWER_FLOOR_DB);
        assert!(t.rx_loss_of_signal);
        assert!(!t.tx_fault);
    }

    #[test]
    fn negative_module_temperature_is_signed() {
        let mut block = vec![0u8; SFP_DIAGNOSTICS_LEN];
        block[96..98].copy_from_slice(&(-5i16 * 256).to_be_bytes());
        let t = OpticalModuleTelemetry::decode(&block).unwrap();
        assert!((t.temperature_c + 5.0).abs() < 1e-9);
    }
}
