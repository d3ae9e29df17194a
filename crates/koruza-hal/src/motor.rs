//! Pan/tilt/focus motor controller driver.
//!
//! The controller exposes a 36-byte register block (see
//! [`codec`][crate::codec]).  Target positions and configuration live in two
//! disjoint regions, and both mutating operations are read-modify-write on
//! their own region only.
//!
//! The `command` register is level-triggered: a non-zero command must be
//! pulsed and then cleared.  [`Motor::configure`] issues the command and
//! arms a clear deadline; [`Motor::service`] (called every fast-loop tick)
//! writes the clearing `command = 0` once [`SETTLE_DELAY`] has elapsed.

use std::time::{Duration, Instant};

use koruza_types::KoruzaError;
use tracing::{debug, info};

use crate::bus::BusHandle;
use crate::codec::{
    MOTOR_BLOCK_LEN, MOTOR_CONFIG_OFFSET, MOTOR_TARGET_OFFSET, MotorState,
};
use crate::device::{Device, DeviceIdentity, Reading};

/// Default bus address of the motor controller.
pub const MOTOR_ADDRESS: u8 = 0x04;

/// Time a non-zero command stays asserted before it is cleared.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub const COMMAND_NONE: u8 = 0;
pub const COMMAND_HOME_X: u8 = 2;
pub const COMMAND_HOME_Y: u8 = 3;
pub const COMMAND_HOME_F: u8 = 4;

/// Driver for the motor controller.
pub struct Motor {
    bus: BusHandle,
    address: u8,
    clear_at: Option<Instant>,
}

impl Motor {
    /// Build the driver if a controller answers at `address`.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::DeviceNotFound`] when the probe fails.
    pub fn probe(bus: BusHandle, address: u8) -> Result<Self, KoruzaError> {
        bus.probe(address)?;
        info!(bus = bus.id(), address, "motor controller attached");
        Ok(Self {
            bus,
            address,
            clear_at: None,
        })
    }

    /// Check that the controller still answers.
    pub fn is_present(&self) -> bool {
        self.bus.probe(self.address).is_ok()
    }

    /// Move to new targets, leaving any axis passed as `None` untouched.
    /// Negative targets are clamped to zero.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::Unavailable`] when the current targets cannot be read,
    /// or the bus fault when the write fails.
    pub fn move_to(
        &mut self,
        next_x: Option<i32>,
        next_y: Option<i32>,
        next_f: Option<i32>,
    ) -> Result<(), KoruzaError> {
        let mut state = self.current_state()?;
        if let Some(x) = next_x {
            state.next_x = x.max(0);
        }
        if let Some(y) = next_y {
            state.next_y = y.max(0);
        }
        if let Some(f) = next_f {
            state.next_f = f.max(0);
        }
        debug!(x = state.next_x, y = state.next_y, f = state.next_f, "motor move");
        self.bus
            .write_registers(self.address, MOTOR_TARGET_OFFSET, &state.encode_targets())?;
        Ok(())
    }

    /// Update the configuration region, leaving any field passed as `None`
    /// untouched.
    ///
    /// A homing command (`2`/`3`/`4`) additionally drives the X/Y/F target to
    /// zero.  Any non-zero command arms the clear deadline.
    ///
    /// # Errors
    ///
    /// As for [`move_to`][Self::move_to].
    pub fn configure(
        &mut self,
        command: Option<u8>,
        laser: Option<bool>,
        speed: Option<u16>,
        accel: Option<u16>,
    ) -> Result<(), KoruzaError> {
        self.write_config(command, laser, speed, accel)?;

        // The command is latched now; the clear must be scheduled even if
        // the homing move below fails.
        if let Some(cmd) = command.filter(|c| *c != COMMAND_NONE) {
            debug!(command = cmd, "motor command asserted");
            self.clear_at = Some(Instant::now() + SETTLE_DELAY);
        }

        match command {
            Some(COMMAND_HOME_X) => self.move_to(Some(0), None, None),
            Some(COMMAND_HOME_Y) => self.move_to(None, Some(0), None),
            Some(COMMAND_HOME_F) => self.move_to(None, None, Some(0)),
            _ => Ok(()),
        }
    }

    /// Clear an asserted command once its settle delay has elapsed.
    ///
    /// Returns `true` if the clearing write was issued on this call.  A
    /// failed clear stays pending and is retried on the next call.
    pub fn service(&mut self) -> Result<bool, KoruzaError> {
        self.service_at(Instant::now())
    }

    fn service_at(&mut self, now: Instant) -> Result<bool, KoruzaError> {
        match self.clear_at {
            Some(deadline) if now >= deadline => {
                self.write_config(Some(COMMAND_NONE), None, None, None)?;
                self.clear_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn write_config(
        &mut self,
        command: Option<u8>,
        laser: Option<bool>,
        speed: Option<u16>,
        accel: Option<u16>,
    ) -> Result<(), KoruzaError> {
        let mut state = self.current_state()?;
        if let Some(c) = command {
            state.command = c;
        }
        if let Some(l) = laser {
            state.laser = l;
        }
        if let Some(s) = speed {
            state.speed = s;
        }
        if let Some(a) = accel {
            state.accel = a;
        }
        self.bus
            .write_registers(self.address, MOTOR_CONFIG_OFFSET, &state.encode_config())?;
        Ok(())
    }

    fn current_state(&mut self) -> Result<MotorState, KoruzaError> {
        match self.read() {
            Reading::Ok(state) => Ok(state),
            Reading::Absent => Err(KoruzaError::Unavailable(
                "motor register block failed validation".to_string(),
            )),
            Reading::Fault => Err(KoruzaError::Unavailable(
                "motor register block unreadable".to_string(),
            )),
        }
    }
}

impl Device for Motor {
    type Record = MotorState;

    fn read(&mut self) -> Reading<MotorState> {
        match self.bus.read_registers(self.address, 0, MOTOR_BLOCK_LEN) {
            Ok(block) => MotorState::decode(&block).map_or(Reading::Absent, Reading::Ok),
            Err(_) => Reading::Fault,
        }
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::Motor {
            bus: self.bus.id(),
            address: self.address,
        }
    }
}
