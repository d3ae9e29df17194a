//! Command dispatch table.
//!
//! Maps command names to handlers running against the [`Controller`].
//! [`Dispatcher::handle_frame`] turns any request frame into exactly one
//! reply document: malformed requests answer `400`, unknown commands `501`,
//! and a panicking handler `500` (the panic is logged and the loop goes on).

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use koruza_middleware::protocol::{
    CommandError, CommandRequest, error_reply, optional_int, optional_int_as, reply, require,
    status_ok,
};
use koruza_types::KoruzaError;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::controller::Controller;

/// A command implementation.
pub type Handler = fn(&mut Controller, &Map<String, Value>) -> Result<Value, CommandError>;

pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        let mut dispatcher = Self {
            handlers: HashMap::new(),
        };
        dispatcher.register("get_status", get_status);
        dispatcher.register("set_config", set_config);
        dispatcher.register("motor_move", motor_move);
        dispatcher.register("motor_configure", motor_configure);
        dispatcher.register("call_application", call_application);
        dispatcher.register("reboot", reboot);
        dispatcher
    }
}

impl Dispatcher {
    /// Dispatcher with every built-in command registered.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: &'static str, handler: Handler) {
        self.handlers.insert(command, handler);
    }

    /// Decode, dispatch and answer one request frame.
    pub fn handle_frame(&self, controller: &mut Controller, frame: &str) -> Value {
        let outcome = CommandRequest::parse(frame).and_then(|request| {
            debug!(command = %request.command, "dispatching command");
            self.dispatch(controller, &request)
        });
        match outcome {
            Ok(payload) => reply(payload),
            Err(e) => {
                warn!(code = e.code(), error = %e, "command failed");
                error_reply(&e)
            }
        }
    }

    /// Run the handler registered for `request`.
    ///
    /// # Errors
    ///
    /// [`CommandError::NotImplemented`] for unknown commands, the handler's
    /// own error, or [`CommandError::Internal`] if the handler panicked.
    pub fn dispatch(
        &self,
        controller: &mut Controller,
        request: &CommandRequest,
    ) -> Result<Value, CommandError> {
        let handler = self
            .handlers
            .get(request.command.as_str())
            .ok_or_else(|| CommandError::NotImplemented(request.command.clone()))?;

        panic::catch_unwind(AssertUnwindSafe(|| handler(controller, &request.args))).unwrap_or_else(
            |panic| {
                let reason = panic_reason(panic.as_ref());
                error!(command = %request.command, %reason, "command handler panicked");
                Err(CommandError::Internal(format!("internal server error: {reason}")))
            },
        )
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn device_error(error: KoruzaError) -> CommandError {
    CommandError::Internal(error.to_string())
}

fn motor_absent() -> CommandError {
    CommandError::BadRequest("motor driver is not present".into())
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

fn get_status(controller: &mut Controller, _args: &Map<String, Value>) -> Result<Value, CommandError> {
    serde_json::to_value(controller.status()).map_err(|e| CommandError::Internal(e.to_string()))
}

fn set_config(controller: &mut Controller, args: &Map<String, Value>) -> Result<Value, CommandError> {
    let changes = require(args, "config")?
        .as_object()
        .ok_or_else(|| CommandError::BadRequest("argument 'config' must be an object".into()))?;
    let status = controller.set_config(changes).map_err(|e| match e {
        KoruzaError::Config(reason) => CommandError::BadRequest(reason),
        other => CommandError::Internal(other.to_string()),
    })?;
    serde_json::to_value(status).map_err(|e| CommandError::Internal(e.to_string()))
}

fn motor_move(controller: &mut Controller, args: &Map<String, Value>) -> Result<Value, CommandError> {
    let motor = controller.motor_mut().ok_or_else(motor_absent)?;
    let next_x = optional_int_as::<i32>(args, "next_x")?;
    let next_y = optional_int_as::<i32>(args, "next_y")?;
    let next_f = optional_int_as::<i32>(args, "next_f")?;
    motor.move_to(next_x, next_y, next_f).map_err(device_error)?;
    Ok(status_ok())
}

fn motor_configure(
    controller: &mut Controller,
    args: &Map<String, Value>,
) -> Result<Value, CommandError> {
    let motor = controller.motor_mut().ok_or_else(motor_absent)?;
    let command = optional_int_as::<u8>(args, "motor_command")?;
    let laser = optional_int(args, "laser")?.map(|v| v != 0);
    let speed = optional_int_as::<u16>(args, "speed")?;
    let accel = optional_int_as::<u16>(args, "accel")?;
    motor
        .configure(command, laser, speed, accel)
        .map_err(device_error)?;
    Ok(status_ok())
}

fn call_application(
    controller: &mut Controller,
    args: &Map<String, Value>,
) -> Result<Value, CommandError> {
    let application_id = match require(args, "application_id")? {
        Value::String(id) if !id.is_empty() => id.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(CommandError::BadRequest(format!(
                "argument 'application_id' must be a non-empty string, got {other}"
            )));
        }
    };
    let payload = require(args, "payload")?.clone();
    controller.call_application(&application_id, payload);
    Ok(status_ok())
}

fn reboot(controller: &mut Controller, _args: &Map<String, Value>) -> Result<Value, CommandError> {
    controller.request_reboot();
    Ok(status_ok())
}
