//! Command request/reply protocol.
//!
//! Requests are JSON objects `{"type":"command","command":<name>, ...args}`.
//! Replies are either `{"type":"cmd_reply", ...payload}` or
//! `{"type":"cmd_error","code":<int>,"message":<string>}` with an
//! HTTP-borrowed code.

use serde_json::{Map, Value, json};
use thiserror::Error;

pub const REQUEST_TYPE: &str = "command";
pub const REPLY_TYPE: &str = "cmd_reply";
pub const ERROR_TYPE: &str = "cmd_error";

/// Failure of a single command, carried back to the caller as a `cmd_error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
    #[error("command '{0}' is not implemented")]
    NotImplemented(String),
}

impl CommandError {
    /// Numeric code of the reply.
    pub fn code(&self) -> u16 {
        match self {
            CommandError::BadRequest(_) => 400,
            CommandError::Internal(_) => 500,
            CommandError::NotImplemented(_) => 501,
        }
    }

    pub fn missing(field: &str) -> Self {
        CommandError::BadRequest(format!("missing argument '{field}'"))
    }
}

/// A validated command request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub command: String,
    /// Every field of the request object, discriminators included.
    pub args: Map<String, Value>,
}

impl CommandRequest {
    /// Decode and validate a request frame.
    ///
    /// # Errors
    ///
    /// [`CommandError::BadRequest`] when the frame is not a JSON object, the
    /// `type` is not `"command"` or the `command` field is missing or empty.
    pub fn parse(frame: &str) -> Result<Self, CommandError> {
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| CommandError::BadRequest(format!("malformed request: {e}")))?;
        let Value::Object(args) = value else {
            return Err(CommandError::BadRequest("request is not an object".into()));
        };
        if args.get("type").and_then(Value::as_str) != Some(REQUEST_TYPE) {
            return Err(CommandError::BadRequest(format!(
                "request type must be '{REQUEST_TYPE}'"
            )));
        }
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CommandError::missing("command"))?
            .to_string();
        Ok(Self { command, args })
    }
}

/// Success reply: the payload's fields merged under the `cmd_reply`
/// discriminator.  A non-object payload is carried under `"result"`.
pub fn reply(payload: Value) -> Value {
    let mut body = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            map
        }
    };
    body.insert("type".into(), Value::from(REPLY_TYPE));
    Value::Object(body)
}

pub fn error_reply(error: &CommandError) -> Value {
    json!({
        "type": ERROR_TYPE,
        "code": error.code(),
        "message": error.to_string(),
    })
}

/// The `{"status":"ok"}` payload of commands with nothing else to report.
pub fn status_ok() -> Value {
    json!({"status": "ok"})
}

// ────────────────────────────────────────────────────────────────────────────
// Argument access
// ────────────────────────────────────────────────────────────────────────────

/// Coerce a JSON value to an integer.
///
/// Accepts integers, floats (truncated toward zero), booleans and strings
/// holding an integer (surrounding whitespace ignored).
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Fetch a required field.
pub fn require<'a>(args: &'a Map<String, Value>, field: &str) -> Result<&'a Value, CommandError> {
    args.get(field).ok_or_else(|| CommandError::missing(field))
}

/// Fetch an optional integer field; `null` counts as absent.
///
/// # Errors
///
/// [`CommandError::BadRequest`] naming the field when it is present but not
/// integer-coercible.
pub fn optional_int(args: &Map<String, Value>, field: &str) -> Result<Option<i64>, CommandError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => coerce_int(v).map(Some).ok_or_else(|| {
            CommandError::BadRequest(format!("argument '{field}' must be an integer, got {v}"))
        }),
    }
}

/// As [`optional_int`], additionally checking the value fits in `T`.
pub fn optional_int_as<T: TryFrom<i64>>(
    args: &Map<String, Value>,
    field: &str,
) -> Result<Option<T>, CommandError> {
    optional_int(args, field)?
        .map(|v| {
            T::try_from(v).map_err(|_| {
                CommandError::BadRequest(format!("argument '{field}' is out of range: {v}"))
            })
        })
        .transpose()
}
