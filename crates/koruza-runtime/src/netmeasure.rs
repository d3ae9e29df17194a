//! Link measurement client.
//!
//! A peer host serves packet-loss counters for the optical link as JSON:
//!
//! ```json
//! {"koruza": {"loss_percent": 0.4, "sent": 1000, "rcvd": 996}}
//! ```
//!
//! The slow loop polls it through the [`TelemetrySource`] trait so tests can
//! substitute canned answers.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Path of the measurement endpoint on the peer host.
pub const NETMEASURE_PATH: &str = "/cgi-bin/koruza/netmeasure_get";

#[derive(Error, Debug)]
pub enum NetmeasureError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

/// Decoded link counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMeasurement {
    pub loss_percent: f64,
    pub sent: i64,
    pub rcvd: i64,
}

impl LinkMeasurement {
    /// Extract the counters from an endpoint response.
    ///
    /// # Errors
    ///
    /// [`NetmeasureError::BadResponse`] naming the first missing field.
    pub fn from_response(body: &Value) -> Result<Self, NetmeasureError> {
        let section = body
            .get("koruza")
            .ok_or_else(|| NetmeasureError::BadResponse("missing 'koruza' object".into()))?;
        let field = |name: &str| {
            section
                .get(name)
                .ok_or_else(|| NetmeasureError::BadResponse(format!("missing 'koruza.{name}'")))
        };
        let loss_percent = field("loss_percent")?
            .as_f64()
            .ok_or_else(|| NetmeasureError::BadResponse("'loss_percent' is not a number".into()))?;
        let sent = field("sent")?
            .as_i64()
            .ok_or_else(|| NetmeasureError::BadResponse("'sent' is not an integer".into()))?;
        let rcvd = field("rcvd")?
            .as_i64()
            .ok_or_else(|| NetmeasureError::BadResponse("'rcvd' is not an integer".into()))?;
        Ok(Self {
            loss_percent,
            sent,
            rcvd,
        })
    }
}

/// Source of link measurements for a given host.
pub trait TelemetrySource {
    fn fetch(&self, host: &str) -> Result<LinkMeasurement, NetmeasureError>;
}

/// Blocking HTTP client for the measurement endpoint.
pub struct NetmeasureClient {
    client: reqwest::blocking::Client,
}

impl NetmeasureClient {
    /// Build a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`NetmeasureError::Http`] when the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, NetmeasureError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl TelemetrySource for NetmeasureClient {
    fn fetch(&self, host: &str) -> Result<LinkMeasurement, NetmeasureError> {
        let url = format!("http://{host}{NETMEASURE_PATH}");
        let body: Value = self
            .client
            .get(&url)
            .send()?
            .error_for_status()?
            .json()?;
        LinkMeasurement::from_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_counters() {
        let body = json!({"koruza": {"loss_percent": 0.4, "sent": 1000, "rcvd": 996}});
        assert_eq!(
            LinkMeasurement::from_response(&body).unwrap(),
            LinkMeasurement {
                loss_percent: 0.4,
                sent: 1000,
                rcvd: 996
            }
        );
    }

    #[test]
    fn integer_loss_is_accepted() {
        let body = json!({"koruza": {"loss_percent": 0, "sent": 10, "rcvd": 10}});
        assert_eq!(LinkMeasurement::from_response(&body).unwrap().loss_percent, 0.0);
    }

    #[test]
    fn missing_fields_are_bad_responses() {
        for body in [
            json!({}),
            json!({"koruza": {"sent": 1, "rcvd": 1}}),
            json!({"koruza": {"loss_percent": 1.0, "sent": "x", "rcvd": 1}}),
        ] {
            assert!(matches!(
                LinkMeasurement::from_response(&body),
                Err(NetmeasureError::BadResponse(_))
            ));
        }
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let m = LinkMeasurement {
            loss_percent: 1.5,
            sent: 20,
            rcvd: 19,
        };
        let v = serde_json::to_value(m).unwrap();
        assert_eq!(v, json!({"loss_percent": 1.5, "sent": 20, "rcvd": 19}));
    }
}
