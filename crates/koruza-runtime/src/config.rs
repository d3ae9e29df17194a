//! Persisted configuration store.
//!
//! The configuration is a flat JSON object.  Updates are merged per key; a
//! key with a registered validator has its value coerced through it, every
//! other key is stored verbatim.  An update is all-or-nothing: the file is
//! rewritten (temp file + rename) before the in-memory copy changes, and a
//! single invalid value rejects the whole update.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use koruza_middleware::protocol::coerce_int;
use koruza_types::KoruzaError;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Hostname used when the configuration names none.
pub const DEFAULT_NAME: &str = "koruza";

/// Coerces a raw value or explains why it is invalid.
pub type Validator = fn(&Value) -> Result<Value, String>;

pub struct ConfigStore {
    path: PathBuf,
    values: Map<String, Value>,
    validators: HashMap<&'static str, Validator>,
}

impl ConfigStore {
    /// Load the store at `path` with the standard validators registered.
    ///
    /// A missing file yields an empty configuration.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::Io`] when the file exists but cannot be read, and
    /// [`KoruzaError::Config`] when it is not a JSON object.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KoruzaError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(KoruzaError::Config(format!(
                        "{} does not hold a JSON object",
                        path.display()
                    )));
                }
                Err(e) => {
                    return Err(KoruzaError::Config(format!("{}: {e}", path.display())));
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no configuration file, starting empty");
                Map::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut store = Self {
            path,
            values,
            validators: HashMap::new(),
        };
        store.register("distance", validate_integer);
        store.register("remote_ip", validate_hostname);
        store.register("data_measurement_host", validate_hostname);
        store.register("name", validate_node_name);
        Ok(store)
    }

    pub fn register(&mut self, key: &'static str, validator: Validator) {
        self.validators.insert(key, validator);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured hostname, or [`DEFAULT_NAME`].
    pub fn name(&self) -> &str {
        self.get_str("name").unwrap_or(DEFAULT_NAME)
    }

    /// Host serving the link measurement endpoint, if configured.
    pub fn data_measurement_host(&self) -> Option<&str> {
        self.get_str("data_measurement_host")
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Validate, persist and apply `changes`.
    ///
    /// # Errors
    ///
    /// [`KoruzaError::Config`] naming the first invalid key (nothing is
    /// written), or [`KoruzaError::Io`] when the file cannot be written (the
    /// in-memory copy is left unchanged).
    pub fn update(&mut self, changes: &Map<String, Value>) -> Result<(), KoruzaError> {
        let mut next = self.values.clone();
        for (key, raw) in changes {
            let value = match self.validators.get(key.as_str()) {
                Some(validate) => validate(raw)
                    .map_err(|reason| KoruzaError::Config(format!("invalid '{key}': {reason}")))?,
                None => raw.clone(),
            };
            next.insert(key.clone(), value);
        }

        self.persist(&next)?;
        debug!(keys = changes.len(), "configuration updated");
        self.values = next;
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), KoruzaError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let text = serde_json::to_string_pretty(values)?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validators
// ────────────────────────────────────────────────────────────────────────────

pub fn validate_integer(raw: &Value) -> Result<Value, String> {
    coerce_int(raw)
        .map(Value::from)
        .ok_or_else(|| format!("expected an integer, got {raw}"))
}

/// Accepts an IP address, an RFC 1123 host name, or an empty string.  The
/// empty string is stored and reads back as "not configured".
pub fn validate_hostname(raw: &Value) -> Result<Value, String> {
    let Some(text) = raw.as_str().map(str::trim) else {
        return Err(format!("expected a host name, got {raw}"));
    };
    if text.is_empty() || text.parse::<IpAddr>().is_ok() || is_hostname(text) {
        Ok(Value::from(text))
    } else {
        Err(format!("'{text}' is not a valid host name"))
    }
}

/// Accepts a single RFC 1123 label, or an empty string for the default name.
///
/// The value is written to `/etc/hostname`, so addresses and dotted names are
/// rejected.
pub fn validate_node_name(raw: &Value) -> Result<Value, String> {
    let Some(text) = raw.as_str().map(str::trim) else {
        return Err(format!("expected a node name, got {raw}"));
    };
    if text.is_empty() || is_label(text) {
        Ok(Value::from(text))
    } else {
        Err(format!("'{text}' is not a valid node name"))
    }
}

fn is_hostname(text: &str) -> bool {
    let text = text.strip_suffix('.').unwrap_or(text);
    text.len() <= 253 && text.split('.').all(is_label)
}

fn is_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn read_back(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        assert!(store.values().is_empty());
        assert_eq!(store.name(), DEFAULT_NAME);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(ConfigStore::open(&path), Err(KoruzaError::Config(_))));
    }

    #[test]
    fn distance_is_coerced_in_memory_and_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::open(&path).unwrap();

        store.update(&changes(json!({"distance": "12"}))).unwrap();

        assert_eq!(store.get("distance"), Some(&json!(12)));
        assert_eq!(read_back(&path)["distance"], json!(12));
    }

    #[test]
    fn unknown_keys_pass_through_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::open(&path).unwrap();

        store
            .update(&changes(json!({"unknown_key": "x", "nested": {"a": [1, 2]}})))
            .unwrap();

        assert_eq!(store.get("unknown_key"), Some(&json!("x")));
        assert_eq!(read_back(&path)["nested"], json!({"a": [1, 2]}));
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::open(&path).unwrap();
        store.update(&changes(json!({"distance": 5}))).unwrap();

        let err = store
            .update(&changes(json!({"distance": 7, "remote_ip": "not a host!"})))
            .unwrap_err();

        assert!(err.to_string().contains("remote_ip"));
        assert_eq!(store.get("distance"), Some(&json!(5)));
        assert_eq!(read_back(&path)["distance"], json!(5));
    }

    #[test]
    fn existing_file_is_merged_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"name": "north", "distance": 100}"#).unwrap();
        let mut store = ConfigStore::open(&path).unwrap();

        store.update(&changes(json!({"distance": 250}))).unwrap();

        assert_eq!(store.name(), "north");
        assert_eq!(read_back(&path), json!({"name": "north", "distance": 250}));
    }

    #[test]
    fn hostname_validator() {
        assert_eq!(validate_hostname(&json!(" koruza-2 ")), Ok(json!("koruza-2")));
        assert!(validate_hostname(&json!("10.0.0.1")).is_ok());
        assert!(validate_hostname(&json!("fe80::1")).is_ok());
        assert!(validate_hostname(&json!("node.example.org.")).is_ok());
        assert!(validate_hostname(&json!("-bad")).is_err());
        assert!(validate_hostname(&json!("under_score")).is_err());
        assert_eq!(validate_hostname(&json!("")), Ok(json!("")));
        assert!(validate_hostname(&json!(42)).is_err());
    }

    #[test]
    fn node_name_rejects_addresses() {
        assert_eq!(validate_node_name(&json!(" north-1 ")), Ok(json!("north-1")));
        assert!(validate_node_name(&json!("10.0.0.1")).is_err());
        assert!(validate_node_name(&json!("fe80::1")).is_err());
        assert!(validate_node_name(&json!("node.example.org")).is_err());
        assert!(validate_node_name(&json!("bad-")).is_err());
        assert_eq!(validate_node_name(&json!("")), Ok(json!("")));
    }

    #[test]
    fn address_as_name_is_rejected_by_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("config.json")).unwrap();

        let err = store.update(&changes(json!({"name": "10.0.0.1"}))).unwrap_err();
        assert!(err.to_string().contains("name"));
        assert_eq!(store.name(), DEFAULT_NAME);

        store.update(&changes(json!({"name": ""}))).unwrap();
        assert_eq!(store.get("name"), Some(&json!("")));
        assert_eq!(store.name(), DEFAULT_NAME);
    }

    #[test]
    fn integer_validator() {
        assert_eq!(validate_integer(&json!("12")), Ok(json!(12)));
        assert_eq!(validate_integer(&json!(12.7)), Ok(json!(12)));
        assert!(validate_integer(&json!("far")).is_err());
    }
}
