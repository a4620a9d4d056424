use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::modbus::{Quantity, MAX_READ_QUANTITY};
use crate::core::{ConfigError, ConnectionConfig, PlannerConfig, RawRegister, RegisterCatalog};

/// How the poller groups and paces reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    /// Read registers falling due together through shared requests.
    pub coalesce: bool,
    pub max_gap: u16,
    pub max_span: Quantity,
    /// Book polls on wall-clock multiples of each register's frequency.
    pub align: bool,
    /// Quiet time the device gets between the end of one read and the start of the next.
    #[serde(rename = "min_request_interval_ms", with = "crate::core::device::millis")]
    pub min_request_interval: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        PollerSettings {
            coalesce: false,
            max_gap: 0,
            max_span: MAX_READ_QUANTITY,
            align: false,
            min_request_interval: Duration::ZERO,
        }
    }
}

impl PollerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_READ_QUANTITY).contains(&self.max_span) {
            return Err(ConfigError::Poller(format!(
                "max_span {} is outside 1..={MAX_READ_QUANTITY}",
                self.max_span
            )));
        }

        Ok(())
    }

    pub fn planner(&self) -> PlannerConfig {
        PlannerConfig {
            max_gap: self.max_gap,
            max_span: self.max_span,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    connection: ConnectionConfig,
    #[serde(default)]
    poller: PollerSettings,
    registers: Vec<RawRegister>,
}

/// Everything the poller needs, read from one JSON file.
///
/// ```
/// use modbus_poller::prelude::*;
///
/// let settings = Settings::from_reader(r#"{
///     "connection": { "host": "192.168.200.1", "port": 6607 },
///     "registers": [
///         { "address": 32016, "quantity": 1, "name": "pv1_voltage", "scale": 0.1,
///           "frequency": 5, "measurement": "V", "type": "i16" }
///     ]
/// }"#.as_bytes()).expect("Must load");
///
/// assert_eq!(settings.connection.port, 6607);
/// assert!(!settings.poller.coalesce);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub connection: ConnectionConfig,
    pub poller: PollerSettings,
    pub catalog: RegisterCatalog,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = Settings::from_reader(BufReader::new(file))?;
        info!(
            "Loaded {} register(s) from {}",
            settings.catalog.len(),
            path.display()
        );

        Ok(settings)
    }

    pub fn from_reader(source: impl Read) -> Result<Settings, ConfigError> {
        let raw: RawSettings = serde_json::from_reader(source)?;

        raw.connection.validate()?;
        raw.poller.validate()?;

        let catalog = RegisterCatalog::from_raw(raw.registers)?;
        if catalog.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        Ok(Settings {
            connection: raw.connection,
            poller: raw.poller,
            catalog,
        })
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    const REGISTER: &str = r#"{ "address": 32016, "quantity": 1, "name": "pv1_voltage",
        "scale": 0.1, "frequency": 5, "measurement": "V", "type": "i16" }"#;

    #[test]
    fn loads_full_settings_file() {
        let mut file = tempfile::NamedTempFile::new().expect("Must create file");
        write!(
            file,
            r#"{{
                "connection": {{ "host": "192.168.200.1", "port": 6607, "unit_id": 1,
                                 "timeout_ms": 2000, "retries": 1 }},
                "poller": {{ "coalesce": true, "max_gap": 4, "align": true,
                             "min_request_interval_ms": 500 }},
                "registers": [{REGISTER}]
            }}"#
        )
        .expect("Must write");

        let settings = Settings::load(file.path()).expect("Must load");

        assert_eq!(settings.connection.timeout, Duration::from_secs(2));
        assert_eq!(settings.connection.retries, 1);
        assert!(settings.poller.coalesce);
        assert!(settings.poller.align);
        assert_eq!(settings.poller.min_request_interval, Duration::from_millis(500));
        assert_eq!(
            settings.poller.planner(),
            PlannerConfig {
                max_gap: 4,
                max_span: MAX_READ_QUANTITY
            }
        );
        assert_eq!(settings.catalog.len(), 1);
    }

    #[test]
    fn rejects_empty_catalog() {
        let result = Settings::from_reader(
            r#"{ "connection": { "host": "localhost" }, "registers": [] }"#.as_bytes(),
        );
        assert!(matches!(result, Err(ConfigError::EmptyCatalog)));
    }

    #[test]
    fn rejects_invalid_sections() {
        let empty_host = format!(r#"{{ "connection": {{ "host": "" }}, "registers": [{REGISTER}] }}"#);
        assert!(matches!(
            Settings::from_reader(empty_host.as_bytes()),
            Err(ConfigError::Connection(_))
        ));

        let zero_span = format!(
            r#"{{ "connection": {{ "host": "localhost" }}, "poller": {{ "max_span": 0 }},
                 "registers": [{REGISTER}] }}"#
        );
        assert!(matches!(
            Settings::from_reader(zero_span.as_bytes()),
            Err(ConfigError::Poller(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("Must create dir");
        let result = Settings::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
