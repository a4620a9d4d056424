use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::modbus::MODBUS_TCP_DEFAULT_PORT;
use crate::core::ConfigError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRIES: u32 = 2;

/// Where the device lives and how patiently to talk to it.
///
/// Built once at startup and passed by value to the client, so a session is never
/// created from partially filled settings.
///
/// ```
/// use std::time::Duration;
/// use modbus_poller::prelude::*;
///
/// let config = ConnectionConfig::new("192.168.200.1", 6607)
///     .with_timeout(Duration::from_secs(2))
///     .with_retries(2);
///
/// assert_eq!(config.to_string(), "192.168.200.1:6607");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Unit identifier carried in every request header.
    #[serde(default)]
    pub unit_id: u8,
    /// Bound on each connection or read attempt.
    #[serde(rename = "timeout_ms", default = "default_timeout", with = "millis")]
    pub timeout: Duration,
    /// Additional attempts after the first one fails.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_port() -> u16 {
    MODBUS_TCP_DEFAULT_PORT
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: host.into(),
            port,
            unit_id: 0,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn with_unit_id(mut self, unit_id: u8) -> ConnectionConfig {
        self.unit_id = unit_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ConnectionConfig {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> ConnectionConfig {
        self.retries = retries;
        self
    }

    /// Total attempts a single operation may make.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Connection("host must not be empty".into()));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::Connection(
                "timeout must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

impl Display for ConnectionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
