use std::fmt::{Display, Formatter};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::core::modbus::Word;
use crate::core::{Error, RegisterDescriptor, RegisterValue, StandardDecoder};

/// The outcome of polling one register once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    pub name: String,
    pub measurement: String,
    pub raw: Option<RegisterValue>,
    /// `raw` multiplied by the register's scale.
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl ReadResult {
    pub fn success(descriptor: &RegisterDescriptor, raw: RegisterValue, attempts: u32) -> ReadResult {
        ReadResult {
            name: descriptor.name.clone(),
            measurement: descriptor.measurement.clone(),
            raw: Some(raw),
            value: Some(raw.as_f64() * descriptor.scale),
            timestamp: Utc::now(),
            success: true,
            error: None,
            attempts,
        }
    }

    pub fn failure(descriptor: &RegisterDescriptor, error: &Error, attempts: u32) -> ReadResult {
        ReadResult {
            name: descriptor.name.clone(),
            measurement: descriptor.measurement.clone(),
            raw: None,
            value: None,
            timestamp: Utc::now(),
            success: false,
            error: Some(error.to_string()),
            attempts,
        }
    }

    /// Decodes the register's words out of a reply. A reply too short for the
    /// register's type yields a failed result.
    pub(crate) fn decode(
        descriptor: &RegisterDescriptor,
        words: &[Word],
        attempts: u32,
    ) -> ReadResult {
        let decoder = StandardDecoder {
            words,
            word_order: descriptor.word_order,
        };

        match decoder.decode_as(descriptor.data_type) {
            Ok(raw) => ReadResult::success(descriptor, raw, attempts),
            Err(err) => ReadResult::failure(descriptor, &err.into(), attempts),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl Display for ReadResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

        match (self.value, &self.error) {
            (Some(value), _) if self.success => {
                write!(f, "{timestamp} {} = {value}", self.name)?;
                if !self.measurement.is_empty() {
                    write!(f, " {}", self.measurement)?;
                }
                Ok(())
            }
            (_, error) => write!(
                f,
                "{timestamp} {} failed after {} attempt(s): {}",
                self.name,
                self.attempts,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
