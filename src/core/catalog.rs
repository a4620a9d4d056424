use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::modbus::{Address, Quantity, ReadFunction, MAX_READ_QUANTITY};
use crate::core::{ConfigError, DataType, WordOrder};

/// A register entry exactly as written in the configuration.
///
/// Numeric fields are wide so out-of-range values reach validation
/// and produce a descriptive [`ConfigError`] instead of a bare parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRegister {
    pub address: i64,
    pub quantity: i64,
    pub name: String,
    pub scale: f64,
    /// Seconds between polls.
    pub frequency: f64,
    pub measurement: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub word_order: WordOrder,
}

/// One validated register to poll. Immutable once the catalog is built.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDescriptor {
    pub address: Address,
    pub quantity: Quantity,
    pub name: String,
    pub scale: f64,
    pub frequency: Duration,
    pub measurement: String,
    pub data_type: DataType,
    pub word_order: WordOrder,
}

impl RegisterDescriptor {
    pub fn read_function(&self) -> ReadFunction {
        ReadFunction::HoldingRegisters(self.address, self.quantity)
    }

    /// One past the last address this register occupies.
    pub fn end(&self) -> u32 {
        self.address as u32 + self.quantity as u32
    }
}

impl TryFrom<RawRegister> for RegisterDescriptor {
    type Error = ConfigError;

    fn try_from(raw: RawRegister) -> Result<Self, Self::Error> {
        let name = raw.name;
        if name.trim().is_empty() {
            return Err(ConfigError::register(&name, "name must not be empty"));
        }

        let address = Address::try_from(raw.address).map_err(|_| {
            ConfigError::register(
                &name,
                format!("address {} is outside 0..=65535", raw.address),
            )
        })?;

        let quantity = Quantity::try_from(raw.quantity)
            .ok()
            .filter(|q| (1..=MAX_READ_QUANTITY).contains(q))
            .ok_or_else(|| {
                ConfigError::register(
                    &name,
                    format!(
                        "quantity {} is outside 1..={MAX_READ_QUANTITY}",
                        raw.quantity
                    ),
                )
            })?;

        if address as u32 + quantity as u32 > u16::MAX as u32 + 1 {
            return Err(ConfigError::register(
                &name,
                format!("{quantity} words from address {address} run past the register space"),
            ));
        }

        let data_type: DataType = raw
            .data_type
            .parse()
            .map_err(|reason: String| ConfigError::register(&name, reason))?;

        if quantity < data_type.size() {
            return Err(ConfigError::register(
                &name,
                format!(
                    "quantity {quantity} is too small for {data_type}, which needs {} words",
                    data_type.size()
                ),
            ));
        }

        if !raw.frequency.is_finite() || raw.frequency <= 0.0 {
            return Err(ConfigError::register(
                &name,
                format!("frequency {} must be a positive number of seconds", raw.frequency),
            ));
        }
        let frequency = Duration::try_from_secs_f64(raw.frequency)
            .ok()
            .filter(|frequency| !frequency.is_zero())
            .ok_or_else(|| {
                ConfigError::register(
                    &name,
                    format!("frequency {} is not a representable non-zero duration", raw.frequency),
                )
            })?;

        if !raw.scale.is_finite() {
            return Err(ConfigError::register(&name, "scale must be a finite number"));
        }

        Ok(RegisterDescriptor {
            address,
            quantity,
            name,
            scale: raw.scale,
            frequency,
            measurement: raw.measurement,
            data_type,
            word_order: raw.word_order,
        })
    }
}

/// The static list of registers to poll, ordered fastest-polled first.
///
/// Registers sharing a frequency keep the order they were configured in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterCatalog {
    registers: Vec<RegisterDescriptor>,
}

impl RegisterCatalog {
    /// Parses a JSON array of register entries.
    ///
    /// ```
    /// use modbus_poller::prelude::*;
    ///
    /// let catalog = RegisterCatalog::load(r#"[
    ///     { "address": 32016, "quantity": 1, "name": "pv1_voltage", "scale": 0.1,
    ///       "frequency": 5, "measurement": "V", "type": "i16" }
    /// ]"#.as_bytes()).expect("Must load");
    ///
    /// assert_eq!(catalog.len(), 1);
    /// ```
    pub fn load(source: impl Read) -> Result<RegisterCatalog, ConfigError> {
        let raw: Vec<RawRegister> = serde_json::from_reader(source)?;
        RegisterCatalog::from_raw(raw)
    }

    pub fn load_path(path: impl AsRef<Path>) -> Result<RegisterCatalog, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        RegisterCatalog::load(BufReader::new(file))
    }

    pub fn from_raw(raw: Vec<RawRegister>) -> Result<RegisterCatalog, ConfigError> {
        let mut seen = HashSet::with_capacity(raw.len());
        let mut registers = Vec::with_capacity(raw.len());

        for entry in raw {
            let descriptor = RegisterDescriptor::try_from(entry)?;
            if !seen.insert(descriptor.name.clone()) {
                return Err(ConfigError::DuplicateName(descriptor.name));
            }

            registers.push(descriptor);
        }

        // Stable, so equal frequencies keep configuration order.
        registers.sort_by_key(|r| r.frequency);

        debug!("Loaded register catalog with {} entries", registers.len());
        Ok(RegisterCatalog { registers })
    }

    pub fn registers(&self) -> &[RegisterDescriptor] {
        &self.registers
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.registers.iter()
    }

    pub fn get(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.registers.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

impl<'a> IntoIterator for &'a RegisterCatalog {
    type Item = &'a RegisterDescriptor;
    type IntoIter = std::slice::Iter<'a, RegisterDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.registers.iter()
    }
}
