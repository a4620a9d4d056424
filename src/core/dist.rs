use log::info;

use crate::core::{Connect, ConnectionConfig, Error, ModbusClient, Tcp};

/// The entry-point structure for reaching a device.
///
/// This structure does not need to be initialised, but is rather a namespace for helper methods
/// that build a [`ModbusClient`] and open its first session, so that an unreachable device is
/// reported at startup rather than on the first poll.
///
/// ```rust
/// use modbus_poller::prelude::*;
///
/// # async fn docs() {
/// let config = ConnectionConfig::new("192.168.200.1", 6607);
/// let client = Collector::connect(config).await.expect("Must connect");
///
/// println!("Connected to {:?}", client);
/// # }
/// ```
///
/// ## Connectors
///
/// - [`Tcp`].
///     Modbus TCP over a socket. Used by [`Collector::connect`].
///
/// - [`EmulatedDevice`](crate::core::EmulatedDevice).
///     An in-process device with scriptable registers and faults, for tests and dry runs.
///     Pass it to [`Collector::connect_with`].
pub struct Collector;

impl Collector {
    /// Connects over Modbus TCP, making up to `config.retries + 1` attempts.
    pub async fn connect(config: ConnectionConfig) -> Result<ModbusClient<Tcp>, Error> {
        Collector::connect_with(Tcp, config).await
    }

    /// Connects through any connector.
    ///
    /// ```rust
    /// use modbus_poller::prelude::*;
    ///
    /// # async fn docs() {
    /// let device = EmulatedDevice::new();
    /// device.set_register(32016, 205);
    ///
    /// let client = Collector::connect_with(device, ConnectionConfig::new("emulated", 502))
    ///     .await
    ///     .expect("Must connect");
    ///
    /// assert!(client.is_connected());
    /// # }
    /// ```
    pub async fn connect_with<C>(connector: C, config: ConnectionConfig) -> Result<ModbusClient<C>, Error>
    where
        C: Connect,
    {
        config.validate()?;

        let mut client = ModbusClient::new(config, connector);
        client.connect().await?;

        info!("Session with {} ready", client.config());
        Ok(client)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::{ConfigError, EmulatedDevice};

    #[tokio::test]
    async fn connects_emulated_device() {
        let device = EmulatedDevice::new();
        let client = Collector::connect_with(device.clone(), ConnectionConfig::new("emulated", 502))
            .await
            .expect("Must connect");

        assert!(client.is_connected());
        assert_eq!(device.connections(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_config_before_connecting() {
        let device = EmulatedDevice::new();
        let result = Collector::connect_with(device.clone(), ConnectionConfig::new("", 502)).await;

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::Connection(_)))
        ));
        assert_eq!(device.connections(), 0);
    }

    #[tokio::test]
    async fn unreachable_device_fails() {
        let device = EmulatedDevice::new();
        device.refuse_connections(usize::MAX);

        let config = ConnectionConfig::new("emulated", 502).with_retries(1);
        let result = Collector::connect_with(device, config).await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
