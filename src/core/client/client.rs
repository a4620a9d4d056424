use std::fmt::{Debug, Formatter};

use log::{debug, info, trace, warn};

use crate::core::modbus::{ReadFunction, Transport, TransportError, Word};
use crate::core::{
    Connect, ConnectionConfig, Error, PlannerConfig, ReadPlanner, ReadResult, RegisterDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. Set by [`ModbusClient::close`].
    Closed,
}

/// A session with one device, reading holding registers with a bounded retry budget.
///
/// Every connection attempt is bounded by the configured timeout, and so is every read
/// attempt including any reconnect it needs.
/// A failed read is repeated up to `retries` more times without backoff, and a session
/// lost to a transport error is re-established by the next attempt.
///
/// Reads take `&mut self`, so at most one request is in flight per client.
pub struct ModbusClient<C>
where
    C: Connect,
{
    config: ConnectionConfig,
    connector: C,
    transport: Option<C::Transport>,
    state: ConnectionState,
}

impl<C> Debug for ModbusClient<C>
where
    C: Connect,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusClient")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl<C> ModbusClient<C>
where
    C: Connect,
{
    pub fn new(config: ConnectionConfig, connector: C) -> ModbusClient<C> {
        ModbusClient {
            config,
            connector,
            transport: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Opens the session, making up to `retries + 1` attempts.
    ///
    /// Returns immediately when already connected, and fails with [`Error::Closed`]
    /// once the client has been closed.
    pub async fn connect(&mut self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Closed => return Err(Error::Closed),
            ConnectionState::Connected if self.transport.is_some() => return Ok(()),
            _ => {}
        }

        let budget = self.config.attempts();
        let mut attempt = 1;
        loop {
            match self.establish().await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < budget => {
                    warn!("Connection attempt {attempt}/{budget} failed: {err}");
                    attempt += 1;
                }
                Err(err) => {
                    warn!("Giving up on {} after {attempt} attempt(s): {err}", self.config);
                    return Err(err);
                }
            }
        }
    }

    /// Reads one register. Never fails: errors are reported through the result.
    pub async fn read_holding_register(&mut self, descriptor: &RegisterDescriptor) -> ReadResult {
        let (result, attempts) = self.read_with_retry(descriptor.read_function()).await;

        match result {
            Ok(words) => ReadResult::decode(descriptor, &words, attempts),
            Err(err) => {
                warn!(
                    "Read of `{}` failed after {attempts} attempt(s): {err}",
                    descriptor.name
                );
                ReadResult::failure(descriptor, &err, attempts)
            }
        }
    }

    /// Reads several registers using as few requests as `planner` allows.
    ///
    /// Each request follows the same retry contract as [`Self::read_holding_register`],
    /// and every register served by a failed request gets a failed result. Results are
    /// returned in the order of `descriptors`.
    pub async fn read_batch(
        &mut self,
        descriptors: &[&RegisterDescriptor],
        planner: PlannerConfig,
    ) -> Vec<ReadResult> {
        let mut results: Vec<Option<ReadResult>> = vec![None; descriptors.len()];

        for span in ReadPlanner::plan(planner, descriptors) {
            trace!(
                "Reading span of {} word(s) at {} for {} register(s)",
                span.quantity,
                span.address,
                span.registers.len()
            );

            let function = ReadFunction::HoldingRegisters(span.address, span.quantity);
            let (result, attempts) = self.read_with_retry(function).await;

            match result {
                Ok(words) => {
                    for (index, descriptor) in &span.registers {
                        let offset = span.offset_of(descriptor);
                        let end = (offset + descriptor.quantity as usize).min(words.len());
                        let slice = words.get(offset..end).unwrap_or_default();

                        results[*index] = Some(ReadResult::decode(descriptor, slice, attempts));
                    }
                }
                Err(err) => {
                    warn!(
                        "Read of {} word(s) at {} failed after {attempts} attempt(s): {err}",
                        span.quantity, span.address
                    );
                    for (index, descriptor) in &span.registers {
                        results[*index] = Some(ReadResult::failure(descriptor, &err, attempts));
                    }
                }
            }
        }

        results.into_iter().flatten().collect()
    }

    /// Releases the session. Later calls do nothing.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.disconnect().await;
        self.state = ConnectionState::Closed;
        info!("Closed connection to {}", self.config);
    }

    /// Runs `function` until it succeeds, fails with a non-retryable error or the
    /// attempt budget runs out. Returns the outcome with the attempts spent.
    async fn read_with_retry(&mut self, function: ReadFunction) -> (Result<Vec<Word>, Error>, u32) {
        let budget = self.config.attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let err = match self.attempt(function).await {
                Ok(words) => return (Ok(words), attempts),
                Err(err) => err,
            };

            if err.drops_connection() {
                self.disconnect().await;
            }

            if !err.is_retryable() || attempts >= budget {
                return (Err(err), attempts);
            }

            debug!("Attempt {attempts}/{budget} of {function:?} failed, retrying: {err}");
        }
    }

    async fn attempt(&mut self, function: ReadFunction) -> Result<Vec<Word>, Error> {
        if self.state == ConnectionState::Closed {
            return Err(Error::Closed);
        }

        // Reconnecting and reading share one deadline.
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.exchange(function)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout).into()),
        }
    }

    async fn exchange(&mut self, function: ReadFunction) -> Result<Vec<Word>, Error> {
        if self.transport.is_none() {
            self.establish().await?;
        }

        let Some(transport) = self.transport.as_mut() else {
            return Err(TransportError::Closed.into());
        };

        transport.read(function).await
    }

    /// One bounded connection attempt.
    async fn establish(&mut self) -> Result<(), Error> {
        self.state = ConnectionState::Connecting;
        debug!("Connecting to {}", self.config);

        let timeout = self.config.timeout;
        let connecting = tokio::time::timeout(timeout, self.connector.connect(&self.config)).await;

        match connecting {
            Ok(Ok(transport)) => {
                self.transport = Some(transport);
                self.state = ConnectionState::Connected;
                info!("Connected to {}", self.config);
                Ok(())
            }
            Ok(Err(err)) => {
                self.state = ConnectionState::Disconnected;
                Err(err)
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                Err(Error::connection(&self.config, TransportError::Timeout(timeout)))
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                debug!("Error while closing session with {}: {err}", self.config);
            }
        }

        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Disconnected;
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::core::modbus::{ExceptionCode, ProtocolError};
    use crate::core::{DataType, EmulatedDevice, Fault, WordOrder};

    fn register(name: &str, address: u16, data_type: DataType) -> RegisterDescriptor {
        RegisterDescriptor {
            address,
            quantity: data_type.size(),
            name: name.to_string(),
            scale: 0.1,
            frequency: Duration::from_secs(1),
            measurement: "V".to_string(),
            data_type,
            word_order: WordOrder::Big,
        }
    }

    fn client(device: &EmulatedDevice, retries: u32) -> ModbusClient<EmulatedDevice> {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = ConnectionConfig::new("emulated", 502)
            .with_timeout(Duration::from_millis(200))
            .with_retries(retries);
        ModbusClient::new(config, device.clone())
    }

    #[tokio::test]
    async fn reads_and_scales() {
        let device = EmulatedDevice::new();
        device.set_register(32016, 205);

        let mut client = client(&device, 2);
        client.connect().await.expect("Must connect");
        assert!(client.is_connected());

        let result = client
            .read_holding_register(&register("pv1_voltage", 32016, DataType::I16))
            .await;

        assert!(result.is_success(), "{result}");
        assert_eq!(result.attempts, 1);
        assert!((result.value.expect("Must have a value") - 20.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Disconnect, 2);

        let mut client = client(&device, 2);
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;

        assert!(result.is_success(), "{result}");
        assert_eq!(result.attempts, 3);
        assert_eq!(device.read_requests(), 3);
        // The first attempt connects, each disconnect forces another session.
        assert_eq!(device.connections(), 3);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Disconnect, 10);

        let mut client = client(&device, 2);
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(device.read_requests(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_reconnect_consumes_an_attempt() {
        let device = EmulatedDevice::new();
        device.refuse_connections(1);

        let mut client = client(&device, 1);
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;

        assert!(result.is_success(), "{result}");
        assert_eq!(result.attempts, 2);
        assert_eq!(device.read_requests(), 1);
    }

    #[tokio::test]
    async fn exception_responses_are_not_retried() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Exception(ExceptionCode::IllegalDataAddress), 1);

        let mut client = client(&device, 2);
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 1);
        // Protocol errors keep the session.
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn busy_device_is_retried() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Exception(ExceptionCode::ServerDeviceBusy), 1);
        device.inject(Fault::Malformed, 1);

        let mut client = client(&device, 2);
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;

        assert!(result.is_success(), "{result}");
        assert_eq!(result.attempts, 3);
        assert_eq!(device.connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_reads_time_out() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Hang, 1);

        let mut client = client(&device, 0);
        let started = tokio::time::Instant::now();
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;

        assert!(!result.is_success());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    /// Opens sessions on an emulated device after a fixed delay.
    struct SlowConnector {
        device: EmulatedDevice,
        delay: Duration,
    }

    impl Connect for SlowConnector {
        type Transport = <EmulatedDevice as Connect>::Transport;

        async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Transport, Error> {
            tokio::time::sleep(self.delay).await;
            self.device.connect(config).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_and_read_share_one_deadline() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Hang, 1);

        let config = ConnectionConfig::new("emulated", 502)
            .with_timeout(Duration::from_millis(200))
            .with_retries(0);
        let connector = SlowConnector {
            device: device.clone(),
            delay: Duration::from_millis(190),
        };
        let mut client = ModbusClient::new(config, connector);

        let started = tokio::time::Instant::now();
        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;
        let elapsed = started.elapsed();

        assert!(!result.is_success());
        assert_eq!(result.attempts, 1);
        assert!(elapsed >= Duration::from_millis(200), "elapsed={elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "elapsed={elapsed:?}");
        assert_eq!(device.read_requests(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_retries_refusals() {
        let device = EmulatedDevice::new();
        device.refuse_connections(2);

        let mut patient = client(&device, 2);
        patient.connect().await.expect("Must connect on the third attempt");
        assert_eq!(device.connections(), 1);

        let device = EmulatedDevice::new();
        device.refuse_connections(3);

        let mut exhausted = client(&device, 2);
        assert!(matches!(
            exhausted.connect().await,
            Err(Error::Connection { .. })
        ));
        assert_eq!(exhausted.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let device = EmulatedDevice::new();

        let mut client = client(&device, 2);
        client.connect().await.expect("Must connect");

        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);

        assert!(matches!(client.connect().await, Err(Error::Closed)));

        let result = client
            .read_holding_register(&register("a", 1, DataType::U16))
            .await;
        assert!(!result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(device.read_requests(), 0);
    }

    #[tokio::test]
    async fn batch_results_follow_input_order() {
        let device = EmulatedDevice::new();
        device.set_registers(32016, &[205, 12]);
        device.set_registers(32064, &[0, 1000]);

        let voltage = register("voltage", 32016, DataType::I16);
        let current = register("current", 32017, DataType::I16);
        let power = register("power", 32064, DataType::I32);

        let mut client = client(&device, 2);
        let results = client
            .read_batch(&[&power, &voltage, &current], PlannerConfig::default())
            .await;

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["power", "voltage", "current"]);
        assert!(results.iter().all(ReadResult::is_success));
        assert_eq!(results[0].raw, Some(crate::core::RegisterValue::I32(1000)));
        assert_eq!(results[2].raw, Some(crate::core::RegisterValue::I16(12)));
        // Two spans, one request each.
        assert_eq!(device.read_requests(), 2);
    }

    #[tokio::test]
    async fn batch_failure_marks_every_member() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Exception(ExceptionCode::IllegalDataAddress), 1);

        let a = register("a", 10, DataType::U16);
        let b = register("b", 11, DataType::U16);

        let mut client = client(&device, 2);
        let results = client.read_batch(&[&a, &b], PlannerConfig::default()).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_success() && r.attempts == 1));
        assert!(results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains(&ProtocolError::Exception(ExceptionCode::IllegalDataAddress).to_string())));
    }
}
