use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

use crate::core::modbus::{
    Address, ExceptionCode, ProtocolError, ReadFunction, Reason, Transport, TransportError, Word,
};
use crate::core::{Connect, ConnectionConfig, Error};

/// A failure the emulated device produces instead of answering a request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fault {
    /// The connection drops mid-request.
    Disconnect,
    /// The device never answers.
    Hang,
    /// The device answers with an exception response.
    Exception(ExceptionCode),
    /// The device answers with a frame that does not match the request.
    Malformed,
}

#[derive(Debug, Default)]
struct DeviceState {
    registers: HashMap<Address, Word>,
    faults: VecDeque<Fault>,
    refusals: usize,
    read_requests: usize,
    connections: usize,
}

/// An in-process stand-in for a device, usable without a network.
///
/// Registers not written read back as zero. Faults are consumed one per read request,
/// in the order they were injected. Clones share the same device, so a test can keep
/// a handle for scripting and inspection while the client owns another.
///
/// ```rust
/// use modbus_poller::prelude::*;
///
/// # async fn docs() {
/// let device = EmulatedDevice::new();
/// device.set_register(32016, 205);
///
/// let mut client = ModbusClient::new(ConnectionConfig::new("emulated", 502), device.clone());
/// client.connect().await.expect("Must connect");
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct EmulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl EmulatedDevice {
    pub fn new() -> EmulatedDevice {
        EmulatedDevice::default()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        // A panic while holding the lock cannot leave the state half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_register(&self, address: Address, value: Word) {
        self.state().registers.insert(address, value);
    }

    pub fn set_registers(&self, address: Address, values: &[Word]) {
        let mut state = self.state();
        for (index, value) in values.iter().enumerate() {
            state
                .registers
                .insert(address.wrapping_add(index as Address), *value);
        }
    }

    /// Queues `fault` for the next `times` read requests.
    pub fn inject(&self, fault: Fault, times: usize) {
        self.state()
            .faults
            .extend(std::iter::repeat(fault).take(times));
    }

    /// Makes the next `times` connection attempts fail.
    pub fn refuse_connections(&self, times: usize) {
        self.state().refusals = times;
    }

    /// Read requests that reached the device, faulted ones included.
    pub fn read_requests(&self) -> usize {
        self.state().read_requests
    }

    /// Sessions successfully opened.
    pub fn connections(&self) -> usize {
        self.state().connections
    }
}

#[derive(Debug)]
pub struct EmulatedTransport {
    device: EmulatedDevice,
    alive: bool,
}

impl Transport for EmulatedTransport {
    async fn read(&mut self, function: ReadFunction) -> Result<Vec<Word>, Error> {
        if !self.alive {
            return Err(TransportError::Closed.into());
        }

        let fault = {
            let mut state = self.device.state();
            state.read_requests += 1;
            state.faults.pop_front()
        };

        trace!("Emulated read of {function:?}, fault={fault:?}");
        match fault {
            Some(Fault::Disconnect) => {
                self.alive = false;
                Err(TransportError::Closed.into())
            }
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Exception(code)) => Err(ProtocolError::Exception(code).into()),
            Some(Fault::Malformed) => Err(Reason::UnexpectedReplySize.into()),
            None => {
                let ReadFunction::HoldingRegisters(address, quantity) = function;
                let state = self.device.state();

                Ok((0..quantity)
                    .map(|offset| {
                        let address = address.wrapping_add(offset);
                        state.registers.get(&address).copied().unwrap_or(0)
                    })
                    .collect())
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.alive = false;
        Ok(())
    }
}

impl Connect for EmulatedDevice {
    type Transport = EmulatedTransport;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Transport, Error> {
        let mut state = self.state();
        if state.refusals > 0 {
            state.refusals -= 1;
            return Err(Error::connection(
                config,
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ));
        }

        state.connections += 1;
        Ok(EmulatedTransport {
            device: self.clone(),
            alive: true,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("emulated", 502)
    }

    #[tokio::test]
    async fn reads_back_written_registers() {
        let device = EmulatedDevice::new();
        device.set_registers(100, &[1, 2]);

        let mut transport = device.connect(&config()).await.expect("Must connect");
        let words = transport
            .read(ReadFunction::HoldingRegisters(99, 4))
            .await
            .expect("Must read");

        assert_eq!(words, vec![0, 1, 2, 0]);
        assert_eq!(device.read_requests(), 1);
    }

    #[tokio::test]
    async fn faults_are_consumed_in_order() {
        let device = EmulatedDevice::new();
        device.inject(Fault::Exception(ExceptionCode::ServerDeviceBusy), 1);
        device.inject(Fault::Disconnect, 1);

        let mut transport = device.connect(&config()).await.expect("Must connect");
        let function = ReadFunction::HoldingRegisters(0, 1);

        assert!(matches!(
            transport.read(function).await,
            Err(Error::Protocol(ProtocolError::Exception(
                ExceptionCode::ServerDeviceBusy
            )))
        ));
        assert!(matches!(
            transport.read(function).await,
            Err(Error::Transport(TransportError::Closed))
        ));
        // The session is gone until reconnected.
        assert!(transport.read(function).await.is_err());
        assert_eq!(device.read_requests(), 2);
    }

    #[tokio::test]
    async fn refuses_connections_on_request() {
        let device = EmulatedDevice::new();
        device.refuse_connections(1);

        assert!(matches!(
            device.connect(&config()).await,
            Err(Error::Connection { .. })
        ));
        assert!(device.connect(&config()).await.is_ok());
        assert_eq!(device.connections(), 1);
    }

    #[tokio::test]
    async fn sessions_run_on_spawned_tasks() {
        let device = EmulatedDevice::new();
        device.set_registers(7, &[42]);

        let connector = device.clone();
        let words = tokio::spawn(async move {
            let mut transport = connector.connect(&config()).await?;
            let words = transport.read(ReadFunction::HoldingRegisters(7, 1)).await?;
            transport.close().await?;
            Ok::<_, Error>(words)
        })
        .await
        .expect("Must join")
        .expect("Must read");

        assert_eq!(words, vec![42]);
    }
}
