use std::future::Future;

use crate::core::modbus::Transport;
use crate::core::{ConnectionConfig, Error};

/// A way of opening a [`Transport`] to a device.
///
/// [`Tcp`](crate::core::modbus::Tcp) is used against real devices, while
/// [`EmulatedDevice`](crate::core::modbus::EmulatedDevice) serves tests.
pub trait Connect {
    type Transport: Transport;

    /// Opens a session. Failures are reported as [`Error::Connection`].
    fn connect(
        &self,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<Self::Transport, Error>> + Send;
}
