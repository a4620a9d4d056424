use std::fmt::{Display, Formatter};
use std::io;
use std::time::Duration;

use thiserror::Error;

enum_from_primitive! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Modbus exception codes returned from the server.
    pub enum ExceptionCode {
        IllegalFunction              = 0x01,
        IllegalDataAddress           = 0x02,
        IllegalDataValue             = 0x03,
        ServerDeviceFailure          = 0x04,
        Acknowledge                  = 0x05,
        ServerDeviceBusy             = 0x06,
        NegativeAcknowledge          = 0x07,
        MemoryParityError            = 0x08,
        GatewayPathUnavailable       = 0x0a,
        GatewayTargetFailedToRespond = 0x0b
    }
}

impl ExceptionCode {
    /// Whether the device signalled a condition that clears by itself,
    /// so repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExceptionCode::Acknowledge | ExceptionCode::ServerDeviceBusy)
    }
}

impl Display for ExceptionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            ExceptionCode::IllegalFunction => "illegal function",
            ExceptionCode::IllegalDataAddress => "illegal data address",
            ExceptionCode::IllegalDataValue => "illegal data value",
            ExceptionCode::ServerDeviceFailure => "server device failure",
            ExceptionCode::Acknowledge => "acknowledge",
            ExceptionCode::ServerDeviceBusy => "server device busy",
            ExceptionCode::NegativeAcknowledge => "negative acknowledge",
            ExceptionCode::MemoryParityError => "memory parity error",
            ExceptionCode::GatewayPathUnavailable => "gateway path unavailable",
            ExceptionCode::GatewayTargetFailedToRespond => "gateway target failed to respond",
        };

        write!(f, "{} (0x{:02x})", str, *self as u8)
    }
}

/// Why a response frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Reason {
    #[error("unexpected reply size")]
    UnexpectedReplySize,
    #[error("transaction id mismatch, sent {sent} got {received}")]
    TransactionMismatch { sent: u16, received: u16 },
    #[error("protocol id {0} is not modbus tcp")]
    ProtocolMismatch(u16),
    #[error("unit id mismatch, sent {sent} got {received}")]
    UnitMismatch { sent: u8, received: u8 },
    #[error("function code mismatch, sent 0x{sent:02x} got 0x{received:02x}")]
    FunctionMismatch { sent: u8, received: u8 },
    #[error("unknown exception code 0x{0:02x}")]
    UnknownException(u8),
    #[error("quantity {0} is outside 1..=125")]
    QuantityOutOfRange(u16),
    #[error("not enough words to decode {0}")]
    DecodingError(&'static str),
}

/// Malformed or exception responses. The session is assumed to remain usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("device exception: {0}")]
    Exception(ExceptionCode),
    #[error("invalid response: {0}")]
    InvalidData(Reason),
}

impl From<Reason> for ProtocolError {
    fn from(reason: Reason) -> ProtocolError {
        ProtocolError::InvalidData(reason)
    }
}

impl From<ExceptionCode> for ProtocolError {
    fn from(err: ExceptionCode) -> ProtocolError {
        ProtocolError::Exception(err)
    }
}

/// Failures of the byte stream itself. The session is unusable afterwards.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
    #[error("frame length field {0} is outside the modbus tcp limits")]
    InvalidFrameLength(u16),
}
