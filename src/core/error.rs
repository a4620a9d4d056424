use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::modbus::{ExceptionCode, ProtocolError, Reason, TransportError};
use crate::core::ConnectionConfig;

/// Bad or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("register `{name}`: {reason}")]
    Register { name: String, reason: String },
    #[error("duplicate register name `{0}`")]
    DuplicateName(String),
    #[error("no registers configured")]
    EmptyCatalog,
    #[error("invalid connection settings: {0}")]
    Connection(String),
    #[error("invalid poller settings: {0}")]
    Poller(String),
}

impl ConfigError {
    pub(crate) fn register(name: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::Register {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot connect to {addr}: {source}")]
    Connection {
        addr: String,
        source: TransportError,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("client is closed")]
    Closed,
}

impl Error {
    pub fn connection(config: &ConnectionConfig, source: impl Into<TransportError>) -> Error {
        Error::Connection {
            addr: config.to_string(),
            source: source.into(),
        }
    }

    /// Whether repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } | Error::Transport(_) => true,
            Error::Protocol(ProtocolError::InvalidData(_)) => true,
            Error::Protocol(ProtocolError::Exception(code)) => code.is_transient(),
            Error::Config(_) | Error::Closed => false,
        }
    }

    /// Whether the session must be re-established before the next request.
    pub fn drops_connection(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Transport(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Transport(TransportError::Io(err))
    }
}

impl From<ExceptionCode> for Error {
    fn from(err: ExceptionCode) -> Error {
        Error::Protocol(ProtocolError::Exception(err))
    }
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Error {
        Error::Protocol(ProtocolError::InvalidData(reason))
    }
}
