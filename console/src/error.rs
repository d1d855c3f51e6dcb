//! Failures surfaced by console sessions and the connection registry

use protocol::{DecodeError, EncodeError};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why an exchange on an open session stopped part way
#[derive(Debug, Error)]
pub enum ExchangeFailure {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("connection closed by the server")]
    Closed,

    #[error("exchange aborted: {0}")]
    Aborted(String),
}

impl ExchangeFailure {
    /// True when the socket itself is gone, not just out of step
    pub fn is_connection_lost(&self) -> bool {
        match self {
            ExchangeFailure::Closed => true,
            ExchangeFailure::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("cannot send command to {instance}: {source}")]
    Encoding {
        instance: String,
        #[source]
        source: EncodeError,
    },

    #[error("{instance} did not answer at {addr} within {timeout:?}")]
    ConnectTimeout {
        instance: String,
        addr: String,
        timeout: Duration,
    },

    #[error("cannot reach {instance} at {addr}: {source}")]
    Connection {
        instance: String,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{instance} rejected the console password")]
    Authentication { instance: String },

    #[error("console session for {instance} is busy with another command")]
    SessionBusy { instance: String },

    #[error("command '{command}' failed on {instance}: {source}")]
    Execution {
        instance: String,
        command: String,
        #[source]
        source: ExchangeFailure,
    },

    #[error("{instance} did not finish answering '{command}' within {timeout:?}")]
    ExecutionTimeout {
        instance: String,
        command: String,
        timeout: Duration,
    },

    #[error("no console session for {instance}")]
    NotConnected { instance: String },

    #[error("console session for {instance} is broken and must be reconnected")]
    SessionBroken { instance: String },
}

impl ConsoleError {
    /// The instance the failure concerns
    pub fn instance(&self) -> &str {
        match self {
            ConsoleError::Encoding { instance, .. }
            | ConsoleError::ConnectTimeout { instance, .. }
            | ConsoleError::Connection { instance, .. }
            | ConsoleError::Authentication { instance }
            | ConsoleError::SessionBusy { instance }
            | ConsoleError::Execution { instance, .. }
            | ConsoleError::ExecutionTimeout { instance, .. }
            | ConsoleError::NotConnected { instance }
            | ConsoleError::SessionBroken { instance } => instance,
        }
    }

    /// The socket is gone; the session must be dropped from the registry
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, ConsoleError::Execution { source, .. } if source.is_connection_lost())
    }

    /// The session's read position can no longer be trusted
    pub fn breaks_session(&self) -> bool {
        matches!(
            self,
            ConsoleError::Execution { .. } | ConsoleError::ExecutionTimeout { .. }
        )
    }

    /// Retrying the same call later may succeed without reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsoleError::SessionBusy { .. })
    }

    /// The command was put on the wire before the failure
    pub fn reached_server(&self) -> bool {
        self.breaks_session()
    }

    /// Connect-phase failure
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ConsoleError::ConnectTimeout { .. }
                | ConsoleError::Connection { .. }
                | ConsoleError::Authentication { .. }
        )
    }
}
