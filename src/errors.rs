//! Error types for the replication client
//!
//! Every error that can cross the event loop boundary is a variant here, each
//! mapping to one of the process exit codes documented in the CLI surface.

use thiserror::Error;

/// Top-level error type returned by session setup and the event loop.
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("initialization failed: {0}")]
    InitFailure(String),

    #[error("replication stream closed by server")]
    ServerClosed,

    #[error("command channel closed")]
    CommandClosed,

    #[error("server error: {0}")]
    ServerError(String),

    #[error("command error: {0}")]
    CommandError(String),

    #[error("system error: {0}")]
    SystemError(#[source] std::io::Error),

    #[error("replication slot does not exist")]
    SlotNotExist,

    #[error("replication slot is in use")]
    SlotInUse,
}

impl ReplicationError {
    /// Process exit code for this error, per the CLI surface contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            ReplicationError::InvalidArgs(_) => 1,
            ReplicationError::InitFailure(_) => 2,
            ReplicationError::ServerClosed => 3,
            ReplicationError::CommandClosed => 4,
            ReplicationError::ServerError(_) => 5,
            ReplicationError::CommandError(_) => 6,
            ReplicationError::SystemError(_) => 7,
            ReplicationError::SlotNotExist => 8,
            ReplicationError::SlotInUse => 9,
        }
    }
}

impl From<std::io::Error> for ReplicationError {
    fn from(err: std::io::Error) -> Self {
        ReplicationError::SystemError(err)
    }
}

pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

/// Errors raised by the wire codec (§4.1). Always fatal to the session as a
/// `ReplicationError::ServerError`.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("message too short: got {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("unrecognized message tag '{0}' ({1} bytes)")]
    UnknownTag(char, usize),
}

impl From<ProtocolError> for ReplicationError {
    fn from(err: ProtocolError) -> Self {
        ReplicationError::ServerError(err.to_string())
    }
}

/// Errors raised by the command parser (§4.3). Always fatal as
/// `ReplicationError::CommandError`.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("malformed command: {0:?}")]
    Malformed(String),

    #[error("command line exceeds the {0}-byte buffer without a newline")]
    LineTooLong(usize),
}

impl From<CommandError> for ReplicationError {
    fn from(err: CommandError) -> Self {
        ReplicationError::CommandError(err.to_string())
    }
}
