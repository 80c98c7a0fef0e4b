use std::io;
use thiserror::Error;

/// Failures reported by a transport binding
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("transport is not bound")]
    NotBound,

    #[error("unknown or stale connection {0}")]
    InvalidConnection(u32),

    #[error("connection {0} stopped acknowledging reliable data")]
    Congested(u32),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Failures of the durable account file
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account file error: {0}")]
    Io(#[from] io::Error),

    #[error("field {0:?} contains a line break or the record delimiter")]
    InvalidField(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to start server: {0}")]
    Startup(#[source] TransportError),
}
