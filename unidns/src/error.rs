//! Error types of the query engine.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use unidns_proto::error::{EncodeError, ParseError};

use crate::axfr::TransferError;

/// Errors returned by [`Resolver::send()`](crate::Resolver::send()).
#[derive(Debug, Error)]
pub enum Error {
    /// Neither transport delivered any data.
    #[error("No response from {0}.")]
    NoResponse(SocketAddr),

    #[error("Datagram transport failed.")]
    Io(#[source] io::Error),

    /// The query deadline passed while waiting on a transport.
    #[error("Timed out waiting for a response.")]
    Timeout,

    #[error("Malformed response: {0}")]
    Format(#[from] FormatError),

    #[error("Could not encode query: {0}")]
    Encode(#[from] EncodeError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A response was received but could not be accepted. Never retried.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("response of {0} bytes is shorter than a DNS header")]
    TooShort(usize),

    #[error("response id {got} does not match query id {expected}")]
    IdMismatch { expected: u16, got: u16 },

    #[error("could not parse response: {0}")]
    Parse(#[from] ParseError),

    #[error("zone transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

/// Rejected configuration, reported when it is set rather than when a query is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("EDNS level must be 0 or -1, got {0}")]
    InvalidEdnsLevel(i32),

    #[error("could not resolve host {0}")]
    UnknownHost(String),

    #[error("the default resolver has already been set")]
    DefaultResolverAlreadySet,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}
