//! Error types shared between the registry, the HTTP adapter, and the
//! tunnel session handler.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a forwarded request did not complete with a response.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    #[error("no tunnel registered for this subdomain")]
    NotFound,
    #[error("tunnel is registered but its channel is closed")]
    NotOpen,
    #[error("tunnel disconnected while the request was in flight")]
    Disconnected,
    #[error("no response within the deadline")]
    Timeout,
}

impl ForwardError {
    pub fn status_code(&self) -> u16 {
        match self {
            ForwardError::NotFound | ForwardError::NotOpen | ForwardError::Disconnected => 502,
            ForwardError::Timeout => 504,
        }
    }
}

/// Top-level error type for anything that isn't already a `ForwardError`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("subdomain missing from request")]
    SubdomainMissing,
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            Error::SubdomainMissing => 400,
            Error::Forward(e) => e.status_code(),
            Error::Protocol(_) | Error::Io(_) => 502,
        }
    }
}
