//! Error types shared across the AFF4 crates.

use std::io;

use thiserror::Error;

/// Errors that can occur anywhere in the AFF4 stream/resolver/archive stack.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("no handler registered for URN: {0}")]
    UnknownType(String),

    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed_archive(msg: impl Into<String>) -> Self {
        Self::MalformedArchive(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn unknown_type(urn: impl Into<String>) -> Self {
        Self::UnknownType(urn.into())
    }

    pub fn unsupported_dialect(msg: impl Into<String>) -> Self {
        Self::UnsupportedDialect(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Asserts an internal invariant. In debug builds this panics like a normal
/// assertion; in release builds it degrades to a returned `InvalidState`
/// error, since a library should not abort its embedder's process on a
/// reachable invariant violation (e.g. a caller that leaked a cache
/// reference across `Flush`).
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $($msg:tt)*) => {
        if !$cond {
            debug_assert!($cond, $($msg)*);
            return Err($crate::Error::invalid_state(format!($($msg)*)));
        }
    };
}
