//! Structured error type for the grid core.
//!
//! Replaces the original C implementation's `errbuf` out-parameter
//! (`config.c`, `node.c`) with a value callers can match on by kind but
//! still print for humans.

use std::fmt;

/// Error taxonomy from spec section 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// LFN/PFN/node absent.
    NotFound,
    /// Credential rejected or identity not permitted.
    AuthDenied,
    /// Timeout, connection reset, temporary DNS failure: retry next tick.
    Transient,
    /// Unexpected response from a backend.
    Protocol,
    /// Backend reports insufficient space.
    NoSpace,
    /// Configuration invalid, rename failed, malformed LFN.
    Invariant,
    /// Resource exhaustion fatal to the current process.
    OutOfMemory,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::AuthDenied => "auth-denied",
            ErrorKind::Transient => "transient",
            ErrorKind::Protocol => "protocol",
            ErrorKind::NoSpace => "no-space",
            ErrorKind::Invariant => "invariant",
            ErrorKind::OutOfMemory => "out-of-memory",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DigsError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DigsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        DigsError {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn auth_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthDenied, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn no_space(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSpace, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invariant, message)
    }

    /// Rust's global allocator aborts the process on true allocation
    /// failure rather than returning an error, so this variant is never
    /// constructed from an allocation failure; it exists so callers that
    /// pre-check a declared size against a sane ceiling (e.g. before
    /// buffering a whole file for a checksum) have a taxonomy slot to
    /// report into, matching the fatal-to-process severity spec section 7
    /// assigns it.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfMemory, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::Protocol)
    }
}

pub type DigsResult<T> = Result<T, DigsError>;
