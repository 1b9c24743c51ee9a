//! Structured RPC status.
//!
//! [`Status`] is the only error shape a caller ever sees. Failures raised by
//! injectors, middleware or handler bodies are `anyhow::Error`s; the
//! dispatcher converts them with [`Status::from_error`]:
//!
//! - an error that already is (or wraps) a `Status` is passed through unchanged
//! - anything else becomes [`Code::Internal`] carrying the error message

use std::fmt;
use thiserror::Error;

/// Message used when an unstructured failure carries no message of its own.
pub const FALLBACK_INTERNAL_MESSAGE: &str = "Internal server error";

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Numeric value of the code on the wire.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse a numeric code. Unrecognised values map to [`Code::Unknown`].
    #[must_use]
    pub const fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Upper-case name as used in status trailers.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error understood by the transport.
///
/// # Examples
///
/// ```
/// use rpc_chain_core::status::{Code, Status};
///
/// let status = Status::not_found("no such user");
/// assert_eq!(status.code(), Code::NotFound);
/// assert_eq!(status.to_string(), "[NOT_FOUND] no such user");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Create a status with the given code and message.
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The status code.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `CANCELLED`
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// `INVALID_ARGUMENT`
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// `NOT_FOUND`
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// `PERMISSION_DENIED`
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// `UNAUTHENTICATED`
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    /// `UNIMPLEMENTED`
    #[must_use]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// `UNAVAILABLE`
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// `INTERNAL`
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Normalize an arbitrary failure into a `Status`.
    ///
    /// A `Status` anywhere in the error's context chain is returned as is.
    /// Any other error becomes `INTERNAL` with the error's message, or
    /// [`FALLBACK_INTERNAL_MESSAGE`] when that message is empty.
    #[must_use]
    pub fn from_error(error: anyhow::Error) -> Self {
        if let Some(status) = error.chain().find_map(|cause| cause.downcast_ref::<Self>()) {
            return status.clone();
        }

        let message = error.to_string();
        if message.is_empty() {
            Self::internal(FALLBACK_INTERNAL_MESSAGE)
        } else {
            Self::internal(message)
        }
    }

    /// Whether the code indicates a server-side fault worth logging.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self.code,
            Code::Internal | Code::Unknown | Code::DataLoss | Code::Unavailable
        )
    }
}

impl From<anyhow::Error> for Status {
    fn from(error: anyhow::Error) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn test_display() {
        let status = Status::internal("boom");
        assert_eq!(status.to_string(), "[INTERNAL] boom");
    }

    #[test]
    fn test_unstructured_error_becomes_internal() {
        let status = Status::from_error(anyhow::anyhow!("boom"));
        assert_eq!(status, Status::internal("boom"));
    }

    #[test]
    fn test_structured_error_is_preserved() {
        let original = Status::permission_denied("not yours");
        let status = Status::from_error(anyhow::Error::new(original.clone()));
        assert_eq!(status, original);
    }

    #[test]
    fn test_structured_error_survives_context() {
        let result: Result<(), Status> = Err(Status::not_found("missing"));
        let error = result.context("loading user").err();

        let status = error.map(Status::from_error);
        assert_eq!(status, Some(Status::not_found("missing")));
    }

    #[test]
    fn test_structured_error_found_as_source() {
        #[derive(Debug, Error)]
        #[error("lookup failed")]
        struct Lookup(#[source] Status);

        let status = Status::from_error(Lookup(Status::unavailable("db down")).into());
        assert_eq!(status, Status::unavailable("db down"));
    }

    #[test]
    fn test_empty_message_uses_fallback() {
        let status = Status::from_error(anyhow::anyhow!(""));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), FALLBACK_INTERNAL_MESSAGE);
    }

    #[test]
    fn test_code_round_trip_and_unknown() {
        assert_eq!(Code::from_i32(Code::Unauthenticated.as_i32()), Code::Unauthenticated);
        assert_eq!(Code::from_i32(99), Code::Unknown);
        assert_eq!(Code::Internal.as_i32(), 13);
    }
}
