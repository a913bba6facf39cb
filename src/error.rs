//! Error handling for the tracing subsystem.
//!
//! The subsystem distinguishes two propagation paths. Configuration updates
//! are synchronous administrative operations and return a [`TraceError`] to
//! the caller. Everything that runs on the request path (sampling, activity
//! recording, persistence) is best-effort: failures are logged and absorbed
//! so tracing can never disturb an inference request.
//!
//! # Quick Start
//!
//! ```rust
//! use infertrace::error::TraceError;
//!
//! # fn handle(error: TraceError) {
//! if error.is_invalid_argument() {
//!     eprintln!("rejected update: {}", error);
//! } else {
//!     // runtime errors are normally logged and dropped by the subsystem
//!     eprintln!("trace error: {}", error);
//! }
//! # }
//! ```

use thiserror::Error;

/// Main error type for the tracing subsystem
#[derive(Error, Debug, Clone)]
pub enum TraceError {
    /// A configuration update was rejected (bad rate, missing file path, ...)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The host runtime failed while creating or querying a trace handle
    #[error("Host runtime error: {message}")]
    Host { message: String },

    /// The operation is not supported by the active trace mode or build
    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    /// Trace persistence failed
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Copying a tensor out of device memory failed
    #[error("Device copy error: {message}")]
    DeviceCopy { message: String },
}

impl TraceError {
    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        TraceError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a Host error
    pub fn host(message: impl Into<String>) -> Self {
        TraceError::Host {
            message: message.into(),
        }
    }

    /// Create an Unsupported error
    pub fn unsupported(message: impl Into<String>) -> Self {
        TraceError::Unsupported {
            message: message.into(),
        }
    }

    /// Create an Io error
    pub fn io(message: impl Into<String>) -> Self {
        TraceError::Io {
            message: message.into(),
        }
    }

    /// Create a DeviceCopy error
    pub fn device_copy(message: impl Into<String>) -> Self {
        TraceError::DeviceCopy {
            message: message.into(),
        }
    }

    /// Whether this error is a rejected configuration update
    ///
    /// Such errors are returned to the administrative caller; all other
    /// variants are produced on the request path and are logged rather
    /// than surfaced.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, TraceError::InvalidArgument { .. })
    }

    /// Whether this error originated in the host runtime
    pub fn is_host_error(&self) -> bool {
        matches!(self, TraceError::Host { .. })
    }
}

impl From<std::io::Error> for TraceError {
    fn from(err: std::io::Error) -> Self {
        TraceError::Io {
            message: err.to_string(),
        }
    }
}
