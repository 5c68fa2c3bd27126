//! Gateway errors and the sentinel string they collapse into.

use chronik_codec::CodecError;
use chronik_core::CoreError;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as _;
use std::fmt::Write as _;
use thiserror::Error;

/// Prefix that marks a callback payload as a failure.
pub const SENTINEL_PREFIX: &str = "exception:";

/// Separator between the description and the trace.
pub const STACKTRACE_MARKER: &str = "\nStacktrace:\n";

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failure classes reported across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed EDN/JSON/CBOR/base64 text or an invalid configuration.
    ParseError,
    /// A format tag the gateway does not know.
    UnsupportedFormatError,
    /// A known tag used wrongly, or a value the output format cannot carry.
    FormatError,
    /// The engine rejected the operation.
    EngineError,
    /// Null pointer, non-UTF-8 string or a bad context handle.
    InvalidArgument,
    /// A panic was caught at the boundary.
    Panic,
}

impl ErrorKind {
    /// Name used in the sentinel description.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::UnsupportedFormatError => "UnsupportedFormatError",
            ErrorKind::FormatError => "FormatError",
            ErrorKind::EngineError => "EngineError",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Panic => "Panic",
        }
    }
}

/// Errors raised while serving one gateway call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Text that could not be decoded.
    #[error("could not parse {what}")]
    Parse {
        /// Which argument was being decoded.
        what: &'static str,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// CBOR payload that is not valid base64.
    #[error("could not decode base64 {what}")]
    Base64 {
        /// Which argument was being decoded.
        what: &'static str,
        /// Decoder failure.
        #[source]
        source: base64::DecodeError,
    },

    /// Well-formed EDN that does not describe a database configuration.
    #[error("invalid database configuration")]
    Config {
        /// Engine-side validation failure.
        #[source]
        source: CoreError,
    },

    /// Unknown input or output format tag.
    #[error("format not supported: {tag}")]
    UnsupportedFormat {
        /// The offending tag.
        tag: String,
    },

    /// Known tag used with a bad parameter or in the wrong place.
    #[error("{message}")]
    Format {
        /// Description of the problem.
        message: String,
    },

    /// Result that cannot be written in the requested format.
    #[error("could not encode result as {format}")]
    Encode {
        /// Output format tag.
        format: &'static str,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// The engine rejected the operation.
    #[error(transparent)]
    Engine(#[from] CoreError),

    /// Null pointer, non-UTF-8 string or unusable handle.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// A panic unwound into the boundary.
    #[error("panic: {message}")]
    Panic {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl GatewayError {
    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unsupported-format error.
    pub fn unsupported_format(tag: impl Into<String>) -> Self {
        Self::UnsupportedFormat { tag: tag.into() }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Parse { .. } | GatewayError::Base64 { .. } | GatewayError::Config { .. } => {
                ErrorKind::ParseError
            }
            GatewayError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormatError,
            GatewayError::Format { .. } | GatewayError::Encode { .. } => ErrorKind::FormatError,
            GatewayError::Engine(_) => ErrorKind::EngineError,
            GatewayError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            GatewayError::Panic { .. } => ErrorKind::Panic,
        }
    }

    /// Renders `exception:<kind>: <description>\nStacktrace:\n<trace>`.
    ///
    /// The trace names the failing operation, then the error's source
    /// chain, then a captured backtrace when `RUST_BACKTRACE` enables one.
    pub fn to_sentinel(&self, operation: &str) -> String {
        let mut out = format!("{SENTINEL_PREFIX}{}: {self}{STACKTRACE_MARKER}", self.kind().name());
        let _ = writeln!(out, "    at chronik_ffi::{operation}");
        let mut source = self.source();
        while let Some(cause) = source {
            let _ = writeln!(out, "    caused by: {cause}");
            source = cause.source();
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            let _ = write!(out, "{backtrace}");
        }
        out
    }
}

/// Whether a callback payload is a failure sentinel.
pub fn is_sentinel(payload: &str) -> bool {
    payload.starts_with(SENTINEL_PREFIX)
}
