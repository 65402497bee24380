//! Error types for the mirem library

use thiserror::Error;

/// Boxed cause carried by wrapping variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for mirem operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid constructor or call arguments
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        argument: Option<String>,
    },

    /// Operation not valid in the current state
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Operation attempted after dispose
    #[error("Cannot access a disposed object: {object}")]
    Disposed { object: &'static str },

    /// Connection establishment and reconnect errors
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Transport layer errors (send/receive failures after the retry budget)
    #[error("Transport layer error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Timeout errors
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Framing and acknowledgement protocol errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        expected: Option<String>,
        received: Option<String>,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Failure turning an invocation or return value into wire text
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        /// Method name of the offending invocation, when there is one
        method_name: Option<String>,
        /// Debug rendering of the offending object
        subject: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Failure turning wire text back into an invocation or return value
    #[error("Deserialization error: {message}")]
    Deserialization {
        message: String,
        /// The wire text that failed to deserialize
        serialized: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A native type or wire tag missing from the operation map
    #[error("Type '{name}' does not exist in the serializer operation map")]
    UnmappedType { name: String },

    /// Compression and decompression errors
    #[error("Compression error: {message}")]
    Compression {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Stage failures of a remote method invocation
    #[error("Invocation error: {message}")]
    Invocation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Runtime errors
    #[error("Runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>, argument: Option<&str>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            argument: argument.map(str::to_string),
        }
    }

    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a disposed object error
    pub fn disposed(object: &'static str) -> Self {
        Self::Disposed { object }
    }

    /// Create a connection error with source
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error without source
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with source
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create a protocol error
    pub fn protocol(
        message: impl Into<String>,
        expected: Option<String>,
        received: Option<String>,
    ) -> Self {
        Self::Protocol {
            message: message.into(),
            expected,
            received,
        }
    }

    /// Create an IO error with a stage-identifying message
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(
        message: impl Into<String>,
        method_name: Option<&str>,
        subject: impl std::fmt::Debug,
        source: Option<BoxError>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            method_name: method_name.map(str::to_string),
            subject: format!("{subject:?}"),
            source,
        }
    }

    /// Create a deserialization error
    pub fn deserialization(
        message: impl Into<String>,
        serialized: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        Self::Deserialization {
            message: message.into(),
            serialized: serialized.into(),
            source,
        }
    }

    /// Create an unmapped type error
    pub fn unmapped_type(name: impl Into<String>) -> Self {
        Self::UnmappedType { name: name.into() }
    }

    /// Create a compression error with source
    pub fn compression<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Compression {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invocation stage error wrapping the cause
    pub fn invocation(message: impl Into<String>, source: Error) -> Self {
        Self::Invocation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invocation error without source
    pub fn invocation_msg(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
            source: None,
        }
    }

    /// Create a runtime error without source
    pub fn runtime_msg(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            source: None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection { .. } => true,
            Error::Transport { .. } => true,
            Error::Timeout { .. } => true,
            Error::Io { .. } => true,
            Error::InvalidArgument { .. } => false,
            Error::InvalidOperation { .. } => false,
            Error::Disposed { .. } => false,
            Error::Protocol { .. } => false,
            Error::Serialization { .. } => false,
            Error::Deserialization { .. } => false,
            Error::UnmappedType { .. } => false,
            Error::Compression { .. } => false,
            Error::Invocation { .. } => false,
            Error::Runtime { .. } => false,
        }
    }

    /// Get error category for debugging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidArgument { .. } => "usage",
            Error::InvalidOperation { .. } => "usage",
            Error::Disposed { .. } => "disposed",
            Error::Connection { .. } => "connection",
            Error::Transport { .. } => "transport",
            Error::Timeout { .. } => "timeout",
            Error::Protocol { .. } => "protocol",
            Error::Io { .. } => "io",
            Error::Serialization { .. } => "serialization",
            Error::Deserialization { .. } => "deserialization",
            Error::UnmappedType { .. } => "type_mapping",
            Error::Compression { .. } => "compression",
            Error::Invocation { .. } => "invocation",
            Error::Runtime { .. } => "runtime",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Result type for mirem operations
pub type Result<T> = std::result::Result<T, Error>;
