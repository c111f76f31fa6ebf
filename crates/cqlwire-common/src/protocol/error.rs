use std::fmt;

use thiserror::Error;

/// Error codes carried by an ERROR frame.
///
/// Codes the driver does not know about are preserved in [`DbErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorCode {
    ServerError,
    ProtocolError,
    BadCredentials,
    Unavailable,
    Overloaded,
    IsBootstrapping,
    TruncateError,
    WriteTimeout,
    ReadTimeout,
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    SyntaxError,
    Unauthorized,
    Invalid,
    ConfigError,
    AlreadyExists,
    Unprepared,
    Other(i32),
}

impl DbErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0x0000 => DbErrorCode::ServerError,
            0x000A => DbErrorCode::ProtocolError,
            0x0100 => DbErrorCode::BadCredentials,
            0x1000 => DbErrorCode::Unavailable,
            0x1001 => DbErrorCode::Overloaded,
            0x1002 => DbErrorCode::IsBootstrapping,
            0x1003 => DbErrorCode::TruncateError,
            0x1100 => DbErrorCode::WriteTimeout,
            0x1200 => DbErrorCode::ReadTimeout,
            0x1300 => DbErrorCode::ReadFailure,
            0x1400 => DbErrorCode::FunctionFailure,
            0x1500 => DbErrorCode::WriteFailure,
            0x2000 => DbErrorCode::SyntaxError,
            0x2100 => DbErrorCode::Unauthorized,
            0x2200 => DbErrorCode::Invalid,
            0x2300 => DbErrorCode::ConfigError,
            0x2400 => DbErrorCode::AlreadyExists,
            0x2500 => DbErrorCode::Unprepared,
            other => DbErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            DbErrorCode::ServerError => 0x0000,
            DbErrorCode::ProtocolError => 0x000A,
            DbErrorCode::BadCredentials => 0x0100,
            DbErrorCode::Unavailable => 0x1000,
            DbErrorCode::Overloaded => 0x1001,
            DbErrorCode::IsBootstrapping => 0x1002,
            DbErrorCode::TruncateError => 0x1003,
            DbErrorCode::WriteTimeout => 0x1100,
            DbErrorCode::ReadTimeout => 0x1200,
            DbErrorCode::ReadFailure => 0x1300,
            DbErrorCode::FunctionFailure => 0x1400,
            DbErrorCode::WriteFailure => 0x1500,
            DbErrorCode::SyntaxError => 0x2000,
            DbErrorCode::Unauthorized => 0x2100,
            DbErrorCode::Invalid => 0x2200,
            DbErrorCode::ConfigError => 0x2300,
            DbErrorCode::AlreadyExists => 0x2400,
            DbErrorCode::Unprepared => 0x2500,
            DbErrorCode::Other(code) => *code,
        }
    }
}

impl fmt::Display for DbErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbErrorCode::Other(code) => write!(f, "Other(0x{:04X})", code),
            known => write!(f, "{:?}", known),
        }
    }
}

#[derive(Error, Debug)]
pub enum CqlError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No available connection: {0}")]
    NoAvailableConnection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Query error ({code}): {message}")]
    Query { code: DbErrorCode, message: String },

    #[error("Failed to decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    #[error("Result is missing expected column '{0}'")]
    SchemaMismatch(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CqlError {
    /// Failures of the byte stream itself, as opposed to anything the server said.
    ///
    /// These are the only errors the session retries against another node.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CqlError::Connect(_) | CqlError::ConnectionClosed(_) | CqlError::Io(_)
        )
    }

    /// Whether the connection that produced this error must be discarded.
    pub fn is_connection_fatal(&self) -> bool {
        self.is_transport() || matches!(self, CqlError::Protocol(_))
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        CqlError::Protocol(msg.into())
    }
}

impl From<rustls::Error> for CqlError {
    fn from(err: rustls::Error) -> Self {
        CqlError::TlsHandshake(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CqlError>;
