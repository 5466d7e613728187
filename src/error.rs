//! Error types and handling for the QUIC server core.

use std::fmt;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Error codes carried on a QUIC connection close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuicErrorCode {
    /// Connection closed without error
    NoError,
    /// Peer used a stream id it is not allowed to open
    InvalidStreamId,
    /// Peer opened more streams than the session allows
    TooManyOpenStreams,
    /// Handshake message with an unexpected tag
    InvalidCryptoMessageType,
    /// Peer sent a public reset
    PublicReset,
    /// Endpoint is shutting down
    PeerGoingAway,
}

impl QuicErrorCode {
    /// Name of the error code as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            QuicErrorCode::NoError => "QUIC_NO_ERROR",
            QuicErrorCode::InvalidStreamId => "QUIC_INVALID_STREAM_ID",
            QuicErrorCode::TooManyOpenStreams => "QUIC_TOO_MANY_OPEN_STREAMS",
            QuicErrorCode::InvalidCryptoMessageType => "QUIC_INVALID_CRYPTO_MESSAGE_TYPE",
            QuicErrorCode::PublicReset => "QUIC_PUBLIC_RESET",
            QuicErrorCode::PeerGoingAway => "QUIC_PEER_GOING_AWAY",
        }
    }
}

impl fmt::Display for QuicErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-related errors
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Address resolution failed
    #[error("Failed to resolve address")]
    AddressResolutionFailed,
}

/// Main error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Session lifecycle errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Wire format parsing errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session was already initialized")]
    AlreadyInitialized,

    #[error("Session is closed")]
    Closed,
}

/// Wire format parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported connection id length flags: {0:#04x}")]
    UnsupportedConnectionIdLength(u8),

    #[error("Unknown QUIC version tag")]
    UnknownVersion,

    #[error("Invalid UTF-8 in header block")]
    InvalidUtf8,
}

impl ServerError {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        ServerError::Config(msg.to_string())
    }
}
