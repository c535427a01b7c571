//! Transport error types.

use thiserror::Error;

/// Errors from the message transport. All of them are treated as
/// transient by the worker: the cycle is abandoned and retried on the
/// next interval.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Credentials not available: {0}")]
    CredentialsNotFound(String),

    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Not connected")]
    NotConnected,
}

impl From<async_native_tls::Error> for TransportError {
    fn from(err: async_native_tls::Error) -> Self {
        TransportError::TlsError(err.to_string())
    }
}

impl From<async_imap::error::Error> for TransportError {
    fn from(err: async_imap::error::Error) -> Self {
        TransportError::ProtocolError(err.to_string())
    }
}

impl From<crate::secrets::SecretError> for TransportError {
    fn from(err: crate::secrets::SecretError) -> Self {
        TransportError::CredentialsNotFound(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
