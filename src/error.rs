//! Error types used throughout the crate.
//!
//! Peer and transport failures do not surface here: those are reported as
//! [`Event::ConnectionTerminated`](crate::Event::ConnectionTerminated) by the
//! protocol state machines. The [`Error`] enum covers everything reported
//! synchronously to a caller: malformed input, API misuse, I/O and TLS
//! failures while dialing or listening, and broken streams.

use std::io::Error as IoError;

/// A boxed error type for dynamic error handling.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// The error type used throughout the crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Standard I/O error.
    #[error(transparent)]
    Io(#[from] IoError),
    /// TLS configuration or handshake error.
    #[error(transparent)]
    Tls(#[from] rustls::Error),
    /// Error reported by the QUIC codec.
    #[error("quic error: {0}")]
    Quic(#[from] quiche::Error),
    /// Error reported by the HTTP/3 codec.
    #[error("http/3 error: {0}")]
    H3(#[from] quiche::h3::Error),
    /// Invalid URI error.
    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),
    /// Malformed input from the API consumer: a bad URL or endpoint,
    /// a missing pseudo header, a duplicate `Host` mismatch.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// API misuse on an otherwise healthy connection, e.g. submitting to a
    /// stream id that was never opened.
    #[error("usage error: {0}")]
    Usage(String),
    /// The stream or connection went away before the operation completed.
    #[error("stream closed: {0}")]
    StreamClosed(String),
    /// A CONNECT request to a proxy was answered with a non-200 status.
    #[error("proxy refused CONNECT with status {0}")]
    ProxyStatus(u16),
    /// Any other error type wrapped as a boxed trait object.
    #[error(transparent)]
    Other(BoxedError),
}

impl Error {
    /// Creates an [`Error::InvalidInput`] from a message.
    #[inline]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates an [`Error::Usage`] from a message.
    #[inline]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Creates an [`Error::StreamClosed`] from a message.
    #[inline]
    pub fn stream_closed(message: impl Into<String>) -> Self {
        Self::StreamClosed(message.into())
    }

    /// Creates an `Error` from any error type.
    #[inline]
    pub fn other(error: impl Into<BoxedError>) -> Self {
        Self::Other(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from() {
        let err: Error = IoError::new(std::io::ErrorKind::Other, "oh no!").into();
        assert!(matches!(err, Error::Io(_)));

        let err: Error = http::Uri::try_from("ht tp://host.com").unwrap_err().into();
        assert!(matches!(err, Error::InvalidUri(_)));

        let err = Error::other(IoError::new(std::io::ErrorKind::Other, "custom"));
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_input("missing request header: :method");
        assert_eq!(
            err.to_string(),
            "invalid input: missing request header: :method"
        );

        let err = Error::ProxyStatus(403);
        assert_eq!(err.to_string(), "proxy refused CONNECT with status 403");
    }
}
