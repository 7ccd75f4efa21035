//! Sans-I/O protocol state machines and their factories.
//!
//! A protocol instance does no I/O: callers push bytes or datagrams in and
//! pull bytes, datagrams, and [`Event`]s out. The drivers in [`crate::conn`]
//! couple these state machines to sockets; everything below this module is
//! runtime-free and can be driven from tests one buffer at a time.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use crate::config::{ClientTlsConfig, ServerTlsConfig};
use crate::event::Event;
use crate::Result;

pub mod alpn;
pub mod h1;
pub mod h2;
pub mod h3;
pub mod registry;

pub use alpn::AlpnHttpFactory;
pub use registry::{Implementations, PluginEntry, PluginFactory, ProtocolRegistry, Slot};

/// ALPN identifier of HTTP/1.1.
pub const ALPN_HTTP1: &str = "http/1.1";
/// ALPN identifier of HTTP/2.
pub const ALPN_H2: &str = "h2";
/// ALPN identifier of HTTP/3.
pub const ALPN_H3: &str = "h3";

/// A UDP datagram paired with the peer address it came from or goes to.
pub type Datagram = (Bytes, SocketAddr);

/// The role a protocol instance plays on a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// The connection-initiating side.
    Client,
    /// The accepting side.
    Server,
}

/// An HTTP version label.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HttpVersion {
    /// HTTP/1.1 (and HTTP/1.0 peers).
    Http1,
    /// HTTP/2.
    Http2,
    /// HTTP/3.
    Http3,
}

impl HttpVersion {
    /// The version as a short string: `"1"`, `"2"`, or `"3"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http1 => "1",
            HttpVersion::Http2 => "2",
            HttpVersion::Http3 => "3",
        }
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commonly used error codes for one HTTP version.
///
/// Each version uses a different numbering, so protocol instances expose the
/// table appropriate to them. The codes are suitable for stream resets and
/// connection termination.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorCodes {
    /// Generic error when a peer violated our expectations.
    pub protocol_error: u64,
    /// Generic error when something went wrong at our side.
    pub internal_error: u64,
    /// The TCP connection established in response to a CONNECT request was
    /// reset or abnormally closed.
    pub connect_error: u64,
}

impl ErrorCodes {
    /// Error codes used by HTTP/1 (plain status codes).
    pub const HTTP1: ErrorCodes = ErrorCodes {
        protocol_error: 400,
        internal_error: 500,
        connect_error: 502,
    };
    /// Error codes used by HTTP/2 (RFC 9113 §7).
    pub const HTTP2: ErrorCodes = ErrorCodes {
        protocol_error: 0x01,
        internal_error: 0x02,
        connect_error: 0x0A,
    };
    /// Error codes used by HTTP/3 (RFC 9114 §8.1).
    pub const HTTP3: ErrorCodes = ErrorCodes {
        protocol_error: 0x0101,
        internal_error: 0x0102,
        connect_error: 0x010F,
    };
}

/// Sans-I/O representation of an HTTP connection.
///
/// The trait is transport-agnostic; [`HttpOverTcpProtocol`] and
/// [`HttpOverQuicProtocol`] add the byte-stream and datagram-stream halves.
pub trait HttpProtocol: Send + 'static {
    /// The HTTP version of this connection.
    fn http_version(&self) -> HttpVersion;

    /// Whether this connection supports multiple parallel streams.
    ///
    /// Returns `true` for HTTP/2 and HTTP/3 connections.
    fn multiplexed(&self) -> bool;

    /// Error codes for the HTTP version of this protocol.
    fn error_codes(&self) -> ErrorCodes {
        match self.http_version() {
            HttpVersion::Http1 => ErrorCodes::HTTP1,
            HttpVersion::Http2 => ErrorCodes::HTTP2,
            HttpVersion::Http3 => ErrorCodes::HTTP3,
        }
    }

    /// Whether this connection is capable of opening new streams.
    fn is_available(&self) -> bool;

    /// Whether this connection is closed or should be closed.
    fn has_expired(&self) -> bool;

    /// Returns an ID that can be used to create a new stream.
    ///
    /// Use the returned ID with [`submit_headers`](Self::submit_headers) to
    /// create the stream. This method may return the same value until that
    /// method consumes it.
    fn get_available_stream_id(&mut self) -> Result<u64>;

    /// Submits a frame with HTTP headers.
    ///
    /// On a client connection this starts an HTTP request; on a server
    /// connection it starts an HTTP response.
    fn submit_headers(&mut self, stream_id: u64, headers: &[crate::Header], end_stream: bool)
        -> Result<()>;

    /// Submits a frame with HTTP data.
    fn submit_data(&mut self, stream_id: u64, data: &[u8], end_stream: bool) -> Result<()>;

    /// Immediately terminates a stream.
    ///
    /// Stream reset is used to request cancellation of a stream or to
    /// indicate that an error condition has occurred. Use
    /// [`error_codes`](Self::error_codes) to obtain codes for common
    /// problems.
    fn submit_stream_reset(&mut self, stream_id: u64, error_code: u64) -> Result<()>;

    /// Submits a graceful close of the connection.
    fn submit_close(&mut self, error_code: u64) -> Result<()>;

    /// Consumes the next HTTP event, in production order.
    fn next_event(&mut self) -> Option<Event>;
}

/// An [`HttpProtocol`] on top of a TCP connection (HTTP/1 and HTTP/2).
pub trait HttpOverTcpProtocol: HttpProtocol {
    /// Called when the connection is lost or closed without an EOF.
    fn connection_lost(&mut self);

    /// Called when the other end signals it won't send any more data.
    fn eof_received(&mut self);

    /// Called when some data is received.
    fn bytes_received(&mut self, data: &[u8]);

    /// Drains data for sending out of the internal buffer.
    ///
    /// Returned bytes are never re-emitted.
    fn bytes_to_send(&mut self) -> Bytes;
}

/// An [`HttpProtocol`] on top of a QUIC connection (HTTP/3).
pub trait HttpOverQuicProtocol: HttpProtocol {
    /// Notifies the protocol that time has moved.
    ///
    /// The clock value is used in subsequent calls to other methods. When
    /// `now` is past the value of [`get_timer`](Self::get_timer), the
    /// protocol handles its timeouts, which may produce retransmissions or
    /// termination.
    fn clock(&mut self, now: Instant);

    /// Returns the instant at which the protocol wants to be notified.
    fn get_timer(&self) -> Option<Instant>;

    /// Called when the connection is lost or closed.
    fn connection_lost(&mut self);

    /// Called when a datagram is received.
    fn datagram_received(&mut self, datagram: Datagram);

    /// Drains datagrams for sending out of the internal buffer.
    fn datagrams_to_send(&mut self) -> Vec<Datagram>;

    /// QUIC connection IDs currently owned by this connection.
    ///
    /// The demultiplexer uses these to assign UDP packets to connections.
    fn connection_ids(&self) -> Vec<Vec<u8>>;
}

/// Factory for [`HttpOverTcpProtocol`] instances.
///
/// Constructors are not part of the protocol interface, so clients and
/// servers swap implementations through factories. Dynamic dispatch stops at
/// this boundary; the instances themselves run monomorphized per version.
pub trait HttpOverTcpFactory: Send + Sync + 'static {
    /// ALPN protocols to offer in a TLS handshake, most preferred first.
    fn alpn_protocols(&self) -> Vec<String>;

    /// Creates a protocol instance for one connection.
    ///
    /// `tls_version` is `None` for insecure connections. `alpn_protocol` is
    /// the protocol negotiated during the TLS handshake, `None` for insecure
    /// connections.
    fn build(
        &self,
        tls_version: Option<&str>,
        alpn_protocol: Option<&str>,
    ) -> Box<dyn HttpOverTcpProtocol>;
}

/// Factory for client-side [`HttpOverQuicProtocol`] instances.
pub trait HttpOverQuicClientFactory: Send + Sync + 'static {
    /// Creates a protocol instance for one connection.
    ///
    /// Both socket addresses are required because path selection happens at
    /// the QUIC layer, and `server_name` because so does the TLS handshake.
    fn build(
        &self,
        remote_address: SocketAddr,
        local_address: SocketAddr,
        server_name: &str,
        tls_config: &ClientTlsConfig,
    ) -> Result<Box<dyn HttpOverQuicProtocol>>;
}

/// Factory for server-side [`HttpOverQuicProtocol`] instances.
///
/// The connection-id length and version list are needed by servers, which
/// sniff and route packets before any protocol instance exists.
pub trait HttpOverQuicServerFactory: Send + Sync + 'static {
    /// Length in bytes of QUIC connection IDs chosen by this implementation.
    fn connection_id_length(&self) -> usize;

    /// QUIC versions this implementation accepts.
    fn supported_versions(&self) -> Vec<u32>;

    /// Creates a protocol instance for one connection.
    fn build(
        &self,
        tls_config: &ServerTlsConfig,
        local_address: SocketAddr,
    ) -> Result<Box<dyn HttpOverQuicProtocol>>;
}
