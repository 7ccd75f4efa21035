//! I/O drivers and the connection facade.
//!
//! An [`HttpConnection`] combines a sans-I/O protocol state machine with a
//! network stream. The former allows swapping HTTP versions and
//! implementations, the latter allows proxying traffic or alternative I/O.
//! Protocol state is only ever touched inside a driver's send critical
//! section, which makes protocol mutation effectively single-task even when
//! multiple tasks push into the same connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::event::Event;
use crate::proto::{
    ErrorCodes, HttpOverQuicProtocol, HttpOverTcpProtocol, HttpProtocol, HttpVersion,
};
use crate::{Header, Result};

mod listener;
mod opener;
pub mod quic;
mod tcp;
mod udp;

pub use listener::{ConnectionHandler, QuicHttpListener, TcpHttpListener};
pub use opener::{HttpOpener, QuicOpener, SystemDialer, TcpDialer, TcpOpener};
pub use quic::QuicListener;
pub use tcp::{AsyncStream, BoxedStream};
pub use udp::DatagramStream;

use tcp::TcpTransport;
use udp::UdpTransport;

enum Transport {
    Tcp(TcpTransport),
    Udp(UdpTransport),
}

/// An HTTP connection.
///
/// This type unifies access to all HTTP connections, whatever their version
/// or transport. It is not built directly; listeners and
/// [openers](HttpOpener) return instances.
pub struct HttpConnection {
    transport: Transport,
    version: HttpVersion,
    multiplexed: bool,
    error_codes: ErrorCodes,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl HttpConnection {
    pub(crate) fn over_tcp(
        protocol: Box<dyn HttpOverTcpProtocol>,
        stream: BoxedStream,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        let version = protocol.http_version();
        let multiplexed = protocol.multiplexed();
        let error_codes = protocol.error_codes();
        HttpConnection {
            transport: Transport::Tcp(TcpTransport::new(protocol, stream)),
            version,
            multiplexed,
            error_codes,
            local_addr,
            remote_addr,
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn over_udp(
        protocol: Box<dyn HttpOverQuicProtocol>,
        stream: Arc<dyn DatagramStream>,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        let version = protocol.http_version();
        let multiplexed = protocol.multiplexed();
        let error_codes = protocol.error_codes();
        HttpConnection {
            transport: Transport::Udp(UdpTransport::new(protocol, stream)),
            version,
            multiplexed,
            error_codes,
            local_addr,
            remote_addr,
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The HTTP version of this connection.
    #[inline]
    pub fn http_version(&self) -> HttpVersion {
        self.version
    }

    /// Whether this connection supports multiple parallel streams.
    #[inline]
    pub fn multiplexed(&self) -> bool {
        self.multiplexed
    }

    /// Error codes suitable for this connection, e.g. for
    /// [`send_stream_reset`](Self::send_stream_reset).
    #[inline]
    pub fn error_codes(&self) -> ErrorCodes {
        self.error_codes
    }

    /// The local network address, captured at construction time so
    /// connections can be logged without touching the socket.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The remote network address.
    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether this connection is capable of opening new streams.
    pub async fn is_available(&self) -> bool {
        match &self.transport {
            Transport::Tcp(t) => t.with_protocol(|p| p.is_available()).await,
            Transport::Udp(t) => t.with_protocol(|p| p.is_available()).await,
        }
    }

    /// Whether this connection is closed or should be closed.
    pub async fn has_expired(&self) -> bool {
        match &self.transport {
            Transport::Tcp(t) => t.with_protocol(|p| p.has_expired()).await,
            Transport::Udp(t) => t.with_protocol(|p| p.has_expired()).await,
        }
    }

    /// Sends the protocol preamble if there is one. Idempotent.
    pub async fn open(&self) -> Result<()> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.transport {
            Transport::Tcp(t) => t.send_with(|_| ()).await,
            Transport::Udp(t) => t.send_with(|_| ()).await,
        }
        tracing::info!(
            version = self.version.as_str(),
            local_addr = %self.local_addr,
            remote_addr = %self.remote_addr,
            "opened HTTP connection"
        );
        Ok(())
    }

    /// Submits a graceful close, flushes, and releases the socket.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.transport {
            Transport::Tcp(t) => {
                t.send_with(|p| p.submit_close(0)).await?;
                t.close().await?;
            }
            Transport::Udp(t) => {
                t.send_with(|p| p.submit_close(0)).await?;
                t.close().await?;
            }
        }
        tracing::info!(
            version = self.version.as_str(),
            local_addr = %self.local_addr,
            remote_addr = %self.remote_addr,
            "closed HTTP connection"
        );
        Ok(())
    }

    /// Returns an ID that can be used to create a new stream.
    ///
    /// Use the returned ID with [`send_headers`](Self::send_headers); until
    /// then, repeated calls may return the same value.
    pub async fn get_available_stream_id(&self) -> Result<u64> {
        match &self.transport {
            Transport::Tcp(t) => t.with_protocol(|p| p.get_available_stream_id()).await,
            Transport::Udp(t) => t.with_protocol(|p| p.get_available_stream_id()).await,
        }
    }

    /// Sends a frame with HTTP headers.
    ///
    /// On a client connection this starts an HTTP request; on a server
    /// connection it starts an HTTP response.
    pub async fn send_headers(
        &self,
        stream_id: u64,
        headers: &[Header],
        end_stream: bool,
    ) -> Result<()> {
        let result = match &self.transport {
            Transport::Tcp(t) => {
                t.send_with(|p| p.submit_headers(stream_id, headers, end_stream))
                    .await
            }
            Transport::Udp(t) => {
                t.send_with(|p| p.submit_headers(stream_id, headers, end_stream))
                    .await
            }
        };
        tracing::debug!(stream_id, count = headers.len(), end_stream, "sent HTTP headers");
        result
    }

    /// Sends a frame with HTTP data.
    pub async fn send_data(&self, stream_id: u64, data: &[u8], end_stream: bool) -> Result<()> {
        let result = match &self.transport {
            Transport::Tcp(t) => {
                t.send_with(|p| p.submit_data(stream_id, data, end_stream))
                    .await
            }
            Transport::Udp(t) => {
                t.send_with(|p| p.submit_data(stream_id, data, end_stream))
                    .await
            }
        };
        tracing::debug!(stream_id, len = data.len(), end_stream, "sent HTTP data");
        result
    }

    /// Immediately terminates a stream.
    pub async fn send_stream_reset(&self, stream_id: u64, error_code: u64) -> Result<()> {
        let result = match &self.transport {
            Transport::Tcp(t) => {
                t.send_with(|p| p.submit_stream_reset(stream_id, error_code))
                    .await
            }
            Transport::Udp(t) => {
                t.send_with(|p| p.submit_stream_reset(stream_id, error_code))
                    .await
            }
        };
        tracing::debug!(stream_id, error_code, "sent stream reset");
        result
    }

    /// Receives the next HTTP event, driving the transport as needed.
    ///
    /// May suspend indefinitely; wrap in a timeout for deadline behavior.
    pub async fn receive_event(&self) -> Event {
        loop {
            let (event, expired) = match &self.transport {
                Transport::Tcp(t) => t.with_protocol(|p| (p.next_event(), p.has_expired())).await,
                Transport::Udp(t) => t.with_protocol(|p| (p.next_event(), p.has_expired())).await,
            };
            if let Some(event) = event {
                tracing::debug!(?event, "received HTTP event");
                return event;
            }
            if expired {
                // The terminated event was already delivered; repeat it
                // rather than spinning on a dead transport.
                return Event::connection_terminated(0);
            }
            match &self.transport {
                Transport::Tcp(t) => t.receive().await,
                Transport::Udp(t) => t.receive().await,
            }
        }
    }
}
