//! The UDP driver: couples a datagram stream to a sans-I/O QUIC protocol.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::proto::{Datagram, HttpOverQuicProtocol};
use crate::Result;

const MAX_UDP_PAYLOAD: usize = 65_535;

/// A bidirectional stream of datagrams.
///
/// Implemented by a plain UDP socket (clients) and by the demultiplexer's
/// per-connection queues (servers), which additionally track the QUIC
/// connection ids subscribed for routing.
#[async_trait]
pub trait DatagramStream: Send + Sync + 'static {
    /// Receives one datagram.
    async fn recv(&self) -> io::Result<Datagram>;

    /// Sends one datagram.
    async fn send(&self, datagram: Datagram) -> io::Result<()>;

    /// Synchronizes routing subscriptions with the protocol's id set.
    /// A no-op for streams that need no routing.
    fn update_connection_ids(&self, _connection_ids: &[Vec<u8>]) {}

    /// Releases the stream.
    async fn close(&self) {}
}

/// A client-side datagram stream over one dedicated UDP socket.
pub(crate) struct UdpSocketStream {
    socket: UdpSocket,
}

impl UdpSocketStream {
    pub(crate) fn new(socket: UdpSocket) -> Self {
        UdpSocketStream { socket }
    }
}

#[async_trait]
impl DatagramStream for UdpSocketStream {
    async fn recv(&self) -> io::Result<Datagram> {
        let mut buf = vec![0; MAX_UDP_PAYLOAD];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((Bytes::from(buf), from))
    }

    async fn send(&self, datagram: Datagram) -> io::Result<()> {
        let (data, to) = datagram;
        self.socket.send_to(&data, to).await?;
        Ok(())
    }
}

/// Binds a QUIC protocol state machine to a datagram stream.
///
/// Like the TCP driver, protocol mutation happens inside a send critical
/// section that flushes queued datagrams before releasing. The receive path
/// is additionally bounded by the protocol's retransmission timer, and the
/// demultiplexer subscription is refreshed after every section.
pub(crate) struct UdpTransport {
    protocol: Mutex<Box<dyn HttpOverQuicProtocol>>,
    stream: Arc<dyn DatagramStream>,
}

impl UdpTransport {
    pub(crate) fn new(
        protocol: Box<dyn HttpOverQuicProtocol>,
        stream: Arc<dyn DatagramStream>,
    ) -> Self {
        UdpTransport {
            protocol: Mutex::new(protocol),
            stream,
        }
    }

    pub(crate) async fn send_with<R>(
        &self,
        f: impl FnOnce(&mut dyn HttpOverQuicProtocol) -> R,
    ) -> R {
        let mut protocol = self.protocol.lock().await;
        protocol.clock(Instant::now());
        let result = f(protocol.as_mut());
        for datagram in protocol.datagrams_to_send() {
            if let Err(e) = self.stream.send(datagram).await {
                tracing::debug!(error = %e, "datagram send failed");
                protocol.connection_lost();
                break;
            }
        }
        let connection_ids = protocol.connection_ids();
        if !connection_ids.is_empty() {
            // An empty set means the protocol is not initialized yet; the
            // listener's seed subscription must survive until it is.
            self.stream.update_connection_ids(&connection_ids);
        }
        result
    }

    pub(crate) async fn with_protocol<R>(
        &self,
        f: impl FnOnce(&mut dyn HttpOverQuicProtocol) -> R,
    ) -> R {
        let mut protocol = self.protocol.lock().await;
        f(protocol.as_mut())
    }

    /// Drives the receive path once: waits for a datagram no longer than the
    /// protocol's timer allows. A timer expiry runs an empty send section so
    /// that retransmissions flush out.
    pub(crate) async fn receive(&self) {
        let deadline = {
            let mut protocol = self.protocol.lock().await;
            protocol.clock(Instant::now());
            protocol.get_timer()
        };
        let received = match deadline {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, self.stream.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        self.send_with(|_| ()).await;
                        return;
                    }
                }
            }
            None => self.stream.recv().await,
        };
        match received {
            Ok(datagram) => self.send_with(|p| p.datagram_received(datagram)).await,
            Err(e) => {
                tracing::debug!(error = %e, "datagram receive failed");
                self.with_protocol(|p| p.connection_lost()).await;
            }
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.stream.close().await;
        Ok(())
    }
}

/// Binds a fresh UDP socket suitable for dialing `remote`.
pub(crate) async fn bind_for(remote: SocketAddr) -> io::Result<(UdpSocket, SocketAddr)> {
    let bind_addr: SocketAddr = if remote.is_ipv6() {
        "[::]:0".parse().expect("valid address")
    } else {
        "0.0.0.0:0".parse().expect("valid address")
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    let local_addr = socket.local_addr()?;
    Ok((socket, local_addr))
}
