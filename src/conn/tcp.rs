//! The TCP driver: couples a byte stream to a sans-I/O protocol.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::proto::HttpOverTcpProtocol;
use crate::Result;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Any stream a TCP-backed connection can run on: a plain socket, a TLS
/// session, or a CONNECT tunnel through a proxy.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> AsyncStream for T {}

/// A boxed [`AsyncStream`].
pub type BoxedStream = Box<dyn AsyncStream>;

struct SendHalf {
    protocol: Box<dyn HttpOverTcpProtocol>,
    writer: WriteHalf<BoxedStream>,
    write_dead: bool,
}

struct RecvHalf {
    reader: ReadHalf<BoxedStream>,
    buf: Vec<u8>,
}

/// Binds a protocol state machine to a byte stream.
///
/// The protocol and the write half share one lock: every protocol mutation
/// happens in a send critical section that drains `bytes_to_send` to the
/// socket before releasing. Inbound processing enters the same section
/// because it may buffer replies (SETTINGS ACK, GOAWAY).
pub(crate) struct TcpTransport {
    send: Mutex<SendHalf>,
    recv: Mutex<RecvHalf>,
}

impl TcpTransport {
    pub(crate) fn new(protocol: Box<dyn HttpOverTcpProtocol>, stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        TcpTransport {
            send: Mutex::new(SendHalf {
                protocol,
                writer,
                write_dead: false,
            }),
            recv: Mutex::new(RecvHalf {
                reader,
                buf: vec![0; READ_BUFFER_SIZE],
            }),
        }
    }

    /// Runs `f` against the protocol inside the send critical section and
    /// flushes the outbound buffer.
    pub(crate) async fn send_with<R>(
        &self,
        f: impl FnOnce(&mut dyn HttpOverTcpProtocol) -> R,
    ) -> R {
        let mut send = self.send.lock().await;
        let result = f(send.protocol.as_mut());
        let data = send.protocol.bytes_to_send();
        if !data.is_empty() && !send.write_dead {
            if let Err(e) = send.writer.write_all(&data).await {
                tracing::debug!(error = %e, "socket write failed");
                send.write_dead = true;
                send.protocol.connection_lost();
            }
        }
        result
    }

    /// Reads the protocol without flushing.
    pub(crate) async fn with_protocol<R>(
        &self,
        f: impl FnOnce(&mut dyn HttpOverTcpProtocol) -> R,
    ) -> R {
        let mut send = self.send.lock().await;
        f(send.protocol.as_mut())
    }

    /// Drives the receive path once: reads from the socket and feeds the
    /// protocol, mapping EOF and failures to the matching callbacks.
    pub(crate) async fn receive(&self) {
        let read = {
            let mut recv = self.recv.lock().await;
            let mut buf = std::mem::take(&mut recv.buf);
            let result = recv.reader.read(&mut buf).await;
            let read = result.map(|n| buf[..n].to_vec());
            recv.buf = buf;
            read
        };
        match read {
            Ok(data) if data.is_empty() => self.send_with(|p| p.eof_received()).await,
            Ok(data) => self.send_with(|p| p.bytes_received(&data)).await,
            Err(e) => {
                tracing::debug!(error = %e, "socket read failed");
                self.with_protocol(|p| p.connection_lost()).await;
            }
        }
    }

    /// Shuts the write direction down, releasing the socket.
    pub(crate) async fn close(&self) -> Result<()> {
        let mut send = self.send.lock().await;
        if !send.write_dead {
            let _ = send.writer.shutdown().await;
        }
        Ok(())
    }
}
