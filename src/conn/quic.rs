//! The QUIC demultiplexer: one UDP socket, many connections.
//!
//! HTTP/3 servers share one UDP port between QUIC connections, so something
//! has to route datagrams by their destination connection id. The listener
//! owns the routing table and the accept loop; each connection gets a
//! [`DatagramStream`] backed by a per-connection queue for receiving and the
//! shared socket (behind a shared send lock) for replying.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::conn::udp::DatagramStream;
use crate::proto::h3::sniff_packet;
use crate::proto::Datagram;

/// Routes datagrams to per-connection queues by QUIC connection id.
#[derive(Default)]
pub(crate) struct QuicRouter {
    routes: parking_lot::Mutex<HashMap<Vec<u8>, mpsc::UnboundedSender<Datagram>>>,
}

impl QuicRouter {
    fn subscribe(&self, connection_id: Vec<u8>, feeder: mpsc::UnboundedSender<Datagram>) {
        self.routes.lock().insert(connection_id, feeder);
    }

    fn unsubscribe(&self, connection_id: &[u8]) {
        self.routes.lock().remove(connection_id);
    }

    /// Delivers the datagram to the owning connection, if any.
    fn route(&self, connection_id: &[u8], datagram: Datagram) -> bool {
        let routes = self.routes.lock();
        match routes.get(connection_id) {
            // A closed receiver means the connection is going away; the
            // datagram is dropped with it.
            Some(feeder) => feeder.send(datagram).is_ok(),
            None => false,
        }
    }
}

/// The demultiplexer-backed datagram stream of one server connection.
pub struct QuicConnectionStream {
    socket: Arc<UdpSocket>,
    router: Arc<QuicRouter>,
    feeder: mpsc::UnboundedSender<Datagram>,
    queue: AsyncMutex<mpsc::UnboundedReceiver<Datagram>>,
    send_lock: Arc<AsyncMutex<()>>,
    subscribed: parking_lot::Mutex<HashSet<Vec<u8>>>,
}

#[async_trait::async_trait]
impl DatagramStream for QuicConnectionStream {
    async fn recv(&self) -> io::Result<Datagram> {
        self.queue.lock().await.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "the datagram queue was closed")
        })
    }

    async fn send(&self, datagram: Datagram) -> io::Result<()> {
        let (data, to) = datagram;
        let _guard = self.send_lock.lock().await;
        self.socket.send_to(&data, to).await?;
        Ok(())
    }

    /// Diffs the new id set against the previous one: routes for retired ids
    /// are removed, fresh ids are added. Retirement races are benign; the
    /// router ignores ids that are already gone.
    fn update_connection_ids(&self, connection_ids: &[Vec<u8>]) {
        let next: HashSet<Vec<u8>> = connection_ids.iter().cloned().collect();
        let mut subscribed = self.subscribed.lock();
        for retired in subscribed.difference(&next) {
            self.router.unsubscribe(retired);
        }
        for fresh in next.difference(&subscribed) {
            self.router.subscribe(fresh.clone(), self.feeder.clone());
        }
        *subscribed = next;
    }

    async fn close(&self) {
        self.update_connection_ids(&[]);
        self.queue.lock().await.close();
    }
}

/// A listener that accepts QUIC connections on one UDP socket.
pub struct QuicListener {
    socket: Arc<UdpSocket>,
    router: Arc<QuicRouter>,
    send_lock: Arc<AsyncMutex<()>>,
    local_addr: SocketAddr,
    connection_id_length: usize,
    supported_versions: Vec<u32>,
}

impl QuicListener {
    /// Binds a UDP socket for accepting QUIC connections.
    ///
    /// `connection_id_length` and `supported_versions` come from the HTTP/3
    /// server factory; they are needed to sniff packets before any
    /// connection exists.
    pub async fn bind(
        addr: SocketAddr,
        connection_id_length: usize,
        supported_versions: Vec<u32>,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(QuicListener {
            socket: Arc::new(socket),
            router: Arc::new(QuicRouter::default()),
            send_lock: Arc::new(AsyncMutex::new(())),
            local_addr,
            connection_id_length,
            supported_versions,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, spawning `handler` for each.
    ///
    /// Datagrams for known connection ids go to the owning queue. Unroutable
    /// datagrams open a new connection when they are Initial packets of a
    /// supported version, and are dropped otherwise (version negotiation is
    /// not performed).
    pub async fn serve<F, Fut>(&self, handler: F) -> io::Result<()>
    where
        F: Fn(Arc<QuicConnectionStream>, SocketAddr) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut buf = vec![0; 65_535];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            let data = Bytes::copy_from_slice(&buf[..len]);
            let info = match sniff_packet(&data, self.connection_id_length) {
                Ok(info) => info,
                Err(_) => continue,
            };
            if self.router.route(&info.dcid, (data.clone(), from)) {
                continue;
            }
            if !info.is_initial() {
                continue;
            }
            if !self.supported_versions.contains(&info.version) {
                tracing::debug!(version = info.version, "dropped an unsupported QUIC version");
                continue;
            }
            let stream = self.create_connection_stream(info.dcid.clone());
            stream.feeder.send((data, from)).expect("fresh queue");
            tracing::debug!(remote_addr = %from, "accepted a QUIC connection");
            tokio::spawn(handler(stream, from));
        }
    }

    fn create_connection_stream(&self, connection_id: Vec<u8>) -> Arc<QuicConnectionStream> {
        let (feeder, queue) = mpsc::unbounded_channel();
        let stream = Arc::new(QuicConnectionStream {
            socket: self.socket.clone(),
            router: self.router.clone(),
            feeder,
            queue: AsyncMutex::new(queue),
            send_lock: self.send_lock.clone(),
            subscribed: parking_lot::Mutex::new(HashSet::new()),
        });
        stream.update_connection_ids(std::slice::from_ref(&connection_id));
        stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_routes_to_subscribed_queue() {
        let router = QuicRouter::default();
        let (feeder, mut queue) = mpsc::unbounded_channel();
        router.subscribe(vec![1, 2, 3], feeder);

        let addr: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        assert!(router.route(&[1, 2, 3], (Bytes::from_static(b"hi"), addr)));
        assert!(!router.route(&[9, 9, 9], (Bytes::from_static(b"hi"), addr)));

        let (data, from) = queue.recv().await.unwrap();
        assert_eq!(data.as_ref(), b"hi");
        assert_eq!(from, addr);

        router.unsubscribe(&[1, 2, 3]);
        assert!(!router.route(&[1, 2, 3], (Bytes::from_static(b"hi"), addr)));
    }

    #[tokio::test]
    async fn test_update_connection_ids_diffs_routes() {
        let listener = QuicListener::bind("127.0.0.1:0".parse().unwrap(), 16, vec![1])
            .await
            .unwrap();
        let stream = listener.create_connection_stream(vec![1; 16]);
        let addr: SocketAddr = "127.0.0.1:4433".parse().unwrap();

        assert!(listener.router.route(&[1; 16], (Bytes::new(), addr)));

        stream.update_connection_ids(&[vec![1; 16], vec![2; 16]]);
        assert!(listener.router.route(&[2; 16], (Bytes::new(), addr)));

        stream.update_connection_ids(&[vec![2; 16]]);
        assert!(!listener.router.route(&[1; 16], (Bytes::new(), addr)));
        assert!(listener.router.route(&[2; 16], (Bytes::new(), addr)));
    }
}
