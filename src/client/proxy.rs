//! CONNECT-tunnel client.
//!
//! A proxy session keeps a pool of connections to the proxy (for HTTP/2 and
//! HTTP/3 proxies that pool rarely grows beyond one connection) and opens
//! tunnels with CONNECT requests. An established tunnel carries arbitrary
//! TCP traffic, so a session doubles as the [`TcpDialer`] of another client.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::stream::FetchStream;
use crate::client::{build_tcp_opener, ClientProtocol};
use crate::client::{models::Origin, pool::ConnectionPool};
use crate::config::ClientTlsConfig;
use crate::conn::{BoxedStream, SystemDialer, TcpDialer};
use crate::headers::find;
use crate::proto::ProtocolRegistry;
use crate::{Error, Result};

/// A client that tunnels traffic through an HTTP proxy.
///
/// Sends CONNECT requests to the proxy to establish tunnels. Supports
/// HTTP/1 and HTTP/2 proxies in tunneling mode.
pub struct ProxyClient {
    /// The proxy server to connect to.
    pub origin: Origin,
    /// The protocol used for connections to the proxy itself.
    pub protocol: ClientProtocol,
    /// TLS configuration for `https://` proxies.
    pub tls_config: ClientTlsConfig,
    /// Protocol implementations to use.
    pub registry: ProtocolRegistry,
}

impl ProxyClient {
    /// Creates a proxy client with default settings.
    pub fn new(origin: Origin) -> ProxyClient {
        ProxyClient {
            origin,
            protocol: ClientProtocol::Tcp,
            tls_config: ClientTlsConfig::default(),
            registry: ProtocolRegistry::with_defaults(),
        }
    }

    /// Establishes a session with the proxy.
    pub fn session(&self) -> Result<ProxySession> {
        if self.protocol == ClientProtocol::Http3 {
            return Err(Error::invalid_input(
                "HTTP/3 proxies would need CONNECT-UDP, which is not supported",
            ));
        }
        let opener = build_tcp_opener(
            &self.registry,
            self.protocol,
            &self.tls_config,
            Arc::new(SystemDialer),
        )?;
        let pool = Arc::new(ConnectionPool::new(
            self.origin.host.clone(),
            self.origin.port,
            self.origin.tls(),
            opener,
        ));
        Ok(ProxySession { pool })
    }
}

/// An active session with an HTTP proxy.
pub struct ProxySession {
    pool: Arc<ConnectionPool>,
}

impl ProxySession {
    /// Opens a tunnel to the given destination.
    ///
    /// Fails with [`Error::ProxyStatus`] when the proxy answers the CONNECT
    /// request with anything but 200.
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<ProxyTunnel> {
        let headers = vec![
            (Bytes::from_static(b":method"), Bytes::from_static(b"CONNECT")),
            (
                Bytes::from_static(b":authority"),
                Bytes::from(format!("{host}:{port}")),
            ),
        ];
        let stream = self.pool.open_stream(&headers, false).await?;
        let response_headers = stream.receive_headers().await?;
        let status = find(&response_headers, b":status")
            .ok_or_else(|| Error::usage("proxy response carries no :status header"))?;
        if status != b"200" {
            let status = std::str::from_utf8(status)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            return Err(Error::ProxyStatus(status));
        }
        let local_addr = stream.connection().local_addr();
        let remote_addr = stream.connection().remote_addr();
        Ok(ProxyTunnel {
            stream,
            local_addr,
            remote_addr,
        })
    }

    /// Closes the connections to the proxy.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// An established CONNECT tunnel.
pub struct ProxyTunnel {
    stream: FetchStream,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl ProxyTunnel {
    /// Turns the tunnel into an ordinary byte stream.
    ///
    /// Two pump tasks bridge the HTTP stream and a duplex pipe, so the
    /// returned stream can carry a TLS handshake like any socket.
    pub fn into_stream(self) -> BoxedStream {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (mut read_half, mut write_half) = tokio::io::split(far);
        let stream = Arc::new(self.stream);

        let download = stream.clone();
        tokio::spawn(async move {
            loop {
                match download.receive_data().await {
                    Ok(Some(data)) => {
                        if write_half.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = write_half.shutdown().await;
                        break;
                    }
                }
            }
        });

        let upload = stream;
        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => {
                        let _ = upload.close().await;
                        break;
                    }
                    Ok(n) => {
                        if upload.send_data(&buf[..n], false).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Box::new(near)
    }
}

#[async_trait]
impl TcpDialer for ProxySession {
    async fn connect(&self, host: &str, port: u16) -> Result<(BoxedStream, SocketAddr, SocketAddr)> {
        let tunnel = self.connect_tcp(host, port).await?;
        // The origin address is not known locally; attribute the proxy
        // connection's addresses to the tunneled connection.
        let local_addr = tunnel.local_addr;
        let remote_addr = tunnel.remote_addr;
        Ok((tunnel.into_stream(), local_addr, remote_addr))
    }
}
