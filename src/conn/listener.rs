//! Server-side listeners that accept HTTP connections.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerTlsConfig;
use crate::conn::quic::QuicListener;
use crate::conn::HttpConnection;
use crate::proto::{HttpOverQuicServerFactory, HttpOverTcpFactory};
use crate::{Error, Result};

/// The callback a listener runs for every accepted connection.
pub type ConnectionHandler =
    Arc<dyn Fn(HttpConnection) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Accepts HTTP/1 and HTTP/2 connections from a TCP socket.
pub struct TcpHttpListener {
    inner: TcpListener,
    factory: Arc<dyn HttpOverTcpFactory>,
    tls_acceptor: Option<TlsAcceptor>,
    local_addr: SocketAddr,
}

impl TcpHttpListener {
    /// Binds a listener to the given local address.
    ///
    /// With a TLS configuration the listener performs rustls handshakes and
    /// feeds the negotiated ALPN protocol to the factory; without one it
    /// accepts cleartext connections.
    pub async fn bind(
        addr: SocketAddr,
        factory: Arc<dyn HttpOverTcpFactory>,
        tls_config: Option<&ServerTlsConfig>,
    ) -> Result<Self> {
        let tls_acceptor = match tls_config {
            Some(tls_config) => {
                let config = build_tls_server_config(tls_config, factory.alpn_protocols())?;
                Some(TlsAcceptor::from(config))
            }
            None => None,
        };
        let inner = TcpListener::bind(addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(TcpHttpListener {
            inner,
            factory,
            tls_acceptor,
            local_addr,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, spawning `handler` for each.
    pub async fn serve(&self, handler: ConnectionHandler) -> Result<()> {
        loop {
            let (stream, remote_addr) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let factory = self.factory.clone();
            let tls_acceptor = self.tls_acceptor.clone();
            let handler = handler.clone();
            let local_addr = self.local_addr;
            tokio::spawn(async move {
                let connection = match tls_acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => {
                            let (_, session) = stream.get_ref();
                            let alpn_protocol = session
                                .alpn_protocol()
                                .and_then(|alpn| std::str::from_utf8(alpn).ok())
                                .map(str::to_string);
                            let tls_version =
                                session.protocol_version().map(|version| match version {
                                    rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
                                    rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
                                    _ => "TLS",
                                });
                            let protocol = factory.build(tls_version, alpn_protocol.as_deref());
                            HttpConnection::over_tcp(
                                protocol,
                                Box::new(stream),
                                local_addr,
                                remote_addr,
                            )
                        }
                        Err(e) => {
                            tracing::debug!(remote_addr = %remote_addr, error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => {
                        let protocol = factory.build(None, None);
                        HttpConnection::over_tcp(protocol, Box::new(stream), local_addr, remote_addr)
                    }
                };
                handler(connection).await;
            });
        }
    }
}

/// Accepts HTTP/3 connections over QUIC at a shared UDP socket.
pub struct QuicHttpListener {
    inner: QuicListener,
    factory: Arc<dyn HttpOverQuicServerFactory>,
    tls_config: ServerTlsConfig,
}

impl QuicHttpListener {
    /// Binds a listener to the given local address.
    pub async fn bind(
        addr: SocketAddr,
        factory: Arc<dyn HttpOverQuicServerFactory>,
        tls_config: &ServerTlsConfig,
    ) -> Result<Self> {
        if !tls_config.is_complete() {
            return Err(Error::invalid_input(
                "an HTTP/3 listener requires a TLS certificate and key",
            ));
        }
        let inner = QuicListener::bind(
            addr,
            factory.connection_id_length(),
            factory.supported_versions(),
        )
        .await?;
        Ok(QuicHttpListener {
            inner,
            factory,
            tls_config: tls_config.clone(),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    /// Accepts connections forever, spawning `handler` for each.
    pub async fn serve(&self, handler: ConnectionHandler) -> Result<()> {
        let local_addr = self.local_addr();
        let factory = self.factory.clone();
        let tls_config = self.tls_config.clone();
        self.inner
            .serve(move |stream, remote_addr| {
                let handler = handler.clone();
                let protocol = factory.build(&tls_config, local_addr);
                Box::pin(async move {
                    match protocol {
                        Ok(protocol) => {
                            let connection = HttpConnection::over_udp(
                                protocol,
                                stream,
                                local_addr,
                                remote_addr,
                            );
                            handler(connection).await;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to build an HTTP/3 protocol");
                        }
                    }
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            })
            .await?;
        Ok(())
    }
}

fn build_tls_server_config(
    tls_config: &ServerTlsConfig,
    alpn_protocols: Vec<String>,
) -> Result<Arc<rustls::ServerConfig>> {
    let (certfile, keyfile) = match (&tls_config.certfile, &tls_config.keyfile) {
        (Some(certfile), Some(keyfile)) => (certfile, keyfile),
        _ => {
            return Err(Error::invalid_input(
                "an https endpoint requires a TLS certificate and key",
            ))
        }
    };
    let mut reader = std::io::BufReader::new(std::fs::File::open(certfile)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::io::Result<Vec<_>>>()?;
    let mut reader = std::io::BufReader::new(std::fs::File::open(keyfile)?);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| Error::invalid_input(format!("no private key found in {keyfile:?}")))?;
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = alpn_protocols
        .iter()
        .map(|alpn| alpn.as_bytes().to_vec())
        .collect();
    Ok(Arc::new(config))
}
