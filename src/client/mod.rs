//! The HTTP client: per-origin pooling, request dispatch, proxy support.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::ClientTlsConfig;
use crate::conn::{HttpOpener, QuicOpener, SystemDialer, TcpDialer, TcpOpener};
use crate::proto::{AlpnHttpFactory, ProtocolRegistry};
use crate::{Error, Result};

pub mod models;
mod pool;
mod proxy;
mod stream;

pub use crate::proto::registry::Implementations;
pub use models::{Origin, Request, Response, Url};
pub use pool::ConnectionPool;
pub use proxy::{ProxyClient, ProxySession, ProxyTunnel};
pub use stream::FetchStream;

/// Specifies what connections a client should open.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ClientProtocol {
    /// Open TCP connections; HTTP/2 is selected via ALPN when available,
    /// with HTTP/1.1 as the fallback. The default.
    #[default]
    Tcp,
    /// Use HTTP/1.1 only.
    Http1,
    /// Use HTTP/2 only.
    Http2,
    /// Use HTTP/3; opens QUIC connections instead of TCP.
    Http3,
}

/// An HTTP client supporting HTTP/1, HTTP/2, and HTTP/3.
///
/// A `Client` holds configuration only; [`session`](Client::session) creates
/// the [`ClientSession`] that owns connections and dispatches requests.
pub struct Client {
    /// TLS configuration for `https://` origins.
    pub tls_config: ClientTlsConfig,
    /// The protocol selection for origin connections.
    pub protocol: ClientProtocol,
    /// An HTTP proxy to tunnel through, if any.
    pub proxy_origin: Option<Origin>,
    /// The protocol selection for connections to the proxy.
    pub proxy_protocol: ClientProtocol,
    /// Protocol implementations to use.
    pub registry: ProtocolRegistry,
    /// Names of the implementations picked from the registry.
    pub implementations: Implementations,
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}

impl Client {
    /// Creates a client with default settings.
    pub fn new() -> Client {
        Client {
            tls_config: ClientTlsConfig::default(),
            protocol: ClientProtocol::default(),
            proxy_origin: None,
            proxy_protocol: ClientProtocol::default(),
            registry: ProtocolRegistry::with_defaults(),
            implementations: Implementations::default(),
        }
    }

    /// Starts a new client session.
    pub fn session(&self) -> Result<ClientSession> {
        let (dialer, proxy_session): (Arc<dyn TcpDialer>, Option<Arc<ProxySession>>) =
            match &self.proxy_origin {
                None => (Arc::new(SystemDialer), None),
                Some(origin) => {
                    let proxy = ProxyClient {
                        origin: origin.clone(),
                        protocol: self.proxy_protocol,
                        tls_config: self.tls_config.clone(),
                        registry: self.registry.clone(),
                    };
                    let session = Arc::new(proxy.session()?);
                    (session.clone(), Some(session))
                }
            };
        let opener = match self.protocol {
            ClientProtocol::Http3 => {
                if proxy_session.is_some() {
                    return Err(Error::invalid_input(
                        "tunneling HTTP/3 through a proxy would need CONNECT-UDP, \
                         which is not supported",
                    ));
                }
                let factory = self.registry.http3_client(&self.implementations.http3)?;
                Arc::new(QuicOpener::new(factory, &self.tls_config)) as Arc<dyn HttpOpener>
            }
            protocol => {
                build_tcp_opener_named(
                    &self.registry,
                    protocol,
                    &self.implementations,
                    &self.tls_config,
                    dialer,
                )?
            }
        };
        Ok(ClientSession {
            opener,
            pools: AsyncMutex::new(HashMap::new()),
            proxy_session,
        })
    }
}

/// Builds a TCP opener for the given protocol selection using default
/// implementation names.
pub(crate) fn build_tcp_opener(
    registry: &ProtocolRegistry,
    protocol: ClientProtocol,
    tls_config: &ClientTlsConfig,
    dialer: Arc<dyn TcpDialer>,
) -> Result<Arc<dyn HttpOpener>> {
    build_tcp_opener_named(
        registry,
        protocol,
        &Implementations::default(),
        tls_config,
        dialer,
    )
}

fn build_tcp_opener_named(
    registry: &ProtocolRegistry,
    protocol: ClientProtocol,
    implementations: &Implementations,
    tls_config: &ClientTlsConfig,
    dialer: Arc<dyn TcpDialer>,
) -> Result<Arc<dyn HttpOpener>> {
    let factory: Arc<dyn crate::proto::HttpOverTcpFactory> = match protocol {
        ClientProtocol::Tcp => Arc::new(AlpnHttpFactory::new(vec![
            registry.http2_client(&implementations.http2)?,
            registry.http1_client(&implementations.http1)?,
        ])),
        ClientProtocol::Http1 => registry.http1_client(&implementations.http1)?,
        ClientProtocol::Http2 => registry.http2_client(&implementations.http2)?,
        ClientProtocol::Http3 => {
            return Err(Error::usage("HTTP/3 does not run over TCP"));
        }
    };
    Ok(Arc::new(TcpOpener::new(factory, tls_config, dialer)?))
}

/// An active client session.
///
/// Maintains a pool of HTTP connections per origin and dispatches requests
/// over them.
pub struct ClientSession {
    opener: Arc<dyn HttpOpener>,
    pools: AsyncMutex<HashMap<Origin, Arc<ConnectionPool>>>,
    proxy_session: Option<Arc<ProxySession>>,
}

impl ClientSession {
    /// Performs an HTTP request and reads the full response.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        tracing::info!(method = %request.method, url = %request.url, "dispatching request");
        let stream = self.send_request(&request).await?;
        let mut response = Response::from_headers(&stream.receive_headers().await?)?;
        while let Some(chunk) = stream.receive_data().await? {
            response.content.extend_from_slice(&chunk);
        }
        Ok(response)
    }

    /// Sends a request and returns the stream for incremental consumption.
    pub async fn send_request(&self, request: &Request) -> Result<FetchStream> {
        let pool = self.get_pool(request.url.origin()).await;
        let stream = pool
            .open_stream(&request.protocol_headers(), request.content.is_empty())
            .await?;
        if !request.content.is_empty() {
            stream.send_data(&request.content, true).await?;
        }
        Ok(stream)
    }

    /// Closes all pooled connections.
    pub async fn close(&self) {
        let pools: Vec<_> = self.pools.lock().await.values().cloned().collect();
        for pool in pools {
            pool.close().await;
        }
        if let Some(proxy_session) = &self.proxy_session {
            proxy_session.close().await;
        }
    }

    async fn get_pool(&self, origin: Origin) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock().await;
        pools
            .entry(origin.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    origin.host.clone(),
                    origin.port,
                    origin.tls(),
                    self.opener.clone(),
                ))
            })
            .clone()
    }
}
