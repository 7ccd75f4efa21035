//! HTTP servers: endpoint handling, listener assembly, and the two built-in
//! dispatch modes (gateway and CONNECT proxy).

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::ServerTlsConfig;
use crate::conn::{ConnectionHandler, QuicHttpListener, TcpHttpListener};
use crate::proto::registry::Implementations;
use crate::proto::{AlpnHttpFactory, HttpOverTcpFactory, ProtocolRegistry};
use crate::{Error, Result};

pub mod demos;
pub mod gateway;
mod proxy;

pub use gateway::{Gateway, RequestMessage, RequestReceiver, ResponseSender, Scope};

/// An endpoint where a server can listen.
///
/// The grammar is `[{http|https}://]HOST:PORT`; the host may be empty or
/// `[::]` to listen on all interfaces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    /// Either `"http"` or `"https"`.
    pub scheme: String,
    /// A hostname or an IP address; empty means all interfaces.
    pub host: String,
    /// A port number.
    pub port: u16,
}

impl Endpoint {
    /// Parses an endpoint from a string.
    pub fn parse(value: &str) -> Result<Endpoint> {
        let (scheme, rest) = match value.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("http", value),
        };
        if !matches!(scheme, "http" | "https") {
            return Err(Error::invalid_input(format!("invalid scheme: {scheme:?}")));
        }
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_input("endpoint port is required"))?;
        if host.contains('/') || port.contains('/') {
            return Err(Error::invalid_input(
                "endpoint must not have a path component",
            ));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_input(format!("invalid port: {port:?}")))?;
        Ok(Endpoint {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Whether connections at this endpoint use TLS.
    #[inline]
    pub fn tls(&self) -> bool {
        self.scheme == "https"
    }

    /// Resolves the address to bind.
    pub async fn bind_addr(&self) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        tokio::net::lookup_host((host, self.port))
            .await?
            .next()
            .ok_or_else(|| Error::invalid_input(format!("cannot resolve host {host:?}")))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Specifies for what connections a server should listen.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ServerProtocol {
    /// Listen for all HTTP versions. The default.
    #[default]
    All,
    /// Listen for HTTP/1 and HTTP/2 connections.
    Tcp,
    /// Listen for HTTP/1 connections only.
    Http1,
    /// Listen for HTTP/2 connections only.
    Http2,
    /// Listen for HTTP/3 connections only.
    Http3,
}

/// Settings shared by the server flavors.
#[derive(Clone)]
pub struct ServerOptions {
    /// TLS certificate configuration, required for `https://` endpoints.
    pub tls_config: ServerTlsConfig,
    /// Protocol or protocols to listen for.
    pub protocol: ServerProtocol,
    /// Protocol implementations to use.
    pub registry: ProtocolRegistry,
    /// Names of the implementations picked from the registry.
    pub implementations: Implementations,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            tls_config: ServerTlsConfig::default(),
            protocol: ServerProtocol::default(),
            registry: ProtocolRegistry::with_defaults(),
            implementations: Implementations::default(),
        }
    }
}

impl ServerOptions {
    fn tcp_factory(&self) -> Result<Arc<dyn HttpOverTcpFactory>> {
        Ok(match self.protocol {
            ServerProtocol::All | ServerProtocol::Tcp => Arc::new(AlpnHttpFactory::new(vec![
                self.registry.http2_server(&self.implementations.http2)?,
                self.registry.http1_server(&self.implementations.http1)?,
            ])),
            ServerProtocol::Http1 => self.registry.http1_server(&self.implementations.http1)?,
            ServerProtocol::Http2 => self.registry.http2_server(&self.implementations.http2)?,
            ServerProtocol::Http3 => unreachable!("HTTP/3 does not listen on TCP"),
        })
    }

    /// Binds listeners for every endpoint and serves them until failure.
    async fn run(&self, endpoints: &[Endpoint], handler: ConnectionHandler) -> Result<()> {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut bound = 0usize;
        for endpoint in endpoints {
            let addr = endpoint.bind_addr().await?;
            let wants_tcp = self.protocol != ServerProtocol::Http3;
            let wants_quic = matches!(self.protocol, ServerProtocol::All | ServerProtocol::Http3);
            if wants_tcp {
                let tls_config = endpoint.tls().then_some(&self.tls_config);
                let listener = TcpHttpListener::bind(addr, self.tcp_factory()?, tls_config).await?;
                tracing::info!(endpoint = %endpoint, addr = %listener.local_addr(), "listening for TCP connections");
                let handler = handler.clone();
                tasks.spawn(async move { listener.serve(handler).await });
                bound += 1;
            }
            if wants_quic && endpoint.tls() {
                let factory = self.registry.http3_server(&self.implementations.http3)?;
                let listener = QuicHttpListener::bind(addr, factory, &self.tls_config).await?;
                tracing::info!(endpoint = %endpoint, addr = %listener.local_addr(), "listening for QUIC connections");
                let handler = handler.clone();
                tasks.spawn(async move { listener.serve(handler).await });
                bound += 1;
            }
        }
        if bound == 0 {
            return Err(Error::invalid_input("no valid endpoint provided"));
        }
        while let Some(finished) = tasks.join_next().await {
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(Error::other(e)),
            }
        }
        Ok(())
    }
}

/// An HTTP server that hands requests to a [`Gateway`] application.
pub struct GatewayServer {
    /// Shared server settings.
    pub options: ServerOptions,
    app: Arc<dyn Gateway>,
}

impl GatewayServer {
    /// Creates a server for the given application.
    pub fn new(app: Arc<dyn Gateway>) -> GatewayServer {
        GatewayServer {
            options: ServerOptions::default(),
            app,
        }
    }

    /// Runs the server on the given endpoints.
    pub async fn run(&self, endpoints: &[Endpoint]) -> Result<()> {
        let app = self.app.clone();
        let connection_counter = Arc::new(AtomicU64::new(0));
        let handler: ConnectionHandler = Arc::new(move |connection| {
            let app = app.clone();
            let connection_id = connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
            Box::pin(gateway::handle_connection(connection, connection_id, app))
                as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.options.run(endpoints, handler).await
    }
}

/// An HTTP server that tunnels CONNECT requests.
#[derive(Default)]
pub struct ProxyServer {
    /// Shared server settings.
    pub options: ServerOptions,
}

impl ProxyServer {
    /// Creates a proxy server with default settings.
    pub fn new() -> ProxyServer {
        ProxyServer::default()
    }

    /// Runs the proxy on the given endpoints.
    pub async fn run(&self, endpoints: &[Endpoint]) -> Result<()> {
        let connection_counter = Arc::new(AtomicU64::new(0));
        let handler: ConnectionHandler = Arc::new(move |connection| {
            let connection_id = connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
            Box::pin(proxy::handle_connection(connection, connection_id))
                as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.options.run(endpoints, handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse() {
        let endpoint = Endpoint::parse("https://localhost:8443").unwrap();
        assert_eq!(endpoint.scheme, "https");
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 8443);
        assert!(endpoint.tls());

        let endpoint = Endpoint::parse(":8080").unwrap();
        assert_eq!(endpoint.scheme, "http");
        assert_eq!(endpoint.host, "");
        assert_eq!(endpoint.port, 8080);

        let endpoint = Endpoint::parse("[::]:8080").unwrap();
        assert_eq!(endpoint.host, "[::]");
    }

    #[test]
    fn test_endpoint_parse_rejects_garbage() {
        assert!(Endpoint::parse("ftp://host:1").is_err());
        assert!(Endpoint::parse("host").is_err());
        assert!(Endpoint::parse("host:notaport").is_err());
        assert!(Endpoint::parse("http://host:80/path").is_err());
    }

    #[tokio::test]
    async fn test_endpoint_bind_addr() {
        let endpoint = Endpoint::parse(":8080").unwrap();
        let addr = endpoint.bind_addr().await.unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_unspecified());
    }
}
