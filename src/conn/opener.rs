//! Client-side connection openers.
//!
//! An opener dials an origin and returns a ready [`HttpConnection`]. The
//! TCP opener is generic over a [`TcpDialer`] so that the same machinery can
//! run over a plain socket or over a CONNECT tunnel provided by a proxy
//! session.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::config::ClientTlsConfig;
use crate::conn::tcp::BoxedStream;
use crate::conn::udp::{bind_for, UdpSocketStream};
use crate::conn::HttpConnection;
use crate::proto::{HttpOverQuicClientFactory, HttpOverTcpFactory};
use crate::{Error, Result};

/// Opens HTTP connections to an origin.
#[async_trait]
pub trait HttpOpener: Send + Sync + 'static {
    /// Opens a connection to the given origin.
    ///
    /// `server_name` overrides the name sent in TLS SNI, which defaults to
    /// the host.
    async fn open(
        &self,
        host: &str,
        port: u16,
        tls: bool,
        server_name: Option<&str>,
    ) -> Result<HttpConnection>;
}

/// Creates the byte stream a TCP-backed connection runs on.
#[async_trait]
pub trait TcpDialer: Send + Sync + 'static {
    /// Connects to the given host and port.
    ///
    /// Returns the stream plus the local and remote addresses to attribute
    /// to the connection.
    async fn connect(&self, host: &str, port: u16) -> Result<(BoxedStream, SocketAddr, SocketAddr)>;
}

/// Dials origins directly through the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemDialer;

#[async_trait]
impl TcpDialer for SystemDialer {
    async fn connect(&self, host: &str, port: u16) -> Result<(BoxedStream, SocketAddr, SocketAddr)> {
        let stream = TcpStream::connect((host, port)).await?;
        let _ = stream.set_nodelay(true);
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        Ok((Box::new(stream), local_addr, remote_addr))
    }
}

/// Opens HTTP/1 and HTTP/2 connections over TCP, optionally with TLS.
pub struct TcpOpener {
    factory: Arc<dyn HttpOverTcpFactory>,
    dialer: Arc<dyn TcpDialer>,
    tls_client_config: Arc<rustls::ClientConfig>,
}

impl TcpOpener {
    /// Creates an opener that constructs protocols with `factory`.
    ///
    /// The factory's ALPN list is offered in TLS handshakes; the negotiated
    /// protocol is fed back to the factory when a connection opens.
    pub fn new(
        factory: Arc<dyn HttpOverTcpFactory>,
        tls_config: &ClientTlsConfig,
        dialer: Arc<dyn TcpDialer>,
    ) -> Result<Self> {
        let tls_client_config = build_tls_client_config(tls_config, factory.alpn_protocols())?;
        Ok(TcpOpener {
            factory,
            dialer,
            tls_client_config,
        })
    }
}

#[async_trait]
impl HttpOpener for TcpOpener {
    async fn open(
        &self,
        host: &str,
        port: u16,
        tls: bool,
        server_name: Option<&str>,
    ) -> Result<HttpConnection> {
        let (stream, local_addr, remote_addr) = self.dialer.connect(host, port).await?;
        if !tls {
            let protocol = self.factory.build(None, None);
            return Ok(HttpConnection::over_tcp(
                protocol,
                stream,
                local_addr,
                remote_addr,
            ));
        }
        let connector = TlsConnector::from(self.tls_client_config.clone());
        let sni = server_name.unwrap_or(host).to_string();
        let sni = rustls::pki_types::ServerName::try_from(sni)
            .map_err(|_| Error::invalid_input(format!("invalid server name: {host:?}")))?;
        let stream = connector.connect(sni, stream).await?;
        let (_, session) = stream.get_ref();
        let alpn_protocol = session
            .alpn_protocol()
            .and_then(|alpn| std::str::from_utf8(alpn).ok())
            .map(str::to_string);
        let tls_version = session.protocol_version().map(|version| match version {
            rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
            rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
            _ => "TLS",
        });
        let protocol = self.factory.build(tls_version, alpn_protocol.as_deref());
        Ok(HttpConnection::over_tcp(
            protocol,
            Box::new(stream),
            local_addr,
            remote_addr,
        ))
    }
}

/// Opens HTTP/3 connections over QUIC.
pub struct QuicOpener {
    factory: Arc<dyn HttpOverQuicClientFactory>,
    tls_config: ClientTlsConfig,
}

impl QuicOpener {
    /// Creates an opener that constructs protocols with `factory`.
    pub fn new(factory: Arc<dyn HttpOverQuicClientFactory>, tls_config: &ClientTlsConfig) -> Self {
        QuicOpener {
            factory,
            tls_config: tls_config.clone(),
        }
    }
}

#[async_trait]
impl HttpOpener for QuicOpener {
    async fn open(
        &self,
        host: &str,
        port: u16,
        tls: bool,
        server_name: Option<&str>,
    ) -> Result<HttpConnection> {
        if !tls {
            return Err(Error::invalid_input(
                "HTTP/3 runs over QUIC, which is always encrypted; an http:// \
                 origin cannot be reached with it",
            ));
        }
        let remote_addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| Error::invalid_input(format!("cannot resolve host {host:?}")))?;
        let (socket, local_addr) = bind_for(remote_addr).await?;
        let protocol = self.factory.build(
            remote_addr,
            local_addr,
            server_name.unwrap_or(host),
            &self.tls_config,
        )?;
        Ok(HttpConnection::over_udp(
            protocol,
            Arc::new(UdpSocketStream::new(socket)),
            local_addr,
            remote_addr,
        ))
    }
}

pub(crate) fn build_tls_client_config(
    tls_config: &ClientTlsConfig,
    alpn_protocols: Vec<String>,
) -> Result<Arc<rustls::ClientConfig>> {
    let builder = rustls::ClientConfig::builder();
    let mut config = if tls_config.insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerification::new()))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        if tls_config.cafile.is_none() && tls_config.capath.is_none() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        if let Some(cafile) = &tls_config.cafile {
            add_pem_file(&mut roots, cafile)?;
        }
        if let Some(capath) = &tls_config.capath {
            for entry in std::fs::read_dir(capath)? {
                add_pem_file(&mut roots, &entry?.path())?;
            }
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    config.alpn_protocols = alpn_protocols
        .iter()
        .map(|alpn| alpn.as_bytes().to_vec())
        .collect();
    Ok(Arc::new(config))
}

fn add_pem_file(roots: &mut rustls::RootCertStore, path: &std::path::Path) -> Result<()> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?)?;
    }
    Ok(())
}

mod danger {
    //! The stock certificate verifier that accepts everything, for
    //! `--insecure` runs against self-signed development servers.

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub(super) struct NoVerification(CryptoProvider);

    impl NoVerification {
        pub(super) fn new() -> Self {
            NoVerification(rustls::crypto::ring::default_provider())
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}
