//! TLS configuration value objects.
//!
//! These carry file paths and switches only. The TCP openers and listeners
//! turn them into rustls configurations; the HTTP/3 factories feed them to
//! the QUIC codec, because there the TLS handshake happens inside QUIC.

use std::path::PathBuf;

/// Client TLS configuration.
#[derive(Clone, Debug, Default)]
pub struct ClientTlsConfig {
    /// Allows to proceed for servers without valid TLS certificates.
    pub insecure: bool,
    /// File with CA certificates to trust for server verification.
    pub cafile: Option<PathBuf>,
    /// Directory with CA certificates to trust for server verification.
    pub capath: Option<PathBuf>,
}

/// Server TLS configuration.
#[derive(Clone, Debug, Default)]
pub struct ServerTlsConfig {
    /// File with a server certificate chain in PEM format.
    pub certfile: Option<PathBuf>,
    /// File with a private key for the server certificate.
    pub keyfile: Option<PathBuf>,
}

impl ServerTlsConfig {
    /// Whether both a certificate and a key are configured.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.certfile.is_some() && self.keyfile.is_some()
    }
}
