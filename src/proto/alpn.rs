//! ALPN-based selection between TCP protocol factories.

use std::sync::Arc;

use crate::proto::{HttpOverTcpFactory, HttpOverTcpProtocol, ALPN_HTTP1};

/// A factory that selects between other factories based on ALPN.
///
/// The offered protocol list is the union of the inner factories' lists, in
/// insertion order with the first registration winning. When no ALPN was
/// negotiated (e.g. on a cleartext connection), a configurable default is
/// used, normally `http/1.1`.
pub struct AlpnHttpFactory {
    factories: Vec<(String, Arc<dyn HttpOverTcpFactory>)>,
    default_alpn_protocol: String,
}

impl AlpnHttpFactory {
    /// Composes the given factories, most preferred first.
    pub fn new(factories: Vec<Arc<dyn HttpOverTcpFactory>>) -> Self {
        let mut map: Vec<(String, Arc<dyn HttpOverTcpFactory>)> = Vec::new();
        for factory in factories {
            for alpn in factory.alpn_protocols() {
                if !map.iter().any(|(existing, _)| *existing == alpn) {
                    map.push((alpn, factory.clone()));
                }
            }
        }
        AlpnHttpFactory {
            factories: map,
            default_alpn_protocol: ALPN_HTTP1.to_string(),
        }
    }

    /// Overrides the protocol used when no ALPN was negotiated.
    pub fn with_default(mut self, alpn_protocol: &str) -> Self {
        self.default_alpn_protocol = alpn_protocol.to_string();
        self
    }

    fn select(&self, alpn_protocol: &str) -> Option<&Arc<dyn HttpOverTcpFactory>> {
        self.factories
            .iter()
            .find(|(alpn, _)| alpn == alpn_protocol)
            .map(|(_, factory)| factory)
    }
}

impl HttpOverTcpFactory for AlpnHttpFactory {
    fn alpn_protocols(&self) -> Vec<String> {
        self.factories.iter().map(|(alpn, _)| alpn.clone()).collect()
    }

    fn build(
        &self,
        tls_version: Option<&str>,
        alpn_protocol: Option<&str>,
    ) -> Box<dyn HttpOverTcpProtocol> {
        let negotiated = alpn_protocol.unwrap_or(&self.default_alpn_protocol);
        let factory = self.select(negotiated).unwrap_or_else(|| {
            tracing::warn!(alpn = negotiated, "no factory for the negotiated protocol");
            self.select(&self.default_alpn_protocol)
                .expect("the default protocol is always registered")
        });
        factory.build(tls_version, alpn_protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::h1::Http1ClientFactory;
    use crate::proto::h2::Http2ClientFactory;
    use crate::proto::{HttpProtocol, HttpVersion};

    fn factory() -> AlpnHttpFactory {
        AlpnHttpFactory::new(vec![
            Arc::new(Http2ClientFactory),
            Arc::new(Http1ClientFactory),
        ])
    }

    #[test]
    fn test_alpn_protocols_union() {
        assert_eq!(factory().alpn_protocols(), vec!["h2", "http/1.1"]);
    }

    #[test]
    fn test_selects_by_negotiated_protocol() {
        let protocol = factory().build(Some("TLSv1.3"), Some("h2"));
        assert_eq!(protocol.http_version(), HttpVersion::Http2);
    }

    #[test]
    fn test_falls_back_to_default() {
        let protocol = factory().build(None, None);
        assert_eq!(protocol.http_version(), HttpVersion::Http1);
    }
}
