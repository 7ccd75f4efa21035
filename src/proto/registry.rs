//! Registry of named protocol implementations.
//!
//! The engine runs with the first-party state machines by default, but every
//! slot (clients and servers times three HTTP versions) accepts alternative
//! implementations registered under a name, so a binary can offer
//! `--http2-impl NAME` style switches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::proto::{
    h1, h2, h3, HttpOverQuicClientFactory, HttpOverQuicServerFactory, HttpOverTcpFactory,
};
use crate::{Error, Result};

/// Name under which the first-party implementations are registered.
pub const DEFAULT_IMPL: &str = "default";

/// Names of the registry entries to use, one per HTTP version.
#[derive(Clone, Debug)]
pub struct Implementations {
    /// HTTP/1 implementation name.
    pub http1: String,
    /// HTTP/2 implementation name.
    pub http2: String,
    /// HTTP/3 implementation name.
    pub http3: String,
}

impl Default for Implementations {
    fn default() -> Self {
        Implementations {
            http1: DEFAULT_IMPL.into(),
            http2: DEFAULT_IMPL.into(),
            http3: DEFAULT_IMPL.into(),
        }
    }
}

/// One of the six implementation slots of the registry.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Slot {
    /// HTTP/1 client implementations.
    Http1Clients,
    /// HTTP/2 client implementations.
    Http2Clients,
    /// HTTP/3 client implementations.
    Http3Clients,
    /// HTTP/1 server implementations.
    Http1Servers,
    /// HTTP/2 server implementations.
    Http2Servers,
    /// HTTP/3 server implementations.
    Http3Servers,
}

impl Slot {
    /// The slot name used in plugin descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Http1Clients => "http1_clients",
            Slot::Http2Clients => "http2_clients",
            Slot::Http3Clients => "http3_clients",
            Slot::Http1Servers => "http1_servers",
            Slot::Http2Servers => "http2_servers",
            Slot::Http3Servers => "http3_servers",
        }
    }
}

/// A factory reference carried by a plugin descriptor.
#[derive(Clone)]
pub enum PluginFactory {
    /// An HTTP/1 or HTTP/2 factory.
    OverTcp(Arc<dyn HttpOverTcpFactory>),
    /// An HTTP/3 client factory.
    QuicClient(Arc<dyn HttpOverQuicClientFactory>),
    /// An HTTP/3 server factory.
    QuicServer(Arc<dyn HttpOverQuicServerFactory>),
}

/// An externally discovered protocol implementation.
#[derive(Clone)]
pub struct PluginEntry {
    /// The slot the implementation plugs into.
    pub slot: Slot,
    /// The name it is registered under.
    pub name: String,
    /// The factory itself.
    pub factory: PluginFactory,
}

/// Registry of protocol implementations.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    http1_clients: HashMap<String, Arc<dyn HttpOverTcpFactory>>,
    http2_clients: HashMap<String, Arc<dyn HttpOverTcpFactory>>,
    http3_clients: HashMap<String, Arc<dyn HttpOverQuicClientFactory>>,
    http1_servers: HashMap<String, Arc<dyn HttpOverTcpFactory>>,
    http2_servers: HashMap<String, Arc<dyn HttpOverTcpFactory>>,
    http3_servers: HashMap<String, Arc<dyn HttpOverQuicServerFactory>>,
}

impl ProtocolRegistry {
    /// A registry with the first-party implementations loaded.
    pub fn with_defaults() -> Self {
        let mut registry = ProtocolRegistry::default();
        registry.load_defaults();
        registry
    }

    /// Registers the first-party implementations under `"default"`.
    pub fn load_defaults(&mut self) {
        self.http1_clients
            .insert(DEFAULT_IMPL.into(), Arc::new(h1::Http1ClientFactory));
        self.http2_clients
            .insert(DEFAULT_IMPL.into(), Arc::new(h2::Http2ClientFactory));
        self.http3_clients
            .insert(DEFAULT_IMPL.into(), Arc::new(h3::Http3ClientFactory::default()));
        self.http1_servers
            .insert(DEFAULT_IMPL.into(), Arc::new(h1::Http1ServerFactory));
        self.http2_servers
            .insert(DEFAULT_IMPL.into(), Arc::new(h2::Http2ServerFactory));
        self.http3_servers
            .insert(DEFAULT_IMPL.into(), Arc::new(h3::Http3ServerFactory::default()));
    }

    /// Registers externally discovered implementations.
    ///
    /// Fails when a descriptor carries a factory of the wrong kind for its
    /// slot; earlier entries of a failed batch stay registered.
    pub fn load_plugins(&mut self, entries: impl IntoIterator<Item = PluginEntry>) -> Result<()> {
        for entry in entries {
            let PluginEntry {
                slot,
                name,
                factory,
            } = entry;
            match (slot, factory) {
                (Slot::Http1Clients, PluginFactory::OverTcp(factory)) => {
                    self.http1_clients.insert(name, factory);
                }
                (Slot::Http2Clients, PluginFactory::OverTcp(factory)) => {
                    self.http2_clients.insert(name, factory);
                }
                (Slot::Http3Clients, PluginFactory::QuicClient(factory)) => {
                    self.http3_clients.insert(name, factory);
                }
                (Slot::Http1Servers, PluginFactory::OverTcp(factory)) => {
                    self.http1_servers.insert(name, factory);
                }
                (Slot::Http2Servers, PluginFactory::OverTcp(factory)) => {
                    self.http2_servers.insert(name, factory);
                }
                (Slot::Http3Servers, PluginFactory::QuicServer(factory)) => {
                    self.http3_servers.insert(name, factory);
                }
                (slot, _) => {
                    return Err(Error::invalid_input(format!(
                        "plugin {name:?} does not fit slot {}",
                        slot.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Looks up an HTTP/1 client implementation by name.
    pub fn http1_client(&self, name: &str) -> Result<Arc<dyn HttpOverTcpFactory>> {
        lookup(&self.http1_clients, Slot::Http1Clients, name)
    }

    /// Looks up an HTTP/2 client implementation by name.
    pub fn http2_client(&self, name: &str) -> Result<Arc<dyn HttpOverTcpFactory>> {
        lookup(&self.http2_clients, Slot::Http2Clients, name)
    }

    /// Looks up an HTTP/3 client implementation by name.
    pub fn http3_client(&self, name: &str) -> Result<Arc<dyn HttpOverQuicClientFactory>> {
        lookup(&self.http3_clients, Slot::Http3Clients, name)
    }

    /// Looks up an HTTP/1 server implementation by name.
    pub fn http1_server(&self, name: &str) -> Result<Arc<dyn HttpOverTcpFactory>> {
        lookup(&self.http1_servers, Slot::Http1Servers, name)
    }

    /// Looks up an HTTP/2 server implementation by name.
    pub fn http2_server(&self, name: &str) -> Result<Arc<dyn HttpOverTcpFactory>> {
        lookup(&self.http2_servers, Slot::Http2Servers, name)
    }

    /// Looks up an HTTP/3 server implementation by name.
    pub fn http3_server(&self, name: &str) -> Result<Arc<dyn HttpOverQuicServerFactory>> {
        lookup(&self.http3_servers, Slot::Http3Servers, name)
    }
}

fn lookup<T: ?Sized>(
    map: &HashMap<String, Arc<T>>,
    slot: Slot,
    name: &str,
) -> Result<Arc<T>> {
    map.get(name).cloned().ok_or_else(|| {
        Error::usage(format!(
            "no implementation named {name:?} in slot {}",
            slot.as_str()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_every_slot() {
        let registry = ProtocolRegistry::with_defaults();
        assert!(registry.http1_client(DEFAULT_IMPL).is_ok());
        assert!(registry.http2_client(DEFAULT_IMPL).is_ok());
        assert!(registry.http3_client(DEFAULT_IMPL).is_ok());
        assert!(registry.http1_server(DEFAULT_IMPL).is_ok());
        assert!(registry.http2_server(DEFAULT_IMPL).is_ok());
        assert!(registry.http3_server(DEFAULT_IMPL).is_ok());
    }

    #[test]
    fn test_unknown_name() {
        let registry = ProtocolRegistry::with_defaults();
        assert!(registry.http2_client("missing").is_err());
    }

    #[test]
    fn test_plugin_slot_mismatch() {
        let mut registry = ProtocolRegistry::with_defaults();
        let entry = PluginEntry {
            slot: Slot::Http3Clients,
            name: "bogus".into(),
            factory: PluginFactory::OverTcp(Arc::new(crate::proto::h1::Http1ClientFactory)),
        };
        assert!(registry.load_plugins([entry]).is_err());
    }

    #[test]
    fn test_plugin_registration() {
        let mut registry = ProtocolRegistry::with_defaults();
        let entry = PluginEntry {
            slot: Slot::Http1Clients,
            name: "alternate".into(),
            factory: PluginFactory::OverTcp(Arc::new(crate::proto::h1::Http1ClientFactory)),
        };
        registry.load_plugins([entry]).unwrap();
        assert!(registry.http1_client("alternate").is_ok());
    }
}
