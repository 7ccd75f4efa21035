//! Version-agnostic HTTP engine.
//!
//! `trident` puts HTTP/1.1, HTTP/2, and HTTP/3 behind a single connection
//! abstraction. The heart of the crate is sans-I/O: three protocol state
//! machines (one per HTTP version) driven purely by method calls on byte and
//! datagram buffers, lifted into a unified event model. Around that core sit
//! thin tokio drivers, a QUIC connection-id demultiplexer for sharing one
//! UDP socket between connections, a client-side connection pool, and a
//! server-side stream dispatcher with CONNECT tunneling.
//!
//! # Layers
//!
//! | Module | Responsibility |
//! | --- | --- |
//! | [`proto`] | Sans-I/O state machines, factories, ALPN selection, registry |
//! | [`conn`] | Drivers, the connection facade, openers, listeners, QUIC demux |
//! | [`client`] | Per-origin connection pool, request dispatch, proxy client |
//! | [`server`] | Gateway and proxy servers built on the stream dispatcher |
//! | [`cli`] | The `trident` command-line front-end |
//!
//! # Example
//!
//! ```no_run
//! use trident::client::{Client, Request};
//!
//! # async fn run() -> trident::Result<()> {
//! let client = Client::new();
//! let session = client.session()?;
//! let response = session.dispatch(Request::get("https://example.com")?).await?;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod conn;
pub mod proto;
pub mod server;

mod config;
mod error;
mod event;
pub mod headers;

pub use self::config::{ClientTlsConfig, ServerTlsConfig};
pub use self::error::{BoxedError, Error};
pub use self::event::Event;
pub use self::headers::{Header, HeaderList};
pub use self::proto::{ErrorCodes, HttpVersion};

/// Result type which has [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;
