//! The per-origin connection pool.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex as AsyncMutex;

use crate::client::stream::{FetchStream, StreamShared};
use crate::conn::{HttpConnection, HttpOpener};
use crate::event::Event;
use crate::{Header, Result};

/// One pooled connection plus the streams multiplexed on it.
pub(crate) struct ConnectionContext {
    connection: Arc<HttpConnection>,
    streams: parking_lot::Mutex<HashMap<u64, Arc<StreamShared>>>,
}

impl ConnectionContext {
    fn new(connection: HttpConnection) -> Self {
        ConnectionContext {
            connection: Arc::new(connection),
            streams: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn register_stream(&self, stream_id: u64) -> FetchStream {
        let (stream, shared) = FetchStream::new(self.connection.clone(), stream_id);
        self.streams.lock().insert(stream_id, shared);
        stream
    }

    /// Routes one event: stream events go to the owning stream, connection
    /// events are broadcast to every stream.
    async fn handle_event(&self, event: Event) {
        match event.stream_id() {
            Some(stream_id) => {
                let ends_stream = matches!(
                    &event,
                    Event::HeadersReceived {
                        end_stream: true, ..
                    } | Event::DataReceived {
                        end_stream: true, ..
                    } | Event::StreamResetReceived { .. }
                        | Event::StreamResetSent { .. }
                );
                let shared = self.streams.lock().get(&stream_id).cloned();
                match shared {
                    Some(shared) => shared.handle_event(event).await,
                    None => tracing::debug!(stream_id, "event for an unknown stream"),
                }
                if ends_stream {
                    self.streams.lock().remove(&stream_id);
                }
            }
            None => {
                let streams: Vec<_> = self.streams.lock().values().cloned().collect();
                for shared in streams {
                    shared.handle_event(event.clone()).await;
                }
            }
        }
    }
}

/// Maintains a pool of connections to one origin.
///
/// Multiplexed connections are shared; `open_stream` only dials when no
/// pooled connection can take another stream. A background task per
/// connection dispatches inbound events and drops the connection from the
/// pool once it terminates.
pub struct ConnectionPool {
    host: String,
    port: u16,
    tls: bool,
    opener: Arc<dyn HttpOpener>,
    connections: AsyncMutex<Vec<Arc<ConnectionContext>>>,
}

impl ConnectionPool {
    pub(crate) fn new(host: String, port: u16, tls: bool, opener: Arc<dyn HttpOpener>) -> Self {
        ConnectionPool {
            host,
            port,
            tls,
            opener,
            connections: AsyncMutex::new(Vec::new()),
        }
    }

    /// Opens a stream to the origin and sends the request headers on it.
    ///
    /// The pool lock is held across connection selection and the headers
    /// send, so two concurrent calls cannot both dial when a usable
    /// connection exists.
    pub async fn open_stream(
        self: &Arc<Self>,
        headers: &[Header],
        end_stream: bool,
    ) -> Result<FetchStream> {
        let mut connections = self.connections.lock().await;
        let mut picked = None;
        for context in connections.iter() {
            if context.connection.is_available().await {
                picked = Some(context.clone());
                break;
            }
        }
        let context = match picked {
            Some(context) => context,
            None => self.start_connection(&mut connections).await?,
        };
        let stream_id = context.connection.get_available_stream_id().await?;
        let stream = context.register_stream(stream_id);
        if end_stream {
            stream.mark_end_stream_sent();
        }
        context
            .connection
            .send_headers(stream_id, headers, end_stream)
            .await?;
        Ok(stream)
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        let connections: Vec<_> = self.connections.lock().await.clone();
        for context in connections {
            if let Err(e) = context.connection.close().await {
                tracing::debug!(error = %e, "closing a pooled connection failed");
            }
        }
    }

    async fn start_connection(
        self: &Arc<Self>,
        connections: &mut Vec<Arc<ConnectionContext>>,
    ) -> Result<Arc<ConnectionContext>> {
        let connection = self
            .opener
            .open(&self.host, self.port, self.tls, None)
            .await?;
        connection.open().await?;
        let context = Arc::new(ConnectionContext::new(connection));
        connections.push(context.clone());
        tokio::spawn(run_connection(Arc::downgrade(self), context.clone()));
        Ok(context)
    }
}

/// Dispatches inbound events for one pooled connection until it terminates,
/// then removes it from the pool.
async fn run_connection(pool: Weak<ConnectionPool>, context: Arc<ConnectionContext>) {
    loop {
        let event = context.connection.receive_event().await;
        let terminated = matches!(event, Event::ConnectionTerminated { .. });
        context.handle_event(event).await;
        if terminated {
            break;
        }
    }
    if let Some(pool) = pool.upgrade() {
        pool.connections
            .lock()
            .await
            .retain(|other| !Arc::ptr_eq(other, &context));
    }
}
