//! The gateway server: hands inbound HTTP streams to an application.
//!
//! One [`ConnectionController`] per connection consumes events in order and
//! routes them to per-stream controllers; stream ids are never reused. One
//! stream controller per inbound stream spawns the application once headers
//! arrive, forwards body frames as request messages, and contains
//! application failures: a plain-text 500 if nothing was sent yet, a stream
//! reset with `internal_error` once headers are on the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::conn::HttpConnection;
use crate::event::Event;
use crate::headers::{is_pseudo, lowercase, HeaderList};
use crate::proto::HttpVersion;
use crate::{Error, Result};

const REQUEST_BUFFER_CHUNKS: usize = 64;

/// The request context handed to a [`Gateway`].
#[derive(Clone, Debug)]
pub struct Scope {
    /// HTTP method.
    pub method: String,
    /// URL scheme, `"http"` or `"https"`.
    pub scheme: String,
    /// Authority (host and optional port) the request was addressed to.
    pub authority: String,
    /// Path including the query string.
    pub path: String,
    /// The HTTP version of the connection.
    pub http_version: HttpVersion,
    /// Regular headers, with the authority translated to a leading `host`.
    pub headers: HeaderList,
    /// Address of the requesting peer.
    pub client: SocketAddr,
    /// Address the connection was accepted on.
    pub server: SocketAddr,
}

/// A message of the request body channel.
#[derive(Clone, Debug)]
pub enum RequestMessage {
    /// A chunk of the request body. `more` is false on the last chunk.
    Body {
        /// The chunk payload, possibly empty.
        data: Bytes,
        /// Whether more body follows.
        more: bool,
    },
    /// The stream or connection went away; no response can be delivered.
    Disconnect,
}

/// The application's receiving end of the request body.
pub struct RequestReceiver {
    queue: mpsc::Receiver<RequestMessage>,
}

impl RequestReceiver {
    /// Receives the next request message.
    pub async fn receive(&mut self) -> RequestMessage {
        self.queue.recv().await.unwrap_or(RequestMessage::Disconnect)
    }
}

#[derive(Default)]
struct ResponseState {
    headers: Option<HeaderList>,
    headers_sent: bool,
    end_sent: bool,
}

/// The application's sending end of the response.
///
/// Response headers are buffered until the first body message, which lets
/// an empty-body response collapse into a single frame with `end_stream`.
#[derive(Clone)]
pub struct ResponseSender {
    connection: Arc<HttpConnection>,
    stream_id: u64,
    state: Arc<parking_lot::Mutex<ResponseState>>,
}

impl ResponseSender {
    /// Stages the response status and headers.
    pub fn start(&self, status: u16, headers: HeaderList) -> Result<()> {
        let mut state = self.state.lock();
        if state.headers.is_some() || state.headers_sent {
            return Err(Error::usage("the response was already started"));
        }
        let mut staged: HeaderList = Vec::with_capacity(headers.len() + 1);
        staged.push((
            Bytes::from_static(b":status"),
            Bytes::from(status.to_string()),
        ));
        for (name, value) in headers {
            staged.push((lowercase(&name), value));
        }
        state.headers = Some(staged);
        Ok(())
    }

    /// Sends a chunk of the response body. `more` is false on the last one.
    ///
    /// The first call flushes the staged headers. Calls after the final
    /// chunk are dropped with a warning.
    pub async fn body(&self, data: &[u8], more: bool) -> Result<()> {
        let flush_headers = {
            let mut state = self.state.lock();
            if state.end_sent {
                tracing::warn!("response body message for a completed response");
                return Ok(());
            }
            if state.headers_sent {
                None
            } else {
                let headers = state
                    .headers
                    .take()
                    .ok_or_else(|| Error::usage("response body before the response start"))?;
                // An empty final body fits into the headers frame.
                let end_stream = !more && data.is_empty();
                state.headers_sent = true;
                state.end_sent = end_stream;
                Some((headers, end_stream))
            }
        };
        if let Some((headers, end_stream)) = flush_headers {
            self.connection
                .send_headers(self.stream_id, &headers, end_stream)
                .await?;
            if end_stream {
                return Ok(());
            }
        }
        if !data.is_empty() || !more {
            self.state.lock().end_sent = !more;
            self.connection.send_data(self.stream_id, data, !more).await?;
        }
        Ok(())
    }
}

/// The application boundary of the gateway server.
///
/// A gateway receives one call per HTTP request; the request body arrives
/// through `request`, the response leaves through `response`. Returning an
/// error (or returning without completing the response) makes the
/// dispatcher synthesize an error response or reset the stream.
#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    /// Handles one HTTP request.
    async fn handle(
        &self,
        scope: Scope,
        request: RequestReceiver,
        response: ResponseSender,
    ) -> Result<()>;
}

fn headers_to_scope(
    headers: &HeaderList,
    connection: &HttpConnection,
) -> Result<Scope> {
    let mut method = None;
    let mut scheme = None;
    let mut authority: Option<Bytes> = None;
    let mut path = None;
    let mut regular: HeaderList = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let name = lowercase(name);
        match name.as_ref() {
            b":method" => method = Some(value.clone()),
            b":scheme" => scheme = Some(value.clone()),
            b":path" => path = Some(value.clone()),
            b":authority" | b"host" => match &authority {
                // The authority is surfaced as a leading host header; any
                // host header must agree with it.
                None => {
                    authority = Some(value.clone());
                    regular.push((Bytes::from_static(b"host"), value.clone()));
                }
                Some(previous) if previous != value => {
                    return Err(Error::invalid_input("the request host is ambiguous"));
                }
                Some(_) => {}
            },
            _ if is_pseudo(&name) => {
                return Err(Error::invalid_input(format!(
                    "unexpected request header: {}",
                    String::from_utf8_lossy(&name)
                )));
            }
            _ => regular.push((name, value.clone())),
        }
    }
    let method = method.ok_or_else(|| Error::invalid_input("missing request header: :method"))?;
    let path = path.ok_or_else(|| Error::invalid_input("missing request header: :path"))?;
    Ok(Scope {
        method: String::from_utf8_lossy(&method).into_owned(),
        scheme: String::from_utf8_lossy(scheme.as_deref().unwrap_or(b"http")).into_owned(),
        authority: String::from_utf8_lossy(authority.as_deref().unwrap_or_default()).into_owned(),
        path: String::from_utf8_lossy(&path).into_owned(),
        http_version: connection.http_version(),
        headers: regular,
        client: connection.remote_addr(),
        server: connection.local_addr(),
    })
}

/// Maintains one HTTP stream, handling one HTTP request.
struct StreamController {
    feeder: mpsc::Sender<RequestMessage>,
}

impl StreamController {
    fn start(
        connection: &Arc<HttpConnection>,
        connection_id: u64,
        stream_id: u64,
        app: &Arc<dyn Gateway>,
        headers: &HeaderList,
    ) -> StreamController {
        let (feeder, queue) = mpsc::channel(REQUEST_BUFFER_CHUNKS);
        let sender = ResponseSender {
            connection: connection.clone(),
            stream_id,
            state: Arc::new(parking_lot::Mutex::new(ResponseState::default())),
        };
        match headers_to_scope(headers, connection) {
            Ok(scope) => {
                let app = app.clone();
                let receiver = RequestReceiver { queue };
                tokio::spawn(run_app(
                    app,
                    scope,
                    receiver,
                    sender,
                    connection_id,
                    stream_id,
                ));
            }
            Err(e) => {
                tracing::warn!(
                    connection_id,
                    stream_id,
                    error = %e,
                    "rejecting a request with an unusable header set"
                );
                // The queue receiver is dropped here; body messages for the
                // stream are discarded.
                tokio::spawn(send_rejection(sender, e));
            }
        }
        StreamController { feeder }
    }

    async fn handle_event(&self, event: Event) {
        let message = match event {
            Event::HeadersReceived {
                end_stream: true, ..
            } => Some(RequestMessage::Body {
                data: Bytes::new(),
                more: false,
            }),
            Event::HeadersReceived { .. } => None,
            Event::DataReceived {
                data, end_stream, ..
            } => Some(RequestMessage::Body {
                data,
                more: !end_stream,
            }),
            Event::StreamResetReceived { .. }
            | Event::StreamResetSent { .. }
            | Event::ConnectionTerminated { .. } => Some(RequestMessage::Disconnect),
            Event::GoawayReceived { .. } => None,
        };
        if let Some(message) = message {
            // A dropped receiver means the application is done with the
            // request body.
            let _ = self.feeder.send(message).await;
        }
    }
}

async fn run_app(
    app: Arc<dyn Gateway>,
    scope: Scope,
    receiver: RequestReceiver,
    sender: ResponseSender,
    connection_id: u64,
    stream_id: u64,
) {
    tracing::info!(connection_id, stream_id, "gateway application will run");
    let result = app
        .handle(scope, receiver, sender.clone())
        .await
        .and_then(|()| {
            let state = sender.state.lock();
            if !state.headers_sent {
                Err(Error::usage("the gateway finished without sending a response"))
            } else if !state.end_sent {
                Err(Error::usage(
                    "the gateway finished without completing its response",
                ))
            } else {
                Ok(())
            }
        });
    match result {
        Ok(()) => {
            tracing::info!(connection_id, stream_id, "gateway application finished");
        }
        Err(e) => {
            tracing::error!(connection_id, stream_id, error = %e, "gateway application failed");
            send_error(&sender, &e).await;
        }
    }
}

async fn send_rejection(sender: ResponseSender, error: Error) {
    let content = format!("{error}\r\n");
    let headers = vec![
        (Bytes::from_static(b"content-type"), Bytes::from_static(b"text/plain")),
        (
            Bytes::from_static(b"content-length"),
            Bytes::from(content.len().to_string()),
        ),
    ];
    if sender.start(400, headers).is_ok() {
        let _ = sender.body(content.as_bytes(), false).await;
    }
}

/// Reports an application failure to the client.
///
/// Sending the error text in a 500 is meant for development and testing;
/// once headers are out, the stream is reset instead.
async fn send_error(sender: &ResponseSender, error: &Error) {
    let (headers_sent, end_sent) = {
        let state = sender.state.lock();
        (state.headers_sent, state.end_sent)
    };
    if end_sent {
        // The complete response is out; the client will not notice anything.
        return;
    }
    if headers_sent {
        let error_code = sender.connection.error_codes().internal_error;
        let _ = sender
            .connection
            .send_stream_reset(sender.stream_id, error_code)
            .await;
        return;
    }
    let mut content = format!("{error}\r\n");
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        content.push_str(&format!("caused by: {cause}\r\n"));
        source = cause.source();
    }
    let _ = sender
        .connection
        .send_headers(
            sender.stream_id,
            &[
                (Bytes::from_static(b":status"), Bytes::from_static(b"500")),
                (Bytes::from_static(b"content-type"), Bytes::from_static(b"text/plain")),
                (
                    Bytes::from_static(b"content-length"),
                    Bytes::from(content.len().to_string()),
                ),
            ],
            false,
        )
        .await;
    let _ = sender
        .connection
        .send_data(sender.stream_id, content.as_bytes(), true)
        .await;
}

/// Maintains one HTTP connection, possibly consisting of multiple streams.
struct ConnectionController {
    connection: Arc<HttpConnection>,
    connection_id: u64,
    app: Arc<dyn Gateway>,
    streams: HashMap<u64, StreamController>,
    terminated: bool,
}

impl ConnectionController {
    async fn run(&mut self) {
        tracing::info!(
            connection_id = self.connection_id,
            local_addr = %self.connection.local_addr(),
            remote_addr = %self.connection.remote_addr(),
            "serving connection"
        );
        while !self.terminated {
            let event = self.connection.receive_event().await;
            self.handle_event(event).await;
        }
        tracing::info!(connection_id = self.connection_id, "done serving connection");
    }

    async fn handle_event(&mut self, event: Event) {
        match event.stream_id() {
            Some(stream_id) => {
                if let Event::HeadersReceived { headers, .. } = &event {
                    // Stream ids are never reused; the first HEADERS creates
                    // the stream's controller.
                    self.streams.entry(stream_id).or_insert_with(|| {
                        StreamController::start(
                            &self.connection,
                            self.connection_id,
                            stream_id,
                            &self.app,
                            headers,
                        )
                    });
                }
                match self.streams.get(&stream_id) {
                    Some(controller) => controller.handle_event(event).await,
                    None => tracing::debug!(stream_id, "event for an unknown stream"),
                }
            }
            None => {
                if matches!(event, Event::ConnectionTerminated { .. }) {
                    self.terminated = true;
                }
                for controller in self.streams.values() {
                    controller.handle_event(event.clone()).await;
                }
            }
        }
    }
}

/// Serves one accepted connection with the given gateway.
pub(crate) async fn handle_connection(
    connection: HttpConnection,
    connection_id: u64,
    app: Arc<dyn Gateway>,
) {
    let connection = Arc::new(connection);
    if let Err(e) = connection.open().await {
        tracing::warn!(connection_id, error = %e, "failed to open the connection");
        return;
    }
    let mut controller = ConnectionController {
        connection: connection.clone(),
        connection_id,
        app,
        streams: HashMap::new(),
        terminated: false,
    };
    controller.run().await;
    let _ = connection.close().await;
}
