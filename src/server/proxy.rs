//! The CONNECT-tunnel proxy server.
//!
//! Each inbound stream is expected to carry a CONNECT request. On success
//! the proxy answers `:status 200` and pumps bytes between the HTTP stream
//! and a TCP connection to the requested origin; when one side dies before
//! the other reaches a natural close, the stream is reset with
//! `connect_error`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::conn::HttpConnection;
use crate::event::Event;
use crate::headers::{find, HeaderList};

const TUNNEL_BUFFER_CHUNKS: usize = 64;
const TUNNEL_READ_SIZE: usize = 16 * 1024;

enum TunnelMessage {
    Data(Bytes),
    End,
}

/// Maintains one HTTP stream carrying (hopefully) a CONNECT request.
struct StreamController {
    feeder: mpsc::Sender<TunnelMessage>,
    client_cancel: CancellationToken,
}

impl StreamController {
    fn start(
        connection: &Arc<HttpConnection>,
        connection_id: u64,
        stream_id: u64,
        headers: HeaderList,
    ) -> StreamController {
        let (feeder, queue) = mpsc::channel(TUNNEL_BUFFER_CHUNKS);
        let client_cancel = CancellationToken::new();
        tokio::spawn(run_tunnel(
            connection.clone(),
            connection_id,
            stream_id,
            headers,
            queue,
            client_cancel.clone(),
        ));
        StreamController {
            feeder,
            client_cancel,
        }
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::HeadersReceived {
                end_stream: true, ..
            } => {
                let _ = self.feeder.send(TunnelMessage::End).await;
            }
            Event::HeadersReceived { .. } => {}
            Event::DataReceived {
                data, end_stream, ..
            } => {
                if !data.is_empty() {
                    let _ = self.feeder.send(TunnelMessage::Data(data)).await;
                }
                if end_stream {
                    let _ = self.feeder.send(TunnelMessage::End).await;
                }
            }
            Event::StreamResetReceived { .. }
            | Event::StreamResetSent { .. }
            | Event::ConnectionTerminated { .. } => self.client_cancel.cancel(),
            Event::GoawayReceived { .. } => {}
        }
    }
}

fn parse_connect(headers: &HeaderList) -> (Option<&[u8]>, Option<&[u8]>) {
    (find(headers, b":method"), find(headers, b":authority"))
}

async fn run_tunnel(
    connection: Arc<HttpConnection>,
    connection_id: u64,
    stream_id: u64,
    headers: HeaderList,
    mut queue: mpsc::Receiver<TunnelMessage>,
    client_cancel: CancellationToken,
) {
    if client_cancel.is_cancelled() {
        tracing::info!(
            connection_id,
            stream_id,
            "terminated by the client before its request was processed"
        );
        return;
    }
    let origin_cancel = CancellationToken::new();
    tokio::select! {
        _ = client_cancel.cancelled() => {
            tracing::info!(connection_id, stream_id, "the tunnel was terminated by the client");
        }
        _ = tunnel_body(
            &connection,
            connection_id,
            stream_id,
            &headers,
            &mut queue,
            &origin_cancel,
        ) => {
            if origin_cancel.is_cancelled() {
                tracing::info!(connection_id, stream_id, "the tunnel was terminated by the origin");
            } else {
                tracing::info!(
                    connection_id,
                    stream_id,
                    "gracefully closed by both the client and the origin"
                );
            }
        }
    }
}

async fn tunnel_body(
    connection: &Arc<HttpConnection>,
    connection_id: u64,
    stream_id: u64,
    headers: &HeaderList,
    queue: &mut mpsc::Receiver<TunnelMessage>,
    origin_cancel: &CancellationToken,
) {
    let (method, authority) = parse_connect(headers);
    if method != Some(b"CONNECT".as_slice()) {
        send_error(connection, connection_id, stream_id, 405, "Method not allowed.").await;
        return;
    }
    let target = authority
        .and_then(|authority| std::str::from_utf8(authority).ok())
        .and_then(|authority| authority.rsplit_once(':'))
        .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host.to_string(), port)));
    let (host, port) = match target {
        Some(target) => target,
        None => {
            send_error(connection, connection_id, stream_id, 400, "Invalid authority.").await;
            return;
        }
    };
    let socket = match TcpStream::connect((host.as_str(), port)).await {
        Ok(socket) => socket,
        Err(_) => {
            send_error(connection, connection_id, stream_id, 502, "Connection failed.").await;
            return;
        }
    };
    if connection
        .send_headers(
            stream_id,
            &[(Bytes::from_static(b":status"), Bytes::from_static(b"200"))],
            false,
        )
        .await
        .is_err()
    {
        return;
    }
    tracing::info!(
        connection_id,
        stream_id,
        origin = %format!("{host}:{port}"),
        "CONNECT request succeeded, a tunnel was established"
    );

    let (mut origin_read, mut origin_write) = socket.into_split();

    let upload = async {
        loop {
            let message = tokio::select! {
                _ = origin_cancel.cancelled() => break,
                message = queue.recv() => message,
            };
            match message {
                Some(TunnelMessage::Data(data)) => {
                    if origin_write.write_all(&data).await.is_err() {
                        origin_cancel.cancel();
                        break;
                    }
                }
                Some(TunnelMessage::End) | None => {
                    let _ = origin_write.shutdown().await;
                    tracing::debug!(
                        connection_id,
                        stream_id,
                        "client EOF; sent EOF to the origin and stopped uploading"
                    );
                    break;
                }
            }
        }
    };
    let download = async {
        let mut buf = vec![0u8; TUNNEL_READ_SIZE];
        loop {
            let read = tokio::select! {
                _ = origin_cancel.cancelled() => break,
                read = origin_read.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    let _ = connection.send_data(stream_id, b"", true).await;
                    tracing::debug!(
                        connection_id,
                        stream_id,
                        "origin EOF; sent EOF to the client and stopped downloading"
                    );
                    break;
                }
                Ok(received) => {
                    if connection
                        .send_data(stream_id, &buf[..received], false)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(_) => {
                    origin_cancel.cancel();
                    break;
                }
            }
        }
    };
    tokio::join!(upload, download);

    if origin_cancel.is_cancelled() {
        let error_code = connection.error_codes().connect_error;
        let _ = connection.send_stream_reset(stream_id, error_code).await;
    }
}

async fn send_error(
    connection: &Arc<HttpConnection>,
    connection_id: u64,
    stream_id: u64,
    status: u16,
    message: &str,
) {
    let headers = vec![
        (
            Bytes::from_static(b":status"),
            Bytes::from(status.to_string()),
        ),
        (
            Bytes::from_static(b"content-length"),
            Bytes::from(message.len().to_string()),
        ),
        (
            Bytes::from_static(b"content-type"),
            Bytes::from_static(b"text/plain; charset=UTF-8"),
        ),
    ];
    let _ = connection.send_headers(stream_id, &headers, false).await;
    let _ = connection
        .send_data(stream_id, message.as_bytes(), true)
        .await;
    tracing::warn!(
        connection_id,
        stream_id,
        status,
        message,
        "CONNECT request failed"
    );
}

/// Maintains one HTTP connection, possibly consisting of multiple tunnels.
struct ConnectionController {
    connection: Arc<HttpConnection>,
    connection_id: u64,
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
                    let connection = &self.connection;
                    let connection_id = self.connection_id;
                    self.streams.entry(stream_id).or_insert_with(|| {
                        StreamController::start(
                            connection,
                            connection_id,
                            stream_id,
                            headers.clone(),
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

/// Serves one accepted connection in proxy mode.
pub(crate) async fn handle_connection(connection: HttpConnection, connection_id: u64) {
    let connection = Arc::new(connection);
    if let Err(e) = connection.open().await {
        tracing::warn!(connection_id, error = %e, "failed to open the connection");
        return;
    }
    let mut controller = ConnectionController {
        connection: connection.clone(),
        connection_id,
        streams: HashMap::new(),
        terminated: false,
    };
    controller.run().await;
    let _ = connection.close().await;
}
