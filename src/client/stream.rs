//! Per-stream state on the client side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use crate::conn::HttpConnection;
use crate::event::Event;
use crate::headers::HeaderList;
use crate::{Error, Result};

/// Inbound body chunks buffered per stream. The connection's dispatch task
/// blocks when a consumer lags, backpressuring the socket read loop.
const RECEIVE_BUFFER_CHUNKS: usize = 64;

struct RecvState {
    headers: Option<HeaderList>,
    terminated: bool,
}

/// The half of a stream shared with the connection's dispatch task.
pub(crate) struct StreamShared {
    state: parking_lot::Mutex<RecvState>,
    headers_notify: Notify,
    body_feeder: parking_lot::Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl StreamShared {
    fn feeder(&self) -> Option<mpsc::Sender<Bytes>> {
        self.body_feeder.lock().clone()
    }

    fn close_body(&self) {
        self.body_feeder.lock().take();
    }

    fn terminate(&self) {
        self.state.lock().terminated = true;
        self.headers_notify.notify_waiters();
        self.close_body();
    }

    /// Splits one inbound event into the stream's waiters and queues.
    pub(crate) async fn handle_event(&self, event: Event) {
        match event {
            Event::HeadersReceived {
                headers,
                end_stream,
                ..
            } => {
                self.state.lock().headers = Some(headers);
                self.headers_notify.notify_waiters();
                if end_stream {
                    self.close_body();
                }
            }
            Event::DataReceived {
                data, end_stream, ..
            } => {
                if let Some(feeder) = self.feeder() {
                    // A dropped receiver only means the caller lost interest
                    // in the body.
                    let _ = feeder.send(data).await;
                }
                if end_stream {
                    self.close_body();
                }
            }
            Event::StreamResetReceived { .. }
            | Event::StreamResetSent { .. }
            | Event::ConnectionTerminated { .. } => self.terminate(),
            Event::GoawayReceived { .. } => {}
        }
    }
}

/// One HTTP request/response exchange on a pooled connection.
///
/// Returned by [`ConnectionPool::open_stream`](super::ConnectionPool::open_stream)
/// with the request headers already sent.
pub struct FetchStream {
    connection: Arc<HttpConnection>,
    stream_id: u64,
    shared: Arc<StreamShared>,
    body_queue: AsyncMutex<mpsc::Receiver<Bytes>>,
    end_stream_sent: AtomicBool,
}

impl FetchStream {
    pub(crate) fn new(connection: Arc<HttpConnection>, stream_id: u64) -> (Self, Arc<StreamShared>) {
        let (feeder, queue) = mpsc::channel(RECEIVE_BUFFER_CHUNKS);
        let shared = Arc::new(StreamShared {
            state: parking_lot::Mutex::new(RecvState {
                headers: None,
                terminated: false,
            }),
            headers_notify: Notify::new(),
            body_feeder: parking_lot::Mutex::new(Some(feeder)),
        });
        let stream = FetchStream {
            connection,
            stream_id,
            shared: shared.clone(),
            body_queue: AsyncMutex::new(queue),
            end_stream_sent: AtomicBool::new(false),
        };
        (stream, shared)
    }

    /// The connection this stream lives on.
    pub fn connection(&self) -> &Arc<HttpConnection> {
        &self.connection
    }

    /// The stream id.
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Records that the initial headers already closed the send direction.
    pub(crate) fn mark_end_stream_sent(&self) {
        self.end_stream_sent.store(true, Ordering::SeqCst);
    }

    /// Sends a frame of body data.
    pub async fn send_data(&self, data: &[u8], end_stream: bool) -> Result<()> {
        if end_stream {
            self.end_stream_sent.store(true, Ordering::SeqCst);
        }
        self.connection
            .send_data(self.stream_id, data, end_stream)
            .await
    }

    /// Waits for the response headers.
    pub async fn receive_headers(&self) -> Result<HeaderList> {
        loop {
            let notified = self.shared.headers_notify.notified();
            {
                let state = self.shared.state.lock();
                if let Some(headers) = &state.headers {
                    return Ok(headers.clone());
                }
                if state.terminated {
                    return Err(Error::stream_closed(
                        "the stream was terminated before headers were received",
                    ));
                }
            }
            notified.await;
        }
    }

    /// Receives a chunk of body data.
    ///
    /// Returns `None` once the peer has closed the stream cleanly; fails
    /// when the stream was reset or the connection terminated.
    pub async fn receive_data(&self) -> Result<Option<Bytes>> {
        let chunk = self.body_queue.lock().await.recv().await;
        match chunk {
            Some(data) => Ok(Some(data)),
            None => {
                if self.shared.state.lock().terminated {
                    Err(Error::stream_closed("the stream was terminated"))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Closes the send direction if still open and detaches the stream.
    pub async fn close(&self) -> Result<()> {
        if !self.end_stream_sent.swap(true, Ordering::SeqCst) {
            self.send_data(b"", true).await?;
        }
        self.shared.terminate();
        Ok(())
    }
}
