//! The unified event model shared by all protocol versions.

use bytes::Bytes;

use crate::headers::HeaderList;

/// An event produced by a protocol state machine.
///
/// Stream events carry a `stream_id`; connection events do not. Events are
/// consumed in production order through
/// [`HttpConnection::receive_event`](crate::conn::HttpConnection::receive_event)
/// or [`next_event`](crate::proto::HttpProtocol::next_event).
#[derive(Clone, Debug)]
pub enum Event {
    /// A frame with HTTP headers was received.
    HeadersReceived {
        /// Stream ID.
        stream_id: u64,
        /// The received HTTP headers.
        headers: HeaderList,
        /// Signals that no more data will be sent by the peer over the stream.
        end_stream: bool,
    },
    /// A frame with HTTP data was received.
    DataReceived {
        /// Stream ID.
        stream_id: u64,
        /// The received data.
        data: Bytes,
        /// Signals that no more data will be sent by the peer over the stream.
        end_stream: bool,
    },
    /// One stream of an HTTP connection was reset by the peer.
    StreamResetReceived {
        /// Stream ID.
        stream_id: u64,
        /// Reason for closing the stream.
        error_code: u64,
    },
    /// One stream of an HTTP connection was reset by us.
    ///
    /// This can be explicitly requested, or a protocol implementation can
    /// send the reset when a peer misbehaves.
    StreamResetSent {
        /// Stream ID.
        stream_id: u64,
        /// Reason for closing the stream.
        error_code: u64,
    },
    /// A GOAWAY frame was received.
    ///
    /// A server can send GOAWAY for graceful shutdown: clients stop opening
    /// new streams, but in-flight exchanges can still complete. This is
    /// distinct from [`Event::ConnectionTerminated`].
    GoawayReceived {
        /// Highest stream ID that could be processed.
        last_stream_id: u64,
        /// Reason for closing the connection.
        error_code: u64,
    },
    /// The connection was terminated.
    ConnectionTerminated {
        /// Reason for closing the connection.
        error_code: u64,
        /// Optional free-form diagnostic text. Ignored by equality.
        message: Option<String>,
    },
}

impl Event {
    /// The stream this event belongs to, or `None` for connection events.
    pub fn stream_id(&self) -> Option<u64> {
        match self {
            Event::HeadersReceived { stream_id, .. }
            | Event::DataReceived { stream_id, .. }
            | Event::StreamResetReceived { stream_id, .. }
            | Event::StreamResetSent { stream_id, .. } => Some(*stream_id),
            Event::GoawayReceived { .. } | Event::ConnectionTerminated { .. } => None,
        }
    }

    pub(crate) fn connection_terminated(error_code: u64) -> Self {
        Event::ConnectionTerminated {
            error_code,
            message: None,
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        use Event::*;
        match (self, other) {
            (
                HeadersReceived {
                    stream_id: a,
                    headers: h,
                    end_stream: e,
                },
                HeadersReceived {
                    stream_id: b,
                    headers: i,
                    end_stream: f,
                },
            ) => a == b && h == i && e == f,
            (
                DataReceived {
                    stream_id: a,
                    data: d,
                    end_stream: e,
                },
                DataReceived {
                    stream_id: b,
                    data: c,
                    end_stream: f,
                },
            ) => a == b && d == c && e == f,
            (
                StreamResetReceived {
                    stream_id: a,
                    error_code: x,
                },
                StreamResetReceived {
                    stream_id: b,
                    error_code: y,
                },
            )
            | (
                StreamResetSent {
                    stream_id: a,
                    error_code: x,
                },
                StreamResetSent {
                    stream_id: b,
                    error_code: y,
                },
            )
            | (
                GoawayReceived {
                    last_stream_id: a,
                    error_code: x,
                },
                GoawayReceived {
                    last_stream_id: b,
                    error_code: y,
                },
            ) => a == b && x == y,
            // The message is free-form diagnostic text, not part of identity.
            (
                ConnectionTerminated { error_code: x, .. },
                ConnectionTerminated { error_code: y, .. },
            ) => x == y,
            _ => false,
        }
    }
}

impl Eq for Event {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_equality_ignores_message() {
        let a = Event::ConnectionTerminated {
            error_code: 1,
            message: Some("parse failed".into()),
        };
        let b = Event::ConnectionTerminated {
            error_code: 1,
            message: None,
        };
        assert_eq!(a, b);
        assert_ne!(a, Event::connection_terminated(0));
    }

    #[test]
    fn test_stream_id() {
        let event = Event::DataReceived {
            stream_id: 7,
            data: Bytes::from_static(b"x"),
            end_stream: false,
        };
        assert_eq!(event.stream_id(), Some(7));
        assert_eq!(Event::connection_terminated(0).stream_id(), None);
    }
}
