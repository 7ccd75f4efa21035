//! The HTTP/2 state machine.
//!
//! Frames are parsed and serialized by [`frame`]; HPACK coding is delegated
//! to the `hpack` crate. Header validation is disabled in both directions so
//! that CONNECT requests, which lack `:scheme` and `:path`, pass through
//! unharmed.

use std::collections::{BTreeMap, VecDeque};

use bytes::{Buf, Bytes, BytesMut};

use crate::event::Event;
use crate::headers::{lowercase, HeaderList};
use crate::proto::{
    HttpOverTcpFactory, HttpOverTcpProtocol, HttpProtocol, HttpVersion, Role, ALPN_H2,
};
use crate::{Error, Header, Result};

mod frame;

use frame::Frame;

/// Settings advertised to the peer on connection open.
const LOCAL_SETTINGS: &[(u16, u32)] = &[
    (frame::SETTINGS_HEADER_TABLE_SIZE, 4096),
    (frame::SETTINGS_ENABLE_PUSH, 0),
    (frame::SETTINGS_MAX_CONCURRENT_STREAMS, 100),
    (frame::SETTINGS_INITIAL_WINDOW_SIZE, frame::DEFAULT_WINDOW_SIZE),
    (frame::SETTINGS_MAX_FRAME_SIZE, frame::DEFAULT_MAX_FRAME_SIZE as u32),
    (frame::SETTINGS_MAX_HEADER_LIST_SIZE, 65_536),
];

/// A WINDOW_UPDATE is sent once this much inbound data is unacknowledged.
const WINDOW_UPDATE_THRESHOLD: u32 = frame::DEFAULT_WINDOW_SIZE / 2;

#[derive(Default)]
struct StreamState {
    send_window: i64,
    recv_unacked: u32,
    recv_headers_seen: bool,
    recv_closed: bool,
    send_closed: bool,
    reset: bool,
    /// Data waiting for send-window capacity, one entry per submitted frame.
    pending: VecDeque<(Bytes, bool)>,
}

struct PendingHeaderBlock {
    stream_id: u32,
    end_stream: bool,
    fragments: BytesMut,
}

/// Sans-IO representation of an HTTP/2 connection.
pub struct Http2Protocol {
    role: Role,
    in_buf: BytesMut,
    out: BytesMut,
    events: VecDeque<Event>,
    terminated: bool,
    encoder: hpack::Encoder<'static>,
    decoder: hpack::Decoder<'static>,
    /// Bytes of the client magic still expected (server role only).
    magic_remaining: usize,
    peer_settings_received: bool,
    pending_headers: Option<PendingHeaderBlock>,
    streams: BTreeMap<u32, StreamState>,
    next_local_stream_id: u32,
    highest_peer_stream_id: u32,
    send_window: i64,
    peer_initial_window: u32,
    max_send_frame: usize,
    recv_unacked: u32,
}

impl Http2Protocol {
    /// Creates a protocol instance for one connection.
    ///
    /// The client magic (clients) and an initial SETTINGS frame (both roles)
    /// are queued immediately; the first [`bytes_to_send`] drains them.
    ///
    /// [`bytes_to_send`]: HttpOverTcpProtocol::bytes_to_send
    pub fn new(role: Role) -> Self {
        let mut out = BytesMut::new();
        if role == Role::Client {
            out.extend_from_slice(frame::CLIENT_MAGIC);
        }
        frame::write_settings(&mut out, false, LOCAL_SETTINGS);
        Http2Protocol {
            role,
            in_buf: BytesMut::new(),
            out,
            events: VecDeque::new(),
            terminated: false,
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            magic_remaining: if role == Role::Server {
                frame::CLIENT_MAGIC.len()
            } else {
                0
            },
            peer_settings_received: false,
            pending_headers: None,
            streams: BTreeMap::new(),
            next_local_stream_id: if role == Role::Client { 1 } else { 2 },
            highest_peer_stream_id: 0,
            send_window: frame::DEFAULT_WINDOW_SIZE as i64,
            peer_initial_window: frame::DEFAULT_WINDOW_SIZE,
            max_send_frame: frame::DEFAULT_MAX_FRAME_SIZE,
            recv_unacked: 0,
        }
    }

    fn connection_error(&mut self, code: u64, message: impl Into<String>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        frame::write_goaway(&mut self.out, self.highest_peer_stream_id, code as u32);
        self.events.push_back(Event::ConnectionTerminated {
            error_code: code,
            message: Some(message.into()),
        });
    }

    fn terminate(&mut self, error_code: u64) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.events
            .push_back(Event::connection_terminated(error_code));
    }

    fn consume_magic(&mut self) -> bool {
        while self.magic_remaining > 0 && !self.in_buf.is_empty() {
            let offset = frame::CLIENT_MAGIC.len() - self.magic_remaining;
            let check = self.magic_remaining.min(self.in_buf.len());
            if self.in_buf[..check] != frame::CLIENT_MAGIC[offset..offset + check] {
                self.connection_error(
                    frame::PROTOCOL_ERROR,
                    "invalid client connection preface",
                );
                return false;
            }
            self.in_buf.advance(check);
            self.magic_remaining -= check;
        }
        self.magic_remaining == 0
    }

    fn parse_frames(&mut self) {
        loop {
            if self.terminated {
                return;
            }
            match frame::decode(&self.in_buf, frame::DEFAULT_MAX_FRAME_SIZE) {
                Ok(Some((frame, consumed))) => {
                    self.in_buf.advance(consumed);
                    self.handle_frame(frame);
                }
                Ok(None) => return,
                Err(e) => {
                    self.connection_error(e.code, e.message);
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        if !self.peer_settings_received
            && !matches!(frame, Frame::Settings { .. } | Frame::Ignored)
        {
            self.connection_error(
                frame::PROTOCOL_ERROR,
                "expected a SETTINGS frame as the first frame from the peer",
            );
            return;
        }
        let continues_open_block = match (&self.pending_headers, &frame) {
            (Some(pending), Frame::Continuation { stream_id, .. }) => {
                *stream_id == pending.stream_id
            }
            (Some(_), _) => false,
            (None, Frame::Continuation { .. }) => false,
            (None, _) => true,
        };
        if !continues_open_block && self.pending_headers.is_some() {
            self.connection_error(
                frame::PROTOCOL_ERROR,
                "expected a CONTINUATION frame for the open header block",
            );
            return;
        }
        if !continues_open_block {
            self.connection_error(
                frame::PROTOCOL_ERROR,
                "CONTINUATION frame without an open header block",
            );
            return;
        }
        match frame {
            Frame::Settings { ack, settings } => self.handle_settings(ack, settings),
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                if end_headers {
                    self.complete_header_block(stream_id, end_stream, &fragment);
                } else {
                    self.pending_headers = Some(PendingHeaderBlock {
                        stream_id,
                        end_stream,
                        fragments: BytesMut::from(fragment.as_ref()),
                    });
                }
            }
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => {
                let mut pending = match self.pending_headers.take() {
                    Some(pending) => pending,
                    None => return,
                };
                pending.fragments.extend_from_slice(&fragment);
                if end_headers {
                    let fragment = pending.fragments.freeze();
                    self.complete_header_block(pending.stream_id, pending.end_stream, &fragment);
                } else {
                    self.pending_headers = Some(pending);
                }
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => self.handle_data(stream_id, data, end_stream, flow_len),
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream.reset = true;
                    stream.pending.clear();
                }
                self.events.push_back(Event::StreamResetReceived {
                    stream_id: stream_id as u64,
                    error_code: error_code as u64,
                });
            }
            Frame::Goaway {
                last_stream_id,
                error_code,
            } => {
                // GOAWAY from the peer is not a local termination: in-flight
                // streams below the high-water mark may still complete.
                self.events.push_back(Event::GoawayReceived {
                    last_stream_id: last_stream_id as u64,
                    error_code: error_code as u64,
                });
            }
            Frame::Ping { ack, payload } => {
                if !ack {
                    frame::write_ping(&mut self.out, true, &payload);
                }
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.handle_window_update(stream_id, increment),
            Frame::PushPromise { .. } => {
                self.connection_error(
                    frame::PROTOCOL_ERROR,
                    "PUSH_PROMISE received although push is disabled",
                );
            }
            Frame::Ignored => {}
        }
    }

    fn handle_settings(&mut self, ack: bool, settings: Vec<(u16, u32)>) {
        if ack {
            return;
        }
        for (id, value) in settings {
            match id {
                frame::SETTINGS_INITIAL_WINDOW_SIZE => {
                    if value > 0x7fff_ffff {
                        self.connection_error(
                            frame::FLOW_CONTROL_ERROR,
                            "initial window size above 2^31-1",
                        );
                        return;
                    }
                    let delta = value as i64 - self.peer_initial_window as i64;
                    self.peer_initial_window = value;
                    for stream in self.streams.values_mut() {
                        stream.send_window += delta;
                    }
                }
                frame::SETTINGS_MAX_FRAME_SIZE => {
                    if !(16_384..=16_777_215).contains(&value) {
                        self.connection_error(frame::PROTOCOL_ERROR, "invalid max frame size");
                        return;
                    }
                    self.max_send_frame = value as usize;
                }
                _ => {}
            }
        }
        self.peer_settings_received = true;
        frame::write_settings(&mut self.out, true, &[]);
        self.flush_pending();
    }

    fn complete_header_block(&mut self, stream_id: u32, end_stream: bool, fragment: &[u8]) {
        self.pending_headers = None;
        let headers: HeaderList = match self.decoder.decode(fragment) {
            Ok(list) => list
                .into_iter()
                .map(|(name, value)| (Bytes::from(name), Bytes::from(value)))
                .collect(),
            Err(e) => {
                self.connection_error(
                    frame::COMPRESSION_ERROR,
                    format!("failed to decode a header block: {e:?}"),
                );
                return;
            }
        };
        let known = self.streams.contains_key(&stream_id);
        if !known {
            match self.role {
                Role::Server => {
                    if stream_id % 2 == 0 {
                        self.connection_error(
                            frame::PROTOCOL_ERROR,
                            "client used an even stream id",
                        );
                        return;
                    }
                    if stream_id <= self.highest_peer_stream_id {
                        self.connection_error(frame::PROTOCOL_ERROR, "stream id reused");
                        return;
                    }
                    if headers.is_empty() {
                        self.connection_error(frame::PROTOCOL_ERROR, "empty header block");
                        return;
                    }
                    self.highest_peer_stream_id = stream_id;
                    let mut stream = StreamState {
                        send_window: self.peer_initial_window as i64,
                        ..StreamState::default()
                    };
                    stream.recv_headers_seen = true;
                    self.streams.insert(stream_id, stream);
                }
                Role::Client => {
                    self.connection_error(
                        frame::PROTOCOL_ERROR,
                        "HEADERS received on a stream this client never opened",
                    );
                    return;
                }
            }
        }
        let stream = self.streams.get_mut(&stream_id).expect("just ensured");
        stream.recv_headers_seen = true;
        if end_stream {
            stream.recv_closed = true;
        }
        self.events.push_back(Event::HeadersReceived {
            stream_id: stream_id as u64,
            headers,
            end_stream,
        });
    }

    fn handle_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool, flow_len: u32) {
        let stream = match self.streams.get_mut(&stream_id) {
            Some(stream) if stream.recv_headers_seen => stream,
            _ => {
                self.connection_error(frame::PROTOCOL_ERROR, "DATA frame on an idle stream");
                return;
            }
        };
        if stream.recv_closed {
            self.connection_error(frame::PROTOCOL_ERROR, "DATA frame after END_STREAM");
            return;
        }
        if end_stream {
            stream.recv_closed = true;
        }
        stream.recv_unacked += flow_len;
        let stream_update = if stream.recv_unacked > WINDOW_UPDATE_THRESHOLD && !stream.recv_closed
        {
            Some(std::mem::take(&mut stream.recv_unacked))
        } else {
            None
        };
        self.recv_unacked += flow_len;
        if let Some(increment) = stream_update {
            frame::write_window_update(&mut self.out, stream_id, increment);
        }
        if self.recv_unacked > WINDOW_UPDATE_THRESHOLD {
            frame::write_window_update(&mut self.out, 0, self.recv_unacked);
            self.recv_unacked = 0;
        }
        self.events.push_back(Event::DataReceived {
            stream_id: stream_id as u64,
            data,
            end_stream,
        });
    }

    fn handle_window_update(&mut self, stream_id: u32, increment: u32) {
        if stream_id == 0 {
            self.send_window += increment as i64;
            if self.send_window > 0x7fff_ffff {
                self.connection_error(
                    frame::FLOW_CONTROL_ERROR,
                    "connection flow-control window overflow",
                );
                return;
            }
        } else if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_window += increment as i64;
        }
        self.flush_pending();
    }

    /// Writes as much queued DATA as the peer's windows allow, smallest
    /// stream id first. Frame boundaries of submitted chunks are preserved.
    fn flush_pending(&mut self) {
        for (&stream_id, stream) in self.streams.iter_mut() {
            while let Some((chunk, end_stream)) = stream.pending.front().cloned() {
                if chunk.is_empty() {
                    frame::write_data(&mut self.out, stream_id, &chunk, end_stream);
                    stream.pending.pop_front();
                    continue;
                }
                let allowed = self
                    .send_window
                    .min(stream.send_window)
                    .min(self.max_send_frame as i64);
                if allowed <= 0 {
                    break;
                }
                let take = (allowed as usize).min(chunk.len());
                frame::write_data(
                    &mut self.out,
                    stream_id,
                    &chunk[..take],
                    end_stream && take == chunk.len(),
                );
                self.send_window -= take as i64;
                stream.send_window -= take as i64;
                if take == chunk.len() {
                    stream.pending.pop_front();
                } else {
                    stream.pending[0].0 = chunk.slice(take..);
                }
            }
            if self.send_window <= 0 {
                return;
            }
        }
    }

    fn encode_headers(&mut self, headers: &[Header]) -> Bytes {
        let lowered: Vec<(Bytes, Bytes)> = headers
            .iter()
            .map(|(name, value)| (lowercase(name), value.clone()))
            .collect();
        let encoded = self
            .encoder
            .encode(lowered.iter().map(|(n, v)| (n.as_ref(), v.as_ref())));
        Bytes::from(encoded)
    }
}

impl HttpProtocol for Http2Protocol {
    fn http_version(&self) -> HttpVersion {
        HttpVersion::Http2
    }

    fn multiplexed(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        !self.terminated
    }

    fn has_expired(&self) -> bool {
        self.terminated
    }

    fn get_available_stream_id(&mut self) -> Result<u64> {
        Ok(self.next_local_stream_id as u64)
    }

    fn submit_headers(&mut self, stream_id: u64, headers: &[Header], end_stream: bool) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        let stream_id = stream_id as u32;
        if !self.streams.contains_key(&stream_id) {
            let opens_local = match self.role {
                Role::Client => stream_id % 2 == 1,
                Role::Server => stream_id % 2 == 0,
            };
            if !opens_local || stream_id < self.next_local_stream_id {
                return Err(Error::usage(format!("invalid stream id: {stream_id}")));
            }
            self.next_local_stream_id = stream_id + 2;
            self.streams.insert(
                stream_id,
                StreamState {
                    send_window: self.peer_initial_window as i64,
                    ..StreamState::default()
                },
            );
        }
        let stream = self.streams.get_mut(&stream_id).expect("just ensured");
        if stream.reset {
            return Err(Error::stream_closed("the stream was reset"));
        }
        if end_stream {
            stream.send_closed = true;
        }
        let fragment = self.encode_headers(headers);
        let mut chunks = fragment.chunks(self.max_send_frame).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            if first {
                frame::write_headers(&mut self.out, stream_id, chunk, end_stream, last);
                first = false;
            } else {
                frame::write_continuation(&mut self.out, stream_id, chunk, last);
            }
        }
        if first {
            // An empty header block still needs its HEADERS frame.
            frame::write_headers(&mut self.out, stream_id, &[], end_stream, true);
        }
        Ok(())
    }

    fn submit_data(&mut self, stream_id: u64, data: &[u8], end_stream: bool) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        let stream_id = stream_id as u32;
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Error::usage(format!("unknown stream id: {stream_id}")))?;
        if stream.reset {
            return Err(Error::stream_closed("the stream was reset"));
        }
        if stream.send_closed {
            return Err(Error::usage("the stream is closed for sending"));
        }
        if end_stream {
            stream.send_closed = true;
        }
        stream
            .pending
            .push_back((Bytes::copy_from_slice(data), end_stream));
        self.flush_pending();
        Ok(())
    }

    fn submit_stream_reset(&mut self, stream_id: u64, error_code: u64) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        let stream_id = stream_id as u32;
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Error::usage(format!("unknown stream id: {stream_id}")))?;
        stream.reset = true;
        stream.pending.clear();
        frame::write_rst_stream(&mut self.out, stream_id, error_code as u32);
        // The dispatcher relies on this event to clean up its stream map.
        self.events.push_back(Event::StreamResetSent {
            stream_id: stream_id as u64,
            error_code,
        });
        Ok(())
    }

    fn submit_close(&mut self, _error_code: u64) -> Result<()> {
        // Graceful close is expressed by closing the transport; a GOAWAY
        // would be optional here.
        Ok(())
    }

    fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

impl HttpOverTcpProtocol for Http2Protocol {
    fn connection_lost(&mut self) {
        self.terminate(0);
    }

    fn eof_received(&mut self) {
        self.terminate(0);
    }

    fn bytes_received(&mut self, data: &[u8]) {
        if data.is_empty() || self.terminated {
            return;
        }
        self.in_buf.extend_from_slice(data);
        if self.role == Role::Server && !self.consume_magic() {
            return;
        }
        self.parse_frames();
    }

    fn bytes_to_send(&mut self) -> Bytes {
        self.out.split().freeze()
    }
}

/// Factory for client-side HTTP/2 protocol instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct Http2ClientFactory;

/// Factory for server-side HTTP/2 protocol instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct Http2ServerFactory;

impl HttpOverTcpFactory for Http2ClientFactory {
    fn alpn_protocols(&self) -> Vec<String> {
        vec![ALPN_H2.to_string()]
    }

    fn build(
        &self,
        _tls_version: Option<&str>,
        _alpn_protocol: Option<&str>,
    ) -> Box<dyn HttpOverTcpProtocol> {
        Box::new(Http2Protocol::new(Role::Client))
    }
}

impl HttpOverTcpFactory for Http2ServerFactory {
    fn alpn_protocols(&self) -> Vec<String> {
        vec![ALPN_H2.to_string()]
    }

    fn build(
        &self,
        _tls_version: Option<&str>,
        _alpn_protocol: Option<&str>,
    ) -> Box<dyn HttpOverTcpProtocol> {
        Box::new(Http2Protocol::new(Role::Server))
    }
}
