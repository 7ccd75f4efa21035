//! HTTP/1.1 wire codec: head parsing, body framing, serialization.
//!
//! The codec owns the raw byte buffers and the per-message state of one
//! HTTP/1 connection. It knows nothing about pseudo headers or stream ids;
//! [`super::Http1Protocol`] translates between this layer and the unified
//! event model. Heads are parsed with `httparse`, bodies are framed by
//! `Content-Length`, chunked transfer coding, or connection close.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use crate::proto::Role;
use crate::{Error, Result};

/// Maximum size of a request or status line plus headers.
pub(crate) const MAX_HEAD_SIZE: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;
const MAX_CHUNK_LINE: usize = 256;

/// A parsed request head with lowercased header names.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub method: Bytes,
    pub target: Bytes,
    pub version_minor: u8,
    pub headers: Vec<(Bytes, Bytes)>,
}

/// A parsed response head with lowercased header names.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(Bytes, Bytes)>,
}

/// Events surfaced by the codec to the protocol layer.
#[derive(Debug)]
pub(crate) enum CodecEvent {
    RequestHead(RequestHead),
    ResponseHead(ResponseHead),
    Data(Bytes),
    /// The current inbound message is complete. `might_switch` is set when
    /// the message was a CONNECT request whose outcome is still undecided.
    EndOfMessage { might_switch: bool },
    /// A CONNECT exchange succeeded; both directions are raw from now on.
    /// Bytes already buffered behind the head are carried along.
    Switched { trailing: Bytes },
    /// A request/response cycle completed and the next one begins.
    /// Ordered before any events of the next cycle.
    CycleRestarted,
    /// The connection reached a clean end of life.
    Closed,
    /// The peer violated the protocol. `code` is an HTTP status hint.
    Failure { code: u64, message: String },
}

#[derive(Debug)]
enum RecvState {
    Head,
    Body(BodyFraming),
    /// Message complete; parsing is paused until the cycle restarts.
    Done,
    /// A CONNECT request was received; buffer bytes until we respond.
    MightSwitch,
    Switched,
    Closed,
}

#[derive(Debug)]
enum BodyFraming {
    Length(u64),
    Chunked(ChunkState),
    UntilClose,
}

#[derive(Debug)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

#[derive(Debug, PartialEq)]
enum SendState {
    Head,
    Body(SendFraming),
    Done,
    Switched,
}

#[derive(Debug, PartialEq)]
enum SendFraming {
    Length(u64),
    Chunked,
    /// The message has no body on the wire (GET, HEAD response, 204, ...).
    None,
    /// HTTP/1.0 style: raw bytes until the connection closes.
    UntilClose,
}

pub(crate) struct H1Codec {
    role: Role,
    in_buf: BytesMut,
    out: BytesMut,
    events: VecDeque<CodecEvent>,
    recv_state: RecvState,
    send_state: SendState,
    /// Method of the current cycle's request, as sent or received.
    request_method: Option<Bytes>,
    request_version_10: bool,
    close_after_cycle: bool,
    might_switch: bool,
    switched: bool,
    closed: bool,
    failed: bool,
}

impl H1Codec {
    pub(crate) fn new(role: Role) -> Self {
        H1Codec {
            role,
            in_buf: BytesMut::new(),
            out: BytesMut::new(),
            events: VecDeque::new(),
            recv_state: RecvState::Head,
            send_state: SendState::Head,
            request_method: None,
            request_version_10: false,
            close_after_cycle: false,
            might_switch: false,
            switched: false,
            closed: false,
            failed: false,
        }
    }

    pub(crate) fn poll_event(&mut self) -> Option<CodecEvent> {
        self.events.pop_front()
    }

    pub(crate) fn take_output(&mut self) -> Bytes {
        self.out.split().freeze()
    }

    /// Whether both directions are at the start of a fresh cycle.
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.recv_state, RecvState::Head)
            && self.send_state == SendState::Head
            && !self.switched
            && !self.closed
            && !self.failed
    }

    pub(crate) fn switched(&self) -> bool {
        self.switched
    }

    /// Whether an inbound body framed by connection close is in progress.
    pub(crate) fn recv_mid_until_close(&self) -> bool {
        matches!(self.recv_state, RecvState::Body(BodyFraming::UntilClose))
    }

    // Receiving direction.

    pub(crate) fn recv(&mut self, data: &[u8]) {
        if data.is_empty() || self.closed || self.failed {
            return;
        }
        match self.recv_state {
            RecvState::Switched => {
                self.events.push_back(CodecEvent::Data(Bytes::copy_from_slice(data)));
            }
            RecvState::MightSwitch => {
                self.in_buf.extend_from_slice(data);
            }
            _ => {
                self.in_buf.extend_from_slice(data);
                self.parse_loop();
            }
        }
    }

    pub(crate) fn recv_eof(&mut self) {
        if self.closed || self.failed {
            return;
        }
        match &self.recv_state {
            RecvState::Head => {
                if self.in_buf.is_empty() {
                    self.close_now();
                } else {
                    self.fail(400, "peer closed the connection with a partial message head");
                }
            }
            RecvState::Body(BodyFraming::UntilClose) => {
                self.finish_message();
                self.close_now();
            }
            RecvState::Body(_) => {
                self.fail(400, "peer closed the connection before the message completed");
            }
            RecvState::Done | RecvState::MightSwitch => self.close_now(),
            RecvState::Switched | RecvState::Closed => self.close_now(),
        }
    }

    fn parse_loop(&mut self) {
        loop {
            match &mut self.recv_state {
                RecvState::Head => {
                    if !self.parse_head() {
                        return;
                    }
                }
                RecvState::Body(BodyFraming::Length(remaining)) => {
                    if self.in_buf.is_empty() {
                        return;
                    }
                    let take = (*remaining).min(self.in_buf.len() as u64) as usize;
                    *remaining -= take as u64;
                    let done = *remaining == 0;
                    let data = self.in_buf.split_to(take).freeze();
                    if !data.is_empty() {
                        self.events.push_back(CodecEvent::Data(data));
                    }
                    if done {
                        self.finish_message();
                    }
                }
                RecvState::Body(BodyFraming::Chunked(_)) => {
                    if !self.parse_chunk() {
                        return;
                    }
                }
                RecvState::Body(BodyFraming::UntilClose) => {
                    if !self.in_buf.is_empty() {
                        let data = self.in_buf.split().freeze();
                        self.events.push_back(CodecEvent::Data(data));
                    }
                    return;
                }
                RecvState::Done
                | RecvState::MightSwitch
                | RecvState::Switched
                | RecvState::Closed => return,
            }
        }
    }

    /// Parses one message head. Returns false when more bytes are needed or
    /// the connection failed.
    fn parse_head(&mut self) -> bool {
        if self.in_buf.is_empty() {
            return false;
        }
        if self.role == Role::Server {
            let magic = b"PRI * HTTP/2.0";
            let check = magic.len().min(self.in_buf.len());
            if self.in_buf[..check] == magic[..check] {
                if check < magic.len() {
                    return false;
                }
                self.fail(
                    400,
                    "this looks like an HTTP/2 preface on an HTTP/1 connection; \
                     prior-knowledge HTTP/2 is not supported here",
                );
                return false;
            }
        }
        match self.role {
            Role::Server => self.parse_request_head(),
            Role::Client => self.parse_response_head(),
        }
    }

    fn parse_request_head(&mut self) -> bool {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut header_buf);
        match parsed.parse(&self.in_buf) {
            Ok(httparse::Status::Complete(len)) => {
                let head = RequestHead {
                    method: Bytes::copy_from_slice(parsed.method.unwrap_or("").as_bytes()),
                    target: Bytes::copy_from_slice(parsed.path.unwrap_or("").as_bytes()),
                    version_minor: parsed.version.unwrap_or(1),
                    headers: copy_headers(parsed.headers),
                };
                self.in_buf.advance(len);
                self.begin_request(head);
                true
            }
            Ok(httparse::Status::Partial) => self.check_head_size(),
            Err(httparse::Error::TooManyHeaders) => {
                self.fail(431, "too many request headers");
                false
            }
            Err(_) if self.in_buf.len() > MAX_HEAD_SIZE => {
                self.fail(431, "message head too large");
                false
            }
            Err(e) => {
                self.fail(400, format!("invalid request head: {e}"));
                false
            }
        }
    }

    fn parse_response_head(&mut self) -> bool {
        let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut header_buf);
        match parsed.parse(&self.in_buf) {
            Ok(httparse::Status::Complete(len)) => {
                let head = ResponseHead {
                    status: parsed.code.unwrap_or(0),
                    headers: copy_headers(parsed.headers),
                };
                let version_minor = parsed.version.unwrap_or(1);
                self.in_buf.advance(len);
                self.begin_response(head, version_minor);
                true
            }
            Ok(httparse::Status::Partial) => self.check_head_size(),
            Err(httparse::Error::TooManyHeaders) => {
                self.fail(431, "too many response headers");
                false
            }
            Err(_) if self.in_buf.len() > MAX_HEAD_SIZE => {
                self.fail(431, "message head too large");
                false
            }
            Err(e) => {
                self.fail(400, format!("invalid response head: {e}"));
                false
            }
        }
    }

    fn check_head_size(&mut self) -> bool {
        if self.in_buf.len() > MAX_HEAD_SIZE {
            self.fail(431, "message head too large");
        }
        false
    }

    fn begin_request(&mut self, head: RequestHead) {
        self.request_method = Some(head.method.clone());
        if head.version_minor == 0 {
            self.request_version_10 = true;
            self.close_after_cycle = true;
        }
        if header_token(&head.headers, b"connection", b"close") {
            self.close_after_cycle = true;
        }
        if head.method.as_ref() == b"CONNECT" {
            // A CONNECT request has no body; whether the connection turns
            // into a tunnel depends on our response.
            self.might_switch = true;
            self.events.push_back(CodecEvent::RequestHead(head));
            self.events
                .push_back(CodecEvent::EndOfMessage { might_switch: true });
            self.recv_state = RecvState::MightSwitch;
            return;
        }
        let framing = match self.inbound_framing(&head.headers) {
            Ok(framing) => framing,
            Err((code, message)) => {
                self.fail(code, message);
                return;
            }
        };
        self.events.push_back(CodecEvent::RequestHead(head));
        self.enter_body(framing);
    }

    fn begin_response(&mut self, head: ResponseHead, version_minor: u8) {
        let status = head.status;
        if version_minor == 0 || header_token(&head.headers, b"connection", b"close") {
            self.close_after_cycle = true;
        }
        if (100..200).contains(&status) {
            // Informational responses precede the real one.
            self.events.push_back(CodecEvent::ResponseHead(head));
            return;
        }
        if self.might_switch && (200..300).contains(&status) {
            self.events.push_back(CodecEvent::ResponseHead(head));
            self.enter_switched();
            return;
        }
        self.might_switch = false;
        let head_allows_body = !matches!(status, 204 | 304)
            && self.request_method.as_deref() != Some(b"HEAD".as_slice());
        let framing = if !head_allows_body {
            None
        } else {
            match self.inbound_framing(&head.headers) {
                Ok(framing) => framing,
                Err((code, message)) => {
                    self.fail(code, message);
                    return;
                }
            }
            .or(Some(BodyFraming::UntilClose))
        };
        self.events.push_back(CodecEvent::ResponseHead(head));
        self.enter_body(framing);
    }

    /// Framing implied by the message headers, or `None` for "no declared
    /// length" (zero for requests, until-close for responses).
    fn inbound_framing(
        &self,
        headers: &[(Bytes, Bytes)],
    ) -> std::result::Result<Option<BodyFraming>, (u64, String)> {
        let mut chunked = false;
        let mut content_length: Option<u64> = None;
        for (name, value) in headers {
            if name.as_ref() == b"transfer-encoding" {
                if value
                    .split(|b| *b == b',')
                    .any(|v| v.trim_ascii().eq_ignore_ascii_case(b"chunked"))
                {
                    chunked = true;
                }
            } else if name.as_ref() == b"content-length" {
                let parsed: u64 = std::str::from_utf8(value)
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| (400u64, "invalid Content-Length header".to_string()))?;
                match content_length {
                    Some(previous) if previous != parsed => {
                        return Err((400, "conflicting Content-Length headers".to_string()));
                    }
                    _ => content_length = Some(parsed),
                }
            }
        }
        if chunked {
            // Transfer-Encoding takes precedence over Content-Length.
            Ok(Some(BodyFraming::Chunked(ChunkState::Size)))
        } else if let Some(length) = content_length {
            Ok(Some(BodyFraming::Length(length)))
        } else if self.role == Role::Server {
            // Requests without a declared length have no body.
            Ok(Some(BodyFraming::Length(0)))
        } else {
            Ok(None)
        }
    }

    fn enter_body(&mut self, framing: Option<BodyFraming>) {
        match framing {
            None | Some(BodyFraming::Length(0)) => self.finish_message(),
            Some(framing) => self.recv_state = RecvState::Body(framing),
        }
    }

    /// Chunked transfer coding, one step at a time. Returns false when more
    /// bytes are needed or the connection failed.
    fn parse_chunk(&mut self) -> bool {
        let state = match &mut self.recv_state {
            RecvState::Body(BodyFraming::Chunked(state)) => state,
            _ => unreachable!("parse_chunk outside a chunked body"),
        };
        match state {
            ChunkState::Size => {
                let line_end = match find_crlf(&self.in_buf) {
                    Some(at) => at,
                    None => {
                        if self.in_buf.len() > MAX_CHUNK_LINE {
                            self.fail(400, "chunk size line too long");
                        }
                        return false;
                    }
                };
                let line = self.in_buf.split_to(line_end + 2);
                let digits = line[..line_end]
                    .split(|b| *b == b';')
                    .next()
                    .unwrap_or(&[])
                    .trim_ascii()
                    .to_vec();
                let size = match std::str::from_utf8(&digits)
                    .ok()
                    .and_then(|s| u64::from_str_radix(s, 16).ok())
                {
                    Some(size) => size,
                    None => {
                        self.fail(400, "invalid chunk size");
                        return false;
                    }
                };
                if size == 0 {
                    self.set_chunk_state(ChunkState::Trailer);
                } else {
                    self.set_chunk_state(ChunkState::Data(size));
                }
                true
            }
            ChunkState::Data(remaining) => {
                if self.in_buf.is_empty() {
                    return false;
                }
                let take = (*remaining).min(self.in_buf.len() as u64) as usize;
                *remaining -= take as u64;
                let done = *remaining == 0;
                let data = self.in_buf.split_to(take).freeze();
                self.events.push_back(CodecEvent::Data(data));
                if done {
                    self.set_chunk_state(ChunkState::DataEnd);
                }
                true
            }
            ChunkState::DataEnd => {
                if self.in_buf.len() < 2 {
                    return false;
                }
                if &self.in_buf[..2] != b"\r\n" {
                    self.fail(400, "missing CRLF after chunk data");
                    return false;
                }
                self.in_buf.advance(2);
                self.set_chunk_state(ChunkState::Size);
                true
            }
            ChunkState::Trailer => loop {
                let line_end = match find_crlf(&self.in_buf) {
                    Some(at) => at,
                    None => {
                        if self.in_buf.len() > MAX_HEAD_SIZE {
                            self.fail(431, "chunked trailer too large");
                        }
                        return false;
                    }
                };
                // Trailer fields are consumed and dropped.
                let line = self.in_buf.split_to(line_end + 2);
                if line_end == 0 {
                    self.finish_message();
                    return true;
                }
                drop(line);
            },
        }
    }

    fn set_chunk_state(&mut self, state: ChunkState) {
        self.recv_state = RecvState::Body(BodyFraming::Chunked(state));
    }

    fn finish_message(&mut self) {
        self.events
            .push_back(CodecEvent::EndOfMessage { might_switch: false });
        self.recv_state = RecvState::Done;
        self.maybe_finish_cycle();
    }

    // Sending direction.

    pub(crate) fn send_request_head(
        &mut self,
        method: &[u8],
        target: &[u8],
        headers: &[(Bytes, Bytes)],
    ) -> Result<()> {
        if self.send_state != SendState::Head {
            return Err(Error::usage("a request is already in progress"));
        }
        self.out.extend_from_slice(method);
        self.out.extend_from_slice(b" ");
        self.out.extend_from_slice(target);
        self.out.extend_from_slice(b" HTTP/1.1\r\n");
        write_header_lines(&mut self.out, headers);
        self.request_method = Some(Bytes::copy_from_slice(method));
        if method == b"CONNECT" {
            self.might_switch = true;
            self.send_state = SendState::Body(SendFraming::None);
            return Ok(());
        }
        if header_token(headers, b"connection", b"close") {
            self.close_after_cycle = true;
        }
        self.send_state = SendState::Body(outbound_framing(headers));
        Ok(())
    }

    pub(crate) fn send_response_head(
        &mut self,
        status: u16,
        headers: &[(Bytes, Bytes)],
    ) -> Result<()> {
        if self.send_state != SendState::Head {
            return Err(Error::usage("a response is already in progress"));
        }
        let mut headers = headers.to_vec();
        let connect_cycle = self.request_method.as_deref() == Some(b"CONNECT".as_slice());
        if header_token(&headers, b"connection", b"close") {
            self.close_after_cycle = true;
        }
        let switching = connect_cycle && (200..300).contains(&status);
        let framing = if switching || matches!(status, 204 | 304) || (100..200).contains(&status)
        {
            SendFraming::None
        } else if self.request_method.as_deref() == Some(b"HEAD".as_slice()) {
            SendFraming::None
        } else {
            match outbound_framing(&headers) {
                SendFraming::None if self.request_version_10 => {
                    // HTTP/1.0 peers cannot decode chunks; frame the body by
                    // closing the connection.
                    self.close_after_cycle = true;
                    SendFraming::UntilClose
                }
                SendFraming::None => {
                    headers.push((
                        Bytes::from_static(b"Transfer-Encoding"),
                        Bytes::from_static(b"chunked"),
                    ));
                    SendFraming::Chunked
                }
                framing => framing,
            }
        };
        if self.close_after_cycle && !crate::headers::contains(&headers, b"connection") {
            headers.push((
                Bytes::from_static(b"Connection"),
                Bytes::from_static(b"close"),
            ));
        }
        self.out.extend_from_slice(b"HTTP/1.1 ");
        self.out.extend_from_slice(status.to_string().as_bytes());
        self.out.extend_from_slice(b" ");
        self.out.extend_from_slice(reason_phrase(status).as_bytes());
        self.out.extend_from_slice(b"\r\n");
        write_header_lines(&mut self.out, &headers);
        if (100..200).contains(&status) {
            return Ok(());
        }
        if switching {
            self.enter_switched();
            return Ok(());
        }
        if connect_cycle {
            // The tunnel was refused; the consumed CONNECT request ends the
            // inbound message normally.
            self.might_switch = false;
            self.recv_state = RecvState::Done;
        }
        self.send_state = SendState::Body(framing);
        Ok(())
    }

    pub(crate) fn send_data(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.send_state {
            SendState::Switched => {
                self.out.extend_from_slice(data);
                Ok(())
            }
            SendState::Body(SendFraming::Chunked) => {
                if !data.is_empty() {
                    self.out
                        .extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
                    self.out.extend_from_slice(data);
                    self.out.extend_from_slice(b"\r\n");
                }
                Ok(())
            }
            SendState::Body(SendFraming::Length(remaining)) => {
                if (data.len() as u64) > *remaining {
                    return Err(Error::usage("body longer than the declared Content-Length"));
                }
                *remaining -= data.len() as u64;
                self.out.extend_from_slice(data);
                Ok(())
            }
            SendState::Body(SendFraming::UntilClose) => {
                self.out.extend_from_slice(data);
                Ok(())
            }
            SendState::Body(SendFraming::None) => {
                if data.is_empty() {
                    Ok(())
                } else {
                    Err(Error::usage("this message has no body"))
                }
            }
            SendState::Head => Err(Error::usage("headers were not sent yet")),
            SendState::Done => Err(Error::usage("the message is already complete")),
        }
    }

    pub(crate) fn send_eom(&mut self) -> Result<()> {
        match &self.send_state {
            SendState::Body(SendFraming::Chunked) => {
                self.out.extend_from_slice(b"0\r\n\r\n");
            }
            SendState::Body(SendFraming::Length(remaining)) => {
                if *remaining > 0 {
                    return Err(Error::usage("body shorter than the declared Content-Length"));
                }
            }
            SendState::Body(SendFraming::None | SendFraming::UntilClose) => {}
            SendState::Switched => return Ok(()),
            SendState::Head => return Err(Error::usage("headers were not sent yet")),
            SendState::Done => return Ok(()),
        }
        self.send_state = SendState::Done;
        self.maybe_finish_cycle();
        Ok(())
    }

    /// Raw tunnel bytes, bypassing any framing.
    pub(crate) fn send_raw(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    fn enter_switched(&mut self) {
        self.switched = true;
        self.send_state = SendState::Switched;
        self.recv_state = RecvState::Switched;
        let trailing = self.in_buf.split().freeze();
        self.events.push_back(CodecEvent::Switched { trailing });
    }

    fn maybe_finish_cycle(&mut self) {
        if self.send_state != SendState::Done || !matches!(self.recv_state, RecvState::Done) {
            return;
        }
        if self.close_after_cycle {
            self.close_now();
        } else {
            self.send_state = SendState::Head;
            self.recv_state = RecvState::Head;
            self.request_method = None;
            self.events.push_back(CodecEvent::CycleRestarted);
            if !self.in_buf.is_empty() {
                // Pipelined bytes were already buffered; parse them now.
                self.parse_loop();
            }
        }
    }

    fn close_now(&mut self) {
        if self.closed || self.failed {
            return;
        }
        self.closed = true;
        self.recv_state = RecvState::Closed;
        self.events.push_back(CodecEvent::Closed);
    }

    fn fail(&mut self, code: u64, message: impl Into<String>) {
        if self.closed || self.failed {
            return;
        }
        self.failed = true;
        self.recv_state = RecvState::Closed;
        self.events.push_back(CodecEvent::Failure {
            code,
            message: message.into(),
        });
    }
}

fn copy_headers(headers: &[httparse::Header<'_>]) -> Vec<(Bytes, Bytes)> {
    headers
        .iter()
        .map(|h| {
            (
                Bytes::from(h.name.as_bytes().to_ascii_lowercase()),
                Bytes::copy_from_slice(h.value),
            )
        })
        .collect()
}

fn write_header_lines(out: &mut BytesMut, headers: &[(Bytes, Bytes)]) {
    for (name, value) in headers {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// Send-side framing implied by already-translated headers.
fn outbound_framing(headers: &[(Bytes, Bytes)]) -> SendFraming {
    let mut framing = SendFraming::None;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case(b"transfer-encoding") {
            if value
                .split(|b| *b == b',')
                .any(|v| v.trim_ascii().eq_ignore_ascii_case(b"chunked"))
            {
                return SendFraming::Chunked;
            }
        } else if name.eq_ignore_ascii_case(b"content-length") {
            if let Some(length) = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.trim().parse().ok())
            {
                framing = SendFraming::Length(length);
            }
        }
    }
    framing
}

/// Whether a comma-separated header contains the given token.
fn header_token(headers: &[(Bytes, Bytes)], name: &[u8], token: &[u8]) -> bool {
    headers.iter().any(|(n, v)| {
        n.eq_ignore_ascii_case(name)
            && v.split(|b| *b == b',')
                .any(|part| part.trim_ascii().eq_ignore_ascii_case(token))
    })
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Content Too Large",
        414 => "URI Too Long",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "",
    }
}
