//! The HTTP/1 state machine.
//!
//! Lifts the HTTP/1.1 wire format to the unified event model: request and
//! status lines become pseudo headers, the end of a message body becomes an
//! `end_stream` flag, and a successful CONNECT exchange turns the connection
//! into a raw tunnel. HTTP/1 has no real streams; a single active stream id
//! increases by one after every completed request/response cycle.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::event::Event;
use crate::headers::{canonical_name, is_pseudo, lowercase, HeaderList};
use crate::proto::{
    HttpOverTcpFactory, HttpOverTcpProtocol, HttpProtocol, HttpVersion, Role, ALPN_HTTP1,
};
use crate::{Error, Header, Result};

mod codec;

use codec::{CodecEvent, H1Codec, RequestHead, ResponseHead};

/// Sans-I/O representation of an HTTP/1 connection.
pub struct Http1Protocol {
    role: Role,
    scheme: Bytes,
    codec: H1Codec,
    current_stream_id: u64,
    events: VecDeque<Event>,
    terminated: bool,
}

impl Http1Protocol {
    /// Creates a protocol instance for one connection.
    ///
    /// `scheme` becomes the `:scheme` pseudo header of inbound requests,
    /// which HTTP/1 does not carry on the wire.
    pub fn new(role: Role, scheme: &str) -> Self {
        Http1Protocol {
            role,
            scheme: Bytes::copy_from_slice(scheme.as_bytes()),
            codec: H1Codec::new(role),
            current_stream_id: 1,
            events: VecDeque::new(),
            terminated: false,
        }
    }

    fn terminate(&mut self, error_code: u64, message: Option<String>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.events.push_back(Event::ConnectionTerminated {
            error_code,
            message,
        });
    }

    fn drain_codec(&mut self) {
        while let Some(event) = self.codec.poll_event() {
            if self.terminated {
                return;
            }
            match event {
                CodecEvent::RequestHead(head) => match self.map_request(head) {
                    Ok(headers) => self.events.push_back(Event::HeadersReceived {
                        stream_id: self.current_stream_id,
                        headers,
                        end_stream: false,
                    }),
                    Err((code, message)) => self.terminate(code, Some(message)),
                },
                CodecEvent::ResponseHead(head) => {
                    let headers = map_response(head);
                    self.events.push_back(Event::HeadersReceived {
                        stream_id: self.current_stream_id,
                        headers,
                        end_stream: false,
                    });
                }
                CodecEvent::Data(data) => self.events.push_back(Event::DataReceived {
                    stream_id: self.current_stream_id,
                    data,
                    end_stream: false,
                }),
                CodecEvent::EndOfMessage { might_switch } => {
                    if !might_switch {
                        self.mark_end_of_stream();
                    }
                }
                CodecEvent::Switched { trailing } => {
                    if !trailing.is_empty() {
                        self.events.push_back(Event::DataReceived {
                            stream_id: self.current_stream_id,
                            data: trailing,
                            end_stream: false,
                        });
                    }
                }
                CodecEvent::CycleRestarted => self.current_stream_id += 1,
                CodecEvent::Closed => self.terminate(0, None),
                CodecEvent::Failure { code, message } => self.terminate(code, Some(message)),
            }
        }
    }

    /// HTTP/2 and HTTP/3 deliver END_STREAM with the last HEADERS or DATA
    /// frame; emulate that by flagging the trailing queued event, or by
    /// appending an empty data frame when the queue was already consumed.
    fn mark_end_of_stream(&mut self) {
        match self.events.back_mut() {
            Some(
                Event::HeadersReceived { end_stream, .. } | Event::DataReceived { end_stream, .. },
            ) => *end_stream = true,
            _ => self.events.push_back(Event::DataReceived {
                stream_id: self.current_stream_id,
                data: Bytes::new(),
                end_stream: true,
            }),
        }
    }

    fn map_request(&self, head: RequestHead) -> std::result::Result<HeaderList, (u64, String)> {
        let mut host: Option<Bytes> = None;
        let mut regular: HeaderList = Vec::with_capacity(head.headers.len());
        for (name, value) in head.headers {
            if is_pseudo(&name) {
                return Err((400, "pseudo header in an HTTP/1 request".into()));
            }
            if name.as_ref() == b"host" {
                if host.is_some() {
                    return Err((400, "duplicate Host header".into()));
                }
                host = Some(value);
            } else {
                regular.push((name, value));
            }
        }
        let mut headers: HeaderList;
        if head.method.as_ref() == b"CONNECT" {
            headers = vec![
                (Bytes::from_static(b":method"), head.method),
                (Bytes::from_static(b":authority"), head.target),
            ];
        } else {
            if host.is_none() && head.version_minor >= 1 {
                return Err((400, "missing Host header".into()));
            }
            // HTTP/1.0 requests may legitimately lack a Host header.
            let authority = host.unwrap_or_default();
            headers = vec![
                (Bytes::from_static(b":method"), head.method),
                (Bytes::from_static(b":scheme"), self.scheme.clone()),
                (Bytes::from_static(b":authority"), authority),
                (Bytes::from_static(b":path"), head.target),
            ];
        }
        headers.extend(regular);
        Ok(headers)
    }

    fn submit_request_headers(&mut self, headers: &[Header], end_stream: bool) -> Result<()> {
        let mut method = None;
        let mut scheme = None;
        let mut authority: Option<Bytes> = None;
        let mut path = None;
        let mut host: Option<Bytes> = None;
        let mut need_transfer_encoding = !end_stream;
        let mut regular: Vec<(Bytes, Bytes)> = Vec::with_capacity(headers.len());

        for (name, value) in headers {
            let name = lowercase(name);
            if is_pseudo(&name) {
                match name.as_ref() {
                    b":method" => method = Some(value.clone()),
                    b":scheme" => scheme = Some(value.clone()),
                    b":authority" => authority = Some(value.clone()),
                    b":path" => path = Some(value.clone()),
                    _ => {
                        return Err(Error::invalid_input(format!(
                            "unexpected request header: {}",
                            String::from_utf8_lossy(&name)
                        )))
                    }
                }
                continue;
            }
            if name.as_ref() == b"host" {
                if host.is_some() {
                    return Err(Error::invalid_input("duplicate Host header"));
                }
                host = Some(value.clone());
            } else if matches!(name.as_ref(), b"content-length" | b"transfer-encoding") {
                need_transfer_encoding = false;
            }
            regular.push((canonical_name(&name), value.clone()));
        }

        let method = method.ok_or_else(|| Error::invalid_input("missing request header: :method"))?;
        let authority =
            authority.ok_or_else(|| Error::invalid_input("missing request header: :authority"))?;
        let target;
        if method.as_ref() == b"CONNECT" {
            if scheme.is_some() {
                return Err(Error::invalid_input(
                    "unexpected header for a CONNECT request: :scheme",
                ));
            }
            if path.is_some() {
                return Err(Error::invalid_input(
                    "unexpected header for a CONNECT request: :path",
                ));
            }
            target = authority.clone();
        } else {
            if scheme.is_none() {
                return Err(Error::invalid_input("missing request header: :scheme"));
            }
            target = path.ok_or_else(|| Error::invalid_input("missing request header: :path"))?;
            if need_transfer_encoding {
                // Requests with a body need Content-Length or Transfer-Encoding.
                regular.push((
                    Bytes::from_static(b"Transfer-Encoding"),
                    Bytes::from_static(b"chunked"),
                ));
            }
        }
        match &host {
            None => regular.insert(0, (Bytes::from_static(b"Host"), authority)),
            Some(host) if *host != authority => {
                return Err(Error::invalid_input("Host header does not match :authority"));
            }
            Some(_) => {}
        }

        self.codec.send_request_head(&method, &target, &regular)
    }

    fn submit_response_headers(&mut self, headers: &[Header]) -> Result<()> {
        let mut status = None;
        let mut regular: Vec<(Bytes, Bytes)> = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            let name = lowercase(name);
            if is_pseudo(&name) {
                if name.as_ref() == b":status" {
                    status = Some(value.clone());
                } else {
                    return Err(Error::invalid_input(format!(
                        "invalid response header: {}",
                        String::from_utf8_lossy(&name)
                    )));
                }
                continue;
            }
            regular.push((canonical_name(&name), value.clone()));
        }
        let status = status.ok_or_else(|| Error::invalid_input("missing response header: :status"))?;
        let status: u16 = std::str::from_utf8(&status)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::invalid_input("invalid :status header"))?;
        self.codec.send_response_head(status, &regular)
    }
}

impl HttpProtocol for Http1Protocol {
    fn http_version(&self) -> HttpVersion {
        HttpVersion::Http1
    }

    fn multiplexed(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        !self.terminated && self.codec.is_idle()
    }

    fn has_expired(&self) -> bool {
        self.terminated
    }

    fn get_available_stream_id(&mut self) -> Result<u64> {
        if self.role != Role::Client {
            return Err(Error::usage(
                "cannot generate a stream id at the server side; in HTTP/1.1 \
                 only clients initiate an exchange",
            ));
        }
        if !self.is_available() {
            return Err(Error::usage(
                "cannot generate a stream id because the connection is not idle; \
                 HTTP/1.1 is not multiplexed and pipelining is not supported",
            ));
        }
        Ok(self.current_stream_id)
    }

    fn submit_headers(&mut self, stream_id: u64, headers: &[Header], end_stream: bool) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        if stream_id != self.current_stream_id {
            return Err(Error::usage(format!("invalid stream id: {stream_id}")));
        }
        match self.role {
            Role::Client => self.submit_request_headers(headers, end_stream)?,
            Role::Server => self.submit_response_headers(headers)?,
        }
        if end_stream {
            self.codec.send_eom()?;
        }
        self.drain_codec();
        Ok(())
    }

    fn submit_data(&mut self, stream_id: u64, data: &[u8], end_stream: bool) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        if stream_id != self.current_stream_id {
            return Err(Error::usage(format!("invalid stream id: {stream_id}")));
        }
        if self.codec.switched() {
            self.codec.send_raw(data);
            if end_stream {
                self.terminate(0, None);
            }
            return Ok(());
        }
        self.codec.send_data(data)?;
        if end_stream {
            self.codec.send_eom()?;
        }
        self.drain_codec();
        Ok(())
    }

    fn submit_stream_reset(&mut self, _stream_id: u64, _error_code: u64) -> Result<()> {
        // HTTP/1 has no real streams, but with at most one stream alive the
        // connection can be closed instead.
        self.connection_lost();
        Ok(())
    }

    fn submit_close(&mut self, _error_code: u64) -> Result<()> {
        Ok(())
    }

    fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

impl HttpOverTcpProtocol for Http1Protocol {
    fn connection_lost(&mut self) {
        if self.terminated {
            return;
        }
        if self.codec.recv_mid_until_close() {
            // A close-framed body cannot be told apart from one truncated by
            // a network failure; only a proper EOF ends it cleanly.
            self.terminate(
                400,
                Some("connection lost before the response completed".into()),
            );
        } else {
            self.terminate(0, None);
        }
    }

    fn eof_received(&mut self) {
        if self.terminated {
            return;
        }
        self.codec.recv_eof();
        self.drain_codec();
    }

    fn bytes_received(&mut self, data: &[u8]) {
        if self.terminated {
            return;
        }
        self.codec.recv(data);
        self.drain_codec();
    }

    fn bytes_to_send(&mut self) -> Bytes {
        self.codec.take_output()
    }
}

fn map_response(head: ResponseHead) -> HeaderList {
    let mut headers: HeaderList = Vec::with_capacity(head.headers.len() + 1);
    headers.push((
        Bytes::from_static(b":status"),
        Bytes::from(head.status.to_string()),
    ));
    headers.extend(head.headers);
    headers
}

/// Factory for client-side HTTP/1 protocol instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct Http1ClientFactory;

/// Factory for server-side HTTP/1 protocol instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct Http1ServerFactory;

fn scheme_for(tls_version: Option<&str>) -> &'static str {
    if tls_version.is_some() {
        "https"
    } else {
        "http"
    }
}

impl HttpOverTcpFactory for Http1ClientFactory {
    fn alpn_protocols(&self) -> Vec<String> {
        vec![ALPN_HTTP1.to_string()]
    }

    fn build(
        &self,
        tls_version: Option<&str>,
        _alpn_protocol: Option<&str>,
    ) -> Box<dyn HttpOverTcpProtocol> {
        Box::new(Http1Protocol::new(Role::Client, scheme_for(tls_version)))
    }
}

impl HttpOverTcpFactory for Http1ServerFactory {
    fn alpn_protocols(&self) -> Vec<String> {
        vec![ALPN_HTTP1.to_string()]
    }

    fn build(
        &self,
        tls_version: Option<&str>,
        _alpn_protocol: Option<&str>,
    ) -> Box<dyn HttpOverTcpProtocol> {
        Box::new(Http1Protocol::new(Role::Server, scheme_for(tls_version)))
    }
}
