//! The HTTP/3 state machine, built on the quiche QUIC + H3 codec.
//!
//! The QUIC connection is constructed lazily on the server side: quiche
//! needs the original destination connection id, which is sniffed from the
//! first inbound datagram. The H3 layer attaches once the QUIC handshake
//! completes, so submits issued before that are queued and drained as the
//! connection makes progress, as are bodies the codec accepts only
//! partially.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use quiche::h3::NameValue;
use rand::RngCore;

use crate::config::{ClientTlsConfig, ServerTlsConfig};
use crate::event::Event;
use crate::headers::lowercase;
use crate::proto::{
    Datagram, HttpOverQuicClientFactory, HttpOverQuicProtocol, HttpOverQuicServerFactory,
    HttpProtocol, HttpVersion, Role,
};
use crate::{Error, Header, Result};

mod sniff;

pub(crate) use sniff::sniff_packet;

/// Matches the codec's default maximum UDP payload.
const MAX_DATAGRAM_SIZE: usize = 1350;

const DEFAULT_CONNECTION_ID_LENGTH: usize = 16;

/// An operation waiting for the H3 layer or for stream capacity.
enum Submit {
    Headers {
        stream_id: u64,
        headers: Vec<quiche::h3::Header>,
        end_stream: bool,
    },
    Body {
        stream_id: u64,
        data: Bytes,
        end_stream: bool,
    },
    Reset {
        stream_id: u64,
        error_code: u64,
    },
}

/// Sans-IO representation of an HTTP/3 connection.
pub struct Http3Protocol {
    role: Role,
    config: quiche::Config,
    quic: Option<quiche::Connection>,
    h3: Option<quiche::h3::Connection>,
    local_addr: SocketAddr,
    connection_id_length: usize,
    connection_ids: Vec<Vec<u8>>,
    events: VecDeque<Event>,
    /// Submits are flushed strictly in order; the head of the queue blocks
    /// the rest until the codec accepts it.
    pending: VecDeque<Submit>,
    next_stream_id: u64,
    terminated: bool,
}

impl Http3Protocol {
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

    fn internal_error(&mut self, message: impl Into<String>) {
        let code = crate::proto::ErrorCodes::HTTP3.internal_error;
        self.terminate(code, Some(message.into()));
    }

    /// Attaches the H3 layer if possible, flushes queued submits, polls the
    /// codec for events, and detects connection closure.
    fn process(&mut self) {
        let Some(mut quic) = self.quic.take() else {
            return;
        };
        let mut h3 = self.h3.take();

        if h3.is_none() && quic.is_established() {
            let attached = quiche::h3::Config::new()
                .and_then(|config| quiche::h3::Connection::with_transport(&mut quic, &config));
            match attached {
                Ok(connection) => h3 = Some(connection),
                Err(e) => self.internal_error(format!("failed to set up the HTTP/3 layer: {e}")),
            }
        }
        if let Some(h3) = h3.as_mut() {
            self.flush_pending(&mut quic, h3);
            self.poll_codec(&mut quic, h3);
        }
        if (quic.is_closed() || quic.is_draining()) && !self.terminated {
            let (error_code, message) = match quic.peer_error().or_else(|| quic.local_error()) {
                Some(details) => (
                    details.error_code,
                    Some(String::from_utf8_lossy(&details.reason).into_owned()),
                ),
                None => (0, None),
            };
            self.terminate(error_code, message);
        }

        self.h3 = h3;
        self.quic = Some(quic);
    }

    fn flush_pending(&mut self, quic: &mut quiche::Connection, h3: &mut quiche::h3::Connection) {
        while let Some(submit) = self.pending.front_mut() {
            match submit {
                Submit::Headers {
                    stream_id,
                    headers,
                    end_stream,
                } => {
                    let result = match self.role {
                        Role::Client => h3.send_request(quic, headers, *end_stream).map(|id| {
                            if id != *stream_id {
                                tracing::warn!(
                                    expected = *stream_id,
                                    got = id,
                                    "request landed on an unexpected stream id"
                                );
                            }
                        }),
                        Role::Server => h3.send_response(quic, *stream_id, headers, *end_stream),
                    };
                    match result {
                        Ok(()) => {
                            self.pending.pop_front();
                        }
                        Err(quiche::h3::Error::StreamBlocked)
                        | Err(quiche::h3::Error::Done)
                        | Err(quiche::h3::Error::TransportError(quiche::Error::StreamLimit)) => {
                            return
                        }
                        Err(e) => {
                            self.internal_error(format!("failed to submit headers: {e}"));
                            return;
                        }
                    }
                }
                Submit::Body {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    match h3.send_body(quic, *stream_id, data, *end_stream) {
                        Ok(written) if written == data.len() => {
                            self.pending.pop_front();
                        }
                        Ok(written) => {
                            *data = data.slice(written..);
                            return;
                        }
                        Err(quiche::h3::Error::Done) | Err(quiche::h3::Error::StreamBlocked) => {
                            return
                        }
                        Err(e) => {
                            // The stream is beyond use (e.g. reset); drop its
                            // queued data and move on.
                            tracing::debug!(stream_id = *stream_id, error = %e, "dropping queued body data");
                            self.pending.pop_front();
                        }
                    }
                }
                Submit::Reset {
                    stream_id,
                    error_code,
                } => {
                    let _ = quic.stream_shutdown(
                        *stream_id,
                        quiche::Shutdown::Write,
                        *error_code,
                    );
                    self.pending.pop_front();
                }
            }
        }
    }

    fn poll_codec(&mut self, quic: &mut quiche::Connection, h3: &mut quiche::h3::Connection) {
        loop {
            match h3.poll(quic) {
                Ok((stream_id, event)) => self.map_h3_event(quic, h3, stream_id, event),
                Err(quiche::h3::Error::Done) => return,
                Err(e) => {
                    self.internal_error(format!("HTTP/3 processing failed: {e}"));
                    return;
                }
            }
        }
    }

    fn map_h3_event(
        &mut self,
        quic: &mut quiche::Connection,
        h3: &mut quiche::h3::Connection,
        stream_id: u64,
        event: quiche::h3::Event,
    ) {
        match event {
            quiche::h3::Event::Headers { list, more_frames } => {
                let headers = list
                    .iter()
                    .map(|h| {
                        (
                            Bytes::copy_from_slice(h.name()),
                            Bytes::copy_from_slice(h.value()),
                        )
                    })
                    .collect();
                self.events.push_back(Event::HeadersReceived {
                    stream_id,
                    headers,
                    end_stream: !more_frames,
                });
            }
            quiche::h3::Event::Data => {
                let mut buf = [0u8; 4096];
                loop {
                    match h3.recv_body(quic, stream_id, &mut buf) {
                        Ok(received) => self.events.push_back(Event::DataReceived {
                            stream_id,
                            data: Bytes::copy_from_slice(&buf[..received]),
                            end_stream: false,
                        }),
                        Err(_) => break,
                    }
                }
            }
            quiche::h3::Event::Finished => self.mark_end_of_stream(stream_id),
            quiche::h3::Event::Reset(error_code) => {
                self.events.push_back(Event::StreamResetReceived {
                    stream_id,
                    error_code,
                });
            }
            // The codec does not expose the GOAWAY id.
            quiche::h3::Event::GoAway => self.events.push_back(Event::GoawayReceived {
                last_stream_id: 0,
                error_code: 0,
            }),
            quiche::h3::Event::PriorityUpdate => {}
        }
    }

    /// Delivers `end_stream` the way HTTP/2 does: flagged on the trailing
    /// HEADERS or DATA event of the stream, or as an empty data frame when
    /// that event was already consumed.
    fn mark_end_of_stream(&mut self, stream_id: u64) {
        match self.events.back_mut() {
            Some(
                Event::HeadersReceived {
                    stream_id: last, end_stream, ..
                }
                | Event::DataReceived {
                    stream_id: last, end_stream, ..
                },
            ) if *last == stream_id => *end_stream = true,
            _ => self.events.push_back(Event::DataReceived {
                stream_id,
                data: Bytes::new(),
                end_stream: true,
            }),
        }
    }

    fn accept_first_packet(&mut self, data: &[u8], from: SocketAddr) -> bool {
        let info = match sniff_packet(data, self.connection_id_length) {
            Ok(info) => info,
            Err(_) => return false,
        };
        if !info.is_initial() {
            // Not an Initial packet; nothing to accept yet.
            return false;
        }
        let scid = random_connection_id(self.connection_id_length);
        let accepted = quiche::accept(
            &quiche::ConnectionId::from_ref(&scid),
            Some(&quiche::ConnectionId::from_ref(&info.dcid)),
            self.local_addr,
            from,
            &mut self.config,
        );
        match accepted {
            Ok(connection) => {
                self.connection_ids = vec![info.dcid, scid];
                self.quic = Some(connection);
                true
            }
            Err(e) => {
                self.internal_error(format!("failed to accept a QUIC connection: {e}"));
                false
            }
        }
    }
}

impl HttpProtocol for Http3Protocol {
    fn http_version(&self) -> HttpVersion {
        HttpVersion::Http3
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
        if self.role != Role::Client {
            return Err(Error::usage(
                "servers respond on streams opened by their peers",
            ));
        }
        Ok(self.next_stream_id)
    }

    fn submit_headers(&mut self, stream_id: u64, headers: &[Header], end_stream: bool) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        if self.role == Role::Client {
            // The codec allocates request streams sequentially, so ids must
            // be consumed in the order they were handed out.
            if stream_id != self.next_stream_id {
                return Err(Error::usage(format!(
                    "request streams must be opened in order; expected {}, got {stream_id}",
                    self.next_stream_id
                )));
            }
            self.next_stream_id += 4;
        }
        let headers = headers
            .iter()
            .map(|(name, value)| quiche::h3::Header::new(&lowercase(name), value))
            .collect();
        self.pending.push_back(Submit::Headers {
            stream_id,
            headers,
            end_stream,
        });
        self.process();
        Ok(())
    }

    fn submit_data(&mut self, stream_id: u64, data: &[u8], end_stream: bool) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        if self.role == Role::Client && stream_id >= self.next_stream_id {
            return Err(Error::usage(format!("unknown stream id: {stream_id}")));
        }
        self.pending.push_back(Submit::Body {
            stream_id,
            data: Bytes::copy_from_slice(data),
            end_stream,
        });
        self.process();
        Ok(())
    }

    fn submit_stream_reset(&mut self, stream_id: u64, error_code: u64) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.pending.push_back(Submit::Reset {
            stream_id,
            error_code,
        });
        self.process();
        Ok(())
    }

    fn submit_close(&mut self, error_code: u64) -> Result<()> {
        if let Some(quic) = self.quic.as_mut() {
            // QUIC has two CONNECTION_CLOSE frame types: 0x1c signals errors
            // (or their absence) at the QUIC layer, 0x1d an application
            // error (RFC 9000 §19.19).
            let _ = quic.close(error_code != 0, error_code, b"");
            self.process();
        }
        Ok(())
    }

    fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

impl HttpOverQuicProtocol for Http3Protocol {
    fn clock(&mut self, now: Instant) {
        let fired = self
            .quic
            .as_ref()
            .and_then(|quic| quic.timeout_instant())
            .map(|deadline| now >= deadline)
            .unwrap_or(false);
        if fired {
            if let Some(quic) = self.quic.as_mut() {
                quic.on_timeout();
            }
            self.process();
        }
    }

    fn get_timer(&self) -> Option<Instant> {
        self.quic.as_ref().and_then(|quic| quic.timeout_instant())
    }

    fn connection_lost(&mut self) {
        self.terminate(0, None);
    }

    fn datagram_received(&mut self, datagram: Datagram) {
        if self.terminated {
            return;
        }
        let (data, from) = datagram;
        if self.quic.is_none() {
            if self.role != Role::Server || !self.accept_first_packet(&data, from) {
                return;
            }
        }
        let quic = self.quic.as_mut().expect("just ensured");
        let mut buf = data.to_vec();
        let info = quiche::RecvInfo {
            from,
            to: self.local_addr,
        };
        if let Err(e) = quic.recv(&mut buf, info) {
            if e != quiche::Error::Done {
                tracing::debug!(error = %e, "dropped an undecryptable datagram");
            }
        }
        self.process();
    }

    fn datagrams_to_send(&mut self) -> Vec<Datagram> {
        let Some(quic) = self.quic.as_mut() else {
            return Vec::new();
        };
        let mut datagrams = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match quic.send(&mut buf) {
                Ok((written, info)) => {
                    datagrams.push((Bytes::copy_from_slice(&buf[..written]), info.to));
                }
                Err(quiche::Error::Done) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "QUIC send failed");
                    break;
                }
            }
        }
        datagrams
    }

    fn connection_ids(&self) -> Vec<Vec<u8>> {
        self.connection_ids.clone()
    }
}

fn random_connection_id(length: usize) -> Vec<u8> {
    let mut id = vec![0u8; length];
    rand::rng().fill_bytes(&mut id);
    id
}

fn base_config() -> Result<quiche::Config> {
    let mut config = quiche::Config::new(quiche::PROTOCOL_VERSION)?;
    config.set_application_protos(&[b"h3"])?;
    config.set_max_idle_timeout(30_000);
    config.set_max_send_udp_payload_size(MAX_DATAGRAM_SIZE);
    config.set_initial_max_data(10_000_000);
    config.set_initial_max_stream_data_bidi_local(1_000_000);
    config.set_initial_max_stream_data_bidi_remote(1_000_000);
    config.set_initial_max_stream_data_uni(1_000_000);
    config.set_initial_max_streams_bidi(100);
    config.set_initial_max_streams_uni(100);
    config.set_disable_active_migration(true);
    Ok(config)
}

fn path_str(path: &std::path::Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::invalid_input("path is not valid UTF-8"))
}

/// Factory for client-side HTTP/3 protocol instances.
#[derive(Clone, Copy, Debug)]
pub struct Http3ClientFactory {
    /// Length in bytes of locally issued connection ids.
    pub connection_id_length: usize,
}

impl Default for Http3ClientFactory {
    fn default() -> Self {
        Http3ClientFactory {
            connection_id_length: DEFAULT_CONNECTION_ID_LENGTH,
        }
    }
}

impl HttpOverQuicClientFactory for Http3ClientFactory {
    fn build(
        &self,
        remote_address: SocketAddr,
        local_address: SocketAddr,
        server_name: &str,
        tls_config: &ClientTlsConfig,
    ) -> Result<Box<dyn HttpOverQuicProtocol>> {
        let mut config = base_config()?;
        config.verify_peer(!tls_config.insecure);
        if let Some(cafile) = &tls_config.cafile {
            config.load_verify_locations_from_file(path_str(cafile)?)?;
        }
        if let Some(capath) = &tls_config.capath {
            config.load_verify_locations_from_directory(path_str(capath)?)?;
        }
        let scid = random_connection_id(self.connection_id_length);
        let connection = quiche::connect(
            Some(server_name),
            &quiche::ConnectionId::from_ref(&scid),
            local_address,
            remote_address,
            &mut config,
        )?;
        Ok(Box::new(Http3Protocol {
            role: Role::Client,
            config,
            quic: Some(connection),
            h3: None,
            local_addr: local_address,
            connection_id_length: self.connection_id_length,
            connection_ids: vec![scid],
            events: VecDeque::new(),
            pending: VecDeque::new(),
            next_stream_id: 0,
            terminated: false,
        }))
    }
}

/// Factory for server-side HTTP/3 protocol instances.
#[derive(Clone, Copy, Debug)]
pub struct Http3ServerFactory {
    /// Length in bytes of locally issued connection ids.
    pub connection_id_length: usize,
}

impl Default for Http3ServerFactory {
    fn default() -> Self {
        Http3ServerFactory {
            connection_id_length: DEFAULT_CONNECTION_ID_LENGTH,
        }
    }
}

impl HttpOverQuicServerFactory for Http3ServerFactory {
    fn connection_id_length(&self) -> usize {
        self.connection_id_length
    }

    fn supported_versions(&self) -> Vec<u32> {
        vec![quiche::PROTOCOL_VERSION]
    }

    fn build(
        &self,
        tls_config: &ServerTlsConfig,
        local_address: SocketAddr,
    ) -> Result<Box<dyn HttpOverQuicProtocol>> {
        let (certfile, keyfile) = match (&tls_config.certfile, &tls_config.keyfile) {
            (Some(certfile), Some(keyfile)) => (certfile, keyfile),
            _ => {
                return Err(Error::invalid_input(
                    "an HTTP/3 server requires a TLS certificate and key",
                ))
            }
        };
        let mut config = base_config()?;
        config.load_cert_chain_from_pem_file(path_str(certfile)?)?;
        config.load_priv_key_from_pem_file(path_str(keyfile)?)?;
        config.verify_peer(false);
        Ok(Box::new(Http3Protocol {
            role: Role::Server,
            config,
            quic: None,
            h3: None,
            local_addr: local_address,
            connection_id_length: self.connection_id_length,
            connection_ids: Vec::new(),
            events: VecDeque::new(),
            pending: VecDeque::new(),
            next_stream_id: 1,
            terminated: false,
        }))
    }
}
