//! Sans-I/O tests of the HTTP/2 state machine.
//!
//! Expected frames are built with the same HPACK codec the state machine
//! uses, so dynamic-table state stays in lockstep across assertions.

use bytes::Bytes;
use trident::headers::{header, HeaderList};
use trident::proto::h2::{Http2ClientFactory, Http2ServerFactory};
use trident::proto::{HttpOverTcpFactory, HttpOverTcpProtocol, HttpProtocol};
use trident::Event;

const CLIENT_MAGIC: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_DATA: u8 = 0x0;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_RST_STREAM: u8 = 0x3;
const FRAME_SETTINGS: u8 = 0x4;
const FRAME_PING: u8 = 0x6;
const FRAME_GOAWAY: u8 = 0x7;
const FRAME_WINDOW_UPDATE: u8 = 0x8;

const FLAG_END_STREAM: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

fn client() -> Box<dyn HttpOverTcpProtocol> {
    Http2ClientFactory.build(Some("TLSv1.2"), Some("h2"))
}

fn server() -> Box<dyn HttpOverTcpProtocol> {
    Http2ServerFactory.build(Some("TLSv1.2"), Some("h2"))
}

fn build_request_headers(method: &str) -> HeaderList {
    vec![
        header(":method", method.to_string()),
        header(":scheme", "https"),
        header(":authority", "example.com"),
        header(":path", "/"),
    ]
}

fn build_response_headers() -> HeaderList {
    vec![header(":status", "200")]
}

fn build_frame(kind: u8, data: &[u8], flags: u8, stream_id: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(9 + data.len());
    let length = data.len() as u32;
    frame.extend_from_slice(&[
        (length >> 16) as u8,
        (length >> 8) as u8,
        length as u8,
        kind,
        flags,
    ]);
    frame.extend_from_slice(&stream_id.to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

fn build_headers_frame(
    headers: &HeaderList,
    end_stream: bool,
    stream_id: u32,
    encoder: &mut hpack::Encoder<'_>,
) -> Vec<u8> {
    let fragment = encoder.encode(headers.iter().map(|(n, v)| (n.as_ref(), v.as_ref())));
    let mut flags = FLAG_END_HEADERS;
    if end_stream {
        flags |= FLAG_END_STREAM;
    }
    build_frame(FRAME_HEADERS, &fragment, flags, stream_id)
}

fn build_data_frame(data: &[u8], end_stream: bool, stream_id: u32) -> Vec<u8> {
    let flags = if end_stream { FLAG_END_STREAM } else { 0 };
    build_frame(FRAME_DATA, data, flags, stream_id)
}

/// Splits a byte buffer into (type, stream id, payload) frame triples.
fn split_frames(mut bytes: &[u8]) -> Vec<(u8, u32, Vec<u8>)> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        assert!(bytes.len() >= 9, "truncated frame header");
        let length = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
        let kind = bytes[3];
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff;
        assert!(bytes.len() >= 9 + length, "truncated frame payload");
        frames.push((kind, stream_id, bytes[9..9 + length].to_vec()));
        bytes = &bytes[9 + length..];
    }
    frames
}

fn first_frame_type(bytes: &[u8]) -> u8 {
    split_frames(bytes)[0].0
}

fn decode_headers(frame: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let frames = split_frames(frame);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, FRAME_HEADERS);
    hpack::Decoder::new()
        .decode(&frames[0].2)
        .expect("expected a decodable header block")
}

fn terminated(error_code: u64) -> Event {
    Event::ConnectionTerminated {
        error_code,
        message: None,
    }
}

fn assert_connection_available(protocol: &mut dyn HttpOverTcpProtocol) {
    assert_eq!(protocol.next_event(), None);
    assert!(protocol.bytes_to_send().is_empty());
    assert!(protocol.is_available());
    assert!(!protocol.has_expired());
}

fn assert_connection_expired(protocol: &mut dyn HttpOverTcpProtocol) {
    assert_eq!(protocol.next_event(), None);
    assert!(protocol.bytes_to_send().is_empty());
    assert!(!protocol.is_available());
    assert!(protocol.has_expired());
}

fn init_client(client: &mut dyn HttpOverTcpProtocol) {
    client.bytes_received(&build_frame(FRAME_SETTINGS, b"", 0, 0));
    client.bytes_to_send();
}

fn init_server(server: &mut dyn HttpOverTcpProtocol) {
    let mut preface = CLIENT_MAGIC.to_vec();
    preface.extend_from_slice(&build_frame(FRAME_SETTINGS, b"", 0, 0));
    server.bytes_received(&preface);
    server.bytes_to_send();
}

fn send_request(client: &mut dyn HttpOverTcpProtocol, method: &str) -> u64 {
    let stream_id = client.get_available_stream_id().unwrap();
    client
        .submit_headers(stream_id, &build_request_headers(method), true)
        .unwrap();
    client.bytes_to_send();
    stream_id
}

mod client_side {
    use super::*;

    #[test]
    fn test_init_connection() {
        let mut client = client();
        let preface = client.bytes_to_send();
        assert!(preface.starts_with(CLIENT_MAGIC));
        assert_eq!(first_frame_type(&preface[CLIENT_MAGIC.len()..]), FRAME_SETTINGS);
        client.bytes_received(&build_frame(FRAME_SETTINGS, b"", 0, 0));
        assert_eq!(client.next_event(), None);
        // The peer's SETTINGS are acknowledged.
        assert_eq!(first_frame_type(&client.bytes_to_send()), FRAME_SETTINGS);
    }

    #[test]
    fn test_connection_lost() {
        let mut client = client();
        init_client(client.as_mut());
        client.connection_lost();
        assert_eq!(client.next_event(), Some(terminated(0)));
        assert_connection_expired(client.as_mut());
    }

    #[test]
    fn test_eof_received() {
        let mut client = client();
        init_client(client.as_mut());
        client.eof_received();
        assert_eq!(client.next_event(), Some(terminated(0)));
        assert_connection_expired(client.as_mut());
        client.connection_lost();
        assert_connection_expired(client.as_mut());
    }

    #[test]
    fn test_send_get() {
        let mut client = client();
        init_client(client.as_mut());
        let headers = build_request_headers("GET");
        let stream_id = client.get_available_stream_id().unwrap();
        assert_eq!(stream_id, 1);
        client.submit_headers(stream_id, &headers, true).unwrap();
        let mut encoder = hpack::Encoder::new();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_headers_frame(&headers, true, 1, &mut encoder)
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_send_post() {
        let mut client = client();
        init_client(client.as_mut());
        let headers = build_request_headers("POST");
        let stream_id = client.get_available_stream_id().unwrap();
        client.submit_headers(stream_id, &headers, false).unwrap();
        let mut encoder = hpack::Encoder::new();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_headers_frame(&headers, false, 1, &mut encoder)
        );
        client.submit_data(stream_id, b"Hello HTTP!", true).unwrap();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_data_frame(b"Hello HTTP!", true, 1)
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_send_post_in_parts() {
        let mut client = client();
        init_client(client.as_mut());
        let stream_id = client.get_available_stream_id().unwrap();
        client
            .submit_headers(stream_id, &build_request_headers("POST"), false)
            .unwrap();
        client.bytes_to_send();
        client.submit_data(stream_id, b"H", false).unwrap();
        client.submit_data(stream_id, b"el", false).unwrap();
        client.submit_data(stream_id, b"lo HTTP!", true).unwrap();
        let mut expected = build_data_frame(b"H", false, 1);
        expected.extend_from_slice(&build_data_frame(b"el", false, 1));
        expected.extend_from_slice(&build_data_frame(b"lo HTTP!", true, 1));
        assert_eq!(client.bytes_to_send().as_ref(), expected);
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_send_rst_stream() {
        let mut client = client();
        init_client(client.as_mut());
        let stream_id = client.get_available_stream_id().unwrap();
        client
            .submit_headers(stream_id, &build_request_headers("POST"), false)
            .unwrap();
        client.bytes_to_send();
        client.submit_stream_reset(stream_id, 0).unwrap();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_frame(FRAME_RST_STREAM, &[0, 0, 0, 0], 0, 1)
        );
        assert_eq!(
            client.next_event(),
            Some(Event::StreamResetSent {
                stream_id,
                error_code: 0
            })
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_recv_invalid() {
        // DATA before response headers, then HEADERS on stream 0.
        let payloads = [
            build_data_frame(b"Hello HTTP!", true, 1),
            build_headers_frame(&build_response_headers(), false, 0, &mut hpack::Encoder::new()),
        ];
        for payload in payloads {
            let mut client = client();
            init_client(client.as_mut());
            send_request(client.as_mut(), "GET");
            client.bytes_received(&payload);
            assert_eq!(client.next_event(), Some(terminated(0x01)));
            assert_eq!(client.next_event(), None);
            assert_eq!(first_frame_type(&client.bytes_to_send()), FRAME_GOAWAY);
            assert_connection_expired(client.as_mut());
        }
    }

    #[test]
    fn test_recv() {
        let mut client = client();
        init_client(client.as_mut());
        let stream_id = send_request(client.as_mut(), "GET");
        let headers = build_response_headers();
        let mut encoder = hpack::Encoder::new();
        let mut response = build_headers_frame(&headers, false, 1, &mut encoder);
        response.extend_from_slice(&build_data_frame(b"Hello HTTP!", true, 1));
        client.bytes_received(&response);
        assert_eq!(
            client.next_event(),
            Some(Event::HeadersReceived {
                stream_id,
                headers,
                end_stream: false
            })
        );
        assert_eq!(
            client.next_event(),
            Some(Event::DataReceived {
                stream_id,
                data: Bytes::from_static(b"Hello HTTP!"),
                end_stream: true
            })
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_recv_fragmented() {
        let mut client = client();
        init_client(client.as_mut());
        let stream_id = send_request(client.as_mut(), "GET");
        let headers = build_response_headers();
        let mut encoder = hpack::Encoder::new();
        let headers_frame = build_headers_frame(&headers, false, 1, &mut encoder);
        let data_frame = build_data_frame(b"Hello HTTP!", true, 1);
        client.bytes_received(&headers_frame[..2]);
        assert_eq!(client.next_event(), None);
        let mut middle = headers_frame[2..].to_vec();
        middle.extend_from_slice(&data_frame[..2]);
        client.bytes_received(&middle);
        assert_eq!(
            client.next_event(),
            Some(Event::HeadersReceived {
                stream_id,
                headers,
                end_stream: false
            })
        );
        assert_eq!(client.next_event(), None);
        client.bytes_received(&data_frame[2..]);
        assert_eq!(
            client.next_event(),
            Some(Event::DataReceived {
                stream_id,
                data: Bytes::from_static(b"Hello HTTP!"),
                end_stream: true
            })
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_multiple_requests() {
        let mut client = client();
        init_client(client.as_mut());
        let mut encoder = hpack::Encoder::new();
        let request_headers = build_request_headers("GET");

        assert_eq!(client.get_available_stream_id().unwrap(), 1);
        client.submit_headers(1, &request_headers, true).unwrap();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_headers_frame(&request_headers, true, 1, &mut encoder)
        );
        assert_eq!(client.get_available_stream_id().unwrap(), 3);
        client.submit_headers(3, &request_headers, true).unwrap();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_headers_frame(&request_headers, true, 3, &mut encoder)
        );

        // Responses arrive interleaved; events keep the codec's order.
        let response_headers = build_response_headers();
        let mut response_encoder = hpack::Encoder::new();
        client.bytes_received(&build_headers_frame(
            &response_headers,
            false,
            3,
            &mut response_encoder,
        ));
        assert_eq!(
            client.next_event(),
            Some(Event::HeadersReceived {
                stream_id: 3,
                headers: response_headers.clone(),
                end_stream: false
            })
        );
        client.bytes_received(&build_headers_frame(
            &response_headers,
            false,
            1,
            &mut response_encoder,
        ));
        assert_eq!(
            client.next_event(),
            Some(Event::HeadersReceived {
                stream_id: 1,
                headers: response_headers.clone(),
                end_stream: false
            })
        );
        client.bytes_received(&build_data_frame(b"Hello HTTP!", true, 1));
        assert_eq!(
            client.next_event(),
            Some(Event::DataReceived {
                stream_id: 1,
                data: Bytes::from_static(b"Hello HTTP!"),
                end_stream: true
            })
        );
        client.bytes_received(&build_data_frame(b"Hello again!", true, 3));
        assert_eq!(
            client.next_event(),
            Some(Event::DataReceived {
                stream_id: 3,
                data: Bytes::from_static(b"Hello again!"),
                end_stream: true
            })
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_http_connect() {
        let mut client = client();
        init_client(client.as_mut());
        let connect_headers = vec![
            header(":method", "CONNECT"),
            header(":authority", "example.com:443"),
        ];
        let stream_id = client.get_available_stream_id().unwrap();
        client.submit_headers(stream_id, &connect_headers, false).unwrap();
        let decoded = decode_headers(&client.bytes_to_send());
        assert_eq!(
            decoded,
            vec![
                (b":method".to_vec(), b"CONNECT".to_vec()),
                (b":authority".to_vec(), b"example.com:443".to_vec()),
            ]
        );
        client.bytes_received(&build_headers_frame(
            &vec![header(":status", "200")],
            false,
            1,
            &mut hpack::Encoder::new(),
        ));
        assert_eq!(
            client.next_event(),
            Some(Event::HeadersReceived {
                stream_id,
                headers: vec![header(":status", "200")],
                end_stream: false
            })
        );
        client.submit_data(stream_id, b"Ping", false).unwrap();
        assert_eq!(client.bytes_to_send().as_ref(), build_data_frame(b"Ping", false, 1));
        client.bytes_received(&build_data_frame(b"Pong", false, 1));
        assert_eq!(
            client.next_event(),
            Some(Event::DataReceived {
                stream_id,
                data: Bytes::from_static(b"Pong"),
                end_stream: false
            })
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_ping_is_acknowledged() {
        let mut client = client();
        init_client(client.as_mut());
        let payload = [1, 2, 3, 4, 5, 6, 7, 8];
        client.bytes_received(&build_frame(FRAME_PING, &payload, 0, 0));
        let frames = split_frames(&client.bytes_to_send());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, FRAME_PING);
        assert_eq!(frames[0].2, payload);
        assert_eq!(client.next_event(), None);
    }

    #[test]
    fn test_goaway_received_is_not_local_termination() {
        let mut client = client();
        init_client(client.as_mut());
        let mut payload = 1u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&0u32.to_be_bytes());
        client.bytes_received(&build_frame(FRAME_GOAWAY, &payload, 0, 0));
        assert_eq!(
            client.next_event(),
            Some(Event::GoawayReceived {
                last_stream_id: 1,
                error_code: 0
            })
        );
        // In-flight exchanges may still complete.
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_send_respects_peer_window() {
        let mut client = client();
        // The peer caps the per-stream window at 5 bytes.
        let mut settings = 4u16.to_be_bytes().to_vec();
        settings.extend_from_slice(&5u32.to_be_bytes());
        client.bytes_received(&build_frame(FRAME_SETTINGS, &settings, 0, 0));
        client.bytes_to_send();

        let stream_id = client.get_available_stream_id().unwrap();
        client
            .submit_headers(stream_id, &build_request_headers("POST"), false)
            .unwrap();
        client.bytes_to_send();
        client.submit_data(stream_id, b"0123456789", true).unwrap();
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_data_frame(b"01234", false, 1)
        );
        // The window update releases the queued remainder.
        client.bytes_received(&build_frame(FRAME_WINDOW_UPDATE, &[0, 0, 0, 100], 0, 1));
        assert_eq!(
            client.bytes_to_send().as_ref(),
            build_data_frame(b"56789", true, 1)
        );
        assert_connection_available(client.as_mut());
    }

    #[test]
    fn test_recv_large_body_produces_window_updates() {
        let mut client = client();
        init_client(client.as_mut());
        send_request(client.as_mut(), "GET");
        client.bytes_received(&build_headers_frame(
            &build_response_headers(),
            false,
            1,
            &mut hpack::Encoder::new(),
        ));
        client.bytes_to_send();
        let chunk = vec![0u8; 16_384];
        client.bytes_received(&build_data_frame(&chunk, false, 1));
        assert!(client.bytes_to_send().is_empty());
        client.bytes_received(&build_data_frame(&chunk, false, 1));
        let frames = split_frames(&client.bytes_to_send());
        let updates: Vec<_> = frames
            .iter()
            .filter(|(kind, _, _)| *kind == FRAME_WINDOW_UPDATE)
            .collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1, 1); // stream window first
        assert_eq!(updates[1].1, 0); // then the connection window
    }
}

mod server_side {
    use super::*;

    #[test]
    fn test_preface_invalid() {
        let mut server = server();
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_SETTINGS);
        server.bytes_received(b"GET / HTTP/1.1\r\n");
        assert_eq!(server.next_event(), Some(terminated(0x01)));
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_GOAWAY);
        assert_connection_expired(server.as_mut());
    }

    #[test]
    fn test_preface() {
        let mut server = server();
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_SETTINGS);
        server.bytes_received(CLIENT_MAGIC);
        assert_eq!(server.next_event(), None);
        server.bytes_received(&build_frame(FRAME_SETTINGS, b"", 0, 0));
        assert_eq!(server.next_event(), None);
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_SETTINGS);
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_recv_invalid() {
        let payloads = [
            build_data_frame(b"Hello HTTP!", true, 1),
            build_headers_frame(&build_request_headers("GET"), true, 0, &mut hpack::Encoder::new()),
            build_headers_frame(&build_request_headers("GET"), true, 2, &mut hpack::Encoder::new()),
        ];
        for payload in payloads {
            let mut server = server();
            init_server(server.as_mut());
            server.bytes_received(&payload);
            assert_eq!(server.next_event(), Some(terminated(0x01)));
            assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_GOAWAY);
            assert_connection_expired(server.as_mut());
        }
    }

    #[test]
    fn test_recv_headers_without_preface_settings() {
        let mut server = server();
        server.bytes_to_send();
        server.bytes_received(CLIENT_MAGIC);
        server.bytes_received(&build_headers_frame(
            &build_request_headers("GET"),
            true,
            1,
            &mut hpack::Encoder::new(),
        ));
        assert_eq!(server.next_event(), Some(terminated(0x01)));
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_GOAWAY);
        assert_connection_expired(server.as_mut());
    }

    #[test]
    fn test_recv_empty_headers() {
        let mut server = server();
        init_server(server.as_mut());
        server.bytes_received(&build_frame(FRAME_HEADERS, b"", FLAG_END_HEADERS, 1));
        assert_eq!(server.next_event(), Some(terminated(0x01)));
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_GOAWAY);
        assert_connection_expired(server.as_mut());
    }

    #[test]
    fn test_recv_get() {
        let mut server = server();
        init_server(server.as_mut());
        let headers = build_request_headers("GET");
        server.bytes_received(&build_headers_frame(&headers, true, 1, &mut hpack::Encoder::new()));
        assert_eq!(
            server.next_event(),
            Some(Event::HeadersReceived {
                stream_id: 1,
                headers,
                end_stream: true
            })
        );
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_recv_get_fragmented() {
        let mut server = server();
        init_server(server.as_mut());
        let headers = build_request_headers("GET");
        let frame = build_headers_frame(&headers, true, 1, &mut hpack::Encoder::new());
        server.bytes_received(&frame[..2]);
        assert_eq!(server.next_event(), None);
        server.bytes_received(&frame[2..]);
        assert_eq!(
            server.next_event(),
            Some(Event::HeadersReceived {
                stream_id: 1,
                headers,
                end_stream: true
            })
        );
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_recv_post_with_multiple_data() {
        let mut server = server();
        init_server(server.as_mut());
        let headers = build_request_headers("POST");
        let mut request = build_headers_frame(&headers, false, 1, &mut hpack::Encoder::new());
        request.extend_from_slice(&build_data_frame(b"Hello ", false, 1));
        request.extend_from_slice(&build_data_frame(b"HTTP!", true, 1));
        server.bytes_received(&request);
        assert_eq!(
            server.next_event(),
            Some(Event::HeadersReceived {
                stream_id: 1,
                headers,
                end_stream: false
            })
        );
        assert_eq!(
            server.next_event(),
            Some(Event::DataReceived {
                stream_id: 1,
                data: Bytes::from_static(b"Hello "),
                end_stream: false
            })
        );
        assert_eq!(
            server.next_event(),
            Some(Event::DataReceived {
                stream_id: 1,
                data: Bytes::from_static(b"HTTP!"),
                end_stream: true
            })
        );
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_recv_post_with_empty_data() {
        let mut server = server();
        init_server(server.as_mut());
        let headers = build_request_headers("POST");
        let mut request = build_headers_frame(&headers, false, 1, &mut hpack::Encoder::new());
        request.extend_from_slice(&build_data_frame(b"", true, 1));
        server.bytes_received(&request);
        assert!(matches!(
            server.next_event(),
            Some(Event::HeadersReceived { .. })
        ));
        assert_eq!(
            server.next_event(),
            Some(Event::DataReceived {
                stream_id: 1,
                data: Bytes::new(),
                end_stream: true
            })
        );
        assert_connection_available(server.as_mut());
    }

    fn recv_request(server: &mut dyn HttpOverTcpProtocol) -> u64 {
        server.bytes_received(&build_headers_frame(
            &build_request_headers("GET"),
            true,
            1,
            &mut hpack::Encoder::new(),
        ));
        match server.next_event() {
            Some(Event::HeadersReceived { stream_id, .. }) => stream_id,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_send_response() {
        let mut server = server();
        init_server(server.as_mut());
        let stream_id = recv_request(server.as_mut());
        let headers = build_response_headers();
        server.submit_headers(stream_id, &headers, false).unwrap();
        let mut encoder = hpack::Encoder::new();
        assert_eq!(
            server.bytes_to_send().as_ref(),
            build_headers_frame(&headers, false, 1, &mut encoder)
        );
        server.submit_data(stream_id, b"Hello HTTP!", true).unwrap();
        assert_eq!(
            server.bytes_to_send().as_ref(),
            build_data_frame(b"Hello HTTP!", true, 1)
        );
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_send_rst_stream() {
        let mut server = server();
        init_server(server.as_mut());
        let stream_id = recv_request(server.as_mut());
        server.submit_stream_reset(stream_id, 0).unwrap();
        assert_eq!(first_frame_type(&server.bytes_to_send()), FRAME_RST_STREAM);
        assert_eq!(
            server.next_event(),
            Some(Event::StreamResetSent {
                stream_id,
                error_code: 0
            })
        );
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_multiple_requests() {
        let mut server = server();
        init_server(server.as_mut());
        let request_headers = build_request_headers("GET");
        let mut request_encoder = hpack::Encoder::new();
        server.bytes_received(&build_headers_frame(
            &request_headers,
            true,
            1,
            &mut request_encoder,
        ));
        assert!(matches!(
            server.next_event(),
            Some(Event::HeadersReceived { stream_id: 1, .. })
        ));
        server.bytes_received(&build_headers_frame(
            &request_headers,
            true,
            3,
            &mut request_encoder,
        ));
        assert!(matches!(
            server.next_event(),
            Some(Event::HeadersReceived { stream_id: 3, .. })
        ));

        // Responses can be sent out of order.
        let mut encoder = hpack::Encoder::new();
        let response_headers = build_response_headers();
        server.submit_headers(3, &response_headers, false).unwrap();
        assert_eq!(
            server.bytes_to_send().as_ref(),
            build_headers_frame(&response_headers, false, 3, &mut encoder)
        );
        server.submit_headers(1, &response_headers, false).unwrap();
        assert_eq!(
            server.bytes_to_send().as_ref(),
            build_headers_frame(&response_headers, false, 1, &mut encoder)
        );
        server.submit_data(1, b"Hello ", true).unwrap();
        assert_eq!(
            server.bytes_to_send().as_ref(),
            build_data_frame(b"Hello ", true, 1)
        );
        server.submit_data(3, b"HTTP!", true).unwrap();
        assert_eq!(
            server.bytes_to_send().as_ref(),
            build_data_frame(b"HTTP!", true, 3)
        );
        assert_connection_available(server.as_mut());
    }

    #[test]
    fn test_http_connect() {
        let mut server = server();
        init_server(server.as_mut());
        let connect_headers = vec![
            header(":method", "CONNECT"),
            header(":authority", "example.com:80"),
        ];
        server.bytes_received(&build_headers_frame(
            &connect_headers,
            false,
            1,
            &mut hpack::Encoder::new(),
        ));
        assert_eq!(
            server.next_event(),
            Some(Event::HeadersReceived {
                stream_id: 1,
                headers: connect_headers,
                end_stream: false
            })
        );
        server
            .submit_headers(1, &[header(":status", "200")], false)
            .unwrap();
        assert_eq!(
            decode_headers(&server.bytes_to_send()),
            vec![(b":status".to_vec(), b"200".to_vec())]
        );
        server.bytes_received(&build_data_frame(b"Ping", false, 1));
        assert_eq!(
            server.next_event(),
            Some(Event::DataReceived {
                stream_id: 1,
                data: Bytes::from_static(b"Ping"),
                end_stream: false
            })
        );
        server.submit_data(1, b"Pong", false).unwrap();
        assert_eq!(server.bytes_to_send().as_ref(), build_data_frame(b"Pong", false, 1));
        assert_connection_available(server.as_mut());
    }
}

mod round_trip {
    use super::*;

    fn pump(client: &mut dyn HttpOverTcpProtocol, server: &mut dyn HttpOverTcpProtocol) {
        loop {
            let from_client = client.bytes_to_send();
            if !from_client.is_empty() {
                server.bytes_received(&from_client);
            }
            let from_server = server.bytes_to_send();
            if !from_server.is_empty() {
                client.bytes_received(&from_server);
            }
            if from_client.is_empty() && from_server.is_empty() {
                return;
            }
        }
    }

    #[test]
    fn test_request_response_between_two_machines() {
        let mut client = client();
        let mut server = server();
        pump(client.as_mut(), server.as_mut());

        let stream_id = client.get_available_stream_id().unwrap();
        client
            .submit_headers(stream_id, &build_request_headers("POST"), false)
            .unwrap();
        client.submit_data(stream_id, b"ping", true).unwrap();
        pump(client.as_mut(), server.as_mut());

        assert_eq!(
            server.next_event(),
            Some(Event::HeadersReceived {
                stream_id,
                headers: build_request_headers("POST"),
                end_stream: false
            })
        );
        assert_eq!(
            server.next_event(),
            Some(Event::DataReceived {
                stream_id,
                data: Bytes::from_static(b"ping"),
                end_stream: true
            })
        );

        server
            .submit_headers(stream_id, &build_response_headers(), false)
            .unwrap();
        server.submit_data(stream_id, b"pong", true).unwrap();
        pump(client.as_mut(), server.as_mut());

        assert_eq!(
            client.next_event(),
            Some(Event::HeadersReceived {
                stream_id,
                headers: build_response_headers(),
                end_stream: false
            })
        );
        assert_eq!(
            client.next_event(),
            Some(Event::DataReceived {
                stream_id,
                data: Bytes::from_static(b"pong"),
                end_stream: true
            })
        );
    }
}
