//! Sans-I/O tests of the HTTP/3 state machine.
//!
//! Two protocol instances are wired together by shuttling datagrams between
//! them; no sockets are involved. The server gets a throwaway self-signed
//! certificate and the client skips verification.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use trident::headers::{header, HeaderList};
use trident::proto::h3::{Http3ClientFactory, Http3ServerFactory};
use trident::proto::{
    HttpOverQuicClientFactory, HttpOverQuicProtocol, HttpOverQuicServerFactory, HttpProtocol,
};
use trident::{ClientTlsConfig, Event, ServerTlsConfig};

fn client_addr() -> SocketAddr {
    "127.0.0.1:40001".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "127.0.0.1:40002".parse().unwrap()
}

fn write_self_signed_cert(dir: &tempfile::TempDir) -> ServerTlsConfig {
    let key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("certificate generation");
    let certfile = dir.path().join("cert.pem");
    let keyfile = dir.path().join("key.pem");
    std::fs::File::create(&certfile)
        .unwrap()
        .write_all(key.cert.pem().as_bytes())
        .unwrap();
    std::fs::File::create(&keyfile)
        .unwrap()
        .write_all(key.key_pair.serialize_pem().as_bytes())
        .unwrap();
    ServerTlsConfig {
        certfile: Some(certfile),
        keyfile: Some(keyfile),
    }
}

fn build_pair() -> (
    Box<dyn HttpOverQuicProtocol>,
    Box<dyn HttpOverQuicProtocol>,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let tls = write_self_signed_cert(&dir);
    let server = Http3ServerFactory::default()
        .build(&tls, server_addr())
        .expect("server protocol");
    let client_tls = ClientTlsConfig {
        insecure: true,
        ..ClientTlsConfig::default()
    };
    let client = Http3ClientFactory::default()
        .build(server_addr(), client_addr(), "localhost", &client_tls)
        .expect("client protocol");
    (client, server, dir)
}

/// Shuttles datagrams between the two machines until neither has anything
/// left to say.
fn pump(client: &mut dyn HttpOverQuicProtocol, server: &mut dyn HttpOverQuicProtocol) {
    for _ in 0..64 {
        let now = Instant::now();
        client.clock(now);
        server.clock(now);
        let mut progressed = false;
        for (data, _) in client.datagrams_to_send() {
            progressed = true;
            server.datagram_received((data, client_addr()));
        }
        for (data, _) in server.datagrams_to_send() {
            progressed = true;
            client.datagram_received((data, server_addr()));
        }
        if !progressed {
            return;
        }
    }
    panic!("the connection did not settle");
}

fn drain(protocol: &mut dyn HttpOverQuicProtocol) -> Vec<Event> {
    std::iter::from_fn(|| protocol.next_event()).collect()
}

fn request_headers() -> HeaderList {
    vec![
        header(":method", "GET"),
        header(":scheme", "https"),
        header(":authority", "localhost"),
        header(":path", "/"),
    ]
}

#[test]
fn test_handshake_and_connection_ids() {
    let (mut client, mut server, _dir) = build_pair();
    client.submit_headers(0, &request_headers(), true).unwrap();
    pump(client.as_mut(), server.as_mut());

    // The server owns the original destination id plus its own host id.
    assert_eq!(server.connection_ids().len(), 2);
    assert_eq!(client.connection_ids().len(), 1);
    assert!(client.is_available());
    assert!(server.is_available());
}

#[test]
fn test_request_response_round_trip() {
    let (mut client, mut server, _dir) = build_pair();

    let stream_id = client.get_available_stream_id().unwrap();
    assert_eq!(stream_id, 0);
    client.submit_headers(stream_id, &request_headers(), true).unwrap();
    pump(client.as_mut(), server.as_mut());

    let server_events = drain(server.as_mut());
    let got_request = server_events.iter().any(|event| {
        matches!(
            event,
            Event::HeadersReceived {
                stream_id: 0,
                headers,
                ..
            } if *headers == request_headers()
        )
    });
    assert!(got_request, "missing request headers in {server_events:?}");
    let request_ended = server_events.iter().any(|event| {
        event.stream_id() == Some(0)
            && matches!(
                event,
                Event::HeadersReceived {
                    end_stream: true, ..
                } | Event::DataReceived {
                    end_stream: true, ..
                }
            )
    });
    assert!(request_ended, "the request never ended: {server_events:?}");

    server
        .submit_headers(
            0,
            &[header(":status", "200"), header("content-length", "10")],
            false,
        )
        .unwrap();
    server.submit_data(0, b"It works!\n", true).unwrap();
    pump(client.as_mut(), server.as_mut());

    let client_events = drain(client.as_mut());
    assert!(
        client_events.contains(&Event::HeadersReceived {
            stream_id: 0,
            headers: vec![header(":status", "200"), header("content-length", "10")],
            end_stream: false,
        }),
        "missing response headers in {client_events:?}"
    );
    let body: Vec<u8> = client_events
        .iter()
        .filter_map(|event| match event {
            Event::DataReceived { data, .. } => Some(data.to_vec()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(body, b"It works!\n");
    let ended = client_events.iter().any(|event| {
        matches!(
            event,
            Event::HeadersReceived {
                end_stream: true, ..
            } | Event::DataReceived {
                end_stream: true, ..
            }
        )
    });
    assert!(ended, "the response stream never ended: {client_events:?}");
}

#[test]
fn test_parallel_requests() {
    let (mut client, mut server, _dir) = build_pair();

    assert_eq!(client.get_available_stream_id().unwrap(), 0);
    client.submit_headers(0, &request_headers(), true).unwrap();
    assert_eq!(client.get_available_stream_id().unwrap(), 4);
    client.submit_headers(4, &request_headers(), true).unwrap();
    pump(client.as_mut(), server.as_mut());

    let stream_ids: Vec<u64> = drain(server.as_mut())
        .iter()
        .filter_map(Event::stream_id)
        .collect();
    assert!(stream_ids.contains(&0));
    assert!(stream_ids.contains(&4));
}

#[test]
fn test_out_of_order_stream_id_is_rejected() {
    let (mut client, _server, _dir) = build_pair();
    assert!(client.submit_headers(8, &request_headers(), true).is_err());
}

#[test]
fn test_small_first_datagram_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let tls = write_self_signed_cert(&dir);
    let mut server = Http3ServerFactory::default()
        .build(&tls, server_addr())
        .unwrap();
    server.clock(Instant::now());

    // A long-header packet shorter than 1200 bytes cannot be an Initial
    // packet; the machine must ignore it entirely.
    let mut packet = vec![0xc0];
    packet.extend_from_slice(&1u32.to_be_bytes());
    packet.push(16);
    packet.extend_from_slice(&[0xab; 16]);
    packet.push(16);
    packet.extend_from_slice(&[0xcd; 16]);
    packet.push(0);
    packet.resize(600, 0);

    server.datagram_received((Bytes::from(packet), client_addr()));
    assert_eq!(server.next_event(), None);
    assert!(server.datagrams_to_send().is_empty());
    assert!(server.connection_ids().is_empty());
}

#[test]
fn test_submit_close_terminates() {
    let (mut client, mut server, _dir) = build_pair();
    client.submit_headers(0, &request_headers(), true).unwrap();
    pump(client.as_mut(), server.as_mut());
    drain(client.as_mut());
    drain(server.as_mut());

    client.submit_close(0).unwrap();
    pump(client.as_mut(), server.as_mut());

    // The peer observes the CONNECTION_CLOSE right away; the local side
    // only expires once its drain timeout fires, so it is not asserted.
    let server_events = drain(server.as_mut());
    assert!(
        server_events.contains(&Event::ConnectionTerminated {
            error_code: 0,
            message: None,
        }),
        "server saw {server_events:?}"
    );
}
