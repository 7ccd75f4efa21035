//! End-to-end tests over loopback sockets: real listeners, the connection
//! pool, the gateway dispatcher, and the CONNECT proxy.

use std::time::Duration;

use trident::client::{Client, ClientProtocol, Origin, Request, Url};
use trident::server::{demos, Endpoint, GatewayServer, ProxyServer, ServerProtocol};

async fn start_gateway(app: &str, port: u16, protocol: ServerProtocol) {
    let app = demos::find(app).expect("known demo app");
    let mut server = GatewayServer::new(app);
    server.options.protocol = protocol;
    let endpoints = vec![Endpoint::parse(&format!("127.0.0.1:{port}")).unwrap()];
    tokio::spawn(async move {
        if let Err(e) = server.run(&endpoints).await {
            eprintln!("gateway server failed: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
}

async fn start_proxy(port: u16) {
    let mut proxy = ProxyServer::new();
    proxy.options.protocol = ServerProtocol::Http1;
    let endpoints = vec![Endpoint::parse(&format!("127.0.0.1:{port}")).unwrap()];
    tokio::spawn(async move {
        if let Err(e) = proxy.run(&endpoints).await {
            eprintln!("proxy server failed: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn client(protocol: ClientProtocol) -> Client {
    let mut client = Client::new();
    client.protocol = protocol;
    client
}

async fn with_deadline<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(15), fut)
        .await
        .expect("the test deadline passed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http1_gateway_echo() {
    with_deadline(async {
        start_gateway("echo", 7851, ServerProtocol::Http1).await;
        let session = client(ClientProtocol::Http1).session().unwrap();

        let response = session
            .dispatch(Request::get("http://127.0.0.1:7851/hello").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        let content = String::from_utf8(response.content).unwrap();
        assert!(content.starts_with("GET /hello\n"), "echoed: {content}");
        assert!(content.contains("host: 127.0.0.1:7851"), "echoed: {content}");

        let request = Request::new("POST", Url::parse("http://127.0.0.1:7851/submit").unwrap())
            .with_content("ping-pong");
        let response = session.dispatch(request).await.unwrap();
        assert_eq!(response.status, 200);
        let content = String::from_utf8(response.content).unwrap();
        assert!(content.starts_with("POST /submit\n"), "echoed: {content}");
        assert!(content.ends_with("ping-pong"), "echoed: {content}");

        session.close().await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http2_gateway_echo() {
    with_deadline(async {
        start_gateway("echo", 7852, ServerProtocol::Http2).await;
        let session = client(ClientProtocol::Http2).session().unwrap();

        let request = Request::new("POST", Url::parse("http://127.0.0.1:7852/h2").unwrap())
            .with_content("over http/2");
        let response = session.dispatch(request).await.unwrap();
        assert_eq!(response.status, 200);
        let content = String::from_utf8(response.content).unwrap();
        assert!(content.starts_with("POST /h2\n"), "echoed: {content}");
        assert!(content.ends_with("over http/2"), "echoed: {content}");

        session.close().await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http2_concurrent_requests_share_a_connection() {
    with_deadline(async {
        start_gateway("hello", 7853, ServerProtocol::Http2).await;
        let session = client(ClientProtocol::Http2).session().unwrap();

        let (a, b) = tokio::join!(
            session.dispatch(Request::get("http://127.0.0.1:7853/a").unwrap()),
            session.dispatch(Request::get("http://127.0.0.1:7853/b").unwrap()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.status, 200);
        assert_eq!(b.status, 200);
        assert_eq!(a.content, b"Hello from an HTTP/2 connection!\n");
        assert_eq!(b.content, b"Hello from an HTTP/2 connection!\n");

        session.close().await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_tunnel_through_proxy() {
    with_deadline(async {
        start_gateway("hello", 7854, ServerProtocol::Http1).await;
        start_proxy(7855).await;

        let mut client = client(ClientProtocol::Http1);
        client.proxy_origin = Some(Origin::parse("http://127.0.0.1:7855").unwrap());
        client.proxy_protocol = ClientProtocol::Http1;
        let session = client.session().unwrap();

        let response = session
            .dispatch(Request::get("http://127.0.0.1:7854/").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content, b"Hello from an HTTP/1 connection!\n");

        session.close().await;
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sequential_requests_reuse_the_http1_connection() {
    with_deadline(async {
        start_gateway("hello", 7856, ServerProtocol::Http1).await;
        let session = client(ClientProtocol::Http1).session().unwrap();

        for _ in 0..3 {
            let response = session
                .dispatch(Request::get("http://127.0.0.1:7856/").unwrap())
                .await
                .unwrap();
            assert_eq!(response.status, 200);
        }

        session.close().await;
    })
    .await;
}
