//! The `trident` command-line front-end.
//!
//! Three subcommands: `client` issues requests, `server` serves a built-in
//! gateway application, `proxy` tunnels CONNECT requests. All of them speak
//! HTTP/1, HTTP/2, and HTTP/3 depending on the flags.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::client::{Client, ClientProtocol, Origin, Request, Url};
use crate::proto::Implementations;
use crate::server::{demos, Endpoint, GatewayServer, ProxyServer, ServerProtocol};
use crate::{Error, Result};

#[derive(Parser)]
#[command(
    name = "trident",
    version,
    about = "HTTP/{1,2,3} client, server, and proxy."
)]
struct Cli {
    /// Log level filter (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn", value_name = "LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Perform HTTP requests.
    Client(ClientArgs),
    /// Serve a built-in gateway application.
    Server(ServerArgs),
    /// Run a CONNECT-tunneling HTTP proxy.
    Proxy(ProxyArgs),
}

#[derive(Args)]
struct ProtocolArgs {
    /// Open TCP connections; HTTP/2 is selected via ALPN in a TLS
    /// handshake, with HTTP/1.1 as the fallback. This is the default.
    #[arg(long, group = "protocol")]
    tcp: bool,

    /// Use HTTP/1.1.
    #[arg(long, group = "protocol")]
    http1: bool,

    /// Use HTTP/2.
    #[arg(long, group = "protocol")]
    http2: bool,

    /// Use HTTP/3. Opens QUIC connections instead of TCP connections.
    #[arg(long, group = "protocol")]
    http3: bool,
}

impl ProtocolArgs {
    fn client_protocol(&self) -> ClientProtocol {
        match (self.http1, self.http2, self.http3) {
            (true, _, _) => ClientProtocol::Http1,
            (_, true, _) => ClientProtocol::Http2,
            (_, _, true) => ClientProtocol::Http3,
            _ => ClientProtocol::Tcp,
        }
    }

    fn server_protocol(&self) -> ServerProtocol {
        match (self.tcp, self.http1, self.http2, self.http3) {
            (true, _, _, _) => ServerProtocol::Tcp,
            (_, true, _, _) => ServerProtocol::Http1,
            (_, _, true, _) => ServerProtocol::Http2,
            (_, _, _, true) => ServerProtocol::Http3,
            _ => ServerProtocol::All,
        }
    }
}

#[derive(Args)]
struct ImplArgs {
    /// Name of the HTTP/1 implementation to use.
    #[arg(long = "http1-impl", value_name = "NAME", default_value = "default")]
    http1_impl: String,

    /// Name of the HTTP/2 implementation to use.
    #[arg(long = "http2-impl", value_name = "NAME", default_value = "default")]
    http2_impl: String,

    /// Name of the HTTP/3 implementation to use.
    #[arg(long = "http3-impl", value_name = "NAME", default_value = "default")]
    http3_impl: String,
}

impl ImplArgs {
    fn implementations(&self) -> Implementations {
        Implementations {
            http1: self.http1_impl.clone(),
            http2: self.http2_impl.clone(),
            http3: self.http3_impl.clone(),
        }
    }
}

#[derive(Args)]
struct ClientArgs {
    /// URLs to request.
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,

    /// HTTP method to use.
    #[arg(short = 'X', long, default_value = "GET", value_name = "METHOD")]
    method: String,

    /// Data to send as the request body.
    #[arg(short = 'd', long, value_name = "DATA")]
    data: Option<String>,

    /// Use the given certificate file to verify peers.
    #[arg(long, value_name = "FILE")]
    cacert: Option<PathBuf>,

    /// Proceed even when a peer's TLS certificate is invalid.
    #[arg(short = 'k', long)]
    insecure: bool,

    #[command(flatten)]
    protocol: ProtocolArgs,

    /// HTTP proxy in URL-like format: {http,https}://HOST[:PORT]
    #[arg(long, value_name = "PROXY")]
    proxy: Option<String>,

    /// Like --tcp, but for proxy connections.
    #[arg(long, group = "proxy_protocol")]
    proxy_tcp: bool,

    /// Like --http1, but for proxy connections.
    #[arg(long, group = "proxy_protocol")]
    proxy_http1: bool,

    /// Like --http2, but for proxy connections.
    #[arg(long, group = "proxy_protocol")]
    proxy_http2: bool,

    /// Like --http3, but for proxy connections.
    #[arg(long, group = "proxy_protocol")]
    proxy_http3: bool,

    #[command(flatten)]
    impls: ImplArgs,
}

impl ClientArgs {
    fn proxy_protocol(&self) -> ClientProtocol {
        match (self.proxy_http1, self.proxy_http2, self.proxy_http3) {
            (true, _, _) => ClientProtocol::Http1,
            (_, true, _) => ClientProtocol::Http2,
            (_, _, true) => ClientProtocol::Http3,
            _ => ClientProtocol::Tcp,
        }
    }
}

#[derive(Args)]
struct ServerArgs {
    /// Built-in application to serve: `hello` or `echo`.
    #[arg(value_name = "APP")]
    app: String,

    /// Endpoints to listen at: [{http|https}://]HOST:PORT
    #[arg(required = true, value_name = "ENDPOINT")]
    endpoints: Vec<String>,

    #[command(flatten)]
    tls: ServerTlsArgs,

    #[command(flatten)]
    protocol: ProtocolArgs,

    #[command(flatten)]
    impls: ImplArgs,
}

#[derive(Args)]
struct ProxyArgs {
    /// Endpoints to listen at: [{http|https}://]HOST:PORT
    #[arg(required = true, value_name = "ENDPOINT")]
    endpoints: Vec<String>,

    #[command(flatten)]
    tls: ServerTlsArgs,

    #[command(flatten)]
    protocol: ProtocolArgs,

    #[command(flatten)]
    impls: ImplArgs,
}

#[derive(Args)]
struct ServerTlsArgs {
    /// File with a TLS certificate chain in PEM format.
    #[arg(long, value_name = "FILE")]
    cert: Option<PathBuf>,

    /// File with the private key for the certificate.
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,
}

/// Entry point of the command-line utility.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("trident: failed to start the runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(async {
        match cli.command {
            Command::Client(args) => run_client(args).await,
            Command::Server(args) => run_server(args).await,
            Command::Proxy(args) => run_proxy(args).await,
        }
    });
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("trident: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let mut client = Client::new();
    client.protocol = args.protocol.client_protocol();
    client.tls_config.insecure = args.insecure;
    client.tls_config.cafile = args.cacert.clone();
    client.implementations = args.impls.implementations();
    if let Some(proxy) = &args.proxy {
        client.proxy_origin = Some(Origin::parse(proxy)?);
        client.proxy_protocol = args.proxy_protocol();
    }
    let session = client.session()?;
    let mut failed = false;
    for url in &args.urls {
        let mut request = Request::new(args.method.clone(), Url::parse(url)?);
        if let Some(data) = &args.data {
            request = request.with_content(data.clone().into_bytes());
        }
        match session.dispatch(request).await {
            Ok(response) => {
                eprintln!("{} {}", response.status, url);
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(&response.content);
                let _ = stdout.flush();
            }
            Err(e) => {
                eprintln!("trident: {url}: {e}");
                failed = true;
            }
        }
    }
    session.close().await;
    if failed {
        return Err(Error::usage("one or more requests failed"));
    }
    Ok(())
}

fn parse_endpoints(values: &[String]) -> Result<Vec<Endpoint>> {
    values.iter().map(|value| Endpoint::parse(value)).collect()
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let app = demos::find(&args.app)
        .ok_or_else(|| Error::invalid_input(format!("unknown application: {:?}", args.app)))?;
    let endpoints = parse_endpoints(&args.endpoints)?;
    let mut server = GatewayServer::new(app);
    server.options.protocol = args.protocol.server_protocol();
    server.options.tls_config.certfile = args.tls.cert.clone();
    server.options.tls_config.keyfile = args.tls.key.clone();
    server.options.implementations = args.impls.implementations();
    server.run(&endpoints).await
}

async fn run_proxy(args: ProxyArgs) -> Result<()> {
    let endpoints = parse_endpoints(&args.endpoints)?;
    let mut proxy = ProxyServer::new();
    proxy.options.protocol = args.protocol.server_protocol();
    proxy.options.tls_config.certfile = args.tls.cert.clone();
    proxy.options.tls_config.keyfile = args.tls.key.clone();
    proxy.options.implementations = args.impls.implementations();
    proxy.run(&endpoints).await
}
