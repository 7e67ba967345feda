//! Loopback WebSocket bridge.
//!
//! Runs both ends of a postbridge connection in one process: an initiator
//! behind a WebSocket server and a responder that dials it. Each side then
//! calls the other.
//!
//!   cargo run -p postbridge-demo-ws-bridge -- --debug
//!   POSTBRIDGE_TIMEOUT_MS=500 cargo run -p postbridge-demo-ws-bridge

mod channel;

use anyhow::Context;
use channel::WsChannel;
use clap::Parser;
use postbridge_rpc::{ConnectConfig, ConnectOptions, LocalMethod, Methods, Rejection};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Bridge two postbridge endpoints over a local WebSocket")]
struct Args {
    /// Port to listen on. 0 picks a free one.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// TOML file with connection settings (`timeout_ms`, `debug`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Handshake timeout in milliseconds.
    #[arg(long, env = "POSTBRIDGE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Trace protocol events.
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn options(&self) -> anyhow::Result<ConnectOptions> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str::<ConnectConfig>(&text)?
            }
            None => ConnectConfig::default(),
        };
        if self.timeout_ms.is_some() {
            config.timeout_ms = self.timeout_ms;
        }
        config.debug |= self.debug;
        Ok(config.into())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    let directive = format!("postbridge_rpc={default_level}").parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    let options = args.options()?;
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], args.port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Listening on ws://{}", addr);

    let (served_tx, served_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();
    let server = tokio::spawn(initiator(listener, options.clone(), served_tx, done_rx));

    let outcome = responder(addr, options, served_rx).await;
    let _ = done_tx.send(());
    server.await??;
    outcome
}

/// Accept one WebSocket and serve `add` and `text.greet` as the initiator.
async fn initiator(
    listener: TcpListener,
    options: ConnectOptions,
    served: oneshot::Sender<()>,
    done: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let (stream, peer) = listener.accept().await?;
    tracing::debug!("New connection from {}", peer);
    let ws = tokio_tungstenite::accept_async(stream).await?;

    let methods = Methods::new()
        .with(
            "add",
            LocalMethod::sync(|args: Vec<Value>| {
                Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
            }),
        )?
        .with(
            "text.greet",
            LocalMethod::new(|args: Vec<Value>| async move {
                match args.first().and_then(Value::as_str) {
                    Some(name) => Ok(json!(format!("Hello, {name}!"))),
                    None => Err(Rejection::Value(json!("greet() needs a name"))),
                }
            }),
        )?;

    let connection = postbridge_rpc::connect(WsChannel::spawn(ws), methods, options);
    let remote = connection.establishment().await?;
    let uptime = remote.call("uptime", vec![]).await?;
    tracing::info!("Responder reports uptime {}", uptime);
    let _ = served.send(());

    let _ = done.await;
    connection.destroy();
    Ok(())
}

/// Dial the initiator, expose `uptime`, and call back into it.
async fn responder(
    addr: SocketAddr,
    options: ConnectOptions,
    served: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await?;

    let started = tokio::time::Instant::now();
    let methods = Methods::new().with(
        "uptime",
        LocalMethod::sync(move |_args: Vec<Value>| {
            Ok(json!(format!("{:?}", started.elapsed())))
        }),
    )?;

    let connection = postbridge_rpc::connect_to_initiator(WsChannel::spawn(ws), methods, options);
    let remote = connection.establishment().await?;
    tracing::info!("Connected; initiator exposes {:?}", remote.method_names());

    let sum = remote.call("add", vec![json!(2), json!(3)]).await?;
    tracing::info!("add(2, 3) = {}", sum);

    let greeting = remote.call("text.greet", vec![json!("postbridge")]).await?;
    tracing::info!("text.greet() = {}", greeting);

    match remote.call("text.greet", vec![]).await {
        Ok(value) => tracing::info!("text.greet() = {}", value),
        Err(e) => tracing::info!("text.greet() rejected: {}", e),
    }

    // Keep serving until the initiator's own call has gone through.
    let _ = served.await;
    connection.destroy();
    Ok(())
}
