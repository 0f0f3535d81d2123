// ABOUTME: Long-running client example demonstrating the session's built-in ping loop
// ABOUTME: Connects, issues periodic requests, and logs liveness until the run duration elapses

//! # Long-Running duplex-session Client
//!
//! Connects to a server, relies on the session's own ping loop for liveness
//! detection (no separate keep-alive manager needed - it's part of the
//! session itself), and optionally issues a request on a fixed interval
//! until `--run-duration` elapses or the connection dies.
//!
//! ```bash
//! cargo run --example long_running_client -- --host 127.0.0.1 --port 7800
//! cargo run --example long_running_client -- \
//!   --host 127.0.0.1 --port 7800 \
//!   --ping-interval-ms 5000 --request-interval 10 --run-duration 120
//! ```

use argh::FromArgs;
use duplex_session::{CloseReason, JsonEncoder, Role, Session, SessionBuilder, SessionConfig};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Long-running client exercising duplex-session's ping loop and request path.
#[derive(FromArgs)]
struct CliArgs {
    /// whether to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the hostname or IP address to connect to (default: 127.0.0.1)
    #[argh(option)]
    host: Option<String>,

    /// the port to connect to (default: 7800)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// ping interval in milliseconds (default: 30000)
    #[argh(option)]
    ping_interval_ms: Option<u64>,

    /// seconds between periodic requests; omit to send none
    #[argh(option)]
    request_interval: Option<u64>,

    /// how long to run in seconds (default: 300)
    #[argh(option)]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let host = cli_args.host.unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = cli_args.port.unwrap_or(7800);
    let run_duration = Duration::from_secs(cli_args.run_duration.unwrap_or(300));
    let ping_interval = Duration::from_millis(cli_args.ping_interval_ms.unwrap_or(30_000));

    info!("connecting to {host}:{port}");
    let socket = TcpStream::connect((host.as_str(), port)).await.map_err(|e| {
        error!("connection failed: {e}");
        Box::<dyn Error>::from(e.to_string())
    })?;

    let config = SessionConfig::default().with_ping_interval(ping_interval);
    let session: Session<String> = SessionBuilder::new(Role::Client)
        .config(config)
        .register_encoder("json", Arc::new(JsonEncoder::<String>::new()))
        .build(socket);

    while !session.is_ready() {
        if session.close_reason().is_some() {
            error!("session closed before becoming ready: {:?}", session.close_reason());
            return Ok(());
        }
        tokio::task::yield_now().await;
    }
    info!("session ready, ping interval {:?}", ping_interval);

    let deadline = tokio::time::Instant::now() + run_duration;
    let mut tick = cli_args
        .request_interval
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));

    loop {
        if tokio::time::Instant::now() >= deadline {
            info!("run duration elapsed, closing");
            break;
        }
        if let Some(reason) = session.close_reason() {
            warn!(?reason, "session closed unexpectedly");
            return Ok(());
        }

        match &mut tick {
            Some(interval) => {
                tokio::select! {
                    _ = interval.tick() => {
                        match session.send_request("heartbeat".to_string()).await {
                            Ok(reply) => info!(%reply, "periodic request succeeded"),
                            Err(e) => warn!(error = %e, "periodic request failed"),
                        }
                    }
                    _ = sleep(Duration::from_secs(1)) => {}
                }
            }
            None => sleep(Duration::from_secs(1)).await,
        }
    }

    session.close(true, CloseReason::Requested).await;
    Ok(())
}
