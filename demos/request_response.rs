// ABOUTME: Minimal client+server demo over a real TCP loopback connection
// ABOUTME: Shows the handshake, a request/response round trip, and a clean close

use argh::FromArgs;
use duplex_session::{CloseReason, JsonEncoder, Role, Session, SessionBuilder};
use std::error::Error;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Request/response demo for duplex-session: starts a local server, connects
/// a client to it, sends one request, and prints the reply.
#[derive(FromArgs)]
struct CliArgs {
    /// whether to enable debug logging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the port to listen on and connect to (default: 7800)
    #[argh(option, short = 'p')]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let port = cli_args.port.unwrap_or(7800);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "listening");

    let server_task = tokio::spawn(async move {
        let (socket, addr) = listener.accept().await.expect("accept");
        info!(%addr, "accepted connection");

        let server: Session<String> = SessionBuilder::new(Role::Server)
            .register_encoder("json", Arc::new(JsonEncoder::<String>::new()))
            .on_request(|req: String| {
                info!(request = %req, "server received request");
                Some("pong".to_string())
            })
            .build(socket);

        while !server.is_ready() {
            tokio::task::yield_now().await;
        }
        // keep the server session alive long enough to answer
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        server.close(true, CloseReason::Requested).await;
    });

    let socket = TcpStream::connect(("127.0.0.1", port)).await?;
    let client: Session<String> = SessionBuilder::new(Role::Client)
        .register_encoder("json", Arc::new(JsonEncoder::<String>::new()))
        .build(socket);

    let reply = client.send_request("ping".to_string()).await?;
    info!(reply = %reply, "got reply");

    client.close(true, CloseReason::Requested).await;
    server_task.await?;
    Ok(())
}
