use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use linkrelay::config::{self, SessionConfig};
use linkrelay::protocol::DataType;
use linkrelay::rendezvous::RoomId;
use linkrelay::session::{FatalErrorHook, PeerSession, SessionError};
use tracing::Level;

#[derive(Parser)]
#[command(name = "linkrelay-peer", about = "Exchange one message with a peer in a room")]
struct Cli {
    /// Room shared with the other peer (0-99999)
    #[arg(short, long)]
    room: u32,

    /// JSON session config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rendezvous server URL, e.g. ws://relay.example:11111
    #[arg(short, long)]
    server: Option<String>,

    /// Host to listen on for the direct connection
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 = ephemeral)
    #[arg(long)]
    port: Option<u16>,

    /// Host announced to the peer, if different from --host
    #[arg(long)]
    advertise: Option<String>,

    /// 3-character type id to exchange under
    #[arg(short = 't', long, default_value = "MSG")]
    data_type: String,

    /// Payload to send
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// Give up if the peer's message has not arrived after this many seconds
    #[arg(long)]
    wait_secs: Option<u64>,

    /// Keep the connection open this long after receiving, so the peer can pull
    #[arg(long, default_value_t = 500)]
    linger_ms: u64,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let mut config: SessionConfig = match &cli.config {
        Some(path) => config::load_json(path)?,
        None => SessionConfig::default(),
    };
    config.room = RoomId::new(cli.room)?;
    if let Some(server) = cli.server {
        config.rendezvous_url = server;
    }
    if let Some(host) = cli.host {
        config.bind_host = host;
    }
    if let Some(port) = cli.port {
        config.bind_port = port;
    }
    if cli.advertise.is_some() {
        config.advertise_host = cli.advertise;
    }

    let data_type = DataType::try_from(cli.data_type.as_str())?;

    let on_fatal: FatalErrorHook = Arc::new(|e: &SessionError| eprintln!("Session failed: {}", e));
    let session = PeerSession::start(config, Some(on_fatal));
    let peer = session.handle();

    println!("Waiting for a peer in room {:05}...", cli.room);
    let role = peer.connected().await?;
    println!("Connected as {:?}", role);

    peer.publish(data_type, cli.message.into_bytes()).await?;
    let received = peer
        .wait_for(
            data_type,
            Duration::from_millis(100),
            cli.wait_secs.map(Duration::from_secs),
        )
        .await?;
    println!("> Peer: {}", String::from_utf8_lossy(&received));

    tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;
    session.abort();
    Ok(())
}
