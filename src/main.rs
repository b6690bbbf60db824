use std::path::PathBuf;

use clap::Parser;
use linkrelay::config::{self, RendezvousConfig};
use linkrelay::rendezvous::RendezvousServer;

#[derive(Parser)]
#[command(name = "linkrelay", about = "Rendezvous server pairing peers by room")]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config: RendezvousConfig = match &cli.config {
        Some(path) => config::load_json(path)?,
        None => RendezvousConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    println!("   linkrelay rendezvous server");
    println!("   Binding to {}", config.bind);
    println!("   Press Ctrl+C to stop\n");

    let server = RendezvousServer::bind(&config).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
