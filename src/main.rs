use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grabdrop::{
    publish_gesture, run_receiver, run_sender, ClientOptions, Config, Gesture, RelayServer,
    RoomId, SelectedFile,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "grabdrop")]
#[command(about = "Gesture-triggered peer-to-peer file drop", long_about = None)]
struct Cli {
    /// Config file (default: ~/.grabdrop/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the signaling relay
    Relay {
        #[arg(long)]
        addr: Option<String>,
    },
    /// Create a room and send FILE on GRAB then DROP
    Send {
        #[arg(long)]
        room: Option<String>,
        /// Relay WebSocket URL
        #[arg(long)]
        relay: Option<String>,
        /// File to send
        file: PathBuf,
    },
    /// Join a room and save received files
    Receive {
        #[arg(long)]
        room: Option<String>,
        /// Relay WebSocket URL
        #[arg(long)]
        relay: Option<String>,
        /// Directory for received files
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Publish a gesture into a room (GRAB, DROP, OPEN or PUSH)
    Gesture {
        #[arg(long)]
        room: Option<String>,
        /// Relay WebSocket URL
        #[arg(long)]
        relay: Option<String>,
        gesture: Gesture,
    },
}

fn client_options(config: &Config, room: Option<String>, relay: Option<String>) -> Result<ClientOptions> {
    let room = room.unwrap_or_else(|| config.client.room_id.clone());
    Ok(ClientOptions {
        relay_url: relay.unwrap_or_else(|| config.client.relay_url.clone()),
        room_id: RoomId::new(room).context("Invalid room id")?,
        webrtc: config.webrtc(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("grabdrop=info,grabdrop_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Relay { addr } => {
            let addr = addr.unwrap_or_else(|| config.server.bind_address.clone());
            println!("Signaling relay: ws://{}", addr);
            println!("Health: http://{}/health", addr);
            RelayServer::new(addr).run().await?;
        }
        Commands::Send { room, relay, file } => {
            let options = client_options(&config, room, relay)?;
            let file = SelectedFile::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            println!(
                "Sending {} ({} bytes) in room {}",
                file.metadata().name,
                file.metadata().size,
                options.room_id
            );
            println!("Waiting for GRAB then DROP...");
            run_sender(options, file).await?;
        }
        Commands::Receive { room, relay, out } => {
            let options = client_options(&config, room, relay)?;
            println!("Receiving into {} from room {}", out.display(), options.room_id);
            run_receiver(options, out).await?;
        }
        Commands::Gesture { room, relay, gesture } => {
            let options = client_options(&config, room, relay)?;
            publish_gesture(&options.relay_url, options.room_id, gesture).await?;
        }
    }

    Ok(())
}
