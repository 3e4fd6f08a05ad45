use clap::Parser;
use log::info;
use server::config::ManagerConfig;
use server::manager::LobbyManager;

/// Main-method of the application.
/// Parses command-line arguments, starts the lobby manager, and keeps
/// it running until ctrl-c.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Interface lobby sockets bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Create this lobby at startup (useful without a control plane)
        #[clap(long)]
        lobby: Option<String>,
        /// Admin id recorded for the startup lobby
        #[clap(long, default_value = "admin")]
        admin: String,
    }

    env_logger::init();
    let args = Args::parse();

    let manager = LobbyManager::new(ManagerConfig::default()).await;
    info!("lobby manager started on {}", args.host);

    if let Some(lobby_name) = &args.lobby {
        let (reliable_port, unreliable_port) = manager
            .create_lobby(lobby_name, &args.admin, &args.host)
            .await?;
        info!(
            "startup lobby {} listening on {}:{} (reliable) and {}:{} (unreliable)",
            lobby_name, args.host, reliable_port, args.host, unreliable_port
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    manager.shutdown().await;

    Ok(())
}
