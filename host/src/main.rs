mod instance;
mod routes;

use clap::Parser;
use instance::InstanceManager;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, then serves the control-plane routes and
/// the per-instance console WebSocket until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Shell command every instance runs (receives INSTANCE_ID)
        #[clap(short, long, default_value = "cat")]
        command: String,
    }

    let args = Args::parse();

    let manager = Arc::new(InstanceManager::new(args.command));
    let address = format!("{}:{}", args.host, args.port);
    routes::serve(manager, &address).await?;

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down gracefully...");
    Ok(())
}
