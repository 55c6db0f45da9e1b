use clap::Parser;
use pomotune_core::{Config, CsvHistoryStore, OptimizationSession, SurrogateOptimizer};
use pomotune_server::{serve, AppState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pomotune-server", version, about = "Pomotune HTTP API")]
struct Args {
    /// Listen address, overrides `server.address` from the config file
    #[arg(long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pomotune_server=info,pomotune_core=info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!(error = %e, "server stopped");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = CsvHistoryStore::open()?;
    tracing::info!(data_dir = %store.root().display(), "history store opened");

    let optimizer = SurrogateOptimizer::with_config(config.optimizer);
    let session = OptimizationSession::new(store, optimizer);
    let address = args.address.unwrap_or(config.server.address);
    serve(Arc::new(AppState::new(session)), &address).await?;
    Ok(())
}
