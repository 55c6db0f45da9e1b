pub mod completions;
pub mod config;
pub mod history;
pub mod optimize;

use pomotune_core::{Config, CsvHistoryStore, OptimizationSession, SurrogateOptimizer};

/// Session over the CSV store in the data directory, using the saved
/// optimizer settings.
pub fn open_session() -> Result<OptimizationSession<CsvHistoryStore>, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = CsvHistoryStore::open()?;
    Ok(OptimizationSession::new(
        store,
        SurrogateOptimizer::with_config(config.optimizer),
    ))
}
