//! # Pomotune Core Library
//!
//! This library recommends Pomodoro work/break timings per user by running a
//! sequential model-based optimizer over the user's past focus scores.
//! The CLI and the HTTP server are thin layers over the same core library.
//!
//! ## Architecture
//!
//! - **Space**: The two fixed targets (`round`, `session`) and their bounded
//!   parameter dimensions
//! - **History**: One append-mostly trial log per (user, target), stored as CSV
//! - **Optimizer**: Latin hypercube initial design, then a Gaussian process
//!   surrogate with Expected Improvement
//! - **Session**: One request through load, record, propose and persist
//!
//! ## Key Components
//!
//! - [`OptimizationSession`]: Request orchestration with per-key locking
//! - [`SurrogateOptimizer`]: Stateless proposal engine
//! - [`CsvHistoryStore`]: File-backed trial history
//! - [`Config`]: Application configuration management

pub mod config;
pub mod error;
pub mod history;
pub mod optimizer;
pub mod session;
pub mod space;

pub use config::{data_dir, Config, ServerConfig};
pub use error::{ConfigError, CoreError, HistoryError, OptimizerError, ValidationError};
pub use history::{
    CsvHistoryStore, HistoryKey, HistoryStore, InMemoryHistoryStore, TrialOutcome, TrialRecord,
    TrialUpdate, UserId, WriteOutcome,
};
pub use optimizer::{
    BestTrial, Observation, OptimizerConfig, Proposal, ProposalSource, SurrogateOptimizer,
};
pub use session::{
    KeyedLocks, NamedValue, OptimizationSession, Recommendation, RoundRecommendation,
    SessionRecommendation,
};
pub use space::{Dimension, ParameterSpace, Target, ValueKind};
