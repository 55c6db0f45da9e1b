//! Core error types for pomotune-core.
//!
//! This module defines the error hierarchy using thiserror. Each layer
//! (history store, optimizer, configuration) has its own enum and
//! [`CoreError`] wraps them for callers that drive a whole session.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for pomotune-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Trial history errors (file access, malformed rows)
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Configuration errors (unknown target, config file problems)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Surrogate optimizer errors
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    /// Validation errors on caller-supplied input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the error was caused by the caller's input rather than by
    /// server-side state.
    ///
    /// Unknown targets, invalid input and an unscored pending proposal are
    /// client errors. Corrupted history, optimizer failures and I/O are
    /// server errors.
    pub fn is_client_error(&self) -> bool {
        match self {
            CoreError::Config(ConfigError::UnknownTarget(_)) => true,
            CoreError::Validation(_) => true,
            CoreError::History(HistoryError::PendingTrialExists { .. }) => true,
            CoreError::History(HistoryError::Validation(_)) => true,
            _ => false,
        }
    }

    /// Whether the error is a missing history file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::History(HistoryError::NotFound { .. }))
    }
}

/// History store errors.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// No history file exists yet for this user and target
    #[error("No history found at {path}")]
    NotFound { path: PathBuf },

    /// The history file exists but could not be read
    #[error("Failed to read history at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The history file could not be rewritten
    #[error("Failed to write history at {path}: {message}")]
    Write { path: PathBuf, message: String },

    /// A stored row does not match the target's layout
    #[error("Malformed history at {path}, row {row}: {message}")]
    Malformed {
        path: PathBuf,
        row: usize,
        message: String,
    },

    /// A proposal is still waiting for its score
    #[error("A pending trial already exists for {key}; report its score first")]
    PendingTrialExists { key: String },

    /// Parameters do not fit the target's space
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Invalid outcome or parameter values
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// IO errors outside of CSV parsing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Target name other than "round" or "session"
    #[error("Unknown optimization target '{0}' (expected 'round' or 'session')")]
    UnknownTarget(String),

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Data directory could not be determined or created
    #[error("Failed to access data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Surrogate optimizer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    /// Parameter vector arity differs from the configured space
    #[error("Dimension mismatch: expected {expected} parameters, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// An observed outcome is NaN or infinite
    #[error("Observation {index} has a non-finite outcome")]
    NonFiniteOutcome { index: usize },

    /// The surrogate fit or acquisition search did not produce a candidate
    #[error("Surrogate fit failed: {0}")]
    FitFailed(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// User id cannot be used as a history file name
    #[error("Invalid user id '{id}': {message}")]
    InvalidUserId { id: String, message: String },

    /// Reported score is NaN or infinite
    #[error("Score must be a finite number, got {0}")]
    NonFiniteScore(f64),

    /// Parameter value outside of its dimension's bounds
    #[error("Value {value} for '{name}' is outside [{low}, {high}]")]
    OutOfBounds {
        name: String,
        value: f64,
        low: f64,
        high: f64,
    },
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
