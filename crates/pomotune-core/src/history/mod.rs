//! Trial history per (user, target) pair.
//!
//! A history is an ordered list of [`TrialRecord`]s. Rows are appended when a
//! proposal is made or a standalone score is reported, and the single pending
//! row is filled in place once its score arrives. Rows are never deleted.

mod csv_store;
mod memory;

pub use csv_store::CsvHistoryStore;
pub use memory::InMemoryHistoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{HistoryError, ValidationError};
use crate::space::{ParameterSpace, Target};

const MAX_USER_ID_LEN: usize = 64;

/// User identifier, safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        let invalid = |message: &str| ValidationError::InvalidUserId {
            id: id.clone(),
            message: message.to_string(),
        };

        if id.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if id.len() > MAX_USER_ID_LEN {
            return Err(invalid("must be at most 64 characters"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("only ASCII letters, digits, '-' and '_' are allowed"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// Identifies one history: a user optimizing one target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub user: UserId,
    pub target: Target,
}

impl HistoryKey {
    pub fn new(user: UserId, target: Target) -> Self {
        Self { user, target }
    }

    pub fn space(&self) -> ParameterSpace {
        ParameterSpace::for_target(self.target)
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.user)
    }
}

/// Outcome of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "score", rename_all = "lowercase")]
pub enum TrialOutcome {
    /// Proposed, not yet scored
    Pending,
    /// Scored by the user
    Completed(f64),
}

impl TrialOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, TrialOutcome::Pending)
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            TrialOutcome::Pending => None,
            TrialOutcome::Completed(score) => Some(*score),
        }
    }
}

/// One row of a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub parameters: Vec<f64>,
    pub outcome: TrialOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn pending(parameters: Vec<f64>) -> Self {
        Self {
            parameters,
            outcome: TrialOutcome::Pending,
            recorded_at: Utc::now(),
        }
    }

    pub fn completed(parameters: Vec<f64>, score: f64) -> Self {
        Self {
            parameters,
            outcome: TrialOutcome::Completed(score),
            recorded_at: Utc::now(),
        }
    }
}

/// Mutation requested through [`HistoryStore::append_or_update`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrialUpdate {
    /// A score with no parameters: fills the pending row, or is recorded
    /// against the target's baseline parameters when nothing is pending.
    Outcome(f64),
    /// A new candidate waiting for its score
    Proposal(Vec<f64>),
    /// A fully known trial
    Observation { parameters: Vec<f64>, outcome: f64 },
}

/// What [`HistoryStore::append_or_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    FilledPending,
    Appended,
}

/// Keyed store of trial histories.
///
/// Implementations rewrite the whole history on every mutation. Callers are
/// expected to serialize access per key (see [`crate::session::KeyedLocks`]).
pub trait HistoryStore: Send + Sync {
    /// Load all rows in order. Fails with [`HistoryError::NotFound`] when the
    /// user has no history for this target yet.
    fn load(&self, key: &HistoryKey) -> Result<Vec<TrialRecord>, HistoryError>;

    /// Fill the pending row or append a new one, then persist.
    fn append_or_update(
        &self,
        key: &HistoryKey,
        update: TrialUpdate,
    ) -> Result<WriteOutcome, HistoryError>;

    /// Apply `updates` in order and persist once. When any update is
    /// rejected nothing is written.
    fn append_or_update_all(
        &self,
        key: &HistoryKey,
        updates: Vec<TrialUpdate>,
    ) -> Result<Vec<WriteOutcome>, HistoryError>;

    /// Load, treating a missing history as empty.
    fn load_or_empty(&self, key: &HistoryKey) -> Result<Vec<TrialRecord>, HistoryError> {
        match self.load(key) {
            Ok(records) => Ok(records),
            Err(HistoryError::NotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn check_score(score: f64) -> Result<(), HistoryError> {
    if !score.is_finite() {
        return Err(ValidationError::NonFiniteScore(score).into());
    }
    Ok(())
}

fn ensure_nothing_pending(key: &HistoryKey, records: &[TrialRecord]) -> Result<(), HistoryError> {
    if records.iter().any(|r| r.outcome.is_pending()) {
        return Err(HistoryError::PendingTrialExists {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Apply several updates in order, stopping at the first rejection.
pub(crate) fn apply_updates(
    key: &HistoryKey,
    records: &mut Vec<TrialRecord>,
    updates: Vec<TrialUpdate>,
) -> Result<Vec<WriteOutcome>, HistoryError> {
    updates
        .into_iter()
        .map(|update| apply_update(key, records, update))
        .collect()
}

/// Apply an update to an in-memory copy of a history.
///
/// Shared by every store so the fill-or-append rules live in one place.
pub(crate) fn apply_update(
    key: &HistoryKey,
    records: &mut Vec<TrialRecord>,
    update: TrialUpdate,
) -> Result<WriteOutcome, HistoryError> {
    let space = key.space();
    match update {
        TrialUpdate::Outcome(score) => {
            check_score(score)?;
            if let Some(last) = records.last_mut().filter(|r| r.outcome.is_pending()) {
                last.outcome = TrialOutcome::Completed(score);
                last.recorded_at = Utc::now();
                return Ok(WriteOutcome::FilledPending);
            }
            records.push(TrialRecord::completed(space.baseline(), score));
            Ok(WriteOutcome::Appended)
        }
        TrialUpdate::Proposal(parameters) => {
            space.validate(&parameters)?;
            ensure_nothing_pending(key, records)?;
            records.push(TrialRecord::pending(parameters));
            Ok(WriteOutcome::Appended)
        }
        TrialUpdate::Observation {
            parameters,
            outcome,
        } => {
            space.validate(&parameters)?;
            check_score(outcome)?;
            ensure_nothing_pending(key, records)?;
            records.push(TrialRecord::completed(parameters, outcome));
            Ok(WriteOutcome::Appended)
        }
    }
}
