//! Optimization session: one request through the propose/score loop.
//!
//! A request loads the user's history, records the reported score, asks the
//! surrogate optimizer for the next candidate, persists it as the pending
//! row and returns it. No state survives between requests except the
//! history itself.
//!
//! Requests for the same (user, target) pair are serialized through
//! [`KeyedLocks`]. The lock only covers this process; concurrent writers in
//! other processes can still race on the history file (last writer wins).

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{CoreError, HistoryError, Result};
use crate::history::{
    apply_update, HistoryKey, HistoryStore, TrialRecord, TrialUpdate, UserId, WriteOutcome,
};
use crate::optimizer::{BestTrial, Observation, ProposalSource, SurrogateOptimizer};
use crate::space::{ParameterSpace, Target};

/// In-process mutual exclusion per history key.
///
/// Entries live only while some caller holds or waits for them; see
/// [`KeyedLocks::release`].
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<HistoryKey, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `key`, created on first use.
    pub fn lock_for(&self, key: &HistoryKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Drop the entry for `key` once no caller holds a handle to it.
    ///
    /// Call after dropping the handle returned by [`KeyedLocks::lock_for`].
    pub fn release(&self, key: &HistoryKey) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One named parameter of a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedValue {
    pub name: &'static str,
    pub value: f64,
}

/// Result of one session step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub target: Target,
    pub parameters: Vec<NamedValue>,
    pub source: ProposalSource,
    /// Best trial before this proposal, as a focus score
    pub best: Option<BestTrial>,
    /// What happened to the reported score, if one was given
    pub recorded: Option<WriteOutcome>,
    /// History length including the new pending row
    pub history_len: usize,
}

impl Recommendation {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value)
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.value).collect()
    }
}

/// Response of the round optimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundRecommendation {
    pub work_time: f64,
    pub break_time: f64,
}

/// Response of the session optimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecommendation {
    /// Not part of the HTTP response
    #[serde(skip)]
    pub total_work_time: f64,
    pub session_break_time: f64,
    pub number_of_round: u32,
}

/// Orchestrates load, record, propose and persist for one request.
pub struct OptimizationSession<S: HistoryStore> {
    store: S,
    optimizer: SurrogateOptimizer,
    locks: Arc<KeyedLocks>,
}

impl<S: HistoryStore> OptimizationSession<S> {
    pub fn new(store: S, optimizer: SurrogateOptimizer) -> Self {
        Self {
            store,
            optimizer,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Share a lock manager with other sessions over the same store.
    pub fn with_locks(mut self, locks: Arc<KeyedLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn optimizer(&self) -> &SurrogateOptimizer {
        &self.optimizer
    }

    /// Run one step for a target given by name.
    ///
    /// The target name is checked before any history is touched.
    pub fn run(&self, user: &str, target: &str, outcome: Option<f64>) -> Result<Recommendation> {
        let target: Target = target.parse()?;
        let user = UserId::new(user)?;
        self.step(&HistoryKey::new(user, target), outcome)
    }

    /// Run one step for `key`, recording `outcome` first when given.
    ///
    /// The score and the new pending row are written together once the
    /// proposal exists, so a failed step leaves the history unchanged.
    pub fn step(&self, key: &HistoryKey, outcome: Option<f64>) -> Result<Recommendation> {
        let lock = self.locks.lock_for(key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            self.step_locked(key, outcome)
        };
        drop(lock);
        self.locks.release(key);
        result
    }

    fn step_locked(&self, key: &HistoryKey, outcome: Option<f64>) -> Result<Recommendation> {
        let space = key.space();

        let mut records = self.store.load_or_empty(key)?;
        tracing::debug!(key = %key, rows = records.len(), "history loaded");

        let mut updates = Vec::with_capacity(2);
        let recorded = match outcome {
            Some(score) => {
                let update = TrialUpdate::Outcome(score);
                let written = apply_update(key, &mut records, update.clone())?;
                updates.push(update);
                Some(written)
            }
            None if records.last().is_some_and(|r| r.outcome.is_pending()) => {
                return Err(HistoryError::PendingTrialExists {
                    key: key.to_string(),
                }
                .into());
            }
            None => None,
        };

        let observations = completed_observations(&records);
        let proposal = self.optimizer.propose(&space, &observations)?;

        updates.push(TrialUpdate::Proposal(proposal.parameters.clone()));
        self.store.append_or_update_all(key, updates)?;

        tracing::info!(
            key = %key,
            observations = observations.len(),
            parameters = ?proposal.parameters,
            "proposal persisted"
        );

        Ok(Recommendation {
            target: key.target,
            parameters: named(&space, &proposal.parameters),
            source: proposal.source,
            best: proposal.best,
            recorded,
            history_len: records.len() + 1,
        })
    }

    /// Record a focus score and propose the next work/break pair.
    pub fn round_optimizer(&self, user: &str, focus_score: f64) -> Result<RoundRecommendation> {
        let rec = self.run(user, Target::Round.as_str(), Some(focus_score))?;
        Ok(RoundRecommendation {
            work_time: required(&rec, "work_time")?,
            break_time: required(&rec, "break_time")?,
        })
    }

    /// Record an average focus score and propose the next session shape.
    pub fn session_optimizer(
        &self,
        user: &str,
        average_focus_score: f64,
    ) -> Result<SessionRecommendation> {
        let rec = self.run(user, Target::Session.as_str(), Some(average_focus_score))?;
        Ok(SessionRecommendation {
            total_work_time: required(&rec, "total_work_time")?,
            session_break_time: required(&rec, "session_break_time")?,
            number_of_round: required(&rec, "number_of_round")? as u32,
        })
    }

    /// Stored trials for a user and target name.
    pub fn history(&self, user: &str, target: &str) -> Result<Vec<TrialRecord>> {
        let target: Target = target.parse()?;
        let key = HistoryKey::new(UserId::new(user)?, target);
        Ok(self.store.load(&key)?)
    }
}

/// Completed rows as optimizer observations; the pending row is skipped.
fn completed_observations(records: &[TrialRecord]) -> Vec<Observation> {
    records
        .iter()
        .filter_map(|r| {
            r.outcome
                .score()
                .map(|score| Observation::new(r.parameters.clone(), score))
        })
        .collect()
}

fn named(space: &ParameterSpace, values: &[f64]) -> Vec<NamedValue> {
    space
        .named(values)
        .into_iter()
        .map(|(name, value)| NamedValue { name, value })
        .collect()
}

fn required(rec: &Recommendation, name: &str) -> Result<f64> {
    rec.get(name).ok_or_else(|| {
        CoreError::Optimizer(crate::error::OptimizerError::FitFailed(format!(
            "proposal is missing '{name}'"
        )))
    })
}
