//! In-memory history store for tests and embedding.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{
    apply_update, apply_updates, HistoryKey, HistoryStore, TrialRecord, TrialUpdate, WriteOutcome,
};
use crate::error::HistoryError;

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    histories: Mutex<HashMap<HistoryKey, Vec<TrialRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rewrite<T>(
        &self,
        key: &HistoryKey,
        mutate: impl FnOnce(&mut Vec<TrialRecord>) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        let mut histories = self.histories.lock().unwrap_or_else(|e| e.into_inner());
        // Work on a copy so a rejected update leaves the stored rows untouched.
        let mut records = histories.get(key).cloned().unwrap_or_default();
        let outcome = mutate(&mut records)?;
        histories.insert(key.clone(), records);
        Ok(outcome)
    }

    /// Number of rows stored for `key`, zero when absent.
    pub fn len(&self, key: &HistoryKey) -> usize {
        self.histories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn load(&self, key: &HistoryKey) -> Result<Vec<TrialRecord>, HistoryError> {
        self.histories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| HistoryError::NotFound {
                path: PathBuf::from(key.to_string()),
            })
    }

    fn append_or_update(
        &self,
        key: &HistoryKey,
        update: TrialUpdate,
    ) -> Result<WriteOutcome, HistoryError> {
        self.rewrite(key, |records| apply_update(key, records, update))
    }

    fn append_or_update_all(
        &self,
        key: &HistoryKey,
        updates: Vec<TrialUpdate>,
    ) -> Result<Vec<WriteOutcome>, HistoryError> {
        self.rewrite(key, |records| apply_updates(key, records, updates))
    }
}
