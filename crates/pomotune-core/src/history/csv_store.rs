//! CSV-backed history store.
//!
//! One file per (user, target) at `<root>/<target>_csv/<user>.csv`. The
//! header is the target's parameter columns, its outcome column, then
//! `status` and `recorded_at`. Pending rows leave the outcome cell empty.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{
    apply_update, apply_updates, HistoryKey, HistoryStore, TrialOutcome, TrialRecord, TrialUpdate,
    WriteOutcome,
};
use crate::error::HistoryError;
use crate::space::ParameterSpace;

const STATUS_PENDING: &str = "pending";
const STATUS_COMPLETED: &str = "completed";

/// History store writing one CSV file per user and target.
#[derive(Debug, Clone)]
pub struct CsvHistoryStore {
    root: PathBuf,
}

impl CsvHistoryStore {
    /// Create a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the store under the default data directory.
    pub fn open() -> Result<Self, crate::error::ConfigError> {
        Ok(Self::new(crate::config::data_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the history file for `key`.
    pub fn path_for(&self, key: &HistoryKey) -> PathBuf {
        self.root
            .join(format!("{}_csv", key.target))
            .join(format!("{}.csv", key.user))
    }

    fn header(space: &ParameterSpace) -> Vec<&'static str> {
        let mut header = space.columns();
        header.push("status");
        header.push("recorded_at");
        header
    }

    fn read(&self, key: &HistoryKey, path: &Path) -> Result<Vec<TrialRecord>, HistoryError> {
        let space = key.space();
        let expected = Self::header(&space);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|source| HistoryError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let header = reader.headers().map_err(|source| HistoryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if header.iter().map(str::trim).ne(expected.iter().copied()) {
            return Err(HistoryError::Malformed {
                path: path.to_path_buf(),
                row: 0,
                message: format!(
                    "header {:?} does not match expected {:?}",
                    header.iter().collect::<Vec<_>>(),
                    expected
                ),
            });
        }

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row_number = index + 1;
            let row = row.map_err(|source| HistoryError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let malformed = |message: String| HistoryError::Malformed {
                path: path.to_path_buf(),
                row: row_number,
                message,
            };

            if row.len() != expected.len() {
                return Err(malformed(format!(
                    "dimension mismatch: expected {} cells, found {}",
                    expected.len(),
                    row.len()
                )));
            }

            let arity = space.arity();
            let mut parameters = Vec::with_capacity(arity);
            for (column, cell) in expected.iter().zip(row.iter()).take(arity) {
                let value = cell.trim().parse::<f64>().map_err(|_| {
                    malformed(format!("'{column}' is not a number: '{cell}'"))
                })?;
                parameters.push(value);
            }
            space
                .validate(&parameters)
                .map_err(|e| malformed(e.to_string()))?;

            let outcome_cell = row[arity].trim();
            let status = row[arity + 1].trim();
            let outcome = match (status, outcome_cell.is_empty()) {
                (STATUS_PENDING, true) => TrialOutcome::Pending,
                (STATUS_COMPLETED, false) => {
                    let score = outcome_cell
                        .parse::<f64>()
                        .ok()
                        .filter(|score| score.is_finite())
                        .ok_or_else(|| {
                            malformed(format!(
                                "'{}' is not a finite number: '{outcome_cell}'",
                                space.outcome_column()
                            ))
                        })?;
                    TrialOutcome::Completed(score)
                }
                (STATUS_PENDING, false) => {
                    return Err(malformed("pending row carries an outcome".into()))
                }
                (STATUS_COMPLETED, true) => {
                    return Err(malformed("completed row has no outcome".into()))
                }
                (other, _) => return Err(malformed(format!("unknown status '{other}'"))),
            };

            let recorded_at = DateTime::parse_from_rfc3339(row[arity + 2].trim())
                .map_err(|e| malformed(format!("bad recorded_at: {e}")))?
                .with_timezone(&Utc);

            records.push(TrialRecord {
                parameters,
                outcome,
                recorded_at,
            });
        }

        if let Some(position) = records.iter().position(|r| r.outcome.is_pending()) {
            if position + 1 != records.len() {
                return Err(HistoryError::Malformed {
                    path: path.to_path_buf(),
                    row: position + 1,
                    message: "only the last row may be pending".into(),
                });
            }
        }

        Ok(records)
    }

    /// Load, mutate in memory, then write back once. The file is left
    /// untouched when `mutate` fails.
    fn rewrite<T: std::fmt::Debug>(
        &self,
        key: &HistoryKey,
        mutate: impl FnOnce(&mut Vec<TrialRecord>) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        let path = self.path_for(key);
        let mut records = self.load_or_empty(key)?;
        let outcome = mutate(&mut records)?;
        self.write(key, &path, &records)?;
        tracing::debug!(key = %key, rows = records.len(), ?outcome, "history rewritten");
        Ok(outcome)
    }

    /// Rewrite the whole file through a temporary file and a rename.
    fn write(
        &self,
        key: &HistoryKey,
        path: &Path,
        records: &[TrialRecord],
    ) -> Result<(), HistoryError> {
        let space = key.space();
        let write_err = |message: String| HistoryError::Write {
            path: path.to_path_buf(),
            message,
        };

        let dir = path
            .parent()
            .ok_or_else(|| write_err("history path has no parent directory".into()))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer
                .write_record(Self::header(&space))
                .map_err(|e| write_err(e.to_string()))?;

            for record in records {
                let mut row: Vec<String> =
                    record.parameters.iter().map(|v| v.to_string()).collect();
                match record.outcome {
                    TrialOutcome::Pending => {
                        row.push(String::new());
                        row.push(STATUS_PENDING.to_string());
                    }
                    TrialOutcome::Completed(score) => {
                        row.push(score.to_string());
                        row.push(STATUS_COMPLETED.to_string());
                    }
                }
                row.push(record.recorded_at.to_rfc3339());
                writer
                    .write_record(&row)
                    .map_err(|e| write_err(e.to_string()))?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| write_err(e.error.to_string()))?;
        Ok(())
    }
}

impl HistoryStore for CsvHistoryStore {
    fn load(&self, key: &HistoryKey) -> Result<Vec<TrialRecord>, HistoryError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Err(HistoryError::NotFound { path });
        }
        self.read(key, &path)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::UserId;
    use crate::space::Target;

    fn key(target: Target) -> HistoryKey {
        HistoryKey::new(UserId::new("u1").unwrap(), target)
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let err = store.load(&key(Target::Round)).unwrap_err();
        assert!(matches!(err, HistoryError::NotFound { .. }));
        assert!(store.load_or_empty(&key(Target::Round)).unwrap().is_empty());
    }

    #[test]
    fn writes_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);

        store.append_or_update(&key, TrialUpdate::Outcome(6.0)).unwrap();
        store
            .append_or_update(&key, TrialUpdate::Proposal(vec![32.5, 7.25]))
            .unwrap();

        let path = dir.path().join("round_csv").join("u1.csv");
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "work_time,break_time,focus_score,status,recorded_at");
        assert!(lines[1].starts_with("25,5,6,completed,"));
        assert!(lines[2].starts_with("32.5,7.25,,pending,"));
    }

    #[test]
    fn fill_pending_keeps_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Session);

        store
            .append_or_update(&key, TrialUpdate::Proposal(vec![200.0, 20.0, 3.0]))
            .unwrap();
        let outcome = store.append_or_update(&key, TrialUpdate::Outcome(7.5)).unwrap();
        assert_eq!(outcome, WriteOutcome::FilledPending);

        let records = store.load(&key).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].parameters, vec![200.0, 20.0, 3.0]);
        assert_eq!(records[0].outcome, TrialOutcome::Completed(7.5));
    }

    #[test]
    fn rejects_wrong_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        let path = store.path_for(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "a,b,c\n1,2,3\n").unwrap();

        let err = store.load(&key).unwrap_err();
        assert!(matches!(err, HistoryError::Malformed { row: 0, .. }));
    }

    #[test]
    fn rejects_short_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        let path = store.path_for(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let content = concat!(
            "work_time,break_time,focus_score,status,recorded_at\n",
            "25,6,completed,2024-01-01T00:00:00+00:00\n",
        );
        fs::write(&path, content).unwrap();

        let err = store.load(&key).unwrap_err();
        match err {
            HistoryError::Malformed { row, message, .. } => {
                assert_eq!(row, 1);
                assert!(message.contains("dimension mismatch"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_pending_row_in_the_middle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        let path = store.path_for(&key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "work_time,break_time,focus_score,status,recorded_at\n\
             25,5,,pending,2024-01-01T00:00:00+00:00\n\
             30,6,7,completed,2024-01-01T00:30:00+00:00\n",
        )
        .unwrap();

        let err = store.load(&key).unwrap_err();
        assert!(matches!(err, HistoryError::Malformed { row: 1, .. }));
    }

    fn write_rows(store: &CsvHistoryStore, key: &HistoryKey, rows: &str) {
        let path = store.path_for(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            format!("work_time,break_time,focus_score,status,recorded_at\n{rows}"),
        )
        .unwrap();
    }

    #[test]
    fn rejects_non_finite_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        write_rows(&store, &key, "NaN,5,7,completed,2024-01-01T00:00:00+00:00\n");

        let err = store.load(&key).unwrap_err();
        assert!(matches!(err, HistoryError::Malformed { row: 1, .. }));
    }

    #[test]
    fn rejects_out_of_bounds_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        write_rows(&store, &key, "25,500,7,completed,2024-01-01T00:00:00+00:00\n");

        match store.load(&key).unwrap_err() {
            HistoryError::Malformed { row, message, .. } => {
                assert_eq!(row, 1);
                assert!(message.contains("break_time"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_non_finite_score() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        write_rows(&store, &key, "25,5,inf,completed,2024-01-01T00:00:00+00:00\n");

        let err = store.load(&key).unwrap_err();
        assert!(matches!(err, HistoryError::Malformed { row: 1, .. }));
    }

    #[test]
    fn rejected_batch_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(dir.path());
        let key = key(Target::Round);
        store.append_or_update(&key, TrialUpdate::Outcome(6.0)).unwrap();
        let before = fs::read_to_string(store.path_for(&key)).unwrap();

        let result = store.append_or_update_all(
            &key,
            vec![
                TrialUpdate::Outcome(7.0),
                TrialUpdate::Proposal(vec![30.0]),
            ],
        );
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(store.path_for(&key)).unwrap(), before);
    }
}
