//! Integration tests for the request loop over the CSV history store.
//!
//! Each test works in its own temporary data directory.

use pomotune_core::{
    ConfigError, CoreError, CsvHistoryStore, HistoryKey, HistoryStore, KeyedLocks,
    OptimizationSession, OptimizerConfig, OptimizerError, ParameterSpace, ProposalSource,
    SurrogateOptimizer, Target, TrialOutcome, TrialUpdate, UserId, WriteOutcome,
};
use std::sync::Arc;

fn csv_session(dir: &tempfile::TempDir) -> OptimizationSession<CsvHistoryStore> {
    OptimizationSession::new(CsvHistoryStore::new(dir.path()), SurrogateOptimizer::new())
}

fn round_key(user: &str) -> HistoryKey {
    HistoryKey::new(UserId::new(user).unwrap(), Target::Round)
}

#[test]
fn test_first_score_then_pending_proposal() {
    let dir = tempfile::tempdir().unwrap();
    let store = CsvHistoryStore::new(dir.path());
    let key = round_key("u1");

    store
        .append_or_update(&key, TrialUpdate::Outcome(6.0))
        .unwrap();
    let history = store.load(&key).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, TrialOutcome::Completed(6.0));

    let session = OptimizationSession::new(store, SurrogateOptimizer::new());
    let rec = session.step(&key, None).unwrap();

    let history = session.store().load(&key).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].outcome, TrialOutcome::Pending);
    assert_eq!(history[1].parameters, rec.values());

    let work = rec.get("work_time").unwrap();
    let brk = rec.get("break_time").unwrap();
    assert!((15.0..=60.0).contains(&work));
    assert!((3.0..=20.0).contains(&brk));
}

#[test]
fn test_round_optimizer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let session = csv_session(&dir);

    let first = session.round_optimizer("u1", 6.0).unwrap();
    let path = dir.path().join("round_csv").join("u1.csv");
    assert!(path.exists());

    let history = session.history("u1", "round").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].parameters, vec![25.0, 5.0]);
    assert_eq!(history[0].outcome, TrialOutcome::Completed(6.0));
    assert_eq!(history[1].parameters, vec![first.work_time, first.break_time]);

    // The next score lands on the pending row.
    session.round_optimizer("u1", 8.5).unwrap();
    let history = session.history("u1", "round").unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].outcome, TrialOutcome::Completed(8.5));
    assert!(history[2].outcome.is_pending());
}

#[test]
fn test_session_optimizer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let session = csv_session(&dir);

    let rec = session.session_optimizer("u1", 7.0).unwrap();
    assert!((10.0..=60.0).contains(&rec.session_break_time));
    assert!((1..=8).contains(&rec.number_of_round));

    let content = std::fs::read_to_string(dir.path().join("session_csv").join("u1.csv")).unwrap();
    let header = content.lines().next().unwrap();
    assert_eq!(
        header,
        "total_work_time,session_break_time,number_of_round,average_focus_score,status,recorded_at"
    );
}

#[test]
fn test_unknown_target_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let session = csv_session(&dir);

    let err = session.run("u1", "foo", Some(6.0)).unwrap_err();
    assert!(matches!(err, CoreError::Config(ConfigError::UnknownTarget(_))));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_invalid_user_is_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let session = csv_session(&dir);

    let err = session.run("../evil", "round", Some(6.0)).unwrap_err();
    assert!(err.is_client_error());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_history_for_unknown_user_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let session = csv_session(&dir);

    let err = session.history("nobody", "round").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_observation_appends_without_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = CsvHistoryStore::new(dir.path());
    let key = round_key("u2");

    let written = store
        .append_or_update(
            &key,
            TrialUpdate::Observation {
                parameters: vec![30.0, 6.0],
                outcome: 7.0,
            },
        )
        .unwrap();
    assert_eq!(written, WriteOutcome::Appended);

    store
        .append_or_update(&key, TrialUpdate::Proposal(vec![40.0, 10.0]))
        .unwrap();
    assert_eq!(store.load(&key).unwrap().len(), 2);

    // A second observation must wait for the pending score.
    let err = store
        .append_or_update(
            &key,
            TrialUpdate::Observation {
                parameters: vec![35.0, 6.0],
                outcome: 5.0,
            },
        )
        .unwrap_err();
    assert!(CoreError::from(err).is_client_error());
    assert_eq!(store.load(&key).unwrap().len(), 2);

    store
        .append_or_update(&key, TrialUpdate::Outcome(9.0))
        .unwrap();
    let history = store.load(&key).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].outcome, TrialOutcome::Completed(9.0));
}

#[test]
fn test_same_seed_same_first_proposal() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();

    let first = csv_session(&a).round_optimizer("u1", 6.0).unwrap();
    let second = csv_session(&b).round_optimizer("u1", 6.0).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_surrogate_takes_over_after_initial_design() {
    let dir = tempfile::tempdir().unwrap();
    let session = csv_session(&dir);
    let n_initial = session.optimizer().config().n_initial_points;

    let mut last = None;
    for i in 0..n_initial {
        last = Some(session.run("u3", "round", Some(5.0 + i as f64 * 0.3)).unwrap());
    }
    let rec = last.unwrap();
    assert!(matches!(rec.source, ProposalSource::Surrogate { .. }));
    assert_eq!(rec.history_len, n_initial + 1);
    assert!(ParameterSpace::for_target(Target::Round).contains(&rec.values()));
}

#[test]
fn test_concurrent_requests_are_serialized_per_user() {
    let dir = tempfile::tempdir().unwrap();
    let session = Arc::new(csv_session(&dir));

    std::thread::scope(|scope| {
        for i in 0..8 {
            let session = Arc::clone(&session);
            scope.spawn(move || {
                session.run("u1", "round", Some(4.0 + i as f64 * 0.5)).unwrap();
            });
        }
    });

    let history = session.history("u1", "round").unwrap();
    // Baseline row, seven filled proposals, one pending.
    assert_eq!(history.len(), 9);
    assert_eq!(history.iter().filter(|r| r.outcome.is_pending()).count(), 1);
    assert!(history.last().unwrap().outcome.is_pending());
}

#[test]
fn test_sessions_sharing_locks_serialize_writes() {
    let dir = tempfile::tempdir().unwrap();
    let locks = Arc::new(KeyedLocks::new());
    let sessions: Vec<_> = (0..2)
        .map(|_| {
            OptimizationSession::new(CsvHistoryStore::new(dir.path()), SurrogateOptimizer::new())
                .with_locks(Arc::clone(&locks))
        })
        .collect();

    std::thread::scope(|scope| {
        for i in 0..8 {
            let session = &sessions[i % 2];
            scope.spawn(move || {
                session.run("u1", "round", Some(4.0 + i as f64 * 0.5)).unwrap();
            });
        }
    });

    let history = sessions[0].history("u1", "round").unwrap();
    assert_eq!(history.len(), 9);
    assert_eq!(history.iter().filter(|r| r.outcome.is_pending()).count(), 1);
    assert!(locks.is_empty());
}

#[test]
fn test_failed_fit_does_not_record_score() {
    let dir = tempfile::tempdir().unwrap();
    let store = CsvHistoryStore::new(dir.path());
    let key = round_key("u1");
    store
        .append_or_update(&key, TrialUpdate::Proposal(vec![30.0, 6.0]))
        .unwrap();
    let before = store.load(&key).unwrap();

    let optimizer = SurrogateOptimizer::with_config(OptimizerConfig {
        n_initial_points: 1,
        length_scales: vec![],
        ..Default::default()
    });
    let session = OptimizationSession::new(store, optimizer);

    for _ in 0..3 {
        let err = session.run("u1", "round", Some(6.0)).unwrap_err();
        assert!(matches!(err, CoreError::Optimizer(OptimizerError::FitFailed(_))));
        assert!(!err.is_client_error());
    }

    let after = session.store().load(&key).unwrap();
    assert_eq!(after, before);
    assert!(after[0].outcome.is_pending());

    // Without any history the failure leaves no file behind.
    assert!(session.run("u2", "round", Some(6.0)).is_err());
    assert!(session.history("u2", "round").unwrap_err().is_not_found());
}
