use super::support::{
    commit, flaky_index, index_id, input, inputs_for, memory_index, WordIndex, WordIndexer,
};
use nova_index::{
    CancellationToken, IndexError, IndexOptions, IndexParts, InputId, MapReduceIndex,
    RebuildReport, RebuildStatus,
};

#[test]
fn rebuild_replaces_contents_and_counts_failures() {
    let index = memory_index("words");
    commit(&index, 1, Some("stale"));
    commit(&index, 9, Some("gone"));
    assert!(index.request_rebuild("test"));

    let inputs: Vec<(InputId, &str)> = vec![
        (input(1), "fresh alpha"),
        (input(2), "fresh"),
        (input(3), "!fail please"),
    ];
    let report = index
        .rebuild_from(&inputs, &CancellationToken::new())
        .unwrap();

    assert_eq!(
        report,
        RebuildReport {
            inputs: 3,
            changed: 2,
            failed: 1,
            completed: true,
        }
    );
    assert_eq!(index.rebuild_status(), RebuildStatus::Ok);
    assert!(inputs_for(&index, "stale").is_empty());
    assert!(inputs_for(&index, "gone").is_empty());
    assert_eq!(inputs_for(&index, "fresh"), vec![1, 2]);
    assert!(!index.is_dirty());
}

#[test]
fn owned_contents_are_accepted() {
    let index = memory_index("words");
    let inputs: Vec<(InputId, String)> = (1..=10)
        .map(|raw| (input(raw), format!("word{raw} shared")))
        .collect();

    let report = index
        .rebuild_from(&inputs, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.changed, 10);
    assert!(report.completed);
    assert_eq!(inputs_for(&index, "shared").len(), 10);
}

#[test]
fn cancelled_rebuild_stays_required() {
    let index = memory_index("words");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let inputs = vec![(input(1), "alpha")];
    let err = index.rebuild_from(&inputs, &cancel).err();

    assert!(matches!(err, Some(IndexError::Cancelled)), "{err:?}");
    assert_eq!(index.rebuild_status(), RebuildStatus::RequiresRebuild);
}

#[test]
fn concurrent_rebuilds_are_rejected() {
    let index = memory_index("words");
    assert!(index.begin_rebuild());

    let inputs = vec![(input(1), "alpha")];
    let err = index.rebuild_from(&inputs, &CancellationToken::new()).err();
    assert!(
        matches!(err, Some(IndexError::RebuildInProgress { .. })),
        "{err:?}"
    );

    assert!(index.finish_rebuild());
    assert_eq!(index.rebuild_status(), RebuildStatus::Ok);
}

#[test]
fn failure_during_rebuild_keeps_index_untrusted() {
    let index = memory_index("words");
    assert!(index.begin_rebuild());
    assert!(index.request_rebuild("storage failed mid-rebuild"));

    assert!(!index.finish_rebuild());
    assert_eq!(index.rebuild_status(), RebuildStatus::RequiresRebuild);
    let request = index.last_rebuild_request().unwrap();
    assert_eq!(request.cause, "storage failed mid-rebuild");
}

#[test]
fn commit_failure_during_rebuild_is_reported() {
    let (index, faults) = flaky_index("flaky");
    let inputs: Vec<(InputId, &str)> = vec![(input(1), "alpha"), (input(2), "beta")];
    faults.fail_nth_write(1);

    let report = index
        .rebuild_from(&inputs, &CancellationToken::new())
        .unwrap();

    assert!(!report.completed);
    assert_eq!(report.inputs, 2);
    assert_eq!(report.changed, 1);
    assert_eq!(index.rebuild_status(), RebuildStatus::RequiresRebuild);
    assert!(index.last_rebuild_request().is_some());

    let report = index
        .rebuild_from(&inputs, &CancellationToken::new())
        .unwrap();
    assert!(report.completed);
    assert_eq!(report.changed, 2);
    assert_eq!(index.rebuild_status(), RebuildStatus::Ok);
    assert_eq!(inputs_for(&index, "alpha"), vec![1]);
    assert_eq!(inputs_for(&index, "beta"), vec![2]);
}

#[test]
fn reset_index_is_rebuilt_from_scratch() {
    let temp = tempfile::tempdir().unwrap();
    let id = index_id("words");

    {
        let parts = IndexParts::open_persistent(temp.path(), &id, 1, IndexOptions::default()).unwrap();
        let index: WordIndex = MapReduceIndex::builder(id.clone(), WordIndexer, parts).build();
        commit(&index, 1, Some("old"));
    }

    let parts = IndexParts::open_persistent(temp.path(), &id, 2, IndexOptions::default()).unwrap();
    let index: WordIndex = MapReduceIndex::builder(id, WordIndexer, parts).build();
    assert_eq!(index.rebuild_status(), RebuildStatus::RequiresRebuild);

    let report = index
        .rebuild_from(&[(input(1), "new")], &CancellationToken::new())
        .unwrap();

    assert!(report.completed);
    assert_eq!(index.rebuild_status(), RebuildStatus::Ok);
    assert_eq!(inputs_for(&index, "new"), vec![1]);
    assert!(inputs_for(&index, "old").is_empty());
}

#[test]
fn pending_rebuild_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let id = index_id("words");
    let open = || -> WordIndex {
        let parts =
            IndexParts::open_persistent(temp.path(), &id, 1, IndexOptions::default()).unwrap();
        MapReduceIndex::builder(id.clone(), WordIndexer, parts).build()
    };

    {
        let index = open();
        commit(&index, 1, Some("suspect"));
        assert!(index.request_rebuild("storage corrupted"));
        index.dispose().unwrap();
    }

    let index = open();
    assert!(index.was_reset());
    assert_eq!(index.rebuild_status(), RebuildStatus::RequiresRebuild);
    assert!(inputs_for(&index, "suspect").is_empty());

    let report = index
        .rebuild_from(&[(input(1), "trusted")], &CancellationToken::new())
        .unwrap();
    assert!(report.completed);
    index.dispose().unwrap();
    drop(index);

    let index = open();
    assert!(!index.was_reset());
    assert_eq!(index.rebuild_status(), RebuildStatus::Ok);
    assert_eq!(inputs_for(&index, "trusted"), vec![1]);
}
