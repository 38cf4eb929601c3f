use super::support::{commit, count_for, index_id, input, inputs_for, memory_index, WordIndex, WordIndexer};
use nova_index::{CancellationToken, IndexLock, IndexParts, MapReduceIndex, UpdateError};

#[test]
fn first_commit_adds_every_key() {
    let index = memory_index("words");

    assert!(commit(&index, 1, Some("alpha beta alpha")));

    assert_eq!(inputs_for(&index, "alpha"), vec![1]);
    assert_eq!(count_for(&index, "alpha", 1), Some(2));
    assert_eq!(count_for(&index, "beta", 1), Some(1));
    assert!(inputs_for(&index, "gamma").is_empty());
    assert_eq!(index.modification_stamp(), 2);
}

#[test]
fn recommitting_identical_content_is_a_no_op() {
    let index = memory_index("words");
    assert!(commit(&index, 1, Some("alpha beta")));
    let stamp = index.modification_stamp();

    assert!(!commit(&index, 1, Some("beta alpha")));
    assert_eq!(index.modification_stamp(), stamp);
}

#[test]
fn changed_value_is_a_single_update() {
    let index = memory_index("words");
    commit(&index, 1, Some("alpha alpha beta"));
    let stamp = index.modification_stamp();

    assert!(commit(&index, 1, Some("alpha beta")));

    assert_eq!(count_for(&index, "alpha", 1), Some(1));
    assert_eq!(count_for(&index, "beta", 1), Some(1));
    assert_eq!(index.modification_stamp(), stamp + 1);
}

#[test]
fn dropped_key_is_removed() {
    let index = memory_index("words");
    commit(&index, 1, Some("alpha beta"));
    commit(&index, 2, Some("beta"));

    assert!(commit(&index, 1, Some("alpha")));

    assert_eq!(inputs_for(&index, "alpha"), vec![1]);
    assert_eq!(inputs_for(&index, "beta"), vec![2]);
}

#[test]
fn inputs_sharing_a_key_coexist() {
    let index = memory_index("words");
    commit(&index, 2, Some("shared two"));
    commit(&index, 1, Some("shared one"));

    assert_eq!(inputs_for(&index, "shared"), vec![1, 2]);
    let container = index.get_data(&"shared".to_string()).unwrap();
    assert_eq!(container.len(), 2);
}

#[test]
fn absent_content_removes_previous_contribution() {
    let index = memory_index("words");
    commit(&index, 1, Some("alpha beta"));

    assert!(commit(&index, 1, None));

    assert!(inputs_for(&index, "alpha").is_empty());
    assert!(inputs_for(&index, "beta").is_empty());
    assert!(index.indexed_data(input(1)).unwrap().is_empty());
}

#[test]
fn empty_content_for_unknown_input_changes_nothing() {
    let index = memory_index("words");

    assert!(!commit(&index, 7, None));
    assert!(!commit(&index, 7, Some("   ")));
    assert_eq!(index.modification_stamp(), 0);
}

#[test]
fn indexed_data_returns_last_committed_map() {
    let index = memory_index("words");
    commit(&index, 3, Some("x y y"));

    let data = index.indexed_data(input(3)).unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data.get(&"y".to_string()), Some(&2));
    assert!(index.indexed_data(input(4)).unwrap().is_empty());
}

#[test]
fn dropping_a_deferred_commit_leaves_index_untouched() {
    let index = memory_index("words");

    let pending = index
        .update(input(1), Some("alpha"), &CancellationToken::new())
        .unwrap();
    assert_eq!(pending.input(), input(1));
    assert_eq!(pending.data().len(), 1);
    drop(pending);

    assert!(inputs_for(&index, "alpha").is_empty());
    assert_eq!(index.modification_stamp(), 0);
}

#[test]
fn cancelled_update_never_reaches_storage() {
    let index = memory_index("words");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = index.update(input(1), Some("alpha"), &cancel).err();
    assert!(matches!(err, Some(UpdateError::Cancelled)), "{err:?}");
    assert_eq!(index.modification_stamp(), 0);
}

#[test]
fn indexer_failure_is_reported_without_side_effects() {
    let index = memory_index("words");
    commit(&index, 1, Some("alpha"));

    let err = index
        .update(input(1), Some("!fail now"), &CancellationToken::new())
        .err();
    assert!(matches!(err, Some(UpdateError::Indexer(_))), "{err:?}");
    assert_eq!(inputs_for(&index, "alpha"), vec![1]);
}

#[test]
fn clear_drops_storage_and_forward_snapshots() {
    let index = memory_index("words");
    commit(&index, 1, Some("alpha"));
    let stamp = index.modification_stamp();

    index.clear().unwrap();

    assert!(inputs_for(&index, "alpha").is_empty());
    assert!(index.indexed_data(input(1)).unwrap().is_empty());
    assert!(index.modification_stamp() > stamp);

    // With the forward snapshot gone, the same content is new again.
    assert!(commit(&index, 1, Some("alpha")));
    assert_eq!(inputs_for(&index, "alpha"), vec![1]);
}

#[test]
fn flush_resets_dirty_flag() {
    let index = memory_index("words");
    assert!(!index.is_dirty());

    commit(&index, 1, Some("alpha"));
    assert!(index.is_dirty());

    index.flush().unwrap();
    assert!(!index.is_dirty());
}

#[test]
fn process_all_keys_stops_when_asked() {
    let index = memory_index("words");
    commit(&index, 1, Some("a b c d"));

    let mut all = Vec::new();
    assert!(index
        .process_all_keys(|key| {
            all.push(key.clone());
            true
        })
        .unwrap());
    all.sort();
    assert_eq!(all, vec!["a", "b", "c", "d"]);

    let mut seen = 0;
    let finished = index
        .process_all_keys(|_| {
            seen += 1;
            seen < 2
        })
        .unwrap();
    assert!(!finished);
    assert_eq!(seen, 2);
}

#[test]
fn disposed_index_answers_empty() {
    let index = memory_index("words");
    commit(&index, 1, Some("alpha"));
    let pending = index
        .update(input(2), Some("alpha"), &CancellationToken::new())
        .unwrap();

    index.dispose().unwrap();
    assert!(index.is_disposed());

    assert!(inputs_for(&index, "alpha").is_empty());
    assert!(index.indexed_data(input(1)).unwrap().is_empty());
    assert!(!pending.apply().unwrap());
    index.flush().unwrap();
    index.clear().unwrap();

    // Idempotent.
    index.dispose().unwrap();
}

#[test]
fn indexes_can_share_a_lock() {
    let lock = IndexLock::new();
    let first: WordIndex =
        MapReduceIndex::builder(index_id("first"), WordIndexer, IndexParts::in_memory())
            .shared_lock(lock.clone())
            .build();
    let second: WordIndex =
        MapReduceIndex::builder(index_id("second"), WordIndexer, IndexParts::in_memory())
            .shared_lock(lock.clone())
            .build();
    let private = memory_index("private");

    assert!(first.index_lock().ptr_eq(&second.index_lock()));
    assert!(first.index_lock().ptr_eq(&lock));
    assert!(!first.index_lock().ptr_eq(&private.index_lock()));

    commit(&first, 1, Some("alpha"));
    commit(&second, 1, Some("beta"));
    assert_eq!(inputs_for(&first, "alpha"), vec![1]);
    assert!(inputs_for(&first, "beta").is_empty());
    assert_eq!(inputs_for(&second, "beta"), vec![1]);
}
