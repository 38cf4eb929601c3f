use super::support::{commit, index_id, input, inputs_for, WordIndex, WordIndexer};
use nova_index::{Compression, IndexError, IndexOptions, IndexParts, MapReduceIndex, RebuildStatus};
use std::path::Path;

fn open(root: &Path, version: u32, options: IndexOptions) -> Result<WordIndex, IndexError> {
    let id = index_id("words");
    let parts = IndexParts::open_persistent(root, &id, version, options)?;
    Ok(MapReduceIndex::builder(id, WordIndexer, parts).build())
}

#[test]
fn committed_data_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();

    {
        let index = open(temp.path(), 1, IndexOptions::default()).unwrap();
        assert!(!index.was_reset());
        commit(&index, 1, Some("alpha beta"));
        commit(&index, 2, Some("beta"));
        index.flush().unwrap();
    }

    let index = open(temp.path(), 1, IndexOptions::default()).unwrap();
    assert!(!index.was_reset());
    assert_eq!(index.rebuild_status(), RebuildStatus::Ok);
    assert_eq!(inputs_for(&index, "alpha"), vec![1]);
    assert_eq!(inputs_for(&index, "beta"), vec![1, 2]);
    assert_eq!(index.indexed_data(input(1)).unwrap().len(), 2);

    // The persisted forward snapshot makes a recommit a no-op.
    assert!(!commit(&index, 1, Some("beta alpha")));
}

#[test]
fn dropping_the_index_persists_pending_changes() {
    let temp = tempfile::tempdir().unwrap();

    {
        let index = open(temp.path(), 1, IndexOptions::default()).unwrap();
        commit(&index, 3, Some("gamma"));
        assert!(index.is_dirty());
    }

    let index = open(temp.path(), 1, IndexOptions::default()).unwrap();
    assert_eq!(inputs_for(&index, "gamma"), vec![3]);
}

#[test]
fn zstd_shards_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let options = IndexOptions {
        compression: Compression::Zstd,
        ..IndexOptions::default()
    };

    {
        let index = open(temp.path(), 1, options).unwrap();
        commit(&index, 1, Some("compressed words compressed"));
        index.dispose().unwrap();
    }

    let index = open(temp.path(), 1, options).unwrap();
    assert_eq!(inputs_for(&index, "compressed"), vec![1]);
}

#[test]
fn indexer_version_change_discards_old_contents() {
    let temp = tempfile::tempdir().unwrap();

    {
        let index = open(temp.path(), 1, IndexOptions::default()).unwrap();
        commit(&index, 1, Some("stale"));
    }

    let index = open(temp.path(), 2, IndexOptions::default()).unwrap();
    assert!(index.was_reset());
    assert_eq!(index.rebuild_status(), RebuildStatus::RequiresRebuild);
    assert!(inputs_for(&index, "stale").is_empty());
    assert!(index.indexed_data(input(1)).unwrap().is_empty());
}

#[test]
fn shard_count_change_discards_old_contents() {
    let temp = tempfile::tempdir().unwrap();

    {
        let index = open(temp.path(), 1, IndexOptions::default()).unwrap();
        commit(&index, 1, Some("stale"));
    }

    let options = IndexOptions {
        shard_count: 3,
        ..IndexOptions::default()
    };
    let index = open(temp.path(), 1, options).unwrap();
    assert!(index.was_reset());
    assert!(inputs_for(&index, "stale").is_empty());
}

#[test]
fn directory_is_locked_until_dispose() {
    let temp = tempfile::tempdir().unwrap();
    let index = open(temp.path(), 1, IndexOptions::default()).unwrap();

    let err = open(temp.path(), 1, IndexOptions::default()).err();
    assert!(matches!(err, Some(IndexError::Locked { .. })), "{err:?}");

    index.dispose().unwrap();
    let reopened = open(temp.path(), 1, IndexOptions::default()).unwrap();
    assert!(!reopened.was_reset());
}
