//! Whole-table observation.

use ntest::timeout;

use notify_core::{CollectionId, Move, SnapshotVersion, VersionedSource};

use super::helpers::*;

#[timeout(1000)]
#[test]
fn test_remove_one_of_ten() {
    let store = store();
    let keys = populate(&store, 10);
    let start = store.latest_version();
    store.write(|tx| tx.erase_row(ITEM, keys[5])).unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![5]);
    assert!(changes.insertions.is_empty());
    assert!(changes.modifications.is_empty());
    assert!(changes.moves.is_empty());
}

#[timeout(1000)]
#[test]
fn test_clear_ten_rows() {
    let store = store();
    populate(&store, 10);
    let start = store.latest_version();
    store.write(|tx| tx.clear_table(ITEM)).unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), (0..10).collect::<Vec<_>>());
    assert!(changes.insertions.is_empty());
    assert!(!changes.collection_was_erased);
}

#[timeout(1000)]
#[test]
fn test_diff_against_itself_is_empty() {
    let store = store();
    populate(&store, 3);
    let version = store.latest_version();
    let changes = diff(&store, &CollectionId::Table(ITEM), version, version);
    assert!(changes.is_empty());
    assert!(!changes.collection_was_erased);
}

#[timeout(1000)]
#[test]
fn test_insert_then_erase_cancels() {
    let store = store();
    populate(&store, 10);
    let start = store.latest_version();
    store
        .write(|tx| {
            let key = tx.insert_row(ITEM, 10)?;
            tx.erase_row(ITEM, key)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert!(changes.is_empty());
}

#[timeout(1000)]
#[test]
fn test_moves_across_commits_collapse() {
    let store = store();
    populate(&store, 8);
    let start = store.latest_version();
    store.write(|tx| tx.move_row(ITEM, 1, 3)).unwrap();
    store.write(|tx| tx.move_row(ITEM, 3, 5)).unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(changes.moves, vec![Move::new(1, 5)]);
    assert_eq!(indices(&changes.deletions), vec![1]);
    assert_eq!(indices(&changes.insertions), vec![5]);
}

#[timeout(1000)]
#[test]
fn test_written_row_moved_is_replaced() {
    let store = store();
    let keys = populate(&store, 10);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.set(ITEM, keys[5], VALUE, 50i64)?;
            tx.move_row(ITEM, 5, 8)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![5]);
    assert_eq!(indices(&changes.insertions), vec![8]);
    assert!(changes.moves.is_empty());
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_set_then_insert_shifts_modification() {
    let store = store();
    let keys = populate(&store, 6);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.set(ITEM, keys[3], VALUE, 30i64)?;
            tx.insert_row(ITEM, 1).map(|_| ())
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.insertions), vec![1]);
    assert_eq!(indices(&changes.modifications), vec![4]);
    assert_eq!(changes.column(VALUE).map(indices), Some(vec![4]));
}

#[timeout(1000)]
#[test]
fn test_set_then_erase_is_deletion_only() {
    let store = store();
    let keys = populate(&store, 4);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.set(ITEM, keys[2], VALUE, 7i64)?;
            tx.erase_row(ITEM, keys[2])
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![2]);
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_default_writes_are_not_modifications() {
    let store = store();
    let keys = populate(&store, 4);
    let start = store.latest_version();
    store
        .write(|tx| tx.set_default(ITEM, keys[1], VALUE, 0i64))
        .unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert!(changes.is_empty());
}

#[timeout(1000)]
#[test]
fn test_schema_changes_are_not_row_changes() {
    let store = store();
    populate(&store, 3);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.add_column(
                ITEM,
                notify_core::schema::ColumnSchema::new(
                    notify_core::ColumnId(9),
                    "extra",
                    notify_core::schema::ColumnKind::Bool,
                ),
            )
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert!(changes.is_empty());
}

#[timeout(1000)]
#[test]
fn test_backwards_range_is_rejected() {
    let store = store();
    populate(&store, 1);
    let result = notify_core::diff(
        store.as_ref(),
        &CollectionId::Table(ITEM),
        SnapshotVersion(1),
        SnapshotVersion(0),
        &notify_core::NotifierConfig::default(),
    );
    assert!(matches!(
        result,
        Err(notify_core::NotifyError::InvalidVersionRange { .. })
    ));
}
