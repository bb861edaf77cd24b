//! Single objects and derived views.

use std::sync::Arc;

use ntest::timeout;

use notify_core::{CollectionId, NotifyError, VersionedSource};

use super::helpers::*;

#[timeout(1000)]
#[test]
fn test_object_reports_dirty_columns() {
    let store = store();
    let keys = populate(&store, 3);
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[1], VALUE, 11i64)).unwrap();

    let object = CollectionId::Object {
        table: ITEM,
        key: keys[1],
    };
    let changes = diff(&store, &object, start, store.latest_version());
    assert_eq!(indices(&changes.modifications), vec![0]);
    assert_eq!(changes.column(VALUE).map(indices), Some(vec![0]));
    assert!(changes.column(NEXT).is_none());

    let other = CollectionId::Object {
        table: ITEM,
        key: keys[0],
    };
    assert!(diff(&store, &other, start, store.latest_version()).is_empty());
}

#[timeout(1000)]
#[test]
fn test_object_deletion() {
    let store = store();
    let keys = populate(&store, 3);
    let start = store.latest_version();
    store.write(|tx| tx.erase_row(ITEM, keys[2])).unwrap();

    let object = CollectionId::Object {
        table: ITEM,
        key: keys[2],
    };
    let changes = diff(&store, &object, start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![0]);
    assert!(!changes.collection_was_erased);

    let later = store.latest_version();
    store.write(|tx| tx.push_row(ITEM).map(|_| ())).unwrap();
    let changes = diff(&store, &object, later, store.latest_version());
    assert!(changes.collection_was_erased);
}

#[timeout(1000)]
#[test]
fn test_results_reorder_is_delete_and_insert() {
    let store = store();
    let keys = populate(&store, 4);
    store
        .write(|tx| {
            for (i, key) in keys.iter().enumerate() {
                tx.set(ITEM, *key, VALUE, (i as i64 + 1) * 10)?;
            }
            Ok(())
        })
        .unwrap();
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[3], VALUE, 15i64)).unwrap();

    let results = CollectionId::Results(Arc::new(SortedByValue {
        store: Arc::clone(&store),
        min: 0,
    }));
    let changes = diff(&store, &results, start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![3]);
    assert_eq!(indices(&changes.insertions), vec![1]);
    assert!(changes.moves.is_empty());
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_results_modification_in_place() {
    let store = store();
    let keys = populate(&store, 4);
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[1], VALUE, 1i64)).unwrap();

    let results = CollectionId::Results(Arc::new(SortedByValue {
        store: Arc::clone(&store),
        min: 0,
    }));
    let changes = diff(&store, &results, start, store.latest_version());
    assert!(changes.insertions.is_empty());
    assert_eq!(indices(&changes.modifications), vec![1]);
    assert_eq!(changes.column(VALUE).map(indices), Some(vec![1]));
}

#[timeout(1000)]
#[test]
fn test_results_filter_membership() {
    let store = store();
    let keys = populate(&store, 4);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.set(ITEM, keys[0], VALUE, 5i64)?;
            tx.set(ITEM, keys[3], VALUE, 0i64)
        })
        .unwrap();

    // values 0,1,2,3 -> 5,1,2,0 with min 1: [k1,k2,k3] -> [k1,k2,k0]
    let results = CollectionId::Results(Arc::new(SortedByValue {
        store: Arc::clone(&store),
        min: 1,
    }));
    let changes = diff(&store, &results, start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![2]);
    assert_eq!(indices(&changes.insertions), vec![2]);
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_results_evaluation_error() {
    let store = store();
    populate(&store, 2);
    let start = store.latest_version();
    populate(&store, 1);

    let result = notify_core::diff(
        store.as_ref(),
        &CollectionId::Results(Arc::new(Broken)),
        start,
        store.latest_version(),
        &notify_core::NotifierConfig::default(),
    );
    assert_eq!(result, Err(NotifyError::Query("index unavailable".to_string())));
}

#[timeout(1000)]
#[test]
fn test_compacted_start_is_unavailable() {
    let store = store();
    populate(&store, 2);
    populate(&store, 2);
    store.compact(store.latest_version()).unwrap();

    let result = notify_core::diff(
        store.as_ref(),
        &CollectionId::Table(ITEM),
        notify_core::SnapshotVersion(1),
        store.latest_version(),
        &notify_core::NotifierConfig::default(),
    );
    assert!(matches!(result, Err(NotifyError::VersionUnavailable { .. })));
}
