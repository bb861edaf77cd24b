//! Changes reported through links.

use ntest::timeout;

use notify_core::{CollectionId, RowKey, VersionedSource};

use super::helpers::*;

/// Items linked `0 -> 1 -> ... -> len-1`.
fn chain(len: usize) -> (std::sync::Arc<notify_core::store::MemoryStore>, Vec<RowKey>) {
    let store = store();
    let keys = populate(&store, len);
    store
        .write(|tx| {
            for pair in keys.windows(2) {
                tx.set(ITEM, pair[0], NEXT, pair[1])?;
            }
            Ok(())
        })
        .unwrap();
    (store, keys)
}

#[timeout(1000)]
#[test]
fn test_chain_of_twenty() {
    let (store, keys) = chain(20);
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[19], VALUE, -1i64)).unwrap();
    let end = store.latest_version();

    let changes = diff(&store, &CollectionId::Table(ITEM), start, end);
    assert_eq!(indices(&changes.modifications), vec![16, 17, 18, 19]);

    for (row, expected) in [(19, true), (18, true), (16, true), (15, false)] {
        let object = CollectionId::Object {
            table: ITEM,
            key: keys[row],
        };
        let changes = diff(&store, &object, start, end);
        assert_eq!(!changes.modifications.is_empty(), expected, "row {row}");
    }
}

#[timeout(1000)]
#[test]
fn test_depth_is_configurable() {
    let (store, keys) = chain(6);
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[5], VALUE, -1i64)).unwrap();

    let config = notify_core::NotifierConfig {
        max_link_depth: 2,
        ..notify_core::NotifierConfig::default()
    };
    let changes = notify_core::diff(
        store.as_ref(),
        &CollectionId::Table(ITEM),
        start,
        store.latest_version(),
        &config,
    )
    .unwrap();
    assert_eq!(indices(&changes.modifications), vec![4, 5]);
}

#[timeout(1000)]
#[test]
fn test_self_link_and_two_cycle_terminate() {
    let store = store();
    let keys = populate(&store, 4);
    store
        .write(|tx| {
            tx.set(ITEM, keys[0], NEXT, keys[0])?;
            tx.set(ITEM, keys[1], NEXT, keys[2])?;
            tx.set(ITEM, keys[2], NEXT, keys[1])
        })
        .unwrap();

    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[3], VALUE, 30i64)).unwrap();
    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.modifications), vec![3]);

    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, keys[2], VALUE, 20i64)).unwrap();
    let changes = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&changes.modifications), vec![1, 2]);
}

#[timeout(1000)]
#[test]
fn test_link_list_reaches_through_owner() {
    let store = store();
    let items = populate(&store, 3);
    let list = owner_with(&store, &items);
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, items[1], VALUE, 10i64)).unwrap();

    let owners = diff(&store, &CollectionId::Table(OWNER), start, store.latest_version());
    assert_eq!(indices(&owners.modifications), vec![0]);
    assert!(owners.columns.is_empty());

    let owner = CollectionId::Object {
        table: OWNER,
        key: list.owner,
    };
    let changes = diff(&store, &owner, start, store.latest_version());
    assert_eq!(indices(&changes.modifications), vec![0]);
    assert!(changes.columns.is_empty());
}
