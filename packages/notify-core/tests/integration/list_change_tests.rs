//! List column observation.

use ntest::timeout;

use notify_core::tracker::ListKey;
use notify_core::{CollectionId, Move, RowKey, VersionedSource};

use super::helpers::*;

fn item_list(len: usize) -> (std::sync::Arc<notify_core::store::MemoryStore>, Vec<RowKey>, ListKey) {
    let store = store();
    let items = populate(&store, len);
    let list = owner_with(&store, &items);
    (store, items, list)
}

#[timeout(1000)]
#[test]
fn test_set_then_move_keeps_the_move() {
    let (store, items, list) = item_list(10);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_set(OWNER, list.owner, ITEMS, 5, items[0])?;
            tx.list_move(OWNER, list.owner, ITEMS, 5, 8)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![5]);
    assert_eq!(indices(&changes.insertions), vec![8]);
    assert_eq!(changes.moves, vec![Move::new(5, 8)]);
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_move_then_set_destination_is_replaced() {
    let (store, items, list) = item_list(10);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_move(OWNER, list.owner, ITEMS, 2, 6)?;
            tx.list_set(OWNER, list.owner, ITEMS, 6, items[9])
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![2]);
    assert_eq!(indices(&changes.insertions), vec![6]);
    assert!(changes.moves.is_empty());
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_move_then_erase_destination_is_deletion() {
    let (store, _, list) = item_list(6);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_move(OWNER, list.owner, ITEMS, 1, 4)?;
            tx.list_erase(OWNER, list.owner, ITEMS, 4)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![1]);
    assert!(changes.insertions.is_empty());
    assert!(changes.moves.is_empty());
}

#[timeout(1000)]
#[test]
fn test_erase_then_set_same_position_is_replacement() {
    let (store, items, list) = item_list(5);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_erase(OWNER, list.owner, ITEMS, 2)?;
            tx.list_set(OWNER, list.owner, ITEMS, 2, items[0])
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![2, 3]);
    assert_eq!(indices(&changes.insertions), vec![2]);
    assert!(changes.modifications.is_empty());
}

#[timeout(1000)]
#[test]
fn test_move_returning_home_is_dropped() {
    let (store, _, list) = item_list(5);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_move(OWNER, list.owner, ITEMS, 0, 3)?;
            tx.list_move(OWNER, list.owner, ITEMS, 3, 0)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert!(changes.is_empty());
}

#[timeout(1000)]
#[test]
fn test_insert_then_clear_deletes_original_elements() {
    let (store, items, list) = item_list(4);
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_insert(OWNER, list.owner, ITEMS, 1, items[3])?;
            tx.list_clear(OWNER, list.owner, ITEMS)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![0, 1, 2, 3]);
    assert!(changes.insertions.is_empty());
}

#[timeout(1000)]
#[test]
fn test_erasing_owner_erases_list() {
    let (store, _, list) = item_list(3);
    let start = store.latest_version();
    store.write(|tx| tx.erase_row(OWNER, list.owner)).unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert!(changes.collection_was_erased);
    assert!(changes.deletions.is_empty());
    assert!(changes.insertions.is_empty());
}

#[timeout(1000)]
#[test]
fn test_clearing_owner_table_erases_list() {
    let (store, _, list) = item_list(3);
    let start = store.latest_version();
    store.write(|tx| tx.clear_table(OWNER)).unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert!(changes.collection_was_erased);
}

#[timeout(1000)]
#[test]
fn test_removing_list_column_erases_list() {
    let (store, _, list) = item_list(3);
    let start = store.latest_version();
    store.write(|tx| tx.remove_column(OWNER, ITEMS)).unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert!(changes.collection_was_erased);
}

#[timeout(1000)]
#[test]
fn test_owner_missing_at_start_is_erased() {
    let store = store();
    let start = store.latest_version();
    let list = owner_with(&store, &[]);

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert!(changes.collection_was_erased);
}

#[timeout(1000)]
#[test]
fn test_clearing_target_table_deletes_every_element() {
    let (store, _, list) = item_list(4);
    let start = store.latest_version();
    store.write(|tx| tx.clear_table(ITEM)).unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert!(!changes.collection_was_erased);
    assert_eq!(indices(&changes.deletions), vec![0, 1, 2, 3]);
    assert!(changes.insertions.is_empty());
}

#[timeout(1000)]
#[test]
fn test_erasing_target_row_removes_element() {
    let (store, items, list) = item_list(4);
    let start = store.latest_version();
    store.write(|tx| tx.erase_row(ITEM, items[1])).unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.deletions), vec![1]);
    assert!(changes.insertions.is_empty());
}

#[timeout(1000)]
#[test]
fn test_target_row_change_marks_element_modified() {
    let (store, items, list) = item_list(4);
    let start = store.latest_version();
    store.write(|tx| tx.set(ITEM, items[2], VALUE, 99i64)).unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.modifications), vec![2]);

    let flat = notify_core::diff(
        store.as_ref(),
        &CollectionId::List(list),
        start,
        store.latest_version(),
        &shallow(),
    )
    .unwrap();
    assert!(flat.is_empty());
}

#[timeout(1000)]
#[test]
fn test_array_edits() {
    let store = store();
    let items = populate(&store, 1);
    let list = ListKey {
        table: ITEM,
        column: TAGS,
        owner: items[0],
    };
    store
        .write(|tx| {
            for tag in 0..5i64 {
                tx.list_push(ITEM, items[0], TAGS, tag)?;
            }
            Ok(())
        })
        .unwrap();
    let start = store.latest_version();
    store
        .write(|tx| {
            tx.list_swap(ITEM, items[0], TAGS, 0, 4)?;
            tx.list_set(ITEM, items[0], TAGS, 2, 20i64)
        })
        .unwrap();

    let changes = diff(&store, &CollectionId::List(list), start, store.latest_version());
    assert_eq!(indices(&changes.modifications), vec![2]);
    assert_eq!(indices(&changes.deletions), vec![0, 4]);
    assert_eq!(indices(&changes.insertions), vec![0, 4]);
    assert_eq!(changes.moves, vec![Move::new(0, 4), Move::new(4, 0)]);

    let table = diff(&store, &CollectionId::Table(ITEM), start, store.latest_version());
    assert_eq!(indices(&table.modifications), vec![0]);
    assert_eq!(table.column(TAGS).map(indices), Some(vec![0]));
}
