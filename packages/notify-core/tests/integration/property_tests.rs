//! Randomized edit sequences: applying the change set to the start state must
//! reproduce the end state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use notify_core::store::{MemoryStore, Value, WriteTransaction};
use notify_core::tracker::ListKey;
use notify_core::{
    CollectionId, NotifyError, RowKey, SnapshotVersion, SnapshotView, VersionedSource,
};

use super::helpers::*;

/// (key, value) of every item, in table order.
fn table_state(store: &MemoryStore, version: SnapshotVersion) -> Vec<(RowKey, i64)> {
    let snapshot = store.snapshot_at(version).unwrap();
    snapshot
        .row_keys(ITEM)
        .into_iter()
        .map(|key| {
            let value = snapshot
                .get(ITEM, key, VALUE)
                .and_then(Value::as_int)
                .unwrap();
            (key, value)
        })
        .collect()
}

fn random_row_edit(
    tx: &mut WriteTransaction<'_>,
    rng: &mut StdRng,
    counter: &mut i64,
) -> Result<(), NotifyError> {
    let len = tx.staged().row_count(ITEM).unwrap_or(0);
    let op = if len < 2 { 0 } else { rng.gen_range(0..6) };
    *counter += 1;
    match op {
        0 => {
            let key = tx.insert_row(ITEM, rng.gen_range(0..=len))?;
            tx.set(ITEM, key, VALUE, *counter)
        }
        1 => {
            let key = tx.staged().row_key(ITEM, rng.gen_range(0..len)).unwrap();
            tx.erase_row(ITEM, key)
        }
        2 => {
            let key = tx.staged().row_key(ITEM, rng.gen_range(0..len)).unwrap();
            tx.set(ITEM, key, VALUE, *counter)
        }
        3 => tx.move_row(ITEM, rng.gen_range(0..len), rng.gen_range(0..len)),
        4 => tx.swap_rows(ITEM, rng.gen_range(0..len), rng.gen_range(0..len)),
        _ => {
            // A default write never counts as a change, so keep the value.
            let key = tx.staged().row_key(ITEM, rng.gen_range(0..len)).unwrap();
            let current = tx.staged().get(ITEM, key, VALUE).and_then(Value::as_int);
            tx.set_default(ITEM, key, VALUE, current.unwrap_or(0))
        }
    }
}

#[test]
fn test_random_table_edits_reproduce_end_state() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut counter = 1_000;
    for round in 0..200 {
        let store = store();
        populate(&store, rng.gen_range(0..12));
        let start = store.latest_version();
        for _ in 0..rng.gen_range(1..4) {
            let edits = rng.gen_range(1..8);
            store
                .write(|tx| {
                    for _ in 0..edits {
                        random_row_edit(tx, &mut rng, &mut counter)?;
                    }
                    Ok(())
                })
                .unwrap();
        }
        let end = store.latest_version();

        let changes = notify_core::diff(
            store.as_ref(),
            &CollectionId::Table(ITEM),
            start,
            end,
            &shallow(),
        )
        .unwrap();
        let before = table_state(&store, start);
        let after = table_state(&store, end);
        assert_eq!(changes.apply(&before, &after), after, "round {round}");

        for m in &changes.moves {
            assert_eq!(before[m.from].0, after[m.to].0, "round {round}");
            assert!(changes.deletions.contains(m.from));
            assert!(changes.insertions.contains(m.to));
            assert!(!changes.modifications.contains(m.to));
        }
        for (position, (key, value)) in after.iter().enumerate() {
            if changes.insertions.contains(position) {
                continue;
            }
            let old = before.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
            if old != Some(*value) {
                assert!(changes.modifications.contains(position), "round {round}");
            }
        }
    }
}

fn list_state(store: &MemoryStore, list: &ListKey, version: SnapshotVersion) -> Vec<i64> {
    let snapshot = store.snapshot_at(version).unwrap();
    match snapshot.get(list.table, list.owner, list.column) {
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_int).collect(),
        _ => Vec::new(),
    }
}

/// Applies one random list edit. Without `sets` every value stays unique to
/// the element it was inserted as, so moves can be checked by value.
fn random_list_edit(
    tx: &mut WriteTransaction<'_>,
    list: &ListKey,
    rng: &mut StdRng,
    counter: &mut i64,
    sets: bool,
) -> Result<(), NotifyError> {
    let len = tx
        .staged()
        .list_len(list.table, list.owner, list.column)
        .unwrap_or(0);
    let op = if len == 0 { 0 } else { rng.gen_range(0..10) };
    *counter += 1;
    let (table, owner, column) = (list.table, list.owner, list.column);
    match op {
        0..=2 => tx.list_insert(table, owner, column, rng.gen_range(0..=len), *counter),
        3 | 4 => tx.list_erase(table, owner, column, rng.gen_range(0..len)),
        5 if sets => tx.list_set(table, owner, column, rng.gen_range(0..len), *counter),
        5 => tx.list_insert(table, owner, column, rng.gen_range(0..=len), *counter),
        6 | 7 => tx.list_move(
            table,
            owner,
            column,
            rng.gen_range(0..len),
            rng.gen_range(0..len),
        ),
        8 => tx.list_swap(
            table,
            owner,
            column,
            rng.gen_range(0..len),
            rng.gen_range(0..len),
        ),
        _ => {
            if rng.gen_bool(0.2) {
                tx.list_clear(table, owner, column)
            } else {
                tx.list_move(table, owner, column, len - 1, 0)
            }
        }
    }
}

/// Writes a random list of unique values, then a few random commits of edits.
///
/// # Returns
/// The list and the version range covering the edits.
fn random_list_history(
    rng: &mut StdRng,
    counter: &mut i64,
    sets: bool,
) -> anyhow::Result<(std::sync::Arc<MemoryStore>, ListKey, SnapshotVersion, SnapshotVersion)> {
    let store = store();
    let owner = populate(&store, 1)[0];
    let list = ListKey {
        table: ITEM,
        column: TAGS,
        owner,
    };
    let initial = rng.gen_range(0..10);
    store.write(|tx| {
        for _ in 0..initial {
            *counter += 1;
            tx.list_push(ITEM, owner, TAGS, *counter)?;
        }
        Ok(())
    })?;
    let start = store.latest_version();
    for _ in 0..rng.gen_range(1..4) {
        let edits = rng.gen_range(1..10);
        store.write(|tx| {
            for _ in 0..edits {
                random_list_edit(tx, &list, rng, counter, sets)?;
            }
            Ok(())
        })?;
    }
    let end = store.latest_version();
    Ok((store, list, start, end))
}

#[test]
fn test_random_list_moves_point_at_the_same_element() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(0xb0a7);
    let mut counter = 0;
    for round in 0..500 {
        let (store, list, start, end) = random_list_history(&mut rng, &mut counter, false)?;
        let changes = diff(&store, &CollectionId::List(list), start, end);
        let before = list_state(&store, &list, start);
        let after = list_state(&store, &list, end);
        assert_eq!(changes.apply(&before, &after), after, "round {round}");
        for m in &changes.moves {
            assert_eq!(before[m.from], after[m.to], "round {round}");
        }
        // With unique values, an element present on both sides is either
        // kept in place by the index arithmetic or reported as a move.
        for (to, value) in after.iter().enumerate() {
            if !changes.insertions.contains(to) {
                assert!(before.contains(value), "round {round}");
            }
        }
    }
    Ok(())
}

#[test]
fn test_random_list_edits_reproduce_end_state() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(0xdecaf);
    let mut counter = 0;
    for round in 0..300 {
        let (store, list, start, end) = random_list_history(&mut rng, &mut counter, true)?;
        let changes = diff(&store, &CollectionId::List(list), start, end);
        let before = list_state(&store, &list, start);
        let after = list_state(&store, &list, end);
        assert!(!changes.collection_was_erased);
        assert_eq!(changes.apply(&before, &after), after, "round {round}");
        for m in &changes.moves {
            assert!(changes.deletions.contains(m.from), "round {round}");
            assert!(changes.insertions.contains(m.to), "round {round}");
        }
    }
    Ok(())
}
