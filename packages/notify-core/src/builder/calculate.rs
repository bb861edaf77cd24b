//! Diffing of two evaluations of a derived view.

use std::collections::HashMap;

use crate::changeset::CollectionChangeSet;
use crate::index_set::IndexSet;
use crate::types::RowKey;

/// Computes the change set between two orderings of row keys.
///
/// Rows present in both orderings keep their place when they belong to the
/// longest subsequence whose relative order is unchanged; every other common
/// row is reported as deleted at its old position and inserted at its new one.
/// Moves are never reported.
///
/// # Arguments
/// * `old` - Row keys of the view at the start version, without duplicates
/// * `new` - Row keys of the view at the end version, without duplicates
/// * `row_did_change` - Whether a row that kept its place was modified
///
/// # Returns
/// The change set in view positions; the per-column sets are left empty.
pub fn calculate<F>(old: &[RowKey], new: &[RowKey], mut row_did_change: F) -> CollectionChangeSet
where
    F: FnMut(RowKey) -> bool,
{
    let old_positions: HashMap<RowKey, usize> =
        old.iter().enumerate().map(|(i, k)| (*k, i)).collect();

    // (new position, old position) of every common row, in new order.
    let common: Vec<(usize, usize)> = new
        .iter()
        .enumerate()
        .filter_map(|(j, k)| old_positions.get(k).map(|&i| (j, i)))
        .collect();
    let stable = longest_increasing(&common);

    let mut kept_old = vec![false; old.len()];
    let mut kept_new = vec![false; new.len()];
    for &index in &stable {
        let (j, i) = common[index];
        kept_old[i] = true;
        kept_new[j] = true;
    }

    let deletions: IndexSet = (0..old.len()).filter(|&i| !kept_old[i]).collect();
    let insertions: IndexSet = (0..new.len()).filter(|&j| !kept_new[j]).collect();
    let modifications: IndexSet = (0..new.len())
        .filter(|&j| kept_new[j] && row_did_change(new[j]))
        .collect();

    CollectionChangeSet {
        deletions,
        insertions,
        modifications,
        ..CollectionChangeSet::default()
    }
}

/// Returns the indices into `pairs` of a longest subsequence whose old
/// positions strictly increase.
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<usize> {
    // tails[k]: index into `pairs` of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; pairs.len()];
    for (index, &(_, old)) in pairs.iter().enumerate() {
        let length = tails.partition_point(|&t| pairs[t].1 < old);
        previous[index] = length.checked_sub(1).map(|l| tails[l]);
        if length == tails.len() {
            tails.push(index);
        } else {
            tails[length] = index;
        }
    }

    let mut sequence = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        sequence.push(index);
        cursor = previous[index];
    }
    sequence.reverse();
    sequence
}
