//! Ordered set of indices stored as sorted, disjoint, non-adjacent ranges.
//!
//! Besides plain set operations this supports the positional arithmetic used
//! while replaying edits: shifting everything after a position when an element
//! is inserted or erased, and translating indices between the full index space
//! and the space with the set's own members removed.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Ordered union of half-open index ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSet {
    ranges: Vec<(usize, usize)>,
}

impl IndexSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Creates a set holding every index in `range`.
    pub fn from_range(range: Range<usize>) -> Self {
        let mut set = Self::new();
        set.add_range(range.start, range.end);
        set
    }

    /// Returns `true` if the set holds no indices.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the number of indices in the set.
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|&(s, e)| e - s).sum()
    }

    /// Iterates over the stored ranges in ascending order.
    pub fn ranges(&self) -> impl DoubleEndedIterator<Item = Range<usize>> + '_ {
        self.ranges.iter().map(|&(s, e)| s..e)
    }

    /// Iterates over every index in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(|&(s, e)| s..e)
    }

    /// Returns the smallest index, if any.
    pub fn first(&self) -> Option<usize> {
        self.ranges.first().map(|&(s, _)| s)
    }

    /// Returns the largest index, if any.
    pub fn last(&self) -> Option<usize> {
        self.ranges.last().map(|&(_, e)| e - 1)
    }

    /// Returns `true` if `index` is in the set.
    pub fn contains(&self, index: usize) -> bool {
        let pos = self.ranges.partition_point(|&(_, e)| e <= index);
        pos < self.ranges.len() && self.ranges[pos].0 <= index
    }

    /// Counts the members falling inside `start..end`.
    pub fn count(&self, start: usize, end: usize) -> usize {
        self.ranges
            .iter()
            .take_while(|&&(s, _)| s < end)
            .map(|&(s, e)| e.min(end).saturating_sub(s.max(start)))
            .sum()
    }

    /// Adds a single index.
    pub fn add(&mut self, index: usize) {
        self.add_range(index, index + 1);
    }

    /// Adds every index in `start..end`, merging with overlapping or adjacent ranges.
    pub fn add_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let lo = self.ranges.partition_point(|&(_, e)| e < start);
        let hi = self.ranges.partition_point(|&(s, _)| s <= end);
        if lo == hi {
            self.ranges.insert(lo, (start, end));
            return;
        }
        let merged = (
            start.min(self.ranges[lo].0),
            end.max(self.ranges[hi - 1].1),
        );
        self.ranges.splice(lo..hi, std::iter::once(merged));
    }

    /// Adds every member of `other`.
    pub fn add_set(&mut self, other: &IndexSet) {
        for &(s, e) in &other.ranges {
            self.add_range(s, e);
        }
    }

    /// Removes a single index without shifting anything.
    pub fn remove(&mut self, index: usize) {
        let pos = self.ranges.partition_point(|&(_, e)| e <= index);
        if pos == self.ranges.len() || self.ranges[pos].0 > index {
            return;
        }
        let (s, e) = self.ranges[pos];
        if s == index && e == index + 1 {
            self.ranges.remove(pos);
        } else if s == index {
            self.ranges[pos].0 += 1;
        } else if e == index + 1 {
            self.ranges[pos].1 -= 1;
        } else {
            self.ranges[pos].1 = index;
            self.ranges.insert(pos + 1, (index + 1, e));
        }
    }

    /// Replaces the contents with `0..len`.
    pub fn set(&mut self, len: usize) {
        self.ranges.clear();
        if len > 0 {
            self.ranges.push((0, len));
        }
    }

    /// Removes every index.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Shifts every member `>= index` up by `count` without adding anything.
    pub fn shift_for_insert_at(&mut self, index: usize, count: usize) {
        if count == 0 {
            return;
        }
        let pos = self.ranges.partition_point(|&(_, e)| e <= index);
        if pos == self.ranges.len() {
            return;
        }
        let mut first_shifted = pos;
        let (s, e) = self.ranges[pos];
        if s < index {
            self.ranges[pos].1 = index;
            self.ranges.insert(pos + 1, (index, e));
            first_shifted = pos + 1;
        }
        for range in &mut self.ranges[first_shifted..] {
            range.0 += count;
            range.1 += count;
        }
    }

    /// Shifts every member `>= index` up by `count`, then adds `index..index + count`.
    pub fn insert_at(&mut self, index: usize, count: usize) {
        self.shift_for_insert_at(index, count);
        self.add_range(index, index + count);
    }

    /// Removes `index` if present and shifts every later member down by one.
    pub fn erase_at(&mut self, index: usize) {
        self.remove(index);
        let pos = self.ranges.partition_point(|&(s, _)| s <= index);
        for range in &mut self.ranges[pos..] {
            range.0 -= 1;
            range.1 -= 1;
        }
        if pos > 0 && pos < self.ranges.len() && self.ranges[pos - 1].1 == self.ranges[pos].0 {
            self.ranges[pos - 1].1 = self.ranges[pos].1;
            self.ranges.remove(pos);
        }
    }

    /// Erases `index` from the set's positional space.
    ///
    /// If `index` is a member it is removed and `None` is returned. Otherwise
    /// the index translated into the space without the set's members is
    /// returned. In both cases every later member shifts down by one.
    pub fn erase_or_unshift(&mut self, index: usize) -> Option<usize> {
        if self.contains(index) {
            self.erase_at(index);
            return None;
        }
        let unshifted = self.unshift(index);
        self.erase_at(index);
        Some(unshifted)
    }

    /// Translates `index` from the compacted space into the full space, adds it
    /// and returns the translated index.
    pub fn add_shifted(&mut self, index: usize) -> usize {
        let shifted = self.shift(index);
        self.add(shifted);
        shifted
    }

    /// Translates an index from the space without the set's members into the full space.
    pub fn shift(&self, index: usize) -> usize {
        let mut index = index;
        for &(s, e) in &self.ranges {
            if s > index {
                break;
            }
            index += e - s;
        }
        index
    }

    /// Translates a non-member index into the space without the set's members.
    pub fn unshift(&self, index: usize) -> usize {
        debug_assert!(!self.contains(index));
        index - self.count(0, index)
    }
}

impl From<Range<usize>> for IndexSet {
    fn from(range: Range<usize>) -> Self {
        Self::from_range(range)
    }
}

impl FromIterator<usize> for IndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for index in iter {
            set.add(index);
        }
        set
    }
}
