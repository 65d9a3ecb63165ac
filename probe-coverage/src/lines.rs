// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::iter::Peekable;

use fixedbitset::{FixedBitSet, Ones};

/// Set of 1-indexed source line numbers, backed by a bitset.
///
/// Line `0` is not a valid source line and is never stored.
#[derive(Clone, Default)]
pub struct CompactLines {
    bits: FixedBitSet,
}

impl CompactLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, line: u32) {
        if line == 0 {
            return;
        }

        let index = line as usize;
        self.reserve(index);
        self.bits.insert(index);
    }

    /// Insert every line in `first..=last`.
    pub fn insert_range(&mut self, first: u32, last: u32) {
        let first = first.max(1);

        if last < first {
            return;
        }

        self.reserve(last as usize);
        self.bits.insert_range(first as usize..last as usize + 1);
    }

    pub fn contains(&self, line: u32) -> bool {
        self.bits.contains(line as usize)
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones(..)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.ones().next().is_none()
    }

    /// Lines in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.ones().map(|line| line as u32)
    }

    /// Add all lines of `other` to `self`.
    pub fn merge(&mut self, other: &Self) {
        self.bits.union_with(&other.bits);
    }

    /// Keep only the lines that are also in `other`.
    pub fn intersect(&mut self, other: &Self) {
        self.bits.intersect_with(&other.bits);
    }

    /// Keep only the lines for which `keep` returns `true`.
    pub fn retain_lines(&mut self, mut keep: impl FnMut(u32) -> bool) {
        let dropped: Vec<usize> = self.bits.ones().filter(|l| !keep(*l as u32)).collect();

        for line in dropped {
            self.bits.set(line, false);
        }
    }

    /// Returns `true` if any line in `first..=last` is in the set.
    pub fn intersects_range(&self, first: u32, last: u32) -> bool {
        self.iter()
            .find(|line| *line >= first)
            .map(|line| line <= last)
            .unwrap_or(false)
    }

    /// Maximal runs of consecutive lines, as inclusive `(first, last)` pairs.
    pub fn ranges(&self) -> Ranges<'_> {
        Ranges {
            lines: self.bits.ones().peekable(),
        }
    }

    fn reserve(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.grow(index + 1);
        }
    }
}

pub struct Ranges<'a> {
    lines: Peekable<Ones<'a>>,
}

impl<'a> Iterator for Ranges<'a> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.lines.next()?;
        let mut last = first;

        while let Some(&next) = self.lines.peek() {
            if next != last + 1 {
                break;
            }

            last = next;
            self.lines.next();
        }

        Some((first as u32, last as u32))
    }
}

impl PartialEq for CompactLines {
    fn eq(&self, other: &Self) -> bool {
        // Capacity may differ for equal sets.
        self.iter().eq(other.iter())
    }
}

impl Eq for CompactLines {}

impl fmt::Debug for CompactLines {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<u32> for CompactLines {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut lines = Self::new();
        lines.extend(iter);
        lines
    }
}

impl Extend<u32> for CompactLines {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        for line in iter {
            self.insert(line);
        }
    }
}
