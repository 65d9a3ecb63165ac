// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use fixedbitset::FixedBitSet;

/// Probe hits recorded for one class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionData {
    pub id: u64,

    /// VM form, e.g. `com/example/Foo`.
    pub name: String,

    pub probes: FixedBitSet,
}

impl ExecutionData {
    pub fn new(id: u64, name: impl Into<String>, probes: FixedBitSet) -> Self {
        Self {
            id,
            name: name.into(),
            probes,
        }
    }

    pub fn has_hits(&self) -> bool {
        self.probes.count_ones(..) > 0
    }

    /// OR the hits of `other` into `self`.
    pub fn merge(&mut self, other: &ExecutionData) -> Result<()> {
        if self.id != other.id {
            bail!(
                "cannot merge execution data of class ids {:016x} and {:016x}",
                self.id,
                other.id
            );
        }

        if self.name != other.name {
            bail!(
                "incompatible execution data for class id {:016x}: names {} and {}",
                self.id,
                self.name,
                other.name
            );
        }

        if self.probes.len() != other.probes.len() {
            bail!(
                "incompatible execution data for class {} with id {:016x}: {} and {} probes",
                self.name,
                self.id,
                self.probes.len(),
                other.probes.len()
            );
        }

        self.probes.union_with(&other.probes);

        Ok(())
    }
}

/// Session block of an execution data dump.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionInfo {
    pub id: String,

    /// Epoch milliseconds.
    pub start: i64,

    /// Epoch milliseconds.
    pub dump: i64,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, start: i64, dump: i64) -> Self {
        Self {
            id: id.into(),
            start,
            dump,
        }
    }
}

/// Execution data keyed by class id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutionDataStore {
    entries: BTreeMap<u64, ExecutionData>,
}

impl ExecutionDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `data`, merging it into any entry with the same id.
    pub fn put(&mut self, data: ExecutionData) -> Result<()> {
        use std::collections::btree_map::Entry;

        match self.entries.entry(data.id) {
            Entry::Vacant(entry) => {
                entry.insert(data);
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(&data)?;
            }
        }

        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ExecutionData> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionData> {
        self.entries.values()
    }

    pub fn merge(&mut self, other: &ExecutionDataStore) -> Result<()> {
        for data in other.iter() {
            self.put(data.clone())?;
        }

        Ok(())
    }
}

/// Coverage recorded for a single test.
///
/// The session id is the uniform path of the test.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestSession {
    pub info: SessionInfo,
    pub store: ExecutionDataStore,
}

impl TestSession {
    pub fn new(info: SessionInfo) -> Self {
        Self {
            info,
            store: ExecutionDataStore::new(),
        }
    }

    pub fn uniform_path(&self) -> &str {
        &self.info.id
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    fn probes(len: usize, set: &[usize]) -> FixedBitSet {
        let mut bits = FixedBitSet::with_capacity(len);
        for probe in set {
            bits.insert(*probe);
        }
        bits
    }

    #[test]
    fn test_put_merges_hits() -> Result<()> {
        let mut store = ExecutionDataStore::new();
        store.put(ExecutionData::new(1, "Foo", probes(4, &[0])))?;
        store.put(ExecutionData::new(1, "Foo", probes(4, &[2])))?;
        store.put(ExecutionData::new(2, "Bar", probes(1, &[])))?;

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().probes, probes(4, &[0, 2]));
        assert!(!store.get(2).unwrap().has_hits());

        Ok(())
    }

    #[test]
    fn test_incompatible_data() {
        let mut store = ExecutionDataStore::new();
        store
            .put(ExecutionData::new(1, "Foo", probes(4, &[0])))
            .unwrap();

        assert!(store
            .put(ExecutionData::new(1, "Bar", probes(4, &[1])))
            .is_err());
        assert!(store
            .put(ExecutionData::new(1, "Foo", probes(5, &[1])))
            .is_err());

        // Failed merges leave the entry untouched.
        assert_eq!(store.get(1).unwrap().probes, probes(4, &[0]));
    }

    #[test]
    fn test_merge_stores() -> Result<()> {
        let mut left = ExecutionDataStore::new();
        left.put(ExecutionData::new(1, "Foo", probes(2, &[0])))?;

        let mut right = ExecutionDataStore::new();
        right.put(ExecutionData::new(1, "Foo", probes(2, &[1])))?;
        right.put(ExecutionData::new(3, "Baz", probes(1, &[0])))?;

        left.merge(&right)?;

        let ids: Vec<_> = left.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(left.get(1).unwrap().probes, probes(2, &[0, 1]));

        Ok(())
    }
}
