// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use fixedbitset::FixedBitSet;

use crate::lines::CompactLines;

/// Probe-to-line mapping for one class file.
///
/// Built once by a class analysis pass, then read once per test.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClassCoverageLookup {
    class_name: String,
    class_id: u64,
    source_file_name: Option<String>,
    total_probe_count: u32,
    probes: BTreeMap<u32, CompactLines>,
    empty: CompactLines,
}

impl ClassCoverageLookup {
    /// `class_name` is in VM form, e.g. `com/example/Foo`.
    pub fn new(class_name: impl Into<String>, class_id: u64) -> Self {
        Self {
            class_name: class_name.into(),
            class_id,
            ..Self::default()
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn class_id(&self) -> u64 {
        self.class_id
    }

    /// VM package of the class, e.g. `com/example`. Empty for the default package.
    pub fn package_name(&self) -> &str {
        match self.class_name.rfind('/') {
            Some(index) => &self.class_name[..index],
            None => "",
        }
    }

    pub fn source_file_name(&self) -> Option<&str> {
        self.source_file_name.as_deref()
    }

    pub fn set_source_file_name(&mut self, name: impl Into<String>) {
        self.source_file_name = Some(name.into());
    }

    pub fn total_probe_count(&self) -> u32 {
        self.total_probe_count
    }

    pub fn set_total_probe_count(&mut self, count: u32) {
        self.total_probe_count = count;
    }

    /// Register `lines` for `probe_id`, adding to any lines already registered.
    pub fn add_probe(&mut self, probe_id: u32, lines: CompactLines) {
        use std::collections::btree_map::Entry;

        match self.probes.entry(probe_id) {
            Entry::Vacant(entry) => {
                entry.insert(lines);
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(&lines);
            }
        }
    }

    /// Lines covered if `probe_id` fired. Empty for unregistered probes.
    pub fn lines_for_probe(&self, probe_id: u32) -> &CompactLines {
        self.probes.get(&probe_id).unwrap_or(&self.empty)
    }

    /// Ids of all probes with registered lines, ascending.
    pub fn probe_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.probes.keys().copied()
    }

    /// Union of the lines of every probe set in `hits`.
    ///
    /// Fails if `hits` was recorded for a class with a different probe count,
    /// which means the execution data belongs to other class bytes.
    pub fn covered_lines(&self, hits: &FixedBitSet) -> Result<CompactLines> {
        if hits.len() != self.total_probe_count as usize {
            bail!(
                "incompatible execution data for class {} with id {:016x}: expected {} probes, got {}",
                self.class_name,
                self.class_id,
                self.total_probe_count,
                hits.len()
            );
        }

        let mut lines = CompactLines::new();

        for probe in hits.ones() {
            lines.merge(self.lines_for_probe(probe as u32));
        }

        Ok(lines)
    }
}
