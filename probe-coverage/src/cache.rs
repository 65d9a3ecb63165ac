// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::analyzer;
use crate::classfile::ClassFile;
use crate::crc64;
use crate::filter::ClassFilter;
use crate::lookup::ClassCoverageLookup;

/// What to do when two different class files declare the same class name.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DuplicateClassPolicy {
    /// Analyze both, silently.
    Ignore,

    /// Analyze both, and log a warning.
    #[default]
    Warn,

    /// Refuse the second class file with an error.
    Fail,
}

/// Probe-to-line lookups for every analyzed class, keyed by class id.
///
/// Entries are never replaced once inserted, so references handed out by
/// `analyze_class()` and `get()` stay valid for the life of the cache.
#[derive(Default)]
pub struct ProbesCache {
    filter: ClassFilter,
    duplicates: DuplicateClassPolicy,
    classes: elsa::sync::FrozenMap<u64, Box<ClassCoverageLookup>>,
    ids: Mutex<BTreeSet<u64>>,
    names: Mutex<HashMap<String, u64>>,
    failed: Mutex<HashSet<u64>>,
}

impl ProbesCache {
    pub fn new(filter: ClassFilter, duplicates: DuplicateClassPolicy) -> Self {
        Self {
            filter,
            duplicates,
            ..Self::default()
        }
    }

    /// Analyze `data` unless a class with the same id is already cached.
    ///
    /// Returns `Ok(None)` for classes which are skipped (module-info,
    /// synthetic, filtered) or which failed to analyze. Errors are only
    /// returned for duplicate classes under `DuplicateClassPolicy::Fail`.
    pub fn analyze_class(&self, data: &[u8]) -> Result<Option<&ClassCoverageLookup>> {
        let id = crc64::class_id(data);

        if let Some(lookup) = self.classes.get(&id) {
            return Ok(Some(lookup));
        }

        if self.has_failed(id)? {
            return Ok(None);
        }

        let class = match ClassFile::parse(data) {
            Ok(class) => class,
            Err(err) => {
                warn!("unable to parse class with id {:016x}: {}", id, err);
                self.set_failed(id)?;
                return Ok(None);
            }
        };

        if class.is_module() || class.is_synthetic() {
            debug!("skipping class {}", class.name);
            return Ok(None);
        }

        if !self.filter.is_included(&class.name) {
            debug!("class {} excluded by filter", class.name);
            return Ok(None);
        }

        match analyzer::analyze_parsed(id, &class) {
            Ok(lookup) => {
                // Only classes which made it into the cache claim their name.
                self.check_duplicate(&class.name, id)?;

                let lookup = self.classes.insert(id, Box::new(lookup));

                let Ok(mut ids) = self.ids.lock() else {
                    bail!("couldn't lock mutex to record class id");
                };
                ids.insert(id);

                Ok(Some(lookup))
            }
            Err(err) => {
                warn!("unable to analyze class {}: {:#}", class.name, err);
                self.set_failed(id)?;
                Ok(None)
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&ClassCoverageLookup> {
        self.classes.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Ids of all cached classes, ascending.
    pub fn class_ids(&self) -> Result<Vec<u64>> {
        let Ok(ids) = self.ids.lock() else {
            bail!("couldn't lock mutex to list class ids");
        };

        Ok(ids.iter().copied().collect())
    }

    pub fn len(&self) -> Result<usize> {
        let Ok(ids) = self.ids.lock() else {
            bail!("couldn't lock mutex to count classes");
        };

        Ok(ids.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn has_failed(&self, id: u64) -> Result<bool> {
        let Ok(failed) = self.failed.lock() else {
            bail!("couldn't lock mutex to check failed classes");
        };

        Ok(failed.contains(&id))
    }

    fn set_failed(&self, id: u64) -> Result<()> {
        let Ok(mut failed) = self.failed.lock() else {
            bail!("couldn't lock mutex to record failed class");
        };

        failed.insert(id);

        Ok(())
    }

    fn check_duplicate(&self, name: &str, id: u64) -> Result<()> {
        let Ok(mut names) = self.names.lock() else {
            bail!("couldn't lock mutex to check duplicate classes");
        };

        let existing = *names.entry(name.to_owned()).or_insert(id);

        if existing == id {
            return Ok(());
        }

        // Classes may be analyzed in any order, so name the ids in a fixed one.
        let (low, high) = (existing.min(id), existing.max(id));

        match self.duplicates {
            DuplicateClassPolicy::Ignore => {}
            DuplicateClassPolicy::Warn => {
                warn!(
                    "class {} found with different ids {:016x} and {:016x}, coverage may be attributed to the wrong copy",
                    name, low, high
                );
            }
            DuplicateClassPolicy::Fail => {
                bail!(
                    "class {} found with different ids {:016x} and {:016x}",
                    name,
                    low,
                    high
                );
            }
        }

        Ok(())
    }
}
