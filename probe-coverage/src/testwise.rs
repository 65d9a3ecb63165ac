// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::cache::ProbesCache;
use crate::execution::TestSession;
use crate::lines::CompactLines;

/// Source file, identified the way class files name it.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SourceFileKey {
    /// VM package, e.g. `com/example`. Empty for the default package.
    pub package: String,

    /// Value of the `SourceFile` attribute, e.g. `Foo.java`.
    pub file_name: String,
}

impl SourceFileKey {
    pub fn new(package: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            file_name: file_name.into(),
        }
    }
}

/// Lines covered by one test, per source file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestCoverage {
    pub uniform_path: String,
    pub files: BTreeMap<SourceFileKey, CompactLines>,
}

impl TestCoverage {
    pub fn new(uniform_path: impl Into<String>) -> Self {
        Self {
            uniform_path: uniform_path.into(),
            files: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, file: SourceFileKey, lines: &CompactLines) {
        self.files.entry(file).or_default().merge(lines);
    }

    pub fn merge(&mut self, other: &TestCoverage) {
        for (file, lines) in &other.files {
            self.add(file.clone(), lines);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(|lines| lines.is_empty())
    }
}

/// Coverage of many tests, keyed by uniform path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestwiseCoverage {
    tests: BTreeMap<String, TestCoverage>,
}

impl TestwiseCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `coverage`, merging it with earlier coverage of the same test.
    pub fn add(&mut self, coverage: TestCoverage) {
        use std::collections::btree_map::Entry;

        match self.tests.entry(coverage.uniform_path.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(coverage);
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(&coverage);
            }
        }
    }

    pub fn get(&self, uniform_path: &str) -> Option<&TestCoverage> {
        self.tests.get(uniform_path)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Tests in ascending uniform path order.
    pub fn tests(&self) -> impl Iterator<Item = &TestCoverage> {
        self.tests.values()
    }

    pub fn into_tests(self) -> impl Iterator<Item = TestCoverage> {
        self.tests.into_values()
    }
}

impl FromIterator<TestCoverage> for TestwiseCoverage {
    fn from_iter<I: IntoIterator<Item = TestCoverage>>(iter: I) -> Self {
        let mut testwise = Self::new();

        for coverage in iter {
            testwise.add(coverage);
        }

        testwise
    }
}

/// Turns per-test execution data into covered lines, using classes which
/// were analyzed once into a shared `ProbesCache`.
pub struct TestwiseCoverageGenerator<'a> {
    cache: &'a ProbesCache,
}

impl<'a> TestwiseCoverageGenerator<'a> {
    pub fn new(cache: &'a ProbesCache) -> Self {
        Self { cache }
    }

    pub fn generate(&self, session: &TestSession) -> TestCoverage {
        let mut coverage = TestCoverage::new(session.uniform_path());

        for data in session.store.iter() {
            let Some(lookup) = self.cache.get(data.id) else {
                debug!(
                    "no class file for execution data of {} with id {:016x}",
                    data.name, data.id
                );
                continue;
            };

            if !data.has_hits() {
                continue;
            }

            let Some(file_name) = lookup.source_file_name() else {
                debug!("class {} has no source file name", lookup.class_name());
                continue;
            };

            let lines = match lookup.covered_lines(&data.probes) {
                Ok(lines) => lines,
                Err(err) => {
                    warn!("skipping class in test {}: {}", session.uniform_path(), err);
                    continue;
                }
            };

            if lines.is_empty() {
                continue;
            }

            let file = SourceFileKey::new(lookup.package_name(), file_name);
            coverage.add(file, &lines);
        }

        coverage
    }

    /// Generate coverage for every session, in parallel.
    pub fn generate_all(&self, sessions: &[TestSession]) -> TestwiseCoverage {
        sessions
            .par_iter()
            .map(|session| self.generate(session))
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }
}
