// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Testwise coverage report JSON.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, Result};
use probe_coverage::{CompactLines, TestCoverage, TestwiseCoverage};

use crate::test_execution::{TestExecution, TestResult};

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestwiseCoverageReport {
    /// Set when the report does not describe every test of the run.
    #[serde(default)]
    pub partial: bool,

    pub tests: Vec<TestInfo>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    pub uniform_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,

    /// Fingerprint of the test's code, used to detect changed tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TestResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub paths: Vec<PathCoverage>,
}

/// Covered files of one source directory, e.g. `com/example`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathCoverage {
    pub path: String,
    pub files: Vec<FileCoverage>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    pub file_name: String,

    #[serde(with = "crate::line_ranges")]
    pub covered_lines: CompactLines,
}

impl TestInfo {
    pub fn new(uniform_path: impl Into<String>) -> Self {
        Self {
            uniform_path: uniform_path.into(),
            source_path: None,
            content: None,
            duration: None,
            result: None,
            message: None,
            paths: vec![],
        }
    }

    /// Copy result details from a test execution, keeping any coverage.
    pub fn apply(&mut self, execution: &TestExecution) {
        self.result = Some(execution.result);

        if let Some(millis) = execution.duration_millis {
            self.duration = Some(millis as f64 / 1000.0);
        }

        if execution.message.is_some() {
            self.message = execution.message.clone();
        }
    }
}

impl From<TestCoverage> for TestInfo {
    fn from(coverage: TestCoverage) -> Self {
        let mut paths: BTreeMap<String, Vec<FileCoverage>> = BTreeMap::new();

        // Files are ordered by package, then file name.
        for (file, lines) in coverage.files {
            if lines.is_empty() {
                continue;
            }

            paths.entry(file.package).or_default().push(FileCoverage {
                file_name: file.file_name,
                covered_lines: lines,
            });
        }

        let mut test = TestInfo::new(coverage.uniform_path);
        test.paths = paths
            .into_iter()
            .map(|(path, files)| PathCoverage { path, files })
            .collect();

        test
    }
}

impl From<TestwiseCoverage> for TestwiseCoverageReport {
    fn from(testwise: TestwiseCoverage) -> Self {
        let tests = testwise.into_tests().map(TestInfo::from).collect();

        Self {
            partial: false,
            tests,
        }
    }
}

impl TestwiseCoverageReport {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Merge execution details into the report.
    ///
    /// Tests which ran without recording coverage are added without paths.
    /// When a test has several executions, the last one wins.
    pub fn with_executions(mut self, executions: &[TestExecution]) -> Self {
        let mut index: HashMap<String, usize> = self
            .tests
            .iter()
            .enumerate()
            .map(|(i, test)| (test.uniform_path.clone(), i))
            .collect();

        for execution in executions {
            let i = *index
                .entry(execution.uniform_path.clone())
                .or_insert_with(|| {
                    self.tests.push(TestInfo::new(&execution.uniform_path));
                    self.tests.len() - 1
                });

            self.tests[i].apply(execution);
        }

        self.sort();
        self
    }

    /// Split into reports of at most `max_tests` tests each.
    ///
    /// Every chunk is marked partial when there is more than one.
    pub fn split(self, max_tests: usize) -> Result<Vec<Self>> {
        if max_tests == 0 {
            bail!("cannot split report into chunks of zero tests");
        }

        if self.tests.len() <= max_tests {
            return Ok(vec![self]);
        }

        let reports = self
            .tests
            .chunks(max_tests)
            .map(|tests| Self {
                partial: true,
                tests: tests.to_vec(),
            })
            .collect();

        Ok(reports)
    }

    fn sort(&mut self) {
        self.tests.sort_by(|a, b| a.uniform_path.cmp(&b.uniform_path));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use probe_coverage::SourceFileKey;

    use super::*;

    fn lines(data: &[u32]) -> CompactLines {
        data.iter().copied().collect()
    }

    fn report() -> TestwiseCoverageReport {
        let mut a = TestCoverage::new("a");
        a.add(SourceFileKey::new("org/x", "Y.java"), &lines(&[3]));
        a.add(SourceFileKey::new("", "Main.java"), &lines(&[1, 2]));
        a.add(SourceFileKey::new("org/x", "X.java"), &lines(&[7, 9]));
        a.add(SourceFileKey::new("org/z", "Z.java"), &lines(&[]));

        let b = TestCoverage::new("b");

        TestwiseCoverageReport::from(TestwiseCoverage::from_iter([b, a]))
    }

    #[test]
    fn test_from_coverage() {
        let report = report();

        assert!(!report.partial);
        assert_eq!(report.tests.len(), 2);

        let a = &report.tests[0];
        assert_eq!(a.uniform_path, "a");
        assert_eq!(
            a.paths,
            vec![
                PathCoverage {
                    path: "".into(),
                    files: vec![FileCoverage {
                        file_name: "Main.java".into(),
                        covered_lines: lines(&[1, 2]),
                    }],
                },
                PathCoverage {
                    path: "org/x".into(),
                    files: vec![
                        FileCoverage {
                            file_name: "X.java".into(),
                            covered_lines: lines(&[7, 9]),
                        },
                        FileCoverage {
                            file_name: "Y.java".into(),
                            covered_lines: lines(&[3]),
                        },
                    ],
                },
            ]
        );

        assert_eq!(report.tests[1], TestInfo::new("b"));
    }

    #[test]
    fn test_with_executions() {
        let mut a = TestExecution::new("a", TestResult::Failure);
        a.duration_millis = Some(250);
        a.message = Some("expected true".into());

        let c = TestExecution::new("0-first", TestResult::Ignored);

        let report = report().with_executions(&[a, c]);

        let paths: Vec<_> = report.tests.iter().map(|t| t.uniform_path.as_str()).collect();
        assert_eq!(paths, vec!["0-first", "a", "b"]);

        let first = &report.tests[0];
        assert_eq!(first.result, Some(TestResult::Ignored));
        assert!(first.paths.is_empty());

        let a = &report.tests[1];
        assert_eq!(a.result, Some(TestResult::Failure));
        assert_eq!(a.duration, Some(0.25));
        assert_eq!(a.message.as_deref(), Some("expected true"));
        assert_eq!(a.paths.len(), 2);

        assert_eq!(report.tests[2].result, None);
    }

    #[test]
    fn test_repeated_execution() {
        let first = TestExecution::new("b", TestResult::Failure);
        let retry = TestExecution::new("b", TestResult::Passed);

        let report = report().with_executions(&[first, retry]);

        assert_eq!(report.tests.len(), 2);
        assert_eq!(report.tests[1].result, Some(TestResult::Passed));
    }

    #[test]
    fn test_split() -> Result<()> {
        let report = report().with_executions(&[
            TestExecution::new("c", TestResult::Passed),
            TestExecution::new("d", TestResult::Passed),
            TestExecution::new("e", TestResult::Passed),
        ]);

        let chunks = report.clone().split(2)?;
        let sizes: Vec<_> = chunks.iter().map(|r| r.tests.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(chunks.iter().all(|r| r.partial));
        assert_eq!(chunks[2].tests[0].uniform_path, "e");

        let whole = report.clone().split(5)?;
        assert_eq!(whole, vec![report.clone()]);

        assert!(report.split(0).is_err());

        Ok(())
    }

    #[test]
    fn test_json_names() -> Result<()> {
        let text = serde_json::to_string(&report())?;

        assert_eq!(
            text,
            concat!(
                r#"{"partial":false,"tests":["#,
                r#"{"uniformPath":"a","paths":["#,
                r#"{"path":"","files":[{"fileName":"Main.java","coveredLines":"1-2"}]},"#,
                r#"{"path":"org/x","files":["#,
                r#"{"fileName":"X.java","coveredLines":"7,9"},"#,
                r#"{"fileName":"Y.java","coveredLines":"3"}]}]},"#,
                r#"{"uniformPath":"b","paths":[]}]}"#,
            )
        );

        assert_eq!(TestwiseCoverageReport::parse(&text)?, report());

        Ok(())
    }
}
