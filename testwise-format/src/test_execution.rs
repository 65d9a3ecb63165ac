// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;

use anyhow::{Context, Result};

/// Outcome of running one test.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    Passed,
    Ignored,
    Skipped,
    Failure,
    Error,
}

/// Execution details of one test, as reported by the test runner.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestExecution {
    pub uniform_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_millis: Option<u64>,

    pub result: TestResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestExecution {
    pub fn new(uniform_path: impl Into<String>, result: TestResult) -> Self {
        Self {
            uniform_path: uniform_path.into(),
            duration_millis: None,
            result,
            message: None,
        }
    }

    pub fn parse(text: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read test executions: {}", path.display()))?;

        Self::parse(&text)
            .with_context(|| format!("unable to parse test executions: {}", path.display()))
    }
}
