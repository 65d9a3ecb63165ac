// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod analyzer;
pub mod builder;
pub mod cache;
pub mod classfile;
pub mod crc64;
pub mod execution;
pub mod filter;
pub mod instruction;
pub mod lines;
pub mod lookup;
pub mod mutf8;
pub mod probes;
pub mod testwise;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixture;

pub use analyzer::{analyze_class, CachingClassAnalyzer};
pub use builder::{AnalysisError, CachingInstructionsBuilder};
pub use cache::{DuplicateClassPolicy, ProbesCache};
pub use execution::{ExecutionData, ExecutionDataStore, SessionInfo, TestSession};
pub use filter::ClassFilter;
pub use lines::CompactLines;
pub use lookup::ClassCoverageLookup;
pub use testwise::{SourceFileKey, TestCoverage, TestwiseCoverage, TestwiseCoverageGenerator};
