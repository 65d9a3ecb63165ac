// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

#[macro_use]
extern crate serde;

pub mod exec;
pub mod line_ranges;
pub mod report;
pub mod test_execution;
