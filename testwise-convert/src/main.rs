// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use probe_coverage::{
    ClassFilter, DuplicateClassPolicy, ProbesCache, TestSession, TestwiseCoverageGenerator,
};
use rayon::prelude::*;
use testwise_format::exec::read_exec;
use testwise_format::report::TestwiseCoverageReport;
use testwise_format::test_execution::TestExecution;

mod classes;

#[derive(Parser, Debug)]
#[command(about = "Convert JaCoCo testwise execution data into coverage reports")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a testwise coverage report.
    Convert(ConvertArgs),

    /// Print sessions and probe hits of execution data files.
    Dump {
        #[arg(long, required = true, num_args = 1..)]
        exec: Vec<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct ConvertArgs {
    /// Execution data files, one session per test.
    #[arg(long, required = true, num_args = 1..)]
    exec: Vec<PathBuf>,

    /// Class file directories, class files, or jar/war/ear/zip archives.
    #[arg(long, required = true, num_args = 1..)]
    classes: Vec<PathBuf>,

    /// `:`-separated class name patterns to include.
    #[arg(long)]
    include: Option<String>,

    /// `:`-separated class name patterns to exclude.
    #[arg(long)]
    exclude: Option<String>,

    #[arg(long)]
    class_allowlist: Option<PathBuf>,

    /// Handling of distinct class files with the same class name.
    #[arg(long, value_enum, default_value_t = Duplicates::Warn)]
    duplicates: Duplicates,

    /// JSON list of test execution results to merge into the report.
    #[arg(long)]
    test_execution: Option<PathBuf>,

    /// Write one report per this many tests.
    #[arg(long)]
    split_after: Option<usize>,

    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
enum Duplicates {
    Ignore,
    Warn,
    Fail,
}

impl From<Duplicates> for DuplicateClassPolicy {
    fn from(duplicates: Duplicates) -> Self {
        match duplicates {
            Duplicates::Ignore => Self::Ignore,
            Duplicates::Warn => Self::Warn,
            Duplicates::Fail => Self::Fail,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::init();

    match args.command {
        Command::Convert(args) => {
            for path in convert(&args)? {
                println!("{}", path.display());
            }
        }
        Command::Dump { exec } => dump(&exec)?,
    }

    Ok(())
}

fn convert(args: &ConvertArgs) -> Result<Vec<PathBuf>> {
    let filter = class_filter(args)?;
    let cache = ProbesCache::new(filter, args.duplicates.into());

    let t = Instant::now();
    let classes = classes::collect(&args.classes)?;
    log::info!("collected {} class files: {:?}", classes.len(), t.elapsed());

    let t = Instant::now();
    let analyzed = classes
        .par_iter()
        .map(|class| {
            cache
                .analyze_class(&class.data)
                .with_context(|| format!("unable to analyze {}", class.origin))
        })
        .collect::<Result<Vec<_>>>()?;
    let analyzed = analyzed.iter().filter(|lookup| lookup.is_some()).count();
    log::info!("analyzed {analyzed} classes: {:?}", t.elapsed());

    let t = Instant::now();
    let sessions = read_sessions(&args.exec)?;
    log::info!("read {} sessions: {:?}", sessions.len(), t.elapsed());

    let t = Instant::now();
    let testwise = TestwiseCoverageGenerator::new(&cache).generate_all(&sessions);
    log::info!("generated coverage of {} tests: {:?}", testwise.len(), t.elapsed());

    let mut report = TestwiseCoverageReport::from(testwise);

    if let Some(path) = &args.test_execution {
        let executions = TestExecution::load(path)?;
        report = report.with_executions(&executions);
    }

    let reports = match args.split_after {
        Some(max_tests) => report.split(max_tests)?,
        None => vec![report],
    };

    write_reports(&args.output, &reports)
}

fn class_filter(args: &ConvertArgs) -> Result<ClassFilter> {
    let include = args.include.as_deref().unwrap_or_default();
    let exclude = args.exclude.as_deref().unwrap_or_default();

    let Some(path) = &args.class_allowlist else {
        return ClassFilter::new(include, exclude);
    };

    let mut filter = ClassFilter::load(path)
        .with_context(|| format!("unable to load class allowlist {}", path.display()))?;

    // Pattern lists only add to an allowlist, which has no implicit include-all rule.
    let includes = patterns(include).map(str::to_owned);
    let excludes = patterns(exclude).map(|p| format!("! {p}"));
    let extra = includes.chain(excludes).collect::<Vec<_>>().join("\n");
    filter.extend(&ClassFilter::parse(&extra)?);

    Ok(filter)
}

fn patterns(list: &str) -> impl Iterator<Item = &str> {
    list.split(':').map(str::trim).filter(|p| !p.is_empty())
}

fn read_sessions(paths: &[PathBuf]) -> Result<Vec<TestSession>> {
    let mut sessions = vec![];

    for path in paths {
        let data = fs::read(path).with_context(|| format!("unable to read {}", path.display()))?;
        let exec = read_exec(&data)
            .with_context(|| format!("invalid execution data file {}", path.display()))?;
        sessions.extend(exec);
    }

    Ok(sessions)
}

fn write_reports(output: &Path, reports: &[TestwiseCoverageReport]) -> Result<Vec<PathBuf>> {
    let mut written = vec![];

    for (index, report) in reports.iter().enumerate() {
        let path = if reports.len() == 1 {
            output.to_owned()
        } else {
            numbered_path(output, index + 1)
        };

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let file =
            fs::File::create(&path).with_context(|| format!("unable to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), report)?;

        written.push(path);
    }

    Ok(written)
}

/// `out/report.json` -> `out/report-2.json`
fn numbered_path(output: &Path, number: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = match output.extension() {
        Some(extension) => format!("{stem}-{number}.{}", extension.to_string_lossy()),
        None => format!("{stem}-{number}"),
    };

    output.with_file_name(name)
}

fn dump(paths: &[PathBuf]) -> Result<()> {
    for session in read_sessions(paths)? {
        println!(
            "session {:?} start = {} dump = {}",
            session.info.id, session.info.start, session.info.dump
        );

        for data in session.store.iter() {
            println!(
                "  {:016x} {} {}/{}",
                data.id,
                data.name,
                data.probes.count_ones(..),
                data.probes.len()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
