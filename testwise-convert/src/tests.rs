// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use fixedbitset::FixedBitSet;
use pretty_assertions::assert_eq;
use probe_coverage::crc64;
use probe_coverage::fixture::branching_class;
use probe_coverage::{ExecutionData, SessionInfo};
use testwise_format::exec::ExecWriter;

use super::*;

fn probes(len: usize, set: &[usize]) -> FixedBitSet {
    let mut bits = FixedBitSet::with_capacity(len);
    for probe in set {
        bits.insert(*probe);
    }
    bits
}

fn convert_args(args: &[&str]) -> Result<ConvertArgs> {
    let argv = ["testwise-convert", "convert"].iter().chain(args);

    match Args::try_parse_from(argv)?.command {
        Command::Convert(args) => Ok(args),
        command => anyhow::bail!("unexpected command: {command:?}"),
    }
}

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    /// Classes `com/example/Foo` and `com/example/gen/Stub`, and one exec
    /// file with two tests hitting both.
    fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;

        let classes = dir.path().join("classes/com/example");
        fs::create_dir_all(classes.join("gen"))?;

        let foo = branching_class("com/example/Foo", "Foo.java");
        let stub = branching_class("com/example/gen/Stub", "Stub.java");
        fs::write(classes.join("Foo.class"), &foo)?;
        fs::write(classes.join("gen/Stub.class"), &stub)?;

        let mut writer = ExecWriter::new(vec![])?;
        for (test, hits) in [("FooTest/a()", &[0, 3][..]), ("FooTest/b()", &[2][..])] {
            writer.write_session_info(&SessionInfo::new(test, 0, 0))?;
            writer.write_execution_data(&ExecutionData::new(
                crc64::class_id(&foo),
                "com/example/Foo",
                probes(4, hits),
            ))?;
            writer.write_execution_data(&ExecutionData::new(
                crc64::class_id(&stub),
                "com/example/gen/Stub",
                probes(4, &[0]),
            ))?;
        }
        fs::write(dir.path().join("tests.exec"), writer.into_inner())?;

        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    fn report(&self, name: &str) -> Result<TestwiseCoverageReport> {
        TestwiseCoverageReport::parse(&fs::read_to_string(self.path(name))?)
    }
}

fn covered(report: &TestwiseCoverageReport) -> Vec<(String, String, String)> {
    let mut covered = vec![];

    for test in &report.tests {
        for path in &test.paths {
            for file in &path.files {
                covered.push((
                    test.uniform_path.clone(),
                    format!("{}/{}", path.path, file.file_name),
                    testwise_format::line_ranges::format(&file.covered_lines),
                ));
            }
        }
    }

    covered
}

fn triple(test: &str, file: &str, lines: &str) -> (String, String, String) {
    (test.into(), file.into(), lines.into())
}

#[test]
fn test_convert() -> Result<()> {
    let ws = Workspace::new()?;
    let args = convert_args(&[
        "--exec",
        &ws.path("tests.exec"),
        "--classes",
        &ws.path("classes"),
        "--exclude",
        "*.gen.*",
        "--output",
        &ws.path("out/report.json"),
    ])?;

    let written = convert(&args)?;

    assert_eq!(written, vec![PathBuf::from(ws.path("out/report.json"))]);

    let report = ws.report("out/report.json")?;
    assert!(!report.partial);
    assert_eq!(
        covered(&report),
        vec![
            triple("FooTest/a()", "com/example/Foo.java", "10,12"),
            triple("FooTest/b()", "com/example/Foo.java", "11"),
        ]
    );

    Ok(())
}

#[test]
fn test_convert_split_with_executions() -> Result<()> {
    let ws = Workspace::new()?;
    fs::write(
        ws.path("executions.json"),
        r#"[{ "uniformPath": "FooTest/c()", "result": "SKIPPED" }]"#,
    )?;

    let args = convert_args(&[
        "--exec",
        &ws.path("tests.exec"),
        "--classes",
        &ws.path("classes"),
        "--test-execution",
        &ws.path("executions.json"),
        "--split-after",
        "2",
        "--output",
        &ws.path("report.json"),
    ])?;

    let written = convert(&args)?;

    assert_eq!(
        written,
        vec![
            PathBuf::from(ws.path("report-1.json")),
            PathBuf::from(ws.path("report-2.json")),
        ]
    );

    let first = ws.report("report-1.json")?;
    assert!(first.partial);
    assert_eq!(
        covered(&first),
        vec![
            triple("FooTest/a()", "com/example/Foo.java", "10,12"),
            triple("FooTest/a()", "com/example/gen/Stub.java", "10"),
            triple("FooTest/b()", "com/example/Foo.java", "11"),
            triple("FooTest/b()", "com/example/gen/Stub.java", "10"),
        ]
    );

    let second = ws.report("report-2.json")?;
    assert_eq!(second.tests.len(), 1);
    assert_eq!(second.tests[0].uniform_path, "FooTest/c()");
    assert!(second.tests[0].paths.is_empty());

    Ok(())
}

#[test]
fn test_convert_fails_on_duplicates() -> Result<()> {
    let ws = Workspace::new()?;

    // Same name, different bytes.
    let copy = probe_coverage::fixture::ClassBuilder::new("com/example/Foo")
        .source_file("Foo.java")
        .build();
    fs::create_dir_all(ws.path("more"))?;
    fs::write(ws.path("more/Foo.class"), copy)?;

    let args = convert_args(&[
        "--exec",
        &ws.path("tests.exec"),
        "--classes",
        &ws.path("classes"),
        &ws.path("more"),
        "--duplicates",
        "fail",
        "--output",
        &ws.path("report.json"),
    ])?;

    assert!(convert(&args).is_err());

    Ok(())
}

#[test]
fn test_class_filter_with_allowlist() -> Result<()> {
    let ws = Workspace::new()?;
    fs::write(ws.path("allowlist.txt"), "com.example.*\n! com.example.gen.*\n")?;

    let args = convert_args(&[
        "--exec",
        "x.exec",
        "--classes",
        "classes",
        "--class-allowlist",
        &ws.path("allowlist.txt"),
        "--include",
        "org.other.*",
        "--exclude",
        "com.example.Internal*",
        "--output",
        "report.json",
    ])?;

    let filter = class_filter(&args)?;

    assert!(filter.is_included("com/example/Foo"));
    assert!(filter.is_included("org/other/Bar"));
    assert!(!filter.is_included("com/example/gen/Stub"));
    assert!(!filter.is_included("com/example/InternalFoo"));
    assert!(!filter.is_included("net/Baz"));

    Ok(())
}

#[test]
fn test_args() -> Result<()> {
    let args = convert_args(&["--exec", "a.exec", "b.exec", "--classes", "lib", "-o", "r.json"])?;

    assert_eq!(args.exec, vec![PathBuf::from("a.exec"), PathBuf::from("b.exec")]);
    assert_eq!(args.duplicates, Duplicates::Warn);
    assert_eq!(args.split_after, None);

    assert!(convert_args(&["--classes", "lib", "-o", "r.json"]).is_err());
    assert!(convert_args(&["--exec", "a", "--classes", "b", "-o", "c", "--duplicates", "x"]).is_err());

    Ok(())
}

#[test]
fn test_numbered_path() {
    assert_eq!(
        numbered_path(Path::new("out/report.json"), 3),
        PathBuf::from("out/report-3.json")
    );
    assert_eq!(numbered_path(Path::new("report"), 1), PathBuf::from("report-1"));
}
