//! Report consumers.
//!
//! A reporter is a small capability: a name, a kind, and a `report()`
//! call that receives the finished run. Console reporters run first,
//! sequentially, in declaration order; file reporters are then awaited
//! concurrently. Reporters read the results, they never mutate them.
//!
//! Shared formatting lives in free functions so reporters compose
//! instead of inheriting.
//!
//! # Built-in reporters
//!
//! | Name | Kind | Output |
//! |------|------|--------|
//! | `console` | console | per-file lines, failure details, summary |
//! | `tap` | console | TAP version 14 stream |
//! | `junit` | file | `junit.xml` under the output directory |
//! | `json` | file | `report.json` under the output directory |

pub mod json;
pub mod junit;
pub mod tap;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::pool::{PoolResult, RunReports};
use crate::report::{ExecError, Stats, TestStatus};
use crate::sourcemap::SourceMap;

pub use json::JsonReporter;
pub use junit::JUnitReporter;
pub use tap::TapReporter;

/// Where a reporter writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    Console,
    File,
}

/// Everything a reporter gets to see.
pub struct ReportContext<'a> {
    /// Per-file results, in submission order.
    pub reports: &'a RunReports,

    /// Where file reporters write.
    pub output_dir: Option<&'a Path>,

    /// Wall-clock duration of the whole run.
    pub elapsed: Duration,
}

/// A consumer of the final report map.
#[async_trait]
pub trait Reporter: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ReporterKind;

    async fn report(&self, ctx: &ReportContext<'_>) -> anyhow::Result<()>;
}

/// Resolves reporter names from configuration. Unknown names warn and
/// are skipped.
pub fn from_names(names: &[String], verbose: bool) -> Vec<Box<dyn Reporter>> {
    names
        .iter()
        .filter_map(|name| match name.as_str() {
            "console" => Some(Box::new(ConsoleReporter::new(verbose)) as Box<dyn Reporter>),
            "tap" => Some(Box::new(TapReporter::new()) as Box<dyn Reporter>),
            "junit" => Some(Box::new(JUnitReporter::new("junit.xml")) as Box<dyn Reporter>),
            "json" => Some(Box::new(JsonReporter::new("report.json")) as Box<dyn Reporter>),
            other => {
                warn!("Unknown reporter '{}', skipping", other);
                None
            }
        })
        .collect()
}

/// Runs all reporters under the protocol: console sequentially in
/// declaration order, then file reporters concurrently. Reporter
/// failures are logged, never fatal.
pub async fn run_reporters(reporters: &[Box<dyn Reporter>], ctx: &ReportContext<'_>) {
    for reporter in reporters
        .iter()
        .filter(|r| r.kind() == ReporterKind::Console)
    {
        if let Err(error) = reporter.report(ctx).await {
            warn!("Reporter '{}' failed: {}", reporter.name(), error);
        }
    }

    let file_reporters: Vec<_> = reporters
        .iter()
        .filter(|r| r.kind() == ReporterKind::File)
        .collect();
    let results =
        futures::future::join_all(file_reporters.iter().map(|r| r.report(ctx))).await;
    for (reporter, result) in file_reporters.iter().zip(results) {
        if let Err(error) = result {
            warn!("Reporter '{}' failed: {}", reporter.name(), error);
        }
    }
}

// --- shared formatting ----------------------------------------------------

/// Colored status tag for a test result.
pub fn status_tag(status: TestStatus) -> String {
    match status {
        TestStatus::Passed => console::style("PASS").green().to_string(),
        TestStatus::Failed => console::style("FAIL").red().to_string(),
        TestStatus::Softfailed => console::style("SOFT").yellow().to_string(),
        TestStatus::Skipped => console::style("SKIP").yellow().dim().to_string(),
        TestStatus::Todo => console::style("TODO").blue().to_string(),
        TestStatus::Benched => console::style("BENCH").green().to_string(),
    }
}

/// Renders an error with its positions resolved through the file's
/// source map.
pub fn format_error(error: &ExecError, map: &SourceMap) -> String {
    let mut out = error.message.clone();
    for frame in &error.stack {
        match map.lookup(frame.line, frame.column) {
            Some(pos) => {
                out.push_str(&format!("\n    at {}:{}:{}", pos.source, pos.line, pos.column));
            }
            None => {
                out.push_str(&format!("\n    at <generated>:{}:{}", frame.line, frame.column));
            }
        }
    }
    out
}

/// Aggregate counters across all files.
pub fn run_totals(reports: &RunReports) -> (usize, usize, Stats) {
    let mut files_passed = 0;
    let mut files_failed = 0;
    let mut totals = Stats::default();

    for result in reports.values() {
        if result.passed() {
            files_passed += 1;
        } else {
            files_failed += 1;
        }
        if let Some(report) = &result.report {
            totals.total += report.stats.total;
            totals.passed += report.stats.passed;
            totals.failed += report.stats.failed;
            totals.softfailed += report.stats.softfailed;
            totals.skipped += report.stats.skipped;
            totals.todo += report.stats.todo;
        }
    }

    (files_passed, files_failed, totals)
}

fn file_status_line(file: &Path, result: &PoolResult) -> String {
    let tag = if result.passed() {
        console::style("PASS").green().bold().to_string()
    } else {
        console::style("FAIL").red().bold().to_string()
    };
    format!(
        "{} {} ({:.2}s)",
        tag,
        file.display(),
        result.duration_s
    )
}

/// Terminal reporter: per-file lines, failure details with mapped
/// positions, captured logs for failing files, and a final summary.
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    /// # Arguments
    ///
    /// * `verbose` - If `true`, prints every test result. If `false`,
    ///   only failures and the final summary.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    fn name(&self) -> &'static str {
        "console"
    }

    fn kind(&self) -> ReporterKind {
        ReporterKind::Console
    }

    async fn report(&self, ctx: &ReportContext<'_>) -> anyhow::Result<()> {
        for (file, result) in ctx.reports {
            println!("{}", file_status_line(file, result));

            if let Some(error) = &result.error {
                println!("  {}", console::style(error.to_string()).red());
            }

            if let Some(report) = &result.report {
                for test in report.tests.iter().chain(report.hooks.iter()) {
                    let show = self.verbose || test.status.carries_error();
                    if !show {
                        continue;
                    }
                    println!("  {} {}", status_tag(test.status), test.description);
                    if let Some(error) = &test.error {
                        for line in format_error(error, &result.source_map).lines() {
                            println!("    {}", console::style(line).dim());
                        }
                    }
                }
            }

            if !result.passed() && !result.logs.is_empty() {
                println!("  {}", console::style("captured console:").dim());
                for entry in &result.logs {
                    println!(
                        "    [{}] {}",
                        entry.kind.label(),
                        entry.args.join(" ")
                    );
                }
            }
        }

        let (files_passed, files_failed, totals) = run_totals(ctx.reports);
        println!();
        println!(
            "Files:  {} passed, {} failed",
            console::style(files_passed).green(),
            if files_failed > 0 {
                console::style(files_failed).red().to_string()
            } else {
                files_failed.to_string()
            }
        );
        println!(
            "Tests:  {} passed, {} failed, {} softfailed, {} skipped, {} todo ({} total)",
            console::style(totals.passed).green(),
            console::style(totals.failed).red(),
            console::style(totals.softfailed).yellow(),
            console::style(totals.skipped).yellow(),
            console::style(totals.todo).blue(),
            totals.total
        );
        println!("Time:   {:.2?}", ctx.elapsed);

        if files_failed == 0 {
            println!();
            println!("{}", console::style("All test files passed.").green().bold());
        } else {
            println!();
            println!("{}", console::style("Some test files failed.").red().bold());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{StackFrame, TestReport, TestResult};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn passing_result() -> PoolResult {
        let mut report = TestReport::empty("suite");
        report.stats.total = 1;
        report.stats.record(TestStatus::Passed);
        report.tests.push(TestResult {
            description: "a".into(),
            status: TestStatus::Passed,
            retries: 0,
            duration: 3,
            error: None,
            bench: None,
        });
        report.resolve_status();
        PoolResult {
            report: Some(report),
            error: None,
            duration_s: 0.01,
            logs: Vec::new(),
            source_map: SourceMap::default(),
        }
    }

    #[test]
    fn totals_fold_every_file() {
        let mut reports = RunReports::new();
        reports.insert(PathBuf::from("a.rhai"), passing_result());
        reports.insert(PathBuf::from("b.rhai"), passing_result());

        let (files_passed, files_failed, totals) = run_totals(&reports);
        assert_eq!(files_passed, 2);
        assert_eq!(files_failed, 0);
        assert_eq!(totals.total, 2);
        assert_eq!(totals.passed, 2);
    }

    #[test]
    fn errors_render_with_mapped_positions() {
        let mut error = ExecError::new("boom");
        error.stack.push(StackFrame { line: 1, column: 4 });
        let map = SourceMap::from_origins("suite.rhai", vec![3]);

        let rendered = format_error(&error, &map);
        assert!(rendered.contains("boom"));
        assert!(rendered.contains("at suite.rhai:3:4"));
    }

    #[test]
    fn unmapped_positions_fall_back_to_generated() {
        let mut error = ExecError::new("boom");
        error.stack.push(StackFrame { line: 9, column: 1 });
        let rendered = format_error(&error, &SourceMap::default());
        assert!(rendered.contains("<generated>:9:1"));
    }

    struct Recording {
        name: &'static str,
        kind: ReporterKind,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Reporter for Recording {
        fn name(&self) -> &'static str {
            self.name
        }
        fn kind(&self) -> ReporterKind {
            self.kind
        }
        async fn report(&self, _ctx: &ReportContext<'_>) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn console_reporters_run_before_file_reporters() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reporters: Vec<Box<dyn Reporter>> = vec![
            Box::new(Recording {
                name: "file-1",
                kind: ReporterKind::File,
                log: log.clone(),
            }),
            Box::new(Recording {
                name: "console-1",
                kind: ReporterKind::Console,
                log: log.clone(),
            }),
            Box::new(Recording {
                name: "console-2",
                kind: ReporterKind::Console,
                log: log.clone(),
            }),
        ];

        let reports = RunReports::new();
        let ctx = ReportContext {
            reports: &reports,
            output_dir: None,
            elapsed: Duration::from_secs(1),
        };
        run_reporters(&reporters, &ctx).await;

        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["console-1", "console-2", "file-1"]);
    }

    #[test]
    fn unknown_reporter_names_are_skipped() {
        let reporters = from_names(
            &[
                "console".to_string(),
                "carrier-pigeon".to_string(),
                "junit".to_string(),
            ],
            false,
        );
        assert_eq!(reporters.len(), 2);
        assert_eq!(reporters[0].name(), "console");
        assert_eq!(reporters[1].name(), "junit");
    }
}
