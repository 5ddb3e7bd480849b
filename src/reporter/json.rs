//! JSON file reporter.
//!
//! Serializes the whole run (per-file reports, errors, captured logs,
//! and aggregate totals) for downstream tooling.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::pool::RunReports;
use crate::report::Stats;
use crate::reporter::{run_totals, ReportContext, Reporter, ReporterKind};

#[derive(Serialize)]
struct JsonRun<'a> {
    generated_at: String,
    duration_s: f64,
    files_passed: usize,
    files_failed: usize,
    totals: Stats,
    files: &'a RunReports,
}

/// Writes `output_dir/<file_name>` after the run completes.
pub struct JsonReporter {
    file_name: String,
}

impl JsonReporter {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Renders the run document; exposed for tests.
    pub fn render(ctx: &ReportContext<'_>) -> anyhow::Result<String> {
        let (files_passed, files_failed, totals) = run_totals(ctx.reports);
        let run = JsonRun {
            generated_at: chrono::Utc::now().to_rfc3339(),
            duration_s: ctx.elapsed.as_secs_f64(),
            files_passed,
            files_failed,
            totals,
            files: ctx.reports,
        };
        Ok(serde_json::to_string_pretty(&run)?)
    }
}

#[async_trait]
impl Reporter for JsonReporter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn kind(&self) -> ReporterKind {
        ReporterKind::File
    }

    async fn report(&self, ctx: &ReportContext<'_>) -> anyhow::Result<()> {
        let output_dir = ctx.output_dir.unwrap_or_else(|| Path::new("test-results"));
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join(&self.file_name);
        std::fs::write(&path, Self::render(ctx)?)?;
        info!("Wrote JSON report to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolResult;
    use crate::report::{TestReport, TestResult, TestStatus};
    use crate::sourcemap::SourceMap;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn render_includes_totals_and_files() {
        let mut report = TestReport::empty("suite");
        report.stats.total = 1;
        report.stats.record(TestStatus::Passed);
        report.tests.push(TestResult {
            description: "a".into(),
            status: TestStatus::Passed,
            retries: 0,
            duration: 2,
            error: None,
            bench: None,
        });
        report.resolve_status();

        let mut reports = RunReports::new();
        reports.insert(
            PathBuf::from("suite.rhai"),
            PoolResult {
                report: Some(report),
                error: None,
                duration_s: 0.2,
                logs: Vec::new(),
                source_map: SourceMap::default(),
            },
        );

        let ctx = ReportContext {
            reports: &reports,
            output_dir: None,
            elapsed: Duration::from_millis(250),
        };
        let json = JsonReporter::render(&ctx).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["files_passed"], 1);
        assert_eq!(value["totals"]["passed"], 1);
        assert_eq!(value["files"]["suite.rhai"]["report"]["status"], "passed");
        assert_eq!(
            value["files"]["suite.rhai"]["report"]["tests"][0]["description"],
            "a"
        );
    }
}
