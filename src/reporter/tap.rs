//! TAP console reporter.
//!
//! Emits the Test Anything Protocol, version 14
//! (<https://testanything.org/tap-version-14-specification.html>): one
//! numbered test point per test across all files, `# Subtest:` comments
//! marking file boundaries, and a YAML-ish diagnostic block for
//! failures. A file-level error becomes a single failing point so the
//! plan still accounts for the file.

use async_trait::async_trait;
use serde_json::json;

use crate::pool::RunReports;
use crate::report::{TestResult, TestStatus};
use crate::reporter::{ReportContext, Reporter, ReporterKind};
use crate::sourcemap::SourceMap;

const VERSION_HEADER: &str = "TAP version 14";

/// Console reporter speaking TAP v14.
pub struct TapReporter;

impl TapReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TapReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for TapReporter {
    fn name(&self) -> &'static str {
        "tap"
    }

    fn kind(&self) -> ReporterKind {
        ReporterKind::Console
    }

    async fn report(&self, ctx: &ReportContext<'_>) -> anyhow::Result<()> {
        print!("{}", render(ctx.reports));
        Ok(())
    }
}

fn escape_description(description: &str) -> String {
    description
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('#', "\\#")
}

fn directive(status: TestStatus) -> (&'static str, &'static str) {
    match status {
        TestStatus::Passed | TestStatus::Benched => ("ok", ""),
        TestStatus::Softfailed => ("ok", " # SKIP softfailed"),
        TestStatus::Skipped => ("ok", " # SKIP"),
        TestStatus::Todo => ("ok", " # TODO"),
        TestStatus::Failed => ("not ok", ""),
    }
}

fn push_diagnostic(out: &mut String, file: &str, test: &TestResult, map: &SourceMap) {
    let Some(error) = &test.error else { return };

    let at = test.error.as_ref().and_then(|e| {
        e.stack
            .first()
            .and_then(|frame| map.lookup(frame.line, frame.column))
    });

    // YAML is a superset of JSON, so a JSON diagnostic keeps us
    // dependency-free here.
    let diagnostic = json!({
        "message": error.message,
        "severity": "fail",
        "file": file,
        "at": at.map(|pos| format!("{}:{}:{}", pos.source, pos.line, pos.column)),
    });
    out.push_str("  ---\n");
    out.push_str(&format!("  {diagnostic}\n"));
    out.push_str("  ...\n");
}

/// Renders the whole run as one TAP document.
pub fn render(reports: &RunReports) -> String {
    let mut out = String::new();
    out.push_str(VERSION_HEADER);
    out.push('\n');

    let mut n = 0usize;
    for (file, result) in reports {
        let name = file.display().to_string();
        out.push_str(&format!("# Subtest: {name}\n"));

        match (&result.report, &result.error) {
            (Some(report), _) => {
                for test in &report.tests {
                    n += 1;
                    let (status, directive) = directive(test.status);
                    out.push_str(&format!(
                        "{} {} - {}{}\n",
                        status,
                        n,
                        escape_description(&test.description),
                        directive
                    ));
                    if test.status == TestStatus::Failed {
                        push_diagnostic(&mut out, &name, test, &result.source_map);
                    }
                }
            }
            (None, Some(error)) => {
                n += 1;
                out.push_str(&format!(
                    "not ok {} - {}\n",
                    n,
                    escape_description(&name)
                ));
                out.push_str("  ---\n");
                out.push_str(&format!(
                    "  {}\n",
                    json!({ "message": error.to_string(), "severity": "fail" })
                ));
                out.push_str("  ...\n");
            }
            (None, None) => {}
        }
    }

    out.push_str(&format!("1..{n}\n"));
    out
}
