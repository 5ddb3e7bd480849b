//! JUnit XML file reporter.
//!
//! Writes one `<testsuite>` per test file under a `<testsuites>` root,
//! the shape CI systems ingest. Only `failed` tests become `<failure>`
//! elements; softfails stay green here just as they do for the exit
//! code, and skipped/todo tests become `<skipped/>`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::info;

use crate::pool::{PoolResult, RunReports};
use crate::report::TestStatus;
use crate::reporter::{ReportContext, Reporter, ReporterKind};

/// Writes `output_dir/<file_name>` after the run completes.
pub struct JUnitReporter {
    file_name: String,
}

impl JUnitReporter {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

#[async_trait]
impl Reporter for JUnitReporter {
    fn name(&self) -> &'static str {
        "junit"
    }

    fn kind(&self) -> ReporterKind {
        ReporterKind::File
    }

    async fn report(&self, ctx: &ReportContext<'_>) -> anyhow::Result<()> {
        let output_dir = ctx.output_dir.unwrap_or_else(|| Path::new("test-results"));
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join(&self.file_name);
        let xml = render(ctx.reports);
        std::fs::write(&path, xml)?;
        info!("Wrote JUnit XML to {}", path.display());
        Ok(())
    }
}

/// Renders the whole run as a JUnit document.
pub fn render(reports: &RunReports) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
    let _ = writer.write_event(Event::Text(BytesText::new("\n")));

    let (tests, failures, errors, skipped, time) = totals(reports);
    let mut root = BytesStart::new("testsuites");
    root.push_attribute(("name", "scriptest"));
    root.push_attribute(("tests", tests.to_string().as_str()));
    root.push_attribute(("failures", failures.to_string().as_str()));
    root.push_attribute(("errors", errors.to_string().as_str()));
    root.push_attribute(("skipped", skipped.to_string().as_str()));
    root.push_attribute(("time", format!("{time:.3}").as_str()));
    let _ = writer.write_event(Event::Start(root));
    let _ = writer.write_event(Event::Text(BytesText::new("\n")));

    for (file, result) in reports {
        write_suite(&mut writer, file, result);
    }

    let _ = writer.write_event(Event::End(BytesEnd::new("testsuites")));
    let _ = writer.write_event(Event::Text(BytesText::new("\n")));

    String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
}

fn totals(reports: &RunReports) -> (u32, u32, u32, u32, f64) {
    let mut tests = 0;
    let mut failures = 0;
    let mut errors = 0;
    let mut skipped = 0;
    let mut time = 0.0;
    for result in reports.values() {
        time += result.duration_s;
        match &result.report {
            Some(report) => {
                tests += report.stats.total;
                failures += report.stats.failed;
                skipped += report.stats.skipped + report.stats.todo;
            }
            None => errors += 1,
        }
    }
    (tests, failures, errors, skipped, time)
}

fn write_suite(writer: &mut Writer<Cursor<Vec<u8>>>, file: &PathBuf, result: &PoolResult) {
    let _ = writer.write_event(Event::Text(BytesText::new("  ")));

    let name = file.display().to_string();
    let mut suite = BytesStart::new("testsuite");
    suite.push_attribute(("name", name.as_str()));
    suite.push_attribute(("time", format!("{:.3}", result.duration_s).as_str()));
    suite.push_attribute(("timestamp", chrono::Utc::now().to_rfc3339().as_str()));

    match (&result.report, &result.error) {
        (Some(report), _) => {
            suite.push_attribute(("tests", report.stats.total.to_string().as_str()));
            suite.push_attribute(("failures", report.stats.failed.to_string().as_str()));
            suite.push_attribute(("errors", "0"));
            suite.push_attribute((
                "skipped",
                (report.stats.skipped + report.stats.todo).to_string().as_str(),
            ));
            let _ = writer.write_event(Event::Start(suite));

            for test in &report.tests {
                write_case(writer, &name, test);
            }

            let _ = writer.write_event(Event::End(BytesEnd::new("testsuite")));
        }
        (None, Some(error)) => {
            // File-level failure: a single synthetic errored case.
            suite.push_attribute(("tests", "1"));
            suite.push_attribute(("failures", "0"));
            suite.push_attribute(("errors", "1"));
            suite.push_attribute(("skipped", "0"));
            let _ = writer.write_event(Event::Start(suite));

            let mut case = BytesStart::new("testcase");
            case.push_attribute(("name", name.as_str()));
            case.push_attribute(("classname", name.as_str()));
            let _ = writer.write_event(Event::Start(case));
            let mut err = BytesStart::new("error");
            err.push_attribute(("message", error.to_string().as_str()));
            let _ = writer.write_event(Event::Empty(err));
            let _ = writer.write_event(Event::End(BytesEnd::new("testcase")));

            let _ = writer.write_event(Event::End(BytesEnd::new("testsuite")));
        }
        (None, None) => {
            suite.push_attribute(("tests", "0"));
            let _ = writer.write_event(Event::Empty(suite));
        }
    }

    let _ = writer.write_event(Event::Text(BytesText::new("\n")));
}

fn write_case(writer: &mut Writer<Cursor<Vec<u8>>>, classname: &str, test: &crate::report::TestResult) {
    let mut case = BytesStart::new("testcase");
    case.push_attribute(("name", test.description.as_str()));
    case.push_attribute(("classname", classname));
    case.push_attribute(("time", format!("{:.3}", test.duration as f64 / 1_000.0).as_str()));

    match test.status {
        TestStatus::Failed => {
            let _ = writer.write_event(Event::Start(case));
            let mut failure = BytesStart::new("failure");
            if let Some(error) = &test.error {
                failure.push_attribute(("message", error.message.as_str()));
            }
            let _ = writer.write_event(Event::Empty(failure));
            let _ = writer.write_event(Event::End(BytesEnd::new("testcase")));
        }
        TestStatus::Skipped | TestStatus::Todo => {
            let _ = writer.write_event(Event::Start(case));
            let _ = writer.write_event(Event::Empty(BytesStart::new("skipped")));
            let _ = writer.write_event(Event::End(BytesEnd::new("testcase")));
        }
        // Passed, benched, and softfailed stay green here.
        _ => {
            let _ = writer.write_event(Event::Empty(case));
        }
    }
}
