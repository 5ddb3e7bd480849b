//! Per-file execution drive.
//!
//! The pool walks the discovered file list in chunks of the configured
//! concurrency, and for each file: marks the status board, asks the
//! transformer for a compiled script, builds a fresh [`Context`], hands
//! the script to the isolator, and records a [`PoolResult`]. Every
//! failure mode is folded into the result; a broken file never takes the
//! run down.
//!
//! Results live in an insertion-ordered map keyed by file path, which is
//! exactly what reporters consume. The exit code is the run's only global
//! signal: `1` when any file errored or reported failure, `0` otherwise.
//!
//! # Execution flow
//!
//! ```text
//!  files ──chunks──► [ transform ──► context ──► isolate ] x N in parallel
//!                         │                         │
//!                     BuildError               report / error
//!                         └────────► PoolResult ◄───┘
//!                                        │
//!                              RunReports (ordered map) ──► reporters
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{ConsoleHandle, LogEntry};
use crate::config::{value_to_dynamic, Config};
use crate::isolate::{Context, Isolator};
use crate::report::{ExecError, ReportStatus, TestReport};
use crate::sourcemap::SourceMap;
use crate::status::StatusBoard;
use crate::transform::{BuildError, DirectivePlugin, TransformError, Transformer};

/// A file-level failure, as embedded in a [`PoolResult`].
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileError {
    /// Transformation or compilation failed; no report exists.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The file or one of its modules could not be read.
    #[error("cannot load '{module}': {message}")]
    Load { module: String, message: String },

    /// User code threw outside any test body.
    #[error("{0}")]
    Exec(ExecError),

    /// The whole file exceeded its execution limit.
    #[error("timed out after {limit_ms} ms{}", crate::isolate::advisory(.fallback))]
    Timeout { limit_ms: u64, fallback: bool },

    /// The file's evaluation value is not a test report.
    #[error("invalid report: {message}")]
    InvalidReport { message: String },

    /// A defect in the runner itself.
    #[error("internal runner error: {message}")]
    Internal { message: String },
}

impl From<TransformError> for FileError {
    fn from(error: TransformError) -> Self {
        match error {
            TransformError::Build(build) => FileError::Build(build),
            TransformError::Load { path, message } => FileError::Load {
                module: path.display().to_string(),
                message,
            },
        }
    }
}

impl From<crate::isolate::IsolateError> for FileError {
    fn from(error: crate::isolate::IsolateError) -> Self {
        use crate::isolate::IsolateError;
        match error {
            IsolateError::Timeout { limit_ms, fallback } => FileError::Timeout { limit_ms, fallback },
            IsolateError::Exec(exec) => FileError::Exec(exec),
            IsolateError::InvalidReport { message } => FileError::InvalidReport { message },
            IsolateError::Load { module, message } => FileError::Load { module, message },
            IsolateError::Internal { message } => FileError::Internal { message },
        }
    }
}

/// Everything the run produced for one file.
#[derive(Debug, Clone, Serialize)]
pub struct PoolResult {
    /// The validated report, absent on file-level errors.
    pub report: Option<TestReport>,

    /// The file-level error, absent when a report exists.
    pub error: Option<FileError>,

    /// Wall-clock duration of the file's execution, in seconds.
    pub duration_s: f64,

    /// Console writes captured during this file's execution only.
    pub logs: Vec<LogEntry>,

    /// Position mapping for this file's generated code.
    #[serde(skip)]
    pub source_map: SourceMap,
}

impl PoolResult {
    /// Whether this file leaves the exit code untouched.
    pub fn passed(&self) -> bool {
        self.error.is_none()
            && self
                .report
                .as_ref()
                .map(|report| report.status != ReportStatus::Failed)
                .unwrap_or(false)
    }
}

/// Per-file results in submission order.
pub type RunReports = IndexMap<PathBuf, PoolResult>;

/// The overall outcome of a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub reports: RunReports,
    /// `0` when every file passed, `1` otherwise.
    pub exit_code: i32,
    pub duration: Duration,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Drives file execution with bounded concurrency.
pub struct Pool<'a> {
    config: &'a Config,
    transformer: Transformer,
    isolator: Isolator,
    status: StatusBoard,
}

impl<'a> Pool<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self::with_status(config, StatusBoard::new())
    }

    /// A pool with an explicit status board (tests pass a disabled one).
    pub fn with_status(config: &'a Config, status: StatusBoard) -> Self {
        Self {
            config,
            transformer: build_transformer(config),
            isolator: Isolator::new()
                .with_preloads(config.run.require.clone())
                .with_strict(config.transform.strict)
                .with_collect_only(config.run.collect_only),
            status,
        }
    }

    /// Runs every file and collates the results.
    ///
    /// Files are processed in chunks of `max_concurrent`; within a chunk
    /// they run concurrently, chunks are processed in submission order,
    /// and the terminal view settles at each chunk boundary.
    pub async fn run(&self, files: &[PathBuf]) -> RunOutcome {
        let started = Instant::now();
        let width = self.config.run.max_concurrent.max(1);

        info!("Running {} test files ({} at a time)", files.len(), width);
        self.status.register(files);

        let mut reports = RunReports::with_capacity(files.len());
        for chunk in files.chunks(width) {
            let futures: Vec<_> = chunk.iter().map(|file| self.run_file(file)).collect();
            let results = futures::future::join_all(futures).await;
            for (file, result) in chunk.iter().zip(results) {
                reports.insert(file.clone(), result);
            }
        }

        self.status.clear();

        let exit_code = if reports.values().all(PoolResult::passed) {
            0
        } else {
            1
        };

        RunOutcome {
            reports,
            exit_code,
            duration: started.elapsed(),
        }
    }

    async fn run_file(&self, file: &Path) -> PoolResult {
        let started = Instant::now();
        self.status.set_running(file);

        let built = match self.transformer.transform(file) {
            Ok(built) => built,
            Err(error) => {
                warn!(file = %file.display(), %error, "build failed");
                self.status.finish(file, false);
                return PoolResult {
                    report: None,
                    error: Some(error.into()),
                    duration_s: started.elapsed().as_secs_f64(),
                    logs: Vec::new(),
                    source_map: SourceMap::default(),
                };
            }
        };

        let console = ConsoleHandle::new();
        let mut context =
            Context::new(file, console.clone()).with_preloads(built.preloads.clone());
        for (name, value) in &self.config.context {
            context = context.with_binding(name.clone(), value_to_dynamic(value));
        }

        debug!(
            file = %file.display(),
            exec_id = %context.exec_id,
            "file context ready"
        );

        let outcome = self
            .isolator
            .execute(&built.script, context, self.config.run.timeout)
            .await;

        let result = PoolResult {
            report: outcome.report,
            error: outcome.error.map(Into::into),
            duration_s: started.elapsed().as_secs_f64(),
            logs: console.drain(),
            source_map: built.source_map,
        };

        self.status.finish(file, result.passed());
        result
    }
}

fn build_transformer(config: &Config) -> Transformer {
    let mut transformer = Transformer::bare();
    for name in &config.transform.plugins {
        match name.as_str() {
            "directives" => {
                transformer = transformer.with_plugin(Box::new(DirectivePlugin::new()));
            }
            other => warn!("Unknown transform plugin '{}', skipping", other),
        }
    }
    transformer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TestStatus;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn pool(config: &Config) -> Pool<'_> {
        Pool::with_status(config, StatusBoard::with_enabled(false))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_passing_files_exit_zero() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            &dir,
            "ok.rhai",
            r#"
            it("a", || 1);
            it("b", || 2);
            run()
            "#,
        );

        let config = Config::default();
        let outcome = pool(&config).run(&[file.clone()]).await;

        assert_eq!(outcome.exit_code, 0);
        let result = &outcome.reports[&file];
        let report = result.report.as_ref().unwrap();
        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.passed, 2);
        assert_eq!(report.status, ReportStatus::Passed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_report_value_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "num.rhai", "42");

        let config = Config::default();
        let outcome = pool(&config).run(&[file.clone()]).await;

        assert_eq!(outcome.exit_code, 1);
        let result = &outcome.reports[&file];
        assert!(result.report.is_none());
        assert!(matches!(result.error, Some(FileError::InvalidReport { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn build_errors_are_contained_per_file() {
        let dir = TempDir::new().unwrap();
        let broken = write_file(&dir, "broken.rhai", "let x = ;");
        let fine = write_file(&dir, "fine.rhai", r#"it("a", || 1); run()"#);

        let config = Config::default();
        let outcome = pool(&config).run(&[broken.clone(), fine.clone()]).await;

        assert_eq!(outcome.exit_code, 1);
        assert!(matches!(
            outcome.reports[&broken].error,
            Some(FileError::Build(_))
        ));
        assert!(outcome.reports[&fine].passed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn logs_stay_with_their_file() {
        let dir = TempDir::new().unwrap();
        let first = write_file(
            &dir,
            "first.rhai",
            r#"console.log("from first"); it("a", || 1); run()"#,
        );
        let second = write_file(
            &dir,
            "second.rhai",
            r#"console.log("from second"); it("b", || 1); run()"#,
        );

        let config = Config::default();
        let outcome = pool(&config).run(&[first.clone(), second.clone()]).await;

        let first_logs: Vec<String> = outcome.reports[&first]
            .logs
            .iter()
            .map(|e| e.args.join(" "))
            .collect();
        let second_logs: Vec<String> = outcome.reports[&second]
            .logs
            .iter()
            .map(|e| e.args.join(" "))
            .collect();
        assert_eq!(first_logs, vec!["from first"]);
        assert_eq!(second_logs, vec!["from second"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reports_preserve_submission_order() {
        let dir = TempDir::new().unwrap();
        let files: Vec<PathBuf> = (0..6)
            .map(|i| {
                write_file(
                    &dir,
                    &format!("t{i}.rhai"),
                    r#"it("a", || 1); run()"#,
                )
            })
            .collect();

        let mut config = Config::default();
        config.run.max_concurrent = 2;
        let outcome = pool(&config).run(&files).await;

        let keys: Vec<&PathBuf> = outcome.reports.keys().collect();
        let expected: Vec<&PathBuf> = files.iter().collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn context_bindings_come_from_config() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            &dir,
            "ctx.rhai",
            r#"
            it("sees binding", || {
                if service != "orders" { throw "wrong binding"; }
            });
            run()
            "#,
        );

        let config = crate::config::load_config_str(
            r#"
            [context]
            service = "orders"
            "#,
        )
        .unwrap();
        let outcome = pool(&config).run(&[file.clone()]).await;
        assert_eq!(outcome.exit_code, 0, "{:?}", outcome.reports[&file].error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn identical_inputs_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            &dir,
            "idem.rhai",
            r#"
            it("a", || 1);
            skip("b", || 2);
            fail("c", || { throw "soft"; });
            run()
            "#,
        );

        let config = Config::default();
        let runner = pool(&config);
        let first = runner.run(std::slice::from_ref(&file)).await;
        let second = runner.run(std::slice::from_ref(&file)).await;

        let a = first.reports[&file].report.as_ref().unwrap();
        let b = second.reports[&file].report.as_ref().unwrap();
        assert_eq!(a.stats, b.stats);
        let statuses = |r: &TestReport| -> Vec<TestStatus> {
            r.tests.iter().map(|t| t.status).collect()
        };
        assert_eq!(statuses(a), statuses(b));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn thrown_positions_map_back_through_directives() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "helper.rhai", "40 + 2");
        let file = write_file(
            &dir,
            "mapped.rhai",
            "// @require helper\nit(\"boom\", || { throw \"mapped\"; });\nrun()\n",
        );

        let config = Config::default();
        let outcome = pool(&config).run(&[file.clone()]).await;
        let result = &outcome.reports[&file];
        let report = result.report.as_ref().unwrap();
        let boom = &report.tests[0];
        assert_eq!(boom.status, TestStatus::Failed);

        let frame = boom.error.as_ref().unwrap().stack.first().copied().unwrap();
        // The directive line was removed, so generated line 1 must map to
        // original line 2.
        let mapped = result.source_map.lookup(frame.line, frame.column).unwrap();
        assert_eq!(mapped.line, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_timeout_is_reported() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "spin.rhai", "let x = 0; loop { x += 1; }");

        let mut config = Config::default();
        config.run.timeout = 250;
        let outcome = pool(&config).run(&[file.clone()]).await;

        assert!(matches!(
            outcome.reports[&file].error,
            Some(FileError::Timeout {
                limit_ms: 250,
                fallback: false
            })
        ));
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_run_level_preload_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "t.rhai", r#"it("a", || 1); run()"#);

        let mut config = Config::default();
        config.run.require = vec!["prelude/not_there".into()];
        let outcome = pool(&config).run(&[file.clone()]).await;

        assert!(matches!(
            outcome.reports[&file].error,
            Some(FileError::Load { .. })
        ));
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn collect_only_never_executes_bodies() {
        let dir = TempDir::new().unwrap();
        let file = write_file(
            &dir,
            "would_fail.rhai",
            r#"it("explodes when run", || { throw "boom"; }); run()"#,
        );

        let mut config = Config::default();
        config.run.collect_only = true;
        let outcome = pool(&config).run(&[file.clone()]).await;

        assert_eq!(outcome.exit_code, 0);
        let report = outcome.reports[&file].report.as_ref().unwrap();
        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.tests[0].description, "explodes when run");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn require_loads_sibling_modules() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "answer.rhai", "42");
        let file = write_file(
            &dir,
            "uses_require.rhai",
            r#"
            let answer = require("answer");
            it("requires", || { if answer != 42 { throw "bad module"; } });
            run()
            "#,
        );

        let config = Config::default();
        let outcome = pool(&config).run(&[file.clone()]).await;
        assert_eq!(outcome.exit_code, 0, "{:?}", outcome.reports[&file].error);
    }
}
