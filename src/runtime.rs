//! Test case execution.
//!
//! The runtime turns a consumed [`TestCase`] into a [`TestReport`]. It owns
//! the hard scheduling rules:
//!
//! 1. `beforeAll` completes before any test starts. If it fails, every
//!    remaining test is recorded as skipped, `afterAll` still runs, and
//!    the report fails.
//! 2. Parallel tests run in ordered batches of the pool width; inside a
//!    batch nothing is ordered, but each test is bracketed by its own
//!    `beforeEach`/`afterEach`.
//! 3. Sequential tests run one at a time in registration order, after all
//!    parallel batches.
//! 4. `afterAll` runs last.
//!
//! When any test is focused (`only`), exactly the focused set executes;
//! everything else is appended to the report as skipped while the hooks
//! still run around the focused subset.
//!
//! Bodies are script function pointers. Each attempt runs on a blocking
//! thread with its own deadline, raced against a timer; cancellation is
//! cooperative through the engine's progress hook (see
//! [`isolate`](crate::isolate)). The runtime never kills a thread: a
//! non-cooperating body merely loses the race and is abandoned.

pub mod bench;

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, FnPtr};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::case::{truthy, Condition, HookEntry, TestCase, TestEntry, TestOptions};
use crate::isolate::{effective_timeout, Interrupt};
use crate::report::{ExecError, Stats, TestReport, TestResult, TestStatus};

/// Task-pool width: the host parallelism hint, but never below 4.
pub fn width_hint() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(4)
}

/// Builds the report for a collect-only pass: every registered test is
/// listed (as skipped, with zero duration) and nothing executes, hooks
/// included.
pub fn collect(case: TestCase) -> TestReport {
    let total = case.total_registered();
    let mut report = TestReport::empty(case.description.clone());
    report.stats.total = total as u32;

    for entry in case
        .tests
        .iter()
        .chain(case.sequence_tests.iter())
        .chain(case.only_tests.iter())
        .chain(case.sequence_only_tests.iter())
    {
        report.stats.record(TestStatus::Skipped);
        report.tests.push(TestResult::skipped(&entry.description));
    }

    report.resolve_status();
    report
}

/// Why a body invocation did not produce a value.
#[derive(Debug)]
pub enum BodyError {
    /// The engine observed the interrupt (deadline or cancellation).
    Interrupted,
    /// The body threw.
    Error(ExecError),
}

/// Everything needed to invoke script function pointers: the shared body
/// engine and the AST their definitions live in.
#[derive(Clone)]
pub struct Harness {
    engine: Arc<Engine>,
    ast: Arc<rhai::AST>,
}

impl Harness {
    pub fn new(engine: Arc<Engine>, ast: Arc<rhai::AST>) -> Self {
        Self { engine, ast }
    }

    /// Invokes a body under the given interrupt, on the current thread.
    ///
    /// Installs the interrupt thread-locally so the engine's progress
    /// hook can observe it; callers run this on a blocking thread.
    pub fn call(
        &self,
        body: &FnPtr,
        arg: Option<&Dynamic>,
        interrupt: Interrupt,
    ) -> Result<Dynamic, BodyError> {
        let _guard = crate::isolate::InterruptGuard::install(interrupt);
        let result = match arg {
            Some(value) => body.call::<Dynamic>(&self.engine, &self.ast, (value.clone(),)),
            None => body.call::<Dynamic>(&self.engine, &self.ast, ()),
        };
        result.map_err(|e| {
            if matches!(*e, rhai::EvalAltResult::ErrorTerminated(..)) {
                BodyError::Interrupted
            } else {
                BodyError::Error(ExecError::from_eval(&e))
            }
        })
    }
}

fn timeout_error(limit_ms: u64, fallback: bool) -> ExecError {
    let advisory = if fallback {
        " (no timeout configured; runner default applied)"
    } else {
        ""
    };
    ExecError::new(format!("timed out after {limit_ms} ms{advisory}"))
}

/// Aggregates the per-test invocations of a `beforeEach`/`afterEach` hook
/// into one result, first error wins.
#[derive(Default)]
struct HookTally {
    ran: bool,
    retries: u32,
    duration: u64,
    failure: Option<(TestStatus, ExecError)>,
}

impl HookTally {
    fn absorb(&mut self, result: TestResult) {
        if matches!(result.status, TestStatus::Passed | TestStatus::Benched) {
            self.ran = true;
        }
        self.retries = self.retries.max(result.retries);
        self.duration += result.duration;
        if self.failure.is_none() {
            if let Some(error) = result.error {
                self.failure = Some((result.status, error));
            }
        }
    }

    fn into_result(self, label: &str) -> TestResult {
        let (status, error) = match self.failure {
            Some((status, error)) => (status, Some(error)),
            None if self.ran => (TestStatus::Passed, None),
            None => (TestStatus::Skipped, None),
        };
        TestResult {
            description: label.to_string(),
            status,
            retries: self.retries,
            duration: self.duration,
            error,
            bench: None,
        }
    }
}

/// Executes one test case under the concurrency and policy rules.
pub struct Runtime {
    width: usize,
    cancel: CancellationToken,
}

impl Runtime {
    /// Creates a runtime with the given batch width and file-level
    /// cancellation token.
    pub fn new(width: usize, cancel: CancellationToken) -> Self {
        Self {
            width: width.max(1),
            cancel,
        }
    }

    /// Runs the case to completion and aggregates the report.
    pub async fn run(&self, case: TestCase, harness: &Harness) -> TestReport {
        let focused = case.has_only();
        let TestCase {
            description,
            tests,
            sequence_tests,
            only_tests,
            sequence_only_tests,
            before_all,
            before_each,
            after_all,
            after_each,
        } = case;

        let total =
            tests.len() + sequence_tests.len() + only_tests.len() + sequence_only_tests.len();
        debug!(case = %description, total, focused, "running test case");

        let (parallel, sequential, deselected): (Vec<TestEntry>, Vec<TestEntry>, Vec<TestEntry>) =
            if focused {
                (
                    only_tests,
                    sequence_only_tests,
                    tests.into_iter().chain(sequence_tests).collect(),
                )
            } else {
                // Without focus the only-groups are empty by definition.
                (tests, sequence_tests, Vec::new())
            };

        let mut hook_results: Vec<TestResult> = Vec::new();
        let mut results: Vec<TestResult> = Vec::new();

        // beforeAll gates everything.
        let mut setup_failed = false;
        if let Some(hook) = &before_all {
            let result = self
                .execute(hook.kind.label(), Some(&hook.body), &hook.options, None, harness)
                .await;
            setup_failed = result.status.is_failure();
            hook_results.push(result);
        }

        if setup_failed {
            for entry in parallel.iter().chain(sequential.iter()).chain(deselected.iter()) {
                results.push(TestResult::skipped(&entry.description));
            }
        } else {
            let before = before_each.as_ref();
            let after = after_each.as_ref();
            let before_tally = Mutex::new(HookTally::default());
            let after_tally = Mutex::new(HookTally::default());

            // Ordered batches; unordered within a batch.
            for batch in parallel.chunks(self.width) {
                let futures: Vec<_> = batch
                    .iter()
                    .map(|entry| {
                        self.run_bracketed(entry, before, after, &before_tally, &after_tally, harness)
                    })
                    .collect();
                results.extend(futures::future::join_all(futures).await);
            }

            for entry in &sequential {
                results.push(
                    self.run_bracketed(entry, before, after, &before_tally, &after_tally, harness)
                        .await,
                );
            }

            for entry in &deselected {
                results.push(TestResult::skipped(&entry.description));
            }

            if let Some(hook) = before {
                if let Ok(tally) = before_tally.into_inner() {
                    hook_results.push(tally.into_result(hook.kind.label()));
                }
            }
            if let Some(hook) = after {
                if let Ok(tally) = after_tally.into_inner() {
                    hook_results.push(tally.into_result(hook.kind.label()));
                }
            }
        }

        // afterAll is attempted even after a failed setup.
        if let Some(hook) = &after_all {
            let result = self
                .execute(hook.kind.label(), Some(&hook.body), &hook.options, None, harness)
                .await;
            hook_results.push(result);
        }

        let mut stats = Stats {
            total: total as u32,
            ..Default::default()
        };
        for result in &results {
            stats.record(result.status);
        }

        let mut report = TestReport {
            description,
            status: crate::report::ReportStatus::Empty,
            stats,
            tests: results,
            hooks: hook_results,
        };
        report.resolve_status();
        report
    }

    async fn run_bracketed(
        &self,
        entry: &TestEntry,
        before: Option<&HookEntry>,
        after: Option<&HookEntry>,
        before_tally: &Mutex<HookTally>,
        after_tally: &Mutex<HookTally>,
        harness: &Harness,
    ) -> TestResult {
        if let Some(hook) = before {
            let result = self
                .execute(hook.kind.label(), Some(&hook.body), &hook.options, None, harness)
                .await;
            if let Ok(mut tally) = before_tally.lock() {
                tally.absorb(result);
            }
        }

        let result = self
            .execute(
                &entry.description,
                entry.body.as_ref(),
                &entry.options,
                entry.arg.as_ref(),
                harness,
            )
            .await;

        if let Some(hook) = after {
            let hook_result = self
                .execute(hook.kind.label(), Some(&hook.body), &hook.options, None, harness)
                .await;
            if let Ok(mut tally) = after_tally.lock() {
                tally.absorb(hook_result);
            }
        }

        result
    }

    /// The per-executable algorithm shared by tests and hooks.
    async fn execute(
        &self,
        description: &str,
        body: Option<&FnPtr>,
        options: &TestOptions,
        arg: Option<&Dynamic>,
        harness: &Harness,
    ) -> TestResult {
        // A todo entry has no body; an explicit todo option wins either way.
        let Some(body) = body else {
            return TestResult::todo(description);
        };
        if options.todo {
            return TestResult::todo(description);
        }
        if options.skip {
            return TestResult::skipped(description);
        }

        let (limit_ms, fallback) = effective_timeout(options.timeout_ms);

        match self.eligible(&options.condition, limit_ms, fallback, harness).await {
            Ok(true) => {}
            Ok(false) => return TestResult::skipped(description),
            Err(error) => {
                return TestResult {
                    description: description.to_string(),
                    status: if options.softfail {
                        TestStatus::Softfailed
                    } else {
                        TestStatus::Failed
                    },
                    retries: 0,
                    duration: 0,
                    error: Some(error),
                    bench: None,
                };
            }
        }

        let started = Instant::now();
        let mut failures = 0u32;
        let mut last_error: Option<ExecError> = None;

        loop {
            match self.attempt(body, arg, limit_ms, fallback, harness).await {
                Ok(_) => {
                    last_error = None;
                    break;
                }
                Err(error) => {
                    failures += 1;
                    last_error = Some(error);
                    if failures > options.retry {
                        break;
                    }
                }
            }
        }

        let mut result = TestResult {
            description: description.to_string(),
            status: TestStatus::Passed,
            retries: failures,
            duration: 0,
            error: None,
            bench: None,
        };

        match last_error {
            Some(error) => {
                result.status = if options.softfail {
                    TestStatus::Softfailed
                } else {
                    TestStatus::Failed
                };
                result.error = Some(error);
            }
            None if options.bench => {
                match self.bench(body, arg, options, limit_ms, harness).await {
                    Ok(metrics) => {
                        result.status = TestStatus::Benched;
                        result.bench = Some(metrics);
                    }
                    Err(error) => {
                        result.status = if options.softfail {
                            TestStatus::Softfailed
                        } else {
                            TestStatus::Failed
                        };
                        result.error = Some(error);
                    }
                }
            }
            None => {}
        }

        result.duration = started.elapsed().as_millis() as u64;
        result
    }

    /// One timed attempt: the body raced against its deadline.
    async fn attempt(
        &self,
        body: &FnPtr,
        arg: Option<&Dynamic>,
        limit_ms: u64,
        fallback: bool,
        harness: &Harness,
    ) -> Result<Dynamic, ExecError> {
        let token = self.cancel.child_token();
        let interrupt = Interrupt::new(token.clone(), Instant::now() + Duration::from_millis(limit_ms));

        let harness = harness.clone();
        let body = body.clone();
        let arg = arg.cloned();
        let join = tokio::task::spawn_blocking(move || harness.call(&body, arg.as_ref(), interrupt));

        tokio::select! {
            joined = join => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(BodyError::Interrupted)) => {
                    if self.cancel.is_cancelled() {
                        Err(ExecError::new("aborted before completion"))
                    } else {
                        Err(timeout_error(limit_ms, fallback))
                    }
                }
                Ok(Err(BodyError::Error(error))) => Err(error),
                Err(join_error) => Err(ExecError::new(format!("test task failed: {join_error}"))),
            },
            _ = tokio::time::sleep(Duration::from_millis(limit_ms)) => {
                // The timer wins; the abandoned body stops cooperatively.
                token.cancel();
                Err(timeout_error(limit_ms, fallback))
            }
        }
    }

    async fn eligible(
        &self,
        condition: &Condition,
        limit_ms: u64,
        fallback: bool,
        harness: &Harness,
    ) -> Result<bool, ExecError> {
        match condition {
            Condition::Value(value) => Ok(*value),
            Condition::Skip => Ok(false),
            Condition::Pred(pred) => {
                // A lazy predicate is awaited under the entry's own limit;
                // a unit result means skip.
                let value = self.attempt(pred, None, limit_ms, fallback, harness).await?;
                Ok(truthy(&value))
            }
        }
    }

    async fn bench(
        &self,
        body: &FnPtr,
        arg: Option<&Dynamic>,
        options: &TestOptions,
        limit_ms: u64,
        harness: &Harness,
    ) -> Result<crate::report::BenchMetrics, ExecError> {
        let deadline = Instant::now() + Duration::from_millis(limit_ms);
        let interrupt = Interrupt::new(self.cancel.child_token(), deadline);
        let params = bench::BenchParams {
            warmup: options.warmup,
            iterations: options.iterations,
            confidence: options.confidence,
        };

        let harness = harness.clone();
        let body = body.clone();
        let arg = arg.cloned();
        let join = tokio::task::spawn_blocking(move || {
            bench::sample(&harness, &body, arg.as_ref(), &params, deadline, interrupt)
        });

        join.await
            .map_err(|e| ExecError::new(format!("bench task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ConsoleHandle;
    use crate::case::{register_dsl, CaseHandle};
    use crate::report::ReportStatus;

    /// Evaluates a registration script and returns the consumed case plus
    /// the harness its bodies run on.
    fn case_from_script(code: &str) -> (TestCase, Harness, ConsoleHandle) {
        let console = ConsoleHandle::new();
        let handle = CaseHandle::new("fixture");
        let mut engine = crate::isolate::build_engine(std::path::Path::new("."), false);
        register_dsl(&mut engine, &handle);

        let ast = engine.compile(code).expect("fixture compiles");
        let mut scope = rhai::Scope::new();
        scope.push("console", console.clone());
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .expect("fixture registers");

        let case = handle.take().expect("case not consumed");
        let harness = Harness::new(Arc::new(engine), Arc::new(ast));
        (case, harness, console)
    }

    fn runtime() -> Runtime {
        Runtime::new(4, CancellationToken::new())
    }

    #[test]
    fn width_hint_is_at_least_four() {
        assert!(width_hint() >= 4);
    }

    #[test]
    fn fallback_timeout_resolution() {
        assert_eq!(effective_timeout(0), (300_000, true));
        assert_eq!(effective_timeout(250), (250, false));
        let error = timeout_error(300_000, true);
        assert!(error.message.contains("300000 ms"));
        assert!(error.message.contains("runner default"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn all_passing_tests() {
        let (case, harness, _console) = case_from_script(
            r#"
            it("a", || 1);
            it("b", || 2);
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.status, ReportStatus::Passed);
        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.passed, 2);
        assert_eq!(report.stats.failed, 0);
        assert!(report.validate().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn softfail_with_retries_counts_every_failure() {
        let (case, harness, _console) = case_from_script(
            r#"
            retry(2, "flaky", || { throw "always"; }, #{ softfail: true });
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.tests.len(), 1);
        assert_eq!(report.tests[0].status, TestStatus::Softfailed);
        assert_eq!(report.tests[0].retries, 3);
        assert!(report.tests[0].error.is_some());
        assert_eq!(report.stats.softfailed, 1);
        // A softfail alone does not fail the file.
        assert_eq!(report.status, ReportStatus::Passed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retry_eventually_passes() {
        let (case, harness, _console) = case_from_script(
            r#"
            let attempts = 0;
            retry(3, "settles", || {
                attempts += 1;
                if attempts < 3 { throw "not yet"; }
                attempts
            });
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.tests[0].status, TestStatus::Passed);
        assert_eq!(report.tests[0].retries, 2);
        assert!(report.tests[0].error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn only_selection_skips_the_rest() {
        let (case, harness, _console) = case_from_script(
            r#"
            it("x", || 1);
            only("y", || 2);
            it("z", || 3);
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.stats.total, 3);
        assert_eq!(report.stats.passed, 1);
        assert_eq!(report.stats.skipped, 2);

        let y = report.tests.iter().find(|t| t.description == "y").unwrap();
        assert_eq!(y.status, TestStatus::Passed);
        for name in ["x", "z"] {
            let t = report.tests.iter().find(|t| t.description == name).unwrap();
            assert_eq!(t.status, TestStatus::Skipped);
            assert_eq!(t.retries, 0);
            assert_eq!(t.duration, 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn explicit_timeout_fails_the_test() {
        let (case, harness, _console) = case_from_script(
            r#"
            it("spins", || { let x = 0; loop { x += 1; } }, #{ timeout: 200 });
            "#,
        );
        let started = Instant::now();
        let report = runtime().run(case, &harness).await;

        let result = &report.tests[0];
        assert_eq!(result.status, TestStatus::Failed);
        let error = result.error.as_ref().unwrap();
        assert!(error.message.contains("timed out after 200 ms"));
        assert!(result.duration >= 200);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.status, ReportStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sequential_tests_run_in_registration_order() {
        let (case, harness, console) = case_from_script(
            r#"
            it("parallel noise", || 0);
            sequence("s1", || console.log("s1"));
            sequence("s2", || console.log("s2"));
            sequence("s3", || console.log("s3"));
            "#,
        );
        let report = runtime().run(case, &harness).await;
        assert_eq!(report.stats.passed, 4);

        let logs: Vec<String> = console
            .drain()
            .into_iter()
            .map(|e| e.args.join(" "))
            .collect();
        let tail: Vec<&str> = logs.iter().map(String::as_str).rev().take(3).collect();
        assert_eq!(tail, vec!["s3", "s2", "s1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hooks_bracket_every_test() {
        let (case, harness, console) = case_from_script(
            r#"
            let setups = 0;
            let teardowns = 0;
            beforeEach(|| { setups += 1; });
            afterEach(|| { teardowns += 1; });
            afterAll(|| console.log(setups, teardowns));
            it("a", || 1);
            it("b", || 2);
            "#,
        );
        let report = runtime().run(case, &harness).await;
        assert_eq!(report.stats.passed, 2);

        let hook_names: Vec<&str> = report.hooks.iter().map(|h| h.description.as_str()).collect();
        assert_eq!(hook_names, vec!["beforeEach", "afterEach", "afterAll"]);
        assert!(report.hooks.iter().all(|h| h.status == TestStatus::Passed));

        let logs = console.drain();
        assert_eq!(logs.last().unwrap().args, vec!["2", "2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_before_all_skips_everything_and_fails_the_report() {
        let (case, harness, console) = case_from_script(
            r#"
            beforeAll(|| { throw "setup exploded"; });
            afterAll(|| console.log("cleanup ran"));
            it("a", || 1);
            sequence("b", || 2);
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.skipped, 2);
        assert!(report.tests.iter().all(|t| t.status == TestStatus::Skipped));

        let before_all = &report.hooks[0];
        assert_eq!(before_all.description, "beforeAll");
        assert_eq!(before_all.status, TestStatus::Failed);

        // afterAll still ran.
        assert_eq!(console.drain().last().unwrap().args, vec!["cleanup ran"]);
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.validate().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn skip_todo_and_conditions() {
        let (case, harness, _console) = case_from_script(
            r#"
            skip("later", || 1);
            todo("someday");
            itIf(false, "off", || 1);
            itIf(|| (), "lazy unit means skip", || 1);
            itIf(|| true, "lazy on", || 1);
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.stats.total, 5);
        assert_eq!(report.stats.skipped, 3);
        assert_eq!(report.stats.todo, 1);
        assert_eq!(report.stats.passed, 1);
        assert_eq!(report.status, ReportStatus::Passed);
        assert!(report.validate().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn each_rows_reach_the_body() {
        let (case, harness, _console) = case_from_script(
            r#"
            each([1, 2, 3], "rejects zero {}", |x| {
                if x == 0 { throw "zero"; }
                x
            });
            "#,
        );
        let report = runtime().run(case, &harness).await;
        assert_eq!(report.stats.total, 3);
        assert_eq!(report.stats.passed, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn benched_test_counts_as_passed() {
        let (case, harness, _console) = case_from_script(
            r#"
            it("fast", || 21 * 2, #{ bench: true, warmup: 2, iterations: 8 });
            "#,
        );
        let report = runtime().run(case, &harness).await;

        let result = &report.tests[0];
        assert_eq!(result.status, TestStatus::Benched);
        let metrics = result.bench.as_ref().unwrap();
        assert_eq!(metrics.iterations, 8);
        assert!(!metrics.timed_out);
        assert!(metrics.ops_per_sec > 0.0);
        assert_eq!(report.stats.passed, 1);
        assert!(report.validate().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hook_timeout_is_reported_against_the_hook() {
        let (case, harness, _console) = case_from_script(
            r#"
            beforeEach(|| { let x = 0; loop { x += 1; } }, #{ timeout: 150 });
            it("still runs", || 1);
            "#,
        );
        let report = runtime().run(case, &harness).await;

        // The hook error does not abort the bracketed test.
        assert_eq!(report.tests[0].status, TestStatus::Passed);
        let hook = report
            .hooks
            .iter()
            .find(|h| h.description == "beforeEach")
            .unwrap();
        assert_eq!(hook.status, TestStatus::Failed);
        assert!(hook
            .error
            .as_ref()
            .unwrap()
            .message
            .contains("timed out after 150 ms"));
        // A failed hook fails the file even with all tests green.
        assert_eq!(report.status, ReportStatus::Failed);
        assert!(report.validate().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bench_sampling_respects_the_deadline() {
        let (case, harness, _console) = case_from_script(
            r#"
            it("busy", || {
                let x = 0;
                while x < 200000 { x += 1; }
            }, #{ bench: true, warmup: 0, iterations: 100000, timeout: 250 });
            "#,
        );
        let report = runtime().run(case, &harness).await;

        let result = &report.tests[0];
        assert_eq!(result.status, TestStatus::Benched);
        let metrics = result.bench.as_ref().unwrap();
        assert!(metrics.timed_out);
        assert!(metrics.iterations < 100_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn each_rows_fail_independently() {
        let (case, harness, _console) = case_from_script(
            r#"
            each([1, 0, 2], "nonzero {}", |x| {
                if x == 0 { throw "zero"; }
            });
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.stats.passed, 2);
        assert_eq!(report.stats.failed, 1);
        let zero = report
            .tests
            .iter()
            .find(|t| t.description == "nonzero 0")
            .unwrap();
        assert_eq!(zero.status, TestStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_test_fails_the_report() {
        let (case, harness, _console) = case_from_script(
            r#"
            it("good", || 1);
            it("bad", || { throw "broken"; });
            "#,
        );
        let report = runtime().run(case, &harness).await;

        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.status, ReportStatus::Failed);
        let bad = report.tests.iter().find(|t| t.description == "bad").unwrap();
        assert!(bad.error.as_ref().unwrap().message.contains("broken"));
    }
}
