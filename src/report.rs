//! Test report data model.
//!
//! These are the types a file's `run()` call evaluates to: per-test and
//! per-hook results, aggregate statistics, and the report itself. The
//! isolator validates the evaluation value of every script against this
//! shape, so the whole model round-trips through the engine's serde
//! bridge.
//!
//! # Status model
//!
//! | Status | Meaning | Counts as |
//! |--------|---------|-----------|
//! | `passed` | body succeeded | passed |
//! | `failed` | retries exhausted | failed |
//! | `softfailed` | retries exhausted, `softfail` set | softfailed |
//! | `skipped` | skip flag, false condition, or deselected | skipped |
//! | `todo` | registered without a body | todo |
//! | `benched` | passed and benchmarked | passed |

use serde::{Deserialize, Serialize};

/// Terminal state of a single test or hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Softfailed,
    Skipped,
    Todo,
    Benched,
}

impl TestStatus {
    /// Returns `true` for the one status that fails a file.
    ///
    /// `softfailed` is terminal but deliberately non-fatal.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed)
    }

    /// Returns `true` when a result with this status must carry an error.
    pub fn carries_error(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Softfailed)
    }
}

/// Overall outcome of a file's test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Passed,
    Failed,
    Empty,
}

/// A position in the generated script, kept structured so reporters can
/// resolve it through the file's source map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub line: u32,
    pub column: u32,
}

/// An error captured from script execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecError {
    /// Human-readable message, as produced by the engine.
    pub message: String,

    /// Positions from the engine's call chain, outermost first.
    /// Positions refer to generated code; map them before display.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// Extracts message and position chain from an engine error.
    pub fn from_eval(err: &rhai::EvalAltResult) -> Self {
        let mut stack = Vec::new();
        collect_frames(err, &mut stack);
        Self {
            message: err.to_string(),
            stack,
        }
    }
}

fn collect_frames(err: &rhai::EvalAltResult, out: &mut Vec<StackFrame>) {
    let pos = err.position();
    if let (Some(line), Some(column)) = (pos.line(), pos.position()) {
        out.push(StackFrame {
            line: line as u32,
            column: column as u32,
        });
    }
    if let rhai::EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = err {
        collect_frames(inner, out);
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Measurements from a benchmarked test body.
///
/// Produced by the bench sampler; deterministic for equal inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchMetrics {
    /// Completed body invocations per second, derived from the mean.
    pub ops_per_sec: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub std_dev_ms: f64,
    /// Confidence interval around the mean at `confidence`.
    pub ci_low_ms: f64,
    pub ci_high_ms: f64,
    pub confidence: f64,
    /// Samples actually collected (may be short when `timed_out`).
    pub iterations: u32,
    /// True when the sampler hit the test's deadline before finishing.
    pub timed_out: bool,
}

/// Result of one test or hook.
///
/// Hooks reuse this shape with their kind (`beforeAll`, `beforeEach`,
/// `afterAll`, `afterEach`) as the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub description: String,
    pub status: TestStatus,

    /// Number of failed attempts. A test that eventually passed keeps the
    /// count of failures that preceded the success.
    pub retries: u32,

    /// Wall-clock duration in integer milliseconds.
    pub duration: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bench: Option<BenchMetrics>,
}

impl TestResult {
    /// A result for a test that never ran (deselected or pre-skipped).
    pub fn skipped(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: TestStatus::Skipped,
            retries: 0,
            duration: 0,
            error: None,
            bench: None,
        }
    }

    /// A result for a registered-but-unimplemented test.
    pub fn todo(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: TestStatus::Todo,
            retries: 0,
            duration: 0,
            error: None,
            bench: None,
        }
    }
}

/// Aggregate counters over every registered test of a case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub softfailed: u32,
    pub skipped: u32,
    pub todo: u32,
}

impl Stats {
    /// Tallies one test result. `benched` counts as `passed`.
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed | TestStatus::Benched => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Softfailed => self.softfailed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Todo => self.todo += 1,
        }
    }

    /// Sum of all outcome counters; equals `total` on a well-formed report.
    pub fn accounted(&self) -> u32 {
        self.passed + self.failed + self.softfailed + self.skipped + self.todo
    }
}

/// The structured outcome of running one file's test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub description: String,
    pub status: ReportStatus,
    pub stats: Stats,
    pub tests: Vec<TestResult>,
    #[serde(default)]
    pub hooks: Vec<TestResult>,
}

impl TestReport {
    /// An empty report for a case that registered nothing.
    pub fn empty(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: ReportStatus::Empty,
            stats: Stats::default(),
            tests: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Computes the report status from its counters and hook results.
    ///
    /// `failed` iff any test failed or any hook failed; `empty` iff no
    /// tests were registered; `passed` otherwise. Softfails never fail a
    /// file on their own.
    pub fn resolve_status(&mut self) {
        let hook_failed = self.hooks.iter().any(|h| h.status.is_failure());
        self.status = if self.stats.failed > 0 || hook_failed {
            ReportStatus::Failed
        } else if self.stats.total == 0 {
            ReportStatus::Empty
        } else {
            ReportStatus::Passed
        };
    }

    /// Checks the structural invariants a report must satisfy.
    ///
    /// Used by the isolator to reject foreign values that merely
    /// deserialize: counters must close over the outcomes, failures must
    /// carry errors, and the status must agree with the counters.
    pub fn validate(&self) -> Result<(), String> {
        if self.stats.accounted() != self.stats.total {
            return Err(format!(
                "stats do not close: {} accounted vs {} total",
                self.stats.accounted(),
                self.stats.total
            ));
        }
        if self.tests.len() != self.stats.total as usize {
            return Err(format!(
                "{} test results for {} registered tests",
                self.tests.len(),
                self.stats.total
            ));
        }
        for result in self.tests.iter().chain(self.hooks.iter()) {
            if result.status.carries_error() && result.error.is_none() {
                return Err(format!(
                    "'{}' {:?} without an error",
                    result.description, result.status
                ));
            }
            if !result.status.carries_error() && result.error.is_some() {
                return Err(format!(
                    "'{}' {:?} with an error",
                    result.description, result.status
                ));
            }
        }
        let hook_failed = self.hooks.iter().any(|h| h.status.is_failure());
        let expected = if self.stats.failed > 0 || hook_failed {
            ReportStatus::Failed
        } else if self.stats.total == 0 {
            ReportStatus::Empty
        } else {
            ReportStatus::Passed
        };
        if self.status != expected {
            return Err(format!(
                "status {:?} does not match counters (expected {:?})",
                self.status, expected
            ));
        }
        Ok(())
    }
}
