//! # scriptest
//!
//! A programmable parallel test runner for Rhai test scripts. Test files
//! register tests and hooks against an injected DSL, and scriptest
//! executes every file in its own isolated engine with bounded
//! concurrency, retry/timeout policy, and pluggable reporting.
//!
//! ## Overview
//!
//! A test file is an ordinary `.rhai` script:
//!
//! ```text
//! should("math suite");
//!
//! beforeAll(|| console.log("setting up"));
//!
//! it("adds", || {
//!     if 1 + 1 != 2 { throw "arithmetic is broken"; }
//! });
//! retry(2, "flaky service", || ping(), #{ softfail: true });
//! sequence("first", || state.push(1));
//! sequence("second", || state.push(2));
//!
//! run()
//! ```
//!
//! The file's evaluation value (the result of `run()`) is its test
//! report; anything else is rejected as invalid.
//!
//! ## Architecture
//!
//! The crate is organized around five subsystems:
//!
//! ### Transformer ([`transform`])
//!
//! Turns a file path into a compiled [`Script`](transform::Script) plus a
//! [`SourceMap`](sourcemap::SourceMap), through an ordered list of
//! transform plugins. Artifacts are cached so each file builds at most
//! once per run.
//!
//! ### Isolator ([`isolate`])
//!
//! Executes one script in a fresh engine with a per-file
//! [`Context`](isolate::Context) (host bindings, the test DSL, a private
//! `console`, `require()`), under a wall-clock timeout with cooperative
//! cancellation, and shape-validates the evaluation value.
//!
//! ### TestCase registry ([`case`])
//!
//! The data model user scripts mutate: tests, sequence tests, focused
//! tests, and up to four hooks, with a concrete options struct.
//!
//! ### Runtime ([`runtime`])
//!
//! Executes a registered case: `beforeAll`, parallel batches, sequential
//! tests in registration order, `afterAll`; per-test retry, timeout,
//! skip, condition, softfail, todo, and bench semantics.
//!
//! ### Pool ([`pool`])
//!
//! Drives the per-file protocol over the discovered file list with
//! bounded concurrency and collates a [`PoolResult`](pool::PoolResult)
//! per file for the reporters ([`reporter`]).
//!
//! ## Quick Start
//!
//! ```no_run
//! use scriptest::config::Config;
//! use scriptest::discover::discover;
//! use scriptest::pool::Pool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let files = discover(&config.run.pattern, &config.run.exclude, &config.run.files)?;
//!
//!     let pool = Pool::new(&config);
//!     let outcome = pool.run(&files).await;
//!
//!     std::process::exit(outcome.exit_code);
//! }
//! ```

pub mod capture;
pub mod case;
pub mod config;
pub mod discover;
pub mod isolate;
pub mod pool;
pub mod report;
pub mod reporter;
pub mod runtime;
pub mod sourcemap;
pub mod status;
pub mod transform;

// Re-export commonly used types for convenience.

pub use config::{load_config, Config};
pub use isolate::{Context, Isolator};
pub use pool::{Pool, PoolResult, RunOutcome, RunReports};
pub use report::{ReportStatus, Stats, TestReport, TestResult, TestStatus};
pub use reporter::Reporter;
pub use runtime::Runtime;
pub use transform::Transformer;
