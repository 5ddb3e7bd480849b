//! Isolated execution of compiled test scripts.
//!
//! The isolator runs one [`Script`](crate::transform::Script) to completion
//! inside a fresh engine, under a wall-clock timeout, and treats the
//! script's evaluation value as the candidate test report. Each execution
//! gets its own [`Context`]: host bindings, the test DSL, a private
//! `console`, and a `require()` facility rooted at the file's directory.
//! Nothing escapes one execution into another.
//!
//! # Timeouts and cancellation
//!
//! Evaluation happens on a blocking thread, raced against a timer. The
//! timer winning settles the outcome immediately; the engine itself is
//! stopped cooperatively through a progress hook that observes a
//! thread-local [`Interrupt`] (a cancellation token plus a deadline). The
//! same mechanism serves per-test deadlines in the runtime: whatever
//! thread currently evaluates script code installs its own interrupt. The
//! host thread is never killed.
//!
//! A `timeout_ms` of 0 selects the runner fallback of
//! [`MAX_TIMEOUT_MS`] (300 s).

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::capture::{register_console, ConsoleHandle};
use crate::case::{register_dsl, CaseHandle};
use crate::report::{ExecError, TestReport};
use crate::runtime::{width_hint, Harness, Runtime};
use crate::transform::Script;

/// Fallback execution limit when no timeout is configured.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Resolves a configured timeout to the effective one.
///
/// Returns the limit in milliseconds and whether the fallback was used.
pub fn effective_timeout(timeout_ms: u64) -> (u64, bool) {
    if timeout_ms == 0 {
        (MAX_TIMEOUT_MS, true)
    } else {
        (timeout_ms, false)
    }
}

/// Cooperative abort signal for one evaluation: cancelled token or passed
/// deadline, whichever comes first.
#[derive(Debug, Clone)]
pub struct Interrupt {
    token: CancellationToken,
    deadline: Instant,
}

impl Interrupt {
    pub fn new(token: CancellationToken, deadline: Instant) -> Self {
        Self { token, deadline }
    }

    pub fn triggered(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }
}

thread_local! {
    static ACTIVE_INTERRUPT: RefCell<Option<Interrupt>> = const { RefCell::new(None) };
}

/// Installs an interrupt for the current thread until dropped.
///
/// The engine's progress hook reads the active interrupt of the thread it
/// happens to run on, so every blocking evaluation installs its own guard
/// before touching the engine.
pub struct InterruptGuard {
    _private: (),
}

impl InterruptGuard {
    pub fn install(interrupt: Interrupt) -> Self {
        ACTIVE_INTERRUPT.with(|slot| *slot.borrow_mut() = Some(interrupt));
        Self { _private: () }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        ACTIVE_INTERRUPT.with(|slot| slot.borrow_mut().take());
    }
}

fn interrupt_triggered() -> bool {
    ACTIVE_INTERRUPT.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|interrupt| interrupt.triggered())
            .unwrap_or(false)
    })
}

/// The named-binding environment handed to one file's execution.
///
/// Constructed by the pool, consumed by the isolator. Always fresh per
/// file.
#[derive(Debug, Clone)]
pub struct Context {
    /// Unique id for this execution, used in logs.
    pub exec_id: String,

    /// The test file being executed.
    pub file: PathBuf,

    /// The file's directory; `require()` resolves relative to it.
    pub dir: PathBuf,

    /// Host-provided globals from configuration.
    pub bindings: Vec<(String, Dynamic)>,

    /// The file's private console buffer.
    pub console: ConsoleHandle,

    /// Modules to evaluate before the script (run-level plus directives).
    pub preloads: Vec<String>,
}

impl Context {
    pub fn new(file: impl Into<PathBuf>, console: ConsoleHandle) -> Self {
        let file = file.into();
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            exec_id: uuid::Uuid::new_v4().to_string(),
            file,
            dir,
            bindings: Vec::new(),
            console,
            preloads: Vec::new(),
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: Dynamic) -> Self {
        self.bindings.push((name.into(), value));
        self
    }

    pub fn with_preloads(mut self, preloads: Vec<String>) -> Self {
        self.preloads = preloads;
        self
    }
}

pub(crate) fn advisory(fallback: &bool) -> &'static str {
    if *fallback {
        " (no timeout configured; runner default applied)"
    } else {
        ""
    }
}

/// Errors one file execution can settle with.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IsolateError {
    /// Wall clock exceeded the effective limit.
    #[error("timed out after {limit_ms} ms{}", advisory(.fallback))]
    Timeout { limit_ms: u64, fallback: bool },

    /// The script itself threw.
    #[error("{0}")]
    Exec(ExecError),

    /// The evaluation value does not match the report shape.
    #[error("script did not evaluate to a test report: {message}")]
    InvalidReport { message: String },

    /// A preload or `require()` target could not be loaded.
    #[error("cannot load module '{module}': {message}")]
    Load { module: String, message: String },

    /// A defect in the runner itself, logged verbatim.
    #[error("internal runner error: {message}")]
    Internal { message: String },
}

/// Result of one guarded execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub report: Option<TestReport>,
    pub error: Option<IsolateError>,
}

impl ExecOutcome {
    fn success(report: TestReport) -> Self {
        Self {
            report: Some(report),
            error: None,
        }
    }

    fn failure(error: IsolateError) -> Self {
        Self {
            report: None,
            error: Some(error),
        }
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Executes compiled scripts in guarded, single-use environments.
pub struct Isolator {
    /// Run-level preload modules, evaluated before every file.
    preloads: Vec<String>,
    /// Reject scripts that touch undeclared variables.
    strict: bool,
    /// List registered tests without executing them.
    collect_only: bool,
    /// Task-pool width handed to the runtime.
    width: usize,
}

impl Isolator {
    pub fn new() -> Self {
        Self {
            preloads: Vec::new(),
            strict: false,
            collect_only: false,
            width: width_hint(),
        }
    }

    pub fn with_preloads(mut self, preloads: Vec<String>) -> Self {
        self.preloads = preloads;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_collect_only(mut self, collect_only: bool) -> Self {
        self.collect_only = collect_only;
        self
    }

    /// Executes a script to completion and validates its evaluation value.
    ///
    /// All failure modes are folded into the returned outcome; this never
    /// panics on user input and never returns early while user code still
    /// determines the result.
    pub async fn execute(&self, script: &Script, context: Context, timeout_ms: u64) -> ExecOutcome {
        let (limit_ms, fallback) = effective_timeout(timeout_ms);
        let deadline = Instant::now() + Duration::from_millis(limit_ms);
        let token = CancellationToken::new();

        debug!(
            exec_id = %context.exec_id,
            file = %context.file.display(),
            limit_ms,
            "executing script"
        );

        let case = CaseHandle::new(default_description(&context.file));
        let mut engine = build_engine(&context.dir, self.strict);
        register_dsl(&mut engine, &case);
        register_run(
            &mut engine,
            RunEnv {
                case: case.clone(),
                ast: script.ast.clone(),
                base_dir: context.dir.clone(),
                token: token.clone(),
                handle: tokio::runtime::Handle::current(),
                width: self.width,
                strict: self.strict,
                collect_only: self.collect_only,
            },
        );

        let mut scope: Scope = Scope::new();
        // A plain variable, not a constant: console methods take &mut self
        // and the engine rejects non-pure method calls on constants.
        scope.push("console", context.console.clone());
        scope.push_constant("__filename", context.file.display().to_string());
        scope.push_constant("__dirname", context.dir.display().to_string());
        for (name, value) in &context.bindings {
            scope.push_constant_dynamic(name.clone(), value.clone());
        }

        let preloads: Vec<String> = self
            .preloads
            .iter()
            .chain(context.preloads.iter())
            .cloned()
            .collect();

        let eval_engine = Arc::new(engine);
        let ast = script.ast.clone();
        let interrupt = Interrupt::new(token.clone(), deadline);
        let base_dir = context.dir.clone();

        let eval = tokio::task::spawn_blocking(move || -> Result<Dynamic, IsolateError> {
            let _guard = InterruptGuard::install(interrupt);

            for module in &preloads {
                let path = resolve_module(&base_dir, module);
                eval_engine
                    .eval_file::<Dynamic>(path)
                    .map_err(|e| IsolateError::Load {
                        module: module.clone(),
                        message: e.to_string(),
                    })?;
            }

            let mut scope = scope;
            eval_engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                .map_err(|e| classify_eval_error(&e, limit_ms, fallback))
        });

        let value = tokio::select! {
            joined = eval => match joined {
                Ok(Ok(value)) => value,
                Ok(Err(error)) => return ExecOutcome::failure(error),
                Err(join_error) => {
                    error!("execution task failed: {join_error}");
                    return ExecOutcome::failure(IsolateError::Internal {
                        message: format!("execution task failed: {join_error}"),
                    });
                }
            },
            _ = tokio::time::sleep(Duration::from_millis(limit_ms)) => {
                // Timer wins; the engine stops cooperatively via the
                // progress hook once it observes the cancelled token.
                token.cancel();
                return ExecOutcome::failure(IsolateError::Timeout { limit_ms, fallback });
            }
        };

        match rhai::serde::from_dynamic::<TestReport>(&value) {
            Ok(report) => match report.validate() {
                Ok(()) => ExecOutcome::success(report),
                Err(message) => ExecOutcome::failure(IsolateError::InvalidReport { message }),
            },
            Err(_) => ExecOutcome::failure(IsolateError::InvalidReport {
                message: format!("evaluated to {}", value.type_name()),
            }),
        }
    }
}

impl Default for Isolator {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_eval_error(err: &EvalAltResult, limit_ms: u64, fallback: bool) -> IsolateError {
    if matches!(err, EvalAltResult::ErrorTerminated(..)) {
        IsolateError::Timeout { limit_ms, fallback }
    } else {
        IsolateError::Exec(ExecError::from_eval(err))
    }
}

fn default_description(file: &Path) -> String {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}

/// Builds an engine with the shared facilities every evaluation needs:
/// the progress-hook interrupt, console methods, and `require()`.
pub(crate) fn build_engine(base_dir: &Path, strict: bool) -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(strict);
    engine.on_progress(|ops| {
        // Amortize the clock read; the hook fires on every operation.
        if ops % 512 == 0 && interrupt_triggered() {
            Some(Dynamic::from("interrupted"))
        } else {
            None
        }
    });
    register_console(&mut engine);
    register_require(&mut engine, base_dir);
    // env("NAME") reads a process environment variable; unit when unset.
    engine.register_fn("env", |name: &str| -> Dynamic {
        match std::env::var(name) {
            Ok(value) => Dynamic::from(value),
            Err(_) => Dynamic::UNIT,
        }
    });
    engine
}

fn register_require(engine: &mut Engine, base_dir: &Path) {
    let base = base_dir.to_path_buf();
    engine.register_fn(
        "require",
        move |ctx: rhai::NativeCallContext, module: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let path = resolve_module(&base, module);
            ctx.engine()
                .eval_file::<Dynamic>(path)
                .map_err(|e| format!("cannot load module '{module}': {e}").into())
        },
    );
}

fn resolve_module(base: &Path, module: &str) -> PathBuf {
    let mut path = if Path::new(module).is_absolute() {
        PathBuf::from(module)
    } else {
        base.join(module)
    };
    if path.extension().is_none() {
        path.set_extension("rhai");
    }
    path
}

struct RunEnv {
    case: CaseHandle,
    ast: Arc<rhai::AST>,
    base_dir: PathBuf,
    token: CancellationToken,
    handle: tokio::runtime::Handle,
    width: usize,
    strict: bool,
    collect_only: bool,
}

/// Registers `run()`: consumes the case, drives the runtime, and returns
/// the report as the script value. In collect-only mode the case is
/// listed instead of executed.
fn register_run(engine: &mut Engine, env: RunEnv) {
    engine.register_fn("run", move || -> Result<Dynamic, Box<EvalAltResult>> {
        let Some(case) = env.case.take() else {
            return Err("run() may only be called once per file".into());
        };

        if env.collect_only {
            return rhai::serde::to_dynamic(&crate::runtime::collect(case));
        }

        // Bodies execute against their own engine so late registrations
        // cannot interfere with the consumed case.
        let mut body_engine = build_engine(&env.base_dir, env.strict);
        register_dsl(&mut body_engine, &env.case);

        let harness = Harness::new(Arc::new(body_engine), env.ast.clone());
        let runtime = Runtime::new(env.width, env.token.child_token());
        let report = env.handle.block_on(runtime.run(case, &harness));

        rhai::serde::to_dynamic(&report)
    });
}
