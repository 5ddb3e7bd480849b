//! The test case registry and its script-facing DSL.
//!
//! A test file mutates exactly one [`TestCase`] through the functions this
//! module registers on the engine (`it`, `sequence`, `only`, `skip`,
//! `todo`, `retry`, `timeout`, `fail`, `itIf`, `each`, the four hooks, and
//! `should`). Registration only accumulates entries; nothing executes
//! until the file calls `run()`, which consumes the case and hands it to
//! the runtime.
//!
//! # Registration routing
//!
//! | Call | Destination |
//! |------|-------------|
//! | `it(..)` | `tests`, or `sequence_tests` with `sequential: true` |
//! | `sequence(..)` | `sequence_tests` |
//! | `only(..)` | `only_tests`, or `sequence_only_tests` with `sequential: true` |
//! | `skip(..)` / `todo(..)` / `retry(..)` / `timeout(..)` / `fail(..)` / `itIf(..)` | like `it`, with the option folded in |
//! | `each(..)` | one entry per table row, like `it` |
//! | `beforeAll` / `beforeEach` / `afterAll` / `afterEach` | the single hook of that kind (overwrite) |

use std::sync::{Arc, Mutex};

use rhai::{Array, Dynamic, Engine, FnPtr, ImmutableString, Map};
use serde::{Deserialize, Serialize};

/// The four hook slots of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    BeforeAll,
    BeforeEach,
    AfterAll,
    AfterEach,
}

impl HookKind {
    /// The hook's name as scripts and reports spell it.
    pub fn label(&self) -> &'static str {
        match self {
            HookKind::BeforeAll => "beforeAll",
            HookKind::BeforeEach => "beforeEach",
            HookKind::AfterAll => "afterAll",
            HookKind::AfterEach => "afterEach",
        }
    }
}

/// An eligibility condition, from the `if` option.
///
/// Conditions may be a plain value or a lazy predicate evaluated right
/// before the test runs. A unit value means skip.
#[derive(Debug, Clone)]
pub enum Condition {
    Value(bool),
    Pred(FnPtr),
    Skip,
}

impl Condition {
    /// Folds a script value into a condition.
    pub fn from_dynamic(value: &Dynamic) -> Self {
        if value.is_unit() {
            Condition::Skip
        } else if let Some(pred) = value.clone().try_cast::<FnPtr>() {
            Condition::Pred(pred)
        } else {
            Condition::Value(truthy(value))
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Value(true)
    }
}

/// Script-style truthiness: unit and empty/zero scalars are false,
/// everything else is true.
pub(crate) fn truthy(value: &Dynamic) -> bool {
    if value.is_unit() {
        false
    } else if let Ok(b) = value.as_bool() {
        b
    } else if let Ok(i) = value.as_int() {
        i != 0
    } else if let Ok(f) = value.as_float() {
        f != 0.0
    } else if value.is_string() {
        !value.clone().into_string().unwrap_or_default().is_empty()
    } else {
        true
    }
}

/// Execution options attached to every test and hook entry.
#[derive(Debug, Clone)]
pub struct TestOptions {
    /// Per-attempt timeout in milliseconds; 0 means the runner fallback.
    pub timeout_ms: u64,
    pub skip: bool,
    pub softfail: bool,
    /// The `if` option. Defaults to eligible.
    pub condition: Condition,
    /// Additional attempts after the first failure.
    pub retry: u32,
    pub sequential: bool,
    pub todo: bool,
    pub bench: bool,
    /// Bench-only: discarded warm-up invocations.
    pub warmup: u32,
    /// Bench-only: timed samples to collect.
    pub iterations: u32,
    /// Bench-only: confidence level for the interval around the mean.
    pub confidence: f64,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            skip: false,
            softfail: false,
            condition: Condition::default(),
            retry: 0,
            sequential: false,
            todo: false,
            bench: false,
            warmup: 10,
            iterations: 100,
            confidence: 0.95,
        }
    }
}

impl TestOptions {
    /// Folds a script options map over the defaults.
    ///
    /// Unknown keys are ignored; ill-typed values fall back to the
    /// default for that key.
    pub fn from_map(map: &Map) -> Self {
        let mut opts = Self::default();
        if let Some(v) = map.get("timeout").and_then(|v| v.as_int().ok()) {
            opts.timeout_ms = v.max(0) as u64;
        }
        if let Some(v) = map.get("skip").and_then(|v| v.as_bool().ok()) {
            opts.skip = v;
        }
        if let Some(v) = map.get("softfail").and_then(|v| v.as_bool().ok()) {
            opts.softfail = v;
        }
        if let Some(v) = map.get("if") {
            opts.condition = Condition::from_dynamic(v);
        }
        if let Some(v) = map.get("retry").and_then(|v| v.as_int().ok()) {
            opts.retry = v.max(0) as u32;
        }
        if let Some(v) = map.get("sequential").and_then(|v| v.as_bool().ok()) {
            opts.sequential = v;
        }
        if let Some(v) = map.get("todo").and_then(|v| v.as_bool().ok()) {
            opts.todo = v;
        }
        if let Some(v) = map.get("bench").and_then(|v| v.as_bool().ok()) {
            opts.bench = v;
        }
        if let Some(v) = map.get("warmup").and_then(|v| v.as_int().ok()) {
            opts.warmup = v.max(0) as u32;
        }
        if let Some(v) = map.get("iterations").and_then(|v| v.as_int().ok()) {
            opts.iterations = (v.max(1)) as u32;
        }
        if let Some(v) = map.get("confidence") {
            if let Ok(f) = v.as_float() {
                opts.confidence = f;
            } else if let Ok(i) = v.as_int() {
                opts.confidence = i as f64;
            }
        }
        opts
    }
}

/// A registered test. Immutable once registered.
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub description: String,
    /// `None` for `todo` entries.
    pub body: Option<FnPtr>,
    /// Table row for `each`-generated entries, passed to the body.
    pub arg: Option<Dynamic>,
    pub options: TestOptions,
}

/// A registered hook. Immutable once registered.
#[derive(Debug, Clone)]
pub struct HookEntry {
    pub kind: HookKind,
    pub body: FnPtr,
    pub options: TestOptions,
}

/// Everything a test file registered, before execution.
#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub description: String,
    pub tests: Vec<TestEntry>,
    pub sequence_tests: Vec<TestEntry>,
    pub only_tests: Vec<TestEntry>,
    pub sequence_only_tests: Vec<TestEntry>,
    pub before_all: Option<HookEntry>,
    pub before_each: Option<HookEntry>,
    pub after_all: Option<HookEntry>,
    pub after_each: Option<HookEntry>,
}

impl TestCase {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Renames the case (`should`).
    pub fn rename(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Registers a test, routing by the `sequential` flag.
    pub fn add_test(&mut self, entry: TestEntry) {
        if entry.options.sequential {
            self.sequence_tests.push(entry);
        } else {
            self.tests.push(entry);
        }
    }

    /// Registers a focused test, routing by the `sequential` flag.
    pub fn add_only(&mut self, entry: TestEntry) {
        if entry.options.sequential {
            self.sequence_only_tests.push(entry);
        } else {
            self.only_tests.push(entry);
        }
    }

    /// Sets the hook of the given kind, replacing any previous one.
    pub fn set_hook(&mut self, kind: HookKind, body: FnPtr, options: TestOptions) {
        let entry = HookEntry {
            kind,
            body,
            options,
        };
        match kind {
            HookKind::BeforeAll => self.before_all = Some(entry),
            HookKind::BeforeEach => self.before_each = Some(entry),
            HookKind::AfterAll => self.after_all = Some(entry),
            HookKind::AfterEach => self.after_each = Some(entry),
        }
    }

    /// Total registered tests, across all four groups.
    pub fn total_registered(&self) -> usize {
        self.tests.len()
            + self.sequence_tests.len()
            + self.only_tests.len()
            + self.sequence_only_tests.len()
    }

    /// True when any test is focused, switching the run to only-selection.
    pub fn has_only(&self) -> bool {
        !self.only_tests.is_empty() || !self.sequence_only_tests.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.total_registered() == 0
    }
}

/// Formats an `each` description for one table row.
///
/// `{}` is replaced by the row value and `{i}` by the 0-based row index;
/// without a placeholder the value is appended.
pub fn format_each_description(format: &str, value: &Dynamic, index: usize) -> String {
    let rendered = if value.is_string() {
        value.clone().into_string().unwrap_or_default()
    } else {
        value.to_string()
    };
    let mut out = format.replace("{i}", &index.to_string());
    if out.contains("{}") {
        out = out.replacen("{}", &rendered, 1);
    } else if out == format && !format.contains("{i}") {
        out = format!("{format} {rendered}");
    }
    out
}

#[derive(Default)]
struct CaseState {
    case: TestCase,
    consumed: bool,
}

/// Shared, engine-registerable handle to the case under construction.
///
/// Clones share one registry. `take` consumes the case exactly once;
/// registrations after consumption are ignored.
#[derive(Clone, Default)]
pub struct CaseHandle {
    state: Arc<Mutex<CaseState>>,
}

impl CaseHandle {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaseState {
                case: TestCase::new(description),
                consumed: false,
            })),
        }
    }

    /// Mutates the case, unless it has already been consumed by `run()`.
    pub fn with_case(&self, f: impl FnOnce(&mut TestCase)) {
        if let Ok(mut state) = self.state.lock() {
            if !state.consumed {
                f(&mut state.case);
            }
        }
    }

    /// Consumes the case. Returns `None` on a second call.
    pub fn take(&self) -> Option<TestCase> {
        let mut state = self.state.lock().ok()?;
        if state.consumed {
            return None;
        }
        state.consumed = true;
        Some(std::mem::take(&mut state.case))
    }

    /// Snapshot accessor for inspection in tests and diagnostics.
    pub fn peek<T>(&self, f: impl FnOnce(&TestCase) -> T) -> Option<T> {
        self.state.lock().ok().map(|state| f(&state.case))
    }
}

impl std::fmt::Debug for CaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered = self.peek(|c| c.total_registered()).unwrap_or(0);
        f.debug_struct("CaseHandle")
            .field("registered", &registered)
            .finish()
    }
}

fn entry(desc: ImmutableString, body: FnPtr, opts: TestOptions) -> TestEntry {
    TestEntry {
        description: desc.to_string(),
        body: Some(body),
        arg: None,
        options: opts,
    }
}

/// Registers the test DSL on an engine, bound to one case handle.
///
/// `run()` is not registered here; it needs the execution environment and
/// lives with the isolator.
pub fn register_dsl(engine: &mut Engine, handle: &CaseHandle) {
    // it / sequence
    let h = handle.clone();
    engine.register_fn("it", move |desc: ImmutableString, body: FnPtr| {
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), TestOptions::default())));
    });
    let h = handle.clone();
    engine.register_fn("it", move |desc: ImmutableString, body: FnPtr, opts: Map| {
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), TestOptions::from_map(&opts))));
    });
    let h = handle.clone();
    engine.register_fn("sequence", move |desc: ImmutableString, body: FnPtr| {
        let mut opts = TestOptions::default();
        opts.sequential = true;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });
    let h = handle.clone();
    engine.register_fn(
        "sequence",
        move |desc: ImmutableString, body: FnPtr, opts: Map| {
            let mut opts = TestOptions::from_map(&opts);
            opts.sequential = true;
            h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
        },
    );

    // only
    let h = handle.clone();
    engine.register_fn("only", move |desc: ImmutableString, body: FnPtr| {
        h.with_case(|c| c.add_only(entry(desc.clone(), body.clone(), TestOptions::default())));
    });
    let h = handle.clone();
    engine.register_fn("only", move |desc: ImmutableString, body: FnPtr, opts: Map| {
        h.with_case(|c| c.add_only(entry(desc.clone(), body.clone(), TestOptions::from_map(&opts))));
    });

    // skip
    let h = handle.clone();
    engine.register_fn("skip", move |desc: ImmutableString, body: FnPtr| {
        let mut opts = TestOptions::default();
        opts.skip = true;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });
    let h = handle.clone();
    engine.register_fn("skip", move |desc: ImmutableString, body: FnPtr, opts: Map| {
        let mut opts = TestOptions::from_map(&opts);
        opts.skip = true;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });

    // todo (no body)
    let h = handle.clone();
    engine.register_fn("todo", move |desc: ImmutableString| {
        let mut opts = TestOptions::default();
        opts.todo = true;
        h.with_case(|c| {
            c.add_test(TestEntry {
                description: desc.to_string(),
                body: None,
                arg: None,
                options: opts.clone(),
            })
        });
    });
    let h = handle.clone();
    engine.register_fn("todo", move |desc: ImmutableString, opts: Map| {
        let mut opts = TestOptions::from_map(&opts);
        opts.todo = true;
        h.with_case(|c| {
            c.add_test(TestEntry {
                description: desc.to_string(),
                body: None,
                arg: None,
                options: opts.clone(),
            })
        });
    });

    // retry / timeout / fail / itIf: convenience wrappers folding an option
    let h = handle.clone();
    engine.register_fn("retry", move |count: i64, desc: ImmutableString, body: FnPtr| {
        let mut opts = TestOptions::default();
        opts.retry = count.max(0) as u32;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });
    let h = handle.clone();
    engine.register_fn(
        "retry",
        move |count: i64, desc: ImmutableString, body: FnPtr, opts: Map| {
            let mut opts = TestOptions::from_map(&opts);
            opts.retry = count.max(0) as u32;
            h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
        },
    );
    let h = handle.clone();
    engine.register_fn("timeout", move |ms: i64, desc: ImmutableString, body: FnPtr| {
        let mut opts = TestOptions::default();
        opts.timeout_ms = ms.max(0) as u64;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });
    let h = handle.clone();
    engine.register_fn(
        "timeout",
        move |ms: i64, desc: ImmutableString, body: FnPtr, opts: Map| {
            let mut opts = TestOptions::from_map(&opts);
            opts.timeout_ms = ms.max(0) as u64;
            h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
        },
    );
    let h = handle.clone();
    engine.register_fn("fail", move |desc: ImmutableString, body: FnPtr| {
        let mut opts = TestOptions::default();
        opts.softfail = true;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });
    let h = handle.clone();
    engine.register_fn("fail", move |desc: ImmutableString, body: FnPtr, opts: Map| {
        let mut opts = TestOptions::from_map(&opts);
        opts.softfail = true;
        h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
    });
    let h = handle.clone();
    engine.register_fn(
        "itIf",
        move |cond: Dynamic, desc: ImmutableString, body: FnPtr| {
            let mut opts = TestOptions::default();
            opts.condition = Condition::from_dynamic(&cond);
            h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
        },
    );
    let h = handle.clone();
    engine.register_fn(
        "itIf",
        move |cond: Dynamic, desc: ImmutableString, body: FnPtr, opts: Map| {
            let mut opts = TestOptions::from_map(&opts);
            opts.condition = Condition::from_dynamic(&cond);
            h.with_case(|c| c.add_test(entry(desc.clone(), body.clone(), opts.clone())));
        },
    );

    // each: one entry per table row, shared options
    let h = handle.clone();
    engine.register_fn(
        "each",
        move |table: Array, format: ImmutableString, body: FnPtr| {
            register_each(&h, &table, &format, &body, TestOptions::default());
        },
    );
    let h = handle.clone();
    engine.register_fn(
        "each",
        move |table: Array, format: ImmutableString, body: FnPtr, opts: Map| {
            register_each(&h, &table, &format, &body, TestOptions::from_map(&opts));
        },
    );

    // hooks
    for kind in [
        HookKind::BeforeAll,
        HookKind::BeforeEach,
        HookKind::AfterAll,
        HookKind::AfterEach,
    ] {
        let h = handle.clone();
        engine.register_fn(kind.label(), move |body: FnPtr| {
            h.with_case(|c| c.set_hook(kind, body.clone(), TestOptions::default()));
        });
        let h = handle.clone();
        engine.register_fn(kind.label(), move |body: FnPtr, opts: Map| {
            h.with_case(|c| c.set_hook(kind, body.clone(), TestOptions::from_map(&opts)));
        });
    }

    // should: rename the case
    let h = handle.clone();
    engine.register_fn("should", move |desc: ImmutableString| {
        h.with_case(|c| c.rename(desc.to_string()));
    });
}

fn register_each(
    handle: &CaseHandle,
    table: &Array,
    format: &str,
    body: &FnPtr,
    options: TestOptions,
) {
    for (index, row) in table.iter().enumerate() {
        let description = format_each_description(format, row, index);
        handle.with_case(|c| {
            c.add_test(TestEntry {
                description: description.clone(),
                body: Some(body.clone()),
                arg: Some(row.clone()),
                options: options.clone(),
            })
        });
    }
}
