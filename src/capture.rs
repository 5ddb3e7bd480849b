//! Per-file console capture.
//!
//! Every test file gets a fresh [`ConsoleHandle`] bound into its scope as
//! `console`. Writes are buffered privately per file and surface on the
//! file's [`PoolResult`](crate::pool::PoolResult) once execution finishes,
//! so output from concurrently running files never interleaves.
//!
//! Channels mirror the usual console surface (`log`, `info`, `warn`,
//! `error`, `debug`, `trace`) plus the `time`/`timeEnd` timer
//! pseudo-channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rhai::{Dynamic, Engine};
use serde::{Deserialize, Serialize};

/// The channel a log entry was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogKind {
    Log,
    Info,
    Warn,
    Error,
    Debug,
    Trace,
    Time,
    TimeEnd,
}

impl LogKind {
    /// Channel name as scripts see it.
    pub fn label(&self) -> &'static str {
        match self {
            LogKind::Log => "log",
            LogKind::Info => "info",
            LogKind::Warn => "warn",
            LogKind::Error => "error",
            LogKind::Debug => "debug",
            LogKind::Trace => "trace",
            LogKind::Time => "time",
            LogKind::TimeEnd => "timeEnd",
        }
    }
}

/// A single captured console write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub args: Vec<String>,
}

#[derive(Default)]
struct CaptureInner {
    entries: Mutex<Vec<LogEntry>>,
    timers: Mutex<HashMap<String, Instant>>,
}

/// Handle to a file's private console buffer.
///
/// Cloning is cheap; all clones append to the same buffer. The pool keeps
/// one clone and drains it after the file completes.
#[derive(Clone, Default)]
pub struct ConsoleHandle {
    inner: Arc<CaptureInner>,
}

impl ConsoleHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to the buffer.
    pub fn push(&self, kind: LogKind, args: Vec<String>) {
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.push(LogEntry { kind, args });
        }
    }

    /// Starts a named timer and records the `time` entry.
    pub fn time(&self, label: &str) {
        if let Ok(mut timers) = self.inner.timers.lock() {
            timers.insert(label.to_string(), Instant::now());
        }
        self.push(LogKind::Time, vec![label.to_string()]);
    }

    /// Stops a named timer and records the elapsed milliseconds.
    ///
    /// An unknown label still produces a `timeEnd` entry, with no reading.
    pub fn time_end(&self, label: &str) {
        let started = self
            .inner
            .timers
            .lock()
            .ok()
            .and_then(|mut timers| timers.remove(label));
        let mut args = vec![label.to_string()];
        if let Some(started) = started {
            args.push(format!("{}ms", started.elapsed().as_millis()));
        }
        self.push(LogKind::TimeEnd, args);
    }

    /// Takes all captured entries, leaving the buffer empty.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.inner
            .entries
            .lock()
            .map(|mut entries| std::mem::take(&mut *entries))
            .unwrap_or_default()
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ConsoleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleHandle")
            .field("entries", &self.len())
            .finish()
    }
}

/// Renders a script value the way console output expects it.
///
/// Strings appear raw (no quotes); everything else uses the engine's
/// display form.
fn render_arg(value: &Dynamic) -> String {
    if value.is_string() {
        value.clone().into_string().unwrap_or_default()
    } else {
        value.to_string()
    }
}

macro_rules! register_channel {
    ($engine:expr, $name:literal, $kind:expr) => {{
        let kind = $kind;
        $engine.register_fn($name, move |console: &mut ConsoleHandle| {
            console.push(kind, Vec::new());
        });
        $engine.register_fn($name, move |console: &mut ConsoleHandle, a: Dynamic| {
            console.push(kind, vec![render_arg(&a)]);
        });
        $engine.register_fn(
            $name,
            move |console: &mut ConsoleHandle, a: Dynamic, b: Dynamic| {
                console.push(kind, vec![render_arg(&a), render_arg(&b)]);
            },
        );
        $engine.register_fn(
            $name,
            move |console: &mut ConsoleHandle, a: Dynamic, b: Dynamic, c: Dynamic| {
                console.push(kind, vec![render_arg(&a), render_arg(&b), render_arg(&c)]);
            },
        );
        $engine.register_fn(
            $name,
            move |console: &mut ConsoleHandle, a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| {
                console.push(
                    kind,
                    vec![render_arg(&a), render_arg(&b), render_arg(&c), render_arg(&d)],
                );
            },
        );
    }};
}

/// Registers the `console` type and its channel methods on an engine.
///
/// The handle itself is pushed into the file's scope by the isolator.
pub fn register_console(engine: &mut Engine) {
    engine.register_type_with_name::<ConsoleHandle>("Console");

    register_channel!(engine, "log", LogKind::Log);
    register_channel!(engine, "info", LogKind::Info);
    register_channel!(engine, "warn", LogKind::Warn);
    register_channel!(engine, "error", LogKind::Error);
    register_channel!(engine, "debug", LogKind::Debug);
    register_channel!(engine, "trace", LogKind::Trace);

    engine.register_fn("time", |console: &mut ConsoleHandle, label: &str| {
        console.time(label);
    });
    engine.register_fn("timeEnd", |console: &mut ConsoleHandle, label: &str| {
        console.time_end(label);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_drain_round_trip() {
        let console = ConsoleHandle::new();
        console.push(LogKind::Log, vec!["hello".into()]);
        console.push(LogKind::Warn, vec!["a".into(), "b".into()]);

        let entries = console.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, LogKind::Log);
        assert_eq!(entries[0].args, vec!["hello"]);
        assert_eq!(entries[1].kind, LogKind::Warn);
        assert!(console.is_empty());
    }

    #[test]
    fn timers_record_elapsed_reading() {
        let console = ConsoleHandle::new();
        console.time("build");
        console.time_end("build");

        let entries = console.drain();
        assert_eq!(entries[0].kind, LogKind::Time);
        assert_eq!(entries[1].kind, LogKind::TimeEnd);
        assert_eq!(entries[1].args[0], "build");
        assert!(entries[1].args[1].ends_with("ms"));
    }

    #[test]
    fn unknown_timer_label_has_no_reading() {
        let console = ConsoleHandle::new();
        console.time_end("missing");

        let entries = console.drain();
        assert_eq!(entries[0].args, vec!["missing"]);
    }

    #[test]
    fn clones_share_one_buffer() {
        let console = ConsoleHandle::new();
        let clone = console.clone();
        clone.push(LogKind::Info, vec!["shared".into()]);
        assert_eq!(console.len(), 1);
    }

    #[test]
    fn scripts_write_through_registered_methods() {
        let mut engine = Engine::new();
        register_console(&mut engine);

        let console = ConsoleHandle::new();
        let mut scope = rhai::Scope::new();
        scope.push("console", console.clone());

        engine
            .eval_with_scope::<()>(&mut scope, r#"console.log("x", 42); console.warn("y");"#)
            .unwrap();

        let entries = console.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].args, vec!["x", "42"]);
        assert_eq!(entries[1].kind, LogKind::Warn);
    }
}
