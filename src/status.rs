//! Per-file terminal status board.
//!
//! One line per test file, moving through pending → running →
//! passed/failed as the pool drives execution. Rendering is skipped
//! entirely when stdout is not a terminal (CI logs stay clean).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {prefix:.bold} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Terminal view of the run, owned and mutated only by the pool task.
pub struct StatusBoard {
    multi: Option<MultiProgress>,
    bars: Mutex<IndexMap<PathBuf, ProgressBar>>,
}

impl StatusBoard {
    /// A board that renders when attached to a terminal.
    pub fn new() -> Self {
        Self::with_enabled(console::Term::stdout().is_term())
    }

    /// Explicit control over rendering, used by tests and `--quiet` runs.
    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            multi: enabled.then(MultiProgress::new),
            bars: Mutex::new(IndexMap::new()),
        }
    }

    /// Adds one pending line per file, in run order.
    pub fn register(&self, files: &[PathBuf]) {
        let Some(multi) = &self.multi else { return };
        let Ok(mut bars) = self.bars.lock() else { return };
        for file in files {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(bar_style());
            bar.set_prefix(display_name(file));
            bar.set_message(console::style("pending").dim().to_string());
            bars.insert(file.clone(), bar);
        }
    }

    /// Marks a file as currently executing.
    pub fn set_running(&self, file: &Path) {
        let Ok(bars) = self.bars.lock() else { return };
        if let Some(bar) = bars.get(file) {
            bar.set_message(console::style("running").cyan().to_string());
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
        }
    }

    /// Settles a file's line with its final state.
    pub fn finish(&self, file: &Path, passed: bool) {
        let Ok(bars) = self.bars.lock() else { return };
        if let Some(bar) = bars.get(file) {
            let message = if passed {
                console::style("passed").green().to_string()
            } else {
                console::style("failed").red().bold().to_string()
            };
            bar.finish_with_message(message);
        }
    }

    /// Removes all rendering; called once reporting takes over stdout.
    pub fn clear(&self) {
        if let Some(multi) = &self.multi {
            let _ = multi.clear();
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn display_name(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}
