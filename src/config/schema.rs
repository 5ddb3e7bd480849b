//! Configuration schema definitions.
//!
//! All runner settings deserialize from a TOML file and may be overridden
//! from the command line. The schema is one explicit record constructed
//! once at startup and passed by reference everywhere; there is no global
//! configuration state.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunConfig        - discovery patterns, concurrency, timeout, preloads
//! ├── context          - free-form table of bindings injected into scripts
//! ├── TransformConfig  - transform plugin list and engine strictness
//! └── ReportConfig     - output directory and reporter selection
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core run settings.
    #[serde(default)]
    pub run: RunConfig,

    /// Host bindings injected into every test file's scope.
    ///
    /// Values are free-form TOML; strings support `${VAR}` /
    /// `${VAR:-default}` environment expansion at load time.
    #[serde(default)]
    pub context: toml::value::Table,

    /// Source transformation settings.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Report output settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Glob patterns selecting test files.
    #[serde(default = "default_pattern")]
    pub pattern: Vec<String>,

    /// Glob patterns removing files from the selection.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Explicit test files, run in addition to pattern matches.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// Per-file execution timeout in milliseconds.
    ///
    /// 0 means the runner fallback of 300 s.
    #[serde(default)]
    pub timeout: u64,

    /// How many files execute concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Modules preloaded before every test file.
    #[serde(default)]
    pub require: Vec<String>,

    /// `KEY=VALUE` environment files loaded at startup.
    #[serde(default)]
    pub envs: Vec<PathBuf>,

    /// Re-run on change. Accepted but not implemented.
    #[serde(default)]
    pub watch: bool,

    /// List registered tests without executing them.
    #[serde(default)]
    pub collect_only: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            exclude: Vec::new(),
            files: Vec::new(),
            timeout: 0,
            max_concurrent: default_max_concurrent(),
            require: Vec::new(),
            envs: Vec::new(),
            watch: false,
            collect_only: false,
        }
    }
}

fn default_pattern() -> Vec<String> {
    vec!["tests/**/*.rhai".to_string()]
}

fn default_max_concurrent() -> usize {
    4
}

/// Source transformation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    /// Transform plugins, applied in order. Built-in: `directives`.
    #[serde(default = "default_plugins")]
    pub plugins: Vec<String>,

    /// Reject scripts that reference undeclared variables.
    #[serde(default)]
    pub strict: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            plugins: default_plugins(),
            strict: false,
        }
    }
}

fn default_plugins() -> Vec<String> {
    vec!["directives".to_string()]
}

/// Report output settings.
///
/// # Example
///
/// ```toml
/// [report]
/// output_dir = "build/test-results"
/// reporters = ["console", "junit", "json"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory where file reporters write.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Reporters to run, by name. Built-in: `console`, `junit`, `json`.
    #[serde(default = "default_reporters")]
    pub reporters: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            reporters: default_reporters(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_reporters() -> Vec<String> {
    vec!["console".to_string()]
}
