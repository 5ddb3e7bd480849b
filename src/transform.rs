//! Source transformation and script compilation.
//!
//! The transformer turns a test file path into an executable [`Script`]
//! plus the [`SourceMap`] that points its positions back at the file on
//! disk. Transformation is plugin-driven: each [`TransformPlugin`] rewrites
//! the code and reports where its output lines came from, and the
//! transformer folds the per-plugin tables into one map.
//!
//! Compilation happens here too, so syntax errors surface as build errors
//! before any execution context exists. Artifacts are cached per file
//! identity: a file is built at most once per run, keyed by modification
//! time with a content fingerprint as tiebreaker (touching a file without
//! changing it does not rebuild).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::sourcemap::SourceMap;

/// A transformation failure for one file.
///
/// Carries the offending path, a message, and any per-position
/// diagnostics the compiler produced.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("failed to build {}: {message}", .path.display())]
pub struct BuildError {
    pub path: PathBuf,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

/// Errors the transformer can produce.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
pub enum TransformError {
    /// The file could not be read at all.
    #[error("cannot read {}: {message}", .path.display())]
    Load { path: PathBuf, message: String },

    /// A plugin or the compiler rejected the source.
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Output of a single plugin pass.
pub struct PluginOutput {
    /// The rewritten code.
    pub code: String,

    /// For each output line (0-based index), the 1-based input line it
    /// came from.
    pub line_origins: Vec<u32>,

    /// Module paths this pass wants preloaded before the script runs.
    pub preloads: Vec<String>,
}

/// A single source-to-source rewrite step.
///
/// Plugins run in registration order; each one sees the previous plugin's
/// output.
pub trait TransformPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn transform(&self, file: &Path, code: &str) -> Result<PluginOutput, BuildError>;
}

/// Extracts `// @require <path>` directives.
///
/// Directive lines are removed from the code (shifting the line map) and
/// their paths are surfaced as preloads, resolved later relative to the
/// test file's directory.
pub struct DirectivePlugin {
    pattern: Regex,
}

impl DirectivePlugin {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"^\s*//\s*@require\s+(\S+)\s*$").expect("directive pattern"),
        }
    }
}

impl Default for DirectivePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPlugin for DirectivePlugin {
    fn name(&self) -> &str {
        "directives"
    }

    fn transform(&self, _file: &Path, code: &str) -> Result<PluginOutput, BuildError> {
        let mut out = String::with_capacity(code.len());
        let mut line_origins = Vec::new();
        let mut preloads = Vec::new();

        for (index, line) in code.lines().enumerate() {
            if let Some(captures) = self.pattern.captures(line) {
                preloads.push(captures[1].to_string());
                continue;
            }
            out.push_str(line);
            out.push('\n');
            line_origins.push(index as u32 + 1);
        }

        Ok(PluginOutput {
            code: out,
            line_origins,
            preloads,
        })
    }
}

/// A compiled, executable unit bound to its file name.
#[derive(Clone)]
pub struct Script {
    /// The originating file path, used as the script's display name.
    pub name: String,
    pub code: Arc<str>,
    pub ast: Arc<rhai::AST>,
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script").field("name", &self.name).finish()
    }
}

/// The full build artifact for one file.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub script: Script,
    pub source_map: SourceMap,
    /// Directive preloads collected across all plugin passes.
    pub preloads: Vec<String>,
}

struct CacheEntry {
    mtime: Option<SystemTime>,
    fingerprint: String,
    artifact: Transformed,
}

/// Transforms, compiles, and caches test scripts.
pub struct Transformer {
    plugins: Vec<Box<dyn TransformPlugin>>,
    compiler: rhai::Engine,
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Transformer {
    /// A transformer with the built-in directive plugin.
    pub fn new() -> Self {
        Self {
            plugins: vec![Box::new(DirectivePlugin::new())],
            compiler: rhai::Engine::new_raw(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A transformer with no plugins at all (code passes through verbatim).
    pub fn bare() -> Self {
        Self {
            plugins: Vec::new(),
            compiler: rhai::Engine::new_raw(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a plugin to the pass list.
    pub fn with_plugin(mut self, plugin: Box<dyn TransformPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Builds the artifact for a file, or returns the cached one.
    pub fn transform(&self, file: &Path) -> Result<Transformed, TransformError> {
        let mtime = fs::metadata(file).and_then(|m| m.modified()).ok();

        if let Ok(cache) = self.cache.lock() {
            if let Some(entry) = cache.get(file) {
                if entry.mtime.is_some() && entry.mtime == mtime {
                    debug!(file = %file.display(), "transform cache hit (mtime)");
                    return Ok(entry.artifact.clone());
                }
            }
        }

        let source = fs::read_to_string(file).map_err(|e| TransformError::Load {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;
        let fingerprint = content_fingerprint(&source);

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(entry) = cache.get_mut(file) {
                if entry.fingerprint == fingerprint {
                    // Touched but unchanged; refresh the stamp.
                    debug!(file = %file.display(), "transform cache hit (fingerprint)");
                    entry.mtime = mtime;
                    return Ok(entry.artifact.clone());
                }
            }
        }

        let artifact = self.build(file, &source)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                file.to_path_buf(),
                CacheEntry {
                    mtime,
                    fingerprint,
                    artifact: artifact.clone(),
                },
            );
        }

        Ok(artifact)
    }

    fn build(&self, file: &Path, source: &str) -> Result<Transformed, TransformError> {
        let name = file.display().to_string();
        let mut code = source.to_string();
        let mut map = SourceMap::identity(&name, source.lines().count());
        let mut preloads = Vec::new();

        for plugin in &self.plugins {
            let output = plugin.transform(file, &code)?;
            debug!(
                file = %file.display(),
                plugin = plugin.name(),
                preloads = output.preloads.len(),
                "applied transform plugin"
            );
            map = map.compose(&output.line_origins);
            code = output.code;
            preloads.extend(output.preloads);
        }

        let ast = self.compiler.compile(&code).map_err(|e| BuildError {
            path: file.to_path_buf(),
            message: e.to_string(),
            diagnostics: parse_diagnostics(&e),
        })?;

        Ok(Transformed {
            script: Script {
                name,
                code: Arc::from(code.as_str()),
                ast: Arc::new(ast),
            },
            source_map: map,
            preloads,
        })
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_diagnostics(err: &rhai::ParseError) -> Vec<String> {
    match (err.1.line(), err.1.position()) {
        (Some(line), Some(column)) => vec![format!("at line {line}, column {column}")],
        (Some(line), None) => vec![format!("at line {line}")],
        _ => Vec::new(),
    }
}

fn content_fingerprint(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn directive_plugin_strips_lines_and_collects_preloads() {
        let plugin = DirectivePlugin::new();
        let code = "// @require helpers\nlet x = 1;\n// @require more/util\nx + 1\n";
        let out = plugin.transform(Path::new("t.rhai"), code).unwrap();

        assert_eq!(out.preloads, vec!["helpers", "more/util"]);
        assert_eq!(out.code, "let x = 1;\nx + 1\n");
        assert_eq!(out.line_origins, vec![2, 4]);
    }

    #[test]
    fn transform_produces_shifted_source_map() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.rhai", "// @require helpers\nlet x = 1;\nx\n");

        let transformer = Transformer::new();
        let built = transformer.transform(&path).unwrap();

        assert_eq!(built.preloads, vec!["helpers"]);
        // Generated line 1 is original line 2.
        let pos = built.source_map.lookup(1, 5).unwrap();
        assert_eq!(pos.line, 2);
        assert_eq!(pos.column, 5);
    }

    #[test]
    fn syntax_errors_become_build_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "bad.rhai", "let x = ;\n");

        let transformer = Transformer::new();
        let err = transformer.transform(&path).unwrap_err();
        match err {
            TransformError::Build(build) => {
                assert_eq!(build.path, path);
                assert!(!build.message.is_empty());
            }
            other => panic!("expected build error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let transformer = Transformer::new();
        let err = transformer
            .transform(Path::new("/definitely/not/here.rhai"))
            .unwrap_err();
        assert!(matches!(err, TransformError::Load { .. }));
    }

    #[test]
    fn cache_serves_unchanged_files() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.rhai", "1 + 1\n");

        let transformer = Transformer::new();
        let first = transformer.transform(&path).unwrap();
        let second = transformer.transform(&path).unwrap();

        // Same artifact (the AST is shared, not recompiled).
        assert!(Arc::ptr_eq(&first.script.ast, &second.script.ast));
    }

    #[test]
    fn cache_rebuilds_on_content_change() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "t.rhai", "1\n");

        let transformer = Transformer::new();
        let first = transformer.transform(&path).unwrap();

        // Rewrite with different content; mtime granularity may be coarse,
        // so the fingerprint must catch it.
        fs::write(&path, "2\n").unwrap();
        let entry_refresh = transformer.transform(&path).unwrap();
        assert!(!Arc::ptr_eq(&first.script.ast, &entry_refresh.script.ast));
        assert_eq!(&*entry_refresh.script.code, "2\n");
    }
}
