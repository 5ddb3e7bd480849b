//! Configuration loading.
//!
//! Loads the runner configuration from TOML files or strings, expands
//! environment references in context values, and converts context values
//! into script bindings.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context as _, Result};
use rhai::Dynamic;
use tracing::warn;

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or a
/// required environment variable referenced from a context value is not
/// set.
///
/// # Example
///
/// ```no_run
/// use scriptest::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("scriptest.toml"))?;
/// println!("Max concurrent files: {}", config.run.max_concurrent);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    expand_context(&mut config.context)?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// Useful for testing and for embedding configuration programmatically.
///
/// # Example
///
/// ```
/// use scriptest::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [run]
///     max_concurrent = 2
/// "#)?;
///
/// assert_eq!(config.run.max_concurrent, 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;

    expand_context(&mut config.context)?;

    Ok(config)
}

/// Expands environment variable references in a string value.
///
/// Syntax:
/// - `${VAR}` - required, fails if VAR is not set
/// - `${VAR:-default}` - optional, uses "default" if VAR not set
/// - `$$` - escaped dollar sign (becomes single `$`)
fn expand_env_value(value: &str) -> Result<String, String> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let mut reference = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    reference.push(c);
                }
                if !closed {
                    return Err(format!("Unclosed variable reference: ${{{reference}"));
                }
                let (name, default) = match reference.find(":-") {
                    Some(idx) => (&reference[..idx], Some(&reference[idx + 2..])),
                    None => (reference.as_str(), None),
                };
                if name.is_empty() {
                    return Err("Empty variable name in ${}".to_string());
                }
                match std::env::var(name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => match default {
                        Some(default) => result.push_str(default),
                        None => {
                            return Err(format!("Required environment variable not set: {name}"));
                        }
                    },
                }
            }
            // Lone $, treat as literal.
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Expands environment references in every string of the context table,
/// including nested tables and arrays.
fn expand_context(table: &mut toml::value::Table) -> Result<()> {
    for (key, value) in table.iter_mut() {
        expand_value(value).map_err(|e| anyhow::anyhow!("context value '{key}': {e}"))?;
    }
    Ok(())
}

fn expand_value(value: &mut toml::Value) -> Result<(), String> {
    match value {
        toml::Value::String(s) => {
            *s = expand_env_value(s)?;
        }
        toml::Value::Array(items) => {
            for item in items {
                expand_value(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                expand_value(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Loads `KEY=VALUE` environment files.
///
/// Missing files are skipped with a warning; malformed lines are ignored.
pub fn load_env_files(paths: &[std::path::PathBuf]) {
    for path in paths {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping env file {}: {}", path.display(), e);
                continue;
            }
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                // SAFETY: called from startup before worker threads spawn.
                unsafe {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }
}

/// Converts a TOML context value into a script binding.
pub fn value_to_dynamic(value: &toml::Value) -> Dynamic {
    match value {
        toml::Value::String(s) => Dynamic::from(s.clone()),
        toml::Value::Integer(i) => Dynamic::from(*i),
        toml::Value::Float(f) => Dynamic::from(*f),
        toml::Value::Boolean(b) => Dynamic::from(*b),
        toml::Value::Datetime(dt) => Dynamic::from(dt.to_string()),
        toml::Value::Array(items) => {
            let array: rhai::Array = items.iter().map(value_to_dynamic).collect();
            Dynamic::from(array)
        }
        toml::Value::Table(table) => {
            let mut map = rhai::Map::new();
            for (key, item) in table {
                map.insert(key.as_str().into(), value_to_dynamic(item));
            }
            Dynamic::from(map)
        }
    }
}
