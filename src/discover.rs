//! Test file discovery.
//!
//! Resolves the configured glob patterns, drops excluded matches, folds
//! in explicitly listed files, and returns a deduplicated list in a
//! deterministic order: explicit files first, then pattern matches in
//! glob order.

use std::path::PathBuf;

use indexmap::IndexSet;

#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// Discovers test files from patterns, exclusions, and explicit paths.
pub fn discover(
    patterns: &[String],
    excludes: &[String],
    files: &[PathBuf],
) -> Result<Vec<PathBuf>, DiscoverError> {
    let exclude_patterns = excludes
        .iter()
        .map(|pattern| {
            glob::Pattern::new(pattern).map_err(|e| DiscoverError::Pattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut selected: IndexSet<PathBuf> = IndexSet::new();
    for file in files {
        selected.insert(file.clone());
    }

    for pattern in patterns {
        let matches = glob::glob(pattern).map_err(|e| DiscoverError::Pattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        for path in matches.flatten() {
            if !path.is_file() {
                continue;
            }
            if exclude_patterns.iter().any(|ex| ex.matches_path(&path)) {
                continue;
            }
            selected.insert(path);
        }
    }

    Ok(selected.into_iter().collect())
}
