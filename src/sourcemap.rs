//! Line-oriented source maps for transformed test scripts.
//!
//! Transform plugins may insert or remove lines, so positions reported by
//! the script engine refer to the *generated* code. A [`SourceMap`] records,
//! for every generated line, the original line it came from, and answers
//! position queries when errors are rendered.
//!
//! Maps compose: each plugin emits a table mapping its output lines to its
//! input lines, and the transformer folds the tables together so the final
//! map always points back at the file on disk.

use serde::{Deserialize, Serialize};

/// A position in the original source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedPosition {
    /// Name of the original source (the file path as given to the transformer).
    pub source: String,

    /// 1-based line in the original source.
    pub line: u32,

    /// 1-based column in the original source.
    pub column: u32,
}

/// Mapping from generated positions back to original positions.
///
/// Line-granular: columns pass through unchanged because the built-in
/// plugins only ever add or drop whole lines.
///
/// # Example
///
/// ```
/// use scriptest::sourcemap::SourceMap;
///
/// // Generated lines 1 and 2 came from original lines 2 and 4.
/// let map = SourceMap::from_origins("suite.rhai", vec![2, 4]);
/// let pos = map.lookup(2, 7).unwrap();
/// assert_eq!(pos.line, 4);
/// assert_eq!(pos.column, 7);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    source: String,
    /// `origins[i]` is the 1-based original line of generated line `i + 1`.
    origins: Vec<u32>,
}

impl SourceMap {
    /// Creates an identity map over `line_count` lines.
    pub fn identity(source: impl Into<String>, line_count: usize) -> Self {
        Self {
            source: source.into(),
            origins: (1..=line_count as u32).collect(),
        }
    }

    /// Creates a map from an explicit generated-line → original-line table.
    pub fn from_origins(source: impl Into<String>, origins: Vec<u32>) -> Self {
        Self {
            source: source.into(),
            origins,
        }
    }

    /// The name of the original source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of generated lines covered by this map.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Returns true if the map covers no lines.
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Resolves a generated `(line, column)` to the original position.
    ///
    /// Both coordinates are 1-based. Returns `None` when the generated line
    /// falls outside the mapped range (e.g. positions inside injected code).
    pub fn lookup(&self, line: u32, column: u32) -> Option<MappedPosition> {
        let original = *self.origins.get(line.checked_sub(1)? as usize)?;
        Some(MappedPosition {
            source: self.source.clone(),
            line: original,
            column,
        })
    }

    /// Composes this map with a downstream transformation.
    ///
    /// `table[i]` is the 1-based line of *this* map's generated code that
    /// produced line `i + 1` of the newer generated code. The result maps
    /// the newer code directly to the original source.
    pub fn compose(&self, table: &[u32]) -> Self {
        let origins = table
            .iter()
            .filter_map(|&line| self.origins.get(line.saturating_sub(1) as usize).copied())
            .collect();
        Self {
            source: self.source.clone(),
            origins,
        }
    }
}
