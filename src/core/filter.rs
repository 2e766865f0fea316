//! Copy filters.
//!
//! A filter looks at one directory and the names of its children and returns
//! the subset of names to leave out of the copy. Several filters compose by
//! union: a child is skipped if any filter excludes it.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use glob::Pattern;
use thiserror::Error;

/// Error parsing a human-readable size such as `10m`.
#[derive(Debug, Error, PartialEq)]
pub enum SizeParseError {
    #[error("empty size string")]
    Empty,

    #[error("invalid size `{input}`: expected a number with an optional k/m/g suffix")]
    Invalid { input: String },
}

/// Parse a size string into bytes.
///
/// Suffixes are decimal: `k` = 1e3, `m` = 1e6, `g` = 1e9 (case-insensitive).
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::Empty);
    }

    let lower = trimmed.to_ascii_lowercase();
    let (number, multiplier) = match lower.chars().last() {
        Some('k') => (&lower[..lower.len() - 1], 1e3),
        Some('m') => (&lower[..lower.len() - 1], 1e6),
        Some('g') => (&lower[..lower.len() - 1], 1e9),
        _ => (lower.as_str(), 1.0),
    };

    let invalid = || SizeParseError::Invalid {
        input: input.to_string(),
    };
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok((value * multiplier) as u64)
}

/// Something that can exclude children of a directory from a copy.
pub trait IgnoreFilter: Send + Sync {
    /// Return the subset of `names` (children of `dir`) to exclude.
    fn ignored(&self, dir: &Path, names: &[String]) -> BTreeSet<String>;
}

impl<F> IgnoreFilter for F
where
    F: Fn(&Path, &[String]) -> BTreeSet<String> + Send + Sync,
{
    fn ignored(&self, dir: &Path, names: &[String]) -> BTreeSet<String> {
        self(dir, names)
    }
}

/// The built-in filter kinds.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Exclude children whose name matches any pattern.
    Exclude(Vec<Pattern>),
    /// Exclude files strictly larger than the given number of bytes.
    LargerThan(u64),
    /// Exclude files whose name matches none of the patterns. Directories are
    /// always kept so matching files below them are still reached.
    IncludeOnly(Vec<Pattern>),
}

impl Filter {
    /// Exclude-by-glob filter.
    pub fn exclude<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        Ok(Filter::Exclude(compile_patterns(patterns)?))
    }

    /// Include-only-by-glob filter.
    pub fn include_only<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        Ok(Filter::IncludeOnly(compile_patterns(patterns)?))
    }

    /// Exclude files larger than a size string such as `1k` or `10m`.
    pub fn larger_than(size: &str) -> Result<Self, SizeParseError> {
        Ok(Filter::LargerThan(parse_size(size)?))
    }
}

impl IgnoreFilter for Filter {
    fn ignored(&self, dir: &Path, names: &[String]) -> BTreeSet<String> {
        match self {
            Filter::Exclude(patterns) => names
                .iter()
                .filter(|name| patterns.iter().any(|p| p.matches(name)))
                .cloned()
                .collect(),
            Filter::LargerThan(limit) => names
                .iter()
                .filter(|name| {
                    std::fs::metadata(dir.join(name.as_str()))
                        .map(|m| m.is_file() && m.len() > *limit)
                        .unwrap_or(false)
                })
                .cloned()
                .collect(),
            Filter::IncludeOnly(patterns) => names
                .iter()
                .filter(|name| {
                    !dir.join(name.as_str()).is_dir() && !patterns.iter().any(|p| p.matches(name))
                })
                .cloned()
                .collect(),
        }
    }
}

/// An ordered chain of filters combined by union.
#[derive(Default)]
pub struct Filters {
    filters: Vec<Box<dyn IgnoreFilter>>,
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("len", &self.filters.len())
            .finish()
    }
}

impl Filters {
    /// Create an empty chain (only the always-on exclusions apply).
    pub fn new() -> Self {
        Filters::default()
    }

    /// Append a filter to the chain.
    pub fn with(mut self, filter: impl IgnoreFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Append a filter in place.
    pub fn push(&mut self, filter: impl IgnoreFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Number of user-supplied filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no user-supplied filters are present.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl IgnoreFilter for Filters {
    fn ignored(&self, dir: &Path, names: &[String]) -> BTreeSet<String> {
        let mut excluded: BTreeSet<String> = names
            .iter()
            .filter(|name| is_always_ignored(name))
            .cloned()
            .collect();
        for filter in &self.filters {
            excluded.extend(filter.ignored(dir, names));
        }
        excluded
    }
}

/// Hidden files and compiled-cache artifacts never make it into an archive.
pub fn is_always_ignored(name: &str) -> bool {
    name.starts_with('.')
        || name == "__pycache__"
        || name.ends_with(".pyc")
        || name.ends_with(".pyo")
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p.as_ref())
                .with_context(|| format!("invalid glob pattern: {}", p.as_ref()))
        })
        .collect()
}
