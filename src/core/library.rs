//! Library discovery and name validation.
//!
//! A *library* is a top-level importable unit of a codebase root: either a
//! Python source file (named by its stem) or a directory that contains at
//! least one Python source file somewhere below it (named by the directory).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use walkdir::WalkDir;

use crate::util::fs::expand_tilde;

/// Extension of Python source files.
pub const SOURCE_EXTENSION: &str = "py";

/// File name of a package marker.
pub const PACKAGE_MARKER: &str = "__init__.py";

/// Error for names that cannot be used as an import path segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("empty name")]
    Empty,

    #[error("`{name}` is not a valid identifier")]
    InvalidSegment { name: String },

    #[error("`{name}` is not a valid dotted module name")]
    InvalidModule { name: String },
}

/// Returns true if `path` names a Python source file.
pub fn is_source_path(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext == SOURCE_EXTENSION)
}

/// `__init__`, `__main__` and other dunder names are never libraries.
fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Validate a single import segment (a namespace prefix or library name).
pub fn validate_segment(name: &str) -> Result<(), NameError> {
    let mut chars = name.chars();
    let first = chars.next().ok_or(NameError::Empty)?;

    if !(first.is_alphabetic() || first == '_') || !chars.all(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(NameError::InvalidSegment {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Validate a dotted module name such as `pkg.mod`.
pub fn validate_module_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.split('.').any(|segment| validate_segment(segment).is_err()) {
        return Err(NameError::InvalidModule {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Discover the library names of a codebase root.
pub fn discover(root: &Path) -> Result<BTreeSet<String>> {
    Ok(discover_paths(root)?.into_keys().collect())
}

/// Discover the libraries of a codebase root along with their paths.
///
/// The root is resolved to an absolute path (`~` is expanded). Non-source
/// files at the top level are ignored.
pub fn discover_paths(root: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let root = expand_tilde(root);
    let root = root
        .canonicalize()
        .with_context(|| format!("codebase root does not exist: {}", root.display()))?;

    let mut libraries = BTreeMap::new();
    let entries = std::fs::read_dir(&root)
        .with_context(|| format!("failed to read directory: {}", root.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if is_dunder(name.trim_end_matches(".py")) {
            continue;
        }

        if path.is_dir() {
            if contains_source(&path) {
                libraries.insert(name, path);
            }
        } else if path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            if let Some(stem) = path.file_stem() {
                libraries.insert(stem.to_string_lossy().into_owned(), path);
            }
        }
    }

    tracing::debug!(
        "Discovered {} libraries in {}",
        libraries.len(),
        root.display()
    );
    Ok(libraries)
}

/// Derive library names from archive entry names.
///
/// Every source entry contributes the path segment at `depth` (0 for a plain
/// archive, 1 for a namespaced one), with the `.py` suffix removed when that
/// segment is the file itself. Dunder names such as `__init__` are skipped.
pub fn library_names_from_entries<'a>(
    entries: impl IntoIterator<Item = &'a str>,
    depth: usize,
) -> BTreeSet<String> {
    entries
        .into_iter()
        .filter(|entry| is_source_path(entry))
        .filter_map(|entry| {
            let segments: Vec<&str> = entry.split('/').collect();
            let segment = *segments.get(depth)?;
            let name = if depth + 1 == segments.len() {
                segment.strip_suffix(".py")?
            } else {
                segment
            };
            (!is_dunder(name)).then(|| name.to_string())
        })
        .collect()
}

fn contains_source(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .is_some_and(|ext| ext == SOURCE_EXTENSION)
        })
}
