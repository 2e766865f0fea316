//! Filesystem utilities.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::filter::IgnoreFilter;

/// Recursively copy a directory, skipping whatever `filter` excludes.
///
/// The filter sees each directory once together with the names of all its
/// children. Returns the number of files copied.
pub fn copy_dir_filtered(src: &Path, dst: &Path, filter: &dyn IgnoreFilter) -> Result<usize> {
    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    let mut children = Vec::new();
    for entry in
        fs::read_dir(src).with_context(|| format!("failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        children.push((entry.file_name().to_string_lossy().into_owned(), entry));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    let names: Vec<String> = children.iter().map(|(name, _)| name.clone()).collect();
    let excluded = filter.ignored(src, &names);

    let mut copied = 0;
    for (name, entry) in children {
        if excluded.contains(&name) {
            tracing::debug!("Skipping {}", entry.path().display());
            continue;
        }

        let ty = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(&name);

        if ty.is_dir() {
            copied += copy_dir_filtered(&src_path, &dst_path, filter)?;
        } else {
            copy_file(&src_path, &dst_path)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy a single file, creating the parent directory if needed.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst).with_context(|| {
        format!("failed to copy {} to {}", src.display(), dst.display())
    })?;
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// Expand `~` and make a path absolute without requiring it to exist.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let path = expand_tilde(path);
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(path))
}

/// Get the relative path from `base` to `path`, for display.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}
