//! Implementation of `codesave extract`.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use zip::ZipArchive;

use crate::core::archive::{MANIFEST_NAME, PACKAGES_NAME};
use crate::util::fs::ensure_dir;

/// Options for extracting an archive.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Also write `library_names.json` and `packages.txt`.
    pub keep_metadata: bool,
}

/// Result of extracting an archive.
#[derive(Debug, Clone)]
pub struct ExtractResult {
    /// Directory the archive was restored into
    pub destination: PathBuf,
    /// Number of files written
    pub files: usize,
}

/// Restore an archive as a plain directory tree under `destination`.
///
/// Entries whose names would land outside `destination` abort the
/// extraction.
pub fn extract(archive: &Path, destination: &Path, opts: &ExtractOptions) -> Result<ExtractResult> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("not a valid zip archive: {}", archive.display()))?;

    ensure_dir(destination)?;
    let mut files = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            bail!(
                "refusing to extract `{}`: path escapes the destination",
                entry.name()
            );
        };

        let is_metadata = relative == Path::new(MANIFEST_NAME) || relative == Path::new(PACKAGES_NAME);
        if is_metadata && !opts.keep_metadata {
            continue;
        }

        let target = destination.join(&relative);
        if entry.is_dir() {
            ensure_dir(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }

        let mut out = File::create(&target)
            .with_context(|| format!("failed to create file: {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract `{}`", relative.display()))?;
        files += 1;
    }

    tracing::info!("Extracted {} files to {}", files, destination.display());
    Ok(ExtractResult {
        destination: destination.to_path_buf(),
        files,
    })
}
