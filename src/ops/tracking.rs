//! Saving archives to, and fetching them from, an experiment-tracking store.
//!
//! The store itself is a collaborator behind [`RunStore`]; [`DirectoryStore`]
//! keeps runs in a local directory laid out as `<root>/<run>/<file>`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::core::archive::PACKAGES_NAME;
use crate::ops::save::{checkpoint, CheckpointOptions, SaveResult};
use crate::util::fs::{copy_file, ensure_dir};

/// File name used for archives saved to a run.
pub const ARCHIVE_NAME: &str = "codebase.zip";

/// When a saved file should be uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadPolicy {
    /// Upload immediately.
    #[default]
    Now,
    /// Upload when the run finishes.
    End,
}

/// An experiment-tracking backend.
pub trait RunStore {
    /// Save a local file to `run`.
    fn save(&self, run: &str, path: &Path, policy: UploadPolicy) -> Result<()>;

    /// Fetch `filename` from `run` into the directory `dest`, returning the
    /// path of the fetched file.
    fn fetch(&self, run: &str, filename: &str, dest: &Path) -> Result<PathBuf>;
}

/// A run store backed by a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run: &str) -> Result<PathBuf> {
        if run.is_empty() || run.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            bail!("invalid run identifier `{}`", run);
        }
        Ok(self.root.join(run))
    }
}

impl RunStore for DirectoryStore {
    fn save(&self, run: &str, path: &Path, policy: UploadPolicy) -> Result<()> {
        let name = path
            .file_name()
            .with_context(|| format!("cannot save {}: no file name", path.display()))?;
        let dir = self.run_dir(run)?;
        ensure_dir(&dir)?;
        copy_file(path, &dir.join(name))?;
        tracing::debug!("Saved {} to run {} ({:?})", path.display(), run, policy);
        Ok(())
    }

    fn fetch(&self, run: &str, filename: &str, dest: &Path) -> Result<PathBuf> {
        let source = self.run_dir(run)?.join(filename);
        if !source.is_file() {
            bail!("run `{}` has no file `{}`", run, filename);
        }
        let target = dest.join(filename);
        copy_file(&source, &target)?;
        Ok(target)
    }
}

/// Checkpoint a codebase into `output_dir` and save it to `run`.
///
/// Writes `codebase.zip` (and `packages.txt`, when a snapshot is attached)
/// and uploads both with [`UploadPolicy::Now`].
pub fn checkpoint_to_store(
    store: &dyn RunStore,
    run: &str,
    opts: &CheckpointOptions,
    output_dir: &Path,
) -> Result<SaveResult> {
    ensure_dir(output_dir)?;
    let archive = output_dir.join(ARCHIVE_NAME);
    let result = checkpoint(opts, &archive)?;
    store.save(run, &archive, UploadPolicy::Now)?;

    if let Some(ref packages) = opts.save.packages {
        let path = output_dir.join(PACKAGES_NAME);
        std::fs::write(&path, packages)
            .with_context(|| format!("failed to write {}", path.display()))?;
        store.save(run, &path, UploadPolicy::Now)?;
    }

    tracing::info!("Saved {} to run {}", ARCHIVE_NAME, run);
    Ok(result)
}

/// Download `filename` from `run` to `output`.
///
/// Without `output` the file lands in a fresh temporary `.zip` that is left
/// for the caller to clean up. Returns the final path.
pub fn download_from_store(
    store: &dyn RunStore,
    run: &str,
    filename: &str,
    output: Option<&Path>,
) -> Result<PathBuf> {
    let staging = tempfile::tempdir().context("failed to create temporary directory")?;
    let fetched = store.fetch(run, filename, staging.path())?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => {
            let tmp = tempfile::Builder::new()
                .prefix("codebase")
                .suffix(".zip")
                .tempfile()
                .context("failed to create temporary file")?;
            let (_, path) = tmp.keep().context("failed to keep temporary file")?;
            path
        }
    };
    copy_file(&fetched, &output)?;
    tracing::info!("Downloaded {} from run {} to {}", filename, run, output.display());
    Ok(output)
}
