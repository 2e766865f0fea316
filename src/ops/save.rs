//! Implementation of `codesave save`.
//!
//! Copies a set of files and directories into a staging directory, records
//! the library manifest (and optionally a dependency snapshot and a default
//! entry point), and serializes the staging directory into a zip archive.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::core::archive::{
    encode_manifest, ArchiveWriter, ENTRY_POINT_NAME, MANIFEST_NAME, PACKAGES_NAME,
};
use crate::core::entrypoint::DEFAULT_ENTRY_POINT;
use crate::core::filter::{Filters, IgnoreFilter};
use crate::core::library::{discover, discover_paths};
use crate::util::fs::{absolute, copy_dir_filtered, copy_file};
use crate::util::process::{find_python, pip_freeze};

/// One path to archive, with the filter applied while copying it.
#[derive(Clone)]
pub struct SaveInput {
    /// File or directory to copy; lands at the archive root under its name.
    pub path: PathBuf,

    /// Filter for this input; `None` applies only the always-on exclusions.
    pub filter: Option<Arc<dyn IgnoreFilter>>,
}

impl std::fmt::Debug for SaveInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveInput")
            .field("path", &self.path)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl SaveInput {
    /// An input with no extra filtering.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SaveInput {
            path: path.into(),
            filter: None,
        }
    }

    /// Attach a filter.
    pub fn with_filter(mut self, filter: Arc<dyn IgnoreFilter>) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Options for building an archive.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Library names to record; discovered from the staged tree when `None`.
    pub library_names: Option<BTreeSet<String>>,

    /// Write the default `__main__.py` when the inputs do not provide one.
    pub inject_entry_point: bool,

    /// Dependency snapshot stored as `packages.txt`.
    pub packages: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            library_names: None,
            inject_entry_point: true,
            packages: None,
        }
    }
}

impl SaveOptions {
    /// Set explicit library names.
    pub fn with_library_names(mut self, names: BTreeSet<String>) -> Self {
        self.library_names = Some(names);
        self
    }

    /// Set whether the default entry point is injected.
    pub fn with_entry_point(mut self, inject: bool) -> Self {
        self.inject_entry_point = inject;
        self
    }

    /// Attach a dependency snapshot.
    pub fn with_packages(mut self, packages: Option<String>) -> Self {
        self.packages = packages;
        self
    }
}

/// Result of building an archive.
#[derive(Debug, Clone)]
pub struct SaveResult {
    /// Where the archive was written
    pub output: PathBuf,

    /// Library names recorded in the manifest
    pub library_names: BTreeSet<String>,

    /// Number of files copied from the inputs
    pub files: usize,
}

/// Build an archive from `inputs` at `output`.
///
/// Any unreadable input aborts the build; nothing is left at `output` unless
/// the whole archive was written.
pub fn create_archive(inputs: &[SaveInput], output: &Path, opts: &SaveOptions) -> Result<SaveResult> {
    let output = absolute(output)?;
    let staging = tempfile::tempdir().context("failed to create staging directory")?;
    let default_filter = Filters::new();
    let mut files = 0;

    for input in inputs {
        let source = absolute(&input.path)?;
        let source = source
            .canonicalize()
            .with_context(|| format!("input path does not exist: {}", source.display()))?;
        let name = source
            .file_name()
            .with_context(|| format!("input path has no file name: {}", source.display()))?;
        let target = staging.path().join(name);
        let filter: &dyn IgnoreFilter = match &input.filter {
            Some(f) => f.as_ref(),
            None => &default_filter,
        };

        let parent = source.parent().unwrap_or(Path::new("/"));
        let file_name = [name.to_string_lossy().into_owned()];
        let excluded = !filter.ignored(parent, &file_name).is_empty()
            || !default_filter.ignored(parent, &file_name).is_empty();
        if excluded {
            tracing::debug!("Skipping {}", source.display());
            continue;
        }

        tracing::info!("Copying code from {} to {}", source.display(), target.display());

        if source.is_dir() {
            files += copy_dir_filtered(&source, &target, filter)?;
        } else {
            copy_file(&source, &target)?;
            files += 1;
        }
    }

    let library_names = match &opts.library_names {
        Some(names) => names.clone(),
        None => discover(staging.path())?,
    };
    tracing::info!(
        "Found libraries: {}",
        library_names.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    let manifest_path = staging.path().join(MANIFEST_NAME);
    if manifest_path.exists() {
        tracing::warn!("Replacing `{}` from the inputs with the library manifest", MANIFEST_NAME);
    }
    std::fs::write(&manifest_path, encode_manifest(&library_names)?)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;

    if let Some(ref packages) = opts.packages {
        std::fs::write(staging.path().join(PACKAGES_NAME), packages)
            .with_context(|| format!("failed to write {}", PACKAGES_NAME))?;
    }

    let entry_point = staging.path().join(ENTRY_POINT_NAME);
    if opts.inject_entry_point && !entry_point.exists() {
        tracing::debug!("Adding default {}", ENTRY_POINT_NAME);
        std::fs::write(&entry_point, DEFAULT_ENTRY_POINT)
            .with_context(|| format!("failed to write {}", ENTRY_POINT_NAME))?;
    }

    tracing::info!("Creating zip file at {}", output.display());
    let mut writer = ArchiveWriter::create(&output)?;
    writer.add_dir_all(staging.path())?;
    writer.finish()?;

    Ok(SaveResult {
        output,
        library_names,
        files,
    })
}

/// Options for snapshotting a whole codebase.
#[derive(Clone, Default)]
pub struct CheckpointOptions {
    /// Main codebase directory; every top-level entry is archived.
    pub main_folder: Option<PathBuf>,

    /// Extra search roots; their libraries are archived too.
    pub extra_pythonpath: Vec<PathBuf>,

    /// Individual library files or directories to add.
    pub extra_libraries: Vec<PathBuf>,

    /// Filter applied to every input.
    pub filter: Option<Arc<dyn IgnoreFilter>>,

    /// Archive settings.
    pub save: SaveOptions,
}

impl std::fmt::Debug for CheckpointOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointOptions")
            .field("main_folder", &self.main_folder)
            .field("extra_pythonpath", &self.extra_pythonpath)
            .field("extra_libraries", &self.extra_libraries)
            .field("filtered", &self.filter.is_some())
            .field("save", &self.save)
            .finish()
    }
}

/// Snapshot a codebase and its extra libraries into `output`.
///
/// Libraries are discovered in every extra search root and then in the main
/// folder, later roots overriding earlier ones; explicit extra libraries
/// override all of them. The main folder contributes every top-level entry,
/// not only its libraries.
pub fn checkpoint(opts: &CheckpointOptions, output: &Path) -> Result<SaveResult> {
    if opts.main_folder.is_none() && opts.extra_libraries.is_empty() {
        bail!("nothing to save: pass a codebase directory or at least one extra library");
    }

    let mut libraries: BTreeMap<String, PathBuf> = BTreeMap::new();
    for root in &opts.extra_pythonpath {
        libraries.extend(discover_paths(root)?);
    }
    if let Some(ref main) = opts.main_folder {
        libraries.extend(discover_paths(main)?);
    }
    for lib in &opts.extra_libraries {
        let path = absolute(lib)?
            .canonicalize()
            .with_context(|| format!("extra library does not exist: {}", lib.display()))?;
        let name = if path.is_dir() {
            path.file_name()
        } else {
            path.file_stem()
        }
        .with_context(|| format!("extra library has no name: {}", path.display()))?
        .to_string_lossy()
        .into_owned();
        libraries.insert(name, path);
    }

    let mut paths: Vec<PathBuf> = libraries.values().cloned().collect();
    if let Some(ref main) = opts.main_folder {
        let main = absolute(main)?
            .canonicalize()
            .with_context(|| format!("codebase root does not exist: {}", main.display()))?;
        let mut top_level: Vec<PathBuf> = std::fs::read_dir(&main)
            .with_context(|| format!("failed to read directory: {}", main.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        top_level.sort();
        paths.extend(top_level);
    }

    let mut seen = HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));

    tracing::debug!("All files: {:?}", paths);
    tracing::debug!("All libs: {:?}", libraries.keys().collect::<Vec<_>>());

    let inputs: Vec<SaveInput> = paths
        .into_iter()
        .map(|path| SaveInput {
            path,
            filter: opts.filter.clone(),
        })
        .collect();

    let save = opts
        .save
        .clone()
        .with_library_names(libraries.into_keys().collect());
    create_archive(&inputs, output, &save)
}

/// Snapshot the installed packages of the Python environment, if possible.
pub fn snapshot_packages(python: Option<&Path>) -> Option<String> {
    let Some(python) = find_python(python) else {
        tracing::warn!("No Python interpreter found; skipping {}", PACKAGES_NAME);
        return None;
    };
    match pip_freeze(&python) {
        Ok(packages) => Some(packages),
        Err(e) => {
            tracing::warn!("Failed to record installed packages: {:#}", e);
            None
        }
    }
}
