//! Zip archive container.
//!
//! Archives are deflate-compressed zip files with `/`-separated entry names.
//! Three entry names are reserved:
//!
//! - `library_names.json` - JSON list of the archive's library names
//! - `packages.txt` - optional snapshot of the building environment
//! - `__main__.py` - optional entry point run by `python archive.pyz`
//!
//! All writes go through [`ArchiveWriter`], which builds the archive in a
//! temporary file next to the destination and renames it into place only
//! when [`ArchiveWriter::finish`] succeeds.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::filter::is_always_ignored;
use crate::core::library::{is_source_path, library_names_from_entries};

/// Entry holding the JSON library manifest.
pub const MANIFEST_NAME: &str = "library_names.json";

/// Entry holding the dependency snapshot.
pub const PACKAGES_NAME: &str = "packages.txt";

/// Entry point run when the archive is executed.
pub const ENTRY_POINT_NAME: &str = "__main__.py";

/// A single archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative `/`-separated path; directories end with `/`.
    pub path: String,
    /// Raw bytes (empty for directories).
    pub content: Vec<u8>,
}

impl ArchiveEntry {
    /// Create a file entry.
    pub fn file(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        ArchiveEntry {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Whether this entry is Python source, judged by extension.
    pub fn is_source(&self) -> bool {
        !self.is_dir() && is_source_path(&self.path)
    }
}

fn open(path: &Path) -> Result<ZipArchive<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open archive: {}", path.display()))?;
    ZipArchive::new(file).with_context(|| format!("not a valid zip archive: {}", path.display()))
}

/// List entry names in archive order.
pub fn entry_names(path: &Path) -> Result<Vec<String>> {
    let mut archive = open(path)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive
            .by_index_raw(i)
            .with_context(|| format!("failed to read entry #{} of {}", i, path.display()))?;
        names.push(file.name().to_string());
    }
    Ok(names)
}

/// Read every entry into memory, in archive order.
pub fn read_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open(path)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("failed to read entry #{} of {}", i, path.display()))?;
        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)
            .with_context(|| format!("failed to read `{}` from {}", file.name(), path.display()))?;
        entries.push(ArchiveEntry {
            path: file.name().to_string(),
            content,
        });
    }
    Ok(entries)
}

/// Read a single entry by name, if present.
pub fn read_entry(path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = open(path)?;
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read `{}` from {}", name, path.display()))
        }
    };
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(Some(content))
}

/// Encode a library manifest as JSON.
pub fn encode_manifest(names: &BTreeSet<String>) -> Result<Vec<u8>> {
    let list: Vec<&String> = names.iter().collect();
    serde_json::to_vec(&list).context("failed to serialize library manifest")
}

/// Decode a JSON library manifest.
pub fn decode_manifest(bytes: &[u8]) -> Result<BTreeSet<String>> {
    let list: Vec<String> =
        serde_json::from_slice(bytes).context("failed to parse library manifest")?;
    Ok(list.into_iter().collect())
}

/// Read the library manifest stored at `entry` (e.g. `library_names.json`
/// or `<prefix>/library_names.json`).
pub fn read_manifest(path: &Path, entry: &str) -> Result<Option<BTreeSet<String>>> {
    read_entry(path, entry)?
        .map(|bytes| decode_manifest(&bytes))
        .transpose()
        .with_context(|| format!("invalid manifest `{}` in {}", entry, path.display()))
}

/// Detect the namespace prefix of an archive from its entry names.
///
/// An archive is namespaced when it has no root manifest and every entry
/// lives below one top-level directory that holds the manifest.
pub fn namespace_prefix<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut prefix: Option<&str> = None;
    let mut has_nested_manifest = false;

    for name in names {
        if name == MANIFEST_NAME {
            return None;
        }
        let (first, rest) = name.split_once('/')?;
        match prefix {
            Some(p) if p != first => return None,
            _ => prefix = Some(first),
        }
        if rest == MANIFEST_NAME {
            has_nested_manifest = true;
        }
    }

    prefix.filter(|_| has_nested_manifest).map(str::to_string)
}

/// Summary of an archive's layout.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Entry names in archive order.
    pub entries: Vec<String>,
    /// Library names from the manifest, or derived from the entries.
    pub library_names: BTreeSet<String>,
    /// Whether the library names came from a manifest.
    pub has_manifest: bool,
    /// The namespace prefix, for namespaced archives.
    pub prefix: Option<String>,
    /// Whether the archive has an entry point.
    pub has_entry_point: bool,
}

impl ArchiveInfo {
    /// Inspect an archive.
    pub fn read(path: &Path) -> Result<Self> {
        let entries = entry_names(path)?;
        let prefix = namespace_prefix(entries.iter().map(String::as_str));

        let (manifest_entry, depth) = match &prefix {
            Some(p) => (format!("{}/{}", p, MANIFEST_NAME), 1),
            None => (MANIFEST_NAME.to_string(), 0),
        };
        let manifest = read_manifest(path, &manifest_entry)?;
        let has_manifest = manifest.is_some();
        let library_names = manifest.unwrap_or_else(|| {
            library_names_from_entries(entries.iter().map(String::as_str), depth)
        });

        Ok(ArchiveInfo {
            has_entry_point: entries.iter().any(|e| e == ENTRY_POINT_NAME),
            entries,
            library_names,
            has_manifest,
            prefix,
        })
    }
}

/// Writes a zip archive atomically.
pub struct ArchiveWriter {
    zip: ZipWriter<NamedTempFile>,
    destination: PathBuf,
    names: HashSet<String>,
    order: Vec<String>,
}

impl ArchiveWriter {
    /// Start writing an archive that will end up at `destination`.
    pub fn create(destination: &Path) -> Result<Self> {
        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;

        let tmp = NamedTempFile::new_in(&parent).with_context(|| {
            format!("failed to create temporary archive in {}", parent.display())
        })?;

        Ok(ArchiveWriter {
            zip: ZipWriter::new(tmp),
            destination: destination.to_path_buf(),
            names: HashSet::new(),
            order: Vec::new(),
        })
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Whether an entry with this name was already written.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Names written so far, in order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    fn claim(&mut self, name: &str) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            bail!("duplicate archive entry `{}`", name);
        }
        self.order.push(name.to_string());
        Ok(())
    }

    /// Add a file entry.
    pub fn add_file(&mut self, name: &str, content: &[u8]) -> Result<()> {
        self.claim(name)?;
        self.zip
            .start_file(name, Self::options())
            .with_context(|| format!("failed to add `{}` to archive", name))?;
        self.zip.write_all(content)?;
        Ok(())
    }

    /// Add a directory entry. The name must end with `/`.
    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        self.claim(name)?;
        self.zip
            .add_directory(name.trim_end_matches('/'), Self::options())
            .with_context(|| format!("failed to add directory `{}` to archive", name))?;
        Ok(())
    }

    /// Add an entry, dispatching on whether it is a directory.
    pub fn add_entry(&mut self, entry: &ArchiveEntry) -> Result<()> {
        if entry.is_dir() {
            self.add_directory(&entry.path)
        } else {
            self.add_file(&entry.path, &entry.content)
        }
    }

    /// Add every file and directory below `root`, named relative to it.
    ///
    /// Hidden files and compiled caches are skipped regardless of how the
    /// directory was produced.
    pub fn add_dir_all(&mut self, root: &Path) -> Result<()> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_always_ignored(&e.file_name().to_string_lossy()));

        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_dir() {
                self.add_directory(&format!("{}/", name))?;
            } else {
                let content = std::fs::read(entry.path())
                    .with_context(|| format!("failed to read file: {}", entry.path().display()))?;
                self.add_file(&name, &content)?;
            }
        }
        Ok(())
    }

    /// Finish the archive and move it into place.
    pub fn finish(self) -> Result<()> {
        let tmp = self
            .zip
            .finish()
            .with_context(|| format!("failed to finalize archive {}", self.destination.display()))?;
        tmp.persist(&self.destination)
            .with_context(|| format!("failed to write archive: {}", self.destination.display()))?;
        tracing::debug!(
            "Wrote {} entries to {}",
            self.order.len(),
            self.destination.display()
        );
        Ok(())
    }
}
