//! Implementation of `codesave unique`.
//!
//! Relocates every entry of an archive under a fresh prefix directory and
//! rewrites the imports of its libraries so the nested copy keeps working
//! when several copies are mounted side by side.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::core::archive::{
    decode_manifest, encode_manifest, namespace_prefix, read_entries, ArchiveEntry, ArchiveWriter,
    MANIFEST_NAME,
};
use crate::core::library::{
    is_source_path, library_names_from_entries, validate_segment, NameError, PACKAGE_MARKER,
};
use crate::core::rewrite::ImportRewriter;
use crate::util::fs::absolute;

/// Errors specific to namespacing.
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("invalid namespace prefix `{prefix}`: {source}")]
    InvalidPrefix {
        prefix: String,
        #[source]
        source: NameError,
    },

    #[error("archive is already namespaced under `{prefix}` (allow nesting to namespace it again)")]
    AlreadyNamespaced { prefix: String },

    #[error("entry `{entry}` is not valid UTF-8 text")]
    Undecodable { entry: String },
}

/// Options for namespacing an archive.
#[derive(Debug, Clone)]
pub struct NamespaceOptions {
    /// Prefix to nest under; a timestamped one is generated when `None`.
    pub prefix: Option<String>,

    /// Libraries to rewrite; read from the manifest when `None`.
    pub library_names: Option<BTreeSet<String>>,

    /// Copy non-source entries unchanged instead of rewriting them.
    pub save_non_code: bool,

    /// Insert package markers along every source entry's path.
    pub add_init: bool,

    /// Accept an input that is already namespaced.
    pub allow_nested: bool,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        NamespaceOptions {
            prefix: None,
            library_names: None,
            save_non_code: true,
            add_init: true,
            allow_nested: false,
        }
    }
}

impl NamespaceOptions {
    /// Set an explicit prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set explicit library names.
    pub fn with_library_names(mut self, names: BTreeSet<String>) -> Self {
        self.library_names = Some(names);
        self
    }
}

/// Result of namespacing an archive.
#[derive(Debug, Clone)]
pub struct NamespaceResult {
    /// Where the namespaced archive was written
    pub output: PathBuf,

    /// The prefix every entry now lives under
    pub prefix: String,

    /// Libraries whose imports were rewritten
    pub library_names: BTreeSet<String>,

    /// Number of package markers inserted
    pub markers: usize,
}

/// Generate a prefix from the current local time, e.g. `codebase_20240131093000`.
pub fn default_prefix() -> String {
    format!("codebase_{}", chrono::Local::now().format("%Y%m%d%H%M%S"))
}

/// Namespace the archive at `input` into `output`.
///
/// `input` and `output` may be the same path; the input is read completely
/// before the output is moved into place.
pub fn namespace(input: &Path, output: &Path, opts: &NamespaceOptions) -> Result<NamespaceResult> {
    let prefix = opts.prefix.clone().unwrap_or_else(default_prefix);
    validate_segment(&prefix).map_err(|source| NamespaceError::InvalidPrefix {
        prefix: prefix.clone(),
        source,
    })?;

    let entries = read_entries(input)?;

    if let Some(existing) = namespace_prefix(entries.iter().map(|e| e.path.as_str())) {
        if !opts.allow_nested {
            return Err(NamespaceError::AlreadyNamespaced { prefix: existing }.into());
        }
        tracing::warn!(
            "Nesting prefix `{}` inside existing prefix `{}`",
            prefix,
            existing
        );
    }

    let manifest = entries
        .iter()
        .find(|e| e.path == MANIFEST_NAME)
        .map(|e| decode_manifest(&e.content))
        .transpose()
        .with_context(|| format!("invalid manifest in {}", input.display()))?;
    let has_manifest = manifest.is_some();
    let library_names = match (&opts.library_names, manifest) {
        (Some(names), _) => names.clone(),
        (None, Some(names)) => names,
        (None, None) => library_names_from_entries(entries.iter().map(|e| e.path.as_str()), 0),
    };

    tracing::info!("Adding prefix {}", prefix);
    tracing::debug!(
        "Rewriting imports of {}",
        library_names.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    let rewriter = ImportRewriter::with_prefix(&library_names, &prefix);
    let output = absolute(output)?;
    let mut writer = ArchiveWriter::create(&output)?;

    for entry in &entries {
        let path = format!("{}/{}", prefix, entry.path);
        if entry.is_dir() || (opts.save_non_code && !entry.is_source()) {
            writer.add_entry(&ArchiveEntry::file(path, entry.content.clone()))?;
            continue;
        }

        let text = std::str::from_utf8(&entry.content).map_err(|_| NamespaceError::Undecodable {
            entry: entry.path.clone(),
        })?;
        writer.add_file(&path, rewriter.rewrite(text).as_bytes())?;
    }

    let mut markers = 0;
    if opts.add_init {
        for marker in missing_markers(writer.names()) {
            tracing::debug!("Adding marker {}", marker);
            writer.add_file(&marker, b"")?;
            markers += 1;
        }
    }

    if !has_manifest {
        writer.add_file(
            &format!("{}/{}", prefix, MANIFEST_NAME),
            &encode_manifest(&library_names)?,
        )?;
    }

    writer.finish()?;

    Ok(NamespaceResult {
        output,
        prefix,
        library_names,
        markers,
    })
}

/// Package markers needed so every source entry sits in an importable chain.
///
/// For `ns/a/b/m.py` the directories `ns` and `ns/a` need markers; the
/// entry's own directory is left alone.
fn missing_markers(names: &[String]) -> BTreeSet<String> {
    let existing: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    let mut needed = BTreeSet::new();

    for name in names.iter().filter(|n| is_source_path(n)) {
        let parts: Vec<&str> = name.split('/').collect();
        for i in 1..parts.len().saturating_sub(1) {
            let marker = format!("{}/{}", parts[..i].join("/"), PACKAGE_MARKER);
            if !existing.contains(marker.as_str()) {
                needed.insert(marker);
            }
        }
    }
    needed
}
