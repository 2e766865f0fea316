//! Implementation of `codesave make-pyz` and `codesave run`.

use std::path::Path;
use std::process::Output;

use anyhow::{bail, Context, Result};

use crate::core::archive::{read_entries, ArchiveWriter, ENTRY_POINT_NAME};
use crate::core::entrypoint::{run_module_stub, Launcher};
use crate::util::fs::absolute;
use crate::util::process::{find_python, ProcessBuilder};

/// Replace the archive's entry point with the one `launcher` describes.
///
/// The archive is rewritten without its old `__main__.py` and the new entry
/// point appended; the original file is replaced only once the rewrite
/// succeeded.
pub fn make_executable(archive: &Path, launcher: &Launcher) -> Result<()> {
    let archive = absolute(archive)?;
    let entries = read_entries(&archive)?;

    let entry_point = match launcher {
        Launcher::File(path) => std::fs::read(path)
            .with_context(|| format!("failed to read main file: {}", path.display()))?,
        Launcher::Member(member) => match entries.iter().find(|e| &e.path == member) {
            Some(entry) if !entry.is_dir() => entry.content.clone(),
            _ => bail!("`{}` is not a file in {}", member, archive.display()),
        },
        Launcher::Module(module) => run_module_stub(module)?.into_bytes(),
    };

    let mut writer = ArchiveWriter::create(&archive)?;
    for entry in entries.iter().filter(|e| e.path != ENTRY_POINT_NAME) {
        writer.add_entry(entry)?;
    }
    if entries.iter().any(|e| e.path == ENTRY_POINT_NAME) {
        tracing::debug!("Replacing existing {}", ENTRY_POINT_NAME);
    }
    writer.add_file(ENTRY_POINT_NAME, &entry_point)?;
    writer.finish()?;

    tracing::info!("Wrote entry point of {}", archive.display());
    Ok(())
}

/// Run `python <archive> args...` and capture its output.
pub fn run_archive<S: AsRef<str>>(
    archive: &Path,
    args: &[S],
    python: Option<&Path>,
) -> Result<Output> {
    let archive = absolute(archive)?;
    if !archive.is_file() {
        bail!("archive does not exist: {}", archive.display());
    }
    let python = find_python(python).context("no Python interpreter found on PATH")?;

    let process = ProcessBuilder::new(&python)
        .arg(&archive)
        .args(args.iter().map(|a| a.as_ref()));
    tracing::debug!("Running {}", process.display_command());
    process.exec()
}
