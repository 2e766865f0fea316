//! `codesave make-pyz` command

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::cli::MakePyzArgs;
use codesave::core::entrypoint::Launcher;
use codesave::core::filter::IgnoreFilter;
use codesave::ops::{checkpoint, make_executable, CheckpointOptions, SaveOptions};
use codesave::util::fs::{copy_file, relative_path};
use codesave::util::GlobalContext;

/// `project/` becomes `project.pyz` next to it.
fn default_output(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "codebase".to_string());
    dir.with_file_name(format!("{}.pyz", name))
}

pub fn execute(args: MakePyzArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let config = ctx.config();

    let launcher = Launcher::from_options(
        args.main_file.map(|p| ctx.resolve(&p)),
        args.main_member,
        args.module,
    )?;
    let input = ctx.resolve(&args.input);
    let output = args.output.map(|p| ctx.resolve(&p));

    let archive = if input.is_dir() {
        let filter: Arc<dyn IgnoreFilter> = Arc::new(config.save.filters()?);
        let archive = output.unwrap_or_else(|| default_output(&input));
        let opts = CheckpointOptions {
            main_folder: Some(input),
            filter: Some(filter),
            save: SaveOptions::default().with_entry_point(false),
            ..Default::default()
        };
        checkpoint(&opts, &archive)?;
        archive
    } else if input.is_file() {
        match output {
            Some(output) if output != input => {
                copy_file(&input, &output)?;
                output
            }
            _ => input,
        }
    } else {
        bail!("input does not exist: {}", input.display());
    };

    make_executable(&archive, &launcher)?;
    eprintln!("     Created {}", relative_path(ctx.cwd(), &archive).display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("/work/project")),
            PathBuf::from("/work/project.pyz")
        );
    }
}
