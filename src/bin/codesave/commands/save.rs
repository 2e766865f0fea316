//! `codesave save` command

use std::sync::Arc;

use anyhow::Result;

use crate::cli::SaveArgs;
use codesave::core::filter::IgnoreFilter;
use codesave::ops::{checkpoint, snapshot_packages, CheckpointOptions, SaveOptions};
use codesave::util::fs::relative_path;
use codesave::util::GlobalContext;

pub fn execute(args: SaveArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let config = ctx.config();

    // Flags override configuration
    let mut save = config.save;
    if args.only_py {
        save.only_py = true;
    }
    if args.ignore_larger_than.is_some() {
        save.ignore_larger_than = args.ignore_larger_than;
    }
    if !args.exclude.is_empty() {
        save.exclude = args.exclude;
    }
    if !args.extra_pythonpath.is_empty() {
        save.extra_pythonpath = args.extra_pythonpath;
    }
    if args.record_packages {
        save.record_packages = true;
    }
    if args.no_main {
        save.main = false;
    }

    // Bad filter settings fail before anything is read
    let filter: Arc<dyn IgnoreFilter> = Arc::new(save.filters()?);

    let packages = if save.record_packages {
        snapshot_packages(config.pyz.python.as_deref())
    } else {
        None
    };

    let opts = CheckpointOptions {
        main_folder: args.codebase.map(|p| ctx.resolve(&p)),
        extra_pythonpath: save.extra_pythonpath.iter().map(|p| ctx.resolve(p)).collect(),
        extra_libraries: args.extra_libraries.iter().map(|p| ctx.resolve(p)).collect(),
        filter: Some(filter),
        save: SaveOptions::default()
            .with_entry_point(save.main)
            .with_packages(packages),
    };

    let output = ctx.resolve(&args.output);
    let result = checkpoint(&opts, &output)?;

    eprintln!(
        "       Saved {} files ({} libraries) to {}",
        result.files,
        result.library_names.len(),
        relative_path(ctx.cwd(), &result.output).display()
    );

    Ok(())
}
