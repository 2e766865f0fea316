//! `codesave run` command

use std::io::Write;

use anyhow::{bail, Result};

use crate::cli::RunArgs;
use codesave::ops::run_archive;
use codesave::util::GlobalContext;

pub fn execute(args: RunArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let python = args
        .python
        .map(|p| ctx.resolve(&p))
        .or(ctx.config().pyz.python);

    let archive = ctx.resolve(&args.archive);
    let output = run_archive(&archive, &args.args, python.as_deref())?;

    std::io::stdout().write_all(&output.stdout)?;
    std::io::stderr().write_all(&output.stderr)?;

    if !output.status.success() {
        bail!(
            "`{}` exited with code {:?}",
            archive.display(),
            output.status.code()
        );
    }

    Ok(())
}
