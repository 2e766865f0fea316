//! `codesave extract` command

use anyhow::Result;

use crate::cli::ExtractArgs;
use codesave::ops::{extract, ExtractOptions};
use codesave::util::GlobalContext;

pub fn execute(args: ExtractArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;

    let archive = ctx.resolve(&args.archive);
    let destination = match args.output {
        Some(ref path) => ctx.resolve(path),
        None => archive.with_extension(""),
    };

    let opts = ExtractOptions {
        keep_metadata: args.keep_metadata,
    };
    let result = extract(&archive, &destination, &opts)?;

    eprintln!(
        "   Extracted {} files to {}",
        result.files,
        result.destination.display()
    );

    Ok(())
}
