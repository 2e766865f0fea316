//! `codesave download` command

use anyhow::Result;

use crate::cli::DownloadArgs;
use codesave::ops::{download_from_store, DirectoryStore};
use codesave::util::GlobalContext;

pub fn execute(args: DownloadArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;

    let store = DirectoryStore::new(ctx.resolve(&args.store));
    let output = args.output.map(|p| ctx.resolve(&p));
    let path = download_from_store(&store, &args.run, &args.filename, output.as_deref())?;

    eprintln!("  Downloaded {} from run `{}`", args.filename, args.run);
    println!("{}", path.display());

    Ok(())
}
