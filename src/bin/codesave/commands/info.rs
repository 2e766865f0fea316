//! `codesave info` command

use anyhow::Result;

use crate::cli::InfoArgs;
use codesave::core::archive::ArchiveInfo;
use codesave::util::GlobalContext;

pub fn execute(args: InfoArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let archive = ctx.resolve(&args.archive);
    let info = ArchiveInfo::read(&archive)?;

    println!("archive: {}", archive.display());
    match info.prefix {
        Some(ref prefix) => println!("prefix: {}", prefix),
        None => println!("prefix: (none)"),
    }

    let source = if info.has_manifest {
        "manifest"
    } else {
        "derived"
    };
    let libraries = info.library_names.iter().cloned().collect::<Vec<_>>();
    println!("libraries ({}): {}", source, libraries.join(", "));
    println!(
        "entry point: {}",
        if info.has_entry_point { "yes" } else { "no" }
    );
    println!("entries: {}", info.entries.len());

    if args.entries {
        for entry in &info.entries {
            println!("  {}", entry);
        }
    }

    Ok(())
}
