//! `codesave unique` command

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::cli::UniqueArgs;
use codesave::ops::{namespace, NamespaceOptions};
use codesave::util::GlobalContext;

/// `code.zip` becomes `code_unique.zip` next to it.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "codebase".to_string());
    input.with_file_name(format!("{}_unique.zip", stem))
}

pub fn execute(args: UniqueArgs) -> Result<()> {
    let ctx = GlobalContext::new()?;
    let config = ctx.config().unique;

    let input = ctx.resolve(&args.input);
    let output = match args.output {
        Some(ref path) => ctx.resolve(path),
        None => default_output(&input),
    };

    let opts = NamespaceOptions {
        prefix: args.prefix,
        library_names: None,
        save_non_code: config.save_non_code && !args.rewrite_non_code,
        add_init: config.add_init && !args.no_init,
        allow_nested: args.allow_nested,
    };

    let result = namespace(&input, &output, &opts)?;

    eprintln!(
        "     Created {} (prefix `{}`)",
        result.output.display(),
        result.prefix
    );
    println!("{}", result.prefix);

    Ok(())
}
