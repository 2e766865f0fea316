//! Archive entry points (`__main__.py`).

use std::path::PathBuf;

use thiserror::Error;

use crate::core::library::{validate_module_name, NameError};

/// Entry point written into archives that do not bring their own.
///
/// `python codebase.zip pkg.mod:main` calls `pkg.mod.main()`;
/// `python codebase.zip pkg.mod` runs `pkg.mod` as `__main__`;
/// `python codebase.zip pkg/mod.py` runs the file if it exists on disk and
/// otherwise the module of that path inside the archive.
pub const DEFAULT_ENTRY_POINT: &str = r#"import importlib
import os
import runpy
import sys


def _dispatch():
    if len(sys.argv) < 2:
        sys.exit("usage: python <archive> module[:function] | path/to/script.py [args...]")
    target = sys.argv[1]
    sys.argv = sys.argv[1:]
    if ":" in target:
        module_name, function_name = target.split(":", 1)
        module = importlib.import_module(module_name)
        return getattr(module, function_name)()
    if target.endswith(".py"):
        if os.path.exists(target):
            runpy.run_path(target, run_name="__main__")
            return None
        target = target[: -len(".py")].replace("/", ".")
    runpy.run_module(target, run_name="__main__", alter_sys=True)
    return None


_dispatch()
"#;

/// Two-statement stub that runs `module` as the program's top-level module.
pub fn run_module_stub(module: &str) -> Result<String, NameError> {
    validate_module_name(module)?;
    Ok(format!(
        "import runpy\nrunpy.run_module(\"{}\", run_name=\"__main__\", alter_sys=True)\n",
        module
    ))
}

/// Usage errors when choosing a launcher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LauncherError {
    #[error("no launcher given: pass exactly one of a main file, an archive member, or a module")]
    Missing,

    #[error("conflicting launchers: pass exactly one of a main file, an archive member, or a module (got {given})")]
    Conflicting { given: String },

    #[error("invalid launcher module: {0}")]
    InvalidModule(#[from] NameError),
}

/// Where the new entry point comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// Bytes of a file outside the archive.
    File(PathBuf),
    /// Bytes of an existing archive member, copied to the entry point.
    Member(String),
    /// A stub that runs the named module.
    Module(String),
}

impl Launcher {
    /// Build a launcher from mutually exclusive options.
    pub fn from_options(
        file: Option<PathBuf>,
        member: Option<String>,
        module: Option<String>,
    ) -> Result<Self, LauncherError> {
        let given: Vec<&str> = [
            file.as_ref().map(|_| "main file"),
            member.as_ref().map(|_| "member"),
            module.as_ref().map(|_| "module"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if given.len() > 1 {
            return Err(LauncherError::Conflicting {
                given: given.join(", "),
            });
        }

        match (file, member, module) {
            (Some(path), None, None) => Ok(Launcher::File(path)),
            (None, Some(member), None) => Ok(Launcher::Member(member)),
            (None, None, Some(module)) => {
                validate_module_name(&module)?;
                Ok(Launcher::Module(module))
            }
            _ => Err(LauncherError::Missing),
        }
    }
}
