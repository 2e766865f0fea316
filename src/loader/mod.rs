//! Importing from archives at runtime.
//!
//! A [`ModuleResolver`] models the interpreter's module search path. A
//! [`Codebase`] mounts a plain archive on it directly; a [`UniqueCodebase`]
//! namespaces the archive first, so any number of codebases (including
//! copies of the same archive) can be mounted at once.

pub mod codebase;
pub mod module;
pub mod resolver;
mod scanner;

use std::path::PathBuf;

use thiserror::Error;

use crate::core::library::NameError;

pub use codebase::{Binding, Codebase, Importer, UniqueCodebase, UniqueOptions};
pub use module::{Module, ModuleKind, Value};
pub use resolver::ModuleResolver;

/// Errors raised while importing from a mounted archive.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("no module named `{name}`")]
    ModuleNotFound { name: String },

    #[error("module `{module}` has no attribute `{attribute}`")]
    AttributeNotFound { module: String, attribute: String },

    #[error("{} is not mounted", path.display())]
    NotMounted { path: PathBuf },

    #[error("{} is not a namespaced archive", path.display())]
    NotNamespaced { path: PathBuf },

    #[error("prefix `{prefix}` is already in use by another codebase")]
    PrefixInUse { prefix: String },

    #[error("invalid module name: {0}")]
    InvalidName(#[from] NameError),

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive {}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
