//! codesave - Snapshot Python codebases into portable zip archives
//!
//! This crate provides the core library functionality for codesave:
//! building archives from source trees, namespacing them so several copies
//! can be imported side by side, importing from mounted archives, and
//! turning archives into self-running programs.

pub mod core;
pub mod loader;
pub mod ops;
pub mod util;

pub use core::{
    archive::ArchiveInfo, entrypoint::Launcher, filter::Filter, filter::Filters,
    rewrite::ImportRewriter,
};

pub use loader::{Codebase, ImportError, Importer, ModuleResolver, UniqueCodebase};
pub use util::context::GlobalContext;
