//! Core data structures and algorithms for codesave.
//!
//! This module contains the pieces the operations are built from:
//! - Library discovery and name validation
//! - The import rewriter
//! - Copy filters
//! - The zip archive container
//! - Archive entry points

pub mod archive;
pub mod entrypoint;
pub mod filter;
pub mod library;
pub mod rewrite;

pub use archive::{
    ArchiveEntry, ArchiveInfo, ArchiveWriter, ENTRY_POINT_NAME, MANIFEST_NAME, PACKAGES_NAME,
};
pub use entrypoint::{Launcher, LauncherError, DEFAULT_ENTRY_POINT};
pub use filter::{parse_size, Filter, Filters, IgnoreFilter, SizeParseError};
pub use library::{discover, discover_paths, NameError, PACKAGE_MARKER};
pub use rewrite::ImportRewriter;
