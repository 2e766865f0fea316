//! High-level operations.
//!
//! This module contains the implementation of codesave commands.

pub mod extract;
pub mod make_pyz;
pub mod save;
pub mod tracking;
pub mod unique;

pub use extract::{extract, ExtractOptions, ExtractResult};
pub use make_pyz::{make_executable, run_archive};
pub use save::{
    checkpoint, create_archive, snapshot_packages, CheckpointOptions, SaveInput, SaveOptions,
    SaveResult,
};
pub use tracking::{
    checkpoint_to_store, download_from_store, DirectoryStore, RunStore, UploadPolicy,
    ARCHIVE_NAME,
};
pub use unique::{default_prefix, namespace, NamespaceError, NamespaceOptions, NamespaceResult};
