//! Command implementations

pub mod completions;
pub mod download;
pub mod extract;
pub mod info;
pub mod make_pyz;
pub mod run;
pub mod save;
pub mod unique;
