//! File-backed storage for taskloom.
//!
//! This crate provides:
//!
//! - **Workflow files**: YAML definitions under `workflows/`
//! - **Run records**: JSON run records and per-run log directories under `runs/`
//! - **Agent templates**: YAML templates under `agents/`

pub mod file;

pub use file::FileStore;
