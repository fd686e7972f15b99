//! Process-backed collaborators for the taskloom engine.
//!
//! This crate provides:
//!
//! - **Claude CLI executor**: Dispatches instructions to the `claude` command-line agent
//! - **System shell**: Runs side-channel context commands through `sh -c`

pub mod claude;
pub mod shell;

pub use claude::{ClaudeCli, parse_output};
pub use shell::SystemShell;
