//! Core types shared by every taskloom crate.
//!
//! This crate provides the run identifier type and the rootcause-based
//! `Result` alias used across the workspace.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, RunId};
