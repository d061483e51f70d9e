//! cactus-core - Core library for cactus
//!
//! This crate splits a repository's staged changes into hunks, groups them
//! into clusters and commits each cluster separately, rolling everything
//! back if any step fails.

pub mod cluster;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod review;
pub mod sequencer;
pub mod types;

pub use error::{CactusError, Result};
pub use types::*;
