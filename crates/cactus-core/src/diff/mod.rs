//! Diff engine module
//!
//! Handles parsing, modeling, and reassembly of git diffs.

pub mod model;
pub mod parser;
pub mod patch;

pub use model::*;
pub use parser::{DiffParser, ParserConfig, DEFAULT_MAX_PARSE_ATTEMPTS};
pub use patch::{PatchReassembler, PatchSequence};
