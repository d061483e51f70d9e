//! cactus - split staged changes into clustered commits
//!
//! Groups the hunks of the staged diff into related sets and commits each set
//! separately, restoring the original state if anything goes wrong.
//!
//! ## Quick Start
//!
//! ```bash
//! # Let a hosted model propose the commits
//! git add -A && cactus
//!
//! # Ask for exactly three commits, clustered locally
//! cactus 3 --local
//!
//! # Check the environment
//! cactus doctor
//! ```

mod commands;

fn main() {
    if let Err(err) = commands::run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
