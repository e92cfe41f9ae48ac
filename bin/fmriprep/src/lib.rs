//! Command line front end of the fmriprep pipeline builder.
//!
//! Parses arguments, merges them over the loaded configuration, discovers
//! the BIDS dataset on disk, builds one workflow per participant, checks
//! that every required executable is installed and hands the workflows to
//! the executor.

pub mod cli;
pub mod error;
pub mod layout;
pub mod run;

pub use cli::{AnalysisLevel, Cli};
pub use error::{CliError, EXIT_MISSING_DEPENDENCIES};
pub use layout::DirectoryLayout;
pub use run::{RunContext, run, run_with};
