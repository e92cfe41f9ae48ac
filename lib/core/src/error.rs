//! Error handling foundation for the fmriprep workspace.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Each crate defines its own error enums (`GraphError`, `CompCorError`,
//! `ConfigError`, `BuildError`, ...) and lifts them into a `Report` with `?`
//! at the layer that needs richer context.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
