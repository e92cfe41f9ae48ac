//! Core domain types shared by the fmriprep workspace.
//!
//! This crate holds the vocabulary every other crate speaks: the `Result`
//! alias, run identifiers, BIDS run and fieldmap descriptors with derivative
//! naming, spatial references, and the contract for querying a BIDS layout.

pub mod bids;
pub mod error;
pub mod id;
pub mod layout;
pub mod spaces;

pub use bids::{
    BidsError, BidsName, BoldMetadata, BoldRun, Fieldmap, PhaseEncodingDirection, derivatives_dir,
};
pub use error::Result;
pub use id::{CrashId, ParseIdError, RunId};
pub use layout::{BidsLayout, MemoryLayout};
pub use spaces::{Reference, Space, SpaceError, SpatialReferences};
