//! Node operations for the fmriprep pipeline builder.
//!
//! External programs are described by [`ToolSpec`]s grouped per package;
//! the executor runs them. Operations cheap enough to compute from tables
//! and small matrices (confound regressors, transform selection, report
//! summaries, derivative copies) implement [`Interface::run`] directly.
//!
//! [`Interface::run`]: fmriprep_workflow::Interface::run

pub mod afni;
pub mod ants;
pub mod aroma;
pub mod bids;
pub mod confounds;
pub mod freesurfer;
pub mod fsl;
mod io;
pub mod itk;
pub mod reports;
pub mod tool;
pub mod utility;

pub use bids::{BidsDataGrabber, BidsInfo, DerivativesDataSink, SubjectFiles};
pub use confounds::{
    AddTsvHeader, CompCorNode, CompCorVariant, ComputeDvars, FramewiseDisplacement,
    GatherConfounds, JoinTsvColumns, NonSteadyStateDetector, NormalizeMotionParams,
    SignalExtraction,
};
pub use freesurfer::FreeSurferSource;
pub use io::OUT_DIR;
pub use reports::{AboutSummary, CompCorWarning, FunctionalSummary, SubjectSummary};
pub use tool::{Package, ToolSpec};
pub use utility::{BbrMode, KeySelect, Merge, SelectTransform};
