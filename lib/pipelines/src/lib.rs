//! Workflow builders of the fmriprep BOLD preprocessing pipeline.
//!
//! Builders only assemble graphs; nothing here touches image data. The
//! layers, from the leaves up:
//!
//! - **ROI derivation** and the **confounds** workflow
//! - the per-run BOLD stages under [`bold`] and their assembler
//!   [`init_func_preproc_wf`]
//! - the anatomical workflow whose outputs the runs consume
//! - the **subject** assembler and the top-level `fmriprep_wf`

pub mod anatomical;
pub mod bold;
pub mod confounds;
pub mod error;
pub mod memory;
pub mod roi;
pub mod settings;
pub mod subject;

pub use anatomical::{ANAT_WF, init_anat_preproc_wf};
pub use bold::{RUN_INPUTS, RunPlan, init_func_preproc_wf};
pub use confounds::{CONFOUNDS_WF, ConfoundMasks, add_confound_regressors, init_bold_confs_wf};
pub use error::BuildError;
pub use memory::MemoryEstimate;
pub use roi::add_roi_derivation;
pub use settings::BoldSettings;
pub use subject::{
    FMRIPREP_WF, SubjectSettings, init_fmriprep_wf, init_single_subject_wf, select_subjects,
};
