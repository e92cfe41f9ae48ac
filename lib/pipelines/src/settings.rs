//! Inputs of the per-run builder that come from the configuration.

use crate::error::BuildError;
use fmriprep_config::{Config, Ignore};
use fmriprep_core::SpatialReferences;
use fmriprep_interfaces::BbrMode;
use fmriprep_workflow::FailureMode;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Switches consumed by the BOLD workflow builder.
#[derive(Debug, Clone, PartialEq)]
pub struct BoldSettings {
    /// Surfaces were reconstructed with FreeSurfer.
    pub freesurfer: bool,
    pub use_bbr: BbrMode,
    pub bold2t1w_dof: u8,
    pub fmap_bspline: bool,
    pub fmap_demean: bool,
    pub use_syn: bool,
    pub force_syn: bool,
    pub use_aroma: bool,
    /// Downgrade ICA-AROMA failures to warnings with empty outputs.
    pub aroma_err_is_warning: bool,
    pub aroma_melodic_dim: Option<i32>,
    pub medial_surface_nan: bool,
    pub debug: bool,
    pub low_mem: bool,
    pub ignore: BTreeSet<Ignore>,
    /// Non-steady-state volumes declared by the user.
    pub dummy_scans: Option<usize>,
    pub cifti_output: Option<String>,
    pub compcor_failure_mode: FailureMode,
    pub omp_nthreads: usize,
    pub output_dir: PathBuf,
    pub reportlets_dir: PathBuf,
    /// Requested spaces; see [`BoldSettings::resolved_spaces`].
    pub spaces: SpatialReferences,
}

impl BoldSettings {
    /// Default switches writing to `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, spaces: SpatialReferences) -> Self {
        let output_dir = output_dir.into();
        Self {
            freesurfer: false,
            use_bbr: BbrMode::Auto,
            bold2t1w_dof: 6,
            fmap_bspline: false,
            fmap_demean: true,
            use_syn: false,
            force_syn: false,
            use_aroma: false,
            aroma_err_is_warning: true,
            aroma_melodic_dim: None,
            medial_surface_nan: false,
            debug: false,
            low_mem: false,
            ignore: BTreeSet::new(),
            dummy_scans: None,
            cifti_output: None,
            compcor_failure_mode: FailureMode::Warn,
            omp_nthreads: 1,
            reportlets_dir: output_dir.join("reportlets"),
            output_dir,
            spaces,
        }
    }

    /// Reads the switches from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Spaces`] when the requested spaces are unusable.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let workflow = &config.workflow;
        let use_bbr = match workflow.use_bbr {
            None => BbrMode::Auto,
            Some(true) => BbrMode::Force,
            Some(false) => BbrMode::Disabled,
        };
        Ok(Self {
            freesurfer: workflow.run_reconall,
            use_bbr,
            bold2t1w_dof: workflow.bold2t1w_dof,
            fmap_bspline: workflow.fmap_bspline,
            fmap_demean: workflow.fmap_demean,
            use_syn: workflow.use_syn_sdc,
            force_syn: workflow.force_syn,
            use_aroma: workflow.use_aroma,
            aroma_err_is_warning: !workflow.aroma_err_on_warn,
            aroma_melodic_dim: workflow.aroma_melodic_dim,
            medial_surface_nan: workflow.medial_surface_nan,
            debug: config.execution.debug,
            low_mem: config.execution.low_mem,
            ignore: workflow.ignore.iter().copied().collect(),
            dummy_scans: workflow.dummy_scans,
            cifti_output: workflow.cifti_output.clone(),
            compcor_failure_mode: workflow.compcor_failure_mode,
            omp_nthreads: config.nipype.threads_per_process(),
            output_dir: config.execution.output_dir.clone(),
            reportlets_dir: config.execution.reportlets_dir(),
            spaces: workflow.spatial_references()?,
        })
    }

    #[must_use]
    pub fn ignores(&self, input: Ignore) -> bool {
        self.ignore.contains(&input)
    }

    /// Registration package named in reports.
    #[must_use]
    pub fn registration_package(&self) -> &'static str {
        if self.freesurfer { "FreeSurfer" } else { "FSL" }
    }

    /// Requested grayordinates density, from `cifti_output` or a `cifti:`
    /// space. Grayordinates need FreeSurfer surfaces.
    #[must_use]
    pub fn cifti_density(&self) -> Option<String> {
        if !self.freesurfer {
            return None;
        }
        self.cifti_output
            .clone()
            .or_else(|| self.spaces.grayordinates().map(str::to_string))
    }

    /// The requested references plus the internal ones needed by
    /// ICA-AROMA and grayordinates. Anatomical and functional workflows
    /// index templates in this order.
    #[must_use]
    pub fn resolved_spaces(&self) -> SpatialReferences {
        let mut spaces = self.spaces.clone();
        spaces.add_internal_for(self.use_aroma, self.cifti_density().is_some());
        spaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_core::Space;

    #[test]
    fn read_from_config() {
        let mut config = Config::default();
        config.execution.output_dir = PathBuf::from("/out");
        config.workflow.use_bbr = Some(false);
        config.workflow.use_aroma = true;
        config.workflow.aroma_err_on_warn = true;
        config.workflow.ignore = vec![Ignore::Fieldmaps];

        let settings = BoldSettings::from_config(&config).expect("settings");
        assert_eq!(settings.use_bbr, BbrMode::Disabled);
        assert!(!settings.aroma_err_is_warning);
        assert!(settings.ignores(Ignore::Fieldmaps));
        assert_eq!(settings.output_dir, PathBuf::from("/out"));
        assert_eq!(settings.spaces.templates().len(), 1);
        assert!(
            settings
                .resolved_spaces()
                .templates()
                .iter()
                .any(|r| r.space.to_string() == "MNI152NLin6Asym:res-2" && !r.output)
        );
    }

    #[test]
    fn grayordinates_add_internal_references() {
        let spaces = SpatialReferences::parse("MNI152NLin2009cAsym cifti:91k").expect("spaces");
        let mut settings = BoldSettings::new("/out", spaces);
        assert_eq!(settings.cifti_density(), None);
        assert_eq!(settings.resolved_spaces().templates().len(), 1);

        settings.freesurfer = true;
        assert_eq!(settings.cifti_density().as_deref(), Some("91k"));
        let resolved = settings.resolved_spaces();
        assert_eq!(resolved.templates().len(), 2);
        assert_eq!(resolved.surfaces().len(), 1);
        assert!(!resolved.is_output(&Space::template_res("MNI152NLin6Asym", "2")));
    }
}
