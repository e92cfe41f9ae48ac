//! Per-run BOLD preprocessing.
//!
//! [`RunPlan`] takes every topology decision for a run up front: whether
//! slice timing is corrected, which fieldmap drives distortion correction,
//! whether the fieldmap-less SyN correction runs, and which optional stages
//! (surfaces, grayordinates, ICA-AROMA) are instantiated.
//! [`init_func_preproc_wf`] then wires the stages accordingly. Nothing
//! downstream of the builder branches at run time.

pub mod aroma;
pub mod grayords;
pub mod hmc;
pub mod outputs;
pub mod reference;
pub mod registration;
pub mod resampling;
pub mod sdc;
pub mod stc;
pub mod surfaces;

use crate::confounds::{CONFOUNDS_WF, init_bold_confs_wf};
use crate::error::BuildError;
use crate::memory::MemoryEstimate;
use crate::settings::BoldSettings;
use aroma::{AROMA_WF, init_ica_aroma_wf};
use fmriprep_config::Ignore;
use fmriprep_core::spaces::AROMA_TEMPLATE;
use fmriprep_core::{BoldRun, Fieldmap, Reference, Space, SpatialReferences};
use fmriprep_interfaces::reports::{sdc_report, syn_comparison_report};
use fmriprep_interfaces::{DerivativesDataSink, FunctionalSummary, JoinTsvColumns, fsl};
use fmriprep_workflow::{Adapter, INPUTNODE, Node, OUTPUTNODE, Workflow, registration_suffix};
use grayords::{GRAYORDS_WF, init_bold_grayords_wf};
use hmc::{HMC_WF, init_bold_hmc_wf};
use outputs::{DERIVATIVES_WF, DerivativeOutputs, init_func_derivatives_wf};
use reference::{REFERENCE_WF, init_bold_reference_wf};
use registration::{REG_WF, init_bold_reg_wf};
use resampling::{
    NATIVE_WF, STD_WF, T1_WF, init_bold_preproc_trans_wf, init_bold_std_trans_wf, init_bold_t1_trans_wf,
};
use sdc::{SYN_WF, add_fieldmap_correction, init_syn_sdc_wf};
use stc::{STC_WF, init_bold_stc_wf};
use surfaces::{SURF_WF, init_bold_surf_wf};
use tracing::{info, warn};

/// Fields of a run workflow's `inputnode`. `bold_file` is bound at build
/// time; the rest come from the anatomical workflow.
pub const RUN_INPUTS: [&str; 11] = [
    "bold_file",
    "t1_preproc",
    "t1_brain",
    "t1_mask",
    "t1_seg",
    "t1_tpms",
    "t1_to_template_forward",
    "t1_to_template_reverse",
    "subjects_dir",
    "subject_id",
    "t1_to_fsnative_forward",
];

/// Slice-timing correction needs more usable volumes than this.
pub const STC_MIN_VOLUMES: usize = 4;

/// Topology decisions for one run.
#[derive(Debug, Clone)]
pub struct RunPlan<'a> {
    pub slice_timing: bool,
    /// Fieldmap driving the distortion correction applied to the outputs.
    pub fieldmap: Option<&'a Fieldmap>,
    /// Fieldmap-less correction; reporting only when `fieldmap` is set.
    pub syn: bool,
    /// Requested references plus the internal ones this run needs.
    pub spaces: SpatialReferences,
    pub surfaces: bool,
    /// Grayordinates density.
    pub cifti: Option<String>,
    pub aroma: bool,
}

impl<'a> RunPlan<'a> {
    #[must_use]
    pub fn new(run: &BoldRun, fieldmaps: &'a [Fieldmap], settings: &BoldSettings) -> Self {
        let usable = run.n_volumes.saturating_sub(settings.dummy_scans.unwrap_or(0));
        let slice_timing = if !run.has_slice_timing() || settings.ignores(Ignore::Slicetiming) {
            false
        } else if usable <= STC_MIN_VOLUMES {
            warn!(
                run = %run.path.display(),
                usable_volumes = usable,
                "too few volumes for slice-timing correction, skipping it"
            );
            false
        } else {
            true
        };

        let fieldmap = if settings.ignores(Ignore::Fieldmaps) {
            None
        } else {
            Fieldmap::preferred(fieldmaps)
        };

        let mut syn = settings.force_syn || (fieldmap.is_none() && settings.use_syn);
        if syn && run.metadata.phase_encoding_direction.is_none() {
            warn!(
                run = %run.path.display(),
                "no PhaseEncodingDirection in the metadata, skipping fieldmap-less correction"
            );
            syn = false;
        }

        let requested = settings.cifti_output.is_some() || settings.spaces.grayordinates().is_some();
        let cifti = settings.cifti_density();
        if requested && cifti.is_none() {
            warn!(run = %run.path.display(), "grayordinates require FreeSurfer surfaces, skipping CIFTI output");
        }

        let spaces = settings.resolved_spaces();
        let surfaces = settings.freesurfer && !spaces.surfaces().is_empty();

        Self {
            slice_timing,
            fieldmap,
            syn,
            spaces,
            surfaces,
            cifti,
            aroma: settings.use_aroma,
        }
    }

    /// Distortion correction method recorded in reports.
    #[must_use]
    pub fn sdc_method(&self) -> Option<&'static str> {
        self.fieldmap
            .map(Fieldmap::method)
            .or_else(|| self.syn.then_some("syn"))
    }

    /// Position of the `MNI152NLin6Asym:res-2` series in the template lists.
    #[must_use]
    pub fn aroma_template_index(&self) -> Option<usize> {
        let space = Space::template_res(AROMA_TEMPLATE, "2");
        self.spaces.templates().iter().position(|r| r.space == space)
    }

    fn surface_references(&self) -> Vec<&Reference> {
        self.spaces.references().filter(|r| r.space.is_surface()).collect()
    }
}

/// Where the (possibly distortion-corrected) BOLD reference is read from.
#[derive(Debug, Clone, Copy)]
struct CorrectedReference<'a> {
    image: (&'a str, &'a str),
    brain: (&'a str, &'a str),
    mask: (&'a str, &'a str),
    warp: Option<(&'a str, &'a str)>,
}

impl<'a> CorrectedReference<'a> {
    fn uncorrected() -> Self {
        Self {
            image: (REFERENCE_WF, "ref_image"),
            brain: (REFERENCE_WF, "ref_image_brain"),
            mask: (REFERENCE_WF, "bold_mask"),
            warp: None,
        }
    }

    fn from_correction(member: &'a str) -> Self {
        Self {
            image: (member, "out_reference"),
            brain: (member, "out_reference_brain"),
            mask: (member, "out_mask"),
            warp: Some((member, "out_warp")),
        }
    }
}

fn feed_correction(workflow: &mut Workflow, member: &str) -> Result<(), BuildError> {
    workflow.connect(
        REFERENCE_WF,
        member,
        &[
            ("ref_image", "in_reference"),
            ("ref_image_brain", "in_reference_brain"),
            ("bold_mask", "in_mask"),
        ],
    )?;
    Ok(())
}

/// Fields of the run's `outputnode` for a plan.
fn run_outputs(plan: &RunPlan<'_>) -> Vec<&'static str> {
    let mut fields = vec!["bold_t1", "bold_t1_ref", "bold_mask_t1"];
    if !plan.spaces.templates().is_empty() {
        fields.extend(["bold_std", "bold_std_ref", "bold_mask_std"]);
    }
    if plan.surfaces {
        fields.push("surfaces");
    }
    if plan.cifti.is_some() {
        fields.extend(["bold_cifti", "cifti_metadata"]);
    }
    fields.extend(["confounds", "confounds_metadata"]);
    if plan.aroma {
        fields.extend(["aroma_noise_ics", "melodic_mix", "nonaggr_denoised_file"]);
    }
    fields
}

/// Builds `func_preproc_<entities>_wf` for one BOLD run.
///
/// # Errors
///
/// Returns [`BuildError::Graph`] when a stage cannot be wired.
pub fn init_func_preproc_wf(
    run: &BoldRun,
    fieldmaps: &[Fieldmap],
    settings: &BoldSettings,
) -> Result<Workflow, BuildError> {
    let plan = RunPlan::new(run, fieldmaps, settings);
    let mem = MemoryEstimate::for_run(run);
    let tr = run.metadata.repetition_time;
    let pe = run.metadata.phase_encoding_direction;
    let name = format!("func_preproc_{}_wf", run.name.run_identifier());
    let templates = plan.spaces.templates();
    let reportlets = settings.reportlets_dir.as_path();
    let source = run.path.display().to_string();

    info!(
        workflow = %name,
        n_volumes = run.n_volumes,
        mem_gb = mem.filesize,
        stc = plan.slice_timing,
        sdc = plan.sdc_method().unwrap_or("none"),
        syn = plan.syn,
        templates = templates.len(),
        surfaces = plan.surfaces,
        aroma = plan.aroma,
        "building BOLD workflow"
    );

    let outputs = run_outputs(&plan);
    let mut workflow = Workflow::with_io(name.as_str(), &RUN_INPUTS, outputs.as_slice());
    workflow.set_input(INPUTNODE, "bold_file", source.clone())?;

    let report_sink = |node: &str, desc: &str| {
        Node::new(node, DerivativesDataSink::figures(reportlets).with_desc(desc))
            .with_input("source_file", source.clone())
            .local()
    };

    // Reference, slice timing and head motion.
    workflow.add_workflow(init_bold_reference_wf(settings.dummy_scans, mem)?)?;
    workflow.connect(INPUTNODE, REFERENCE_WF, &[("bold_file", "bold_file")])?;

    let mut series = (REFERENCE_WF, "bold_file");
    if plan.slice_timing {
        let timing = run.metadata.slice_timing.as_deref().unwrap_or_default();
        workflow.add_workflow(init_bold_stc_wf(tr, timing, mem)?)?;
        workflow.connect(
            REFERENCE_WF,
            STC_WF,
            &[("bold_file", "bold_file"), ("skip_vols", "skip_vols")],
        )?;
        series = (STC_WF, "stc_file");
    }

    workflow.add_workflow(init_bold_hmc_wf(mem, settings.omp_nthreads)?)?;
    workflow.connect(series.0, HMC_WF, &[(series.1, "bold_file")])?;
    workflow.connect(REFERENCE_WF, HMC_WF, &[("raw_ref_image", "raw_ref_image")])?;

    workflow.add_node(Node::new("bold_split", fsl::split()).with_mem_gb(mem.filesize))?;
    workflow.connect(series.0, "bold_split", &[(series.1, "in_file")])?;

    // Susceptibility distortion correction.
    let fieldmap_member = match plan.fieldmap {
        Some(fieldmap) => {
            let member = add_fieldmap_correction(
                &mut workflow,
                fieldmap,
                pe,
                settings.fmap_bspline,
                settings.fmap_demean,
                mem,
                settings.omp_nthreads,
            )?;
            feed_correction(&mut workflow, member)?;
            Some(member)
        }
        None => None,
    };
    let syn_member = match (plan.syn, pe) {
        (true, Some(pe)) => {
            workflow.add_workflow(init_syn_sdc_wf(pe, mem, settings.omp_nthreads)?)?;
            feed_correction(&mut workflow, SYN_WF)?;
            workflow.connect(INPUTNODE, SYN_WF, &[("t1_brain", "t1_brain")])?;
            Some(SYN_WF)
        }
        _ => None,
    };

    let corrected = fieldmap_member
        .or(syn_member)
        .map_or_else(CorrectedReference::uncorrected, CorrectedReference::from_correction);

    if let Some(method) = plan.sdc_method() {
        workflow.add_nodes([
            Node::new("sdc_report", sdc_report(method)),
            report_sink("ds_report_sdc", "sdc"),
        ])?;
        workflow.connect(REFERENCE_WF, "sdc_report", &[("ref_image", "before")])?;
        workflow.connect(corrected.image.0, "sdc_report", &[(corrected.image.1, "after")])?;
        workflow.connect("sdc_report", "ds_report_sdc", &[("out_report", "in_file")])?;
    }
    if let (Some(fieldmap_member), Some(syn_member)) = (fieldmap_member, syn_member) {
        workflow.add_nodes([
            Node::new("syn_report", syn_comparison_report()),
            report_sink("ds_report_syn", "forcedsyn"),
        ])?;
        workflow.connect(fieldmap_member, "syn_report", &[("out_reference", "before")])?;
        workflow.connect(syn_member, "syn_report", &[("out_reference", "after")])?;
        workflow.connect(INPUTNODE, "syn_report", &[("t1_seg", "wm_seg")])?;
        workflow.connect("syn_report", "ds_report_syn", &[("out_report", "in_file")])?;
    }

    // Co-registration.
    workflow.add_workflow(init_bold_reg_wf(settings, mem)?)?;
    workflow.connect(corrected.brain.0, REG_WF, &[(corrected.brain.1, "ref_bold_brain")])?;
    workflow.connect(
        INPUTNODE,
        REG_WF,
        &[
            ("t1_brain", "t1_brain"),
            ("t1_seg", "t1_seg"),
            ("subjects_dir", "subjects_dir"),
            ("subject_id", "subject_id"),
        ],
    )?;
    workflow.add_node(report_sink(
        "ds_report_reg",
        registration_suffix(settings.freesurfer, false),
    ))?;
    workflow.connect(REG_WF, "ds_report_reg", &[("out_report", "in_file")])?;
    workflow.connect_with(
        REG_WF,
        "fallback",
        "ds_report_reg",
        "desc",
        Adapter::RegistrationSuffix {
            freesurfer: settings.freesurfer,
        },
    )?;

    // Resampling.
    let use_fieldwarp = corrected.warp.is_some();
    let feed_resampler = |workflow: &mut Workflow, member: &str| -> Result<(), BuildError> {
        workflow.connect("bold_split", member, &[("out_files", "bold_split")])?;
        workflow.connect(HMC_WF, member, &[("xforms", "hmc_xforms")])?;
        if let Some((node, port)) = corrected.warp {
            workflow.connect(node, member, &[(port, "fieldwarp")])?;
        }
        Ok(())
    };

    workflow.add_workflow(init_bold_preproc_trans_wf(mem, use_fieldwarp, settings.low_mem)?)?;
    feed_resampler(&mut workflow, NATIVE_WF)?;
    workflow.connect(corrected.image.0, NATIVE_WF, &[(corrected.image.1, "bold_ref")])?;
    workflow.connect(corrected.mask.0, NATIVE_WF, &[(corrected.mask.1, "bold_mask")])?;

    workflow.add_workflow(init_bold_t1_trans_wf(mem, use_fieldwarp, settings.low_mem)?)?;
    feed_resampler(&mut workflow, T1_WF)?;
    workflow.connect(REG_WF, T1_WF, &[("itk_bold_to_t1", "itk_bold_to_t1")])?;
    workflow.connect(INPUTNODE, T1_WF, &[("t1_brain", "t1_brain")])?;
    workflow.connect(corrected.brain.0, T1_WF, &[(corrected.brain.1, "ref_bold_brain")])?;
    workflow.connect(corrected.mask.0, T1_WF, &[(corrected.mask.1, "ref_bold_mask")])?;
    workflow.connect(
        T1_WF,
        OUTPUTNODE,
        &[
            ("bold_t1", "bold_t1"),
            ("bold_t1_ref", "bold_t1_ref"),
            ("bold_mask_t1", "bold_mask_t1"),
        ],
    )?;

    if !templates.is_empty() {
        workflow.add_workflow(init_bold_std_trans_wf(&templates, mem, use_fieldwarp, settings.low_mem)?)?;
        feed_resampler(&mut workflow, STD_WF)?;
        workflow.connect(REG_WF, STD_WF, &[("itk_bold_to_t1", "itk_bold_to_t1")])?;
        workflow.connect(INPUTNODE, STD_WF, &[("t1_to_template_forward", "anat2std_xfm")])?;
        workflow.connect(corrected.mask.0, STD_WF, &[(corrected.mask.1, "bold_mask")])?;
        workflow.connect(
            STD_WF,
            OUTPUTNODE,
            &[
                ("bold_std", "bold_std"),
                ("bold_std_ref", "bold_std_ref"),
                ("bold_mask_std", "bold_mask_std"),
            ],
        )?;
    }

    // Surfaces and grayordinates.
    if plan.surfaces {
        let references = plan.surface_references();
        workflow.add_workflow(init_bold_surf_wf(
            &references,
            settings.medial_surface_nan,
            plan.cifti.is_some(),
            &settings.output_dir,
            &run.path,
        )?)?;
        workflow.connect(T1_WF, SURF_WF, &[("bold_t1", "source_file")])?;
        workflow.connect(
            INPUTNODE,
            SURF_WF,
            &[
                ("subjects_dir", "subjects_dir"),
                ("subject_id", "subject_id"),
                ("t1_to_fsnative_forward", "t1_to_fsnative_forward"),
            ],
        )?;
        workflow.connect(SURF_WF, OUTPUTNODE, &[("surfaces", "surfaces")])?;
    }

    let aroma_index = plan.aroma_template_index();
    if let (Some(density), Some(index)) = (plan.cifti.as_deref(), aroma_index) {
        workflow.add_workflow(init_bold_grayords_wf(density, tr, mem)?)?;
        workflow.connect_with(STD_WF, "bold_std", GRAYORDS_WF, "bold_std", Adapter::Select { index })?;
        workflow.connect(SURF_WF, GRAYORDS_WF, &[("cifti_surfaces", "surf_files")])?;
        workflow.connect(
            GRAYORDS_WF,
            OUTPUTNODE,
            &[("cifti_bold", "bold_cifti"), ("cifti_metadata", "cifti_metadata")],
        )?;
    }

    // Confounds.
    workflow.add_workflow(init_bold_confs_wf(
        mem,
        tr,
        settings.compcor_failure_mode,
        reportlets,
        &run.path,
    )?)?;
    workflow.connect(
        NATIVE_WF,
        CONFOUNDS_WF,
        &[("bold", "bold"), ("bold_mask", "bold_mask"), ("bold_ref", "bold_ref")],
    )?;
    workflow.connect(HMC_WF, CONFOUNDS_WF, &[("movpar_file", "movpar_file")])?;
    workflow.connect(REG_WF, CONFOUNDS_WF, &[("itk_t1_to_bold", "t1_bold_xform")])?;
    workflow.connect(
        INPUTNODE,
        CONFOUNDS_WF,
        &[("t1_mask", "t1_mask"), ("t1_tpms", "t1_tpms")],
    )?;
    workflow.connect(CONFOUNDS_WF, OUTPUTNODE, &[("confounds_metadata", "confounds_metadata")])?;

    match (plan.aroma, aroma_index) {
        (true, Some(index)) => {
            workflow.add_workflow(init_ica_aroma_wf(
                tr,
                settings.aroma_melodic_dim,
                settings.aroma_err_is_warning,
                mem,
            )?)?;
            workflow.connect_with(STD_WF, "bold_std", AROMA_WF, "bold_std", Adapter::Select { index })?;
            workflow.connect_with(
                STD_WF,
                "bold_mask_std",
                AROMA_WF,
                "bold_mask_std",
                Adapter::Select { index },
            )?;
            workflow.connect(HMC_WF, AROMA_WF, &[("movpar_file", "movpar_file")])?;
            workflow.connect(REFERENCE_WF, AROMA_WF, &[("skip_vols", "skip_vols")])?;

            workflow.add_node(Node::new("join", JoinTsvColumns).local())?;
            workflow.connect(CONFOUNDS_WF, "join", &[("confounds_file", "in_file")])?;
            workflow.connect(AROMA_WF, "join", &[("aroma_confounds", "join_file")])?;
            workflow.connect("join", OUTPUTNODE, &[("out_file", "confounds")])?;
            workflow.connect(
                AROMA_WF,
                OUTPUTNODE,
                &[
                    ("aroma_noise_ics", "aroma_noise_ics"),
                    ("melodic_mix", "melodic_mix"),
                    ("nonaggr_denoised_file", "nonaggr_denoised_file"),
                ],
            )?;
        }
        _ => workflow.connect(CONFOUNDS_WF, OUTPUTNODE, &[("confounds_file", "confounds")])?,
    }

    // Reportlets and derivatives.
    let summary = FunctionalSummary {
        slice_timing: plan.slice_timing,
        distortion_correction: plan.sdc_method().map(str::to_string),
        registration: settings.registration_package().to_string(),
        registration_dof: settings.bold2t1w_dof,
        pe_direction: pe.map(|pe| pe.to_string()),
        repetition_time: tr,
        dummy_scans: settings.dummy_scans,
    };
    let html_sink = |node: &str, desc: &str| {
        Node::new(
            node,
            DerivativesDataSink::figures(reportlets)
                .with_desc(desc)
                .with_extension(".html"),
        )
        .with_input("source_file", run.path.display().to_string())
        .local()
    };
    workflow.add_nodes([
        Node::new("summary", summary).local(),
        html_sink("ds_report_summary", "summary"),
        html_sink("ds_report_validation", "validation"),
    ])?;
    workflow.connect(REG_WF, "summary", &[("fallback", "fallback")])?;
    workflow.connect(REFERENCE_WF, "summary", &[("algo_dummy_scans", "algo_dummy_scans")])?;
    workflow.connect("summary", "ds_report_summary", &[("out_report", "in_file")])?;
    workflow.connect(REFERENCE_WF, "ds_report_validation", &[("validation_report", "in_file")])?;

    let derivatives = DerivativeOutputs {
        anatomical: plan.spaces.anatomical_output(),
        templates: &templates,
        cifti: plan.cifti.as_deref(),
        aroma: plan.aroma,
    };
    workflow.add_workflow(init_func_derivatives_wf(
        &derivatives,
        &settings.output_dir,
        &run.path,
    )?)?;
    let mut forwarded: Vec<(&str, &str)> = outputs.iter().map(|field| (*field, *field)).collect();
    forwarded.retain(|(field, _)| *field != "surfaces");
    workflow.connect(OUTPUTNODE, DERIVATIVES_WF, &forwarded)?;

    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_core::{BoldMetadata, PhaseEncodingDirection};
    use std::path::PathBuf;

    const BOLD: &str = "/data/sub-01/func/sub-01_task-rest_run-01_bold.nii.gz";

    fn run(n_volumes: usize, slice_timing: Option<Vec<f64>>, pe: Option<&str>) -> BoldRun {
        let mut metadata = BoldMetadata::new(2.0);
        metadata.slice_timing = slice_timing;
        metadata.phase_encoding_direction =
            pe.map(|pe| PhaseEncodingDirection::try_from(pe.to_string()).expect("direction"));
        BoldRun::new(BOLD, metadata, n_volumes, 0.2).expect("run")
    }

    fn settings(spaces: &str) -> BoldSettings {
        BoldSettings::new("/out", SpatialReferences::parse(spaces).expect("spaces"))
    }

    fn phasediff() -> Fieldmap {
        Fieldmap::Phasediff {
            phasediff: PathBuf::from("/data/sub-01/fmap/sub-01_phasediff.nii.gz"),
            magnitude1: PathBuf::from("/data/sub-01/fmap/sub-01_magnitude1.nii.gz"),
            magnitude2: None,
        }
    }

    #[test]
    fn fieldmap_truth_table() {
        let run = run(100, None, Some("j-"));
        let fieldmaps = [phasediff()];
        let cases = [
            (true, false, true, true, true),
            (true, true, true, true, true),
            (true, false, false, true, false),
            (true, true, false, true, false),
            (false, false, true, false, true),
            (false, true, false, false, true),
            (false, false, false, false, false),
        ];
        for (has_fieldmap, use_syn, force_syn, expect_fieldmap, expect_syn) in cases {
            let mut settings = settings("MNI152NLin2009cAsym");
            settings.use_syn = use_syn;
            settings.force_syn = force_syn;
            let available: &[Fieldmap] = if has_fieldmap { &fieldmaps } else { &[] };
            let plan = RunPlan::new(&run, available, &settings);
            assert_eq!(plan.fieldmap.is_some(), expect_fieldmap, "{has_fieldmap} {use_syn} {force_syn}");
            assert_eq!(plan.syn, expect_syn, "{has_fieldmap} {use_syn} {force_syn}");
        }
    }

    #[test]
    fn ignored_fieldmaps_fall_back_to_syn() {
        let run = run(100, None, Some("j"));
        let fieldmaps = [phasediff()];
        let mut settings = settings("MNI152NLin2009cAsym");
        settings.use_syn = true;
        settings.ignore.insert(Ignore::Fieldmaps);
        let plan = RunPlan::new(&run, &fieldmaps, &settings);
        assert!(plan.fieldmap.is_none());
        assert_eq!(plan.sdc_method(), Some("syn"));
    }

    #[test]
    fn syn_needs_a_phase_encoding_direction() {
        let run = run(100, None, None);
        let mut settings = settings("MNI152NLin2009cAsym");
        settings.force_syn = true;
        let plan = RunPlan::new(&run, &[], &settings);
        assert!(!plan.syn);
        assert_eq!(plan.sdc_method(), None);
    }

    #[test]
    fn slice_timing_needs_enough_usable_volumes() {
        let timing = Some(vec![0.0, 0.5, 1.0, 1.5]);
        let settings = settings("MNI152NLin2009cAsym");
        assert!(RunPlan::new(&run(5, timing.clone(), None), &[], &settings).slice_timing);
        assert!(!RunPlan::new(&run(4, timing.clone(), None), &[], &settings).slice_timing);
        assert!(!RunPlan::new(&run(200, Some(vec![0.0]), None), &[], &settings).slice_timing);

        let mut dummies = settings.clone();
        dummies.dummy_scans = Some(2);
        assert!(!RunPlan::new(&run(6, timing.clone(), None), &[], &dummies).slice_timing);

        let mut ignored = settings;
        ignored.ignore.insert(Ignore::Slicetiming);
        assert!(!RunPlan::new(&run(200, timing, None), &[], &ignored).slice_timing);
    }

    #[test]
    fn grayordinates_need_freesurfer() {
        let run = run(100, None, None);
        let mut settings = settings("MNI152NLin2009cAsym cifti:91k");
        let plan = RunPlan::new(&run, &[], &settings);
        assert!(plan.cifti.is_none());
        assert!(!plan.surfaces);

        settings.freesurfer = true;
        let plan = RunPlan::new(&run, &[], &settings);
        assert_eq!(plan.cifti.as_deref(), Some("91k"));
        assert!(plan.surfaces);
        assert_eq!(plan.aroma_template_index(), Some(1));
    }

    #[test]
    fn aroma_adds_an_internal_template() {
        let run = run(100, None, None);
        let mut settings = settings("T1w");
        settings.use_aroma = true;
        let workflow = init_func_preproc_wf(&run, &[], &settings).expect("build");
        assert_eq!(workflow.name(), "func_preproc_task_rest_run_01_wf");

        let graph = workflow.flatten().expect("valid");
        assert!(graph.has_path("bold_std_trans_wf.join_bold", "ica_aroma_wf.smooth"));
        assert!(graph.contains("func_derivatives_wf.ds_aroma_std"));
        assert!(!graph.contains("func_derivatives_wf.ds_bold_std_MNI152NLin6Asym_res2"));
        assert!(graph.has_path("ica_aroma_wf.ica_aroma", "join"));
    }

    #[test]
    fn registration_report_desc_follows_fallback() {
        let run = run(100, None, None);
        let mut settings = settings("MNI152NLin2009cAsym");
        settings.freesurfer = true;
        let graph = init_func_preproc_wf(&run, &[], &settings)
            .expect("build")
            .flatten()
            .expect("valid");
        let (source, edge) = graph.source_of("ds_report_reg", "desc").expect("desc edge");
        assert_eq!(source, "bold_reg_wf.outputnode");
        assert_eq!(edge.adapter, Some(Adapter::RegistrationSuffix { freesurfer: true }));
        assert!(!graph.has_workflow(SURF_WF));
    }
}
