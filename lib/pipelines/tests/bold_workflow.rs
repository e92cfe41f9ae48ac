//! Topology of assembled per-run and subject workflows.

use fmriprep_core::{
    BoldMetadata, BoldRun, Fieldmap, MemoryLayout, PhaseEncodingDirection, SpatialReferences,
};
use fmriprep_pipelines::{BoldSettings, SubjectSettings, init_fmriprep_wf, init_func_preproc_wf};
use fmriprep_workflow::FlatGraph;
use std::collections::BTreeMap;
use std::path::PathBuf;

const BOLD: &str = "/data/sub-01/func/sub-01_task-rest_bold.nii.gz";

fn run(n_volumes: usize, slice_timing: Option<Vec<f64>>) -> BoldRun {
    let mut metadata = BoldMetadata::new(2.0);
    metadata.slice_timing = slice_timing;
    metadata.phase_encoding_direction = Some(PhaseEncodingDirection::try_from("j-".to_string()).expect("pe"));
    BoldRun::new(BOLD, metadata, n_volumes, 0.1).expect("run")
}

fn settings(spaces: &str) -> BoldSettings {
    BoldSettings::new("/out", SpatialReferences::parse(spaces).expect("spaces"))
}

fn build(run: &BoldRun, fieldmaps: &[Fieldmap], settings: &BoldSettings) -> FlatGraph {
    init_func_preproc_wf(run, fieldmaps, settings)
        .expect("build")
        .flatten()
        .expect("valid")
}

fn phasediff() -> Fieldmap {
    Fieldmap::Phasediff {
        phasediff: PathBuf::from("/data/sub-01/fmap/sub-01_phasediff.nii.gz"),
        magnitude1: PathBuf::from("/data/sub-01/fmap/sub-01_magnitude1.nii.gz"),
        magnitude2: Some(PathBuf::from("/data/sub-01/fmap/sub-01_magnitude2.nii.gz")),
    }
}

fn pepolar() -> Fieldmap {
    Fieldmap::Epi {
        epi_files: vec![PathBuf::from("/data/sub-01/fmap/sub-01_dir-AP_epi.nii.gz")],
    }
}

fn assert_well_formed(graph: &FlatGraph) {
    assert!(graph.topological_order().is_ok());
    for path in graph.paths() {
        let mut fed: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, edge) in graph.incoming(path) {
            *fed.entry(edge.target_port.as_str()).or_default() += 1;
        }
        for (port, count) in fed {
            assert_eq!(count, 1, "{path}.{port} has {count} incoming edges");
        }
    }
}

#[test]
fn minimal_run_has_only_mandatory_stages() {
    let graph = build(&run(100, None), &[], &settings("MNI152NLin2009cAsym"));
    assert_well_formed(&graph);

    for present in [
        "bold_reference_wf",
        "bold_hmc_wf",
        "bold_reg_wf",
        "bold_std_trans_wf",
        "bold_confounds_wf",
    ] {
        assert!(graph.has_workflow(present), "missing {present}");
    }
    for absent in [
        "bold_stc_wf",
        "pepolar_unwarp_wf",
        "phdiff_wf",
        "fmap_wf",
        "sdc_unwarp_wf",
        "syn_sdc_wf",
        "bold_surf_wf",
        "ica_aroma_wf",
    ] {
        assert!(!graph.has_workflow(absent), "unexpected {absent}");
    }
    assert!(!graph.contains("sdc_report"));
    assert!(graph.contains("func_derivatives_wf.ds_bold_std_MNI152NLin2009cAsym"));
}

#[test]
fn slice_timing_sits_between_reference_and_motion_correction() {
    let timing: Vec<f64> = (0..10).map(|i| f64::from(i) * 0.1).collect();
    let graph = build(&run(200, Some(timing)), &[], &settings("MNI152NLin2009cAsym"));
    assert_well_formed(&graph);

    let stc = "bold_stc_wf.slice_timing_correction";
    assert!(graph.has_path("bold_reference_wf.validate", stc));
    assert!(graph.has_path(stc, "bold_hmc_wf.mcflirt"));
    assert!(graph.has_path(stc, "bold_split"));

    let without = build(&run(200, None), &[], &settings("MNI152NLin2009cAsym"));
    assert!(!without.has_workflow("bold_stc_wf"));
    assert!(without.has_path("bold_reference_wf.validate", "bold_hmc_wf.mcflirt"));
}

#[test]
fn pepolar_fieldmap_is_preferred() {
    let graph = build(&run(100, None), &[phasediff(), pepolar()], &settings("MNI152NLin2009cAsym"));
    assert_well_formed(&graph);

    assert!(graph.has_workflow("pepolar_unwarp_wf"));
    assert!(!graph.has_workflow("phdiff_wf"));
    let report = graph.node("sdc_report").expect("sdc report");
    assert_eq!(report.interface.parameters()["method"], "epi");
    let target = graph
        .node("ds_report_sdc")
        .and_then(|n| n.sink_target())
        .expect("target");
    assert!(target.ends_with("sub-01_task-rest_desc-sdc_bold.svg"));
}

#[test]
fn forced_syn_runs_next_to_the_fieldmap() {
    let mut settings = settings("MNI152NLin2009cAsym");
    settings.force_syn = true;
    let graph = build(&run(100, None), &[phasediff()], &settings);
    assert_well_formed(&graph);

    assert!(graph.has_workflow("phdiff_wf"));
    assert!(graph.has_workflow("sdc_unwarp_wf"));
    assert!(graph.has_workflow("syn_sdc_wf"));
    assert!(graph.contains("ds_report_syn"));

    let (source, edge) = graph
        .source_of("bold_std_trans_wf.inputnode", "fieldwarp")
        .expect("fieldwarp");
    assert_eq!(source, "sdc_unwarp_wf.outputnode");
    assert_eq!(edge.source_port, "out_warp");
    assert!(!graph.has_path("syn_sdc_wf.syn", "bold_std_trans_wf.inputnode"));
}

#[test]
fn fieldmap_table_selects_correction_workflows() {
    let cases = [
        (true, false, false, true, false),
        (true, true, false, true, false),
        (true, false, true, true, true),
        (false, true, false, false, true),
        (false, false, true, false, true),
        (false, false, false, false, false),
    ];
    for (has_fieldmap, use_syn, force_syn, fieldmap_wf, syn_wf) in cases {
        let mut settings = settings("MNI152NLin2009cAsym");
        settings.use_syn = use_syn;
        settings.force_syn = force_syn;
        let fieldmaps = if has_fieldmap { vec![phasediff()] } else { Vec::new() };
        let graph = build(&run(100, None), &fieldmaps, &settings);
        let case = format!("fieldmap={has_fieldmap} use_syn={use_syn} force_syn={force_syn}");
        assert_eq!(graph.has_workflow("phdiff_wf"), fieldmap_wf, "{case}");
        assert_eq!(graph.has_workflow("syn_sdc_wf"), syn_wf, "{case}");
    }
}

#[test]
fn aroma_wiring() {
    let mut settings = settings("MNI152NLin2009cAsym");
    settings.use_aroma = true;
    let graph = build(&run(100, None), &[], &settings);
    assert_well_formed(&graph);

    let smooth = graph.node("ica_aroma_wf.smooth").expect("smoother");
    assert_eq!(smooth.interface.parameters()["fwhm"], 6.0);
    assert!(graph.has_path("ica_aroma_wf.smooth", "ica_aroma_wf.melodic"));
    assert!(graph.has_path("ica_aroma_wf.melodic", "ica_aroma_wf.ica_aroma"));
    let sink = graph
        .node("func_derivatives_wf.ds_aroma_std")
        .and_then(|n| n.sink_target())
        .expect("denoised sink");
    assert!(sink.ends_with("space-MNI152NLin6Asym_res-2_desc-smoothAROMAnonaggr_bold.nii.gz"));
}

#[test]
fn rebuilding_yields_the_same_graph() {
    let mut settings = settings("T1w MNI152NLin2009cAsym fsnative cifti:91k");
    settings.freesurfer = true;
    settings.use_aroma = true;
    let timing: Vec<f64> = (0..10).map(|i| f64::from(i) * 0.1).collect();
    let run = run(150, Some(timing));

    let first = build(&run, &[pepolar()], &settings);
    let second = build(&run, &[pepolar()], &settings);
    assert_well_formed(&first);
    assert_eq!(first.paths(), second.paths());
    assert_eq!(first.edge_refs(), second.edge_refs());
    assert!(first.has_workflow("bold_surf_wf"));
    assert!(first.has_workflow("bold_grayords_wf"));
}

#[test]
fn subject_workflow_connects_every_run() {
    let layout = MemoryLayout::new()
        .with_t1w("01", "/data/sub-01/anat/sub-01_T1w.nii.gz")
        .with_run(run(100, None))
        .with_fieldmap("01", BOLD, phasediff());
    let mut bold = settings("MNI152NLin2009cAsym fsnative");
    bold.freesurfer = true;
    let settings = SubjectSettings::new(bold);

    let graph = init_fmriprep_wf(&layout, &["01".to_string()], &settings)
        .expect("build")
        .flatten()
        .expect("valid");
    assert_well_formed(&graph);

    let subject = "single_subject_01_wf";
    let run_wf = format!("{subject}.func_preproc_task_rest_wf");
    assert!(graph.has_workflow(&format!("{run_wf}.phdiff_wf")));
    assert!(graph.has_path(
        &format!("{subject}.anat_preproc_wf.t1_2_fsnative"),
        &format!("{run_wf}.bold_surf_wf.itk2lta"),
    ));
    assert!(graph.has_path(
        &format!("{subject}.bidssrc"),
        &format!("{subject}.anat_preproc_wf.autorecon"),
    ));
    assert!(graph.contains(&format!("{subject}.ds_report_about")));
}
