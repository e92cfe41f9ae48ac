//! Sampling of the BOLD series onto FreeSurfer surfaces.

use fmriprep_core::Reference;
use fmriprep_core::spaces::CIFTI_SURFACE;
use fmriprep_interfaces::freesurfer::{lta_convert, sample_to_surface};
use fmriprep_interfaces::utility::medial_nans;
use fmriprep_interfaces::{DerivativesDataSink, Merge};
use fmriprep_workflow::{GraphError, INPUTNODE, Node, OUTPUTNODE, Workflow};
use std::path::Path;

pub const SURF_WF: &str = "bold_surf_wf";

pub const SURF_INPUTS: [&str; 4] = ["source_file", "subjects_dir", "subject_id", "t1_to_fsnative_forward"];

pub const HEMISPHERES: [&str; 2] = ["lh", "rh"];

/// Builds `bold_surf_wf`.
///
/// The T1w-space series is sampled onto each target mesh and hemisphere,
/// half-way between the white and pial surfaces. Medial-wall vertices of
/// template meshes are optionally set to NaN. Each target is written as
/// one GIFTI per hemisphere for the output references. When `cifti` is set
/// the `fsaverage5` pair is also exposed for the grayordinates workflow.
///
/// # Errors
///
/// Returns a [`GraphError`] when the wiring is inconsistent.
pub fn init_bold_surf_wf(
    surfaces: &[&Reference],
    medial_surface_nan: bool,
    cifti: bool,
    output_dir: &Path,
    source_file: &Path,
) -> Result<Workflow, GraphError> {
    let mut outputs = vec!["surfaces"];
    if cifti {
        outputs.push("cifti_surfaces");
    }
    let mut workflow = Workflow::with_io(SURF_WF, SURF_INPUTS.as_slice(), outputs.as_slice()).with_description(
        "The BOLD time-series were resampled onto the following surfaces (FreeSurfer \
         reconstruction nomenclature): "
            .to_string()
            + &surfaces.iter().map(|r| r.space.name()).collect::<Vec<_>>().join(", ")
            + ".",
    );

    workflow.add_nodes([
        Node::new("itk2lta", lta_convert("lta")).local(),
        Node::new("merge_surfaces", Merge::new(surfaces.len() * HEMISPHERES.len())).local(),
    ])?;
    workflow.connect(INPUTNODE, "itk2lta", &[("t1_to_fsnative_forward", "in_lta")])?;

    let source = source_file.display().to_string();
    let mut slot = 0;
    for reference in surfaces {
        let space = &reference.space;
        let target = space.name();
        let template_mesh = target != "fsnative";
        let pair = format!("merge_{target}");
        workflow.add_node(Node::new(pair.as_str(), Merge::new(HEMISPHERES.len())).local())?;

        for (i, hemi) in HEMISPHERES.iter().enumerate() {
            let sampler = format!("sampler_{target}_{hemi}");
            workflow.add_node(Node::new(sampler.as_str(), sample_to_surface(target, hemi)).with_mem_gb(3.0))?;
            workflow.connect(
                INPUTNODE,
                &sampler,
                &[
                    ("source_file", "source_file"),
                    ("subjects_dir", "subjects_dir"),
                    ("subject_id", "subject_id"),
                ],
            )?;
            workflow.connect("itk2lta", &sampler, &[("out_file", "reg_file")])?;

            let mut sampled = (sampler.clone(), "out_file");
            if medial_surface_nan && template_mesh {
                let masked = format!("medial_nans_{target}_{hemi}");
                workflow.add_node(Node::new(masked.as_str(), medial_nans()))?;
                workflow.connect(&sampler, &masked, &[("out_file", "in_file")])?;
                workflow.connect(INPUTNODE, &masked, &[("subjects_dir", "subjects_dir")])?;
                sampled = (masked, "out_file");
            }

            slot += 1;
            let merge_slot = format!("in{slot}");
            let pair_slot = format!("in{}", i + 1);
            workflow.connect(&sampled.0, "merge_surfaces", &[(sampled.1, merge_slot.as_str())])?;
            workflow.connect(&sampled.0, &pair, &[(sampled.1, pair_slot.as_str())])?;
        }

        if reference.output {
            let sink = format!("ds_bold_surfs_{target}");
            workflow.add_node(
                Node::new(
                    sink.as_str(),
                    DerivativesDataSink::new(output_dir, "func")
                        .with_space(space)
                        .with_extension(".func.gii")
                        .per_item("hemi", &["L", "R"]),
                )
                .with_input("source_file", source.clone())
                .local(),
            )?;
            workflow.connect(&pair, &sink, &[("out", "in_file")])?;
        }

        if cifti && target == CIFTI_SURFACE {
            workflow.connect(&pair, OUTPUTNODE, &[("out", "cifti_surfaces")])?;
        }
    }
    workflow.connect("merge_surfaces", OUTPUTNODE, &[("out", "surfaces")])?;
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    use fmriprep_core::Space;

    fn surface(mesh: &str, output: bool) -> Reference {
        Reference {
            space: Space::Surface {
                mesh: mesh.to_string(),
            },
            output,
        }
    }

    const BOLD: &str = "/data/sub-01/func/sub-01_task-rest_bold.nii.gz";

    #[test]
    fn one_sampler_per_target_and_hemisphere() {
        let native = surface("fsnative", true);
        let average = surface("fsaverage5", false);
        let graph = init_bold_surf_wf(&[&native, &average], true, true, Path::new("/out"), Path::new(BOLD))
            .expect("build")
            .flatten()
            .expect("valid");

        for target in ["fsnative", "fsaverage5"] {
            for hemi in HEMISPHERES {
                assert!(graph.contains(&format!("sampler_{target}_{hemi}")));
            }
        }
        assert!(!graph.contains("medial_nans_fsnative_lh"));
        assert!(graph.has_path("medial_nans_fsaverage5_rh", "merge_fsaverage5"));
        assert!(graph.contains("ds_bold_surfs_fsnative"));
        assert!(!graph.contains("ds_bold_surfs_fsaverage5"));
        let (source, _) = graph.source_of(OUTPUTNODE, "cifti_surfaces").expect("cifti pair");
        assert_eq!(source, "merge_fsaverage5");
    }

    #[test]
    fn hemispheres_get_distinct_names() {
        let average = surface("fsaverage", true);
        let graph = init_bold_surf_wf(&[&average], false, false, Path::new("/out"), Path::new(BOLD))
            .expect("build")
            .flatten()
            .expect("valid");
        let target = graph
            .node("ds_bold_surfs_fsaverage")
            .and_then(|n| n.sink_target())
            .expect("target");
        assert!(target.ends_with("sub-01_task-rest_space-fsaverage_bold.func.gii"));
        assert!(!graph.contains("medial_nans_fsaverage_lh"));
    }
}
