//! FreeSurfer programs and subject directory access.

use crate::io::{invalid, path_input, path_value};
use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{File, FileList, Text};
use fmriprep_workflow::{InputPort, Interface, OutputPort, PortValues, RunError, require};

fn freesurfer(name: &str, command: &str) -> ToolSpec {
    ToolSpec::external(name, command, Package::FreeSurfer)
}

/// Surface reconstruction of the anatomical image.
#[must_use]
pub fn recon_all() -> ToolSpec {
    freesurfer("ReconAll", "recon-all")
        .input("T1_files", FileList)
        .input("subjects_dir", Text)
        .input("subject_id", Text)
        .output("subjects_dir", Text)
        .output("subject_id", Text)
        .param("directive", "all")
        .mem_gb(5.0)
}

/// Robust affine initialisation for BBR.
#[must_use]
pub fn mri_coreg(dof: u8) -> ToolSpec {
    freesurfer("MRICoreg", "mri_coreg")
        .input("source_file", File)
        .input("subjects_dir", Text)
        .input("subject_id", Text)
        .output("out_lta_file", File)
        .param("dof", dof)
        .param("sep", vec![4])
        .param("ftol", 0.0001)
        .param("linmintol", 0.01)
}

/// Boundary-based registration of a T2*-weighted reference.
#[must_use]
pub fn bbregister(dof: u8) -> ToolSpec {
    freesurfer("BBRegister", "bbregister")
        .input("source_file", File)
        .input("subjects_dir", Text)
        .input("subject_id", Text)
        .optional("init_reg_file", File)
        .output("out_lta_file", File)
        .output("min_cost_file", File)
        .param("dof", dof)
        .param("contrast_type", "t2")
        .param("out_lta_file", true)
}

/// Samples a volume onto `target` surfaces of one hemisphere.
#[must_use]
pub fn sample_to_surface(target: &str, hemi: &str) -> ToolSpec {
    freesurfer("SampleToSurface", "mri_vol2surf")
        .input("source_file", File)
        .input("reg_file", File)
        .input("subjects_dir", Text)
        .input("subject_id", Text)
        .output("out_file", File)
        .param("target_subject", target)
        .param("hemi", hemi)
        .param("cortex_mask", true)
        .param("sampling_method", "average")
        .param("sampling_range", vec![0.0, 1.0, 0.2])
        .param("sampling_units", "frac")
        .param("out_type", "gii")
        .param("interp_method", "trilinear")
}

/// Converts between LTA and ITK transform formats.
#[must_use]
pub fn lta_convert(out: &str) -> ToolSpec {
    freesurfer("LTAConvert", "lta_convert")
        .input("in_lta", File)
        .output("out_file", File)
        .param("out", out)
}

/// Paths inside a FreeSurfer subject directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeSurferSource;

const SOURCE_FILES: [(&str, &str); 5] = [
    ("T1", "mri/T1.mgz"),
    ("brain", "mri/brain.mgz"),
    ("brainmask", "mri/brainmask.mgz"),
    ("aseg", "mri/aseg.mgz"),
    ("aparc_aseg", "mri/aparc+aseg.mgz"),
];

impl Interface for FreeSurferSource {
    fn name(&self) -> &str {
        "FreeSurferSource"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("subjects_dir", Text),
            InputPort::required("subject_id", Text),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        SOURCE_FILES
            .iter()
            .map(|(port, _)| OutputPort::new(*port, File))
            .collect()
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let subjects_dir = path_input(inputs, "subjects_dir")?;
        let subject_id = require(inputs, "subject_id")?
            .as_str()
            .ok_or_else(|| invalid("subject_id", "expected a label"))?;
        let subject = subjects_dir.join(subject_id);
        Ok(SOURCE_FILES
            .iter()
            .map(|(port, relative)| (port.to_string(), path_value(&subject.join(relative))))
            .collect())
    }
}
