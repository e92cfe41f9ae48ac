//! AFNI programs.

use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{File, Integer};

fn afni(name: &str, command: &str) -> ToolSpec {
    ToolSpec::external(name, command, Package::Afni)
}

/// Slice-timing correction to the middle of the acquisition.
#[must_use]
pub fn tshift(repetition_time: f64, slice_timing: &[f64]) -> ToolSpec {
    let first = slice_timing.iter().copied().fold(f64::INFINITY, f64::min);
    let last = slice_timing.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    afni("TShift", "3dTshift")
        .input("in_file", File)
        .optional("ignore", Integer)
        .output("out_file", File)
        .param("tr", format!("{repetition_time}s"))
        .param("slice_timing", slice_timing.to_vec())
        .param("tzero", (first + last) / 2.0)
        .param("outputtype", "NIFTI_GZ")
}

/// Nonlinear registration of a phase-encoding reversed pair.
#[must_use]
pub fn qwarp() -> ToolSpec {
    afni("QwarpPlusMinus", "3dQwarp")
        .input("in_file", File)
        .input("base_file", File)
        .output("warped_source", File)
        .output("source_warp", File)
        .param("pblur", vec![0.05, 0.05])
        .param("blur", vec![-1, -1])
        .param("noweight", true)
        .param("minpatch", 9)
        .param("nopadWARP", true)
}

/// Intensity uniformisation.
#[must_use]
pub fn unifize() -> ToolSpec {
    afni("Unifize", "3dUnifize")
        .input("in_file", File)
        .output("out_file", File)
        .param("t2", true)
        .param("outputtype", "NIFTI_GZ")
}

/// Brain mask from an EPI reference.
#[must_use]
pub fn automask() -> ToolSpec {
    afni("Automask", "3dAutomask")
        .input("in_file", File)
        .output("out_file", File)
        .param("dilate", 1)
        .param("outputtype", "NIFTI_GZ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_workflow::Interface;

    #[test]
    fn tshift_targets_middle_slice_time() {
        let tool = tshift(2.0, &[0.0, 1.0, 0.5, 1.5]);
        let params = tool.parameters();
        assert_eq!(params["tr"], "2s");
        assert_eq!(params["tzero"], 0.75);
        assert_eq!(tool.command(), Some("3dTshift"));
    }
}
