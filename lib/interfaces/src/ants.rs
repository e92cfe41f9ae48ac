//! ANTs programs.

use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{File, FileList};

fn ants(name: &str, command: &str) -> ToolSpec {
    ToolSpec::external(name, command, Package::Ants)
}

/// Resampling through a chain of transforms.
#[must_use]
pub fn apply_transforms(interpolation: &str) -> ToolSpec {
    ants("ApplyTransforms", "antsApplyTransforms")
        .input("input_image", File)
        .input("reference_image", File)
        .input("transforms", FileList)
        .output("output_image", File)
        .param("interpolation", interpolation)
        .param("float", true)
}

/// Nearest-neighbour resampling, used for masks and labels.
#[must_use]
pub fn apply_transforms_nn() -> ToolSpec {
    apply_transforms("NearestNeighbor")
}

/// Image registration driven by a named settings preset.
#[must_use]
pub fn registration(preset: &str) -> ToolSpec {
    ants("Registration", "antsRegistration")
        .input("fixed_image", File)
        .input("moving_image", File)
        .optional("fixed_image_masks", FileList)
        .optional("moving_image_masks", FileList)
        .optional("initial_moving_transform", File)
        .output("forward_transforms", FileList)
        .output("reverse_transforms", FileList)
        .output("composite_transform", File)
        .output("inverse_composite_transform", File)
        .output("warped_image", File)
        .param("from_file", preset)
}

/// Symmetric normalisation restricted to the phase-encoding axis.
#[must_use]
pub fn syn_sdc(pe_axis: usize) -> ToolSpec {
    let mut restrict = [1e-6; 3];
    restrict[pe_axis.min(2)] = 1.0;
    registration("susceptibility_syn.json").param("restrict_deformation", restrict.to_vec())
}

/// Bias field correction.
#[must_use]
pub fn n4() -> ToolSpec {
    ants("N4BiasFieldCorrection", "N4BiasFieldCorrection")
        .input("input_image", File)
        .optional("mask_image", File)
        .output("output_image", File)
        .param("dimension", 3)
        .param("copy_header", true)
}

/// Applies the same transforms to every volume of a split series.
#[must_use]
pub fn multi_apply_transforms() -> ToolSpec {
    ants("MultiApplyTransforms", "antsApplyTransforms")
        .input("input_image", FileList)
        .input("reference_image", File)
        .input("transforms", FileList)
        .output("out_files", FileList)
        .param("interpolation", "LanczosWindowedSinc")
        .param("float", true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_workflow::Interface;

    #[test]
    fn nearest_neighbour_for_masks() {
        assert_eq!(
            apply_transforms_nn().parameters()["interpolation"],
            "NearestNeighbor"
        );
    }

    #[test]
    fn syn_restricts_to_pe_axis() {
        let params = syn_sdc(1).parameters();
        assert_eq!(params["restrict_deformation"][1], 1.0);
        assert_eq!(params["restrict_deformation"][0], 1e-6);
    }
}
