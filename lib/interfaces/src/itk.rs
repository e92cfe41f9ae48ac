//! Transform format conversions.

use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{File, FileList};

/// Converts MCFLIRT matrices to one ITK transform file.
#[must_use]
pub fn mcflirt_to_itk() -> ToolSpec {
    ToolSpec::external("MCFLIRT2ITK", "c3d_affine_tool", Package::C3d)
        .input("in_files", FileList)
        .input("in_reference", File)
        .input("in_source", File)
        .output("out_file", File)
        .param("fsl2ras", true)
        .param("itk_transform", true)
}

/// Converts one FSL matrix to ITK.
#[must_use]
pub fn c3d_affine_tool() -> ToolSpec {
    ToolSpec::external("C3dAffineTool", "c3d_affine_tool", Package::C3d)
        .input("transform_file", File)
        .input("reference_file", File)
        .input("source_file", File)
        .output("itk_transform", File)
        .param("fsl2ras", true)
        .param("itk_transform", true)
}
