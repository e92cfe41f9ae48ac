//! Plumbing operations: list merging, keyed selection, transform choice
//! and the builtin image helpers.

use crate::io::{invalid, path_input, read_text};
use crate::tool::{Package, ToolSpec};
use fmriprep_workflow::PortKind::{Any, Boolean, File, FileList, Integer, Text};
use fmriprep_workflow::{InputPort, Interface, OutputPort, PortValues, RunError, require};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;
use tracing::{info, warn};

/// Radius of the sphere whose points are compared between transforms.
pub const COMPARISON_RADIUS_MM: f64 = 50.0;

/// Displacement above which the refined transform is rejected.
pub const FALLBACK_THRESHOLD_MM: f64 = 15.0;

/// Concatenates `in1..inN` into one list, flattening list inputs and
/// skipping missing ones.
#[derive(Debug, Clone, Copy)]
pub struct Merge {
    numinputs: usize,
}

impl Merge {
    #[must_use]
    pub fn new(numinputs: usize) -> Self {
        Self { numinputs }
    }
}

impl Interface for Merge {
    fn name(&self) -> &str {
        "Merge"
    }

    fn inputs(&self) -> Vec<InputPort> {
        (1..=self.numinputs)
            .map(|i| InputPort::optional(format!("in{i}"), Any))
            .collect()
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out", FileList)]
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let mut merged = Vec::new();
        for i in 1..=self.numinputs {
            match inputs.get(&format!("in{i}")) {
                None | Some(JsonValue::Null) => {}
                Some(JsonValue::Array(items)) => merged.extend(items.iter().cloned()),
                Some(value) => merged.push(value.clone()),
            }
        }
        let mut outputs = PortValues::new();
        outputs.insert("out".to_string(), JsonValue::Array(merged));
        Ok(outputs)
    }
}

/// Picks the entry of `values` at the position of `key` in a fixed key list.
#[derive(Debug, Clone)]
pub struct KeySelect {
    keys: Vec<String>,
}

impl KeySelect {
    #[must_use]
    pub fn new<S: AsRef<str>>(keys: &[S]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
        }
    }
}

impl Interface for KeySelect {
    fn name(&self) -> &str {
        "KeySelect"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("key", Text),
            InputPort::required("values", Any),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("value", Any), OutputPort::new("key", Text)]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "keys": self.keys })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let key = require(inputs, "key")?
            .as_str()
            .ok_or_else(|| invalid("key", "expected a text key"))?;
        let index = self
            .keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| invalid("key", &format!("'{key}' is not one of {:?}", self.keys)))?;
        let values = require(inputs, "values")?
            .as_array()
            .ok_or_else(|| invalid("values", "expected a list"))?;
        if values.len() != self.keys.len() {
            return Err(invalid("values", "one value per key is required"));
        }

        let mut outputs = PortValues::new();
        outputs.insert("value".to_string(), values[index].clone());
        outputs.insert("key".to_string(), json!(key));
        Ok(outputs)
    }
}

/// How the co-registration result is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BbrMode {
    /// Keep BBR unless it moves too far from the initialisation.
    #[default]
    Auto,
    /// Always keep BBR.
    Force,
    /// Never run BBR.
    Disabled,
}

impl fmt::Display for BbrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Force => write!(f, "force"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Chooses between the initial and the BBR-refined co-registration.
#[derive(Debug, Clone, Copy)]
pub struct SelectTransform {
    mode: BbrMode,
}

impl SelectTransform {
    #[must_use]
    pub fn new(mode: BbrMode) -> Self {
        Self { mode }
    }
}

/// Parses a whitespace-separated 4×4 affine.
fn parse_affine(text: &str) -> Option<[[f64; 4]; 4]> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 16 {
        return None;
    }
    let mut affine = [[0.0; 4]; 4];
    for (k, value) in values.iter().take(16).enumerate() {
        affine[k / 4][k % 4] = *value;
    }
    Some(affine)
}

fn apply(affine: &[[f64; 4]; 4], point: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (row, value) in out.iter_mut().enumerate() {
        *value = affine[row][3]
            + (0..3).map(|col| affine[row][col] * point[col]).sum::<f64>();
    }
    out
}

/// Largest displacement between two affines over the face centres of a
/// cube inscribed in a sphere of `radius` millimetres.
#[must_use]
pub fn max_displacement(a: &[[f64; 4]; 4], b: &[[f64; 4]; 4], radius: f64) -> f64 {
    let mut worst: f64 = 0.0;
    for axis in 0..3 {
        for sign in [-1.0, 1.0] {
            let mut point = [0.0; 3];
            point[axis] = sign * radius;
            let (pa, pb) = (apply(a, point), apply(b, point));
            let distance = pa
                .iter()
                .zip(pb)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt();
            worst = worst.max(distance);
        }
    }
    worst
}

impl Interface for SelectTransform {
    fn name(&self) -> &str {
        "SelectTransform"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("init_xfm", File),
            InputPort::optional("refined_xfm", File),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new("out_xfm", File),
            OutputPort::new("fallback", Boolean),
        ]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "use_bbr": self.mode.to_string() })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let init = path_input(inputs, "init_xfm")?;
        let fallback = match self.mode {
            BbrMode::Disabled => true,
            BbrMode::Force => false,
            BbrMode::Auto => {
                let refined = path_input(inputs, "refined_xfm")?;
                let a = parse_affine(&read_text(&init)?)
                    .ok_or_else(|| invalid("init_xfm", "expected a 4x4 affine"))?;
                let b = parse_affine(&read_text(&refined)?)
                    .ok_or_else(|| invalid("refined_xfm", "expected a 4x4 affine"))?;
                let displacement = max_displacement(&a, &b, COMPARISON_RADIUS_MM);
                info!(displacement, "compared BBR against its initialisation");
                if displacement > FALLBACK_THRESHOLD_MM {
                    warn!(displacement, "BBR moved too far, falling back to the initial transform");
                    true
                } else {
                    false
                }
            }
        };

        let chosen = if fallback {
            inputs["init_xfm"].clone()
        } else {
            require(inputs, "refined_xfm")?.clone()
        };
        let mut outputs = PortValues::new();
        outputs.insert("out_xfm".to_string(), chosen);
        outputs.insert("fallback".to_string(), JsonValue::Bool(fallback));
        Ok(outputs)
    }
}

/// Checks the header of a series and reports fixes applied.
#[must_use]
pub fn validate_image() -> ToolSpec {
    ToolSpec::builtin("ValidateImage")
        .input("in_file", File)
        .output("out_file", File)
        .output("out_report", File)
}

/// Median of the steady-state volumes and the count of leading
/// non-steady-state volumes.
#[must_use]
pub fn estimate_reference_image() -> ToolSpec {
    ToolSpec::builtin("EstimateReferenceImage")
        .input("in_file", File)
        .optional("sbref_file", File)
        .output("ref_image", File)
        .output("n_volumes_to_discard", Integer)
        .mem_gb(1.0)
}

/// Reference grid for resampling into a template.
#[must_use]
pub fn generate_sampling_reference() -> ToolSpec {
    ToolSpec::builtin("GenerateSamplingReference")
        .input("moving_image", File)
        .input("fixed_image", File)
        .optional("fov_mask", File)
        .output("out_file", File)
}

/// Copies the header transform of `hdr_file` onto `in_file`.
#[must_use]
pub fn copy_xform() -> ToolSpec {
    ToolSpec::builtin("CopyXForm")
        .input("in_file", File)
        .input("hdr_file", File)
        .output("out_file", File)
}

/// Concatenates volumes into a series.
#[must_use]
pub fn merge_series(compress: bool) -> ToolSpec {
    ToolSpec::builtin("MergeSeries")
        .input("in_files", FileList)
        .input("header_source", File)
        .output("out_file", File)
        .param("compress", compress)
}

/// CIFTI dense time series from volumetric and surface samples.
#[must_use]
pub fn generate_cifti(density: &str, repetition_time: f64) -> ToolSpec {
    ToolSpec::builtin("GenerateCifti")
        .input("bold_file", File)
        .input("surface_bolds", FileList)
        .output("cifti_bold", File)
        .output("cifti_metadata", File)
        .param("grayordinates", density)
        .param("TR", repetition_time)
}

/// Smooths a fieldmap and removes its mean.
#[must_use]
pub fn field_enhance(bspline: bool, demean: bool) -> ToolSpec {
    ToolSpec::builtin("FieldEnhance")
        .input("in_file", File)
        .optional("in_mask", File)
        .output("out_file", File)
        .param("bspline_smooth", bspline)
        .param("demean", demean)
        .param("unwrap", false)
}

/// Masks the medial wall of a sampled surface with NaN.
#[must_use]
pub fn medial_nans() -> ToolSpec {
    ToolSpec::external("MedialNaNs", "wb_command", Package::Workbench)
        .input("in_file", File)
        .input("subjects_dir", Text)
        .output("out_file", File)
}
