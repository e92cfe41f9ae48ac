//! Confound operations.
//!
//! ROI derivation works on images and is run by the executor (the numerics
//! live in [`fmriprep_signals::roi`]). Everything downstream of the masks
//! runs in-process on voxel matrices and regressor tables.

use crate::io::{
    count_input, invalid, json_number, optional_path, output_dir, path_input, path_value,
    paths_input, read_mask, read_matrix, read_text, write_matrix, write_text,
};
use crate::tool::ToolSpec;
use fmriprep_signals::{
    COSINE_CUTOFF_SECONDS, CompCor, CompCorError, CompCorResult, Components, ConfoundSources,
    ConfoundsTable, DEFAULT_VARIANCE_FRACTION, FD_RADIUS_MM, MOTION_COLUMNS, MotionSource,
    RoiParams, SignalError, compute_dvars, cosine_columns, cosine_names, detect_non_steady_state,
    framewise_displacement, high_variance_mask, normalize_motion, parse_motion_text, region_mean,
};
use fmriprep_workflow::PortKind::{Any, File, FileList, Integer, Number};
use fmriprep_workflow::{InputPort, Interface, OutputPort, PortValues, RunError};
use ndarray::{Array2, s};
use serde_json::{Value as JsonValue, json};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default budget of a CompCor decomposition when the builder sets none.
const DECOMPOSITION_MEM_GB: f64 = 1.0;

/// Default budget of operations that only read regressor tables.
const TABLE_MEM_GB: f64 = 0.1;

/// Thresholds and erodes a tissue probability map.
#[must_use]
pub fn tpm_to_roi(params: &RoiParams) -> ToolSpec {
    ToolSpec::builtin("TPM2ROI")
        .input("in_tpm", File)
        .input("in_mask", File)
        .output("roi_file", File)
        .output("eroded_mask", File)
        .param("prob_thresh", params.prob_thresh)
        .param("erode_mm", params.erode_mm)
        .param("erode_prop", params.erode_prop)
        .param("mask_erode_mm", params.mask_erode_mm)
        .param("mask_erode_prop", params.mask_erode_prop)
}

/// Sums the tissue probability maps at `indices`.
#[must_use]
pub fn add_tpms(indices: &[usize]) -> ToolSpec {
    ToolSpec::builtin("AddTPMs")
        .input("in_files", FileList)
        .output("out_file", File)
        .param("indices", indices.to_vec())
}

/// Clips a mask against another.
#[must_use]
pub fn apply_mask() -> ToolSpec {
    ToolSpec::builtin("ApplyMask")
        .input("in_file", File)
        .input("in_mask", File)
        .output("out_file", File)
}

fn signal_failure(port: &str, err: &SignalError) -> RunError {
    RunError::InvalidInput {
        port: port.to_string(),
        reason: err.to_string(),
    }
}

fn write_table(path: &Path, table: &ConfoundsTable) -> Result<(), RunError> {
    let file = std::fs::File::create(path).map_err(|e| RunError::Failed {
        reason: format!("{}: {e}", path.display()),
    })?;
    table
        .write_tsv(file)
        .map_err(|e| RunError::Failed { reason: e.to_string() })
}

fn read_table(path: &Path) -> Result<ConfoundsTable, RunError> {
    let file = std::fs::File::open(path).map_err(|e| RunError::Failed {
        reason: format!("{}: {e}", path.display()),
    })?;
    ConfoundsTable::read_tsv(file).map_err(|e| RunError::Failed {
        reason: format!("{}: {e}", path.display()),
    })
}

fn outputs<const N: usize>(pairs: [(&str, JsonValue); N]) -> PortValues {
    pairs
        .into_iter()
        .map(|(port, value)| (port.to_string(), value))
        .collect()
}

/// Rewrites a realignment parameter file as `X Y Z RotX RotY RotZ`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeMotionParams {
    pub format: MotionSource,
}

impl Interface for NormalizeMotionParams {
    fn name(&self) -> &str {
        "NormalizeMotionParams"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![InputPort::required("in_file", File)]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out_file", File)]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "format": self.format })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let in_file = path_input(inputs, "in_file")?;
        let raw = parse_motion_text(&read_text(&in_file)?)
            .map_err(|e| signal_failure("in_file", &e))?;
        let normalized =
            normalize_motion(raw.view(), self.format).map_err(|e| signal_failure("in_file", &e))?;
        let out_file = output_dir(inputs, "in_file").join("motion_params.txt");
        write_matrix(&out_file, normalized.view())?;
        Ok(outputs([("out_file", path_value(&out_file))]))
    }
}

/// Framewise displacement from normalised motion parameters.
#[derive(Debug, Clone, Copy)]
pub struct FramewiseDisplacement {
    pub radius_mm: f64,
}

impl Default for FramewiseDisplacement {
    fn default() -> Self {
        Self {
            radius_mm: FD_RADIUS_MM,
        }
    }
}

impl Interface for FramewiseDisplacement {
    fn name(&self) -> &str {
        "FramewiseDisplacement"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![InputPort::required("in_file", File)]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new("out_file", File),
            OutputPort::new("fd_average", Number),
        ]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "radius": self.radius_mm, "parameter_source": "SPM" })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let in_file = path_input(inputs, "in_file")?;
        let params = read_matrix(&in_file)?;
        let fd = framewise_displacement(params.view(), self.radius_mm)
            .map_err(|e| signal_failure("in_file", &e))?;
        let average = fd.iter().sum::<f64>() / fd.len().max(1) as f64;

        let mut table = ConfoundsTable::new(fd.len());
        table
            .push("FramewiseDisplacement", fd)
            .map_err(|e| signal_failure("in_file", &e))?;
        let out_file = output_dir(inputs, "in_file").join("fd_power_2012.txt");
        write_table(&out_file, &table)?;
        Ok(outputs([
            ("out_file", path_value(&out_file)),
            ("fd_average", json_number(average)),
        ]))
    }
}

/// The three DVARS variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeDvars;

impl Interface for ComputeDvars {
    fn name(&self) -> &str {
        "ComputeDVARS"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("in_file", File),
            InputPort::required("in_mask", File),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new("out_all", File),
            OutputPort::new("avg_std", Number),
        ]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "save_all": true, "remove_zerovariance": true })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let in_file = path_input(inputs, "in_file")?;
        let data = read_matrix(&in_file)?;
        let mask = read_mask(&path_input(inputs, "in_mask")?)?;
        if mask.len() != data.nrows() {
            return Err(invalid("in_mask", "mask does not match the voxel count"));
        }
        let rows: Vec<usize> = (0..mask.len()).filter(|&v| mask[v]).collect();
        let dvars = compute_dvars(data.select(ndarray::Axis(0), &rows).view())
            .map_err(|e| signal_failure("in_file", &e))?;
        let average = dvars.std.iter().sum::<f64>() / dvars.std.len().max(1) as f64;

        let mut table = ConfoundsTable::new(dvars.std.len());
        for (name, series) in [
            ("stdDVARS", dvars.std),
            ("non-stdDVARS", dvars.nonstd),
            ("vx-wisestdDVARS", dvars.vxstd),
        ] {
            table.push(name, series).map_err(|e| signal_failure("in_file", &e))?;
        }
        let out_file = output_dir(inputs, "in_file").join("dvars.tsv");
        write_table(&out_file, &table)?;
        Ok(outputs([
            ("out_all", path_value(&out_file)),
            ("avg_std", json_number(average)),
        ]))
    }
}

/// Mean signal within each label mask.
#[derive(Debug, Clone)]
pub struct SignalExtraction {
    pub class_labels: Vec<String>,
}

impl SignalExtraction {
    #[must_use]
    pub fn new<S: AsRef<str>>(class_labels: &[S]) -> Self {
        Self {
            class_labels: class_labels.iter().map(|l| l.as_ref().to_string()).collect(),
        }
    }
}

impl Interface for SignalExtraction {
    fn name(&self) -> &str {
        "SignalExtraction"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("in_file", File),
            InputPort::required("label_files", FileList),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out_file", File)]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "class_labels": self.class_labels })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let in_file = path_input(inputs, "in_file")?;
        let data = read_matrix(&in_file)?;
        let labels = paths_input(inputs, "label_files")?;
        if labels.len() != self.class_labels.len() {
            return Err(invalid("label_files", "one mask per class label is required"));
        }

        let mut table = ConfoundsTable::new(data.ncols());
        for (label, mask_file) in self.class_labels.iter().zip(&labels) {
            let mean = region_mean(data.view(), &read_mask(mask_file)?)
                .map_err(|e| signal_failure("label_files", &e))?;
            table
                .push(label.clone(), mean)
                .map_err(|e| signal_failure("label_files", &e))?;
        }
        let out_file = output_dir(inputs, "in_file").join("signals.tsv");
        write_table(&out_file, &table)?;
        Ok(outputs([("out_file", path_value(&out_file))]))
    }
}

/// Temporal or anatomical CompCor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompCorVariant {
    /// Highest-variance voxels within the masks.
    Temporal,
    /// All voxels within the union of the masks.
    Anatomical,
}

impl CompCorVariant {
    fn column_prefix(self) -> &'static str {
        match self {
            Self::Temporal => "tCompCor",
            Self::Anatomical => "aCompCor",
        }
    }
}

/// CompCor components with a cosine drift prefilter.
#[derive(Debug, Clone)]
pub struct CompCorNode {
    pub variant: CompCorVariant,
    pub n_components: usize,
    pub repetition_time: f64,
    /// Share of voxels kept by temporal CompCor.
    pub variance_fraction: f64,
}

impl CompCorNode {
    #[must_use]
    pub fn temporal(repetition_time: f64) -> Self {
        Self {
            variant: CompCorVariant::Temporal,
            n_components: fmriprep_signals::DEFAULT_COMPONENTS,
            repetition_time,
            variance_fraction: DEFAULT_VARIANCE_FRACTION,
        }
    }

    #[must_use]
    pub fn anatomical(repetition_time: f64) -> Self {
        Self {
            variant: CompCorVariant::Anatomical,
            ..Self::temporal(repetition_time)
        }
    }

    fn settings(&self, ignore: usize) -> CompCor {
        CompCor::new(self.repetition_time)
            .with_components(self.n_components)
            .ignoring(ignore)
    }

    /// Writes the components and the cosine pre-filter of a run of
    /// `volumes`, the first `ignore` of which were left out of the fit.
    fn write_outputs(
        &self,
        inputs: &PortValues,
        volumes: usize,
        ignore: usize,
        result: &CompCorResult,
    ) -> Result<PortValues, RunError> {
        let ignore = ignore.min(volumes);
        let prefix = self.variant.column_prefix();
        let dir = output_dir(inputs, "realigned_file");
        let mut components = ConfoundsTable::new(volumes);
        components
            .push_matrix(&result.names(prefix), result.components.view())
            .map_err(|e| signal_failure("realigned_file", &e))?;
        let components_file = dir.join(format!("{}_components.tsv", prefix.to_lowercase()));
        write_table(&components_file, &components)?;

        // The count follows the run; the basis spans the kept volumes.
        let count = cosine_regressor_count(volumes, self.repetition_time);
        let mut padded = Array2::zeros((volumes, count));
        padded
            .slice_mut(s![ignore.., ..])
            .assign(&cosine_columns(volumes - ignore, count));
        let mut pre_filter = ConfoundsTable::new(volumes);
        pre_filter
            .push_matrix(&cosine_names(count), padded.view())
            .map_err(|e| signal_failure("realigned_file", &e))?;
        let pre_filter_file = dir.join(format!("{}_pre_filter.tsv", prefix.to_lowercase()));
        write_table(&pre_filter_file, &pre_filter)?;

        Ok(outputs([
            ("components_file", path_value(&components_file)),
            ("pre_filter_file", path_value(&pre_filter_file)),
            (
                "variance_explained",
                JsonValue::Array(result.variance_explained.iter().map(|v| json_number(*v)).collect()),
            ),
        ]))
    }

    fn select_voxels(
        &self,
        data: &Array2<f64>,
        mask_files: &[PathBuf],
    ) -> Result<Vec<bool>, RunError> {
        let mut mask = vec![false; data.nrows()];
        for file in mask_files {
            let other = read_mask(file)?;
            if other.len() != mask.len() {
                return Err(invalid("mask_files", "mask does not match the voxel count"));
            }
            for (m, o) in mask.iter_mut().zip(other) {
                *m |= o;
            }
        }
        match self.variant {
            CompCorVariant::Anatomical => Ok(mask),
            CompCorVariant::Temporal => {
                high_variance_mask(data.view(), &mask, self.variance_fraction)
                    .map_err(|e| signal_failure("mask_files", &e))
            }
        }
    }
}

impl Interface for CompCorNode {
    fn name(&self) -> &str {
        match self.variant {
            CompCorVariant::Temporal => "TCompCor",
            CompCorVariant::Anatomical => "ACompCor",
        }
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("realigned_file", File),
            InputPort::required("mask_files", FileList),
            InputPort::optional("ignore_initial_volumes", Integer),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new("components_file", File),
            OutputPort::new("pre_filter_file", File),
            OutputPort::new("variance_explained", Any),
        ]
    }

    fn parameters(&self) -> JsonValue {
        json!({
            "components": self.n_components,
            "repetition_time": self.repetition_time,
            "pre_filter": "cosine",
            "high_pass_cutoff": COSINE_CUTOFF_SECONDS,
            "percentile_threshold": self.variance_fraction,
        })
    }

    fn default_mem_gb(&self) -> f64 {
        DECOMPOSITION_MEM_GB
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let realigned = path_input(inputs, "realigned_file")?;
        let data = read_matrix(&realigned)?;
        let mask = self.select_voxels(&data, &paths_input(inputs, "mask_files")?)?;
        let ignore = count_input(inputs, "ignore_initial_volumes")?;

        let result = self
            .settings(ignore)
            .compute(data.view(), &mask)
            .map_err(|e| match e {
                CompCorError::Signal(err) => signal_failure("realigned_file", &err),
                unstable => RunError::Unstable {
                    reason: unstable.to_string(),
                },
            })?;
        debug!(
            interface = self.name(),
            voxels = mask.iter().filter(|m| **m).count(),
            "computed components"
        );
        self.write_outputs(inputs, data.ncols(), ignore, &result)
    }

    /// Writes `n/a` components so the confounds table keeps its columns.
    fn sentinel_outputs(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let data = read_matrix(&path_input(inputs, "realigned_file")?)?;
        let volumes = data.ncols();
        let ignore = count_input(inputs, "ignore_initial_volumes")?.min(volumes);
        warn!(interface = self.name(), volumes, "writing n/a components");
        self.write_outputs(inputs, volumes, ignore, &self.settings(ignore).sentinel(volumes))
    }
}

/// Counts leading non-steady-state volumes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonSteadyStateDetector;

impl Interface for NonSteadyStateDetector {
    fn name(&self) -> &str {
        "NonSteadyStateDetector"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![InputPort::required("in_file", File)]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("n_volumes_to_discard", Integer)]
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let data = read_matrix(&path_input(inputs, "in_file")?)?;
        let count = detect_non_steady_state(data.view());
        Ok(outputs([("n_volumes_to_discard", json!(count))]))
    }
}

/// Prepends a header row to a headerless regressor file.
#[derive(Debug, Clone)]
pub struct AddTsvHeader {
    pub columns: Vec<String>,
}

impl AddTsvHeader {
    #[must_use]
    pub fn motion() -> Self {
        Self {
            columns: MOTION_COLUMNS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Interface for AddTsvHeader {
    fn name(&self) -> &str {
        "AddTSVHeader"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![InputPort::required("in_file", File)]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out_file", File)]
    }

    fn parameters(&self) -> JsonValue {
        json!({ "columns": self.columns })
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let in_file = path_input(inputs, "in_file")?;
        let data = read_matrix(&in_file)?;
        let mut table = ConfoundsTable::new(data.nrows());
        table
            .push_matrix(&self.columns, data.view())
            .map_err(|e| signal_failure("in_file", &e))?;
        let stem = in_file
            .file_stem()
            .map_or_else(|| "regressors".to_string(), |s| s.to_string_lossy().into_owned());
        let out_file = output_dir(inputs, "in_file").join(format!("{stem}_header.tsv"));
        write_table(&out_file, &table)?;
        Ok(outputs([("out_file", path_value(&out_file))]))
    }
}

/// Input ports of [`GatherConfounds`], in column order.
pub const GATHER_SOURCES: [&str; 7] = [
    "motion", "fd", "dvars", "signals", "cos_basis", "tcompcor", "acompcor",
];

/// Concatenates regressor tables into the confounds table and its sidecar.
///
/// `tcompcor_variance` and `acompcor_variance` carry the share of variance
/// of each component into the sidecar.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatherConfounds;

impl GatherConfounds {
    fn components(
        inputs: &PortValues,
        port: &str,
        variance_port: &str,
    ) -> Result<Option<Components>, RunError> {
        let Some(path) = optional_path(inputs, port) else {
            return Ok(None);
        };
        let variance_explained = match inputs.get(variance_port) {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(values)) => values
                .iter()
                .map(|v| v.as_f64().unwrap_or(f64::NAN))
                .collect(),
            Some(_) => return Err(invalid(variance_port, "expected a list of numbers")),
        };
        Ok(Some(Components {
            table: read_table(&path)?,
            variance_explained,
        }))
    }
}

impl Interface for GatherConfounds {
    fn name(&self) -> &str {
        "GatherConfounds"
    }

    fn inputs(&self) -> Vec<InputPort> {
        let mut inputs: Vec<InputPort> = GATHER_SOURCES
            .iter()
            .map(|port| InputPort::optional(*port, File))
            .collect();
        inputs.push(InputPort::optional("nss", Integer));
        inputs.push(InputPort::optional("tcompcor_variance", Any));
        inputs.push(InputPort::optional("acompcor_variance", Any));
        inputs
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![
            OutputPort::new("confounds_file", File),
            OutputPort::new("confounds_metadata", File),
            OutputPort::new("confounds_list", Any),
        ]
    }

    fn default_mem_gb(&self) -> f64 {
        TABLE_MEM_GB
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let table_at = |port: &str| optional_path(inputs, port).map(|p| read_table(&p)).transpose();
        let sources = ConfoundSources {
            motion: table_at("motion")?,
            framewise_displacement: table_at("fd")?,
            dvars: table_at("dvars")?,
            signals: table_at("signals")?,
            cosine: table_at("cos_basis")?,
            non_steady_state: count_input(inputs, "nss")?,
            tcompcor: Self::components(inputs, "tcompcor", "tcompcor_variance")?,
            acompcor: Self::components(inputs, "acompcor", "acompcor_variance")?,
        };
        let table = ConfoundsTable::gather(&sources).map_err(|e| match e {
            SignalError::Empty { .. } => RunError::MissingInput {
                port: GATHER_SOURCES.join("|"),
            },
            other => RunError::Failed {
                reason: other.to_string(),
            },
        })?;

        let mut listed: Vec<&str> = Vec::new();
        for port in GATHER_SOURCES {
            if port == "tcompcor" && sources.non_steady_state > 0 {
                listed.push("nss");
            }
            if optional_path(inputs, port).is_some() {
                listed.push(port);
            }
        }

        let dir = GATHER_SOURCES
            .iter()
            .find(|port| optional_path(inputs, port).is_some())
            .map_or_else(|| PathBuf::from("."), |port| output_dir(inputs, port));
        let confounds_file = dir.join("confounds.tsv");
        let metadata_file = dir.join("confounds.json");
        write_table(&confounds_file, &table)?;
        let sidecar = serde_json::to_string_pretty(&table.sidecar()).map_err(|e| RunError::Failed {
            reason: e.to_string(),
        })?;
        write_text(&metadata_file, &sidecar)?;
        debug!(columns = table.names().count(), rows = table.n_rows(), "gathered confounds");

        Ok(outputs([
            ("confounds_file", path_value(&confounds_file)),
            ("confounds_metadata", path_value(&metadata_file)),
            ("confounds_list", json!(listed)),
        ]))
    }
}

/// Appends the columns of one table to another.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinTsvColumns;

impl Interface for JoinTsvColumns {
    fn name(&self) -> &str {
        "JoinTSVColumns"
    }

    fn inputs(&self) -> Vec<InputPort> {
        vec![
            InputPort::required("in_file", File),
            InputPort::optional("join_file", File),
        ]
    }

    fn outputs(&self) -> Vec<OutputPort> {
        vec![OutputPort::new("out_file", File)]
    }

    fn run(&self, inputs: &PortValues) -> Result<PortValues, RunError> {
        let in_file = path_input(inputs, "in_file")?;
        let mut table = read_table(&in_file)?;
        match optional_path(inputs, "join_file") {
            Some(join_file) => {
                let other = read_table(&join_file)?;
                table
                    .join(other)
                    .map_err(|e| signal_failure("join_file", &e))?;
            }
            None => warn!("no table to join, passing confounds through"),
        }
        let out_file = output_dir(inputs, "in_file").join("confounds_joined.tsv");
        write_table(&out_file, &table)?;
        Ok(outputs([("out_file", path_value(&out_file))]))
    }
}

/// Number of cosine regressors for a run of `n_volumes`.
#[must_use]
pub fn cosine_regressor_count(n_volumes: usize, repetition_time: f64) -> usize {
    fmriprep_signals::cosine_count(n_volumes, repetition_time, COSINE_CUTOFF_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmriprep_workflow::{RetryPolicy, is_sentinel_values};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::fmt::Write as _;

    fn voxel_matrix(voxels: usize, volumes: usize) -> String {
        let mut text = String::new();
        for v in 0..voxels {
            let row: Vec<String> = (0..volumes)
                .map(|t| {
                    let signal = 100.0
                        + (t as f64 * 0.3 + v as f64).sin() * (1.0 + v as f64 / 10.0)
                        + ((v * 13 + t * 7) % 11) as f64 / 11.0;
                    format!("{signal}")
                })
                .collect();
            let _ = writeln!(text, "{}", row.join("\t"));
        }
        text
    }

    fn mask(voxels: usize, selected: impl Fn(usize) -> bool) -> String {
        (0..voxels).map(|v| if selected(v) { "1\n" } else { "0\n" }).collect()
    }

    fn inputs(pairs: &[(&str, JsonValue)]) -> PortValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn path(dir: &Path, name: &str) -> JsonValue {
        path_value(&dir.join(name))
    }

    #[test]
    fn motion_is_normalized_and_fd_computed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("bold_mcf.par"),
            "0 0 0 0 0 0\n0.01 0 0 1 -1 0\n0.01 0 0 1 -1 0\n",
        )
        .expect("write");

        let normalized = NormalizeMotionParams::default()
            .run(&inputs(&[("in_file", path(dir.path(), "bold_mcf.par"))]))
            .expect("normalize");
        let fd = FramewiseDisplacement::default()
            .run(&inputs(&[("in_file", normalized["out_file"].clone())]))
            .expect("fd");

        let table = read_table(Path::new(fd["out_file"].as_str().expect("path"))).expect("table");
        assert_eq!(table.n_rows(), 2);
        let values = table.column("FramewiseDisplacement").expect("column");
        assert!((values[0] - 2.5).abs() < 1e-9);
        assert!((fd["fd_average"].as_f64().expect("avg") - 1.25).abs() < 1e-9);
    }

    struct NoSleep;

    impl fmriprep_workflow::Sleeper for NoSleep {
        fn sleep(&self, _: std::time::Duration) {}
    }

    fn read_sidecar(values: &PortValues) -> JsonValue {
        let text = std::fs::read_to_string(values["confounds_metadata"].as_str().expect("path"))
            .expect("read");
        serde_json::from_str(&text).expect("json")
    }

    #[test]
    fn compcor_writes_six_components_and_cosines() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bold.tsv"), voxel_matrix(40, 64)).expect("write");
        std::fs::write(dir.path().join("mask.tsv"), mask(40, |v| v % 2 == 0)).expect("write");

        let node = CompCorNode::anatomical(2.0);
        let result = node
            .run(&inputs(&[
                ("realigned_file", path(dir.path(), "bold.tsv")),
                ("mask_files", json!([path(dir.path(), "mask.tsv")])),
                ("ignore_initial_volumes", json!(2)),
            ]))
            .expect("compcor");

        let components =
            read_table(Path::new(result["components_file"].as_str().expect("path"))).expect("read");
        assert_eq!(components.n_rows(), 64);
        assert_eq!(components.names().count(), 6);
        assert!(components.column("aCompCor00").is_some());

        // 64 volumes of 2 s give two cosines; the 62 kept ones alone give one.
        let cosines =
            read_table(Path::new(result["pre_filter_file"].as_str().expect("path"))).expect("read");
        assert_eq!(cosine_regressor_count(64, 2.0), 2);
        assert_eq!(cosine_regressor_count(62, 2.0), 1);
        assert_eq!(cosines.names().collect::<Vec<_>>(), vec!["Cosine00", "Cosine01"]);
        assert_eq!(cosines.n_rows(), 64);
        let first = cosines.column("Cosine00").expect("cosine");
        assert_eq!(&first[..2], &[0.0, 0.0]);
        assert!(!is_sentinel_values(&result));
    }

    #[test]
    fn exhausted_compcor_keeps_na_columns_in_the_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The last volume is missing in every voxel.
        let text = voxel_matrix(20, 63).replace('\n', "\tn/a\n");
        std::fs::write(dir.path().join("bold.tsv"), text).expect("write");
        std::fs::write(dir.path().join("mask.tsv"), mask(20, |_| true)).expect("write");
        let values = inputs(&[
            ("realigned_file", path(dir.path(), "bold.tsv")),
            ("mask_files", path(dir.path(), "mask.tsv")),
            ("ignore_initial_volumes", json!(2)),
        ]);

        let node = std::sync::Arc::new(CompCorNode::anatomical(2.0));
        let err = node.run(&values).expect_err("non-finite data");
        assert!(err.is_unstable());

        let retrying = fmriprep_workflow::Retrying::new(node, RetryPolicy::default());
        let mut rng = StdRng::seed_from_u64(5);
        let degraded = retrying
            .run_with(&values, &NoSleep, &mut rng)
            .expect("warn mode accepts sentinels");
        assert_eq!(degraded[fmriprep_workflow::DEGRADED_PORT], true);

        let gathered = GatherConfounds
            .run(&inputs(&[
                ("acompcor", degraded["components_file"].clone()),
                ("acompcor_variance", degraded["variance_explained"].clone()),
                ("cos_basis", degraded["pre_filter_file"].clone()),
            ]))
            .expect("gather");
        let table = read_table(Path::new(gathered["confounds_file"].as_str().expect("path")))
            .expect("read");
        assert_eq!(table.n_rows(), 64);
        let acompcor: Vec<&str> = table.names().filter(|n| n.starts_with("aCompCor")).collect();
        assert_eq!(acompcor.len(), 6);
        for name in acompcor {
            assert!(table.column(name).expect("column").iter().all(|v| v.is_nan()));
        }
        assert_eq!(
            table.names().filter(|n| n.starts_with("Cosine")).count(),
            cosine_regressor_count(64, 2.0)
        );

        let sidecar = read_sidecar(&gathered);
        assert_eq!(sidecar["aCompCor00"]["Method"], "aCompCor");
        assert!(sidecar["aCompCor00"]["VarianceExplained"].is_null());
        assert_eq!(sidecar["Cosine00"]["Cutoff"], 128.0);
    }

    #[test]
    fn empty_mask_degrades_under_retry() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bold.tsv"), voxel_matrix(10, 30)).expect("write");
        std::fs::write(dir.path().join("mask.tsv"), mask(10, |_| false)).expect("write");
        let values = inputs(&[
            ("realigned_file", path(dir.path(), "bold.tsv")),
            ("mask_files", path(dir.path(), "mask.tsv")),
        ]);

        let plain = CompCorNode::temporal(2.0).run(&values).expect("compcor");
        assert!(is_sentinel_values(&plain));
        let retrying = fmriprep_workflow::Retrying::new(
            std::sync::Arc::new(CompCorNode::temporal(2.0)),
            RetryPolicy::default(),
        );
        let mut rng = StdRng::seed_from_u64(11);
        let degraded = retrying
            .run_with(&values, &NoSleep, &mut rng)
            .expect("warn mode accepts sentinels");
        assert_eq!(degraded[fmriprep_workflow::DEGRADED_PORT], true);
    }

    #[test]
    fn dvars_and_signals_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bold.tsv"), voxel_matrix(20, 30)).expect("write");
        std::fs::write(dir.path().join("brain.tsv"), mask(20, |_| true)).expect("write");
        std::fs::write(dir.path().join("csf.tsv"), mask(20, |v| v < 5)).expect("write");
        std::fs::write(dir.path().join("wm.tsv"), mask(20, |v| v >= 15)).expect("write");

        let dvars = ComputeDvars
            .run(&inputs(&[
                ("in_file", path(dir.path(), "bold.tsv")),
                ("in_mask", path(dir.path(), "brain.tsv")),
            ]))
            .expect("dvars");
        let table = read_table(Path::new(dvars["out_all"].as_str().expect("path"))).expect("read");
        assert_eq!(
            table.names().collect::<Vec<_>>(),
            vec!["stdDVARS", "non-stdDVARS", "vx-wisestdDVARS"]
        );
        assert_eq!(table.n_rows(), 29);

        let signals = SignalExtraction::new(&["CSF", "WhiteMatter", "GlobalSignal"])
            .run(&inputs(&[
                ("in_file", path(dir.path(), "bold.tsv")),
                (
                    "label_files",
                    json!([
                        path(dir.path(), "csf.tsv"),
                        path(dir.path(), "wm.tsv"),
                        path(dir.path(), "brain.tsv")
                    ]),
                ),
            ]))
            .expect("signals");
        let table =
            read_table(Path::new(signals["out_file"].as_str().expect("path"))).expect("read");
        assert_eq!(table.n_rows(), 30);
        assert!(table.column("WhiteMatter").is_some());
    }

    #[test]
    fn gather_pads_and_orders_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = |name: &str| dir.path().join(name);
        std::fs::write(out("motion.txt"), "0\t0\t0\t0\t0\t0\n".repeat(100)).expect("write");
        let motion = AddTsvHeader::motion()
            .run(&inputs(&[("in_file", path_value(&out("motion.txt")))]))
            .expect("header");

        let mut fd = ConfoundsTable::new(99);
        fd.push("FramewiseDisplacement", vec![0.2; 99]).expect("push");
        write_table(&out("fd.tsv"), &fd).expect("write");

        let gathered = GatherConfounds
            .run(&inputs(&[
                ("fd", path_value(&out("fd.tsv"))),
                ("motion", motion["out_file"].clone()),
                ("nss", json!(2)),
            ]))
            .expect("gather");
        let table = read_table(Path::new(gathered["confounds_file"].as_str().expect("path")))
            .expect("read");
        assert_eq!(table.n_rows(), 100);
        let names: Vec<&str> = table.names().collect();
        assert_eq!(names[0], "X");
        assert_eq!(names[6], "FramewiseDisplacement");
        assert_eq!(&names[7..], &["NonSteadyState00", "NonSteadyState01"]);
        assert!(table.column("FramewiseDisplacement").expect("fd")[0].is_nan());
        assert_eq!(gathered["confounds_list"], json!(["motion", "fd"]));

        let sidecar = read_sidecar(&gathered);
        assert!(sidecar["X"]["Description"].is_string());
    }

    #[test]
    fn gather_describes_components_in_the_sidecar() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("bold.tsv"), voxel_matrix(40, 100)).expect("write");
        std::fs::write(dir.path().join("mask.tsv"), mask(40, |v| v < 30)).expect("write");
        let compcor = |node: CompCorNode| {
            node.run(&inputs(&[
                ("realigned_file", path(dir.path(), "bold.tsv")),
                ("mask_files", path(dir.path(), "mask.tsv")),
            ]))
            .expect("compcor")
        };
        let tcompcor = compcor(CompCorNode::temporal(2.0));
        let acompcor = compcor(CompCorNode::anatomical(2.0));

        let gathered = GatherConfounds
            .run(&inputs(&[
                ("cos_basis", tcompcor["pre_filter_file"].clone()),
                ("tcompcor", tcompcor["components_file"].clone()),
                ("tcompcor_variance", tcompcor["variance_explained"].clone()),
                ("acompcor", acompcor["components_file"].clone()),
                ("acompcor_variance", acompcor["variance_explained"].clone()),
                ("nss", json!(1)),
            ]))
            .expect("gather");
        assert_eq!(
            gathered["confounds_list"],
            json!(["cos_basis", "nss", "tcompcor", "acompcor"])
        );

        let sidecar = read_sidecar(&gathered);
        assert_eq!(sidecar["tCompCor00"]["Method"], "tCompCor");
        assert_eq!(sidecar["aCompCor05"]["Method"], "aCompCor");
        let share = sidecar["aCompCor00"]["VarianceExplained"].as_f64().expect("number");
        let expected = acompcor["variance_explained"][0].as_f64().expect("number");
        assert!((share - expected).abs() < 1e-12);
        assert_eq!(sidecar["Cosine00"]["Cutoff"], 128.0);
        assert!(sidecar["NonSteadyState00"]["Description"].is_string());
    }

    #[test]
    fn nss_detector_reads_voxel_matrix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut text = String::new();
        for v in 0..5 {
            let row: Vec<String> = (0..60)
                .map(|t| {
                    let base = 100.0 + v as f64 + if t % 2 == 0 { 0.5 } else { -0.5 };
                    format!("{}", if t < 3 { base * 3.0 } else { base })
                })
                .collect();
            let _ = writeln!(text, "{}", row.join("\t"));
        }
        std::fs::write(dir.path().join("bold.tsv"), text).expect("write");
        let result = NonSteadyStateDetector
            .run(&inputs(&[("in_file", path(dir.path(), "bold.tsv"))]))
            .expect("nss");
        assert_eq!(result["n_volumes_to_discard"], 3);
    }
}
