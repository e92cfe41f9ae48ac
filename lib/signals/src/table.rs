//! The confounds table: named columns, one row per volume.
//!
//! Series shorter than the run (FD and DVARS lose the first volume) are
//! left-padded with `NaN`, written as `n/a` in the TSV.

use crate::cosine::COSINE_CUTOFF_SECONDS;
use crate::error::SignalError;
use crate::nss::{non_steady_state_columns, non_steady_state_names};
use ndarray::{ArrayView2, Axis};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;
use std::io::{Read, Write};

const MISSING: &str = "n/a";

/// Column-named time series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfoundsTable {
    n_rows: usize,
    columns: Vec<(String, Vec<f64>)>,
    metadata: BTreeMap<String, JsonValue>,
}

/// The regressor tables that make up a run's confounds table.
///
/// Each table may be shorter than the run; [`ConfoundsTable::gather`]
/// left-pads it.
#[derive(Debug, Clone, Default)]
pub struct ConfoundSources {
    /// `X Y Z RotX RotY RotZ`.
    pub motion: Option<ConfoundsTable>,
    pub framewise_displacement: Option<ConfoundsTable>,
    /// The three DVARS variants.
    pub dvars: Option<ConfoundsTable>,
    /// Region means.
    pub signals: Option<ConfoundsTable>,
    /// Cosine drift basis.
    pub cosine: Option<ConfoundsTable>,
    /// Leading non-steady-state volumes.
    pub non_steady_state: usize,
    pub tcompcor: Option<Components>,
    pub acompcor: Option<Components>,
}

/// CompCor components and the share of variance each one explains.
///
/// A missing or `NaN` share is written as `null` in the sidecar.
#[derive(Debug, Clone, Default)]
pub struct Components {
    pub table: ConfoundsTable,
    pub variance_explained: Vec<f64>,
}

impl ConfoundSources {
    /// Rows of the longest source, `None` when there is none.
    #[must_use]
    pub fn n_rows(&self) -> Option<usize> {
        [
            &self.motion,
            &self.framewise_displacement,
            &self.dvars,
            &self.signals,
            &self.cosine,
        ]
        .into_iter()
        .flatten()
        .chain(self.tcompcor.iter().map(|c| &c.table))
        .chain(self.acompcor.iter().map(|c| &c.table))
        .map(ConfoundsTable::n_rows)
        .max()
    }
}

impl ConfoundsTable {
    #[must_use]
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Appends a column, left-padding it with `NaN` up to the row count.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::ShapeMismatch`] for a series longer than the
    /// table and [`SignalError::InvalidParameter`] for a duplicate name.
    pub fn push(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), SignalError> {
        let name = name.into();
        if values.len() > self.n_rows {
            return Err(SignalError::ShapeMismatch {
                what: name,
                expected: self.n_rows,
                found: values.len(),
            });
        }
        if self.column(&name).is_some() {
            return Err(SignalError::InvalidParameter {
                name,
                reason: "column already present".to_string(),
            });
        }
        let mut padded = vec![f64::NAN; self.n_rows - values.len()];
        padded.extend(values);
        self.columns.push((name, padded));
        Ok(())
    }

    /// Appends the columns of a volumes × k matrix under `names`.
    ///
    /// # Errors
    ///
    /// As [`ConfoundsTable::push`], plus a mismatch between names and columns.
    pub fn push_matrix(
        &mut self,
        names: &[String],
        matrix: ArrayView2<'_, f64>,
    ) -> Result<(), SignalError> {
        if names.len() != matrix.ncols() {
            return Err(SignalError::ShapeMismatch {
                what: "column names".to_string(),
                expected: matrix.ncols(),
                found: names.len(),
            });
        }
        for (name, column) in names.iter().zip(matrix.axis_iter(Axis(1))) {
            self.push(name.clone(), column.to_vec())?;
        }
        Ok(())
    }

    /// Attaches sidecar metadata to a column.
    pub fn describe(&mut self, name: &str, metadata: JsonValue) {
        self.metadata.insert(name.to_string(), metadata);
    }

    /// Appends every column of `other`.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::ShapeMismatch`] when the row counts differ.
    pub fn join(&mut self, other: ConfoundsTable) -> Result<(), SignalError> {
        if other.n_rows != self.n_rows {
            return Err(SignalError::ShapeMismatch {
                what: "joined table rows".to_string(),
                expected: self.n_rows,
                found: other.n_rows,
            });
        }
        for (name, values) in other.columns {
            self.push(name, values)?;
        }
        self.metadata.extend(other.metadata);
        Ok(())
    }

    /// Appends every column of `other`, left-padding shorter ones.
    fn extend_from(&mut self, other: &ConfoundsTable) -> Result<(), SignalError> {
        for (name, values) in &other.columns {
            self.push(name.clone(), values.clone())?;
        }
        Ok(())
    }

    /// Concatenates `sources` in the fixed column order: motion, FD, DVARS,
    /// region means, cosines, non-steady-state indicators, tCompCor,
    /// aCompCor. The table has as many rows as the longest source.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Empty`] without any source and
    /// [`SignalError::InvalidParameter`] when two sources share a column.
    pub fn gather(sources: &ConfoundSources) -> Result<Self, SignalError> {
        let n_rows = sources.n_rows().ok_or_else(|| SignalError::Empty {
            what: "confound sources".to_string(),
        })?;
        let mut table = Self::new(n_rows);

        for source in [
            &sources.motion,
            &sources.framewise_displacement,
            &sources.dvars,
            &sources.signals,
        ]
        .into_iter()
        .flatten()
        {
            table.extend_from(source)?;
        }
        if let Some(cosine) = &sources.cosine {
            table.extend_from(cosine)?;
            for name in cosine.names() {
                table.describe(name, json!({ "Cutoff": COSINE_CUTOFF_SECONDS }));
            }
        }
        if sources.non_steady_state > 0 {
            let count = sources.non_steady_state.min(n_rows);
            let columns = non_steady_state_columns(n_rows, count);
            table.push_matrix(&non_steady_state_names(count), columns.view())?;
        }
        for (method, components) in [
            ("tCompCor", &sources.tcompcor),
            ("aCompCor", &sources.acompcor),
        ] {
            let Some(components) = components else {
                continue;
            };
            table.extend_from(&components.table)?;
            for (k, name) in components.table.names().enumerate() {
                let variance = components
                    .variance_explained
                    .get(k)
                    .copied()
                    .unwrap_or(f64::NAN);
                table.describe(
                    name,
                    json!({ "Method": method, "VarianceExplained": finite_or_null(variance) }),
                );
            }
        }
        Ok(table)
    }

    /// Writes the table as tab-separated values with `n/a` for missing cells.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Table`] if writing fails.
    pub fn write_tsv<W: Write>(&self, writer: W) -> Result<(), SignalError> {
        let mut tsv = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
        tsv.write_record(self.names())?;
        for row in 0..self.n_rows {
            tsv.write_record(self.columns.iter().map(|(_, values)| {
                let value = values[row];
                if value.is_nan() {
                    MISSING.to_string()
                } else {
                    value.to_string()
                }
            }))?;
        }
        tsv.flush().map_err(|e| SignalError::Table {
            reason: e.to_string(),
        })
    }

    /// Reads a table written by [`ConfoundsTable::write_tsv`].
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Table`] for malformed input.
    pub fn read_tsv<R: Read>(reader: R) -> Result<Self, SignalError> {
        let mut tsv = csv::ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        let names: Vec<String> = tsv.headers()?.iter().map(ToString::to_string).collect();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
        for record in tsv.records() {
            let record = record?;
            for (column, cell) in columns.iter_mut().zip(record.iter()) {
                let value = if cell == MISSING {
                    f64::NAN
                } else {
                    cell.parse().map_err(|e| SignalError::Table {
                        reason: format!("'{cell}': {e}"),
                    })?
                };
                column.push(value);
            }
        }

        let n_rows = columns.first().map_or(0, Vec::len);
        let mut table = Self::new(n_rows);
        for (name, values) in names.into_iter().zip(columns) {
            table.push(name, values)?;
        }
        Ok(table)
    }

    /// JSON sidecar describing each column.
    #[must_use]
    pub fn sidecar(&self) -> JsonValue {
        let mut sidecar = Map::new();
        for (name, _) in &self.columns {
            let mut entry = Map::new();
            if let Some(description) = describe_column(name) {
                entry.insert("Description".to_string(), json!(description));
            }
            if let Some(JsonValue::Object(extra)) = self.metadata.get(name) {
                entry.extend(extra.clone());
            }
            sidecar.insert(name.clone(), JsonValue::Object(entry));
        }
        JsonValue::Object(sidecar)
    }
}

fn finite_or_null(value: f64) -> JsonValue {
    if value.is_finite() { json!(value) } else { JsonValue::Null }
}

fn describe_column(name: &str) -> Option<&'static str> {
    let description = match name {
        "X" | "Y" | "Z" => "Translation (mm)",
        "RotX" | "RotY" | "RotZ" => "Rotation (rad)",
        "FramewiseDisplacement" => "Framewise displacement (Power et al.)",
        "stdDVARS" => "Standardized DVARS",
        "non-stdDVARS" => "DVARS after intensity normalization",
        "vx-wisestdDVARS" => "Voxel-wise standardized DVARS",
        "CSF" => "Mean signal in the cerebrospinal fluid mask",
        "WhiteMatter" => "Mean signal in the white matter mask",
        "GlobalSignal" => "Mean signal in the brain mask",
        _ if name.starts_with("Cosine") => "Discrete cosine high-pass basis",
        _ if name.starts_with("NonSteadyState") => "Non-steady-state volume indicator",
        _ if name.starts_with("tCompCor") => "Temporal CompCor component",
        _ if name.starts_with("aCompCor") => "Anatomical CompCor component",
        _ if name.starts_with("AROMAAggrComp") => "ICA-AROMA noise component",
        _ => return None,
    };
    Some(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compcor::CompCorResult;
    use crate::cosine::{cosine_basis, cosine_names};
    use crate::motion::MOTION_COLUMNS;
    use ndarray::Array2;

    fn columns(n_rows: usize, named: &[(&str, Vec<f64>)]) -> ConfoundsTable {
        let mut table = ConfoundsTable::new(n_rows);
        for (name, values) in named {
            table.push(*name, values.clone()).expect("push");
        }
        table
    }

    fn matrix(names: &[String], values: &Array2<f64>) -> ConfoundsTable {
        let mut table = ConfoundsTable::new(values.nrows());
        table.push_matrix(names, values.view()).expect("push");
        table
    }

    fn compcor(prefix: &str, volumes: usize) -> Components {
        let result = CompCorResult {
            components: Array2::from_shape_fn((volumes, 6), |(t, k)| (t * (k + 1)) as f64),
            variance_explained: vec![0.3, 0.2, 0.1, 0.05, 0.02, 0.01],
        };
        Components {
            table: matrix(&result.names(prefix), &result.components),
            variance_explained: result.variance_explained,
        }
    }

    fn full_sources(volumes: usize) -> ConfoundSources {
        let motion: Vec<String> = MOTION_COLUMNS.iter().map(ToString::to_string).collect();
        let cosine = cosine_basis(volumes, 2.0, COSINE_CUTOFF_SECONDS);
        ConfoundSources {
            motion: Some(matrix(&motion, &Array2::zeros((volumes, 6)))),
            framewise_displacement: Some(columns(
                volumes - 1,
                &[("FramewiseDisplacement", vec![0.1; volumes - 1])],
            )),
            dvars: Some(columns(
                volumes - 1,
                &[
                    ("stdDVARS", vec![1.0; volumes - 1]),
                    ("non-stdDVARS", vec![20.0; volumes - 1]),
                    ("vx-wisestdDVARS", vec![1.1; volumes - 1]),
                ],
            )),
            signals: Some(columns(
                volumes,
                &[
                    ("CSF", vec![1.0; volumes]),
                    ("WhiteMatter", vec![2.0; volumes]),
                    ("GlobalSignal", vec![3.0; volumes]),
                ],
            )),
            cosine: Some(matrix(&cosine_names(cosine.ncols()), &cosine)),
            non_steady_state: 2,
            tcompcor: Some(compcor("tCompCor", volumes)),
            acompcor: Some(compcor("aCompCor", volumes)),
        }
    }

    #[test]
    fn gather_full_column_set() {
        let table = ConfoundsTable::gather(&full_sources(100)).expect("gather");
        assert_eq!(table.n_rows(), 100);

        let names: Vec<&str> = table.names().collect();
        assert_eq!(&names[..7], &["X", "Y", "Z", "RotX", "RotY", "RotZ", "FramewiseDisplacement"]);
        assert_eq!(&names[7..10], &["stdDVARS", "non-stdDVARS", "vx-wisestdDVARS"]);
        assert_eq!(&names[10..13], &["CSF", "WhiteMatter", "GlobalSignal"]);
        assert_eq!(&names[13..15], &["Cosine00", "Cosine01"]);
        assert_eq!(&names[15..17], &["NonSteadyState00", "NonSteadyState01"]);
        assert_eq!(names.iter().filter(|n| n.starts_with("tCompCor")).count(), 6);
        assert_eq!(names.iter().filter(|n| n.starts_with("aCompCor")).count(), 6);
        assert_eq!(names.last(), Some(&"aCompCor05"));
    }

    #[test]
    fn short_series_are_left_padded() {
        let table = ConfoundsTable::gather(&full_sources(100)).expect("gather");
        let fd = table.column("FramewiseDisplacement").expect("fd");
        assert_eq!(fd.len(), 100);
        assert!(fd[0].is_nan());
        assert!((fd[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn long_series_are_rejected() {
        let mut table = ConfoundsTable::new(3);
        let err = table.push("CSF", vec![0.0; 4]).unwrap_err();
        assert!(matches!(err, SignalError::ShapeMismatch { .. }));
        table.push("CSF", vec![0.0; 3]).expect("push");
        assert!(table.push("CSF", vec![0.0; 3]).is_err());
    }

    #[test]
    fn tsv_writes_missing_as_na() {
        let mut table = ConfoundsTable::new(3);
        table.push("FramewiseDisplacement", vec![0.5, 0.25]).expect("push");
        table.push("CSF", vec![1.0, 2.0, 3.0]).expect("push");

        let mut out = Vec::new();
        table.write_tsv(&mut out).expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "FramewiseDisplacement\tCSF\nn/a\t1\n0.5\t2\n0.25\t3\n");

        let parsed = ConfoundsTable::read_tsv(text.as_bytes()).expect("read");
        assert_eq!(parsed.n_rows(), 3);
        assert!(parsed.column("FramewiseDisplacement").expect("fd")[0].is_nan());
        assert_eq!(parsed.column("CSF"), Some(&[1.0, 2.0, 3.0][..]));
    }

    #[test]
    fn tsv_file_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sub-01_task-rest_desc-confounds_regressors.tsv");
        let table = ConfoundsTable::gather(&full_sources(100)).expect("gather");
        table
            .write_tsv(std::fs::File::create(&path).expect("create"))
            .expect("write");
        let parsed = ConfoundsTable::read_tsv(std::fs::File::open(&path).expect("open"))
            .expect("read");
        assert_eq!(parsed.n_rows(), 100);
        assert_eq!(parsed.names().count(), table.names().count());
    }

    #[test]
    fn join_requires_matching_rows() {
        let mut table = ConfoundsTable::new(4);
        let mut aroma = ConfoundsTable::new(4);
        aroma.push("AROMAAggrComp01", vec![0.0; 4]).expect("push");
        table.join(aroma).expect("join");
        assert!(table.column("AROMAAggrComp01").is_some());
        assert!(table.join(ConfoundsTable::new(5)).is_err());
    }

    #[test]
    fn sidecar_describes_columns() {
        let table = ConfoundsTable::gather(&full_sources(100)).expect("gather");
        let sidecar = table.sidecar();
        assert_eq!(sidecar["CSF"]["Description"], "Mean signal in the cerebrospinal fluid mask");
        assert_eq!(sidecar["aCompCor00"]["Method"], "aCompCor");
        assert_eq!(sidecar["aCompCor00"]["VarianceExplained"], 0.3);
        assert_eq!(sidecar["Cosine01"]["Cutoff"], 128.0);
    }

    #[test]
    fn missing_variance_is_null() {
        let mut sources = ConfoundSources::default();
        let mut components = compcor("tCompCor", 10);
        components.variance_explained = vec![f64::NAN; 2];
        sources.tcompcor = Some(components);

        let table = ConfoundsTable::gather(&sources).expect("gather");
        assert_eq!(table.n_rows(), 10);
        let sidecar = table.sidecar();
        assert_eq!(sidecar["tCompCor00"]["Method"], "tCompCor");
        assert!(sidecar["tCompCor00"]["VarianceExplained"].is_null());
        assert!(sidecar["tCompCor05"]["VarianceExplained"].is_null());
    }

    #[test]
    fn gather_needs_a_source() {
        let err = ConfoundsTable::gather(&ConfoundSources::default()).unwrap_err();
        assert!(matches!(err, SignalError::Empty { .. }));
    }
}
