//! Runs the in-process regressor core on synthetic voxel matrices.

use fmriprep_interfaces::confounds::cosine_regressor_count;
use fmriprep_pipelines::{ConfoundMasks, MemoryEstimate, add_confound_regressors};
use fmriprep_signals::{ConfoundsTable, MOTION_COLUMNS};
use fmriprep_workflow::{FailureMode, IdentityInterface, Node, Workflow, run_local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::Path;

const VOXELS: usize = 200;
const VOLUMES: usize = 100;
const TR: f64 = 2.0;

const SOURCE_FIELDS: [&str; 7] = ["bold", "bold_mask", "movpar_file", "csf", "wm", "tcc", "acc"];

/// Voxels × volumes with the first two volumes tripled in intensity.
fn bold_matrix() -> String {
    let mut rng = StdRng::seed_from_u64(7);
    let mut text = String::new();
    let mut data = vec![vec![0.0; VOLUMES]; VOXELS];
    for t in 0..VOLUMES {
        let noise: Vec<f64> = (0..VOXELS).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let center = noise.iter().sum::<f64>() / VOXELS as f64;
        for (v, row) in data.iter_mut().enumerate() {
            let drift = 0.1 * (0.7 * t as f64).sin();
            let mut value = 100.0 + 10.0 * (v as f64).sin() + noise[v] - center + drift;
            if t < 2 {
                value *= 3.0;
            }
            row[t] = value;
        }
    }
    for row in data {
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        let _ = writeln!(text, "{}", cells.join("\t"));
    }
    text
}

fn mask(selected: impl Fn(usize) -> bool) -> String {
    (0..VOXELS).map(|v| if selected(v) { "1\n" } else { "0\n" }).collect()
}

fn motion() -> String {
    let mut text = String::new();
    for t in 0..VOLUMES {
        let x = 0.01 * (t as f64 * 0.1).sin();
        let _ = writeln!(text, "{x}\t0\t{}\t0.001\t0\t0", x / 2.0);
    }
    text
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write");
    path.display().to_string()
}

#[test]
fn confounds_table_has_one_row_per_volume_and_every_column() {
    let dir = tempfile::tempdir().expect("tempdir");
    let files = [
        write(dir.path(), "bold.tsv", &bold_matrix()),
        write(dir.path(), "brain.tsv", &mask(|_| true)),
        write(dir.path(), "motion.tsv", &motion()),
        write(dir.path(), "csf.tsv", &mask(|v| v < 40)),
        write(dir.path(), "wm.tsv", &mask(|v| v >= 160)),
        write(dir.path(), "tcc.tsv", &mask(|_| true)),
        write(dir.path(), "acc.tsv", &mask(|v| v >= 100)),
    ];

    let mut source = Node::new("source", IdentityInterface::new(&SOURCE_FIELDS)).local();
    for (field, file) in SOURCE_FIELDS.iter().zip(files) {
        source = source.with_input(*field, file);
    }
    let mut workflow = Workflow::new("regressors_wf");
    workflow.add_node(source).expect("source");
    add_confound_regressors(
        &mut workflow,
        "source",
        ConfoundMasks {
            csf: ("source", "csf"),
            wm: ("source", "wm"),
            tcompcor: ("source", "tcc"),
            acompcor: ("source", "acc"),
        },
        MemoryEstimate::new(0.01, VOLUMES),
        TR,
        FailureMode::Warn,
    )
    .expect("regressors");
    workflow
        .set_input("compcor_warning", "out_dir", dir.path().display().to_string())
        .expect("report directory");

    let graph = workflow.flatten().expect("valid");
    let results = run_local(&graph).expect("run");
    assert_eq!(results["non_steady_state"]["n_volumes_to_discard"], 2);

    let confounds = results["concat"]["confounds_file"].as_str().expect("path");
    let table = ConfoundsTable::read_tsv(std::fs::File::open(confounds).expect("open")).expect("table");
    assert_eq!(table.n_rows(), VOLUMES);

    let names: Vec<&str> = table.names().collect();
    let count = |prefix: &str| names.iter().filter(|n| n.starts_with(prefix)).count();
    for column in MOTION_COLUMNS
        .iter()
        .copied()
        .chain(["FramewiseDisplacement", "stdDVARS", "non-stdDVARS", "vx-wisestdDVARS"])
        .chain(["CSF", "WhiteMatter", "GlobalSignal"])
        .chain(["NonSteadyState00", "NonSteadyState01"])
    {
        assert!(names.contains(&column), "missing {column}");
    }
    assert_eq!(count("NonSteadyState"), 2);
    assert_eq!(count("aCompCor"), 6);
    assert_eq!(count("tCompCor"), 6);
    assert_eq!(count("Cosine"), cosine_regressor_count(VOLUMES, TR));
    assert_eq!(count("Cosine"), (VOLUMES as f64 * TR / 128.0).floor() as usize + 1);

    let fd = table.column("FramewiseDisplacement").expect("fd");
    assert!(fd[0].is_nan());
    assert!(fd[1..].iter().all(|v| v.is_finite()));

    let metadata = results["concat"]["confounds_metadata"].as_str().expect("path");
    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(metadata).expect("read")).expect("json");
    assert_eq!(sidecar["aCompCor00"]["Method"], "aCompCor");
    assert_eq!(sidecar["tCompCor05"]["Method"], "tCompCor");
    let share = sidecar["aCompCor00"]["VarianceExplained"].as_f64().expect("number");
    assert!(share > 0.0 && share <= 1.0);
    assert_eq!(sidecar["Cosine00"]["Cutoff"], 128.0);
}
