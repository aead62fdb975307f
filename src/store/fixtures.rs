use crate::models::TableSource;
use crate::montage::ELECTRODES;
use arrow_array::{ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use std::path::Path;
use std::sync::Arc;

pub const SUBJECTS: [&str; 2] = ["s00", "s01"];
pub const WINDOWS: usize = 4;
pub const FEATURE_ROW_COUNT: usize = SUBJECTS.len() * WINDOWS * ELECTRODES.len();

/// Writes small `features` and `subjects` parquet files and returns their sources.
pub fn write_fixture_tables(dir: &Path) -> Vec<TableSource> {
    let features = dir.join("eeg_features.parquet");
    let subjects = dir.join("eeg_subjects.parquet");
    write_batch(&features, feature_batch());
    write_batch(&subjects, subject_batch());
    vec![
        TableSource {
            name: "features".to_string(),
            uri: features.to_string_lossy().to_string(),
        },
        TableSource {
            name: "subjects".to_string(),
            uri: subjects.to_string_lossy().to_string(),
        },
    ]
}

fn write_batch(path: &Path, batch: RecordBatch) {
    let file = std::fs::File::create(path).expect("create parquet fixture");
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).expect("parquet writer");
    writer.write(&batch).expect("write batch");
    writer.close().expect("close writer");
}

fn feature_batch() -> RecordBatch {
    let mut subject = Vec::new();
    let mut channel = Vec::new();
    let mut window_idx = Vec::new();
    let mut window_start = Vec::new();
    let mut window_end = Vec::new();
    let mut bands: [Vec<f64>; 5] = Default::default();
    let mut entropy = Vec::new();
    let mut dfa = Vec::new();
    let mut moments: [Vec<f64>; 5] = Default::default();
    let mut cluster_id = Vec::new();
    let mut pca_x = Vec::new();
    let mut pca_y = Vec::new();

    for (subject_index, name) in SUBJECTS.iter().enumerate() {
        for window in 0..WINDOWS {
            for (channel_index, electrode) in ELECTRODES.iter().enumerate() {
                let c = channel_index as f64;
                let w = window as f64;
                let s = subject_index as f64;
                subject.push(name.to_string());
                channel.push(electrode.name.to_string());
                window_idx.push(window as i64);
                window_start.push(w);
                window_end.push(w + 2.0);
                bands[0].push(2.0 + 0.05 * c);
                bands[1].push(1.2 + 0.02 * c);
                bands[2].push(1.0 + 0.1 * c + 0.01 * w + 0.2 * s);
                bands[3].push(0.8 + 0.03 * c);
                bands[4].push(0.1 + 0.001 * c);
                entropy.push(5.0 + 0.01 * c);
                dfa.push(0.7 + 0.01 * w);
                moments[0].push(0.001 * c);
                moments[1].push(1.0 + 0.1 * c);
                moments[2].push(0.0);
                moments[3].push(3.0);
                moments[4].push(500.0 + c);
                let cluster = ((window + subject_index) % 3) as i32;
                cluster_id.push(cluster);
                pca_x.push(f64::from(cluster) * 3.0 + 0.01 * c);
                pca_y.push(-f64::from(cluster) + 0.02 * c);
            }
        }
    }

    let float = |name: &str| Field::new(name, DataType::Float64, false);
    let schema = Arc::new(Schema::new(vec![
        Field::new("subject", DataType::Utf8, false),
        Field::new("channel", DataType::Utf8, false),
        Field::new("window_idx", DataType::Int64, false),
        float("window_start"),
        float("window_end"),
        float("delta_power"),
        float("theta_power"),
        float("alpha_power"),
        float("beta_power"),
        float("gamma_power"),
        float("spectral_entropy"),
        float("dfa_alpha"),
        float("mean_val"),
        float("var_val"),
        float("skewness"),
        float("kurtosis"),
        float("energy"),
        Field::new("cluster_id", DataType::Int32, false),
        float("pca_x"),
        float("pca_y"),
    ]));

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(subject)),
        Arc::new(StringArray::from(channel)),
        Arc::new(Int64Array::from(window_idx)),
        Arc::new(Float64Array::from(window_start)),
        Arc::new(Float64Array::from(window_end)),
    ];
    for band in bands {
        columns.push(Arc::new(Float64Array::from(band)));
    }
    columns.push(Arc::new(Float64Array::from(entropy)));
    columns.push(Arc::new(Float64Array::from(dfa)));
    for moment in moments {
        columns.push(Arc::new(Float64Array::from(moment)));
    }
    columns.push(Arc::new(Int32Array::from(cluster_id)));
    columns.push(Arc::new(Float64Array::from(pca_x)));
    columns.push(Arc::new(Float64Array::from(pca_y)));

    RecordBatch::try_new(schema, columns).expect("feature batch")
}

fn subject_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("subject", DataType::Utf8, false),
        Field::new("n_windows", DataType::Int64, false),
        Field::new("avg_alpha", DataType::Float64, false),
        Field::new("avg_beta", DataType::Float64, false),
        Field::new("avg_theta", DataType::Float64, false),
        Field::new("avg_dfa", DataType::Float64, false),
        Field::new("avg_entropy", DataType::Float64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(SUBJECTS.to_vec())) as ArrayRef,
            Arc::new(Int64Array::from(vec![WINDOWS as i64; SUBJECTS.len()])),
            Arc::new(Float64Array::from(vec![1.9, 2.1])),
            Arc::new(Float64Array::from(vec![1.07, 1.07])),
            Arc::new(Float64Array::from(vec![1.38, 1.38])),
            Arc::new(Float64Array::from(vec![0.715, 0.715])),
            Arc::new(Float64Array::from(vec![5.09, 5.09])),
        ],
    )
    .expect("subject batch")
}
