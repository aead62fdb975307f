use crate::montage::{Channel, BANDS};
use once_cell::sync::Lazy;

pub const INTERPRETATION_PROMPT: &str = "You are an EEG research assistant. \
You receive a user's question about a cognitive-workload EEG dataset and a sample \
of rows returned by a SQL query that answered it. Explain what the rows show in \
plain language for a researcher: name the channels, subjects or clusters that \
stand out, give the relevant numbers with sensible rounding, and relate band \
powers to their usual interpretation (alpha for relaxed wakefulness, beta for \
active processing, theta for workload and drowsiness). If the sample is \
truncated say so. Answer in at most three short paragraphs of plain text. \
Do not write SQL and do not use Markdown tables.";

static PLANNING_PROMPT: Lazy<String> = Lazy::new(build_planning_prompt);

/// System prompt for the plan stage, describing the two tables and the
/// expected JSON answer.
pub fn planning_prompt() -> &'static str {
    PLANNING_PROMPT.as_str()
}

fn build_planning_prompt() -> String {
    let channels = Channel::all()
        .map(|channel| channel.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let bands = BANDS
        .iter()
        .map(|(name, low, high)| format!("{} {}-{} Hz", name, low, high))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You translate questions about an EEG cognitive-workload dataset into SQLite SQL.

Tables:
- features: one row per subject, channel and 2-second analysis window (50% overlap, 250 Hz).
  Columns: subject TEXT, channel TEXT, window_idx INTEGER, window_start REAL, window_end REAL,
  delta_power REAL, theta_power REAL, alpha_power REAL, beta_power REAL, gamma_power REAL,
  spectral_entropy REAL, dfa_alpha REAL, mean_val REAL, var_val REAL, skewness REAL,
  kurtosis REAL, energy REAL, cluster_id INTEGER, pca_x REAL, pca_y REAL.
- subjects: one row per subject.
  Columns: subject TEXT, n_windows INTEGER, avg_alpha REAL, avg_beta REAL, avg_theta REAL,
  avg_dfa REAL, avg_entropy REAL.

Channels (International 10-20 montage, case-sensitive): {channels}.
Regions: frontal Fp1 Fp2 F3 F4 F7 F8 Fz; central C3 C4 Cz; temporal T3 T4 T5 T6; parietal P3 P4 Pz; occipital O1 O2.
Bands: {bands}.

Rules:
- Write exactly one read-only SELECT (a WITH prefix is allowed) in the SQLite dialect.
- Only use the tables and columns above.
- For per-channel answers return a `channel` column plus one numeric value column so it can be drawn on a scalp map.
- For cluster questions include pca_x, pca_y and cluster_id.
- Add LIMIT 500 unless the question needs an aggregate over every row.
- If the question is conceptual and needs no data, set "sql" to null.

Answer with a single JSON object and nothing else:
{{"sql": "<statement or null>", "thought": "<one or two sentences on your approach>", "visualization": "table" | "scalp3d" | "topomap" | "cluster"}}
The "visualization" key is optional."#
    )
}
