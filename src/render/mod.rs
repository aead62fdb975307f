pub mod color;
pub mod scalp3d;
pub mod svg;
pub mod table;
pub mod topomap;

use crate::cluster::{self, Viewport};
use crate::errors::AppResult;
use crate::models::{QueryResult, ViewState, VisualizationMode};
use crate::resolver::{self, ChannelMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const SVG_SIZE: u32 = 480;
/// Pixel canvas the cluster scatter is fitted to.
pub const CLUSTER_CANVAS: (f64, f64) = (640.0, 480.0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedView {
    pub mode: VisualizationMode,
    /// Terminal-friendly description of the view.
    pub text: String,
    pub artifacts: Vec<Artifact>,
}

/// Cluster when the projection columns are present, otherwise a spatial view
/// sized to how many channels resolved, otherwise the table.
pub fn choose_view(result: &QueryResult, map: &ChannelMap) -> VisualizationMode {
    if result.has_columns(&["pca_x", "pca_y", "cluster_id"]) && !cluster::project(&result.rows).is_empty() {
        VisualizationMode::Cluster
    } else if map.len() >= topomap::MIN_CHANNELS {
        VisualizationMode::Topomap
    } else if !map.is_empty() {
        VisualizationMode::Scalp3d
    } else {
        VisualizationMode::Table
    }
}

/// `viewport` keeps a panned or zoomed cluster scatter; `None` fits to the data.
pub fn render_view(
    result: &QueryResult,
    view: &ViewState,
    table_rows: usize,
    viewport: Option<&Viewport>,
) -> AppResult<RenderedView> {
    let mode = view.mode;
    let rendered = match mode {
        VisualizationMode::Table => RenderedView {
            mode,
            text: table::render_table(result, table_rows, view.selected_row),
            artifacts: Vec::new(),
        },
        VisualizationMode::Scalp3d => {
            let map = resolver::resolve_for_view(&result.rows, view.selected_row);
            if map.is_empty() {
                unavailable(mode, "No channel values in this result; the scalp view is unavailable.")
            } else {
                let scene = scalp3d::build_scene(&map);
                RenderedView {
                    mode,
                    text: channel_listing(&map),
                    artifacts: vec![
                        Artifact {
                            file_name: "scalp3d.json".to_string(),
                            contents: scene.to_json()?,
                        },
                        Artifact {
                            file_name: "scalp3d.svg".to_string(),
                            contents: scene.to_svg(SVG_SIZE),
                        },
                    ],
                }
            }
        }
        VisualizationMode::Topomap => {
            let map = resolver::resolve_for_view(&result.rows, view.selected_row);
            let render = topomap::render_topomap(&map);
            let text = match &render {
                topomap::TopomapRender::Ready(_) => channel_listing(&map),
                topomap::TopomapRender::Unavailable(reason) => reason.message(),
            };
            RenderedView {
                mode,
                text,
                artifacts: vec![Artifact {
                    file_name: "topomap.svg".to_string(),
                    contents: render.to_svg(SVG_SIZE),
                }],
            }
        }
        VisualizationMode::Cluster => {
            let points = cluster::project(&result.rows);
            if points.is_empty() {
                unavailable(mode, "No rows carry pca_x, pca_y and cluster_id; the cluster view is unavailable.")
            } else {
                let summaries = cluster::summarize(&result.rows);
                let viewport = viewport
                    .copied()
                    .unwrap_or_else(|| Viewport::fit(&points, CLUSTER_CANVAS.0, CLUSTER_CANVAS.1));
                let mut text = format!("{} points in {} clusters\n", points.len(), summaries.len());
                for summary in &summaries {
                    let _ = writeln!(
                        text,
                        "  cluster {:>3}: {:>6} rows  alpha {:>10}  beta {:>10}  {}",
                        summary.cluster_id,
                        summary.count,
                        summary.mean("alpha_power").map(svg::format_value).unwrap_or_else(|| "-".to_string()),
                        summary.mean("beta_power").map(svg::format_value).unwrap_or_else(|| "-".to_string()),
                        summary.label.as_str()
                    );
                }
                RenderedView {
                    mode,
                    text,
                    artifacts: vec![Artifact {
                        file_name: "clusters.svg".to_string(),
                        contents: cluster::render_svg(&points, &summaries, &viewport, view.selected_row),
                    }],
                }
            }
        }
    };
    Ok(rendered)
}

fn unavailable(mode: VisualizationMode, message: &str) -> RenderedView {
    RenderedView {
        mode,
        text: message.to_string(),
        artifacts: Vec::new(),
    }
}

fn channel_listing(map: &ChannelMap) -> String {
    let mut text = String::new();
    if let Some(column) = &map.source_column {
        let _ = writeln!(text, "{}:", column);
    }
    for (channel, value) in map.iter() {
        let _ = writeln!(
            text,
            "  {:<4} {:>12}  ({:.2})",
            channel.as_str(),
            svg::format_value(value.raw),
            value.normalized
        );
    }
    text
}

pub fn write_artifacts(dir: &Path, artifacts: &[Artifact]) -> AppResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = dir.join(&artifact.file_name);
        std::fs::write(&path, &artifact.contents)?;
        written.push(path);
    }
    Ok(written)
}
