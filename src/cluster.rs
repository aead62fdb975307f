//! Cluster explorer over the raw result rows: projection scatter, viewport,
//! hit-testing and per-cluster summaries.

use crate::models::Row;
use crate::render::color::cluster_color;
use crate::render::svg::{escape, format_value};
use crate::resolver::numeric;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const RELAXED_ALPHA_TO_BETA: f64 = 1.5;
pub const ACTIVE_BETA_TO_ALPHA: f64 = 1.1;
pub const LOW_SIGNAL: f64 = 0.5;
pub const HIGH_AMPLITUDE: f64 = 10.0;

pub const MIN_ZOOM: f64 = 0.25;
pub const MAX_ZOOM: f64 = 64.0;
const FIT_PADDING: f64 = 0.08;

pub const TRACKED_BANDS: [&str; 5] = [
    "delta_power",
    "theta_power",
    "alpha_power",
    "beta_power",
    "gamma_power",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPoint {
    /// Index of the source row in the result set.
    pub row: usize,
    pub x: f64,
    pub y: f64,
    pub cluster_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterLabel {
    RelaxedIdle,
    ActiveProcessing,
    LowSignal,
    HighAmplitude,
    Mixed,
}

impl ClusterLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RelaxedIdle => "Relaxed / idle",
            Self::ActiveProcessing => "Active processing",
            Self::LowSignal => "Low signal",
            Self::HighAmplitude => "High amplitude",
            Self::Mixed => "Mixed state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub cluster_id: i64,
    pub count: usize,
    /// Mean per tracked band column; `None` when no row carried a number.
    pub means: BTreeMap<String, Option<f64>>,
    pub label: ClusterLabel,
}

impl ClusterSummary {
    pub fn mean(&self, column: &str) -> Option<f64> {
        self.means.get(column).copied().flatten()
    }
}

/// Rows with finite `pca_x`/`pca_y` and an integral `cluster_id`.
pub fn project(rows: &[Row]) -> Vec<ClusterPoint> {
    rows.iter()
        .enumerate()
        .filter_map(|(row, record)| {
            let x = record.get("pca_x").and_then(numeric)?;
            let y = record.get("pca_y").and_then(numeric)?;
            let cluster_id = record.get("cluster_id").and_then(cluster_identifier)?;
            Some(ClusterPoint { row, x, y, cluster_id })
        })
        .collect()
}

fn cluster_identifier(value: &Value) -> Option<i64> {
    let number = numeric(value)?;
    if number.fract() != 0.0 || number.abs() > i64::MAX as f64 {
        return None;
    }
    Some(number as i64)
}

/// First matching rule wins.
pub fn label_for(alpha: Option<f64>, beta: Option<f64>) -> ClusterLabel {
    let (Some(alpha), Some(beta)) = (alpha, beta) else {
        return ClusterLabel::Mixed;
    };
    if alpha > RELAXED_ALPHA_TO_BETA * beta {
        ClusterLabel::RelaxedIdle
    } else if beta > ACTIVE_BETA_TO_ALPHA * alpha {
        ClusterLabel::ActiveProcessing
    } else if alpha < LOW_SIGNAL && beta < LOW_SIGNAL {
        ClusterLabel::LowSignal
    } else if alpha > HIGH_AMPLITUDE && beta > HIGH_AMPLITUDE {
        ClusterLabel::HighAmplitude
    } else {
        ClusterLabel::Mixed
    }
}

/// Summaries ordered by cluster id.
pub fn summarize(rows: &[Row]) -> Vec<ClusterSummary> {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for point in project(rows) {
        groups.entry(point.cluster_id).or_default().push(point.row);
    }

    groups
        .into_iter()
        .map(|(cluster_id, members)| {
            let means = TRACKED_BANDS
                .iter()
                .map(|column| {
                    let values = members
                        .iter()
                        .filter_map(|&index| rows[index].get(*column).and_then(numeric))
                        .collect::<Vec<_>>();
                    let mean = if values.is_empty() {
                        None
                    } else {
                        Some(values.iter().sum::<f64>() / values.len() as f64)
                    };
                    (column.to_string(), mean)
                })
                .collect::<BTreeMap<_, _>>();
            let label = label_for(
                means.get("alpha_power").copied().flatten(),
                means.get("beta_power").copied().flatten(),
            );
            ClusterSummary {
                cluster_id,
                count: members.len(),
                means,
                label,
            }
        })
        .collect()
}

/// Maps data coordinates to a pixel canvas; `+y` in data space is up on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub center: [f64; 2],
    /// Pixels per data unit at zoom 1.
    pub base_scale: f64,
    pub zoom: f64,
}

impl Viewport {
    pub fn fit(points: &[ClusterPoint], width: f64, height: f64) -> Self {
        let width = width.max(1.0);
        let height = height.max(1.0);
        if points.is_empty() {
            return Self {
                width,
                height,
                center: [0.0, 0.0],
                base_scale: width.min(height) / 2.0,
                zoom: 1.0,
            };
        }

        let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
        for point in points {
            min_x = min_x.min(point.x);
            max_x = max_x.max(point.x);
            min_y = min_y.min(point.y);
            max_y = max_y.max(point.y);
        }
        let span_x = (max_x - min_x).max(f64::EPSILON);
        let span_y = (max_y - min_y).max(f64::EPSILON);
        let usable = 1.0 - 2.0 * FIT_PADDING;
        let base_scale = (width * usable / span_x).min(height * usable / span_y);
        let base_scale = if base_scale.is_finite() && base_scale > 0.0 {
            base_scale.min(1e9)
        } else {
            1.0
        };

        Self {
            width,
            height,
            center: [(min_x + max_x) / 2.0, (min_y + max_y) / 2.0],
            base_scale,
            zoom: 1.0,
        }
    }

    fn scale(&self) -> f64 {
        self.base_scale * self.zoom
    }

    pub fn to_screen(&self, x: f64, y: f64) -> [f64; 2] {
        [
            self.width / 2.0 + (x - self.center[0]) * self.scale(),
            self.height / 2.0 - (y - self.center[1]) * self.scale(),
        ]
    }

    pub fn to_data(&self, px: f64, py: f64) -> [f64; 2] {
        [
            self.center[0] + (px - self.width / 2.0) / self.scale(),
            self.center[1] - (py - self.height / 2.0) / self.scale(),
        ]
    }

    /// Drags the content by a pixel delta.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center[0] -= dx / self.scale();
        self.center[1] += dy / self.scale();
    }

    /// Zooms by `factor` keeping the data point under the pixel anchor fixed.
    pub fn zoom_at(&mut self, factor: f64, anchor_px: f64, anchor_py: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let anchored = self.to_data(anchor_px, anchor_py);
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let scale = self.scale();
        self.center[0] = anchored[0] - (anchor_px - self.width / 2.0) / scale;
        self.center[1] = anchored[1] + (anchor_py - self.height / 2.0) / scale;
    }

    /// Nearest point within `radius_px` of the pixel position; returns its row index.
    pub fn pick(&self, points: &[ClusterPoint], px: f64, py: f64, radius_px: f64) -> Option<usize> {
        let limit = radius_px * radius_px;
        points
            .iter()
            .map(|point| {
                let [sx, sy] = self.to_screen(point.x, point.y);
                (point.row, (sx - px).powi(2) + (sy - py).powi(2))
            })
            .filter(|(_, distance)| *distance <= limit)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(row, _)| row)
    }
}

pub fn render_svg(
    points: &[ClusterPoint],
    summaries: &[ClusterSummary],
    viewport: &Viewport,
    selected_row: Option<usize>,
) -> String {
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = viewport.width,
        h = viewport.height
    );
    let _ = write!(
        svg,
        r##"<rect x="0" y="0" width="{w}" height="{h}" fill="#ffffff" stroke="#ccc"/>"##,
        w = viewport.width,
        h = viewport.height
    );

    for point in points {
        let [x, y] = viewport.to_screen(point.x, point.y);
        if x < -10.0 || y < -10.0 || x > viewport.width + 10.0 || y > viewport.height + 10.0 {
            continue;
        }
        let selected = selected_row == Some(point.row);
        let _ = write!(
            svg,
            r##"<circle cx="{x:.1}" cy="{y:.1}" r="{r}" fill="{fill}" fill-opacity="0.8" stroke="{stroke}" stroke-width="{sw}"><title>row {row}, cluster {cluster}: ({px}, {py})</title></circle>"##,
            r = if selected { 6.0 } else { 3.5 },
            fill = cluster_color(point.cluster_id),
            stroke = if selected { "#000" } else { "none" },
            sw = if selected { 2 } else { 0 },
            row = point.row,
            cluster = point.cluster_id,
            px = format_value(point.x),
            py = format_value(point.y)
        );
    }

    for (index, summary) in summaries.iter().enumerate() {
        let y = 16.0 + index as f64 * 14.0;
        let _ = write!(
            svg,
            r##"<rect x="8" y="{ry:.1}" width="10" height="10" fill="{fill}"/><text x="22" y="{ty:.1}" font-size="11" fill="#222">Cluster {id} ({count}): {label}</text>"##,
            ry = y - 9.0,
            ty = y,
            fill = cluster_color(summary.cluster_id),
            id = summary.cluster_id,
            count = summary.count,
            label = escape(summary.label.as_str())
        );
    }
    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
mod tests {
    use super::{label_for, project, render_svg, summarize, ClusterLabel, Viewport, MAX_ZOOM, MIN_ZOOM};
    use crate::models::Row;
    use serde_json::json;

    fn rows(values: serde_json::Value) -> Vec<Row> {
        values
            .as_array()
            .expect("array")
            .iter()
            .map(|value| value.as_object().expect("object").clone())
            .collect()
    }

    #[test]
    fn label_rules_are_ordered() {
        assert_eq!(label_for(Some(1.6), Some(1.0)), ClusterLabel::RelaxedIdle);
        assert_eq!(label_for(Some(0.9), Some(1.0)), ClusterLabel::ActiveProcessing);
        assert_eq!(label_for(Some(0.3), Some(0.3)), ClusterLabel::LowSignal);
        assert_eq!(label_for(Some(12.0), Some(11.0)), ClusterLabel::HighAmplitude);
        assert_eq!(label_for(Some(2.0), Some(2.0)), ClusterLabel::Mixed);
        assert_eq!(label_for(None, Some(2.0)), ClusterLabel::Mixed);
        // Ratio rules fire before the absolute thresholds.
        assert_eq!(label_for(Some(0.4), Some(0.1)), ClusterLabel::RelaxedIdle);
        for _ in 0..3 {
            assert_eq!(label_for(Some(1.6), Some(1.0)), ClusterLabel::RelaxedIdle);
        }
    }

    #[test]
    fn projection_skips_rows_without_coordinates_or_cluster() {
        let rows = rows(json!([
            {"pca_x": 1.0, "pca_y": 2.0, "cluster_id": 0},
            {"pca_x": null, "pca_y": 2.0, "cluster_id": 0},
            {"pca_x": 1.0, "pca_y": 2.0, "cluster_id": 1.5},
            {"pca_x": "3.5", "pca_y": -1.0, "cluster_id": "2"},
            {"pca_x": 1.0, "pca_y": 2.0}
        ]));
        let points = project(&rows);
        assert_eq!(points.iter().map(|point| point.row).collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(points[1].cluster_id, 2);
        assert_eq!(points[1].x, 3.5);
    }

    #[test]
    fn summaries_group_and_label_clusters() {
        let rows = rows(json!([
            {"pca_x": 0.0, "pca_y": 0.0, "cluster_id": 0, "alpha_power": 1.5, "beta_power": 1.0},
            {"pca_x": 0.1, "pca_y": 0.0, "cluster_id": 0, "alpha_power": 1.7, "beta_power": 1.0},
            {"pca_x": 5.0, "pca_y": 5.0, "cluster_id": 3, "alpha_power": 0.9, "beta_power": 1.0},
            {"pca_x": 9.0, "pca_y": 9.0, "cluster_id": 7}
        ]));
        let summaries = summarize(&rows);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].cluster_id, 0);
        assert_eq!(summaries[0].count, 2);
        assert!((summaries[0].mean("alpha_power").expect("alpha") - 1.6).abs() < 1e-12);
        assert_eq!(summaries[0].label, ClusterLabel::RelaxedIdle);
        assert_eq!(summaries[1].label, ClusterLabel::ActiveProcessing);
        assert_eq!(summaries[2].mean("alpha_power"), None);
        assert_eq!(summaries[2].label, ClusterLabel::Mixed);
        assert_eq!(summarize(&rows), summaries);
    }

    #[test]
    fn viewport_fits_pans_zooms_and_picks() {
        let rows = rows(json!([
            {"pca_x": -1.0, "pca_y": -1.0, "cluster_id": 0},
            {"pca_x": 1.0, "pca_y": 1.0, "cluster_id": 1},
            {"pca_x": 0.0, "pca_y": 0.0, "cluster_id": 2}
        ]));
        let points = project(&rows);
        let mut viewport = Viewport::fit(&points, 200.0, 200.0);
        assert_eq!(viewport.to_screen(0.0, 0.0), [100.0, 100.0]);
        let [top_right_x, top_right_y] = viewport.to_screen(1.0, 1.0);
        assert!(top_right_x > 100.0 && top_right_y < 100.0);
        assert!(top_right_x <= 200.0 && top_right_y >= 0.0);
        assert_eq!(viewport.pick(&points, 101.0, 99.0, 5.0), Some(2));
        assert_eq!(viewport.pick(&points, 50.0, 20.0, 5.0), None);

        let anchor = viewport.to_screen(1.0, 1.0);
        viewport.zoom_at(2.0, anchor[0], anchor[1]);
        let after = viewport.to_screen(1.0, 1.0);
        assert!((after[0] - anchor[0]).abs() < 1e-9 && (after[1] - anchor[1]).abs() < 1e-9);

        viewport.zoom_at(1e6, 0.0, 0.0);
        assert_eq!(viewport.zoom, MAX_ZOOM);
        viewport.zoom_at(1e-9, 0.0, 0.0);
        assert_eq!(viewport.zoom, MIN_ZOOM);

        let before = viewport.to_screen(0.0, 0.0);
        viewport.pan(10.0, -5.0);
        let moved = viewport.to_screen(0.0, 0.0);
        assert!((moved[0] - before[0] - 10.0).abs() < 1e-9);
        assert!((moved[1] - before[1] + 5.0).abs() < 1e-9);
    }

    #[test]
    fn svg_marks_the_selected_point() {
        let rows = rows(json!([
            {"pca_x": 0.0, "pca_y": 0.0, "cluster_id": 0, "alpha_power": 2.0, "beta_power": 1.0},
            {"pca_x": 1.0, "pca_y": 1.0, "cluster_id": 1, "alpha_power": 1.0, "beta_power": 2.0}
        ]));
        let points = project(&rows);
        let summaries = summarize(&rows);
        let viewport = Viewport::fit(&points, 300.0, 200.0);
        let svg = render_svg(&points, &summaries, &viewport, Some(1));
        assert_eq!(svg.matches("<circle").count(), 2);
        assert_eq!(svg.matches("stroke=\"#000\"").count(), 1);
        assert!(svg.contains("Relaxed / idle"));
        assert!(svg.contains("Active processing"));
    }
}
