//! Anatomical point cloud: one marker per channel that has a value.

use super::color::{value_color, Rgb};
use super::svg::{escape, format_value};
use crate::errors::AppResult;
use crate::montage::Channel;
use crate::resolver::ChannelMap;
use serde::Serialize;
use std::fmt::Write as _;

pub const MIN_POINT_SIZE: f64 = 6.0;
pub const MAX_POINT_SIZE: f64 = 18.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalpPoint {
    pub channel: Channel,
    pub position: [f64; 3],
    pub color: String,
    pub size: f64,
    pub raw: f64,
    pub normalized: f64,
    pub hover: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalpScene {
    pub points: Vec<ScalpPoint>,
    pub value_column: Option<String>,
    pub range: Option<(f64, f64)>,
}

impl ScalpScene {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Orthographic view from above, nose up. Nearer markers are painted last.
    pub fn to_svg(&self, size: u32) -> String {
        let size = f64::from(size.max(64));
        let center = size / 2.0;
        let radius = size * 0.42;
        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{s}" height="{s}" viewBox="0 0 {s} {s}">"#,
            s = size
        );
        let _ = write!(
            svg,
            r##"<circle cx="{c}" cy="{c}" r="{r:.1}" fill="#f4f1ec" stroke="#555" stroke-width="2"/>"##,
            c = center,
            r = radius
        );
        let _ = write!(
            svg,
            r##"<path d="M {l:.1} {b:.1} L {c:.1} {t:.1} L {rr:.1} {b:.1}" fill="none" stroke="#555" stroke-width="2"/>"##,
            l = center - radius * 0.1,
            rr = center + radius * 0.1,
            b = center - radius * 0.99,
            t = center - radius * 1.12,
            c = center
        );

        let mut ordered = self.points.iter().collect::<Vec<_>>();
        ordered.sort_by(|a, b| a.position[2].total_cmp(&b.position[2]));
        for point in ordered {
            let [x, y, _] = point.position;
            let _ = write!(
                svg,
                r##"<circle cx="{x:.1}" cy="{y:.1}" r="{r:.1}" fill="{fill}" stroke="#222" stroke-width="0.8"><title>{title}</title></circle>"##,
                x = center + x * radius,
                y = center - y * radius,
                r = point.size / 2.0,
                fill = point.color,
                title = escape(&point.hover)
            );
            let _ = write!(
                svg,
                r##"<text x="{x:.1}" y="{y:.1}" font-size="9" text-anchor="middle" fill="#111">{label}</text>"##,
                x = center + x * radius,
                y = center - y * radius - point.size / 2.0 - 2.0,
                label = point.channel
            );
        }
        svg.push_str("</svg>");
        svg
    }
}

pub fn build_scene(map: &ChannelMap) -> ScalpScene {
    let points = map
        .iter()
        .map(|(channel, value)| {
            let color: Rgb = value_color(value.normalized);
            ScalpPoint {
                channel,
                position: channel.position(),
                color: color.hex(),
                size: MIN_POINT_SIZE + value.normalized.clamp(0.0, 1.0) * (MAX_POINT_SIZE - MIN_POINT_SIZE),
                raw: value.raw,
                normalized: value.normalized,
                hover: format!("{}: {}\n{}", channel, format_value(value.raw), channel.region()),
            }
        })
        .collect();

    ScalpScene {
        points,
        value_column: map.source_column.clone(),
        range: map.range(),
    }
}
