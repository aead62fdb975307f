//! Scalp interpolation: Delaunay triangulation of the electrodes that have a
//! value, linear interpolation inside each triangle, then filled bands over a
//! fixed grid clipped to the head circle.

use super::color::value_color;
use super::svg::{escape, format_value};
use crate::montage::{Channel, ELECTRODES};
use crate::resolver::ChannelMap;
use serde::Serialize;
use std::fmt::Write as _;

pub const MIN_CHANNELS: usize = 3;
pub const GRID_SIZE: usize = 64;
pub const CONTOUR_LEVELS: usize = 10;

const SUPER_TRIANGLE_SCALE: f64 = 1_000.0;
const AREA_EPSILON: f64 = 1e-12;
const BARYCENTRIC_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum Unavailable {
    TooFewChannels { found: usize },
    Degenerate,
}

impl Unavailable {
    pub fn message(self) -> String {
        match self {
            Self::TooFewChannels { found } => format!(
                "Topographic map needs at least {} channels with values ({} found)",
                MIN_CHANNELS, found
            ),
            Self::Degenerate => "Channels with values are collinear; no surface to interpolate".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub channel: Channel,
    pub position: [f64; 2],
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topomap {
    pub samples: Vec<Sample>,
    pub triangles: Vec<[usize; 3]>,
    /// Row-major, row 0 at the top (nose side). `None` outside the head or the hull.
    pub grid: Vec<Option<f64>>,
    pub min: f64,
    pub max: f64,
    pub value_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum TopomapRender {
    Ready(Topomap),
    Unavailable(Unavailable),
}

impl TopomapRender {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn to_svg(&self, size: u32) -> String {
        match self {
            Self::Ready(map) => map.to_svg(size),
            Self::Unavailable(reason) => unavailable_svg(size, &reason.message()),
        }
    }
}

pub fn render_topomap(map: &ChannelMap) -> TopomapRender {
    if map.len() < MIN_CHANNELS {
        return TopomapRender::Unavailable(Unavailable::TooFewChannels { found: map.len() });
    }

    let samples = map
        .iter()
        .map(|(channel, value)| Sample {
            channel,
            position: channel.projected(),
            value: value.raw,
        })
        .collect::<Vec<_>>();
    let positions = samples.iter().map(|sample| sample.position).collect::<Vec<_>>();
    let triangles = triangulate(&positions);
    if triangles.is_empty() {
        return TopomapRender::Unavailable(Unavailable::Degenerate);
    }

    let (min, max) = map.range().unwrap_or((0.0, 0.0));
    let mut topomap = Topomap {
        samples,
        triangles,
        grid: Vec::with_capacity(GRID_SIZE * GRID_SIZE),
        min,
        max,
        value_column: map.source_column.clone(),
    };
    for row in 0..GRID_SIZE {
        for col in 0..GRID_SIZE {
            let [x, y] = cell_center(row, col);
            let value = if x * x + y * y <= 1.0 {
                topomap.value_at([x, y])
            } else {
                None
            };
            topomap.grid.push(value);
        }
    }
    TopomapRender::Ready(topomap)
}

/// Centre of a grid cell in head coordinates ([-1, 1] on both axes, `+y` up).
pub fn cell_center(row: usize, col: usize) -> [f64; 2] {
    let step = 2.0 / GRID_SIZE as f64;
    [
        -1.0 + (col as f64 + 0.5) * step,
        1.0 - (row as f64 + 0.5) * step,
    ]
}

impl Topomap {
    /// Linear interpolation inside the triangle containing `point`.
    pub fn value_at(&self, point: [f64; 2]) -> Option<f64> {
        self.triangles.iter().find_map(|triangle| {
            let [a, b, c] = triangle.map(|index| self.samples[index].position);
            let weights = barycentric(point, a, b, c)?;
            Some(
                weights[0] * self.samples[triangle[0]].value
                    + weights[1] * self.samples[triangle[1]].value
                    + weights[2] * self.samples[triangle[2]].value,
            )
        })
    }

    /// Contour band of `value` on the continuous min..max scale.
    pub fn band(&self, value: f64) -> usize {
        let span = self.max - self.min;
        if span <= 0.0 || !span.is_finite() {
            return CONTOUR_LEVELS / 2;
        }
        let scaled = ((value - self.min) / span * CONTOUR_LEVELS as f64).floor();
        (scaled.max(0.0) as usize).min(CONTOUR_LEVELS - 1)
    }

    pub fn band_color(band: usize) -> String {
        value_color((band as f64 + 0.5) / CONTOUR_LEVELS as f64).hex()
    }

    pub fn to_svg(&self, size: u32) -> String {
        let size = f64::from(size.max(64));
        let center = size / 2.0;
        let radius = size * 0.4;
        let cell = 2.0 * radius / GRID_SIZE as f64;
        let origin = center - radius;
        let to_screen = |[x, y]: [f64; 2]| (center + x * radius, center - y * radius);

        let mut svg = String::new();
        let _ = write!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{s}" height="{s}" viewBox="0 0 {s} {s}">"#,
            s = size
        );
        let _ = write!(
            svg,
            r#"<defs><clipPath id="head"><circle cx="{c}" cy="{c}" r="{r:.2}"/></clipPath></defs>"#,
            c = center,
            r = radius
        );
        let _ = write!(
            svg,
            r##"<circle cx="{c}" cy="{c}" r="{r:.2}" fill="#eeeeee"/>"##,
            c = center,
            r = radius
        );

        // Adjacent cells in the same band are merged into one rect per run.
        svg.push_str(r#"<g clip-path="url(#head)" shape-rendering="crispEdges">"#);
        for row in 0..GRID_SIZE {
            let mut col = 0;
            while col < GRID_SIZE {
                let Some(value) = self.grid[row * GRID_SIZE + col] else {
                    col += 1;
                    continue;
                };
                let band = self.band(value);
                let start = col;
                col += 1;
                while col < GRID_SIZE
                    && self.grid[row * GRID_SIZE + col].map(|next| self.band(next)) == Some(band)
                {
                    col += 1;
                }
                let _ = write!(
                    svg,
                    r#"<rect x="{x:.2}" y="{y:.2}" width="{w:.2}" height="{h:.2}" fill="{fill}"/>"#,
                    x = origin + start as f64 * cell,
                    y = origin + row as f64 * cell,
                    w = (col - start) as f64 * cell + 0.3,
                    h = cell + 0.3,
                    fill = Self::band_color(band)
                );
            }
        }
        svg.push_str("</g>");

        head_outline(&mut svg, center, radius);

        let drawn = self
            .samples
            .iter()
            .map(|sample| (sample.channel, sample.value))
            .collect::<Vec<_>>();
        for electrode in ELECTRODES.iter() {
            let (x, y) = to_screen(electrode.projected);
            let value = drawn
                .iter()
                .find(|(channel, _)| *channel == electrode.channel)
                .map(|(_, value)| format_value(*value));
            let title = match &value {
                Some(value) => format!("{}: {}", electrode.name, value),
                None => format!("{}: no value", electrode.name),
            };
            let _ = write!(
                svg,
                r##"<circle cx="{x:.1}" cy="{y:.1}" r="3" fill="{fill}" stroke="#000" stroke-width="0.8"><title>{title}</title></circle>"##,
                fill = if value.is_some() { "#000" } else { "#fff" },
                title = escape(&title)
            );
            let _ = write!(
                svg,
                r##"<text x="{x:.1}" y="{y:.1}" font-size="9" text-anchor="middle" fill="#000">{name}</text>"##,
                y = y - 5.0,
                name = electrode.name
            );
        }

        let _ = write!(
            svg,
            r##"<text x="{c}" y="{y:.1}" font-size="11" text-anchor="middle" fill="#333">{label} {min} .. {max}</text>"##,
            c = center,
            y = size - 8.0,
            label = escape(self.value_column.as_deref().unwrap_or("value")),
            min = format_value(self.min),
            max = format_value(self.max)
        );
        svg.push_str("</svg>");
        svg
    }
}

fn head_outline(svg: &mut String, center: f64, radius: f64) {
    let _ = write!(
        svg,
        r##"<circle cx="{c}" cy="{c}" r="{r:.2}" fill="none" stroke="#333" stroke-width="2"/>"##,
        c = center,
        r = radius
    );
    let _ = write!(
        svg,
        r##"<path d="M {l:.1} {b:.1} L {c:.1} {t:.1} L {rr:.1} {b:.1}" fill="none" stroke="#333" stroke-width="2"/>"##,
        l = center - radius * 0.12,
        rr = center + radius * 0.12,
        b = center - radius * 0.99,
        t = center - radius * 1.12,
        c = center
    );
    for side in [-1.0, 1.0] {
        let _ = write!(
            svg,
            r##"<ellipse cx="{x:.1}" cy="{c:.1}" rx="{rx:.1}" ry="{ry:.1}" fill="none" stroke="#333" stroke-width="2"/>"##,
            x = center + side * radius * 1.04,
            c = center,
            rx = radius * 0.06,
            ry = radius * 0.18
        );
    }
}

fn unavailable_svg(size: u32, message: &str) -> String {
    let size = f64::from(size.max(64));
    let center = size / 2.0;
    let radius = size * 0.4;
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{s}" height="{s}" viewBox="0 0 {s} {s}">"#,
        s = size
    );
    head_outline(&mut svg, center, radius);
    let _ = write!(
        svg,
        r##"<text x="{c}" y="{c}" font-size="12" text-anchor="middle" fill="#a33">{message}</text></svg>"##,
        c = center,
        message = escape(message)
    );
    svg
}

fn barycentric(p: [f64; 2], a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> Option<[f64; 3]> {
    let denom = (b[1] - c[1]) * (a[0] - c[0]) + (c[0] - b[0]) * (a[1] - c[1]);
    if denom.abs() < AREA_EPSILON {
        return None;
    }
    let l1 = ((b[1] - c[1]) * (p[0] - c[0]) + (c[0] - b[0]) * (p[1] - c[1])) / denom;
    let l2 = ((c[1] - a[1]) * (p[0] - c[0]) + (a[0] - c[0]) * (p[1] - c[1])) / denom;
    let l3 = 1.0 - l1 - l2;
    if l1 < -BARYCENTRIC_TOLERANCE || l2 < -BARYCENTRIC_TOLERANCE || l3 < -BARYCENTRIC_TOLERANCE {
        return None;
    }
    Some([l1, l2, l3])
}

#[derive(Debug, Clone, Copy)]
struct WorkingTriangle {
    vertices: [usize; 3],
    center: [f64; 2],
    radius_sq: f64,
}

impl WorkingTriangle {
    fn new(vertices: [usize; 3], points: &[[f64; 2]]) -> Option<Self> {
        let [a, b, c] = vertices.map(|index| points[index]);
        let d = 2.0 * (a[0] * (b[1] - c[1]) + b[0] * (c[1] - a[1]) + c[0] * (a[1] - b[1]));
        if d.abs() < AREA_EPSILON {
            return None;
        }
        let a2 = a[0] * a[0] + a[1] * a[1];
        let b2 = b[0] * b[0] + b[1] * b[1];
        let c2 = c[0] * c[0] + c[1] * c[1];
        let ux = (a2 * (b[1] - c[1]) + b2 * (c[1] - a[1]) + c2 * (a[1] - b[1])) / d;
        let uy = (a2 * (c[0] - b[0]) + b2 * (a[0] - c[0]) + c2 * (b[0] - a[0])) / d;
        let radius_sq = (a[0] - ux).powi(2) + (a[1] - uy).powi(2);
        Some(Self {
            vertices,
            center: [ux, uy],
            radius_sq,
        })
    }

    fn circumcircle_contains(&self, point: [f64; 2]) -> bool {
        let dx = point[0] - self.center[0];
        let dy = point[1] - self.center[1];
        dx * dx + dy * dy < self.radius_sq * (1.0 - 1e-10)
    }

    fn has_edge(&self, edge: (usize, usize)) -> bool {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
            .iter()
            .any(|&(p, q)| (p, q) == edge || (q, p) == edge)
    }
}

/// Bowyer-Watson. Returns triangles as indices into `points`; empty when the
/// points are collinear or fewer than three.
pub fn triangulate(points: &[[f64; 2]]) -> Vec<[usize; 3]> {
    if points.len() < MIN_CHANNELS {
        return Vec::new();
    }

    let n = points.len();
    let mut all = points.to_vec();
    all.push([0.0, 2.0 * SUPER_TRIANGLE_SCALE]);
    all.push([-2.0 * SUPER_TRIANGLE_SCALE, -SUPER_TRIANGLE_SCALE]);
    all.push([2.0 * SUPER_TRIANGLE_SCALE, -SUPER_TRIANGLE_SCALE]);

    let Some(root) = WorkingTriangle::new([n, n + 1, n + 2], &all) else {
        return Vec::new();
    };
    let mut triangles = vec![root];

    for index in 0..n {
        let point = all[index];
        let (bad, good): (Vec<_>, Vec<_>) = triangles
            .into_iter()
            .partition(|triangle| triangle.circumcircle_contains(point));
        triangles = good;

        let mut boundary = Vec::new();
        for (position, triangle) in bad.iter().enumerate() {
            let [a, b, c] = triangle.vertices;
            for edge in [(a, b), (b, c), (c, a)] {
                let shared = bad
                    .iter()
                    .enumerate()
                    .any(|(other, candidate)| other != position && candidate.has_edge(edge));
                if !shared {
                    boundary.push(edge);
                }
            }
        }

        for (a, b) in boundary {
            if let Some(triangle) = WorkingTriangle::new([a, b, index], &all) {
                triangles.push(triangle);
            }
        }
    }

    triangles
        .into_iter()
        .filter(|triangle| triangle.vertices.iter().all(|&vertex| vertex < n))
        .map(|triangle| triangle.vertices)
        .filter(|&[a, b, c]| {
            let (pa, pb, pc) = (points[a], points[b], points[c]);
            let area = (pb[0] - pa[0]) * (pc[1] - pa[1]) - (pc[0] - pa[0]) * (pb[1] - pa[1]);
            area.abs() > AREA_EPSILON
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{render_topomap, triangulate, TopomapRender, Unavailable, CONTOUR_LEVELS, GRID_SIZE};
    use crate::montage::{Channel, ELECTRODES};
    use crate::resolver::ChannelMap;

    fn map(values: &[(Channel, f64)]) -> ChannelMap {
        ChannelMap::from_raw(values.iter().copied().collect())
    }

    #[test]
    fn three_channels_are_enough_to_interpolate() {
        let render = render_topomap(&map(&[(Channel::Fz, 0.8), (Channel::O1, 0.3), (Channel::O2, 0.25)]));
        let TopomapRender::Ready(topomap) = render else {
            panic!("expected a ready topomap");
        };
        assert_eq!(topomap.triangles.len(), 1);
        assert_eq!(topomap.grid.len(), GRID_SIZE * GRID_SIZE);
        let at_fz = topomap.value_at(Channel::Fz.projected()).expect("vertex value");
        assert!((at_fz - 0.8).abs() < 1e-9);
        assert!(topomap.grid.iter().any(Option::is_some));
    }

    #[test]
    fn fewer_than_three_channels_is_unavailable() {
        let render = render_topomap(&map(&[(Channel::Fz, 0.8)]));
        assert_eq!(render, TopomapRender::Unavailable(Unavailable::TooFewChannels { found: 1 }));
        assert!(render.to_svg(200).contains("at least 3 channels"));
        assert!(!render_topomap(&ChannelMap::default()).is_ready());
    }

    #[test]
    fn collinear_channels_are_degenerate() {
        let render = render_topomap(&map(&[(Channel::Fz, 1.0), (Channel::Cz, 2.0), (Channel::Pz, 3.0)]));
        assert_eq!(render, TopomapRender::Unavailable(Unavailable::Degenerate));
    }

    #[test]
    fn full_montage_triangulation_covers_every_electrode() {
        let points = ELECTRODES.iter().map(|electrode| electrode.projected).collect::<Vec<_>>();
        let triangles = triangulate(&points);
        assert!(triangles.len() >= points.len() - 2, "{} triangles", triangles.len());
        for index in 0..points.len() {
            assert!(triangles.iter().any(|triangle| triangle.contains(&index)), "{} unused", index);
        }

        let values = ELECTRODES
            .iter()
            .enumerate()
            .map(|(index, electrode)| (electrode.channel, index as f64))
            .collect::<Vec<_>>();
        let TopomapRender::Ready(topomap) = render_topomap(&map(&values)) else {
            panic!("expected a ready topomap");
        };
        for sample in &topomap.samples {
            let value = topomap.value_at(sample.position).expect("vertex covered");
            assert!((value - sample.value).abs() < 1e-6, "{}", sample.channel);
        }
        assert_eq!(topomap.grid[0], None);
        assert_eq!(topomap.band(topomap.max), CONTOUR_LEVELS - 1);
        assert_eq!(topomap.band(topomap.min), 0);

        let svg = topomap.to_svg(400);
        assert!(svg.contains("clipPath"));
        assert_eq!(svg.matches("<title>").count(), 19);
    }
}
