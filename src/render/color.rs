use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// Blue (0) through cyan, green and yellow to red (1) by hue rotation.
pub fn value_color(normalized: f64) -> Rgb {
    let t = if normalized.is_finite() {
        normalized.clamp(0.0, 1.0)
    } else {
        0.0
    };
    hsl_to_rgb(240.0 * (1.0 - t), 0.85, 0.5)
}

pub fn hsl_to_rgb(hue: f64, saturation: f64, lightness: f64) -> Rgb {
    let h = hue.rem_euclid(360.0) / 60.0;
    let chroma = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = lightness - chroma / 2.0;
    let channel = |value: f64| ((value + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb(channel(r), channel(g), channel(b))
}

/// Categorical palette for cluster identifiers.
pub const CLUSTER_PALETTE: [Rgb; 8] = [
    Rgb(0x1f, 0x77, 0xb4),
    Rgb(0xff, 0x7f, 0x0e),
    Rgb(0x2c, 0xa0, 0x2c),
    Rgb(0xd6, 0x27, 0x28),
    Rgb(0x94, 0x67, 0xbd),
    Rgb(0x8c, 0x56, 0x4b),
    Rgb(0xe3, 0x77, 0xc2),
    Rgb(0x17, 0xbe, 0xcf),
];

pub fn cluster_color(cluster_id: i64) -> Rgb {
    CLUSTER_PALETTE[cluster_id.rem_euclid(CLUSTER_PALETTE.len() as i64) as usize]
}

#[cfg(test)]
mod tests {
    use super::{cluster_color, value_color, Rgb, CLUSTER_PALETTE};

    #[test]
    fn scale_runs_from_blue_to_red() {
        let low = value_color(0.0);
        let high = value_color(1.0);
        assert!(low.2 > low.0, "{:?}", low);
        assert!(high.0 > high.2, "{:?}", high);
        assert_eq!(value_color(-3.0), low);
        assert_eq!(value_color(f64::NAN), low);
        assert_eq!(Rgb(255, 0, 16).hex(), "#ff0010");
    }

    #[test]
    fn palette_cycles_for_any_cluster_id() {
        assert_eq!(cluster_color(0), CLUSTER_PALETTE[0]);
        assert_eq!(cluster_color(8), CLUSTER_PALETTE[0]);
        assert_eq!(cluster_color(-1), CLUSTER_PALETTE[7]);
    }
}
