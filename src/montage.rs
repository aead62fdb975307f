//! Fixed 19-electrode 10-20 montage.
//!
//! The 2-D positions are an azimuthal projection with `Cz` at the origin, the nose
//! towards `+y` and the head outline at radius 1. The 3-D positions are the same
//! electrodes on the unit sphere.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    Fp1,
    Fp2,
    F3,
    F4,
    F7,
    F8,
    T3,
    T4,
    C3,
    C4,
    T5,
    T6,
    P3,
    P4,
    O1,
    O2,
    Fz,
    Cz,
    Pz,
}

#[derive(Debug, Clone, Copy)]
pub struct Electrode {
    pub channel: Channel,
    pub name: &'static str,
    pub position: [f64; 3],
    pub projected: [f64; 2],
}

pub const ELECTRODES: [Electrode; 19] = [
    electrode(Channel::Fp1, "Fp1", [-0.315, 0.946, 0.081], [-0.30, 0.90]),
    electrode(Channel::Fp2, "Fp2", [0.315, 0.946, 0.081], [0.30, 0.90]),
    electrode(Channel::F3, "F3", [-0.469, 0.670, 0.575], [-0.35, 0.50]),
    electrode(Channel::F4, "F4", [0.469, 0.670, 0.575], [0.35, 0.50]),
    electrode(Channel::F7, "F7", [-0.754, 0.646, 0.122], [-0.70, 0.60]),
    electrode(Channel::F8, "F8", [0.754, 0.646, 0.122], [0.70, 0.60]),
    electrode(Channel::T3, "T3", [-0.988, 0.0, 0.156], [-0.90, 0.0]),
    electrode(Channel::T4, "T4", [0.988, 0.0, 0.156], [0.90, 0.0]),
    electrode(Channel::C3, "C3", [-0.649, 0.0, 0.760], [-0.45, 0.0]),
    electrode(Channel::C4, "C4", [0.649, 0.0, 0.760], [0.45, 0.0]),
    electrode(Channel::T5, "T5", [-0.754, -0.646, 0.122], [-0.70, -0.60]),
    electrode(Channel::T6, "T6", [0.754, -0.646, 0.122], [0.70, -0.60]),
    electrode(Channel::P3, "P3", [-0.469, -0.670, 0.575], [-0.35, -0.50]),
    electrode(Channel::P4, "P4", [0.469, -0.670, 0.575], [0.35, -0.50]),
    electrode(Channel::O1, "O1", [-0.315, -0.946, 0.081], [-0.30, -0.90]),
    electrode(Channel::O2, "O2", [0.315, -0.946, 0.081], [0.30, -0.90]),
    electrode(Channel::Fz, "Fz", [0.0, 0.707, 0.707], [0.0, 0.50]),
    electrode(Channel::Cz, "Cz", [0.0, 0.0, 1.0], [0.0, 0.0]),
    electrode(Channel::Pz, "Pz", [0.0, -0.707, 0.707], [0.0, -0.50]),
];

const fn electrode(
    channel: Channel,
    name: &'static str,
    position: [f64; 3],
    projected: [f64; 2],
) -> Electrode {
    Electrode {
        channel,
        name,
        position,
        projected,
    }
}

/// Region descriptions keyed by name prefix. Longer prefixes come first.
const REGIONS: [(&str, &str); 6] = [
    ("Fp", "Prefrontal cortex: attention, planning and eye-movement artifacts"),
    ("F", "Frontal lobe: executive function, working memory and motor planning"),
    ("C", "Central strip: sensorimotor cortex, mu rhythm"),
    ("T", "Temporal lobe: auditory processing and memory"),
    ("P", "Parietal lobe: spatial attention and sensory integration"),
    ("O", "Occipital lobe: visual processing, dominant resting alpha"),
];

impl Channel {
    pub fn all() -> impl Iterator<Item = Channel> {
        ELECTRODES.iter().map(|electrode| electrode.channel)
    }

    /// Exact, case-sensitive lookup against the montage names.
    pub fn from_name(raw: &str) -> Option<Self> {
        ELECTRODES
            .iter()
            .find(|electrode| electrode.name == raw)
            .map(|electrode| electrode.channel)
    }

    // ELECTRODES is laid out in declaration order.
    pub fn electrode(self) -> &'static Electrode {
        &ELECTRODES[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        self.electrode().name
    }

    pub fn position(self) -> [f64; 3] {
        self.electrode().position
    }

    pub fn projected(self) -> [f64; 2] {
        self.electrode().projected
    }

    pub fn region(self) -> &'static str {
        let name = self.as_str();
        REGIONS
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|(_, description)| *description)
            .unwrap_or("Unmapped scalp region")
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const BANDS: [(&str, f64, f64); 5] = [
    ("delta", 0.5, 4.0),
    ("theta", 4.0, 8.0),
    ("alpha", 8.0, 13.0),
    ("beta", 13.0, 30.0),
    ("gamma", 30.0, 50.0),
];

#[cfg(test)]
mod tests {
    use super::{Channel, ELECTRODES};

    #[test]
    fn every_channel_round_trips_through_its_name() {
        assert_eq!(Channel::all().count(), 19);
        for electrode in ELECTRODES.iter() {
            assert_eq!(Channel::from_name(electrode.name), Some(electrode.channel));
            assert_eq!(electrode.channel.as_str(), electrode.name);
            assert_eq!(electrode.channel.electrode().name, electrode.name);
        }
        assert_eq!(Channel::from_name("fz"), None);
        assert_eq!(Channel::from_name("Oz"), None);
    }

    #[test]
    fn prefrontal_prefix_wins_over_frontal() {
        assert!(Channel::Fp1.region().starts_with("Prefrontal"));
        assert!(Channel::F7.region().starts_with("Frontal"));
        assert!(Channel::Fz.region().starts_with("Frontal"));
        assert!(Channel::O2.region().starts_with("Occipital"));
    }

    #[test]
    fn positions_sit_on_the_unit_sphere_and_inside_the_head() {
        for electrode in ELECTRODES.iter() {
            let [x, y, z] = electrode.position;
            let norm = (x * x + y * y + z * z).sqrt();
            assert!((norm - 1.0).abs() < 0.01, "{} norm {}", electrode.name, norm);
            let [px, py] = electrode.projected;
            assert!(px.hypot(py) < 1.0);
        }
    }
}
