//! Footprint primitives and the provider boundary.
//!
//! The core never parses footprint strings. A [`FootprintProvider`] maps a
//! footprint name to pads and holes in the component frame; ports are matched
//! to primitives through their `port_hints`.

use std::collections::HashMap;

use picoplace_circuit::{Bounds, PadShape, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FootprintError {
    #[error("unknown footprint `{0}`")]
    Unknown(String),

    #[error("footprint `{footprint}` could not be loaded: {reason}")]
    Load { footprint: String, reason: String },
}

/// A pad or hole, positioned relative to the component center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FootprintPrimitive {
    SmtPad {
        shape: PadShape,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default)]
        port_hints: Vec<String>,
    },
    PlatedHole {
        x: f64,
        y: f64,
        hole_diameter: f64,
        outer_diameter: f64,
        #[serde(default)]
        port_hints: Vec<String>,
    },
    Hole {
        x: f64,
        y: f64,
        hole_diameter: f64,
    },
}

impl FootprintPrimitive {
    pub fn rect_pad(x: f64, y: f64, width: f64, height: f64, hints: &[&str]) -> Self {
        FootprintPrimitive::SmtPad {
            shape: PadShape::Rect,
            x,
            y,
            width,
            height,
            port_hints: hints.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn plated_hole(x: f64, y: f64, hole: f64, outer: f64, hints: &[&str]) -> Self {
        FootprintPrimitive::PlatedHole {
            x,
            y,
            hole_diameter: hole,
            outer_diameter: outer,
            port_hints: hints.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn offset(&self) -> Point {
        match self {
            FootprintPrimitive::SmtPad { x, y, .. }
            | FootprintPrimitive::PlatedHole { x, y, .. }
            | FootprintPrimitive::Hole { x, y, .. } => Point::new(*x, *y),
        }
    }

    pub fn port_hints(&self) -> &[String] {
        match self {
            FootprintPrimitive::SmtPad { port_hints, .. }
            | FootprintPrimitive::PlatedHole { port_hints, .. } => port_hints,
            FootprintPrimitive::Hole { .. } => &[],
        }
    }

    /// Bounds in the component frame.
    pub fn bounds(&self) -> Bounds {
        match self {
            FootprintPrimitive::SmtPad {
                x, y, width, height, ..
            } => Bounds::from_center(Point::new(*x, *y), *width, *height),
            FootprintPrimitive::PlatedHole {
                x, y, outer_diameter, ..
            } => Bounds::from_center(Point::new(*x, *y), *outer_diameter, *outer_diameter),
            FootprintPrimitive::Hole { x, y, hole_diameter } => {
                Bounds::from_center(Point::new(*x, *y), *hole_diameter, *hole_diameter)
            }
        }
    }
}

/// Bounds of every primitive, in the component frame.
pub fn footprint_bounds(primitives: &[FootprintPrimitive]) -> Option<Bounds> {
    primitives
        .iter()
        .map(FootprintPrimitive::bounds)
        .reduce(|a, b| a.union(&b))
}

pub trait FootprintProvider {
    fn load(&self, footprint: &str) -> Result<Vec<FootprintPrimitive>, FootprintError>;
}

/// Footprints held in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StaticFootprintProvider {
    footprints: HashMap<String, Vec<FootprintPrimitive>>,
}

fn chip_passive(pitch: f64, pad_w: f64, pad_h: f64) -> Vec<FootprintPrimitive> {
    vec![
        FootprintPrimitive::rect_pad(-pitch / 2.0, 0.0, pad_w, pad_h, &["pin1", "1"]),
        FootprintPrimitive::rect_pad(pitch / 2.0, 0.0, pad_w, pad_h, &["pin2", "2"]),
    ]
}

fn soic8() -> Vec<FootprintPrimitive> {
    let mut pads = Vec::with_capacity(8);
    for i in 0..4 {
        let y = 1.905 - i as f64 * 1.27;
        let left = format!("pin{}", i + 1);
        let right = format!("pin{}", 8 - i);
        pads.push(FootprintPrimitive::rect_pad(-2.7, y, 1.55, 0.6, &[left.as_str()]));
        pads.push(FootprintPrimitive::rect_pad(2.7, y, 1.55, 0.6, &[right.as_str()]));
    }
    pads
}

impl StaticFootprintProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chip passives, axial through-hole and a few IC packages.
    pub fn standard() -> Self {
        Self::new()
            .with("0402", chip_passive(1.0, 0.6, 0.6))
            .with("0603", chip_passive(1.6, 0.8, 0.95))
            .with("0805", chip_passive(1.9, 1.0, 1.45))
            .with("1206", chip_passive(2.9, 1.15, 1.8))
            .with(
                "axial",
                vec![
                    FootprintPrimitive::plated_hole(-5.08, 0.0, 0.8, 1.6, &["pin1", "1"]),
                    FootprintPrimitive::plated_hole(5.08, 0.0, 0.8, 1.6, &["pin2", "2"]),
                ],
            )
            .with("soic8", soic8())
            .with(
                "sot23",
                vec![
                    FootprintPrimitive::rect_pad(-0.95, -1.0, 0.6, 0.7, &["pin1", "1"]),
                    FootprintPrimitive::rect_pad(0.95, -1.0, 0.6, 0.7, &["pin2", "2"]),
                    FootprintPrimitive::rect_pad(0.0, 1.0, 0.6, 0.7, &["pin3", "3"]),
                ],
            )
    }

    pub fn with(mut self, name: impl Into<String>, primitives: Vec<FootprintPrimitive>) -> Self {
        self.footprints.insert(name.into(), primitives);
        self
    }
}

impl FootprintProvider for StaticFootprintProvider {
    fn load(&self, footprint: &str) -> Result<Vec<FootprintPrimitive>, FootprintError> {
        self.footprints
            .get(footprint)
            .cloned()
            .ok_or_else(|| FootprintError::Unknown(footprint.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_passive_pads_are_symmetric() {
        let provider = StaticFootprintProvider::standard();
        let pads = provider.load("0402").unwrap();
        assert_eq!(pads.len(), 2);
        assert_eq!(pads[0].offset(), Point::new(-0.5, 0.0));
        assert_eq!(pads[1].port_hints(), &["pin2".to_string(), "2".to_string()]);
        let bounds = footprint_bounds(&pads).unwrap();
        assert!((bounds.width() - 1.6).abs() < 1e-9);
    }

    #[test]
    fn unknown_footprint_is_an_error() {
        let provider = StaticFootprintProvider::standard();
        assert_eq!(
            provider.load("qfn99"),
            Err(FootprintError::Unknown("qfn99".into()))
        );
    }

    #[test]
    fn soic8_pins_wrap_around() {
        let pads = StaticFootprintProvider::standard().load("soic8").unwrap();
        let pin8 = pads.iter().find(|p| p.port_hints().contains(&"pin8".to_string())).unwrap();
        assert!(pin8.offset().x > 0.0);
        assert!((pin8.offset().y - 1.905).abs() < 1e-9);
    }
}
