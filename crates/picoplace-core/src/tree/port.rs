//! Standard pin sets and the port layout of diagram symbols.

use picoplace_circuit::{FacingDirection, Point, Size};

use crate::footprint::FootprintPrimitive;
use crate::tree::props::{ElementProps, PortProps};

fn two_pin(first: &[&str], second: &[&str]) -> Vec<PortProps> {
    let aliases = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    vec![
        PortProps::new("pin1", Some(1), aliases(first)),
        PortProps::new("pin2", Some(2), aliases(second)),
    ]
}

/// Ports a component has before its footprint is known.
///
/// `None` means the component has no standard pin set and takes its ports
/// from footprint port hints instead.
pub fn standard_ports(props: &ElementProps) -> Option<Vec<PortProps>> {
    match props {
        ElementProps::Resistor(_) | ElementProps::Inductor(_) => {
            Some(two_pin(&["1", "left"], &["2", "right"]))
        }
        ElementProps::Capacitor(_) => Some(two_pin(
            &["1", "left", "anode", "pos"],
            &["2", "right", "cathode", "neg"],
        )),
        ElementProps::Diode(_) | ElementProps::Led(_) => Some(two_pin(
            &["1", "left", "anode", "pos"],
            &["2", "right", "cathode", "neg"],
        )),
        ElementProps::Chip(chip) => {
            let from_labels = chip
                .pin_labels
                .keys()
                .filter_map(|k| k.trim_start_matches("pin").parse::<u32>().ok())
                .max()
                .unwrap_or(0);
            let count = chip.pin_count.unwrap_or(0).max(from_labels);
            if count == 0 {
                return None;
            }
            Some(
                (1..=count)
                    .map(|n| {
                        let mut aliases = vec![n.to_string()];
                        let labels = chip
                            .pin_labels
                            .get(&n.to_string())
                            .or_else(|| chip.pin_labels.get(&format!("pin{n}")));
                        if let Some(labels) = labels {
                            aliases.extend(labels.labels());
                        }
                        PortProps::new(format!("pin{n}"), Some(n), aliases)
                    })
                    .collect(),
            )
        }
        _ => None,
    }
}

/// Ports derived from the port hints of footprint primitives.
pub fn ports_from_footprint(primitives: &[FootprintPrimitive]) -> Vec<PortProps> {
    let mut ports: Vec<PortProps> = Vec::new();
    for primitive in primitives {
        let hints = primitive.port_hints();
        if hints.is_empty() {
            continue;
        }
        if ports.iter().any(|p| hints.iter().any(|h| p.matches(h))) {
            continue;
        }
        let pin_number = hints.iter().find_map(|h| h.trim_start_matches("pin").parse::<u32>().ok());
        let name = match pin_number {
            Some(n) => format!("pin{n}"),
            None => hints[0].clone(),
        };
        let mut aliases: Vec<String> = hints.to_vec();
        if let Some(n) = pin_number {
            aliases.push(n.to_string());
        }
        ports.push(PortProps::new(name, pin_number, aliases));
    }
    ports
}

/// Layout of a diagram symbol: its size and where each pin sits.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolLayout {
    pub size: Size,
    pub symbol_name: Option<String>,
    pub is_box_with_pins: bool,
    /// Offset from the symbol center and facing, per port in port order.
    pub pins: Vec<(Point, FacingDirection)>,
}

const PIN_SPACING: f64 = 0.2;
const BOX_WIDTH: f64 = 1.2;
const PIN_LENGTH: f64 = 0.2;

pub fn symbol_layout(props: &ElementProps, port_count: usize) -> SymbolLayout {
    if props.is_box_with_pins() || port_count > 2 {
        // Pins 1..n/2 down the left side, the rest up the right side.
        let left = port_count.div_ceil(2);
        let right = port_count - left;
        let rows = left.max(right).max(1);
        let height = rows as f64 * PIN_SPACING + PIN_SPACING;
        let top = (rows as f64 - 1.0) * PIN_SPACING / 2.0;
        let half = BOX_WIDTH / 2.0 + PIN_LENGTH;

        let mut pins = Vec::with_capacity(port_count);
        for i in 0..left {
            pins.push((Point::new(-half, top - i as f64 * PIN_SPACING), FacingDirection::Left));
        }
        for i in 0..right {
            let row = rows - 1 - i;
            pins.push((Point::new(half, top - row as f64 * PIN_SPACING), FacingDirection::Right));
        }
        return SymbolLayout {
            size: Size::new(BOX_WIDTH, height),
            symbol_name: None,
            is_box_with_pins: true,
            pins,
        };
    }

    let symbol_name = format!("{}_horz", props.kind_name());
    SymbolLayout {
        size: Size::new(1.1, 0.4),
        symbol_name: Some(symbol_name),
        is_box_with_pins: false,
        pins: vec![
            (Point::new(-0.55, 0.0), FacingDirection::Left),
            (Point::new(0.55, 0.0), FacingDirection::Right),
        ]
        .into_iter()
        .take(port_count.max(1))
        .collect(),
    }
}

/// Rotate a facing direction counter-clockwise by a multiple of 90 degrees.
pub fn rotate_facing(facing: FacingDirection, degrees: f64) -> FacingDirection {
    let turns = ((degrees / 90.0).round() as i64).rem_euclid(4);
    (0..turns).fold(facing, |f, _| match f {
        FacingDirection::Right => FacingDirection::Up,
        FacingDirection::Up => FacingDirection::Left,
        FacingDirection::Left => FacingDirection::Down,
        FacingDirection::Down => FacingDirection::Right,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::props::{ChipProps, PinLabel, Placement};
    use std::collections::BTreeMap;

    fn chip(pin_count: Option<u32>, labels: &[(&str, &str)]) -> ElementProps {
        ElementProps::Chip(ChipProps {
            name: "U1".into(),
            placement: Placement::default(),
            footprint: None,
            pin_labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), PinLabel::One(v.to_string())))
                .collect::<BTreeMap<_, _>>(),
            pin_count,
            manufacturer_part_number: None,
            connections: BTreeMap::new(),
        })
    }

    #[test]
    fn chip_ports_from_labels() {
        let ports = standard_ports(&chip(None, &[("1", "VCC"), ("3", "GND")])).unwrap();
        assert_eq!(ports.len(), 3);
        assert!(ports[0].matches("VCC"));
        assert!(ports[2].matches("GND"));
        assert!(ports[1].matches("2"));
    }

    #[test]
    fn chip_without_pins_has_no_standard_set() {
        assert!(standard_ports(&chip(None, &[])).is_none());
    }

    #[test]
    fn box_pins_face_outwards() {
        let layout = symbol_layout(&chip(Some(4), &[]), 4);
        assert!(layout.is_box_with_pins);
        assert_eq!(layout.pins[0].1, FacingDirection::Left);
        assert_eq!(layout.pins[3].1, FacingDirection::Right);
        // Pin 1 top left, pin 4 top right.
        assert_eq!(layout.pins[0].0.y, layout.pins[3].0.y);
    }

    #[test]
    fn facing_rotation() {
        assert_eq!(rotate_facing(FacingDirection::Right, 90.0), FacingDirection::Up);
        assert_eq!(rotate_facing(FacingDirection::Left, -90.0), FacingDirection::Up);
        assert_eq!(rotate_facing(FacingDirection::Down, 360.0), FacingDirection::Down);
    }
}
