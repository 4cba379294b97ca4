//! Net labels: explicit `net_label` elements and the labels traces fall back
//! to when a wire is not drawn.

use picoplace_circuit::{FacingDirection, Point, SchematicNetLabel};

const LABEL_HEIGHT: f64 = 0.24;

fn label_width(text: &str) -> f64 {
    0.2 + 0.12 * text.chars().count() as f64
}

/// A label attached at `anchor` that extends in `facing`.
pub fn net_label(
    text: &str,
    anchor: Point,
    facing: FacingDirection,
    source_net_id: Option<String>,
    source_trace_id: Option<String>,
    subcircuit_id: Option<String>,
) -> SchematicNetLabel {
    let half = if facing.is_horizontal() {
        label_width(text) / 2.0
    } else {
        LABEL_HEIGHT / 2.0
    };
    SchematicNetLabel {
        schematic_net_label_id: String::new(),
        text: text.to_string(),
        center: anchor + facing.unit() * half,
        anchor_position: anchor,
        anchor_side: facing.opposite(),
        source_net_id,
        source_trace_id,
        subcircuit_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_extends_away_from_anchor() {
        let label = net_label("GND", Point::new(1.0, 0.0), FacingDirection::Right, None, None, None);
        assert_eq!(label.anchor_side, FacingDirection::Left);
        let bounds = label.bounds();
        assert!((bounds.min_x - 1.0).abs() < 1e-9);
        assert!(bounds.max_x > 1.5);

        let up = net_label("VCC", Point::ORIGIN, FacingDirection::Up, None, None, None);
        assert!((up.bounds().min_y).abs() < 1e-9);
        assert_eq!(up.anchor_side, FacingDirection::Down);
    }
}
