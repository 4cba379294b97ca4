//! Diagram ("schematic") records.

use serde::{Deserialize, Serialize};

use crate::{Bounds, ElementKind, Point, Record, Size};

/// Direction a port's wire leaves its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingDirection {
    Up,
    Down,
    Left,
    Right,
}

impl FacingDirection {
    pub fn unit(&self) -> Point {
        match self {
            FacingDirection::Up => Point::new(0.0, 1.0),
            FacingDirection::Down => Point::new(0.0, -1.0),
            FacingDirection::Left => Point::new(-1.0, 0.0),
            FacingDirection::Right => Point::new(1.0, 0.0),
        }
    }

    pub fn opposite(&self) -> FacingDirection {
        match self {
            FacingDirection::Up => FacingDirection::Down,
            FacingDirection::Down => FacingDirection::Up,
            FacingDirection::Left => FacingDirection::Right,
            FacingDirection::Right => FacingDirection::Left,
        }
    }

    pub fn is_horizontal(&self) -> bool {
        matches!(self, FacingDirection::Left | FacingDirection::Right)
    }

    /// Facing of a port at `offset` from its component center.
    pub fn from_offset(offset: Point) -> FacingDirection {
        if offset.x.abs() >= offset.y.abs() {
            if offset.x < 0.0 {
                FacingDirection::Left
            } else {
                FacingDirection::Right
            }
        } else if offset.y < 0.0 {
            FacingDirection::Down
        } else {
            FacingDirection::Up
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchematicComponent {
    pub schematic_component_id: String,
    pub source_component_id: String,
    pub center: Point,
    pub size: Size,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    /// Rendered as a plain box with pins rather than a symbol.
    #[serde(default)]
    pub is_box_with_pins: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl SchematicComponent {
    pub fn bounds(&self) -> Bounds {
        Bounds::from_center(self.center, self.size.width, self.size.height)
    }
}

impl Record for SchematicComponent {
    const KIND: ElementKind = ElementKind::SchematicComponent;

    fn id(&self) -> &str {
        &self.schematic_component_id
    }

    fn set_id(&mut self, id: String) {
        self.schematic_component_id = id;
    }

    fn translate_schematic(&mut self, delta: Point) {
        self.center = self.center + delta;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchematicPort {
    pub schematic_port_id: String,
    pub source_port_id: String,
    pub center: Point,
    pub facing_direction: FacingDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schematic_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_number: Option<u32>,
}

impl Record for SchematicPort {
    const KIND: ElementKind = ElementKind::SchematicPort;

    fn id(&self) -> &str {
        &self.schematic_port_id
    }

    fn set_id(&mut self, id: String) {
        self.schematic_port_id = id;
    }

    fn translate_schematic(&mut self, delta: Point) {
        self.center = self.center + delta;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchematicTraceEdge {
    pub from: Point,
    pub to: Point,
    /// Short hop drawn where this wire crosses a wire of another net.
    #[serde(default)]
    pub is_crossing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_schematic_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_schematic_port_id: Option<String>,
}

impl SchematicTraceEdge {
    pub fn new(from: Point, to: Point) -> Self {
        Self {
            from,
            to,
            is_crossing: false,
            from_schematic_port_id: None,
            to_schematic_port_id: None,
        }
    }

    pub fn is_horizontal(&self) -> bool {
        (self.from.y - self.to.y).abs() < 1e-9
    }

    pub fn is_vertical(&self) -> bool {
        (self.from.x - self.to.x).abs() < 1e-9
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchematicTrace {
    pub schematic_trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_trace_id: Option<String>,
    pub edges: Vec<SchematicTraceEdge>,
    #[serde(default)]
    pub junctions: Vec<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl Record for SchematicTrace {
    const KIND: ElementKind = ElementKind::SchematicTrace;

    fn id(&self) -> &str {
        &self.schematic_trace_id
    }

    fn set_id(&mut self, id: String) {
        self.schematic_trace_id = id;
    }

    fn translate_schematic(&mut self, delta: Point) {
        for edge in &mut self.edges {
            edge.from = edge.from + delta;
            edge.to = edge.to + delta;
        }
        for j in &mut self.junctions {
            *j = *j + delta;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchematicNetLabel {
    pub schematic_net_label_id: String,
    pub text: String,
    pub center: Point,
    /// Where the label attaches to its wire or port.
    pub anchor_position: Point,
    pub anchor_side: FacingDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_net_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl SchematicNetLabel {
    /// Label box; width grows with the text.
    pub fn bounds(&self) -> Bounds {
        let width = 0.2 + 0.12 * self.text.chars().count() as f64;
        Bounds::from_center(self.center, width, 0.24)
    }
}

impl Record for SchematicNetLabel {
    const KIND: ElementKind = ElementKind::SchematicNetLabel;

    fn id(&self) -> &str {
        &self.schematic_net_label_id
    }

    fn set_id(&mut self, id: String) {
        self.schematic_net_label_id = id;
    }

    fn translate_schematic(&mut self, delta: Point) {
        self.center = self.center + delta;
        self.anchor_position = self.anchor_position + delta;
    }
}
