//! Declarative element descriptions, as read from a JSON tree.

use std::collections::BTreeMap;

use picoplace_circuit::{FacingDirection, LayerRef, Point};
use picoplace_engine::AutorouterKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RoutingMode;

/// One element of the declarative tree and its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescription {
    #[serde(flatten)]
    pub props: ElementProps,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementDescription>,
}

impl ElementDescription {
    pub fn new(props: ElementProps) -> Self {
        Self {
            props,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ElementDescription>) -> Self {
        self.children = children;
        self
    }
}

/// Position props shared by every placed element.
///
/// Physical coordinates are relative to the parent's center, diagram
/// coordinates likewise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcb_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcb_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcb_rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<LayerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schematic_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schematic_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schematic_rotation: Option<f64>,
}

impl Placement {
    pub fn pcb_offset(&self) -> Option<Point> {
        match (self.pcb_x, self.pcb_y) {
            (None, None) => None,
            (x, y) => Some(Point::new(x.unwrap_or(0.0), y.unwrap_or(0.0))),
        }
    }

    pub fn schematic_offset(&self) -> Option<Point> {
        match (self.schematic_x, self.schematic_y) {
            (None, None) => None,
            (x, y) => Some(Point::new(x.unwrap_or(0.0), y.unwrap_or(0.0))),
        }
    }
}

/// Props that only position an element. They are excluded from structural
/// hashes.
pub const POSITIONAL_PROPS: &[&str] = &[
    "pcb_x",
    "pcb_y",
    "pcb_rotation",
    "schematic_x",
    "schematic_y",
    "schematic_rotation",
    "margin",
    "anchor",
];

fn default_layers() -> u8 {
    2
}

fn default_thickness() -> f64 {
    1.6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardProps {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub outline: Option<Vec<Point>>,
    #[serde(default = "default_layers")]
    pub layers: u8,
    #[serde(default = "default_thickness")]
    pub thickness: f64,
    #[serde(default)]
    pub autorouter: Option<AutorouterKind>,
    #[serde(default)]
    pub routing_mode: Option<RoutingMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupProps {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub subcircuit: bool,
    /// Render this subtree on its own and reuse the result for identical
    /// subtrees.
    #[serde(default)]
    pub isolated: bool,
    #[serde(default)]
    pub autorouter: Option<AutorouterKind>,
    #[serde(default)]
    pub routing_mode: Option<RoutingMode>,
}

/// Two-terminal parts: resistors, capacitors, inductors, diodes, LEDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartProps {
    pub name: String,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub footprint: Option<String>,
    #[serde(
        default,
        alias = "resistance",
        alias = "capacitance",
        alias = "inductance",
        alias = "color"
    )]
    pub value: Option<Value>,
    #[serde(default)]
    pub manufacturer_part_number: Option<String>,
    /// Port alias -> selector, e.g. `{"pin1": "net.VCC"}`.
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PinLabel {
    One(String),
    Many(Vec<String>),
}

impl PinLabel {
    pub fn labels(&self) -> Vec<String> {
        match self {
            PinLabel::One(label) => vec![label.clone()],
            PinLabel::Many(labels) => labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipProps {
    pub name: String,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub footprint: Option<String>,
    /// Pin number -> label(s), e.g. `{"1": "VCC", "2": ["GND", "VSS"]}`.
    #[serde(default)]
    pub pin_labels: BTreeMap<String, PinLabel>,
    #[serde(default)]
    pub pin_count: Option<u32>,
    #[serde(default)]
    pub manufacturer_part_number: Option<String>,
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetProps {
    pub name: String,
    #[serde(default)]
    pub connects_to: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteHint {
    pub x: f64,
    pub y: f64,
    /// A via may be placed at this hint.
    #[serde(default)]
    pub via: bool,
    #[serde(default)]
    pub to_layer: Option<LayerRef>,
}

impl RouteHint {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceProps {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    /// Explicit intermediate points; the route is built without an autorouter.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pcb_path: Vec<Point>,
    pub pcb_straight_line: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pcb_route_hints: Vec<RouteHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcb_layer: Option<LayerRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thickness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<f64>,
}

impl TraceProps {
    pub fn between(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
            ..Default::default()
        }
    }

    /// Endpoint selectors in order.
    pub fn selectors(&self) -> Vec<String> {
        if !self.path.is_empty() {
            return self.path.clone();
        }
        self.from.iter().chain(self.to.iter()).cloned().collect()
    }
}

fn default_from_layer() -> LayerRef {
    LayerRef::Top
}

fn default_to_layer() -> LayerRef {
    LayerRef::Bottom
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViaProps {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default = "default_from_layer")]
    pub from_layer: LayerRef,
    #[serde(default = "default_to_layer")]
    pub to_layer: LayerRef,
    #[serde(default)]
    pub outer_diameter: Option<f64>,
    #[serde(default)]
    pub hole_diameter: Option<f64>,
    /// Name of the net the via belongs to.
    #[serde(default)]
    pub net: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetLabelProps {
    pub net: String,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub anchor_side: Option<FacingDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopperPourProps {
    pub net: String,
    #[serde(default = "default_from_layer")]
    pub layer: LayerRef,
    #[serde(default)]
    pub clearance: Option<f64>,
}

/// A port synthesized from a standard pin set, pin labels or footprint hints.
#[derive(Debug, Clone, PartialEq)]
pub struct PortProps {
    pub name: String,
    pub pin_number: Option<u32>,
    /// Every name the port answers to, `name` included.
    pub aliases: Vec<String>,
}

impl PortProps {
    pub fn new(name: impl Into<String>, pin_number: Option<u32>, aliases: Vec<String>) -> Self {
        let name = name.into();
        let mut all = vec![name.clone()];
        for alias in aliases {
            if !all.contains(&alias) {
                all.push(alias);
            }
        }
        Self {
            name,
            pin_number,
            aliases: all,
        }
    }

    pub fn matches(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }
}

/// Stand-in for a component rendered inside an isolated subcircuit.
#[derive(Debug, Clone, PartialEq)]
pub struct InflatedProps {
    pub name: String,
    pub source_component_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementProps {
    Board(BoardProps),
    Group(GroupProps),
    Resistor(PartProps),
    Capacitor(PartProps),
    Inductor(PartProps),
    Diode(PartProps),
    Led(PartProps),
    Chip(ChipProps),
    Net(NetProps),
    Trace(TraceProps),
    Via(ViaProps),
    NetLabel(NetLabelProps),
    CopperPour(CopperPourProps),
    #[serde(skip)]
    Port(PortProps),
    #[serde(skip)]
    Inflated(InflatedProps),
}

impl ElementProps {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ElementProps::Board(_) => "board",
            ElementProps::Group(_) => "group",
            ElementProps::Resistor(_) => "resistor",
            ElementProps::Capacitor(_) => "capacitor",
            ElementProps::Inductor(_) => "inductor",
            ElementProps::Diode(_) => "diode",
            ElementProps::Led(_) => "led",
            ElementProps::Chip(_) => "chip",
            ElementProps::Net(_) => "net",
            ElementProps::Trace(_) => "trace",
            ElementProps::Via(_) => "via",
            ElementProps::NetLabel(_) => "net_label",
            ElementProps::CopperPour(_) => "copper_pour",
            ElementProps::Port(_) => "port",
            ElementProps::Inflated(_) => "component",
        }
    }

    /// Functional type written to `source_component.ftype`.
    pub fn ftype(&self) -> Option<&'static str> {
        match self {
            ElementProps::Resistor(_) => Some("simple_resistor"),
            ElementProps::Capacitor(_) => Some("simple_capacitor"),
            ElementProps::Inductor(_) => Some("simple_inductor"),
            ElementProps::Diode(_) => Some("simple_diode"),
            ElementProps::Led(_) => Some("simple_led"),
            ElementProps::Chip(_) => Some("simple_chip"),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ElementProps::Board(p) => p.name.as_deref(),
            ElementProps::Group(p) => p.name.as_deref(),
            ElementProps::Resistor(p)
            | ElementProps::Capacitor(p)
            | ElementProps::Inductor(p)
            | ElementProps::Diode(p)
            | ElementProps::Led(p) => Some(&p.name),
            ElementProps::Chip(p) => Some(&p.name),
            ElementProps::Net(p) => Some(&p.name),
            ElementProps::Via(p) => p.name.as_deref(),
            ElementProps::Port(p) => Some(&p.name),
            ElementProps::Inflated(p) => Some(&p.name),
            ElementProps::Trace(_) | ElementProps::NetLabel(_) | ElementProps::CopperPour(_) => None,
        }
    }

    pub fn placement(&self) -> Option<&Placement> {
        match self {
            ElementProps::Board(p) => Some(&p.placement),
            ElementProps::Group(p) => Some(&p.placement),
            ElementProps::Resistor(p)
            | ElementProps::Capacitor(p)
            | ElementProps::Inductor(p)
            | ElementProps::Diode(p)
            | ElementProps::Led(p) => Some(&p.placement),
            ElementProps::Chip(p) => Some(&p.placement),
            ElementProps::Via(p) => Some(&p.placement),
            ElementProps::NetLabel(p) => Some(&p.placement),
            _ => None,
        }
    }

    pub fn footprint(&self) -> Option<&str> {
        match self {
            ElementProps::Resistor(p)
            | ElementProps::Capacitor(p)
            | ElementProps::Inductor(p)
            | ElementProps::Diode(p)
            | ElementProps::Led(p) => p.footprint.as_deref(),
            ElementProps::Chip(p) => p.footprint.as_deref(),
            _ => None,
        }
    }

    pub fn connections(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ElementProps::Resistor(p)
            | ElementProps::Capacitor(p)
            | ElementProps::Inductor(p)
            | ElementProps::Diode(p)
            | ElementProps::Led(p) => Some(&p.connections),
            ElementProps::Chip(p) => Some(&p.connections),
            _ => None,
        }
    }

    pub fn manufacturer_part_number(&self) -> Option<&str> {
        match self {
            ElementProps::Resistor(p)
            | ElementProps::Capacitor(p)
            | ElementProps::Inductor(p)
            | ElementProps::Diode(p)
            | ElementProps::Led(p) => p.manufacturer_part_number.as_deref(),
            ElementProps::Chip(p) => p.manufacturer_part_number.as_deref(),
            _ => None,
        }
    }

    /// Display form of the part value (`"1k"`, `"100nF"`, `1000` -> `"1000"`).
    pub fn value(&self) -> Option<String> {
        let value = match self {
            ElementProps::Resistor(p)
            | ElementProps::Capacitor(p)
            | ElementProps::Inductor(p)
            | ElementProps::Diode(p)
            | ElementProps::Led(p) => p.value.as_ref()?,
            _ => return None,
        };
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Components own ports.
    pub fn has_ports(&self) -> bool {
        self.ftype().is_some() || matches!(self, ElementProps::Inflated(_))
    }

    /// Components rendered as physical copper.
    pub fn has_physical_primitive(&self) -> bool {
        self.ftype().is_some() || matches!(self, ElementProps::Via(_))
    }

    pub fn has_diagram_symbol(&self) -> bool {
        self.ftype().is_some()
    }

    /// Rendered as a box with pins rather than a symbol.
    pub fn is_box_with_pins(&self) -> bool {
        matches!(self, ElementProps::Chip(_))
    }

    pub fn is_container(&self) -> bool {
        matches!(self, ElementProps::Board(_) | ElementProps::Group(_))
    }

    pub fn is_subcircuit(&self) -> bool {
        match self {
            ElementProps::Board(_) => true,
            ElementProps::Group(g) => g.subcircuit || g.isolated,
            _ => false,
        }
    }

    pub fn is_isolated(&self) -> bool {
        matches!(self, ElementProps::Group(g) if g.isolated)
    }

    pub fn autorouter(&self) -> Option<AutorouterKind> {
        match self {
            ElementProps::Board(p) => p.autorouter,
            ElementProps::Group(p) => p.autorouter,
            _ => None,
        }
    }

    pub fn routing_mode(&self) -> Option<RoutingMode> {
        match self {
            ElementProps::Board(p) => p.routing_mode,
            ElementProps::Group(p) => p.routing_mode,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_tree() {
        let tree: ElementDescription = serde_json::from_value(json!({
            "type": "board",
            "width": 20,
            "height": 10,
            "children": [
                { "type": "resistor", "name": "R1", "resistance": "1k", "footprint": "0402", "pcb_x": -3 },
                { "type": "trace", "from": ".R1 > .pin1", "to": "net.GND" }
            ]
        }))
        .unwrap();

        let ElementProps::Board(board) = &tree.props else {
            panic!("expected board, got {:?}", tree.props);
        };
        assert_eq!(board.width, Some(20.0));
        assert_eq!(board.layers, 2);
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].props.value().as_deref(), Some("1k"));
        assert_eq!(
            tree.children[0].props.placement().and_then(|p| p.pcb_offset()),
            Some(Point::new(-3.0, 0.0))
        );
        let ElementProps::Trace(trace) = &tree.children[1].props else {
            panic!("expected trace");
        };
        assert_eq!(trace.selectors(), vec![".R1 > .pin1", "net.GND"]);
    }

    #[test]
    fn numeric_values_are_displayed() {
        let part: ElementDescription =
            serde_json::from_value(json!({ "type": "capacitor", "name": "C1", "capacitance": 100 }))
                .unwrap();
        assert_eq!(part.props.value().as_deref(), Some("100"));
        assert_eq!(part.props.ftype(), Some("simple_capacitor"));
    }

    #[test]
    fn descriptions_serialize_back_with_type_tag() {
        let desc = ElementDescription::new(ElementProps::Net(NetProps {
            name: "GND".into(),
            connects_to: vec![],
        }));
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value, json!({ "type": "net", "name": "GND", "connects_to": [] }));
    }

    #[test]
    fn port_aliases_include_name() {
        let port = PortProps::new("pin1", Some(1), vec!["1".into(), "left".into(), "pin1".into()]);
        assert_eq!(port.aliases, vec!["pin1", "1", "left"]);
        assert!(port.matches("left"));
        assert!(!port.matches("right"));
    }
}
