//! Physical ("pcb") records.

use serde::{Deserialize, Serialize};

use crate::{Bounds, ElementKind, LayerRef, Point, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbBoard {
    pub pcb_board_id: String,
    pub center: Point,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Vec<Point>>,
    pub num_layers: u8,
    pub thickness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbBoard {
    pub fn bounds(&self) -> Bounds {
        match &self.outline {
            Some(outline) => Bounds::from_points(outline)
                .unwrap_or_else(|| Bounds::from_center(self.center, self.width, self.height)),
            None => Bounds::from_center(self.center, self.width, self.height),
        }
    }

    /// Board outline as a polygon; the rectangle when no explicit outline exists.
    pub fn outline_polygon(&self) -> Vec<Point> {
        match &self.outline {
            Some(outline) if outline.len() >= 3 => outline.clone(),
            _ => Bounds::from_center(self.center, self.width, self.height)
                .corners()
                .to_vec(),
        }
    }
}

impl Record for PcbBoard {
    const KIND: ElementKind = ElementKind::PcbBoard;

    fn id(&self) -> &str {
        &self.pcb_board_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_board_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.center = self.center + delta;
        if let Some(outline) = &mut self.outline {
            for p in outline.iter_mut() {
                *p = *p + delta;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbGroup {
    pub pcb_group_id: String,
    pub source_group_id: String,
    pub center: Point,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl Record for PcbGroup {
    const KIND: ElementKind = ElementKind::PcbGroup;

    fn id(&self) -> &str {
        &self.pcb_group_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_group_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.center = self.center + delta;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbComponent {
    pub pcb_component_id: String,
    pub source_component_id: String,
    pub center: Point,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: f64,
    pub layer: LayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbComponent {
    pub fn bounds(&self) -> Bounds {
        Bounds::from_center(self.center, self.width, self.height)
    }
}

impl Record for PcbComponent {
    const KIND: ElementKind = ElementKind::PcbComponent;

    fn id(&self) -> &str {
        &self.pcb_component_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_component_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.center = self.center + delta;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadShape {
    Rect,
    Circle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbSmtPad {
    pub pcb_smtpad_id: String,
    pub shape: PadShape,
    pub x: f64,
    pub y: f64,
    /// Diameter for circular pads.
    pub width: f64,
    pub height: f64,
    pub layer: LayerRef,
    #[serde(default)]
    pub port_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbSmtPad {
    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_center(self.center(), self.width, self.height)
    }
}

impl Record for PcbSmtPad {
    const KIND: ElementKind = ElementKind::PcbSmtpad;

    fn id(&self) -> &str {
        &self.pcb_smtpad_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_smtpad_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbPlatedHole {
    pub pcb_plated_hole_id: String,
    pub x: f64,
    pub y: f64,
    pub hole_diameter: f64,
    pub outer_diameter: f64,
    pub layers: Vec<LayerRef>,
    #[serde(default)]
    pub port_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbPlatedHole {
    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl Record for PcbPlatedHole {
    const KIND: ElementKind = ElementKind::PcbPlatedHole;

    fn id(&self) -> &str {
        &self.pcb_plated_hole_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_plated_hole_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

/// Unplated mounting/drill hole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbHole {
    pub pcb_hole_id: String,
    pub x: f64,
    pub y: f64,
    pub hole_diameter: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl Record for PcbHole {
    const KIND: ElementKind = ElementKind::PcbHole;

    fn id(&self) -> &str {
        &self.pcb_hole_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_hole_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbPort {
    pub pcb_port_id: String,
    pub source_port_id: String,
    pub x: f64,
    pub y: f64,
    pub layers: Vec<LayerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbPort {
    pub fn new(source_port_id: impl Into<String>, at: Point, layers: Vec<LayerRef>) -> Self {
        Self {
            pcb_port_id: String::new(),
            source_port_id: source_port_id.into(),
            x: at.x,
            y: at.y,
            layers,
            pcb_component_id: None,
            subcircuit_id: None,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl Record for PcbPort {
    const KIND: ElementKind = ElementKind::PcbPort;

    fn id(&self) -> &str {
        &self.pcb_port_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_port_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

/// One point of a physical route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route_type", rename_all = "snake_case")]
pub enum RoutePoint {
    Wire {
        x: f64,
        y: f64,
        width: f64,
        layer: LayerRef,
    },
    Via {
        x: f64,
        y: f64,
        from_layer: LayerRef,
        to_layer: LayerRef,
    },
}

impl RoutePoint {
    pub fn wire(at: Point, width: f64, layer: LayerRef) -> Self {
        RoutePoint::Wire {
            x: at.x,
            y: at.y,
            width,
            layer,
        }
    }

    pub fn via(at: Point, from_layer: LayerRef, to_layer: LayerRef) -> Self {
        RoutePoint::Via {
            x: at.x,
            y: at.y,
            from_layer,
            to_layer,
        }
    }

    pub fn point(&self) -> Point {
        match *self {
            RoutePoint::Wire { x, y, .. } | RoutePoint::Via { x, y, .. } => Point::new(x, y),
        }
    }

    /// Layer the route is on when leaving this point.
    pub fn layer(&self) -> LayerRef {
        match *self {
            RoutePoint::Wire { layer, .. } => layer,
            RoutePoint::Via { to_layer, .. } => to_layer,
        }
    }

    pub fn is_via(&self) -> bool {
        matches!(self, RoutePoint::Via { .. })
    }

    fn translate(&mut self, delta: Point) {
        match self {
            RoutePoint::Wire { x, y, .. } | RoutePoint::Via { x, y, .. } => {
                *x += delta.x;
                *y += delta.y;
            }
        }
    }
}

/// A straight copper segment between two consecutive wire points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSegment {
    pub start: Point,
    pub end: Point,
    pub width: f64,
    pub layer: LayerRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbTrace {
    pub pcb_trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_trace_id: Option<String>,
    pub route: Vec<RoutePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbTrace {
    pub fn new(source_trace_id: Option<String>, route: Vec<RoutePoint>) -> Self {
        Self {
            pcb_trace_id: String::new(),
            source_trace_id,
            route,
            trace_length: None,
            subcircuit_id: None,
        }
    }

    /// Copper segments of the route. A via splits the route without adding copper.
    pub fn segments(&self) -> Vec<TraceSegment> {
        let mut out = Vec::new();
        for pair in self.route.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let (width, layer) = match (a, b) {
                (RoutePoint::Wire { width, layer, .. }, _) => (width, layer),
                (RoutePoint::Via { to_layer, .. }, RoutePoint::Wire { width, .. }) => {
                    (width, to_layer)
                }
                _ => continue,
            };
            if a.point() == b.point() {
                continue;
            }
            out.push(TraceSegment {
                start: a.point(),
                end: b.point(),
                width,
                layer,
            });
        }
        out
    }

    pub fn start(&self) -> Option<Point> {
        self.route.first().map(RoutePoint::point)
    }

    pub fn end(&self) -> Option<Point> {
        self.route.last().map(RoutePoint::point)
    }
}

impl Record for PcbTrace {
    const KIND: ElementKind = ElementKind::PcbTrace;

    fn id(&self) -> &str {
        &self.pcb_trace_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_trace_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        for p in &mut self.route {
            p.translate(delta);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbVia {
    pub pcb_via_id: String,
    pub x: f64,
    pub y: f64,
    pub outer_diameter: f64,
    pub hole_diameter: f64,
    pub from_layer: LayerRef,
    pub to_layer: LayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_trace_id: Option<String>,
    #[serde(default)]
    pub connected_source_net_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbVia {
    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Layers spanned by the via barrel.
    pub fn layers(&self) -> Vec<LayerRef> {
        let (lo, hi) = if self.from_layer <= self.to_layer {
            (self.from_layer, self.to_layer)
        } else {
            (self.to_layer, self.from_layer)
        };
        [
            LayerRef::Top,
            LayerRef::Inner1,
            LayerRef::Inner2,
            LayerRef::Inner3,
            LayerRef::Inner4,
            LayerRef::Bottom,
        ]
        .into_iter()
        .filter(|l| *l >= lo && *l <= hi)
        .collect()
    }
}

impl Record for PcbVia {
    const KIND: ElementKind = ElementKind::PcbVia;

    fn id(&self) -> &str {
        &self.pcb_via_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_via_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        self.x += delta.x;
        self.y += delta.y;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcbCopperPour {
    pub pcb_copper_pour_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_net_id: Option<String>,
    pub layer: LayerRef,
    pub outer_ring: Vec<Point>,
    #[serde(default)]
    pub inner_rings: Vec<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl PcbCopperPour {
    /// Whether `p` lies on copper of this pour.
    pub fn covers(&self, p: &Point) -> bool {
        crate::point_in_polygon(p, &self.outer_ring)
            && !self
                .inner_rings
                .iter()
                .any(|ring| crate::point_in_polygon(p, ring) && !on_ring_edge(p, ring))
    }
}

fn on_ring_edge(p: &Point, ring: &[Point]) -> bool {
    (0..ring.len()).any(|i| {
        crate::geometry::point_on_segment(p, &ring[i], &ring[(i + 1) % ring.len()], 1e-9)
    })
}

impl Record for PcbCopperPour {
    const KIND: ElementKind = ElementKind::PcbCopperPour;

    fn id(&self) -> &str {
        &self.pcb_copper_pour_id
    }

    fn set_id(&mut self, id: String) {
        self.pcb_copper_pour_id = id;
    }

    fn translate_pcb(&mut self, delta: Point) {
        for p in self.outer_ring.iter_mut() {
            *p = *p + delta;
        }
        for ring in self.inner_rings.iter_mut() {
            for p in ring.iter_mut() {
                *p = *p + delta;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn via_splits_segments_by_layer() {
        let trace = PcbTrace::new(
            None,
            vec![
                RoutePoint::wire(Point::new(0.0, 0.0), 0.15, LayerRef::Top),
                RoutePoint::wire(Point::new(5.0, 0.0), 0.15, LayerRef::Top),
                RoutePoint::via(Point::new(5.0, 0.0), LayerRef::Top, LayerRef::Bottom),
                RoutePoint::wire(Point::new(5.0, 0.0), 0.15, LayerRef::Bottom),
                RoutePoint::wire(Point::new(5.0, 5.0), 0.15, LayerRef::Bottom),
            ],
        );
        let segments = trace.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].layer, LayerRef::Top);
        assert_eq!(segments[1].layer, LayerRef::Bottom);
    }

    #[test]
    fn route_point_serializes_with_route_type() {
        let json = serde_json::to_value(RoutePoint::via(
            Point::new(1.0, 2.0),
            LayerRef::Top,
            LayerRef::Bottom,
        ))
        .unwrap();
        assert_eq!(json["route_type"], "via");
        assert_eq!(json["from_layer"], "top");
    }
}
