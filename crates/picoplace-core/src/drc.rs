//! Design rule checks.
//!
//! The checks run once per top-level board, after every trace under it has
//! been routed and no effect is pending. Each check only reads the store and
//! reports what it finds as separate diagnostics; routing output is never
//! touched.

use std::collections::HashSet;

use log::{debug, info};
use picoplace_circuit::{
    point_in_polygon, Bounds, CircuitDb, CircuitError, ErrorType, LayerRef, Point, RoutePoint,
};
use picoplace_engine::geometry::segment_to_segment_distance;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

use crate::config::DrcConfig;
use crate::connectivity::ConnectivityMap;
use crate::render::pcb::routing_settled;
use crate::render::{wait_or, HookOutcome, HookResult, Phase, RenderContext};
use crate::routing::pcb::first_point_outside;
use crate::routing::{port_name, trace_name};
use crate::tree::props::ElementProps;
use crate::tree::NodeId;

const EPSILON: f64 = 1e-6;

/// How close a trace point must come to a port to count as touching it.
const TOUCH: f64 = 1e-3;

type Entry = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn envelope(b: &Bounds) -> AABB<[f64; 2]> {
    AABB::from_corners([b.min_x, b.min_y], [b.max_x, b.max_y])
}

fn spatial_index(boxes: &[Bounds]) -> RTree<Entry> {
    RTree::bulk_load(
        boxes
            .iter()
            .enumerate()
            .map(|(i, b)| GeomWithData::new(Rectangle::from_corners([b.min_x, b.min_y], [b.max_x, b.max_y]), i))
            .collect(),
    )
}

pub(crate) fn run(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    if !matches!(ctx.tree.props(id), Some(ElementProps::Board(_))) || !ctx.config.drc.enabled {
        return Ok(HookOutcome::Done);
    }
    if ctx.tree.parent(id).and_then(|p| ctx.tree.board_of(p)).is_some() {
        return Ok(HookOutcome::Done);
    }
    let pours_done = ctx
        .tree
        .preorder_from(id)
        .into_iter()
        .all(|n| ctx.tree.get(n).is_some_and(|node| node.phase_done(Phase::PcbCopperPourRender)));
    if !routing_settled(ctx, id) || !pours_done || ctx.effects.has_pending() {
        return wait_or(ctx, "routing to settle", |ctx| check_board(ctx, id));
    }
    check_board(ctx, id)
}

fn check_board(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let Some(outline) = ctx
        .tree
        .state(id)
        .and_then(|s| s.pcb_board_id.as_ref())
        .and_then(|b| ctx.db.pcb_board.get(b))
        .map(|b| b.outline_polygon())
    else {
        return Ok(HookOutcome::Done);
    };

    let mut scope: HashSet<String> = HashSet::new();
    for n in ctx.tree.preorder_from(id) {
        let Some(node) = ctx.tree.get(n) else {
            continue;
        };
        if node.props.is_subcircuit() {
            scope.extend(node.state.source_group_id.clone());
        }
    }

    let checker = Checker::new(&ctx.db, &ctx.config.drc, outline, Some(scope));
    let errors = checker.check_all();
    info!("{}: {} design rule violations", ctx.tree.node(id)?.describe(), errors.len());
    for error in errors {
        ctx.insert_error(error);
    }
    Ok(HookOutcome::Done)
}

/// Copper of one trace segment.
struct Segment {
    trace: usize,
    start: Point,
    end: Point,
    half_width: f64,
    layer: LayerRef,
}

impl Segment {
    fn bounds(&self) -> Bounds {
        Bounds::new(self.start.x, self.start.y, self.end.x, self.end.y).expand(self.half_width)
    }
}

/// Read-only view of one board's records.
pub struct Checker<'a> {
    db: &'a CircuitDb,
    rules: &'a DrcConfig,
    connectivity: ConnectivityMap,
    outline: Vec<Point>,
    scope: Option<HashSet<String>>,
}

impl<'a> Checker<'a> {
    /// `scope` holds the subcircuit ids on the board; `None` checks every record.
    pub fn new(db: &'a CircuitDb, rules: &'a DrcConfig, outline: Vec<Point>, scope: Option<HashSet<String>>) -> Self {
        Self {
            db,
            rules,
            connectivity: ConnectivityMap::from_db(db),
            outline,
            scope,
        }
    }

    fn in_scope(&self, subcircuit_id: &Option<String>) -> bool {
        match (&self.scope, subcircuit_id) {
            (Some(scope), Some(id)) => scope.contains(id),
            _ => true,
        }
    }

    pub fn check_all(&self) -> Vec<CircuitError> {
        let mut out = self.trace_overlaps();
        out.extend(self.unconnected_ports());
        out.extend(self.components_outside_board());
        out.extend(self.traces_outside_board());
        out.extend(self.via_spacing());
        out.extend(self.footprint_overlaps());
        out
    }

    /// Traces of different nets whose copper overlaps on a shared layer.
    /// One diagnostic per pair of traces, however many segments overlap.
    pub fn trace_overlaps(&self) -> Vec<CircuitError> {
        let traces: Vec<_> = self
            .db
            .pcb_trace
            .iter()
            .filter(|t| self.in_scope(&t.subcircuit_id))
            .collect();
        let segments: Vec<Segment> = traces
            .iter()
            .enumerate()
            .flat_map(|(i, t)| {
                t.segments().into_iter().map(move |s| Segment {
                    trace: i,
                    start: s.start,
                    end: s.end,
                    half_width: s.width / 2.0,
                    layer: s.layer,
                })
            })
            .collect();
        let boxes: Vec<Bounds> = segments.iter().map(Segment::bounds).collect();
        let index = spatial_index(&boxes);

        let mut reported: HashSet<(usize, usize)> = HashSet::new();
        let mut out = Vec::new();
        for a in &segments {
            for hit in index.locate_in_envelope_intersecting(&envelope(&a.bounds())) {
                let b = &segments[hit.data];
                if b.trace <= a.trace || b.layer != a.layer || reported.contains(&(a.trace, b.trace)) {
                    continue;
                }
                let (ta, tb) = (traces[a.trace], traces[b.trace]);
                if self.connectivity.are_connected(&ta.pcb_trace_id, &tb.pcb_trace_id) {
                    continue;
                }
                let gap = segment_to_segment_distance(a.start, a.end, b.start, b.end);
                if gap >= a.half_width + b.half_width - EPSILON {
                    continue;
                }
                reported.insert((a.trace, b.trace));
                let name = |t: &picoplace_circuit::PcbTrace| match &t.source_trace_id {
                    Some(s) => trace_name(self.db, s),
                    None => t.pcb_trace_id.clone(),
                };
                let mut error = CircuitError::new(
                    ErrorType::PcbTraceError,
                    format!("{} overlaps {} on {}", name(ta), name(tb), a.layer),
                )
                .with_pcb_traces([ta.pcb_trace_id.clone(), tb.pcb_trace_id.clone()])
                .with_center(a.start.midpoint(&a.end))
                .with_subcircuit(ta.subcircuit_id.clone());
                if let Some(s) = &ta.source_trace_id {
                    error = error.with_source_trace(s.clone());
                }
                out.push(error);
            }
        }
        out
    }

    /// Ports that share a net with another port but have no copper reaching them.
    pub fn unconnected_ports(&self) -> Vec<CircuitError> {
        let mut reported_ports: HashSet<&str> = HashSet::new();
        let mut reported_nets: HashSet<String> = HashSet::new();
        for error in self.db.error.iter() {
            reported_ports.extend(error.pcb_port_ids.iter().map(String::as_str));
            reported_ports.extend(error.source_port_ids.iter().map(String::as_str));
            if let Some(net) = error.source_trace_id.as_ref().and_then(|t| self.connectivity.net_of(t)) {
                reported_nets.insert(net);
            }
        }

        let mut out = Vec::new();
        for port in self.db.pcb_port.iter().filter(|p| self.in_scope(&p.subcircuit_id)) {
            if reported_ports.contains(port.pcb_port_id.as_str())
                || reported_ports.contains(port.source_port_id.as_str())
            {
                continue;
            }
            let members = self.connectivity.ids_connected_to(&port.pcb_port_id);
            let peers = members
                .iter()
                .filter(|m| self.db.source_port.get(m).is_some())
                .count();
            if peers < 2 {
                continue;
            }
            if self
                .connectivity
                .net_of(&port.pcb_port_id)
                .is_some_and(|n| reported_nets.contains(&n))
            {
                continue;
            }
            if self.port_is_reached(port.pcb_port_id.as_str(), port.center(), members) {
                continue;
            }
            debug!("{} has no copper", port.pcb_port_id);
            out.push(
                CircuitError::new(
                    ErrorType::PcbPortNotConnectedError,
                    format!("{} is not connected by any trace", port_name(self.db, &port.source_port_id)),
                )
                .with_source_ports([port.source_port_id.clone()])
                .with_pcb_ports([port.pcb_port_id.clone()])
                .with_pcb_components(port.pcb_component_id.clone())
                .with_center(port.center())
                .with_subcircuit(port.subcircuit_id.clone()),
            );
        }
        out
    }

    fn port_is_reached(&self, pcb_port_id: &str, at: Point, members: &[String]) -> bool {
        let pads: Vec<Bounds> = self
            .db
            .pcb_smtpad
            .iter()
            .filter(|p| p.pcb_port_id.as_deref() == Some(pcb_port_id))
            .map(|p| p.bounds())
            .collect();
        let touches = |p: &RoutePoint| {
            let width = match p {
                RoutePoint::Wire { width, .. } => *width,
                RoutePoint::Via { .. } => 0.0,
            };
            let point = p.point();
            point.distance(&at) <= width / 2.0 + TOUCH || pads.iter().any(|b| b.expand(TOUCH).contains(&point))
        };

        let by_trace = members
            .iter()
            .filter_map(|m| self.db.pcb_trace.get(m))
            .any(|t| t.route.iter().any(touches));
        let by_pour = members
            .iter()
            .filter_map(|m| self.db.pcb_copper_pour.get(m))
            .any(|p| p.covers(&at));
        by_trace || by_pour
    }

    pub fn components_outside_board(&self) -> Vec<CircuitError> {
        if self.outline.len() < 3 {
            return Vec::new();
        }
        self.db
            .pcb_component
            .iter()
            .filter(|c| self.in_scope(&c.subcircuit_id))
            .filter(|c| c.width > 0.0 && c.height > 0.0)
            .filter(|c| c.bounds().corners().iter().any(|p| !point_in_polygon(p, &self.outline)))
            .map(|c| {
                let name = self
                    .db
                    .source_component
                    .get(&c.source_component_id)
                    .map_or(c.source_component_id.as_str(), |s| s.name.as_str());
                CircuitError::new(
                    ErrorType::PcbComponentOutsideBoardError,
                    format!("{name} extends past the board outline"),
                )
                .with_source_component(c.source_component_id.clone())
                .with_pcb_components([c.pcb_component_id.clone()])
                .with_center(c.center)
                .with_subcircuit(c.subcircuit_id.clone())
            })
            .collect()
    }

    /// Traces leaving the outline that routing did not already report.
    pub fn traces_outside_board(&self) -> Vec<CircuitError> {
        let flagged: HashSet<&str> = self
            .db
            .errors_of_type(ErrorType::PcbTraceOutsideBoardError)
            .flat_map(|e| e.pcb_trace_ids.iter().map(String::as_str))
            .collect();
        self.db
            .pcb_trace
            .iter()
            .filter(|t| self.in_scope(&t.subcircuit_id))
            .filter(|t| !flagged.contains(t.pcb_trace_id.as_str()))
            .filter_map(|t| {
                let at = first_point_outside(&t.route, &self.outline)?;
                let name = match &t.source_trace_id {
                    Some(s) => trace_name(self.db, s),
                    None => t.pcb_trace_id.clone(),
                };
                let mut error = CircuitError::new(ErrorType::PcbTraceOutsideBoardError, format!("{name} leaves the board"))
                    .with_pcb_traces([t.pcb_trace_id.clone()])
                    .with_center(at)
                    .with_subcircuit(t.subcircuit_id.clone());
                if let Some(s) = &t.source_trace_id {
                    error = error.with_source_trace(s.clone());
                }
                Some(error)
            })
            .collect()
    }

    /// Vias closer than the margin for their pair: `same_net_via_margin`
    /// within a net, `via_margin` across nets.
    pub fn via_spacing(&self) -> Vec<CircuitError> {
        let vias: Vec<_> = self
            .db
            .pcb_via
            .iter()
            .filter(|v| self.in_scope(&v.subcircuit_id))
            .collect();
        let margin = self.rules.via_margin.max(self.rules.same_net_via_margin);
        let boxes: Vec<Bounds> = vias
            .iter()
            .map(|v| Bounds::from_center(v.center(), v.outer_diameter, v.outer_diameter).expand(margin / 2.0))
            .collect();
        let index = spatial_index(&boxes);

        let mut out = Vec::new();
        for (i, a) in vias.iter().enumerate() {
            for hit in index.locate_in_envelope_intersecting(&envelope(&boxes[i])) {
                if hit.data <= i {
                    continue;
                }
                let b = vias[hit.data];
                let (la, lb) = (a.layers(), b.layers());
                if !la.iter().any(|l| lb.contains(l)) {
                    continue;
                }
                let same_net = self.connectivity.are_connected(&a.pcb_via_id, &b.pcb_via_id);
                let required = if same_net {
                    self.rules.same_net_via_margin
                } else {
                    self.rules.via_margin
                };
                let gap = a.center().distance(&b.center()) - (a.outer_diameter + b.outer_diameter) / 2.0;
                if gap >= required - EPSILON {
                    continue;
                }
                out.push(
                    CircuitError::new(
                        ErrorType::PcbViaClearanceError,
                        format!(
                            "vias {:.3}mm apart, {}{:.3}mm required",
                            gap.max(0.0),
                            if same_net { "same net, " } else { "" },
                            required
                        ),
                    )
                    .with_pcb_vias([a.pcb_via_id.clone(), b.pcb_via_id.clone()])
                    .with_center(a.center().midpoint(&b.center()))
                    .with_subcircuit(a.subcircuit_id.clone()),
                );
            }
        }
        out
    }

    /// Surface pads of different nets overlapping on the same layer.
    pub fn footprint_overlaps(&self) -> Vec<CircuitError> {
        let pads: Vec<_> = self
            .db
            .pcb_smtpad
            .iter()
            .filter(|p| self.in_scope(&p.subcircuit_id))
            .collect();
        let boxes: Vec<Bounds> = pads.iter().map(|p| p.bounds()).collect();
        let index = spatial_index(&boxes);

        let mut out = Vec::new();
        for (i, a) in pads.iter().enumerate() {
            for hit in index.locate_in_envelope_intersecting(&envelope(&boxes[i])) {
                if hit.data <= i {
                    continue;
                }
                let b = pads[hit.data];
                if a.layer != b.layer || self.connectivity.are_connected(&a.pcb_smtpad_id, &b.pcb_smtpad_id) {
                    continue;
                }
                let (ba, bb) = (&boxes[i], &boxes[hit.data]);
                let overlap_x = ba.max_x.min(bb.max_x) - ba.min_x.max(bb.min_x);
                let overlap_y = ba.max_y.min(bb.max_y) - ba.min_y.max(bb.min_y);
                if overlap_x <= EPSILON || overlap_y <= EPSILON {
                    continue;
                }
                out.push(
                    CircuitError::new(
                        ErrorType::PcbFootprintOverlapError,
                        format!("pads {} and {} overlap on {}", a.pcb_smtpad_id, b.pcb_smtpad_id, a.layer),
                    )
                    .with_pcb_smtpads([a.pcb_smtpad_id.clone(), b.pcb_smtpad_id.clone()])
                    .with_pcb_components(a.pcb_component_id.iter().chain(&b.pcb_component_id).cloned())
                    .with_center(ba.center().midpoint(&bb.center()))
                    .with_subcircuit(a.subcircuit_id.clone()),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use picoplace_circuit::{PadShape, PcbComponent, PcbSmtPad, PcbTrace, PcbVia};

    use super::*;

    fn outline() -> Vec<Point> {
        Bounds::from_center(Point::ORIGIN, 20.0, 20.0).corners().to_vec()
    }

    fn trace(db: &mut CircuitDb, points: &[(f64, f64)]) -> String {
        let route = points
            .iter()
            .map(|(x, y)| RoutePoint::wire(Point::new(*x, *y), 0.2, LayerRef::Top))
            .collect();
        db.pcb_trace.insert(PcbTrace::new(None, route))
    }

    fn via(db: &mut CircuitDb, x: f64, net: &str) -> String {
        db.pcb_via.insert(PcbVia {
            pcb_via_id: String::new(),
            x,
            y: 0.0,
            outer_diameter: 0.6,
            hole_diameter: 0.3,
            from_layer: LayerRef::Top,
            to_layer: LayerRef::Bottom,
            pcb_trace_id: None,
            connected_source_net_ids: vec![net.to_string()],
            subcircuit_id: None,
        })
    }

    #[test]
    fn crossing_traces_are_reported_once_per_pair() {
        let mut db = CircuitDb::new();
        let a = trace(&mut db, &[(-5.0, 0.0), (0.0, 0.0), (5.0, 0.0)]);
        let b = trace(&mut db, &[(0.0, -5.0), (0.0, 5.0)]);
        trace(&mut db, &[(-5.0, 3.0), (5.0, 3.0)]);
        let rules = DrcConfig::default();

        let errors = Checker::new(&db, &rules, outline(), None).trace_overlaps();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].pcb_trace_ids, vec![a, b.clone()]);
        assert!(errors.iter().all(|e| e.pcb_trace_ids.contains(&b)));
    }

    #[test]
    fn parallel_traces_with_clearance_pass() {
        let mut db = CircuitDb::new();
        trace(&mut db, &[(-5.0, 0.0), (5.0, 0.0)]);
        trace(&mut db, &[(-5.0, 0.25), (5.0, 0.25)]);
        let rules = DrcConfig::default();
        assert!(Checker::new(&db, &rules, outline(), None).trace_overlaps().is_empty());
    }

    #[test]
    fn via_margin_depends_on_net() {
        let mut db = CircuitDb::new();
        via(&mut db, 0.0, "source_net_0");
        via(&mut db, 0.75, "source_net_0");
        via(&mut db, 5.0, "source_net_0");
        via(&mut db, 5.75, "source_net_1");
        let rules = DrcConfig::default();

        let errors = Checker::new(&db, &rules, outline(), None).via_spacing();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].center.is_some_and(|c| c.approx_eq(&Point::new(5.375, 0.0), 1e-9)));
    }

    #[test]
    fn components_and_traces_past_the_edge() {
        let mut db = CircuitDb::new();
        db.pcb_component.insert(PcbComponent {
            pcb_component_id: String::new(),
            source_component_id: "source_component_0".into(),
            center: Point::new(9.5, 0.0),
            width: 2.0,
            height: 1.0,
            rotation: 0.0,
            layer: LayerRef::Top,
            subcircuit_id: None,
        });
        trace(&mut db, &[(0.0, 0.0), (12.0, 0.0)]);
        let rules = DrcConfig::default();
        let checker = Checker::new(&db, &rules, outline(), None);

        assert_eq!(checker.components_outside_board().len(), 1);
        let traces = checker.traces_outside_board();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].error_type, ErrorType::PcbTraceOutsideBoardError);
    }

    #[test]
    fn overlapping_pads_of_different_nets() {
        let mut db = CircuitDb::new();
        for x in [0.0, 0.4, 3.0] {
            db.pcb_smtpad.insert(PcbSmtPad {
                pcb_smtpad_id: String::new(),
                shape: PadShape::Rect,
                x,
                y: 0.0,
                width: 0.6,
                height: 0.6,
                layer: LayerRef::Top,
                port_hints: vec![],
                pcb_component_id: None,
                pcb_port_id: None,
                subcircuit_id: None,
            });
        }
        let rules = DrcConfig::default();
        let errors = Checker::new(&db, &rules, outline(), None).footprint_overlaps();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].pcb_smtpad_ids.len(), 2);
    }
}
