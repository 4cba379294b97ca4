//! Diagram wiring.
//!
//! A wire is tried as a straight line or a single elbow first. When neither
//! leaves both ports in their facing direction without running into a
//! component or label, the grid autorouter draws it from short stubs off the
//! ports. Wires that end up too tangled, or cannot be drawn at all, become a
//! pair of net labels instead.

use log::debug;
use picoplace_circuit::{
    Bounds, CircuitElement, FacingDirection, LayerRef, Point, SchematicTrace, SchematicTraceEdge,
};
use picoplace_engine::geometry::segment_intersects_rect;
use picoplace_engine::{AutorouterKind, Connection, ConnectionPoint, SimpleRouteJson};

use crate::connectivity::ConnectivityMap;
use crate::render::{HookOutcome, HookResult, RenderContext};
use crate::routing::crossings::{count_crossings, insert_crossings, junctions};
use crate::routing::labels::net_label;
use crate::routing::obstacles::schematic_obstacles;
use crate::routing::{port_name, source_nets_of};
use crate::tree::props::ElementProps;
use crate::tree::{NodeId, TraceStatus};

const EPSILON: f64 = 1e-6;

/// One end of a diagram wire.
#[derive(Debug, Clone)]
struct WireEnd {
    at: Point,
    /// Direction the wire leaves this end.
    facing: FacingDirection,
    schematic_port_id: Option<String>,
    source_port_id: Option<String>,
    is_box: bool,
}

fn port_end(ctx: &RenderContext, port: NodeId) -> Option<WireEnd> {
    let id = ctx.tree.state(port)?.schematic_port_id.as_ref()?;
    let record = ctx.db.schematic_port.get(id)?;
    let is_box = record
        .schematic_component_id
        .as_ref()
        .and_then(|c| ctx.db.schematic_component.get(c))
        .is_some_and(|c| c.is_box_with_pins);
    Some(WireEnd {
        at: record.center,
        facing: record.facing_direction,
        schematic_port_id: Some(record.schematic_port_id.clone()),
        source_port_id: Some(record.source_port_id.clone()),
        is_box,
    })
}

/// End at an explicit `net_label` element for the net named `net`.
fn label_end(ctx: &RenderContext, scope: NodeId, net: &str) -> Option<WireEnd> {
    ctx.tree.preorder_from(scope).into_iter().find_map(|n| {
        let node = ctx.tree.get(n)?;
        match &node.props {
            ElementProps::NetLabel(label) if label.net == net => {
                let record = ctx.db.schematic_net_label.get(node.state.schematic_net_label_ids.first()?)?;
                Some(WireEnd {
                    at: record.anchor_position,
                    facing: record.anchor_side,
                    schematic_port_id: None,
                    source_port_id: None,
                    is_box: false,
                })
            }
            _ => None,
        }
    })
}

fn direction(from: Point, to: Point) -> Option<FacingDirection> {
    let d = to - from;
    if d.x.abs() < EPSILON && d.y.abs() < EPSILON {
        return None;
    }
    if d.x.abs() > EPSILON && d.y.abs() > EPSILON {
        return None;
    }
    Some(FacingDirection::from_offset(d))
}

fn clear_of(points: &[Point], blocked: &[Bounds]) -> bool {
    points.windows(2).all(|w| {
        blocked
            .iter()
            .all(|b| !segment_intersects_rect(w[0], w[1], &b.expand(-EPSILON)))
    })
}

/// Straight or single-bend path that leaves both ends along their facing.
fn elbow(a: &WireEnd, b: &WireEnd, blocked: &[Bounds]) -> Option<Vec<Point>> {
    let candidates = if direction(a.at, b.at).is_some() {
        vec![vec![a.at, b.at]]
    } else {
        vec![
            vec![a.at, Point::new(b.at.x, a.at.y), b.at],
            vec![a.at, Point::new(a.at.x, b.at.y), b.at],
        ]
    };
    candidates.into_iter().find(|path| {
        let n = path.len();
        direction(path[0], path[1]) == Some(a.facing)
            && direction(path[n - 1], path[n - 2]) == Some(b.facing)
            && clear_of(path, blocked)
    })
}

/// Replace diagonal steps with an axis-aligned corner.
fn orthogonalize(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if let Some(last) = out.last().copied() {
            if (last.x - p.x).abs() > EPSILON && (last.y - p.y).abs() > EPSILON {
                out.push(Point::new(p.x, last.y));
            }
        }
        out.push(*p);
    }
    out
}

/// Drop repeated points and the middle of straight runs.
fn simplify(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if out.last().is_some_and(|l| l.approx_eq(p, EPSILON)) {
            continue;
        }
        if out.len() >= 2 {
            let (a, b) = (out[out.len() - 2], out[out.len() - 1]);
            let collinear = ((a.x - b.x).abs() < EPSILON && (b.x - p.x).abs() < EPSILON)
                || ((a.y - b.y).abs() < EPSILON && (b.y - p.y).abs() < EPSILON);
            if collinear {
                out.pop();
            }
        }
        out.push(*p);
    }
    out
}

fn grid_path(ctx: &RenderContext, a: &WireEnd, b: &WireEnd, connected: &[String]) -> Option<Vec<Point>> {
    let stub = ctx.config.schematic.stub_length;
    let (sa, sb) = (a.at + a.facing.unit() * stub, b.at + b.facing.unit() * stub);
    let obstacles = schematic_obstacles(&ctx.db);
    let area = obstacles
        .iter()
        .map(|o| o.bounds())
        .chain([Bounds::new(sa.x, sa.y, sb.x, sb.y)])
        .reduce(|x, y| x.union(&y))?
        .expand(1.0);

    let problem = SimpleRouteJson {
        layer_count: 1,
        min_trace_width: 0.0,
        obstacles,
        connections: vec![Connection::new(
            "diagram",
            vec![ConnectionPoint::new(sa, LayerRef::Top), ConnectionPoint::new(sb, LayerRef::Top)],
        )
        .with_connected_ids(connected.iter().cloned())],
        bounds: area,
        outline: None,
    };
    let mut router = AutorouterKind::Grid.create(&ctx.config.schematic_grid());
    let routed = match router.solve(&problem) {
        Ok(routed) => routed,
        Err(err) => {
            debug!("diagram autorouter: {err}");
            return None;
        }
    };
    let middle: Vec<Point> = routed
        .iter()
        .flat_map(|t| t.route.iter().map(|p| p.point()))
        .collect();
    let mut points = vec![a.at];
    points.extend(middle);
    points.push(b.at);
    Some(simplify(&orthogonalize(&points)))
}

fn edges_of(points: &[Point], a: &WireEnd, b: &WireEnd) -> Vec<SchematicTraceEdge> {
    let mut edges: Vec<SchematicTraceEdge> = points
        .windows(2)
        .map(|w| SchematicTraceEdge::new(w[0], w[1]))
        .collect();
    if let Some(first) = edges.first_mut() {
        first.from_schematic_port_id = a.schematic_port_id.clone();
    }
    if let Some(last) = edges.last_mut() {
        last.to_schematic_port_id = b.schematic_port_id.clone();
    }
    edges
}

/// Edges of existing diagram wires, split by whether they share a net with
/// `source_trace_id`.
fn existing_edges(
    ctx: &RenderContext,
    connectivity: &ConnectivityMap,
    source_trace_id: &str,
) -> (Vec<SchematicTraceEdge>, Vec<SchematicTraceEdge>) {
    let mut same = Vec::new();
    let mut foreign = Vec::new();
    for trace in ctx.db.schematic_trace.iter() {
        let edges = trace.edges.iter().filter(|e| !e.is_crossing).cloned();
        if connectivity.are_connected(&trace.schematic_trace_id, source_trace_id) {
            same.extend(edges);
        } else {
            foreign.extend(edges);
        }
    }
    (same, foreign)
}

/// Why a wire was replaced by labels.
enum Fallback {
    BoxToSymbol,
    NoPath,
    TooComplex { bends: usize, crossings: usize },
}

impl std::fmt::Display for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fallback::BoxToSymbol => write!(f, "box component wired to a symbol"),
            Fallback::NoPath => write!(f, "no path"),
            Fallback::TooComplex { bends, crossings } => {
                write!(f, "{bends} bends and {crossings} crossings")
            }
        }
    }
}

/// Draw a wire between `a` and `b`, or say why it should be labels.
fn draw_wire(
    ctx: &mut RenderContext,
    id: NodeId,
    source_trace_id: &str,
    a: &WireEnd,
    b: &WireEnd,
) -> Result<String, Fallback> {
    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let blocked: Vec<Bounds> = schematic_obstacles(&ctx.db).iter().map(|o| o.bounds()).collect();
    let mut connected = source_nets_of(&ctx.db, &connectivity, source_trace_id);
    connected.push(source_trace_id.to_string());

    let points = match elbow(a, b, &blocked) {
        Some(points) => points,
        None => grid_path(ctx, a, b, &connected).ok_or(Fallback::NoPath)?,
    };
    let edges = edges_of(&points, a, b);
    let (same, foreign) = existing_edges(ctx, &connectivity, source_trace_id);

    let bends = points.len().saturating_sub(2);
    let crossings = count_crossings(&edges, &foreign);
    let limits = &ctx.config.schematic;
    if bends > limits.max_bends || crossings > limits.max_crossings {
        return Err(Fallback::TooComplex { bends, crossings });
    }
    let edges = if limits.trace_crossings {
        insert_crossings(edges, &foreign, limits.crossing_size)
    } else {
        edges
    };
    let junctions = junctions(&edges, &same);

    let subcircuit_id = ctx.subcircuit_id(id);
    Ok(ctx.insert(CircuitElement::SchematicTrace(SchematicTrace {
        schematic_trace_id: String::new(),
        source_trace_id: Some(source_trace_id.to_string()),
        edges,
        junctions,
        subcircuit_id,
    })))
}

/// Insert a label unless the same text already sits at `at`.
fn place_label(
    ctx: &mut RenderContext,
    id: NodeId,
    text: &str,
    end: &WireEnd,
    net_id: Option<String>,
    source_trace_id: &str,
) -> Option<String> {
    let taken = ctx
        .db
        .schematic_net_label
        .iter()
        .any(|l| l.text == text && l.anchor_position.approx_eq(&end.at, EPSILON));
    if taken {
        return None;
    }
    let record = net_label(
        text,
        end.at,
        end.facing,
        net_id,
        Some(source_trace_id.to_string()),
        ctx.subcircuit_id(id),
    );
    Some(ctx.insert(CircuitElement::SchematicNetLabel(record)))
}

/// Label every end with one shared name.
fn label_fallback(
    ctx: &mut RenderContext,
    id: NodeId,
    source_trace_id: &str,
    ends: &[WireEnd],
    reason: Fallback,
) -> HookResult {
    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let net = source_nets_of(&ctx.db, &connectivity, source_trace_id)
        .into_iter()
        .find_map(|n| ctx.db.source_net.get(&n).map(|net| (n.clone(), net.name.clone())));
    let (net_id, text) = match net {
        Some((net_id, name)) => (Some(net_id), name),
        None => {
            let first = ends
                .iter()
                .find_map(|e| e.source_port_id.clone())
                .unwrap_or_else(|| source_trace_id.to_string());
            (None, port_name(&ctx.db, &first).replace('.', "_"))
        }
    };
    debug!("{source_trace_id}: labelled as {text} ({reason})");

    let mut labels = Vec::new();
    for end in ends {
        labels.extend(place_label(ctx, id, &text, end, net_id.clone(), source_trace_id));
    }
    let state = &mut ctx.tree.node_mut(id)?.state;
    state.schematic_net_label_ids = labels;
    state.trace_status = TraceStatus::LabelFallback;
    Ok(HookOutcome::Done)
}

fn wired(ctx: &mut RenderContext, id: NodeId, trace_id: String) -> HookResult {
    let state = &mut ctx.tree.node_mut(id)?.state;
    state.schematic_trace_id = Some(trace_id);
    state.trace_status = TraceStatus::DiagramRouted;
    Ok(HookOutcome::Done)
}

pub(crate) fn render_trace(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if !matches!(node.props, ElementProps::Trace(_)) {
        return Ok(HookOutcome::Done);
    }
    let (Some(source_trace_id), Some(endpoints)) = (node.state.source_trace_id.clone(), node.state.endpoints.clone())
    else {
        return Ok(HookOutcome::Done);
    };
    if ctx
        .db
        .schematic_trace
        .iter()
        .any(|t| t.source_trace_id.as_deref() == Some(source_trace_id.as_str()))
    {
        return Ok(HookOutcome::Done);
    }

    match (endpoints.ports.as_slice(), endpoints.nets.as_slice()) {
        ([a], [net]) => wire_to_net(ctx, id, &source_trace_id, *a, *net),
        ([a, b], []) => {
            let (Some(a), Some(b)) = (port_end(ctx, *a), port_end(ctx, *b)) else {
                return Ok(HookOutcome::Done);
            };
            if ctx.config.schematic.label_box_to_symbol && a.is_box != b.is_box {
                return label_fallback(ctx, id, &source_trace_id, &[a, b], Fallback::BoxToSymbol);
            }
            match draw_wire(ctx, id, &source_trace_id, &a, &b) {
                Ok(trace_id) => wired(ctx, id, trace_id),
                Err(reason) => label_fallback(ctx, id, &source_trace_id, &[a, b], reason),
            }
        }
        _ => Ok(HookOutcome::Done),
    }
}

fn wire_to_net(ctx: &mut RenderContext, id: NodeId, source_trace_id: &str, port: NodeId, net: NodeId) -> HookResult {
    let Some(port) = port_end(ctx, port) else {
        return Ok(HookOutcome::Done);
    };
    let net_name = ctx
        .tree
        .get(net)
        .and_then(|n| n.name().map(str::to_string))
        .unwrap_or_default();
    let net_id = ctx.tree.state(net).and_then(|s| s.source_net_id.clone());

    let scope = ctx.tree.subcircuit_of(id);
    if let Some(label) = label_end(ctx, scope, &net_name) {
        if let Ok(trace_id) = draw_wire(ctx, id, source_trace_id, &port, &label) {
            return wired(ctx, id, trace_id);
        }
    }

    let labels: Vec<String> = place_label(ctx, id, &net_name, &port, net_id, source_trace_id)
        .into_iter()
        .collect();
    let state = &mut ctx.tree.node_mut(id)?.state;
    state.schematic_net_label_ids = labels;
    state.trace_status = TraceStatus::DiagramRouted;
    Ok(HookOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end(x: f64, y: f64, facing: FacingDirection) -> WireEnd {
        WireEnd {
            at: Point::new(x, y),
            facing,
            schematic_port_id: None,
            source_port_id: None,
            is_box: false,
        }
    }

    #[test]
    fn facing_ports_get_a_straight_wire() {
        let a = end(0.0, 0.0, FacingDirection::Right);
        let b = end(3.0, 0.0, FacingDirection::Left);
        assert_eq!(elbow(&a, &b, &[]), Some(vec![a.at, b.at]));
    }

    #[test]
    fn elbow_respects_facing_and_obstacles() {
        let a = end(0.0, 0.0, FacingDirection::Right);
        let b = end(2.0, 2.0, FacingDirection::Down);
        assert_eq!(
            elbow(&a, &b, &[]),
            Some(vec![a.at, Point::new(2.0, 0.0), b.at])
        );

        let blocker = Bounds::new(0.5, -0.5, 1.5, 0.5);
        assert_eq!(elbow(&a, &b, &[blocker]), None);

        let backwards = end(2.0, 2.0, FacingDirection::Up);
        assert_eq!(elbow(&a, &backwards, &[]), None);
    }

    #[test]
    fn diagonal_steps_become_corners() {
        let points = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 1.0)];
        assert_eq!(
            simplify(&orthogonalize(&points)),
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 1.0)]
        );
    }
}
