//! Physical trace rendering, one trace at a time.

use log::debug;
use picoplace_circuit::{point_in_polygon, Bounds, CircuitError, ErrorType, LayerRef, Point, RoutePoint, Severity};
use picoplace_engine::geometry::segment_leaves_polygon;
use picoplace_engine::layers::{find_layer_combination, shared_layer, LayerObjective};
use picoplace_engine::simplify::simplify_route;
use picoplace_engine::{Connection, ConnectionPoint, SimpleRouteJson};

use crate::config::RoutingMode;
use crate::connectivity::ConnectivityMap;
use crate::render::pcb::board_layer_count;
use crate::render::{HookOutcome, HookResult, Phase, RenderContext};
use crate::routing::islands::Islands;
use crate::routing::obstacles::pcb_obstacles;
use crate::routing::{
    insert_pcb_route, net_aware, pcb_frame_origin, port_name, source_nets_of, trace_name, traces_done, PcbEndpoint,
};
use crate::tree::props::{ElementProps, TraceProps};
use crate::tree::{NodeId, TraceStatus};

/// A point a route passes through and the layers it may use there.
#[derive(Debug, Clone)]
pub(crate) struct Waypoint {
    pub at: Point,
    pub objective: LayerObjective,
}

impl Waypoint {
    pub fn new(at: Point, objective: LayerObjective) -> Self {
        Self { at, objective }
    }
}

/// Where and why a route could not be completed.
#[derive(Debug, Clone)]
pub(crate) struct RouteFailure {
    pub from: Point,
    pub to: Point,
    pub reason: String,
}

pub(crate) fn board_outline(ctx: &RenderContext, id: NodeId) -> Option<Vec<Point>> {
    let board = ctx.tree.board_of(id)?;
    let board_id = ctx.tree.state(board)?.pcb_board_id.as_ref()?;
    ctx.db.pcb_board.get(board_id).map(|b| b.outline_polygon())
}

/// Route through `waypoints` in order with the autorouter configured for
/// `owner`. Each leg runs on one layer; vias go where consecutive legs
/// change layers.
pub(crate) fn route_through(
    ctx: &RenderContext,
    owner: NodeId,
    name: &str,
    waypoints: &[Waypoint],
    width: f64,
    connected_ids: &[String],
) -> Result<Vec<RoutePoint>, RouteFailure> {
    let (Some(first), Some(last)) = (waypoints.first(), waypoints.last()) else {
        return Err(RouteFailure {
            from: Point::ORIGIN,
            to: Point::ORIGIN,
            reason: "nothing to route".into(),
        });
    };
    let stack = LayerRef::stack(board_layer_count(ctx, owner));
    let mut router = ctx.autorouter(owner);
    let objectives: Vec<LayerObjective> = waypoints.iter().map(|w| w.objective.clone()).collect();
    let Some(layers) = find_layer_combination(&objectives, &stack, router.supports_layer_changes()) else {
        let reason = if router.supports_layer_changes() {
            "no layer assignment reaches every waypoint, a via hint may leave the route on a layer its end pad is not on"
                .to_string()
        } else {
            format!("endpoints share no layer and the {} autorouter cannot change layers", router.name())
        };
        return Err(RouteFailure {
            from: first.at,
            to: last.at,
            reason,
        });
    };

    let obstacles = pcb_obstacles(&ctx.db, &ConnectivityMap::from_db(&ctx.db));
    let outline = board_outline(ctx, owner);
    let margin = ctx.config.routing.bounds_margin;

    let mut route: Vec<RoutePoint> = Vec::new();
    for (leg, pair) in waypoints.windows(2).enumerate() {
        let (a, b) = (pair[0].at, pair[1].at);
        let layer = layers[leg];
        let problem = SimpleRouteJson {
            layer_count: stack.len() as u8,
            min_trace_width: width,
            obstacles: obstacles.clone(),
            connections: vec![Connection::new(
                format!("{name}_{leg}"),
                vec![ConnectionPoint::new(a, layer), ConnectionPoint::new(b, layer)],
            )
            .with_connected_ids(connected_ids.iter().cloned())],
            bounds: Bounds::new(a.x, a.y, b.x, b.y).expand(margin),
            outline: outline.clone(),
        };
        let traces = router.solve(&problem).map_err(|err| RouteFailure {
            from: a,
            to: b,
            reason: err.to_string(),
        })?;

        if let Some(previous) = route.last().copied() {
            if previous.layer() != layer {
                route.push(RoutePoint::via(a, previous.layer(), layer));
            }
        }
        for point in traces.into_iter().flat_map(|t| t.route) {
            let duplicate = route.last().is_some_and(|last| {
                !last.is_via()
                    && !point.is_via()
                    && last.layer() == point.layer()
                    && last.point().approx_eq(&point.point(), 1e-9)
            });
            if !duplicate {
                route.push(point);
            }
        }
    }
    Ok(simplify_route(&route))
}

/// What the second end of a physical trace is.
#[derive(Clone, Copy)]
enum Target {
    Port(NodeId),
    Net(NodeId),
}

fn reject(ctx: &mut RenderContext, id: NodeId, source_trace_id: &str, message: String) -> HookResult {
    let subcircuit_id = ctx.subcircuit_id(id);
    ctx.insert_error(
        CircuitError::new(ErrorType::PcbTraceError, message)
            .with_source_trace(source_trace_id)
            .with_subcircuit(subcircuit_id),
    );
    ctx.tree.node_mut(id)?.state.trace_status = TraceStatus::Unroutable;
    Ok(HookOutcome::Done)
}

fn routed(ctx: &mut RenderContext, id: NodeId, pcb_trace_ids: Vec<String>) -> HookResult {
    let state = &mut ctx.tree.node_mut(id)?.state;
    state.pcb_trace_ids = pcb_trace_ids;
    state.trace_status = TraceStatus::PhysicallyRouted;
    Ok(HookOutcome::Done)
}

pub(crate) fn render_trace(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if node.props.is_subcircuit() {
        return net_aware::route_subcircuit(ctx, id);
    }
    let ElementProps::Trace(props) = &node.props else {
        return Ok(HookOutcome::Done);
    };
    if node.state.trace_status != TraceStatus::PortsResolved {
        return Ok(HookOutcome::Done);
    }
    let (Some(source_trace_id), Some(endpoints)) = (node.state.source_trace_id.clone(), node.state.endpoints.clone())
    else {
        return Ok(HookOutcome::Done);
    };
    let props = props.clone();
    let manual = !props.pcb_path.is_empty() || props.pcb_straight_line;
    if !manual && ctx.routing_mode(id) == RoutingMode::NetAware {
        return Ok(HookOutcome::Done);
    }
    if ctx.db.pcb_trace_for_source_trace(&source_trace_id).is_some() {
        debug!("{source_trace_id} already has copper, skipping");
        return routed(ctx, id, Vec::new());
    }

    let display = trace_name(&ctx.db, &source_trace_id);
    let (from, target) = match (endpoints.ports.as_slice(), endpoints.nets.as_slice()) {
        ([a, b], []) => (*a, Target::Port(*b)),
        ([a], [net]) => (*a, Target::Net(*net)),
        ([], _) => {
            return reject(ctx, id, &source_trace_id, format!("{display} only joins nets, there is no port to route from"));
        }
        (ports, []) if ports.len() > 2 => {
            let message = format!("{display} joins {} ports, a physical trace connects exactly two", ports.len());
            return reject(ctx, id, &source_trace_id, message);
        }
        _ => {
            let message = format!("{display} mixes ports and nets, route the net connections as separate traces");
            return reject(ctx, id, &source_trace_id, message);
        }
    };

    let mut missing: Vec<NodeId> = vec![from];
    if let Target::Port(to) = target {
        missing.push(to);
    }
    missing.retain(|p| PcbEndpoint::of_port(ctx, *p).is_none());
    if !missing.is_empty() {
        let source_ports: Vec<String> = missing
            .iter()
            .filter_map(|p| ctx.tree.state(*p).and_then(|s| s.source_port_id.clone()))
            .collect();
        let names: Vec<String> = source_ports.iter().map(|p| port_name(&ctx.db, p)).collect();
        let message = format!("{display}: no pad or hole for {}", names.join(", "));
        let subcircuit_id = ctx.subcircuit_id(id);
        ctx.insert_error(
            CircuitError::new(ErrorType::PcbTraceMissingPortError, message)
                .with_source_trace(source_trace_id.clone())
                .with_source_ports(source_ports)
                .with_subcircuit(subcircuit_id),
        );
        ctx.tree.node_mut(id)?.state.trace_status = TraceStatus::Unroutable;
        return Ok(HookOutcome::Done);
    }
    let Some(start) = PcbEndpoint::of_port(ctx, from) else {
        return Ok(HookOutcome::Done);
    };

    let end = match target {
        Target::Port(to) => PcbEndpoint::of_port(ctx, to),
        Target::Net(net) => {
            // Net membership is only complete once every trace is resolved.
            let scope = ctx.tree.subcircuit_of(id);
            if !traces_done(ctx, scope, Phase::SourceTraceRender) && !ctx.is_final_pass() {
                return Ok(HookOutcome::Waiting("net membership".into()));
            }
            match closest_in_net(ctx, net, &start) {
                NetTarget::Port(end) => Some(end),
                NetTarget::AlreadyJoined => return routed(ctx, id, Vec::new()),
                NetTarget::Empty(net_name) => {
                    let subcircuit_id = ctx.subcircuit_id(id);
                    ctx.insert_error(
                        CircuitError::new(
                            ErrorType::PcbTraceWarning,
                            format!("{display}: net {net_name} has no other port to connect to"),
                        )
                        .with_severity(Severity::Warning)
                        .with_source_trace(source_trace_id.clone())
                        .with_source_ports([start.source_port_id.clone()])
                        .with_subcircuit(subcircuit_id),
                    );
                    return routed(ctx, id, Vec::new());
                }
            }
        }
    };
    let Some(end) = end else {
        return Ok(HookOutcome::Done);
    };

    let width = props.thickness.unwrap_or(ctx.config.routing.trace_width);
    let route = if manual {
        manual_route(ctx, id, &props, &start, &end, width)
    } else {
        let waypoints = waypoints(ctx, id, &props, &start, &end);
        let connectivity = ConnectivityMap::from_db(&ctx.db);
        let mut connected = vec![source_trace_id.clone(), start.pcb_port_id.clone(), end.pcb_port_id.clone()];
        connected.extend(connectivity.net_of(&source_trace_id));
        match route_through(ctx, id, &source_trace_id, &waypoints, width, &connected) {
            Ok(route) => route,
            Err(failure) => {
                let message = format!(
                    "{display}: could not route {} to {}: {}",
                    port_name(&ctx.db, &start.source_port_id),
                    port_name(&ctx.db, &end.source_port_id),
                    failure.reason
                );
                let subcircuit_id = ctx.subcircuit_id(id);
                ctx.insert_error(
                    CircuitError::new(ErrorType::PcbAutoroutingError, message)
                        .with_source_trace(source_trace_id.clone())
                        .with_source_ports([start.source_port_id.clone(), end.source_port_id.clone()])
                        .with_pcb_ports([start.pcb_port_id.clone(), end.pcb_port_id.clone()])
                        .with_center(failure.from.midpoint(&failure.to))
                        .with_subcircuit(subcircuit_id),
                );
                ctx.tree.node_mut(id)?.state.trace_status = TraceStatus::Unroutable;
                return Ok(HookOutcome::Done);
            }
        }
    };

    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let nets = source_nets_of(&ctx.db, &connectivity, &source_trace_id);
    let subcircuit_id = ctx.subcircuit_id(id);
    let trace_id = insert_pcb_route(ctx, Some(source_trace_id.clone()), route, subcircuit_id.clone(), &nets);
    debug!("routed {display} as {trace_id}");

    check_outside_board(ctx, id, &trace_id, &source_trace_id);
    if let Some(max) = props.max_length {
        let length = ctx
            .db
            .pcb_trace
            .get(&trace_id)
            .and_then(|t| t.trace_length)
            .unwrap_or_default();
        if length > max {
            ctx.insert_error(
                CircuitError::new(
                    ErrorType::PcbTraceWarning,
                    format!("{display} is {length:.2}mm long, longer than its {max:.2}mm limit"),
                )
                .with_severity(Severity::Warning)
                .with_source_trace(source_trace_id.clone())
                .with_pcb_traces([trace_id.clone()])
                .with_subcircuit(subcircuit_id),
            );
        }
    }
    routed(ctx, id, vec![trace_id])
}

enum NetTarget {
    Port(PcbEndpoint),
    AlreadyJoined,
    Empty(String),
}

/// The closest port of `net` not already joined to `start` by copper.
fn closest_in_net(ctx: &RenderContext, net: NodeId, start: &PcbEndpoint) -> NetTarget {
    let net_name = ctx
        .tree
        .node(net)
        .ok()
        .and_then(|n| n.name().map(str::to_string))
        .unwrap_or_default();
    let Some(net_id) = ctx.tree.state(net).and_then(|s| s.source_net_id.clone()) else {
        return NetTarget::Empty(net_name);
    };
    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let mut ports = vec![start.clone()];
    ports.extend(
        ctx.db
            .pcb_port
            .iter()
            .filter(|p| p.pcb_port_id != start.pcb_port_id)
            .filter(|p| connectivity.are_connected(&p.pcb_port_id, &net_id))
            .map(PcbEndpoint::from_record),
    );
    if ports.len() == 1 {
        return NetTarget::Empty(net_name);
    }
    let islands = Islands::build(&ctx.db, &connectivity, ports);
    let closest = (1..islands.ports.len())
        .filter(|i| !islands.joined(0, *i))
        .min_by(|a, b| {
            let da = islands.ports[*a].at.distance(&start.at);
            let db = islands.ports[*b].at.distance(&start.at);
            da.total_cmp(&db)
        });
    match closest {
        Some(i) => NetTarget::Port(islands.ports[i].clone()),
        None => NetTarget::AlreadyJoined,
    }
}

fn waypoints(ctx: &RenderContext, id: NodeId, props: &TraceProps, start: &PcbEndpoint, end: &PcbEndpoint) -> Vec<Waypoint> {
    let stack = LayerRef::stack(board_layer_count(ctx, id));
    let origin = pcb_frame_origin(ctx, id);
    let restrict = |layers: Vec<LayerRef>| match props.pcb_layer {
        Some(layer) if layers.contains(&layer) => vec![layer],
        _ => layers,
    };

    let mut out = vec![Waypoint::new(start.at, LayerObjective::new(restrict(start.layers.clone()), false))];
    for hint in &props.pcb_route_hints {
        let objective = match (hint.via, hint.to_layer) {
            (true, Some(layer)) => LayerObjective::new(stack.clone(), true).leaving_on(layer),
            (false, Some(layer)) => LayerObjective::new(vec![layer], false),
            (via, None) => LayerObjective::new(stack.clone(), via),
        };
        out.push(Waypoint::new(origin + hint.point(), objective));
    }
    out.push(Waypoint::new(end.at, LayerObjective::new(restrict(end.layers.clone()), false)));
    out
}

fn manual_route(
    ctx: &RenderContext,
    id: NodeId,
    props: &TraceProps,
    start: &PcbEndpoint,
    end: &PcbEndpoint,
    width: f64,
) -> Vec<RoutePoint> {
    let stack = LayerRef::stack(board_layer_count(ctx, id));
    let layer = props
        .pcb_layer
        .or_else(|| shared_layer(&stack, &[start.layers.as_slice(), end.layers.as_slice()]))
        .unwrap_or(LayerRef::Top);
    let origin = pcb_frame_origin(ctx, id);
    std::iter::once(start.at)
        .chain(props.pcb_path.iter().map(|p| origin + *p))
        .chain(std::iter::once(end.at))
        .map(|p| RoutePoint::wire(p, width, layer))
        .collect()
}

/// First point of `route` off the board, or where it first leaves it.
pub(crate) fn first_point_outside(route: &[RoutePoint], outline: &[Point]) -> Option<Point> {
    if outline.len() < 3 {
        return None;
    }
    if let Some(p) = route.iter().map(RoutePoint::point).find(|p| !point_in_polygon(p, outline)) {
        return Some(p);
    }
    route
        .windows(2)
        .find(|w| segment_leaves_polygon(w[0].point(), w[1].point(), outline))
        .map(|w| w[0].point().midpoint(&w[1].point()))
}

pub(crate) fn check_outside_board(ctx: &mut RenderContext, id: NodeId, trace_id: &str, source_trace_id: &str) {
    let Some(outline) = board_outline(ctx, id) else {
        return;
    };
    let Some(route) = ctx.db.pcb_trace.get(trace_id).map(|t| t.route.clone()) else {
        return;
    };
    let Some(at) = first_point_outside(&route, &outline) else {
        return;
    };
    let message = format!("{} leaves the board", trace_name(&ctx.db, source_trace_id));
    let subcircuit_id = ctx.subcircuit_id(id);
    ctx.insert_error(
        CircuitError::new(ErrorType::PcbTraceOutsideBoardError, message)
            .with_source_trace(source_trace_id)
            .with_pcb_traces([trace_id.to_string()])
            .with_center(at)
            .with_subcircuit(subcircuit_id),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(x: f64, y: f64) -> RoutePoint {
        RoutePoint::wire(Point::new(x, y), 0.15, LayerRef::Top)
    }

    #[test]
    fn detects_routes_leaving_the_outline() {
        let outline = vec![
            Point::new(-5.0, -5.0),
            Point::new(5.0, -5.0),
            Point::new(5.0, 5.0),
            Point::new(-5.0, 5.0),
        ];
        assert_eq!(first_point_outside(&[wire(0.0, 0.0), wire(4.0, 0.0)], &outline), None);
        assert_eq!(
            first_point_outside(&[wire(0.0, 0.0), wire(8.0, 0.0)], &outline),
            Some(Point::new(8.0, 0.0))
        );
        assert_eq!(first_point_outside(&[wire(0.0, 0.0)], &[]), None);
    }
}
