//! Trace routing.
//!
//! [`pcb`] routes traces one at a time on the board and [`islands`] joins
//! whatever those traces left disconnected; [`net_aware`] replaces both with a
//! single autorouter call per subcircuit. [`schematic`] draws the diagram
//! wires, falling back to [`labels`] when a wire would be unreadable.

pub mod crossings;
pub mod islands;
pub mod labels;
pub mod net_aware;
pub mod obstacles;
pub mod pcb;
pub mod schematic;

use picoplace_circuit::{CircuitDb, CircuitElement, LayerRef, PcbPort, PcbTrace, PcbVia, Point, RoutePoint};
use picoplace_engine::autorouter::route_length;

use crate::connectivity::ConnectivityMap;
use crate::render::{Phase, RenderContext};
use crate::tree::props::ElementProps;
use crate::tree::NodeId;

/// A port as the physical router sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PcbEndpoint {
    pub source_port_id: String,
    pub pcb_port_id: String,
    pub at: Point,
    pub layers: Vec<LayerRef>,
}

impl PcbEndpoint {
    pub fn from_record(port: &PcbPort) -> Self {
        Self {
            source_port_id: port.source_port_id.clone(),
            pcb_port_id: port.pcb_port_id.clone(),
            at: port.center(),
            layers: port.layers.clone(),
        }
    }

    /// Endpoint of a port node, once the port has a matched pad.
    pub fn of_port(ctx: &RenderContext, port: NodeId) -> Option<Self> {
        let id = ctx.tree.state(port)?.pcb_port_id.as_ref()?;
        ctx.db.pcb_port.get(id).map(Self::from_record)
    }
}

/// Trace nodes whose records belong to the subcircuit `scope`.
pub(crate) fn traces_in(ctx: &RenderContext, scope: NodeId) -> Vec<NodeId> {
    ctx.tree
        .descendants(scope)
        .into_iter()
        .filter(|n| matches!(ctx.tree.props(*n), Some(ElementProps::Trace(_))))
        .filter(|n| ctx.tree.subcircuit_of(*n) == scope)
        .collect()
}

/// Whether every trace of `scope` is done with `phase`.
pub(crate) fn traces_done(ctx: &RenderContext, scope: NodeId, phase: Phase) -> bool {
    traces_in(ctx, scope)
        .into_iter()
        .all(|t| ctx.tree.get(t).is_some_and(|n| n.phase_done(phase)))
}

/// `R1.pin1` style name of a source port.
pub(crate) fn port_name(db: &CircuitDb, source_port_id: &str) -> String {
    let Some(port) = db.source_port.get(source_port_id) else {
        return source_port_id.to_string();
    };
    match port
        .source_component_id
        .as_ref()
        .and_then(|c| db.source_component.get(c))
    {
        Some(component) => format!("{}.{}", component.name, port.name),
        None => port.name.clone(),
    }
}

/// Human readable name of a source trace.
pub(crate) fn trace_name(db: &CircuitDb, source_trace_id: &str) -> String {
    db.source_trace
        .get(source_trace_id)
        .and_then(|t| t.display_name.clone())
        .unwrap_or_else(|| source_trace_id.to_string())
}

/// Source nets electrically joined with `id`.
pub(crate) fn source_nets_of(db: &CircuitDb, connectivity: &ConnectivityMap, id: &str) -> Vec<String> {
    connectivity
        .ids_connected_to(id)
        .iter()
        .filter(|m| db.source_net.get(m).is_some())
        .cloned()
        .collect()
}

/// Origin of the frame `pcb_path` points and route hints are given in.
pub(crate) fn pcb_frame_origin(ctx: &RenderContext, id: NodeId) -> Point {
    let scope = ctx.tree.subcircuit_of(id);
    ctx.tree
        .state(scope)
        .and_then(|s| s.pcb_center)
        .unwrap_or(Point::ORIGIN)
}

/// Insert a routed trace and a via record per layer change. Returns the trace id.
pub(crate) fn insert_pcb_route(
    ctx: &mut RenderContext,
    source_trace_id: Option<String>,
    route: Vec<RoutePoint>,
    subcircuit_id: Option<String>,
    net_ids: &[String],
) -> String {
    let vias: Vec<(Point, LayerRef, LayerRef)> = route
        .iter()
        .filter_map(|p| match *p {
            RoutePoint::Via {
                x,
                y,
                from_layer,
                to_layer,
            } => Some((Point::new(x, y), from_layer, to_layer)),
            RoutePoint::Wire { .. } => None,
        })
        .collect();

    let mut trace = PcbTrace::new(source_trace_id, route);
    trace.trace_length = Some(route_length(&trace.route, ctx.config.routing.via_length));
    trace.subcircuit_id = subcircuit_id.clone();
    let trace_id = ctx.insert(CircuitElement::PcbTrace(trace));

    for (at, from_layer, to_layer) in vias {
        ctx.insert(CircuitElement::PcbVia(PcbVia {
            pcb_via_id: String::new(),
            x: at.x,
            y: at.y,
            outer_diameter: ctx.config.routing.via_outer_diameter(),
            hole_diameter: ctx.config.routing.via_hole_diameter,
            from_layer,
            to_layer,
            pcb_trace_id: Some(trace_id.clone()),
            connected_source_net_ids: net_ids.to_vec(),
            subcircuit_id: subcircuit_id.clone(),
        }));
    }
    trace_id
}
