//! Net-aware routing: one autorouter call per subcircuit.
//!
//! Every port of the subcircuit that shares a connectivity net becomes a
//! point of one connection named after that net, so the autorouter sees the
//! whole problem at once and may branch a net wherever it likes.

use log::{debug, warn};
use picoplace_circuit::{Bounds, CircuitError, ErrorType, LayerRef, Point};
use picoplace_engine::{Connection, ConnectionPoint, SimpleRouteJson};

use crate::config::RoutingMode;
use crate::connectivity::ConnectivityMap;
use crate::render::pcb::board_layer_count;
use crate::render::{HookOutcome, HookResult, Phase, RenderContext};
use crate::routing::obstacles::pcb_obstacles;
use crate::routing::pcb::{board_outline, check_outside_board};
use crate::routing::{insert_pcb_route, source_nets_of, traces_done, traces_in, PcbEndpoint};
use crate::tree::props::ElementProps;
use crate::tree::{NodeId, TraceStatus};

/// One connectivity net to route: the trace nodes that asked for it and the
/// ports it has to reach.
struct NetJob {
    net: String,
    traces: Vec<(NodeId, String)>,
    ports: Vec<PcbEndpoint>,
}

pub(crate) fn route_subcircuit(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if node.props.is_isolated() || ctx.routing_mode(id) != RoutingMode::NetAware {
        return Ok(HookOutcome::Done);
    }
    let Some(scope_id) = node.state.source_group_id.clone() else {
        return Ok(HookOutcome::Done);
    };
    if !traces_done(ctx, id, Phase::SourceTraceRender) && !ctx.is_final_pass() {
        return Ok(HookOutcome::Waiting("trace resolution".into()));
    }

    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let mut jobs: Vec<NetJob> = Vec::new();
    for trace in traces_in(ctx, id) {
        let Some(node) = ctx.tree.get(trace) else {
            continue;
        };
        let ElementProps::Trace(props) = &node.props else {
            continue;
        };
        if node.state.trace_status != TraceStatus::PortsResolved
            || !props.pcb_path.is_empty()
            || props.pcb_straight_line
        {
            continue;
        }
        let Some(source_trace_id) = node.state.source_trace_id.clone() else {
            continue;
        };
        let Some(net) = connectivity.net_of(&source_trace_id) else {
            continue;
        };
        match jobs.iter_mut().find(|j| j.net == net) {
            Some(job) => job.traces.push((trace, source_trace_id)),
            None => {
                let ports = ctx
                    .db
                    .pcb_port
                    .iter()
                    .filter(|p| p.subcircuit_id.as_deref() == Some(scope_id.as_str()))
                    .filter(|p| connectivity.net_of(&p.pcb_port_id).as_ref() == Some(&net))
                    .map(PcbEndpoint::from_record)
                    .collect();
                jobs.push(NetJob {
                    net,
                    traces: vec![(trace, source_trace_id)],
                    ports,
                });
            }
        }
    }
    jobs.retain(|job| job.ports.len() > 1);
    if jobs.is_empty() {
        return Ok(HookOutcome::Done);
    }

    let width = ctx.config.routing.trace_width;
    let stack = LayerRef::stack(board_layer_count(ctx, id));
    let points: Vec<Point> = jobs.iter().flat_map(|j| j.ports.iter().map(|p| p.at)).collect();
    let bounds = Bounds::from_points(&points)
        .unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0))
        .expand(ctx.config.routing.bounds_margin);
    let problem = SimpleRouteJson {
        layer_count: stack.len() as u8,
        min_trace_width: width,
        obstacles: pcb_obstacles(&ctx.db, &connectivity),
        connections: jobs
            .iter()
            .map(|job| {
                let points = job
                    .ports
                    .iter()
                    .map(|p| {
                        let layer = p.layers.first().copied().unwrap_or(LayerRef::Top);
                        let mut point = ConnectionPoint::new(p.at, layer);
                        point.pcb_port_id = Some(p.pcb_port_id.clone());
                        point
                    })
                    .collect();
                Connection::new(job.net.clone(), points).with_connected_ids([job.net.clone()])
            })
            .collect(),
        bounds,
        outline: board_outline(ctx, id),
    };

    let mut router = ctx.autorouter(id);
    debug!(
        "net-aware routing of {} nets with {}",
        problem.connections.len(),
        router.name()
    );
    let routed = match router.solve(&problem) {
        Ok(routed) => routed,
        Err(err) => {
            let message = format!("net-aware routing with {} failed: {err}", router.name());
            warn!("{message}");
            let traces: Vec<String> = jobs
                .iter()
                .flat_map(|j| j.traces.iter().map(|(_, t)| t.clone()))
                .collect();
            let mut error = CircuitError::new(ErrorType::PcbAutoroutingError, message)
                .with_subcircuit(Some(scope_id.clone()))
                .with_center(bounds.center());
            if let Some(first) = traces.first() {
                error = error.with_source_trace(first.clone());
            }
            ctx.insert_error(error);
            for job in &jobs {
                for (trace, _) in &job.traces {
                    ctx.tree.node_mut(*trace)?.state.trace_status = TraceStatus::Unroutable;
                }
            }
            return Ok(HookOutcome::Done);
        }
    };

    for job in &jobs {
        let Some((_, source_trace_id)) = job.traces.first() else {
            continue;
        };
        let nets = source_nets_of(&ctx.db, &connectivity, source_trace_id);
        let mut inserted = Vec::new();
        for trace in routed.iter().filter(|t| t.connection_name == job.net) {
            let trace_id = insert_pcb_route(
                ctx,
                Some(source_trace_id.clone()),
                trace.route.clone(),
                Some(scope_id.clone()),
                &nets,
            );
            check_outside_board(ctx, id, &trace_id, source_trace_id);
            inserted.push(trace_id);
        }
        for (trace, _) in &job.traces {
            let state = &mut ctx.tree.node_mut(*trace)?.state;
            state.pcb_trace_ids = inserted.clone();
            state.trace_status = TraceStatus::PhysicallyRouted;
        }
    }
    Ok(HookOutcome::Done)
}
