//! Net-island backfill.
//!
//! Routing trace by trace can leave a net in several pieces, for example when
//! two ports are tied to a net by separate traces that each reached a
//! different neighbour. Once every trace of a subcircuit is routed, the ports
//! of each net are grouped into islands joined by copper, and the closest pair
//! of islands is connected until one island is left.

use log::{debug, warn};
use petgraph::unionfind::UnionFind;
use picoplace_circuit::{CircuitDb, CircuitError, ErrorType};
use picoplace_engine::layers::LayerObjective;

use crate::config::RoutingMode;
use crate::connectivity::ConnectivityMap;
use crate::render::{HookOutcome, HookResult, Phase, RenderContext};
use crate::routing::pcb::{route_through, Waypoint};
use crate::routing::{insert_pcb_route, port_name, source_nets_of, traces_done, traces_in, PcbEndpoint};
use crate::tree::{NodeId, TraceStatus};

/// Distance under which a route point lands on a port.
const TOUCH: f64 = 1e-3;

/// Ports of one net, partitioned by the copper already joining them.
pub struct Islands {
    pub ports: Vec<PcbEndpoint>,
    sets: UnionFind<usize>,
}

impl Islands {
    /// Group `ports` using every routed trace connected to them.
    pub fn build(db: &CircuitDb, connectivity: &ConnectivityMap, ports: Vec<PcbEndpoint>) -> Self {
        let mut sets = UnionFind::new(ports.len());
        for trace in db.pcb_trace.iter() {
            if !ports
                .iter()
                .any(|p| connectivity.are_connected(&p.pcb_port_id, &trace.pcb_trace_id))
            {
                continue;
            }
            let touched: Vec<usize> = ports
                .iter()
                .enumerate()
                .filter(|(_, port)| {
                    trace
                        .route
                        .iter()
                        .any(|p| !p.is_via() && p.point().approx_eq(&port.at, TOUCH))
                })
                .map(|(i, _)| i)
                .collect();
            for pair in touched.windows(2) {
                sets.union(pair[0], pair[1]);
            }
        }
        Self { ports, sets }
    }

    pub fn count(&self) -> usize {
        let mut roots: Vec<usize> = (0..self.ports.len()).map(|i| self.sets.find(i)).collect();
        roots.sort_unstable();
        roots.dedup();
        roots.len()
    }

    pub fn joined(&self, a: usize, b: usize) -> bool {
        self.sets.equiv(a, b)
    }

    pub fn join(&mut self, a: usize, b: usize) {
        self.sets.union(a, b);
    }

    /// The two closest ports that sit on different islands.
    pub fn closest_pair(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..self.ports.len() {
            for b in a + 1..self.ports.len() {
                if self.joined(a, b) {
                    continue;
                }
                let d = self.ports[a].at.distance(&self.ports[b].at);
                if best.map_or(true, |(_, _, bd)| d < bd - 1e-9) {
                    best = Some((a, b, d));
                }
            }
        }
        best.map(|(a, b, _)| (a, b))
    }
}

/// Physical ports of subcircuit `scope_id` grouped by connectivity net, in
/// store order.
fn ports_by_net(db: &CircuitDb, connectivity: &ConnectivityMap, scope_id: &str) -> Vec<Vec<PcbEndpoint>> {
    let mut nets: Vec<(String, Vec<PcbEndpoint>)> = Vec::new();
    for port in db
        .pcb_port
        .iter()
        .filter(|p| p.subcircuit_id.as_deref() == Some(scope_id))
    {
        let Some(net) = connectivity.net_of(&port.pcb_port_id) else {
            continue;
        };
        let endpoint = PcbEndpoint::from_record(port);
        match nets.iter_mut().find(|(n, _)| *n == net) {
            Some((_, ports)) => ports.push(endpoint),
            None => nets.push((net, vec![endpoint])),
        }
    }
    nets.into_iter()
        .map(|(_, ports)| ports)
        .filter(|ports| ports.len() > 1)
        .collect()
}

pub(crate) fn route_net_islands(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if !node.props.is_subcircuit() || node.props.is_isolated() {
        return Ok(HookOutcome::Done);
    }
    if ctx.routing_mode(id) == RoutingMode::NetAware {
        return Ok(HookOutcome::Done);
    }
    let Some(scope_id) = node.state.source_group_id.clone() else {
        return Ok(HookOutcome::Done);
    };
    if !traces_done(ctx, id, Phase::PcbTraceRender) && !ctx.is_final_pass() {
        return Ok(HookOutcome::Waiting("trace routing".into()));
    }

    // Traces that failed or were rejected keep their nets out of backfill.
    let unroutable: Vec<String> = traces_in(ctx, id)
        .into_iter()
        .filter_map(|t| ctx.tree.state(t))
        .filter(|s| s.trace_status == TraceStatus::Unroutable)
        .filter_map(|s| s.source_trace_id.clone())
        .collect();
    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let nets = ports_by_net(&ctx.db, &connectivity, &scope_id);
    let width = ctx.config.routing.trace_width;
    let subcircuit_id = Some(scope_id.clone());

    for ports in nets {
        // Nets without a source trace are only joined by pours or not at all.
        let Some(source_trace_id) = connectivity
            .ids_connected_to(&ports[0].pcb_port_id)
            .iter()
            .find(|m| ctx.db.source_trace.get(m).is_some())
            .cloned()
        else {
            continue;
        };
        let members = connectivity.ids_connected_to(&source_trace_id);
        let failed = unroutable.iter().any(|t| members.contains(t))
            || ctx
                .db
                .errors_of_type(ErrorType::PcbAutoroutingError)
                .filter_map(|e| e.source_trace_id.as_ref())
                .any(|t| members.contains(t));
        if failed {
            continue;
        }
        let net_ids = source_nets_of(&ctx.db, &connectivity, &source_trace_id);
        let mut islands = Islands::build(&ctx.db, &connectivity, ports);
        if islands.count() > 1 {
            debug!("{source_trace_id}: {} islands to join", islands.count());
        }

        while let Some((a, b)) = islands.closest_pair() {
            let (from, to) = (islands.ports[a].clone(), islands.ports[b].clone());
            let waypoints = [
                Waypoint::new(from.at, LayerObjective::new(from.layers.clone(), false)),
                Waypoint::new(to.at, LayerObjective::new(to.layers.clone(), false)),
            ];
            let mut connected = connectivity.ids_connected_to(&source_trace_id).to_vec();
            connected.extend(connectivity.net_of(&source_trace_id));
            match route_through(ctx, id, &source_trace_id, &waypoints, width, &connected) {
                Ok(route) => {
                    insert_pcb_route(ctx, Some(source_trace_id.clone()), route, subcircuit_id.clone(), &net_ids);
                    islands.join(a, b);
                }
                Err(failure) => {
                    let message = format!(
                        "could not join {} and {} on the same net: {}",
                        port_name(&ctx.db, &from.source_port_id),
                        port_name(&ctx.db, &to.source_port_id),
                        failure.reason
                    );
                    warn!("{message}");
                    ctx.insert_error(
                        CircuitError::new(ErrorType::PcbAutoroutingError, message)
                            .with_source_trace(source_trace_id.clone())
                            .with_source_ports([from.source_port_id, to.source_port_id])
                            .with_pcb_ports([from.pcb_port_id, to.pcb_port_id])
                            .with_center(failure.from.midpoint(&failure.to))
                            .with_subcircuit(subcircuit_id.clone()),
                    );
                    break;
                }
            }
        }
    }
    Ok(HookOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoplace_circuit::{LayerRef, PcbTrace, Point, RoutePoint};

    fn endpoint(id: &str, x: f64) -> PcbEndpoint {
        PcbEndpoint {
            source_port_id: format!("source_{id}"),
            pcb_port_id: id.to_string(),
            at: Point::new(x, 0.0),
            layers: vec![LayerRef::Top],
        }
    }

    #[test]
    fn unrouted_ports_start_as_separate_islands() {
        let db = CircuitDb::new();
        let connectivity = ConnectivityMap::from_db(&db);
        let islands = Islands::build(
            &db,
            &connectivity,
            vec![endpoint("a", 0.0), endpoint("b", 5.0), endpoint("c", 1.0)],
        );
        assert_eq!(islands.count(), 3);
        assert_eq!(islands.closest_pair(), Some((0, 2)));
    }

    #[test]
    fn joined_islands_are_skipped() {
        let mut db = CircuitDb::new();
        db.pcb_trace.insert(PcbTrace::new(
            None,
            vec![
                RoutePoint::wire(Point::new(0.0, 0.0), 0.15, LayerRef::Top),
                RoutePoint::wire(Point::new(1.0, 0.0), 0.15, LayerRef::Top),
            ],
        ));
        let connectivity = ConnectivityMap::from_db(&db);
        // Without a shared net the trace does not count.
        let islands = Islands::build(&db, &connectivity, vec![endpoint("a", 0.0), endpoint("c", 1.0)]);
        assert_eq!(islands.count(), 2);

        let mut islands = islands;
        islands.join(0, 1);
        assert_eq!(islands.count(), 1);
        assert_eq!(islands.closest_pair(), None);
    }
}
