//! Obstacles handed to the autorouters.
//!
//! Every obstacle carries its own record id and, when it has one, its
//! connectivity net, so a connection passes through copper of its own net by
//! listing that net among its connected ids.

use picoplace_circuit::{CircuitDb, LayerRef, Point};
use picoplace_engine::router::route_obstacles;
use picoplace_engine::{Obstacle, RoutedTrace};

use crate::connectivity::ConnectivityMap;

fn tags(connectivity: &ConnectivityMap, id: &str) -> Vec<String> {
    let mut ids = vec![id.to_string()];
    ids.extend(connectivity.net_of(id));
    ids
}

/// Copper on the board: pads, holes, vias and routed traces.
pub fn pcb_obstacles(db: &CircuitDb, connectivity: &ConnectivityMap) -> Vec<Obstacle> {
    let all_layers = LayerRef::stack(6);
    let mut out = Vec::new();

    for pad in db.pcb_smtpad.iter() {
        out.push(
            Obstacle::new(pad.center(), pad.width, pad.height, vec![pad.layer])
                .connected_to(tags(connectivity, &pad.pcb_smtpad_id)),
        );
    }
    for hole in db.pcb_plated_hole.iter() {
        out.push(
            Obstacle::new(hole.center(), hole.outer_diameter, hole.outer_diameter, hole.layers.clone())
                .connected_to(tags(connectivity, &hole.pcb_plated_hole_id)),
        );
    }
    for hole in db.pcb_hole.iter() {
        out.push(Obstacle::new(
            Point::new(hole.x, hole.y),
            hole.hole_diameter,
            hole.hole_diameter,
            all_layers.clone(),
        ));
    }
    for via in db.pcb_via.iter() {
        out.push(
            Obstacle::new(via.center(), via.outer_diameter, via.outer_diameter, via.layers())
                .connected_to(tags(connectivity, &via.pcb_via_id)),
        );
    }
    for trace in db.pcb_trace.iter() {
        let routed = RoutedTrace {
            connection_name: trace.pcb_trace_id.clone(),
            route: trace.route.clone(),
        };
        out.extend(route_obstacles(&routed, &tags(connectivity, &trace.pcb_trace_id)));
    }
    out
}

/// Component boxes and net labels on the diagram, all on one layer.
pub fn schematic_obstacles(db: &CircuitDb) -> Vec<Obstacle> {
    let mut out = Vec::new();
    for component in db.schematic_component.iter() {
        let b = component.bounds();
        out.push(
            Obstacle::new(b.center(), b.width(), b.height(), vec![LayerRef::Top])
                .connected_to([component.schematic_component_id.clone()]),
        );
    }
    for label in db.schematic_net_label.iter() {
        let b = label.bounds();
        let mut ids = vec![label.schematic_net_label_id.clone()];
        ids.extend(label.source_net_id.clone());
        out.push(Obstacle::new(b.center(), b.width(), b.height(), vec![LayerRef::Top]).connected_to(ids));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoplace_circuit::{PadShape, PcbPort, PcbSmtPad, SourcePort, SourceTrace};

    #[test]
    fn pads_are_tagged_with_their_net() {
        let mut db = CircuitDb::new();
        let a = db.source_port.insert(SourcePort::new("pin1", Some(1)));
        let b = db.source_port.insert(SourcePort::new("pin1", Some(1)));
        db.source_trace.insert(SourceTrace::new(vec![a.clone(), b], vec![]));
        let port = db.pcb_port.insert(PcbPort::new(a, Point::ORIGIN, vec![LayerRef::Top]));
        let pad_id = db.pcb_smtpad.insert(PcbSmtPad {
            pcb_smtpad_id: String::new(),
            shape: PadShape::Rect,
            x: 0.0,
            y: 0.0,
            width: 0.6,
            height: 0.5,
            layer: LayerRef::Top,
            port_hints: vec!["pin1".into()],
            pcb_component_id: None,
            pcb_port_id: Some(port),
            subcircuit_id: None,
        });

        let connectivity = ConnectivityMap::from_db(&db);
        let obstacles = pcb_obstacles(&db, &connectivity);
        assert_eq!(obstacles.len(), 1);
        let net = connectivity.net_of(&pad_id).unwrap();
        assert!(obstacles[0].connected_to.contains(&net));
        assert!(obstacles[0].connected_to.contains(&pad_id));
    }
}
