//! Electrical connectivity over every record in a store.
//!
//! Ports, nets and traces joined by source traces end up in one connectivity
//! net, together with every physical and diagram record that refers to them
//! (pcb ports, pads, routed traces, vias, pours, labels).

use std::collections::HashMap;

use petgraph::unionfind::UnionFind;
use picoplace_circuit::CircuitDb;

#[derive(Debug, Default)]
struct Builder {
    index: HashMap<String, usize>,
    ids: Vec<String>,
    edges: Vec<(usize, usize)>,
}

impl Builder {
    fn node(&mut self, id: &str) -> usize {
        if let Some(i) = self.index.get(id) {
            return *i;
        }
        let i = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), i);
        i
    }

    fn join(&mut self, a: &str, b: &str) {
        let (a, b) = (self.node(a), self.node(b));
        self.edges.push((a, b));
    }

    fn join_opt(&mut self, a: &str, b: Option<&String>) {
        match b {
            Some(b) => self.join(a, b),
            None => {
                self.node(a);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectivityMap {
    net_of: HashMap<String, usize>,
    members: Vec<Vec<String>>,
}

impl ConnectivityMap {
    pub fn from_db(db: &CircuitDb) -> Self {
        let mut b = Builder::default();

        for port in db.source_port.iter() {
            b.node(&port.source_port_id);
        }
        for net in db.source_net.iter() {
            b.node(&net.source_net_id);
        }
        for trace in db.source_trace.iter() {
            b.node(&trace.source_trace_id);
            for id in trace
                .connected_source_port_ids
                .iter()
                .chain(&trace.connected_source_net_ids)
            {
                b.join(&trace.source_trace_id, id);
            }
        }

        // Records carried over from isolated renders keep their keys.
        let mut by_key: HashMap<&str, &str> = HashMap::new();
        let keyed = db
            .source_port
            .iter()
            .filter_map(|p| Some((p.subcircuit_connectivity_map_key.as_deref()?, p.source_port_id.as_str())))
            .chain(db.source_net.iter().filter_map(|n| {
                Some((n.subcircuit_connectivity_map_key.as_deref()?, n.source_net_id.as_str()))
            }));
        for (key, id) in keyed {
            match by_key.get(key) {
                Some(first) => {
                    let first = first.to_string();
                    b.join(&first, id);
                }
                None => {
                    by_key.insert(key, id);
                }
            }
        }

        for port in db.pcb_port.iter() {
            b.join(&port.pcb_port_id, &port.source_port_id);
        }
        for pad in db.pcb_smtpad.iter() {
            b.join_opt(&pad.pcb_smtpad_id, pad.pcb_port_id.as_ref());
        }
        for hole in db.pcb_plated_hole.iter() {
            b.join_opt(&hole.pcb_plated_hole_id, hole.pcb_port_id.as_ref());
        }
        for trace in db.pcb_trace.iter() {
            b.join_opt(&trace.pcb_trace_id, trace.source_trace_id.as_ref());
        }
        for via in db.pcb_via.iter() {
            b.join_opt(&via.pcb_via_id, via.pcb_trace_id.as_ref());
            for net in &via.connected_source_net_ids {
                b.join(&via.pcb_via_id, net);
            }
        }
        for pour in db.pcb_copper_pour.iter() {
            b.join_opt(&pour.pcb_copper_pour_id, pour.source_net_id.as_ref());
        }
        for port in db.schematic_port.iter() {
            b.join(&port.schematic_port_id, &port.source_port_id);
        }
        for trace in db.schematic_trace.iter() {
            b.join_opt(&trace.schematic_trace_id, trace.source_trace_id.as_ref());
        }
        for label in db.schematic_net_label.iter() {
            b.join_opt(&label.schematic_net_label_id, label.source_net_id.as_ref());
            if let Some(trace) = &label.source_trace_id {
                b.join(&label.schematic_net_label_id, trace);
            }
        }

        let mut uf = UnionFind::<usize>::new(b.ids.len());
        for (x, y) in &b.edges {
            uf.union(*x, *y);
        }

        let mut root_to_net: HashMap<usize, usize> = HashMap::new();
        let mut net_of = HashMap::with_capacity(b.ids.len());
        let mut members: Vec<Vec<String>> = Vec::new();
        for (i, id) in b.ids.iter().enumerate() {
            let root = uf.find(i);
            let net = *root_to_net.entry(root).or_insert_with(|| {
                members.push(Vec::new());
                members.len() - 1
            });
            members[net].push(id.clone());
            net_of.insert(id.clone(), net);
        }

        Self { net_of, members }
    }

    /// Connectivity net id of a record, e.g. `connectivity_net3`.
    pub fn net_of(&self, id: &str) -> Option<String> {
        self.net_of.get(id).map(|n| format!("connectivity_net{n}"))
    }

    pub fn are_connected(&self, a: &str, b: &str) -> bool {
        match (self.net_of.get(a), self.net_of.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Every record id in the same net as `id`, `id` included.
    pub fn ids_connected_to(&self, id: &str) -> &[String] {
        self.net_of
            .get(id)
            .map(|n| self.members[*n].as_slice())
            .unwrap_or(&[])
    }

    pub fn net_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoplace_circuit::{LayerRef, PcbPort, Point, SourcePort, SourceTrace};

    #[test]
    fn traces_join_ports_and_physical_records() {
        let mut db = CircuitDb::new();
        let a = db.source_port.insert(SourcePort::new("pin1", Some(1)));
        let b = db.source_port.insert(SourcePort::new("pin2", Some(2)));
        let c = db.source_port.insert(SourcePort::new("pin1", Some(1)));
        db.source_trace.insert(SourceTrace::new(vec![a.clone(), b.clone()], vec![]));
        let pcb_b = db.pcb_port.insert(PcbPort::new(b.clone(), Point::ORIGIN, vec![LayerRef::Top]));

        let map = ConnectivityMap::from_db(&db);
        assert!(map.are_connected(&a, &b));
        assert!(map.are_connected(&a, &pcb_b));
        assert!(!map.are_connected(&a, &c));
        assert_eq!(map.net_count(), 2);
        assert_eq!(map.ids_connected_to(&a).len(), 4);
    }

    #[test]
    fn shared_keys_join_spliced_ports() {
        let mut db = CircuitDb::new();
        let mut p = SourcePort::new("pin1", Some(1));
        p.subcircuit_connectivity_map_key = Some("source_group_1_connectivity_net0".into());
        let a = db.source_port.insert(p.clone());
        let b = db.source_port.insert(p);
        let map = ConnectivityMap::from_db(&db);
        assert!(map.are_connected(&a, &b));
        assert_eq!(map.net_of(&a), Some("connectivity_net0".to_string()));
    }
}
