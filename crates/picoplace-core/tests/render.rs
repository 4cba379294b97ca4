mod common;

use common::*;
use picoplace_core::circuit::ErrorType;
use picoplace_core::{Circuit, Phase};
use serde_json::json;

#[test]
fn two_resistor_board_renders_cleanly() {
    let circuit = render(two_resistor_board());
    let db = circuit.db();

    assert_eq!(db.source_component.len(), 2);
    assert_eq!(db.pcb_component.len(), 2);
    assert_eq!(db.pcb_smtpad.len(), 4);
    assert_eq!(db.pcb_trace.len(), 1);
    assert_no_diagnostics(&circuit);

    let trace = &db.pcb_trace.list()[0];
    let start = trace.start().unwrap();
    let end = trace.end().unwrap();
    let r1 = port_position(&circuit, "R1", "pin2");
    let r2 = port_position(&circuit, "R2", "pin1");
    assert!(start.approx_eq(&r1, 1e-6), "trace starts at {start:?}, port at {r1:?}");
    assert!(end.approx_eq(&r2, 1e-6), "trace ends at {end:?}, port at {r2:?}");
    assert!(trace.trace_length.is_some_and(|l| l >= r1.distance(&r2) - 1e-6));
}

#[test]
fn rendering_a_settled_tree_changes_nothing() {
    let mut circuit = render(two_resistor_board());
    let first = circuit.to_json().unwrap();
    circuit.render().unwrap();
    assert_eq!(circuit.to_json().unwrap(), first);
}

#[test]
fn same_tree_renders_to_same_document() {
    let a = render(two_resistor_board()).to_json().unwrap();
    let b = render(two_resistor_board()).to_json().unwrap();
    assert_eq!(a, b);
}

#[test]
fn changed_props_rerender_from_scratch() {
    let mut circuit = render(two_resistor_board());
    let r2 = circuit.tree().by_name("R2")[0];
    let mut props = circuit.tree().props(r2).cloned().unwrap();
    if let picoplace_core::ElementProps::Resistor(part) = &mut props {
        part.placement.pcb_y = Some(4.0);
    }
    circuit.update_props(r2, props).unwrap();
    circuit.render().unwrap();

    let db = circuit.db();
    assert_eq!(db.pcb_component.len(), 2);
    assert_eq!(db.pcb_trace.len(), 1);
    let end = db.pcb_trace.list()[0].end().unwrap();
    assert!(end.approx_eq(&port_position(&circuit, "R2", "pin1"), 1e-6));
    assert!((end.y - 4.0).abs() < 1e-6);
}

fn set_r1_connections(circuit: &mut Circuit, connections: &[(&str, &str)]) {
    let r1 = circuit.tree().by_name("R1")[0];
    let mut props = circuit.tree().props(r1).cloned().unwrap();
    if let picoplace_core::ElementProps::Resistor(part) = &mut props {
        part.connections = connections
            .iter()
            .map(|(alias, target)| (alias.to_string(), target.to_string()))
            .collect();
    }
    circuit.update_props(r1, props).unwrap();
    circuit.render().unwrap();
}

#[test]
fn changed_connections_rebuild_ports_and_traces() {
    let mut circuit = render(board(
        20.0,
        20.0,
        vec![resistor("R1", -3.0, 0.0), resistor("R2", 3.0, 0.0)],
    ));
    assert!(circuit.db().source_trace.is_empty());

    set_r1_connections(&mut circuit, &[("pin2", ".R2 > .pin1")]);
    let r1 = circuit.tree().by_name("R1")[0];
    assert_eq!(circuit.tree().ports_of(r1).len(), 2);
    assert_eq!(circuit.db().source_port.len(), 4);
    assert_eq!(circuit.db().source_trace.len(), 1);
    assert_eq!(circuit.db().pcb_trace.len(), 1);
    assert_no_diagnostics(&circuit);

    // A second change rebuilds rather than adds.
    set_r1_connections(&mut circuit, &[("pin2", ".R2 > .pin1"), ("pin1", "net.GND")]);
    let r1 = circuit.tree().by_name("R1")[0];
    assert_eq!(circuit.tree().ports_of(r1).len(), 2);
    assert_eq!(circuit.db().source_port.len(), 4);
    assert_eq!(circuit.db().source_trace.len(), 2);
    assert_eq!(circuit.db().source_net.len(), 1);

    set_r1_connections(&mut circuit, &[]);
    let db = circuit.db();
    assert!(db.source_trace.is_empty());
    assert!(db.source_net.is_empty());
    assert!(db.pcb_trace.is_empty());
    assert!(db.pcb_via.is_empty());
    assert_eq!(db.source_port.len(), 4);
}

#[test]
fn every_node_finishes_every_phase() {
    let circuit = render(two_resistor_board());
    for node in circuit.tree().iter() {
        for phase in Phase::ALL {
            assert!(node.phase_done(phase), "{} stuck before {phase:?}", node.describe());
        }
    }
}

fn module(name: &str, x: f64) -> serde_json::Value {
    json!({
        "type": "group",
        "name": name,
        "isolated": true,
        "pcb_x": x,
        "children": [
            resistor("R1", -1.5, 0.0),
            resistor("R2", 1.5, 0.0),
            trace(".R1 > .pin2", ".R2 > .pin1"),
        ],
    })
}

#[test]
fn identical_isolated_groups_share_one_render() {
    let circuit = render(board(30.0, 20.0, vec![module("A", -6.0), module("B", 6.0)]));
    assert_eq!(circuit.cache().borrow().len(), 1);

    let db = circuit.db();
    assert_eq!(db.pcb_component.len(), 4);
    let traces = db.pcb_trace.list();
    assert_eq!(traces.len(), 2);
    assert_eq!(shape(&traces[0]), shape(&traces[1]));

    let dx = traces[1].start().unwrap().x - traces[0].start().unwrap().x;
    assert!((dx - 12.0).abs() < 1e-6, "copies are {dx} apart");
    assert!(errors_of_type(&circuit, ErrorType::PcbTraceError).is_empty());
}

#[test]
fn isolated_and_inline_groups_agree_on_geometry() {
    let isolated = render(board(20.0, 20.0, vec![module("A", 0.0)]));
    let mut inline = module("A", 0.0);
    inline["isolated"] = json!(false);
    let inline = render(board(20.0, 20.0, vec![inline]));

    let a = &isolated.db().pcb_trace.list()[0];
    let b = &inline.db().pcb_trace.list()[0];
    assert_eq!(shape(a), shape(b));
    assert!(a.start().unwrap().approx_eq(&b.start().unwrap(), 1e-6));
}

#[test]
fn unknown_footprint_is_reported_on_the_component() {
    let mut r1 = resistor("R1", 0.0, 0.0);
    r1["footprint"] = json!("qfn99");
    let circuit = render(board(10.0, 10.0, vec![r1]));
    let errors = errors_of_type(&circuit, ErrorType::PcbMissingFootprintError);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("qfn99"), "{}", errors[0].message);
}

#[test]
fn render_tree_wraps_output_and_diagnostics() {
    let description = serde_json::from_value(two_resistor_board()).unwrap();
    let result = picoplace_core::render_tree(description, Default::default());
    assert!(result.is_success());
    assert_eq!(result.output.map(|db| db.pcb_trace.len()), Some(1));
}

#[test]
fn malformed_tree_is_rejected() {
    let err = Circuit::from_json(json!({ "type": "board", "layers": "two" })).err().unwrap();
    assert!(err.is_fatal());
}
