mod common;

use common::*;
use insta::assert_snapshot;
use picoplace_core::circuit::ErrorType;
use picoplace_core::{Circuit, SelectorError};
use serde_json::json;

#[test]
fn port_selector_resolves_to_the_named_pin() {
    let mut circuit = render(two_resistor_board());
    let pin = circuit.find("R1 > port.pin1").unwrap();
    let tree = circuit.tree();
    assert_eq!(tree.get(pin).unwrap().name(), Some("pin1"));
    let owner = tree.parent(pin).unwrap();
    assert_eq!(tree.get(owner).unwrap().name(), Some("R1"));

    let alias = circuit.find(".R2 > .pin2").unwrap();
    assert_ne!(alias, pin);
}

#[test]
fn net_selector_finds_the_net() {
    let mut circuit = Circuit::from_json(board(
        10.0,
        10.0,
        vec![resistor("R1", 0.0, 0.0), json!({ "type": "net", "name": "VCC" })],
    ))
    .unwrap();
    let net = circuit.find("net.VCC").unwrap();
    assert_eq!(circuit.tree().get(net).unwrap().name(), Some("VCC"));
    assert!(matches!(circuit.find("net.GND"), Err(SelectorError::NetNotFound { .. })));
}

#[test]
fn typo_in_trace_lists_the_real_ports() {
    let circuit = render(board(
        20.0,
        20.0,
        vec![
            resistor("R1", -3.0, 0.0),
            resistor("R2", 3.0, 0.0),
            trace("R1 > port.pni1", ".R2 > .pin1"),
        ],
    ));
    let errors = errors_of_type(&circuit, ErrorType::SourceTraceNotConnectedError);
    assert_eq!(errors.len(), 1);
    assert_snapshot!(errors[0].message, @r#"could not find port for selector "R1 > port.pni1": resistor "R1" has ports pin1 (1, left), pin2 (2, right)"#);
    assert!(circuit.db().pcb_trace.is_empty());
}

#[test]
fn unresolved_trace_diagnostic_references_its_records() {
    let mut circuit = render(board(
        20.0,
        20.0,
        vec![
            resistor("R1", -3.0, 0.0),
            resistor("R2", 3.0, 0.0),
            trace("R1 > port.pni1", ".R2 > .pin1"),
        ],
    ));
    let pin = circuit.find(".R2 > .pin1").unwrap();
    let pin_id = circuit.tree().state(pin).unwrap().source_port_id.clone().unwrap();
    let board_group = circuit.tree().state(circuit.tree().root()).unwrap().source_group_id.clone();

    let errors = errors_of_type(&circuit, ErrorType::SourceTraceNotConnectedError);
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    let trace_id = error.source_trace_id.clone().expect("diagnostic names the trace");
    let record = circuit.db().source_trace.get(&trace_id).expect("trace record exists");
    assert_eq!(record.connected_source_port_ids, vec![pin_id.clone()]);
    assert_eq!(error.source_port_ids, vec![pin_id]);
    assert_eq!(error.subcircuit_id, board_group);
    assert!(error.subcircuit_id.is_some());
    assert!(circuit.db().pcb_trace.is_empty());
}

#[test]
fn too_few_endpoints_still_get_a_trace_record() {
    let circuit = render(board(
        20.0,
        20.0,
        vec![
            resistor("R1", -3.0, 0.0),
            json!({ "type": "trace", "path": [".R1 > .pin1"] }),
        ],
    ));
    let errors = errors_of_type(&circuit, ErrorType::SourceTraceMalformedError);
    assert_eq!(errors.len(), 1);
    let trace_id = errors[0].source_trace_id.as_deref().unwrap();
    assert!(circuit.db().source_trace.get(trace_id).is_some());
}

#[test]
fn malformed_selector_is_its_own_diagnostic() {
    let circuit = render(board(
        20.0,
        20.0,
        vec![resistor("R1", -3.0, 0.0), trace(" > .R1", ".R1 > .pin1")],
    ));
    assert_eq!(errors_of_type(&circuit, ErrorType::SourceTraceMalformedError).len(), 1);
}

#[test]
fn trace_to_a_pin_known_only_from_the_footprint_resolves_later() {
    let circuit = render(board(
        30.0,
        20.0,
        vec![
            trace(".R1 > .pin2", ".U1 > .pin3"),
            resistor("R1", -8.0, 0.0),
            json!({ "type": "chip", "name": "U1", "footprint": "soic8", "pcb_x": 6.0 }),
        ],
    ));
    assert!(errors_of_type(&circuit, ErrorType::SourceTraceNotConnectedError).is_empty());

    let db = circuit.db();
    let pin3 = db
        .source_port
        .iter()
        .find(|p| p.name == "pin3")
        .map(|p| p.source_port_id.clone())
        .expect("footprint pins become ports");
    let source_trace = &db.source_trace.list()[0];
    assert_eq!(source_trace.connected_source_port_ids.len(), 2);
    assert!(source_trace.connected_source_port_ids.contains(&pin3));
    assert_eq!(db.pcb_trace.len(), 1);
}
