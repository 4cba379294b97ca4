#![allow(dead_code)]

use picoplace_core::circuit::{CircuitError, ErrorType, PcbTrace, Point};
use picoplace_core::Circuit;
use serde_json::{json, Value};

/// Render `tree` until it settles.
pub fn render(tree: Value) -> Circuit {
    let mut circuit = Circuit::from_json(tree).expect("tree should deserialize");
    circuit.render().expect("render should settle");
    circuit
}

pub fn resistor(name: &str, x: f64, y: f64) -> Value {
    json!({
        "type": "resistor",
        "name": name,
        "resistance": "1k",
        "footprint": "0402",
        "pcb_x": x,
        "pcb_y": y,
    })
}

pub fn trace(from: &str, to: &str) -> Value {
    json!({ "type": "trace", "from": from, "to": to })
}

pub fn board(width: f64, height: f64, children: Vec<Value>) -> Value {
    json!({
        "type": "board",
        "width": width,
        "height": height,
        "children": children,
    })
}

/// Two 0402 resistors side by side joined by one trace.
pub fn two_resistor_board() -> Value {
    board(
        20.0,
        20.0,
        vec![
            resistor("R1", -3.0, 0.0),
            resistor("R2", 3.0, 0.0),
            trace(".R1 > .pin2", ".R2 > .pin1"),
        ],
    )
}

pub fn errors_of_type(circuit: &Circuit, error_type: ErrorType) -> Vec<CircuitError> {
    circuit
        .db()
        .errors_of_type(error_type)
        .cloned()
        .collect()
}

/// Panics with every diagnostic listed when the render produced any.
pub fn assert_no_diagnostics(circuit: &Circuit) {
    let diagnostics = circuit.diagnostics();
    let listed: Vec<String> = diagnostics
        .iter()
        .map(|d| format!("{}: {}", d.error_type, d.message))
        .collect();
    assert!(diagnostics.is_empty(), "unexpected diagnostics:\n{}", listed.join("\n"));
}

/// Physical position of a port, looked up by `R1.pin1` style name.
pub fn port_position(circuit: &Circuit, component: &str, port: &str) -> Point {
    let db = circuit.db();
    let component_id = db
        .source_component
        .iter()
        .find(|c| c.name == component)
        .map(|c| c.source_component_id.clone())
        .unwrap_or_else(|| panic!("no component {component}"));
    let source_port = db
        .source_port
        .iter()
        .find(|p| p.source_component_id.as_deref() == Some(component_id.as_str()) && p.name == port)
        .unwrap_or_else(|| panic!("no port {component}.{port}"));
    db.pcb_port_for_source_port(&source_port.source_port_id)
        .unwrap_or_else(|| panic!("{component}.{port} has no physical port"))
        .center()
}

/// Route points relative to the first one.
pub fn shape(trace: &PcbTrace) -> Vec<(f64, f64)> {
    let Some(start) = trace.start() else {
        return Vec::new();
    };
    trace
        .route
        .iter()
        .map(|p| {
            let d = p.point() - start;
            ((d.x * 1e6).round() / 1e6, (d.y * 1e6).round() / 1e6)
        })
        .collect()
}
