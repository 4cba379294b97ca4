mod common;

use common::*;
use picoplace_core::circuit::{ErrorType, LayerRef, PcbTrace, Point, RoutePoint, SchematicTrace};
use picoplace_core::{Circuit, RenderConfig};
use picoplace_engine::geometry::segment_to_rect_distance;
use serde_json::json;

/// Wires and vias alternate consistently: a via leaves from the layer of the
/// wire before it and arrives on the layer of the wire after it.
fn assert_continuous(trace: &PcbTrace) {
    for pair in trace.route.windows(2) {
        match (pair[0], pair[1]) {
            (RoutePoint::Wire { layer, .. }, RoutePoint::Via { from_layer, .. }) => {
                assert_eq!(layer, from_layer, "via leaves from another layer in {}", trace.pcb_trace_id)
            }
            (RoutePoint::Via { to_layer, .. }, RoutePoint::Wire { layer, .. }) => {
                assert_eq!(layer, to_layer, "via lands on another layer in {}", trace.pcb_trace_id)
            }
            (RoutePoint::Wire { layer: a, .. }, RoutePoint::Wire { layer: b, .. }) => {
                assert_eq!(a, b, "layer changes without a via in {}", trace.pcb_trace_id)
            }
            (RoutePoint::Via { .. }, RoutePoint::Via { .. }) => panic!("two vias in a row"),
        }
    }
}

#[test]
fn routed_trace_is_continuous_between_its_ports() {
    let circuit = render(two_resistor_board());
    let trace = &circuit.db().pcb_trace.list()[0];
    assert_continuous(trace);
    assert!(trace.route.len() >= 2);
}

fn blocked_board() -> serde_json::Value {
    board(
        24.0,
        16.0,
        vec![
            resistor("R1", -5.0, 0.0),
            resistor("R2", 5.0, 0.0),
            resistor("R3", 0.0, 0.0),
            trace(".R1 > .pin2", ".R2 > .pin1"),
        ],
    )
}

#[test]
fn route_goes_around_foreign_pads() {
    let circuit = render(blocked_board());
    let db = circuit.db();
    assert_eq!(db.pcb_trace.len(), 1);
    let trace = &db.pcb_trace.list()[0];
    assert_continuous(trace);

    let r3 = db
        .source_component
        .iter()
        .find(|c| c.name == "R3")
        .map(|c| c.source_component_id.clone())
        .unwrap();
    let r3 = db
        .pcb_component
        .iter()
        .find(|c| c.source_component_id == r3)
        .map(|c| c.pcb_component_id.clone())
        .unwrap();
    let pads: Vec<_> = db
        .pcb_smtpad
        .iter()
        .filter(|p| p.pcb_component_id.as_deref() == Some(r3.as_str()))
        .collect();
    assert_eq!(pads.len(), 2);

    for segment in trace.segments() {
        for pad in &pads {
            let gap = segment_to_rect_distance(segment.start, segment.end, &pad.bounds());
            assert!(
                gap > segment.width / 2.0,
                "segment {:?} -> {:?} touches {}",
                segment.start,
                segment.end,
                pad.pcb_smtpad_id
            );
        }
    }
    assert_no_diagnostics(&circuit);
}

#[test]
fn blocked_straight_line_is_reported_once() {
    let mut tree = blocked_board();
    tree["autorouter"] = json!("direct");
    let circuit = render(tree);

    assert!(circuit.db().pcb_trace.is_empty());
    let errors = errors_of_type(&circuit, ErrorType::PcbAutoroutingError);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert_eq!(errors[0].pcb_port_ids.len(), 2);
    assert!(errors[0].message.contains("R1.pin2"), "{}", errors[0].message);
    assert!(errors_of_type(&circuit, ErrorType::PcbPortNotConnectedError).is_empty());
}

#[test]
fn path_leaving_the_board_is_reported_once() {
    let circuit = render(board(
        20.0,
        20.0,
        vec![
            resistor("R1", -3.0, 0.0),
            resistor("R2", 3.0, 0.0),
            json!({
                "type": "trace",
                "from": ".R1 > .pin2",
                "to": ".R2 > .pin1",
                "pcb_path": [{ "x": 0.0, "y": 14.0 }],
            }),
        ],
    ));

    assert_eq!(circuit.db().pcb_trace.len(), 1);
    let errors = errors_of_type(&circuit, ErrorType::PcbTraceOutsideBoardError);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert_eq!(errors[0].pcb_trace_ids, vec![circuit.db().pcb_trace.list()[0].pcb_trace_id.clone()]);
}

#[test]
fn ports_on_one_net_are_joined() {
    let circuit = render(board(
        20.0,
        20.0,
        vec![
            resistor("R1", -3.0, 0.0),
            resistor("R2", 3.0, 0.0),
            json!({ "type": "net", "name": "GND" }),
            trace(".R1 > .pin1", "net.GND"),
            trace(".R2 > .pin2", "net.GND"),
        ],
    ));
    let db = circuit.db();
    assert!(!db.pcb_trace.is_empty());
    for trace in db.pcb_trace.iter() {
        assert_continuous(trace);
    }

    let r1 = port_position(&circuit, "R1", "pin1");
    let r2 = port_position(&circuit, "R2", "pin2");
    let ends: Vec<_> = db
        .pcb_trace
        .iter()
        .flat_map(|t| [t.start().unwrap(), t.end().unwrap()])
        .collect();
    assert!(ends.iter().any(|p| p.approx_eq(&r1, 1e-6)));
    assert!(ends.iter().any(|p| p.approx_eq(&r2, 1e-6)));
    assert_no_diagnostics(&circuit);
}

#[test]
fn crossing_manual_traces_give_one_overlap() {
    let circuit = render(board(
        20.0,
        20.0,
        vec![
            resistor("R1", -4.0, -2.0),
            resistor("R2", 4.0, 2.0),
            resistor("R3", -4.0, 2.0),
            resistor("R4", 4.0, -2.0),
            json!({ "type": "trace", "from": ".R1 > .pin2", "to": ".R2 > .pin1", "pcb_straight_line": true }),
            json!({ "type": "trace", "from": ".R3 > .pin2", "to": ".R4 > .pin1", "pcb_straight_line": true }),
        ],
    ));
    let db = circuit.db();
    assert_eq!(db.pcb_trace.len(), 2);

    let overlaps = errors_of_type(&circuit, ErrorType::PcbTraceError);
    assert_eq!(overlaps.len(), 1, "{overlaps:#?}");
    let ids: Vec<String> = db.pcb_trace.iter().map(|t| t.pcb_trace_id.clone()).collect();
    assert_eq!(overlaps[0].pcb_trace_ids, ids);
    let center = overlaps[0].center.unwrap();
    assert!(center.x.abs() < 4.0 && center.y.abs() < 2.0);
}

#[test]
fn schematic_wire_joins_the_diagram_ports() {
    let circuit = render(two_resistor_board());
    let db = circuit.db();
    let wired = db.schematic_trace.len();
    let labels = db.schematic_net_label.len();
    assert!(wired == 1 || labels == 2, "{wired} wires, {labels} labels");

    if let Some(trace) = db.schematic_trace.list().first() {
        assert!(!trace.edges.is_empty());
        let ports: Vec<_> = db.schematic_port.iter().map(|p| p.center).collect();
        let first = trace.edges.first().unwrap().from;
        let last = trace.edges.last().unwrap().to;
        assert!(ports.iter().any(|p| p.approx_eq(&first, 1e-6)));
        assert!(ports.iter().any(|p| p.approx_eq(&last, 1e-6)));
        for edge in &trace.edges {
            assert!(
                (edge.from.x - edge.to.x).abs() < 1e-6 || (edge.from.y - edge.to.y).abs() < 1e-6,
                "diagonal diagram wire {edge:?}"
            );
        }
    }
}

fn hinted_board(hints: serde_json::Value) -> serde_json::Value {
    board(
        24.0,
        16.0,
        vec![
            resistor("R1", -5.0, 0.0),
            resistor("R2", 5.0, 0.0),
            json!({
                "type": "trace",
                "from": ".R1 > .pin2",
                "to": ".R2 > .pin1",
                "pcb_route_hints": hints,
            }),
        ],
    )
}

#[test]
fn via_hints_take_the_route_through_the_bottom_layer() {
    let circuit = render(hinted_board(json!([
        { "x": -2.0, "y": 3.0, "via": true, "to_layer": "bottom" },
        { "x": 2.0, "y": 3.0, "via": true, "to_layer": "top" },
    ])));
    let db = circuit.db();
    assert_eq!(db.pcb_trace.len(), 1);
    let trace = &db.pcb_trace.list()[0];
    assert_continuous(trace);
    assert!(trace.segments().iter().any(|s| s.layer == LayerRef::Bottom));

    let vias: Vec<_> = db.pcb_via.iter().collect();
    assert_eq!(vias.len(), 2, "{vias:#?}");
    for via in &vias {
        assert_eq!(via.pcb_trace_id.as_deref(), Some(trace.pcb_trace_id.as_str()));
    }
    let dive = vias.iter().find(|v| v.to_layer == LayerRef::Bottom).unwrap();
    assert!(Point::new(dive.x, dive.y).approx_eq(&Point::new(-2.0, 3.0), 1e-6));
    let rise = vias.iter().find(|v| v.to_layer == LayerRef::Top).unwrap();
    assert!(Point::new(rise.x, rise.y).approx_eq(&Point::new(2.0, 3.0), 1e-6));

    let wire: f64 = trace.route.windows(2).map(|w| w[0].point().distance(&w[1].point())).sum();
    let length = trace.trace_length.unwrap();
    assert!((length - (wire + 2.0 * 1.6)).abs() < 1e-6, "{length} vs {wire}");
    assert_no_diagnostics(&circuit);
}

#[test]
fn via_hint_stranding_the_route_below_is_reported() {
    let circuit = render(hinted_board(json!([
        { "x": 0.0, "y": 3.0, "via": true, "to_layer": "bottom" },
    ])));
    let db = circuit.db();
    assert!(db.pcb_trace.is_empty(), "{:#?}", db.pcb_trace.list());
    assert!(db.pcb_via.is_empty());

    let errors = errors_of_type(&circuit, ErrorType::PcbAutoroutingError);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert!(errors[0].message.contains("layer"), "{}", errors[0].message);
    let source_trace = &db.source_trace.list()[0];
    assert_eq!(errors[0].source_trace_id.as_deref(), Some(source_trace.source_trace_id.as_str()));
}

#[test]
fn trace_joining_three_ports_is_rejected() {
    let circuit = render(board(
        24.0,
        16.0,
        vec![
            resistor("R1", -5.0, 0.0),
            resistor("R2", 0.0, 0.0),
            resistor("R3", 5.0, 0.0),
            json!({ "type": "trace", "path": [".R1 > .pin2", ".R2 > .pin1", ".R3 > .pin1"] }),
        ],
    ));
    let db = circuit.db();
    assert!(db.pcb_trace.is_empty());
    let source_trace = &db.source_trace.list()[0];
    assert_eq!(source_trace.connected_source_port_ids.len(), 3);

    let errors = errors_of_type(&circuit, ErrorType::PcbTraceError);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert!(errors[0].message.contains("joins 3 ports"), "{}", errors[0].message);
    assert_eq!(errors[0].source_trace_id.as_deref(), Some(source_trace.source_trace_id.as_str()));
}

#[test]
fn trace_mixing_ports_and_nets_is_rejected() {
    let circuit = render(board(
        24.0,
        16.0,
        vec![
            resistor("R1", -5.0, 0.0),
            resistor("R2", 5.0, 0.0),
            json!({ "type": "net", "name": "GND" }),
            json!({ "type": "trace", "path": [".R1 > .pin2", ".R2 > .pin1", "net.GND"] }),
        ],
    ));
    let db = circuit.db();
    assert!(db.pcb_trace.is_empty());

    let errors = errors_of_type(&circuit, ErrorType::PcbTraceError);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert!(errors[0].message.contains("mixes ports and nets"), "{}", errors[0].message);
    let source_trace = &db.source_trace.list()[0];
    assert_eq!(errors[0].source_trace_id.as_deref(), Some(source_trace.source_trace_id.as_str()));
}

/// A resistor at a fixed diagram position, turned a quarter when `upright`.
fn drawn_resistor(name: &str, pcb: (f64, f64), diagram: (f64, f64), upright: bool) -> serde_json::Value {
    let mut part = resistor(name, pcb.0, pcb.1);
    part["schematic_x"] = json!(diagram.0);
    part["schematic_y"] = json!(diagram.1);
    if upright {
        part["schematic_rotation"] = json!(90.0);
    }
    part
}

fn render_with(tree: serde_json::Value, config: RenderConfig) -> Circuit {
    let mut circuit = Circuit::from_json(tree).unwrap().with_config(config);
    circuit.render().unwrap();
    circuit
}

fn diagram_wire_of<'a>(circuit: &'a Circuit, from: &str) -> &'a SchematicTrace {
    let db = circuit.db();
    let source_port = db
        .source_port
        .iter()
        .find(|p| port_name_is(circuit, &p.source_port_id, from))
        .map(|p| p.source_port_id.clone())
        .unwrap();
    let source_trace = db
        .source_trace
        .iter()
        .find(|t| t.connected_source_port_ids.first() == Some(&source_port))
        .map(|t| t.source_trace_id.clone())
        .unwrap();
    db.schematic_trace
        .iter()
        .find(|t| t.source_trace_id.as_deref() == Some(source_trace.as_str()))
        .unwrap_or_else(|| panic!("no diagram wire from {from}"))
}

fn port_name_is(circuit: &Circuit, source_port_id: &str, name: &str) -> bool {
    let db = circuit.db();
    let Some(port) = db.source_port.get(source_port_id) else {
        return false;
    };
    let component = port
        .source_component_id
        .as_ref()
        .and_then(|c| db.source_component.get(c))
        .map(|c| c.name.as_str())
        .unwrap_or_default();
    format!("{component}.{}", port.name) == name
}

#[test]
fn box_component_wired_to_a_symbol_gets_labels() {
    let circuit = render(board(
        30.0,
        20.0,
        vec![
            resistor("R1", -8.0, 0.0),
            json!({ "type": "chip", "name": "U1", "footprint": "soic8", "pin_count": 8, "pcb_x": 6.0 }),
            trace(".R1 > .pin1", ".U1 > .pin1"),
        ],
    ));
    let db = circuit.db();
    assert!(db.schematic_trace.is_empty());
    let labels: Vec<_> = db.schematic_net_label.iter().collect();
    assert_eq!(labels.len(), 2, "{labels:#?}");
    assert_eq!(labels[0].text, "R1_pin1");
    assert_eq!(labels[1].text, labels[0].text);

    let ports: Vec<Point> = db.schematic_port.iter().map(|p| p.center).collect();
    for label in &labels {
        assert!(ports.iter().any(|p| p.approx_eq(&label.anchor_position, 1e-6)));
    }
}

#[test]
fn wire_with_too_many_bends_becomes_labels() {
    let mut config = RenderConfig::default();
    config.schematic.max_bends = 0;
    let circuit = render_with(
        board(
            20.0,
            20.0,
            vec![
                drawn_resistor("R1", (-3.0, 0.0), (0.0, 0.0), false),
                drawn_resistor("R2", (3.0, 0.0), (3.0, 2.0), false),
                trace(".R1 > .pin2", ".R2 > .pin1"),
            ],
        ),
        config,
    );
    let db = circuit.db();
    assert!(db.schematic_trace.is_empty());
    assert_eq!(db.schematic_net_label.len(), 2);
    assert_eq!(db.pcb_trace.len(), 1);
}

#[test]
fn wires_of_other_nets_hop_where_they_cross() {
    let mut config = RenderConfig::default();
    config.schematic.trace_crossings = true;
    let circuit = render_with(
        board(
            30.0,
            30.0,
            vec![
                drawn_resistor("R1", (-6.0, -6.0), (0.0, 0.0), false),
                drawn_resistor("R2", (6.0, -6.0), (4.0, 0.0), false),
                drawn_resistor("R3", (-6.0, 6.0), (2.0, -2.0), true),
                drawn_resistor("R4", (6.0, 6.0), (2.0, 2.0), true),
                trace(".R1 > .pin2", ".R2 > .pin1"),
                trace(".R3 > .pin2", ".R4 > .pin1"),
            ],
        ),
        config,
    );

    let first = diagram_wire_of(&circuit, "R1.pin2");
    assert_eq!(first.edges.len(), 1);
    assert!(first.edges.iter().all(|e| !e.is_crossing));

    let second = diagram_wire_of(&circuit, "R3.pin2");
    let hops: Vec<_> = second.edges.iter().filter(|e| e.is_crossing).collect();
    assert_eq!(hops.len(), 1, "{:#?}", second.edges);
    let center = hops[0].from.midpoint(&hops[0].to);
    assert!(center.approx_eq(&Point::new(2.0, 0.0), 1e-6), "hop at {center:?}");
    assert!(second.junctions.is_empty());
}

#[test]
fn same_net_wire_ending_on_another_gets_a_junction() {
    let circuit = render(board(
        30.0,
        30.0,
        vec![
            drawn_resistor("R1", (-6.0, -6.0), (0.0, 0.0), false),
            drawn_resistor("R2", (6.0, -6.0), (4.0, 0.0), false),
            drawn_resistor("R3", (0.0, 6.0), (2.0, -2.0), true),
            trace(".R1 > .pin2", ".R2 > .pin1"),
            trace(".R3 > .pin2", ".R1 > .pin2"),
        ],
    ));

    let branch = diagram_wire_of(&circuit, "R3.pin2");
    assert_eq!(branch.junctions.len(), 1, "{branch:#?}");
    assert!(branch.junctions[0].approx_eq(&Point::new(2.0, 0.0), 1e-6));
    assert!(branch.edges.iter().all(|e| !e.is_crossing));
}
