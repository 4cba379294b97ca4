//! Structural hashing and the shared cache of isolated subcircuit renders.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use picoplace_circuit::CircuitElement;
use serde_json::Value;

use crate::tree::props::{ElementDescription, ElementProps, POSITIONAL_PROPS};

/// Structural hash -> records of the subtree rendered on its own.
///
/// Shared by a run and every nested run it starts.
pub type SubcircuitCache = Rc<RefCell<HashMap<String, Rc<Vec<CircuitElement>>>>>;

pub fn new_cache() -> SubcircuitCache {
    Rc::new(RefCell::new(HashMap::new()))
}

/// md5 over the subtree's declarative shape.
///
/// The root's positional props and name do not contribute, so two copies of
/// a module placed at different spots share an entry.
///
/// Placement of the children is part of the key on purpose. A cached entry
/// holds laid-out and routed records, so a module whose parts sit elsewhere
/// is a different render even when its parts and traces are the same.
/// Rendered-only state (synthesized ports, traces from `connections`,
/// stand-ins) never reaches the description and so never affects the key.
pub fn structural_hash(description: &ElementDescription) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(description)?;
    if let Value::Object(map) = &mut value {
        for prop in POSITIONAL_PROPS {
            map.remove(*prop);
        }
        map.remove("name");
        map.remove("layer");
    }
    // Object keys are sorted, so the string form is canonical.
    let canonical = serde_json::to_string(&value)?;
    Ok(format!("{:x}", md5::compute(canonical.as_bytes())))
}

/// Root of the nested run that renders an isolated group: a plain subcircuit
/// at the origin of its own frame.
pub fn module_root(description: &ElementDescription) -> ElementDescription {
    let mut root = description.clone();
    if let ElementProps::Group(group) = &mut root.props {
        group.isolated = false;
        group.subcircuit = true;
        group.placement = Default::default();
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(name: &str, x: f64, r_x: f64) -> ElementDescription {
        serde_json::from_value(json!({
            "type": "group",
            "name": name,
            "isolated": true,
            "pcb_x": x,
            "children": [
                { "type": "resistor", "name": "R1", "resistance": "1k", "footprint": "0402", "pcb_x": r_x }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn root_position_and_name_do_not_change_hash() {
        let a = structural_hash(&module("A", 0.0, 1.0)).unwrap();
        let b = structural_hash(&module("B", 12.5, 1.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn child_positions_change_hash() {
        let a = structural_hash(&module("A", 0.0, 1.0)).unwrap();
        let b = structural_hash(&module("A", 0.0, 2.0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rotating_a_child_changes_hash() {
        let a = module("A", 0.0, 1.0);
        let mut b = a.clone();
        if let ElementProps::Resistor(part) = &mut b.children[0].props {
            part.placement.pcb_rotation = Some(90.0);
        }
        assert_ne!(structural_hash(&a).unwrap(), structural_hash(&b).unwrap());
    }

    #[test]
    fn module_root_is_a_plain_subcircuit_at_origin() {
        let root = module_root(&module("A", 7.0, 1.0));
        let ElementProps::Group(group) = &root.props else {
            panic!("expected group");
        };
        assert!(group.subcircuit);
        assert!(!group.isolated);
        assert_eq!(group.placement.pcb_offset(), None);
        assert_eq!(root.children.len(), 1);
    }
}
