//! Electrical ("source") records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{impl_record, ElementKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceComponent {
    pub source_component_id: String,
    /// Functional type, e.g. `simple_resistor`.
    pub ftype: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_part_number: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub supplier_part_numbers: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl SourceComponent {
    pub fn new(ftype: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_component_id: String::new(),
            ftype: ftype.into(),
            name: name.into(),
            value: None,
            footprint: None,
            manufacturer_part_number: None,
            supplier_part_numbers: BTreeMap::new(),
            source_group_id: None,
            subcircuit_id: None,
        }
    }
}

impl_record!(SourceComponent, ElementKind::SourceComponent, source_component_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePort {
    pub source_port_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_number: Option<u32>,
    #[serde(default)]
    pub port_hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_component_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_connectivity_map_key: Option<String>,
}

impl SourcePort {
    pub fn new(name: impl Into<String>, pin_number: Option<u32>) -> Self {
        Self {
            source_port_id: String::new(),
            name: name.into(),
            pin_number,
            port_hints: Vec::new(),
            source_component_id: None,
            subcircuit_id: None,
            subcircuit_connectivity_map_key: None,
        }
    }
}

impl_record!(SourcePort, ElementKind::SourcePort, source_port_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNet {
    pub source_net_id: String,
    pub name: String,
    #[serde(default)]
    pub is_power: bool,
    #[serde(default)]
    pub is_ground: bool,
    #[serde(default)]
    pub member_source_group_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_connectivity_map_key: Option<String>,
}

impl SourceNet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            source_net_id: String::new(),
            name: name.into(),
            is_power: false,
            is_ground: false,
            member_source_group_ids: Vec::new(),
            subcircuit_id: None,
            subcircuit_connectivity_map_key: None,
        }
    }
}

impl_record!(SourceNet, ElementKind::SourceNet, source_net_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTrace {
    pub source_trace_id: String,
    #[serde(default)]
    pub connected_source_port_ids: Vec<String>,
    #[serde(default)]
    pub connected_source_net_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_connectivity_map_key: Option<String>,
}

impl SourceTrace {
    pub fn new(port_ids: Vec<String>, net_ids: Vec<String>) -> Self {
        Self {
            source_trace_id: String::new(),
            connected_source_port_ids: port_ids,
            connected_source_net_ids: net_ids,
            max_length: None,
            display_name: None,
            subcircuit_id: None,
            subcircuit_connectivity_map_key: None,
        }
    }

    /// Whether this trace joins exactly the given ports and nets, in any order.
    pub fn connects_same(&self, port_ids: &[String], net_ids: &[String]) -> bool {
        fn same(a: &[String], b: &[String]) -> bool {
            let mut a = a.to_vec();
            let mut b = b.to_vec();
            a.sort();
            a.dedup();
            b.sort();
            b.dedup();
            a == b
        }
        same(&self.connected_source_port_ids, port_ids)
            && same(&self.connected_source_net_ids, net_ids)
    }
}

impl_record!(SourceTrace, ElementKind::SourceTrace, source_trace_id);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub source_group_id: String,
    pub name: String,
    #[serde(default)]
    pub is_subcircuit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_source_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcircuit_id: Option<String>,
}

impl SourceGroup {
    pub fn new(name: impl Into<String>, is_subcircuit: bool) -> Self {
        Self {
            source_group_id: String::new(),
            name: name.into(),
            is_subcircuit,
            parent_source_group_id: None,
            subcircuit_id: None,
        }
    }
}

impl_record!(SourceGroup, ElementKind::SourceGroup, source_group_id);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connects_same_ignores_order() {
        let trace = SourceTrace::new(
            vec!["source_port_1".into(), "source_port_0".into()],
            vec![],
        );
        assert!(trace.connects_same(&["source_port_0".into(), "source_port_1".into()], &[]));
        assert!(!trace.connects_same(&["source_port_0".into()], &[]));
    }
}
