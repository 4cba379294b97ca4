//! Component tree arena.
//!
//! Nodes are addressed by [`NodeId`] and own their children by id. Each node
//! carries its declarative props, the per-phase lifecycle the scheduler drives,
//! the records it inserted per phase, and [`NodeState`], the render outputs
//! later phases and other nodes read (record ids, positions, resolved
//! endpoints).

pub mod port;
pub mod props;

use std::collections::HashMap;

use derive_more::Display;
use picoplace_circuit::{ElementKey, Point, Size};

use crate::footprint::FootprintPrimitive;
use crate::render::{Phase, PhaseState};
use crate::RenderError;
use props::{ElementDescription, ElementProps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("node#{_0}")]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(index: usize) -> Self {
        NodeId(index)
    }
}

/// Progress of a trace through routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceStatus {
    #[default]
    Unresolved,
    PortsResolved,
    PhysicallyRouted,
    DiagramRouted,
    LabelFallback,
    Unroutable,
}

/// Resolved endpoints of a trace, in selector order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceEndpoints {
    pub ports: Vec<NodeId>,
    pub nets: Vec<NodeId>,
}

/// Render outputs of a node.
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub source_component_id: Option<String>,
    pub source_port_id: Option<String>,
    pub source_net_id: Option<String>,
    pub source_group_id: Option<String>,
    pub source_trace_id: Option<String>,
    /// Subcircuit the node's records belong to.
    pub subcircuit_id: Option<String>,

    /// Footprint primitives once loaded.
    pub footprint: Option<Vec<FootprintPrimitive>>,
    /// Index into the parent's footprint of the primitive a port sits on.
    pub matched_primitive: Option<usize>,
    /// Records inserted per footprint primitive.
    pub primitive_keys: Vec<Option<ElementKey>>,

    pub pcb_size: Option<Size>,
    /// Absolute physical center.
    pub pcb_center: Option<Point>,
    /// Child centers relative to this node's center.
    pub pcb_child_offsets: HashMap<NodeId, Point>,
    pub pcb_board_id: Option<String>,
    pub pcb_group_id: Option<String>,
    pub pcb_component_id: Option<String>,
    pub pcb_port_id: Option<String>,
    pub pcb_trace_ids: Vec<String>,

    pub schematic_size: Option<Size>,
    pub schematic_component_id: Option<String>,
    pub schematic_port_id: Option<String>,
    pub schematic_trace_id: Option<String>,
    pub schematic_net_label_ids: Vec<String>,

    /// Declarative subtree of an isolated group, kept after its children are
    /// replaced by stand-ins.
    pub module_description: Option<ElementDescription>,
    pub module_hash: Option<String>,
    /// Records spliced in from an isolated render.
    pub spliced: Vec<ElementKey>,
    pub applied_pcb_offset: Point,
    pub applied_schematic_offset: Point,

    pub endpoints: Option<TraceEndpoints>,
    pub trace_status: TraceStatus,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub props: ElementProps,
    pub state: NodeState,
    phases: [PhaseState; Phase::COUNT],
    inserted: Vec<Vec<ElementKey>>,
    /// Nodes a phase hook of this node added to the tree, per phase.
    synthesized: Vec<Vec<NodeId>>,
    /// Added during rendering rather than declared.
    pub synthetic: bool,
    /// A hook failed; the remaining phases are skipped for this run.
    pub aborted: bool,
}

impl Node {
    fn new(id: NodeId, parent: Option<NodeId>, props: ElementProps) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            props,
            state: NodeState::default(),
            phases: [PhaseState::NotStarted; Phase::COUNT],
            inserted: vec![Vec::new(); Phase::COUNT],
            synthesized: vec![Vec::new(); Phase::COUNT],
            synthetic: false,
            aborted: false,
        }
    }

    pub fn phase(&self, phase: Phase) -> PhaseState {
        self.phases[phase.index()]
    }

    pub fn set_phase(&mut self, phase: Phase, state: PhaseState) {
        self.phases[phase.index()] = state;
    }

    /// Whether `phase` no longer blocks later phases.
    pub fn phase_done(&self, phase: Phase) -> bool {
        self.aborted || self.phase(phase) == PhaseState::Initialized
    }

    pub fn mark_dirty(&mut self, phase: Phase) {
        if self.phase(phase) == PhaseState::Initialized {
            self.set_phase(phase, PhaseState::Dirty);
        }
    }

    pub fn inserted(&self, phase: Phase) -> &[ElementKey] {
        &self.inserted[phase.index()]
    }

    pub(crate) fn take_inserted(&mut self, phase: Phase) -> Vec<ElementKey> {
        std::mem::take(&mut self.inserted[phase.index()])
    }

    pub(crate) fn record_inserted(&mut self, phase: Phase, keys: impl IntoIterator<Item = ElementKey>) {
        self.inserted[phase.index()].extend(keys);
    }

    pub(crate) fn take_synthesized(&mut self, phase: Phase) -> Vec<NodeId> {
        std::mem::take(&mut self.synthesized[phase.index()])
    }

    pub(crate) fn record_synthesized(&mut self, phase: Phase, ids: impl IntoIterator<Item = NodeId>) {
        self.synthesized[phase.index()].extend(ids);
    }

    pub fn name(&self) -> Option<&str> {
        self.props.name()
    }

    /// Label used in diagnostics, e.g. `resistor "R1"`.
    pub fn describe(&self) -> String {
        match self.name() {
            Some(name) => format!("{} \"{}\"", self.props.kind_name(), name),
            None => format!("{} {}", self.props.kind_name(), self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    /// Name or port alias -> nodes, in insertion order.
    names: HashMap<String, Vec<NodeId>>,
}

impl Tree {
    pub fn build(description: &ElementDescription) -> Self {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: NodeId(0),
            names: HashMap::new(),
        };
        let root = tree.push(None, description.props.clone());
        tree.root = root;
        tree.build_children(root, &description.children);
        tree
    }

    fn build_children(&mut self, parent: NodeId, children: &[ElementDescription]) {
        for child in children {
            let id = self.add_child(parent, child.props.clone());
            self.build_children(id, &child.children);
        }
    }

    fn push(&mut self, parent: Option<NodeId>, props: ElementProps) -> NodeId {
        let id = NodeId(self.nodes.len());
        let node = Node::new(id, parent, props);
        self.index(&node);
        self.nodes.push(Some(node));
        id
    }

    fn index(&mut self, node: &Node) {
        let mut keys: Vec<String> = node.name().map(str::to_string).into_iter().collect();
        if let ElementProps::Port(port) = &node.props {
            keys.extend(port.aliases.iter().cloned());
        }
        keys.sort();
        keys.dedup();
        for key in keys {
            self.names.entry(key).or_default().push(node.id);
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Like [`Tree::get`], but a missing node is an invariant violation.
    pub fn node(&self, id: NodeId) -> Result<&Node, RenderError> {
        self.get(id).ok_or(RenderError::DetachedNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, RenderError> {
        self.get_mut(id).ok_or(RenderError::DetachedNode(id))
    }

    pub fn add_child(&mut self, parent: NodeId, props: ElementProps) -> NodeId {
        let id = self.push(Some(parent), props);
        if let Some(p) = self.get_mut(parent) {
            p.children.push(id);
        }
        id
    }

    /// Add a node whose phases up to and including `through` need no work.
    pub fn add_synthesized_child(&mut self, parent: NodeId, props: ElementProps, through: Phase) -> NodeId {
        let id = self.add_child(parent, props);
        if let Some(node) = self.get_mut(id) {
            node.synthetic = true;
            for phase in Phase::ALL.iter().take_while(|p| **p <= through) {
                node.set_phase(*phase, PhaseState::Initialized);
            }
        }
        id
    }

    /// Detach and drop every child of `id` and their subtrees.
    pub fn remove_children(&mut self, id: NodeId) {
        let children = match self.get_mut(id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        for child in children {
            for removed in self.preorder_from(child) {
                self.nodes[removed.0] = None;
            }
        }
        self.drop_stale_names();
    }

    /// Detach `id` and drop it with its subtree and every node those nodes
    /// synthesized. Returns the records the dropped nodes inserted.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<ElementKey> {
        if let Some(parent) = self.parent(id).and_then(|p| self.get_mut(p)) {
            parent.children.retain(|c| *c != id);
        }
        let mut keys = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            for removed in self.preorder_from(next) {
                if let Some(node) = self.nodes[removed.0].take() {
                    keys.extend(node.inserted.into_iter().flatten());
                    pending.extend(node.synthesized.into_iter().flatten());
                }
            }
        }
        self.drop_stale_names();
        keys
    }

    fn drop_stale_names(&mut self) {
        for ids in self.names.values_mut() {
            ids.retain(|n| self.nodes.get(n.0).is_some_and(Option::is_some));
        }
        self.names.retain(|_, ids| !ids.is_empty());
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn props(&self, id: NodeId) -> Option<&ElementProps> {
        self.get(id).map(|n| &n.props)
    }

    pub fn state(&self, id: NodeId) -> Option<&NodeState> {
        self.get(id).map(|n| &n.state)
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root)
    }

    pub fn preorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if self.get(id).is_none() {
                continue;
            }
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    pub fn postorder(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.postorder_into(self.root, &mut out);
        out
    }

    fn postorder_into(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            self.postorder_into(*child, out);
        }
        if self.get(id).is_some() {
            out.push(id);
        }
    }

    /// Strict descendants of `id`, in tree order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut all = self.preorder_from(id);
        all.remove(0);
        all
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |n| self.parent(*n))
    }

    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        id == ancestor || self.ancestors(id).any(|a| a == ancestor)
    }

    /// Nearest subcircuit container at or above `id`, else the root.
    pub fn subcircuit_of(&self, id: NodeId) -> NodeId {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|n| self.props(*n).is_some_and(ElementProps::is_subcircuit))
            .unwrap_or(self.root)
    }

    /// Nearest subcircuit strictly above `id`.
    pub fn parent_subcircuit_of(&self, id: NodeId) -> NodeId {
        match self.parent(id) {
            Some(parent) => self.subcircuit_of(parent),
            None => self.root,
        }
    }

    /// Nearest board at or above `id`.
    pub fn board_of(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|n| matches!(self.props(*n), Some(ElementProps::Board(_))))
    }

    /// Child indices from the root; comparing keys compares tree order.
    pub fn order_key(&self, id: NodeId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            let index = self
                .children(parent)
                .iter()
                .position(|c| *c == current)
                .unwrap_or(usize::MAX);
            path.push(index);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Nodes indexed under `name` (node names and port aliases).
    pub fn by_name(&self, name: &str) -> &[NodeId] {
        self.names.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().map(|n| n.id).collect()
    }

    /// Ports owned by a component.
    pub fn ports_of(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| matches!(self.props(*c), Some(ElementProps::Port(_))))
            .collect()
    }

    /// Rebuild the declarative description of a subtree. Synthesized ports,
    /// traces, nets and stand-ins are left out.
    pub fn describe(&self, id: NodeId) -> Option<ElementDescription> {
        let node = self.get(id)?;
        if node.synthetic {
            return None;
        }
        Some(ElementDescription {
            props: node.props.clone(),
            children: node
                .children
                .iter()
                .filter_map(|c| self.describe(*c))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::props::{PortProps, TraceProps};
    use picoplace_circuit::ElementKind;
    use serde_json::json;

    fn tree() -> Tree {
        let desc: ElementDescription = serde_json::from_value(json!({
            "type": "board",
            "children": [
                { "type": "group", "name": "G", "subcircuit": true, "children": [
                    { "type": "resistor", "name": "R1" }
                ]},
                { "type": "resistor", "name": "R2" }
            ]
        }))
        .unwrap();
        Tree::build(&desc)
    }

    #[test]
    fn traversal_orders() {
        let tree = tree();
        let names = |ids: Vec<NodeId>| {
            ids.into_iter()
                .map(|id| tree.get(id).unwrap().props.name().unwrap_or("-").to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(tree.preorder()), vec!["-", "G", "R1", "R2"]);
        assert_eq!(names(tree.postorder()), vec!["R1", "G", "R2", "-"]);
    }

    #[test]
    fn subcircuit_and_order_keys() {
        let tree = tree();
        let r1 = tree.by_name("R1")[0];
        let r2 = tree.by_name("R2")[0];
        let g = tree.by_name("G")[0];
        assert_eq!(tree.subcircuit_of(r1), g);
        assert_eq!(tree.subcircuit_of(r2), tree.root());
        assert!(tree.order_key(r1) < tree.order_key(r2));
    }

    #[test]
    fn port_aliases_are_indexed_and_removed_with_subtree() {
        let mut tree = tree();
        let r1 = tree.by_name("R1")[0];
        tree.add_child(r1, ElementProps::Port(PortProps::new("pin1", Some(1), vec!["left".into()])));
        assert_eq!(tree.by_name("left").len(), 1);

        let g = tree.by_name("G")[0];
        tree.remove_children(g);
        assert!(tree.by_name("left").is_empty());
        assert!(tree.by_name("R1").is_empty());
        assert!(tree.get(r1).is_none());
    }

    #[test]
    fn describe_skips_synthesized_nodes() {
        let mut tree = tree();
        let r2 = tree.by_name("R2")[0];
        tree.add_synthesized_child(
            r2,
            ElementProps::Port(PortProps::new("pin1", Some(1), vec![])),
            Phase::InitializePorts,
        );
        tree.add_synthesized_child(
            tree.root(),
            ElementProps::Trace(TraceProps::between(".R2 > .pin1", "net.GND")),
            Phase::CreateTracesFromProps,
        );
        let desc = tree.describe(tree.root()).unwrap();
        assert_eq!(desc.children.len(), 2);
        assert!(desc.children[1].children.is_empty());
    }

    #[test]
    fn removed_subtree_takes_its_synthesized_nodes_and_records() {
        let mut tree = tree();
        let r2 = tree.by_name("R2")[0];
        let port = tree.add_synthesized_child(
            r2,
            ElementProps::Port(PortProps::new("pin1", Some(1), vec!["anode".into()])),
            Phase::InitializePorts,
        );
        let key = ElementKey {
            kind: ElementKind::SourcePort,
            id: "source_port_0".into(),
        };
        tree.get_mut(port).unwrap().record_inserted(Phase::SourceRender, [key.clone()]);
        let trace = tree.add_synthesized_child(
            tree.root(),
            ElementProps::Trace(TraceProps::between(".R2 > .pin1", "net.GND")),
            Phase::CreateTracesFromProps,
        );
        tree.get_mut(port).unwrap().record_synthesized(Phase::CreateTracesFromProps, [trace]);

        assert_eq!(tree.remove_subtree(port), vec![key]);
        assert!(tree.get(port).is_none());
        assert!(tree.get(trace).is_none());
        assert!(tree.ports_of(r2).is_empty());
        assert!(tree.by_name("anode").is_empty());
        assert_eq!(tree.children(tree.root()).len(), 2);
    }
}
