use std::rc::Rc;

use picoplace_circuit::{CircuitDb, CircuitElement, CircuitError, ElementKey, ErrorType};
use picoplace_engine::{Autorouter, AutorouterKind};

use crate::cache::SubcircuitCache;
use crate::config::{RenderConfig, RoutingMode};
use crate::footprint::FootprintProvider;
use crate::parts::PartsProvider;
use crate::render::effects::EffectQueue;
use crate::render::Phase;
use crate::selector::SelectorCache;
use crate::tree::props::ElementProps;
use crate::tree::{NodeId, Tree};

/// Everything one render run owns. Threaded through every phase hook.
pub struct RenderContext {
    pub tree: Tree,
    pub db: CircuitDb,
    pub config: RenderConfig,
    pub effects: EffectQueue,
    pub cache: SubcircuitCache,
    pub footprints: Rc<dyn FootprintProvider>,
    pub parts: Rc<dyn PartsProvider>,
    pub selectors: SelectorCache,
    final_pass: bool,
    recorded: Vec<ElementKey>,
    synthesized: Vec<NodeId>,
}

impl RenderContext {
    pub fn new(
        tree: Tree,
        config: RenderConfig,
        footprints: Rc<dyn FootprintProvider>,
        parts: Rc<dyn PartsProvider>,
        cache: SubcircuitCache,
    ) -> Self {
        Self {
            tree,
            db: CircuitDb::new(),
            config,
            effects: EffectQueue::default(),
            cache,
            footprints,
            parts,
            selectors: SelectorCache::default(),
            final_pass: false,
            recorded: Vec::new(),
            synthesized: Vec::new(),
        }
    }

    /// Insert a record on behalf of the running hook. Returns its id.
    pub fn insert(&mut self, element: CircuitElement) -> String {
        let key = self.db.insert(element);
        let id = key.id.clone();
        self.recorded.push(key);
        id
    }

    pub fn insert_error(&mut self, error: CircuitError) -> String {
        log::debug!("{}: {}", error.error_type.as_str(), error.message);
        self.insert(CircuitElement::Error(error))
    }

    /// A diagnostic about `id`, referencing the records the node has written
    /// so far and its subcircuit.
    pub fn node_error(&self, id: NodeId, error_type: ErrorType, message: impl Into<String>) -> CircuitError {
        let mut error = CircuitError::new(error_type, message).with_subcircuit(self.subcircuit_id(id));
        let Some(state) = self.tree.state(id) else {
            return error;
        };
        if let Some(trace) = &state.source_trace_id {
            error = error.with_source_trace(trace.clone());
        }
        if let Some(component) = &state.source_component_id {
            error = error.with_source_component(component.clone());
        }
        error = error
            .with_source_ports(state.source_port_id.clone())
            .with_pcb_ports(state.pcb_port_id.clone())
            .with_pcb_components(state.pcb_component_id.clone())
            .with_pcb_traces(state.pcb_trace_ids.iter().cloned());
        if let Some(center) = state.pcb_center {
            error = error.with_center(center);
        }
        error
    }

    /// Track records the running hook splices in.
    pub fn record(&mut self, keys: impl IntoIterator<Item = ElementKey>) {
        self.recorded.extend(keys);
    }

    /// Add a node on behalf of the running hook. A re-run of the hook drops
    /// it again first.
    pub fn synthesize(&mut self, parent: NodeId, props: ElementProps, through: Phase) -> NodeId {
        let id = self.tree.add_synthesized_child(parent, props, through);
        self.synthesized.push(id);
        id
    }

    pub(crate) fn start_recording(&mut self) {
        self.recorded.clear();
        self.synthesized.clear();
    }

    pub(crate) fn take_recorded(&mut self) -> (Vec<ElementKey>, Vec<NodeId>) {
        (std::mem::take(&mut self.recorded), std::mem::take(&mut self.synthesized))
    }

    /// Hooks may not wait during the final pass.
    pub fn is_final_pass(&self) -> bool {
        self.final_pass
    }

    pub(crate) fn set_final_pass(&mut self, final_pass: bool) {
        self.final_pass = final_pass;
    }

    /// Subcircuit id of the records `id` writes.
    pub fn subcircuit_id(&self, id: NodeId) -> Option<String> {
        let scope = self.tree.subcircuit_of(id);
        let scope = if scope == id {
            self.tree.parent_subcircuit_of(id)
        } else {
            scope
        };
        let scope_node = self.tree.get(scope)?;
        if !scope_node.props.is_subcircuit() {
            return None;
        }
        scope_node.state.source_group_id.clone()
    }

    /// Autorouter configured for the subcircuit containing `id`.
    pub fn autorouter_kind(&self, id: NodeId) -> AutorouterKind {
        std::iter::once(id)
            .chain(self.tree.ancestors(id))
            .find_map(|n| self.tree.props(n).and_then(|p| p.autorouter()))
            .unwrap_or(self.config.routing.autorouter)
    }

    pub fn autorouter(&self, id: NodeId) -> Box<dyn Autorouter> {
        self.autorouter_kind(id).create(&self.config.routing.grid)
    }

    pub fn routing_mode(&self, id: NodeId) -> RoutingMode {
        std::iter::once(id)
            .chain(self.tree.ancestors(id))
            .find_map(|n| self.tree.props(n).and_then(|p| p.routing_mode()))
            .unwrap_or(self.config.routing.mode)
    }
}
