//! # picoplace-core
//!
//! Compiles a declarative tree of board, group, component, net and trace
//! descriptions into a laid-out circuit document: electrical records,
//! physical placement and routing, schematic placement and wiring, and
//! design-rule diagnostics, all held in a [`CircuitDb`].
//!
//! ```ignore
//! let mut circuit = Circuit::from_json(tree_json)?;
//! circuit.render()?;
//! let doc = circuit.to_json()?;
//! ```
//!
//! Problems in the input never fail a render. They are stored as `error`
//! records next to the rest of the output; only broken invariants surface as
//! [`RenderError`].

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod drc;
pub mod footprint;
pub mod parts;
pub mod render;
pub mod routing;
pub mod selector;
pub mod tree;

use std::rc::Rc;

use log::info;
use picoplace_circuit::{CircuitDb, CircuitDbError, CircuitError, ErrorType};
use serde_json::Value;
use thiserror::Error;

pub use cache::SubcircuitCache;
pub use config::{RenderConfig, RoutingMode};
pub use footprint::{FootprintPrimitive, FootprintProvider, StaticFootprintProvider};
pub use parts::{NoopPartsProvider, PartsProvider, PartsQuery};
pub use picoplace_circuit as circuit;
pub use render::{Phase, RenderContext};
pub use selector::{Selector, SelectorError};
pub use tree::props::{ElementDescription, ElementProps};
pub use tree::{NodeId, Tree};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render did not settle after {passes} passes")]
    NotSettled { passes: usize },

    #[error("{0} is not attached to the tree")]
    DetachedNode(NodeId),

    #[error("invalid component tree: {0}")]
    InvalidTree(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] CircuitDbError),

    /// A hook failed for one node. The node is skipped for the rest of the
    /// run, everything else continues.
    #[error("{node}: {message}")]
    Node { node: NodeId, message: String },
}

impl RenderError {
    pub fn node(node: NodeId, message: impl Into<String>) -> Self {
        RenderError::Node {
            node,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::Node { .. })
    }
}

/// An output together with the diagnostics produced while computing it.
#[derive(Debug, Clone)]
pub struct WithDiagnostics<T> {
    pub diagnostics: Vec<CircuitError>,
    pub output: Option<T>,
}

impl<T> WithDiagnostics<T> {
    pub fn success(output: T, diagnostics: Vec<CircuitError>) -> Self {
        Self {
            diagnostics,
            output: Some(output),
        }
    }

    pub fn failure(diagnostics: Vec<CircuitError>) -> Self {
        Self {
            diagnostics,
            output: None,
        }
    }

    /// Return `true` if any diagnostic in the list represents an error.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(CircuitError::is_error)
    }

    /// Return `true` if rendering produced an output **and** did not emit
    /// any error-level diagnostics.
    pub fn is_success(&self) -> bool {
        self.output.is_some() && !self.has_errors()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WithDiagnostics<U> {
        match self.output {
            Some(output) => WithDiagnostics::success(f(output), self.diagnostics),
            None => WithDiagnostics::failure(self.diagnostics),
        }
    }
}

/// A component tree and everything rendered from it.
pub struct Circuit {
    ctx: RenderContext,
}

impl Circuit {
    /// A circuit with default configuration, the standard footprint set and no
    /// parts lookups.
    pub fn new(description: ElementDescription) -> Self {
        Self::nested(
            description,
            RenderConfig::default(),
            Rc::new(StaticFootprintProvider::standard()),
            Rc::new(NoopPartsProvider),
            cache::new_cache(),
        )
    }

    pub fn from_json(value: Value) -> Result<Self, RenderError> {
        Ok(Self::new(serde_json::from_value(value)?))
    }

    pub fn from_json_str(s: &str) -> Result<Self, RenderError> {
        Ok(Self::new(serde_json::from_str(s)?))
    }

    /// Shares `cache` with a parent run.
    pub(crate) fn nested(
        description: ElementDescription,
        config: RenderConfig,
        footprints: Rc<dyn FootprintProvider>,
        parts: Rc<dyn PartsProvider>,
        cache: SubcircuitCache,
    ) -> Self {
        let tree = Tree::build(&description);
        Self {
            ctx: RenderContext::new(tree, config, footprints, parts, cache),
        }
    }

    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.ctx.config = config;
        self
    }

    pub fn with_footprint_provider(mut self, provider: impl FootprintProvider + 'static) -> Self {
        self.ctx.footprints = Rc::new(provider);
        self
    }

    pub fn with_parts_provider(mut self, provider: impl PartsProvider + 'static) -> Self {
        self.ctx.parts = Rc::new(provider);
        self
    }

    pub fn with_cache(mut self, cache: SubcircuitCache) -> Self {
        self.ctx.cache = cache;
        self
    }

    /// Run phases until the tree settles. Rendering an already settled tree
    /// is a no-op.
    pub fn render(&mut self) -> Result<(), RenderError> {
        render::render_until_settled(&mut self.ctx)
    }

    pub fn db(&self) -> &CircuitDb {
        &self.ctx.db
    }

    pub fn tree(&self) -> &Tree {
        &self.ctx.tree
    }

    pub fn config(&self) -> &RenderConfig {
        &self.ctx.config
    }

    pub fn cache(&self) -> SubcircuitCache {
        self.ctx.cache.clone()
    }

    /// The rendered document as a flat array of records.
    pub fn to_json(&self) -> Result<Value, RenderError> {
        Ok(self.ctx.db.to_json()?)
    }

    pub fn diagnostics(&self) -> Vec<CircuitError> {
        self.ctx.db.error.iter().cloned().collect()
    }

    /// Resolve a selector from the root, e.g. `".R1 > .pin1"` or `"net.GND"`.
    pub fn find(&mut self, selector: &str) -> Result<NodeId, SelectorError> {
        let root = self.ctx.tree.root();
        self.ctx.selectors.resolve(&self.ctx.tree, root, selector)
    }

    /// Replace a node's props. The next [`Circuit::render`] rebuilds the
    /// node's ports and the traces its props declare, then re-runs every
    /// phase from source rendering on, removing the records and nodes of the
    /// previous run first.
    pub fn update_props(&mut self, id: NodeId, props: ElementProps) -> Result<(), RenderError> {
        let node = self.ctx.tree.node_mut(id)?;
        if node.props == props {
            return Ok(());
        }
        node.props = props;
        for phase in [Phase::QueueEffects, Phase::InitializePorts, Phase::CreateTracesFromProps] {
            node.mark_dirty(phase);
        }

        for id in self.ctx.tree.ids() {
            let node = self.ctx.tree.node_mut(id)?;
            for phase in Phase::SourceRender.and_later() {
                node.mark_dirty(phase);
            }
        }
        info!("props of {id} changed, re-rendering");
        Ok(())
    }
}

/// Render a tree in one go.
pub fn render_tree(description: ElementDescription, config: RenderConfig) -> WithDiagnostics<CircuitDb> {
    let mut circuit = Circuit::new(description).with_config(config);
    match circuit.render() {
        Ok(()) => {
            let diagnostics = circuit.diagnostics();
            WithDiagnostics::success(circuit.ctx.db, diagnostics)
        }
        Err(err) => {
            let mut diagnostics = circuit.diagnostics();
            diagnostics.push(CircuitError::new(ErrorType::UnknownError, err.to_string()));
            WithDiagnostics::failure(diagnostics)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoplace_circuit::Severity;

    #[test]
    fn with_diagnostics_reports_errors() {
        let warning = CircuitError::new(ErrorType::PcbTraceWarning, "empty net");
        let ok = WithDiagnostics::success(1, vec![warning.clone()]);
        assert!(ok.is_success());
        let error = CircuitError::new(ErrorType::PcbTraceError, "overlap");
        let bad = WithDiagnostics::success(1, vec![warning, error]).map(|n| n + 1);
        assert!(bad.has_errors());
        assert!(!bad.is_success());
        assert_eq!(bad.output, Some(2));
        assert_eq!(bad.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn node_errors_are_not_fatal() {
        let tree = Tree::build(&serde_json::from_value(serde_json::json!({ "type": "board" })).unwrap());
        assert!(!RenderError::node(tree.root(), "boom").is_fatal());
        assert!(RenderError::NotSettled { passes: 3 }.is_fatal());
    }
}
