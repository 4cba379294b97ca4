//! Render phase scheduler.
//!
//! Rendering runs a fixed list of [`Phase`]s over the tree, over and over,
//! until the tree settles. Within one pass every phase sweeps the whole tree
//! (parents first, or children first where containers are sized from their
//! children) before the next phase starts, so a phase never observes records a
//! later phase has yet to write.
//!
//! For a single node a phase runs only once the node's previous phase is done,
//! and only once its parent (parent-first phases) or all of its children
//! (children-first phases) are done with the same phase. A hook either
//! finishes or reports that it is waiting on something (a pending effect, a
//! selector that does not resolve yet). Waiting leaves the phase un-run.
//!
//! After each pass pending effects are drained. The scheduler keeps going while
//! effects ran, nodes are dirty, or waiting nodes are still making progress.
//! Once nothing moves one final pass runs in which hooks may no longer wait and
//! record diagnostics instead. A dirty phase is re-run by first removing every
//! record the node inserted in that phase.

pub mod context;
pub mod effects;
pub mod pcb;
pub mod schematic;
pub mod source;

use log::{debug, info, warn};
use picoplace_circuit::{CircuitElement, ElementKey, ErrorType};

use crate::routing;
use crate::tree::NodeId;
use crate::{drc, RenderError};
pub use context::RenderContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    QueueEffects,
    InitializePorts,
    CreateTracesFromProps,
    SourceRender,
    PortMatching,
    SourceTraceRender,
    SourceConnectivityMapKey,
    PcbComponentSizeCalculation,
    PcbLayout,
    PcbComponentRender,
    PcbPrimitiveRender,
    PcbTraceRender,
    PcbRouteNetIslands,
    PcbCopperPourRender,
    SchematicComponentRender,
    SchematicLayout,
    SchematicTraceRender,
    DesignRuleChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ParentFirst,
    ChildrenFirst,
}

impl Phase {
    pub const COUNT: usize = 18;

    pub const ALL: [Phase; Phase::COUNT] = [
        Phase::QueueEffects,
        Phase::InitializePorts,
        Phase::CreateTracesFromProps,
        Phase::SourceRender,
        Phase::PortMatching,
        Phase::SourceTraceRender,
        Phase::SourceConnectivityMapKey,
        Phase::PcbComponentSizeCalculation,
        Phase::PcbLayout,
        Phase::PcbComponentRender,
        Phase::PcbPrimitiveRender,
        Phase::PcbTraceRender,
        Phase::PcbRouteNetIslands,
        Phase::PcbCopperPourRender,
        Phase::SchematicComponentRender,
        Phase::SchematicLayout,
        Phase::SchematicTraceRender,
        Phase::DesignRuleChecks,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn previous(self) -> Option<Phase> {
        self.index().checked_sub(1).map(|i| Phase::ALL[i])
    }

    pub fn direction(self) -> Direction {
        match self {
            Phase::PcbComponentSizeCalculation | Phase::SchematicLayout => Direction::ChildrenFirst,
            _ => Direction::ParentFirst,
        }
    }

    /// Phases from `self` to the end of the list.
    pub fn and_later(self) -> impl Iterator<Item = Phase> {
        Phase::ALL.into_iter().skip(self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    NotStarted,
    Initialized,
    Dirty,
}

/// Result of a phase hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Done,
    /// A dependency is not ready; run the hook again on a later pass.
    Waiting(String),
}

pub type HookResult = Result<HookOutcome, RenderError>;

/// Shorthand for hooks that wait outside the final pass and otherwise give
/// up by returning `fallback()`.
pub(crate) fn wait_or(
    ctx: &mut RenderContext,
    reason: impl Into<String>,
    fallback: impl FnOnce(&mut RenderContext) -> HookResult,
) -> HookResult {
    if ctx.is_final_pass() {
        fallback(ctx)
    } else {
        Ok(HookOutcome::Waiting(reason.into()))
    }
}

enum Step {
    Skipped,
    Blocked,
    Waiting,
    Ran,
}

fn run_hook(ctx: &mut RenderContext, id: NodeId, phase: Phase) -> HookResult {
    match phase {
        Phase::QueueEffects => effects::queue_effects(ctx, id),
        Phase::InitializePorts => source::initialize_ports(ctx, id),
        Phase::CreateTracesFromProps => source::create_traces_from_props(ctx, id),
        Phase::SourceRender => source::render(ctx, id),
        Phase::PortMatching => pcb::match_ports(ctx, id),
        Phase::SourceTraceRender => source::render_trace(ctx, id),
        Phase::SourceConnectivityMapKey => source::assign_connectivity_keys(ctx, id),
        Phase::PcbComponentSizeCalculation => pcb::calculate_size(ctx, id),
        Phase::PcbLayout => pcb::layout(ctx, id),
        Phase::PcbComponentRender => pcb::render_component(ctx, id),
        Phase::PcbPrimitiveRender => pcb::render_primitives(ctx, id),
        Phase::PcbTraceRender => routing::pcb::render_trace(ctx, id),
        Phase::PcbRouteNetIslands => routing::islands::route_net_islands(ctx, id),
        Phase::PcbCopperPourRender => pcb::render_copper_pour(ctx, id),
        Phase::SchematicComponentRender => schematic::render_component(ctx, id),
        Phase::SchematicLayout => schematic::layout(ctx, id),
        Phase::SchematicTraceRender => routing::schematic::render_trace(ctx, id),
        Phase::DesignRuleChecks => drc::run(ctx, id),
    }
}

fn ready(ctx: &RenderContext, id: NodeId, phase: Phase) -> bool {
    let Some(node) = ctx.tree.get(id) else {
        return false;
    };
    if let Some(previous) = phase.previous() {
        if !node.phase_done(previous) {
            return false;
        }
    }
    match phase.direction() {
        Direction::ParentFirst => node
            .parent
            .and_then(|p| ctx.tree.get(p))
            .map_or(true, |p| p.phase_done(phase)),
        Direction::ChildrenFirst => node
            .children
            .iter()
            .filter_map(|c| ctx.tree.get(*c))
            .all(|c| c.phase_done(phase)),
    }
}

fn step(ctx: &mut RenderContext, id: NodeId, phase: Phase) -> Result<Step, RenderError> {
    let Some(node) = ctx.tree.get(id) else {
        return Ok(Step::Skipped);
    };
    let state = node.phase(phase);
    if node.aborted || state == PhaseState::Initialized {
        return Ok(Step::Skipped);
    }
    if !ready(ctx, id, phase) {
        return Ok(Step::Blocked);
    }

    if state == PhaseState::Dirty {
        let node = ctx.tree.node_mut(id)?;
        let stale = node.take_inserted(phase);
        let synthesized = node.take_synthesized(phase);
        debug!(
            "{phase:?}: re-running {id}, removing {} records and {} nodes",
            stale.len(),
            synthesized.len()
        );
        discard(ctx, stale, synthesized);
    }

    ctx.start_recording();
    let result = run_hook(ctx, id, phase);
    let (recorded, synthesized) = ctx.take_recorded();

    match result {
        Ok(HookOutcome::Done) => {
            let node = ctx.tree.node_mut(id)?;
            node.record_inserted(phase, recorded);
            node.record_synthesized(phase, synthesized);
            node.set_phase(phase, PhaseState::Initialized);
            Ok(Step::Ran)
        }
        Ok(HookOutcome::Waiting(reason)) => {
            discard(ctx, recorded, synthesized);
            debug!("{phase:?}: {id} waiting: {reason}");
            Ok(Step::Waiting)
        }
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            discard(ctx, recorded, synthesized);
            let description = ctx.tree.node(id)?.describe();
            warn!("{phase:?} failed for {description}: {err}");
            let error = ctx.node_error(
                id,
                ErrorType::UnknownError,
                format!("{phase:?} failed for {description}: {err}"),
            );
            let key = ctx.db.insert(CircuitElement::Error(error));
            let node = ctx.tree.node_mut(id)?;
            node.record_inserted(phase, [key]);
            node.set_phase(phase, PhaseState::Initialized);
            node.aborted = true;
            Ok(Step::Ran)
        }
    }
}

/// Drop records and synthesized nodes of a hook run, with the records those
/// nodes inserted.
fn discard(ctx: &mut RenderContext, mut keys: Vec<ElementKey>, synthesized: Vec<NodeId>) {
    for node in synthesized {
        keys.extend(ctx.tree.remove_subtree(node));
    }
    for key in &keys {
        ctx.db.remove(key);
    }
}

/// Run passes until the tree settles.
pub(crate) fn render_until_settled(ctx: &mut RenderContext) -> Result<(), RenderError> {
    let max_passes = ctx.config.layout.max_passes;
    ctx.set_final_pass(false);

    for pass in 1..=max_passes {
        let mut progress = false;
        let mut incomplete = false;

        for phase in Phase::ALL {
            let order = match phase.direction() {
                Direction::ParentFirst => ctx.tree.preorder(),
                Direction::ChildrenFirst => ctx.tree.postorder(),
            };
            for id in order {
                match step(ctx, id, phase)? {
                    Step::Ran => progress = true,
                    Step::Blocked | Step::Waiting => incomplete = true,
                    Step::Skipped => {}
                }
            }
        }

        let drained = effects::drain(ctx)?;
        let dirty = ctx.tree.iter().any(|node| {
            Phase::ALL
                .iter()
                .any(|p| node.phase(*p) == PhaseState::Dirty)
        });
        debug!(
            "pass {pass}: progress={progress} incomplete={incomplete} effects={drained} dirty={dirty}"
        );

        if drained > 0 || dirty || (incomplete && progress) {
            continue;
        }
        if incomplete && !ctx.is_final_pass() {
            ctx.set_final_pass(true);
            continue;
        }

        ctx.set_final_pass(false);
        info!(
            "render settled after {pass} passes, {} records, {} errors",
            ctx.db.len(),
            ctx.db.errors().count()
        );
        return Ok(());
    }

    Err(RenderError::NotSettled { passes: max_passes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_list_is_consistent() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
        assert_eq!(Phase::QueueEffects.previous(), None);
        assert_eq!(Phase::SourceRender.previous(), Some(Phase::CreateTracesFromProps));
        assert_eq!(Phase::PcbLayout.and_later().count(), 10);
    }

    #[test]
    fn size_phases_run_children_first() {
        assert_eq!(Phase::PcbComponentSizeCalculation.direction(), Direction::ChildrenFirst);
        assert_eq!(Phase::PcbLayout.direction(), Direction::ParentFirst);
    }
}
