//! Deferred work queued by nodes and drained by the scheduler between passes.
//!
//! Effects are plain task records. A node queues them during
//! [`Phase::QueueEffects`]; later hooks look their state up by name and wait
//! while they are pending. Re-queueing an effect with the same owner and name
//! is a no-op, which keeps the queue hook idempotent.

use std::rc::Rc;

use log::{debug, warn};
use picoplace_circuit::{CircuitElement, ErrorType};

use crate::cache::{module_root, structural_hash};
use crate::footprint::FootprintPrimitive;
use crate::parts::{PartsQuery, SupplierPartNumbers};
use crate::render::{HookOutcome, HookResult, Phase, RenderContext};
use crate::tree::props::{ElementDescription, ElementProps};
use crate::tree::NodeId;
use crate::{Circuit, RenderError};

#[derive(Debug, Clone)]
pub enum EffectKind {
    LoadFootprint { footprint: String },
    LookupParts(PartsQuery),
    RenderIsolated {
        hash: String,
        description: ElementDescription,
    },
}

#[derive(Debug, Clone)]
pub enum EffectOutput {
    Footprint(Vec<FootprintPrimitive>),
    Parts(Option<SupplierPartNumbers>),
    Isolated(Rc<Vec<CircuitElement>>),
}

#[derive(Debug, Clone)]
pub enum EffectState {
    Pending,
    Ready(EffectOutput),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Effect {
    pub name: String,
    pub owner: NodeId,
    pub kind: EffectKind,
    pub state: EffectState,
}

#[derive(Debug, Default)]
pub struct EffectQueue {
    effects: Vec<Effect>,
}

impl EffectQueue {
    /// Queue an effect unless `owner` already has one called `name`.
    pub fn queue(&mut self, owner: NodeId, name: impl Into<String>, kind: EffectKind) -> bool {
        let name = name.into();
        if self.get(owner, &name).is_some() {
            return false;
        }
        debug!("queued effect {name} for {owner}");
        self.effects.push(Effect {
            name,
            owner,
            kind,
            state: EffectState::Pending,
        });
        true
    }

    pub fn get(&self, owner: NodeId, name: &str) -> Option<&Effect> {
        self.effects
            .iter()
            .find(|e| e.owner == owner && e.name == name)
    }

    pub fn state(&self, owner: NodeId, name: &str) -> Option<&EffectState> {
        self.get(owner, name).map(|e| &e.state)
    }

    pub fn has_pending(&self) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e.state, EffectState::Pending))
    }

    /// Whether any of `owners` still has a pending effect.
    pub fn pending_for(&self, owners: &[NodeId]) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e.state, EffectState::Pending) && owners.contains(&e.owner))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter()
    }
}

pub fn footprint_effect_name(footprint: &str) -> String {
    format!("footprint:{footprint}")
}

pub const PARTS_EFFECT: &str = "parts:lookup";

pub fn isolated_effect_name(hash: &str) -> String {
    format!("isolated:{hash}")
}

/// Outcome of waiting on a footprint load.
pub enum FootprintStatus<'a> {
    None,
    Pending,
    Loaded(&'a [FootprintPrimitive]),
    Failed(&'a str),
}

pub fn footprint_status(ctx: &RenderContext, id: NodeId) -> FootprintStatus<'_> {
    let Some(footprint) = ctx.tree.props(id).and_then(ElementProps::footprint) else {
        return FootprintStatus::None;
    };
    match ctx.effects.state(id, &footprint_effect_name(footprint)) {
        None | Some(EffectState::Pending) => FootprintStatus::Pending,
        Some(EffectState::Ready(EffectOutput::Footprint(primitives))) => {
            FootprintStatus::Loaded(primitives)
        }
        Some(EffectState::Ready(_)) => FootprintStatus::None,
        Some(EffectState::Failed(reason)) => FootprintStatus::Failed(reason),
    }
}

pub(crate) fn queue_effects(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let props = ctx.tree.node(id)?.props.clone();

    if let Some(footprint) = props.footprint() {
        ctx.effects.queue(
            id,
            footprint_effect_name(footprint),
            EffectKind::LoadFootprint {
                footprint: footprint.to_string(),
            },
        );
    }

    if let Some(ftype) = props.ftype() {
        let query = PartsQuery {
            ftype: ftype.to_string(),
            name: props.name().unwrap_or_default().to_string(),
            value: props.value(),
            footprint: props.footprint().map(str::to_string),
            manufacturer_part_number: props.manufacturer_part_number().map(str::to_string),
        };
        ctx.effects.queue(id, PARTS_EFFECT, EffectKind::LookupParts(query));
    }

    if props.is_isolated() {
        let children = match &ctx.tree.node(id)?.state.module_description {
            Some(module) => module.children.clone(),
            None => ctx
                .tree
                .describe(id)
                .ok_or(RenderError::DetachedNode(id))?
                .children,
        };
        let description = ElementDescription::new(props.clone()).with_children(children);
        let hash = structural_hash(&description)
            .map_err(|err| RenderError::node(id, format!("failed to hash subtree: {err}")))?;
        let state = &mut ctx.tree.node_mut(id)?.state;
        state.module_description = Some(description.clone());
        state.module_hash = Some(hash.clone());
        ctx.effects.queue(
            id,
            isolated_effect_name(&hash),
            EffectKind::RenderIsolated { hash, description },
        );
    }

    Ok(HookOutcome::Done)
}

/// Run every pending effect to completion. Returns how many ran.
pub(crate) fn drain(ctx: &mut RenderContext) -> Result<usize, RenderError> {
    let pending: Vec<usize> = ctx
        .effects
        .effects
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e.state, EffectState::Pending))
        .map(|(i, _)| i)
        .collect();

    for &index in &pending {
        let effect = ctx.effects.effects[index].clone();
        let state = run_effect(ctx, &effect)?;
        match &state {
            EffectState::Ready(EffectOutput::Parts(Some(numbers))) => {
                apply_supplier_part_numbers(ctx, effect.owner, numbers);
            }
            EffectState::Failed(reason) => {
                warn!("effect {} for {} failed: {reason}", effect.name, effect.owner);
                if matches!(effect.kind, EffectKind::LookupParts(_)) {
                    report_parts_failure(ctx, effect.owner, reason)?;
                }
            }
            _ => {}
        }
        ctx.effects.effects[index].state = state;
    }

    Ok(pending.len())
}

fn run_effect(ctx: &RenderContext, effect: &Effect) -> Result<EffectState, RenderError> {
    Ok(match &effect.kind {
        EffectKind::LoadFootprint { footprint } => match ctx.footprints.load(footprint) {
            Ok(primitives) => EffectState::Ready(EffectOutput::Footprint(primitives)),
            Err(err) => EffectState::Failed(err.to_string()),
        },
        EffectKind::LookupParts(query) => match ctx.parts.lookup(query) {
            Ok(numbers) => EffectState::Ready(EffectOutput::Parts(numbers)),
            Err(err) => EffectState::Failed(format!("{err:#}")),
        },
        EffectKind::RenderIsolated { hash, description } => {
            let cached = ctx.cache.borrow().get(hash).cloned();
            if let Some(records) = cached {
                debug!("subcircuit cache hit for {hash}");
                return Ok(EffectState::Ready(EffectOutput::Isolated(records)));
            }
            debug!("subcircuit cache miss for {hash}, rendering in isolation");
            let mut nested = Circuit::nested(
                module_root(description),
                ctx.config.clone(),
                ctx.footprints.clone(),
                ctx.parts.clone(),
                ctx.cache.clone(),
            );
            match nested.render() {
                Ok(()) => {
                    let records = Rc::new(nested.db().to_elements());
                    ctx.cache.borrow_mut().insert(hash.clone(), records.clone());
                    EffectState::Ready(EffectOutput::Isolated(records))
                }
                Err(err) => EffectState::Failed(err.to_string()),
            }
        }
    })
}

fn apply_supplier_part_numbers(ctx: &mut RenderContext, owner: NodeId, numbers: &SupplierPartNumbers) {
    let Some(component_id) = ctx
        .tree
        .state(owner)
        .and_then(|s| s.source_component_id.clone())
    else {
        return;
    };
    ctx.db.source_component.update(&component_id, |c| {
        c.supplier_part_numbers = numbers.clone();
    });
}

fn report_parts_failure(ctx: &mut RenderContext, owner: NodeId, reason: &str) -> Result<(), RenderError> {
    let message = format!("parts lookup for {} failed: {reason}", ctx.tree.node(owner)?.describe());
    let error = ctx.node_error(owner, ErrorType::PartsLookupWarning, message);
    let key = ctx.db.insert(CircuitElement::Error(error));
    ctx.tree
        .node_mut(owner)?
        .record_inserted(Phase::QueueEffects, [key]);
    Ok(())
}

/// Supplier part numbers already looked up for `id`, if any.
pub fn supplier_part_numbers(ctx: &RenderContext, id: NodeId) -> Option<SupplierPartNumbers> {
    match ctx.effects.state(id, PARTS_EFFECT) {
        Some(EffectState::Ready(EffectOutput::Parts(numbers))) => numbers.clone(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_deduplicates_by_owner_and_name() {
        let mut queue = EffectQueue::default();
        let kind = EffectKind::LoadFootprint {
            footprint: "0402".into(),
        };
        let a = NodeId::from_raw(1);
        let b = NodeId::from_raw(2);
        assert!(queue.queue(a, footprint_effect_name("0402"), kind.clone()));
        assert!(!queue.queue(a, footprint_effect_name("0402"), kind.clone()));
        assert!(queue.queue(b, footprint_effect_name("0402"), kind));
        assert!(queue.has_pending());
        assert!(queue.pending_for(&[b]));
        assert!(!queue.pending_for(&[NodeId::from_raw(3)]));
    }
}
