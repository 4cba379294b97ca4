//! Diagram phases.
//!
//! Components and their ports are written at the origin of their own frame.
//! Containers then lay their children out children-first, moving each
//! child's records by the child's offset, so a record ends up translated by
//! the sum of the offsets of its ancestors.

use std::collections::HashMap;

use log::debug;
use picoplace_circuit::{
    Bounds, CircuitElement, ElementKey, ElementKind, Point, SchematicComponent, SchematicPort, Size,
};
use picoplace_engine::placer;

use crate::render::{HookOutcome, HookResult, Phase, RenderContext};
use crate::routing::labels::net_label;
use crate::tree::port::{rotate_facing, symbol_layout};
use crate::tree::props::ElementProps;
use crate::tree::NodeId;

fn is_schematic_kind(kind: ElementKind) -> bool {
    matches!(
        kind,
        ElementKind::SchematicComponent
            | ElementKind::SchematicPort
            | ElementKind::SchematicTrace
            | ElementKind::SchematicNetLabel
    )
}

pub(crate) fn render_component(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    let props = node.props.clone();

    match &props {
        ElementProps::Group(_) if props.is_isolated() => {
            // Back to the module frame; layout moves the records again.
            let back = Point::ORIGIN - node.state.applied_schematic_offset;
            let keys: Vec<ElementKey> = node
                .state
                .spliced
                .iter()
                .filter(|k| is_schematic_kind(k.kind))
                .cloned()
                .collect();
            for key in &keys {
                ctx.db.translate(key, Point::ORIGIN, back);
            }
            let bounds = keys.iter().filter_map(|k| schematic_bounds(ctx, k)).reduce(|a, b| a.union(&b));
            let state = &mut ctx.tree.node_mut(id)?.state;
            state.applied_schematic_offset = Point::ORIGIN;
            state.schematic_size = Some(bounds.map_or(Size::default(), symmetric_size));
        }
        ElementProps::NetLabel(label) => {
            let net_id = ctx
                .selectors
                .resolve(&ctx.tree, id, &format!("net.{}", label.net))
                .ok()
                .and_then(|n| ctx.tree.state(n))
                .and_then(|s| s.source_net_id.clone());
            let facing = label
                .anchor_side
                .map(|side| side.opposite())
                .unwrap_or(picoplace_circuit::FacingDirection::Right);
            let record = net_label(&label.net, Point::ORIGIN, facing, net_id, None, ctx.subcircuit_id(id));
            let size = Size::new(record.bounds().width(), record.bounds().height());
            let label_id = ctx.insert(CircuitElement::SchematicNetLabel(record));
            let state = &mut ctx.tree.node_mut(id)?.state;
            state.schematic_net_label_ids = vec![label_id];
            state.schematic_size = Some(size);
        }
        _ if props.has_diagram_symbol() => render_symbol(ctx, id, &props)?,
        _ => {}
    }
    Ok(HookOutcome::Done)
}

fn render_symbol(ctx: &mut RenderContext, id: NodeId, props: &ElementProps) -> Result<(), crate::RenderError> {
    let node = ctx.tree.node(id)?;
    let Some(source_component_id) = node.state.source_component_id.clone() else {
        return Ok(());
    };
    let subcircuit_id = node.state.subcircuit_id.clone();
    let ports = ctx.tree.ports_of(id);
    let layout = symbol_layout(props, ports.len());
    let degrees = props
        .placement()
        .and_then(|p| p.schematic_rotation)
        .unwrap_or(0.0);
    let quarter = (degrees / 90.0).round().rem_euclid(2.0) == 1.0;
    let size = if quarter {
        Size::new(layout.size.height, layout.size.width)
    } else {
        layout.size
    };

    let component_id = ctx.insert(CircuitElement::SchematicComponent(SchematicComponent {
        schematic_component_id: String::new(),
        source_component_id,
        center: Point::ORIGIN,
        size,
        rotation: degrees,
        symbol_name: layout.symbol_name.clone(),
        is_box_with_pins: layout.is_box_with_pins,
        subcircuit_id,
    }));

    for (port, (offset, facing)) in ports.iter().zip(layout.pins.iter()) {
        let state = &ctx.tree.node(*port)?.state;
        let Some(source_port_id) = state.source_port_id.clone() else {
            continue;
        };
        let pin_number = match ctx.tree.props(*port) {
            Some(ElementProps::Port(p)) => p.pin_number,
            _ => None,
        };
        let port_id = ctx.insert(CircuitElement::SchematicPort(SchematicPort {
            schematic_port_id: String::new(),
            source_port_id,
            center: offset.rotate(degrees),
            facing_direction: rotate_facing(*facing, degrees),
            schematic_component_id: Some(component_id.clone()),
            pin_number,
        }));
        ctx.tree.node_mut(*port)?.state.schematic_port_id = Some(port_id);
    }

    let state = &mut ctx.tree.node_mut(id)?.state;
    state.schematic_component_id = Some(component_id);
    state.schematic_size = Some(size);
    Ok(())
}

fn schematic_bounds(ctx: &RenderContext, key: &ElementKey) -> Option<Bounds> {
    match key.kind {
        ElementKind::SchematicComponent => ctx.db.schematic_component.get(&key.id).map(|c| c.bounds()),
        ElementKind::SchematicNetLabel => ctx.db.schematic_net_label.get(&key.id).map(|l| l.bounds()),
        _ => None,
    }
}

/// Size of a box centered on the frame origin that holds `bounds`.
fn symmetric_size(bounds: Bounds) -> Size {
    Size::new(
        2.0 * bounds.min_x.abs().max(bounds.max_x.abs()),
        2.0 * bounds.min_y.abs().max(bounds.max_y.abs()),
    )
}

/// Diagram records of a subtree: what its nodes wrote in the component
/// phase plus anything spliced in.
fn subtree_keys(ctx: &RenderContext, root: NodeId) -> Vec<ElementKey> {
    let mut keys = Vec::new();
    for n in ctx.tree.preorder_from(root) {
        let Some(node) = ctx.tree.get(n) else {
            continue;
        };
        keys.extend(node.inserted(Phase::SchematicComponentRender).iter().cloned());
        keys.extend(node.state.spliced.iter().filter(|k| is_schematic_kind(k.kind)).cloned());
    }
    keys
}

pub(crate) fn layout(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if !node.props.is_container() || node.props.is_isolated() {
        return Ok(HookOutcome::Done);
    }

    let children: Vec<(NodeId, Size)> = node
        .children
        .iter()
        .filter_map(|c| Some((*c, ctx.tree.state(*c)?.schematic_size?)))
        .collect();

    let mut offsets: HashMap<NodeId, Point> = HashMap::new();
    let mut fixed: Option<Bounds> = None;
    let mut loose: Vec<(NodeId, Size)> = Vec::new();
    for (child, size) in &children {
        let explicit = ctx
            .tree
            .props(*child)
            .and_then(ElementProps::placement)
            .and_then(|p| p.schematic_offset());
        match explicit {
            Some(at) => {
                let b = Bounds::from_center(at, size.width, size.height);
                fixed = Some(fixed.map_or(b, |f| f.union(&b)));
                offsets.insert(*child, at);
            }
            None => loose.push((*child, *size)),
        }
    }
    let spacing = ctx.config.layout.schematic_spacing;
    let packed = placer::pack(&loose, spacing);
    let shift = match fixed {
        Some(f) => Point::new(f.max_x + spacing + packed.width / 2.0, f.center().y),
        None => Point::ORIGIN,
    };
    for (child, at) in packed.placements {
        offsets.insert(child, at + shift);
    }

    let mut content: Option<Bounds> = None;
    for (child, size) in &children {
        let Some(offset) = offsets.get(child).copied() else {
            continue;
        };
        let b = Bounds::from_center(offset, size.width, size.height);
        content = Some(content.map_or(b, |c| c.union(&b)));
        if offset == Point::ORIGIN {
            continue;
        }
        for key in subtree_keys(ctx, *child) {
            ctx.db.translate(&key, Point::ORIGIN, offset);
        }
        for n in ctx.tree.preorder_from(*child) {
            let state = &mut ctx.tree.node_mut(n)?.state;
            if !state.spliced.is_empty() {
                state.applied_schematic_offset = state.applied_schematic_offset + offset;
            }
        }
    }

    debug!("{}: {} diagram children laid out", ctx.tree.node(id)?.describe(), children.len());
    ctx.tree.node_mut(id)?.state.schematic_size = Some(content.map_or(Size::default(), symmetric_size));
    Ok(HookOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_size_reaches_farthest_edge() {
        let size = symmetric_size(Bounds::new(-1.0, -0.5, 3.0, 0.25));
        assert_eq!(size, Size::new(6.0, 1.0));
    }
}
