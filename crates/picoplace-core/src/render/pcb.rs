//! Physical phases: port matching, sizing, placement, board/component
//! records, footprint primitives and copper pours.

use std::collections::HashMap;

use log::debug;
use picoplace_circuit::{
    Bounds, CircuitElement, CircuitError, ElementKind, ErrorType, LayerRef, PcbBoard,
    PcbComponent, PcbCopperPour, PcbGroup, PcbHole, PcbPlatedHole, PcbPort, PcbSmtPad, PcbVia,
    Point, Size,
};
use picoplace_engine::placer;
use picoplace_engine::pour::{circle_polygon, compute_pour, rect_polygon, segment_polygon};

use crate::connectivity::ConnectivityMap;
use crate::footprint::FootprintPrimitive;
use crate::render::effects::{footprint_status, FootprintStatus};
use crate::render::{wait_or, HookOutcome, HookResult, Phase, RenderContext};
use crate::tree::props::ElementProps;
use crate::tree::NodeId;
use crate::RenderError;

/// Edge length of a component without a footprint.
const BARE_COMPONENT_SIZE: f64 = 1.0;

/// Layer count of the board containing `id`.
pub(crate) fn board_layer_count(ctx: &RenderContext, id: NodeId) -> u8 {
    match ctx.tree.board_of(id).and_then(|b| ctx.tree.props(b)) {
        Some(ElementProps::Board(board)) => board.layers,
        _ => 2,
    }
}

fn component_layer(props: &ElementProps) -> LayerRef {
    props
        .placement()
        .and_then(|p| p.layer)
        .unwrap_or(LayerRef::Top)
}

fn rotation(props: &ElementProps) -> f64 {
    props
        .placement()
        .and_then(|p| p.pcb_rotation)
        .unwrap_or(0.0)
}

/// Bounds of a footprint after rotating it about the component center.
fn rotated_bounds(primitives: &[FootprintPrimitive], degrees: f64) -> Option<Bounds> {
    let corners: Vec<Point> = primitives
        .iter()
        .flat_map(|p| p.bounds().corners())
        .map(|c| c.rotate(degrees))
        .collect();
    Bounds::from_points(&corners)
}

pub(crate) fn match_ports(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if !node.props.has_ports() || matches!(node.props, ElementProps::Inflated(_)) {
        return Ok(HookOutcome::Done);
    }
    let description = node.describe();
    let component_id = node.state.source_component_id.clone();

    let primitives = match footprint_status(ctx, id) {
        FootprintStatus::None => return Ok(HookOutcome::Done),
        FootprintStatus::Pending => return wait_or(ctx, "footprint", |_| Ok(HookOutcome::Done)),
        FootprintStatus::Failed(reason) => {
            let mut error = CircuitError::new(
                ErrorType::PcbMissingFootprintError,
                format!("{description} has no usable footprint: {reason}"),
            );
            if let Some(component_id) = component_id {
                error = error.with_source_component(component_id);
            }
            let subcircuit_id = ctx.subcircuit_id(id);
            ctx.insert_error(error.with_subcircuit(subcircuit_id));
            return Ok(HookOutcome::Done);
        }
        FootprintStatus::Loaded(primitives) => primitives.to_vec(),
    };

    let mut unmatched: Vec<String> = Vec::new();
    let mut unmatched_ids: Vec<String> = Vec::new();
    for port in ctx.tree.ports_of(id) {
        let Some(ElementProps::Port(props)) = ctx.tree.props(port) else {
            continue;
        };
        let matched = primitives
            .iter()
            .position(|p| p.port_hints().iter().any(|h| props.matches(h)));
        if matched.is_none() {
            unmatched.push(props.name.clone());
            unmatched_ids.extend(ctx.tree.state(port).and_then(|s| s.source_port_id.clone()));
        }
        ctx.tree.node_mut(port)?.state.matched_primitive = matched;
    }

    if !unmatched.is_empty() {
        let mut error = CircuitError::new(
            ErrorType::PcbPortNotMatchedError,
            format!(
                "{description}: no footprint pad for port(s) {}",
                unmatched.join(", ")
            ),
        )
        .with_severity(picoplace_circuit::Severity::Warning)
        .with_source_ports(unmatched_ids)
        .with_subcircuit(ctx.subcircuit_id(id));
        if let Some(component_id) = component_id {
            error = error.with_source_component(component_id);
        }
        ctx.insert_error(error);
    }

    ctx.tree.node_mut(id)?.state.footprint = Some(primitives);
    Ok(HookOutcome::Done)
}

/// Bounds of the physical records spliced into an isolated group, in the
/// module frame.
fn spliced_bounds(ctx: &RenderContext, id: NodeId) -> Option<Bounds> {
    let state = ctx.tree.state(id)?;
    let offset = state.applied_pcb_offset;
    let mut bounds: Option<Bounds> = None;
    let mut add = |b: Bounds| bounds = Some(bounds.map_or(b, |x| x.union(&b)));
    for key in &state.spliced {
        match key.kind {
            ElementKind::PcbComponent => {
                if let Some(c) = ctx.db.pcb_component.get(&key.id) {
                    add(c.bounds());
                }
            }
            ElementKind::PcbSmtpad => {
                if let Some(p) = ctx.db.pcb_smtpad.get(&key.id) {
                    add(p.bounds());
                }
            }
            ElementKind::PcbTrace => {
                if let Some(t) = ctx.db.pcb_trace.get(&key.id) {
                    let points: Vec<Point> = t.route.iter().map(|p| p.point()).collect();
                    if let Some(b) = Bounds::from_points(&points) {
                        add(b);
                    }
                }
            }
            _ => {}
        }
    }
    bounds.map(|b| Bounds::new(b.min_x - offset.x, b.min_y - offset.y, b.max_x - offset.x, b.max_y - offset.y))
}

/// Children that take part in physical placement, with their sizes.
fn placed_children(ctx: &RenderContext, id: NodeId) -> Vec<(NodeId, Size)> {
    ctx.tree
        .children(id)
        .iter()
        .filter(|c| {
            !matches!(
                ctx.tree.props(**c),
                Some(ElementProps::NetLabel(_) | ElementProps::Inflated(_))
            )
        })
        .filter_map(|c| Some((*c, ctx.tree.state(*c)?.pcb_size?)))
        .collect()
}

/// Child offsets: explicit positions are kept, everything else is packed into
/// a block beside them.
fn arrange(ctx: &RenderContext, children: &[(NodeId, Size)]) -> HashMap<NodeId, Point> {
    let mut offsets = HashMap::new();
    let mut fixed: Option<Bounds> = None;
    let mut loose: Vec<(NodeId, Size)> = Vec::new();

    for (child, size) in children {
        match ctx
            .tree
            .props(*child)
            .and_then(ElementProps::placement)
            .and_then(|p| p.pcb_offset())
        {
            Some(offset) => {
                let b = Bounds::from_center(offset, size.width, size.height);
                fixed = Some(fixed.map_or(b, |f| f.union(&b)));
                offsets.insert(*child, offset);
            }
            None => loose.push((*child, *size)),
        }
    }

    let spacing = ctx.config.layout.pcb_spacing;
    let packed = placer::pack(&loose, spacing);
    let shift = match fixed {
        Some(f) => Point::new(f.max_x + spacing + packed.width / 2.0, f.center().y),
        None => Point::ORIGIN,
    };
    for (child, at) in packed.placements {
        offsets.insert(child, at + shift);
    }
    offsets
}

pub(crate) fn calculate_size(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let props = ctx.tree.node(id)?.props.clone();

    let size = match &props {
        ElementProps::Group(_) if props.is_isolated() => Some(spliced_bounds(ctx, id).map_or(
            Size::default(),
            |b| Size::new(2.0 * b.min_x.abs().max(b.max_x.abs()), 2.0 * b.min_y.abs().max(b.max_y.abs())),
        )),
        ElementProps::Board(_) | ElementProps::Group(_) => {
            let children = placed_children(ctx, id);
            let offsets = arrange(ctx, &children);
            let content = children
                .iter()
                .filter_map(|(c, s)| Some(Bounds::from_center(*offsets.get(c)?, s.width, s.height)))
                .reduce(|a, b| a.union(&b));

            let size = match (&props, content) {
                (ElementProps::Board(board), content) => {
                    match board.outline.as_deref().and_then(Bounds::from_points) {
                        Some(outline) => Size::new(outline.width(), outline.height()),
                        None => {
                            // The board stays centered on its origin, so it has
                            // to reach the farthest child on each axis.
                            let margin = ctx.config.layout.board_margin;
                            let auto = content.map_or(Size::new(10.0, 10.0), |c| {
                                Size::new(
                                    2.0 * c.min_x.abs().max(c.max_x.abs()) + 2.0 * margin,
                                    2.0 * c.min_y.abs().max(c.max_y.abs()) + 2.0 * margin,
                                )
                            });
                            Size::new(
                                board.width.unwrap_or(auto.width),
                                board.height.unwrap_or(auto.height),
                            )
                        }
                    }
                }
                (_, Some(c)) => Size::new(
                    2.0 * c.min_x.abs().max(c.max_x.abs()),
                    2.0 * c.min_y.abs().max(c.max_y.abs()),
                ),
                (_, None) => Size::default(),
            };

            ctx.tree.node_mut(id)?.state.pcb_child_offsets = offsets;
            Some(size)
        }
        ElementProps::Via(via) => {
            let d = via
                .outer_diameter
                .unwrap_or_else(|| ctx.config.routing.via_outer_diameter());
            Some(Size::new(d, d))
        }
        _ if props.has_physical_primitive() => {
            let state = &ctx.tree.node(id)?.state;
            let bounds = state
                .footprint
                .as_deref()
                .and_then(|f| rotated_bounds(f, rotation(&props)));
            Some(bounds.map_or(Size::new(BARE_COMPONENT_SIZE, BARE_COMPONENT_SIZE), |b| {
                Size::new(b.width(), b.height())
            }))
        }
        _ => None,
    };

    ctx.tree.node_mut(id)?.state.pcb_size = size;
    Ok(HookOutcome::Done)
}

pub(crate) fn layout(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if node.state.pcb_size.is_none() {
        return Ok(HookOutcome::Done);
    }
    let center = match node.parent {
        None => node
            .props
            .placement()
            .and_then(|p| p.pcb_offset())
            .unwrap_or(Point::ORIGIN),
        Some(parent) => {
            let parent_state = ctx.tree.state(parent).ok_or(RenderError::DetachedNode(parent))?;
            let origin = parent_state.pcb_center.unwrap_or(Point::ORIGIN);
            origin + parent_state.pcb_child_offsets.get(&id).copied().unwrap_or(Point::ORIGIN)
        }
    };
    ctx.tree.node_mut(id)?.state.pcb_center = Some(center);
    Ok(HookOutcome::Done)
}

pub(crate) fn render_component(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    let props = node.props.clone();
    let (Some(center), Some(size)) = (node.state.pcb_center, node.state.pcb_size) else {
        return Ok(HookOutcome::Done);
    };

    match &props {
        ElementProps::Board(board) => {
            let outline = board
                .outline
                .as_ref()
                .map(|points| points.iter().map(|p| *p + center).collect::<Vec<_>>());
            let record = PcbBoard {
                pcb_board_id: String::new(),
                center,
                width: size.width,
                height: size.height,
                outline,
                num_layers: board.layers,
                thickness: board.thickness,
                subcircuit_id: node.state.source_group_id.clone(),
            };
            let board_id = ctx.insert(CircuitElement::PcbBoard(record));
            ctx.tree.node_mut(id)?.state.pcb_board_id = Some(board_id);
        }
        ElementProps::Group(_) if props.is_isolated() => {
            let state = &node.state;
            let delta = center - state.applied_pcb_offset;
            let keys = state.spliced.clone();
            if delta != Point::ORIGIN {
                for key in &keys {
                    ctx.db.translate(key, delta, Point::ORIGIN);
                }
            }
            ctx.tree.node_mut(id)?.state.applied_pcb_offset = center;
            debug!("moved {} spliced records by ({}, {})", keys.len(), delta.x, delta.y);
        }
        ElementProps::Group(_) => {
            let Some(source_group_id) = node.state.source_group_id.clone() else {
                return Ok(HookOutcome::Done);
            };
            let record = PcbGroup {
                pcb_group_id: String::new(),
                source_group_id,
                center,
                width: size.width,
                height: size.height,
                subcircuit_id: node.state.subcircuit_id.clone(),
            };
            let group_id = ctx.insert(CircuitElement::PcbGroup(record));
            ctx.tree.node_mut(id)?.state.pcb_group_id = Some(group_id);
        }
        _ if props.ftype().is_some() => {
            let Some(source_component_id) = node.state.source_component_id.clone() else {
                return Ok(HookOutcome::Done);
            };
            let record = PcbComponent {
                pcb_component_id: String::new(),
                source_component_id,
                center,
                width: size.width,
                height: size.height,
                rotation: rotation(&props),
                layer: component_layer(&props),
                subcircuit_id: node.state.subcircuit_id.clone(),
            };
            let component_id = ctx.insert(CircuitElement::PcbComponent(record));
            ctx.tree.node_mut(id)?.state.pcb_component_id = Some(component_id);
        }
        _ => {}
    }
    Ok(HookOutcome::Done)
}

pub(crate) fn render_primitives(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    let props = node.props.clone();
    let Some(center) = node.state.pcb_center else {
        return Ok(HookOutcome::Done);
    };

    match &props {
        ElementProps::Via(via) => render_via(ctx, id, via.clone(), center),
        _ if props.ftype().is_some() => render_footprint(ctx, id, &props, center),
        _ => Ok(HookOutcome::Done),
    }
}

fn render_footprint(ctx: &mut RenderContext, id: NodeId, props: &ElementProps, center: Point) -> HookResult {
    let state = &ctx.tree.node(id)?.state;
    let primitives = state.footprint.clone().unwrap_or_default();
    let pcb_component_id = state.pcb_component_id.clone();
    let subcircuit_id = state.subcircuit_id.clone();
    let layer = component_layer(props);
    let degrees = rotation(props);
    let through = LayerRef::stack(board_layer_count(ctx, id));

    let mut keys = Vec::with_capacity(primitives.len());
    // (layers, position) per primitive, for port placement.
    let mut anchors: Vec<Option<(Vec<LayerRef>, Point)>> = Vec::with_capacity(primitives.len());
    for primitive in &primitives {
        let at = center + primitive.offset().rotate(degrees);
        let quarter = (degrees / 90.0).round().rem_euclid(2.0) == 1.0;
        match primitive {
            FootprintPrimitive::SmtPad {
                shape,
                width,
                height,
                port_hints,
                ..
            } => {
                let (width, height) = if quarter { (*height, *width) } else { (*width, *height) };
                let pad = PcbSmtPad {
                    pcb_smtpad_id: String::new(),
                    shape: *shape,
                    x: at.x,
                    y: at.y,
                    width,
                    height,
                    layer,
                    port_hints: port_hints.clone(),
                    pcb_component_id: pcb_component_id.clone(),
                    pcb_port_id: None,
                    subcircuit_id: subcircuit_id.clone(),
                };
                let pad_id = ctx.insert(CircuitElement::PcbSmtpad(pad));
                keys.push(Some(picoplace_circuit::ElementKey::new(ElementKind::PcbSmtpad, pad_id)));
                anchors.push(Some((vec![layer], at)));
            }
            FootprintPrimitive::PlatedHole {
                hole_diameter,
                outer_diameter,
                port_hints,
                ..
            } => {
                let hole = PcbPlatedHole {
                    pcb_plated_hole_id: String::new(),
                    x: at.x,
                    y: at.y,
                    hole_diameter: *hole_diameter,
                    outer_diameter: *outer_diameter,
                    layers: through.clone(),
                    port_hints: port_hints.clone(),
                    pcb_component_id: pcb_component_id.clone(),
                    pcb_port_id: None,
                    subcircuit_id: subcircuit_id.clone(),
                };
                let hole_id = ctx.insert(CircuitElement::PcbPlatedHole(hole));
                keys.push(Some(picoplace_circuit::ElementKey::new(ElementKind::PcbPlatedHole, hole_id)));
                anchors.push(Some((through.clone(), at)));
            }
            FootprintPrimitive::Hole { hole_diameter, .. } => {
                let hole = PcbHole {
                    pcb_hole_id: String::new(),
                    x: at.x,
                    y: at.y,
                    hole_diameter: *hole_diameter,
                    pcb_component_id: pcb_component_id.clone(),
                    subcircuit_id: subcircuit_id.clone(),
                };
                let hole_id = ctx.insert(CircuitElement::PcbHole(hole));
                keys.push(Some(picoplace_circuit::ElementKey::new(ElementKind::PcbHole, hole_id)));
                anchors.push(None);
            }
        }
    }

    for port in ctx.tree.ports_of(id) {
        let state = &ctx.tree.node(port)?.state;
        let (Some(index), Some(source_port_id)) = (state.matched_primitive, state.source_port_id.clone()) else {
            continue;
        };
        let Some(Some((layers, at))) = anchors.get(index).cloned() else {
            continue;
        };
        let mut record = PcbPort::new(source_port_id, at, layers);
        record.pcb_component_id = pcb_component_id.clone();
        record.subcircuit_id = subcircuit_id.clone();
        let port_id = ctx.insert(CircuitElement::PcbPort(record));

        match keys.get(index).cloned().flatten() {
            Some(key) if key.kind == ElementKind::PcbSmtpad => {
                ctx.db.pcb_smtpad.update(&key.id, |p| p.pcb_port_id = Some(port_id.clone()));
            }
            Some(key) if key.kind == ElementKind::PcbPlatedHole => {
                ctx.db.pcb_plated_hole.update(&key.id, |h| h.pcb_port_id = Some(port_id.clone()));
            }
            _ => {}
        }
        let state = &mut ctx.tree.node_mut(port)?.state;
        state.pcb_port_id = Some(port_id);
        state.pcb_center = Some(at);
    }

    ctx.tree.node_mut(id)?.state.primitive_keys = keys;
    Ok(HookOutcome::Done)
}

fn render_via(ctx: &mut RenderContext, id: NodeId, via: crate::tree::props::ViaProps, center: Point) -> HookResult {
    let mut net_ids = Vec::new();
    let mut unresolved = None;
    if let Some(net) = &via.net {
        match ctx.selectors.resolve(&ctx.tree, id, &format!("net.{net}")) {
            Ok(found) => match ctx.tree.state(found).and_then(|s| s.source_net_id.clone()) {
                Some(net_id) => net_ids.push(net_id),
                None => return wait_or(ctx, "via net record", |_| Ok(HookOutcome::Done)),
            },
            Err(err) => unresolved = Some(err),
        }
    }
    let record = PcbVia {
        pcb_via_id: String::new(),
        x: center.x,
        y: center.y,
        outer_diameter: via
            .outer_diameter
            .unwrap_or_else(|| ctx.config.routing.via_outer_diameter()),
        hole_diameter: via.hole_diameter.unwrap_or(ctx.config.routing.via_hole_diameter),
        from_layer: via.from_layer,
        to_layer: via.to_layer,
        pcb_trace_id: None,
        connected_source_net_ids: net_ids,
        subcircuit_id: ctx.subcircuit_id(id),
    };
    let via_id = ctx.insert(CircuitElement::PcbVia(record));
    if let Some(err) = unresolved {
        let error = ctx
            .node_error(id, ErrorType::SourceTraceNotConnectedError, err.to_string())
            .with_pcb_vias([via_id])
            .with_center(center);
        ctx.insert_error(error);
    }
    Ok(HookOutcome::Done)
}

/// Whether physical routing has finished for every trace on `board`.
pub(crate) fn routing_settled(ctx: &RenderContext, board: NodeId) -> bool {
    ctx.tree.preorder_from(board).into_iter().all(|n| {
        ctx.tree.get(n).is_some_and(|node| {
            !matches!(node.props, ElementProps::Trace(_)) || node.phase_done(Phase::PcbRouteNetIslands)
        })
    }) && ctx
        .tree
        .get(board)
        .is_some_and(|b| b.phase_done(Phase::PcbRouteNetIslands))
}

pub(crate) fn render_copper_pour(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let Some(ElementProps::CopperPour(pour)) = ctx.tree.props(id).cloned() else {
        return Ok(HookOutcome::Done);
    };
    let Some(board_node) = ctx.tree.board_of(id) else {
        return Err(RenderError::node(id, "copper pour outside of a board"));
    };
    if !routing_settled(ctx, board_node) {
        return wait_or(ctx, "routing", |_| Ok(HookOutcome::Done));
    }
    let Some(board) = ctx
        .tree
        .state(board_node)
        .and_then(|s| s.pcb_board_id.clone())
        .and_then(|b| ctx.db.pcb_board.get(&b).cloned())
    else {
        return Err(RenderError::node(id, "board has no physical record"));
    };

    let net_id = match ctx.selectors.resolve(&ctx.tree, id, &format!("net.{}", pour.net)) {
        Ok(found) => ctx.tree.state(found).and_then(|s| s.source_net_id.clone()),
        Err(err) => {
            let error = ctx.node_error(id, ErrorType::SourceTraceNotConnectedError, err.to_string());
            ctx.insert_error(error);
            None
        }
    };
    let Some(net_id) = net_id else {
        return Ok(HookOutcome::Done);
    };

    let clearance = pour.clearance.unwrap_or(ctx.config.routing.grid.trace_clearance);
    let connectivity = ConnectivityMap::from_db(&ctx.db);
    let foreign = |record: &str| !connectivity.are_connected(record, &net_id);

    let mut cutouts: Vec<Vec<Point>> = Vec::new();
    for pad in ctx.db.pcb_smtpad.iter().filter(|p| p.layer == pour.layer) {
        if foreign(&pad.pcb_smtpad_id) {
            cutouts.push(rect_polygon(&pad.bounds().expand(clearance)));
        }
    }
    for hole in ctx.db.pcb_plated_hole.iter() {
        if foreign(&hole.pcb_plated_hole_id) {
            cutouts.push(circle_polygon(hole.center(), hole.outer_diameter / 2.0 + clearance, 16));
        }
    }
    for hole in ctx.db.pcb_hole.iter() {
        cutouts.push(circle_polygon(Point::new(hole.x, hole.y), hole.hole_diameter / 2.0 + clearance, 16));
    }
    for via in ctx.db.pcb_via.iter().filter(|v| v.layers().contains(&pour.layer)) {
        if foreign(&via.pcb_via_id) {
            cutouts.push(circle_polygon(via.center(), via.outer_diameter / 2.0 + clearance, 16));
        }
    }
    for trace in ctx.db.pcb_trace.iter() {
        if !foreign(&trace.pcb_trace_id) {
            continue;
        }
        for segment in trace.segments().into_iter().filter(|s| s.layer == pour.layer) {
            cutouts.push(segment_polygon(segment.start, segment.end, segment.width / 2.0 + clearance));
        }
    }

    let polygons = compute_pour(&board.outline_polygon(), &cutouts);
    debug!(
        "pour {} on {}: {} cutouts, {} polygons",
        pour.net,
        pour.layer,
        cutouts.len(),
        polygons.len()
    );
    let subcircuit_id = ctx.subcircuit_id(id);
    for polygon in polygons {
        ctx.insert(CircuitElement::PcbCopperPour(PcbCopperPour {
            pcb_copper_pour_id: String::new(),
            source_net_id: Some(net_id.clone()),
            layer: pour.layer,
            outer_ring: polygon.outer,
            inner_rings: polygon.holes,
            subcircuit_id: subcircuit_id.clone(),
        }));
    }
    Ok(HookOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turn_swaps_footprint_extent() {
        let pads = vec![
            FootprintPrimitive::rect_pad(-0.5, 0.0, 0.6, 0.6, &["pin1"]),
            FootprintPrimitive::rect_pad(0.5, 0.0, 0.6, 0.6, &["pin2"]),
        ];
        let flat = rotated_bounds(&pads, 0.0).unwrap();
        let turned = rotated_bounds(&pads, 90.0).unwrap();
        assert!((flat.width() - 1.6).abs() < 1e-9);
        assert!((turned.height() - 1.6).abs() < 1e-9);
        assert!((turned.width() - 0.6).abs() < 1e-9);
    }
}
