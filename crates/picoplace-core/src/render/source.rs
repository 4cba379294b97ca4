//! Electrical phases: ports, traces from props, source records, trace
//! resolution and connectivity keys.

use std::collections::HashMap;

use itertools::Itertools;
use log::debug;
use petgraph::unionfind::UnionFind;
use picoplace_circuit::{
    CircuitElement, CircuitError, ElementKey, ElementKind, ErrorType, SourceComponent,
    SourceGroup, SourceNet, SourcePort, SourceTrace,
};

use crate::render::effects::{
    footprint_status, isolated_effect_name, supplier_part_numbers, EffectOutput, EffectState,
    FootprintStatus,
};
use crate::render::{wait_or, HookOutcome, HookResult, Phase, RenderContext};
use crate::selector::{Selector, SelectorError};
use crate::tree::port::{ports_from_footprint, standard_ports};
use crate::tree::props::{ElementProps, InflatedProps, NetProps, PortProps, TraceProps};
use crate::tree::{NodeId, TraceEndpoints, TraceStatus};
use crate::RenderError;

/// `source_group_id` of the nearest enclosing board or group.
pub(crate) fn container_group_id(ctx: &RenderContext, id: NodeId) -> Option<String> {
    ctx.tree
        .ancestors(id)
        .find(|a| ctx.tree.props(*a).is_some_and(ElementProps::is_container))
        .and_then(|a| ctx.tree.state(a))
        .and_then(|s| s.source_group_id.clone())
}

pub(crate) fn initialize_ports(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if !node.props.has_ports()
        || matches!(node.props, ElementProps::Inflated(_))
        || !ctx.tree.ports_of(id).is_empty()
    {
        return Ok(HookOutcome::Done);
    }

    let ports = match standard_ports(&node.props) {
        Some(ports) => ports,
        None => match footprint_status(ctx, id) {
            FootprintStatus::Loaded(primitives) => ports_from_footprint(primitives),
            FootprintStatus::Pending => {
                return wait_or(ctx, "footprint", |_| Ok(HookOutcome::Done));
            }
            FootprintStatus::None | FootprintStatus::Failed(_) => Vec::new(),
        },
    };

    debug!("{}: {} ports", ctx.tree.node(id)?.describe(), ports.len());
    for port in ports {
        ctx.synthesize(id, ElementProps::Port(port), Phase::InitializePorts);
    }
    Ok(HookOutcome::Done)
}

fn add_trace(ctx: &mut RenderContext, parent: NodeId, trace: TraceProps) -> Result<(), RenderError> {
    let id = ctx.synthesize(parent, ElementProps::Trace(trace), Phase::CreateTracesFromProps);
    ensure_implicit_nets(ctx, id)
}

/// Declare nets a trace refers to by `net.<name>` that exist nowhere in
/// scope. They are added to the trace's subcircuit.
fn ensure_implicit_nets(ctx: &mut RenderContext, trace_id: NodeId) -> Result<(), RenderError> {
    let Some(ElementProps::Trace(trace)) = ctx.tree.props(trace_id) else {
        return Ok(());
    };
    for text in trace.selectors() {
        let Ok(Selector::Net(name)) = ctx.selectors.parse(&text) else {
            continue;
        };
        match ctx.selectors.resolve(&ctx.tree, trace_id, &text) {
            Err(SelectorError::NetNotFound { .. }) => {
                let scope = ctx.tree.subcircuit_of(trace_id);
                debug!("implicit net {name} in {scope}");
                ctx.synthesize(
                    scope,
                    ElementProps::Net(NetProps {
                        name,
                        connects_to: Vec::new(),
                    }),
                    Phase::CreateTracesFromProps,
                );
            }
            _ => continue,
        }
    }
    Ok(())
}

pub(crate) fn create_traces_from_props(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    let props = node.props.clone();
    let parent = node.parent.unwrap_or(id);

    match &props {
        ElementProps::Net(net) => {
            for target in &net.connects_to {
                add_trace(ctx, parent, TraceProps::between(format!("net.{}", net.name), target.clone()))?;
            }
        }
        ElementProps::Trace(_) => ensure_implicit_nets(ctx, id)?,
        _ => {
            if let (Some(name), Some(connections)) = (props.name(), props.connections()) {
                for (alias, target) in connections {
                    add_trace(ctx, parent, TraceProps::between(format!(".{name} > .{alias}"), target.clone()))?;
                }
            }
        }
    }
    Ok(HookOutcome::Done)
}

/// Power and ground flags derived from a net name.
pub fn net_flags(name: &str) -> (bool, bool) {
    let upper = name.to_ascii_uppercase();
    let is_ground = matches!(upper.as_str(), "GND" | "AGND" | "DGND" | "PGND" | "VSS" | "GROUND")
        || upper.starts_with("GND_");
    let is_power = !is_ground
        && (["VCC", "VDD", "VBUS", "VBAT", "VIN", "VSYS", "V+"]
            .iter()
            .any(|p| upper.starts_with(p))
            || upper.strip_prefix('V').is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            || upper
                .split_once('V')
                .is_some_and(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit())));
    (is_power, is_ground)
}

pub(crate) fn render(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    let props = node.props.clone();
    let parent_is_inflated = node
        .parent
        .and_then(|p| ctx.tree.props(p))
        .is_some_and(|p| matches!(p, ElementProps::Inflated(_)));

    match &props {
        ElementProps::Group(_) if props.is_isolated() => return render_isolated(ctx, id),
        ElementProps::Board(_) | ElementProps::Group(_) => {
            let mut group = SourceGroup::new(props.name().unwrap_or(props.kind_name()), props.is_subcircuit());
            group.parent_source_group_id = container_group_id(ctx, id);
            let group_id = ctx.insert(CircuitElement::SourceGroup(group));
            let subcircuit_id = if id == ctx.tree.root() && props.is_subcircuit() {
                Some(group_id.clone())
            } else {
                ctx.subcircuit_id(id)
            };
            ctx.db.source_group.update(&group_id, |g| g.subcircuit_id = subcircuit_id.clone());
            let state = &mut ctx.tree.node_mut(id)?.state;
            state.source_group_id = Some(group_id);
            state.subcircuit_id = subcircuit_id;
        }
        ElementProps::Port(port) if !parent_is_inflated => {
            let component_id = node
                .parent
                .and_then(|p| ctx.tree.state(p))
                .and_then(|s| s.source_component_id.clone());
            let mut record = SourcePort::new(port.name.clone(), port.pin_number);
            record.port_hints = port.aliases.clone();
            record.source_component_id = component_id;
            record.subcircuit_id = ctx.subcircuit_id(id);
            let subcircuit_id = record.subcircuit_id.clone();
            let port_id = ctx.insert(CircuitElement::SourcePort(record));
            let state = &mut ctx.tree.node_mut(id)?.state;
            state.source_port_id = Some(port_id);
            state.subcircuit_id = subcircuit_id;
        }
        ElementProps::Net(net) => {
            let (is_power, is_ground) = net_flags(&net.name);
            let mut record = SourceNet::new(net.name.clone());
            record.is_power = is_power;
            record.is_ground = is_ground;
            record.member_source_group_ids = container_group_id(ctx, id).into_iter().collect();
            record.subcircuit_id = ctx.subcircuit_id(id);
            let subcircuit_id = record.subcircuit_id.clone();
            let net_id = ctx.insert(CircuitElement::SourceNet(record));
            let state = &mut ctx.tree.node_mut(id)?.state;
            state.source_net_id = Some(net_id);
            state.subcircuit_id = subcircuit_id;
        }
        _ => {
            if let Some(ftype) = props.ftype() {
                let mut record = SourceComponent::new(ftype, props.name().unwrap_or_default());
                record.value = props.value();
                record.footprint = props.footprint().map(str::to_string);
                record.manufacturer_part_number = props.manufacturer_part_number().map(str::to_string);
                record.supplier_part_numbers = supplier_part_numbers(ctx, id).unwrap_or_default();
                record.source_group_id = container_group_id(ctx, id);
                record.subcircuit_id = ctx.subcircuit_id(id);
                let subcircuit_id = record.subcircuit_id.clone();
                let component_id = ctx.insert(CircuitElement::SourceComponent(record));
                let state = &mut ctx.tree.node_mut(id)?.state;
                state.source_component_id = Some(component_id);
                state.subcircuit_id = subcircuit_id;
            }
        }
    }
    Ok(HookOutcome::Done)
}

/// Splice the records of an isolated render and stand in for its children.
fn render_isolated(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    let description = node.describe();
    let Some(hash) = node.state.module_hash.clone() else {
        return Err(RenderError::node(id, "isolated group has no queued render"));
    };

    let records = match ctx.effects.state(id, &isolated_effect_name(&hash)) {
        Some(EffectState::Ready(EffectOutput::Isolated(records))) => records.clone(),
        Some(EffectState::Failed(reason)) => {
            let message = format!("isolated render of {description} failed: {reason}");
            let error = ctx.node_error(id, ErrorType::UnknownError, message);
            ctx.insert_error(error);
            return Ok(HookOutcome::Done);
        }
        Some(EffectState::Ready(_)) => {
            return Err(RenderError::node(id, "isolated render produced no records"));
        }
        None | Some(EffectState::Pending) => {
            return wait_or(ctx, "isolated render", move |ctx| {
                let message = format!("isolated render of {description} never completed");
                let error = ctx.node_error(id, ErrorType::UnknownError, message);
                ctx.insert_error(error);
                Ok(HookOutcome::Done)
            });
        }
    };

    ctx.tree.remove_children(id);
    let keys = ctx.db.splice(&records)?;
    ctx.record(keys.iter().cloned());

    let group_id = keys
        .iter()
        .find(|k| k.kind == ElementKind::SourceGroup)
        .map(|k| k.id.clone());
    let parent_group_id = container_group_id(ctx, id);
    let subcircuit_id = ctx.subcircuit_id(id);
    let name = ctx.tree.node(id)?.name().map(str::to_string);
    if let Some(group_id) = &group_id {
        ctx.db.source_group.update(group_id, |g| {
            if let Some(name) = name {
                g.name = name;
            }
            g.is_subcircuit = true;
            g.parent_source_group_id = parent_group_id;
            g.subcircuit_id = subcircuit_id.clone();
        });
    }
    {
        let state = &mut ctx.tree.node_mut(id)?.state;
        state.source_group_id = group_id;
        state.subcircuit_id = subcircuit_id;
        state.spliced = keys.clone();
        state.applied_pcb_offset = Default::default();
        state.applied_schematic_offset = Default::default();
    }

    inflate(ctx, id, &keys)?;
    debug!("{description}: spliced {} records", keys.len());
    Ok(HookOutcome::Done)
}

/// Stand-in component and port nodes for spliced components, so selectors
/// from outside the group still resolve.
fn inflate(ctx: &mut RenderContext, id: NodeId, keys: &[ElementKey]) -> Result<(), RenderError> {
    let components: Vec<SourceComponent> = keys
        .iter()
        .filter(|k| k.kind == ElementKind::SourceComponent)
        .filter_map(|k| ctx.db.source_component.get(&k.id).cloned())
        .collect();

    for component in components {
        let inflated = ctx.synthesize(
            id,
            ElementProps::Inflated(InflatedProps {
                name: component.name.clone(),
                source_component_id: component.source_component_id.clone(),
            }),
            Phase::DesignRuleChecks,
        );
        let pcb_component_id = ctx
            .db
            .pcb_component
            .iter()
            .find(|c| c.source_component_id == component.source_component_id)
            .map(|c| c.pcb_component_id.clone());
        let schematic_component_id = ctx
            .db
            .schematic_component
            .iter()
            .find(|c| c.source_component_id == component.source_component_id)
            .map(|c| c.schematic_component_id.clone());
        {
            let state = &mut ctx.tree.node_mut(inflated)?.state;
            state.source_component_id = Some(component.source_component_id.clone());
            state.subcircuit_id = component.subcircuit_id.clone();
            state.pcb_component_id = pcb_component_id;
            state.schematic_component_id = schematic_component_id;
        }

        let ports: Vec<SourcePort> = ctx
            .db
            .source_ports_of(&component.source_component_id)
            .cloned()
            .collect();
        for port in ports {
            let port_node = ctx.synthesize(
                inflated,
                ElementProps::Port(PortProps::new(port.name.clone(), port.pin_number, port.port_hints.clone())),
                Phase::DesignRuleChecks,
            );
            let pcb_port_id = ctx
                .db
                .pcb_port_for_source_port(&port.source_port_id)
                .map(|p| p.pcb_port_id.clone());
            let schematic_port_id = ctx
                .db
                .schematic_port_for_source_port(&port.source_port_id)
                .map(|p| p.schematic_port_id.clone());
            let state = &mut ctx.tree.node_mut(port_node)?.state;
            state.source_port_id = Some(port.source_port_id.clone());
            state.subcircuit_id = port.subcircuit_id.clone();
            state.pcb_port_id = pcb_port_id;
            state.schematic_port_id = schematic_port_id;
        }
    }
    Ok(())
}

pub(crate) fn render_trace(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let Some(ElementProps::Trace(trace)) = ctx.tree.props(id).cloned() else {
        return Ok(HookOutcome::Done);
    };
    let selectors = trace.selectors();
    if selectors.len() < 2 {
        let message = format!("trace needs at least two endpoints, got {}", selectors.len());
        let record = SourceTrace::new(Vec::new(), Vec::new());
        let error = CircuitError::new(ErrorType::SourceTraceMalformedError, message);
        return reject_trace(ctx, id, &trace, &selectors, record, vec![error]);
    }

    let mut endpoints = TraceEndpoints::default();
    let mut failures: Vec<SelectorError> = Vec::new();
    for text in &selectors {
        match ctx.selectors.resolve(&ctx.tree, id, text) {
            Ok(found) => match ctx.tree.props(found) {
                Some(ElementProps::Net(_)) => endpoints.nets.push(found),
                _ => endpoints.ports.push(found),
            },
            Err(err) => failures.push(err),
        }
    }

    let malformed = failures
        .iter()
        .any(|e| matches!(e, SelectorError::Parse { .. }));
    if !failures.is_empty() {
        let report = move |ctx: &mut RenderContext| {
            let errors = failures
                .iter()
                .map(|failure| {
                    let error_type = match failure {
                        SelectorError::Parse { .. } => ErrorType::SourceTraceMalformedError,
                        _ => ErrorType::SourceTraceNotConnectedError,
                    };
                    CircuitError::new(error_type, failure.to_string())
                })
                .collect();
            let record = partial_trace(ctx, &endpoints);
            reject_trace(ctx, id, &trace, &selectors, record, errors)
        };
        if malformed {
            return report(ctx);
        }
        return wait_or(ctx, "unresolved selector", report);
    }

    let port_ids: Option<Vec<String>> = endpoints
        .ports
        .iter()
        .map(|p| ctx.tree.state(*p).and_then(|s| s.source_port_id.clone()))
        .collect();
    let net_ids: Option<Vec<String>> = endpoints
        .nets
        .iter()
        .map(|n| ctx.tree.state(*n).and_then(|s| s.source_net_id.clone()))
        .collect();
    let (Some(port_ids), Some(net_ids)) = (port_ids, net_ids) else {
        return wait_or(ctx, "endpoint records", move |ctx| {
            let message = format!("trace {} has endpoints without electrical records", selectors.join(" to "));
            let error = CircuitError::new(ErrorType::SourceTraceNotConnectedError, message);
            let record = partial_trace(ctx, &endpoints);
            reject_trace(ctx, id, &trace, &selectors, record, vec![error])
        });
    };

    let subcircuit_id = ctx.subcircuit_id(id);
    let existing = ctx
        .db
        .source_trace
        .iter()
        .find(|t| t.subcircuit_id == subcircuit_id && t.connects_same(&port_ids, &net_ids))
        .map(|t| t.source_trace_id.clone());
    let trace_id = match existing {
        Some(existing) => {
            debug!("reusing {existing} for {}", selectors.join(" to "));
            existing
        }
        None => {
            let mut record = SourceTrace::new(port_ids, net_ids);
            record.max_length = trace.max_length;
            record.display_name = Some(selectors.join(" to "));
            record.subcircuit_id = subcircuit_id.clone();
            ctx.insert(CircuitElement::SourceTrace(record))
        }
    };

    let state = &mut ctx.tree.node_mut(id)?.state;
    state.source_trace_id = Some(trace_id);
    state.subcircuit_id = subcircuit_id;
    state.endpoints = Some(endpoints);
    state.trace_status = TraceStatus::PortsResolved;
    Ok(HookOutcome::Done)
}

/// Electrical record of a trace with only the endpoints that resolved.
fn partial_trace(ctx: &RenderContext, endpoints: &TraceEndpoints) -> SourceTrace {
    let port_ids = endpoints
        .ports
        .iter()
        .filter_map(|p| ctx.tree.state(*p).and_then(|s| s.source_port_id.clone()))
        .collect();
    let net_ids = endpoints
        .nets
        .iter()
        .filter_map(|n| ctx.tree.state(*n).and_then(|s| s.source_net_id.clone()))
        .collect();
    SourceTrace::new(port_ids, net_ids)
}

/// Insert the trace's electrical record anyway and report `errors` against
/// it. The trace is not routed.
fn reject_trace(
    ctx: &mut RenderContext,
    id: NodeId,
    trace: &TraceProps,
    selectors: &[String],
    mut record: SourceTrace,
    errors: Vec<CircuitError>,
) -> HookResult {
    let subcircuit_id = ctx.subcircuit_id(id);
    record.max_length = trace.max_length;
    record.display_name = Some(selectors.join(" to "));
    record.subcircuit_id = subcircuit_id.clone();
    let port_ids = record.connected_source_port_ids.clone();
    let trace_id = ctx.insert(CircuitElement::SourceTrace(record));

    for error in errors {
        ctx.insert_error(
            error
                .with_source_trace(trace_id.clone())
                .with_source_ports(port_ids.iter().cloned())
                .with_subcircuit(subcircuit_id.clone()),
        );
    }
    let state = &mut ctx.tree.node_mut(id)?.state;
    state.subcircuit_id = subcircuit_id;
    state.trace_status = TraceStatus::Unroutable;
    Ok(HookOutcome::Done)
}

pub(crate) fn assign_connectivity_keys(ctx: &mut RenderContext, id: NodeId) -> HookResult {
    let node = ctx.tree.node(id)?;
    if !node.props.is_subcircuit() || node.props.is_isolated() {
        return Ok(HookOutcome::Done);
    }
    let Some(group_id) = node.state.source_group_id.clone() else {
        return Ok(HookOutcome::Done);
    };

    let unresolved = ctx.tree.descendants(id).into_iter().any(|d| {
        ctx.tree.get(d).is_some_and(|n| {
            matches!(n.props, ElementProps::Trace(_)) && !n.phase_done(Phase::SourceTraceRender)
        })
    });
    if unresolved && !ctx.is_final_pass() {
        return Ok(HookOutcome::Waiting("traces still resolving".into()));
    }

    let scope = Some(group_id.clone());
    let mut ids: Vec<String> = Vec::new();
    ids.extend(
        ctx.db
            .source_port
            .filter(|p| p.subcircuit_id == scope)
            .map(|p| p.source_port_id.clone()),
    );
    ids.extend(
        ctx.db
            .source_net
            .filter(|n| n.subcircuit_id == scope)
            .map(|n| n.source_net_id.clone()),
    );
    let traces: Vec<SourceTrace> = ctx
        .db
        .source_trace
        .filter(|t| t.subcircuit_id == scope)
        .cloned()
        .collect();
    ids.extend(traces.iter().map(|t| t.source_trace_id.clone()));

    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();
    let mut uf = UnionFind::<usize>::new(ids.len());
    for trace in &traces {
        let Some(&t) = index.get(trace.source_trace_id.as_str()) else {
            continue;
        };
        for member in trace
            .connected_source_port_ids
            .iter()
            .chain(&trace.connected_source_net_ids)
        {
            if let Some(&m) = index.get(member.as_str()) {
                uf.union(t, m);
            }
        }
    }

    let roots: Vec<usize> = (0..ids.len()).map(|i| uf.find(i)).collect();
    let numbering: HashMap<usize, usize> = roots
        .iter()
        .unique()
        .enumerate()
        .map(|(n, root)| (*root, n))
        .collect();
    let keys: Vec<(String, String)> = ids
        .iter()
        .zip(&roots)
        .map(|(record, root)| (record.clone(), format!("{group_id}_connectivity_net{}", numbering[root])))
        .collect();

    for (record, key) in keys {
        let key = Some(key);
        let _ = ctx.db.source_port.update(&record, |p| p.subcircuit_connectivity_map_key = key.clone())
            || ctx.db.source_net.update(&record, |n| n.subcircuit_connectivity_map_key = key.clone())
            || ctx.db.source_trace.update(&record, |t| t.subcircuit_connectivity_map_key = key.clone());
    }
    debug!("{group_id}: {} connectivity nets", numbering.len());
    Ok(HookOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_names_imply_power_and_ground() {
        assert_eq!(net_flags("GND"), (false, true));
        assert_eq!(net_flags("vss"), (false, true));
        assert_eq!(net_flags("VCC"), (true, false));
        assert_eq!(net_flags("V3_3"), (true, false));
        assert_eq!(net_flags("3V3"), (true, false));
        assert_eq!(net_flags("SDA"), (false, false));
        assert_eq!(net_flags("VALVE"), (false, false));
    }
}
