//! Layer assignment for routes through ordered hints.
//!
//! A route visits a list of objectives (start port, hints, end port). Each leg
//! between consecutive objectives runs on a single layer. The layer may only
//! change at objectives that allow a via; every other objective pins the legs
//! touching it to one of its layers. A via objective may also name the layer
//! the route continues on, which pins the leg leaving it. The search returns
//! the assignment with the fewest layer changes, preferring layers earlier in
//! the stack on ties.

use picoplace_circuit::LayerRef;

#[derive(Debug, Clone, PartialEq)]
pub struct LayerObjective {
    /// Layers the route may use at this objective.
    pub layers: Vec<LayerRef>,
    /// A via may be placed here.
    pub via: bool,
    /// Layer the leg leaving this objective must use.
    pub leave: Option<LayerRef>,
}

impl LayerObjective {
    pub fn new(layers: Vec<LayerRef>, via: bool) -> Self {
        Self {
            layers,
            via,
            leave: None,
        }
    }

    /// Continue on `layer` after this objective.
    pub fn leaving_on(mut self, layer: LayerRef) -> Self {
        self.leave = Some(layer);
        self
    }
}

/// Pick one layer per leg, `objectives.len() - 1` in total.
///
/// `None` when no assignment satisfies the objectives. Without layer changes
/// every leg shares one layer.
pub fn find_layer_combination(
    objectives: &[LayerObjective],
    stack: &[LayerRef],
    layer_changes: bool,
) -> Option<Vec<LayerRef>> {
    if objectives.len() < 2 || stack.is_empty() {
        return None;
    }
    let legs = objectives.len() - 1;

    // A leg may use a layer allowed at both of its ends, except that an end
    // with a via only constrains the side that does not change layers.
    let allowed = |leg: usize, layer: LayerRef| -> bool {
        let start = &objectives[leg];
        let end = &objectives[leg + 1];
        let start_ok = match start.leave {
            Some(required) => layer == required,
            None => start.layers.contains(&layer) || (layer_changes && start.via && leg > 0),
        };
        let end_ok = end.layers.contains(&layer) || (layer_changes && end.via && leg + 1 < legs);
        start_ok && end_ok
    };

    // cost[leg][layer index] = fewest layer changes to reach this leg on that layer
    let mut cost = vec![vec![usize::MAX; stack.len()]; legs];
    let mut back = vec![vec![0usize; stack.len()]; legs];

    for (li, layer) in stack.iter().enumerate() {
        if allowed(0, *layer) {
            cost[0][li] = 0;
        }
    }

    for leg in 1..legs {
        let can_switch = layer_changes && objectives[leg].via;
        for (li, layer) in stack.iter().enumerate() {
            if !allowed(leg, *layer) {
                continue;
            }
            for prev in 0..stack.len() {
                if cost[leg - 1][prev] == usize::MAX {
                    continue;
                }
                let change = usize::from(prev != li);
                if change == 1 && !can_switch {
                    continue;
                }
                let candidate = cost[leg - 1][prev] + change;
                if candidate < cost[leg][li] {
                    cost[leg][li] = candidate;
                    back[leg][li] = prev;
                }
            }
        }
    }

    let (mut li, best) = cost[legs - 1]
        .iter()
        .enumerate()
        .min_by_key(|(i, c)| (**c, *i))?;
    if *best == usize::MAX {
        return None;
    }

    let mut out = vec![stack[li]; legs];
    for leg in (1..legs).rev() {
        li = back[leg][li];
        out[leg - 1] = stack[li];
    }
    Some(out)
}

/// First layer shared by every set, in stack order.
pub fn shared_layer(stack: &[LayerRef], sets: &[&[LayerRef]]) -> Option<LayerRef> {
    stack
        .iter()
        .copied()
        .find(|layer| sets.iter().all(|set| set.contains(layer)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: [LayerRef; 2] = [LayerRef::Top, LayerRef::Bottom];
    const BOTH: [LayerRef; 2] = [LayerRef::Top, LayerRef::Bottom];

    #[test]
    fn single_leg_uses_shared_layer() {
        let objectives = vec![
            LayerObjective::new(vec![LayerRef::Top], false),
            LayerObjective::new(BOTH.to_vec(), false),
        ];
        assert_eq!(
            find_layer_combination(&objectives, &STACK, true),
            Some(vec![LayerRef::Top])
        );
    }

    #[test]
    fn via_hint_allows_layer_change() {
        let objectives = vec![
            LayerObjective::new(vec![LayerRef::Top], false),
            LayerObjective::new(BOTH.to_vec(), true),
            LayerObjective::new(vec![LayerRef::Bottom], false),
        ];
        assert_eq!(
            find_layer_combination(&objectives, &STACK, true),
            Some(vec![LayerRef::Top, LayerRef::Bottom])
        );
    }

    #[test]
    fn no_change_without_via_hint() {
        let objectives = vec![
            LayerObjective::new(vec![LayerRef::Top], false),
            LayerObjective::new(BOTH.to_vec(), false),
            LayerObjective::new(vec![LayerRef::Bottom], false),
        ];
        assert_eq!(find_layer_combination(&objectives, &STACK, true), None);
    }

    #[test]
    fn via_hint_with_target_layer_forces_the_change() {
        let dive = LayerObjective::new(BOTH.to_vec(), true).leaving_on(LayerRef::Bottom);
        let rise = LayerObjective::new(BOTH.to_vec(), true).leaving_on(LayerRef::Top);
        let objectives = vec![
            LayerObjective::new(vec![LayerRef::Top], false),
            dive.clone(),
            rise,
            LayerObjective::new(vec![LayerRef::Top], false),
        ];
        assert_eq!(
            find_layer_combination(&objectives, &STACK, true),
            Some(vec![LayerRef::Top, LayerRef::Bottom, LayerRef::Top])
        );

        // Nothing brings the route back up to a top-only pad.
        let stranded = vec![
            LayerObjective::new(vec![LayerRef::Top], false),
            dive,
            LayerObjective::new(vec![LayerRef::Top], false),
        ];
        assert_eq!(find_layer_combination(&stranded, &STACK, true), None);
    }

    #[test]
    fn strategy_without_layer_changes_needs_shared_layer() {
        let objectives = vec![
            LayerObjective::new(vec![LayerRef::Top], false),
            LayerObjective::new(BOTH.to_vec(), true),
            LayerObjective::new(vec![LayerRef::Bottom], false),
        ];
        assert_eq!(find_layer_combination(&objectives, &STACK, false), None);
    }
}
