//! Where diagram wires meet.
//!
//! Wires of different nets that cross at a right angle get a short hop drawn
//! on the newer wire. Wires of the same net that meet in a T get a junction
//! dot where one ends on the other.

use picoplace_circuit::geometry::point_on_segment;
use picoplace_circuit::{Point, SchematicTraceEdge};
use picoplace_engine::geometry::{is_perpendicular, segment_intersection_point};

const EPSILON: f64 = 1e-6;

/// Interior crossing of `edge` with a perpendicular `other`, if any.
fn crossing(edge: &SchematicTraceEdge, other: &SchematicTraceEdge) -> Option<Point> {
    if !is_perpendicular(edge.from, edge.to, other.from, other.to) {
        return None;
    }
    let at = segment_intersection_point(edge.from, edge.to, other.from, other.to)?;
    let at_end = |p: &Point| p.approx_eq(&at, EPSILON);
    if at_end(&edge.from) || at_end(&edge.to) || at_end(&other.from) || at_end(&other.to) {
        return None;
    }
    Some(at)
}

/// Number of perpendicular crossings between `edges` and `foreign`.
pub fn count_crossings(edges: &[SchematicTraceEdge], foreign: &[SchematicTraceEdge]) -> usize {
    edges
        .iter()
        .map(|e| foreign.iter().filter(|f| crossing(e, f).is_some()).count())
        .sum()
}

/// Split `edges` around each crossing with `foreign`, marking a hop of
/// length `size` centered on the crossing. Crossings closer than `size` to an
/// end of the edge or to each other are left alone.
pub fn insert_crossings(
    edges: Vec<SchematicTraceEdge>,
    foreign: &[SchematicTraceEdge],
    size: f64,
) -> Vec<SchematicTraceEdge> {
    let half = size / 2.0;
    let mut out = Vec::with_capacity(edges.len());

    for edge in edges {
        let length = edge.from.distance(&edge.to);
        if length < EPSILON {
            out.push(edge);
            continue;
        }
        let dir = (edge.to - edge.from) * (1.0 / length);

        let mut hits: Vec<f64> = foreign
            .iter()
            .filter_map(|f| crossing(&edge, f))
            .map(|p| p.distance(&edge.from))
            .filter(|t| *t > half + EPSILON && *t < length - half - EPSILON)
            .collect();
        hits.sort_by(f64::total_cmp);
        hits.dedup_by(|b, a| *b - *a < size + EPSILON);
        if hits.is_empty() {
            out.push(edge);
            continue;
        }

        let mut cursor = edge.from;
        for (i, t) in hits.iter().enumerate() {
            let before = edge.from + dir * (t - half);
            let after = edge.from + dir * (t + half);
            let mut lead = SchematicTraceEdge::new(cursor, before);
            if i == 0 {
                lead.from_schematic_port_id = edge.from_schematic_port_id.clone();
            }
            out.push(lead);
            let mut hop = SchematicTraceEdge::new(before, after);
            hop.is_crossing = true;
            out.push(hop);
            cursor = after;
        }
        let mut tail = SchematicTraceEdge::new(cursor, edge.to);
        tail.to_schematic_port_id = edge.to_schematic_port_id.clone();
        out.push(tail);
    }
    out
}

/// Points where an end of one wire lands on the interior of the other.
pub fn junctions(edges: &[SchematicTraceEdge], same_net: &[SchematicTraceEdge]) -> Vec<Point> {
    let lands_inside = |p: &Point, e: &SchematicTraceEdge| {
        point_on_segment(p, &e.from, &e.to, EPSILON)
            && !p.approx_eq(&e.from, EPSILON)
            && !p.approx_eq(&e.to, EPSILON)
    };

    let mut out: Vec<Point> = Vec::new();
    let mut add = |p: Point| {
        if !out.iter().any(|q| q.approx_eq(&p, EPSILON)) {
            out.push(p);
        }
    };
    for ours in edges {
        for theirs in same_net {
            for p in [ours.from, ours.to] {
                if lands_inside(&p, theirs) {
                    add(p);
                }
            }
            for p in [theirs.from, theirs.to] {
                if lands_inside(&p, ours) {
                    add(p);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(x1: f64, y1: f64, x2: f64, y2: f64) -> SchematicTraceEdge {
        SchematicTraceEdge::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    #[test]
    fn hop_is_centered_on_the_crossing() {
        let ours = vec![edge(0.0, 0.0, 4.0, 0.0)];
        let theirs = vec![edge(2.0, -1.0, 2.0, 1.0)];
        assert_eq!(count_crossings(&ours, &theirs), 1);

        let split = insert_crossings(ours, &theirs, 0.2);
        assert_eq!(split.len(), 3);
        assert!(split[1].is_crossing);
        assert!(split[1].from.approx_eq(&Point::new(1.9, 0.0), 1e-9));
        assert!(split[1].to.approx_eq(&Point::new(2.1, 0.0), 1e-9));
        assert!(split[2].to.approx_eq(&Point::new(4.0, 0.0), 1e-9));
    }

    #[test]
    fn touching_ends_are_not_crossings() {
        let ours = vec![edge(0.0, 0.0, 2.0, 0.0)];
        let theirs = vec![edge(2.0, -1.0, 2.0, 1.0)];
        assert_eq!(count_crossings(&ours, &theirs), 0);
        assert_eq!(junctions(&ours, &theirs), vec![Point::new(2.0, 0.0)]);
    }
}
