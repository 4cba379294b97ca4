//! Segment, rectangle and circle intersection helpers used by the routers and
//! by design rule checks.

use picoplace_circuit::{Bounds, Point};

const EPSILON: f64 = 1e-9;

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

/// Whether segments `a1-a2` and `b1-b2` share at least one point.
pub fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = cross(b1, b2, a1);
    let d2 = cross(b1, b2, a2);
    let d3 = cross(a1, a2, b1);
    let d4 = cross(a1, a2, b2);

    if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
    {
        return true;
    }

    (d1.abs() <= EPSILON && on_segment(a1, b1, b2))
        || (d2.abs() <= EPSILON && on_segment(a2, b1, b2))
        || (d3.abs() <= EPSILON && on_segment(b1, a1, a2))
        || (d4.abs() <= EPSILON && on_segment(b2, a1, a2))
}

/// The single crossing point of two non-parallel segments.
pub fn segment_intersection_point(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let r = a2 - a1;
    let s = b2 - b1;
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < EPSILON {
        return None;
    }
    let qp = b1 - a1;
    let t = (qp.x * s.y - qp.y * s.x) / denom;
    let u = (qp.x * r.y - qp.y * r.x) / denom;
    if (-EPSILON..=1.0 + EPSILON).contains(&t) && (-EPSILON..=1.0 + EPSILON).contains(&u) {
        Some(Point::new(a1.x + t * r.x, a1.y + t * r.y))
    } else {
        None
    }
}

pub fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len_sq = ab.x * ab.x + ab.y * ab.y;
    if len_sq < EPSILON {
        return p.distance(&a);
    }
    let t = (((p.x - a.x) * ab.x + (p.y - a.y) * ab.y) / len_sq).clamp(0.0, 1.0);
    p.distance(&Point::new(a.x + t * ab.x, a.y + t * ab.y))
}

pub fn segment_to_segment_distance(a1: Point, a2: Point, b1: Point, b2: Point) -> f64 {
    if segments_intersect(a1, a2, b1, b2) {
        return 0.0;
    }
    point_to_segment_distance(a1, b1, b2)
        .min(point_to_segment_distance(a2, b1, b2))
        .min(point_to_segment_distance(b1, a1, a2))
        .min(point_to_segment_distance(b2, a1, a2))
}

/// Whether the segment touches the closed rectangle.
pub fn segment_intersects_rect(a: Point, b: Point, rect: &Bounds) -> bool {
    if rect.contains(&a) || rect.contains(&b) {
        return true;
    }
    let [c0, c1, c2, c3] = rect.corners();
    segments_intersect(a, b, c0, c1)
        || segments_intersect(a, b, c1, c2)
        || segments_intersect(a, b, c2, c3)
        || segments_intersect(a, b, c3, c0)
}

pub fn segment_intersects_circle(a: Point, b: Point, center: Point, radius: f64) -> bool {
    point_to_segment_distance(center, a, b) <= radius
}

/// Distance between a segment and a rectangle, zero when they touch.
pub fn segment_to_rect_distance(a: Point, b: Point, rect: &Bounds) -> f64 {
    if segment_intersects_rect(a, b, rect) {
        return 0.0;
    }
    let [c0, c1, c2, c3] = rect.corners();
    [(c0, c1), (c1, c2), (c2, c3), (c3, c0)]
        .into_iter()
        .map(|(e1, e2)| segment_to_segment_distance(a, b, e1, e2))
        .fold(f64::INFINITY, f64::min)
}

/// Gap between two rectangles, zero when they overlap.
pub fn rect_to_rect_distance(a: &Bounds, b: &Bounds) -> f64 {
    let dx = (a.min_x.max(b.min_x) - a.max_x.min(b.max_x)).max(0.0);
    let dy = (a.min_y.max(b.min_y) - a.max_y.min(b.max_y)).max(0.0);
    (dx * dx + dy * dy).sqrt()
}

/// Whether two segments are perpendicular within a small angular tolerance.
pub fn is_perpendicular(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let r = a2 - a1;
    let s = b2 - b1;
    let lr = (r.x * r.x + r.y * r.y).sqrt();
    let ls = (s.x * s.x + s.y * s.y).sqrt();
    if lr < EPSILON || ls < EPSILON {
        return false;
    }
    ((r.x * s.x + r.y * s.y) / (lr * ls)).abs() < 1e-6
}

/// Whether any part of the segment leaves `polygon`.
pub fn segment_leaves_polygon(a: Point, b: Point, polygon: &[Point]) -> bool {
    use picoplace_circuit::point_in_polygon;

    if !point_in_polygon(&a, polygon) || !point_in_polygon(&b, polygon) {
        return true;
    }
    let d = b - a;
    let len_sq = d.x * d.x + d.y * d.y;
    if len_sq < EPSILON {
        return false;
    }

    // Split the segment at every boundary crossing and test each piece.
    let mut ts = vec![0.0, 1.0];
    let n = polygon.len();
    for i in 0..n {
        if let Some(hit) = segment_intersection_point(a, b, polygon[i], polygon[(i + 1) % n]) {
            ts.push(((hit.x - a.x) * d.x + (hit.y - a.y) * d.y) / len_sq);
        }
    }
    ts.sort_by(|x, y| x.total_cmp(y));
    ts.windows(2).any(|w| {
        let t = (w[0] + w[1]) / 2.0;
        !point_in_polygon(&(a + d * t), polygon)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_segments_intersect() {
        let hit = segment_intersection_point(
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 0.0),
        );
        assert_eq!(hit, Some(Point::new(5.0, 5.0)));
    }

    #[test]
    fn parallel_segments_do_not_intersect() {
        assert!(!segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(10.0, 1.0),
        ));
        assert_eq!(
            segment_to_segment_distance(
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(10.0, 1.0),
            ),
            1.0
        );
    }

    #[test]
    fn segment_through_rect() {
        let rect = Bounds::new(4.0, -1.0, 6.0, 1.0);
        assert!(segment_intersects_rect(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            &rect
        ));
        assert!(!segment_intersects_rect(
            Point::new(0.0, 2.0),
            Point::new(10.0, 2.0),
            &rect
        ));
    }

    #[test]
    fn segment_near_circle() {
        assert!(segment_intersects_circle(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 0.4),
            0.5
        ));
    }

    #[test]
    fn segment_leaving_concave_outline() {
        // U shape: the notch between the arms is outside.
        let outline = vec![
            Point::new(0.0, 0.0),
            Point::new(30.0, 0.0),
            Point::new(30.0, 30.0),
            Point::new(20.0, 30.0),
            Point::new(20.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 30.0),
            Point::new(0.0, 30.0),
        ];
        assert!(segment_leaves_polygon(
            Point::new(5.0, 20.0),
            Point::new(25.0, 20.0),
            &outline
        ));
        assert!(!segment_leaves_polygon(
            Point::new(5.0, 5.0),
            Point::new(25.0, 5.0),
            &outline
        ));
    }
}
