//! Route cleanup shared by every strategy.

use picoplace_circuit::RoutePoint;

const EPSILON: f64 = 1e-6;

/// Drop repeated wire points and merge collinear runs on the same layer.
///
/// Points next to a via are kept so the layer change stays anchored.
pub fn simplify_route(route: &[RoutePoint]) -> Vec<RoutePoint> {
    let mut deduped: Vec<RoutePoint> = Vec::with_capacity(route.len());
    for p in route {
        if let Some(last) = deduped.last() {
            let same_spot = last.point().approx_eq(&p.point(), EPSILON);
            if same_spot && !last.is_via() && !p.is_via() && last.layer() == p.layer() {
                continue;
            }
        }
        deduped.push(*p);
    }

    let mut out: Vec<RoutePoint> = Vec::with_capacity(deduped.len());
    for p in deduped {
        if out.len() >= 2 {
            let b = out[out.len() - 1];
            let a = out[out.len() - 2];
            if is_mergeable(&a, &b, &p) {
                out.pop();
            }
        }
        out.push(p);
    }
    out
}

fn is_mergeable(a: &RoutePoint, b: &RoutePoint, c: &RoutePoint) -> bool {
    match (a, b, c) {
        (
            RoutePoint::Wire {
                layer: la,
                width: wa,
                ..
            },
            RoutePoint::Wire {
                layer: lb,
                width: wb,
                ..
            },
            RoutePoint::Wire { layer: lc, .. },
        ) => {
            la == lb && lb == lc && (wa - wb).abs() < EPSILON && collinear(a, b, c)
        }
        _ => false,
    }
}

fn collinear(a: &RoutePoint, b: &RoutePoint, c: &RoutePoint) -> bool {
    let (a, b, c) = (a.point(), b.point(), c.point());
    let cross = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    // `b` must also sit between `a` and `c`, otherwise the route doubles back.
    let dot = (b.x - a.x) * (c.x - b.x) + (b.y - a.y) * (c.y - b.y);
    cross.abs() < EPSILON && dot >= -EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use picoplace_circuit::{LayerRef, Point};

    fn w(x: f64, y: f64) -> RoutePoint {
        RoutePoint::wire(Point::new(x, y), 0.15, LayerRef::Top)
    }

    #[test]
    fn merges_straight_runs() {
        let route = vec![w(0.0, 0.0), w(1.0, 0.0), w(2.0, 0.0), w(2.0, 1.0), w(2.0, 2.0)];
        let simplified = simplify_route(&route);
        assert_eq!(simplified, vec![w(0.0, 0.0), w(2.0, 0.0), w(2.0, 2.0)]);
    }

    #[test]
    fn keeps_points_around_vias() {
        let route = vec![
            w(0.0, 0.0),
            w(1.0, 0.0),
            RoutePoint::via(Point::new(1.0, 0.0), LayerRef::Top, LayerRef::Bottom),
            RoutePoint::wire(Point::new(1.0, 0.0), 0.15, LayerRef::Bottom),
            RoutePoint::wire(Point::new(2.0, 0.0), 0.15, LayerRef::Bottom),
        ];
        assert_eq!(simplify_route(&route).len(), 5);
    }

    #[test]
    fn drops_duplicate_points() {
        let route = vec![w(0.0, 0.0), w(0.0, 0.0), w(0.0, 3.0)];
        assert_eq!(simplify_route(&route), vec![w(0.0, 0.0), w(0.0, 3.0)]);
    }
}
