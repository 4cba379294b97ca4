//! Copper pour geometry: a region minus clearance-expanded foreign copper.

use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use picoplace_circuit::{Bounds, Point};

/// One connected piece of poured copper.
#[derive(Debug, Clone, PartialEq)]
pub struct PourPolygon {
    pub outer: Vec<Point>,
    pub holes: Vec<Vec<Point>>,
}

fn to_ring(points: &[Point]) -> LineString<f64> {
    let mut coords: Vec<Coord<f64>> = points.iter().map(|p| Coord { x: p.x, y: p.y }).collect();
    // Ensure the ring is closed
    if coords.first() != coords.last() {
        if let Some(first) = coords.first().cloned() {
            coords.push(first);
        }
    }
    LineString::new(coords)
}

fn from_ring(ring: &LineString<f64>) -> Vec<Point> {
    let mut points: Vec<Point> = ring.coords().map(|c| Point::new(c.x, c.y)).collect();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn to_multi(points: &[Point]) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![Polygon::new(to_ring(points), vec![])])
}

pub fn rect_polygon(bounds: &Bounds) -> Vec<Point> {
    bounds.corners().to_vec()
}

/// Regular polygon approximating a circle.
pub fn circle_polygon(center: Point, radius: f64, segments: usize) -> Vec<Point> {
    let segments = segments.max(6);
    (0..segments)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / segments as f64;
            Point::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
        })
        .collect()
}

/// Rectangle around a segment, extended by `half_width` past both ends.
pub fn segment_polygon(a: Point, b: Point, half_width: f64) -> Vec<Point> {
    let d = b - a;
    let len = (d.x * d.x + d.y * d.y).sqrt();
    if len < 1e-9 {
        return rect_polygon(&Bounds::from_center(a, half_width * 2.0, half_width * 2.0));
    }
    let ux = d.x / len * half_width;
    let uy = d.y / len * half_width;
    // Normal scaled to half_width.
    let (nx, ny) = (-uy, ux);
    vec![
        Point::new(a.x - ux + nx, a.y - uy + ny),
        Point::new(b.x + ux + nx, b.y + uy + ny),
        Point::new(b.x + ux - nx, b.y + uy - ny),
        Point::new(a.x - ux - nx, a.y - uy - ny),
    ]
}

/// Subtract every cutout from `region`.
pub fn compute_pour(region: &[Point], cutouts: &[Vec<Point>]) -> Vec<PourPolygon> {
    if region.len() < 3 {
        return Vec::new();
    }

    let mut cut: Option<MultiPolygon<f64>> = None;
    for shape in cutouts.iter().filter(|s| s.len() >= 3) {
        let shape = to_multi(shape);
        cut = Some(match cut {
            Some(existing) => existing.union(&shape),
            None => shape,
        });
    }

    let poured = match cut {
        Some(cut) => to_multi(region).difference(&cut),
        None => to_multi(region),
    };

    poured
        .0
        .iter()
        .map(|poly| PourPolygon {
            outer: from_ring(poly.exterior()),
            holes: poly.interiors().iter().map(from_ring).collect(),
        })
        .filter(|p| p.outer.len() >= 3)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_in_middle_becomes_hole() {
        let board = rect_polygon(&Bounds::new(0.0, 0.0, 10.0, 10.0));
        let pad = rect_polygon(&Bounds::new(4.0, 4.0, 6.0, 6.0));
        let pours = compute_pour(&board, &[pad]);
        assert_eq!(pours.len(), 1);
        assert_eq!(pours[0].holes.len(), 1);
    }

    #[test]
    fn full_width_cut_splits_region() {
        let board = rect_polygon(&Bounds::new(0.0, 0.0, 10.0, 10.0));
        let trace = segment_polygon(Point::new(-1.0, 5.0), Point::new(11.0, 5.0), 0.5);
        let pours = compute_pour(&board, &[trace]);
        assert_eq!(pours.len(), 2);
    }

    #[test]
    fn no_cutouts_keeps_region() {
        let board = rect_polygon(&Bounds::new(0.0, 0.0, 10.0, 10.0));
        let pours = compute_pour(&board, &[]);
        assert_eq!(pours.len(), 1);
        assert_eq!(pours[0].outer.len(), 4);
    }
}
