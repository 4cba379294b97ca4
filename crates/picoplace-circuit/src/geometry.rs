//! Plain geometry value types shared by every record kind.
//!
//! All coordinates are millimetres on the board and abstract schematic units on
//! the diagram. Y grows upwards in both domains.

use derive_more::{Add, Mul, Sub};
use serde::{Deserialize, Serialize};

/// A 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Add, Sub, Mul)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn manhattan_distance(&self, other: &Point) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }

    /// Rotate counter-clockwise around the origin by `degrees`.
    pub fn rotate(&self, degrees: f64) -> Point {
        if degrees == 0.0 {
            return *self;
        }
        let (sin, cos) = degrees.to_radians().sin_cos();
        // Snap tiny residues so quarter turns stay on grid.
        let snap = |v: f64| if v.abs() < 1e-9 { 0.0 } else { v };
        Point::new(
            snap(self.x * cos - self.y * sin),
            snap(self.x * sin + self.y * cos),
        )
    }

    pub fn approx_eq(&self, other: &Point, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon && (self.y - other.y).abs() <= epsilon
    }
}

/// Width and height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: max_x.max(min_x),
            max_y: max_y.max(min_y),
        }
    }

    pub fn from_center(center: Point, width: f64, height: f64) -> Self {
        Self::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            center.x + width / 2.0,
            center.y + height / 2.0,
        )
    }

    /// Bounds of a point cloud, `None` when empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Bounds::new(first.x, first.y, first.x, first.y);
        for p in iter {
            bounds.min_x = bounds.min_x.min(p.x);
            bounds.min_y = bounds.min_y.min(p.y);
            bounds.max_x = bounds.max_x.max(p.x);
            bounds.max_y = bounds.max_y.max(p.y);
        }
        Some(bounds)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn expand(&self, margin: f64) -> Bounds {
        Bounds::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.min_x, self.min_y),
            Point::new(self.max_x, self.min_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.min_x, self.max_y),
        ]
    }
}

/// Copper layer of a physical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRef {
    Top,
    Inner1,
    Inner2,
    Inner3,
    Inner4,
    Bottom,
}

impl LayerRef {
    /// Copper layers of a board with `layer_count` layers, top to bottom.
    pub fn stack(layer_count: u8) -> Vec<LayerRef> {
        match layer_count {
            0 | 1 => vec![LayerRef::Top],
            2 | 3 => vec![LayerRef::Top, LayerRef::Bottom],
            4 | 5 => vec![
                LayerRef::Top,
                LayerRef::Inner1,
                LayerRef::Inner2,
                LayerRef::Bottom,
            ],
            _ => vec![
                LayerRef::Top,
                LayerRef::Inner1,
                LayerRef::Inner2,
                LayerRef::Inner3,
                LayerRef::Inner4,
                LayerRef::Bottom,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerRef::Top => "top",
            LayerRef::Inner1 => "inner1",
            LayerRef::Inner2 => "inner2",
            LayerRef::Inner3 => "inner3",
            LayerRef::Inner4 => "inner4",
            LayerRef::Bottom => "bottom",
        }
    }

    /// The opposite outer layer; inner layers map to bottom.
    pub fn flip(&self) -> LayerRef {
        match self {
            LayerRef::Bottom => LayerRef::Top,
            _ => LayerRef::Bottom,
        }
    }
}

impl std::fmt::Display for LayerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Even-odd point in polygon test. Points on an edge count as inside.
pub fn point_in_polygon(p: &Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        if point_on_segment(p, &a, &b, 1e-9) {
            return true;
        }
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > p.y) != (pj.y > p.y)
            && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Whether `p` lies on segment `a`-`b` within `epsilon`.
pub fn point_on_segment(p: &Point, a: &Point, b: &Point, epsilon: f64) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let len = a.distance(b);
    if len == 0.0 {
        return p.distance(a) <= epsilon;
    }
    if (cross / len).abs() > epsilon {
        return false;
    }
    p.x >= a.x.min(b.x) - epsilon
        && p.x <= a.x.max(b.x) + epsilon
        && p.y >= a.y.min(b.y) - epsilon
        && p.y <= a.y.max(b.y) + epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_quarter_turn_stays_exact() {
        let p = Point::new(1.0, 0.0).rotate(90.0);
        assert_eq!(p, Point::new(0.0, 1.0));
    }

    #[test]
    fn polygon_contains_edges_and_interior() {
        let square = Bounds::new(0.0, 0.0, 10.0, 10.0).corners();
        assert!(point_in_polygon(&Point::new(5.0, 5.0), &square));
        assert!(point_in_polygon(&Point::new(10.0, 5.0), &square));
        assert!(!point_in_polygon(&Point::new(10.5, 5.0), &square));
    }

    #[test]
    fn layer_stack_for_four_layers() {
        assert_eq!(
            LayerRef::stack(4),
            vec![
                LayerRef::Top,
                LayerRef::Inner1,
                LayerRef::Inner2,
                LayerRef::Bottom
            ]
        );
    }
}
