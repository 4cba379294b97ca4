//! # picoplace-engine
//!
//! This crate contains the geometric algorithms behind the render pipeline:
//! the autorouter contract and its built-in strategies, layer assignment for
//! hinted routes, copper pour polygon operations, the corner-tracking packer
//! used to place components without explicit positions, and the SVG
//! visualization of a rendered board.
//!
//! Nothing in here knows about the component tree; inputs and outputs are
//! plain geometry and `picoplace-circuit` records.

pub mod autorouter;
pub mod direct;
pub mod geometry;
pub mod layers;
pub mod pour;
pub mod router;
pub mod simplify;

pub use autorouter::{
    Autorouter, AutorouterError, AutorouterKind, Connection, ConnectionPoint, Obstacle,
    RoutedTrace, SimpleRouteJson,
};
pub use router::{GridRouter, GridRouterConfig};

// --- Placer ---

pub mod placer {
    //! Corner-tracking packer.
    //!
    //! Items are placed largest first. Each placed item offers two candidate
    //! corners (to its right and above it); the next item goes to the free
    //! candidate that keeps the packed group most compact and square.

    use picoplace_circuit::{Bounds, Point, Size};

    #[derive(Debug, Clone, PartialEq)]
    pub struct Packed<K> {
        /// Item centers, relative to the center of the packed group.
        pub placements: Vec<(K, Point)>,
        pub width: f64,
        pub height: f64,
    }

    pub fn pack<K: Clone>(items: &[(K, Size)], spacing: f64) -> Packed<K> {
        if items.is_empty() {
            return Packed {
                placements: Vec::new(),
                width: 0.0,
                height: 0.0,
            };
        }

        // Sort by area (largest first), keeping input order on ties.
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| {
            let area_a = items[a].1.width * items[a].1.height;
            let area_b = items[b].1.width * items[b].1.height;
            area_b.total_cmp(&area_a).then(a.cmp(&b))
        });

        let mut placement_points: Vec<Point> = vec![Point::ORIGIN];
        let mut placed: Vec<(usize, Bounds)> = Vec::new();
        let mut group: Option<Bounds> = None;

        for idx in order {
            let size = items[idx].1;
            let mut best: Option<(Point, f64)> = None;

            for point in &placement_points {
                let test = Bounds::new(point.x, point.y, point.x + size.width, point.y + size.height);
                // Touching edges are fine, spacing is built into the candidates.
                let collides = placed.iter().any(|(_, b)| {
                    test.min_x < b.max_x - 1e-9
                        && test.max_x > b.min_x + 1e-9
                        && test.min_y < b.max_y - 1e-9
                        && test.max_y > b.min_y + 1e-9
                });
                if collides {
                    continue;
                }
                // Calculate score (prefer compact layouts)
                let g = group.map_or(test, |g| g.union(&test));
                let score = g.width() + g.height() + (g.width() - g.height()).abs();
                if best.map_or(true, |(_, s)| score < s - 1e-9) {
                    best = Some((*point, score));
                }
            }

            // The frontier always has a free corner to the right of the group.
            let position = match best {
                Some((p, _)) => p,
                None => Point::new(group.map_or(0.0, |g| g.max_x + spacing), 0.0),
            };
            let bounds = Bounds::new(
                position.x,
                position.y,
                position.x + size.width,
                position.y + size.height,
            );

            placement_points.retain(|p| *p != position);
            placement_points.push(Point::new(bounds.max_x + spacing, bounds.min_y)); // right side
            placement_points.push(Point::new(bounds.min_x, bounds.max_y + spacing)); // top side

            group = Some(group.map_or(bounds, |g| g.union(&bounds)));
            placed.push((idx, bounds));
        }

        let group = group.unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0));
        let center = group.center();
        placed.sort_by_key(|(idx, _)| *idx);

        Packed {
            placements: placed
                .into_iter()
                .map(|(idx, b)| (items[idx].0.clone(), b.center() - center))
                .collect(),
            width: group.width(),
            height: group.height(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn packs_without_overlap() {
            let items = vec![
                ("R1", Size::new(10.0, 5.0)),
                ("C1", Size::new(8.0, 8.0)),
                ("U1", Size::new(20.0, 15.0)),
            ];
            let packed = pack(&items, 1.0);
            assert_eq!(packed.placements.len(), 3);
            let boxes: Vec<Bounds> = packed
                .placements
                .iter()
                .zip(&items)
                .map(|((_, c), (_, s))| Bounds::from_center(*c, s.width, s.height))
                .collect();
            for i in 0..boxes.len() {
                for j in i + 1..boxes.len() {
                    let (a, b) = (boxes[i], boxes[j]);
                    let overlap = a.min_x < b.max_x && a.max_x > b.min_x && a.min_y < b.max_y && a.max_y > b.min_y;
                    assert!(!overlap, "{:?} overlaps {:?}", a, b);
                }
            }
            assert!(packed.width >= 20.0);
            assert!(packed.height >= 15.0);
        }

        #[test]
        fn single_item_is_centered() {
            let packed = pack(&[("R1", Size::new(2.0, 1.0))], 1.0);
            assert_eq!(packed.placements[0].1, Point::ORIGIN);
            assert_eq!((packed.width, packed.height), (2.0, 1.0));
        }
    }
}

// --- SVG Generator ---

pub mod svg_generator {
    use anyhow::{Context, Result};
    use picoplace_circuit::{Bounds, CircuitDb, LayerRef, PadShape, Point};
    use std::path::Path;
    use svg::node::element::{Circle, Line, Polygon, Rectangle, Text};
    use svg::Document;

    fn layer_color(layer: LayerRef) -> &'static str {
        match layer {
            LayerRef::Top => "#c83434",
            LayerRef::Bottom => "#3434c8",
            _ => "#34a034",
        }
    }

    fn points_attr(points: &[Point], flip: &impl Fn(Point) -> Point) -> String {
        points
            .iter()
            .map(|p| {
                let p = flip(*p);
                format!("{},{}", p.x, p.y)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn document_bounds(db: &CircuitDb) -> Bounds {
        let mut bounds: Option<Bounds> = None;
        let mut add = |b: Bounds| bounds = Some(bounds.map_or(b, |x| x.union(&b)));
        for board in db.pcb_board.iter() {
            add(board.bounds());
        }
        for comp in db.pcb_component.iter() {
            add(comp.bounds());
        }
        for trace in db.pcb_trace.iter() {
            let points: Vec<Point> = trace.route.iter().map(|p| p.point()).collect();
            if let Some(b) = Bounds::from_points(&points) {
                add(b);
            }
        }
        bounds.unwrap_or(Bounds::new(0.0, 0.0, 100.0, 100.0)).expand(2.0)
    }

    /// Renders the physical records of `db` as an SVG document.
    pub fn render(db: &CircuitDb) -> Document {
        let bounds = document_bounds(db);
        // SVG grows downwards, board coordinates grow upwards.
        let flip = |p: Point| Point::new(p.x - bounds.min_x, bounds.max_y - p.y);

        let mut document = Document::new()
            .set("width", format!("{}mm", bounds.width()))
            .set("height", format!("{}mm", bounds.height()))
            .set("viewBox", (0.0, 0.0, bounds.width(), bounds.height()));

        // --- Draw Board ---
        for board in db.pcb_board.iter() {
            let outline = Polygon::new()
                .set("points", points_attr(&board.outline_polygon(), &flip))
                .set("fill", "#0b3d0b")
                .set("stroke", "#d9d9a0")
                .set("stroke-width", 0.1);
            document = document.add(outline);
        }

        // --- Draw Copper Pours ---
        for pour in db.pcb_copper_pour.iter() {
            let mut shape = Polygon::new()
                .set("points", points_attr(&pour.outer_ring, &flip))
                .set("fill", layer_color(pour.layer))
                .set("fill-opacity", 0.3);
            if !pour.inner_rings.is_empty() {
                shape = shape.set("data-holes", pour.inner_rings.len());
            }
            document = document.add(shape);
        }

        // --- Draw Components ---
        for comp in db.pcb_component.iter() {
            let top_left = flip(Point::new(
                comp.center.x - comp.width / 2.0,
                comp.center.y + comp.height / 2.0,
            ));
            let rect = Rectangle::new()
                .set("x", top_left.x)
                .set("y", top_left.y)
                .set("width", comp.width)
                .set("height", comp.height)
                .set("fill", "none")
                .set("stroke", "#a0a0a0")
                .set("stroke-width", 0.05);
            document = document.add(rect);

            if let Some(source) = db.source_component.get(&comp.source_component_id) {
                let text = Text::new()
                    .set("x", top_left.x)
                    .set("y", top_left.y - 0.2)
                    .set("font-size", "0.8px")
                    .set("fill", "#ffffff")
                    .add(svg::node::Text::new(source.name.clone()));
                document = document.add(text);
            }
        }

        // --- Draw Pads ---
        for pad in db.pcb_smtpad.iter() {
            let center = flip(pad.center());
            let color = layer_color(pad.layer);
            document = match pad.shape {
                PadShape::Rect => document.add(
                    Rectangle::new()
                        .set("x", center.x - pad.width / 2.0)
                        .set("y", center.y - pad.height / 2.0)
                        .set("width", pad.width)
                        .set("height", pad.height)
                        .set("fill", color),
                ),
                PadShape::Circle => document.add(
                    Circle::new()
                        .set("cx", center.x)
                        .set("cy", center.y)
                        .set("r", pad.width / 2.0)
                        .set("fill", color),
                ),
            };
        }
        for hole in db.pcb_plated_hole.iter() {
            let center = flip(hole.center());
            document = document
                .add(
                    Circle::new()
                        .set("cx", center.x)
                        .set("cy", center.y)
                        .set("r", hole.outer_diameter / 2.0)
                        .set("fill", "#c8a034"),
                )
                .add(
                    Circle::new()
                        .set("cx", center.x)
                        .set("cy", center.y)
                        .set("r", hole.hole_diameter / 2.0)
                        .set("fill", "#000000"),
                );
        }

        // --- Draw Traces ---
        for trace in db.pcb_trace.iter() {
            for segment in trace.segments() {
                let (a, b) = (flip(segment.start), flip(segment.end));
                let line = Line::new()
                    .set("x1", a.x)
                    .set("y1", a.y)
                    .set("x2", b.x)
                    .set("y2", b.y)
                    .set("stroke", layer_color(segment.layer))
                    .set("stroke-width", segment.width)
                    .set("stroke-linecap", "round");
                document = document.add(line);
            }
        }
        for via in db.pcb_via.iter() {
            let center = flip(via.center());
            document = document.add(
                Circle::new()
                    .set("cx", center.x)
                    .set("cy", center.y)
                    .set("r", via.outer_diameter / 2.0)
                    .set("fill", "#c8c8c8")
                    .set("stroke", "#000000")
                    .set("stroke-width", via.hole_diameter / 2.0),
            );
        }

        // --- Draw Diagnostics ---
        for error in db.errors() {
            if let Some(center) = error.center {
                let c = flip(center);
                document = document.add(
                    Circle::new()
                        .set("cx", c.x)
                        .set("cy", c.y)
                        .set("r", 0.5)
                        .set("fill", "none")
                        .set("stroke", "#ff00ff")
                        .set("stroke-width", 0.1),
                );
            }
        }

        document
    }

    /// Renders `db` and writes the SVG to `output_path`.
    pub fn run(db: &CircuitDb, output_path: &Path) -> Result<()> {
        let document = render(db);
        svg::save(output_path, &document)
            .with_context(|| format!("Failed to save SVG to {}", output_path.display()))?;

        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use picoplace_circuit::{PcbTrace, RoutePoint};

        #[test]
        fn renders_traces_as_lines() {
            let mut db = CircuitDb::new();
            db.pcb_trace.insert(PcbTrace::new(
                None,
                vec![
                    RoutePoint::wire(Point::new(0.0, 0.0), 0.2, LayerRef::Top),
                    RoutePoint::wire(Point::new(5.0, 0.0), 0.2, LayerRef::Top),
                ],
            ));
            let svg = render(&db).to_string();
            assert!(svg.contains("<line"));
            assert!(svg.contains("#c83434"));
        }
    }
}
