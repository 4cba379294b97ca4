//! A* Router
//!
//! This module implements an A* search over a layered grid. Cells covered by
//! obstacles (expanded by half the trace width plus clearance) are blocked on
//! the obstacle's layers; a route may change layers through a via where the
//! via footprint is clear. Turns and vias carry extra cost so routes stay
//! straight and on as few layers as possible.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use log::debug;
use picoplace_circuit::{point_in_polygon, Bounds, LayerRef, Point, RoutePoint};
use serde::{Deserialize, Serialize};

use crate::autorouter::{
    Autorouter, AutorouterError, Connection, ConnectionPoint, Obstacle, RoutedTrace,
    SimpleRouteJson,
};
use crate::simplify::simplify_route;

/// Grid cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub x: i32,
    pub y: i32,
    pub layer: usize,
}

/// Search state: a cell plus the direction we arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct State {
    cell: GridCell,
    dir: Option<u8>,
}

/// A node in the A* search
#[derive(Debug, Clone, PartialEq)]
struct AStarNode {
    state: State,
    g_cost: f64, // Cost from start
    h_cost: f64, // Heuristic cost to goal
}

impl AStarNode {
    fn f_cost(&self) -> f64 {
        self.g_cost + self.h_cost
    }
}

impl Eq for AStarNode {}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .f_cost()
            .partial_cmp(&self.f_cost())
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.h_cost.partial_cmp(&self.h_cost).unwrap_or(Ordering::Equal))
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

const DIRECTIONS: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridRouterConfig {
    /// Grid resolution (mm per cell)
    pub grid_resolution: f64,
    /// Minimum copper to copper distance
    pub trace_clearance: f64,
    /// Extra cost for changing direction, in cells
    pub turn_cost: f64,
    /// Extra cost for a layer change, in cells
    pub via_cost: f64,
    pub via_diameter: f64,
    /// Upper bound on expanded search nodes per connection
    pub max_iterations: usize,
}

impl Default for GridRouterConfig {
    fn default() -> Self {
        Self {
            grid_resolution: 0.1,
            trace_clearance: 0.15,
            turn_cost: 2.0,
            via_cost: 20.0,
            via_diameter: 0.6,
            max_iterations: 400_000,
        }
    }
}

/// Blocked cells for one connection.
struct Grid {
    origin: Point,
    resolution: f64,
    width: i32,
    height: i32,
    layers: Vec<LayerRef>,
    blocked: Vec<HashSet<(i32, i32)>>,
    via_blocked: HashSet<(i32, i32)>,
    outside: HashSet<(i32, i32)>,
}

impl Grid {
    fn new(bounds: Bounds, resolution: f64, layers: Vec<LayerRef>) -> Self {
        let width = (bounds.width() / resolution).ceil() as i32 + 1;
        let height = (bounds.height() / resolution).ceil() as i32 + 1;
        let blocked = vec![HashSet::new(); layers.len()];
        Self {
            origin: Point::new(bounds.min_x, bounds.min_y),
            resolution,
            width,
            height,
            layers,
            blocked,
            via_blocked: HashSet::new(),
            outside: HashSet::new(),
        }
    }

    fn layer_index(&self, layer: LayerRef) -> usize {
        self.layers.iter().position(|l| *l == layer).unwrap_or(0)
    }

    /// Convert point to grid cell
    fn point_to_grid(&self, point: Point, layer: usize) -> GridCell {
        GridCell {
            x: ((point.x - self.origin.x) / self.resolution).round() as i32,
            y: ((point.y - self.origin.y) / self.resolution).round() as i32,
            layer,
        }
    }

    /// Convert grid cell to point
    fn grid_to_point(&self, cell: GridCell) -> Point {
        Point::new(
            self.origin.x + cell.x as f64 * self.resolution,
            self.origin.y + cell.y as f64 * self.resolution,
        )
    }

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    fn cells_covering(&self, rect: &Bounds) -> impl Iterator<Item = (i32, i32)> {
        let x0 = ((rect.min_x - self.origin.x) / self.resolution).ceil() as i32;
        let y0 = ((rect.min_y - self.origin.y) / self.resolution).ceil() as i32;
        let x1 = ((rect.max_x - self.origin.x) / self.resolution).floor() as i32;
        let y1 = ((rect.max_y - self.origin.y) / self.resolution).floor() as i32;
        let (w, h) = (self.width, self.height);
        (x0.max(0)..=x1.min(w - 1)).flat_map(move |x| (y0.max(0)..=y1.min(h - 1)).map(move |y| (x, y)))
    }

    fn block(&mut self, obstacle: &Obstacle, trace_margin: f64, via_margin: f64) {
        let trace_rect = obstacle.bounds().expand(trace_margin);
        let cells: Vec<_> = self.cells_covering(&trace_rect).collect();
        for (i, layer) in self.layers.clone().into_iter().enumerate() {
            if obstacle.on_layer(layer) {
                self.blocked[i].extend(cells.iter().copied());
            }
        }
        let via_rect = obstacle.bounds().expand(via_margin);
        let cells: Vec<_> = self.cells_covering(&via_rect).collect();
        self.via_blocked.extend(cells);
    }

    fn block_outside(&mut self, outline: &[Point], margin: f64) {
        for x in 0..self.width {
            for y in 0..self.height {
                let p = self.grid_to_point(GridCell { x, y, layer: 0 });
                let probes = [
                    p,
                    p.translate(margin, 0.0),
                    p.translate(-margin, 0.0),
                    p.translate(0.0, margin),
                    p.translate(0.0, -margin),
                ];
                if probes.iter().any(|q| !point_in_polygon(q, outline)) {
                    self.outside.insert((x, y));
                }
            }
        }
    }

    fn is_free(&self, cell: GridCell) -> bool {
        self.in_bounds(cell.x, cell.y)
            && !self.outside.contains(&(cell.x, cell.y))
            && !self.blocked[cell.layer].contains(&(cell.x, cell.y))
    }
}

/// A* Router
pub struct GridRouter {
    config: GridRouterConfig,
}

impl GridRouter {
    pub fn new(config: GridRouterConfig) -> Self {
        Self { config }
    }

    fn build_grid(
        &self,
        problem: &SimpleRouteJson,
        connection: &Connection,
        extra: &[Obstacle],
    ) -> Grid {
        let mut bounds = problem.bounds;
        for p in &connection.points_to_connect {
            let at = p.point();
            bounds = bounds.union(&Bounds::new(at.x, at.y, at.x, at.y));
        }
        let mut grid = Grid::new(bounds, self.config.grid_resolution, problem.layers());

        let trace_margin = problem.min_trace_width / 2.0 + self.config.trace_clearance;
        let via_margin = self.config.via_diameter / 2.0 + self.config.trace_clearance;
        let ids = connection.connected_id_set();
        for obstacle in problem.obstacles.iter().chain(extra) {
            if !obstacle.is_connected_to(&ids) {
                grid.block(obstacle, trace_margin, via_margin);
            }
        }
        if let Some(outline) = &problem.outline {
            if outline.len() >= 3 {
                grid.block_outside(outline, problem.min_trace_width / 2.0);
            }
        }
        grid
    }

    /// Find a path between two points using A*
    fn find_path(
        &self,
        grid: &Grid,
        connection: &str,
        start: &ConnectionPoint,
        goal: &ConnectionPoint,
        layer_changes: bool,
    ) -> Result<Vec<GridCell>, AutorouterError> {
        let start_cell = grid.point_to_grid(start.point(), grid.layer_index(start.layer));
        let goal_cell = grid.point_to_grid(goal.point(), grid.layer_index(goal.layer));

        if start_cell.layer != goal_cell.layer && !layer_changes {
            return Err(AutorouterError::LayerChangeUnsupported {
                connection: connection.to_string(),
                router: "grid",
            });
        }

        let passable = |cell: GridCell| -> bool {
            (cell.x == start_cell.x && cell.y == start_cell.y)
                || (cell.x == goal_cell.x && cell.y == goal_cell.y)
                || grid.is_free(cell)
        };

        let mut open_set = BinaryHeap::new();
        let mut closed_set = HashSet::new();
        let mut came_from: HashMap<State, State> = HashMap::new();
        let mut g_scores: HashMap<State, f64> = HashMap::new();

        let start_state = State {
            cell: start_cell,
            dir: None,
        };
        g_scores.insert(start_state, 0.0);
        open_set.push(AStarNode {
            state: start_state,
            g_cost: 0.0,
            h_cost: self.heuristic(start_cell, goal_cell),
        });

        let mut iterations = 0;
        while let Some(current) = open_set.pop() {
            if current.state.cell == goal_cell {
                return Ok(Self::reconstruct_path(&came_from, current.state));
            }

            if !closed_set.insert(current.state) {
                continue;
            }

            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(AutorouterError::IterationLimit {
                    connection: connection.to_string(),
                    iterations,
                });
            }

            let current_g = g_scores
                .get(&current.state)
                .copied()
                .unwrap_or(f64::INFINITY);

            for (neighbor, step_cost) in self.get_neighbors(grid, current.state, layer_changes) {
                if closed_set.contains(&neighbor) || !passable(neighbor.cell) {
                    continue;
                }

                let tentative_g_score = current_g + step_cost;
                if tentative_g_score < *g_scores.get(&neighbor).unwrap_or(&f64::INFINITY) {
                    came_from.insert(neighbor, current.state);
                    g_scores.insert(neighbor, tentative_g_score);
                    open_set.push(AStarNode {
                        state: neighbor,
                        g_cost: tentative_g_score,
                        h_cost: self.heuristic(neighbor.cell, goal_cell),
                    });
                }
            }
        }

        Err(AutorouterError::NoPath {
            connection: connection.to_string(),
            from: start.point(),
            to: goal.point(),
        })
    }

    /// Get neighboring states with their step cost
    fn get_neighbors(&self, grid: &Grid, state: State, layer_changes: bool) -> Vec<(State, f64)> {
        let mut neighbors = Vec::with_capacity(4 + grid.layers.len());
        let cell = state.cell;

        for (i, (dx, dy)) in DIRECTIONS.iter().enumerate() {
            let dir = i as u8;
            let next = GridCell {
                x: cell.x + dx,
                y: cell.y + dy,
                layer: cell.layer,
            };
            if !grid.in_bounds(next.x, next.y) {
                continue;
            }
            let turn = match state.dir {
                Some(prev) if prev != dir => self.config.turn_cost,
                _ => 0.0,
            };
            neighbors.push((
                State {
                    cell: next,
                    dir: Some(dir),
                },
                1.0 + turn,
            ));
        }

        if layer_changes && !grid.via_blocked.contains(&(cell.x, cell.y)) {
            for layer in 0..grid.layers.len() {
                if layer == cell.layer {
                    continue;
                }
                neighbors.push((
                    State {
                        cell: GridCell { layer, ..cell },
                        dir: None,
                    },
                    self.config.via_cost,
                ));
            }
        }

        neighbors
    }

    /// Heuristic function (Manhattan distance, plus a via when layers differ)
    fn heuristic(&self, a: GridCell, b: GridCell) -> f64 {
        let via = if a.layer != b.layer {
            self.config.via_cost
        } else {
            0.0
        };
        ((a.x - b.x).abs() + (a.y - b.y).abs()) as f64 + via
    }

    /// Reconstruct path from came_from map
    fn reconstruct_path(came_from: &HashMap<State, State>, mut current: State) -> Vec<GridCell> {
        let mut path = vec![current.cell];

        while let Some(&parent) = came_from.get(&current) {
            current = parent;
            path.push(current.cell);
        }

        path.reverse();
        path
    }

    /// Turn grid cells into a route that starts and ends on the exact points.
    fn cells_to_route(
        &self,
        grid: &Grid,
        cells: &[GridCell],
        start: &ConnectionPoint,
        goal: &ConnectionPoint,
        width: f64,
    ) -> Vec<RoutePoint> {
        let mut route = vec![RoutePoint::wire(start.point(), width, start.layer)];
        let mut prev_layer = grid.layers[cells.first().map(|c| c.layer).unwrap_or(0)];

        for cell in cells {
            let layer = grid.layers[cell.layer];
            let at = grid.grid_to_point(*cell);
            if layer != prev_layer {
                route.push(RoutePoint::wire(at, width, prev_layer));
                route.push(RoutePoint::via(at, prev_layer, layer));
                route.push(RoutePoint::wire(at, width, layer));
                prev_layer = layer;
            } else {
                route.push(RoutePoint::wire(at, width, layer));
            }
        }

        route.push(RoutePoint::wire(goal.point(), width, goal.layer));
        simplify_route(&route)
    }

    fn route_connection(
        &self,
        problem: &SimpleRouteJson,
        connection: &Connection,
        routed: &[Obstacle],
    ) -> Result<Vec<RoutedTrace>, AutorouterError> {
        let points = &connection.points_to_connect;
        if points.len() < 2 {
            return Err(AutorouterError::InvalidConnection {
                connection: connection.name.clone(),
                reason: format!("needs at least two points, got {}", points.len()),
            });
        }

        let grid = self.build_grid(problem, connection, routed);
        let layer_changes = problem.layer_count > 1;
        let mut traces = Vec::new();

        // Grow a tree from the first point, always attaching the closest
        // unconnected point to its closest connected point.
        let mut connected = vec![0usize];
        let mut pending: Vec<usize> = (1..points.len()).collect();
        while !pending.is_empty() {
            let mut best: Option<(usize, usize, f64)> = None;
            for (pi, &p) in pending.iter().enumerate() {
                for &c in &connected {
                    let d = points[p].point().distance(&points[c].point());
                    if best.map_or(true, |(_, _, bd)| d < bd) {
                        best = Some((pi, c, d));
                    }
                }
            }
            let Some((pi, from, _)) = best else { break };
            let to = pending.remove(pi);

            let cells = self.find_path(
                &grid,
                &connection.name,
                &points[from],
                &points[to],
                layer_changes,
            )?;
            traces.push(RoutedTrace {
                connection_name: connection.name.clone(),
                route: self.cells_to_route(
                    &grid,
                    &cells,
                    &points[from],
                    &points[to],
                    problem.min_trace_width,
                ),
            });
            connected.push(to);
        }

        Ok(traces)
    }
}

/// Obstacles covering a routed trace, used to keep later connections clear of it.
pub fn route_obstacles(trace: &RoutedTrace, connected_to: &[String]) -> Vec<Obstacle> {
    let mut out = Vec::new();
    for pair in trace.route.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.is_via() || b.is_via() {
            continue;
        }
        let (width, layer) = match a {
            RoutePoint::Wire { width, layer, .. } => (width, layer),
            RoutePoint::Via { .. } => continue,
        };
        let (pa, pb) = (a.point(), b.point());
        let bounds = Bounds::new(pa.x, pa.y, pb.x, pb.y).expand(width / 2.0);
        out.push(
            Obstacle::new(bounds.center(), bounds.width(), bounds.height(), vec![layer])
                .connected_to(connected_to.iter().cloned()),
        );
    }
    out
}

impl Autorouter for GridRouter {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn supports_layer_changes(&self) -> bool {
        true
    }

    fn solve(&mut self, problem: &SimpleRouteJson) -> Result<Vec<RoutedTrace>, AutorouterError> {
        let mut results = Vec::new();
        let mut routed: Vec<Obstacle> = Vec::new();

        for connection in &problem.connections {
            debug!(
                "grid routing `{}` ({} points, {} obstacles)",
                connection.name,
                connection.points_to_connect.len(),
                problem.obstacles.len() + routed.len()
            );
            let traces = self.route_connection(problem, connection, &routed)?;
            let mut ids = connection.connected_ids.clone();
            ids.push(connection.name.clone());
            for trace in &traces {
                routed.extend(route_obstacles(trace, &ids));
            }
            results.extend(traces);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::segment_intersects_rect;

    fn problem(obstacles: Vec<Obstacle>, layer_count: u8) -> SimpleRouteJson {
        SimpleRouteJson {
            layer_count,
            min_trace_width: 0.15,
            obstacles,
            connections: vec![Connection::new(
                "source_trace_0",
                vec![
                    ConnectionPoint::new(Point::new(0.0, 0.0), LayerRef::Top),
                    ConnectionPoint::new(Point::new(6.0, 0.0), LayerRef::Top),
                ],
            )],
            bounds: Bounds::new(-3.0, -5.0, 9.0, 5.0),
            outline: None,
        }
    }

    fn router() -> GridRouter {
        GridRouter::new(GridRouterConfig {
            grid_resolution: 0.25,
            ..GridRouterConfig::default()
        })
    }

    #[test]
    fn routes_straight_when_clear() {
        let traces = router().solve(&problem(vec![], 1)).unwrap();
        assert_eq!(traces.len(), 1);
        let route = &traces[0].route;
        assert_eq!(route.first().unwrap().point(), Point::new(0.0, 0.0));
        assert_eq!(route.last().unwrap().point(), Point::new(6.0, 0.0));
        assert_eq!(route.len(), 2);
    }

    #[test]
    fn detours_around_obstacle() {
        let wall = Obstacle::new(Point::new(3.0, 0.0), 1.0, 4.0, vec![LayerRef::Top]);
        let traces = router().solve(&problem(vec![wall.clone()], 1)).unwrap();
        let route = &traces[0].route;
        assert!(route.len() > 2);
        for pair in route.windows(2) {
            assert!(!segment_intersects_rect(
                pair[0].point(),
                pair[1].point(),
                &wall.bounds()
            ));
        }
    }

    #[test]
    fn uses_via_when_wall_spans_bounds_on_one_layer() {
        let wall = Obstacle::new(Point::new(3.0, 0.0), 1.0, 10.0, vec![LayerRef::Top]);
        let traces = router().solve(&problem(vec![wall], 2)).unwrap();
        assert!(traces[0].route.iter().any(RoutePoint::is_via));
    }

    #[test]
    fn fails_when_fully_blocked() {
        let wall = Obstacle::new(Point::new(3.0, 0.0), 1.0, 10.0, vec![LayerRef::Top]);
        let err = router().solve(&problem(vec![wall], 1)).unwrap_err();
        assert!(matches!(err, AutorouterError::NoPath { .. }));
    }

    #[test]
    fn connected_obstacle_is_passable() {
        let wall = Obstacle::new(Point::new(3.0, 0.0), 1.0, 10.0, vec![LayerRef::Top])
            .connected_to(["source_trace_0".to_string()]);
        let traces = router().solve(&problem(vec![wall], 1)).unwrap();
        assert_eq!(traces[0].route.len(), 2);
    }
}
