//! Straight-line strategy: each pair of points is joined by one segment, or the
//! connection fails.

use picoplace_circuit::RoutePoint;

use crate::autorouter::{Autorouter, AutorouterError, RoutedTrace, SimpleRouteJson};
use crate::geometry::{segment_intersects_rect, segment_leaves_polygon};

pub struct DirectRouter {
    clearance: f64,
}

impl DirectRouter {
    pub fn new(clearance: f64) -> Self {
        Self { clearance }
    }
}

impl Autorouter for DirectRouter {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn supports_layer_changes(&self) -> bool {
        false
    }

    fn solve(&mut self, problem: &SimpleRouteJson) -> Result<Vec<RoutedTrace>, AutorouterError> {
        let margin = problem.min_trace_width / 2.0 + self.clearance;
        let mut traces = Vec::new();

        for connection in &problem.connections {
            let points = &connection.points_to_connect;
            if points.len() < 2 {
                return Err(AutorouterError::InvalidConnection {
                    connection: connection.name.clone(),
                    reason: format!("needs at least two points, got {}", points.len()),
                });
            }

            for pair in points.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                if a.layer != b.layer {
                    return Err(AutorouterError::LayerChangeUnsupported {
                        connection: connection.name.clone(),
                        router: self.name(),
                    });
                }

                let blocked = problem
                    .blocking_obstacles(connection)
                    .filter(|o| o.on_layer(a.layer))
                    .any(|o| segment_intersects_rect(a.point(), b.point(), &o.bounds().expand(margin)));
                let outside = problem
                    .outline
                    .as_deref()
                    .is_some_and(|outline| outline.len() >= 3 && segment_leaves_polygon(a.point(), b.point(), outline));
                if blocked || outside {
                    return Err(AutorouterError::Blocked {
                        connection: connection.name.clone(),
                    });
                }

                traces.push(RoutedTrace {
                    connection_name: connection.name.clone(),
                    route: vec![
                        RoutePoint::wire(a.point(), problem.min_trace_width, a.layer),
                        RoutePoint::wire(b.point(), problem.min_trace_width, b.layer),
                    ],
                });
            }
        }

        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autorouter::{Connection, ConnectionPoint, Obstacle};
    use picoplace_circuit::{Bounds, LayerRef, Point};

    fn problem(obstacles: Vec<Obstacle>) -> SimpleRouteJson {
        SimpleRouteJson {
            layer_count: 2,
            min_trace_width: 0.15,
            obstacles,
            connections: vec![Connection::new(
                "c",
                vec![
                    ConnectionPoint::new(Point::new(0.0, 0.0), LayerRef::Top),
                    ConnectionPoint::new(Point::new(10.0, 0.0), LayerRef::Top),
                ],
            )],
            bounds: Bounds::new(-1.0, -1.0, 11.0, 1.0),
            outline: None,
        }
    }

    #[test]
    fn straight_segment_when_clear() {
        let traces = DirectRouter::new(0.15).solve(&problem(vec![])).unwrap();
        assert_eq!(traces[0].route.len(), 2);
    }

    #[test]
    fn blocked_by_obstacle_on_same_layer() {
        let pad = Obstacle::new(Point::new(5.0, 0.0), 1.0, 1.0, vec![LayerRef::Top]);
        let err = DirectRouter::new(0.15).solve(&problem(vec![pad])).unwrap_err();
        assert_eq!(err, AutorouterError::Blocked { connection: "c".into() });
    }

    #[test]
    fn obstacle_on_other_layer_is_ignored() {
        let pad = Obstacle::new(Point::new(5.0, 0.0), 1.0, 1.0, vec![LayerRef::Bottom]);
        assert!(DirectRouter::new(0.15).solve(&problem(vec![pad])).is_ok());
    }
}
