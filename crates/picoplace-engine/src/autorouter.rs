//! Autorouter contract.
//!
//! A routing problem is a [`SimpleRouteJson`]: rectangular obstacles tagged with
//! the ids they are electrically part of, named connections made of layered
//! points, a bounding region and optionally the board outline. An
//! [`Autorouter`] turns it into simplified [`RoutedTrace`]s. Obstacles are only
//! crossed when they share an id with the connection being routed.

use std::collections::HashSet;

use picoplace_circuit::{Bounds, LayerRef, Point, RoutePoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::direct::DirectRouter;
use crate::router::{GridRouter, GridRouterConfig};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AutorouterError {
    #[error("no path found for connection `{connection}` from ({}, {}) to ({}, {})", from.x, from.y, to.x, to.y)]
    NoPath {
        connection: String,
        from: Point,
        to: Point,
    },

    #[error("straight route for connection `{connection}` is blocked by an obstacle")]
    Blocked { connection: String },

    #[error("connection `{connection}` needs a layer change, which `{router}` cannot do")]
    LayerChangeUnsupported {
        connection: String,
        router: &'static str,
    },

    #[error("connection `{connection}` is invalid: {reason}")]
    InvalidConnection { connection: String, reason: String },

    #[error("search for connection `{connection}` gave up after {iterations} iterations")]
    IterationLimit {
        connection: String,
        iterations: usize,
    },
}

/// Geometry to avoid unless connected to the connection being routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub center: Point,
    pub width: f64,
    pub height: f64,
    pub layers: Vec<LayerRef>,
    #[serde(default)]
    pub connected_to: Vec<String>,
}

impl Obstacle {
    pub fn new(center: Point, width: f64, height: f64, layers: Vec<LayerRef>) -> Self {
        Self {
            center,
            width,
            height,
            layers,
            connected_to: Vec::new(),
        }
    }

    pub fn connected_to(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.connected_to.extend(ids);
        self
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_center(self.center, self.width, self.height)
    }

    pub fn on_layer(&self, layer: LayerRef) -> bool {
        self.layers.contains(&layer)
    }

    /// Whether this obstacle belongs to any of the ids in `ids`.
    pub fn is_connected_to(&self, ids: &HashSet<&str>) -> bool {
        self.connected_to.iter().any(|id| ids.contains(id.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionPoint {
    pub x: f64,
    pub y: f64,
    pub layer: LayerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_port_id: Option<String>,
}

impl ConnectionPoint {
    pub fn new(at: Point, layer: LayerRef) -> Self {
        Self {
            x: at.x,
            y: at.y,
            layer,
            pcb_port_id: None,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Points that must end up electrically joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub points_to_connect: Vec<ConnectionPoint>,
    /// Ids of everything this connection is electrically part of.
    #[serde(default)]
    pub connected_ids: Vec<String>,
}

impl Connection {
    pub fn new(name: impl Into<String>, points: Vec<ConnectionPoint>) -> Self {
        Self {
            name: name.into(),
            points_to_connect: points,
            connected_ids: Vec::new(),
        }
    }

    pub fn with_connected_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.connected_ids.extend(ids);
        self
    }

    pub fn connected_id_set(&self) -> HashSet<&str> {
        let mut ids: HashSet<&str> = self.connected_ids.iter().map(String::as_str).collect();
        ids.insert(self.name.as_str());
        ids.extend(
            self.points_to_connect
                .iter()
                .filter_map(|p| p.pcb_port_id.as_deref()),
        );
        ids
    }
}

/// Input of an autorouter run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRouteJson {
    pub layer_count: u8,
    pub min_trace_width: f64,
    pub obstacles: Vec<Obstacle>,
    pub connections: Vec<Connection>,
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Vec<Point>>,
}

impl SimpleRouteJson {
    pub fn layers(&self) -> Vec<LayerRef> {
        LayerRef::stack(self.layer_count)
    }

    /// Obstacles a connection must avoid.
    pub fn blocking_obstacles<'a>(
        &'a self,
        connection: &'a Connection,
    ) -> impl Iterator<Item = &'a Obstacle> + 'a {
        let ids = connection.connected_id_set();
        self.obstacles
            .iter()
            .filter(move |o| !o.is_connected_to(&ids))
    }
}

/// One routed path, already simplified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedTrace {
    pub connection_name: String,
    pub route: Vec<RoutePoint>,
}

impl RoutedTrace {
    /// Wire length plus `via_length` per layer change.
    pub fn length(&self, via_length: f64) -> f64 {
        route_length(&self.route, via_length)
    }
}

pub fn route_length(route: &[RoutePoint], via_length: f64) -> f64 {
    let wire: f64 = route
        .windows(2)
        .map(|w| w[0].point().distance(&w[1].point()))
        .sum();
    let vias = route.iter().filter(|p| p.is_via()).count() as f64;
    wire + vias * via_length
}

/// A routing strategy.
pub trait Autorouter {
    fn name(&self) -> &'static str;

    /// Whether routes may change layers through vias.
    fn supports_layer_changes(&self) -> bool;

    fn solve(&mut self, problem: &SimpleRouteJson) -> Result<Vec<RoutedTrace>, AutorouterError>;
}

/// Built-in strategies, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutorouterKind {
    Direct,
    #[default]
    Grid,
}

impl AutorouterKind {
    pub fn create(&self, config: &GridRouterConfig) -> Box<dyn Autorouter> {
        match self {
            AutorouterKind::Direct => Box::new(DirectRouter::new(config.trace_clearance)),
            AutorouterKind::Grid => Box::new(GridRouter::new(config.clone())),
        }
    }
}

impl std::str::FromStr for AutorouterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(AutorouterKind::Direct),
            "grid" | "auto" => Ok(AutorouterKind::Grid),
            other => Err(format!("unknown autorouter `{other}`, expected `direct` or `grid`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_obstacles_are_not_blocking() {
        let problem = SimpleRouteJson {
            layer_count: 2,
            min_trace_width: 0.15,
            obstacles: vec![
                Obstacle::new(Point::new(0.0, 0.0), 1.0, 1.0, vec![LayerRef::Top])
                    .connected_to(["pcb_port_0".to_string()]),
                Obstacle::new(Point::new(5.0, 0.0), 1.0, 1.0, vec![LayerRef::Top]),
            ],
            connections: vec![],
            bounds: Bounds::new(-10.0, -10.0, 10.0, 10.0),
            outline: None,
        };
        let mut start = ConnectionPoint::new(Point::new(0.0, 0.0), LayerRef::Top);
        start.pcb_port_id = Some("pcb_port_0".into());
        let conn = Connection::new("source_trace_0", vec![start]);
        let blocking: Vec<_> = problem.blocking_obstacles(&conn).collect();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].center, Point::new(5.0, 0.0));
    }

    #[test]
    fn length_counts_vias() {
        let route = vec![
            RoutePoint::wire(Point::new(0.0, 0.0), 0.15, LayerRef::Top),
            RoutePoint::wire(Point::new(3.0, 4.0), 0.15, LayerRef::Top),
            RoutePoint::via(Point::new(3.0, 4.0), LayerRef::Top, LayerRef::Bottom),
            RoutePoint::wire(Point::new(3.0, 4.0), 0.15, LayerRef::Bottom),
        ];
        assert!((route_length(&route, 1.6) - 6.6).abs() < 1e-9);
    }

    #[test]
    fn kind_parses_from_config_strings() {
        assert_eq!("direct".parse::<AutorouterKind>(), Ok(AutorouterKind::Direct));
        assert!("maze".parse::<AutorouterKind>().is_err());
    }
}
