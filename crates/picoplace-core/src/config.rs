//! Render configuration, usually read from `picoplace.toml`.
//!
//! ```toml
//! [routing]
//! autorouter = "grid"
//! mode = "sequential"
//! grid_resolution = 0.1
//!
//! [schematic]
//! trace_crossings = true
//!
//! [drc]
//! via_margin = 0.2
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use picoplace_engine::{AutorouterKind, GridRouterConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How physical traces are handed to the autorouter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One autorouter call per trace, followed by net island backfill.
    #[default]
    Sequential,
    /// One autorouter call per subcircuit with every connection at once.
    NetAware,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub autorouter: AutorouterKind,
    pub mode: RoutingMode,
    #[serde(flatten)]
    pub grid: GridRouterConfig,
    pub trace_width: f64,
    /// Added around the endpoints of each routed leg.
    pub bounds_margin: f64,
    pub via_hole_diameter: f64,
    /// Length counted for every layer change in `trace_length`.
    pub via_length: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            autorouter: AutorouterKind::default(),
            mode: RoutingMode::default(),
            grid: GridRouterConfig::default(),
            trace_width: 0.15,
            bounds_margin: 5.0,
            via_hole_diameter: 0.3,
            via_length: 1.6,
        }
    }
}

impl RoutingConfig {
    pub fn via_outer_diameter(&self) -> f64 {
        self.grid.via_diameter
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchematicConfig {
    pub grid_resolution: f64,
    pub clearance: f64,
    /// Length of the straight stub leaving each port before autorouting.
    pub stub_length: f64,
    /// Mark crossings with other nets and junctions with the same net.
    pub trace_crossings: bool,
    pub crossing_size: f64,
    /// Above this many crossings a trace is drawn as net labels.
    pub max_crossings: usize,
    pub max_bends: usize,
    /// Use net labels between a box-with-pins and a symbol component.
    pub label_box_to_symbol: bool,
}

impl Default for SchematicConfig {
    fn default() -> Self {
        Self {
            grid_resolution: 0.1,
            clearance: 0.05,
            stub_length: 0.2,
            trace_crossings: false,
            crossing_size: 0.1,
            max_crossings: 4,
            max_bends: 8,
            label_box_to_symbol: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcConfig {
    pub enabled: bool,
    /// Minimum edge-to-edge distance between vias of different nets.
    pub via_margin: f64,
    /// Minimum edge-to-edge distance between vias of the same net.
    pub same_net_via_margin: f64,
}

impl Default for DrcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            via_margin: 0.2,
            same_net_via_margin: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub pcb_spacing: f64,
    pub schematic_spacing: f64,
    /// Margin around children when a board has no explicit size.
    pub board_margin: f64,
    /// Upper bound on scheduler passes before the run is considered stuck.
    pub max_passes: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pcb_spacing: 1.0,
            schematic_spacing: 1.0,
            board_margin: 2.0,
            max_passes: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub routing: RoutingConfig,
    pub schematic: SchematicConfig,
    pub drc: DrcConfig,
    pub layout: LayoutConfig,
}

impl RenderConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Grid settings for diagram routing.
    pub fn schematic_grid(&self) -> GridRouterConfig {
        GridRouterConfig {
            grid_resolution: self.schematic.grid_resolution,
            trace_clearance: self.schematic.clearance,
            ..GridRouterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = RenderConfig::from_toml_str("").unwrap();
        assert_eq!(config, RenderConfig::default());
        assert_eq!(config.routing.via_length, 1.6);
        assert_eq!(config.routing.grid.grid_resolution, 0.1);
    }

    #[test]
    fn sections_override_fields() {
        let config = RenderConfig::from_toml_str(
            r#"
            [routing]
            autorouter = "direct"
            mode = "net_aware"
            grid_resolution = 0.25

            [schematic]
            trace_crossings = true
            "#,
        )
        .unwrap();
        assert_eq!(config.routing.autorouter, AutorouterKind::Direct);
        assert_eq!(config.routing.mode, RoutingMode::NetAware);
        assert_eq!(config.routing.grid.grid_resolution, 0.25);
        assert_eq!(config.routing.trace_width, 0.15);
        assert!(config.schematic.trace_crossings);
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = RenderConfig::from_toml_str("[routing]\nmode = \"psychic\"").unwrap_err();
        assert!(err.to_string().starts_with("invalid config"));
    }
}
