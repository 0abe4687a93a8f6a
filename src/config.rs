use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SolverConfig {
    /// The one tolerance of the solver: reduced-cost optimality, the phase-1
    /// feasibility verdict, integrality, bound snapping. Finalize reuses it for
    /// the overlap diagnostic.
    pub epsilon: f64,
    /// Maximum number of branch-and-bound nodes solved before giving up.
    pub node_budget: usize,
    /// Pivot cap per simplex phase.
    pub max_iterations: usize,
    /// Consecutive degenerate pivots tolerated before switching to Bland's rule.
    pub degenerate_switch: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            node_budget: 1000,
            max_iterations: 100_000,
            degenerate_switch: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LayoutConfig {
    /// Number of alternating median sweeps during ordering.
    pub sweeps: usize,
    /// Minimum horizontal gap between neighbouring boxes of one rank.
    pub node_margin: f64,
    /// Vertical gap between rank bands.
    pub rank_margin: f64,
    pub virtual_width: f64,
    pub virtual_height: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            sweeps: 24,
            node_margin: 20.0,
            rank_margin: 40.0,
            virtual_width: 10.0,
            virtual_height: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteMetric {
    /// Every visibility edge costs one; fewest bends wins.
    #[default]
    Hops,
    /// Visibility edges cost their length.
    Euclidean,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RouteConfig {
    /// Lateral distance between neighbouring ports on one side of a box.
    pub port_spacing: f64,
    /// Distance between a port and the box boundary it belongs to.
    pub port_gap: f64,
    /// Outward inflation of box corners in the visibility graph.
    pub clearance: f64,
    /// Length of the side jogs used by rank-reversed edges.
    pub stub: f64,
    pub loop_offset: f64,
    pub loop_overhang: f64,
    pub metric: RouteMetric,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            port_spacing: 5.0,
            port_gap: 3.0,
            clearance: 4.0,
            stub: 6.0,
            loop_offset: 5.0,
            loop_overhang: 3.0,
            metric: RouteMetric::Hops,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub layout: LayoutConfig,
    pub solver: SolverConfig,
    pub route: RouteConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layout: Option<LayoutConfig>,
    solver: Option<SolverConfig>,
    route: Option<RouteConfig>,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };

    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let parsed: ConfigFile = json5::from_str(contents)?;
    let mut config = Config::default();
    if let Some(layout) = parsed.layout {
        config.layout = layout;
    }
    if let Some(solver) = parsed.solver {
        config.solver = solver;
    }
    if let Some(route) = parsed.route {
        config.route = route;
    }
    Ok(config)
}
