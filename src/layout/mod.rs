//! Layered layout stages and the edge router.
//!
//! Stages run in a fixed order: [`rank`] breaks cycles and assigns layers,
//! [`order`] expands long edges and minimizes crossings, the coordinate model
//! it emits is solved, [`finalize`] turns the solution into boxes and
//! [`route`] draws the edges around them. [`compute_drawing`] chains them.

mod order;
mod position;
mod rank;
mod routing;
pub(crate) mod types;
pub use types::*;

pub use order::order;
pub use position::finalize;
pub use rank::rank;
pub use routing::{route, route_self_loop, segment_crosses_rect, segments_intersect};

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::debug;

use crate::config::Config;
use crate::error::{LayoutError, Result, Stage};
use crate::graph::Edge;
use crate::protocol::{RankRequest, RouteRequest};
use crate::solver;

/// Runs every stage and returns one polyline per input edge, self-loops included.
pub fn compute_drawing(request: &RankRequest, config: &Config) -> Result<Drawing> {
    let ranked = rank(request, config)?;
    let mut ordered = order(&ranked, config)?;
    let solution = solver::solve_lp(&ordered.lp.model, &config.solver)?;
    if !solution.is_optimal() {
        return Err(LayoutError::Solver {
            stage: Stage::Solve,
            status: solution.status,
        });
    }
    ordered.lp.solution = Some(solution);
    let placed = finalize(&ordered, config)?;

    // Chain segments are routed in the original edge direction so that
    // inverted edges are recognised by the router as running upwards.
    let mut chains: Vec<Vec<&LinkedEdge>> = vec![Vec::new(); ranked.edges.len()];
    for edge in &ordered.edges {
        chains[edge.origin].push(edge);
    }
    let mut route_edges = Vec::new();
    let mut runs: Vec<Range<usize>> = Vec::with_capacity(request.edges.len());
    let mut origin = 0usize;
    for edge in &request.edges {
        let start = route_edges.len();
        if edge.is_loop() {
            route_edges.push(edge.clone());
        } else {
            let chain = &chains[origin];
            if ordered.inverted_edges.contains(&origin) {
                route_edges.extend(chain.iter().rev().map(|e| Edge::new(&e.to, &e.from)));
            } else {
                route_edges.extend(chain.iter().map(|e| Edge::new(&e.from, &e.to)));
            }
            origin += 1;
        }
        runs.push(start..route_edges.len());
    }

    let mut boxes = BTreeMap::new();
    let mut ranks = BTreeMap::new();
    for (id, placement) in &placed.layout {
        let Some(entry) = ordered.layout.get(id) else {
            continue;
        };
        boxes.insert(
            id.clone(),
            Rect {
                x: placement.x,
                y: placement.y,
                width: entry.width,
                height: entry.height,
            },
        );
        ranks.insert(id.clone(), RankEntry { rank: placement.rank });
    }
    let routed = route(
        &RouteRequest {
            nodes: placed.nodes.clone(),
            edges: route_edges,
            boxes,
            layout: ranks,
        },
        config,
    )?;

    let mut edges = Vec::with_capacity(request.edges.len());
    let mut unrouted = Vec::new();
    for (idx, (edge, run)) in request.edges.iter().zip(runs).enumerate() {
        if routed.unrouted.iter().any(|leg| run.contains(leg)) {
            unrouted.push(idx);
        }
        edges.push(DrawnEdge {
            from: edge.from.clone(),
            to: edge.to.clone(),
            points: stitch(&routed.routes[run]),
        });
    }

    let mut nodes = BTreeMap::new();
    for id in &request.nodes {
        let (Some(placement), Some(entry)) = (placed.layout.get(id), ordered.layout.get(id)) else {
            continue;
        };
        nodes.insert(
            id.clone(),
            DrawnNode {
                rank: placement.rank,
                order: placement.order,
                x: placement.x,
                y: placement.y,
                width: entry.width,
                height: entry.height,
            },
        );
    }
    debug!(
        nodes = nodes.len(),
        edges = edges.len(),
        crossings = ordered.crossings,
        unrouted = unrouted.len(),
        "drawing complete"
    );
    Ok(Drawing {
        nodes,
        edges,
        unrouted,
        crossings: ordered.crossings,
    })
}

/// Joins consecutive routes into one polyline, dropping repeated junction points.
fn stitch(runs: &[Vec<Point>]) -> Vec<Point> {
    let mut points: Vec<Point> = Vec::new();
    for point in runs.iter().flatten() {
        if points.last() != Some(point) {
            points.push(*point);
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stitching_drops_shared_junctions() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(0.0, 10.0);
        let c = Point::new(5.0, 20.0);
        assert_eq!(stitch(&[vec![a, b], vec![b, c]]), vec![a, b, c]);
        assert!(stitch(&[]).is_empty());
    }

    #[test]
    fn cyclic_edge_is_drawn_from_its_own_source() {
        let nodes = ["a", "b", "c"];
        let request = RankRequest {
            nodes: nodes.iter().map(|id| id.to_string()).collect(),
            edges: vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "a")],
            widths: nodes.iter().map(|id| (id.to_string(), 40.0)).collect(),
            heights: nodes.iter().map(|id| (id.to_string(), 20.0)).collect(),
            head: None,
        };
        let drawing = compute_drawing(&request, &Config::default()).unwrap();
        let back = &drawing.edges[2];
        let c = &drawing.nodes["c"];
        let a = &drawing.nodes["a"];
        // Leaves c's bottom port and ends at a's top port.
        assert_eq!(back.points[0].y, c.y + c.height + 3.0);
        assert_eq!(back.points.last().unwrap().y, a.y - 3.0);
        assert!(back.points.len() >= 6);
    }
}
