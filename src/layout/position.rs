use std::collections::BTreeMap;

use tracing::debug;

use super::types::{OrderEntry, Placement};
use crate::config::{Config, LayoutConfig};
use crate::error::{LayoutError, Result, Stage};
use crate::graph::{Edge, GraphArena};
use crate::protocol::{FinalizeRequest, FinalizeResponse};
use crate::solver::Model;

/// Horizontal placement model.
///
/// Columns: one center `x` per node, then `xab1`/`xab2` per edge, then one
/// separation slack per pair of neighbours within a rank. Each edge row reads
/// `x(to) - x(from) + xab1 - xab2 = 0` with unit cost on both slacks, so the
/// objective is the total horizontal run of all edges. Each neighbour row
/// reads `x(right) - x(left) - slack = half widths + margin`.
pub(super) fn coordinate_model(
    arena: &GraphArena,
    layers: &[Vec<usize>],
    config: &LayoutConfig,
) -> Model {
    let nodes = arena.nodes.len();
    let pairs: usize = layers.iter().map(|layer| layer.len().saturating_sub(1)).sum();
    let cols = nodes + 2 * arena.edges.len() + pairs;
    let limit = arena.nodes.iter().map(|node| node.width).sum::<f64>()
        + config.node_margin * (nodes as f64 + 1.0);

    let mut model = Model::new(cols);
    for (col, node) in arena.nodes.iter().enumerate() {
        let half = node.width / 2.0;
        model.set_column(col, 0.0, half, limit.max(half), false);
    }
    for (idx, edge) in arena.edges.iter().enumerate() {
        let (xab1, xab2) = (nodes + 2 * idx, nodes + 2 * idx + 1);
        model.set_column(xab1, 1.0, 0.0, limit, false);
        model.set_column(xab2, 1.0, 0.0, limit, false);
        model.add_row(
            &[(edge.to, 1.0), (edge.from, -1.0), (xab1, 1.0), (xab2, -1.0)],
            0.0,
        );
    }
    let mut slack = nodes + 2 * arena.edges.len();
    for layer in layers {
        for pair in layer.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let gap = arena.nodes[left].width / 2.0
                + arena.nodes[right].width / 2.0
                + config.node_margin;
            model.set_column(slack, 0.0, 0.0, limit, false);
            model.add_row(&[(right, 1.0), (left, -1.0), (slack, -1.0)], gap);
            slack += 1;
        }
    }
    model
}

fn malformed(message: String) -> LayoutError {
    LayoutError::MalformedRequest {
        stage: Stage::Finalize,
        message,
    }
}

/// Turns the solved coordinate model into boxes and restores the original edge list.
pub fn finalize(request: &FinalizeRequest, config: &Config) -> Result<FinalizeResponse> {
    let solution = request
        .lp
        .solution
        .as_ref()
        .ok_or(LayoutError::UnsolvedModel(Stage::Finalize))?;
    if !solution.is_optimal() {
        return Err(LayoutError::Solver {
            stage: Stage::Finalize,
            status: solution.status,
        });
    }
    if solution.x.len() < request.nodes.len() {
        return Err(LayoutError::MalformedModel(format!(
            "solution has {} values for {} nodes",
            solution.x.len(),
            request.nodes.len()
        )));
    }

    let mut entries: Vec<&OrderEntry> = Vec::with_capacity(request.nodes.len());
    for id in &request.nodes {
        let entry = request
            .layout
            .get(id)
            .ok_or_else(|| malformed(format!("node `{id}` has no layout entry")))?;
        entries.push(entry);
    }

    let tops = rank_tops(&entries, config.layout.rank_margin);
    let mut layout = BTreeMap::new();
    for (idx, (id, entry)) in request.nodes.iter().zip(&entries).enumerate() {
        let (top, band) = tops[entry.rank];
        layout.insert(
            id.clone(),
            Placement {
                rank: entry.rank,
                order: entry.order,
                x: solution.x[idx] - entry.width / 2.0,
                y: top + (band - entry.height) / 2.0,
            },
        );
    }
    report_overlaps(&request.nodes, &entries, &layout, config.solver.epsilon);

    Ok(FinalizeResponse {
        nodes: request.nodes.clone(),
        edges: restore_edges(request)?,
        layout,
    })
}

/// Top coordinate and band height of every rank.
fn rank_tops(entries: &[&OrderEntry], margin: f64) -> Vec<(f64, f64)> {
    let depth = entries.iter().map(|entry| entry.rank + 1).max().unwrap_or(0);
    let mut bands = vec![0.0f64; depth];
    for entry in entries {
        bands[entry.rank] = bands[entry.rank].max(entry.height);
    }
    let mut top = 0.0;
    bands
        .into_iter()
        .map(|band| {
            let current = (top, band);
            top += band + margin;
            current
        })
        .collect()
}

/// Collapses each virtual chain back into its original edge, undoes cycle
/// inversions and appends the self-loops.
fn restore_edges(request: &FinalizeRequest) -> Result<Vec<Edge>> {
    let mut chains: BTreeMap<usize, (&str, &str)> = BTreeMap::new();
    for edge in &request.edges {
        chains
            .entry(edge.origin)
            .and_modify(|chain| chain.1 = edge.to.as_str())
            .or_insert((edge.from.as_str(), edge.to.as_str()));
    }
    if let Some(&idx) = request.inverted_edges.iter().find(|&&idx| !chains.contains_key(&idx)) {
        return Err(malformed(format!("inverted edge {idx} does not exist")));
    }
    let mut edges: Vec<Edge> = chains
        .into_iter()
        .map(|(origin, (from, to))| {
            if request.inverted_edges.contains(&origin) {
                Edge::new(to, from)
            } else {
                Edge::new(from, to)
            }
        })
        .collect();
    edges.extend(request.loops.iter().cloned());
    Ok(edges)
}

/// Logs same-rank neighbours whose boxes overlap by more than `eps` and
/// returns how many there are.
fn report_overlaps(
    nodes: &[String],
    entries: &[&OrderEntry],
    layout: &BTreeMap<String, Placement>,
    eps: f64,
) -> usize {
    let mut overlaps = 0;
    let mut by_slot: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        by_slot.insert((entry.rank, entry.order), idx);
    }
    let slots: Vec<((usize, usize), usize)> = by_slot.into_iter().collect();
    for pair in slots.windows(2) {
        let ((rank_l, _), left) = pair[0];
        let ((rank_r, _), right) = pair[1];
        if rank_l != rank_r {
            continue;
        }
        let left_end = layout[&nodes[left]].x + entries[left].width;
        let right_start = layout[&nodes[right]].x;
        if left_end > right_start + eps {
            overlaps += 1;
            debug!(
                left = %nodes[left],
                right = %nodes[right],
                overlap = left_end - right_start,
                "same-rank boxes overlap"
            );
        }
    }
    overlaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{order, rank};
    use crate::protocol::RankRequest;
    use crate::solver;

    fn placed(nodes: &[&str], edges: &[(&str, &str)]) -> (FinalizeRequest, FinalizeResponse) {
        let config = Config::default();
        let request = RankRequest {
            nodes: nodes.iter().map(|id| id.to_string()).collect(),
            edges: edges.iter().map(|(from, to)| Edge::new(*from, *to)).collect(),
            widths: nodes.iter().map(|id| (id.to_string(), 40.0)).collect(),
            heights: nodes
                .iter()
                .enumerate()
                .map(|(idx, id)| (id.to_string(), 20.0 + 10.0 * idx as f64))
                .collect(),
            head: None,
        };
        let mut ordered = order(&rank(&request, &config).unwrap(), &config).unwrap();
        let solution = solver::solve(&ordered.lp.model, &config.solver).unwrap();
        ordered.lp.solution = Some(solution);
        let done = finalize(&ordered, &config).unwrap();
        (ordered, done)
    }

    #[test]
    fn neighbours_keep_their_margin() {
        let (ordered, done) = placed(&["r", "a", "b", "c"], &[("r", "a"), ("r", "b"), ("r", "c")]);
        let mut rank_one: Vec<(&String, &Placement)> =
            done.layout.iter().filter(|(_, p)| p.rank == 1).collect();
        rank_one.sort_by_key(|(_, p)| p.order);
        for pair in rank_one.windows(2) {
            let left_end = pair[0].1.x + ordered.layout[pair[0].0].width;
            assert!(pair[1].1.x - left_end >= 20.0 - 1e-6);
        }
        for placement in done.layout.values() {
            assert!(placement.x >= -1e-6);
        }
    }

    #[test]
    fn single_child_sits_under_its_parent() {
        let (_, done) = placed(&["a", "b"], &[("a", "b")]);
        assert!((done.layout["a"].x - done.layout["b"].x).abs() < 1e-6);
    }

    #[test]
    fn rows_are_centered_in_their_band() {
        // a is 20 high, b 30, c 40; b and c share rank 1.
        let (_, done) = placed(&["a", "b", "c"], &[("a", "b"), ("a", "c")]);
        assert_eq!(done.layout["a"].y, 0.0);
        assert_eq!(done.layout["c"].y, 20.0 + 40.0);
        assert_eq!(done.layout["b"].y, 20.0 + 40.0 + 5.0);
    }

    #[test]
    fn original_edges_come_back_in_order() {
        let (_, done) = placed(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("a", "d"), ("d", "d"), ("b", "d")],
        );
        assert_eq!(
            done.edges,
            vec![
                Edge::new("a", "b"),
                Edge::new("b", "c"),
                Edge::new("c", "a"),
                Edge::new("a", "d"),
                Edge::new("b", "d"),
                Edge::new("d", "d"),
            ]
        );
    }

    #[test]
    fn overlap_check_uses_the_solver_tolerance() {
        let nodes = vec!["a".to_string(), "b".to_string()];
        let entry = |order| OrderEntry {
            rank: 0,
            order,
            width: 40.0,
            height: 20.0,
        };
        let (left, right) = (entry(0), entry(1));
        let entries = vec![&left, &right];
        let at = |order, x| Placement {
            rank: 0,
            order,
            x,
            y: 0.0,
        };
        // b starts 1e-5 inside a's right edge
        let layout = BTreeMap::from([
            ("a".to_string(), at(0, 0.0)),
            ("b".to_string(), at(1, 40.0 - 1e-5)),
        ]);
        assert_eq!(report_overlaps(&nodes, &entries, &layout, 1e-6), 1);
        assert_eq!(report_overlaps(&nodes, &entries, &layout, 1e-4), 0);
    }
}
