use std::collections::BTreeMap;

use tracing::debug;

use crate::config::Config;
use crate::error::{LayoutError, Result, Stage};
use crate::graph::{self, Edge, GraphArena, VIRTUAL_HEAD};
use crate::protocol::{RankRequest, RankResponse};
use crate::solver::{self, Lp, Model};

/// Breaks cycles and assigns every node an integer rank by minimizing total edge span.
pub fn rank(request: &RankRequest, config: &Config) -> Result<RankResponse> {
    let full = GraphArena::from_request(
        &request.nodes,
        &request.edges,
        &request.widths,
        &request.heights,
    )?;
    let explicit = match &request.head {
        Some(id) => Some(
            full.node_index(id)
                .ok_or_else(|| LayoutError::UnknownHead(id.clone()))?,
        ),
        None => None,
    };

    let (mut work, loops) = split_loops(&full, &request.edges);
    let out = work.out_edges();
    let heads = graph::find_heads(&work, &out, explicit);
    let mut inverted = graph::depth_first(&work, &out, &heads).back_edges;
    inverted.sort_unstable();
    for &idx in &inverted {
        let edge = &mut work.edges[idx];
        std::mem::swap(&mut edge.from, &mut edge.to);
    }
    debug!(
        nodes = work.nodes.len(),
        edges = work.edges.len(),
        loops = loops.len(),
        inverted = inverted.len(),
        heads = heads.len(),
        "ranking graph"
    );

    let model = rank_model(&work, &heads);
    let solution = solver::solve(&model, &config.solver)?;
    if !solution.is_optimal() {
        return Err(LayoutError::Solver {
            stage: Stage::Rank,
            status: solution.status,
        });
    }
    let levels = normalize(
        solution.x[..work.nodes.len()]
            .iter()
            .map(|value| value.round().max(0.0) as usize)
            .collect(),
    );

    let ranks: BTreeMap<String, usize> = work
        .nodes
        .iter()
        .zip(&levels)
        .map(|(node, &level)| (node.id.clone(), level))
        .collect();
    let edges = work
        .edges
        .iter()
        .map(|edge| Edge::new(work.id(edge.from), work.id(edge.to)))
        .collect();

    Ok(RankResponse {
        nodes: request.nodes.clone(),
        edges,
        inverted_edges: inverted,
        loops,
        ranks,
        lp: Lp {
            model,
            solution: Some(solution),
        },
        head: heads.first().map(|&head| work.id(head).to_string()),
        entries: heads.iter().map(|&head| work.id(head).to_string()).collect(),
        widths: request.widths.clone(),
        heights: request.heights.clone(),
    })
}

/// Copies the arena without its self-loops, returning the loops separately.
fn split_loops(full: &GraphArena, edges: &[Edge]) -> (GraphArena, Vec<Edge>) {
    let mut work = GraphArena::new();
    for node in &full.nodes {
        work.add_node(&node.id, node.width, node.height, node.is_virtual);
    }
    let mut loops = Vec::new();
    for (edge, data) in edges.iter().zip(&full.edges) {
        if data.from == data.to {
            loops.push(edge.clone());
        } else {
            work.add_edge(data.from, data.to);
        }
    }
    (work, loops)
}

/// Integer model with one rank column per node and one span column per edge:
/// `rank(to) - rank(from) - span = 0`, `span ≥ 1`, minimizing the sum of spans.
///
/// With several heads a virtual root is appended after the real nodes and
/// linked to each head, so its rank column sits at index `nodes.len()`.
fn rank_model(arena: &GraphArena, heads: &[usize]) -> Model {
    let real = arena.nodes.len();
    let mut links: Vec<(usize, usize)> = arena.edges.iter().map(|e| (e.from, e.to)).collect();
    let mut nodes = real;
    if heads.len() > 1 {
        debug!(heads = heads.len(), root = VIRTUAL_HEAD, "linking entries to virtual root");
        links.extend(heads.iter().map(|&head| (real, head)));
        nodes += 1;
    }

    let limit = nodes as f64;
    let mut model = Model::new(nodes + links.len());
    for col in 0..nodes {
        model.set_column(col, 0.0, 0.0, limit, true);
    }
    for (idx, &(from, to)) in links.iter().enumerate() {
        let span = nodes + idx;
        model.set_column(span, 1.0, 1.0, limit, true);
        model.add_row(&[(to, 1.0), (from, -1.0), (span, -1.0)], 0.0);
    }
    model
}

/// Shifts ranks so the smallest is zero.
fn normalize(mut levels: Vec<usize>) -> Vec<usize> {
    let min = levels.iter().copied().min().unwrap_or(0);
    for level in &mut levels {
        *level -= min;
    }
    levels
}
