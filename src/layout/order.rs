use std::collections::BTreeMap;

use tracing::debug;

use super::position;
use super::types::{LinkedEdge, OrderEntry};
use crate::config::Config;
use crate::error::{LayoutError, Result, Stage};
use crate::graph::{self, GraphArena, VIRTUAL_PREFIX};
use crate::protocol::{OrderRequest, OrderResponse};
use crate::solver::Lp;

fn malformed(message: String) -> LayoutError {
    LayoutError::MalformedRequest {
        stage: Stage::Order,
        message,
    }
}

/// Expands multi-rank edges into virtual chains and orders every rank to reduce crossings.
pub fn order(request: &OrderRequest, config: &Config) -> Result<OrderResponse> {
    let arena = GraphArena::from_request(
        &request.nodes,
        &request.edges,
        &request.widths,
        &request.heights,
    )?;
    let mut levels = Vec::with_capacity(arena.nodes.len());
    for node in &arena.nodes {
        let level = request
            .ranks
            .get(&node.id)
            .copied()
            .ok_or_else(|| malformed(format!("node `{}` has no rank", node.id)))?;
        levels.push(level);
    }
    if let Some(&idx) = request.inverted_edges.iter().find(|&&idx| idx >= arena.edges.len()) {
        return Err(malformed(format!("inverted edge {idx} does not exist")));
    }

    let (expanded, linked) = expand(&arena, &mut levels, config)?;
    let out = expanded.out_edges();
    let mut entries = Vec::with_capacity(request.entries.len());
    for id in &request.entries {
        let entry = expanded
            .node_index(id)
            .ok_or_else(|| malformed(format!("entry `{id}` is not a node")))?;
        entries.push(entry);
    }

    let layers = initial_layers(&expanded, &out, &entries, &levels);
    let mut layering = Layering::new(&expanded, &levels, layers);
    let initial = layering.crossings();
    let crossings = layering.minimize(config.layout.sweeps);
    debug!(
        nodes = expanded.nodes.len(),
        virtual_nodes = expanded.nodes.len() - arena.nodes.len(),
        initial,
        crossings,
        "ordered ranks"
    );

    let mut layout = BTreeMap::new();
    for (rank, layer) in layering.layers.iter().enumerate() {
        for (order, &node) in layer.iter().enumerate() {
            let data = &expanded.nodes[node];
            layout.insert(
                data.id.clone(),
                OrderEntry {
                    rank,
                    order,
                    width: data.width,
                    height: data.height,
                },
            );
        }
    }
    let model = position::coordinate_model(&expanded, &layering.layers, &config.layout);

    Ok(OrderResponse {
        nodes: expanded.nodes.iter().map(|node| node.id.clone()).collect(),
        edges: linked,
        layout,
        lp: Lp::unsolved(model),
        inverted_edges: request.inverted_edges.clone(),
        loops: request.loops.clone(),
        crossings,
    })
}

/// Replaces every edge spanning more than one rank by a chain of unit-span
/// edges through fresh virtual nodes, one per intermediate rank.
fn expand(
    arena: &GraphArena,
    levels: &mut Vec<usize>,
    config: &Config,
) -> Result<(GraphArena, Vec<LinkedEdge>)> {
    let mut expanded = GraphArena::new();
    for node in &arena.nodes {
        expanded.add_node(&node.id, node.width, node.height, false);
    }
    let mut linked = Vec::with_capacity(arena.edges.len());
    let mut next_virtual = 0usize;

    for (origin, edge) in arena.edges.iter().enumerate() {
        let (from, to) = (edge.from, edge.to);
        if levels[to] <= levels[from] {
            return Err(malformed(format!(
                "edge {origin} from `{}` (rank {}) to `{}` (rank {}) does not point down",
                arena.id(from),
                levels[from],
                arena.id(to),
                levels[to]
            )));
        }
        let mut prev = from;
        for level in levels[from] + 1..levels[to] {
            let id = format!("{VIRTUAL_PREFIX}{next_virtual}");
            next_virtual += 1;
            let node = expanded.add_node(
                &id,
                config.layout.virtual_width,
                config.layout.virtual_height,
                true,
            );
            levels.push(level);
            expanded.add_edge(prev, node);
            linked.push(LinkedEdge {
                from: expanded.id(prev).to_string(),
                to: id,
                origin,
            });
            prev = node;
        }
        expanded.add_edge(prev, to);
        linked.push(LinkedEdge {
            from: expanded.id(prev).to_string(),
            to: expanded.id(to).to_string(),
            origin,
        });
    }
    Ok((expanded, linked))
}

/// Ranks filled in depth-first discovery order from the entries; nodes the
/// traversal never reaches follow in index order.
fn initial_layers(
    arena: &GraphArena,
    out: &[Vec<usize>],
    entries: &[usize],
    levels: &[usize],
) -> Vec<Vec<usize>> {
    let mut sequence = graph::depth_first(arena, out, entries).discovery;
    let mut placed = vec![false; arena.nodes.len()];
    for &node in &sequence {
        placed[node] = true;
    }
    sequence.extend((0..arena.nodes.len()).filter(|&node| !placed[node]));

    let depth = levels.iter().copied().max().map_or(0, |max| max + 1);
    let mut layers = vec![Vec::new(); depth];
    for node in sequence {
        layers[levels[node]].push(node);
    }
    layers
}

/// Median position of a node's neighbours in the adjacent rank.
///
/// No neighbours gives `-1`, so such nodes gather at the left of the rank.
/// With an even count above two the result leans towards the side whose
/// neighbours are packed more tightly.
pub(super) fn median_value(sorted: &[usize]) -> f64 {
    let p: Vec<f64> = sorted.iter().map(|&pos| pos as f64).collect();
    let n = p.len();
    match n {
        0 => -1.0,
        1 => p[0],
        2 => (p[0] + p[1]) / 2.0,
        _ if n % 2 == 1 => p[n / 2],
        _ => {
            let m = n / 2;
            let left = p[m - 1] - p[0];
            let right = p[n - 1] - p[m];
            if left + right == 0.0 {
                (p[m - 1] + p[m]) / 2.0
            } else {
                (p[m - 1] * right + p[m] * left) / (left + right)
            }
        }
    }
}

pub(super) struct Layering {
    pub(super) layers: Vec<Vec<usize>>,
    position: Vec<usize>,
    /// Neighbours one rank above, per node.
    upper: Vec<Vec<usize>>,
    /// Neighbours one rank below, per node.
    lower: Vec<Vec<usize>>,
    /// Edges leaving each rank, as `(from, to)` node pairs.
    spans: Vec<Vec<(usize, usize)>>,
}

impl Layering {
    pub(super) fn new(arena: &GraphArena, levels: &[usize], layers: Vec<Vec<usize>>) -> Self {
        let count = arena.nodes.len();
        let mut upper = vec![Vec::new(); count];
        let mut lower = vec![Vec::new(); count];
        let mut spans = vec![Vec::new(); layers.len()];
        for edge in &arena.edges {
            upper[edge.to].push(edge.from);
            lower[edge.from].push(edge.to);
            spans[levels[edge.from]].push((edge.from, edge.to));
        }
        let mut layering = Self {
            layers,
            position: vec![0; count],
            upper,
            lower,
            spans,
        };
        for rank in 0..layering.layers.len() {
            layering.reindex(rank);
        }
        layering
    }

    fn reindex(&mut self, rank: usize) {
        for (pos, &node) in self.layers[rank].iter().enumerate() {
            self.position[node] = pos;
        }
    }

    /// Crossings between `rank` and `rank + 1`. Edges sharing an endpoint never cross.
    fn crossings_below(&self, rank: usize) -> usize {
        let Some(edges) = self.spans.get(rank) else {
            return 0;
        };
        let mut count = 0;
        for (i, &(a, b)) in edges.iter().enumerate() {
            for &(c, d) in &edges[i + 1..] {
                if a == c || b == d {
                    continue;
                }
                let top = self.position[a] < self.position[c];
                let bottom = self.position[b] < self.position[d];
                if top != bottom {
                    count += 1;
                }
            }
        }
        count
    }

    pub(super) fn crossings(&self) -> usize {
        (0..self.layers.len()).map(|rank| self.crossings_below(rank)).sum()
    }

    fn crossings_around(&self, rank: usize) -> usize {
        let above = if rank > 0 { self.crossings_below(rank - 1) } else { 0 };
        above + self.crossings_below(rank)
    }

    /// One median pass. Downward passes sort ranks `1..` by upper neighbours,
    /// upward passes sort ranks from the second-to-last back to `0` by lower neighbours.
    fn sweep(&mut self, downward: bool) {
        let depth = self.layers.len();
        if depth < 2 {
            return;
        }
        let ranks: Vec<usize> = if downward {
            (1..depth).collect()
        } else {
            (0..depth - 1).rev().collect()
        };
        for rank in ranks {
            let mut keyed: Vec<(f64, usize)> = self.layers[rank]
                .iter()
                .map(|&node| {
                    let neighbours = if downward {
                        &self.upper[node]
                    } else {
                        &self.lower[node]
                    };
                    let mut positions: Vec<usize> =
                        neighbours.iter().map(|&n| self.position[n]).collect();
                    positions.sort_unstable();
                    (median_value(&positions), node)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
            self.layers[rank] = keyed.into_iter().map(|(_, node)| node).collect();
            self.reindex(rank);
        }
    }

    /// Swaps adjacent nodes while doing so strictly lowers the crossings around their rank.
    fn transpose(&mut self) {
        loop {
            let mut improved = false;
            for rank in 0..self.layers.len() {
                for idx in 0..self.layers[rank].len().saturating_sub(1) {
                    let before = self.crossings_around(rank);
                    self.swap(rank, idx);
                    if self.crossings_around(rank) < before {
                        improved = true;
                    } else {
                        self.swap(rank, idx);
                    }
                }
            }
            if !improved {
                break;
            }
        }
    }

    fn swap(&mut self, rank: usize, idx: usize) {
        self.layers[rank].swap(idx, idx + 1);
        let (a, b) = (self.layers[rank][idx], self.layers[rank][idx + 1]);
        self.position[a] = idx;
        self.position[b] = idx + 1;
    }

    /// Alternating sweeps with transposition; keeps the best ordering seen.
    pub(super) fn minimize(&mut self, sweeps: usize) -> usize {
        let mut best = self.layers.clone();
        let mut best_count = self.crossings();
        for iteration in 0..sweeps {
            if best_count == 0 {
                break;
            }
            self.sweep(iteration % 2 == 0);
            self.transpose();
            let count = self.crossings();
            if count < best_count {
                best_count = count;
                best = self.layers.clone();
            }
        }
        self.layers = best;
        for rank in 0..self.layers.len() {
            self.reindex(rank);
        }
        best_count
    }
}
