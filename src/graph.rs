use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};

/// Prefix of the chain nodes inserted for edges spanning several ranks.
pub const VIRTUAL_PREFIX: &str = "virt_";
/// Id of the synthetic root added when a graph has more than one entry.
pub const VIRTUAL_HEAD: &str = "virtH";

pub fn is_virtual(id: &str) -> bool {
    id.starts_with(VIRTUAL_PREFIX) || id == VIRTUAL_HEAD
}

/// Directed edge between two node ids as it crosses the message boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn is_loop(&self) -> bool {
        self.from == self.to
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub id: String,
    pub width: f64,
    pub height: f64,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeData {
    pub from: usize,
    pub to: usize,
}

/// Dense node/edge storage addressed by integer indices.
#[derive(Debug, Clone, Default)]
pub struct GraphArena {
    pub nodes: Vec<NodeData>,
    pub edges: Vec<EdgeData>,
    index: HashMap<String, usize>,
}

impl GraphArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, width: f64, height: f64, is_virtual: bool) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(NodeData {
            id: id.to_string(),
            width,
            height,
            is_virtual,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn add_edge(&mut self, from: usize, to: usize) -> usize {
        self.edges.push(EdgeData { from, to });
        self.edges.len() - 1
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, node: usize) -> &str {
        &self.nodes[node].id
    }

    /// Outgoing edge indices per node, in edge order.
    pub fn out_edges(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.nodes.len()];
        for (idx, edge) in self.edges.iter().enumerate() {
            out[edge.from].push(idx);
        }
        out
    }

    /// Incoming edge indices per node, in edge order.
    pub fn in_edges(&self) -> Vec<Vec<usize>> {
        let mut incoming = vec![Vec::new(); self.nodes.len()];
        for (idx, edge) in self.edges.iter().enumerate() {
            incoming[edge.to].push(idx);
        }
        incoming
    }

    /// Builds an arena of real nodes from request fields, rejecting malformed input.
    pub fn from_request(
        nodes: &[String],
        edges: &[Edge],
        widths: &BTreeMap<String, f64>,
        heights: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let mut arena = Self::new();
        for id in nodes {
            if is_virtual(id) {
                return Err(LayoutError::ReservedId(id.clone()));
            }
            if arena.node_index(id).is_some() {
                return Err(LayoutError::DuplicateNode(id.clone()));
            }
            let width = dimension(id, "width", widths.get(id))?;
            let height = dimension(id, "height", heights.get(id))?;
            arena.add_node(id, width, height, false);
        }
        for (idx, edge) in edges.iter().enumerate() {
            let from = arena.lookup(idx, &edge.from)?;
            let to = arena.lookup(idx, &edge.to)?;
            arena.add_edge(from, to);
        }
        Ok(arena)
    }

    pub(crate) fn lookup(&self, edge: usize, id: &str) -> Result<usize> {
        self.node_index(id).ok_or_else(|| LayoutError::UnknownNode {
            edge,
            node: id.to_string(),
        })
    }
}

pub(crate) fn dimension(node: &str, dimension: &'static str, value: Option<&f64>) -> Result<f64> {
    let Some(&value) = value else {
        return Err(LayoutError::MissingDimension {
            node: node.to_string(),
            dimension,
        });
    };
    if !value.is_finite() || value < 0.0 {
        return Err(LayoutError::InvalidDimension {
            node: node.to_string(),
            dimension,
            value,
        });
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unseen,
    Active,
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfsResult {
    /// Nodes in first-visit order.
    pub discovery: Vec<usize>,
    /// Edges whose target was on the active path when they were explored.
    pub back_edges: Vec<usize>,
}

/// Depth-first traversal from each root in turn, sharing the visited set.
///
/// Runs on an explicit stack but explores out-edges in the same order a
/// recursive traversal would, so discovery order and back edges match.
pub fn depth_first(arena: &GraphArena, out: &[Vec<usize>], roots: &[usize]) -> DfsResult {
    let mut visit = vec![Visit::Unseen; arena.nodes.len()];
    let mut result = DfsResult::default();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for &root in roots {
        if visit[root] != Visit::Unseen {
            continue;
        }
        visit[root] = Visit::Active;
        result.discovery.push(root);
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            if next == out[node].len() {
                visit[node] = Visit::Finished;
                stack.pop();
                continue;
            }
            top.1 += 1;
            let edge = out[node][next];
            let target = arena.edges[edge].to;
            match visit[target] {
                Visit::Unseen => {
                    visit[target] = Visit::Active;
                    result.discovery.push(target);
                    stack.push((target, 0));
                }
                Visit::Active => result.back_edges.push(edge),
                Visit::Finished => {}
            }
        }
    }
    result
}

/// Entry nodes whose reachable sets together cover the graph.
///
/// An explicit head comes first. Afterwards the first unseen node without
/// incoming edges is preferred, falling back to the first unseen node when
/// only cycles remain.
pub fn find_heads(arena: &GraphArena, out: &[Vec<usize>], explicit: Option<usize>) -> Vec<usize> {
    let count = arena.nodes.len();
    let mut in_degree = vec![0usize; count];
    for edge in &arena.edges {
        in_degree[edge.to] += 1;
    }

    let mut seen = vec![false; count];
    let mut covered = 0usize;
    let mut heads = Vec::new();
    let mark = |start: usize, seen: &mut Vec<bool>, covered: &mut usize| {
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if seen[node] {
                continue;
            }
            seen[node] = true;
            *covered += 1;
            for &edge in out[node].iter().rev() {
                let target = arena.edges[edge].to;
                if !seen[target] {
                    stack.push(target);
                }
            }
        }
    };

    if let Some(head) = explicit {
        heads.push(head);
        mark(head, &mut seen, &mut covered);
    }
    while covered < count {
        let next = (0..count)
            .find(|&n| !seen[n] && in_degree[n] == 0)
            .or_else(|| (0..count).find(|&n| !seen[n]));
        let Some(head) = next else {
            break;
        };
        heads.push(head);
        mark(head, &mut seen, &mut covered);
    }
    heads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(nodes: &[&str], edges: &[(&str, &str)]) -> GraphArena {
        let mut arena = GraphArena::new();
        for id in nodes {
            arena.add_node(id, 10.0, 10.0, false);
        }
        for (from, to) in edges {
            let from = arena.node_index(from).unwrap();
            let to = arena.node_index(to).unwrap();
            arena.add_edge(from, to);
        }
        arena
    }

    #[test]
    fn dfs_reports_back_edges_on_active_path_only() {
        let g = arena(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("a", "d"), ("d", "c")],
        );
        let out = g.out_edges();
        let dfs = depth_first(&g, &out, &[0]);
        assert_eq!(dfs.discovery, vec![0, 1, 2, 3]);
        // c -> a closes a cycle; d -> c reaches a finished node.
        assert_eq!(dfs.back_edges, vec![2]);
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let count = 50_000;
        let mut g = GraphArena::new();
        for idx in 0..count {
            g.add_node(&format!("n{idx}"), 1.0, 1.0, false);
        }
        for idx in 1..count {
            g.add_edge(idx - 1, idx);
        }
        let out = g.out_edges();
        let dfs = depth_first(&g, &out, &[0]);
        assert_eq!(dfs.discovery.len(), count);
        assert!(dfs.back_edges.is_empty());
    }

    #[test]
    fn heads_cover_sources_and_cycles() {
        let g = arena(
            &["a", "b", "c", "d", "e"],
            &[("a", "b"), ("c", "d"), ("d", "c"), ("e", "b")],
        );
        let out = g.out_edges();
        assert_eq!(find_heads(&g, &out, None), vec![0, 4, 2]);
        assert_eq!(find_heads(&g, &out, Some(3)), vec![3, 0, 4]);
    }

    #[test]
    fn request_validation_fails_fast() {
        let widths: BTreeMap<String, f64> = [("a".to_string(), 10.0)].into_iter().collect();
        let heights = widths.clone();
        let nodes = vec!["a".to_string()];

        let err = GraphArena::from_request(&nodes, &[Edge::new("a", "b")], &widths, &heights)
            .unwrap_err();
        assert_eq!(
            err,
            LayoutError::UnknownNode {
                edge: 0,
                node: "b".to_string()
            }
        );

        let mut bad = widths.clone();
        bad.insert("a".to_string(), f64::NAN);
        assert!(matches!(
            GraphArena::from_request(&nodes, &[], &bad, &heights),
            Err(LayoutError::InvalidDimension { .. })
        ));

        let reserved = vec!["virt_3".to_string()];
        assert_eq!(
            GraphArena::from_request(&reserved, &[], &widths, &heights).unwrap_err(),
            LayoutError::ReservedId("virt_3".to_string())
        );

        let twice = vec!["a".to_string(), "a".to_string()];
        assert_eq!(
            GraphArena::from_request(&twice, &[], &widths, &heights).unwrap_err(),
            LayoutError::DuplicateNode("a".to_string())
        );
    }
}
