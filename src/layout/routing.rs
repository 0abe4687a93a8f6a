use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use tracing::{debug, warn};

use super::types::{Point, Rect, Segment};
use crate::config::{Config, RouteConfig, RouteMetric};
use crate::error::{LayoutError, Result, Stage};
use crate::graph::is_virtual;
use crate::protocol::{RouteRequest, RouteResponse};

// ── Intersection tolerance ──────────────────────────────────────────
/// Cross products below this magnitude treat two segments as parallel.
const PARALLEL_EPS: f64 = 1e-9;

fn cross(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    ax * by - ay * bx
}

/// Parametric segment test. Both parameters must fall in the closed unit
/// interval; parallel and degenerate segments never intersect.
pub fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let (rx, ry) = (b.x - a.x, b.y - a.y);
    let (sx, sy) = (d.x - c.x, d.y - c.y);
    let denom = cross(rx, ry, sx, sy);
    if denom.abs() < PARALLEL_EPS {
        return false;
    }
    let (qx, qy) = (c.x - a.x, c.y - a.y);
    let t = cross(qx, qy, sx, sy) / denom;
    let u = cross(qx, qy, rx, ry) / denom;
    (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
}

/// Whether the segment `a`–`b` crosses any of the four sides of `rect`.
pub fn segment_crosses_rect(a: Point, b: Point, rect: &Rect) -> bool {
    let min_x = a.x.min(b.x);
    let max_x = a.x.max(b.x);
    let min_y = a.y.min(b.y);
    let max_y = a.y.max(b.y);
    if max_x < rect.x || min_x > rect.right() || max_y < rect.y || min_y > rect.bottom() {
        return false;
    }
    rect.sides()
        .iter()
        .any(|side| segments_intersect(a, b, side.from, side.to))
}

fn malformed(message: String) -> LayoutError {
    LayoutError::MalformedRequest {
        stage: Stage::Route,
        message,
    }
}

fn checked_box(id: &str, rect: Option<&Rect>) -> Result<Rect> {
    let rect = rect.ok_or_else(|| malformed(format!("node `{id}` has no box")))?;
    for (dimension, value) in [("x", rect.x), ("y", rect.y)] {
        if !value.is_finite() {
            return Err(LayoutError::InvalidDimension {
                node: id.to_string(),
                dimension,
                value,
            });
        }
    }
    for (dimension, value) in [("width", rect.width), ("height", rect.height)] {
        if !value.is_finite() || value < 0.0 {
            return Err(LayoutError::InvalidDimension {
                node: id.to_string(),
                dimension,
                value,
            });
        }
    }
    Ok(*rect)
}

/// Request edge resolved to node indices.
struct Leg {
    from: usize,
    to: usize,
    reversed: bool,
}

struct RouteContext<'a> {
    boxes: Vec<Rect>,
    is_virtual: Vec<bool>,
    /// Boxes of real nodes; virtual nodes never obstruct.
    obstacles: Vec<Rect>,
    config: &'a RouteConfig,
}

/// Routes every request edge, in input order, as a polyline between ports.
pub fn route(request: &RouteRequest, config: &Config) -> Result<RouteResponse> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut boxes = Vec::with_capacity(request.nodes.len());
    for (idx, id) in request.nodes.iter().enumerate() {
        if index.insert(id.as_str(), idx).is_some() {
            return Err(LayoutError::DuplicateNode(id.clone()));
        }
        boxes.push(checked_box(id, request.boxes.get(id))?);
    }
    let rank_of = |id: &str| {
        request
            .layout
            .get(id)
            .map(|entry| entry.rank)
            .ok_or_else(|| malformed(format!("node `{id}` has no rank")))
    };

    let mut legs = Vec::with_capacity(request.edges.len());
    for (idx, edge) in request.edges.iter().enumerate() {
        let lookup = |id: &str| {
            index.get(id).copied().ok_or_else(|| LayoutError::UnknownNode {
                edge: idx,
                node: id.to_string(),
            })
        };
        let (from, to) = (lookup(&edge.from)?, lookup(&edge.to)?);
        let reversed = from != to && rank_of(&edge.from)? > rank_of(&edge.to)?;
        legs.push(Leg { from, to, reversed });
    }

    let virtual_flags: Vec<bool> = request.nodes.iter().map(|id| is_virtual(id)).collect();
    let obstacles = boxes
        .iter()
        .zip(&virtual_flags)
        .filter(|(_, virt)| !**virt)
        .map(|(rect, _)| *rect)
        .collect();
    let ctx = RouteContext {
        boxes,
        is_virtual: virtual_flags,
        obstacles,
        config: &config.route,
    };

    let mut out_degree = vec![0usize; ctx.boxes.len()];
    let mut in_degree = vec![0usize; ctx.boxes.len()];
    for leg in legs.iter().filter(|leg| leg.from != leg.to) {
        out_degree[leg.from] += 1;
        in_degree[leg.to] += 1;
    }
    let mut out_used = vec![0usize; ctx.boxes.len()];
    let mut in_used = vec![0usize; ctx.boxes.len()];

    let mut routes = Vec::with_capacity(legs.len());
    let mut unrouted = Vec::new();
    for (idx, leg) in legs.iter().enumerate() {
        if leg.from == leg.to {
            routes.push(route_self_loop(&ctx.boxes[leg.from], ctx.config));
            continue;
        }
        let start = ctx.out_port(leg.from, out_used[leg.from], out_degree[leg.from]);
        let end = ctx.in_port(leg.to, in_used[leg.to], in_degree[leg.to]);
        out_used[leg.from] += 1;
        in_used[leg.to] += 1;

        let mut head = vec![start];
        let mut tail = vec![end];
        if leg.reversed && !ctx.is_virtual[leg.from] {
            head = ctx.source_jog(leg.from, start);
        }
        if leg.reversed && !ctx.is_virtual[leg.to] {
            tail = ctx.target_jog(leg.to, end);
        }
        let (from_point, to_point) = (head[head.len() - 1], tail[0]);

        let path = match ctx.find_path(from_point, to_point) {
            Some(path) => path,
            None => {
                warn!(
                    edge = idx,
                    from = %request.edges[idx].from,
                    to = %request.edges[idx].to,
                    "no obstacle-free path; falling back to a direct segment"
                );
                unrouted.push(idx);
                vec![from_point, to_point]
            }
        };
        let mut points = head[..head.len() - 1].to_vec();
        points.extend(path);
        points.extend_from_slice(&tail[1..]);
        routes.push(points);
    }

    let segments = routes
        .iter()
        .flat_map(|points| {
            points
                .windows(2)
                .map(|pair| Segment {
                    from: pair[0],
                    to: pair[1],
                })
                .collect::<Vec<_>>()
        })
        .collect();
    debug!(
        edges = routes.len(),
        obstacles = ctx.obstacles.len(),
        unrouted = unrouted.len(),
        "routed edges"
    );
    Ok(RouteResponse {
        segments,
        routes,
        unrouted,
    })
}

impl RouteContext<'_> {
    /// Offset of the `slot`-th of `count` ports spread around the box center.
    fn port_x(&self, node: usize, slot: usize, count: usize) -> f64 {
        let rect = &self.boxes[node];
        let spacing = self.config.port_spacing;
        let spread = (count as f64 * spacing - spacing) / 2.0;
        rect.x + rect.width / 2.0 - spread + spacing * slot as f64
    }

    fn out_port(&self, node: usize, slot: usize, count: usize) -> Point {
        if self.is_virtual[node] {
            return self.boxes[node].center();
        }
        let y = self.boxes[node].bottom() + self.config.port_gap;
        Point::new(self.port_x(node, slot, count), y)
    }

    fn in_port(&self, node: usize, slot: usize, count: usize) -> Point {
        if self.is_virtual[node] {
            return self.boxes[node].center();
        }
        let y = self.boxes[node].y - self.config.port_gap;
        Point::new(self.port_x(node, slot, count), y)
    }

    /// Leaves the bottom port, drops by the stub and turns out past the right side.
    fn source_jog(&self, node: usize, port: Point) -> Vec<Point> {
        let stub = self.config.stub;
        let side = self.boxes[node].right() + stub;
        vec![
            port,
            Point::new(port.x, port.y + stub),
            Point::new(side, port.y + stub),
        ]
    }

    /// Arrives from past the right side above the box and drops into the top port.
    fn target_jog(&self, node: usize, port: Point) -> Vec<Point> {
        let stub = self.config.stub;
        let side = self.boxes[node].right() + stub;
        vec![
            Point::new(side, port.y - stub),
            Point::new(port.x, port.y - stub),
            port,
        ]
    }

    fn visible(&self, a: Point, b: Point) -> bool {
        !self
            .obstacles
            .iter()
            .any(|rect| segment_crosses_rect(a, b, rect))
    }

    /// Straight segment when unobstructed, otherwise a shortest path over the
    /// visibility graph of inflated obstacle corners.
    fn find_path(&self, start: Point, end: Point) -> Option<Vec<Point>> {
        if self.visible(start, end) {
            return Some(vec![start, end]);
        }
        let mut vertices = vec![start, end];
        for rect in &self.obstacles {
            vertices.extend(rect.inflate(self.config.clearance).corners());
        }
        let parents = match self.config.metric {
            RouteMetric::Hops => self.breadth_first(&vertices),
            RouteMetric::Euclidean => self.dijkstra(&vertices),
        }?;

        let mut path = vec![end];
        let mut cursor = 1;
        while cursor != 0 {
            cursor = parents[cursor]?;
            path.push(vertices[cursor]);
        }
        path.reverse();
        Some(path)
    }

    /// Unit-weight search from vertex 0; `None` when vertex 1 is unreachable.
    fn breadth_first(&self, vertices: &[Point]) -> Option<Vec<Option<usize>>> {
        let mut parents: Vec<Option<usize>> = vec![None; vertices.len()];
        let mut seen = vec![false; vertices.len()];
        let mut queue = VecDeque::from([0usize]);
        seen[0] = true;
        while let Some(current) = queue.pop_front() {
            if current == 1 {
                return Some(parents);
            }
            for next in 0..vertices.len() {
                if seen[next] || !self.visible(vertices[current], vertices[next]) {
                    continue;
                }
                seen[next] = true;
                parents[next] = Some(current);
                queue.push_back(next);
            }
        }
        None
    }

    /// Euclidean-weight search from vertex 0; `None` when vertex 1 is unreachable.
    fn dijkstra(&self, vertices: &[Point]) -> Option<Vec<Option<usize>>> {
        let mut parents: Vec<Option<usize>> = vec![None; vertices.len()];
        let mut dist = vec![f64::INFINITY; vertices.len()];
        let mut done = vec![false; vertices.len()];
        let mut heap = BinaryHeap::new();
        dist[0] = 0.0;
        heap.push(SearchEntry {
            cost: 0.0,
            vertex: 0,
        });
        while let Some(SearchEntry { cost, vertex }) = heap.pop() {
            if done[vertex] {
                continue;
            }
            done[vertex] = true;
            if vertex == 1 {
                return Some(parents);
            }
            for next in 0..vertices.len() {
                if done[next] || !self.visible(vertices[vertex], vertices[next]) {
                    continue;
                }
                let candidate = cost + vertices[vertex].distance(vertices[next]);
                if candidate < dist[next] {
                    dist[next] = candidate;
                    parents[next] = Some(vertex);
                    heap.push(SearchEntry {
                        cost: candidate,
                        vertex: next,
                    });
                }
            }
        }
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct SearchEntry {
    cost: f64,
    vertex: usize,
}

impl Eq for SearchEntry {}

impl Ord for SearchEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

impl PartialOrd for SearchEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Five-segment rectangular loop hugging the left side of the box.
pub fn route_self_loop(rect: &Rect, config: &RouteConfig) -> Vec<Point> {
    let dx = config.loop_offset;
    let dy = config.loop_overhang;
    vec![
        Point::new(rect.x + dx, rect.y + dy),
        Point::new(rect.x + dx, rect.y - dy),
        Point::new(rect.x - dx, rect.y - dy),
        Point::new(rect.x - dx, rect.bottom() + dy),
        Point::new(rect.x + dx, rect.bottom() + dy),
        Point::new(rect.x + dx, rect.bottom() - dy),
    ]
}
