//! Per-stage request and response messages.
//!
//! Each stage is one request/response exchange. Messages are tagged by
//! `stage` and always carry every field, using empty collections instead of
//! absent values, so a worker can be driven over any line-oriented transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{LayoutError, Result, Stage};
use crate::graph::Edge;
use crate::layout::{
    self, Drawing, LinkedEdge, OrderEntry, Placement, Point, RankEntry, Rect, Segment,
};
use crate::solver::{self, Lp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankRequest {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub widths: BTreeMap<String, f64>,
    pub heights: BTreeMap<String, f64>,
    #[serde(default)]
    pub head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankResponse {
    pub nodes: Vec<String>,
    /// Non-loop edges, with back edges already inverted.
    pub edges: Vec<Edge>,
    /// Indices into `edges` of the edges that were inverted.
    pub inverted_edges: Vec<usize>,
    pub loops: Vec<Edge>,
    pub ranks: BTreeMap<String, usize>,
    /// Rank model together with its solution.
    pub lp: Lp,
    pub head: Option<String>,
    /// Traversal roots in the order they were chosen.
    pub entries: Vec<String>,
    pub widths: BTreeMap<String, f64>,
    pub heights: BTreeMap<String, f64>,
}

pub type OrderRequest = RankResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    /// Real nodes followed by the virtual chain nodes.
    pub nodes: Vec<String>,
    /// Unit-span edges after virtual-node expansion.
    pub edges: Vec<LinkedEdge>,
    pub layout: BTreeMap<String, OrderEntry>,
    /// Coordinate model; unsolved until it passes through the solve stage.
    pub lp: Lp,
    pub inverted_edges: Vec<usize>,
    pub loops: Vec<Edge>,
    pub crossings: usize,
}

pub type FinalizeRequest = OrderResponse;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
    pub lp: Lp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResponse {
    pub lp: Lp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub nodes: Vec<String>,
    /// Edges in their original direction, self-loops appended.
    pub edges: Vec<Edge>,
    pub layout: BTreeMap<String, Placement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    pub boxes: BTreeMap<String, Rect>,
    pub layout: BTreeMap<String, RankEntry>,
}

/// Answer of the route stage.
///
/// `segments` is the stage's contract: the ordered list of `{from, to}`
/// segments, route after route in request edge order. `routes` and `unrouted`
/// are conveniences derived from the same search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    /// Consecutive segments of every route, edge by edge in input order.
    pub segments: Vec<Segment>,
    /// The same points grouped into one polyline per request edge.
    pub routes: Vec<Vec<Point>>,
    /// Edge indices that found no obstacle-free path.
    pub unrouted: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Request {
    Rank(RankRequest),
    Order(OrderRequest),
    Solve(SolveRequest),
    Finalize(FinalizeRequest),
    Route(RouteRequest),
    /// Every stage in sequence.
    Layout(RankRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Response {
    Rank(RankResponse),
    Order(OrderResponse),
    Solve(SolveResponse),
    Finalize(FinalizeResponse),
    Route(RouteResponse),
    Layout(Drawing),
    Failed { kind: String, message: String },
}

impl Response {
    pub fn failed(err: &LayoutError) -> Self {
        Response::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Response::Failed { .. })
    }
}

/// Solves the model carried by a solve request.
pub fn solve_stage(request: SolveRequest, config: &Config) -> Result<SolveResponse> {
    let SolveRequest { lp } = request;
    let solution = solver::solve(&lp.model, &config.solver)?;
    if !solution.is_optimal() {
        return Err(LayoutError::Solver {
            stage: Stage::Solve,
            status: solution.status,
        });
    }
    Ok(SolveResponse {
        lp: Lp {
            model: lp.model,
            solution: Some(solution),
        },
    })
}

/// Runs one stage. Failures become [`Response::Failed`]; no partial result is returned.
pub fn dispatch(request: Request, config: &Config) -> Response {
    let result = match request {
        Request::Rank(req) => layout::rank(&req, config).map(Response::Rank),
        Request::Order(req) => layout::order(&req, config).map(Response::Order),
        Request::Solve(req) => solve_stage(req, config).map(Response::Solve),
        Request::Finalize(req) => layout::finalize(&req, config).map(Response::Finalize),
        Request::Route(req) => layout::route(&req, config).map(Response::Route),
        Request::Layout(req) => layout::compute_drawing(&req, config).map(Response::Layout),
    };
    result.unwrap_or_else(|err| {
        debug!(kind = err.kind(), error = %err, "stage failed");
        Response::failed(&err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RankRequest {
        let nodes = ["a", "b", "c"];
        RankRequest {
            nodes: nodes.iter().map(|id| id.to_string()).collect(),
            edges: vec![Edge::new("a", "b"), Edge::new("b", "c"), Edge::new("c", "c")],
            widths: nodes.iter().map(|id| (id.to_string(), 40.0)).collect(),
            heights: nodes.iter().map(|id| (id.to_string(), 20.0)).collect(),
            head: None,
        }
    }

    #[test]
    fn requests_are_tagged_by_stage() {
        let json = r#"{
            "stage": "rank",
            "nodes": ["a", "b"],
            "edges": [{"from": "a", "to": "b"}],
            "widths": {"a": 10, "b": 10},
            "heights": {"a": 5, "b": 5}
        }"#;
        let request: Request = serde_json::from_str(json).unwrap();
        let Request::Rank(rank) = request else {
            panic!("expected a rank request");
        };
        assert_eq!(rank.head, None);
        assert_eq!(rank.edges, vec![Edge::new("a", "b")]);
    }

    #[test]
    fn staged_messages_survive_json_between_stages() {
        let config = Config::default();
        let ranked = layout::rank(&sample(), &config).unwrap();
        let wire = serde_json::to_string(&Request::Order(ranked.clone())).unwrap();
        let Request::Order(decoded) = serde_json::from_str(&wire).unwrap() else {
            panic!("expected an order request");
        };
        assert_eq!(decoded, ranked);

        let Response::Order(ordered) = dispatch(Request::Order(decoded), &config) else {
            panic!("order stage failed");
        };
        assert!(ordered.lp.solution.is_none());
        let Response::Solve(solved) = dispatch(
            Request::Solve(SolveRequest {
                lp: ordered.lp.clone(),
            }),
            &config,
        ) else {
            panic!("solve stage failed");
        };
        let finalize = FinalizeRequest {
            lp: solved.lp,
            ..ordered
        };
        let Response::Finalize(done) = dispatch(Request::Finalize(finalize), &config) else {
            panic!("finalize stage failed");
        };
        assert_eq!(done.edges.last(), Some(&Edge::new("c", "c")));
        assert_eq!(done.layout["a"].rank, 0);
        assert_eq!(done.layout["c"].rank, 2);
    }

    #[test]
    fn failures_carry_kind_and_message() {
        let mut request = sample();
        request.edges.push(Edge::new("a", "zz"));
        let response = dispatch(Request::Rank(request), &Config::default());
        assert_eq!(
            response,
            Response::Failed {
                kind: "malformed_input".to_string(),
                message: "edge 3 references unknown node `zz`".to_string(),
            }
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stage"], "failed");
    }

    #[test]
    fn finalize_rejects_unsolved_model() {
        let config = Config::default();
        let ranked = layout::rank(&sample(), &config).unwrap();
        let ordered = layout::order(&ranked, &config).unwrap();
        let response = dispatch(Request::Finalize(ordered), &config);
        let Response::Failed { kind, .. } = response else {
            panic!("expected failure");
        };
        assert_eq!(kind, "malformed_model");
    }
}
