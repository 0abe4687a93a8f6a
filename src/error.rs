use thiserror::Error;

use crate::solver::Status;

pub type Result<T> = std::result::Result<T, LayoutError>;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rank,
    Order,
    Solve,
    Finalize,
    Route,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Rank => "rank",
            Stage::Order => "order",
            Stage::Solve => "solve",
            Stage::Finalize => "finalize",
            Stage::Route => "route",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("node `{0}` is declared more than once")]
    DuplicateNode(String),
    #[error("edge {edge} references unknown node `{node}`")]
    UnknownNode { edge: usize, node: String },
    #[error("node `{node}` has no {dimension}")]
    MissingDimension { node: String, dimension: &'static str },
    #[error("node `{node}` has invalid {dimension} {value}")]
    InvalidDimension {
        node: String,
        dimension: &'static str,
        value: f64,
    },
    #[error("node id `{0}` uses the reserved virtual-node prefix")]
    ReservedId(String),
    #[error("head `{0}` is not a node of the graph")]
    UnknownHead(String),
    #[error("{stage} stage failed: model is {status}")]
    Solver { stage: Stage, status: Status },
    #[error("{0} stage requires a solved model")]
    UnsolvedModel(Stage),
    #[error("malformed model: {0}")]
    MalformedModel(String),
    #[error("malformed {stage} request: {message}")]
    MalformedRequest { stage: Stage, message: String },
}

impl LayoutError {
    /// Short machine-readable tag used in failure responses.
    pub fn kind(&self) -> &'static str {
        match self {
            LayoutError::DuplicateNode(_)
            | LayoutError::UnknownNode { .. }
            | LayoutError::MissingDimension { .. }
            | LayoutError::InvalidDimension { .. }
            | LayoutError::ReservedId(_)
            | LayoutError::UnknownHead(_)
            | LayoutError::MalformedRequest { .. } => "malformed_input",
            LayoutError::Solver { status, .. } => match status {
                Status::Unbounded => "unbounded",
                _ => "infeasible",
            },
            LayoutError::UnsolvedModel(_) | LayoutError::MalformedModel(_) => "malformed_model",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_node() {
        let err = LayoutError::UnknownNode {
            edge: 3,
            node: "zz".to_string(),
        };
        assert_eq!(err.to_string(), "edge 3 references unknown node `zz`");
        assert_eq!(err.kind(), "malformed_input");
    }

    #[test]
    fn solver_failures_carry_their_status() {
        let err = LayoutError::Solver {
            stage: Stage::Rank,
            status: Status::Infeasible,
        };
        assert_eq!(err.to_string(), "rank stage failed: model is infeasible");
        assert_eq!(err.kind(), "infeasible");
    }
}
