//! FIFO branch-and-bound over the simplex relaxation.
//!
//! Every queued node shares the parent's constraint matrix; a node only owns the
//! bound overrides it adds, linked to its parent's overrides. The full bound
//! vectors are materialized when the node is popped for solving.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, warn};

use super::{Model, Solution, Status, simplex};
use crate::config::SolverConfig;

#[derive(Debug)]
struct BoundOverride {
    col: usize,
    lower: f64,
    upper: f64,
    parent: Option<Rc<BoundOverride>>,
}

#[derive(Debug, Clone, Default)]
struct BranchNode {
    overrides: Option<Rc<BoundOverride>>,
}

impl BranchNode {
    fn child(&self, col: usize, lower: f64, upper: f64) -> Self {
        Self {
            overrides: Some(Rc::new(BoundOverride {
                col,
                lower,
                upper,
                parent: self.overrides.clone(),
            })),
        }
    }

    /// Bound vectors for this node; the override nearest to the node wins.
    fn bounds(&self, model: &Model) -> (Vec<f64>, Vec<f64>) {
        let mut lower = model.lower.clone();
        let mut upper = model.upper.clone();
        let mut seen = vec![false; model.cols];
        let mut cursor = self.overrides.as_deref();
        while let Some(entry) = cursor {
            if !seen[entry.col] {
                seen[entry.col] = true;
                lower[entry.col] = entry.lower;
                upper[entry.col] = entry.upper;
            }
            cursor = entry.parent.as_deref();
        }
        (lower, upper)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilpStats {
    pub nodes_explored: usize,
    /// Objective of every incumbent in the order it was recorded.
    pub incumbents: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilpOutcome {
    pub solution: Solution,
    pub stats: MilpStats,
}

pub fn branch_and_bound(model: &Model, config: &SolverConfig) -> MilpOutcome {
    let eps = config.epsilon;
    let mut stats = MilpStats::default();
    let mut best: Option<Solution> = None;
    let mut queue = VecDeque::from([BranchNode::default()]);

    while let Some(node) = queue.pop_front() {
        if stats.nodes_explored >= config.node_budget {
            warn!(
                budget = config.node_budget,
                pending = queue.len() + 1,
                "branch-and-bound node budget exhausted; reporting infeasible"
            );
            return MilpOutcome {
                solution: Solution::failed(Status::Infeasible),
                stats,
            };
        }
        stats.nodes_explored += 1;

        let (lower, upper) = node.bounds(model);
        if lower.iter().zip(&upper).any(|(lo, up)| lo > up) {
            continue;
        }
        let relaxed = simplex::solve_bounded(model, &lower, &upper, config);
        match relaxed.status {
            Status::Optimal => {}
            Status::Unbounded if stats.nodes_explored == 1 => {
                return MilpOutcome {
                    solution: relaxed,
                    stats,
                };
            }
            _ => continue,
        }
        if let Some(incumbent) = &best {
            if relaxed.objective >= incumbent.objective - eps {
                continue;
            }
        }

        match most_fractional(model, &relaxed.x, eps) {
            None => {
                let x: Vec<f64> = relaxed
                    .x
                    .iter()
                    .enumerate()
                    .map(|(j, v)| if model.integer[j] { v.round() } else { *v })
                    .collect();
                let objective = model.objective(&x);
                stats.incumbents.push(objective);
                best = Some(Solution {
                    status: Status::Optimal,
                    x,
                    objective,
                });
            }
            Some(col) => {
                let value = relaxed.x[col];
                queue.push_back(node.child(col, lower[col], value.floor()));
                queue.push_back(node.child(col, value.ceil(), upper[col]));
            }
        }
    }

    debug!(
        nodes = stats.nodes_explored,
        incumbents = stats.incumbents.len(),
        "branch-and-bound finished"
    );
    MilpOutcome {
        solution: best.unwrap_or_else(|| Solution::failed(Status::Infeasible)),
        stats,
    }
}

/// Integer column farthest from integrality; ties go to the smaller index.
fn most_fractional(model: &Model, x: &[f64], eps: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (col, value) in x.iter().enumerate() {
        if !model.integer[col] {
            continue;
        }
        let frac = value - value.floor();
        let distance = frac.min(1.0 - frac);
        if distance <= eps {
            continue;
        }
        if best.map_or(true, |(_, current)| distance > current) {
            best = Some((col, distance));
        }
    }
    best.map(|(col, _)| col)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// max 5a + 4b  s.t. 6a + 4b ≤ 24, a + 2b ≤ 6, a and b integral.
    fn classic_model() -> Model {
        let mut model = Model::new(4);
        model.set_column(0, -5.0, 0.0, 10.0, true);
        model.set_column(1, -4.0, 0.0, 10.0, true);
        model.set_column(2, 0.0, 0.0, 100.0, false);
        model.set_column(3, 0.0, 0.0, 100.0, false);
        model.add_row(&[(0, 6.0), (1, 4.0), (2, 1.0)], 24.0);
        model.add_row(&[(0, 1.0), (1, 2.0), (3, 1.0)], 6.0);
        model
    }

    #[test]
    fn finds_integer_optimum_below_relaxation() {
        let model = classic_model();
        let relaxed = simplex::solve_bounded(&model, &model.lower, &model.upper, &SolverConfig::default());
        assert!((relaxed.objective + 21.0).abs() < 1e-6);

        let outcome = branch_and_bound(&model, &SolverConfig::default());
        assert_eq!(outcome.solution.status, Status::Optimal);
        assert!((outcome.solution.objective + 20.0).abs() < 1e-6);
        assert_eq!(outcome.solution.x[0], 4.0);
        assert_eq!(outcome.solution.x[1], 0.0);
        assert!(model.residual(&outcome.solution.x) < 1e-6);
    }

    #[test]
    fn incumbents_improve_monotonically() {
        let outcome = branch_and_bound(&classic_model(), &SolverConfig::default());
        assert!(!outcome.stats.incumbents.is_empty());
        for pair in outcome.stats.incumbents.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert!(outcome.stats.nodes_explored > 1);
    }

    #[test]
    fn exhausted_budget_reports_infeasible() {
        let config = SolverConfig {
            node_budget: 1,
            ..SolverConfig::default()
        };
        let outcome = branch_and_bound(&classic_model(), &config);
        assert_eq!(outcome.solution.status, Status::Infeasible);
        assert_eq!(outcome.stats.nodes_explored, 1);
    }

    #[test]
    fn integral_relaxation_needs_no_branching() {
        let mut model = Model::new(2);
        model.set_column(0, 1.0, 1.0, 5.0, true);
        model.set_column(1, 1.0, 2.0, 5.0, true);
        model.add_row(&[(0, 1.0), (1, -1.0)], -1.0);

        let outcome = branch_and_bound(&model, &SolverConfig::default());
        assert_eq!(outcome.stats.nodes_explored, 1);
        assert_eq!(outcome.solution.x, vec![1.0, 2.0]);
    }

    #[test]
    fn integer_infeasible_model_has_no_incumbent() {
        // 2a = 3 has no integral solution.
        let mut model = Model::new(1);
        model.set_column(0, 0.0, 0.0, 5.0, true);
        model.add_row(&[(0, 2.0)], 3.0);

        let outcome = branch_and_bound(&model, &SolverConfig::default());
        assert_eq!(outcome.solution.status, Status::Infeasible);
        assert!(outcome.stats.incumbents.is_empty());
    }

    #[test]
    fn overrides_nearest_to_the_node_win() {
        let model = classic_model();
        let node = BranchNode::default()
            .child(0, 0.0, 3.0)
            .child(1, 2.0, 10.0)
            .child(0, 1.0, 2.0);
        let (lower, upper) = node.bounds(&model);
        assert_eq!((lower[0], upper[0]), (1.0, 2.0));
        assert_eq!((lower[1], upper[1]), (2.0, 10.0));
        assert_eq!((lower[2], upper[2]), (0.0, 100.0));
    }
}
