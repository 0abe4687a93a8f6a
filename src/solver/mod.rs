//! Bounded-variable linear and mixed-integer programming.
//!
//! Models are always in equality form: minimize `c·x` subject to `A·x = b` and
//! `lower ≤ x ≤ upper`. Inequalities are expressed with explicit slack columns
//! by the caller. Continuous models go through the two-phase revised simplex in
//! [`simplex`]; models with integer columns are wrapped in the FIFO
//! branch-and-bound of [`branch`].

mod branch;
mod simplex;

pub use branch::{MilpOutcome, MilpStats, branch_and_bound};

use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::error::{LayoutError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Optimal,
    Infeasible,
    Unbounded,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Optimal => "optimal",
            Status::Infeasible => "infeasible",
            Status::Unbounded => "unbounded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub status: Status,
    /// Column values; empty unless the status is optimal.
    pub x: Vec<f64>,
    pub objective: f64,
}

impl Solution {
    pub fn failed(status: Status) -> Self {
        Self {
            status,
            x: Vec::new(),
            objective: 0.0,
        }
    }

    pub fn is_optimal(&self) -> bool {
        self.status == Status::Optimal
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub rows: usize,
    pub cols: usize,
    /// Sparse constraint rows: the nonzero `(column, coefficient)` pairs of
    /// each row, in column order.
    pub a: Vec<Vec<(usize, f64)>>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Columns that branch-and-bound must drive to integral values.
    pub integer: Vec<bool>,
}

impl Model {
    /// Creates a model with `cols` continuous columns in `[0, 0]`, zero cost and no rows.
    pub fn new(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            a: Vec::new(),
            b: Vec::new(),
            c: vec![0.0; cols],
            lower: vec![0.0; cols],
            upper: vec![0.0; cols],
            integer: vec![false; cols],
        }
    }

    pub fn set_column(&mut self, col: usize, cost: f64, lower: f64, upper: f64, integer: bool) {
        self.c[col] = cost;
        self.lower[col] = lower;
        self.upper[col] = upper;
        self.integer[col] = integer;
    }

    /// Appends the row `Σ coeff·x[col] = rhs`. Repeated columns accumulate.
    pub fn add_row(&mut self, coeffs: &[(usize, f64)], rhs: f64) -> usize {
        let mut row: Vec<(usize, f64)> = coeffs.to_vec();
        row.sort_by_key(|&(col, _)| col);
        row.dedup_by(|next, kept| {
            if next.0 == kept.0 {
                kept.1 += next.1;
                true
            } else {
                false
            }
        });
        row.retain(|&(_, value)| value != 0.0);
        self.a.push(row);
        self.b.push(rhs);
        self.rows += 1;
        self.rows - 1
    }

    pub fn has_integer_columns(&self) -> bool {
        self.integer.iter().any(|&flag| flag)
    }

    pub fn objective(&self, x: &[f64]) -> f64 {
        self.c.iter().zip(x).map(|(c, x)| c * x).sum()
    }

    /// Largest absolute row violation `|A·x - b|`.
    pub fn residual(&self, x: &[f64]) -> f64 {
        self.a
            .iter()
            .zip(&self.b)
            .map(|(row, rhs)| (row_dot(row, x) - rhs).abs())
            .fold(0.0, f64::max)
    }

    /// Column-major view of `a`: the `(row, coefficient)` pairs of every column.
    pub fn columns(&self) -> Vec<Vec<(usize, f64)>> {
        let mut columns = vec![Vec::new(); self.cols];
        for (row, entries) in self.a.iter().enumerate() {
            for &(col, value) in entries {
                columns[col].push((row, value));
            }
        }
        columns
    }

    pub fn validate(&self) -> Result<()> {
        let malformed = |msg: String| Err(LayoutError::MalformedModel(msg));
        if self.a.len() != self.rows || self.b.len() != self.rows {
            return malformed(format!(
                "expected {} rows, matrix has {} and rhs has {}",
                self.rows,
                self.a.len(),
                self.b.len()
            ));
        }
        if self.c.len() != self.cols
            || self.lower.len() != self.cols
            || self.upper.len() != self.cols
            || self.integer.len() != self.cols
        {
            return malformed(format!("column vectors do not all have {} entries", self.cols));
        }
        for (idx, row) in self.a.iter().enumerate() {
            if let Some(&(col, _)) = row.iter().find(|&&(col, _)| col >= self.cols) {
                return malformed(format!("row {idx} references column {col}"));
            }
            if row.iter().any(|(_, v)| !v.is_finite()) || !self.b[idx].is_finite() {
                return malformed(format!("row {idx} contains a non-finite value"));
            }
        }
        for col in 0..self.cols {
            let (lo, up) = (self.lower[col], self.upper[col]);
            if !lo.is_finite() || up.is_nan() || !self.c[col].is_finite() {
                return malformed(format!("column {col} has a non-finite cost or lower bound"));
            }
            if lo > up {
                return malformed(format!("column {col} has lower bound {lo} above upper bound {up}"));
            }
        }
        Ok(())
    }
}

pub(crate) fn row_dot(row: &[(usize, f64)], x: &[f64]) -> f64 {
    row.iter().map(|&(col, a)| a * x[col]).sum()
}

/// A model together with its solution once one has been computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lp {
    pub model: Model,
    pub solution: Option<Solution>,
}

impl Lp {
    pub fn unsolved(model: Model) -> Self {
        Self {
            model,
            solution: None,
        }
    }
}

/// Solves the continuous relaxation, ignoring integrality flags.
pub fn solve_lp(model: &Model, config: &SolverConfig) -> Result<Solution> {
    model.validate()?;
    Ok(simplex::solve_bounded(model, &model.lower, &model.upper, config))
}

/// Solves the model, branching when it has integer columns.
pub fn solve(model: &Model, config: &SolverConfig) -> Result<Solution> {
    model.validate()?;
    if model.has_integer_columns() {
        Ok(branch_and_bound(model, config).solution)
    } else {
        Ok(simplex::solve_bounded(model, &model.lower, &model.upper, config))
    }
}
