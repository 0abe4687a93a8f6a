//! Two-phase revised primal simplex with an explicit basis inverse.

use tracing::warn;

use super::{Model, Solution, Status, row_dot};
use crate::config::SolverConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarState {
    Basic(usize),
    AtLower,
    AtUpper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseOutcome {
    Optimal,
    Unbounded,
    IterationLimit,
}

/// Step chosen by the ratio test.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// The entering column moves to its opposite bound; the basis is unchanged.
    Flip { length: f64 },
    /// The basic column in `row` leaves at the given bound.
    Pivot { row: usize, length: f64, to_upper: bool },
}

/// Pivots between full recomputations of the simplex multipliers.
const DUAL_REFRESH: usize = 64;

/// Working state over the `cols` structural columns followed by one
/// artificial column per row.
struct Simplex<'a> {
    model: &'a Model,
    rows: usize,
    cols: usize,
    /// Nonzeros of every structural column.
    columns: Vec<Vec<(usize, f64)>>,
    /// Artificial `i` has coefficient `sign[i]` in row `i`.
    sign: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    value: Vec<f64>,
    state: Vec<VarState>,
    head: Vec<usize>,
    binv: Vec<Vec<f64>>,
    eps: f64,
}

pub(super) fn solve_bounded(
    model: &Model,
    lower: &[f64],
    upper: &[f64],
    config: &SolverConfig,
) -> Solution {
    let mut simplex = Simplex::new(model, lower, upper, config.epsilon);
    let total = simplex.cols + simplex.rows;

    let phase_one: Vec<f64> = (0..total)
        .map(|j| if j < simplex.cols { 0.0 } else { 1.0 })
        .collect();
    match simplex.run(&phase_one, config) {
        PhaseOutcome::Optimal => {}
        PhaseOutcome::Unbounded => return Solution::failed(Status::Infeasible),
        PhaseOutcome::IterationLimit => {
            warn!(
                rows = simplex.rows,
                cols = simplex.cols,
                "simplex phase 1 hit the iteration cap; reporting infeasible"
            );
            return Solution::failed(Status::Infeasible);
        }
    }
    simplex.refresh();
    let infeasibility: f64 = simplex.value[simplex.cols..].iter().sum();
    if infeasibility > config.epsilon {
        return Solution::failed(Status::Infeasible);
    }

    // Artificials are pinned to zero for the rest of the solve.
    for j in simplex.cols..total {
        simplex.upper[j] = 0.0;
        if !matches!(simplex.state[j], VarState::Basic(_)) {
            simplex.state[j] = VarState::AtLower;
            simplex.value[j] = 0.0;
        }
    }

    let phase_two: Vec<f64> = (0..total)
        .map(|j| if j < simplex.cols { model.c[j] } else { 0.0 })
        .collect();
    match simplex.run(&phase_two, config) {
        PhaseOutcome::Optimal => {}
        PhaseOutcome::Unbounded => return Solution::failed(Status::Unbounded),
        PhaseOutcome::IterationLimit => {
            warn!(
                rows = simplex.rows,
                cols = simplex.cols,
                "simplex phase 2 hit the iteration cap; reporting infeasible"
            );
            return Solution::failed(Status::Infeasible);
        }
    }
    simplex.refresh();

    let x: Vec<f64> = (0..simplex.cols)
        .map(|j| snap(simplex.value[j], simplex.lower[j], simplex.upper[j], simplex.eps))
        .collect();
    let objective = model.objective(&x);
    Solution {
        status: Status::Optimal,
        x,
        objective,
    }
}

/// Pulls values that sit within tolerance of a bound exactly onto it.
fn snap(value: f64, lower: f64, upper: f64, eps: f64) -> f64 {
    if (value - lower).abs() <= eps {
        lower
    } else if (value - upper).abs() <= eps {
        upper
    } else {
        value
    }
}

impl<'a> Simplex<'a> {
    /// Starts every structural column at its smaller-magnitude bound. A row
    /// whose residual can be absorbed by a column occurring in no other row
    /// starts with that column basic; every other row starts on its artificial.
    fn new(model: &'a Model, lower: &[f64], upper: &[f64], eps: f64) -> Self {
        let rows = model.rows;
        let cols = model.cols;
        let total = rows + cols;
        let columns = model.columns();

        let mut value = vec![0.0; total];
        let mut state = vec![VarState::AtLower; total];
        let mut lo = vec![0.0; total];
        let mut up = vec![f64::INFINITY; total];

        for j in 0..cols {
            lo[j] = lower[j];
            up[j] = upper[j];
            if up[j].is_finite() && up[j].abs() < lo[j].abs() {
                value[j] = up[j];
                state[j] = VarState::AtUpper;
            } else {
                value[j] = lo[j];
            }
        }

        let mut sign = vec![1.0; rows];
        let mut head = Vec::with_capacity(rows);
        let mut binv = vec![vec![0.0; rows]; rows];
        for i in 0..rows {
            let residual = model.b[i] - row_dot(&model.a[i], &value[..cols]);
            let singleton = model.a[i].iter().find_map(|&(col, a)| {
                if columns[col].len() != 1 || a.abs() <= eps {
                    return None;
                }
                let target = value[col] + residual / a;
                (target >= lo[col] - eps && target <= up[col] + eps).then_some((col, a, target))
            });
            if let Some((col, a, target)) = singleton {
                value[col] = target.max(lo[col]).min(up[col]);
                state[col] = VarState::Basic(i);
                head.push(col);
                binv[i][i] = 1.0 / a;
                continue;
            }
            if residual < 0.0 {
                sign[i] = -1.0;
            }
            let art = cols + i;
            value[art] = residual.abs();
            state[art] = VarState::Basic(i);
            head.push(art);
            binv[i][i] = sign[i];
        }

        Self {
            model,
            rows,
            cols,
            columns,
            sign,
            lower: lo,
            upper: up,
            value,
            state,
            head,
            binv,
            eps,
        }
    }

    /// `B⁻¹·A_col`, combining only the `B⁻¹` columns the nonzeros select.
    fn ftran(&self, col: usize) -> Vec<f64> {
        if col >= self.cols {
            let k = col - self.cols;
            return self.binv.iter().map(|row| row[k] * self.sign[k]).collect();
        }
        let entries = &self.columns[col];
        self.binv
            .iter()
            .map(|row| entries.iter().map(|&(i, a)| row[i] * a).sum())
            .collect()
    }

    /// Simplex multipliers `c_B·B⁻¹`.
    fn duals(&self, cost: &[f64]) -> Vec<f64> {
        let mut duals = vec![0.0; self.rows];
        for (row, &basic) in self.head.iter().enumerate() {
            let weight = cost[basic];
            if weight == 0.0 {
                continue;
            }
            for (y, b) in duals.iter_mut().zip(&self.binv[row]) {
                *y += weight * b;
            }
        }
        duals
    }

    fn reduced_cost(&self, cost: &[f64], duals: &[f64], col: usize) -> f64 {
        let priced: f64 = if col < self.cols {
            self.columns[col].iter().map(|&(i, a)| duals[i] * a).sum()
        } else {
            let k = col - self.cols;
            duals[k] * self.sign[k]
        };
        cost[col] - priced
    }

    /// Picks the nonbasic column with the most negative signed reduced cost,
    /// or the lowest-indexed improving column under Bland's rule. Returns the
    /// column with its reduced cost.
    fn entering(&self, cost: &[f64], duals: &[f64], bland: bool) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for col in 0..self.cols + self.rows {
            let direction = match self.state[col] {
                VarState::Basic(_) => continue,
                VarState::AtLower => 1.0,
                VarState::AtUpper => -1.0,
            };
            if self.upper[col] - self.lower[col] <= self.eps {
                continue;
            }
            let reduced = self.reduced_cost(cost, duals, col);
            let signed = direction * reduced;
            if signed >= -self.eps {
                continue;
            }
            if bland {
                return Some((col, reduced));
            }
            if best.map_or(true, |(_, current, _)| signed < current) {
                best = Some((col, signed, reduced));
            }
        }
        best.map(|(col, _, reduced)| (col, reduced))
    }

    fn ratio_test(&self, col: usize, direction: f64, w: &[f64], bland: bool) -> Option<Step> {
        let mut best: Option<(usize, f64, bool)> = None;
        for row in 0..self.rows {
            let delta = direction * w[row];
            let basic = self.head[row];
            let (length, to_upper) = if delta > self.eps {
                ((self.value[basic] - self.lower[basic]) / delta, false)
            } else if delta < -self.eps && self.upper[basic].is_finite() {
                ((self.upper[basic] - self.value[basic]) / -delta, true)
            } else {
                continue;
            };
            let length = length.max(0.0);
            let better = match best {
                None => true,
                Some((best_row, best_len, _)) => {
                    length < best_len - self.eps
                        || (bland
                            && (length - best_len).abs() <= self.eps
                            && basic < self.head[best_row])
                }
            };
            if better {
                best = Some((row, length, to_upper));
            }
        }

        let span = self.upper[col] - self.lower[col];
        match best {
            Some((_, length, _)) if span.is_finite() && span <= length => {
                Some(Step::Flip { length: span })
            }
            Some((row, length, to_upper)) => Some(Step::Pivot {
                row,
                length,
                to_upper,
            }),
            None if span.is_finite() => Some(Step::Flip { length: span }),
            None => None,
        }
    }

    /// Bland's rule holds only while a run of degenerate steps is at least
    /// `degenerate_switch` long. Duals are updated per pivot and recomputed
    /// every [`DUAL_REFRESH`] pivots and before optimality is declared.
    fn run(&mut self, cost: &[f64], config: &SolverConfig) -> PhaseOutcome {
        let mut duals = self.duals(cost);
        let mut stale = 0usize;
        let mut degenerate = 0usize;
        for _ in 0..config.max_iterations {
            let bland = degenerate >= config.degenerate_switch;
            let Some((col, reduced)) = self.entering(cost, &duals, bland) else {
                if stale == 0 {
                    return PhaseOutcome::Optimal;
                }
                duals = self.duals(cost);
                stale = 0;
                continue;
            };
            let direction = if self.state[col] == VarState::AtLower {
                1.0
            } else {
                -1.0
            };
            let w = self.ftran(col);
            let Some(step) = self.ratio_test(col, direction, &w, bland) else {
                return PhaseOutcome::Unbounded;
            };

            let length = match step {
                Step::Flip { length } | Step::Pivot { length, .. } => length,
            };
            if length <= self.eps {
                degenerate += 1;
            } else {
                degenerate = 0;
            }

            if length != 0.0 {
                for (row, &wr) in w.iter().enumerate() {
                    if wr != 0.0 {
                        let basic = self.head[row];
                        self.value[basic] -= length * direction * wr;
                    }
                }
            }

            match step {
                Step::Flip { .. } => {
                    if direction > 0.0 {
                        self.value[col] = self.upper[col];
                        self.state[col] = VarState::AtUpper;
                    } else {
                        self.value[col] = self.lower[col];
                        self.state[col] = VarState::AtLower;
                    }
                }
                Step::Pivot { row, to_upper, .. } => {
                    self.value[col] += direction * length;
                    let leaving = self.head[row];
                    if to_upper {
                        self.value[leaving] = self.upper[leaving];
                        self.state[leaving] = VarState::AtUpper;
                    } else {
                        self.value[leaving] = self.lower[leaving];
                        self.state[leaving] = VarState::AtLower;
                    }
                    self.state[col] = VarState::Basic(row);
                    self.head[row] = col;
                    self.pivot(row, &w);

                    stale += 1;
                    if stale >= DUAL_REFRESH {
                        duals = self.duals(cost);
                        stale = 0;
                    } else {
                        // y' = y + d_q·(row `row` of the new B⁻¹)
                        for (y, b) in duals.iter_mut().zip(&self.binv[row]) {
                            *y += reduced * b;
                        }
                    }
                }
            }
        }
        PhaseOutcome::IterationLimit
    }

    /// Gauss-Jordan update of `B⁻¹` after column `w = B⁻¹·A_q` entered at `row`.
    /// Only the nonzeros of the pivot row are propagated.
    fn pivot(&mut self, row: usize, w: &[f64]) {
        let pivot = w[row];
        let mut pivot_row = Vec::new();
        for (k, entry) in self.binv[row].iter_mut().enumerate() {
            if *entry != 0.0 {
                *entry /= pivot;
                pivot_row.push((k, *entry));
            }
        }
        for (i, &factor) in w.iter().enumerate() {
            if i == row || factor == 0.0 {
                continue;
            }
            let target = &mut self.binv[i];
            for &(k, p) in &pivot_row {
                target[k] -= factor * p;
            }
        }
    }

    /// Recomputes basic values from the nonbasic ones to shed accumulated drift.
    fn refresh(&mut self) {
        let mut rhs = self.model.b.clone();
        for col in 0..self.cols + self.rows {
            let value = self.value[col];
            if matches!(self.state[col], VarState::Basic(_)) || value == 0.0 {
                continue;
            }
            if col < self.cols {
                for &(i, a) in &self.columns[col] {
                    rhs[i] -= a * value;
                }
            } else {
                let k = col - self.cols;
                rhs[k] -= self.sign[k] * value;
            }
        }
        for row in 0..self.rows {
            let basic = self.head[row];
            self.value[basic] = self.binv[row]
                .iter()
                .zip(&rhs)
                .map(|(b, r)| b * r)
                .sum();
        }
    }
}
