// ─────────────────────────────────────────────────────────────────────
// Chipfit — Box-Constrained Quadratic Program
// ─────────────────────────────────────────────────────────────────────
//! `min ½ δᵀPδ + qᵀδ  s.t.  lb ≤ δ ≤ ub` for a symmetric positive
//! definite `P`.
//!
//! `ActiveSetQp` is a primal active-set method: each iteration solves
//! the equality subproblem on the free variables (Cholesky), steps
//! toward it until a bound blocks, and releases a bound whose
//! multiplier has the wrong sign once no further progress is possible.
//! For six variables it terminates in a handful of iterations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use chipfit_types::N_PARAMS;

use crate::linalg::{clip, gradient, is_finite, solve_spd_subset, Matrix6, Vector6};

/// Why a constrained solve did not produce a step.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QpFailure {
    #[error("infeasible bounds: {0}")]
    Infeasible(String),

    #[error("numerical breakdown: {0}")]
    NumericalBreakdown(String),

    #[error("no convergence after {iterations} active-set iterations")]
    NotConverged { iterations: usize },
}

/// Pluggable bound-constrained QP backend.
pub trait BoxQpSolver: Send + Sync {
    fn solve(
        &self,
        p: &Matrix6,
        q: &Vector6,
        lb: &Vector6,
        ub: &Vector6,
    ) -> Result<Vector6, QpFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lower,
    Upper,
}

const MOVE_TOL: f64 = 1e-13;
const KKT_TOL: f64 = 1e-12;

/// Primal active-set solver.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSetQp {
    /// Default: 100.
    pub max_iterations: usize,
}

impl Default for ActiveSetQp {
    fn default() -> Self {
        Self {
            max_iterations: 100,
        }
    }
}

impl ActiveSetQp {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }
}

fn check_problem(p: &Matrix6, q: &Vector6, lb: &Vector6, ub: &Vector6) -> Result<(), QpFailure> {
    if !p.iter().all(|row| is_finite(row)) || !is_finite(q) {
        return Err(QpFailure::NumericalBreakdown(
            "non-finite entry in P or q".to_string(),
        ));
    }
    for i in 0..N_PARAMS {
        if lb[i].is_nan() || ub[i].is_nan() {
            return Err(QpFailure::Infeasible(format!("NaN bound on component {i}")));
        }
        if lb[i] > ub[i] {
            return Err(QpFailure::Infeasible(format!(
                "component {i}: lower {} > upper {}",
                lb[i], ub[i]
            )));
        }
    }
    Ok(())
}

impl BoxQpSolver for ActiveSetQp {
    fn solve(
        &self,
        p: &Matrix6,
        q: &Vector6,
        lb: &Vector6,
        ub: &Vector6,
    ) -> Result<Vector6, QpFailure> {
        check_problem(p, q, lb, ub)?;

        // Feasible start: the origin projected onto the box.
        let mut x = clip(&[0.0; N_PARAMS], lb, ub);
        let mut active: [Option<Side>; N_PARAMS] = std::array::from_fn(|i| {
            if x[i] <= lb[i] {
                Some(Side::Lower)
            } else if x[i] >= ub[i] {
                Some(Side::Upper)
            } else {
                None
            }
        });

        for iter in 0..self.max_iterations {
            let free: Vec<usize> = (0..N_PARAMS).filter(|&i| active[i].is_none()).collect();

            // Equality subproblem on the free set, bound variables frozen.
            let mut target = x;
            if !free.is_empty() {
                let rhs: Vector6 = std::array::from_fn(|i| {
                    let coupling: f64 = (0..N_PARAMS)
                        .filter(|&j| active[j].is_some())
                        .map(|j| p[i][j] * x[j])
                        .sum();
                    -(q[i] + coupling)
                });
                let sub = solve_spd_subset(p, &rhs, &free).ok_or_else(|| {
                    QpFailure::NumericalBreakdown(
                        "free-set matrix not positive definite".to_string(),
                    )
                })?;
                if !is_finite(&sub) {
                    return Err(QpFailure::NumericalBreakdown(
                        "non-finite subproblem solution".to_string(),
                    ));
                }
                for (k, &i) in free.iter().enumerate() {
                    target[i] = sub[k];
                }
            }

            let dir: Vector6 = std::array::from_fn(|i| target[i] - x[i]);
            let scale = 1.0 + x.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            let moving = dir.iter().any(|d| d.abs() > MOVE_TOL * scale);

            if !moving {
                // Stationary on the current face: check multiplier signs.
                let g = gradient(p, q, &x);
                let mut release: Option<(usize, f64)> = None;
                for i in 0..N_PARAMS {
                    if lb[i] == ub[i] {
                        continue;
                    }
                    let violation = match active[i] {
                        Some(Side::Lower) => -g[i],
                        Some(Side::Upper) => g[i],
                        None => continue,
                    };
                    if violation > KKT_TOL * (1.0 + g[i].abs())
                        && release.map_or(true, |(_, v)| violation > v)
                    {
                        release = Some((i, violation));
                    }
                }
                match release {
                    Some((i, _)) => {
                        log::debug!("active-set iter {iter}: releasing bound on {i}");
                        active[i] = None;
                        continue;
                    }
                    None => {
                        log::debug!("active-set converged in {iter} iterations");
                        return Ok(x);
                    }
                }
            }

            // Longest feasible fraction of the step.
            let mut alpha = 1.0_f64;
            let mut blocking: Option<(usize, Side)> = None;
            for &i in &free {
                let d = dir[i];
                let limit = if d < 0.0 {
                    Some(((lb[i] - x[i]) / d, Side::Lower))
                } else if d > 0.0 {
                    Some(((ub[i] - x[i]) / d, Side::Upper))
                } else {
                    None
                };
                if let Some((a, side)) = limit {
                    if a < alpha {
                        alpha = a.max(0.0);
                        blocking = Some((i, side));
                    }
                }
            }

            for &i in &free {
                x[i] += alpha * dir[i];
            }
            if let Some((i, side)) = blocking {
                x[i] = match side {
                    Side::Lower => lb[i],
                    Side::Upper => ub[i],
                };
                active[i] = Some(side);
                log::debug!("active-set iter {iter}: component {i} hits {side:?} bound");
            }
        }

        Err(QpFailure::NotConverged {
            iterations: self.max_iterations,
        })
    }
}
