// ─────────────────────────────────────────────────────────────────────
// Chipfit — Bounded Gauss-Newton Step
// ─────────────────────────────────────────────────────────────────────
//! Regularized, bound-constrained Gauss-Newton step in normalized
//! (relative) parameter space `δ_i = Δx_i / s_i`, with `s_i = |x_i|`
//! (1 for a zero parameter):
//!
//!   P  = JᵀJ + λI
//!   q  = −Jᵀr
//!   lb = (lower − x) / s,  ub = (upper − x) / s
//!   δ  = argmin ½ δᵀPδ + qᵀδ  s.t.  lb ≤ δ ≤ ub
//!
//! If the QP backend fails, `Pδ = −q` is solved directly and clipped
//! into `[lb, ub]`; the step is then flagged as degraded.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chipfit_sensitivity::Jacobian;
use chipfit_types::{Bounds, IdentError, IdentResult, ParameterVector, Residual, N_PARAMS};

use crate::linalg::{clip, is_finite, norm2, normal_equations, objective, solve_spd, Vector6};
use crate::qp::{ActiveSetQp, BoxQpSolver, QpFailure};

/// How the step was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SolveMode {
    Constrained,
    /// QP failed; unconstrained solution clipped into the box.
    ClippedFallback { reason: QpFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Normalized step δ.
    pub delta: Vector6,
    /// Physical step `Δx = δ · s`.
    pub delta_physical: Vector6,
    /// Updated vector, clamped into the physical bounds.
    pub next: ParameterVector,
    pub lower: Vector6,
    pub upper: Vector6,
    /// Quadratic model value `½ δᵀPδ + qᵀδ` at δ (≤ 0 for a useful step).
    pub model_decrease: f64,
    pub mode: SolveMode,
}

impl StepResult {
    pub fn step_norm(&self) -> f64 {
        norm2(&self.delta)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, SolveMode::ClippedFallback { .. })
    }
}

/// Bounds on δ implied by the physical bounds at `current`.
pub fn step_bounds(current: &ParameterVector, bounds: &Bounds) -> (Vector6, Vector6) {
    let mut lb = [0.0; N_PARAMS];
    let mut ub = [0.0; N_PARAMS];
    for i in 0..N_PARAMS {
        let s = current.scale(i);
        lb[i] = (bounds.lower[i] - current[i]) / s;
        ub[i] = (bounds.upper[i] - current[i]) / s;
    }
    (lb, ub)
}

pub struct BoundedStepSolver {
    qp: Arc<dyn BoxQpSolver>,
}

impl Default for BoundedStepSolver {
    fn default() -> Self {
        Self::new(Arc::new(ActiveSetQp::default()))
    }
}

impl BoundedStepSolver {
    pub fn new(qp: Arc<dyn BoxQpSolver>) -> Self {
        Self { qp }
    }

    /// Compute the bounded update from `current`.
    ///
    /// Residual entries are taken in the Jacobian's row order.
    pub fn solve(
        &self,
        jacobian: &Jacobian,
        residual: &Residual,
        current: &ParameterVector,
        bounds: &Bounds,
        regularization: f64,
    ) -> IdentResult<StepResult> {
        if !(regularization > 0.0 && regularization.is_finite()) {
            return Err(IdentError::Config(format!(
                "regularization weight must be > 0, got {regularization}"
            )));
        }
        if jacobian.n_rows() == 0 {
            return Err(IdentError::NoUsableRows);
        }
        let r: Vec<f64> = jacobian
            .responses
            .iter()
            .map(|name| {
                residual
                    .get(name)
                    .ok_or_else(|| IdentError::MissingResponse {
                        response: name.clone(),
                    })
            })
            .collect::<IdentResult<_>>()?;

        let (p, q) = normal_equations(&jacobian.rows, &r, regularization);
        if !p.iter().all(|row| is_finite(row)) || !is_finite(&q) {
            return Err(IdentError::Numerical(
                "non-finite normal equations".to_string(),
            ));
        }
        let (lb, ub) = step_bounds(current, bounds);

        let (delta, mode) = match self.qp.solve(&p, &q, &lb, &ub) {
            Ok(d) if is_finite(&d) => (clip(&d, &lb, &ub), SolveMode::Constrained),
            Ok(_) => self.fallback(
                &p,
                &q,
                &lb,
                &ub,
                QpFailure::NumericalBreakdown("non-finite QP solution".to_string()),
            )?,
            Err(reason) => self.fallback(&p, &q, &lb, &ub, reason)?,
        };

        let delta_physical: Vector6 = std::array::from_fn(|i| delta[i] * current.scale(i));
        let moved: [f64; N_PARAMS] = std::array::from_fn(|i| current[i] + delta_physical[i]);
        let next = bounds.clamp(&ParameterVector::new(moved));

        Ok(StepResult {
            delta,
            delta_physical,
            next,
            lower: lb,
            upper: ub,
            model_decrease: objective(&p, &q, &delta),
            mode,
        })
    }

    fn fallback(
        &self,
        p: &[[f64; N_PARAMS]; N_PARAMS],
        q: &Vector6,
        lb: &Vector6,
        ub: &Vector6,
        reason: QpFailure,
    ) -> IdentResult<(Vector6, SolveMode)> {
        log::warn!("constrained solve failed ({reason}); clipping unconstrained step");
        let neg_q: Vector6 = std::array::from_fn(|i| -q[i]);
        let free = solve_spd(p, &neg_q).ok_or_else(|| {
            IdentError::Numerical("normal equations not positive definite".to_string())
        })?;
        Ok((clip(&free, lb, ub), SolveMode::ClippedFallback { reason }))
    }
}
