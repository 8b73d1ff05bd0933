// ─────────────────────────────────────────────────────────────────────
// Chipfit — Bounded Step Solver
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Regularized, bound-constrained Gauss-Newton step for the six
//! Johnson-Cook parameters.
//!
//! # Invariants
//!
//! 1. `λ > 0`, so `P = JᵀJ + λI` is positive definite even when the
//!    Jacobian is rank-deficient or has fewer than six rows.
//! 2. The returned normalized step always lies in `[lb, ub]`, whether
//!    it came from the QP or from the clipped fallback.
//! 3. The updated vector is clamped into the physical bounds.

pub mod linalg;
pub mod qp;
pub mod step;

pub use qp::{ActiveSetQp, BoxQpSolver, QpFailure};
pub use step::{step_bounds, BoundedStepSolver, SolveMode, StepResult};
