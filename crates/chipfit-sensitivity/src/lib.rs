// ─────────────────────────────────────────────────────────────────────
// Chipfit — Sensitivity Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Local sensitivities of every tracked response with respect to the
//! six Johnson-Cook parameters.
//!
//! Pipeline, one pass per response family:
//!   1. `SensitivityEstimator`: one-sided forward differences, one
//!      oracle call per parameter (columns are independent).
//!   2. `Normalizer`: raw ∂F/∂x → comparably scaled sensitivities.
//!   3. `JacobianAssembler`: rows from every family, stacked in the
//!      caller's response order, checked for a common base vector.
//!
//! # Invariants
//!
//! 1. Every row of one Jacobian was evaluated at the same parameter
//!    vector (fingerprint-checked); mixing is a `StaleEvaluation`.
//! 2. An unresolved difference quotient is `None`, never Inf/NaN, and
//!    normalization refuses rows containing one.
//! 3. Normalization never flips the sign of a raw derivative.

pub mod assembler;
pub mod estimator;
pub mod normalizer;

pub use assembler::{Jacobian, JacobianAssembler};
pub use estimator::{SensitivityEstimator, SensitivityMatrix, SensitivityRow};
pub use normalizer::{NormalizedRow, NormalizedSensitivities, Normalizer};
