// ─────────────────────────────────────────────────────────────────────
// Chipfit — Identification Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Sensitivity-based, bound-constrained Gauss-Newton identification of
//! the six Johnson-Cook parameters against measured cutting responses.
//!
//! ```text
//! oracle(x) → residual → forward differences → normalize → J
//!          ↖────────── x ← clamp(x + δ·s) ← box QP on JᵀJ + λI ←┘
//! ```
//!
//! # Invariants
//!
//! 1. **The vector never leaves its bounds**: every accepted update is
//!    clamped into the physical limits, and an initial vector outside
//!    them is rejected before any oracle call.
//! 2. **One vector per Jacobian**: all rows of an iteration come from
//!    perturbations of the same base vector, across all families.
//! 3. **No retries**: an oracle failure ends the run as FAILED with the
//!    last accepted vector; recoverable conditions become warnings on
//!    the iteration summary.
//! 4. **Abort is honoured between transitions only**: a perturbation
//!    batch is never interrupted half-way.

pub mod abort;
pub mod identification;
pub mod report;

pub use abort::AbortHandle;
pub use identification::{IdentificationLoop, LoopState};
pub use report::{CalibrationReport, IterationSummary, IterationWarning, TerminalState};
