// ─────────────────────────────────────────────────────────────────────
// Chipfit — Identification Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Parameter space, response sets, configuration and error hierarchy
//! shared by every stage of the Johnson-Cook inverse identification.

pub mod config;
pub mod error;
pub mod params;
pub mod response;

pub use config::{IdentConfig, NormalizationMode};
pub use error::{IdentError, IdentResult};
pub use params::{Bounds, Parameter, ParameterGroups, ParameterSpace, ParameterVector, N_PARAMS};
pub use response::{max_abs, Residual, ResponseSet};
