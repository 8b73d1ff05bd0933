// ─────────────────────────────────────────────────────────────────────
// Chipfit — Sensitivity Normalizer
// ─────────────────────────────────────────────────────────────────────
//! Rescales raw derivatives so columns of very different physical
//! magnitude become comparable:
//!
//!   parameter-scaled:     S_ij = ∂F_j/∂x_i · |x_i|
//!   fully dimensionless:  S_ij = ∂F_j/∂x_i · |x_i| / |F_j|
//!
//! Magnitudes are used so the sign of the raw derivative survives.
//! A zero parameter uses scale 1, consistent with the absolute
//! perturbation fallback of the estimator.

use serde::{Deserialize, Serialize};

use chipfit_types::{
    IdentError, IdentResult, NormalizationMode, Parameter, ParameterVector, ResponseSet, N_PARAMS,
};

use crate::estimator::{SensitivityMatrix, SensitivityRow};

/// One fully defined, normalized Jacobian row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub response: String,
    pub values: [f64; N_PARAMS],
    /// Divisor applied to the response (1.0 in parameter-scaled mode).
    /// The matching residual entry must be divided by the same value.
    pub response_scale: f64,
    pub fingerprint: u64,
}

/// Outcome of normalizing one matrix: usable rows plus rejected ones.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSensitivities {
    pub rows: Vec<NormalizedRow>,
    /// Rows excluded from this iteration, with the reason.
    pub rejected: Vec<(String, IdentError)>,
}

impl NormalizedSensitivities {
    pub fn response_names(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.response.clone()).collect()
    }

    /// Append the rows and rejections of another batch.
    pub fn absorb(&mut self, other: NormalizedSensitivities) {
        self.rows.extend(other.rows);
        self.rejected.extend(other.rejected);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    mode: NormalizationMode,
}

impl Normalizer {
    pub fn new(mode: NormalizationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    /// Normalize a single row.
    ///
    /// `response_scale` overrides the base response value used as the
    /// divisor in fully-dimensionless mode.
    pub fn normalize_row(
        &self,
        row: &SensitivityRow,
        params: &ParameterVector,
        response_scale: Option<f64>,
    ) -> IdentResult<NormalizedRow> {
        if row.fingerprint != params.fingerprint() {
            return Err(IdentError::StaleEvaluation {
                response: row.response.clone(),
                expected: params.fingerprint(),
                found: row.fingerprint,
            });
        }

        let scale = match self.mode {
            NormalizationMode::ParameterScaled => 1.0,
            NormalizationMode::FullyDimensionless => {
                let f = response_scale.unwrap_or(row.base_value);
                if f == 0.0 || !f.is_finite() {
                    return Err(IdentError::DegenerateNormalization {
                        response: row.response.clone(),
                    });
                }
                f.abs()
            }
        };

        let mut values = [0.0; N_PARAMS];
        for p in Parameter::ALL {
            let i = p.index();
            let d = row.cells[i].ok_or_else(|| IdentError::UndefinedSensitivity {
                response: row.response.clone(),
                parameter: p.symbol(),
            })?;
            values[i] = d * params.scale(i) / scale;
        }

        Ok(NormalizedRow {
            response: row.response.clone(),
            values,
            response_scale: scale,
            fingerprint: row.fingerprint,
        })
    }

    /// Normalize every row of `matrix` at `params`.
    ///
    /// Undefined cells and degenerate responses reject their row (with a
    /// warning) instead of failing the batch. A stale parameter vector
    /// fails the whole batch.
    pub fn normalize(
        &self,
        matrix: &SensitivityMatrix,
        params: &ParameterVector,
        response_scale: Option<&ResponseSet>,
    ) -> IdentResult<NormalizedSensitivities> {
        if matrix.fingerprint != params.fingerprint() {
            return Err(IdentError::StaleEvaluation {
                response: matrix
                    .rows
                    .first()
                    .map(|r| r.response.clone())
                    .unwrap_or_default(),
                expected: params.fingerprint(),
                found: matrix.fingerprint,
            });
        }

        let mut out = NormalizedSensitivities::default();
        for row in &matrix.rows {
            let scale = response_scale.and_then(|s| s.get(&row.response));
            match self.normalize_row(row, params, scale) {
                Ok(n) => out.rows.push(n),
                Err(e @ IdentError::UndefinedSensitivity { .. })
                | Err(e @ IdentError::DegenerateNormalization { .. }) => {
                    log::warn!("dropping row '{}' this iteration: {e}", row.response);
                    out.rejected.push((row.response.clone(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}
