// ─────────────────────────────────────────────────────────────────────
// Chipfit — Finite-Difference Sensitivity Estimator
// ─────────────────────────────────────────────────────────────────────
//! One-sided forward differences around a base vector:
//!
//!   Δx_i = h_i · x_i      (h_i itself when x_i = 0)
//!   ∂F_r/∂x_i ≈ (F_r(x + Δx_i e_i) − F_r(x)) / Δx_i
//!
//! One oracle call per parameter; the base evaluation is supplied by
//! the caller so it is shared with the residual computation.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use chipfit_oracle::ResponseOracle;
use chipfit_types::{
    IdentError, IdentResult, Parameter, ParameterVector, ResponseSet, N_PARAMS,
};

/// Forward differences of one response against all six parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRow {
    pub response: String,
    /// Response value at the base vector.
    pub base_value: f64,
    /// `None` marks a cell that could not be resolved.
    pub cells: [Option<f64>; N_PARAMS],
    /// Fingerprint of the base vector the row was evaluated at.
    pub fingerprint: u64,
}

impl SensitivityRow {
    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(Option::is_some)
    }

    pub fn first_undefined(&self) -> Option<Parameter> {
        self.cells
            .iter()
            .position(Option::is_none)
            .and_then(Parameter::from_index)
    }
}

/// Rows for one evaluation batch (R responses × 6 parameters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityMatrix {
    pub base_vector: ParameterVector,
    pub fingerprint: u64,
    /// Signed perturbation Δx_i actually applied per parameter.
    pub steps: [f64; N_PARAMS],
    pub rows: Vec<SensitivityRow>,
}

impl SensitivityMatrix {
    pub fn row(&self, response: &str) -> Option<&SensitivityRow> {
        self.rows.iter().find(|r| r.response == response)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// `(response, parameter)` for every unresolved cell.
    pub fn undefined_cells(&self) -> Vec<(String, Parameter)> {
        let mut out = Vec::new();
        for row in &self.rows {
            for p in Parameter::ALL {
                if row.cells[p.index()].is_none() {
                    out.push((row.response.clone(), p));
                }
            }
        }
        out
    }
}

/// Perturbed copy of `base` and the signed step applied to component `i`.
pub fn perturb(base: &ParameterVector, i: usize, relative_step: f64) -> (ParameterVector, f64) {
    let x = base[i];
    let dx = if x != 0.0 { relative_step * x } else { relative_step };
    (base.with(i, x + dx), dx)
}

/// Forward-difference sensitivity estimator over one oracle (family).
pub struct SensitivityEstimator {
    oracle: Arc<dyn ResponseOracle>,
    parallel: bool,
}

impl SensitivityEstimator {
    pub fn new(oracle: Arc<dyn ResponseOracle>) -> Self {
        Self {
            oracle,
            parallel: false,
        }
    }

    /// Issue the six perturbation calls concurrently when the oracle
    /// declares support for it.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn oracle(&self) -> &Arc<dyn ResponseOracle> {
        &self.oracle
    }

    /// Estimate with the same relative step for every parameter.
    pub fn estimate(
        &self,
        base_vector: &ParameterVector,
        base_responses: &ResponseSet,
        relative_step: f64,
    ) -> IdentResult<SensitivityMatrix> {
        self.estimate_with_steps(base_vector, base_responses, &[relative_step; N_PARAMS])
    }

    /// Estimate with a per-parameter relative step.
    ///
    /// Oracle failures on a perturbed vector are fatal and propagate.
    /// A perturbed response that is missing, non-finite, or exactly zero
    /// yields an undefined cell instead.
    pub fn estimate_with_steps(
        &self,
        base_vector: &ParameterVector,
        base_responses: &ResponseSet,
        relative_steps: &[f64; N_PARAMS],
    ) -> IdentResult<SensitivityMatrix> {
        let tracked = self.oracle.responses();
        let base_values = base_responses.require(&tracked)?;

        for (i, &h) in relative_steps.iter().enumerate() {
            if !(h > 0.0 && h.is_finite()) {
                return Err(IdentError::Config(format!(
                    "relative step for {} must be finite and > 0, got {h}",
                    Parameter::ALL[i].symbol()
                )));
            }
        }

        let columns = self.evaluate_columns(base_vector, relative_steps)?;

        let fingerprint = base_vector.fingerprint();
        let mut steps = [0.0; N_PARAMS];
        let mut rows: Vec<SensitivityRow> = tracked
            .iter()
            .zip(base_values.iter())
            .map(|(name, &base_value)| SensitivityRow {
                response: name.clone(),
                base_value,
                cells: [None; N_PARAMS],
                fingerprint,
            })
            .collect();

        for (i, (perturbed, dx)) in columns.into_iter().enumerate() {
            steps[i] = dx;
            for row in rows.iter_mut() {
                row.cells[i] = match perturbed.get(&row.response) {
                    Some(v) if v.is_finite() && v != 0.0 => Some((v - row.base_value) / dx),
                    other => {
                        log::warn!(
                            "undefined sensitivity d({})/d({}): perturbed value {:?}",
                            row.response,
                            Parameter::ALL[i].symbol(),
                            other
                        );
                        None
                    }
                };
            }
        }

        Ok(SensitivityMatrix {
            base_vector: *base_vector,
            fingerprint,
            steps,
            rows,
        })
    }

    /// Perturbed response sets in parameter order, with their steps.
    fn evaluate_columns(
        &self,
        base_vector: &ParameterVector,
        relative_steps: &[f64; N_PARAMS],
    ) -> IdentResult<Vec<(ResponseSet, f64)>> {
        let column = |i: usize| -> IdentResult<(ResponseSet, f64)> {
            let (perturbed, dx) = perturb(base_vector, i, relative_steps[i]);
            log::debug!(
                "perturbing {} by {dx:+.6e}: {perturbed}",
                Parameter::ALL[i].symbol()
            );
            let set = self.oracle.evaluate(&perturbed)?;
            Ok((set, dx))
        };

        if self.parallel && self.oracle.supports_concurrency() {
            // Each column reads the shared base and writes its own slot.
            (0..N_PARAMS).into_par_iter().map(column).collect()
        } else {
            (0..N_PARAMS).map(column).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipfit_oracle::{ExternalOracle, LinearResponseModel};

    fn linear() -> Arc<LinearResponseModel> {
        Arc::new(
            LinearResponseModel::new()
                .with_response("f", 3.0, [2.0, -0.5, 0.01, 7.0, -3.0, 40.0])
                .with_response("g", -1.0, [0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
        )
    }

    fn estimate_linear(step: f64) -> SensitivityMatrix {
        let model = linear();
        let base = ParameterVector::default();
        let base_set = model.evaluate(&base).unwrap();
        SensitivityEstimator::new(model)
            .estimate(&base, &base_set, step)
            .unwrap()
    }

    #[test]
    fn test_linear_derivatives_exact() {
        for step in [0.2, 0.05, 1e-3] {
            let m = estimate_linear(step);
            let f = m.row("f").unwrap();
            let expected = [2.0, -0.5, 0.01, 7.0, -3.0, 40.0];
            for (cell, want) in f.cells.iter().zip(expected.iter()) {
                let got = cell.unwrap();
                assert!(
                    (got - want).abs() < 1e-6 * want.abs().max(1.0),
                    "step {step}: got {got}, want {want}"
                );
            }
        }
    }

    #[test]
    fn test_seven_oracle_calls_per_pass() {
        let model = linear();
        let base = ParameterVector::default();
        let base_set = model.evaluate(&base).unwrap();
        SensitivityEstimator::new(model.clone())
            .estimate(&base, &base_set, 0.2)
            .unwrap();
        assert_eq!(model.calls(), 1 + N_PARAMS);
    }

    #[test]
    fn test_steps_relative_to_value() {
        let m = estimate_linear(0.2);
        let base = ParameterVector::default();
        for i in 0..N_PARAMS {
            assert!((m.steps[i] - 0.2 * base[i]).abs() < 1e-12);
        }
        assert_eq!(m.fingerprint, base.fingerprint());
        assert!(m.rows.iter().all(|r| r.fingerprint == m.fingerprint));
    }

    #[test]
    fn test_zero_parameter_uses_absolute_step() {
        let base = ParameterVector::new([0.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let (p, dx) = perturb(&base, 0, 0.2);
        assert_eq!(dx, 0.2);
        assert_eq!(p[0], 0.2);

        let model = Arc::new(LinearResponseModel::new().with_response(
            "f",
            1.0,
            [5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ));
        let base_set = model.evaluate(&base).unwrap();
        let m = SensitivityEstimator::new(model)
            .estimate(&base, &base_set, 0.2)
            .unwrap();
        assert!((m.row("f").unwrap().cells[0].unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_perturbed_response_is_undefined() {
        // Response collapses to zero when B is perturbed.
        let oracle = Arc::new(ExternalOracle::new(["f"], |p| {
            let base_b = ParameterVector::default()[2];
            let v = if p[2] != base_b { 0.0 } else { 1.0 + p[0] };
            Ok(ResponseSet::from_pairs([("f", v)]))
        }));
        let base = ParameterVector::default();
        let base_set = oracle.evaluate(&base).unwrap();
        let m = SensitivityEstimator::new(oracle)
            .estimate(&base, &base_set, 0.2)
            .unwrap();
        let row = m.row("f").unwrap();
        assert!(row.cells[2].is_none());
        assert!(row.cells[0].is_some());
        assert!(!row.is_complete());
        assert_eq!(row.first_undefined(), Some(Parameter::HardeningB));
        assert_eq!(m.undefined_cells(), vec![("f".to_string(), Parameter::HardeningB)]);
    }

    #[test]
    fn test_missing_perturbed_response_is_undefined() {
        let oracle = Arc::new(ExternalOracle::new(["f", "g"], |p| {
            let mut set = ResponseSet::from_pairs([("f", 1.0 + p[1])]);
            if p[5] == ParameterVector::default()[5] {
                set.insert("g", 2.0);
            }
            Ok(set)
        }));
        let base = ParameterVector::default();
        let base_set = oracle.evaluate(&base).unwrap();
        let m = SensitivityEstimator::new(oracle)
            .estimate(&base, &base_set, 0.2)
            .unwrap();
        assert!(m.row("g").unwrap().cells[5].is_none());
        assert!(m.row("f").unwrap().is_complete());
    }

    #[test]
    fn test_perturbed_oracle_failure_propagates() {
        let oracle = Arc::new(ExternalOracle::new(["f"], |p| {
            if p[3] != ParameterVector::default()[3] {
                Err(IdentError::Oracle("solver crashed".into()))
            } else {
                Ok(ResponseSet::from_pairs([("f", 1.0)]))
            }
        }));
        let base = ParameterVector::default();
        let base_set = oracle.evaluate(&base).unwrap();
        let err = SensitivityEstimator::new(oracle)
            .estimate(&base, &base_set, 0.2)
            .unwrap_err();
        assert!(matches!(err, IdentError::Oracle(_)));
    }

    #[test]
    fn test_base_missing_response_is_error() {
        let model = linear();
        let base = ParameterVector::default();
        let base_set = ResponseSet::from_pairs([("f", 1.0)]);
        let err = SensitivityEstimator::new(model)
            .estimate(&base, &base_set, 0.2)
            .unwrap_err();
        assert_eq!(
            err,
            IdentError::IncompleteResponse {
                response: "g".into()
            }
        );
    }

    #[test]
    fn test_invalid_step_rejected() {
        let model = linear();
        let base = ParameterVector::default();
        let base_set = model.evaluate(&base).unwrap();
        assert!(SensitivityEstimator::new(model)
            .estimate(&base, &base_set, 0.0)
            .is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let model = linear();
        let base = ParameterVector::default();
        let base_set = model.evaluate(&base).unwrap();
        let seq = SensitivityEstimator::new(model.clone())
            .estimate(&base, &base_set, 0.2)
            .unwrap();
        let par = SensitivityEstimator::new(model)
            .parallel(true)
            .estimate(&base, &base_set, 0.2)
            .unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn test_per_parameter_steps() {
        let model = linear();
        let base = ParameterVector::default();
        let base_set = model.evaluate(&base).unwrap();
        let steps = [0.2, 0.1, 0.05, 0.2, 0.2, 0.5];
        let m = SensitivityEstimator::new(model)
            .estimate_with_steps(&base, &base_set, &steps)
            .unwrap();
        assert!((m.steps[5] - 0.5 * base[5]).abs() < 1e-15);
        assert!((m.row("f").unwrap().cells[5].unwrap() - 40.0).abs() < 1e-9);
    }
}
