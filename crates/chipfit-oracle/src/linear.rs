// ─────────────────────────────────────────────────────────────────────
// Chipfit — Linear Response Model
// ─────────────────────────────────────────────────────────────────────
//! Deterministic affine oracle `F_r(x) = b_r + Σ_i a_ri x_i`.
//!
//! Forward differences are exact on it, which makes it the reference
//! model for testing and benchmarking the engine without a solver run.

use std::sync::atomic::{AtomicUsize, Ordering};

use chipfit_types::{IdentResult, ParameterVector, ResponseSet, N_PARAMS};

use crate::oracle::ResponseOracle;

#[derive(Debug, Clone, PartialEq)]
pub struct LinearResponse {
    pub name: String,
    pub intercept: f64,
    pub coefficients: [f64; N_PARAMS],
}

impl LinearResponse {
    pub fn value(&self, x: &ParameterVector) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(x.values().iter())
                .map(|(a, xi)| a * xi)
                .sum::<f64>()
    }
}

/// Affine response surface over the six parameters.
#[derive(Debug, Default)]
pub struct LinearResponseModel {
    responses: Vec<LinearResponse>,
    calls: AtomicUsize,
}

impl LinearResponseModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(
        mut self,
        name: impl Into<String>,
        intercept: f64,
        coefficients: [f64; N_PARAMS],
    ) -> Self {
        self.responses.push(LinearResponse {
            name: name.into(),
            intercept,
            coefficients,
        });
        self
    }

    /// Add a response that takes `value` at `anchor`.
    pub fn with_anchored_response(
        self,
        name: impl Into<String>,
        anchor: &ParameterVector,
        value: f64,
        coefficients: [f64; N_PARAMS],
    ) -> Self {
        let slope: f64 = coefficients
            .iter()
            .zip(anchor.values().iter())
            .map(|(a, x)| a * x)
            .sum();
        self.with_response(name, value - slope, coefficients)
    }

    pub fn response(&self, name: &str) -> Option<&LinearResponse> {
        self.responses.iter().find(|r| r.name == name)
    }

    /// Number of `evaluate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResponseOracle for LinearResponseModel {
    fn evaluate(&self, params: &ParameterVector) -> IdentResult<ResponseSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseSet::from_pairs(
            self.responses
                .iter()
                .map(|r| (r.name.clone(), r.value(params))),
        ))
    }

    fn responses(&self) -> Vec<String> {
        self.responses.iter().map(|r| r.name.clone()).collect()
    }

    fn supports_concurrency(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_value() {
        let model = LinearResponseModel::new().with_response(
            "f",
            1.0,
            [1.0, 0.0, 0.0, 0.0, 0.0, 2.0],
        );
        let x = ParameterVector::new([3.0, 9.0, 9.0, 9.0, 9.0, 0.5]);
        let out = model.evaluate(&x).unwrap();
        assert!((out.get("f").unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_anchored_response_hits_value() {
        let anchor = ParameterVector::default();
        let model = LinearResponseModel::new().with_anchored_response(
            "cutting_force",
            &anchor,
            621.397,
            [100.0, 0.4, 0.2, -50.0, -80.0, 300.0],
        );
        let out = model.evaluate(&anchor).unwrap();
        assert!((out.get("cutting_force").unwrap() - 621.397).abs() < 1e-9);
        assert_eq!(model.responses(), vec!["cutting_force".to_string()]);
    }
}
