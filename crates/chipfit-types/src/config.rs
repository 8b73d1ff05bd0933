// ─────────────────────────────────────────────────────────────────────
// Chipfit — Identification Configuration
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

use crate::error::{IdentError, IdentResult};
use crate::params::{Bounds, ParameterSpace, ParameterVector, N_PARAMS, PARAMETER_SYMBOLS};
use crate::response::ResponseSet;

/// How raw derivatives are rescaled before they reach the solver.
///
/// A property of the study: one mode applies to every row of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// `S_ij = ∂F_j/∂x_i · x_i` (response units kept).
    #[default]
    ParameterScaled,
    /// `S_ij = ∂F_j/∂x_i · x_i / F_j` (dimensionless, needs F_j ≠ 0).
    FullyDimensionless,
}

/// Runtime configuration for one calibration run.
///
/// Every constant the identification needs is passed in here at
/// construction time; nothing is read from module-level state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentConfig {
    /// Starting vector (initial guess or a prior calibration result).
    pub initial_vector: ParameterVector,

    /// Physical limits. Initial vector must lie strictly inside.
    pub bounds: Bounds,

    /// Experimental measurements; fixed for the run.
    /// Order here is the row order of the Jacobian.
    pub reference_responses: ResponseSet,

    /// Forward-difference step as a fraction of the parameter value.
    /// Default: 0.2 (20 % perturbation).
    pub relative_perturbation: f64,

    /// Optional per-parameter override of `relative_perturbation`.
    pub parameter_perturbations: Option<[f64; N_PARAMS]>,

    /// Tikhonov weight λ in `P = JᵀJ + λI`. Must be > 0.
    /// Default: 1e-2.
    pub regularization_weight: f64,

    pub normalization_mode: NormalizationMode,

    /// Converged when every |relative error| is below this fraction.
    /// Default: 0.01.
    pub convergence_tolerance: f64,

    /// Converged when ‖δ‖₂ of the normalized step falls below this.
    /// Default: 1e-4.
    pub min_step_norm: f64,

    /// Maximum number of parameter updates. Default: 10.
    pub max_iterations: usize,

    /// Issue the per-parameter perturbation evaluations concurrently.
    /// Only enable for oracles that tolerate concurrent invocation.
    pub parallel_perturbations: bool,
}

impl Default for IdentConfig {
    fn default() -> Self {
        Self {
            initial_vector: ParameterVector::default(),
            bounds: Bounds::default(),
            reference_responses: ResponseSet::cutting_reference(),
            relative_perturbation: 0.2,
            parameter_perturbations: None,
            regularization_weight: 1e-2,
            normalization_mode: NormalizationMode::ParameterScaled,
            convergence_tolerance: 0.01,
            min_step_norm: 1e-4,
            max_iterations: 10,
            parallel_perturbations: false,
        }
    }
}

impl IdentConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> IdentResult<()> {
        check_perturbation("relative_perturbation", self.relative_perturbation)?;
        if let Some(steps) = &self.parameter_perturbations {
            for (sym, &step) in PARAMETER_SYMBOLS.iter().zip(steps.iter()) {
                check_perturbation(&format!("parameter_perturbations[{sym}]"), step)?;
            }
        }
        if !(self.regularization_weight > 0.0 && self.regularization_weight.is_finite()) {
            return Err(IdentError::Config(format!(
                "regularization_weight must be > 0, got {}",
                self.regularization_weight
            )));
        }
        if !(self.convergence_tolerance > 0.0) {
            return Err(IdentError::Config(format!(
                "convergence_tolerance must be > 0, got {}",
                self.convergence_tolerance
            )));
        }
        if !(self.min_step_norm >= 0.0) {
            return Err(IdentError::Config(format!(
                "min_step_norm must be >= 0, got {}",
                self.min_step_norm
            )));
        }
        if self.max_iterations < 1 {
            return Err(IdentError::Config(
                "max_iterations must be >= 1".to_string(),
            ));
        }
        if self.reference_responses.is_empty() {
            return Err(IdentError::Config(
                "reference_responses must not be empty".to_string(),
            ));
        }
        for (name, value) in self.reference_responses.iter() {
            if !value.is_finite() || value == 0.0 {
                return Err(IdentError::Config(format!(
                    "reference response '{name}' must be finite and non-zero, got {value}"
                )));
            }
        }
        self.bounds.validate()?;
        ParameterSpace::new(self.initial_vector, self.bounds)?;
        Ok(())
    }

    /// Effective relative step for parameter `i`.
    pub fn perturbation_for(&self, i: usize) -> f64 {
        match &self.parameter_perturbations {
            Some(steps) => steps[i],
            None => self.relative_perturbation,
        }
    }

    /// All six effective relative steps.
    pub fn perturbations(&self) -> [f64; N_PARAMS] {
        std::array::from_fn(|i| self.perturbation_for(i))
    }

    /// Reference response names in Jacobian row order.
    pub fn response_order(&self) -> Vec<String> {
        self.reference_responses
            .names()
            .map(str::to_string)
            .collect()
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> IdentResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| IdentError::Config(format!("JSON parse error: {e}")))
    }

    pub fn to_json(&self) -> IdentResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| IdentError::Config(format!("JSON encode error: {e}")))
    }
}

fn check_perturbation(name: &str, step: f64) -> IdentResult<()> {
    if !(step > 0.0 && step.is_finite()) {
        return Err(IdentError::Config(format!(
            "{name} must be finite and > 0, got {step}"
        )));
    }
    Ok(())
}
