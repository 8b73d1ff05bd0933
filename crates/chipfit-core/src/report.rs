// ─────────────────────────────────────────────────────────────────────
// Chipfit — Calibration Report
// ─────────────────────────────────────────────────────────────────────
//! Terminal state, per-iteration trace and final vector of one run.
//! Serializable so a surrounding layer can persist it however it likes.

use serde::{Deserialize, Serialize};

use chipfit_solver::StepResult;
use chipfit_types::{max_abs, IdentError, IdentResult, ParameterVector, Residual, ResponseSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Converged,
    MaxIterations,
    Failed,
    Aborted,
}

/// Recoverable condition attached to one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationWarning {
    /// Row excluded from this iteration's Jacobian.
    DroppedRow { response: String, reason: String },
    /// QP failed; the clipped unconstrained step was used.
    DegradedSolve { reason: String },
}

/// One EVALUATING (+ SENSITIVITY + SOLVING) cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    /// Number of parameter updates applied before this evaluation.
    pub iteration: usize,
    pub vector: ParameterVector,
    pub responses: ResponseSet,
    pub residual: Residual,
    /// `(reference − simulated) / reference`, fraction.
    pub relative_errors: ResponseSet,
    pub sum_of_squares: f64,
    /// Responses whose rows entered the Jacobian.
    pub rows_used: Vec<String>,
    pub warnings: Vec<IterationWarning>,
    /// Step computed from this evaluation, if any.
    pub step: Option<StepResult>,
}

impl IterationSummary {
    pub fn max_relative_error(&self) -> f64 {
        max_abs(&self.relative_errors)
    }

    /// Relative errors in percent, for display.
    pub fn percent_errors(&self) -> ResponseSet {
        ResponseSet::from_pairs(
            self.relative_errors
                .iter()
                .map(|(name, v)| (name.to_string(), 100.0 * v)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub state: TerminalState,
    /// Best evaluated vector for MAX_ITERS, otherwise the last accepted one.
    pub final_vector: ParameterVector,
    /// Last computed residual. For MAX_ITERS it belongs to `final_vector`;
    /// a run that stops after an update (step-size convergence, failure
    /// or abort after SOLVING) carries the previous vector's residual.
    pub final_residual: Option<Residual>,
    /// Parameter updates applied.
    pub iterations: usize,
    pub oracle_calls: usize,
    pub history: Vec<IterationSummary>,
    /// Cause of a FAILED run.
    pub failure: Option<String>,
    pub elapsed_ms: f64,
}

impl CalibrationReport {
    pub fn is_converged(&self) -> bool {
        self.state == TerminalState::Converged
    }

    pub fn last(&self) -> Option<&IterationSummary> {
        self.history.last()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &IterationWarning> {
        self.history.iter().flat_map(|h| h.warnings.iter())
    }

    pub fn to_json(&self) -> IdentResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| IdentError::Config(format!("JSON encode error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> IterationSummary {
        IterationSummary {
            iteration: 0,
            vector: ParameterVector::default(),
            responses: ResponseSet::from_pairs([("h", 0.38)]),
            residual: Residual::from_set(ResponseSet::from_pairs([("h", 0.02)])),
            relative_errors: ResponseSet::from_pairs([("h", 0.05), ("f", -0.08)]),
            sum_of_squares: 4e-4,
            rows_used: vec!["h".into()],
            warnings: vec![IterationWarning::DegradedSolve {
                reason: "forced".into(),
            }],
            step: None,
        }
    }

    #[test]
    fn test_max_relative_error() {
        assert!((summary().max_relative_error() - 0.08).abs() < 1e-12);
        assert!((summary().percent_errors().get("f").unwrap() + 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_report_json() {
        let report = CalibrationReport {
            state: TerminalState::MaxIterations,
            final_vector: ParameterVector::default(),
            final_residual: None,
            iterations: 1,
            oracle_calls: 8,
            history: vec![summary()],
            failure: None,
            elapsed_ms: 1.5,
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"max_iterations\""));
        assert!(json.contains("\"degraded_solve\""));
        assert_eq!(report.warnings().count(), 1);
        let back: CalibrationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, TerminalState::MaxIterations);
    }
}
