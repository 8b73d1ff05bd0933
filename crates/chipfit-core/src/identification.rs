// ─────────────────────────────────────────────────────────────────────
// Chipfit — Identification Loop
// ─────────────────────────────────────────────────────────────────────
//! State machine driving the calibration:
//!
//!   INIT → EVALUATING → SENSITIVITY → SOLVING → EVALUATING → …
//!        ↘ CONVERGED | MAX_ITERS | FAILED | ABORTED
//!
//! Residual convergence is checked right after EVALUATING, step-size
//! convergence right after SOLVING. The abort flag is checked at every
//! transition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use chipfit_oracle::oracle::check_complete;
use chipfit_oracle::ResponseOracle;
use chipfit_sensitivity::{
    Jacobian, JacobianAssembler, NormalizedSensitivities, Normalizer, SensitivityEstimator,
};
use chipfit_solver::{BoundedStepSolver, BoxQpSolver, SolveMode};
use chipfit_types::{
    IdentConfig, IdentError, IdentResult, ParameterSpace, ParameterVector, Residual, ResponseSet,
};

use crate::abort::AbortHandle;
use crate::report::{CalibrationReport, IterationSummary, IterationWarning, TerminalState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Init,
    Evaluating,
    Sensitivity,
    Solving,
    Terminated(TerminalState),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Terminated(_))
    }
}

/// Base evaluation of every family at the current vector.
struct Evaluation {
    family_sets: Vec<ResponseSet>,
    residual: Residual,
}

/// Jacobian and solver-ready residual built in SENSITIVITY.
struct Linearization {
    jacobian: Jacobian,
    residual: Residual,
}

/// Counts every call handed to the wrapped oracle, including failed ones.
struct CountingOracle {
    inner: Arc<dyn ResponseOracle>,
    calls: Arc<AtomicUsize>,
}

impl ResponseOracle for CountingOracle {
    fn evaluate(&self, params: &ParameterVector) -> IdentResult<ResponseSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.evaluate(params)
    }

    fn responses(&self) -> Vec<String> {
        self.inner.responses()
    }

    fn supports_concurrency(&self) -> bool {
        self.inner.supports_concurrency()
    }
}

/// Sensitivity-based bounded Gauss-Newton identification.
///
/// Owns the single mutable parameter vector of the run. Each response
/// family (one oracle) gets its own base evaluation and perturbation
/// batch; rows from all families are merged at the same vector.
pub struct IdentificationLoop {
    config: IdentConfig,
    families: Vec<SensitivityEstimator>,
    normalizer: Normalizer,
    step_solver: BoundedStepSolver,
    space: ParameterSpace,
    abort: AbortHandle,
    state: LoopState,
    updates: usize,
    oracle_calls: Arc<AtomicUsize>,
    history: Vec<IterationSummary>,
    best: Option<usize>,
    evaluation: Option<Evaluation>,
    linearization: Option<Linearization>,
    failure: Option<IdentError>,
    started: Option<Instant>,
}

impl IdentificationLoop {
    /// Validate the configuration and the family layout.
    ///
    /// Fails before any oracle call if the config is invalid, if a
    /// reference response is tracked by no family, or by more than one.
    pub fn new(config: IdentConfig, oracles: Vec<Arc<dyn ResponseOracle>>) -> IdentResult<Self> {
        config.validate()?;
        if oracles.is_empty() {
            return Err(IdentError::Config(
                "at least one response oracle is required".to_string(),
            ));
        }
        for name in config.reference_responses.names() {
            let owners = oracles
                .iter()
                .filter(|o| o.responses().iter().any(|r| r == name))
                .count();
            match owners {
                0 => {
                    return Err(IdentError::Config(format!(
                        "reference response '{name}' is not produced by any oracle"
                    )))
                }
                1 => {}
                n => {
                    return Err(IdentError::Config(format!(
                        "reference response '{name}' is produced by {n} oracles"
                    )))
                }
            }
        }

        let space = ParameterSpace::new(config.initial_vector, config.bounds)?;
        let oracle_calls = Arc::new(AtomicUsize::new(0));
        let families = oracles
            .into_iter()
            .map(|inner| {
                let counted: Arc<dyn ResponseOracle> = Arc::new(CountingOracle {
                    inner,
                    calls: Arc::clone(&oracle_calls),
                });
                SensitivityEstimator::new(counted).parallel(config.parallel_perturbations)
            })
            .collect();

        Ok(Self {
            normalizer: Normalizer::new(config.normalization_mode),
            config,
            families,
            step_solver: BoundedStepSolver::default(),
            space,
            abort: AbortHandle::new(),
            state: LoopState::Init,
            updates: 0,
            oracle_calls,
            history: Vec::new(),
            best: None,
            evaluation: None,
            linearization: None,
            failure: None,
            started: None,
        })
    }

    /// Replace the QP backend used by the step solver.
    pub fn with_qp_solver(mut self, qp: Arc<dyn BoxQpSolver>) -> Self {
        self.step_solver = BoundedStepSolver::new(qp);
        self
    }

    /// Use an abort handle created by the caller.
    pub fn with_abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn current(&self) -> &ParameterVector {
        self.space.current()
    }

    pub fn history(&self) -> &[IterationSummary] {
        &self.history
    }

    pub fn config(&self) -> &IdentConfig {
        &self.config
    }

    /// Parameter updates applied so far.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Run to a terminal state and return the report.
    pub fn run(&mut self) -> CalibrationReport {
        while !self.state.is_terminal() {
            self.step();
        }
        self.report()
    }

    /// Execute the work of the current state and advance by one
    /// transition. A terminal state is returned unchanged.
    pub fn step(&mut self) -> LoopState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.abort.is_aborted() {
            log::warn!(
                "aborted in {:?} after {} updates; keeping {}",
                self.state,
                self.updates,
                self.space.current()
            );
            return self.terminate(TerminalState::Aborted);
        }

        let outcome = match self.state {
            LoopState::Init => Ok(self.init()),
            LoopState::Evaluating => self.evaluate(),
            LoopState::Sensitivity => self.linearize(),
            LoopState::Solving => self.solve(),
            LoopState::Terminated(s) => Ok(LoopState::Terminated(s)),
        };

        match outcome {
            Ok(LoopState::Terminated(s)) => self.terminate(s),
            Ok(next) => {
                self.state = next;
                next
            }
            Err(e) => {
                log::error!("identification failed: {e}");
                self.failure = Some(e);
                self.terminate(TerminalState::Failed)
            }
        }
    }

    fn init(&mut self) -> LoopState {
        self.started = Some(Instant::now());
        log::info!(
            "identification start: {} responses, {} families, mode {:?}, λ={:e}, x0: {}",
            self.config.reference_responses.len(),
            self.families.len(),
            self.config.normalization_mode,
            self.config.regularization_weight,
            self.space.current()
        );
        LoopState::Evaluating
    }

    fn evaluate(&mut self) -> IdentResult<LoopState> {
        let x = *self.space.current();
        let mut family_sets = Vec::with_capacity(self.families.len());
        let mut merged = ResponseSet::new();
        for family in &self.families {
            let oracle = family.oracle();
            let set = oracle.evaluate(&x).map_err(|e| match e {
                IdentError::Oracle(msg) => IdentError::Oracle(format!("evaluation at {x}: {msg}")),
                other => other,
            })?;
            check_complete(&set, &oracle.responses())?;
            merged.extend_from(&set);
            family_sets.push(set);
        }

        let reference = &self.config.reference_responses;
        let residual = Residual::between(reference, &merged)?;
        let relative_errors = residual.relative_to(reference);
        let summary = IterationSummary {
            iteration: self.updates,
            vector: x,
            responses: merged,
            residual: residual.clone(),
            relative_errors,
            sum_of_squares: residual.sum_of_squares(),
            rows_used: Vec::new(),
            warnings: Vec::new(),
            step: None,
        };
        log::info!(
            "iter {}: SSQ={:.6e}, max |rel err|={:.3}%, x: {}",
            summary.iteration,
            summary.sum_of_squares,
            100.0 * summary.max_relative_error(),
            x
        );

        let improved = match self.best {
            Some(i) => summary.sum_of_squares < self.history[i].sum_of_squares,
            None => true,
        };
        let converged = summary
            .relative_errors
            .values()
            .all(|e| e.abs() < self.config.convergence_tolerance);
        self.history.push(summary);
        if improved {
            self.best = Some(self.history.len() - 1);
        }

        if converged {
            return Ok(LoopState::Terminated(TerminalState::Converged));
        }
        if self.updates >= self.config.max_iterations {
            return Ok(LoopState::Terminated(TerminalState::MaxIterations));
        }
        self.evaluation = Some(Evaluation {
            family_sets,
            residual,
        });
        Ok(LoopState::Sensitivity)
    }

    fn linearize(&mut self) -> IdentResult<LoopState> {
        let evaluation = self.evaluation.take().ok_or_else(|| {
            IdentError::Numerical("sensitivity requested without a base evaluation".to_string())
        })?;
        let x = *self.space.current();
        let steps = self.config.perturbations();

        let mut normalized = NormalizedSensitivities::default();
        for (family, base) in self.families.iter().zip(evaluation.family_sets.iter()) {
            let matrix = family
                .estimate_with_steps(&x, base, &steps)
                .map_err(|e| match e {
                    IdentError::Oracle(msg) => {
                        IdentError::Oracle(format!("perturbation batch: {msg}"))
                    }
                    other => other,
                })?;
            normalized.absorb(self.normalizer.normalize(&matrix, &x, None)?);
        }

        let warnings: Vec<IterationWarning> = normalized
            .rejected
            .iter()
            .filter(|(name, _)| self.config.reference_responses.contains(name))
            .map(|(name, reason)| IterationWarning::DroppedRow {
                response: name.clone(),
                reason: reason.to_string(),
            })
            .collect();

        let available = normalized.response_names();
        let ordering: Vec<String> = self
            .config
            .response_order()
            .into_iter()
            .filter(|name| available.contains(name))
            .collect();

        if let Some(summary) = self.history.last_mut() {
            summary.warnings.extend(warnings);
            summary.rows_used = ordering.clone();
        }
        if ordering.is_empty() {
            return Err(IdentError::NoUsableRows);
        }

        let (jacobian, residual) =
            JacobianAssembler::assemble(&normalized.rows, &evaluation.residual, &ordering)?;
        log::debug!(
            "jacobian assembled: {} rows {:?}",
            jacobian.n_rows(),
            jacobian.responses
        );
        self.linearization = Some(Linearization { jacobian, residual });
        Ok(LoopState::Solving)
    }

    fn solve(&mut self) -> IdentResult<LoopState> {
        let lin = self.linearization.take().ok_or_else(|| {
            IdentError::Numerical("solve requested without a Jacobian".to_string())
        })?;
        let current = *self.space.current();
        let step = self.step_solver.solve(
            &lin.jacobian,
            &lin.residual,
            &current,
            self.space.bounds(),
            self.config.regularization_weight,
        )?;

        let next = self.space.accept(step.next);
        self.updates += 1;
        let step_norm = step.step_norm();
        log::info!(
            "update {}: ‖δ‖={:.4e}, model decrease {:.4e}, x: {}",
            self.updates,
            step_norm,
            step.model_decrease,
            next
        );

        if let Some(summary) = self.history.last_mut() {
            if let SolveMode::ClippedFallback { reason } = &step.mode {
                log::warn!("degraded solve at update {}: {reason}", self.updates);
                summary.warnings.push(IterationWarning::DegradedSolve {
                    reason: reason.to_string(),
                });
            }
            summary.step = Some(step);
        }

        if step_norm < self.config.min_step_norm {
            log::info!(
                "step norm {step_norm:.3e} below {:.3e}",
                self.config.min_step_norm
            );
            return Ok(LoopState::Terminated(TerminalState::Converged));
        }
        Ok(LoopState::Evaluating)
    }

    fn terminate(&mut self, state: TerminalState) -> LoopState {
        self.evaluation = None;
        self.linearization = None;
        self.state = LoopState::Terminated(state);
        log::info!(
            "identification finished: {state:?} after {} updates, {} oracle calls",
            self.updates,
            self.oracle_calls.load(Ordering::SeqCst)
        );
        self.state
    }

    /// Snapshot of the run. Meaningful once a terminal state is reached.
    pub fn report(&self) -> CalibrationReport {
        let state = match self.state {
            LoopState::Terminated(s) => s,
            _ => TerminalState::Aborted,
        };
        let (final_vector, final_residual) = match (state, self.best) {
            (TerminalState::MaxIterations, Some(i)) => {
                let best = &self.history[i];
                (best.vector, Some(best.residual.clone()))
            }
            _ => (
                *self.space.current(),
                self.history.last().map(|h| h.residual.clone()),
            ),
        };
        CalibrationReport {
            state,
            final_vector,
            final_residual,
            iterations: self.updates,
            oracle_calls: self.oracle_calls.load(Ordering::SeqCst),
            history: self.history.clone(),
            failure: self.failure.as_ref().map(ToString::to_string),
            elapsed_ms: self
                .started
                .map(|t| t.elapsed().as_secs_f64() * 1000.0)
                .unwrap_or(0.0),
        }
    }
}
