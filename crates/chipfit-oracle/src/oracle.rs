// ─────────────────────────────────────────────────────────────────────
// Chipfit — Response Oracle Interface
// ─────────────────────────────────────────────────────────────────────
//! Oracle trait, closure-backed oracle, and a memoising wrapper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use chipfit_types::{IdentError, IdentResult, ParameterVector, ResponseSet};

/// Black-box evaluation of a parameter vector.
///
/// Calls are synchronous and may take minutes (a full simulation).
/// Failures (non-convergence, missing result file, crashed process)
/// are returned as `IdentError::Oracle`; the engine never retries.
pub trait ResponseOracle: Send + Sync {
    fn evaluate(&self, params: &ParameterVector) -> IdentResult<ResponseSet>;

    /// Names of the responses this oracle produces (its family).
    fn responses(&self) -> Vec<String>;

    /// Whether `evaluate` may be called from several threads at once.
    fn supports_concurrency(&self) -> bool {
        false
    }
}

type EvaluateFn = Box<dyn Fn(&ParameterVector) -> IdentResult<ResponseSet> + Send + Sync>;

/// Oracle that delegates to a caller-supplied function.
///
/// Used to embed the engine in hosts that own the simulation pipeline.
pub struct ExternalOracle {
    responses: Vec<String>,
    evaluate_fn: EvaluateFn,
    concurrent: bool,
}

impl ExternalOracle {
    pub fn new<S: Into<String>>(
        responses: impl IntoIterator<Item = S>,
        evaluate_fn: impl Fn(&ParameterVector) -> IdentResult<ResponseSet> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            evaluate_fn: Box::new(evaluate_fn),
            concurrent: false,
        }
    }

    /// Declare the wrapped function safe for concurrent calls.
    pub fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }
}

impl ResponseOracle for ExternalOracle {
    fn evaluate(&self, params: &ParameterVector) -> IdentResult<ResponseSet> {
        (self.evaluate_fn)(params)
    }

    fn responses(&self) -> Vec<String> {
        self.responses.clone()
    }

    fn supports_concurrency(&self) -> bool {
        self.concurrent
    }
}

/// Reuses earlier results for vectors that were already evaluated.
///
/// Keyed by `ParameterVector::fingerprint`, confirmed by exact equality.
/// Failed evaluations are not cached.
pub struct MemoOracle {
    inner: Arc<dyn ResponseOracle>,
    cache: Mutex<HashMap<u64, (ParameterVector, ResponseSet)>>,
    hits: AtomicUsize,
}

impl MemoOracle {
    pub fn new(inner: Arc<dyn ResponseOracle>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
        }
    }

    /// Seed the cache with a result obtained elsewhere (e.g. a prior run).
    pub fn preload(&self, params: ParameterVector, responses: ResponseSet) {
        self.cache
            .lock()
            .insert(params.fingerprint(), (params, responses));
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

impl ResponseOracle for MemoOracle {
    fn evaluate(&self, params: &ParameterVector) -> IdentResult<ResponseSet> {
        let key = params.fingerprint();
        if let Some((stored, set)) = self.cache.lock().get(&key) {
            if stored == params {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("memo hit for {params}");
                return Ok(set.clone());
            }
        }
        // Lock released while the inner oracle runs.
        let set = self.inner.evaluate(params)?;
        self.cache.lock().insert(key, (*params, set.clone()));
        Ok(set)
    }

    fn responses(&self) -> Vec<String> {
        self.inner.responses()
    }

    fn supports_concurrency(&self) -> bool {
        self.inner.supports_concurrency()
    }
}

/// Check that `set` carries every name in `expected` with a finite value.
pub fn check_complete(set: &ResponseSet, expected: &[String]) -> IdentResult<()> {
    for name in expected {
        match set.get(name) {
            Some(v) if v.is_finite() => {}
            _ => {
                return Err(IdentError::IncompleteResponse {
                    response: name.clone(),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_oracle(calls: Arc<AtomicUsize>) -> ExternalOracle {
        ExternalOracle::new(["f"], move |p| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResponseSet::from_pairs([("f", p[0] * 2.0)]))
        })
    }

    #[test]
    fn test_external_oracle() {
        let oracle = ExternalOracle::new(["f"], |p| Ok(ResponseSet::from_pairs([("f", p[1])])));
        let out = oracle.evaluate(&ParameterVector::default()).unwrap();
        assert_eq!(out.get("f"), Some(1069.572082));
        assert_eq!(oracle.responses(), vec!["f".to_string()]);
        assert!(!oracle.supports_concurrency());
    }

    #[test]
    fn test_external_oracle_error_passthrough() {
        let oracle = ExternalOracle::new(["f"], |_| {
            Err(IdentError::Oracle("solver did not converge".into()))
        });
        let err = oracle.evaluate(&ParameterVector::default()).unwrap_err();
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn test_memo_reuses_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = MemoOracle::new(Arc::new(counting_oracle(calls.clone())));
        let v = ParameterVector::default();
        let a = memo.evaluate(&v).unwrap();
        let b = memo.evaluate(&v).unwrap();
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.hits(), 1);

        memo.evaluate(&v.with(0, 0.7)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.cached_len(), 2);
    }

    #[test]
    fn test_memo_preload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = MemoOracle::new(Arc::new(counting_oracle(calls.clone())));
        let v = ParameterVector::default();
        memo.preload(v, ResponseSet::from_pairs([("f", 42.0)]));
        assert_eq!(memo.evaluate(&v).unwrap().get("f"), Some(42.0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_memo_does_not_cache_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let flaky = ExternalOracle::new(["f"], move |_| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(IdentError::Oracle("crash".into()))
            } else {
                Ok(ResponseSet::from_pairs([("f", 1.0)]))
            }
        });
        let memo = MemoOracle::new(Arc::new(flaky));
        let v = ParameterVector::default();
        assert!(memo.evaluate(&v).is_err());
        assert!(memo.evaluate(&v).is_ok());
        assert_eq!(memo.cached_len(), 1);
    }

    #[test]
    fn test_check_complete() {
        let set = ResponseSet::from_pairs([("a", 1.0), ("b", f64::INFINITY)]);
        assert!(check_complete(&set, &["a".into()]).is_ok());
        assert!(check_complete(&set, &["b".into()]).is_err());
        assert!(check_complete(&set, &["c".into()]).is_err());
    }
}
