// ─────────────────────────────────────────────────────────────────────
// Chipfit — Response Sets and Residuals
// ─────────────────────────────────────────────────────────────────────
//! Named scalar responses of one evaluation, and the residual between
//! the experimental reference and a simulated set.
//!
//! Response families are data: any name can be tracked. The four used
//! by the orthogonal-cutting campaign are provided as constants.

use serde::{Deserialize, Serialize};

use crate::error::{IdentError, IdentResult};

pub const CHIP_THICKNESS: &str = "chip_thickness";
pub const CONTACT_LENGTH: &str = "contact_length";
pub const CUTTING_FORCE: &str = "cutting_force";
pub const PASSIVE_FORCE: &str = "passive_force";

/// Insertion-ordered mapping from response name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseSet {
    entries: Vec<(String, f64)>,
}

impl ResponseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference measurements of the orthogonal-cutting campaign.
    pub fn cutting_reference() -> Self {
        Self::from_pairs([
            (CHIP_THICKNESS, 0.396587),
            (CONTACT_LENGTH, 0.314197),
            (CUTTING_FORCE, 621.397),
            (PASSIVE_FORCE, 192.064),
        ])
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.insert(name, value);
        }
        set
    }

    /// Insert or overwrite; an overwritten entry keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another set into this one (later values win).
    pub fn extend_from(&mut self, other: &ResponseSet) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    /// Values for `names`, in that order; fails on any missing or
    /// non-finite entry.
    pub fn require(&self, names: &[String]) -> IdentResult<Vec<f64>> {
        names
            .iter()
            .map(|name| match self.get(name) {
                Some(v) if v.is_finite() => Ok(v),
                _ => Err(IdentError::IncompleteResponse {
                    response: name.clone(),
                }),
            })
            .collect()
    }
}

/// `reference - simulated`, ordered like the reference set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Residual(ResponseSet);

impl Residual {
    /// Fails with `IncompleteResponse` if `simulated` lacks (or has a
    /// non-finite value for) any reference response.
    pub fn between(reference: &ResponseSet, simulated: &ResponseSet) -> IdentResult<Self> {
        let mut out = ResponseSet::new();
        for (name, r) in reference.iter() {
            match simulated.get(name) {
                Some(s) if s.is_finite() => out.insert(name, r - s),
                _ => {
                    return Err(IdentError::IncompleteResponse {
                        response: name.to_string(),
                    })
                }
            }
        }
        Ok(Self(out))
    }

    pub fn from_set(set: ResponseSet) -> Self {
        Self(set)
    }

    pub fn as_set(&self) -> &ResponseSet {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum_of_squares(&self) -> f64 {
        self.0.values().map(|r| r * r).sum()
    }

    /// Relative error per response, `(reference - simulated) / reference`,
    /// as a fraction. Responses with a zero reference are skipped.
    pub fn relative_to(&self, reference: &ResponseSet) -> ResponseSet {
        let mut out = ResponseSet::new();
        for (name, r) in self.iter() {
            if let Some(refv) = reference.get(name) {
                if refv != 0.0 {
                    out.insert(name, r / refv);
                }
            }
        }
        out
    }
}

/// Largest absolute value in a set (0.0 for an empty set).
pub fn max_abs(set: &ResponseSet) -> f64 {
    set.values().fold(0.0_f64, |m, v| m.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_position_on_overwrite() {
        let mut s = ResponseSet::from_pairs([("a", 1.0), ("b", 2.0)]);
        s.insert("a", 5.0);
        let names: Vec<_> = s.names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(s.get("a"), Some(5.0));
    }

    #[test]
    fn test_residual_reference_order() {
        let reference = ResponseSet::cutting_reference();
        let sim = ResponseSet::from_pairs([
            (PASSIVE_FORCE, 200.0),
            (CHIP_THICKNESS, 0.4),
            (CUTTING_FORCE, 600.0),
            (CONTACT_LENGTH, 0.3),
        ]);
        let r = Residual::between(&reference, &sim).unwrap();
        let names: Vec<_> = r.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![CHIP_THICKNESS, CONTACT_LENGTH, CUTTING_FORCE, PASSIVE_FORCE]
        );
        assert!((r.get(CUTTING_FORCE).unwrap() - 21.397).abs() < 1e-9);
        assert!((r.get(PASSIVE_FORCE).unwrap() + 7.936).abs() < 1e-9);
    }

    #[test]
    fn test_residual_incomplete() {
        let reference = ResponseSet::cutting_reference();
        let sim = ResponseSet::from_pairs([(CHIP_THICKNESS, 0.4)]);
        let err = Residual::between(&reference, &sim).unwrap_err();
        assert_eq!(
            err,
            IdentError::IncompleteResponse {
                response: CONTACT_LENGTH.into()
            }
        );
    }

    #[test]
    fn test_residual_rejects_nan() {
        let reference = ResponseSet::from_pairs([("x", 1.0)]);
        let sim = ResponseSet::from_pairs([("x", f64::NAN)]);
        assert!(Residual::between(&reference, &sim).is_err());
    }

    #[test]
    fn test_relative_error_fraction() {
        let reference = ResponseSet::from_pairs([("h", 0.396586993740339)]);
        let sim = ResponseSet::from_pairs([("h", 0.00707106781186548)]);
        let rel = Residual::between(&reference, &sim)
            .unwrap()
            .relative_to(&reference);
        // ≈ 98.22 %
        assert!((rel.get("h").unwrap() - 0.98217).abs() < 1e-4);
    }

    #[test]
    fn test_sum_of_squares() {
        let r = Residual::from_set(ResponseSet::from_pairs([("a", 3.0), ("b", -4.0)]));
        assert!((r.sum_of_squares() - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_require_missing() {
        let s = ResponseSet::from_pairs([("a", 1.0)]);
        assert_eq!(s.require(&["a".into()]).unwrap(), vec![1.0]);
        assert!(s.require(&["b".into()]).is_err());
    }

    #[test]
    fn test_max_abs() {
        let s = ResponseSet::from_pairs([("a", 0.2), ("b", -0.7)]);
        assert!((max_abs(&s) - 0.7).abs() < 1e-12);
        assert_eq!(max_abs(&ResponseSet::new()), 0.0);
    }
}
