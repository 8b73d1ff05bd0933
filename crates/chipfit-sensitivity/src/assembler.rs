// ─────────────────────────────────────────────────────────────────────
// Chipfit — Jacobian Assembler
// ─────────────────────────────────────────────────────────────────────
//! Stacks normalized rows from one or more evaluation batches into a
//! single Jacobian (one row per response, one column per parameter)
//! and the matching residual, in a caller-specified response order.

use serde::{Deserialize, Serialize};

use chipfit_types::{IdentError, IdentResult, Residual, ResponseSet, N_PARAMS};

use crate::normalizer::NormalizedRow;

/// Dense R × 6 Jacobian in normalized parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jacobian {
    pub responses: Vec<String>,
    pub rows: Vec<[f64; N_PARAMS]>,
    /// Base-vector fingerprint shared by every row.
    pub fingerprint: u64,
}

impl Jacobian {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Predicted response change `J · δ`, one entry per row.
    pub fn apply(&self, delta: &[f64; N_PARAMS]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().zip(delta.iter()).map(|(j, d)| j * d).sum())
            .collect()
    }
}

pub struct JacobianAssembler;

impl JacobianAssembler {
    /// Merge rows into `(Jacobian, Residual)` following `ordering`.
    ///
    /// Each residual entry is divided by its row's `response_scale`, so
    /// the returned residual is in the same units as `J · δ`.
    ///
    /// Errors:
    /// - `StaleEvaluation` if the rows do not share one fingerprint.
    /// - `MissingResponse` if `ordering` names a response with no row
    ///   or no residual.
    /// - `NoUsableRows` if `ordering` is empty.
    pub fn assemble(
        rows: &[NormalizedRow],
        residuals: &Residual,
        ordering: &[String],
    ) -> IdentResult<(Jacobian, Residual)> {
        if ordering.is_empty() {
            return Err(IdentError::NoUsableRows);
        }

        let fingerprint = match rows.first() {
            Some(r) => r.fingerprint,
            None => {
                return Err(IdentError::MissingResponse {
                    response: ordering[0].clone(),
                })
            }
        };
        if let Some(stale) = rows.iter().find(|r| r.fingerprint != fingerprint) {
            return Err(IdentError::StaleEvaluation {
                response: stale.response.clone(),
                expected: fingerprint,
                found: stale.fingerprint,
            });
        }

        let mut jac_rows = Vec::with_capacity(ordering.len());
        let mut scaled = ResponseSet::new();
        for name in ordering {
            let row = rows
                .iter()
                .find(|r| &r.response == name)
                .ok_or_else(|| IdentError::MissingResponse {
                    response: name.clone(),
                })?;
            let r = residuals
                .get(name)
                .ok_or_else(|| IdentError::MissingResponse {
                    response: name.clone(),
                })?;
            jac_rows.push(row.values);
            scaled.insert(name.clone(), r / row.response_scale);
        }

        Ok((
            Jacobian {
                responses: ordering.to_vec(),
                rows: jac_rows,
                fingerprint,
            },
            Residual::from_set(scaled),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nrow(name: &str, v: f64, fingerprint: u64) -> NormalizedRow {
        NormalizedRow {
            response: name.into(),
            values: [v; N_PARAMS],
            response_scale: 1.0,
            fingerprint,
        }
    }

    fn residual() -> Residual {
        Residual::from_set(ResponseSet::from_pairs([
            ("chip_thickness", 0.1),
            ("cutting_force", -20.0),
            ("passive_force", 5.0),
        ]))
    }

    fn order(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_assemble_follows_ordering() {
        // Rows arrive from two batches in a different order.
        let rows = vec![
            nrow("cutting_force", 2.0, 7),
            nrow("passive_force", 3.0, 7),
            nrow("chip_thickness", 1.0, 7),
        ];
        let (j, r) = JacobianAssembler::assemble(
            &rows,
            &residual(),
            &order(&["chip_thickness", "cutting_force", "passive_force"]),
        )
        .unwrap();
        assert_eq!(j.n_rows(), 3);
        assert_eq!(j.rows[0][0], 1.0);
        assert_eq!(j.rows[1][0], 2.0);
        assert_eq!(j.rows[2][0], 3.0);
        let names: Vec<_> = r.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, j.responses);
        assert_eq!(r.get("cutting_force"), Some(-20.0));
        assert_eq!(j.fingerprint, 7);
    }

    #[test]
    fn test_assemble_subset_ordering() {
        let rows = vec![nrow("cutting_force", 2.0, 7), nrow("chip_thickness", 1.0, 7)];
        let (j, r) =
            JacobianAssembler::assemble(&rows, &residual(), &order(&["cutting_force"])).unwrap();
        assert_eq!(j.n_rows(), 1);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_missing_row() {
        let rows = vec![nrow("chip_thickness", 1.0, 7)];
        let err = JacobianAssembler::assemble(
            &rows,
            &residual(),
            &order(&["chip_thickness", "contact_length"]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            IdentError::MissingResponse {
                response: "contact_length".into()
            }
        );
    }

    #[test]
    fn test_missing_residual() {
        let rows = vec![nrow("contact_length", 1.0, 7)];
        let err = JacobianAssembler::assemble(&rows, &residual(), &order(&["contact_length"]))
            .unwrap_err();
        assert!(matches!(err, IdentError::MissingResponse { .. }));
    }

    #[test]
    fn test_stale_row() {
        let rows = vec![nrow("chip_thickness", 1.0, 7), nrow("cutting_force", 2.0, 8)];
        let err = JacobianAssembler::assemble(
            &rows,
            &residual(),
            &order(&["chip_thickness", "cutting_force"]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            IdentError::StaleEvaluation {
                response: "cutting_force".into(),
                expected: 7,
                found: 8
            }
        );
    }

    #[test]
    fn test_empty_ordering() {
        let rows = vec![nrow("chip_thickness", 1.0, 7)];
        let err = JacobianAssembler::assemble(&rows, &residual(), &[]).unwrap_err();
        assert_eq!(err, IdentError::NoUsableRows);
    }

    #[test]
    fn test_residual_scaled_by_response() {
        let mut row = nrow("cutting_force", 2.0, 7);
        row.response_scale = 600.0;
        let (_, r) =
            JacobianAssembler::assemble(&[row], &residual(), &order(&["cutting_force"])).unwrap();
        assert!((r.get("cutting_force").unwrap() + 20.0 / 600.0).abs() < 1e-15);
    }

    #[test]
    fn test_apply() {
        let j = Jacobian {
            responses: order(&["a", "b"]),
            rows: vec![[1.0, 0.0, 0.0, 0.0, 0.0, 0.0], [0.0, 2.0, 0.0, 0.0, 0.0, 1.0]],
            fingerprint: 0,
        };
        let out = j.apply(&[3.0, 1.0, 0.0, 0.0, 0.0, -1.0]);
        assert_eq!(out, vec![3.0, 1.0]);
    }
}
