// ─────────────────────────────────────────────────────────────────────
// Chipfit — Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

/// Root error type for all identification failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentError {
    /// Bad bounds, initial vector outside bounds, bad options.
    #[error("config error: {0}")]
    Config(String),

    /// The response oracle could not produce an evaluation.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// A tracked response is absent from, or non-finite in, an evaluation.
    #[error("incomplete response set: '{response}' missing or non-finite")]
    IncompleteResponse { response: String },

    /// A finite-difference cell could not be resolved.
    #[error("undefined sensitivity: d({response})/d({parameter})")]
    UndefinedSensitivity {
        response: String,
        parameter: &'static str,
    },

    /// Fully-dimensionless normalization against a zero response.
    #[error("degenerate normalization: response '{response}' is zero")]
    DegenerateNormalization { response: String },

    /// Response ordering references a response with no row or residual.
    #[error("missing response: '{response}'")]
    MissingResponse { response: String },

    /// Rows evaluated at different parameter vectors were mixed.
    #[error("stale evaluation: '{response}' computed at {found:#018x}, expected {expected:#018x}")]
    StaleEvaluation {
        response: String,
        expected: u64,
        found: u64,
    },

    /// Every sensitivity row was rejected for this iteration.
    #[error("no usable sensitivity rows left for this iteration")]
    NoUsableRows,

    /// Numerical error (NaN/Inf, singular system).
    #[error("numerical error: {0}")]
    Numerical(String),
}

pub type IdentResult<T> = Result<T, IdentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_message_shows_fingerprints() {
        let err = IdentError::StaleEvaluation {
            response: "cutting_force".into(),
            expected: 0x1,
            found: 0xff,
        };
        let msg = err.to_string();
        assert!(msg.contains("cutting_force"));
        assert!(msg.contains("0x00000000000000ff"));
    }

    #[test]
    fn test_undefined_message_names_cell() {
        let err = IdentError::UndefinedSensitivity {
            response: "chip_thickness".into(),
            parameter: "B",
        };
        assert_eq!(err.to_string(), "undefined sensitivity: d(chip_thickness)/d(B)");
    }
}
