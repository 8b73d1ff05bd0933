// ─────────────────────────────────────────────────────────────────────
// Chipfit — Deck Writer / Result Reader Boundary
// ─────────────────────────────────────────────────────────────────────
//! Simulation-backed oracle split into its two format-bound halves.
//!
//! A `DeckWriter` turns a parameter vector into a finished simulation
//! run (patch the material cards, submit the job, wait) and hands back
//! an opaque handle. A `ResultReader` extracts the scalar responses
//! from that handle. Each side reports its own format version; the
//! identification engine depends on neither format.

use chipfit_types::{IdentError, IdentResult, ParameterVector, ResponseSet};

use crate::oracle::{check_complete, ResponseOracle};

/// Produces a completed simulation run for a parameter vector.
pub trait DeckWriter: Send + Sync {
    /// Whatever identifies the finished run (job name, output path, ...).
    type Handle;

    fn format_version(&self) -> &str;

    fn submit(&self, params: &ParameterVector) -> IdentResult<Self::Handle>;
}

/// Extracts scalar responses from a finished simulation run.
pub trait ResultReader<H>: Send + Sync {
    fn format_version(&self) -> &str;

    /// Response names this reader extracts.
    fn responses(&self) -> Vec<String>;

    fn read(&self, handle: &H) -> IdentResult<ResponseSet>;
}

/// `ResponseOracle` composed from a writer and a reader.
pub struct DeckOracle<W, R> {
    writer: W,
    reader: R,
}

impl<W, R> DeckOracle<W, R>
where
    W: DeckWriter,
    R: ResultReader<W::Handle>,
{
    pub fn new(writer: W, reader: R) -> Self {
        Self { writer, reader }
    }

    /// `"<writer version>/<reader version>"`, for run provenance.
    pub fn format_versions(&self) -> String {
        format!(
            "{}/{}",
            self.writer.format_version(),
            self.reader.format_version()
        )
    }
}

impl<W, R> ResponseOracle for DeckOracle<W, R>
where
    W: DeckWriter,
    R: ResultReader<W::Handle>,
{
    fn evaluate(&self, params: &ParameterVector) -> IdentResult<ResponseSet> {
        log::debug!(
            "deck oracle [{}] submitting {params}",
            self.format_versions()
        );
        let handle = self.writer.submit(params).map_err(|e| match e {
            IdentError::Oracle(msg) => IdentError::Oracle(format!("deck submission: {msg}")),
            other => other,
        })?;
        let set = self.reader.read(&handle)?;
        check_complete(&set, &self.reader.responses())?;
        Ok(set)
    }

    fn responses(&self) -> Vec<String> {
        self.reader.responses()
    }
}
