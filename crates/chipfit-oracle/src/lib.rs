// ─────────────────────────────────────────────────────────────────────
// Chipfit — Response Oracle Boundary
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! The single capability the identification engine consumes from its
//! environment: map a parameter vector to named scalar responses.
//!
//! How a response is produced (deck patching, solver launch, result
//! scraping) stays behind [`ResponseOracle`]. The [`deck`] module
//! models that as a `DeckWriter` / `ResultReader` pair whose file
//! formats version independently of the engine.

pub mod deck;
pub mod linear;
pub mod oracle;

pub use deck::{DeckOracle, DeckWriter, ResultReader};
pub use linear::{LinearResponse, LinearResponseModel};
pub use oracle::{ExternalOracle, MemoOracle, ResponseOracle};
