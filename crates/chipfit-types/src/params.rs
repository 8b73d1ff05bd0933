// ─────────────────────────────────────────────────────────────────────
// Chipfit — Johnson-Cook Parameter Space
// ─────────────────────────────────────────────────────────────────────
//! The six calibrated material parameters, their physical bounds, and
//! the bounded space the identification loop moves in.
//!
//! Order is fixed everywhere (vectors, Jacobian columns, steps):
//!
//!   [TQ, A, B, n, m, C]
//!
//! TQ is the Taylor-Quinney (inelastic heat) fraction, A/B/n/m the
//! Johnson-Cook hardening and thermal-softening terms, C the
//! strain-rate hardening coefficient.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::error::{IdentError, IdentResult};

pub const N_PARAMS: usize = 6;

/// Short symbols, in vector order.
pub const PARAMETER_SYMBOLS: [&str; N_PARAMS] = ["TQ", "A", "B", "n", "m", "C"];

/// Historical starting point of the calibration campaign.
pub const DEFAULT_INITIAL: [f64; N_PARAMS] =
    [0.94882, 1069.572082, 720.362473, 0.561582, 0.828054, 0.041972];

/// Physically admissible range per parameter.
pub const DEFAULT_LOWER: [f64; N_PARAMS] = [0.60, 400.0, 100.0, 0.05, 0.2, 0.005];
pub const DEFAULT_UPPER: [f64; N_PARAMS] = [0.95, 1100.0, 800.0, 0.80, 0.9, 0.900];

/// One of the six calibrated parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parameter {
    TaylorQuinney,
    HardeningA,
    HardeningB,
    HardeningN,
    ThermalM,
    RateC,
}

impl Parameter {
    pub const ALL: [Parameter; N_PARAMS] = [
        Parameter::TaylorQuinney,
        Parameter::HardeningA,
        Parameter::HardeningB,
        Parameter::HardeningN,
        Parameter::ThermalM,
        Parameter::RateC,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol(self) -> &'static str {
        PARAMETER_SYMBOLS[self.index()]
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }
}

/// Ordered 6-tuple of physical parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(pub [f64; N_PARAMS]);

impl Default for ParameterVector {
    fn default() -> Self {
        Self(DEFAULT_INITIAL)
    }
}

impl ParameterVector {
    pub fn new(values: [f64; N_PARAMS]) -> Self {
        Self(values)
    }

    /// Build from the material-card grouping: TQ, [A, B, n, m], C.
    pub fn from_groups(tq: f64, hardening: [f64; 4], rate_c: f64) -> Self {
        let [a, b, n, m] = hardening;
        Self([tq, a, b, n, m, rate_c])
    }

    pub fn values(&self) -> &[f64; N_PARAMS] {
        &self.0
    }

    pub fn get(&self, p: Parameter) -> f64 {
        self.0[p.index()]
    }

    /// Copy with one component replaced.
    pub fn with(&self, i: usize, value: f64) -> Self {
        let mut v = self.0;
        v[i] = value;
        Self(v)
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Reference magnitude of component `i` for relative quantities.
    ///
    /// `|x_i|`, or 1.0 when the component is exactly zero.
    #[inline]
    pub fn scale(&self, i: usize) -> f64 {
        let x = self.0[i];
        if x == 0.0 {
            1.0
        } else {
            x.abs()
        }
    }

    /// FNV-1a hash over the exact bit patterns of all six components.
    ///
    /// Two vectors share a fingerprint only if they are bit-identical
    /// (modulo hash collisions), which is what evaluation batches need.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut h = OFFSET;
        for v in &self.0 {
            for byte in v.to_bits().to_le_bytes() {
                h ^= u64::from(byte);
                h = h.wrapping_mul(PRIME);
            }
        }
        h
    }

    /// Split into the inelastic / hardening / rate cards of a deck.
    pub fn groups(&self) -> ParameterGroups {
        let v = self.0;
        ParameterGroups {
            inelastic: [v[0]],
            hardening: [v[1], v[2], v[3], v[4]],
            rate: [v[5]],
        }
    }
}

impl Index<usize> for ParameterVector {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl Index<Parameter> for ParameterVector {
    type Output = f64;

    fn index(&self, p: Parameter) -> &f64 {
        &self.0[p.index()]
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (sym, v)) in PARAMETER_SYMBOLS.iter().zip(self.0.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{sym}={v:.6}")?;
        }
        Ok(())
    }
}

/// Material-card grouping of the parameter vector.
///
/// Simulation decks carry the parameters on three separate cards:
/// inelastic heat fraction, Johnson-Cook hardening, and rate dependence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterGroups {
    pub inelastic: [f64; 1],
    pub hardening: [f64; 4],
    pub rate: [f64; 1],
}

impl ParameterGroups {
    /// Comma-separated, six decimals: `"1069.572082, 720.362473, ..."`.
    pub fn format_card(values: &[f64]) -> String {
        values
            .iter()
            .map(|v| format!("{v:.6}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn inelastic_card(&self) -> String {
        Self::format_card(&self.inelastic)
    }

    pub fn hardening_card(&self) -> String {
        Self::format_card(&self.hardening)
    }

    pub fn rate_card(&self) -> String {
        Self::format_card(&self.rate)
    }
}

/// Per-parameter physical limits, fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: [f64; N_PARAMS],
    pub upper: [f64; N_PARAMS],
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            lower: DEFAULT_LOWER,
            upper: DEFAULT_UPPER,
        }
    }
}

impl Bounds {
    /// Construct and validate; fails if any `lower_i >= upper_i`.
    pub fn new(lower: [f64; N_PARAMS], upper: [f64; N_PARAMS]) -> IdentResult<Self> {
        let b = Self { lower, upper };
        b.validate()?;
        Ok(b)
    }

    pub fn validate(&self) -> IdentResult<()> {
        for (i, (&lo, &hi)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(IdentError::Config(format!(
                    "bounds for {} must be finite, got [{lo}, {hi}]",
                    PARAMETER_SYMBOLS[i]
                )));
            }
            if lo >= hi {
                return Err(IdentError::Config(format!(
                    "bounds for {} must satisfy lower < upper, got [{lo}, {hi}]",
                    PARAMETER_SYMBOLS[i]
                )));
            }
        }
        Ok(())
    }

    pub fn lower(&self, p: Parameter) -> f64 {
        self.lower[p.index()]
    }

    pub fn upper(&self, p: Parameter) -> f64 {
        self.upper[p.index()]
    }

    /// Inclusive containment.
    pub fn contains(&self, v: &ParameterVector) -> bool {
        v.0.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(&x, (&lo, &hi))| x >= lo && x <= hi)
    }

    /// Component-wise clip; idempotent, NaN maps to the lower bound.
    pub fn clamp(&self, v: &ParameterVector) -> ParameterVector {
        let mut out = v.0;
        for (i, x) in out.iter_mut().enumerate() {
            *x = if x.is_nan() {
                self.lower[i]
            } else {
                x.clamp(self.lower[i], self.upper[i])
            };
        }
        ParameterVector(out)
    }
}

/// The current parameter vector together with its immutable bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpace {
    current: ParameterVector,
    bounds: Bounds,
}

impl ParameterSpace {
    /// Fails fast unless bounds are valid and `lower < initial < upper`.
    pub fn new(initial: ParameterVector, bounds: Bounds) -> IdentResult<Self> {
        bounds.validate()?;
        for p in Parameter::ALL {
            let x = initial.get(p);
            let (lo, hi) = (bounds.lower(p), bounds.upper(p));
            if !(x > lo && x < hi) {
                return Err(IdentError::Config(format!(
                    "initial {} = {x} must lie strictly inside ({lo}, {hi})",
                    p.symbol()
                )));
            }
        }
        Ok(Self {
            current: initial,
            bounds,
        })
    }

    pub fn current(&self) -> &ParameterVector {
        &self.current
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn clamp(&self, v: &ParameterVector) -> ParameterVector {
        self.bounds.clamp(v)
    }

    pub fn is_feasible(&self, v: &ParameterVector) -> bool {
        self.bounds.contains(v)
    }

    /// Replace the current vector as a whole. The value is clipped into
    /// bounds first; the stored vector is returned.
    pub fn accept(&mut self, next: ParameterVector) -> ParameterVector {
        let clipped = self.bounds.clamp(&next);
        if clipped != next {
            log::debug!("accepted vector clipped into bounds: {next} -> {clipped}");
        }
        self.current = clipped;
        clipped
    }
}
