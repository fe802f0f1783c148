//! Redundancy-based probability models
//!
//! Closed-form estimates of the probability that an entity is correct given
//! how often it was extracted:
//! - Noisy-Or: `P = 1 - (1 - p)^k`
//! - URNS (single urn, Poisson approximation):
//!   `P = 1 / (1 + |E|/|C| * (pe/pc)^k * e^(n(pc - pe)))` with `pc = p/|C|`,
//!   `pe = (1 - p)/|E|`
//!
//! URNS is evaluated in log space so large `k` or `n` saturate to 0 or 1
//! instead of overflowing.

use serde::{Deserialize, Serialize};

/// Probability of correctness from the redundancy count `k`
pub trait ProbabilityModel {
    fn probability(&self, k: u32) -> f64;

    /// An extraction is accepted when its probability exceeds 0.5
    fn classify(&self, k: u32) -> bool {
        self.probability(k) > 0.5
    }
}

/// Noisy-Or probability for extraction precision `p` and `k` redundant extractions
pub fn noisy_or(precision: f64, k: u32) -> f64 {
    let p = precision.clamp(0.0, 1.0);
    1.0 - (1.0 - p).powf(f64::from(k))
}

/// URNS probability
///
/// * `precision` - precision `p` of the extraction process
/// * `k` - number of times the entity was drawn
/// * `draws` - total number of draws `n`
/// * `candidates` - size `|C|` of the correct label set
/// * `errors` - size `|E|` of the error label set
///
/// Degenerate inputs (empty label sets, zero precision) return 0.0.
pub fn urns(precision: f64, k: u32, draws: u64, candidates: u64, errors: u64) -> f64 {
    if candidates == 0 || errors == 0 {
        return 0.0;
    }

    let p = precision.clamp(0.0, 1.0);
    let c = candidates as f64;
    let e = errors as f64;
    let pc = p / c;
    let pe = (1.0 - p) / e;
    if pc == 0.0 {
        return 0.0;
    }

    let mut log_odds_error = (e / c).ln() + draws as f64 * (pc - pe);
    if k > 0 {
        // ln(0) = -inf for p = 1 drives the probability to 1
        log_odds_error += f64::from(k) * (pe / pc).ln();
    }

    let probability = 1.0 / (1.0 + log_odds_error.exp());
    probability.clamp(0.0, 1.0)
}

/// Noisy-Or model with a fixed extraction precision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoisyOr {
    pub precision: f64,
}

impl NoisyOr {
    pub fn new(precision: f64) -> Self {
        Self { precision }
    }
}

impl ProbabilityModel for NoisyOr {
    fn probability(&self, k: u32) -> f64 {
        noisy_or(self.precision, k)
    }
}

/// URNS model for one extraction run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Urns {
    pub precision: f64,
    pub draws: u64,
    pub candidates: u64,
    pub errors: u64,
}

impl Urns {
    pub fn new(precision: f64, draws: u64, candidates: u64, errors: u64) -> Self {
        Self {
            precision,
            draws,
            candidates,
            errors,
        }
    }
}

impl ProbabilityModel for Urns {
    fn probability(&self, k: u32) -> f64 {
        urns(self.precision, k, self.draws, self.candidates, self.errors)
    }
}
