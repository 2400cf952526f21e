//! Correctness oracle comparing a distributed (or parallel) result with the sequential reference.
//!
//! The metric is the largest elementwise relative difference
//! `|seq[i] - other[i]| / (|seq[i]| + EPSILON)`. A result is [Validation::Valid] when the metric
//! does not exceed [THRESHOLD]. The check is soft, a suspect result is reported but its
//! measurements are kept.
use itertools::Itertools;

/// Keeps the relative difference finite where the reference is zero
pub const EPSILON: f64 = 1e-12;

/// Largest relative difference still considered a correct result
pub const THRESHOLD: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Validation {
    Valid { delta_max: f64 },
    Suspect { delta_max: f64 },
}

impl Validation {
    pub fn classify(delta_max: f64) -> Validation {
        // NaN compares false and lands in Suspect
        if delta_max <= THRESHOLD {
            Validation::Valid { delta_max }
        } else {
            Validation::Suspect { delta_max }
        }
    }

    pub fn delta_max(&self) -> f64 {
        match self {
            Validation::Valid { delta_max } | Validation::Suspect { delta_max } => *delta_max,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid { .. })
    }
}

/// Maximum elementwise relative difference between `seq` and `other`, 0.0 for empty inputs.
///
/// A NaN anywhere in `other` yields NaN.
///
/// # Panics
/// if the inputs differ in length
pub fn max_relative_diff(seq: &[f64], other: &[f64]) -> f64 {
    seq.iter()
        .zip_eq(other)
        .map(|(s, o)| (s - o).abs() / (s.abs() + EPSILON))
        .fold(0.0, |max, rel| if rel > max || rel.is_nan() { rel } else { max })
}

/// Compare and classify in one step
pub fn validate(seq: &[f64], other: &[f64]) -> Validation {
    Validation::classify(max_relative_diff(seq, other))
}
