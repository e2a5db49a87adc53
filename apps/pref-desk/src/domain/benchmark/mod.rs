//! Composite Benchmarks
//!
//! Two synthetic daily-move benchmarks, one per symbol group, derived from
//! the daily moves of two reference ETFs and expressed in cents.
//!
//! ```text
//! T = A * a_weight_t + B * b_weight_t
//! C = A * a_weight_c - B * b_weight_c
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::CacheEntry;

/// Benchmark group a symbol is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    /// Group measured against the T composite.
    T,
    /// Group measured against the C composite.
    C,
}

impl Group {
    /// Parse a group tag ("T"/"C", case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "T" => Some(Self::T),
            "C" => Some(Self::C),
            _ => None,
        }
    }

    /// Short tag used in logs and config.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::T => "T",
            Self::C => "C",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy weights applied to the two reference moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkWeights {
    /// Weight of reference A in the T composite.
    pub a_weight_t: Decimal,
    /// Weight of reference B in the T composite (added).
    pub b_weight_t: Decimal,
    /// Weight of reference A in the C composite.
    pub a_weight_c: Decimal,
    /// Weight of reference B in the C composite (subtracted).
    pub b_weight_c: Decimal,
}

impl Default for BenchmarkWeights {
    fn default() -> Self {
        Self {
            a_weight_t: dec!(0.7),
            b_weight_t: dec!(0.1),
            a_weight_c: dec!(1.3),
            b_weight_c: dec!(0.1),
        }
    }
}

/// Current value of both composites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BenchmarkSnapshot {
    /// Daily move of reference A in cents.
    pub reference_a_cents: Decimal,
    /// Daily move of reference B in cents.
    pub reference_b_cents: Decimal,
    /// T composite in cents.
    pub t_cents: Decimal,
    /// C composite in cents.
    pub c_cents: Decimal,
    /// A reference input was missing, incomplete or stale.
    pub degraded: bool,
    /// When the snapshot was computed.
    pub computed_at: DateTime<Utc>,
}

impl BenchmarkSnapshot {
    /// Composite value for `group`.
    #[must_use]
    pub const fn cents_for(&self, group: Group) -> Decimal {
        match group {
            Group::T => self.t_cents,
            Group::C => self.c_cents,
        }
    }
}

/// Computes benchmark snapshots from reference quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BenchmarkEngine {
    weights: BenchmarkWeights,
}

impl BenchmarkEngine {
    /// Create an engine with the given weights.
    #[must_use]
    pub const fn new(weights: BenchmarkWeights) -> Self {
        Self { weights }
    }

    /// Configured weights.
    #[must_use]
    pub const fn weights(&self) -> &BenchmarkWeights {
        &self.weights
    }

    /// Compute a snapshot from the two reference entries.
    ///
    /// A reference with no entry, a stale quote, or a missing `last`/`close`
    /// contributes a zero move and marks the snapshot degraded.
    #[must_use]
    pub fn compute(
        &self,
        reference_a: Option<&CacheEntry>,
        reference_b: Option<&CacheEntry>,
        at: DateTime<Utc>,
    ) -> BenchmarkSnapshot {
        let a = reference_change_cents(reference_a);
        let b = reference_change_cents(reference_b);
        let degraded = a.is_none() || b.is_none();

        let mut snapshot = self.from_changes(a.unwrap_or_default(), b.unwrap_or_default(), at);
        snapshot.degraded = degraded;
        snapshot
    }

    /// Compute a snapshot from reference moves already in cents.
    #[must_use]
    pub fn from_changes(
        &self,
        reference_a_cents: Decimal,
        reference_b_cents: Decimal,
        at: DateTime<Utc>,
    ) -> BenchmarkSnapshot {
        let w = &self.weights;
        BenchmarkSnapshot {
            reference_a_cents,
            reference_b_cents,
            t_cents: reference_a_cents * w.a_weight_t + reference_b_cents * w.b_weight_t,
            c_cents: reference_a_cents * w.a_weight_c - reference_b_cents * w.b_weight_c,
            degraded: false,
            computed_at: at,
        }
    }
}

fn reference_change_cents(entry: Option<&CacheEntry>) -> Option<Decimal> {
    entry?.fresh_quote()?.change_cents()
}

// =============================================================================
// Tests
// =============================================================================
