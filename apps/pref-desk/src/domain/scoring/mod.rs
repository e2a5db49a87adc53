//! Candidate Scoring
//!
//! Scores symbols for hidden limit order placement relative to their group
//! benchmark and ranks them.
//!
//! # Pipeline (per symbol)
//!
//! 1. `spread_cents = (ask - bid) * 100`; non-positive spreads are dropped.
//! 2. Target price tilted into the spread: buys at `bid + spread * tilt`,
//!    sells at `ask - spread * tilt`.
//! 3. `daily_change_cents = (target - close) * 100`, falling back to the
//!    provider change percent applied to `last`.
//! 4. `relative_cents = daily_change_cents - benchmark_cents`.
//! 5. Eligibility and composite score by side (see [`Side`]).
//!
//! Output is sorted by composite score descending, ties by symbol.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::domain::benchmark::{BenchmarkSnapshot, Group};
use crate::domain::streaming::{CENTS_PER_DOLLAR, Quote, Symbol};

// =============================================================================
// Side
// =============================================================================

/// Order side being ranked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Open a long: wants symbols lagging their benchmark.
    BuyToOpen,
    /// Open a short: wants symbols leading their benchmark.
    SellToOpen,
    /// Take profit on a long: wants symbols leading their benchmark.
    ExitLong,
    /// Take profit on a short: wants symbols lagging their benchmark.
    CoverShort,
}

/// Whether a side opens or closes a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Opening a position ("cheap entry" ranking).
    Entry,
    /// Closing a position ("take-profit exit" ranking).
    Exit,
}

impl Side {
    /// All sides.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::BuyToOpen,
            Self::SellToOpen,
            Self::ExitLong,
            Self::CoverShort,
        ]
    }

    /// Whether the order buys (fills near the bid).
    #[must_use]
    pub const fn is_buy(self) -> bool {
        matches!(self, Self::BuyToOpen | Self::CoverShort)
    }

    /// Entry or exit.
    #[must_use]
    pub const fn intent(self) -> Intent {
        match self {
            Self::BuyToOpen | Self::SellToOpen => Intent::Entry,
            Self::ExitLong | Self::CoverShort => Intent::Exit,
        }
    }

    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BuyToOpen => "buy_to_open",
            Self::SellToOpen => "sell_to_open",
            Self::ExitLong => "exit_long",
            Self::CoverShort => "cover_short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Scoring parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Fraction of the spread the target price is tilted inside the touch.
    pub tilt_fraction: Decimal,
    /// Minimum relative underperformance/outperformance (cents) for entries.
    pub entry_epsilon_cents: Decimal,
    /// Minimum relative outperformance/underperformance (cents) for exits.
    pub exit_epsilon_cents: Decimal,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tilt_fraction: dec!(0.15),
            entry_epsilon_cents: Decimal::ZERO,
            exit_epsilon_cents: Decimal::ZERO,
        }
    }
}

// =============================================================================
// Candidate
// =============================================================================

/// A scored, eligible order candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Symbol.
    pub symbol: Symbol,
    /// Side the candidate was scored for.
    pub side: Side,
    /// Benchmark group used.
    pub group: Group,
    /// Bid/ask spread in cents.
    pub spread_cents: Decimal,
    /// Limit price a hidden order would realistically fill at.
    pub target_price: Decimal,
    /// Projected daily move at the target price, in cents.
    pub daily_change_cents: Decimal,
    /// Group benchmark in cents.
    pub benchmark_cents: Decimal,
    /// `daily_change_cents - benchmark_cents`.
    pub relative_cents: Decimal,
    /// Ranking key (higher is better).
    pub composite_score: Decimal,
}

/// Why a symbol was left out of a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Bid or ask missing.
    MissingBidAsk,
    /// Ask at or below bid.
    NonPositiveSpread,
    /// Neither close nor last + change percent available.
    NoReferencePrice,
    /// Relative performance points the wrong way for this side.
    Ineligible,
}

impl Exclusion {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingBidAsk => "missing_bid_ask",
            Self::NonPositiveSpread => "non_positive_spread",
            Self::NoReferencePrice => "no_reference_price",
            Self::Ineligible => "ineligible",
        }
    }
}

// =============================================================================
// Scoring Engine
// =============================================================================

/// Stateless scorer; a pure function of quotes and a benchmark snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Create an engine.
    #[must_use]
    pub const fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Configured parameters.
    #[must_use]
    pub const fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a single quote.
    ///
    /// # Errors
    ///
    /// Returns the [`Exclusion`] reason when the symbol cannot be ranked.
    pub fn score(
        &self,
        quote: &Quote,
        side: Side,
        group: Group,
        benchmark: &BenchmarkSnapshot,
    ) -> Result<Candidate, Exclusion> {
        let (Some(bid), Some(ask)) = (quote.bid, quote.ask) else {
            return Err(Exclusion::MissingBidAsk);
        };

        let spread = ask - bid;
        if spread <= Decimal::ZERO {
            return Err(Exclusion::NonPositiveSpread);
        }

        let tilt = spread * self.config.tilt_fraction;
        let target_price = if side.is_buy() { bid + tilt } else { ask - tilt };

        let daily_change_cents = daily_change_cents(quote, target_price)
            .ok_or(Exclusion::NoReferencePrice)?;
        let benchmark_cents = benchmark.cents_for(group);
        let relative_cents = daily_change_cents - benchmark_cents;
        let spread_cents = spread * CENTS_PER_DOLLAR;

        let composite_score = self
            .composite(side, spread_cents, relative_cents)
            .ok_or(Exclusion::Ineligible)?;

        Ok(Candidate {
            symbol: quote.symbol.clone(),
            side,
            group,
            spread_cents,
            target_price,
            daily_change_cents,
            benchmark_cents,
            relative_cents,
            composite_score,
        })
    }

    /// Score and rank quotes, each paired with its benchmark group.
    ///
    /// Excluded symbols are dropped silently (logged at trace level).
    pub fn rank<'a, I>(&self, quotes: I, side: Side, benchmark: &BenchmarkSnapshot) -> Vec<Candidate>
    where
        I: IntoIterator<Item = (&'a Quote, Group)>,
    {
        let mut candidates: Vec<Candidate> = quotes
            .into_iter()
            .filter_map(|(quote, group)| match self.score(quote, side, group, benchmark) {
                Ok(candidate) => Some(candidate),
                Err(reason) => {
                    tracing::trace!(
                        symbol = %quote.symbol,
                        side = side.as_str(),
                        reason = reason.as_str(),
                        "Candidate excluded"
                    );
                    None
                }
            })
            .collect();

        candidates.sort_by(compare_candidates);
        candidates
    }

    fn composite(&self, side: Side, spread_cents: Decimal, relative: Decimal) -> Option<Decimal> {
        let entry_eps = self.config.entry_epsilon_cents;
        let exit_eps = self.config.exit_epsilon_cents;

        match side {
            Side::BuyToOpen => (relative < -entry_eps).then(|| spread_cents + relative.abs()),
            Side::SellToOpen => (relative > entry_eps).then(|| spread_cents + relative.abs()),
            Side::ExitLong => (relative > exit_eps).then(|| spread_cents + relative),
            Side::CoverShort => (relative < -exit_eps).then(|| spread_cents - relative),
        }
    }
}

fn daily_change_cents(quote: &Quote, target_price: Decimal) -> Option<Decimal> {
    if let Some(close) = quote.close {
        return Some((target_price - close) * CENTS_PER_DOLLAR);
    }

    let (last, percent) = quote.last.zip(quote.change_percent)?;
    Some(last * (percent / Decimal::ONE_HUNDRED) * CENTS_PER_DOLLAR)
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.composite_score
        .cmp(&a.composite_score)
        .then_with(|| a.symbol.cmp(&b.symbol))
}

// =============================================================================
// Tests
// =============================================================================
