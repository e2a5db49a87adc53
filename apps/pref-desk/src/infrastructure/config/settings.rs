//! Desk Configuration Settings
//!
//! Configuration types for the desk, loaded from environment variables.
//! Unparseable values fall back to their defaults; structurally invalid
//! settings (zero capacity, zero batch or interval, out-of-range decimals,
//! a batch larger than the cache can hold, malformed universe) are errors.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{DEFAULT_QUEUE_CAPACITY, RotationConfig};
use crate::domain::benchmark::{BenchmarkWeights, Group};
use crate::domain::scoring::ScoringConfig;
use crate::domain::streaming::{FreshnessPolicy, Symbol};

/// Benchmark reference symbols kept warm next to each rotation batch.
const REFERENCE_COUNT: usize = 2;

/// Accepted benchmark weights.
const WEIGHT_RANGE: (Decimal, Decimal) = (Decimal::from_parts(10, 0, 0, true, 0), Decimal::TEN);

/// Accepted spread tilt.
const TILT_RANGE: (Decimal, Decimal) = (Decimal::ZERO, Decimal::ONE);

/// Accepted eligibility thresholds, in cents.
const EPSILON_RANGE: (Decimal, Decimal) = (Decimal::ZERO, Decimal::ONE_THOUSAND);

const DEFAULT_UNIVERSE: &str = "T:BAC-PL,JPM-PD,WFC-PL,C-PJ,GS-PD;C:PSA-PH,ALL-PH,MET-PA,PRU-PB,AIG-PA";

/// Subscription cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum simultaneous upstream subscriptions.
    pub max_subscriptions: usize,
    /// Quote age after which reads treat an entry as missing.
    pub cache_timeout: Duration,
    /// Wait for a first quote before an entry is reported degraded.
    pub first_tick_timeout: Duration,
    /// Subscription request queue depth.
    pub queue_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_subscriptions: 45,
            cache_timeout: Duration::from_secs(5),
            first_tick_timeout: Duration::from_secs(10),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl CacheSettings {
    /// Freshness rules for cache reads.
    #[must_use]
    pub const fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy {
            cache_timeout: self.cache_timeout,
            first_tick_timeout: self.first_tick_timeout,
        }
    }
}

/// Rotation scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    /// Time between rotation ticks.
    pub interval: Duration,
    /// Symbols subscribed per tick.
    pub batch_size: usize,
    /// Wait before snapshotting a batch.
    pub settle_delay: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        let config = RotationConfig::default();
        Self {
            interval: config.interval,
            batch_size: config.batch_size,
            settle_delay: config.settle_delay,
        }
    }
}

impl RotationSettings {
    /// Scheduler configuration.
    #[must_use]
    pub const fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            interval: self.interval,
            batch_size: self.batch_size,
            settle_delay: self.settle_delay,
        }
    }
}

/// Benchmark reference symbols and weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSettings {
    /// Reference A (preferred-stock ETF).
    pub reference_a: Symbol,
    /// Reference B (long-duration treasury ETF).
    pub reference_b: Symbol,
    /// Composite weights.
    pub weights: BenchmarkWeights,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            reference_a: "PFF".to_string(),
            reference_b: "TLT".to_string(),
            weights: BenchmarkWeights::default(),
        }
    }
}

/// Paper quote stream settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperStreamSettings {
    /// Time between simulated quote rounds.
    pub tick_interval: Duration,
    /// Broadcast channel capacity.
    pub channel_capacity: usize,
}

impl Default for PaperStreamSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            channel_capacity: 10_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
    /// How often the top candidates are logged.
    pub report_interval: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8085,
            report_interval: Duration::from_secs(30),
        }
    }
}

/// A named list of symbols sharing a benchmark group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniverseList {
    /// Benchmark group for every symbol in the list.
    pub group: Group,
    /// Symbols in display order.
    pub symbols: Vec<Symbol>,
}

/// Complete desk configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    /// Cache settings.
    pub cache: CacheSettings,
    /// Rotation settings.
    pub rotation: RotationSettings,
    /// Benchmark settings.
    pub benchmark: BenchmarkSettings,
    /// Scoring parameters.
    pub scoring: ScoringConfig,
    /// Paper stream settings.
    pub paper: PaperStreamSettings,
    /// Server settings.
    pub server: ServerSettings,
    /// Tracked symbol lists.
    pub universe: Vec<UniverseList>,
}

impl DeskConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a setting is structurally invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a setting is structurally invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            max_subscriptions: env.usize(
                "PREF_DESK_MAX_SUBSCRIPTIONS",
                cache_defaults.max_subscriptions,
            ),
            cache_timeout: env.duration_secs(
                "PREF_DESK_CACHE_TIMEOUT_SECS",
                cache_defaults.cache_timeout,
            ),
            first_tick_timeout: env.duration_secs(
                "PREF_DESK_FIRST_TICK_TIMEOUT_SECS",
                cache_defaults.first_tick_timeout,
            ),
            queue_capacity: env.usize("PREF_DESK_QUEUE_CAPACITY", cache_defaults.queue_capacity),
        };
        if cache.max_subscriptions == 0 {
            return Err(ConfigError::ZeroValue(
                "PREF_DESK_MAX_SUBSCRIPTIONS".to_string(),
            ));
        }

        let rotation_defaults = RotationSettings::default();
        let rotation = RotationSettings {
            interval: env.duration_secs(
                "PREF_DESK_ROTATION_INTERVAL_SECS",
                rotation_defaults.interval,
            ),
            batch_size: env.usize("PREF_DESK_ROTATION_BATCH_SIZE", rotation_defaults.batch_size),
            settle_delay: env.duration_secs(
                "PREF_DESK_ROTATION_SETTLE_SECS",
                rotation_defaults.settle_delay,
            ),
        };
        if rotation.batch_size == 0 {
            return Err(ConfigError::ZeroValue(
                "PREF_DESK_ROTATION_BATCH_SIZE".to_string(),
            ));
        }
        if rotation.interval.is_zero() {
            return Err(ConfigError::ZeroValue(
                "PREF_DESK_ROTATION_INTERVAL_SECS".to_string(),
            ));
        }
        // Both benchmark references stay subscribed alongside every batch.
        let rotation_room = cache.max_subscriptions.saturating_sub(REFERENCE_COUNT);
        if rotation.batch_size > rotation_room {
            return Err(ConfigError::BatchExceedsCapacity {
                batch_size: rotation.batch_size,
                available: rotation_room,
            });
        }

        let benchmark_defaults = BenchmarkSettings::default();
        let weights = benchmark_defaults.weights;
        let benchmark = BenchmarkSettings {
            reference_a: env.string("PREF_DESK_REFERENCE_A", &benchmark_defaults.reference_a),
            reference_b: env.string("PREF_DESK_REFERENCE_B", &benchmark_defaults.reference_b),
            weights: BenchmarkWeights {
                a_weight_t: env.bounded_decimal(
                    "PREF_DESK_A_WEIGHT_T",
                    weights.a_weight_t,
                    WEIGHT_RANGE,
                )?,
                b_weight_t: env.bounded_decimal(
                    "PREF_DESK_B_WEIGHT_T",
                    weights.b_weight_t,
                    WEIGHT_RANGE,
                )?,
                a_weight_c: env.bounded_decimal(
                    "PREF_DESK_A_WEIGHT_C",
                    weights.a_weight_c,
                    WEIGHT_RANGE,
                )?,
                b_weight_c: env.bounded_decimal(
                    "PREF_DESK_B_WEIGHT_C",
                    weights.b_weight_c,
                    WEIGHT_RANGE,
                )?,
            },
        };

        let scoring_defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            tilt_fraction: env.bounded_decimal(
                "PREF_DESK_TILT_FRACTION",
                scoring_defaults.tilt_fraction,
                TILT_RANGE,
            )?,
            entry_epsilon_cents: env.bounded_decimal(
                "PREF_DESK_ENTRY_EPSILON_CENTS",
                scoring_defaults.entry_epsilon_cents,
                EPSILON_RANGE,
            )?,
            exit_epsilon_cents: env.bounded_decimal(
                "PREF_DESK_EXIT_EPSILON_CENTS",
                scoring_defaults.exit_epsilon_cents,
                EPSILON_RANGE,
            )?,
        };

        let paper_defaults = PaperStreamSettings::default();
        let paper = PaperStreamSettings {
            tick_interval: env.duration_millis(
                "PREF_DESK_PAPER_TICK_MS",
                paper_defaults.tick_interval,
            ),
            channel_capacity: env
                .usize("PREF_DESK_PAPER_CHANNEL_CAPACITY", paper_defaults.channel_capacity)
                .max(1),
        };
        if paper.tick_interval.is_zero() {
            return Err(ConfigError::ZeroValue("PREF_DESK_PAPER_TICK_MS".to_string()));
        }

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            health_port: env.u16("PREF_DESK_HEALTH_PORT", server_defaults.health_port),
            report_interval: env.duration_secs(
                "PREF_DESK_REPORT_INTERVAL_SECS",
                server_defaults.report_interval,
            ),
        };
        if server.report_interval.is_zero() {
            return Err(ConfigError::ZeroValue(
                "PREF_DESK_REPORT_INTERVAL_SECS".to_string(),
            ));
        }

        let universe = parse_universe(&env.string("PREF_DESK_UNIVERSE", DEFAULT_UNIVERSE))?;

        Ok(Self {
            cache,
            rotation,
            benchmark,
            scoring,
            paper,
            server,
            universe,
        })
    }

    /// Every universe symbol paired with its group, in list order.
    #[must_use]
    pub fn classified_universe(&self) -> Vec<(Symbol, Group)> {
        self.universe
            .iter()
            .flat_map(|list| list.symbols.iter().map(|s| (s.clone(), list.group)))
            .collect()
    }

    /// Symbol lists without their groups, for rotation.
    #[must_use]
    pub fn symbol_lists(&self) -> Vec<Vec<Symbol>> {
        self.universe.iter().map(|list| list.symbols.clone()).collect()
    }
}

/// Parse `"T:AAA,BBB;C:CCC"` into tagged symbol lists.
///
/// Symbols are trimmed and upper-cased; empty lists and blank symbols are
/// skipped.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidUniverse`] if a list has no valid group tag.
pub fn parse_universe(raw: &str) -> Result<Vec<UniverseList>, ConfigError> {
    let mut lists = Vec::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((tag, symbols)) = entry.split_once(':') else {
            return Err(ConfigError::InvalidUniverse {
                entry: entry.to_string(),
                reason: "expected GROUP:SYMBOL,...".to_string(),
            });
        };
        let Some(group) = Group::parse(tag) else {
            return Err(ConfigError::InvalidUniverse {
                entry: entry.to_string(),
                reason: format!("unknown group {tag:?}"),
            });
        };

        let symbols: Vec<Symbol> = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            lists.push(UniverseList { group, symbols });
        }
    }

    Ok(lists)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Setting must be positive.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),

    /// Decimal setting outside its accepted range.
    #[error("environment variable {key}={value} must be within [{min}, {max}]")]
    OutOfRange {
        /// Variable name.
        key: String,
        /// Parsed value.
        value: Decimal,
        /// Lower bound.
        min: Decimal,
        /// Upper bound.
        max: Decimal,
    },

    /// Rotation batch does not fit next to the benchmark references.
    #[error("rotation batch of {batch_size} exceeds the {available} slots left after benchmark references")]
    BatchExceedsCapacity {
        /// Configured batch size.
        batch_size: usize,
        /// Slots available for rotation.
        available: usize,
    },
    /// Universe definition is malformed.
    #[error("invalid universe entry {entry:?}: {reason}")]
    InvalidUniverse {
        /// Offending list.
        entry: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        (self.0)(key).and_then(|v| v.trim().parse().ok())
    }

    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn u16(&self, key: &str, default: u16) -> u16 {
        self.parse(key).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.parse(key).unwrap_or(default)
    }

    fn bounded_decimal(
        &self,
        key: &str,
        default: Decimal,
        (min, max): (Decimal, Decimal),
    ) -> Result<Decimal, ConfigError> {
        let value = self.parse(key).unwrap_or(default);
        if value < min || value > max {
            return Err(ConfigError::OutOfRange {
                key: key.to_string(),
                value,
                min,
                max,
            });
        }
        Ok(value)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
