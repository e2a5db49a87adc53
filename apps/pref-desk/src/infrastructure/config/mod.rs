//! Configuration Module
//!
//! Configuration loading for the desk service.

mod settings;

pub use settings::{
    BenchmarkSettings, CacheSettings, ConfigError, DeskConfig, PaperStreamSettings,
    RotationSettings, ServerSettings, UniverseList, parse_universe,
};
