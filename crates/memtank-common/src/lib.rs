//! memtank Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration types, input
//! validators and the clock abstraction used by the hot tier and the
//! node binary.

pub mod agg;
pub mod clock;
pub mod config;
pub mod error;
pub mod validate;

pub use agg::AggSetting;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CarbonConfig, Config, HttpConfig, RegistryConfig};
pub use error::{Error, Result};
