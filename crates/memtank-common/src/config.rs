//! Configuration types for memtank
//!
//! Durations are written in humantime syntax (`"10min"`, `"1h"`,
//! `"35days"`). [`Config::validate`] must pass before any value is handed
//! to the registry.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::agg::AggSetting;
use crate::error::{Error, Result};
use crate::validate::{int_positive, positive_secs, whole_secs};

/// Root configuration for a memtank node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hot-tier registry configuration
    pub registry: RegistryConfig,
    /// Carbon plaintext input
    pub carbon: CarbonConfig,
    /// Operator HTTP endpoint (`/metrics`)
    pub http: HttpConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()
    }
}

/// Hot-tier registry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Duration covered by one chunk
    #[serde(with = "humantime_serde")]
    pub chunk_span: Duration,
    /// Number of chunks kept in memory per metric
    pub num_chunks: u32,
    /// Close and persist a chunk that saw no write for this long
    #[serde(with = "humantime_serde")]
    pub chunk_max_stale: Duration,
    /// Evict a metric that saw no write for this long
    #[serde(with = "humantime_serde")]
    pub metric_max_stale: Duration,
    /// Retention of persisted chunks
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Interval between staleness sweeps (zero disables the sweeper)
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
    /// Extra delay after each aligned sweep boundary
    #[serde(with = "humantime_serde")]
    pub gc_margin: Duration,
    /// Rollups applied to every metric
    pub agg_settings: Vec<AggSetting>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            chunk_span: Duration::from_secs(10 * 60),
            num_chunks: 7,
            chunk_max_stale: Duration::from_secs(3600),
            metric_max_stale: Duration::from_secs(6 * 3600),
            ttl: Duration::from_secs(35 * 86400),
            gc_interval: Duration::from_secs(3600),
            gc_margin: Duration::from_secs(60),
            agg_settings: vec![AggSetting::new(600, 6 * 3600, 2, 38 * 86400)],
        }
    }
}

impl RegistryConfig {
    /// Check the registry settings
    ///
    /// Rejects non-positive required values, sub-second durations and a
    /// metric staleness threshold shorter than the chunk threshold.
    pub fn validate(&self) -> Result<()> {
        positive_secs("chunk_span", self.chunk_span)?;
        int_positive("num_chunks", i64::from(self.num_chunks))?;
        positive_secs("ttl", self.ttl)?;
        let chunk_max_stale = whole_secs("chunk_max_stale", self.chunk_max_stale)?;
        let metric_max_stale = whole_secs("metric_max_stale", self.metric_max_stale)?;
        if metric_max_stale < chunk_max_stale {
            return Err(Error::configuration(format!(
                "metric_max_stale ({metric_max_stale}s) must not be shorter than chunk_max_stale ({chunk_max_stale}s)"
            )));
        }
        for setting in &self.agg_settings {
            setting.validate()?;
        }
        Ok(())
    }

    pub fn chunk_span_secs(&self) -> u32 {
        saturating_secs(self.chunk_span)
    }

    pub fn chunk_max_stale_secs(&self) -> u32 {
        saturating_secs(self.chunk_max_stale)
    }

    pub fn metric_max_stale_secs(&self) -> u32 {
        saturating_secs(self.metric_max_stale)
    }

    pub fn ttl_secs(&self) -> u32 {
        saturating_secs(self.ttl)
    }
}

fn saturating_secs(d: Duration) -> u32 {
    u32::try_from(d.as_secs()).unwrap_or(u32::MAX)
}

/// Carbon plaintext input configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonConfig {
    /// Whether to accept carbon connections
    pub enabled: bool,
    /// Listen address
    pub listen_addr: SocketAddr,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 2003)),
        }
    }
}

/// Operator HTTP endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether to serve `/metrics`
    pub enabled: bool,
    /// Listen address
    pub listen_addr: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6060)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.registry.chunk_span_secs(), 600);
        assert_eq!(config.registry.metric_max_stale_secs(), 21600);
        assert_eq!(config.carbon.listen_addr.port(), 2003);
        assert!(config.http.enabled);
        assert_eq!(config.http.listen_addr.port(), 6060);
    }

    #[test]
    fn test_rejects_zero_chunk_span() {
        let config = RegistryConfig {
            chunk_span: Duration::ZERO,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::NotPositive { field }) if field == "chunk_span"
        ));
    }

    #[test]
    fn test_rejects_zero_num_chunks() {
        let config = RegistryConfig {
            num_chunks: 0,
            ..RegistryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let config = RegistryConfig {
            chunk_max_stale: Duration::from_secs(7200),
            metric_max_stale: Duration::from_secs(3600),
            ..RegistryConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_gc_interval_is_valid() {
        let config = RegistryConfig {
            gc_interval: Duration::ZERO,
            ..RegistryConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_agg_setting() {
        let mut config = RegistryConfig::default();
        config.agg_settings.push(AggSetting::new(600, 0, 2, 86400));
        assert!(config.validate().is_err());
    }
}
