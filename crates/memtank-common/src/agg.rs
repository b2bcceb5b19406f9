//! Rollup (aggregation) settings
//!
//! A setting is written as `span:chunkspan:numchunks:ttl[:ready]`, for
//! example `10min:6h:2:38d` or `1h:1d:3:2y:false`. Durations use the
//! humantime syntax.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::validate::{int_positive, positive_secs};

/// One rollup applied to every metric
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AggSetting {
    /// Width of one rollup bucket, in seconds
    pub span: u32,
    /// Span of a rollup chunk, in seconds
    pub chunk_span: u32,
    /// Ring capacity for rollup chunks
    pub num_chunks: u32,
    /// Retention of persisted rollup chunks, in seconds
    pub ttl: u32,
    /// Whether reads may be served from this rollup
    pub ready: bool,
}

impl AggSetting {
    pub const fn new(span: u32, chunk_span: u32, num_chunks: u32, ttl: u32) -> Self {
        Self {
            span,
            chunk_span,
            num_chunks,
            ttl,
            ready: true,
        }
    }

    /// Check that every numeric field is positive
    pub fn validate(&self) -> Result<()> {
        int_positive("agg span", i64::from(self.span))?;
        int_positive("agg chunk span", i64::from(self.chunk_span))?;
        int_positive("agg num chunks", i64::from(self.num_chunks))?;
        int_positive("agg ttl", i64::from(self.ttl))?;
        Ok(())
    }
}

fn parse_secs(setting: &str, field: &str, raw: &str) -> Result<u32> {
    let dur = humantime::parse_duration(raw.trim())
        .map_err(|e| Error::invalid_agg_setting(setting, format!("{field}: {e}")))?;
    positive_secs(field, dur).map_err(|e| Error::invalid_agg_setting(setting, e.to_string()))
}

impl FromStr for AggSetting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if !(4..=5).contains(&parts.len()) {
            return Err(Error::invalid_agg_setting(
                s,
                "expected span:chunkspan:numchunks:ttl[:ready]",
            ));
        }

        let span = parse_secs(s, "span", parts[0])?;
        let chunk_span = parse_secs(s, "chunkspan", parts[1])?;
        let num_chunks: u32 = parts[2]
            .trim()
            .parse()
            .map_err(|e| Error::invalid_agg_setting(s, format!("numchunks: {e}")))?;
        if num_chunks == 0 {
            return Err(Error::invalid_agg_setting(s, "numchunks must be positive"));
        }
        let ttl = parse_secs(s, "ttl", parts[3])?;
        let ready = match parts.get(4).map(|r| r.trim()) {
            None => true,
            Some(r) => r
                .parse()
                .map_err(|e| Error::invalid_agg_setting(s, format!("ready: {e}")))?,
        };

        Ok(Self {
            span,
            chunk_span,
            num_chunks,
            ttl,
            ready,
        })
    }
}

impl TryFrom<String> for AggSetting {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AggSetting> for String {
    fn from(value: AggSetting) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AggSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = |secs: u32| humantime::format_duration(Duration::from_secs(u64::from(secs)));
        write!(
            f,
            "{}:{}:{}:{}",
            d(self.span),
            d(self.chunk_span),
            self.num_chunks,
            d(self.ttl)
        )?;
        if !self.ready {
            f.write_str(":false")?;
        }
        Ok(())
    }
}
