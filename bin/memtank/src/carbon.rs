//! Carbon plaintext input
//!
//! Accepts `<name> <value> <timestamp>\n` lines over TCP and feeds them into
//! the registry. Bad lines are counted and skipped; they never close the
//! connection.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use memtank_mdata::AggMetrics;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A parsed carbon line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbonLine<'a> {
    pub name: &'a str,
    pub value: f64,
    pub ts: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("expected 3 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid value {0:?}")]
    Value(String),

    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
}

/// Parse one plaintext line
pub fn parse_line(line: &str) -> Result<CarbonLine<'_>, LineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [name, value, ts] = fields[..] else {
        return Err(LineError::FieldCount(fields.len()));
    };

    let value: f64 = value
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| LineError::Value(value.to_string()))?;

    // some clients send fractional timestamps
    let ts = ts
        .parse::<u32>()
        .ok()
        .or_else(|| {
            ts.parse::<f64>()
                .ok()
                .filter(|t| t.is_finite() && *t >= 0.0 && *t <= f64::from(u32::MAX))
                .map(|t| t as u32)
        })
        .ok_or_else(|| LineError::Timestamp(ts.to_string()))?;

    Ok(CarbonLine { name, value, ts })
}

/// Carbon input counters
#[derive(Debug, Default)]
pub struct CarbonStats {
    pub lines: AtomicU64,
    pub invalid: AtomicU64,
    pub dropped: AtomicU64,
}

impl CarbonStats {
    /// Render the counters in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let rows = [
            ("lines_total", "Carbon lines received", &self.lines),
            ("invalid_total", "Carbon lines that failed to parse", &self.invalid),
            ("dropped_total", "Carbon points rejected by the registry", &self.dropped),
        ];
        let mut output = String::with_capacity(512);
        for (name, help, counter) in rows {
            let _ = writeln!(output, "# HELP memtank_carbon_{name} {help}");
            let _ = writeln!(output, "# TYPE memtank_carbon_{name} counter");
            let _ = writeln!(
                output,
                "memtank_carbon_{name} {}",
                counter.load(Ordering::Relaxed)
            );
        }
        output
    }
}

/// Handle one line: parse it and ingest it
pub fn handle_line(registry: &AggMetrics, stats: &CarbonStats, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    stats.lines.fetch_add(1, Ordering::Relaxed);

    match parse_line(line) {
        Ok(point) => {
            if registry
                .get_or_create(point.name)
                .add(point.ts, point.value)
                .is_err()
            {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(e) => {
            stats.invalid.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, line, "carbon-in: invalid line");
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<AggMetrics>, stats: Arc<CarbonStats>) {
    let peer = stream.peer_addr().ok();
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => handle_line(&registry, &stats, &line),
            Ok(None) => break,
            Err(e) => {
                warn!(?peer, error = %e, "carbon-in: read failed, closing connection");
                break;
            }
        }
    }
    debug!(?peer, "carbon-in: connection closed");
}

/// Accept connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    registry: Arc<AggMetrics>,
    stats: Arc<CarbonStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("carbon-in: listening on {}", addr);
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        Arc::clone(&registry),
                        Arc::clone(&stats),
                    ));
                }
                Err(e) => warn!(error = %e, "carbon-in: accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("carbon-in: stopped accepting connections");
}
