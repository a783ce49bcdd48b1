//! Prometheus metrics for the purge engine.
//!
//! Provides counters for:
//! - Rows deleted per table
//! - Purge invocations by outcome
//! - Retries after transient database errors
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::{net::SocketAddr, sync::OnceLock};

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system and start the scrape listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen address {}: {e}", config.listen)))?;

    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    tracing::info!(address = %addr, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows removed by a purge batch.
///
/// # Arguments
/// * `table` - `states`, `events` or `recorder_runs`
/// * `count` - The number of rows deleted
pub fn record_purge_deletion(table: &str, count: u64) {
    if count == 0 {
        return;
    }
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "recorder_purge_deletions_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record the outcome of one purge invocation.
///
/// `outcome` is one of `finished`, `incomplete`, `retry`, `failed` or
/// `corrupted`.
pub fn record_purge_run(kind: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "recorder_purge_runs_total",
            "kind" => kind.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, outcome);
    }
}

pub fn record_purge_retry(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "recorder_purge_retries_total",
            "kind" => kind.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to build metrics exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_purge_deletion("states", 3);
        record_purge_deletion("events", 0);
        record_purge_run("old_data", "finished");
        record_purge_retry("entities");
    }

    #[test]
    fn test_disabled_metrics_init_is_noop() {
        let config = MetricsConfig::default();
        assert!(init_metrics(&config).is_ok());
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_invalid_listen_address() {
        let config = MetricsConfig {
            enabled: true,
            listen: "not an address".into(),
        };
        assert!(matches!(init_metrics(&config), Err(MetricsError::Setup(_))));
    }
}
