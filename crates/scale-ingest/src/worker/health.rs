//! Reachability checks for the store and the transport.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::db::stats_repo::{self, ProcessingMetrics};
use crate::db::Database;
use crate::transport::MessageTransport;

/// Window covered by the processing metrics in a health report.
pub const METRICS_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub healthy: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentStatus {
    fn from_result<E: std::fmt::Display>(started: Instant, result: Result<(), E>) -> Self {
        let response_time_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => Self {
                healthy: true,
                response_time_ms,
                error: None,
            },
            Err(e) => Self {
                healthy: false,
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// True only when both components are healthy.
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub store: ComponentStatus,
    pub transport: ComponentStatus,
    /// Number of files per status; empty when the store is unreachable.
    pub files_by_status: BTreeMap<String, u64>,
    /// Activity over the last [`METRICS_WINDOW_HOURS`]; absent when the
    /// store is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<ProcessingMetrics>,
}

/// Round-trips the store and connects to (then leaves) the transport.
pub async fn check_health<T>(db: &Database, transport: &mut T) -> HealthReport
where
    T: MessageTransport + ?Sized,
{
    let started = Instant::now();
    let store = ComponentStatus::from_result(started, db.ping());

    let (files_by_status, processing) = if store.healthy {
        store_metrics(db)
    } else {
        (BTreeMap::new(), None)
    };

    let started = Instant::now();
    let connected = transport.connect().await;
    if connected.is_ok() {
        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "Error disconnecting after health check");
        }
    }
    let transport = ComponentStatus::from_result(started, connected);

    HealthReport {
        healthy: store.healthy && transport.healthy,
        checked_at: Utc::now(),
        store,
        transport,
        files_by_status,
        processing,
    }
}

fn store_metrics(db: &Database) -> (BTreeMap<String, u64>, Option<ProcessingMetrics>) {
    let files_by_status = match stats_repo::count_by_status(db) {
        Ok(counts) => counts
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect(),
        Err(e) => {
            warn!(error = %e, "Could not count files by status");
            BTreeMap::new()
        }
    };

    let since = Utc::now() - Duration::hours(METRICS_WINDOW_HOURS);
    let processing = match stats_repo::processing_metrics(db, since) {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!(error = %e, "Could not compute processing metrics");
            None
        }
    };

    (files_by_status, processing)
}
