//! Cycle driver: fetch every unprocessed bundle, process them one at a
//! time, sleep, repeat until told to stop.

pub mod health;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn, Instrument};

use crate::pipeline::{BundleReport, IngestionOrchestrator};
use crate::transport::{Destination, MessageTransport, TransportError};

pub use health::{check_health, ComponentStatus, HealthReport, METRICS_WINDOW_HOURS};

/// Counts for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub bundles_fetched: usize,
    pub routed_success: usize,
    pub routed_failure: usize,
    pub routed_duplicate: usize,
    /// Bundles that could not be routed.
    pub bundle_errors: usize,
    pub attachments_completed: usize,
    pub attachments_failed: usize,
    pub attachments_duplicate: usize,
    pub attachments_errored: usize,
}

impl CycleSummary {
    pub fn record(&mut self, report: &BundleReport) {
        match report.destination {
            Destination::Success => self.routed_success += 1,
            Destination::Failure => self.routed_failure += 1,
            Destination::Duplicate => self.routed_duplicate += 1,
        }
        self.attachments_completed += report.completed();
        self.attachments_failed += report.failed();
        self.attachments_duplicate += report.duplicates();
        self.attachments_errored += report.errored();
    }

    pub fn bundles_processed(&self) -> usize {
        self.routed_success + self.routed_failure + self.routed_duplicate
    }
}

pub struct IngestionWorker<T: MessageTransport> {
    orchestrator: IngestionOrchestrator,
    transport: T,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<T: MessageTransport> IngestionWorker<T> {
    pub fn new(
        orchestrator: IngestionOrchestrator,
        transport: T,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            transport,
            poll_interval,
            shutdown,
        }
    }

    pub fn orchestrator(&self) -> &IngestionOrchestrator {
        &self.orchestrator
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One cycle. A transport failure while connecting or fetching fails
    /// the whole cycle; a failure on one bundle is logged and the cycle
    /// moves on to the next.
    pub async fn run_once(&mut self) -> Result<CycleSummary, TransportError> {
        let span = info_span!("ingestion_cycle");
        async {
            self.transport.connect().await?;

            let bundles = match self.transport.fetch_unprocessed_bundles().await {
                Ok(bundles) => bundles,
                Err(e) => {
                    self.disconnect().await;
                    return Err(e);
                }
            };

            let mut summary = CycleSummary {
                bundles_fetched: bundles.len(),
                ..CycleSummary::default()
            };
            info!(count = bundles.len(), "Processing bundles");

            for bundle in &bundles {
                if self.shutdown_requested() {
                    info!("Shutdown requested, leaving remaining bundles for the next run");
                    break;
                }
                match self
                    .orchestrator
                    .process_bundle(&mut self.transport, bundle)
                    .await
                {
                    Ok(report) => summary.record(&report),
                    Err(e) => {
                        error!(uid = bundle.handle.uid, error = %e, "Bundle failed");
                        summary.bundle_errors += 1;
                    }
                }
            }

            self.disconnect().await;
            info!(
                fetched = summary.bundles_fetched,
                success = summary.routed_success,
                failure = summary.routed_failure,
                duplicate = summary.routed_duplicate,
                errors = summary.bundle_errors,
                "Cycle complete"
            );
            Ok::<_, TransportError>(summary)
        }
        .instrument(span)
        .await
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Error disconnecting from transport");
        }
    }

    /// Runs cycles every poll interval until the shutdown signal flips.
    /// Cycle errors are logged and retried on the next interval.
    pub async fn run_continuous(&mut self) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting continuous ingestion"
        );

        loop {
            if self.shutdown_requested() {
                break;
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Ingestion cycle failed, retrying next interval");
            }

            // A dropped sender can never signal shutdown, so only the
            // sleep branch stays live in that case.
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                Ok(()) = self.shutdown.changed() => {}
            }
        }

        info!("Ingestion worker stopped");
    }
}
