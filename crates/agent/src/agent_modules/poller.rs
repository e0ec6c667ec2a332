use crate::agent_modules::credentials::{CredentialStore, DeviceSession};
use crate::agent_modules::delivery::{DeliveryOutcome, RecordWriter, RetryingSink};
use crate::agent_modules::envoy::SnapshotSource;
use crate::agent_modules::error::PollError;
use crate::agent_modules::points::generate_records;
use crate::agent_modules::shutdown::{ShutdownReceiver, sleep_or_shutdown};
use crate::agent_modules::tracker::UpdateTracker;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivery(DeliveryOutcome),
    /// No sink configured; records were only logged.
    DryRun { records: usize },
}

/// Drives one credential refresh, fetch, filter and delivery per interval.
/// Cycles never overlap.
pub struct Poller<S, W> {
    credentials: CredentialStore<S>,
    tracker: UpdateTracker,
    sink: Option<RetryingSink<W>>,
    poll_interval: Duration,
}

impl<S, W> Poller<S, W>
where
    S: DeviceSession + SnapshotSource,
    W: RecordWriter,
{
    pub fn new(
        credentials: CredentialStore<S>,
        sink: Option<RetryingSink<W>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            credentials,
            tracker: UpdateTracker::new(),
            sink,
            poll_interval,
        }
    }

    pub fn credentials(&self) -> &CredentialStore<S> {
        &self.credentials
    }

    pub fn tracker(&self) -> &UpdateTracker {
        &self.tracker
    }

    pub fn sink(&self) -> Option<&RetryingSink<W>> {
        self.sink.as_ref()
    }

    pub async fn poll_once(
        &mut self,
        shutdown_rx: &mut ShutdownReceiver,
    ) -> Result<CycleOutcome, PollError> {
        // A failed refresh is logged by the store; the current token may still work.
        self.credentials.refresh_if_needed().await;

        let snapshot = self.credentials.session().fetch_snapshot().await?;
        let records = generate_records(&snapshot, &self.tracker, Utc::now());
        for record in &records {
            debug!(point = %record.to_line_protocol(), "Generated record.");
        }

        match &self.sink {
            Some(sink) => Ok(CycleOutcome::Delivery(
                sink.deliver(records, shutdown_rx).await,
            )),
            None => Ok(CycleOutcome::DryRun {
                records: records.len(),
            }),
        }
    }

    /// Polls until shutdown is signalled. Cycle failures are logged and skipped.
    pub async fn run(&mut self, mut shutdown_rx: ShutdownReceiver) {
        info!(interval_seconds = self.poll_interval.as_secs(), "Starting main loop.");
        loop {
            match self.poll_once(&mut shutdown_rx).await {
                Ok(CycleOutcome::Delivery(DeliveryOutcome::Cancelled { .. })) => break,
                Ok(outcome) => debug!(?outcome, "Poll cycle finished."),
                Err(e) => error!(error = %e, "Failed to fetch or process data from Envoy."),
            }

            if !sleep_or_shutdown(self.poll_interval, &mut shutdown_rx).await {
                break;
            }
        }

        let backlog_len = self.sink.as_ref().map_or(0, RetryingSink::backlog_len);
        info!(backlog_len, "Main loop stopped.");
    }
}
