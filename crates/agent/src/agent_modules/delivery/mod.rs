//! Delivery of record batches to the sink with bounded retries and an in-memory backlog.
pub mod backlog;
pub mod backoff;
pub mod influx;

pub use backlog::{Backlog, DEFAULT_BACKLOG_CAPACITY};
pub use backoff::RetryPolicy;
pub use influx::InfluxWriter;

use crate::agent_modules::error::WriteError;
use crate::agent_modules::shutdown::{ShutdownReceiver, sleep_or_shutdown};
use async_trait::async_trait;
use envflux_common::Record;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Writes a whole batch atomically: either every record lands or the call fails.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    async fn write(&self, batch: &[Record]) -> Result<(), WriteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing new and nothing queued.
    Empty,
    Delivered { records: usize, attempts: u32 },
    /// Every attempt failed; the batch went back to the backlog.
    Queued { backlog_len: usize },
    /// Shutdown interrupted a backoff wait; the batch went back to the backlog.
    Cancelled { backlog_len: usize },
}

pub struct RetryingSink<W> {
    writer: W,
    policy: RetryPolicy,
    backlog: Mutex<Backlog>,
}

impl<W: RecordWriter> RetryingSink<W> {
    pub fn new(writer: W, policy: RetryPolicy, backlog: Backlog) -> Self {
        Self {
            writer,
            policy,
            backlog: Mutex::new(backlog),
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog().len()
    }

    pub fn backlog_snapshot(&self) -> Vec<Record> {
        self.backlog().iter().cloned().collect()
    }

    fn backlog(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requeue(&self, combined: Vec<Record>) -> usize {
        let mut backlog = self.backlog();
        backlog.add_points(combined);
        backlog.len()
    }

    /// Delivers the backlog followed by `new_records` as one batch.
    ///
    /// Sink failures never escape: after the last attempt, or when shutdown cuts a
    /// backoff short, the whole combined batch is queued again.
    pub async fn deliver(
        &self,
        new_records: Vec<Record>,
        shutdown_rx: &mut ShutdownReceiver,
    ) -> DeliveryOutcome {
        let mut combined = self.backlog().drain_all();
        combined.extend(new_records);

        if combined.is_empty() {
            return DeliveryOutcome::Empty;
        }
        debug!(records = combined.len(), "Attempting to write records.");

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.writer.write(&combined).await {
                Ok(()) => {
                    debug!(records = combined.len(), attempt, "Write successful.");
                    return DeliveryOutcome::Delivered {
                        records: combined.len(),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    info!(attempt, max_attempts, error = %e, "Write attempt failed.");
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                info!(delay_seconds = delay.as_secs_f64(), "Retrying write.");
                if !sleep_or_shutdown(delay, shutdown_rx).await {
                    let backlog_len = self.requeue(combined);
                    warn!(backlog_len, "Shutdown during retry backoff. Records kept in backlog.");
                    return DeliveryOutcome::Cancelled { backlog_len };
                }
            }
        }

        let records = combined.len();
        let backlog_len = self.requeue(combined);
        error!(records, backlog_len, "All retries failed. Queuing records for later.");
        DeliveryOutcome::Queued { backlog_len }
    }
}
