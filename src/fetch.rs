//! Resilient keyset extraction from the upstream source.
//!
//! Batches walk the relation in ascending id order. Transient source errors
//! halve the batch size (never below the floor, never growing back) and
//! retry the same cursor position after an exponential backoff; fatal errors
//! propagate untouched. Every successful batch is flushed to the snapshot
//! before the cursor advances, so an interrupted run keeps everything but
//! the batch in flight.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::snapshot::{Listing, SnapshotError, SnapshotWriter};
use crate::source::{RowSource, SourceError};

/// Progress lines roughly every this many rows, matching the cadence the
/// ingestion has always reported at.
const PROGRESS_EVERY: u64 = 250;

/// Errors terminating a fetch run.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("retries exhausted after {attempts} failed attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: SourceError,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Immutable retry knobs for one extraction run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_sleep: Duration,
    pub backoff_multiplier: f64,
    pub min_batch_size: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 8,
            base_sleep: Duration::from_millis(750),
            backoff_multiplier: 2.0,
            min_batch_size: 5,
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry attempt `attempt` (1-based):
    /// `base_sleep * backoff_multiplier^(attempt-1)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_sleep
            .mul_f64(self.backoff_multiplier.powi(exponent as i32))
    }
}

/// Keyset cursor for one run.
///
/// `last_key` only ever moves forward; a key observed here is never
/// requested again, which is what rules out duplicated or skipped rows
/// across retries.
#[derive(Debug)]
pub struct FetchCursor {
    pub last_key: Option<i64>,
    pub batch_size: u32,
    pub attempt: u32,
}

impl FetchCursor {
    #[must_use]
    pub fn new(batch_size: u32) -> Self {
        Self {
            last_key: None,
            batch_size,
            attempt: 0,
        }
    }
}

/// Counters for one completed extraction run.
#[derive(Debug, Default, Clone)]
pub struct FetchReport {
    pub rows_fetched: u64,
    pub batches: u32,
    pub transient_retries: u32,
    pub final_batch_size: u32,
    /// The source ran out of rows before the target was met.
    pub exhausted: bool,
}

/// Orchestrates one resilient extraction run.
pub struct Fetcher {
    initial_batch_size: u32,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(initial_batch_size: u32, policy: RetryPolicy) -> Self {
        Self {
            initial_batch_size,
            policy,
        }
    }

    /// Pull up to `target_rows` rows from `source`, appending every batch to
    /// `writer` as soon as it arrives.
    ///
    /// Stops early without error when the source is exhausted. On a fatal
    /// error the batches already flushed to `writer` remain on disk, but the
    /// run as a whole is reported failed.
    pub fn run(
        &self,
        source: &mut dyn RowSource,
        writer: &mut SnapshotWriter,
        target_rows: u64,
    ) -> Result<FetchReport, FetchError> {
        let mut cursor = FetchCursor::new(self.initial_batch_size.max(1));
        let mut report = FetchReport {
            final_batch_size: cursor.batch_size,
            ..FetchReport::default()
        };
        let mut next_progress = PROGRESS_EVERY;

        while report.rows_fetched < target_rows {
            let remaining = target_rows - report.rows_fetched;
            let take = u64::from(cursor.batch_size).min(remaining) as u32;

            let batch = match source.fetch_batch(cursor.last_key, take) {
                Ok(batch) => batch,
                Err(err) if err.is_transient() => {
                    cursor.attempt += 1;
                    cursor.batch_size = (cursor.batch_size / 2).max(self.policy.min_batch_size);
                    report.transient_retries += 1;

                    if cursor.attempt >= self.policy.max_retries {
                        return Err(FetchError::RetriesExhausted {
                            attempts: cursor.attempt,
                            last: err,
                        });
                    }

                    let delay = self.policy.delay_for(cursor.attempt);
                    warn!(
                        "Transient source error (attempt {}/{}): {err}; retrying in {:?} with batch size {}",
                        cursor.attempt, self.policy.max_retries, delay, cursor.batch_size
                    );
                    std::thread::sleep(delay);
                    continue;
                }
                Err(err) => return Err(FetchError::Source(err)),
            };

            cursor.attempt = 0;

            if batch.is_empty() {
                info!("Source exhausted after {} rows", report.rows_fetched);
                report.exhausted = true;
                break;
            }

            validate_batch_order(&batch, cursor.last_key)?;

            writer.append(&batch)?;
            report.rows_fetched += batch.len() as u64;
            report.batches += 1;
            if let Some(last) = batch.last() {
                cursor.last_key = Some(last.id);
            }

            if report.rows_fetched >= next_progress {
                info!("Fetched {} / {} rows", report.rows_fetched, target_rows);
                next_progress = report.rows_fetched + PROGRESS_EVERY;
            }
        }

        report.final_batch_size = cursor.batch_size;
        info!(
            "Extraction finished: {} rows in {} batches ({} transient retries)",
            report.rows_fetched, report.batches, report.transient_retries
        );
        Ok(report)
    }
}

/// Every key must strictly exceed the cursor position and its predecessors
/// within the batch; anything else means the upstream ordering contract is
/// broken and continuing would duplicate or skip rows.
fn validate_batch_order(batch: &[Listing], last_key: Option<i64>) -> Result<(), SourceError> {
    let mut prev = last_key;
    for listing in batch {
        if let Some(prev) = prev {
            if listing.id <= prev {
                return Err(SourceError::OutOfOrderKey {
                    last: prev,
                    got: listing.id,
                });
            }
        }
        prev = Some(listing.id);
    }
    Ok(())
}
