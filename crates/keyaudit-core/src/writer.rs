//! Rate-limited write path: batched deletes and single-item updates.

use tracing::{debug, warn};

use crate::backend::{TableBackend, UpdateOutcome, UpdateRequest};
use crate::error::BackendError;
use crate::rate_limiter::RateLimiter;
use crate::types::{MAX_BATCH_WRITE_SIZE, PrimaryKey};

/// Collects deletes and sends them in batches of at most 25.
///
/// Each writer owns its rate limiter and is used by a single worker. Keys the
/// backend leaves unprocessed are logged and dropped; a later run picks the
/// items up again.
pub struct TableWriter<'a> {
    backend: &'a dyn TableBackend,
    table_name: &'a str,
    rate_limiter: RateLimiter,
    pending: Vec<PrimaryKey>,
    unprocessed_total: u64,
}

impl<'a> TableWriter<'a> {
    pub fn new(backend: &'a dyn TableBackend, table_name: &'a str, rate_limiter: RateLimiter) -> Self {
        Self {
            backend,
            table_name,
            rate_limiter,
            pending: Vec::with_capacity(MAX_BATCH_WRITE_SIZE),
            unprocessed_total: 0,
        }
    }

    /// Queue a delete. Reaching the batch cap flushes immediately.
    ///
    /// Returns the number of deletes the backend accepted by this call (0
    /// unless a flush happened).
    pub fn add_delete(&mut self, key: PrimaryKey) -> Result<u64, BackendError> {
        self.pending.push(key);
        if self.pending.len() >= MAX_BATCH_WRITE_SIZE {
            self.flush()
        } else {
            Ok(0)
        }
    }

    /// Send all queued deletes in one batch.
    ///
    /// Returns the number accepted: batch size minus unprocessed keys.
    pub fn flush(&mut self) -> Result<u64, BackendError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.pending);
        let outcome = self.backend.batch_delete(self.table_name, &batch)?;
        if let Some(units) = outcome.consumed_capacity {
            self.rate_limiter.consume(units);
        }

        let unprocessed = outcome.unprocessed.len();
        if unprocessed > 0 {
            self.unprocessed_total += unprocessed as u64;
            warn!(
                table = self.table_name,
                unprocessed,
                keys = ?outcome.unprocessed,
                "batch delete left items unprocessed; they will not be retried in this run"
            );
        }
        let accepted = batch.len().saturating_sub(unprocessed) as u64;
        debug!(table = self.table_name, accepted, "flushed batch delete");
        Ok(accepted)
    }

    /// Apply a single-item update and pay for its consumed capacity.
    pub fn update(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, BackendError> {
        let outcome = self.backend.update_item(request)?;
        if let UpdateOutcome::Applied {
            consumed_capacity: Some(units),
        } = outcome
        {
            self.rate_limiter.consume(units);
        }
        Ok(outcome)
    }

    /// Deletes queued but not yet sent.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Keys the backend declined across all flushes so far.
    pub fn unprocessed_total(&self) -> u64 {
        self.unprocessed_total
    }
}
