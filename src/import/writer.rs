//! Resilient batch writer.
//!
//! Collects rows into fixed-size batches and persists each batch through a
//! [`RowSink`] with:
//! - exponential backoff with jitter for rate limits, 5xx responses,
//!   timeouts and connection failures
//! - automatic halving of batches the backend rejects as too large
//! - a fixed pause after every successful flush
//!
//! Only one insert request is ever in flight per writer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use backon::{Backoff, BackoffBuilder, ExponentialBuilder, Retryable};
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{AppError, FailureKind};
use crate::import::progress::{ImportProgress, ProgressObserver};
use crate::import::row::ImportRow;

/// Rows per flush.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Pause after every successful flush.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(200);

/// Upper bound for a single insert request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Traits for Testing
// ─────────────────────────────────────────────────────────────────────────────

/// Persistence seam for imported rows, allowing test fakes.
pub trait RowSink: Send + Sync {
    /// Persists all rows in one request. Either every row is stored or none.
    fn insert_rows<'a>(
        &'a self,
        rows: &'a [ImportRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

impl<S: RowSink + ?Sized> RowSink for Arc<S> {
    fn insert_rows<'a>(
        &'a self,
        rows: &'a [ImportRow],
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        (**self).insert_rows(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff settings for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 6,
            base_delay: Duration::from_millis(400),
            max_jitter: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Random delay in `0..=max_jitter` added to every backoff step.
    pub fn jitter(&self) -> Duration {
        self.max_jitter.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
    }

    /// Delays between attempts: `base * 2^n + jitter` for `n` in
    /// `0..max_retries`.
    pub fn backoff(&self) -> impl Backoff {
        let factor = 1u32.checked_shl(self.max_retries).unwrap_or(u32::MAX);
        let policy = self.clone();

        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.base_delay.saturating_mul(factor))
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
            .build()
            .map(move |delay| delay + policy.jitter())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchWriter
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates rows and flushes them in order, one batch at a time.
pub struct BatchWriter<S: RowSink> {
    sink: S,
    policy: RetryPolicy,
    batch_size: usize,
    inter_batch_delay: Duration,
    request_timeout: Duration,
    observer: Arc<dyn ProgressObserver>,
    pending: Vec<ImportRow>,
    persisted: u64,
}

impl<S: RowSink> BatchWriter<S> {
    pub fn new(sink: S, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            sink,
            policy: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            observer,
            pending: Vec::with_capacity(DEFAULT_BATCH_SIZE),
            persisted: 0,
        }
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }

    pub fn inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Rows acknowledged by the sink so far.
    pub fn persisted(&self) -> u64 {
        self.persisted
    }

    /// Rows collected but not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drops rows that were collected but never flushed.
    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(rows = self.pending.len(), "[BATCH-WRITER] Discarding unflushed rows");
            self.pending.clear();
        }
    }

    /// Adds a row, flushing when the batch reaches its threshold.
    pub async fn push(&mut self, row: ImportRow) -> Result<(), AppError> {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Persists the collected rows, if any, then pauses before returning.
    pub async fn flush(&mut self) -> Result<(), AppError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let mut stored = 0;
        let result = self.insert_with_retry(&batch, &mut stored).await;

        // A split batch may fail after some of its halves were stored
        if stored > 0 {
            self.persisted += stored;
            debug!(
                rows = stored,
                total = self.persisted,
                "[BATCH-WRITER] Batch persisted"
            );
            self.observer
                .on_progress(&ImportProgress::running(self.persisted));
        }
        result?;

        tokio::time::sleep(self.inter_batch_delay).await;
        Ok(())
    }

    /// Persists `rows` with backoff on transient failures and halving on
    /// oversized payloads. Each half gets its own retry budget.
    ///
    /// `stored` grows by the size of every request the sink acknowledged,
    /// including when a later half fails.
    fn insert_with_retry<'a>(
        &'a self,
        rows: &'a [ImportRow],
        stored: &'a mut u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let result = (|| self.insert_once(rows))
                .retry(self.policy.backoff())
                .sleep(tokio::time::sleep)
                .when(|e: &AppError| e.failure_kind() == FailureKind::Retryable)
                .notify(|err: &AppError, delay: Duration| {
                    warn!(
                        rows = rows.len(),
                        max_retries = self.policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "[BATCH-WRITER] Insert failed, retrying: {}",
                        err
                    );
                })
                .await;

            let err = match result {
                Ok(()) => {
                    *stored += rows.len() as u64;
                    return Ok(());
                }
                Err(e) => e,
            };

            if err.failure_kind() == FailureKind::PayloadTooLarge && rows.len() > 1 {
                let mid = rows.len() / 2;
                warn!(
                    rows = rows.len(),
                    "[BATCH-WRITER] Payload too large, splitting into {} + {}",
                    mid,
                    rows.len() - mid
                );
                self.insert_with_retry(&rows[..mid], stored).await?;
                return self.insert_with_retry(&rows[mid..], stored).await;
            }

            warn!(
                rows = rows.len(),
                "[BATCH-WRITER] Insert failed permanently: {}",
                err
            );
            Err(err)
        })
    }

    /// One insert request bounded by the request timeout.
    async fn insert_once(&self, rows: &[ImportRow]) -> Result<(), AppError> {
        match tokio::time::timeout(self.request_timeout, self.sink.insert_rows(rows)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
