use std::{
    ops::Range,
    time::{Duration, Instant},
};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use usage_client::domain::UsageDocument;

use super::{
    ilp::{self, LineTransport},
    BatchReport, BatchStatus, OutputError, SinkError, WriteReport,
};
use crate::pipeline::Sink;

pub const DEFAULT_MEASUREMENT: &str = "energy";
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Split `len` records into contiguous ranges of at most `batch_size`,
/// in order. A zero `batch_size` is treated as one.
pub fn plan_batches(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    (0..len).step_by(size).map(|start| start..(start + size).min(len)).collect()
}

/// Writes records as ILP points, `batch_size` points per request and at most
/// `workers` requests in flight.
pub struct TimeSeriesWriter<T> {
    transport: T,
    measurement: String,
    batch_size: usize,
    workers: usize,
    max_retries: u32,
    retry_backoff: Duration,
}

impl<T> TimeSeriesWriter<T> {
    pub fn new(
        transport: T,
        measurement: impl Into<String>,
        batch_size: usize,
        workers: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            transport,
            measurement: measurement.into(),
            batch_size: batch_size.max(1),
            workers: workers.max(1),
            max_retries,
            retry_backoff,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T> TimeSeriesWriter<T>
where
    T: LineTransport,
{
    async fn submit(
        &self,
        document: &UsageDocument,
        index: usize,
        range: Range<usize>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        if cancel.is_cancelled() {
            metrics::counter!("sink_batches_skipped_total").increment(1);
            return BatchReport::skipped(index, range);
        }

        let payload = ilp::encode_batch(&self.measurement, &document.meta, &document.records[range.clone()]);
        let digest = blake3::hash(&payload).to_hex().to_string();
        let started = Instant::now();

        let mut attempt: u32 = 0;
        let status = loop {
            attempt += 1;
            match self.transport.send(&payload).await {
                Ok(()) => {
                    metrics::counter!("sink_written_records_total", "sink" => "timeseries")
                        .increment(range.len() as u64);
                    metrics::histogram!("sink_batch_seconds").record(started.elapsed().as_secs_f64());
                    tracing::debug!(batch = index, records = range.len(), attempt, "batch written");
                    break BatchStatus::Written;
                }
                Err(e) => {
                    // A retry is a new submission, so none are started once cancelled.
                    if attempt <= self.max_retries && !cancel.is_cancelled() {
                        let sleep_for = self.retry_backoff * attempt;
                        tracing::warn!(
                            error = %e,
                            batch = index,
                            attempt,
                            "batch write failed, retrying with backoff"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(sleep_for) => {}
                            _ = cancel.cancelled() => {}
                        }
                        if !cancel.is_cancelled() {
                            metrics::counter!("sink_retry_total").increment(1);
                            continue;
                        }
                        tracing::warn!(batch = index, attempt, "cancelled during backoff, not retrying");
                    } else {
                        tracing::error!(error = %e, batch = index, attempt, "batch write failed, giving up");
                    }
                    metrics::counter!("sink_batches_failed_total").increment(1);
                    break BatchStatus::Failed(SinkError {
                        batch: index,
                        range: range.clone(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        };

        BatchReport {
            index,
            range,
            status,
            payload_digest: Some(digest),
        }
    }
}

#[async_trait::async_trait]
impl<T> Sink for TimeSeriesWriter<T>
where
    T: LineTransport,
{
    fn name(&self) -> &'static str {
        "timeseries"
    }

    async fn write(&self, document: &UsageDocument, cancel: &CancellationToken) -> Result<WriteReport, OutputError> {
        let plan = plan_batches(document.len(), self.batch_size);
        tracing::debug!(
            measurement = %self.measurement,
            batches = plan.len(),
            workers = self.workers,
            "submitting batches"
        );

        let mut batches: Vec<BatchReport> = futures::stream::iter(plan.into_iter().enumerate())
            .map(|(index, range)| self.submit(document, index, range, cancel))
            .buffer_unordered(self.workers)
            .collect()
            .await;
        batches.sort_by_key(|b| b.index);

        Ok(WriteReport {
            records: document.len(),
            batches,
        })
    }
}
