use std::{ops::Range, pin::Pin, time::SystemTime};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use usage_client::domain::UsageDocument;

use crate::{
    decode::{self, SchemaError},
    sinks::{OutputError, WriteReport},
};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

/// Failures of the collaborators around the core, e.g. reading the export.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
}

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;
}

/// Output target for a decoded document.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    /// Write every record of `document`. Batches not yet started when `cancel`
    /// fires are reported as skipped.
    async fn write(&self, document: &UsageDocument, cancel: &CancellationToken) -> Result<WriteReport, OutputError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub records: usize,
    pub batches: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineFailure {
    #[error("export rejected: {0}")]
    Schema(#[from] SchemaError),
    #[error("{source}")]
    Output { records: usize, source: OutputError },
    #[error(
        "{} of {} batches not written ({} failed, {} skipped)",
        .0.unwritten_batches(),
        .0.batches.len(),
        .0.failed().count(),
        .0.skipped().count()
    )]
    Incomplete(WriteReport),
}

impl PipelineFailure {
    /// Whether resubmitting the same document can succeed. A rejected
    /// document stays rejected.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Schema(_))
    }

    /// Record ranges a retry has to resubmit; empty when retrying is
    /// pointless.
    pub fn retry_ranges(&self) -> Vec<Range<usize>> {
        match self {
            Self::Schema(_) => Vec::new(),
            Self::Output { records, .. } => vec![0..*records],
            Self::Incomplete(report) => report.retry_ranges(),
        }
    }
}

pub type PipelineResult = Result<RunSummary, PipelineFailure>;

/// Totals of a `Pipeline::drain` over a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Documents the source yielded after cancellation; never written.
    pub not_started: usize,
}

impl DrainSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_started == 0
    }
}

pub struct Pipeline<K> {
    pub sink: K,
    pub cancel: CancellationToken,
}

impl<K> Pipeline<K>
where
    K: Sink,
{
    pub fn new(sink: K, cancel: CancellationToken) -> Self {
        Self { sink, cancel }
    }

    /// Decode `document` and hand it to the sink exactly once.
    ///
    /// A schema error ends the run before the sink is touched.
    pub async fn run(&self, document: &Value) -> PipelineResult {
        let decoded = decode::decode(document)?;
        self.run_document(&decoded).await
    }

    /// Write an already decoded document, e.g. a `UsageDocument::slice` of a
    /// previous run's failed ranges.
    pub async fn run_document(&self, document: &UsageDocument) -> PipelineResult {
        let sink = self.sink.name();
        let (first, last) = document.time_span().unzip();
        tracing::info!(
            sink,
            records = document.len(),
            unit = %document.meta.unit,
            resolution = %document.meta.resolution,
            first = ?first,
            last = ?last,
            "writing export"
        );

        let report = match self.sink.write(document, &self.cancel).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(sink, error = %e, "output failed");
                return Err(PipelineFailure::Output {
                    records: document.len(),
                    source: e,
                });
            }
        };

        if !report.is_complete() {
            for e in report.failed() {
                tracing::error!(sink, error = %e, "batch failed");
            }
            let skipped = report.skipped().count();
            if skipped > 0 {
                tracing::warn!(sink, skipped, "batches skipped after cancellation");
            }
            return Err(PipelineFailure::Incomplete(report));
        }

        tracing::info!(sink, records = report.records, batches = report.batches.len(), "export written");
        Ok(RunSummary {
            records: report.records,
            batches: report.batches.len(),
        })
    }

    /// Run every document `source` yields, one after another.
    ///
    /// Source errors and per-document failures are logged and counted; they do
    /// not stop the remaining documents. After cancellation the remaining
    /// documents are counted but not written.
    pub async fn drain<S>(&self, source: &S) -> DrainSummary
    where
        S: Source<Value> + ?Sized,
    {
        let mut stream = source.stream().await;
        let mut summary = DrainSummary::default();

        while let Some(item) = stream.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in export source");
                    summary.failed += 1;
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                summary.not_started += 1;
                continue;
            }

            match self.run(&env.payload).await {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    tracing::error!(error = %e, retryable = e.is_retryable(), "export run failed");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
