use std::ops::Range;

/// A batch that could not be delivered to the time-series destination.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error(
    "batch {batch} (records {}..{}) failed after {attempts} attempt(s): {reason}; the batch is safe to retry",
    .range.start,
    .range.end
)]
pub struct SinkError {
    pub batch: usize,
    pub range: Range<usize>,
    pub attempts: u32,
    pub reason: String,
}

/// Local failure while producing serialised output. Aborts the write.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("failed to serialise document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    Written,
    Failed(SinkError),
    /// Never started because the run was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub index: usize,
    /// Record indices covered by this batch, in document order.
    pub range: Range<usize>,
    pub status: BatchStatus,
    /// blake3 hex digest of the bytes submitted, when the batch was encoded.
    /// Resubmitting the same records yields the same digest.
    pub payload_digest: Option<String>,
}

impl BatchReport {
    pub fn skipped(index: usize, range: Range<usize>) -> Self {
        Self {
            index,
            range,
            status: BatchStatus::Skipped,
            payload_digest: None,
        }
    }
}

/// Outcome of one `Sink::write`, batch by batch in batch order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteReport {
    pub records: usize,
    pub batches: Vec<BatchReport>,
}

impl WriteReport {
    /// True when every batch was written.
    pub fn is_complete(&self) -> bool {
        self.batches.iter().all(|b| b.status == BatchStatus::Written)
    }

    pub fn unwritten_batches(&self) -> usize {
        self.batches.iter().filter(|b| b.status != BatchStatus::Written).count()
    }

    pub fn written_records(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Written)
            .map(|b| b.range.len())
            .sum()
    }

    pub fn failed(&self) -> impl Iterator<Item = &SinkError> {
        self.batches.iter().filter_map(|b| match &b.status {
            BatchStatus::Failed(e) => Some(e),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|b| b.status == BatchStatus::Skipped)
    }

    /// Record ranges that still need to reach the destination, failed and
    /// skipped alike, in document order.
    pub fn retry_ranges(&self) -> Vec<Range<usize>> {
        self.batches
            .iter()
            .filter(|b| b.status != BatchStatus::Written)
            .map(|b| b.range.clone())
            .collect()
    }
}
