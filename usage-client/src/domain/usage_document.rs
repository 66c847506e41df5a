use std::ops::Range;

use time::OffsetDateTime;

use super::Record;

/// Metadata shared by every record of one export document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesMeta {
    /// Measurement unit, e.g. "WH".
    pub unit: String,
    /// Bucket width, e.g. "Days".
    pub resolution: String,
    /// Market segment of the connection the export belongs to, when the
    /// provider attached one ("ELECTRICITY", "GAS").
    pub market: Option<String>,
}

/// A decoded export: sequence metadata plus time-ordered records.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageDocument {
    pub meta: SeriesMeta,
    pub records: Vec<Record>,
}

impl UsageDocument {
    pub fn new(meta: SeriesMeta, records: Vec<Record>) -> Self {
        Self { meta, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sub-document holding only `range` of the records, e.g. to resubmit the
    /// part of a run that failed. Out-of-bounds ends are clamped.
    pub fn slice(&self, range: Range<usize>) -> UsageDocument {
        let end = range.end.min(self.records.len());
        let start = range.start.min(end);
        UsageDocument {
            meta: self.meta.clone(),
            records: self.records[start..end].to_vec(),
        }
    }

    /// First and last bucket start, if there are any records.
    pub fn time_span(&self) -> Option<(OffsetDateTime, OffsetDateTime)> {
        let first = self.records.first()?.time();
        let last = self.records.last()?.time();
        Some((first, last))
    }
}
