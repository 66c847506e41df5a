use serde::{ser::SerializeMap, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use usage_client::domain::{Record, UsageDocument};

use super::{BatchReport, BatchStatus, OutputError, WriteReport};
use crate::pipeline::Sink;

/// Serialises a document back into the export's own JSON shape.
struct WireDocument<'a>(&'a UsageDocument);

struct WireValues<'a>(&'a [Record]);

struct WireRecord<'a>(&'a Record);

impl Serialize for WireDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let meta = &self.0.meta;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("unit", &meta.unit)?;
        map.serialize_entry("resolution", &meta.resolution)?;
        if let Some(market) = &meta.market {
            map.serialize_entry("market", market)?;
        }
        map.serialize_entry("values", &WireValues(&self.0.records))?;
        map.end()
    }
}

impl Serialize for WireValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(WireRecord))
    }
}

impl Serialize for WireRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let r = self.0;
        let time = r.time().format(&Rfc3339).map_err(serde::ser::Error::custom)?;

        let mut map = serializer.serialize_map(Some(r.fields().len() + 2))?;
        map.serialize_entry("time", &time)?;
        for (name, value) in r.fields().iter() {
            map.serialize_entry(name, &value)?;
        }
        map.serialize_entry("tag", r.tag())?;
        map.end()
    }
}

/// Render `document` as JSON text. Pretty output uses a four space indent.
pub fn render(document: &UsageDocument, pretty: bool) -> Result<Vec<u8>, serde_json::Error> {
    let wire = WireDocument(document);
    if !pretty {
        return serde_json::to_vec(&wire);
    }

    let mut buf = Vec::with_capacity(document.len().saturating_mul(128));
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    wire.serialize(&mut ser)?;
    Ok(buf)
}

/// Writes each document as JSON, followed by a newline, to `out`.
pub struct Printer<W> {
    out: Mutex<W>,
    pretty: bool,
}

impl<W> Printer<W> {
    pub fn new(out: W, pretty: bool) -> Self {
        Self {
            out: Mutex::new(out),
            pretty,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl Printer<tokio::io::Stdout> {
    pub fn stdout(pretty: bool) -> Self {
        Self::new(tokio::io::stdout(), pretty)
    }
}

#[async_trait::async_trait]
impl<W> Sink for Printer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "printer"
    }

    async fn write(&self, document: &UsageDocument, cancel: &CancellationToken) -> Result<WriteReport, OutputError> {
        let range = 0..document.len();
        if cancel.is_cancelled() {
            return Ok(WriteReport {
                records: document.len(),
                batches: vec![BatchReport::skipped(0, range)],
            });
        }

        let mut payload = render(document, self.pretty)?;
        payload.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&payload).await?;
        out.flush().await?;

        metrics::counter!("sink_written_records_total", "sink" => "printer").increment(document.len() as u64);

        Ok(WriteReport {
            records: document.len(),
            batches: vec![BatchReport {
                index: 0,
                range,
                status: BatchStatus::Written,
                payload_digest: None,
            }],
        })
    }
}
