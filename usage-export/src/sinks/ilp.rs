use std::{net::SocketAddr, time::Duration};

use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use usage_client::domain::{Record, SeriesMeta};

/// Escape tag keys, tag values and field keys for ILP.
///
/// ILP requires escaping commas, spaces and equals with a backslash. The
/// backslash itself is doubled so a trailing one cannot swallow the next
/// separator. Line breaks cannot be escaped at all; `Record` and the decoder
/// keep them out of labels.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

/// Measurement names only need commas, spaces and backslashes escaped.
fn ilp_escape_measurement(s: &str, out: &mut String) {
    for ch in s.chars() {
        if matches!(ch, ',' | ' ' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    ilp_escape_ident(key, out);
    out.push('=');
    // f64 Display never uses exponent notation, and a value without the `i`
    // suffix is read back as a double.
    out.push_str(&value.to_string());
}

fn ts_to_unix_nanos(ts: OffsetDateTime) -> i128 {
    ts.unix_timestamp_nanos()
}

/// Append one ILP line (without trailing newline) for `record`.
///
/// Tags are written in key order: `market` (when known), `resolution`, `tag`,
/// `unit`. Nothing derived from wall-clock time or a counter is added, so the
/// same record always produces the same line and the destination's
/// (measurement, tags, timestamp) key dedupes resubmissions.
pub fn write_ilp_line(out: &mut String, measurement: &str, meta: &SeriesMeta, record: &Record) {
    ilp_escape_measurement(measurement, out);

    if let Some(market) = &meta.market {
        push_tag(out, "market", market);
    }
    push_tag(out, "resolution", &meta.resolution);
    push_tag(out, "tag", record.tag());
    push_tag(out, "unit", &meta.unit);

    out.push(' ');
    let mut first = true;
    for (name, value) in record.fields().iter() {
        push_field_f64(out, &mut first, name, value);
    }

    out.push(' ');
    out.push_str(&ts_to_unix_nanos(record.time()).to_string());
}

/// Encode a run of records as newline-terminated ILP lines.
pub fn encode_batch(measurement: &str, meta: &SeriesMeta, records: &[Record]) -> Vec<u8> {
    // Heuristic capacity: ~160 bytes per line.
    let mut s = String::with_capacity(records.len().saturating_mul(160));
    for record in records {
        write_ilp_line(&mut s, measurement, meta, record);
        s.push('\n');
    }
    s.into_bytes()
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },
    #[error("ilp write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("{0}")]
    Rejected(String),
    #[error("http request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("invalid write url {0}")]
    InvalidUrl(String),
}

/// Delivers one encoded batch to the destination as a self-contained request.
#[async_trait::async_trait]
pub trait LineTransport: Send + Sync {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;
}

/// ILP over raw TCP, as accepted by QuestDB on port 9009. InfluxDB 2.x has no
/// TCP listener; use `HttpLineTransport` for it. Every batch gets its own
/// connection so batches never share state and can be written concurrently.
pub struct IlpTcpTransport {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl IlpTcpTransport {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self { addr, connect_timeout }
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: self.addr,
                timeout: self.connect_timeout,
            })?
            .map_err(|source| TransportError::Connect { addr: self.addr, source })?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

#[async_trait::async_trait]
impl LineTransport for IlpTcpTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let mut stream = self.connect().await?;
        stream.write_all(payload).await.map_err(TransportError::Write)?;
        stream.flush().await.map_err(TransportError::Write)?;
        stream.shutdown().await.map_err(TransportError::Write)?;
        metrics::counter!("ilp_bytes_total").increment(payload.len() as u64);
        Ok(())
    }
}
