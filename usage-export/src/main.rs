use anyhow::{bail, Result};
use std::env;
use tokio_util::sync::CancellationToken;
use usage_client::domain::UsageDocument;
use usage_export::{
    config::{AppConfig, SinkKind},
    metrics_server, observability,
    pipeline::{Pipeline, Sink},
    sinks::{HttpLineTransport, IlpTcpTransport, OutputError, Printer, TimeSeriesWriter, WriteReport},
    sources::ExportFileSource,
};

enum ExportSink {
    Print(Printer<tokio::io::Stdout>),
    Ilp(TimeSeriesWriter<IlpTcpTransport>),
    Http(TimeSeriesWriter<HttpLineTransport>),
}

#[async_trait::async_trait]
impl Sink for ExportSink {
    fn name(&self) -> &'static str {
        match self {
            Self::Print(s) => s.name(),
            Self::Ilp(s) => s.name(),
            Self::Http(s) => s.name(),
        }
    }

    async fn write(&self, document: &UsageDocument, cancel: &CancellationToken) -> Result<WriteReport, OutputError> {
        match self {
            Self::Print(s) => s.write(document, cancel).await,
            Self::Ilp(s) => s.write(document, cancel).await,
            Self::Http(s) => s.write(document, cancel).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: usage-export <export.json | ->");
    }

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let sink = match cfg.sink.kind {
        SinkKind::Print => ExportSink::Print(Printer::stdout(cfg.printer.pretty)),
        SinkKind::Ilp => ExportSink::Ilp(TimeSeriesWriter::new(
            IlpTcpTransport::new(cfg.questdb.ilp_addr()?, cfg.questdb.connect_timeout()),
            cfg.questdb.measurement.clone(),
            cfg.sink.batch_size,
            cfg.sink.workers,
            cfg.sink.max_retries,
            cfg.sink.retry_backoff(),
        )),
        SinkKind::Http => ExportSink::Http(TimeSeriesWriter::new(
            HttpLineTransport::new(
                &cfg.influxdb.url,
                &cfg.influxdb.org,
                &cfg.influxdb.bucket,
                cfg.influxdb.token.clone(),
                cfg.influxdb.request_timeout(),
            )?,
            cfg.questdb.measurement.clone(),
            cfg.sink.batch_size,
            cfg.sink.workers,
            cfg.sink.max_retries,
            cfg.sink.retry_backoff(),
        )),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, letting in-flight batches finish");
            ctrl_c.cancel();
        }
    });

    let pipeline = Pipeline::new(sink, cancel);
    let summary = pipeline.drain(&ExportFileSource::new(&args[1])).await;

    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        not_started = summary.not_started,
        "export finished"
    );

    if !summary.is_success() {
        bail!(
            "{} export(s) failed and {} were not started; failed batches are safe to resubmit",
            summary.failed,
            summary.not_started
        );
    }

    Ok(())
}
