pub mod http;
pub mod ilp;
pub mod printer;
mod report;
pub mod timeseries;

pub use http::HttpLineTransport;
pub use ilp::{IlpTcpTransport, LineTransport, TransportError};
pub use printer::Printer;
pub use report::{BatchReport, BatchStatus, OutputError, SinkError, WriteReport};
pub use timeseries::{plan_batches, TimeSeriesWriter};
