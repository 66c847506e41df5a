pub mod config;
pub mod decode;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;

pub use decode::{decode, decode_str, SchemaError};
pub use pipeline::{Envelope, Pipeline, PipelineFailure, PipelineResult, Sink};
