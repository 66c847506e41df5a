pub mod usage_queries;

pub use usage_queries::{daily_totals, field_series, DailyTotal, FieldSample, QueryError};
