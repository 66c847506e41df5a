pub mod fields;
mod record;
mod usage_document;

pub use record::{check_label, DomainError, FieldMap, Record};
pub use usage_document::{SeriesMeta, UsageDocument};
