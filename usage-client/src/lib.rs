pub mod db;
pub mod domain;

pub use domain::{FieldMap, Record, SeriesMeta, UsageDocument};
