use std::collections::{btree_map, BTreeMap};

use time::{OffsetDateTime, UtcOffset};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("field `{field}` is not a finite number ({value})")]
    NonFiniteValue { field: String, value: f64 },
    #[error("record has no numeric fields")]
    EmptyFields,
    #[error("{what} '{value}' is not a usable label: {reason}")]
    InvalidLabel {
        what: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Tags, field names and series metadata end up as line protocol keys and
/// values, which cannot be empty or span lines.
pub fn check_label(what: &'static str, value: &str) -> Result<(), DomainError> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains(['\n', '\r']) {
        "must not contain line breaks"
    } else {
        return Ok(());
    };
    Err(DomainError::InvalidLabel {
        what,
        value: value.to_string(),
        reason,
    })
}

/// Numeric fields of one record, ordered by field name.
///
/// Only finite values are admitted, so anything downstream can format or
/// compare them without special-casing NaN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap(BTreeMap<String, f64>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field. Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Result<Option<f64>, DomainError> {
        let name = name.into();
        check_label("field name", &name)?;
        if !value.is_finite() {
            return Err(DomainError::NonFiniteValue { field: name, value });
        }
        Ok(self.0.insert(name, value))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = (&'a String, &'a f64);
    type IntoIter = btree_map::Iter<'a, String, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl TryFrom<Vec<(&str, f64)>> for FieldMap {
    type Error = DomainError;

    fn try_from(pairs: Vec<(&str, f64)>) -> Result<Self, Self::Error> {
        let mut map = FieldMap::new();
        for (name, value) in pairs {
            map.insert(name, value)?;
        }
        Ok(map)
    }
}

/// One time bucket of usage data.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    time: OffsetDateTime,
    tag: String,
    fields: FieldMap,
}

impl Record {
    /// Build a record. `time` is normalised to UTC.
    pub fn new(time: OffsetDateTime, tag: impl Into<String>, fields: FieldMap) -> Result<Self, DomainError> {
        let tag = tag.into();
        check_label("tag", &tag)?;
        if fields.is_empty() {
            return Err(DomainError::EmptyFields);
        }
        Ok(Self {
            time: time.to_offset(UtcOffset::UTC),
            tag,
            fields,
        })
    }

    /// Bucket start, always UTC.
    pub fn time(&self) -> OffsetDateTime {
        self.time
    }

    /// Provenance label, e.g. "Measured" or "Estimated".
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name)
    }
}
