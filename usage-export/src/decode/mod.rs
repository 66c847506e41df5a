use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use usage_client::domain::{check_label, fields::is_known, DomainError, FieldMap, Record, SeriesMeta, UsageDocument};

/// What is wrong with one element of the `values` array.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ElementDefect {
    #[error("element is not an object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` must be a string")]
    NotAString(&'static str),
    #[error("invalid RFC 3339 timestamp '{value}': {reason}")]
    BadTimestamp { value: String, reason: String },
    #[error("field `{field}` is not numeric: {found}")]
    NonNumeric { field: String, found: String },
    #[error("field `{0}` is not a finite number")]
    NonFinite(String),
    #[error("element carries no numeric fields")]
    NoFields,
    #[error("time {current} is earlier than the preceding element's {previous}")]
    OutOfOrder { previous: String, current: String },
    #[error("`{field}` is '{found}' but the document declares '{expected}'")]
    MetadataMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },
    #[error("{what} {value:?} {reason}")]
    InvalidLabel {
        what: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl From<DomainError> for ElementDefect {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NonFiniteValue { field, .. } => Self::NonFinite(field),
            DomainError::EmptyFields => Self::NoFields,
            DomainError::InvalidLabel { what, value, reason } => Self::InvalidLabel { what, value, reason },
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("document is not valid JSON: {0}")]
    Syntax(String),
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("missing top-level field `{0}`")]
    MissingField(&'static str),
    #[error("top-level field `{field}` must be {expected}")]
    WrongShape {
        field: &'static str,
        expected: &'static str,
    },
    #[error("top-level field `{field}` {reason}")]
    InvalidLabel {
        field: &'static str,
        reason: &'static str,
    },
    #[error("values[{index}]: {defect}")]
    Element { index: usize, defect: ElementDefect },
}

impl SchemaError {
    /// Index of the offending `values` element, if the defect is per element.
    pub fn element_index(&self) -> Option<usize> {
        match self {
            Self::Element { index, .. } => Some(*index),
            _ => None,
        }
    }
}

const TIME: &str = "time";
const TAG: &str = "tag";
const UNIT: &str = "unit";
const RESOLUTION: &str = "resolution";
const VALUES: &str = "values";
const MARKET: &str = "market";

/// Parse and decode a document from JSON text.
///
/// `NaN` and `Infinity` are not JSON, and numbers too large for an `f64` are
/// rejected by the parser, so non-finite input surfaces here as `Syntax`.
pub fn decode_str(text: &str) -> Result<UsageDocument, SchemaError> {
    let value: Value = serde_json::from_str(text).map_err(|e| reject(SchemaError::Syntax(e.to_string())))?;
    decode(&value)
}

/// Decode one export document into an ordered record sequence.
///
/// All or nothing: the first defective element fails the whole document.
pub fn decode(document: &Value) -> Result<UsageDocument, SchemaError> {
    decode_inner(document).map_err(reject).map(|doc| {
        metrics::counter!("decode_documents_total").increment(1);
        doc
    })
}

fn reject(e: SchemaError) -> SchemaError {
    metrics::counter!("decode_rejected_total").increment(1);
    tracing::warn!(error = %e, "rejected export document");
    e
}

fn decode_inner(document: &Value) -> Result<UsageDocument, SchemaError> {
    let obj = document.as_object().ok_or(SchemaError::NotAnObject)?;

    let unit = top_level_label(obj, UNIT)?.to_string();
    let resolution = top_level_label(obj, RESOLUTION)?.to_string();
    let market = match obj.get(MARKET) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            label_ok(MARKET, s)?;
            Some(s.clone())
        }
        Some(_) => {
            return Err(SchemaError::WrongShape {
                field: MARKET,
                expected: "a string",
            })
        }
    };
    let values = obj
        .get(VALUES)
        .ok_or(SchemaError::MissingField(VALUES))?
        .as_array()
        .ok_or(SchemaError::WrongShape {
            field: VALUES,
            expected: "an array",
        })?;

    for key in obj.keys() {
        if ![UNIT, RESOLUTION, VALUES, MARKET].contains(&key.as_str()) {
            tracing::debug!(key = %key, "ignoring unknown top-level field");
        }
    }

    let meta = SeriesMeta {
        unit,
        resolution,
        market,
    };

    let mut records = Vec::with_capacity(values.len());
    let mut previous: Option<OffsetDateTime> = None;
    for (index, element) in values.iter().enumerate() {
        let record = decode_element(element, &meta, previous).map_err(|defect| SchemaError::Element { index, defect })?;
        previous = Some(record.time());
        records.push(record);
    }

    Ok(UsageDocument::new(meta, records))
}

fn top_level_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, SchemaError> {
    obj.get(field)
        .ok_or(SchemaError::MissingField(field))?
        .as_str()
        .ok_or(SchemaError::WrongShape {
            field,
            expected: "a string",
        })
}

/// Metadata becomes tag values downstream, so it has to be a usable label.
fn top_level_label<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, SchemaError> {
    let s = top_level_str(obj, field)?;
    label_ok(field, s)?;
    Ok(s)
}

fn label_ok(field: &'static str, value: &str) -> Result<(), SchemaError> {
    check_label(field, value).map_err(|e| match e {
        DomainError::InvalidLabel { reason, .. } => SchemaError::InvalidLabel { field, reason },
        _ => SchemaError::WrongShape {
            field,
            expected: "a string",
        },
    })
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, ElementDefect> {
    obj.get(field)
        .ok_or(ElementDefect::MissingField(field))?
        .as_str()
        .ok_or(ElementDefect::NotAString(field))
}

fn check_meta(obj: &Map<String, Value>, field: &'static str, expected: &str) -> Result<(), ElementDefect> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(s)) if s == expected => Ok(()),
        Some(other) => Err(ElementDefect::MetadataMismatch {
            field,
            expected: expected.to_string(),
            found: match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            },
        }),
    }
}

fn decode_element(
    element: &Value,
    meta: &SeriesMeta,
    previous: Option<OffsetDateTime>,
) -> Result<Record, ElementDefect> {
    let obj = element.as_object().ok_or(ElementDefect::NotAnObject)?;

    let raw_time = required_str(obj, TIME)?;
    let time = OffsetDateTime::parse(raw_time, &Rfc3339).map_err(|e| ElementDefect::BadTimestamp {
        value: raw_time.to_string(),
        reason: e.to_string(),
    })?;
    let tag = required_str(obj, TAG)?;

    check_meta(obj, UNIT, &meta.unit)?;
    check_meta(obj, RESOLUTION, &meta.resolution)?;

    if let Some(prev) = previous {
        // Equal timestamps are a repeated bucket, which is allowed.
        if time < prev {
            return Err(ElementDefect::OutOfOrder {
                previous: format_ts(prev),
                current: raw_time.to_string(),
            });
        }
    }

    let mut fields = FieldMap::new();
    for (name, value) in obj {
        if [TIME, TAG, UNIT, RESOLUTION].contains(&name.as_str()) {
            continue;
        }
        let number = match value {
            Value::Null => continue,
            Value::Number(n) => n.as_f64().ok_or_else(|| ElementDefect::NonFinite(name.clone()))?,
            other => {
                return Err(ElementDefect::NonNumeric {
                    field: name.clone(),
                    found: other.to_string(),
                })
            }
        };
        if !is_known(name) {
            tracing::debug!(field = %name, "keeping unrecognised provider field");
        }
        fields.insert(name.as_str(), number)?;
    }

    Ok(Record::new(time, tag, fields)?)
}

fn format_ts(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;
    use usage_client::domain::fields;

    fn doc_with(values: Value) -> Value {
        json!({ "unit": "WH", "resolution": "Days", "values": values })
    }

    #[test]
    fn decodes_single_measured_day() {
        let doc = decode_str(
            r#"{"unit":"WH","resolution":"Days","values":[{"time":"2022-10-20T00:00:00Z","consumption":9618.0,"production":0.0,"tag":"Measured"}]}"#,
        )
        .unwrap();

        assert_eq!(doc.meta.unit, "WH");
        assert_eq!(doc.meta.resolution, "Days");
        assert_eq!(doc.meta.market, None);
        assert_eq!(doc.len(), 1);

        let r = &doc.records[0];
        assert_eq!(r.time(), datetime!(2022-10-20 00:00:00 UTC));
        assert_eq!(r.tag(), "Measured");
        assert_eq!(r.fields().len(), 2);
        assert_eq!(r.field(fields::CONSUMPTION), Some(9618.0));
        assert_eq!(r.field(fields::PRODUCTION), Some(0.0));
    }

    #[test]
    fn keeps_unrecognised_numeric_fields() {
        let doc = decode(&doc_with(json!([{
            "time": "2022-10-20T00:00:00Z",
            "tag": "Estimated",
            "OOB_Estimated_Consumption": 12.5,
            "someNewProviderField": 3
        }])))
        .unwrap();

        let r = &doc.records[0];
        assert_eq!(r.field(fields::OOB_ESTIMATED_CONSUMPTION), Some(12.5));
        assert_eq!(r.field("someNewProviderField"), Some(3.0));
    }

    #[test]
    fn null_fields_are_treated_as_absent() {
        let doc = decode(&doc_with(json!([{
            "time": "2022-10-20T00:00:00Z",
            "tag": "Measured",
            "consumption": 1.0,
            "consumptionPeak": null
        }])))
        .unwrap();
        assert_eq!(doc.records[0].field(fields::CONSUMPTION_PEAK), None);
        assert_eq!(doc.records[0].fields().len(), 1);
    }

    #[test]
    fn converts_offsets_to_utc() {
        let doc = decode(&doc_with(json!([
            {"time": "2022-10-20T02:00:00+02:00", "tag": "Measured", "consumption": 1.0}
        ])))
        .unwrap();
        assert_eq!(doc.records[0].time(), datetime!(2022-10-20 00:00:00 UTC));
    }

    #[test]
    fn picks_up_market_segment() {
        let mut value = doc_with(json!([{"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": 1.0}]));
        value["market"] = json!("ELECTRICITY");
        assert_eq!(decode(&value).unwrap().meta.market.as_deref(), Some("ELECTRICITY"));
    }

    #[test]
    fn missing_top_level_fields_are_reported_by_name() {
        let res = decode(&json!({"resolution": "Days", "values": []}));
        assert_eq!(res, Err(SchemaError::MissingField("unit")));

        let res = decode(&json!({"unit": "WH", "values": []}));
        assert_eq!(res, Err(SchemaError::MissingField("resolution")));

        let res = decode(&json!({"unit": "WH", "resolution": "Days"}));
        assert_eq!(res, Err(SchemaError::MissingField("values")));

        let res = decode(&json!({"unit": "WH", "resolution": "Days", "values": {}}));
        assert!(matches!(res, Err(SchemaError::WrongShape { field: "values", .. })));

        assert_eq!(decode(&json!([1, 2])), Err(SchemaError::NotAnObject));
    }

    #[test]
    fn missing_time_or_tag_fails_whole_document() {
        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": 1.0},
            {"tag": "Measured", "consumption": 2.0}
        ])));
        assert_eq!(
            res,
            Err(SchemaError::Element {
                index: 1,
                defect: ElementDefect::MissingField("time")
            })
        );

        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "consumption": 1.0}
        ])));
        assert_eq!(res.unwrap_err().element_index(), Some(0));
    }

    #[test]
    fn rejects_bad_timestamps() {
        for bad in ["2022-10-20", "2022-10-20T00:00:00", "yesterday"] {
            let res = decode(&doc_with(json!([{"time": bad, "tag": "Measured", "consumption": 1.0}])));
            assert!(
                matches!(
                    res,
                    Err(SchemaError::Element {
                        index: 0,
                        defect: ElementDefect::BadTimestamp { .. }
                    })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_non_numeric_fields() {
        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": "9618"}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                defect: ElementDefect::NonNumeric { .. },
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_finite_literals() {
        for text in [
            r#"{"unit":"WH","resolution":"Days","values":[{"time":"2022-10-20T00:00:00Z","tag":"Measured","consumption":NaN}]}"#,
            r#"{"unit":"WH","resolution":"Days","values":[{"time":"2022-10-20T00:00:00Z","tag":"Measured","consumption":Infinity}]}"#,
            r#"{"unit":"WH","resolution":"Days","values":[{"time":"2022-10-20T00:00:00Z","tag":"Measured","consumption":1e400}]}"#,
        ] {
            assert!(matches!(decode_str(text), Err(SchemaError::Syntax(_))), "{text}");
        }
    }

    #[test]
    fn rejects_elements_without_fields() {
        let res = decode(&doc_with(json!([{"time": "2022-10-20T00:00:00Z", "tag": "Measured"}])));
        assert_eq!(
            res,
            Err(SchemaError::Element {
                index: 0,
                defect: ElementDefect::NoFields
            })
        );
    }

    #[test]
    fn repeated_bucket_is_allowed_but_going_back_is_not() {
        let ok = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Estimated", "consumption": 1.0},
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": 2.0}
        ])));
        assert_eq!(ok.unwrap().len(), 2);

        let res = decode(&doc_with(json!([
            {"time": "2022-10-21T00:00:00Z", "tag": "Measured", "consumption": 1.0},
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption": 2.0}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                index: 1,
                defect: ElementDefect::OutOfOrder { .. }
            })
        ));
    }

    #[test]
    fn per_element_unit_must_match_document() {
        let ok = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "unit": "WH", "consumption": 1.0}
        ])))
        .unwrap();
        assert_eq!(ok.records[0].field("unit"), None);

        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "unit": "KWH", "consumption": 1.0}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                defect: ElementDefect::MetadataMismatch { field: "unit", .. },
                ..
            })
        ));
    }

    #[test]
    fn tag_with_line_break_cannot_forge_extra_points() {
        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured\nenergy,tag=Forged consumption=999999", "consumption": 1.0}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                index: 0,
                defect: ElementDefect::InvalidLabel { what: "tag", .. }
            })
        ));

        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "consumption\r": 1.0}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                defect: ElementDefect::InvalidLabel { what: "field name", .. },
                ..
            })
        ));
    }

    #[test]
    fn empty_tag_and_field_name_are_rejected() {
        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "", "consumption": 1.0}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                defect: ElementDefect::InvalidLabel { what: "tag", reason: "must not be empty", .. },
                ..
            })
        ));

        let res = decode(&doc_with(json!([
            {"time": "2022-10-20T00:00:00Z", "tag": "Measured", "": 1.0}
        ])));
        assert!(matches!(
            res,
            Err(SchemaError::Element {
                defect: ElementDefect::InvalidLabel { what: "field name", .. },
                ..
            })
        ));
    }

    #[test]
    fn document_labels_must_be_usable_tag_values() {
        let res = decode(&json!({"unit": "", "resolution": "Days", "values": []}));
        assert!(matches!(res, Err(SchemaError::InvalidLabel { field: "unit", .. })));

        let res = decode(&json!({"unit": "WH", "resolution": "Days\nx", "values": []}));
        assert!(matches!(res, Err(SchemaError::InvalidLabel { field: "resolution", .. })));

        let res = decode(&json!({"unit": "WH", "resolution": "Days", "market": "GAS\r\n", "values": []}));
        assert!(matches!(res, Err(SchemaError::InvalidLabel { field: "market", .. })));
    }

    #[test]
    fn empty_values_decode_to_empty_sequence() {
        let doc = decode(&doc_with(json!([]))).unwrap();
        assert!(doc.is_empty());
    }
}
