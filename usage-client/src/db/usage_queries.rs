use sqlx::PgPool;
use time::OffsetDateTime;

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("`{0}` is not a valid column or table name")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// One stored value of a single field.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FieldSample {
    pub ts: OffsetDateTime,
    pub tag: Option<String>,
    pub value: f64,
}

/// Sum of one field over a calendar day for one provenance tag.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyTotal {
    pub ts: OffsetDateTime,
    pub tag: Option<String>,
    pub total: f64,
}

/// Quote `name` as a SQL identifier.
///
/// Table and column names come from the export's open field set and cannot be
/// bound as parameters, so only plain ASCII identifiers are let through.
fn quoted_ident(name: &str) -> Result<String, QueryError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(QueryError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

fn field_series_sql(measurement: &str, field: &str) -> Result<String, QueryError> {
    let table = quoted_ident(measurement)?;
    let column = quoted_ident(field)?;
    Ok(format!(
        "SELECT timestamp AS ts, \"tag\" AS tag, {column} AS value \
         FROM {table} \
         WHERE timestamp >= $1 AND timestamp < $2 AND {column} IS NOT NULL \
         ORDER BY timestamp"
    ))
}

fn daily_totals_sql(measurement: &str, field: &str) -> Result<String, QueryError> {
    let table = quoted_ident(measurement)?;
    let column = quoted_ident(field)?;
    Ok(format!(
        "SELECT timestamp AS ts, \"tag\" AS tag, sum({column}) AS total \
         FROM {table} \
         WHERE timestamp >= $1 AND timestamp < $2 \
         SAMPLE BY 1d ALIGN TO CALENDAR"
    ))
}

/// Fetch the time-ordered values of one field written by the export.
pub async fn field_series(
    pool: &PgPool,
    measurement: &str,
    field: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<FieldSample>, QueryError> {
    let sql = field_series_sql(measurement, field)?;
    let rows = sqlx::query_as::<_, FieldSample>(&sql)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Sum one field per calendar day and provenance tag.
///
/// A day can hold both a measured and an estimated point for the same
/// bucket; they are kept apart rather than added together.
pub async fn daily_totals(
    pool: &PgPool,
    measurement: &str,
    field: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<DailyTotal>, QueryError> {
    let sql = daily_totals_sql(measurement, field)?;
    let rows = sqlx::query_as::<_, DailyTotal>(&sql)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}
