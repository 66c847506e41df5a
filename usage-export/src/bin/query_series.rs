use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use std::env;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use usage_client::db;
use usage_export::{config::AppConfig, observability};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("usage: query_series <field> <start RFC3339> <end RFC3339> [daily]");
    }
    let field = &args[1];
    let start = OffsetDateTime::parse(&args[2], &Rfc3339)?;
    let end = OffsetDateTime::parse(&args[3], &Rfc3339)?;
    let daily = args.get(4).is_some_and(|a| a == "daily");

    let cfg = AppConfig::load()?;
    let measurement = &cfg.questdb.measurement;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.questdb.max_connections)
        .connect(&cfg.questdb.pg_uri)
        .await?;

    if daily {
        for row in db::daily_totals(&pool, measurement, field, start, end).await? {
            println!(
                "{}\t{}\t{}",
                row.ts.format(&Rfc3339)?,
                row.tag.as_deref().unwrap_or("-"),
                row.total
            );
        }
    } else {
        for row in db::field_series(&pool, measurement, field, start, end).await? {
            println!(
                "{}\t{}\t{}",
                row.ts.format(&Rfc3339)?,
                row.tag.as_deref().unwrap_or("-"),
                row.value
            );
        }
    }

    Ok(())
}
