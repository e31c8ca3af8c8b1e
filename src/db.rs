use anyhow::Context;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::facts::read_facts_path;
use crate::models::{FactRecord, ProviderSnapshot};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const INSERT_FACT: &str = r#"
    INSERT INTO provider_risk.facts_daily
    (date, provider_id, claims_cnt, avg_allowed_amt, zscore_allowed_amt)
    VALUES ($1, $2, $3, $4, $5)
    "#;

/// Appends every fact in the file, repeated provider-days included, so the
/// database holds exactly what the CSV source would yield.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let facts = read_facts_path(csv_path)
        .with_context(|| format!("failed to read facts from {}", csv_path.display()))?;
    let mut tx = pool.begin().await?;

    for fact in &facts {
        sqlx::query(INSERT_FACT)
            .bind(fact.date)
            .bind(&fact.provider_id)
            .bind(fact.claims_cnt)
            .bind(fact.avg_allowed_amt)
            .bind(fact.zscore_allowed_amt)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    info!(facts = facts.len(), path = %csv_path.display(), "facts imported");
    Ok(facts.len())
}

/// Loads facts, optionally only those on or before `until`.
pub async fn fetch_facts(
    pool: &PgPool,
    until: Option<NaiveDate>,
) -> anyhow::Result<Vec<FactRecord>> {
    let mut query = String::from(
        "SELECT date, provider_id, claims_cnt, avg_allowed_amt, zscore_allowed_amt \
         FROM provider_risk.facts_daily",
    );
    if until.is_some() {
        query.push_str(" WHERE date <= $1");
    }
    query.push_str(" ORDER BY date, provider_id, fact_id");

    let mut rows = sqlx::query(&query);
    if let Some(value) = until {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut facts = Vec::with_capacity(records.len());

    for row in records {
        facts.push(FactRecord {
            date: row.get("date"),
            provider_id: row.get("provider_id"),
            claims_cnt: row.get("claims_cnt"),
            avg_allowed_amt: row.get("avg_allowed_amt"),
            zscore_allowed_amt: row.get("zscore_allowed_amt"),
        });
    }

    Ok(facts)
}

/// Stores a scored panel under a fresh run id, all or nothing.
pub async fn persist_run(
    pool: &PgPool,
    config: &PipelineConfig,
    rows: &[ProviderSnapshot],
) -> anyhow::Result<Uuid> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO provider_risk.panel_runs (id, config, row_count)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(run_id)
    .bind(serde_json::to_value(config)?)
    .bind(rows.len() as i64)
    .execute(&mut *tx)
    .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO provider_risk.provider_panel
            (run_id, provider_id, as_of_date, first_activity_dt, last_activity_dt,
             days_since_last, anomaly_total_flags, anomaly_rank, provider_risk_raw,
             provider_risk_score, risk_rank, features)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run_id)
        .bind(&row.provider_id)
        .bind(row.as_of_date)
        .bind(row.lifetime.first_activity)
        .bind(row.lifetime.last_activity)
        .bind(row.lifetime.days_since_last)
        .bind(row.anomaly_total_flags as i32)
        .bind(row.anomaly_rank as i32)
        .bind(row.provider_risk_raw)
        .bind(row.provider_risk_score)
        .bind(row.risk_rank as i32)
        .bind(feature_document(row))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!(%run_id, rows = rows.len(), "panel run persisted");
    Ok(run_id)
}

/// Window, trend and detector columns as one JSON object.
fn feature_document(row: &ProviderSnapshot) -> Value {
    let mut document = Map::new();
    for (column, value) in row.feature_columns() {
        document.insert(column, Value::from(value));
    }
    for signal in &row.signals {
        document.insert(signal.detector.score_field(), Value::from(signal.score));
        document.insert(signal.detector.flag_field(), Value::from(u8::from(signal.flag)));
    }
    Value::Object(document)
}
