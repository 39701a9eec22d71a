use super::{EXPORT_COLUMNS, HISTORY_TABLE};
use crate::domain::EnrichedRecord;
use anyhow::Context;
use sqlx::SqlitePool;

// 13 binds per row keeps each statement well under SQLite's variable limit.
const INSERT_BATCH: usize = 50;

/// Replaces the history table with `records` in a single transaction.
pub async fn replace_history_table(
    pool: &SqlitePool,
    records: &[EnrichedRecord],
) -> anyhow::Result<u64> {
    let rows = records
        .iter()
        .map(|rec| {
            i64::try_from(rec.volume)
                .map(|volume| (rec, volume))
                .with_context(|| format!("volume {} on {} exceeds i64", rec.volume, rec.date))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {HISTORY_TABLE}"))
        .execute(&mut *tx)
        .await
        .context("drop history table failed")?;
    sqlx::query(&format!(
        "CREATE TABLE {HISTORY_TABLE} (\
           date TEXT PRIMARY KEY NOT NULL, \
           open REAL NOT NULL, high REAL NOT NULL, low REAL NOT NULL, \
           close REAL NOT NULL, adjusted_close REAL NOT NULL, volume INTEGER NOT NULL, \
           daily_log_return REAL, moving_avg_7 REAL, moving_avg_30 REAL, \
           volatility_7 REAL, volatility_30 REAL, macro_rate REAL)"
    ))
    .execute(&mut *tx)
    .await
    .context("create history table failed")?;

    let mut inserted: u64 = 0;
    for (batch_idx, chunk) in rows.chunks(INSERT_BATCH).enumerate() {
        let mut qb = sqlx::QueryBuilder::new(format!(
            "INSERT INTO {HISTORY_TABLE} ({}) ",
            EXPORT_COLUMNS.join(", ")
        ));
        qb.push_values(chunk, |mut b, &(rec, volume)| {
            b.push_bind(rec.date)
                .push_bind(rec.open)
                .push_bind(rec.high)
                .push_bind(rec.low)
                .push_bind(rec.close)
                .push_bind(rec.adjusted_close)
                .push_bind(volume)
                .push_bind(rec.daily_log_return)
                .push_bind(rec.moving_avg_7)
                .push_bind(rec.moving_avg_30)
                .push_bind(rec.volatility_7)
                .push_bind(rec.volatility_30)
                .push_bind(rec.macro_rate);
        });

        let res = qb
            .build()
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert batch {batch_idx} into {HISTORY_TABLE} failed"))?;
        inserted += res.rows_affected();
        tracing::debug!(op = "export_sqlite", batch_idx, batch_size = chunk.len(), "batch inserted");
    }

    tx.commit().await.context("commit transaction failed")?;
    tracing::info!(op = "export_sqlite", table = HISTORY_TABLE, rows = inserted, "history table replaced");
    Ok(inserted)
}
