pub mod csv_export;
pub mod history;

use anyhow::Context;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Column order shared by the CSV file and the SQLite table.
pub const EXPORT_COLUMNS: [&str; 13] = [
    "date",
    "open",
    "high",
    "low",
    "close",
    "adjusted_close",
    "volume",
    "daily_log_return",
    "moving_avg_7",
    "moving_avg_30",
    "volatility_7",
    "volatility_30",
    "macro_rate",
];

pub const CSV_FILE_NAME: &str = "BTC_EUR_data.csv";
pub const SQLITE_FILE_NAME: &str = "btc_eur_data.db";
pub const HISTORY_TABLE: &str = "btc_eur_history";

pub async fn connect_sqlite(url: &str) -> anyhow::Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .with_context(|| format!("connect sqlite failed: {url}"))
}
