use super::EXPORT_COLUMNS;
use crate::domain::EnrichedRecord;
use anyhow::Context;
use std::path::Path;

/// Writes the enriched series with a header row; undefined values become empty cells.
pub fn write_csv(path: &Path, records: &[EnrichedRecord]) -> anyhow::Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {} failed", parent.display()))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open {} failed", path.display()))?;
    writer.write_record(EXPORT_COLUMNS)?;
    for rec in records {
        writer
            .serialize(rec)
            .with_context(|| format!("write row {} failed", rec.date))?;
    }
    writer.flush().context("flush csv failed")?;

    tracing::info!(
        op = "export_csv",
        path = %path.display(),
        rows = records.len(),
        "csv written"
    );
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObservationRecord;
    use chrono::NaiveDate;

    fn record(day: u32, ready: bool) -> EnrichedRecord {
        let mut rec = EnrichedRecord::from_observation(&ObservationRecord {
            date: NaiveDate::from_ymd_opt(2025, 5, day).unwrap(),
            open: 1.5,
            high: 2.0,
            low: 1.0,
            close: 1.75,
            adjusted_close: 1.75,
            volume: 42,
        });
        if ready {
            rec.daily_log_return = Some(0.01);
            rec.moving_avg_7 = Some(1.7);
            rec.moving_avg_30 = Some(1.6);
            rec.volatility_7 = Some(0.02);
            rec.volatility_30 = Some(0.03);
            rec.macro_rate = Some(1.13);
        }
        rec
    }

    #[test]
    fn writes_header_and_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/BTC_EUR_data.csv");

        let written = write_csv(&path, &[record(1, false), record(2, true)]).unwrap();
        assert_eq!(written, 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], EXPORT_COLUMNS.join(","));
        assert_eq!(lines[1], "2025-05-01,1.5,2.0,1.0,1.75,1.75,42,,,,,,");
        assert!(lines[2].starts_with("2025-05-02,"));
        assert!(lines[2].ends_with(",1.13"));
    }

    #[test]
    fn empty_series_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &[]).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap().trim_end(),
            EXPORT_COLUMNS.join(",")
        );
    }
}
