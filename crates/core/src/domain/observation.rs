use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Model predictors, in the exact order the regressor is trained on.
pub const FEATURE_COLUMNS: [&str; 5] = [
    "daily_log_return",
    "moving_avg_7",
    "moving_avg_30",
    "volatility_7",
    "volatility_30",
];

/// Text table as scraped: canonical column names plus rows of cells aligned to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends a row when its width matches the header; returns whether it was kept.
    pub fn push_row(&mut self, cells: Vec<String>) -> bool {
        if cells.len() != self.columns.len() {
            return false;
        }
        self.rows.push(cells);
        true
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: u64,
}

/// One observation with its derived features. Field order is the export column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: u64,
    pub daily_log_return: Option<f64>,
    pub moving_avg_7: Option<f64>,
    pub moving_avg_30: Option<f64>,
    pub volatility_7: Option<f64>,
    pub volatility_30: Option<f64>,
    pub macro_rate: Option<f64>,
}

impl EnrichedRecord {
    pub fn from_observation(obs: &ObservationRecord) -> Self {
        Self {
            date: obs.date,
            open: obs.open,
            high: obs.high,
            low: obs.low,
            close: obs.close,
            adjusted_close: obs.adjusted_close,
            volume: obs.volume,
            daily_log_return: None,
            moving_avg_7: None,
            moving_avg_30: None,
            volatility_7: None,
            volatility_30: None,
            macro_rate: None,
        }
    }

    /// Feature vector in `FEATURE_COLUMNS` order, or `None` while any feature is undefined.
    pub fn features(&self) -> Option<[f64; 5]> {
        Some([
            self.daily_log_return?,
            self.moving_avg_7?,
            self.moving_avg_30?,
            self.volatility_7?,
            self.volatility_30?,
        ])
    }

    pub fn is_model_ready(&self) -> bool {
        self.features().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub train_size: usize,
    pub test_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RawTable {
        RawTable::new(vec!["date".to_string(), "close".to_string()])
    }

    #[test]
    fn rejects_rows_with_wrong_width() {
        let mut t = table();
        assert!(t.push_row(vec!["01/02/2024".into(), "1,0".into()]));
        assert!(!t.push_row(vec!["02/02/2024".into()]));
        assert_eq!(t.len(), 1);
        assert_eq!(t.cell(0, "close"), Some("1,0"));
        assert_eq!(t.cell(0, "volume"), None);
    }

    #[test]
    fn features_require_every_field() {
        let obs = ObservationRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            adjusted_close: 1.0,
            volume: 0,
        };
        let mut rec = EnrichedRecord::from_observation(&obs);
        assert!(!rec.is_model_ready());

        rec.daily_log_return = Some(0.1);
        rec.moving_avg_7 = Some(1.0);
        rec.moving_avg_30 = Some(1.0);
        rec.volatility_7 = Some(0.2);
        assert!(rec.features().is_none());

        rec.volatility_30 = Some(0.3);
        assert_eq!(rec.features(), Some([0.1, 1.0, 1.0, 0.2, 0.3]));
    }
}
