//! Parsing of locale-formatted cells: `.` groups thousands, `,` marks decimals, dates are day-first.

use crate::domain::{ObservationRecord, RawTable};
use crate::error::PipelineError;
use chrono::NaiveDate;

pub const REQUIRED_COLUMNS: [&str; 7] = [
    "date",
    "open",
    "high",
    "low",
    "close",
    "adjusted_close",
    "volume",
];

pub fn parse_locale_number(field: &'static str, raw: &str) -> Result<f64, PipelineError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '.' | ' ' | '\u{a0}' | '\u{202f}'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| PipelineError::Coercion {
            field,
            value: raw.to_string(),
        })
}

pub fn parse_volume(raw: &str) -> Result<u64, PipelineError> {
    let value = parse_locale_number("volume", raw)?;
    // Stored as a signed 64-bit integer downstream.
    if value < 0.0 || value.fract() != 0.0 || value >= i64::MAX as f64 {
        return Err(PipelineError::Coercion {
            field: "volume",
            value: raw.to_string(),
        });
    }
    Ok(value as u64)
}

/// Day-first dates: `06/05/2025`, `6-5-25`, `06.05.2025`, `6 may 2025`, `6 de mayo de 2025`.
pub fn parse_day_first_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    let err = || PipelineError::Coercion {
        field: "date",
        value: raw.to_string(),
    };
    let t = raw.trim();

    let numeric: Vec<&str> = t.split(['/', '-', '.']).map(str::trim).collect();
    if numeric.len() == 3 && numeric.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        let day: u32 = numeric[0].parse().map_err(|_| err())?;
        let month: u32 = numeric[1].parse().map_err(|_| err())?;
        let year = expand_year(numeric[2]).ok_or_else(err)?;
        return NaiveDate::from_ymd_opt(year, month, day).ok_or_else(err);
    }

    let words: Vec<String> = t
        .split([' ', ',', '\u{a0}'])
        .map(|w| w.trim_end_matches('.').to_lowercase())
        .filter(|w| !w.is_empty() && w != "de")
        .collect();
    if let [day, month, year] = words.as_slice() {
        let day: u32 = day.parse().map_err(|_| err())?;
        let month = month_from_name(month).ok_or_else(err)?;
        let year = expand_year(year).ok_or_else(err)?;
        return NaiveDate::from_ymd_opt(year, month, day).ok_or_else(err);
    }

    Err(err())
}

/// ISO `YYYY-MM-DD` first, then the day-first forms.
pub fn parse_flexible_date(raw: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").or_else(|_| parse_day_first_date(raw))
}

fn expand_year(s: &str) -> Option<i32> {
    let year: i32 = s.parse().ok()?;
    match s.len() {
        4 => Some(year),
        2 => Some(2000 + year),
        _ => None,
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect();
    let month = match prefix.as_str() {
        "ene" | "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "abr" | "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "ago" | "aug" => 8,
        "sep" | "set" => 9,
        "oct" => 10,
        "nov" => 11,
        "dic" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Column positions of every required field, resolved once per table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    adjusted_close: usize,
    volume: usize,
}

impl ColumnMap {
    pub fn resolve(table: &RawTable) -> Result<Self, PipelineError> {
        let mut idx = [0usize; REQUIRED_COLUMNS.len()];
        for (slot, name) in idx.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = table
                .column_index(name)
                .ok_or_else(|| PipelineError::Extraction {
                    detail: format!("required column {name} is missing"),
                })?;
        }
        let [date, open, high, low, close, adjusted_close, volume] = idx;
        Ok(Self {
            date,
            open,
            high,
            low,
            close,
            adjusted_close,
            volume,
        })
    }

    pub fn date_cell<'a>(&self, row: &'a [String]) -> &'a str {
        row[self.date].as_str()
    }

    pub fn coerce(&self, row: &[String]) -> Result<ObservationRecord, PipelineError> {
        Ok(ObservationRecord {
            date: parse_day_first_date(&row[self.date])?,
            open: parse_locale_number("open", &row[self.open])?,
            high: parse_locale_number("high", &row[self.high])?,
            low: parse_locale_number("low", &row[self.low])?,
            close: parse_locale_number("close", &row[self.close])?,
            adjusted_close: parse_locale_number("adjusted_close", &row[self.adjusted_close])?,
            volume: parse_volume(&row[self.volume])?,
        })
    }
}
