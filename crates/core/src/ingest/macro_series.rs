use crate::enrich::coerce::parse_flexible_date;
use crate::error::PipelineError;
use crate::ingest::fetch::Fetcher;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

/// Preamble lines of the ECB quick-view export that precede the data rows.
pub const DEFAULT_SKIP_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroObservation {
    pub date: NaiveDate,
    pub rate: f64,
}

#[async_trait::async_trait]
pub trait MacroSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Observations sorted ascending by date, one per date.
    async fn load(&self) -> Result<Vec<MacroObservation>, PipelineError>;
}

/// Macro series downloaded as delimited text: preamble, then `date,value` rows.
pub struct HttpCsvMacroSource {
    fetcher: Fetcher,
    url: String,
    span: tracing::Span,
}

impl HttpCsvMacroSource {
    pub fn new(fetcher: Fetcher, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
            span: tracing::info_span!("macro_source"),
        }
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

#[async_trait::async_trait]
impl MacroSource for HttpCsvMacroSource {
    fn source_name(&self) -> &'static str {
        "http_csv"
    }

    async fn load(&self) -> Result<Vec<MacroObservation>, PipelineError> {
        let span = self.span.clone();
        async move {
            let body = self.fetcher.fetch(&self.url).await.into_result()?;
            let series = parse_macro_csv(&body, DEFAULT_SKIP_LINES);
            tracing::info!(
                op = "load",
                url = %self.url,
                observations = series.len(),
                "macro series loaded"
            );
            Ok::<_, PipelineError>(series)
        }
        .instrument(span)
        .await
    }
}

/// In-memory series, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMacroSource {
    series: Vec<MacroObservation>,
}

impl StaticMacroSource {
    pub fn new(series: Vec<MacroObservation>) -> Self {
        Self {
            series: normalize(series),
        }
    }
}

#[async_trait::async_trait]
impl MacroSource for StaticMacroSource {
    fn source_name(&self) -> &'static str {
        "static"
    }

    async fn load(&self) -> Result<Vec<MacroObservation>, PipelineError> {
        Ok(self.series.clone())
    }
}

/// Parses `date,value` rows after skipping `skip_lines` lines. Rows with an empty or unparseable
/// date or value are dropped.
pub fn parse_macro_csv(body: &str, skip_lines: usize) -> Vec<MacroObservation> {
    let data = skip_leading_lines(body, skip_lines);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let mut out = Vec::new();
    let mut skipped: usize = 0;
    for record in reader.records() {
        let Ok(record) = record else {
            skipped += 1;
            continue;
        };
        let (Some(date), Some(value)) = (record.get(0), record.get(1)) else {
            skipped += 1;
            continue;
        };
        match (parse_flexible_date(date), parse_rate(value)) {
            (Ok(date), Some(rate)) => out.push(MacroObservation { date, rate }),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(op = "parse", skipped, "dropped macro rows without a usable date or value");
    }

    normalize(out)
}

fn parse_rate(raw: &str) -> Option<f64> {
    let t = raw.trim();
    t.parse::<f64>()
        .ok()
        .or_else(|| t.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn skip_leading_lines(body: &str, n: usize) -> &str {
    let mut rest = body;
    for _ in 0..n {
        match rest.find('\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return "",
        }
    }
    rest
}

// Stable sort keeps the first observation of a repeated date.
fn normalize(mut series: Vec<MacroObservation>) -> Vec<MacroObservation> {
    series.sort_by_key(|o| o.date);
    series.dedup_by_key(|o| o.date);
    series
}
