pub mod coerce;
pub mod features;
pub mod merge;

use crate::domain::{EnrichedRecord, ObservationRecord, RawTable};
use crate::error::PipelineError;
use crate::ingest::macro_series::MacroSource;
use coerce::ColumnMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Instrument;

/// Turns scraped rows into the model-ready, macro-enriched series.
pub struct Enricher {
    macro_source: Arc<dyn MacroSource>,
    annualize_volatility: bool,
    span: tracing::Span,
}

impl Enricher {
    pub fn new(macro_source: Arc<dyn MacroSource>) -> Self {
        Self {
            macro_source,
            annualize_volatility: false,
            span: tracing::info_span!("enricher"),
        }
    }

    pub fn with_annualized_volatility(mut self, annualize: bool) -> Self {
        self.annualize_volatility = annualize;
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Cleans, derives features, keeps the model-ready records and merges the macro series.
    ///
    /// Never fails: problems are logged and whatever was produced so far is returned, so callers
    /// must check for an empty result.
    pub async fn enrich(&self, table: &RawTable) -> Vec<EnrichedRecord> {
        self.enrich_inner(table)
            .instrument(self.span.clone())
            .await
    }

    async fn enrich_inner(&self, table: &RawTable) -> Vec<EnrichedRecord> {
        tracing::info!(op = "enrich", rows = table.len(), "cleaning started");
        let observations = match self.clean(table) {
            Ok(obs) => obs,
            Err(err) => {
                tracing::error!(op = "enrich", error = %err, "cleaning failed");
                return Vec::new();
            }
        };
        tracing::info!(op = "enrich", observations = observations.len(), "cleaning finished");

        let all = self.build_features(&observations);
        let total = all.len();
        let mut ready: Vec<EnrichedRecord> =
            all.into_iter().filter(EnrichedRecord::is_model_ready).collect();
        tracing::info!(
            op = "enrich",
            model_ready = ready.len(),
            warm_up = total - ready.len(),
            "features computed"
        );

        self.attach_macro(&mut ready).await;
        ready
    }

    /// Dedup by raw date, coerce, drop non-positive closes, sort ascending.
    pub fn clean(&self, table: &RawTable) -> Result<Vec<ObservationRecord>, PipelineError> {
        let columns = ColumnMap::resolve(table)?;

        let mut seen_raw = HashSet::new();
        let mut seen_dates = HashSet::new();
        let mut duplicates: usize = 0;
        let mut unparseable: usize = 0;
        let mut non_positive: usize = 0;
        let mut out = Vec::with_capacity(table.len());

        for row in table.rows() {
            if !seen_raw.insert(columns.date_cell(row).trim()) {
                duplicates += 1;
                continue;
            }
            let obs = match columns.coerce(row) {
                Ok(obs) => obs,
                Err(err) => {
                    unparseable += 1;
                    tracing::debug!(op = "clean", error = %err, "dropping unparseable row");
                    continue;
                }
            };
            if obs.close <= 0.0 {
                non_positive += 1;
                continue;
            }
            // Different spellings of one day ("6/5/2025", "06/05/2025") collapse here.
            if !seen_dates.insert(obs.date) {
                duplicates += 1;
                continue;
            }
            out.push(obs);
        }

        out.sort_by_key(|o| o.date);

        if duplicates + unparseable + non_positive > 0 {
            tracing::info!(
                op = "clean",
                duplicates,
                unparseable,
                non_positive,
                "rows dropped during cleaning"
            );
        }
        Ok(out)
    }

    /// Full enriched series, warm-up records included; `macro_rate` is left unset.
    pub fn build_features(&self, observations: &[ObservationRecord]) -> Vec<EnrichedRecord> {
        features::compute_features(observations, self.annualize_volatility)
    }

    async fn attach_macro(&self, records: &mut [EnrichedRecord]) {
        if records.is_empty() {
            return;
        }

        let series = match self.macro_source.load().await {
            Ok(series) => series,
            Err(err) => {
                tracing::error!(
                    op = "merge_macro",
                    source = self.macro_source.source_name(),
                    error = %err,
                    "macro series unavailable; macro_rate left empty"
                );
                return;
            }
        };

        if series.is_empty() {
            let gap = PipelineError::MergeGap {
                detail: "source returned no observations".to_string(),
            };
            tracing::warn!(op = "merge_macro", error = %gap, "macro_rate left empty");
            return;
        }

        let matched = merge::merge_macro(records, &series);
        tracing::info!(
            op = "merge_macro",
            source = self.macro_source.source_name(),
            observations = series.len(),
            matched,
            records = records.len(),
            "macro series merged"
        );
    }
}
