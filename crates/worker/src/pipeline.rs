use anyhow::Context;
use pricecast_core::config::Settings;
use pricecast_core::domain::{EnrichedRecord, EvaluationMetrics};
use pricecast_core::enrich::Enricher;
use pricecast_core::ingest::fetch::{Fetcher, HttpTransport, ReqwestTransport};
use pricecast_core::ingest::macro_series::HttpCsvMacroSource;
use pricecast_core::ingest::table::TableExtractor;
use pricecast_core::model::ModelManager;
use pricecast_core::storage::{self, csv_export, history};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

const LOGGED_PREDICTIONS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub train: bool,
    pub export: bool,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub scraped_rows: usize,
    pub records: usize,
    pub metrics: Option<EvaluationMetrics>,
    pub predictions: Vec<f64>,
}

impl RunSummary {
    fn empty(run_id: Uuid) -> Self {
        Self {
            run_id,
            scraped_rows: 0,
            records: 0,
            metrics: None,
            predictions: Vec::new(),
        }
    }
}

/// One scrape, enrich, export, train, predict pass. Component spans hang off the run span so every
/// event carries the run id.
pub struct Pipeline {
    run_id: Uuid,
    root: tracing::Span,
    source_url: String,
    output_dir: PathBuf,
    sqlite_url: String,
    fetcher: Fetcher,
    extractor: TableExtractor,
    enricher: Enricher,
    model: ModelManager,
}

impl Pipeline {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(settings.http_timeout)?);
        Self::with_transport(settings, transport)
    }

    pub fn with_transport(
        settings: &Settings,
        transport: Arc<dyn HttpTransport>,
    ) -> anyhow::Result<Self> {
        let run_id = Uuid::new_v4();
        let root = tracing::info_span!("run", %run_id);

        let fetcher = Fetcher::new(transport, settings.retry_policy(), &settings.user_agent)?
            .with_span(tracing::info_span!(parent: &root, "fetcher"));
        let macro_source = HttpCsvMacroSource::new(fetcher.clone(), settings.macro_url.clone())
            .with_span(tracing::info_span!(parent: &root, "macro_source"));
        let extractor = TableExtractor::new()?
            .with_span(tracing::info_span!(parent: &root, "table_extractor"));
        let enricher = Enricher::new(Arc::new(macro_source))
            .with_annualized_volatility(settings.annualize_volatility)
            .with_span(tracing::info_span!(parent: &root, "enricher"));
        let model = ModelManager::new(settings.model_path.clone())
            .with_span(tracing::info_span!(parent: &root, "model_manager"));

        Ok(Self {
            run_id,
            root,
            source_url: settings.source_url.clone(),
            output_dir: settings.output_dir.clone(),
            sqlite_url: settings.resolve_sqlite_url(),
            fetcher,
            extractor,
            enricher,
            model,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn run(&mut self, opts: RunOptions) -> anyhow::Result<RunSummary> {
        let root = self.root.clone();
        self.run_inner(opts).instrument(root).await
    }

    async fn run_inner(&mut self, opts: RunOptions) -> anyhow::Result<RunSummary> {
        tracing::info!(train = opts.train, export = opts.export, "run started");
        let mut summary = RunSummary::empty(self.run_id);

        let markup = match self.fetcher.fetch(&self.source_url).await.into_result() {
            Ok(markup) => markup,
            Err(err) => {
                tracing::warn!(error = %err, "no page this run; stopping");
                return Ok(summary);
            }
        };

        let table = self.extractor.extract(&markup);
        summary.scraped_rows = table.len();
        if table.is_empty() {
            tracing::warn!("scraped table is empty; stopping");
            return Ok(summary);
        }

        let records = self.enricher.enrich(&table).await;
        summary.records = records.len();
        if records.is_empty() {
            tracing::warn!(scraped_rows = table.len(), "no model-ready records; stopping");
            return Ok(summary);
        }

        if opts.export {
            if let Err(err) = self.export(&records).await {
                tracing::error!(error = %format!("{err:#}"), "export failed; continuing");
            }
        }

        if opts.train {
            // Failure is logged by the manager; prediction may still use an older artifact.
            summary.metrics = self.model.train(&records).ok();
        }

        summary.predictions = self.model.predict(&records);
        if summary.predictions.is_empty() {
            tracing::warn!("no predictions produced");
        }
        for (rec, predicted) in records.iter().zip(&summary.predictions).take(LOGGED_PREDICTIONS) {
            tracing::info!(date = %rec.date, close = rec.close, predicted, "prediction");
        }

        Ok(summary)
    }

    async fn export(&self, records: &[EnrichedRecord]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("create {} failed", self.output_dir.display()))?;

        let csv_path = self.output_dir.join(storage::CSV_FILE_NAME);
        if let Err(err) = csv_export::write_csv(&csv_path, records) {
            tracing::error!(error = %format!("{err:#}"), "csv export failed");
        }

        let pool = storage::connect_sqlite(&self.sqlite_url).await?;
        let res = history::replace_history_table(&pool, records).await;
        pool.close().await;
        res.map(|_| ())
    }
}
