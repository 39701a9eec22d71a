use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod pipeline;

#[derive(Debug, Parser)]
#[command(name = "pricecast_worker")]
struct Args {
    /// Fetch, enrich and export, then predict with the existing model artifact.
    #[arg(long)]
    skip_train: bool,

    /// Do not write the CSV file or the SQLite table.
    #[arg(long)]
    skip_export: bool,

    /// Shorthand for --skip-train --skip-export.
    #[arg(long)]
    predict_only: bool,

    /// Overrides PRICECAST_OUTPUT_DIR for the exported files.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl Args {
    fn run_options(&self) -> pipeline::RunOptions {
        pipeline::RunOptions {
            train: !(self.skip_train || self.predict_only),
            export: !(self.skip_export || self.predict_only),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = pricecast_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Some(dir) = &args.output_dir {
        settings.output_dir = dir.clone();
    }

    let mut pipeline = pipeline::Pipeline::from_settings(&settings)?;
    match pipeline.run(args.run_options()).await {
        Ok(summary) => {
            tracing::info!(
                run_id = %summary.run_id,
                scraped_rows = summary.scraped_rows,
                records = summary.records,
                predictions = summary.predictions.len(),
                trained = summary.metrics.is_some(),
                "run finished"
            );
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %format!("{err:#}"), "run failed");
            Err(err)
        }
    }
}

fn init_sentry(settings: &pricecast_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
