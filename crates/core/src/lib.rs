pub mod domain;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod model;
pub mod storage;

pub mod config {
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    pub const DEFAULT_SOURCE_URL: &str =
        "https://es.finance.yahoo.com/quote/BTC-EUR/history/?period1=1410912000&period2=1746572832";
    pub const DEFAULT_MACRO_URL: &str =
        "https://sdw.ecb.europa.eu/quickviewexport.do?SERIES_KEY=120.EXR.D.EUR.N.X&csv.x=yes";
    pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; pricecast/0.1)";
    const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
    const DEFAULT_FETCH_DELAY_SECS: u64 = 5;
    const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_MODEL_PATH: &str = "static/models/model.json";
    const DEFAULT_OUTPUT_DIR: &str = "static/data";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub source_url: String,
        pub macro_url: String,
        pub user_agent: String,
        pub fetch_attempts: u32,
        pub fetch_delay: Duration,
        pub http_timeout: Duration,
        pub model_path: PathBuf,
        pub output_dir: PathBuf,
        pub annualize_volatility: bool,
        pub sqlite_url: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                source_url: DEFAULT_SOURCE_URL.to_string(),
                macro_url: DEFAULT_MACRO_URL.to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
                fetch_delay: Duration::from_secs(DEFAULT_FETCH_DELAY_SECS),
                http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
                annualize_volatility: false,
                sqlite_url: None,
                sentry_dsn: None,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let defaults = Self::default();

            let fetch_attempts = match env_non_empty("PRICECAST_FETCH_ATTEMPTS") {
                Some(s) => s
                    .parse::<u32>()
                    .with_context(|| format!("PRICECAST_FETCH_ATTEMPTS is not a number: {s}"))?,
                None => defaults.fetch_attempts,
            };
            anyhow::ensure!(fetch_attempts >= 1, "PRICECAST_FETCH_ATTEMPTS must be >= 1");

            let fetch_delay = env_non_empty("PRICECAST_FETCH_DELAY_SECS")
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_delay);

            let http_timeout = env_non_empty("PRICECAST_HTTP_TIMEOUT_SECS")
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout);

            let annualize_volatility = env_non_empty("PRICECAST_ANNUALIZE_VOLATILITY")
                .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.annualize_volatility);

            Ok(Self {
                source_url: env_non_empty("PRICECAST_SOURCE_URL").unwrap_or(defaults.source_url),
                macro_url: env_non_empty("PRICECAST_MACRO_URL").unwrap_or(defaults.macro_url),
                user_agent: env_non_empty("PRICECAST_USER_AGENT").unwrap_or(defaults.user_agent),
                fetch_attempts,
                fetch_delay,
                http_timeout,
                model_path: env_non_empty("PRICECAST_MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.model_path),
                output_dir: env_non_empty("PRICECAST_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.output_dir),
                annualize_volatility,
                sqlite_url: env_non_empty("PRICECAST_SQLITE_URL"),
                sentry_dsn: env_non_empty("SENTRY_DSN"),
            })
        }

        pub fn retry_policy(&self) -> crate::ingest::fetch::RetryPolicy {
            crate::ingest::fetch::RetryPolicy::new(self.fetch_attempts, self.fetch_delay)
        }

        /// SQLite URL for the history export; defaults to a file under the output directory.
        pub fn resolve_sqlite_url(&self) -> String {
            match &self.sqlite_url {
                Some(url) => url.clone(),
                None => format!(
                    "sqlite://{}?mode=rwc",
                    self.output_dir.join(crate::storage::SQLITE_FILE_NAME).display()
                ),
            }
        }
    }

    fn env_non_empty(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

}
