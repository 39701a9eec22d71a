use crate::error::PipelineError;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY_SECS: u64 = 5;

/// Bounded retry: a fixed number of attempts with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, Duration::from_secs(DEFAULT_DELAY_SECS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse> {
        let res = self
            .http
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .context("http request failed")?;

        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .context("failed to read response body")?;
        Ok(HttpResponse { status, body })
    }
}

/// Result of a fetch: the body, or the error left once every attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(String),
    Exhausted(PipelineError),
}

impl FetchOutcome {
    pub fn markup(&self) -> Option<&str> {
        match self {
            Self::Fetched(body) => Some(body),
            Self::Exhausted(_) => None,
        }
    }

    pub fn into_result(self) -> Result<String, PipelineError> {
        match self {
            Self::Fetched(body) => Ok(body),
            Self::Exhausted(err) => Err(err),
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    headers: HeaderMap,
    span: tracing::Span,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        policy: RetryPolicy,
        user_agent: &str,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).context("invalid user agent header")?,
        );

        Ok(Self {
            transport,
            policy,
            headers,
            span: tracing::info_span!("fetcher"),
        })
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// GETs `url`, retrying per the policy. Never fails past this point: exhaustion is reported
    /// as `FetchOutcome::Exhausted` and means "no data for this run".
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        self.fetch_with_retry(url)
            .instrument(self.span.clone())
            .await
    }

    async fn fetch_with_retry(&self, url: &str) -> FetchOutcome {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.fetch_once(url).await {
                Ok(body) => {
                    tracing::info!(op = "fetch", attempt, %url, bytes = body.len(), "page fetched");
                    return FetchOutcome::Fetched(body);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    op = "fetch",
                    attempt,
                    %url,
                    error = %err,
                    "fetch failed; retries exhausted"
                );
                return FetchOutcome::Exhausted(PipelineError::TransientFetch {
                    url: url.to_string(),
                    attempts: attempt,
                    detail: format!("{err:#}"),
                });
            }

            let delay = self.policy.delay();
            tracing::warn!(
                op = "fetch",
                attempt,
                ?delay,
                %url,
                error = %err,
                "fetch failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let res = self.transport.get(url, &self.headers).await?;
        if !res.is_success() {
            anyhow::bail!("HTTP {}", res.status);
        }
        Ok(res.body)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: replays queued responses, then repeats the fallback forever.
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, String>>>,
        fallback: Result<HttpResponse, String>,
        calls: Mutex<Vec<(String, tokio::time::Instant, Option<String>)>>,
    }

    impl ScriptedTransport {
        pub fn always(fallback: Result<HttpResponse, String>) -> Self {
            Self::scripted(Vec::new(), fallback)
        }

        pub fn scripted(
            script: Vec<Result<HttpResponse, String>>,
            fallback: Result<HttpResponse, String>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn ok(body: &str) -> Result<HttpResponse, String> {
            Ok(HttpResponse {
                status: 200,
                body: body.to_string(),
            })
        }

        pub fn status(status: u16) -> Result<HttpResponse, String> {
            Ok(HttpResponse {
                status,
                body: String::new(),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn call_instants(&self) -> Vec<tokio::time::Instant> {
            self.calls.lock().unwrap().iter().map(|c| c.1).collect()
        }

        pub fn user_agents(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().iter().map(|c| c.2.clone()).collect()
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str, headers: &HeaderMap) -> Result<HttpResponse> {
            let ua = headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), tokio::time::Instant::now(), ua));

            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            next.map_err(|e| anyhow::anyhow!(e))
        }
    }
}
