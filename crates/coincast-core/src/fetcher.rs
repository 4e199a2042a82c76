//! Concurrent market data collection across assets.
//!
//! Each asset is fetched on its own task. Attempts are bounded by a timeout,
//! transient failures are retried with backoff, and every returned series is
//! aligned onto the daily calendar of the requested range so that missing
//! days stay visible as absent observations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::data_source::{HistoryRequest, MarketDataSource, ProviderId, SourceError};
use crate::progress::{ProgressEvent, ProgressSink, StageName};
use crate::retry::RetryConfig;
use crate::{AssetId, DateRange, TimeSeries, Variable};

/// What to do when one asset cannot be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Abort the whole batch on the first terminal failure.
    #[default]
    FailFast,
    /// Keep the assets that succeeded; fail only when none did.
    AllowPartial,
}

/// Terminal failure for one asset.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("fetch for `{asset}` failed: {source}")]
    Fatal { asset: AssetId, source: SourceError },
    #[error("fetch for `{asset}` failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        asset: AssetId,
        attempts: u32,
        source: SourceError,
    },
    #[error("fetch for `{asset}` was cancelled")]
    Cancelled { asset: AssetId },
}

impl FetchError {
    pub fn asset(&self) -> &AssetId {
        match self {
            Self::Fatal { asset, .. }
            | Self::RetriesExhausted { asset, .. }
            | Self::Cancelled { asset } => asset,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Fatal { source, .. } | Self::RetriesExhausted { source, .. } => source.code(),
            Self::Cancelled { .. } => "fetch.cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Failure of a whole collection batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchBatchError {
    #[error(transparent)]
    Asset(FetchError),
    #[error("no asset could be fetched ({} failure(s))", failures.len())]
    NothingFetched { failures: Vec<FetchError> },
    #[error("collection was cancelled")]
    Cancelled,
}

/// Result of a collection batch.
///
/// `series` holds one daily-aligned series per successful asset; `failures`
/// is only non-empty under [`FetchPolicy::AllowPartial`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub series: BTreeMap<AssetId, TimeSeries>,
    pub failures: BTreeMap<AssetId, FetchError>,
    pub attempts: BTreeMap<AssetId, u32>,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetches history for many assets concurrently from one source.
#[derive(Clone)]
pub struct MarketDataFetcher {
    source: Arc<dyn MarketDataSource>,
    retry: RetryConfig,
    attempt_timeout: Duration,
    policy: FetchPolicy,
    max_concurrency: usize,
}

impl MarketDataFetcher {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            retry: RetryConfig::default(),
            attempt_timeout: Duration::from_secs(30),
            policy: FetchPolicy::default(),
            max_concurrency: 4,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn source_id(&self) -> ProviderId {
        self.source.id()
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    /// Fetches every asset, honouring the configured [`FetchPolicy`].
    ///
    /// Returns only after every spawned task has resolved or been aborted.
    pub async fn fetch(
        &self,
        assets: &[AssetId],
        range: DateRange,
        variables: &[Variable],
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<FetchOutcome, FetchBatchError> {
        let total = assets.len() as u64;
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut task_assets = HashMap::new();

        for asset in assets {
            let request = HistoryRequest::new(asset.clone(), range, variables.to_vec()).map_err(
                |source| {
                    FetchBatchError::Asset(FetchError::Fatal {
                        asset: asset.clone(),
                        source,
                    })
                },
            )?;
            let source = Arc::clone(&self.source);
            let retry = self.retry.clone();
            let attempt_timeout = self.attempt_timeout;
            let permits = Arc::clone(&permits);
            let cancel = cancel.child_token();
            let asset_key = asset.clone();

            let handle = tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        fetch_with_retry(source.as_ref(), request, &retry, attempt_timeout, &cancel)
                            .await
                    }
                    Err(_) => Err(FetchError::Cancelled {
                        asset: asset_key.clone(),
                    }),
                };
                (asset_key, result)
            });
            task_assets.insert(handle.id(), asset.clone());
        }

        let mut outcome = FetchOutcome::default();
        let mut completed = 0_u64;

        while let Some(joined) = tasks.join_next().await {
            let (asset, result) = match joined {
                Ok(pair) => pair,
                Err(join_error) => {
                    let asset = match task_assets.get(&join_error.id()) {
                        Some(asset) => asset.clone(),
                        None => continue,
                    };
                    let error = FetchError::Fatal {
                        asset: asset.clone(),
                        source: SourceError::internal(format!("fetch task failed: {join_error}")),
                    };
                    (asset, Err(error))
                }
            };
            completed += 1;

            match result {
                Ok((series, attempts)) => {
                    tracing::info!(
                        asset = %asset,
                        attempts,
                        observations = series.len(),
                        "asset history collected"
                    );
                    progress.emit(
                        ProgressEvent::new(StageName::Collecting, asset.as_str(), completed, total)
                            .with_detail("fetched"),
                    );
                    outcome.attempts.insert(asset.clone(), attempts);
                    outcome
                        .series
                        .insert(asset, series.align_daily(range).restrict_to(variables));
                }
                Err(error) if error.is_cancelled() || cancel.is_cancelled() => {
                    tasks.shutdown().await;
                    return Err(FetchBatchError::Cancelled);
                }
                Err(error) => {
                    tracing::warn!(asset = %asset, code = error.code(), error = %error, "asset fetch failed");
                    progress.emit(
                        ProgressEvent::new(StageName::Collecting, asset.as_str(), completed, total)
                            .with_detail("failed"),
                    );
                    if self.policy == FetchPolicy::FailFast {
                        tasks.shutdown().await;
                        return Err(FetchBatchError::Asset(error));
                    }
                    outcome.failures.insert(asset, error);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(FetchBatchError::Cancelled);
        }
        if outcome.series.is_empty() && !assets.is_empty() {
            return Err(FetchBatchError::NothingFetched {
                failures: outcome.failures.into_values().collect(),
            });
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for MarketDataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataFetcher")
            .field("source", &self.source.id())
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("policy", &self.policy)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

async fn fetch_with_retry(
    source: &dyn MarketDataSource,
    request: HistoryRequest,
    retry: &RetryConfig,
    attempt_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(TimeSeries, u32), FetchError> {
    let asset = request.asset.clone();
    let max_attempts = retry.max_attempts();
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { asset }),
            timed = tokio::time::timeout(attempt_timeout, source.fetch_history(request.clone())) => {
                timed.unwrap_or_else(|_| {
                    Err(SourceError::timeout(format!(
                        "no response within {} ms",
                        attempt_timeout.as_millis()
                    )))
                })
            }
        };

        let error = match result {
            Ok(series) => return Ok((series, attempt)),
            Err(error) => error,
        };

        if !retry.should_retry(&error) {
            return Err(if error.retryable() {
                FetchError::RetriesExhausted {
                    asset,
                    attempts: attempt,
                    source: error,
                }
            } else {
                FetchError::Fatal {
                    asset,
                    source: error,
                }
            });
        }
        if attempt >= max_attempts {
            return Err(FetchError::RetriesExhausted {
                asset,
                attempts: attempt,
                source: error,
            });
        }

        let delay = retry.delay_for_attempt(attempt - 1);
        tracing::warn!(
            asset = %asset,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            code = error.code(),
            "transient fetch failure, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { asset }),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
