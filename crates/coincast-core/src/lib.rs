//! # Coincast Core
//!
//! Core contracts, domain types and market data collection for the coincast
//! forecasting pipeline.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (CoinGecko) |
//! | [`circuit_breaker`] | Circuit breaker for resilient upstream calls |
//! | [`data_source`] | `MarketDataSource` trait and request/error types |
//! | [`domain`] | Asset ids, timestamps, date ranges, time series |
//! | [`error`] | Validation and core error types |
//! | [`fetcher`] | Concurrent per-asset fetching with retry and timeouts |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`params`] | Raw parameters and the validated `ParameterSet` |
//! | [`progress`] | Stage progress events |
//! | [`retry`] | Backoff strategies |
//! | [`throttling`] | Rate limiting support |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coincast_core::{
//!     CoinGeckoAdapter, MarketDataFetcher, ParameterSet, ProgressSink, RawParameters,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let params = ParameterSet::validate(RawParameters::default())?;
//! let fetcher = MarketDataFetcher::new(Arc::new(CoinGeckoAdapter::from_env()));
//! let outcome = fetcher
//!     .fetch(
//!         params.assets(),
//!         params.date_range(),
//!         params.variables(),
//!         &CancellationToken::new(),
//!         &ProgressSink::disabled(),
//!     )
//!     .await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ParameterSet   │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ MarketData      │────▶│ Retry / Timeout  │
//! │ Fetcher         │     └──────────────────┘
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ MarketData      │────▶│ Circuit Breaker  │
//! │ Source (trait)  │     │ + Throttle       │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ HTTP Client     │
//! │ (reqwest)       │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use coincast_core::{SourceError, SourceErrorKind};
//!
//! fn handle_error(error: SourceError) {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited | SourceErrorKind::Unavailable => {
//!             // retried by the fetcher
//!         }
//!         SourceErrorKind::UnknownAsset => {
//!             // fatal for that asset
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are read from environment variables only (never logged)
//! - Input validation on all domain types

pub mod adapters;
pub mod circuit_breaker;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod params;
pub mod progress;
pub mod retry;
pub mod throttling;

// Adapter implementations
pub use adapters::{ApiTier, CoinGeckoAdapter};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Data source trait and types
pub use data_source::{
    HistoryRequest, MarketDataSource, ProviderId, SourceError, SourceErrorKind, SourceFuture,
};

// Domain models
pub use domain::{
    format_date, parse_date, AssetId, DateRange, Observation, TimeSeries, UtcDateTime, Variable,
};

// Error types
pub use error::{CoreError, ValidationError, ValidationReport};

// Fetching
pub use fetcher::{FetchBatchError, FetchError, FetchOutcome, FetchPolicy, MarketDataFetcher};

// HTTP client types
pub use http_client::{HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};

// Parameters
pub use params::{
    HyperValue, Hyperparameters, Interpolation, Normalization, OutlierAction, OutlierRule,
    ParameterSet, QualitySettings, RawParameters, SplitFractions, SPLIT_TOLERANCE,
};

// Progress
pub use progress::{ProgressEvent, ProgressSink, StageName};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Throttling
pub use throttling::{ProviderPolicy, Throttle};
