//! Market data source trait and request/error types.
//!
//! This module defines the adapter contract (`MarketDataSource`) every
//! upstream provider implements. The only input contract the pipeline relies
//! on is "given an asset id, a date range and a variable set, return a
//! [`TimeSeries`], possibly with gaps".
//!
//! # Example
//!
//! ```rust,ignore
//! use coincast_core::{AssetId, CoinGeckoAdapter, HistoryRequest, MarketDataSource, Variable};
//!
//! async fn fetch(adapter: &CoinGeckoAdapter, range: DateRange) -> Result<(), SourceError> {
//!     let request = HistoryRequest::new(AssetId::parse("bitcoin")?, range, vec![Variable::Price])?;
//!     let series = adapter.fetch_history(request).await?;
//!     println!("{} observations", series.len());
//!     Ok(())
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{AssetId, DateRange, TimeSeries, Variable};

/// Identifier of an upstream market data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Coingecko,
    /// In-process sources such as fixtures and replays.
    Local,
}

impl ProviderId {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Coingecko => "coingecko",
            Self::Local => "local",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    Timeout,
    InvalidRequest,
    UnknownAsset,
    Unauthorized,
    Internal,
}

/// Structured source error; `retryable` separates transient from fatal failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unknown_asset(asset: &AssetId) -> Self {
        Self {
            kind: SourceErrorKind::UnknownAsset,
            message: format!("asset '{asset}' is not known to the upstream source"),
            retryable: false,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unauthorized,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::UnknownAsset => "source.unknown_asset",
            SourceErrorKind::Unauthorized => "source.unauthorized",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Request payload for historical market data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub asset: AssetId,
    pub range: DateRange,
    pub variables: Vec<Variable>,
}

impl HistoryRequest {
    pub fn new(
        asset: AssetId,
        range: DateRange,
        variables: Vec<Variable>,
    ) -> Result<Self, SourceError> {
        if variables.is_empty() {
            return Err(SourceError::invalid_request(
                "history request must include at least one variable",
            ));
        }
        Ok(Self {
            asset,
            range,
            variables,
        })
    }

    pub fn wants(&self, variable: Variable) -> bool {
        self.variables.contains(&variable)
    }
}

/// Boxed future returned by source adapters.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Market data adapter contract.
///
/// Implementations must be `Send + Sync`; the fetcher shares one adapter
/// across concurrent per-asset tasks.
pub trait MarketDataSource: Send + Sync {
    /// Returns the provider identifier.
    fn id(&self) -> ProviderId;

    /// Fetches the historical series for one asset.
    ///
    /// Days the upstream has no data for may be missing from the result; the
    /// fetcher re-aligns the series onto the requested calendar.
    ///
    /// # Errors
    ///
    /// Returns a retryable [`SourceError`] for transient conditions (network,
    /// rate limit, timeout, upstream 5xx) and a non-retryable one for unknown
    /// assets, rejected credentials and malformed responses.
    fn fetch_history<'a>(&'a self, req: HistoryRequest) -> SourceFuture<'a, TimeSeries>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn history_request_requires_variables() {
        let asset = AssetId::parse("bitcoin").expect("valid");
        let range = DateRange::new(date!(2024 - 01 - 01), date!(2024 - 02 - 01)).expect("valid");

        let err = HistoryRequest::new(asset, range, Vec::new()).expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::InvalidRequest);
        assert!(err.message().contains("variable"));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SourceError::rate_limited("slow down").code(), "source.rate_limited");
        assert!(SourceError::timeout("late").retryable());
        assert!(!SourceError::unauthorized("bad key").retryable());
    }
}
