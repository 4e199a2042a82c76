//! # Domain Models
//!
//! Canonical domain types for coincast market data.
//!
//! All models validate their invariants at construction time, so an
//! [`AssetId`] is always normalized, a [`DateRange`] always has
//! `start < end`, and a [`TimeSeries`] always has strictly increasing
//! timestamps.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AssetId`] | Validated asset identifier (`bitcoin`, `usd-coin`) |
//! | [`DateRange`] | Inclusive calendar range |
//! | [`Variable`] | `price`, `volume`, `market_cap` |
//! | [`Observation`] | One timestamped record with optional values |
//! | [`TimeSeries`] | Ordered per-asset observations |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Missing values are explicit:
//!
//! ```rust,ignore
//! use coincast_core::{Observation, UtcDateTime, Variable};
//!
//! let ts = UtcDateTime::parse("2024-01-01T00:00:00Z")?;
//! let gap = Observation::absent(ts);
//! assert!(gap.value(Variable::Price).is_none());
//! ```

mod asset;
mod date_range;
mod series;
mod timestamp;

pub use asset::AssetId;
pub use date_range::{format_date, parse_date, DateRange};
pub use series::{Observation, TimeSeries, Variable};
pub use timestamp::UtcDateTime;
