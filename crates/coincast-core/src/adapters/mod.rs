//! Upstream provider adapters.

mod coingecko;

pub use coingecko::{ApiTier, CoinGeckoAdapter};
