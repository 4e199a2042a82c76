use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AssetId, DateRange, UtcDateTime, ValidationError};

/// Market variable collected per observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Price,
    Volume,
    MarketCap,
}

impl Variable {
    pub const ALL: [Self; 3] = [Self::Price, Self::Volume, Self::MarketCap];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Volume => "volume",
            Self::MarketCap => "market_cap",
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variable {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "price" => Ok(Self::Price),
            "volume" => Ok(Self::Volume),
            "market_cap" | "marketcap" => Ok(Self::MarketCap),
            other => Err(ValidationError::InvalidVariable {
                value: other.to_owned(),
            }),
        }
    }
}

/// One timestamped record. `None` marks an absent value, never zero.
///
/// Present values are finite and non-negative; [`Observation::new`] and
/// deserialization both enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ObservationRecord")]
pub struct Observation {
    ts: UtcDateTime,
    price: Option<f64>,
    volume: Option<f64>,
    market_cap: Option<f64>,
}

#[derive(Deserialize)]
struct ObservationRecord {
    ts: UtcDateTime,
    price: Option<f64>,
    volume: Option<f64>,
    market_cap: Option<f64>,
}

impl TryFrom<ObservationRecord> for Observation {
    type Error = ValidationError;

    fn try_from(record: ObservationRecord) -> Result<Self, Self::Error> {
        Self::new(record.ts, record.price, record.volume, record.market_cap)
    }
}

impl Observation {
    pub fn new(
        ts: UtcDateTime,
        price: Option<f64>,
        volume: Option<f64>,
        market_cap: Option<f64>,
    ) -> Result<Self, ValidationError> {
        validate_optional_non_negative("price", price)?;
        validate_optional_non_negative("volume", volume)?;
        validate_optional_non_negative("market_cap", market_cap)?;

        Ok(Self {
            ts,
            price,
            volume,
            market_cap,
        })
    }

    /// Observation with every variable absent.
    pub fn absent(ts: UtcDateTime) -> Self {
        Self {
            ts,
            price: None,
            volume: None,
            market_cap: None,
        }
    }

    pub fn ts(&self) -> UtcDateTime {
        self.ts
    }

    pub fn price(&self) -> Option<f64> {
        self.price
    }

    pub fn volume(&self) -> Option<f64> {
        self.volume
    }

    pub fn market_cap(&self) -> Option<f64> {
        self.market_cap
    }

    pub fn value(&self, variable: Variable) -> Option<f64> {
        match variable {
            Variable::Price => self.price,
            Variable::Volume => self.volume,
            Variable::MarketCap => self.market_cap,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.volume.is_none() && self.market_cap.is_none()
    }

    fn clear(&mut self, variable: Variable) {
        match variable {
            Variable::Price => self.price = None,
            Variable::Volume => self.volume = None,
            Variable::MarketCap => self.market_cap = None,
        }
    }
}

/// Ordered per-asset series with strictly increasing timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TimeSeriesRecord")]
pub struct TimeSeries {
    asset: AssetId,
    observations: Vec<Observation>,
}

#[derive(Deserialize)]
struct TimeSeriesRecord {
    asset: AssetId,
    observations: Vec<Observation>,
}

impl TryFrom<TimeSeriesRecord> for TimeSeries {
    type Error = ValidationError;

    fn try_from(record: TimeSeriesRecord) -> Result<Self, Self::Error> {
        Self::new(record.asset, record.observations)
    }
}

impl TimeSeries {
    pub fn new(asset: AssetId, observations: Vec<Observation>) -> Result<Self, ValidationError> {
        for (index, pair) in observations.windows(2).enumerate() {
            if pair[1].ts <= pair[0].ts {
                return Err(ValidationError::UnorderedObservations { index: index + 1 });
            }
        }
        Ok(Self {
            asset,
            observations,
        })
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn timestamps(&self) -> Vec<UtcDateTime> {
        self.observations.iter().map(|obs| obs.ts).collect()
    }

    pub fn values(&self, variable: Variable) -> Vec<Option<f64>> {
        self.observations
            .iter()
            .map(|obs| obs.value(variable))
            .collect()
    }

    pub fn present_count(&self, variable: Variable) -> usize {
        self.observations
            .iter()
            .filter(|obs| obs.value(variable).is_some())
            .count()
    }

    /// Re-indexes the series onto one observation per calendar day of `range`.
    ///
    /// Days the upstream did not report become explicit absent observations;
    /// observations outside the range are dropped. When several observations
    /// fall on the same day the last one wins.
    pub fn align_daily(&self, range: DateRange) -> Self {
        let mut by_day = BTreeMap::new();
        for obs in &self.observations {
            let day = obs.ts.date();
            if range.contains(day) {
                by_day.insert(day, *obs);
            }
        }

        let observations = range
            .days()
            .map(|day| {
                let ts = UtcDateTime::start_of_day(day);
                match by_day.get(&day) {
                    Some(found) => Observation { ts, ..*found },
                    None => Observation::absent(ts),
                }
            })
            .collect();

        Self {
            asset: self.asset.clone(),
            observations,
        }
    }

    /// Drops every variable not in `keep`, marking it absent.
    pub fn restrict_to(&self, keep: &[Variable]) -> Self {
        let mut observations = self.observations.clone();
        for variable in Variable::ALL {
            if keep.contains(&variable) {
                continue;
            }
            for obs in &mut observations {
                obs.clear(variable);
            }
        }
        Self {
            asset: self.asset.clone(),
            observations,
        }
    }
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(value) = value {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field });
        }
        if value < 0.0 {
            return Err(ValidationError::NegativeValue { field });
        }
    }
    Ok(())
}
