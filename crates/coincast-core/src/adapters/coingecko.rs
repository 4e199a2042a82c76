use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

use serde::Deserialize;
use time::{Date, Duration, Time};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::data_source::{HistoryRequest, MarketDataSource, ProviderId, SourceError, SourceFuture};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::throttling::{ProviderPolicy, Throttle};
use crate::{AssetId, Observation, TimeSeries, UtcDateTime, Variable};

const PUBLIC_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PRO_BASE_URL: &str = "https://pro-api.coingecko.com/api/v3";

/// CoinGecko key tier; decides the base URL and the auth header name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiTier {
    Demo,
    Pro,
}

/// Historical market data from the CoinGecko `market_chart/range` endpoint.
///
/// # Environment Variables
///
/// | Variable | Purpose |
/// |----------|---------|
/// | `COINCAST_COINGECKO_API_KEY` | API key (fallback `COINGECKO_API_KEY`) |
/// | `COINCAST_COINGECKO_PRO` | `1`/`true` selects the pro endpoint |
pub struct CoinGeckoAdapter {
    http_client: Arc<dyn HttpClient>,
    auth: HttpAuth,
    base_url: String,
    vs_currency: String,
    timeout_ms: u64,
    circuit_breaker: Arc<CircuitBreaker>,
    throttle: Throttle,
}

impl CoinGeckoAdapter {
    /// Anonymous access to the public API.
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            auth: HttpAuth::None,
            base_url: String::from(PUBLIC_BASE_URL),
            vs_currency: String::from("usd"),
            timeout_ms: 15_000,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "coingecko",
                CircuitBreakerConfig::default(),
            )),
            throttle: Throttle::from_policy(&ProviderPolicy::coingecko_default()),
        }
    }

    /// Reqwest-backed adapter configured from environment variables.
    pub fn from_env() -> Self {
        let adapter = Self::new(Arc::new(ReqwestHttpClient::new()));
        let key = env::var("COINCAST_COINGECKO_API_KEY")
            .or_else(|_| env::var("COINGECKO_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());
        let pro = env::var("COINCAST_COINGECKO_PRO")
            .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        match key {
            Some(key) if pro => adapter.with_api_key(key, ApiTier::Pro),
            Some(key) => adapter.with_api_key(key, ApiTier::Demo),
            None => adapter,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>, tier: ApiTier) -> Self {
        let (header, base_url) = match tier {
            ApiTier::Demo => ("x-cg-demo-api-key", PUBLIC_BASE_URL),
            ApiTier::Pro => ("x-cg-pro-api-key", PRO_BASE_URL),
        };
        self.auth = HttpAuth::Header {
            name: String::from(header),
            value: key.into(),
        };
        self.base_url = String::from(base_url);
        if tier == ApiTier::Pro {
            self.throttle = Throttle::from_policy(&ProviderPolicy::coingecko_pro());
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_vs_currency(mut self, vs_currency: impl Into<String>) -> Self {
        self.vs_currency = vs_currency.into().to_ascii_lowercase();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    fn build_request(&self, req: &HistoryRequest) -> HttpRequest {
        let from = unix_midnight(req.range.start());
        let to = unix_midnight(req.range.end() + Duration::days(1));

        HttpRequest::get(format!(
            "{}/coins/{}/market_chart/range",
            self.base_url,
            urlencoding::encode(req.asset.as_str())
        ))
        .with_query("vs_currency", self.vs_currency.as_str())
        .with_query("from", from.to_string())
        .with_query("to", to.to_string())
        .with_header("accept", "application/json")
        .with_auth(&self.auth)
        .with_timeout_ms(self.timeout_ms)
    }

    async fn fetch_range(&self, req: HistoryRequest) -> Result<TimeSeries, SourceError> {
        self.circuit_breaker.guard()?;
        self.throttle.acquire().await;

        let outcome = self.call_upstream(&req).await;
        self.circuit_breaker.observe(&outcome);
        parse_market_chart(&outcome?.body, &req)
    }

    async fn call_upstream(&self, req: &HistoryRequest) -> Result<HttpResponse, SourceError> {
        let request = self.build_request(req);
        tracing::debug!(asset = %req.asset, url = %request.url, "requesting market chart range");

        let response = self.http_client.execute(request).await.map_err(|error| {
            if error.timed_out() {
                SourceError::timeout(format!("coingecko request timed out: {}", error.message()))
            } else if error.retryable() {
                SourceError::unavailable(format!("coingecko transport error: {}", error.message()))
            } else {
                SourceError::internal(format!("coingecko transport error: {}", error.message()))
            }
        })?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(classify_status(&response, &req.asset))
        }
    }
}

impl MarketDataSource for CoinGeckoAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Coingecko
    }

    fn fetch_history<'a>(&'a self, req: HistoryRequest) -> SourceFuture<'a, TimeSeries> {
        Box::pin(self.fetch_range(req))
    }
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    market_caps: Vec<(f64, Option<f64>)>,
    #[serde(default)]
    total_volumes: Vec<(f64, Option<f64>)>,
}

fn classify_status(response: &HttpResponse, asset: &AssetId) -> SourceError {
    match response.status {
        401 | 403 => SourceError::unauthorized(format!(
            "coingecko rejected credentials (status {})",
            response.status
        )),
        404 => SourceError::unknown_asset(asset),
        408 => SourceError::timeout("coingecko returned status 408"),
        429 => SourceError::rate_limited("coingecko rate limit exceeded (status 429)"),
        status if status >= 500 => {
            SourceError::unavailable(format!("coingecko returned status {status}"))
        }
        status => SourceError::invalid_request(format!(
            "coingecko returned status {status}: {}",
            truncate(&response.body, 200)
        )),
    }
}

/// Parses the `[[unix_ms, value], ...]` arrays into one observation per UTC day.
///
/// The last point of a day is kept, which for intraday granularity is the
/// closing value. Null, negative or non-finite values are treated as absent.
fn parse_market_chart(body: &str, req: &HistoryRequest) -> Result<TimeSeries, SourceError> {
    let chart: MarketChartResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::internal(format!("failed to parse coingecko chart: {e}")))?;

    let mut days: BTreeMap<Date, [Option<f64>; 3]> = BTreeMap::new();
    let columns = [
        (Variable::Price, &chart.prices),
        (Variable::Volume, &chart.total_volumes),
        (Variable::MarketCap, &chart.market_caps),
    ];

    for (slot, (variable, points)) in columns.into_iter().enumerate() {
        if !req.wants(variable) {
            continue;
        }
        for &(millis, value) in points {
            let ts = UtcDateTime::from_unix_millis(millis as i64)
                .map_err(|e| SourceError::internal(format!("invalid coingecko timestamp: {e}")))?;
            let day = ts.date();
            if !req.range.contains(day) {
                continue;
            }
            let value = value.filter(|v| v.is_finite() && *v >= 0.0);
            let entry = days.entry(day).or_insert([None; 3]);
            if value.is_some() {
                entry[slot] = value;
            }
        }
    }

    let mut observations = Vec::with_capacity(days.len());
    for (day, [price, volume, market_cap]) in days {
        let observation = Observation::new(UtcDateTime::start_of_day(day), price, volume, market_cap)
            .map_err(|e| SourceError::internal(format!("invalid coingecko value: {e}")))?;
        observations.push(observation);
    }

    TimeSeries::new(req.asset.clone(), observations)
        .map_err(|e| SourceError::internal(format!("invalid coingecko series: {e}")))
}

fn unix_midnight(date: Date) -> i64 {
    date.with_time(Time::MIDNIGHT).assume_utc().unix_timestamp()
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
