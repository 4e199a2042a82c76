//! Behaviour tests for market data collection: retries, timeouts, gap
//! alignment and cancellation.

use std::time::Duration;

use coincast_core::{
    FetchBatchError, FetchError, FetchPolicy, MarketDataFetcher, ProgressSink, RetryConfig,
    SourceError, Variable,
};
use coincast_tests::{asset, range, Arc, Script, ScriptedSource};
use tokio_util::sync::CancellationToken;

fn quick_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::fixed(Duration::from_millis(1), max_retries)
}

// =============================================================================
// Fetcher: Transient Failures
// =============================================================================

#[tokio::test]
async fn when_the_source_is_rate_limited_briefly_the_fetch_recovers() {
    // Given: A source that rate-limits bitcoin twice before answering
    let source = Arc::new(ScriptedSource::new().with(
        "bitcoin",
        Script::FailTimes(2, SourceError::rate_limited("slow down")),
    ));
    let fetcher = MarketDataFetcher::new(source.clone()).with_retry(quick_retry(3));

    // When: Bitcoin history is fetched
    let outcome = fetcher
        .fetch(
            &[asset("bitcoin")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price],
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
        .expect("fetch recovers");

    // Then: The third attempt succeeds and is recorded
    assert_eq!(source.calls("bitcoin"), 3);
    assert_eq!(outcome.attempts.get(&asset("bitcoin")), Some(&3));
    assert_eq!(outcome.series[&asset("bitcoin")].len(), 31);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn when_transient_failures_persist_retries_are_bounded() {
    // Given: A source that is always unavailable
    let source = Arc::new(
        ScriptedSource::new().with("bitcoin", Script::Fail(SourceError::unavailable("502"))),
    );
    let fetcher = MarketDataFetcher::new(source.clone()).with_retry(quick_retry(2));

    // When: Bitcoin history is fetched
    let error = fetcher
        .fetch(
            &[asset("bitcoin")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price],
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
        .expect_err("retries run out");

    // Then: One initial attempt plus two retries were made
    assert_eq!(source.calls("bitcoin"), 3);
    match error {
        FetchBatchError::Asset(FetchError::RetriesExhausted { attempts, .. }) => {
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn when_the_asset_is_unknown_it_is_not_retried() {
    // Given: A source that does not know the asset
    let source = Arc::new(ScriptedSource::new().with(
        "not-a-coin",
        Script::Fail(SourceError::unknown_asset(&asset("not-a-coin"))),
    ));
    let fetcher = MarketDataFetcher::new(source.clone()).with_retry(quick_retry(5));

    // When: Its history is fetched
    let error = fetcher
        .fetch(
            &[asset("not-a-coin")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price],
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
        .expect_err("fatal");

    // Then: A single attempt was made and the error is fatal
    assert_eq!(source.calls("not-a-coin"), 1);
    assert!(matches!(
        error,
        FetchBatchError::Asset(FetchError::Fatal { .. })
    ));
}

#[tokio::test]
async fn when_an_attempt_exceeds_its_timeout_it_fails_as_a_timeout() {
    // Given: A source that never answers and a short attempt timeout
    let source = Arc::new(ScriptedSource::new().with("bitcoin", Script::Hang));
    let fetcher = MarketDataFetcher::new(source)
        .with_retry(RetryConfig::no_retry())
        .with_attempt_timeout(Duration::from_millis(20));

    // When: Bitcoin history is fetched
    let error = fetcher
        .fetch(
            &[asset("bitcoin")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price],
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
        .expect_err("times out");

    // Then: The failure is a timeout for that asset
    match error {
        FetchBatchError::Asset(failure) => {
            assert_eq!(failure.asset(), &asset("bitcoin"));
            assert_eq!(failure.code(), "source.timeout");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// Fetcher: Gaps and Policies
// =============================================================================

#[tokio::test]
async fn when_days_are_missing_upstream_the_series_keeps_every_calendar_day() {
    // Given: A source that omits days 3, 4 and 10
    let source = Arc::new(ScriptedSource::new().with("bitcoin", Script::Sparse(vec![3, 4, 10])));
    let fetcher = MarketDataFetcher::new(source);

    // When: The month is fetched
    let outcome = fetcher
        .fetch(
            &[asset("bitcoin")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price, Variable::Volume],
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
        .expect("fetch succeeds");

    // Then: Missing days are present as absent values, never zeros
    let series = &outcome.series[&asset("bitcoin")];
    assert_eq!(series.len(), 31);
    let prices = series.values(Variable::Price);
    assert_eq!(prices[3], None);
    assert_eq!(prices[4], None);
    assert_eq!(prices[10], None);
    assert_eq!(series.present_count(Variable::Price), 28);
    assert_eq!(series.present_count(Variable::MarketCap), 0);
}

#[tokio::test]
async fn when_every_asset_fails_partial_mode_still_reports_nothing_fetched() {
    // Given: Partial mode and two unknown assets
    let source = Arc::new(
        ScriptedSource::new()
            .with("alpha", Script::Fail(SourceError::unknown_asset(&asset("alpha"))))
            .with("beta", Script::Fail(SourceError::unknown_asset(&asset("beta")))),
    );
    let fetcher = MarketDataFetcher::new(source).with_policy(FetchPolicy::AllowPartial);

    // When: Both are fetched
    let error = fetcher
        .fetch(
            &[asset("alpha"), asset("beta")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price],
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
        .expect_err("nothing fetched");

    // Then: Every failure is listed
    match error {
        FetchBatchError::NothingFetched { failures } => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// Fetcher: Cancellation
// =============================================================================

#[tokio::test]
async fn when_cancelled_the_batch_stops_without_waiting_for_the_source() {
    // Given: A source that hangs and a long attempt timeout
    let source = Arc::new(ScriptedSource::new().with("bitcoin", Script::Hang));
    let fetcher = MarketDataFetcher::new(source).with_attempt_timeout(Duration::from_secs(60));
    let cancel = CancellationToken::new();

    // When: The batch is cancelled shortly after it starts
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let started = std::time::Instant::now();
    let error = fetcher
        .fetch(
            &[asset("bitcoin"), asset("ethereum")],
            range("2024-01-01", "2024-01-31"),
            &[Variable::Price],
            &cancel,
            &ProgressSink::disabled(),
        )
        .await
        .expect_err("cancelled");

    // Then: It reports cancellation promptly
    assert_eq!(error, FetchBatchError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
}
