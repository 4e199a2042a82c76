//! Behaviour tests for the staged pipeline.
//!
//! These drive the orchestrator end to end against scripted sources and
//! forecasters whose quality is known in advance.

use coincast_core::{
    FetchPolicy, MarketDataFetcher, ParameterSet, RetryConfig, SourceError, StageName,
};
use coincast_ml::{Forecaster, ForecasterRegistry};
use coincast_pipeline::{Orchestrator, PipelineError, RunReport, Stage, StageStatus};
use coincast_tests::{
    asset, parameters, price_path, Arc, BlockingForecaster, FlakyForecaster, MeanForecaster,
    OracleForecaster, Script, ScriptedSource,
};

fn registry(forecasters: Vec<Arc<dyn Forecaster>>) -> ForecasterRegistry {
    forecasters
        .into_iter()
        .try_fold(ForecasterRegistry::new(), |registry, forecaster| {
            registry.with(forecaster)
        })
        .expect("distinct forecaster names")
}

fn orchestrator(
    params: ParameterSet,
    source: ScriptedSource,
    policy: FetchPolicy,
    forecasters: Vec<Arc<dyn Forecaster>>,
) -> Orchestrator {
    let fetcher = MarketDataFetcher::new(Arc::new(source))
        .with_retry(RetryConfig::no_retry())
        .with_policy(policy);
    Orchestrator::new(params, fetcher, registry(forecasters))
}

fn mean_and_oracle() -> Vec<Arc<dyn Forecaster>> {
    vec![Arc::new(MeanForecaster), Arc::new(OracleForecaster)]
}

// =============================================================================
// Pipeline: End-to-End Ranking
// =============================================================================

#[tokio::test]
async fn when_one_model_forecasts_the_truth_it_ranks_above_the_mean_model() {
    // Given: 200 days of bitcoin, split 0.8/0.1/0.1, a mean model and an oracle
    let params = parameters(&["bitcoin"], "2024-01-01", "2024-07-18");
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        mean_and_oracle(),
    );

    // When: The pipeline runs to completion
    let run = orchestrator.run_to_completion().await.expect("pipeline completes");

    // Then: The oracle scores perfectly and wins overall and for bitcoin
    assert_eq!(run.stage(), Stage::Done);
    let report = run.evaluation().expect("evaluation published");
    let bitcoin = asset("bitcoin");

    let oracle = report.result("oracle_b", &bitcoin).expect("oracle result");
    assert!(oracle.metrics.mae < 1e-9, "mae = {}", oracle.metrics.mae);
    assert!(oracle.metrics.rmse < 1e-9, "rmse = {}", oracle.metrics.rmse);
    assert!(oracle.metrics.mape.expect("mape defined") < 1e-9);
    assert!((oracle.metrics.r2.expect("r2 defined") - 1.0).abs() < 1e-9);
    assert_eq!(oracle.metrics.points, 20);

    let mean = report.result("mean_a", &bitcoin).expect("mean result");
    assert!(mean.metrics.mae > oracle.metrics.mae);

    assert_eq!(
        report.ranking.best_per_asset.get(&bitcoin).map(String::as_str),
        Some("oracle_b")
    );
    assert_eq!(report.ranking.winner(), Some("oracle_b"));

    let comparison = report
        .comparison("mean_a", "oracle_b")
        .expect("pairwise comparison");
    assert!(comparison.significant);
    assert_eq!(comparison.better.as_deref(), Some("oracle_b"));
}

#[tokio::test]
async fn when_the_run_is_done_its_report_is_addressable_by_stage_and_key() {
    // Given: A completed run
    let params = parameters(&["bitcoin"], "2024-01-01", "2024-04-09");
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        mean_and_oracle(),
    );
    let run = orchestrator.run_to_completion().await.expect("pipeline completes");

    // When: It is rendered as plain data
    let report = serde_json::to_value(RunReport::from_run(&run)).expect("serializes");

    // Then: Every stage output can be reached by stage name and asset/model
    assert_eq!(report["stage"], "done");
    assert_eq!(report["collecting"]["assets"]["bitcoin"]["observations"], 100);
    assert_eq!(report["preprocessing"]["bitcoin"]["split"]["train"], 80);
    assert_eq!(report["preprocessing"]["bitcoin"]["quality"]["price"]["observed"], 100);
    assert_eq!(
        report["training"]["models"]["oracle_b"]["bitcoin"]["metadata"]["trained_on"],
        80
    );
    assert_eq!(report["training"]["models"]["mean_a"]["bitcoin"]["forecast"]
        .as_array()
        .map(Vec::len), Some(20));
    assert!(report["evaluating"]["results"].is_array());
}

// =============================================================================
// Pipeline: Next-Step Predictions
// =============================================================================

#[tokio::test]
async fn when_the_run_is_done_each_asset_gets_a_next_day_forecast_from_its_best_model() {
    // Given: 100 days of bitcoin, a mean model and an oracle
    let params = parameters(&["bitcoin"], "2024-01-01", "2024-04-09");
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        mean_and_oracle(),
    );

    // When: The pipeline runs to completion
    let run = orchestrator.run_to_completion().await.expect("pipeline completes");

    // Then: The oracle, best for bitcoin, forecasts day 100 from day 99
    let report = RunReport::from_run(&run);
    let prediction = report.prediction(&asset("bitcoin")).expect("bitcoin prediction");
    assert_eq!(prediction.model, "oracle_b");
    assert!((prediction.last_price - price_path(99)).abs() < 1e-9);
    assert!((prediction.next_prediction - price_path(100)).abs() < 1e-6);
    let expected_change = (price_path(100) - price_path(99)) / price_path(99) * 100.0;
    assert!((prediction.change_pct.expect("non-zero last price") - expected_change).abs() < 1e-6);
    assert!(prediction.interval.is_none());

    let json = serde_json::to_value(&report).expect("serializes");
    assert_eq!(json["predictions"][0]["asset"], "bitcoin");
    assert_eq!(json["predictions"][0]["model"], "oracle_b");
}

#[tokio::test]
async fn when_only_the_mean_model_runs_its_next_day_forecast_is_the_training_mean() {
    // Given: Two assets and nothing but the mean model
    let params = parameters(&["bitcoin", "ethereum"], "2024-01-01", "2024-04-09");
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        vec![Arc::new(MeanForecaster)],
    );

    // When: The pipeline runs to completion
    let run = orchestrator.run_to_completion().await.expect("pipeline completes");

    // Then: Every asset is covered and the forecast is the 80-day training mean
    let predictions = run.predictions().expect("predictions published");
    assert_eq!(predictions.len(), 2);
    let training_mean = (0..80).map(price_path).sum::<f64>() / 80.0;
    for prediction in predictions.iter() {
        assert_eq!(prediction.model, "mean_a");
        assert!(
            (prediction.next_prediction - training_mean).abs() < 1e-6,
            "{}: {}",
            prediction.asset,
            prediction.next_prediction
        );
    }
}

// =============================================================================
// Pipeline: Partial Collection Failure
// =============================================================================

#[tokio::test]
async fn when_partial_mode_is_on_a_failed_asset_is_left_out_and_recorded() {
    // Given: Three assets, solana unknown upstream, partial collection allowed
    let params = parameters(&["bitcoin", "ethereum", "solana"], "2024-01-01", "2024-04-09");
    let source = ScriptedSource::new().with(
        "solana",
        Script::Fail(SourceError::unknown_asset(&asset("solana"))),
    );
    let orchestrator = orchestrator(params, source, FetchPolicy::AllowPartial, mean_and_oracle());

    // When: The pipeline runs to completion
    let run = orchestrator.run_to_completion().await.expect("pipeline completes");

    // Then: It is done, solana is absent from evaluation and its error is kept
    assert_eq!(run.stage(), Stage::Done);
    let evaluated = run.evaluation().expect("evaluation").assets();
    assert!(evaluated.contains(&asset("bitcoin")));
    assert!(evaluated.contains(&asset("ethereum")));
    assert!(!evaluated.contains(&asset("solana")));

    let collection = run.collection().expect("collection");
    let failure = collection.failures.get(&asset("solana")).expect("solana failure");
    assert_eq!(failure.code(), "source.unknown_asset");
    assert!(run.warnings().iter().any(|w| w.contains("solana")));
}

#[tokio::test]
async fn when_partial_mode_is_off_one_failed_asset_fails_the_run() {
    // Given: The same failing solana with the default fail-fast policy
    let params = parameters(&["bitcoin", "ethereum", "solana"], "2024-01-01", "2024-04-09");
    let source = ScriptedSource::new().with(
        "solana",
        Script::Fail(SourceError::unknown_asset(&asset("solana"))),
    );
    let orchestrator = orchestrator(params, source, FetchPolicy::FailFast, mean_and_oracle());

    // When: Collection runs
    let error = orchestrator.advance().await.expect_err("collection fails");

    // Then: The failure names the stage and the asset
    let failure = error.failure().expect("stage failure");
    assert_eq!(failure.stage, StageName::Collecting);
    assert_eq!(failure.unit, "solana");
    assert_eq!(failure.code, "source.unknown_asset");

    let run = orchestrator.snapshot();
    assert_eq!(run.stage(), Stage::Failed);
    assert_eq!(run.status(StageName::Collecting), StageStatus::Failed);
    assert!(run.collection().is_none());
}

// =============================================================================
// Pipeline: Training Failure Isolation
// =============================================================================

#[tokio::test]
async fn when_one_model_fails_on_one_asset_the_others_still_train_and_evaluate() {
    // Given: A forecaster that cannot fit bitcoin next to two healthy ones
    let params = parameters(&["bitcoin", "ethereum"], "2024-01-01", "2024-04-09");
    let mut forecasters = mean_and_oracle();
    forecasters.push(Arc::new(FlakyForecaster {
        fails_on: asset("bitcoin"),
    }));
    let orchestrator = orchestrator(params, ScriptedSource::new(), FetchPolicy::FailFast, forecasters);

    // When: The pipeline runs to completion
    let run = orchestrator.run_to_completion().await.expect("pipeline completes");

    // Then: Only the failing pair is missing, and it is flagged
    let training = run.training().expect("training output");
    assert_eq!(training.trained_count(), 5);
    assert_eq!(training.failures.len(), 1);
    assert_eq!(training.failures[0].model, "flaky");
    assert_eq!(training.failures[0].asset, asset("bitcoin"));
    assert_eq!(training.failures[0].error.code(), "training.failed");

    let report = run.evaluation().expect("evaluation");
    assert!(report.result("flaky", &asset("bitcoin")).is_none());
    assert!(report.result("flaky", &asset("ethereum")).is_some());
    assert!(report.result("oracle_b", &asset("bitcoin")).is_some());
}

// =============================================================================
// Pipeline: Fatal Preprocessing
// =============================================================================

#[tokio::test]
async fn when_an_asset_has_no_observed_prices_preprocessing_fails_the_run() {
    // Given: Ethereum answers with only absent prices
    let params = parameters(&["bitcoin", "ethereum"], "2024-01-01", "2024-02-29");
    let missing_every_day = (0..60).collect();
    let source = ScriptedSource::new().with("ethereum", Script::Sparse(missing_every_day));
    let orchestrator = orchestrator(params, source, FetchPolicy::FailFast, mean_and_oracle());

    // When: The pipeline runs
    let error = orchestrator
        .run_to_completion()
        .await
        .expect_err("preprocessing fails");

    // Then: The run is failed at preprocessing for ethereum, collection is kept
    let failure = error.failure().expect("stage failure");
    assert_eq!(failure.stage, StageName::Preprocessing);
    assert_eq!(failure.unit, "ethereum");
    assert_eq!(failure.code, "preprocessing.no_observed_values");

    let run = orchestrator.snapshot();
    assert_eq!(run.stage(), Stage::Failed);
    assert!(run.collection().is_some());
    assert_eq!(
        orchestrator.advance().await.expect_err("still failed"),
        PipelineError::AlreadyFailed {
            stage: StageName::Preprocessing
        }
    );
}

// =============================================================================
// Pipeline: Reset and Cancellation
// =============================================================================

#[tokio::test]
async fn when_reset_mid_training_no_model_is_published_and_the_run_is_configured() {
    // Given: A run whose training never finishes on its own
    let params = parameters(&["bitcoin"], "2024-01-01", "2024-04-09");
    let blocking = BlockingForecaster::default();
    let started = Arc::clone(&blocking.started);
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        vec![Arc::new(MeanForecaster), Arc::new(blocking)],
    );
    orchestrator.advance().await.expect("collecting");
    orchestrator.advance().await.expect("preprocessing");
    let first_run = orchestrator.snapshot().id();

    let driver = orchestrator.clone();
    let training = tokio::spawn(async move { driver.advance().await });
    started.notified().await;
    assert_eq!(orchestrator.stage(), Stage::Training);

    // When: The run is reset while training is in flight
    let fresh = orchestrator.reset();
    let stale = training.await.expect("training task joins");

    // Then: The stale stage is discarded and nothing was published
    assert_eq!(
        stale.expect_err("superseded"),
        PipelineError::Superseded {
            stage: StageName::Training
        }
    );
    let run = orchestrator.snapshot();
    assert_eq!(run.stage(), Stage::Configured);
    assert_eq!(run.id(), fresh.id());
    assert_ne!(run.id(), first_run);
    assert!(run.training().is_none());
    assert!(run.collection().is_none());
    assert_eq!(run.status(StageName::Training), StageStatus::Pending);
}

#[tokio::test]
async fn when_cancelled_mid_training_the_run_fails_as_cancelled() {
    // Given: Training blocked on a forecaster that only stops when cancelled
    let params = parameters(&["bitcoin"], "2024-01-01", "2024-04-09");
    let blocking = BlockingForecaster::default();
    let started = Arc::clone(&blocking.started);
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        vec![Arc::new(blocking)],
    );
    orchestrator.advance().await.expect("collecting");
    orchestrator.advance().await.expect("preprocessing");

    let driver = orchestrator.clone();
    let training = tokio::spawn(async move { driver.advance().await });
    started.notified().await;

    // When: The in-flight stage is cancelled
    assert!(orchestrator.cancel());
    let error = training
        .await
        .expect("training task joins")
        .expect_err("cancelled");

    // Then: The run is failed at training with a cancellation code
    let failure = error.failure().expect("stage failure");
    assert_eq!(failure.stage, StageName::Training);
    assert!(failure.is_cancelled());
    assert_eq!(orchestrator.stage(), Stage::Failed);
    assert!(orchestrator.snapshot().training().is_none());
}

#[tokio::test]
async fn when_a_stage_is_running_another_advance_is_refused() {
    // Given: Collection stuck on a source that never answers
    let params = parameters(&["bitcoin"], "2024-01-01", "2024-04-09");
    let source = ScriptedSource::new().with("bitcoin", Script::Hang);
    let orchestrator = orchestrator(params, source, FetchPolicy::FailFast, mean_and_oracle());

    let driver = orchestrator.clone();
    let collecting = tokio::spawn(async move { driver.advance().await });
    while orchestrator.stage() != Stage::Collecting {
        tokio::task::yield_now().await;
    }

    // When: A second caller tries to advance
    let error = orchestrator.advance().await.expect_err("busy");

    // Then: It is told which stage is running, and reset frees the run
    assert_eq!(
        error,
        PipelineError::Busy {
            stage: Stage::Collecting
        }
    );
    orchestrator.reset();
    let stale = collecting.await.expect("task joins");
    assert!(matches!(stale, Err(PipelineError::Superseded { .. })));
    assert_eq!(orchestrator.stage(), Stage::Configured);
}

// =============================================================================
// Pipeline: Progress Reporting
// =============================================================================

#[tokio::test]
async fn when_subscribed_progress_follows_real_units_of_work() {
    // Given: Two assets, two models and a subscriber
    let params = parameters(&["bitcoin", "ethereum"], "2024-01-01", "2024-04-09");
    let orchestrator = orchestrator(
        params,
        ScriptedSource::new(),
        FetchPolicy::FailFast,
        mean_and_oracle(),
    );
    let mut progress = orchestrator.subscribe();

    // When: The pipeline runs
    orchestrator.run_to_completion().await.expect("pipeline completes");

    // Then: Events arrive stage by stage, one per finished unit
    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    let stages: Vec<StageName> = events.iter().map(|e| e.stage).collect();
    let mut sorted = stages.clone();
    sorted.sort();
    assert_eq!(stages, sorted, "stages are reported in order");

    let collected = events
        .iter()
        .filter(|e| e.stage == StageName::Collecting)
        .count();
    assert_eq!(collected, 2);

    let trained_units: std::collections::BTreeSet<&str> = events
        .iter()
        .filter(|e| e.stage == StageName::Training)
        .map(|e| e.unit.as_str())
        .collect();
    assert!(trained_units.contains("oracle_b/bitcoin"));
    assert!(trained_units.contains("mean_a/ethereum"));
    assert!(events
        .iter()
        .all(|e| e.completed <= e.total && e.total > 0));
    assert_eq!(events.last().map(|e| e.stage), Some(StageName::Evaluating));
}
