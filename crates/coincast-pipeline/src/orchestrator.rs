//! Stage sequencing, cancellation and reset.
//!
//! The orchestrator is the only writer of [`PipelineRun`]. A stage runs
//! outside the state lock; its output is published only after all of its
//! sub-tasks have resolved, and only if the run was not reset meanwhile.

use std::sync::{Arc, Mutex, MutexGuard};

use coincast_core::{MarketDataFetcher, ParameterSet, ProgressEvent, ProgressSink, StageName};
use coincast_ml::{EvaluationEngine, ForecasterRegistry};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, StageFailure};
use crate::run::{
    CollectionOutput, EvaluationOutput, PipelineRun, PreprocessingOutput, TrainingOutput,
};
use crate::stage::{next_work, Stage};
use crate::stages::{self, Environment};

struct RunState {
    run: Arc<PipelineRun>,
    cancel: CancellationToken,
    generation: u64,
    in_flight: Option<StageName>,
}

struct Shared {
    state: Mutex<RunState>,
    subscribers: Mutex<Vec<UnboundedSender<ProgressEvent>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().expect("run state lock is not poisoned")
    }
}

enum StageOutput {
    Collection(CollectionOutput),
    Preprocessing(PreprocessingOutput),
    Training(TrainingOutput, Vec<String>),
    Evaluation(EvaluationOutput),
}

/// Cloneable handle that owns and drives one pipeline run at a time.
#[derive(Clone)]
pub struct Orchestrator {
    env: Arc<Environment>,
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        parameters: ParameterSet,
        fetcher: MarketDataFetcher,
        registry: ForecasterRegistry,
    ) -> Self {
        let parameters = Arc::new(parameters);
        Self {
            env: Arc::new(Environment {
                fetcher,
                registry,
                evaluation: EvaluationEngine::default(),
            }),
            shared: Arc::new(Shared {
                state: Mutex::new(RunState {
                    run: Arc::new(PipelineRun::configured(parameters, 0)),
                    cancel: CancellationToken::new(),
                    generation: 0,
                    in_flight: None,
                }),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_evaluation_engine(mut self, engine: EvaluationEngine) -> Self {
        Arc::make_mut(&mut self.env).evaluation = engine;
        self
    }

    pub fn registry(&self) -> &ForecasterRegistry {
        &self.env.registry
    }

    /// Current run; the returned value never changes.
    pub fn snapshot(&self) -> Arc<PipelineRun> {
        Arc::clone(&self.shared.state().run)
    }

    pub fn stage(&self) -> Stage {
        self.shared.state().run.stage()
    }

    /// Receives progress events of every stage started after this call.
    pub fn subscribe(&self) -> UnboundedReceiver<ProgressEvent> {
        let (sender, receiver) = unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .expect("subscriber lock is not poisoned")
            .push(sender);
        receiver
    }

    fn progress_sink(&self) -> ProgressSink {
        let mut subscribers = self
            .shared
            .subscribers
            .lock()
            .expect("subscriber lock is not poisoned");
        subscribers.retain(|sender| !sender.is_closed());
        ProgressSink::broadcast(subscribers.iter().cloned())
    }

    /// Runs exactly one stage, the one after the latest completed stage.
    pub async fn advance(&self) -> Result<Arc<PipelineRun>, PipelineError> {
        let (stage, generation, run, cancel) = {
            let mut state = self.shared.state();
            if let Some(stage) = state.in_flight {
                return Err(PipelineError::Busy {
                    stage: stage.into(),
                });
            }
            match state.run.stage() {
                Stage::Done => return Err(PipelineError::AlreadyDone),
                Stage::Failed => {
                    let stage = state
                        .run
                        .failure()
                        .map(|failure| failure.stage)
                        .unwrap_or(StageName::Collecting);
                    return Err(PipelineError::AlreadyFailed { stage });
                }
                _ => {}
            }
            let stage = next_work(state.run.last_completed()).ok_or(PipelineError::AlreadyDone)?;

            Arc::make_mut(&mut state.run).begin(stage);
            state.in_flight = Some(stage);
            (
                stage,
                state.generation,
                Arc::clone(&state.run),
                state.cancel.child_token(),
            )
        };

        tracing::info!(run_id = %run.id(), stage = %stage, "stage started");
        let mut guard = InFlight {
            shared: &self.shared,
            cancel: cancel.clone(),
            generation,
            stage,
            armed: true,
        };
        let result = self.execute(stage, &run, &cancel).await;
        guard.armed = false;

        let mut state = self.shared.state();
        if state.generation != generation {
            tracing::info!(run_id = %run.id(), stage = %stage, "discarding output of a reset run");
            return Err(PipelineError::Superseded { stage });
        }
        state.in_flight = None;

        let current = Arc::make_mut(&mut state.run);
        match result {
            Ok(output) => {
                match output {
                    StageOutput::Collection(output) => {
                        for (asset, failure) in &output.failures {
                            current.warn(format!("asset `{asset}` left out: {failure}"));
                        }
                        current.publish_collection(output);
                    }
                    StageOutput::Preprocessing(output) => current.publish_preprocessing(output),
                    StageOutput::Training(output, warnings) => {
                        for warning in warnings {
                            current.warn(warning);
                        }
                        current.publish_training(output);
                    }
                    StageOutput::Evaluation(output) => current.publish_evaluation(output),
                }
                tracing::info!(run_id = %current.id(), stage = %stage, "stage completed");
                Ok(Arc::clone(&state.run))
            }
            Err(failure) => {
                tracing::error!(
                    run_id = %current.id(),
                    stage = %stage,
                    unit = %failure.unit,
                    code = %failure.code,
                    "stage failed: {}",
                    failure.message
                );
                current.fail(failure.clone());
                Err(PipelineError::StageFailed(failure))
            }
        }
    }

    async fn execute(
        &self,
        stage: StageName,
        run: &PipelineRun,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageFailure> {
        let progress = self.progress_sink();
        let params = run.parameters();
        let missing = |needed: &str| {
            StageFailure::new(
                stage,
                "run",
                "pipeline.missing_input",
                format!("{needed} output is not available"),
            )
        };

        match stage {
            StageName::Collecting => stages::collect(&self.env, params, cancel, &progress)
                .await
                .map(StageOutput::Collection),
            StageName::Preprocessing => {
                let collection = run.collection().ok_or_else(|| missing("collecting"))?;
                stages::preprocess(params, collection, cancel, &progress)
                    .await
                    .map(StageOutput::Preprocessing)
            }
            StageName::Training => {
                let preprocessing = run
                    .preprocessing()
                    .ok_or_else(|| missing("preprocessing"))?;
                stages::train(&self.env, params, preprocessing, cancel, &progress)
                    .await
                    .map(|(output, warnings)| StageOutput::Training(output, warnings))
            }
            StageName::Evaluating => {
                let preprocessing = run
                    .preprocessing()
                    .ok_or_else(|| missing("preprocessing"))?;
                let training = run.training().ok_or_else(|| missing("training"))?;
                if cancel.is_cancelled() {
                    return Err(StageFailure::cancelled(stage, "all"));
                }
                let report = stages::evaluate(&self.env, preprocessing, training, &progress)?;
                let predictions =
                    stages::predict_next(&self.env, preprocessing, training, &report, cancel)
                        .await?;
                Ok(StageOutput::Evaluation(EvaluationOutput {
                    report,
                    predictions,
                }))
            }
        }
    }

    /// Advances until the run is `done` or a stage fails.
    pub async fn run_to_completion(&self) -> Result<Arc<PipelineRun>, PipelineError> {
        loop {
            let run = self.advance().await?;
            if run.stage() == Stage::Done {
                return Ok(run);
            }
        }
    }

    /// Abandons the in-flight stage, which then fails as cancelled.
    ///
    /// Returns `false` when no stage is running.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state();
        if state.in_flight.is_none() {
            return false;
        }
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        true
    }

    /// Cancels in-flight work and starts over from `configured` with a new run id.
    ///
    /// Output of the abandoned stage is discarded when it eventually resolves.
    pub fn reset(&self) -> Arc<PipelineRun> {
        let mut state = self.shared.state();
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.generation += 1;
        state.in_flight = None;
        let parameters = Arc::clone(state.run.parameters());
        state.run = Arc::new(PipelineRun::configured(parameters, state.generation));
        tracing::info!(run_id = %state.run.id(), generation = state.generation, "pipeline reset");
        Arc::clone(&state.run)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let run = self.snapshot();
        f.debug_struct("Orchestrator")
            .field("run_id", &run.id())
            .field("stage", &run.stage())
            .field("registry", &self.env.registry)
            .finish()
    }
}

/// Marks the stage cancelled if the `advance` future is dropped mid-stage.
struct InFlight<'a> {
    shared: &'a Shared,
    cancel: CancellationToken,
    generation: u64,
    stage: StageName,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();
        let mut state = self.shared.state();
        if state.generation == self.generation && state.in_flight == Some(self.stage) {
            state.in_flight = None;
            Arc::make_mut(&mut state.run).fail(StageFailure::cancelled(self.stage, "run"));
        }
    }
}

#[cfg(test)]
mod tests {
    use coincast_core::{
        AssetId, HistoryRequest, MarketDataSource, Observation, ProviderId, RawParameters,
        RetryConfig, SourceFuture, TimeSeries, UtcDateTime,
    };

    use super::*;
    use crate::stage::StageStatus;

    /// Serves a noisy upward trend for every requested day.
    struct TrendSource;

    impl MarketDataSource for TrendSource {
        fn id(&self) -> ProviderId {
            ProviderId::Local
        }

        fn fetch_history<'a>(&'a self, req: HistoryRequest) -> SourceFuture<'a, TimeSeries> {
            Box::pin(async move {
                let observations = req
                    .range
                    .days()
                    .enumerate()
                    .map(|(i, day)| {
                        let wobble = if i % 2 == 0 { 1.5 } else { -1.5 };
                        Observation::new(
                            UtcDateTime::start_of_day(day),
                            Some(100.0 + i as f64 + wobble),
                            Some(10.0),
                            None,
                        )
                        .expect("valid observation")
                    })
                    .collect();
                Ok(TimeSeries::new(req.asset.clone(), observations).expect("ordered"))
            })
        }
    }

    fn params(start: &str, end: &str) -> ParameterSet {
        ParameterSet::validate(RawParameters {
            assets: vec![String::from("bitcoin")],
            start_date: start.to_owned(),
            end_date: end.to_owned(),
            variables: vec![String::from("price"), String::from("volume")],
            ..RawParameters::default()
        })
        .expect("valid parameters")
    }

    fn orchestrator(params: ParameterSet) -> Orchestrator {
        let registry = ForecasterRegistry::new()
            .with(Arc::new(coincast_ml::NaiveForecaster))
            .and_then(|r| r.with(Arc::new(coincast_ml::DriftForecaster)))
            .expect("distinct names");
        let fetcher = MarketDataFetcher::new(Arc::new(TrendSource)).with_retry(RetryConfig::no_retry());
        Orchestrator::new(params, fetcher, registry)
    }

    #[tokio::test]
    async fn advance_runs_exactly_one_stage() {
        let orchestrator = orchestrator(params("2024-01-01", "2024-03-31"));

        let run = orchestrator.advance().await.expect("collecting succeeds");

        assert_eq!(run.stage(), Stage::Collecting);
        assert_eq!(run.status(StageName::Collecting), StageStatus::Completed);
        assert_eq!(run.status(StageName::Preprocessing), StageStatus::Pending);
        assert!(run.collection().is_some());
        assert!(run.preprocessing().is_none());
    }

    #[tokio::test]
    async fn run_to_completion_reaches_done_and_stays_there() {
        let orchestrator = orchestrator(params("2024-01-01", "2024-03-31"));

        let run = orchestrator.run_to_completion().await.expect("pipeline completes");

        assert_eq!(run.stage(), Stage::Done);
        let evaluation = run.evaluation().expect("evaluation published");
        assert_eq!(evaluation.results.len(), 2);
        assert!(evaluation.ranking.winner().is_some());
        let predictions = run.predictions().expect("predictions published");
        assert_eq!(predictions.len(), 1);
        assert!(predictions[0].next_prediction.is_finite());
        assert!(run
            .warnings()
            .iter()
            .any(|warning| warning.contains("holt")));
        assert_eq!(orchestrator.advance().await.expect_err("finished"), PipelineError::AlreadyDone);
    }

    #[tokio::test]
    async fn failure_keeps_earlier_outputs_until_reset() {
        // Three days cannot be split into train, validation and test.
        let orchestrator = orchestrator(params("2024-01-01", "2024-01-03"));
        let before = orchestrator.snapshot().id();

        let error = orchestrator.run_to_completion().await.expect_err("too short");

        let failure = error.failure().expect("stage failure");
        assert_eq!(failure.stage, StageName::Preprocessing);
        assert_eq!(failure.unit, "bitcoin");
        assert_eq!(failure.code, "preprocessing.series_too_short");

        let failed = orchestrator.snapshot();
        assert_eq!(failed.stage(), Stage::Failed);
        assert!(failed.collection().is_some());
        assert_eq!(
            orchestrator.advance().await.expect_err("blocked"),
            PipelineError::AlreadyFailed {
                stage: StageName::Preprocessing
            }
        );

        let fresh = orchestrator.reset();
        assert_eq!(fresh.stage(), Stage::Configured);
        assert!(fresh.collection().is_none());
        assert_ne!(fresh.id(), before);
        assert_eq!(fresh.generation(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_stage_progress() {
        let orchestrator = orchestrator(params("2024-01-01", "2024-03-31"));
        let mut progress = orchestrator.subscribe();

        orchestrator.run_to_completion().await.expect("pipeline completes");

        let mut stages = Vec::new();
        while let Ok(event) = progress.try_recv() {
            if stages.last() != Some(&event.stage) {
                stages.push(event.stage);
            }
        }
        assert_eq!(
            stages,
            vec![
                StageName::Collecting,
                StageName::Preprocessing,
                StageName::Training,
                StageName::Evaluating
            ]
        );
    }

    #[test]
    fn cancel_without_work_in_flight_is_a_no_op() {
        let orchestrator = orchestrator(params("2024-01-01", "2024-03-31"));

        assert!(!orchestrator.cancel());
        assert_eq!(orchestrator.stage(), Stage::Configured);
        assert_eq!(
            orchestrator.snapshot().parameters().assets(),
            &[AssetId::parse("bitcoin").expect("valid")]
        );
    }
}
