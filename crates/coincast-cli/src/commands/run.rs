use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use coincast_core::{
    CoinGeckoAdapter, CoreError, FetchPolicy, MarketDataFetcher, MarketDataSource, ParameterSet,
    ProgressEvent, RetryConfig,
};
use coincast_ml::ForecasterRegistry;
use coincast_pipeline::{Orchestrator, PipelineError, RunReport, Stage};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::metadata::Metadata;
use crate::output::stream_writer::{NdjsonStreamWriter, StreamEventError};
use crate::output::EnvelopeError;

use super::{load_parameters, CommandOutput, CommandResult};

const SCHEMA_VERSION: &str = "coincast.run.v1";

/// How the driving loop ended.
enum Outcome {
    Finished,
    Failed(PipelineError),
    Interrupted(Stage),
}

pub async fn run(args: &RunArgs) -> Result<CommandOutput, CliError> {
    let raw = load_parameters(&args.config)?;
    let parameters = ParameterSet::validate(raw).map_err(CoreError::from)?;
    let source = CoinGeckoAdapter::from_env().with_timeout_ms(args.timeout_ms);
    let fetcher = build_fetcher(Arc::new(source), args);
    let orchestrator = Orchestrator::new(parameters, fetcher, ForecasterRegistry::with_builtins());

    let interrupt = CancellationToken::new();
    let listener = listen_for_interrupt(orchestrator.clone(), interrupt.clone());

    let output = if args.stream {
        let mut writer = NdjsonStreamWriter::new(io::stdout());
        match drive(orchestrator, interrupt, Some(&mut writer)).await {
            Ok(result) => {
                let exit_code = result.exit_code();
                finish_stream(&mut writer, result).map(|()| CommandOutput::Streamed { exit_code })
            }
            Err(error) => Err(error),
        }
    } else {
        drive::<io::Stdout>(orchestrator, interrupt, None)
            .await
            .map(CommandOutput::Envelope)
    };

    listener.abort();
    output
}

fn build_fetcher(source: Arc<dyn MarketDataSource>, args: &RunArgs) -> MarketDataFetcher {
    let policy = if args.allow_partial {
        FetchPolicy::AllowPartial
    } else {
        FetchPolicy::FailFast
    };
    MarketDataFetcher::new(source)
        .with_retry(RetryConfig::exponential(args.max_retries))
        .with_attempt_timeout(Duration::from_millis(args.timeout_ms))
        .with_policy(policy)
        .with_max_concurrency(args.max_concurrency)
}

/// First Ctrl-C cancels the running stage and stops the run after it.
fn listen_for_interrupt(orchestrator: Orchestrator, interrupt: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling the run");
            interrupt.cancel();
            orchestrator.cancel();
        }
    })
}

/// Advances the run stage by stage and forwards progress as it arrives.
async fn drive<W: Write>(
    orchestrator: Orchestrator,
    interrupt: CancellationToken,
    mut stream: Option<&mut NdjsonStreamWriter<W>>,
) -> Result<CommandResult, CliError> {
    let mut metadata = Metadata::start(SCHEMA_VERSION);
    let run_id = orchestrator.snapshot().id();
    metadata.set_run_id(run_id);

    if let Some(writer) = stream.as_deref_mut() {
        writer.emit_start(Some(json!({
            "request_id": metadata.request_id(),
            "run_id": run_id,
            "schema_version": SCHEMA_VERSION,
        })))?;
    }

    let mut progress = orchestrator.subscribe();
    let driver = orchestrator.clone();
    let mut task = tokio::spawn(async move {
        loop {
            if interrupt.is_cancelled() {
                return Outcome::Interrupted(driver.stage());
            }
            match driver.advance().await {
                Ok(run) if run.stage() == Stage::Done => return Outcome::Finished,
                Ok(_) => {}
                Err(error) if interrupt.is_cancelled() => {
                    tracing::debug!(%error, "stage ended after interrupt");
                    return Outcome::Interrupted(driver.stage());
                }
                Err(error) => return Outcome::Failed(error),
            }
        }
    });

    let joined = loop {
        tokio::select! {
            biased;
            Some(event) = progress.recv() => forward(stream.as_deref_mut(), &event)?,
            joined = &mut task => break joined,
        }
    };
    while let Ok(event) = progress.try_recv() {
        forward(stream.as_deref_mut(), &event)?;
    }
    let outcome = joined.map_err(|error| CliError::Task(error.to_string()))?;

    let run = orchestrator.snapshot();
    let report = RunReport::from_run(&run);
    metadata.extend_warnings(run.warnings().iter().cloned());
    let result = CommandResult::ok(metadata, serde_json::to_value(&report)?);

    let error = match outcome {
        Outcome::Finished => {
            tracing::info!(
                run_id = %run_id,
                winner = report.winner().unwrap_or("none"),
                "pipeline run finished"
            );
            return Ok(result);
        }
        Outcome::Failed(error) => {
            tracing::error!(run_id = %run_id, code = error.code(), %error, "pipeline run failed");
            EnvelopeError::new(error.code(), error.to_string())
        }
        Outcome::Interrupted(stage) => {
            tracing::warn!(run_id = %run_id, %stage, "pipeline run interrupted");
            EnvelopeError::new("run.interrupted", format!("run interrupted at `{stage}`"))
        }
    };
    Ok(result.with_errors(vec![error.with_retryable(false)], 3))
}

fn forward<W: Write>(
    stream: Option<&mut NdjsonStreamWriter<W>>,
    event: &ProgressEvent,
) -> Result<(), CliError> {
    match stream {
        Some(writer) => writer.emit_progress(Some(serde_json::to_value(event)?))?,
        None => tracing::debug!(
            stage = %event.stage,
            unit = %event.unit,
            completed = event.completed,
            total = event.total,
            "progress"
        ),
    }
    Ok(())
}

fn finish_stream<W: Write>(
    writer: &mut NdjsonStreamWriter<W>,
    result: CommandResult,
) -> Result<(), CliError> {
    let envelope = result.into_envelope();
    writer.emit_chunk(Some(serde_json::to_value(&envelope)?))?;

    for error in &envelope.errors {
        let mut event = StreamEventError::new(error.code.clone(), error.message.clone());
        if let Some(retryable) = error.retryable {
            event = event.with_retryable(retryable);
        }
        writer.emit_error(event, None)?;
    }

    writer.emit_end(Some(json!({
        "status": if envelope.errors.is_empty() { "ok" } else { "error" },
        "warning_count": envelope.meta.warnings.len(),
        "error_count": envelope.errors.len(),
    })))?;
    Ok(())
}
