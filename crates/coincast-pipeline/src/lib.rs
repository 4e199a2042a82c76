//! # Coincast Pipeline
//!
//! Drives one analysis run through its stages:
//!
//! ```text
//! configured ─▶ collecting ─▶ preprocessing ─▶ training ─▶ evaluating ─▶ done
//!                   │              │              │             │
//!                   └──────────────┴──────┬───────┴─────────────┘
//!                                         ▼
//!                                      failed ──(reset)──▶ configured
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | State machine, cancellation, reset, progress subscription |
//! | [`run`] | `PipelineRun` snapshots and per-stage outputs |
//! | [`report`] | Serializable `RunReport` for reporting collaborators |
//! | [`stage`] | Stage and status enums |
//! | [`error`] | `PipelineError` and `StageFailure` |
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(params, fetcher, ForecasterRegistry::with_builtins());
//! let mut progress = orchestrator.subscribe();
//! let run = orchestrator.run_to_completion().await?;
//! let report = RunReport::from_run(&run);
//! println!("winner: {:?}", report.winner());
//! ```

pub mod error;
pub mod orchestrator;
pub mod report;
pub mod run;
pub mod stage;

mod stages;

pub use error::{PipelineError, StageFailure};
pub use orchestrator::Orchestrator;
pub use report::{
    AssetCollection, AssetPreprocessing, CollectionSummary, RunReport, SplitSummary,
    TrainedSummary, TrainingSummary,
};
pub use run::{
    CollectionOutput, EvaluationOutput, NextStepPrediction, PipelineRun, PreprocessingOutput,
    TrainedUnit, TrainingFailure, TrainingOutput,
};
pub use stage::{Stage, StageStatus, WORK_ORDER};
