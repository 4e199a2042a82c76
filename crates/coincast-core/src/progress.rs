//! Progress events emitted by pipeline stages.
//!
//! Every event is derived from a real sub-task completion (an asset fetched,
//! an epoch finished); nothing here is driven by wall-clock timers.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Stage that produced a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Collecting,
    Preprocessing,
    Training,
    Evaluating,
}

impl StageName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Preprocessing => "preprocessing",
            Self::Training => "training",
            Self::Evaluating => "evaluating",
        }
    }
}

impl Display for StageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discrete unit of progress.
///
/// `unit` names the asset or `model/asset` pair the event concerns;
/// `completed` out of `total` counts finished sub-tasks of that unit
/// (for training, epochs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: StageName,
    pub unit: String,
    pub completed: u64,
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: StageName, unit: impl Into<String>, completed: u64, total: u64) -> Self {
        Self {
            stage,
            unit: unit.into(),
            completed,
            total,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Completion ratio in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Cloneable handle stages use to publish progress.
///
/// Every event goes to each subscriber in emission order. A disconnected or
/// absent receiver is not an error; events are dropped.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    senders: Vec<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            senders: vec![sender],
        }
    }

    /// Sink delivering to every sender that is still connected.
    pub fn broadcast(senders: impl IntoIterator<Item = UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            senders: senders
                .into_iter()
                .filter(|sender| !sender.is_closed())
                .collect(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        match self.senders.as_slice() {
            [] => {}
            [only] => {
                let _ = only.send(event);
            }
            senders => {
                for sender in senders {
                    let _ = sender.send(event.clone());
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.senders.iter().any(|sender| !sender.is_closed())
    }
}
