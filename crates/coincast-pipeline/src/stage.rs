use std::fmt::{Display, Formatter};

use coincast_core::StageName;
use serde::Serialize;

/// Position of a run in the stage graph.
///
/// `configured → collecting → preprocessing → training → evaluating → done`,
/// with `failed` reachable from any working stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configured,
    Collecting,
    Preprocessing,
    Training,
    Evaluating,
    Done,
    Failed,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Collecting => "collecting",
            Self::Preprocessing => "preprocessing",
            Self::Training => "training",
            Self::Evaluating => "evaluating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// The working stage this position corresponds to, if any.
    pub const fn work(self) -> Option<StageName> {
        match self {
            Self::Collecting => Some(StageName::Collecting),
            Self::Preprocessing => Some(StageName::Preprocessing),
            Self::Training => Some(StageName::Training),
            Self::Evaluating => Some(StageName::Evaluating),
            Self::Configured | Self::Done | Self::Failed => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl From<StageName> for Stage {
    fn from(value: StageName) -> Self {
        match value {
            StageName::Collecting => Self::Collecting,
            StageName::Preprocessing => Self::Preprocessing,
            StageName::Training => Self::Training,
            StageName::Evaluating => Self::Evaluating,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working stages in execution order.
pub const WORK_ORDER: [StageName; 4] = [
    StageName::Collecting,
    StageName::Preprocessing,
    StageName::Training,
    StageName::Evaluating,
];

/// Stage that runs after `current` completes; `None` after evaluation.
pub fn next_work(current: Option<StageName>) -> Option<StageName> {
    match current {
        None => Some(StageName::Collecting),
        Some(StageName::Collecting) => Some(StageName::Preprocessing),
        Some(StageName::Preprocessing) => Some(StageName::Training),
        Some(StageName::Training) => Some(StageName::Evaluating),
        Some(StageName::Evaluating) => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}
