//! Run stages
//!
//! The per-query state machine. A `StageTrail` records every stage a run
//! passes through and refuses transitions the machine does not allow.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    BuildContext,
    Generate,
    Execute,
    Evaluate,
    Reflect,
    Curate,
    CurateReinforce,
    Commit,
    Log,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BuildContext => "BUILD_CONTEXT",
            Stage::Generate => "GENERATE",
            Stage::Execute => "EXECUTE",
            Stage::Evaluate => "EVALUATE",
            Stage::Reflect => "REFLECT",
            Stage::Curate => "CURATE",
            Stage::CurateReinforce => "CURATE_REINFORCE",
            Stage::Commit => "COMMIT",
            Stage::Log => "LOG",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Whether the machine may move from `self` to `next`
    ///
    /// `FAILED` is reachable from any non-terminal stage. `LOG` is entered
    /// directly when curation produced nothing to commit.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        use Stage::*;
        match (*self, next) {
            (Done, _) | (Failed, _) => false,
            (_, Failed) => true,
            (BuildContext, Generate) => true,
            (Generate, Execute) => true,
            (Execute, Evaluate) => true,
            (Evaluate, Reflect) | (Evaluate, CurateReinforce) | (Evaluate, Log) => true,
            (Reflect, Curate) => true,
            (Curate, Commit) | (Curate, Log) => true,
            (CurateReinforce, Commit) | (CurateReinforce, Log) => true,
            (Commit, Log) => true,
            (Log, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal stage transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Stage,
    pub to: Stage,
}

/// Ordered record of visited stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTrail {
    stages: Vec<Stage>,
}

impl StageTrail {
    pub fn starting_at(stage: Stage) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    pub fn current(&self) -> Stage {
        // Never empty: constructed with a first stage and only ever pushed to
        self.stages.last().copied().unwrap_or(Stage::BuildContext)
    }

    pub fn advance(&mut self, next: Stage) -> Result<(), IllegalTransition> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(IllegalTransition {
                from: current,
                to: next,
            });
        }
        tracing::trace!(from = %current, to = %next, "Stage transition");
        self.stages.push(next);
        Ok(())
    }

    /// Move to FAILED unless already terminal
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.stages.push(Stage::Failed);
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }
}
