//! Re-entrancy policies for operations and flows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TakeModeParseError;

/// What happens when an operation type is invoked again while an earlier
/// instance of it is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakeMode {
    /// Keep the running instance, drop the new invocation.
    #[default]
    First,
    /// The newest invocation wins; results of older instances are discarded.
    Latest,
}

impl TakeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakeMode::First => "first",
            TakeMode::Latest => "latest",
        }
    }
}

impl fmt::Display for TakeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TakeMode {
    type Err = TakeModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(TakeMode::First),
            "latest" => Ok(TakeMode::Latest),
            other => Err(TakeModeParseError(other.to_string())),
        }
    }
}

/// Re-entrancy policy of a flow.
///
/// `First` and `Latest` both drop a flow invocation that arrives while the
/// orchestrator is busy. `EverySerial` queues it and re-dispatches it once the
/// running flow completes. `EveryParallel` always runs, never blocks and never
/// queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowTake {
    #[default]
    #[serde(rename = "first")]
    First,
    #[serde(rename = "latest")]
    Latest,
    #[serde(rename = "every:serial")]
    EverySerial,
    #[serde(rename = "every:parallel")]
    EveryParallel,
}

impl FlowTake {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowTake::First => "first",
            FlowTake::Latest => "latest",
            FlowTake::EverySerial => "every:serial",
            FlowTake::EveryParallel => "every:parallel",
        }
    }

    /// Whether a running flow with this policy holds the orchestrator's block.
    pub fn blocks(&self) -> bool {
        !matches!(self, FlowTake::EveryParallel)
    }
}

impl fmt::Display for FlowTake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowTake {
    type Err = TakeModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(FlowTake::First),
            "latest" => Ok(FlowTake::Latest),
            "every:serial" => Ok(FlowTake::EverySerial),
            "every:parallel" => Ok(FlowTake::EveryParallel),
            other => Err(TakeModeParseError(other.to_string())),
        }
    }
}
