//! Error types.
//!
//! Nothing in here is ever returned to the code that dispatched an action.
//! Effect and flow failures travel inside reject actions ([`ActionError`]);
//! only [`SetupError`] surfaces at call time, when the engines are wired
//! together without their collaborators or without a runtime to run on.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Wiring mistakes detected while building a [`DispatchContext`](crate::DispatchContext)
/// or a [`Middleware`](crate::Middleware).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("a dispatch function is required to build a dispatch context")]
    MissingDispatch,

    #[error("a get_state function is required to build a dispatch context")]
    MissingGetState,

    #[error("no tokio runtime is available to run effects; build inside a runtime or pass a handle")]
    NoRuntime,
}

/// A take mode string that is not one of the known policies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown take mode `{0}`")]
pub struct TakeModeParseError(pub String);

/// The error an effect failed with, shared so that reject actions stay `Clone`.
#[derive(Clone)]
pub struct EffectError(Arc<anyhow::Error>);

impl EffectError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// The original error returned by the effect.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for EffectError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for EffectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Payload of an operation's reject action.
///
/// `details` is the original payload extended with the operation `type` and
/// the host `state` at settlement time.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct EffectRejection {
    pub details: Value,
    #[source]
    pub error: EffectError,
}

/// Why a flow was rejected.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A stage's `break` predicate returned true.
    #[error("{flow_type}_EXCEPTION: Action {action_type} is broken by user condition")]
    BreakCondition {
        flow_type: String,
        action_type: String,
    },

    /// A stage's effect failed.
    #[error("{flow_type}: action {action_type} failed: {source}")]
    EffectFailed {
        flow_type: String,
        action_type: String,
        #[source]
        source: EffectError,
    },

    /// A user callback (`prepare`, `break_when`, or an effect factory) panicked.
    #[error("{flow_type}: flow aborted by a panic: {message}")]
    Panicked { flow_type: String, message: String },
}

impl FlowError {
    /// Type of the operation that stopped the flow, when one is known.
    pub fn action_type(&self) -> Option<&str> {
        match self {
            FlowError::BreakCondition { action_type, .. } => Some(action_type.as_str()),
            FlowError::EffectFailed { action_type, .. } => Some(action_type.as_str()),
            FlowError::Panicked { .. } => None,
        }
    }

    pub fn flow_type(&self) -> &str {
        match self {
            FlowError::BreakCondition { flow_type, .. }
            | FlowError::EffectFailed { flow_type, .. }
            | FlowError::Panicked { flow_type, .. } => flow_type.as_str(),
        }
    }

    pub fn is_break_condition(&self) -> bool {
        matches!(self, FlowError::BreakCondition { .. })
    }
}

/// The `error` field of a reject action.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error(transparent)]
    Effect(#[from] EffectRejection),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl ActionError {
    pub fn as_effect(&self) -> Option<&EffectRejection> {
        match self {
            ActionError::Effect(rejection) => Some(rejection),
            ActionError::Flow(_) => None,
        }
    }

    pub fn as_flow(&self) -> Option<&FlowError> {
        match self {
            ActionError::Flow(error) => Some(error),
            ActionError::Effect(_) => None,
        }
    }
}
