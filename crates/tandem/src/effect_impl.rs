//! Effects and the operation configuration that drives them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::action::Action;
use crate::take::TakeMode;

/// An asynchronous side effect started by an action.
///
/// Effects receive the action payload and return the response that ends up
/// under `response` in the resolve action. Returning an error produces a
/// reject action instead. Effects are never interrupted: a cancelled or
/// superseded effect runs to completion and its result is discarded.
///
/// Any `Fn(Value) -> impl Future<Output = anyhow::Result<Value>>` is an effect.
#[async_trait]
pub trait Effect: Send + Sync + 'static {
    async fn run(&self, payload: Value) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Effect for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn run(&self, payload: Value) -> Result<Value> {
        (self)(payload).await
    }
}

/// Configuration of an effect-running operation.
#[derive(Clone)]
pub struct EffectConfig {
    pub effect: Arc<dyn Effect>,
    pub resolve_type: String,
    pub reject_type: String,
    pub take: TakeMode,
}

impl EffectConfig {
    pub fn new<F, Fut>(
        effect: F,
        resolve_type: impl Into<String>,
        reject_type: impl Into<String>,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_effect(effect, resolve_type, reject_type)
    }

    /// Build from any [`Effect`] implementation.
    pub fn from_effect(
        effect: impl Effect,
        resolve_type: impl Into<String>,
        reject_type: impl Into<String>,
    ) -> Self {
        Self {
            effect: Arc::new(effect),
            resolve_type: resolve_type.into(),
            reject_type: reject_type.into(),
            take: TakeMode::default(),
        }
    }

    pub fn with_take(mut self, take: TakeMode) -> Self {
        self.take = take;
        self
    }

    /// Shorthand for `with_take(TakeMode::Latest)`.
    pub fn take_latest(self) -> Self {
        self.with_take(TakeMode::Latest)
    }
}

impl fmt::Debug for EffectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectConfig")
            .field("resolve_type", &self.resolve_type)
            .field("reject_type", &self.reject_type)
            .field("take", &self.take)
            .finish_non_exhaustive()
    }
}

/// Selects the running operation a cancel action targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelMatcher {
    pub action_type: String,
}

/// Configuration of a cancel action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelConfig {
    pub matcher: CancelMatcher,
    /// Type of the action dispatched when something was actually cancelled.
    pub cancelled_type: Option<String>,
}

impl CancelConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            matcher: CancelMatcher {
                action_type: target.into(),
            },
            cancelled_type: None,
        }
    }

    pub fn notify(mut self, cancelled_type: impl Into<String>) -> Self {
        self.cancelled_type = Some(cancelled_type.into());
        self
    }
}

/// The `meta.async` half of an action.
#[derive(Debug, Clone)]
pub enum AsyncConfig {
    Effect(EffectConfig),
    Cancel(CancelConfig),
}

impl From<EffectConfig> for AsyncConfig {
    fn from(config: EffectConfig) -> Self {
        AsyncConfig::Effect(config)
    }
}

impl From<CancelConfig> for AsyncConfig {
    fn from(config: CancelConfig) -> Self {
        AsyncConfig::Cancel(config)
    }
}

/// An action known to carry an effect configuration.
///
/// Flow stages produce these, so a stage can never describe an operation
/// without an effect.
#[derive(Debug, Clone)]
pub struct AsyncAction {
    pub action_type: String,
    pub payload: Value,
    pub config: EffectConfig,
}

impl AsyncAction {
    pub fn new(action_type: impl Into<String>, payload: Value, config: EffectConfig) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            config,
        }
    }
}

impl From<AsyncAction> for Action {
    fn from(action: AsyncAction) -> Self {
        Action::new(action.action_type, action.payload).with_async(action.config)
    }
}
