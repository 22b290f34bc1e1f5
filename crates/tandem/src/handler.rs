//! Single-operation handler.
//!
//! Runs one configured effect under the registry's policy and reports the
//! outcome by dispatching a resolve, reject or cancelled action. The caller
//! is never failed: every effect error ends up in a reject action.
//!
//! Handling is split in two halves. [`AsyncHandler::begin`] is synchronous
//! and does everything that must happen in call order: cancellation,
//! registration and the pre-effect gate. [`PendingOperation::settle`] awaits
//! the effect, re-checks the gate, cleans the registry and dispatches.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::action::{extend_payload, Action};
use crate::context::DispatchContext;
use crate::effect_impl::{AsyncConfig, CancelConfig, EffectConfig};
use crate::error::{EffectError, EffectRejection};
use crate::registry::{Admission, TaskRecord, TaskRegistry};
use crate::take::TakeMode;

/// How a handled operation ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The effect succeeded and a resolve action was dispatched.
    Resolved(Value),
    /// The effect failed and a reject action was dispatched.
    Rejected(EffectError),
    /// The effect settled after it went stale; nothing was dispatched.
    Suppressed,
    /// The effect was never started.
    Skipped,
    /// The action was a cancellation request.
    Cancelled { removed: Option<TaskRecord> },
}

impl Outcome {
    /// The value this outcome contributes to a flow's responses.
    pub fn response(&self) -> Value {
        match self {
            Outcome::Resolved(value) => value.clone(),
            _ => Value::Null,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Outcome::Resolved(_))
    }
}

/// Runs operations against a shared [`TaskRegistry`].
#[derive(Debug, Clone, Default)]
pub struct AsyncHandler {
    registry: Arc<TaskRegistry>,
}

impl AsyncHandler {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Handle an operation to completion.
    pub async fn handle(
        &self,
        ctx: &DispatchContext,
        action_type: &str,
        payload: &Value,
        config: &AsyncConfig,
    ) -> Outcome {
        self.begin(ctx, action_type, payload, config).settle().await
    }

    /// Run the synchronous half of [`handle`](Self::handle).
    pub fn begin(
        &self,
        ctx: &DispatchContext,
        action_type: &str,
        payload: &Value,
        config: &AsyncConfig,
    ) -> PendingOperation {
        match config {
            AsyncConfig::Cancel(cancel) => self.cancel(ctx, action_type, cancel),
            AsyncConfig::Effect(effect) => self.start(ctx, action_type, payload, effect),
        }
    }

    fn cancel(&self, ctx: &DispatchContext, action_type: &str, cancel: &CancelConfig) -> PendingOperation {
        let target = &cancel.matcher.action_type;
        let removed = self.registry.cancel_running_task(&cancel.matcher);

        match (&removed, &cancel.cancelled_type) {
            (Some(task), Some(cancelled_type)) => {
                debug!(action_type, target = %target, index = task.index, "operation cancelled");
                ctx.dispatch(Action::new(
                    cancelled_type.clone(),
                    json!({ "type": target }),
                ));
            }
            (Some(task), None) => {
                debug!(action_type, target = %target, index = task.index, "operation cancelled");
            }
            (None, _) => {
                debug!(action_type, target = %target, "nothing running to cancel");
            }
        }

        PendingOperation::done(Outcome::Cancelled { removed })
    }

    fn start(
        &self,
        ctx: &DispatchContext,
        action_type: &str,
        payload: &Value,
        config: &EffectConfig,
    ) -> PendingOperation {
        let index = match self.registry.admit(action_type, config.take) {
            Admission::Started(index) => index,
            Admission::Stale(index) => {
                debug!(action_type, index, "operation stale before its effect started");
                self.registry.settle(action_type, index, config.take);
                return PendingOperation::done(Outcome::Skipped);
            }
            Admission::Ignored => {
                debug!(action_type, take = %config.take, "operation already running, ignored");
                return PendingOperation::done(Outcome::Skipped);
            }
        };

        debug!(action_type, index, take = %config.take, "operation started");

        let effect = Arc::clone(&config.effect);
        let effect_payload = payload.clone();
        let future = async move { effect.run(effect_payload).await }.boxed();

        PendingOperation {
            state: PendingState::Running(Box::new(Running {
                lease: Lease {
                    registry: Arc::clone(&self.registry),
                    action_type: action_type.to_string(),
                    index,
                    take: config.take,
                    settled: false,
                },
                ctx: ctx.clone(),
                payload: payload.clone(),
                config: config.clone(),
                future,
            })),
        }
    }
}

/// The asynchronous half of a handled operation.
#[must_use = "an operation does not settle or dispatch unless awaited"]
pub struct PendingOperation {
    state: PendingState,
}

enum PendingState {
    Done(Outcome),
    Running(Box<Running>),
}

struct Running {
    lease: Lease,
    ctx: DispatchContext,
    payload: Value,
    config: EffectConfig,
    future: BoxFuture<'static, anyhow::Result<Value>>,
}

/// A started instance's registry record.
///
/// Dropping it unsettled completes the record, so an operation abandoned
/// mid-flight never keeps `TakeMode::First` ignoring its type.
struct Lease {
    registry: Arc<TaskRegistry>,
    action_type: String,
    index: u64,
    take: TakeMode,
    settled: bool,
}

impl Lease {
    /// Returns true when the instance turned stale while it was running.
    fn settle(&mut self) -> bool {
        self.settled = true;
        self.registry.settle(&self.action_type, self.index, self.take)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.settled {
            debug!(action_type = %self.action_type, index = self.index, "operation dropped before settling");
            self.registry.settle(&self.action_type, self.index, self.take);
        }
    }
}

impl PendingOperation {
    fn done(outcome: Outcome) -> Self {
        Self {
            state: PendingState::Done(outcome),
        }
    }

    /// Registry index of the started effect, if one was started.
    pub fn index(&self) -> Option<u64> {
        match &self.state {
            PendingState::Running(running) => Some(running.lease.index),
            PendingState::Done(_) => None,
        }
    }

    /// Whether settling still has to await an effect.
    pub fn is_running(&self) -> bool {
        matches!(self.state, PendingState::Running(_))
    }

    pub async fn settle(self) -> Outcome {
        match self.state {
            PendingState::Done(outcome) => outcome,
            PendingState::Running(running) => running.settle().await,
        }
    }
}

impl Running {
    async fn settle(self) -> Outcome {
        let Running {
            mut lease,
            ctx,
            payload,
            config,
            future,
        } = self;

        let result = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow!("effect panicked: {}", panic_message(&panic))),
        };

        let stale = lease.settle();
        let action_type = lease.action_type.clone();
        let index = lease.index;
        if stale {
            debug!(action_type = %action_type, index, "operation went stale, result discarded");
            return Outcome::Suppressed;
        }

        let state = ctx.get_state();
        match result {
            Ok(response) => {
                debug!(action_type = %action_type, index, "operation resolved");
                let payload = extend_payload(
                    &payload,
                    [
                        ("type", json!(action_type)),
                        ("state", state),
                        ("response", response.clone()),
                    ],
                );
                ctx.dispatch(Action::new(config.resolve_type, payload));
                Outcome::Resolved(response)
            }
            Err(error) => {
                warn!(action_type = %action_type, index, error = %error, "operation rejected");
                let error = EffectError::new(error);
                let details = extend_payload(&payload, [("type", json!(action_type)), ("state", state)]);
                ctx.dispatch(Action::rejected(
                    config.reject_type,
                    EffectRejection {
                        details,
                        error: error.clone(),
                    },
                ));
                Outcome::Rejected(error)
            }
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
