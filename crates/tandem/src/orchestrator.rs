//! Flow orchestrator.
//!
//! A flow is a list of stages; the operations of a stage run concurrently and
//! each stage starts only after the previous one settled. Every operation is
//! driven through the [`AsyncHandler`], and its response is appended to the
//! flow's `responses`, which later stages can read. The flow ends with one
//! resolve action carrying all responses, or one reject action carrying the
//! [`FlowError`] that stopped it.
//!
//! Re-entrancy is governed by [`FlowTake`](crate::FlowTake) and the orchestrator's
//! [`FlowQueue`]: one blocking flow at a time, later ones dropped or queued.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::action::{extend_payload, Action, FlowResponse, IGNORE_EFFECT};
use crate::context::DispatchContext;
use crate::effect_impl::{AsyncAction, AsyncConfig};
use crate::error::FlowError;
use crate::flow::{ActionSpec, FlowConfig};
use crate::flow_queue::{FlowAdmission, FlowQueue, FlowQueueEntry};
use crate::handler::{panic_message, AsyncHandler, Outcome};

/// How a flow invocation ended.
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    Resolved(Vec<FlowResponse>),
    Rejected(FlowError),
    /// Deferred until the running flow completes.
    Queued,
    /// Dropped because another flow was running.
    Dropped,
}

impl FlowOutcome {
    pub fn responses(&self) -> Option<&[FlowResponse]> {
        match self {
            FlowOutcome::Resolved(responses) => Some(responses),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, FlowOutcome::Resolved(_))
    }
}

/// Runs flows. Each orchestrator owns one block flag and queue.
#[derive(Debug, Clone, Default)]
pub struct FlowOrchestrator {
    handler: AsyncHandler,
    queue: Arc<FlowQueue>,
}

impl FlowOrchestrator {
    pub fn new(handler: AsyncHandler, queue: Arc<FlowQueue>) -> Self {
        Self { handler, queue }
    }

    pub fn handler(&self) -> &AsyncHandler {
        &self.handler
    }

    pub fn queue(&self) -> &Arc<FlowQueue> {
        &self.queue
    }

    /// Handle a flow invocation to completion.
    pub async fn handle(
        &self,
        ctx: &DispatchContext,
        flow_type: &str,
        payload: &Value,
        config: &Arc<FlowConfig>,
    ) -> FlowOutcome {
        self.begin(ctx, flow_type, payload, config).finish().await
    }

    /// Admit a flow invocation. Blocking, queueing and dropping are decided
    /// here, synchronously, in call order.
    pub fn begin(
        &self,
        ctx: &DispatchContext,
        flow_type: &str,
        payload: &Value,
        config: &Arc<FlowConfig>,
    ) -> PendingFlow {
        let admission = self.queue.admit(config.take, || FlowQueueEntry {
            flow_type: flow_type.to_string(),
            payload: payload.clone(),
            config: Arc::clone(config),
        });

        let holds_block = match admission {
            FlowAdmission::Run => true,
            FlowAdmission::Parallel => false,
            FlowAdmission::Queued => {
                debug!(flow_type, "flow busy, invocation queued");
                return PendingFlow::done(FlowOutcome::Queued);
            }
            FlowAdmission::Dropped => {
                debug!(flow_type, take = %config.take, "flow busy, invocation dropped");
                return PendingFlow::done(FlowOutcome::Dropped);
            }
        };

        PendingFlow {
            state: PendingFlowState::Run(Box::new(FlowRun {
                handler: self.handler.clone(),
                queue: holds_block.then(|| Arc::clone(&self.queue)),
                ctx: ctx.clone(),
                flow_type: flow_type.to_string(),
                payload: payload.clone(),
                config: Arc::clone(config),
                run_id: Uuid::new_v4(),
            })),
        }
    }
}

/// An admitted flow that still has to run.
#[must_use = "a flow does not run unless awaited"]
pub struct PendingFlow {
    state: PendingFlowState,
}

enum PendingFlowState {
    Done(FlowOutcome),
    Run(Box<FlowRun>),
}

impl PendingFlow {
    fn done(outcome: FlowOutcome) -> Self {
        Self {
            state: PendingFlowState::Done(outcome),
        }
    }

    /// Whether finishing still has to execute stages.
    pub fn is_running(&self) -> bool {
        matches!(self.state, PendingFlowState::Run(_))
    }

    pub async fn finish(self) -> FlowOutcome {
        match self.state {
            PendingFlowState::Done(outcome) => outcome,
            PendingFlowState::Run(run) => run.execute().await,
        }
    }
}

struct FlowRun {
    handler: AsyncHandler,
    /// Present when this run holds the orchestrator's block.
    queue: Option<Arc<FlowQueue>>,
    ctx: DispatchContext,
    flow_type: String,
    payload: Value,
    config: Arc<FlowConfig>,
    run_id: Uuid,
}

impl FlowRun {
    async fn execute(self) -> FlowOutcome {
        let span = info_span!("flow", flow_type = %self.flow_type, run_id = %self.run_id);

        let result = match AssertUnwindSafe(self.run_stages().instrument(span))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(FlowError::Panicked {
                flow_type: self.flow_type.clone(),
                message: panic_message(&panic),
            }),
        };

        let outcome = match result {
            Ok(responses) => {
                debug!(flow_type = %self.flow_type, run_id = %self.run_id, responses = responses.len(), "flow resolved");
                self.ctx.dispatch(Action::resolved_flow(
                    self.config.resolve_type.clone(),
                    responses.clone(),
                ));
                FlowOutcome::Resolved(responses)
            }
            Err(error) => {
                warn!(flow_type = %self.flow_type, run_id = %self.run_id, error = %error, "flow rejected");
                self.ctx
                    .dispatch(Action::rejected(self.config.reject_type.clone(), error.clone()));
                FlowOutcome::Rejected(error)
            }
        };

        if let Some(queue) = &self.queue {
            if let Some(next) = queue.release() {
                debug!(flow_type = %next.flow_type, "re-dispatching queued flow");
                self.ctx.dispatch(next.into_action());
            }
        }

        outcome
    }

    async fn run_stages(&self) -> Result<Vec<FlowResponse>, FlowError> {
        let mut responses: Vec<FlowResponse> = Vec::new();

        for (position, stage) in self.config.stages.iter().enumerate() {
            debug!(stage = position, operations = stage.len(), "running stage");

            // Every member settles (and cleans up) before a failure is reported.
            let settled = join_all(
                stage
                    .specs()
                    .iter()
                    .map(|spec| self.run_spec(spec, &responses)),
            )
            .await;

            let stage_responses = settled.into_iter().collect::<Result<Vec<_>, _>>()?;
            responses.extend(stage_responses);
        }

        Ok(responses)
    }

    async fn run_spec(
        &self,
        spec: &ActionSpec,
        responses: &[FlowResponse],
    ) -> Result<FlowResponse, FlowError> {
        // Callbacks panic inside their own operation so stage siblings still settle.
        let payload = self.guarded(|| spec.prepare_payload(&self.ctx, &self.payload, responses))?;
        let descriptor = self.guarded(|| spec.describe(payload.clone()))?;

        self.ctx.dispatch(observed(&descriptor));

        let config = AsyncConfig::Effect(descriptor.config.clone());
        let outcome = self
            .handler
            .handle(&self.ctx, &descriptor.action_type, &descriptor.payload, &config)
            .await;

        if let Outcome::Rejected(error) = outcome {
            return Err(FlowError::EffectFailed {
                flow_type: self.flow_type.clone(),
                action_type: descriptor.action_type,
                source: error,
            });
        }

        if spec.has_break() && self.guarded(|| spec.should_break(responses, &self.ctx, &payload))? {
            return Err(FlowError::BreakCondition {
                flow_type: self.flow_type.clone(),
                action_type: descriptor.action_type,
            });
        }

        Ok(FlowResponse::new(descriptor.action_type, outcome.response()))
    }

    fn guarded<T>(&self, callback: impl FnOnce() -> T) -> Result<T, FlowError> {
        std::panic::catch_unwind(AssertUnwindSafe(callback)).map_err(|panic| FlowError::Panicked {
            flow_type: self.flow_type.clone(),
            message: panic_message(&panic),
        })
    }
}

/// The copy of a stage operation dispatched for observers. It is marked so
/// entry routing does not start its effect a second time.
fn observed(descriptor: &AsyncAction) -> Action {
    let payload = extend_payload(&descriptor.payload, [(IGNORE_EFFECT, json!(true))]);
    Action::new(descriptor.action_type.clone(), payload).with_async(descriptor.config.clone())
}
