//! Entry routing.
//!
//! Every action the host dispatches passes through [`Middleware::process`].
//! Actions carrying an operation or flow configuration start the matching
//! engine; all actions are then forwarded to the host's `next` stage
//! unchanged, so reducers observe the triggering action right away.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::trace;

use crate::action::Action;
use crate::context::DispatchContext;
use crate::error::SetupError;
use crate::flow_queue::FlowQueue;
use crate::handler::AsyncHandler;
use crate::inflight::InflightTracker;
use crate::orchestrator::FlowOrchestrator;
use crate::registry::TaskRegistry;

/// Routes actions to the operation handler and the flow orchestrator.
///
/// Clones share the registry, the flow queue and the in-flight counter.
/// Effects and flows are spawned on the tokio runtime the middleware was
/// built for, whichever thread later routes the action.
#[derive(Debug, Clone)]
pub struct Middleware {
    handler: AsyncHandler,
    orchestrator: FlowOrchestrator,
    inflight: Arc<InflightTracker>,
    runtime: Handle,
}

impl Middleware {
    /// Build a middleware on the current tokio runtime.
    ///
    /// Fails with [`SetupError::NoRuntime`] outside a runtime context; use
    /// [`Middleware::with_handle`] to target a runtime from elsewhere.
    pub fn new() -> Result<Self, SetupError> {
        Self::with_registry(Arc::new(TaskRegistry::new()))
    }

    /// Build a middleware whose engines share an existing registry.
    pub fn with_registry(registry: Arc<TaskRegistry>) -> Result<Self, SetupError> {
        let runtime = Handle::try_current().map_err(|_| SetupError::NoRuntime)?;
        Ok(Self::with_handle(runtime, registry))
    }

    pub fn with_handle(runtime: Handle, registry: Arc<TaskRegistry>) -> Self {
        let handler = AsyncHandler::new(registry);
        Self {
            orchestrator: FlowOrchestrator::new(handler.clone(), Arc::new(FlowQueue::new())),
            handler,
            inflight: Arc::new(InflightTracker::new()),
            runtime,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.handler.registry()
    }

    pub fn flow_queue(&self) -> &Arc<FlowQueue> {
        self.orchestrator.queue()
    }

    pub fn inflight(&self) -> &Arc<InflightTracker> {
        &self.inflight
    }

    /// Route one action, then hand it to `next`.
    ///
    /// Registration and flow admission happen before this returns; effects
    /// and stages settle on tasks spawned onto the middleware's runtime.
    pub fn process<N>(&self, ctx: &DispatchContext, action: Action, next: N)
    where
        N: FnOnce(Action),
    {
        let Some(meta) = action.meta.as_ref().filter(|_| !action.ignores_effect()) else {
            next(action);
            return;
        };

        if let Some(config) = &meta.async_op {
            let pending = self
                .handler
                .begin(ctx, &action.action_type, &action.payload, config);
            if pending.is_running() {
                let guard = self.inflight.enter();
                self.runtime.spawn(async move {
                    let _guard = guard;
                    pending.settle().await;
                });
            }
        }

        if let Some(config) = &meta.flow {
            let pending = self
                .orchestrator
                .begin(ctx, &action.action_type, &action.payload, config);
            if pending.is_running() {
                let guard = self.inflight.enter();
                self.runtime.spawn(async move {
                    let _guard = guard;
                    pending.finish().await;
                });
            }
        }

        trace!(action_type = %action.action_type, inflight = self.inflight.count(), "action routed");
        next(action);
    }

    /// Resolve once every spawned effect and flow, including the ones they
    /// dispatched in turn, has settled.
    pub async fn settled(&self) {
        self.inflight.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect_impl::{AsyncAction, CancelConfig, EffectConfig};
    use crate::flow::{ActionSpec, FlowConfig};
    use crate::stages;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn recording_context() -> (DispatchContext, Arc<Mutex<Vec<Action>>>) {
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dispatched);
        let ctx = DispatchContext::new(move |action| sink.lock().unwrap().push(action), || Value::Null);
        (ctx, dispatched)
    }

    fn fetch_users() -> EffectConfig {
        EffectConfig::new(
            |_| async { Ok(json!(["ann"])) },
            "user/resolveFetchUsers",
            "user/rejectFetchUsers",
        )
    }

    fn types(actions: &Mutex<Vec<Action>>) -> Vec<String> {
        actions
            .lock()
            .unwrap()
            .iter()
            .map(|action| action.action_type.clone())
            .collect()
    }

    #[tokio::test]
    async fn plain_actions_are_only_forwarded() {
        let middleware = Middleware::new().unwrap();
        let (ctx, dispatched) = recording_context();
        let mut forwarded = Vec::new();

        middleware.process(&ctx, Action::new("user/clear", Value::Null), |a| forwarded.push(a));

        assert_eq!(forwarded.len(), 1);
        assert!(dispatched.lock().unwrap().is_empty());
        assert!(middleware.inflight().is_idle());
    }

    #[tokio::test]
    async fn operation_actions_start_the_effect_and_forward() {
        let middleware = Middleware::new().unwrap();
        let (ctx, dispatched) = recording_context();
        let mut forwarded = Vec::new();
        let action = Action::new("user/fetchUsers", json!({})).with_async(fetch_users());

        middleware.process(&ctx, action, |a| forwarded.push(a.action_type));
        assert_eq!(forwarded, vec!["user/fetchUsers".to_string()]);

        middleware.settled().await;
        assert_eq!(types(&dispatched), vec!["user/resolveFetchUsers".to_string()]);
        assert!(middleware.registry().snapshot().is_empty());
    }

    #[tokio::test]
    async fn ignore_effect_marker_skips_routing() {
        let middleware = Middleware::new().unwrap();
        let (ctx, dispatched) = recording_context();
        let action = Action::new("user/fetchUsers", json!({ "ignoreEffect": true }))
            .with_async(fetch_users());

        middleware.process(&ctx, action, |_| {});
        middleware.settled().await;

        assert!(dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_actions_settle_synchronously() {
        let middleware = Middleware::new().unwrap();
        let (ctx, dispatched) = recording_context();
        let action = Action::new("user/cancelFetchUsers", json!({}))
            .with_async(CancelConfig::new("user/fetchUsers").notify("user/fetchUsersCancelled"));

        middleware.process(&ctx, action, |_| {});

        assert!(middleware.inflight().is_idle());
        assert!(dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flow_actions_start_the_orchestrator() {
        let middleware = Middleware::new().unwrap();
        let (ctx, dispatched) = recording_context();
        let spec = ActionSpec::new(|payload| AsyncAction::new("user/fetchUsers", payload, fetch_users()));
        let flow = FlowConfig::new("user/resolveGetUsers", "user/rejectGetUsers").with_stages(stages![spec]);
        let action = Action::new("user/getUsers", json!({})).with_flow(flow);

        middleware.process(&ctx, action, |_| {});
        middleware.settled().await;

        assert_eq!(
            types(&dispatched),
            vec![
                "user/fetchUsers".to_string(),
                "user/resolveFetchUsers".to_string(),
                "user/resolveGetUsers".to_string(),
            ]
        );
        assert!(!middleware.flow_queue().is_blocked());
    }

    #[test]
    fn building_outside_a_runtime_fails() {
        assert_eq!(Middleware::new().unwrap_err(), SetupError::NoRuntime);
        assert_eq!(
            Middleware::with_registry(Arc::new(TaskRegistry::new())).unwrap_err(),
            SetupError::NoRuntime
        );
    }

    #[test]
    fn a_handle_built_middleware_routes_from_plain_threads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let middleware = Middleware::with_handle(runtime.handle().clone(), Arc::new(TaskRegistry::new()));
        let (ctx, dispatched) = recording_context();
        let mut forwarded = 0;
        let action = Action::new("user/fetchUsers", json!({})).with_async(fetch_users());

        middleware.process(&ctx, action, |_| forwarded += 1);
        runtime.block_on(middleware.settled());

        assert_eq!(forwarded, 1);
        assert_eq!(types(&dispatched), vec!["user/resolveFetchUsers".to_string()]);
        assert!(middleware.registry().snapshot().is_empty());
    }
}
