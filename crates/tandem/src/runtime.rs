//! A minimal state container with the middleware installed.
//!
//! The runtime owns a JSON state, folds every routed action into it with a
//! reducer, and publishes each reduced action on a broadcast bus. Engines
//! dispatch through the same runtime, so outcome actions and re-dispatched
//! flows take the regular path.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::action::Action;
use crate::context::DispatchContext;
use crate::error::SetupError;
use crate::middleware::Middleware;

/// Default capacity of the action bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

type Reducer = Arc<dyn Fn(&Value, &Action) -> Value + Send + Sync>;

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    initial: Value,
    reducer: Reducer,
    capacity: usize,
    middleware: Option<Middleware>,
}

impl RuntimeBuilder {
    pub fn new(initial: Value) -> Self {
        Self {
            initial,
            reducer: Arc::new(|state, _| state.clone()),
            capacity: DEFAULT_BUS_CAPACITY,
            middleware: None,
        }
    }

    pub fn with_reducer<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&Value, &Action) -> Value + Send + Sync + 'static,
    {
        self.reducer = Arc::new(reducer);
        self
    }

    /// Capacity of the broadcast bus. Slow subscribers lag past this many actions.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware = Some(middleware);
        self
    }

    /// Without an explicit middleware, one is built on the current tokio runtime.
    pub fn build(self) -> Result<Runtime, SetupError> {
        let middleware = match self.middleware {
            Some(middleware) => middleware,
            None => Middleware::new()?,
        };
        let (bus, _) = broadcast::channel(self.capacity);
        Ok(Runtime {
            inner: Arc::new(Inner {
                state: RwLock::new(self.initial),
                reducer: self.reducer,
                middleware,
                bus,
            }),
        })
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("initial", &self.initial)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Handle to a running state container. Clones share the same state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<Value>,
    reducer: Reducer,
    middleware: Middleware,
    bus: broadcast::Sender<Action>,
}

impl Runtime {
    pub fn builder(initial: Value) -> RuntimeBuilder {
        RuntimeBuilder::new(initial)
    }

    /// Route an action through the middleware and into the reducer.
    pub fn dispatch(&self, action: Action) {
        Inner::dispatch(&self.inner, action);
    }

    /// A copy of the current state.
    pub fn state(&self) -> Value {
        self.inner.read_state()
    }

    /// Receive every action after it was reduced.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.inner.bus.subscribe()
    }

    pub fn middleware(&self) -> &Middleware {
        &self.inner.middleware
    }

    /// Wait until every effect and flow started through this runtime settled.
    pub async fn settled(&self) {
        self.inner.middleware.settled().await;
    }

    /// Collaborators bound to this runtime.
    ///
    /// The context holds the runtime weakly; once every [`Runtime`] handle is
    /// dropped, dispatches through it are discarded and `get_state` yields
    /// `null`.
    pub fn context(&self) -> DispatchContext {
        Inner::context(&self.inner)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("state", &self.state())
            .field("middleware", &self.inner.middleware)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn context(this: &Arc<Inner>) -> DispatchContext {
        let dispatcher = Arc::downgrade(this);
        let reader = Arc::downgrade(this);
        DispatchContext::new(
            move |action| match Weak::upgrade(&dispatcher) {
                Some(inner) => Inner::dispatch(&inner, action),
                None => trace!(action_type = %action.action_type, "runtime dropped, action discarded"),
            },
            move || {
                Weak::upgrade(&reader)
                    .map(|inner| inner.read_state())
                    .unwrap_or(Value::Null)
            },
        )
    }

    fn dispatch(this: &Arc<Inner>, action: Action) {
        let ctx = Inner::context(this);
        this.middleware
            .process(&ctx, action, |action| this.reduce(action));
    }

    fn reduce(&self, action: Action) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let next = (self.reducer)(&state, &action);
            *state = next;
        }
        trace!(action_type = %action.action_type, "action reduced");
        // No subscribers is fine.
        let _ = self.bus.send(action);
    }

    fn read_state(&self) -> Value {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect_impl::EffectConfig;
    use serde_json::json;

    fn users_reducer(state: &Value, action: &Action) -> Value {
        let mut state = state.clone();
        match action.action_type.as_str() {
            "user/fetchUsers" => state["loading"] = json!(true),
            "user/resolveFetchUsers" => {
                state["loading"] = json!(false);
                state["users"] = action.payload["response"].clone();
            }
            _ => {}
        }
        state
    }

    #[tokio::test]
    async fn reduces_the_trigger_then_the_outcome() {
        let runtime = RuntimeBuilder::new(json!({ "users": [] }))
            .with_reducer(users_reducer)
            .build()
            .unwrap();
        let mut bus = runtime.subscribe();

        runtime.dispatch(Action::new("user/fetchUsers", json!({})).with_async(EffectConfig::new(
            |_| async { Ok(json!(["ann", "bob"])) },
            "user/resolveFetchUsers",
            "user/rejectFetchUsers",
        )));
        assert_eq!(runtime.state()["loading"], json!(true));

        runtime.settled().await;

        assert_eq!(runtime.state(), json!({ "users": ["ann", "bob"], "loading": false }));
        assert_eq!(bus.recv().await.unwrap().action_type, "user/fetchUsers");
        let resolved = bus.recv().await.unwrap();
        assert_eq!(resolved.action_type, "user/resolveFetchUsers");
        assert_eq!(resolved.payload["state"]["loading"], json!(true));
    }

    #[tokio::test]
    async fn context_outlives_the_runtime_safely() {
        let runtime = RuntimeBuilder::new(json!({ "n": 1 })).build().unwrap();
        let ctx = runtime.context();
        assert_eq!(ctx.get_state(), json!({ "n": 1 }));

        drop(runtime);

        assert_eq!(ctx.get_state(), Value::Null);
        ctx.dispatch(Action::new("user/clear", Value::Null));
    }

    #[test]
    fn building_outside_a_runtime_fails() {
        let result = RuntimeBuilder::new(Value::Null).build();
        assert_eq!(result.err(), Some(SetupError::NoRuntime));
    }

    #[test]
    fn capacity_is_at_least_one() {
        let builder = RuntimeBuilder::new(Value::Null).with_capacity(0);
        assert_eq!(builder.capacity, 1);
    }
}
