//! Host collaborators handed to every engine.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::action::Action;
use crate::error::SetupError;

type DispatchFn = Arc<dyn Fn(Action) + Send + Sync>;
type GetStateFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// The host's `dispatch` and `get_state` functions.
///
/// `dispatch` pushes an action back into the host's routing (and therefore
/// back through [`Middleware`](crate::Middleware) if the host installed it).
/// `get_state` is a synchronous read whose result is embedded verbatim in
/// resolve and reject payloads.
#[derive(Clone)]
pub struct DispatchContext {
    dispatch: DispatchFn,
    get_state: GetStateFn,
}

impl DispatchContext {
    pub fn new<D, S>(dispatch: D, get_state: S) -> Self
    where
        D: Fn(Action) + Send + Sync + 'static,
        S: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            dispatch: Arc::new(dispatch),
            get_state: Arc::new(get_state),
        }
    }

    pub fn builder() -> DispatchContextBuilder {
        DispatchContextBuilder::default()
    }

    pub fn dispatch(&self, action: Action) {
        (self.dispatch)(action)
    }

    pub fn get_state(&self) -> Value {
        (self.get_state)()
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext").finish_non_exhaustive()
    }
}

/// Builder that refuses to produce a context with a missing collaborator.
#[derive(Default)]
pub struct DispatchContextBuilder {
    dispatch: Option<DispatchFn>,
    get_state: Option<GetStateFn>,
}

impl DispatchContextBuilder {
    pub fn dispatch<D>(mut self, dispatch: D) -> Self
    where
        D: Fn(Action) + Send + Sync + 'static,
    {
        self.dispatch = Some(Arc::new(dispatch));
        self
    }

    pub fn get_state<S>(mut self, get_state: S) -> Self
    where
        S: Fn() -> Value + Send + Sync + 'static,
    {
        self.get_state = Some(Arc::new(get_state));
        self
    }

    pub fn build(self) -> Result<DispatchContext, SetupError> {
        let dispatch = self.dispatch.ok_or(SetupError::MissingDispatch)?;
        let get_state = self.get_state.ok_or(SetupError::MissingGetState)?;
        Ok(DispatchContext {
            dispatch,
            get_state,
        })
    }
}
