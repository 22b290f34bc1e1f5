//! Flow configuration: ordered stages of operations.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;

use crate::action::{extend_payload, FlowResponse};
use crate::context::DispatchContext;
use crate::effect_impl::AsyncAction;
use crate::take::FlowTake;

type EffectFactory = Arc<dyn Fn(Value) -> AsyncAction + Send + Sync>;
type PrepareFn = Arc<dyn Fn(&DispatchContext, &Value, &[FlowResponse]) -> Value + Send + Sync>;
type BreakFn =
    Arc<dyn Fn(&[FlowResponse], &DispatchContext, &ActionSpec, &Value) -> bool + Send + Sync>;

/// One operation of a flow stage.
///
/// The effect factory turns the (prepared) flow payload into the operation
/// to run. `prepare` computes `params` from the responses collected so far;
/// without it the operation sees them as `prevResponse`. `break_when` can
/// abort the whole flow after the operation settled; it sees the responses
/// of earlier stages only, never the operation's own result.
#[derive(Clone)]
pub struct ActionSpec {
    effect: EffectFactory,
    prepare: Option<PrepareFn>,
    break_when: Option<BreakFn>,
}

impl ActionSpec {
    pub fn new<F>(effect: F) -> Self
    where
        F: Fn(Value) -> AsyncAction + Send + Sync + 'static,
    {
        Self {
            effect: Arc::new(effect),
            prepare: None,
            break_when: None,
        }
    }

    pub fn prepare<F>(mut self, prepare: F) -> Self
    where
        F: Fn(&DispatchContext, &Value, &[FlowResponse]) -> Value + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    pub fn break_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[FlowResponse], &DispatchContext, &ActionSpec, &Value) -> bool + Send + Sync + 'static,
    {
        self.break_when = Some(Arc::new(predicate));
        self
    }

    pub fn has_prepare(&self) -> bool {
        self.prepare.is_some()
    }

    pub fn has_break(&self) -> bool {
        self.break_when.is_some()
    }

    /// Build the operation for an already prepared payload.
    pub fn describe(&self, payload: Value) -> AsyncAction {
        (self.effect)(payload)
    }

    pub(crate) fn prepare_payload(
        &self,
        ctx: &DispatchContext,
        payload: &Value,
        responses: &[FlowResponse],
    ) -> Value {
        match &self.prepare {
            Some(prepare) => {
                let params = prepare(ctx, payload, responses);
                extend_payload(payload, [("params", params)])
            }
            None => {
                let previous = serde_json::to_value(responses).unwrap_or(Value::Null);
                extend_payload(payload, [("prevResponse", previous)])
            }
        }
    }

    pub(crate) fn should_break(
        &self,
        responses: &[FlowResponse],
        ctx: &DispatchContext,
        payload: &Value,
    ) -> bool {
        self.break_when
            .as_ref()
            .is_some_and(|predicate| predicate(responses, ctx, self, payload))
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("prepare", &self.has_prepare())
            .field("break_when", &self.has_break())
            .finish_non_exhaustive()
    }
}

/// Operations that run concurrently. Stages run one after another.
#[derive(Debug, Clone)]
pub struct Stage {
    specs: SmallVec<[ActionSpec; 1]>,
}

impl Stage {
    pub fn single(spec: ActionSpec) -> Self {
        let mut specs = SmallVec::new();
        specs.push(spec);
        Self { specs }
    }

    pub fn parallel(specs: impl IntoIterator<Item = ActionSpec>) -> Self {
        Self {
            specs: specs.into_iter().collect(),
        }
    }

    pub fn specs(&self) -> &[ActionSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl From<ActionSpec> for Stage {
    fn from(spec: ActionSpec) -> Self {
        Stage::single(spec)
    }
}

impl From<Vec<ActionSpec>> for Stage {
    fn from(specs: Vec<ActionSpec>) -> Self {
        Stage::parallel(specs)
    }
}

impl<const N: usize> From<[ActionSpec; N]> for Stage {
    fn from(specs: [ActionSpec; N]) -> Self {
        Stage::parallel(specs)
    }
}

/// The `meta.flow` half of an action.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub stages: Vec<Stage>,
    pub resolve_type: String,
    pub reject_type: String,
    pub take: FlowTake,
}

impl FlowConfig {
    pub fn new(resolve_type: impl Into<String>, reject_type: impl Into<String>) -> Self {
        Self {
            stages: Vec::new(),
            resolve_type: resolve_type.into(),
            reject_type: reject_type.into(),
            take: FlowTake::default(),
        }
    }

    pub fn with_stage(mut self, stage: impl Into<Stage>) -> Self {
        self.stages.push(stage.into());
        self
    }

    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn with_take(mut self, take: FlowTake) -> Self {
        self.take = take;
        self
    }

    /// Number of operations across all stages.
    pub fn operation_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }
}
