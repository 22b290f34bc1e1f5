//! Testing utilities for tandem.
//!
//! - [`RecordingContext`] is a host stand-in: it records every dispatched
//!   action and serves a settable state.
//! - [`GatedEffect`] is an effect whose invocations park until the test
//!   resolves or rejects them, which makes out-of-order settlement easy to
//!   script.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use serde_json::Value;
use tandem_core::{Action, DispatchContext, EffectConfig, TakeMode};
use tokio::sync::{oneshot, Notify};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// RecordingContext
// ============================================================================

/// Records dispatched actions in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingContext {
    dispatched: Arc<Mutex<Vec<Action>>>,
    state: Arc<Mutex<Value>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: Value) -> Self {
        let recording = Self::default();
        recording.set_state(state);
        recording
    }

    /// Collaborators that record into this context.
    pub fn context(&self) -> DispatchContext {
        let dispatched = Arc::clone(&self.dispatched);
        let state = Arc::clone(&self.state);
        DispatchContext::new(
            move |action| lock(&dispatched).push(action),
            move || lock(&state).clone(),
        )
    }

    pub fn set_state(&self, state: Value) {
        *lock(&self.state) = state;
    }

    pub fn actions(&self) -> Vec<Action> {
        lock(&self.dispatched).clone()
    }

    /// Types of all dispatched actions, in dispatch order.
    pub fn types(&self) -> Vec<String> {
        lock(&self.dispatched)
            .iter()
            .map(|action| action.action_type.clone())
            .collect()
    }

    pub fn of_type(&self, action_type: &str) -> Vec<Action> {
        lock(&self.dispatched)
            .iter()
            .filter(|action| action.action_type == action_type)
            .cloned()
            .collect()
    }

    pub fn count(&self, action_type: &str) -> usize {
        lock(&self.dispatched)
            .iter()
            .filter(|action| action.action_type == action_type)
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.dispatched).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.dispatched).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.dispatched).clear();
    }
}

// ============================================================================
// GatedEffect
// ============================================================================

struct Gate {
    payload: Value,
    result: oneshot::Sender<anyhow::Result<Value>>,
}

#[derive(Default)]
struct GateState {
    parked: Mutex<VecDeque<Gate>>,
    calls: Mutex<usize>,
    arrived: Notify,
}

/// An effect that parks every invocation until released.
///
/// Parked invocations are released in arrival order with
/// [`resolve_next`](Self::resolve_next) and [`reject_next`](Self::reject_next),
/// or selectively with [`resolve_where`](Self::resolve_where). A gate that is
/// dropped unreleased fails its invocation.
#[derive(Clone, Default)]
pub struct GatedEffect {
    state: Arc<GateState>,
}

impl GatedEffect {
    pub fn new() -> Self {
        Self::default()
    }

    /// An operation configuration running this effect.
    pub fn config(&self, resolve_type: &str, reject_type: &str, take: TakeMode) -> EffectConfig {
        let gate = self.clone();
        EffectConfig::new(
            move |payload| {
                let gate = gate.clone();
                async move { gate.park(payload).await }
            },
            resolve_type,
            reject_type,
        )
        .with_take(take)
    }

    async fn park(&self, payload: Value) -> anyhow::Result<Value> {
        let (tx, rx) = oneshot::channel();
        lock(&self.state.parked).push_back(Gate {
            payload,
            result: tx,
        });
        *lock(&self.state.calls) += 1;
        self.state.arrived.notify_waiters();
        rx.await.unwrap_or_else(|_| Err(anyhow!("gate dropped before release")))
    }

    /// Invocations started so far.
    pub fn calls(&self) -> usize {
        *lock(&self.state.calls)
    }

    /// Invocations currently parked.
    pub fn parked(&self) -> usize {
        lock(&self.state.parked).len()
    }

    /// Payloads of the parked invocations, oldest first.
    pub fn parked_payloads(&self) -> Vec<Value> {
        lock(&self.state.parked)
            .iter()
            .map(|gate| gate.payload.clone())
            .collect()
    }

    /// Wait until at least `count` invocations are parked.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let mut arrived = pin!(self.state.arrived.notified());
            arrived.as_mut().enable();
            if self.parked() >= count {
                return;
            }
            arrived.await;
        }
    }

    /// Resolve the oldest parked invocation. Returns false if none is parked.
    pub fn resolve_next(&self, response: Value) -> bool {
        self.release_next(Ok(response))
    }

    /// Fail the oldest parked invocation.
    pub fn reject_next(&self, message: &str) -> bool {
        self.release_next(Err(anyhow!(message.to_string())))
    }

    /// Resolve the oldest parked invocation whose payload matches.
    pub fn resolve_where<P>(&self, predicate: P, response: Value) -> bool
    where
        P: Fn(&Value) -> bool,
    {
        let gate = {
            let mut parked = lock(&self.state.parked);
            let position = parked.iter().position(|gate| predicate(&gate.payload));
            position.and_then(|position| parked.remove(position))
        };
        match gate {
            Some(gate) => gate.result.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    fn release_next(&self, result: anyhow::Result<Value>) -> bool {
        let gate = lock(&self.state.parked).pop_front();
        match gate {
            Some(gate) => gate.result.send(result).is_ok(),
            None => false,
        }
    }
}
