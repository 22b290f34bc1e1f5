//! Flow block flag and the FIFO of deferred `every:serial` invocations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::trace;

use crate::action::Action;
use crate::flow::FlowConfig;
use crate::take::FlowTake;

/// A flow invocation deferred until the running flow completes.
#[derive(Debug, Clone)]
pub struct FlowQueueEntry {
    pub flow_type: String,
    pub payload: Value,
    pub config: Arc<FlowConfig>,
}

impl FlowQueueEntry {
    /// The action that re-enters entry routing for this invocation.
    pub fn into_action(self) -> Action {
        Action::new(self.flow_type, self.payload).with_flow(self.config)
    }
}

/// What the queue decided for a new flow invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAdmission {
    /// Not blocked; the block is now held by this invocation.
    Run,
    /// `every:parallel`; runs without touching the block.
    Parallel,
    /// Blocked and `every:serial`; appended to the queue.
    Queued,
    /// Blocked; dropped without a trace.
    Dropped,
}

#[derive(Debug, Default)]
struct QueueState {
    block_flow: bool,
    queue: VecDeque<FlowQueueEntry>,
}

/// Per-orchestrator re-entrancy state.
#[derive(Debug, Default)]
pub struct FlowQueue {
    state: Mutex<QueueState>,
}

impl FlowQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True while a non-parallel flow is executing.
    pub fn is_blocked(&self) -> bool {
        self.lock().block_flow
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn entries(&self) -> Vec<FlowQueueEntry> {
        self.lock().queue.iter().cloned().collect()
    }

    /// Decide what to do with a flow invocation, taking the block if it runs.
    pub fn admit(&self, take: FlowTake, entry: impl FnOnce() -> FlowQueueEntry) -> FlowAdmission {
        if !take.blocks() {
            return FlowAdmission::Parallel;
        }

        let mut state = self.lock();
        if !state.block_flow {
            state.block_flow = true;
            return FlowAdmission::Run;
        }

        match take {
            FlowTake::EverySerial => {
                let entry = entry();
                trace!(flow_type = %entry.flow_type, "flow queued");
                state.queue.push_back(entry);
                FlowAdmission::Queued
            }
            _ => FlowAdmission::Dropped,
        }
    }

    /// Clear the block and hand back the next deferred invocation.
    pub fn release(&self) -> Option<FlowQueueEntry> {
        let mut state = self.lock();
        state.block_flow = false;
        state.queue.pop_front()
    }
}
