//! Task registry: which operation instances are running, which were
//! cancelled, and which one is authoritative for each operation type.
//!
//! Every invocation gets an index from a counter that only ever grows. For a
//! given type the running record with the greatest index is the authoritative
//! one; when a newer invocation registers, older running records of the same
//! type move to the cancelled list and stay there until an instance of that
//! type settles.
//!
//! All operations take the registry lock for their whole duration. The
//! handler additionally uses [`TaskRegistry::admit`] and
//! [`TaskRegistry::settle`] so that registration plus gate check, and gate
//! check plus cleanup, are each a single indivisible step.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::effect_impl::CancelMatcher;
use crate::take::TakeMode;

/// One running or cancelled operation instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub index: u64,
    pub action_type: String,
    pub started_at: DateTime<Utc>,
}

impl TaskRecord {
    fn new(index: u64, action_type: &str) -> Self {
        Self {
            index,
            action_type: action_type.to_string(),
            started_at: Utc::now(),
        }
    }
}

/// Most recent records of a type in each list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundTasks {
    pub prev_running_task: Option<TaskRecord>,
    pub prev_cancelled_task: Option<TaskRecord>,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub running: Vec<TaskRecord>,
    pub cancelled: Vec<TaskRecord>,
    pub next_index: u64,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.running.is_empty() && self.cancelled.is_empty()
    }

    pub fn running_indices(&self, action_type: &str) -> Vec<u64> {
        indices_of(&self.running, action_type)
    }

    pub fn cancelled_indices(&self, action_type: &str) -> Vec<u64> {
        indices_of(&self.cancelled, action_type)
    }
}

fn indices_of(records: &[TaskRecord], action_type: &str) -> Vec<u64> {
    records
        .iter()
        .filter(|task| task.action_type == action_type)
        .map(|task| task.index)
        .collect()
}

/// Result of asking the registry to start an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Registered under this index, effect may run.
    Started(u64),
    /// Registered under this index but already stale; nothing may run.
    Stale(u64),
    /// `TakeMode::First` and an instance is already running.
    Ignored,
}

#[derive(Debug, Default)]
struct RegistryState {
    running: Vec<TaskRecord>,
    cancelled: Vec<TaskRecord>,
    next_index: u64,
}

impl RegistryState {
    fn next_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn add_task(&mut self, action_type: &str) -> u64 {
        let index = self.next_index();
        self.running.push(TaskRecord::new(index, action_type));
        trace!(action_type, index, "task registered");
        index
    }

    fn find_tasks(&self, action_type: &str) -> FoundTasks {
        let latest = |records: &[TaskRecord]| {
            records
                .iter()
                .filter(|task| task.action_type == action_type)
                .max_by_key(|task| task.index)
                .cloned()
        };

        FoundTasks {
            prev_running_task: latest(&self.running),
            prev_cancelled_task: latest(&self.cancelled),
        }
    }

    fn update_task(&mut self, action_type: &str) -> u64 {
        let index = self.next_index();
        let (superseded, kept): (Vec<_>, Vec<_>) = self
            .running
            .drain(..)
            .partition(|task| task.action_type == action_type);
        self.running = kept;

        for task in &superseded {
            trace!(action_type, index = task.index, by = index, "task superseded");
        }
        self.cancelled.extend(superseded);
        self.running.push(TaskRecord::new(index, action_type));
        index
    }

    fn update_state(&mut self, action_type: &str, cancel: Option<&CancelMatcher>) -> Option<u64> {
        if let Some(matcher) = cancel {
            self.cancel_running_task(matcher);
            return None;
        }

        let found = self.find_tasks(action_type);
        if found.prev_running_task.is_some() {
            Some(self.update_task(action_type))
        } else {
            Some(self.add_task(action_type))
        }
    }

    fn cancel_running_task(&mut self, matcher: &CancelMatcher) -> Option<TaskRecord> {
        let position = self
            .running
            .iter()
            .enumerate()
            .filter(|(_, task)| task.action_type == matcher.action_type)
            .max_by_key(|(_, task)| task.index)
            .map(|(position, _)| position)?;

        let task = self.running.remove(position);
        trace!(action_type = %task.action_type, index = task.index, "task cancelled");
        self.cancelled.push(task.clone());
        Some(task)
    }

    fn is_cancelled(&self, action_type: &str) -> bool {
        self.cancelled
            .iter()
            .any(|task| task.action_type == action_type)
    }

    fn is_running(&self, index: u64) -> bool {
        self.running.iter().any(|task| task.index == index)
    }

    fn is_take_latest(&self, take: TakeMode, action_type: &str, index: u64) -> bool {
        if take != TakeMode::Latest {
            return false;
        }

        let latest = self
            .running
            .iter()
            .filter(|task| task.action_type == action_type)
            .map(|task| task.index)
            .max();

        latest != Some(index)
    }

    fn is_stale(&self, take: TakeMode, action_type: &str, index: u64) -> bool {
        self.is_take_latest(take, action_type, index) || !self.is_running(index)
    }

    fn complete_running_task(&mut self, index: u64) {
        self.running.retain(|task| task.index != index);
    }

    fn clean_prev_cancelled_tasks(&mut self, action_type: &str) {
        self.cancelled.retain(|task| task.action_type != action_type);
    }
}

/// Registry of running and cancelled operation instances.
///
/// Construct one per engine; instances never share state.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Nothing panics while holding the lock, so a poisoned guard still
        // holds consistent lists.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next index and record a running task for `action_type`.
    pub fn add_task(&self, action_type: &str) -> u64 {
        self.lock().add_task(action_type)
    }

    /// Most recent running and cancelled records for `action_type`.
    pub fn find_tasks(&self, action_type: &str) -> FoundTasks {
        self.lock().find_tasks(action_type)
    }

    /// Supersede: move running records of `action_type` to the cancelled list
    /// and register a new one. Returns the new index.
    pub fn update_task(&self, action_type: &str) -> u64 {
        self.lock().update_task(action_type)
    }

    /// Register an invocation of `action_type`, superseding any running one.
    ///
    /// With a cancel matcher this cancels instead and registers nothing.
    pub fn update_state(&self, action_type: &str, cancel: Option<&CancelMatcher>) -> Option<u64> {
        self.lock().update_state(action_type, cancel)
    }

    /// Move the most recent running task matching `matcher` to the cancelled list.
    pub fn cancel_running_task(&self, matcher: &CancelMatcher) -> Option<TaskRecord> {
        self.lock().cancel_running_task(matcher)
    }

    /// Whether any cancelled record of `action_type` is still awaiting settlement.
    pub fn is_cancelled(&self, action_type: &str) -> bool {
        self.lock().is_cancelled(action_type)
    }

    /// Whether the record with `index` is still in the running list.
    pub fn is_running(&self, index: u64) -> bool {
        self.lock().is_running(index)
    }

    /// True when `take` is [`TakeMode::Latest`] and `index` is no longer the
    /// newest running instance of `action_type`.
    pub fn is_take_latest(&self, take: TakeMode, action_type: &str, index: u64) -> bool {
        self.lock().is_take_latest(take, action_type, index)
    }

    pub fn complete_running_task(&self, index: u64) {
        self.lock().complete_running_task(index)
    }

    pub fn clean_prev_cancelled_tasks(&self, action_type: &str) {
        self.lock().clean_prev_cancelled_tasks(action_type)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.lock();
        RegistrySnapshot {
            running: state.running.clone(),
            cancelled: state.cancelled.clone(),
            next_index: state.next_index,
        }
    }

    /// Register an invocation and run the pre-effect gate in one step.
    pub(crate) fn admit(&self, action_type: &str, take: TakeMode) -> Admission {
        let mut state = self.lock();

        if take == TakeMode::First && state.find_tasks(action_type).prev_running_task.is_some() {
            return Admission::Ignored;
        }

        match state.update_state(action_type, None) {
            Some(index) if state.is_stale(take, action_type, index) => Admission::Stale(index),
            Some(index) => Admission::Started(index),
            None => Admission::Ignored,
        }
    }

    /// Re-run the gate for a settled instance and clean up after it.
    ///
    /// Returns true when the instance turned stale while it was running.
    pub(crate) fn settle(&self, action_type: &str, index: u64, take: TakeMode) -> bool {
        let mut state = self.lock();
        let stale = state.is_stale(take, action_type, index);
        state.complete_running_task(index);
        state.clean_prev_cancelled_tasks(action_type);
        stale
    }
}
