//! # Tandem
//!
//! Asynchronous side-effect orchestration for action-dispatching state
//! containers.
//!
//! ## Core Concepts
//!
//! Tandem sits on the dispatch path of a host that routes [`Action`]s to
//! reducers:
//! - An **operation** is one effect attached to an action (`meta.async_op`).
//!   Its outcome comes back as a resolve or reject action.
//! - A **flow** is an ordered list of [`Stage`]s (`meta.flow`). Operations of a
//!   stage run concurrently, stages run one after another, and the flow ends
//!   with one aggregated resolve or reject action.
//!
//! The key principle: **callers are never failed**. Every outcome, including
//! effect errors, is reported by dispatching another action.
//!
//! ## Architecture
//!
//! ```text
//! Host dispatch(action)
//!     │
//!     ▼
//! Middleware.process() ─────────────────────────────┐
//!     │                                             │
//!     ├─► meta.async_op ─► AsyncHandler.begin()     │
//!     │        │               │                    │
//!     │        │          TaskRegistry (take mode,  │
//!     │        │          cancellation, staleness)  │
//!     │        ▼                                    │
//!     │   spawn settle() ─► resolve / reject ───────┤
//!     │                                             │
//!     ├─► meta.flow ─► FlowOrchestrator.begin()     │
//!     │        │               │                    │
//!     │        │          FlowQueue (block flag,    │
//!     │        │          every:serial queue)       │
//!     │        ▼                                    │
//!     │   spawn finish() ─► stage 1 ─► stage 2 ...  │
//!     │                        └─► resolve / reject ┤
//!     │                                             │
//!     └─► next(action) ─► reducer                   │
//!                             ▲                     │
//!                             └─────────────────────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Registration order is call order** - task indices are assigned
//!    synchronously while the action is routed
//! 2. **Stale results are dropped** - a superseded or cancelled operation
//!    settles silently
//! 3. **One flow at a time** - unless the flow is `every:parallel`, a busy
//!    orchestrator drops (`first`, `latest`) or queues (`every:serial`)
//! 4. **Cleanup always runs** - after success, failure and panics alike
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use tandem_core::{stages, Action, ActionSpec, AsyncAction, EffectConfig, FlowConfig, RuntimeBuilder};
//!
//! let runtime = RuntimeBuilder::new(json!({ "users": [] }))
//!     .with_reducer(|state, action| {
//!         let mut state = state.clone();
//!         if action.action_type == "user/resolveFetchUsers" {
//!             state["users"] = action.payload["response"].clone();
//!         }
//!         state
//!     })
//!     .build()?;
//!
//! // One operation
//! runtime.dispatch(Action::new("user/fetchUsers", json!({})).with_async(EffectConfig::new(
//!     |_| async { Ok(json!(["ann"])) },
//!     "user/resolveFetchUsers",
//!     "user/rejectFetchUsers",
//! )));
//!
//! // A flow of two stages
//! let fetch_roles = ActionSpec::new(|payload| {
//!     AsyncAction::new("user/fetchRoles", payload, roles_effect())
//! });
//! let flow = FlowConfig::new("user/resolveGetUsers", "user/rejectGetUsers")
//!     .with_stages(stages![fetch_users, [fetch_roles, fetch_teams]]);
//! runtime.dispatch(Action::new("user/getUsers", json!({})).with_flow(flow));
//!
//! runtime.settled().await;
//! ```
//!
//! ## What This Is Not
//!
//! Tandem does **not** retry effects, persist task state across restarts, or
//! serialize actions for transport.

// Core modules
mod action;
mod context;
mod effect_impl;
mod error;
mod flow;
mod flow_queue;
mod handler;
mod inflight;
mod middleware;
mod orchestrator;
mod registry;
mod runtime;
mod stage_macro;
mod take;



// Re-export message types
pub use action::{Action, FlowResponse, Meta, IGNORE_EFFECT};

// Re-export host collaborators
pub use context::{DispatchContext, DispatchContextBuilder};

// Re-export effect types
pub use effect_impl::{AsyncAction, AsyncConfig, CancelConfig, CancelMatcher, Effect, EffectConfig};

// Re-export error types
pub use error::{
    ActionError, EffectError, EffectRejection, FlowError, SetupError, TakeModeParseError,
};

// Re-export take policies
pub use take::{FlowTake, TakeMode};

// Re-export registry types
pub use registry::{FoundTasks, RegistrySnapshot, TaskRecord, TaskRegistry};

// Re-export handler types
pub use handler::{AsyncHandler, Outcome, PendingOperation};

// Re-export flow types
pub use flow::{ActionSpec, FlowConfig, Stage};
pub use flow_queue::{FlowAdmission, FlowQueue, FlowQueueEntry};
pub use orchestrator::{FlowOrchestrator, FlowOutcome, PendingFlow};

// Re-export routing and runtime types (primary entry point)
pub use inflight::{InflightGuard, InflightTracker};
pub use middleware::Middleware;
pub use runtime::{Runtime, RuntimeBuilder, DEFAULT_BUS_CAPACITY};

// Re-export commonly used external types
pub use async_trait::async_trait;
