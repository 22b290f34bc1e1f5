//! Flows dispatched through the runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tandem_core::{
    stages, Action, ActionSpec, AsyncAction, EffectConfig, FlowConfig, FlowResponse, FlowTake,
    Runtime, RuntimeBuilder, TakeMode,
};
use tandem_testing::GatedEffect;
use tokio::sync::broadcast;

const GET_USERS: &str = "user/getUsers";
const RESOLVE_GET_USERS: &str = "user/resolveGetUsers";
const REJECT_GET_USERS: &str = "user/rejectGetUsers";

fn logging_runtime() -> Runtime {
    RuntimeBuilder::new(json!({ "log": [] }))
        .with_reducer(|state, action| {
            let mut state = state.clone();
            if let Some(log) = state["log"].as_array_mut() {
                log.push(json!(action.action_type));
            }
            state
        })
        .build()
        .unwrap()
}

fn drain(bus: &mut broadcast::Receiver<Action>) -> Vec<Action> {
    let mut actions = Vec::new();
    while let Ok(action) = bus.try_recv() {
        actions.push(action);
    }
    actions
}

fn count(actions: &[Action], action_type: &str) -> usize {
    actions
        .iter()
        .filter(|action| action.action_type == action_type)
        .count()
}

fn responding(action_type: &'static str, response: Value) -> ActionSpec {
    ActionSpec::new(move |payload| {
        let response = response.clone();
        AsyncAction::new(
            action_type,
            payload,
            EffectConfig::new(
                move |_| {
                    let response = response.clone();
                    async move { Ok(response) }
                },
                format!("{action_type}Resolved"),
                format!("{action_type}Rejected"),
            ),
        )
    })
}

fn gated(action_type: &'static str, gate: &GatedEffect) -> ActionSpec {
    let gate = gate.clone();
    ActionSpec::new(move |payload| {
        AsyncAction::new(
            action_type,
            payload,
            gate.config(
                &format!("{action_type}Resolved"),
                &format!("{action_type}Rejected"),
                TakeMode::First,
            ),
        )
    })
}

fn get_users(stages: Vec<tandem_core::Stage>, take: FlowTake) -> FlowConfig {
    FlowConfig::new(RESOLVE_GET_USERS, REJECT_GET_USERS)
        .with_stages(stages)
        .with_take(take)
}

#[tokio::test]
async fn two_stage_flow_aggregates_three_responses() {
    let runtime = logging_runtime();
    let mut bus = runtime.subscribe();
    let flow = get_users(
        stages![
            responding("user/fetchUsers", json!(["ann", "bob"])),
            [
                responding("user/fetchRoles", json!({ "ann": "admin" })),
                responding("user/fetchTeams", json!(["core"])),
            ],
        ],
        FlowTake::First,
    );

    runtime.dispatch(Action::new(GET_USERS, json!({ "org": 7 })).with_flow(flow));
    runtime.settled().await;

    let actions = drain(&mut bus);
    let resolved: Vec<&Action> = actions
        .iter()
        .filter(|action| action.action_type == RESOLVE_GET_USERS)
        .collect();
    assert_eq!(resolved.len(), 1);
    assert_eq!(
        resolved[0].responses.as_deref(),
        Some(
            [
                FlowResponse::new("user/fetchUsers", json!(["ann", "bob"])),
                FlowResponse::new("user/fetchRoles", json!({ "ann": "admin" })),
                FlowResponse::new("user/fetchTeams", json!(["core"])),
            ]
            .as_slice()
        )
    );

    // Stage operations are observed by reducers but never started twice.
    for stage_type in ["user/fetchUsers", "user/fetchRoles", "user/fetchTeams"] {
        assert_eq!(count(&actions, stage_type), 1);
        assert_eq!(count(&actions, &format!("{stage_type}Resolved")), 1);
    }
    assert_eq!(runtime.state()["log"][0], json!(GET_USERS));
    assert!(runtime.middleware().registry().snapshot().is_empty());
}

#[tokio::test]
async fn default_take_drops_a_flow_dispatched_while_one_runs() {
    let runtime = logging_runtime();
    let gate = GatedEffect::new();
    let mut bus = runtime.subscribe();
    let flow = Arc::new(get_users(stages![gated("user/fetchUsers", &gate)], FlowTake::First));

    runtime.dispatch(Action::new(GET_USERS, json!({ "n": 1 })).with_flow(Arc::clone(&flow)));
    runtime.dispatch(Action::new(GET_USERS, json!({ "n": 2 })).with_flow(Arc::clone(&flow)));
    gate.wait_for(1).await;
    assert!(runtime.middleware().flow_queue().is_empty());
    assert!(gate.resolve_next(json!([])));
    runtime.settled().await;

    let actions = drain(&mut bus);
    assert_eq!(gate.calls(), 1);
    assert_eq!(count(&actions, RESOLVE_GET_USERS), 1);
    assert_eq!(count(&actions, GET_USERS), 2);
    assert!(!runtime.middleware().flow_queue().is_blocked());
}

#[tokio::test]
async fn serial_take_queues_and_redispatches_after_completion() {
    let runtime = logging_runtime();
    let gate = GatedEffect::new();
    let mut bus = runtime.subscribe();
    let flow = Arc::new(get_users(
        stages![gated("user/fetchUsers", &gate)],
        FlowTake::EverySerial,
    ));

    runtime.dispatch(Action::new(GET_USERS, json!({ "n": 1 })).with_flow(Arc::clone(&flow)));
    runtime.dispatch(Action::new(GET_USERS, json!({ "n": 2 })).with_flow(Arc::clone(&flow)));
    assert_eq!(runtime.middleware().flow_queue().len(), 1);

    gate.wait_for(1).await;
    assert_eq!(gate.parked_payloads()[0]["n"], json!(1));
    assert!(gate.resolve_next(json!("first")));

    // The queued invocation re-enters through dispatch once the first completes.
    gate.wait_for(1).await;
    assert_eq!(gate.parked_payloads()[0]["n"], json!(2));
    assert!(gate.resolve_next(json!("second")));
    runtime.settled().await;

    let actions = drain(&mut bus);
    assert_eq!(count(&actions, GET_USERS), 3);
    let responses: Vec<Value> = actions
        .iter()
        .filter(|action| action.action_type == RESOLVE_GET_USERS)
        .filter_map(|action| action.responses.as_ref())
        .map(|responses| responses[0].response.clone())
        .collect();
    assert_eq!(responses, vec![json!("first"), json!("second")]);
    assert!(runtime.middleware().flow_queue().is_empty());
    assert!(!runtime.middleware().flow_queue().is_blocked());
}

#[tokio::test]
async fn parallel_take_runs_overlapping_flows() {
    let runtime = logging_runtime();
    let gate = GatedEffect::new();
    let mut bus = runtime.subscribe();
    let spec = {
        let gate = gate.clone();
        ActionSpec::new(move |payload| {
            let page = payload["page"].as_i64().unwrap_or_default();
            AsyncAction::new(
                format!("user/fetchPage{page}"),
                payload,
                gate.config("user/pageResolved", "user/pageRejected", TakeMode::First),
            )
        })
    };
    let flow = Arc::new(get_users(stages![spec], FlowTake::EveryParallel));

    runtime.dispatch(Action::new(GET_USERS, json!({ "page": 1 })).with_flow(Arc::clone(&flow)));
    runtime.dispatch(Action::new(GET_USERS, json!({ "page": 2 })).with_flow(Arc::clone(&flow)));

    gate.wait_for(2).await;
    assert!(!runtime.middleware().flow_queue().is_blocked());
    assert!(gate.resolve_next(json!(1)));
    assert!(gate.resolve_next(json!(2)));
    runtime.settled().await;

    assert_eq!(count(&drain(&mut bus), RESOLVE_GET_USERS), 2);
}

#[tokio::test]
async fn break_condition_rejects_and_skips_later_stages() {
    let runtime = logging_runtime();
    let mut bus = runtime.subscribe();
    let later_runs = Arc::new(AtomicUsize::new(0));
    let later = {
        let later_runs = Arc::clone(&later_runs);
        ActionSpec::new(move |payload| {
            later_runs.fetch_add(1, Ordering::SeqCst);
            AsyncAction::new(
                "user/fetchRoles",
                payload,
                EffectConfig::new(|_| async { Ok(Value::Null) }, "rolesResolved", "rolesRejected"),
            )
        })
    };
    let flow = get_users(
        stages![
            responding("user/fetchUsers", json!([])),
            responding("user/fetchTeams", json!(["core"])).break_when(|responses, _, _, _| {
                responses
                    .last()
                    .and_then(|last| last.response.as_array())
                    .is_some_and(Vec::is_empty)
            }),
            later,
        ],
        FlowTake::First,
    );

    runtime.dispatch(Action::new(GET_USERS, json!({})).with_flow(flow));
    runtime.settled().await;

    let actions = drain(&mut bus);
    let rejected: Vec<&Action> = actions
        .iter()
        .filter(|action| action.action_type == REJECT_GET_USERS)
        .collect();
    assert_eq!(rejected.len(), 1);
    let error = rejected[0].error.as_ref().and_then(|e| e.as_flow()).unwrap();
    assert!(error.is_break_condition());
    assert_eq!(error.flow_type(), GET_USERS);
    assert_eq!(error.action_type(), Some("user/fetchTeams"));
    assert_eq!(count(&actions, "user/fetchTeamsResolved"), 1);
    assert_eq!(later_runs.load(Ordering::SeqCst), 0);
    assert_eq!(count(&actions, RESOLVE_GET_USERS), 0);
}

#[tokio::test]
async fn failing_stage_rejects_the_flow_with_the_effect_error() {
    let runtime = logging_runtime();
    let mut bus = runtime.subscribe();
    let failing = ActionSpec::new(|payload| {
        AsyncAction::new(
            "user/fetchUsers",
            payload,
            EffectConfig::new(
                |_| async { Err(anyhow::anyhow!("503 from upstream")) },
                "usersResolved",
                "usersRejected",
            ),
        )
    });
    let flow = get_users(stages![failing], FlowTake::First);

    runtime.dispatch(Action::new(GET_USERS, json!({})).with_flow(flow));
    runtime.settled().await;

    let actions = drain(&mut bus);
    assert_eq!(count(&actions, "usersRejected"), 1);
    let rejected = actions
        .iter()
        .find(|action| action.action_type == REJECT_GET_USERS)
        .unwrap();
    let error = rejected.error.as_ref().and_then(|e| e.as_flow()).unwrap();
    assert!(!error.is_break_condition());
    assert!(error.to_string().contains("503 from upstream"));
}
