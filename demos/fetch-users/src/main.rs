//! # Fetch Users Example
//!
//! Shows single operations on a tandem runtime: a search box that only keeps
//! the latest query, a refresh button that ignores repeat clicks, and a
//! cancel button.
//!
//! Run with `RUST_LOG=tandem_core=debug` to watch the registry decisions.

use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tandem_core::{Action, CancelConfig, EffectConfig, Runtime, RuntimeBuilder, TakeMode};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Fake backend
// ============================================================================

const USERS: [&str; 5] = ["ann", "anton", "bob", "bea", "carl"];

/// Slower for shorter queries, like a real search backend.
async fn search_users(payload: Value) -> Result<Value> {
    let query = payload["query"].as_str().unwrap_or_default().to_string();
    let delay = 200u64.saturating_sub(query.len() as u64 * 50);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    let hits: Vec<&str> = USERS
        .iter()
        .copied()
        .filter(|name| name.starts_with(&query))
        .collect();
    Ok(json!(hits))
}

async fn list_users(_payload: Value) -> Result<Value> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(json!(USERS))
}

// ============================================================================
// Actions
// ============================================================================

fn search(query: &str) -> Action {
    Action::new("user/search", json!({ "query": query })).with_async(
        EffectConfig::new(search_users, "user/searchResolved", "user/searchRejected")
            .with_take(TakeMode::Latest),
    )
}

fn refresh() -> Action {
    Action::new("user/refresh", Value::Null).with_async(EffectConfig::new(
        list_users,
        "user/refreshResolved",
        "user/refreshRejected",
    ))
}

fn cancel_refresh() -> Action {
    Action::new("user/cancelRefresh", Value::Null)
        .with_async(CancelConfig::new("user/refresh").notify("user/refreshCancelled"))
}

// ============================================================================
// Reducer
// ============================================================================

fn reducer(state: &Value, action: &Action) -> Value {
    let mut state = state.clone();
    match action.action_type.as_str() {
        "user/searchResolved" => state["hits"] = action.payload["response"].clone(),
        "user/refreshResolved" => state["users"] = action.payload["response"].clone(),
        "user/refreshCancelled" => state["users"] = json!("cancelled"),
        _ => {}
    }
    if let Some(log) = state["log"].as_array_mut() {
        log.push(json!(action.action_type));
    }
    state
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let runtime: Runtime = RuntimeBuilder::new(json!({ "hits": [], "users": [], "log": [] }))
        .with_reducer(reducer)
        .build()?;

    // Typing "a", "an", "ann": only the last query's result lands.
    for query in ["a", "an", "ann"] {
        runtime.dispatch(search(query));
    }
    runtime.settled().await;
    info!(hits = %runtime.state()["hits"], "search settled");

    // Double click: the second refresh is ignored while the first runs.
    runtime.dispatch(refresh());
    runtime.dispatch(refresh());
    runtime.settled().await;
    info!(users = %runtime.state()["users"], "refresh settled");

    // Refresh, then cancel before the backend answers.
    runtime.dispatch(refresh());
    runtime.dispatch(cancel_refresh());
    runtime.settled().await;
    info!(users = %runtime.state()["users"], "cancelled refresh settled");

    println!("{}", serde_json::to_string_pretty(&runtime.state()["log"])?);
    Ok(())
}
