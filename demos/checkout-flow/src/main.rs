//! # Checkout Flow Example
//!
//! Shows a staged flow: reserve stock, then charge the card and send the
//! receipt side by side. Orders are placed with `every:serial`, so an order
//! placed while another is being checked out waits its turn instead of being
//! dropped. When nothing was reserved, a break condition on the charge stops
//! the flow before a confirmation goes out.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tandem_core::{
    stages, Action, ActionSpec, AsyncAction, EffectConfig, FlowConfig, FlowTake, RuntimeBuilder,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ============================================================================
// Domain
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    order_id: Uuid,
    items: Vec<String>,
    card: String,
}

fn order_from(payload: &Value) -> Result<Order> {
    Ok(serde_json::from_value(payload.clone())?)
}

// ============================================================================
// Effects
// ============================================================================

async fn reserve_stock(payload: Value) -> Result<Value> {
    let order = order_from(&payload)?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(json!({ "reserved": order.items }))
}

async fn charge_card(payload: Value) -> Result<Value> {
    let order = order_from(&payload)?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    if order.card == "declined" {
        bail!("card declined for order {}", order.order_id);
    }
    Ok(json!({ "charged": order.items.len() * 10 }))
}

async fn send_receipt(payload: Value) -> Result<Value> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(json!({ "sent_to": payload["params"]["email"] }))
}

// ============================================================================
// Flow
// ============================================================================

fn operation<F, Fut>(action_type: &'static str, effect: F) -> ActionSpec
where
    F: Fn(Value) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    ActionSpec::new(move |payload| {
        AsyncAction::new(
            action_type,
            payload,
            EffectConfig::new(
                effect.clone(),
                format!("{action_type}Resolved"),
                format!("{action_type}Rejected"),
            ),
        )
    })
}

fn checkout() -> FlowConfig {
    let charge = operation("order/chargeCard", charge_card).break_when(|responses, _, _, _| {
        responses
            .first()
            .and_then(|reserve| reserve.response["reserved"].as_array())
            .is_some_and(Vec::is_empty)
    });
    let receipt = operation("order/sendReceipt", send_receipt)
        .prepare(|ctx, _, _| json!({ "email": ctx.get_state()["email"] }));

    FlowConfig::new("order/checkedOut", "order/checkoutFailed")
        .with_stages(stages![
            operation("order/reserveStock", reserve_stock),
            [charge, receipt]
        ])
        .with_take(FlowTake::EverySerial)
}

fn place_order(items: &[&str], card: &str) -> Result<Action> {
    let order = Order {
        order_id: Uuid::new_v4(),
        items: items.iter().map(|item| item.to_string()).collect(),
        card: card.to_string(),
    };
    Ok(Action::new("order/place", serde_json::to_value(order)?).with_flow(checkout()))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = RuntimeBuilder::new(json!({ "email": "ann@example.com" })).build()?;
    let mut bus = runtime.subscribe();

    runtime.dispatch(place_order(&["lamp", "desk"], "4242")?);
    runtime.dispatch(place_order(&["chair"], "declined")?);
    runtime.dispatch(place_order(&[], "4242")?);
    runtime.settled().await;

    while let Ok(action) = bus.try_recv() {
        match (&action.responses, &action.error) {
            (Some(responses), _) => {
                info!(action_type = %action.action_type, responses = ?responses, "order checked out");
            }
            (_, Some(error)) => {
                warn!(action_type = %action.action_type, error = %error, "checkout failed");
            }
            _ => {
                info!(action_type = %action.action_type, "action");
            }
        }
    }

    Ok(())
}
