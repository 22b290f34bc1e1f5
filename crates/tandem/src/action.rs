//! Messages flowing through the dispatch path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::effect_impl::AsyncConfig;
use crate::error::ActionError;
use crate::flow::FlowConfig;

/// Payload key that makes entry routing forward an action untouched.
pub const IGNORE_EFFECT: &str = "ignoreEffect";

/// A discrete, typed message.
///
/// Plain actions carry only a type and a payload. Actions that should start
/// work carry a [`Meta`]; outcome actions produced by the engines carry an
/// `error` (reject) or `responses` (flow resolve).
#[derive(Debug, Clone)]
pub struct Action {
    pub action_type: String,
    pub payload: Value,
    pub error: Option<ActionError>,
    pub responses: Option<Vec<FlowResponse>>,
    pub meta: Option<Meta>,
}

impl Action {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            error: None,
            responses: None,
            meta: None,
        }
    }

    /// Attach an operation configuration.
    pub fn with_async(mut self, config: impl Into<AsyncConfig>) -> Self {
        self.meta.get_or_insert_with(Meta::default).async_op = Some(config.into());
        self
    }

    /// Attach a flow configuration.
    pub fn with_flow(mut self, config: impl Into<Arc<FlowConfig>>) -> Self {
        self.meta.get_or_insert_with(Meta::default).flow = Some(config.into());
        self
    }

    /// A reject action.
    pub fn rejected(action_type: impl Into<String>, error: impl Into<ActionError>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(action_type, Value::Null)
        }
    }

    /// A flow resolve action.
    pub fn resolved_flow(action_type: impl Into<String>, responses: Vec<FlowResponse>) -> Self {
        Self {
            responses: Some(responses),
            ..Self::new(action_type, Value::Null)
        }
    }

    /// True when the payload carries [`IGNORE_EFFECT`], whatever its value.
    pub fn ignores_effect(&self) -> bool {
        self.payload
            .as_object()
            .is_some_and(|payload| payload.contains_key(IGNORE_EFFECT))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn async_config(&self) -> Option<&AsyncConfig> {
        self.meta.as_ref().and_then(|meta| meta.async_op.as_ref())
    }

    pub fn flow_config(&self) -> Option<&Arc<FlowConfig>> {
        self.meta.as_ref().and_then(|meta| meta.flow.as_ref())
    }
}

/// Engine configuration attached to an action. Both halves may be present.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub async_op: Option<AsyncConfig>,
    pub flow: Option<Arc<FlowConfig>>,
}

/// One settled operation inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResponse {
    #[serde(rename = "type")]
    pub action_type: String,
    pub response: Value,
}

impl FlowResponse {
    pub fn new(action_type: impl Into<String>, response: Value) -> Self {
        Self {
            action_type: action_type.into(),
            response,
        }
    }
}

/// `{...payload, key: value, ...}`.
///
/// A `null` payload starts from an empty object; a payload that is not an
/// object is kept under the `payload` key.
pub(crate) fn extend_payload<'a>(
    payload: &Value,
    fields: impl IntoIterator<Item = (&'a str, Value)>,
) -> Value {
    let mut object = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };

    for (key, value) in fields {
        object.insert(key.to_string(), value);
    }

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extend_payload_spreads_objects() {
        let merged = extend_payload(&json!({ "id": 1 }), [("type", json!("fetchItems"))]);
        assert_eq!(merged, json!({ "id": 1, "type": "fetchItems" }));
    }

    #[test]
    fn extend_payload_overrides_existing_keys() {
        let merged = extend_payload(&json!({ "type": "old" }), [("type", json!("new"))]);
        assert_eq!(merged, json!({ "type": "new" }));
    }

    #[test]
    fn extend_payload_wraps_scalars() {
        assert_eq!(extend_payload(&Value::Null, [("a", json!(1))]), json!({ "a": 1 }));
        assert_eq!(
            extend_payload(&json!("raw"), [("a", json!(1))]),
            json!({ "payload": "raw", "a": 1 })
        );
    }

    #[test]
    fn ignore_effect_is_detected_by_presence() {
        assert!(Action::new("x", json!({ IGNORE_EFFECT: false })).ignores_effect());
        assert!(!Action::new("x", json!({ "id": 1 })).ignores_effect());
        assert!(!Action::new("x", Value::Null).ignores_effect());
    }

    #[test]
    fn flow_response_serialises_with_type_key() {
        let response = FlowResponse::new("user/fetchUsers", json!([1, 2]));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "type": "user/fetchUsers", "response": [1, 2] })
        );
    }
}
