//! Persisted conversation state types

use super::{StateError, StateResult};
use crate::flow::{Branch, ComponentId, FlowPath, Message, Step};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const FIELD_CHANNEL: &str = "channel";
pub const FIELD_DASHBOARD: &str = "dashboard";
pub const FIELD_AUTH: &str = "auth";
pub const FIELD_ACTION: &str = "action";
pub const FIELD_COMPONENT_DATA: &str = "component_data";
pub const FIELD_MOCK_TESTING: &str = "mock_testing";

/// Top-level fields a generic update may never change
pub const PROTECTED_FIELDS: [&str; 4] = [FIELD_CHANNEL, FIELD_DASHBOARD, FIELD_AUTH, FIELD_ACTION];

/// External identity of a conversation; the key all state is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub channel_type: String,
    pub identifier: String,
}

impl ChannelIdentity {
    pub fn new(channel_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            identifier: identifier.into(),
        }
    }

    pub fn whatsapp(identifier: impl Into<String>) -> Self {
        Self::new("whatsapp", identifier)
    }

    /// Store key for this identity
    pub fn state_key(&self) -> String {
        format!("channel:{}:{}", self.channel_type, self.identifier)
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_type, self.identifier)
    }
}

// ============================================================================
// Protected, API-written types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberProfile {
    pub member_id: String,
    pub first_name: String,
    pub last_name: String,
    pub member_handle: String,
    #[serde(default = "default_tier")]
    pub member_tier: u8,
}

fn default_tier() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub account_name: String,
    pub account_handle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub denomination: String,
    /// Decimal amount as text, e.g. `"12.50"`
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOffer {
    pub offer_id: String,
    pub counterparty: String,
    pub amount: String,
    pub denomination: String,
    #[serde(default)]
    pub secured: bool,
}

impl PendingOffer {
    pub fn formatted_amount(&self) -> String {
        format!("{} {}", self.amount, self.denomination)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub member: MemberProfile,
    pub account: AccountSummary,
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default)]
    pub pending_in: Vec<PendingOffer>,
    #[serde(default)]
    pub pending_out: Vec<PendingOffer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub token: String,
    pub member_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    OfferCreated,
    OfferAccepted,
    OfferDeclined,
    OfferCancelled,
    TierUpgraded,
}

/// Outcome of the last business operation performed for this member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

// ============================================================================
// Component-writable region
// ============================================================================

/// The only region of state components write to.
///
/// `data` is free-form working storage; every other field is typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentData {
    pub path: FlowPath,
    pub component: ComponentId,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub component_result: Option<Branch>,
    #[serde(default)]
    pub awaiting_input: bool,
    #[serde(default)]
    pub incoming_message: Option<Message>,
}

impl ComponentData {
    pub fn at(step: Step) -> Self {
        Self {
            path: step.path,
            component: step.component,
            data: Map::new(),
            component_result: None,
            awaiting_input: false,
            incoming_message: None,
        }
    }

    pub fn step(&self) -> Step {
        Step::new(self.path, self.component)
    }
}

/// Full persisted object for one channel identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default)]
    pub channel: Option<ChannelIdentity>,
    #[serde(default)]
    pub dashboard: Option<Dashboard>,
    #[serde(default)]
    pub auth: Option<AuthState>,
    #[serde(default)]
    pub action: Option<ActionRecord>,
    #[serde(default)]
    pub component_data: Option<ComponentData>,
    #[serde(default)]
    pub mock_testing: bool,
}

impl ConversationState {
    /// Parse a stored blob, reporting the first field that fails its type
    pub fn from_value(value: &Value) -> StateResult<Self> {
        let Some(object) = value.as_object() else {
            return Err(StateError::invalid("state", value, "expected an object"));
        };
        for (field, field_value) in object {
            validate_top_level(field, field_value)?;
        }
        serde_json::from_value(value.clone()).map_err(|e| StateError::invalid("state", value, e))
    }

    pub fn to_value(&self) -> Value {
        // Every field is a plain serde type; serialization cannot fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Field validation
// ============================================================================

pub(super) fn check<T: DeserializeOwned>(field: &str, value: &Value) -> StateResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| StateError::invalid(field, value, e))
}

/// Validate one top-level field against its declared type
pub(super) fn validate_top_level(field: &str, value: &Value) -> StateResult<()> {
    match field {
        FIELD_CHANNEL => check::<Option<ChannelIdentity>>(field, value).map(drop),
        FIELD_DASHBOARD => check::<Option<Dashboard>>(field, value).map(drop),
        FIELD_AUTH => check::<Option<AuthState>>(field, value).map(drop),
        FIELD_ACTION => check::<Option<ActionRecord>>(field, value).map(drop),
        FIELD_MOCK_TESTING => check::<bool>(field, value).map(drop),
        FIELD_COMPONENT_DATA => {
            if value.is_null() {
                return Ok(());
            }
            let Some(object) = value.as_object() else {
                return Err(StateError::invalid(field, value, "expected an object"));
            };
            for (sub, sub_value) in object {
                validate_component_field(sub, sub_value)?;
            }
            Ok(())
        }
        other => Err(StateError::UnknownField {
            field: other.to_string(),
        }),
    }
}

/// Validate one `component_data` field. `data` accepts any shape.
pub(super) fn validate_component_field(sub: &str, value: &Value) -> StateResult<()> {
    let field = format!("{FIELD_COMPONENT_DATA}.{sub}");
    match sub {
        "path" => check::<FlowPath>(&field, value).map(drop),
        "component" => check::<ComponentId>(&field, value).map(drop),
        "data" => Ok(()),
        "component_result" => check::<Option<Branch>>(&field, value).map(drop),
        "awaiting_input" => check::<bool>(&field, value).map(drop),
        "incoming_message" => check::<Option<Message>>(&field, value).map(drop),
        _ => Err(StateError::UnknownField { field }),
    }
}

/// Coerce a free-form `data` payload into a map without rejecting it
pub(super) fn data_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_component_data_serializes_names_as_strings() {
        let data = ComponentData::at(Step::ENTRY);
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["path"], "login");
        assert_eq!(value["component"], "Greeting");
        assert_eq!(value["component_result"], Value::Null);
        assert_eq!(value["awaiting_input"], false);
    }

    #[test]
    fn test_unknown_component_name_fails_validation() {
        let err = validate_component_field("component", &json!("NoSuchThing")).unwrap_err();
        assert_eq!(err.field(), Some("component_data.component"));
    }

    #[test]
    fn test_data_accepts_any_shape() {
        for value in [json!(null), json!(1), json!("x"), json!([1, 2]), json!({"a": {"b": []}})] {
            assert!(validate_component_field("data", &value).is_ok());
        }
        assert_eq!(data_map(json!(5)), json!({"value": 5}).as_object().unwrap().clone());
    }

    #[test]
    fn test_typed_fields_are_checked() {
        assert!(validate_component_field("awaiting_input", &json!("yes")).is_err());
        assert!(validate_top_level(FIELD_MOCK_TESTING, &json!(1)).is_err());
        assert!(validate_top_level("favourite_colour", &json!("red")).is_err());
    }

    #[test]
    fn test_from_value_reports_offending_field() {
        let err = ConversationState::from_value(&json!({
            "component_data": {"path": "login", "component": "Greeting", "awaiting_input": 3}
        }))
        .unwrap_err();
        assert_eq!(err.field(), Some("component_data.awaiting_input"));
    }

    #[test]
    fn test_state_key_format() {
        let id = ChannelIdentity::whatsapp("263771234567");
        assert_eq!(id.state_key(), "channel:whatsapp:263771234567");
    }
}
