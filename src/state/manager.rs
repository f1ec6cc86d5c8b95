//! Schema-enforcing accessor over the atomic store

use super::schema::{
    data_map, validate_component_field, validate_top_level, ChannelIdentity, ComponentData,
    ConversationState, FIELD_COMPONENT_DATA, PROTECTED_FIELDS,
};
use super::{StateError, StateResult};
use crate::flow::{Branch, ComponentId, FlowPath, Message, Step};
use crate::store::AtomicStore;
use serde_json::{Map, Value};
use std::time::Duration;

/// State access for one channel identity.
///
/// Cheap to clone; every operation is a single atomic read or
/// read-modify-write against the store, so nothing is cached here.
#[derive(Clone)]
pub struct StateManager {
    store: AtomicStore,
    identity: ChannelIdentity,
    key: String,
    ttl: Duration,
}

impl StateManager {
    pub fn new(store: AtomicStore, identity: ChannelIdentity, ttl: Duration) -> Self {
        let key = identity.state_key();
        Self {
            store,
            identity,
            key,
            ttl,
        }
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.identity
    }

    // ==================== Reads ====================

    /// Load and validate the full state; `None` if absent or expired
    pub async fn load(&self) -> StateResult<Option<ConversationState>> {
        match self.store.get(&self.key).await? {
            Some(value) => ConversationState::from_value(&value).map(Some),
            None => Ok(None),
        }
    }

    /// Read one top-level field. Never fails: internal errors are logged and
    /// the default returned.
    pub async fn get_state_value(&self, key: &str, default: Value) -> Value {
        match self.store.get(&self.key).await {
            Ok(Some(state)) => state
                .get(key)
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or(default),
            Ok(None) => default,
            Err(e) => {
                tracing::warn!(channel = %self.identity, field = key, error = %e, "State read failed, using default");
                default
            }
        }
    }

    pub async fn component_data(&self) -> StateResult<Option<ComponentData>> {
        Ok(self.load().await?.and_then(|s| s.component_data))
    }

    pub async fn is_awaiting_input(&self) -> StateResult<bool> {
        Ok(self
            .component_data()
            .await?
            .is_some_and(|cd| cd.awaiting_input))
    }

    pub async fn get_path(&self) -> StateResult<Option<FlowPath>> {
        Ok(self.component_data().await?.map(|cd| cd.path))
    }

    #[cfg(test)]
    pub async fn get_component(&self) -> StateResult<Option<ComponentId>> {
        Ok(self.component_data().await?.map(|cd| cd.component))
    }

    #[cfg(test)]
    pub async fn get_component_result(&self) -> StateResult<Option<Branch>> {
        Ok(self.component_data().await?.and_then(|cd| cd.component_result))
    }

    pub async fn incoming_message(&self) -> StateResult<Option<Message>> {
        Ok(self.component_data().await?.and_then(|cd| cd.incoming_message))
    }

    /// Component working data, empty if there is no active component
    pub async fn data(&self) -> StateResult<Map<String, Value>> {
        Ok(self
            .component_data()
            .await?
            .map(|cd| cd.data)
            .unwrap_or_default())
    }

    pub async fn mock_testing(&self) -> StateResult<bool> {
        Ok(self.load().await?.is_some_and(|s| s.mock_testing))
    }

    // ==================== Writes ====================

    /// Set the channel identity. The only way `channel` is ever written.
    pub async fn initialize_channel(&self, mock_testing: bool) -> StateResult<()> {
        let identity = self.identity.clone();
        self.modify(move |state| {
            state.channel = Some(identity.clone());
            state.mock_testing = mock_testing;
            Ok(())
        })
        .await
    }

    /// Merge `updates` into the state.
    ///
    /// Fails without writing if a protected field would change, if a typed
    /// field does not match its type, or if `component_data.path` /
    /// `component_data.component` would change.
    pub async fn update_state(&self, updates: Map<String, Value>) -> StateResult<()> {
        self.store
            .update(&self.key, self.ttl, |current| {
                let mut state = match current {
                    Some(Value::Object(map)) => map,
                    Some(Value::Null) | None => Map::new(),
                    Some(other) => {
                        return Err(StateError::invalid("state", &other, "expected an object"))
                    }
                };
                apply_updates(&mut state, &updates)?;
                let merged = Value::Object(state);
                ConversationState::from_value(&merged)?;
                Ok(merged)
            })
            .await
            .inspect_err(|e| {
                if let Some(field) = e.field() {
                    tracing::warn!(
                        channel = %self.identity,
                        field,
                        error = %e,
                        "State update rejected"
                    );
                }
            })?;

        tracing::debug!(channel = %self.identity, fields = ?updates.keys().collect::<Vec<_>>(), "State updated");
        Ok(())
    }

    /// Replace the whole `component_data` object. The flow engine's
    /// transition primitive and the only way path/component change.
    pub async fn update_flow_state(
        &self,
        step: Step,
        data: Map<String, Value>,
        component_result: Option<Branch>,
        awaiting_input: bool,
    ) -> StateResult<()> {
        self.modify(move |state| {
            state.component_data = Some(ComponentData {
                path: step.path,
                component: step.component,
                data: data.clone(),
                component_result,
                awaiting_input,
                incoming_message: None,
            });
            Ok(())
        })
        .await?;

        tracing::debug!(channel = %self.identity, %step, awaiting_input, "Flow state written");
        Ok(())
    }

    /// Merge into `component_data.data`, leaving the flow fields alone
    pub async fn update_component_data(&self, data: Map<String, Value>) -> StateResult<()> {
        self.modify_component_data(move |cd| {
            cd.data.extend(data.clone());
            Ok(())
        })
        .await
    }

    #[cfg(test)]
    pub async fn set_component_result(&self, result: Option<Branch>) -> StateResult<()> {
        self.modify_component_data(move |cd| {
            cd.component_result = result;
            Ok(())
        })
        .await
    }

    pub async fn set_awaiting_input(&self, awaiting: bool) -> StateResult<()> {
        self.modify_component_data(move |cd| {
            cd.awaiting_input = awaiting;
            Ok(())
        })
        .await
    }

    pub async fn set_incoming_message(&self, message: Option<Message>) -> StateResult<()> {
        self.modify_component_data(move |cd| {
            cd.incoming_message = message.clone();
            Ok(())
        })
        .await
    }

    /// Drop working data, result, and flags; keep the current step
    pub async fn clear_component_data(&self) -> StateResult<()> {
        self.modify_component_data(|cd| {
            cd.data.clear();
            cd.component_result = None;
            cd.awaiting_input = false;
            cd.incoming_message = None;
            Ok(())
        })
        .await
    }

    /// Drop everything but the channel identity and `mock_testing`
    pub async fn clear_all_state(&self) -> StateResult<()> {
        self.modify(|state| {
            *state = ConversationState {
                channel: state.channel.take(),
                mock_testing: state.mock_testing,
                ..ConversationState::default()
            };
            Ok(())
        })
        .await?;

        tracing::info!(channel = %self.identity, "Conversation state cleared");
        Ok(())
    }

    // ==================== Internals ====================

    /// Typed read-modify-write. Also used by the API-response recorders,
    /// which are the only writers of protected fields besides
    /// `initialize_channel`.
    pub(super) async fn modify<F>(&self, mut f: F) -> StateResult<()>
    where
        F: FnMut(&mut ConversationState) -> StateResult<()> + Send,
    {
        self.store
            .update(&self.key, self.ttl, |current| {
                let mut state = match current {
                    Some(value) => ConversationState::from_value(&value)?,
                    None => ConversationState::default(),
                };
                f(&mut state)?;
                Ok::<_, StateError>(state.to_value())
            })
            .await
            .map(drop)
    }

    async fn modify_component_data<F>(&self, mut f: F) -> StateResult<()>
    where
        F: FnMut(&mut ComponentData) -> StateResult<()> + Send,
    {
        self.modify(|state| match state.component_data.as_mut() {
            Some(cd) => f(cd),
            None => Err(StateError::invalid(
                FIELD_COMPONENT_DATA,
                &Value::Null,
                "no active component",
            )),
        })
        .await
    }
}

fn apply_updates(state: &mut Map<String, Value>, updates: &Map<String, Value>) -> StateResult<()> {
    for (field, value) in updates {
        validate_top_level(field, value)?;

        if PROTECTED_FIELDS.contains(&field.as_str()) {
            let existing = state.get(field).unwrap_or(&Value::Null);
            if existing != value {
                return Err(StateError::ProtectedField {
                    field: field.clone(),
                });
            }
            continue;
        }

        if field == FIELD_COMPONENT_DATA {
            merge_component_data(state, value)?;
        } else {
            state.insert(field.clone(), value.clone());
        }
    }
    Ok(())
}

fn merge_component_data(state: &mut Map<String, Value>, updates: &Value) -> StateResult<()> {
    let Some(updates) = updates.as_object() else {
        return Err(StateError::invalid(
            FIELD_COMPONENT_DATA,
            updates,
            "use clear_component_data to reset component data",
        ));
    };
    let Some(Value::Object(current)) = state.get_mut(FIELD_COMPONENT_DATA) else {
        return Err(StateError::invalid(
            FIELD_COMPONENT_DATA,
            &Value::Null,
            "no active component",
        ));
    };

    for (sub, value) in updates {
        validate_component_field(sub, value)?;
        match sub.as_str() {
            "path" | "component" => {
                if current.get(sub) != Some(value) {
                    return Err(StateError::ProtectedField {
                        field: format!("{FIELD_COMPONENT_DATA}.{sub}"),
                    });
                }
            }
            "data" => {
                let entry = current
                    .entry("data")
                    .or_insert_with(|| Value::Object(Map::new()));
                let mut merged = data_map(entry.take());
                merged.extend(data_map(value.clone()));
                *entry = Value::Object(merged);
            }
            _ => {
                current.insert(sub.clone(), value.clone());
            }
        }
    }
    Ok(())
}
