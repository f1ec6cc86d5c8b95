//! Component contract and its three specialisations
//!
//! A component is one step of a path. The engine only ever sees
//! [`Component`]; concrete behaviour is written against [`DisplayComponent`],
//! [`InputComponent`], or [`ApiComponent`] and wrapped in [`Display`],
//! [`Input`], or [`Api`], which own the shared activation protocol.

use super::{Branch, ComponentId, Message, Step};
use crate::error::{ComponentError, FlowError};
use crate::ports::{
    ApiError, ApiErrorKind, BackendApi, InteractiveMessage, MessagingPort, OutboundMessage,
};
use crate::state::{StateManager, FIELD_COMPONENT_DATA};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// Validation results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    /// Shown to the user as-is
    pub message: String,
    pub field: String,
    pub details: Option<Value>,
}

/// Outcome of activating a component. Expected rejections are `Failure`,
/// never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Success {
        value: Value,
        metadata: Option<Map<String, Value>>,
    },
    Failure(ValidationFailure),
}

impl ValidationResult {
    pub fn success(value: Value) -> Self {
        ValidationResult::Success {
            value,
            metadata: None,
        }
    }

    /// Prompt sent; the component is waiting for a reply
    pub fn pending() -> Self {
        let mut metadata = Map::new();
        metadata.insert("awaiting_input".to_string(), Value::Bool(true));
        ValidationResult::Success {
            value: Value::Null,
            metadata: Some(metadata),
        }
    }

    pub fn failure(message: impl Into<String>, field: impl Into<String>) -> Self {
        ValidationResult::Failure(ValidationFailure {
            message: message.into(),
            field: field.into(),
            details: None,
        })
    }

    pub fn failure_with_details(
        message: impl Into<String>,
        field: impl Into<String>,
        details: Value,
    ) -> Self {
        ValidationResult::Failure(ValidationFailure {
            message: message.into(),
            field: field.into(),
            details: Some(details),
        })
    }

    /// Turn a backend rejection the user can act on into a `Failure`;
    /// everything else stays an error
    pub fn from_api_error(err: ApiError, field: &str) -> Result<Self, FlowError> {
        match err.kind {
            ApiErrorKind::Business => {
                let field = err.field.unwrap_or_else(|| field.to_string());
                Ok(Self::failure(err.message, field))
            }
            _ => {
                tracing::debug!(
                    kind = ?err.kind,
                    retryable = err.kind.is_retryable(),
                    error = %err,
                    "Backend call failed"
                );
                Err(err.into())
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ValidationResult::Success { .. })
    }
}

/// Per-instance validation diagnostics. Never persisted, never consulted
/// for control flow.
#[derive(Debug, Clone, Default)]
pub struct ValidationTracker {
    pub attempts: u32,
    pub last_attempt: Option<String>,
    pub last_error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ValidationTracker {
    pub fn record(&mut self, attempt: Option<&str>, result: &ValidationResult) {
        self.attempts += 1;
        self.last_attempt = attempt.map(str::to_string);
        self.last_error = match result {
            ValidationResult::Failure(f) => Some(f.message.clone()),
            ValidationResult::Success { .. } => None,
        };
        self.timestamp = Some(Utc::now());
    }
}

// ============================================================================
// Context
// ============================================================================

/// Collaborators for one request, shared by every component it activates.
///
/// Every outbound message is recorded in the outbox. In mock-testing mode
/// the messaging port is skipped and the outbox is the only record.
pub struct ComponentContext {
    state: StateManager,
    messaging: Arc<dyn MessagingPort>,
    api: Option<Arc<dyn BackendApi>>,
    mock_testing: bool,
    outbox: Mutex<Vec<OutboundMessage>>,
}

impl ComponentContext {
    pub fn new(
        state: StateManager,
        messaging: Arc<dyn MessagingPort>,
        api: Option<Arc<dyn BackendApi>>,
        mock_testing: bool,
    ) -> Self {
        Self {
            state,
            messaging,
            api,
            mock_testing,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn recipient(&self) -> &str {
        &self.state.identity().identifier
    }

    pub fn mock_testing(&self) -> bool {
        self.mock_testing
    }

    /// Backend port, or a missing-collaborator error naming `component`
    pub fn api(&self, component: ComponentId) -> Result<&dyn BackendApi, FlowError> {
        self.api
            .as_deref()
            .ok_or_else(|| ComponentError::missing_collaborator(component, "backend API").into())
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), FlowError> {
        let body = text.into();
        if !self.mock_testing {
            self.messaging.send_text(self.recipient(), &body).await?;
        }
        self.record(OutboundMessage::Text {
            to: self.recipient().to_string(),
            body,
        });
        Ok(())
    }

    pub async fn send_interactive(&self, message: InteractiveMessage) -> Result<(), FlowError> {
        if !self.mock_testing {
            self.messaging
                .send_interactive(self.recipient(), &message)
                .await?;
        }
        self.record(OutboundMessage::Interactive {
            to: self.recipient().to_string(),
            message,
        });
        Ok(())
    }

    fn record(&self, message: OutboundMessage) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    #[cfg(test)]
    pub fn sent_count(&self) -> usize {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn take_outbox(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.outbox.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// ============================================================================
// Contract
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Display,
    Input,
    Api,
}

#[async_trait]
pub trait Component: Send {
    fn id(&self) -> ComponentId;

    fn kind(&self) -> ComponentKind;

    /// Run the component.
    ///
    /// With `None` the component acts on current state: send its prompt,
    /// process a pending reply, or make its API call. With `Some` it
    /// validates that input directly.
    async fn validate(
        &mut self,
        ctx: &ComponentContext,
        input: Option<&Message>,
    ) -> Result<ValidationResult, FlowError>;

    /// Shape a successful value for `component_data.data`
    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        verified_data(value)
    }

    fn tracker(&self) -> &ValidationTracker;
}

/// Default normalisation: objects as-is, anything else under `"value"`
pub fn verified_data(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    }
}

/// Pure presentation: send something and move on
#[async_trait]
pub trait DisplayComponent: Send + Sync {
    async fn render(&self, ctx: &ComponentContext) -> Result<(), FlowError>;
}

/// Ask for one piece of input and validate the reply
#[async_trait]
pub trait InputComponent: Send + Sync {
    /// Key the accepted value is stored under in component data
    const FIELD: &'static str;

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError>;

    async fn parse(
        &self,
        ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError>;

    /// Side effects for an accepted value; returns the branch to record
    async fn accept(
        &self,
        _ctx: &ComponentContext,
        _value: &Value,
    ) -> Result<Option<Branch>, FlowError> {
        Ok(None)
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(Self::FIELD.to_string(), value.clone());
        map
    }
}

/// Exactly one backend call, translated into a result
#[async_trait]
pub trait ApiComponent: Send + Sync {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError>;

    /// Branch to record for a successful value
    fn branch(&self, _value: &Value) -> Option<Branch> {
        None
    }

    /// Input step to wait at after the backend rejects the request, so the
    /// user's next reply corrects the value instead of being dropped. `None`
    /// leaves the conversation on this step.
    fn retry_step(&self) -> Option<Step> {
        None
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        verified_data(value)
    }
}

fn component_update(fields: Value) -> Map<String, Value> {
    let mut updates = Map::new();
    updates.insert(FIELD_COMPONENT_DATA.to_string(), fields);
    updates
}

// ============================================================================
// Wrappers
// ============================================================================

pub struct Display<C> {
    id: ComponentId,
    inner: C,
    tracker: ValidationTracker,
}

impl<C: DisplayComponent> Display<C> {
    pub fn new(id: ComponentId, inner: C) -> Self {
        Self {
            id,
            inner,
            tracker: ValidationTracker::default(),
        }
    }
}

#[async_trait]
impl<C: DisplayComponent> Component for Display<C> {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Display
    }

    async fn validate(
        &mut self,
        ctx: &ComponentContext,
        _input: Option<&Message>,
    ) -> Result<ValidationResult, FlowError> {
        self.inner.render(ctx).await?;
        let result = ValidationResult::success(Value::Null);
        self.tracker.record(None, &result);
        Ok(result)
    }

    fn tracker(&self) -> &ValidationTracker {
        &self.tracker
    }
}

pub struct Input<C> {
    id: ComponentId,
    inner: C,
    tracker: ValidationTracker,
}

impl<C: InputComponent> Input<C> {
    pub fn new(id: ComponentId, inner: C) -> Self {
        Self {
            id,
            inner,
            tracker: ValidationTracker::default(),
        }
    }

    async fn process_reply(
        &mut self,
        ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        let result = self.inner.parse(ctx, reply).await?;
        self.tracker.record(Some(reply.reply_value()), &result);

        match &result {
            ValidationResult::Success { value, .. } => {
                let branch = self.inner.accept(ctx, value).await?;
                let mut fields = json!({
                    "data": Value::Object(self.inner.to_verified_data(value)),
                    "awaiting_input": false,
                    "incoming_message": null,
                });
                if let Some(branch) = branch {
                    fields["component_result"] = json!(branch);
                }
                ctx.state().update_state(component_update(fields)).await?;
                tracing::debug!(component = %self.id, ?branch, "Input accepted");
            }
            ValidationResult::Failure(failure) => {
                // Stay on this step, waiting for a corrected reply
                ctx.state().set_incoming_message(None).await?;
                tracing::debug!(
                    component = %self.id,
                    field = %failure.field,
                    details = ?failure.details,
                    attempts = self.tracker.attempts,
                    "Input rejected"
                );
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl<C: InputComponent> Component for Input<C> {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Input
    }

    async fn validate(
        &mut self,
        ctx: &ComponentContext,
        input: Option<&Message>,
    ) -> Result<ValidationResult, FlowError> {
        if let Some(reply) = input {
            return self.process_reply(ctx, reply).await;
        }

        let current = ctx.state().component_data().await?;
        let awaiting = current.as_ref().is_some_and(|cd| cd.awaiting_input);
        let pending = current.and_then(|cd| cd.incoming_message);

        match (awaiting, pending) {
            (false, _) => {
                self.inner.prompt(ctx).await?;
                ctx.state().set_awaiting_input(true).await?;
                Ok(ValidationResult::pending())
            }
            // Prompt already sent and nothing new to read
            (true, None) => Ok(ValidationResult::pending()),
            (true, Some(reply)) => self.process_reply(ctx, &reply).await,
        }
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        self.inner.to_verified_data(value)
    }

    fn tracker(&self) -> &ValidationTracker {
        &self.tracker
    }
}

pub struct Api<C> {
    id: ComponentId,
    inner: C,
    tracker: ValidationTracker,
}

impl<C: ApiComponent> Api<C> {
    pub fn new(id: ComponentId, inner: C) -> Self {
        Self {
            id,
            inner,
            tracker: ValidationTracker::default(),
        }
    }
}

#[async_trait]
impl<C: ApiComponent> Component for Api<C> {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Api
    }

    async fn validate(
        &mut self,
        ctx: &ComponentContext,
        _input: Option<&Message>,
    ) -> Result<ValidationResult, FlowError> {
        let api = ctx.api(self.id)?;
        let result = self.inner.call(ctx, api).await?;
        self.tracker.record(None, &result);

        match &result {
            ValidationResult::Success { value, .. } => {
                let mut fields =
                    json!({ "data": Value::Object(self.inner.to_verified_data(value)) });
                if let Some(branch) = self.inner.branch(value) {
                    fields["component_result"] = json!(branch);
                }
                ctx.state().update_state(component_update(fields)).await?;
            }
            ValidationResult::Failure(failure) => {
                if let Some(retry) = self.inner.retry_step() {
                    let data = match ctx.state().component_data().await? {
                        Some(cd) if cd.path == retry.path => cd.data,
                        _ => Map::new(),
                    };
                    // The failure message stands in for the retry step's prompt
                    ctx.state().update_flow_state(retry, data, None, true).await?;
                    tracing::debug!(
                        component = %self.id,
                        field = %failure.field,
                        %retry,
                        "Backend rejected request, waiting for corrected input"
                    );
                }
            }
        }
        Ok(result)
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        self.inner.to_verified_data(value)
    }

    fn tracker(&self) -> &ValidationTracker {
        &self.tracker
    }
}
