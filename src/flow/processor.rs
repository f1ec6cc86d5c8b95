//! Flow processor: one call per inbound message
//!
//! Loads the channel's step, feeds the message to the waiting component or
//! bootstraps a new conversation, then activates components and follows the
//! flow table until a component waits for input or the path ends.

use super::component::{ComponentContext, ValidationResult};
use super::registry::ComponentRegistry;
use super::table::{next_step, Step, Transition};
use super::message::Command;
use super::{FlowConfigError, Message};
use crate::error::{ComponentError, ComponentErrorKind, FlowError};
use crate::ports::{BackendApi, MessagingPort, OutboundMessage};
use crate::state::{ChannelIdentity, StateManager, FIELD_MOCK_TESTING};
use crate::store::AtomicStore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const INVALID_ACTION_MESSAGE: &str =
    "Sorry, I didn't understand that. Send \"hi\" to get started.";

pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// How flow-table misconfiguration is handled at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorMode {
    /// Fail the request
    Strict,
    /// Log, stop the loop, and send nothing
    Lenient,
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub state_ttl: Duration,
    pub max_depth: usize,
    pub mode: ConfigErrorMode,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            state_ttl: DEFAULT_STATE_TTL,
            max_depth: DEFAULT_MAX_DEPTH,
            mode: ConfigErrorMode::Strict,
        }
    }
}

/// What one inbound message produced
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    /// Failure, error, or invalid-action text sent by the engine itself
    pub reply: Option<String>,
    /// Every message sent during the request, replies included
    pub outbound: Vec<OutboundMessage>,
    /// Step the conversation rests at
    #[serde(skip)]
    pub final_step: Option<Step>,
}

#[derive(Clone)]
pub struct FlowProcessor {
    store: AtomicStore,
    registry: Arc<ComponentRegistry>,
    messaging: Arc<dyn MessagingPort>,
    api: Option<Arc<dyn BackendApi>>,
    settings: FlowSettings,
}

impl FlowProcessor {
    pub fn new(
        store: AtomicStore,
        registry: Arc<ComponentRegistry>,
        messaging: Arc<dyn MessagingPort>,
        api: Option<Arc<dyn BackendApi>>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            store,
            registry,
            messaging,
            api,
            settings,
        }
    }

    pub fn state_for(&self, identity: ChannelIdentity) -> StateManager {
        StateManager::new(self.store.clone(), identity, self.settings.state_ttl)
    }

    /// Handle one inbound message.
    ///
    /// Every error is turned into a user-facing reply except a flow
    /// configuration error in strict mode, which is returned.
    pub async fn process(
        &self,
        identity: ChannelIdentity,
        message: Message,
        mock_testing: bool,
    ) -> Result<ProcessOutcome, FlowError> {
        let state = self.state_for(identity.clone());
        let persisted_mock = state
            .get_state_value(FIELD_MOCK_TESTING, Value::Bool(false))
            .await
            .as_bool()
            .unwrap_or(false);
        let ctx = ComponentContext::new(
            state,
            self.messaging.clone(),
            self.api.clone(),
            mock_testing || persisted_mock,
        );

        let reply = match self.run(&ctx, &message).await {
            Ok(reply) => reply,
            Err(FlowError::Configuration(e)) => match self.settings.mode {
                ConfigErrorMode::Strict => {
                    tracing::error!(channel = %identity, error = %e, "Flow configuration error");
                    return Err(e.into());
                }
                ConfigErrorMode::Lenient => {
                    tracing::error!(channel = %identity, error = %e, "Flow configuration error, stopping without reply");
                    None
                }
            },
            Err(e) => {
                match &e {
                    FlowError::System(_) => {
                        tracing::warn!(channel = %identity, error = %e, "Collaborator failure")
                    }
                    _ => tracing::error!(channel = %identity, error = %e, "Component error"),
                }
                Some(e.user_message().to_string())
            }
        };

        if let Some(text) = &reply {
            if let Err(e) = ctx.send_text(text.clone()).await {
                tracing::warn!(channel = %identity, error = %e, "Failed to deliver reply");
            }
        }

        let final_step = match ctx.state().component_data().await {
            Ok(cd) => cd.map(|cd| cd.step()),
            Err(e) => {
                tracing::warn!(channel = %identity, error = %e, "Could not read final step");
                None
            }
        };

        Ok(ProcessOutcome {
            reply,
            outbound: ctx.take_outbox(),
            final_step,
        })
    }

    async fn run(
        &self,
        ctx: &ComponentContext,
        message: &Message,
    ) -> Result<Option<String>, FlowError> {
        let state = ctx.state();

        if let Some(command) = Command::parse(message) {
            tracing::info!(channel = %state.identity(), ?command, "Starting conversation");
            state.clear_all_state().await?;
            state.initialize_channel(ctx.mock_testing()).await?;
            state
                .update_flow_state(Step::ENTRY, Map::new(), None, false)
                .await?;
            return self.drive(ctx).await;
        }

        let Some(current) = state.component_data().await? else {
            tracing::debug!(channel = %state.identity(), "No conversation and no greeting");
            return Ok(Some(INVALID_ACTION_MESSAGE.to_string()));
        };

        if current.awaiting_input {
            state.set_incoming_message(Some(message.clone())).await?;
        } else if next_step(current.step(), current.component_result) == Ok(Transition::Terminal) {
            // The last flow ended; nothing is waiting for this message
            return Ok(Some(INVALID_ACTION_MESSAGE.to_string()));
        }

        self.drive(ctx).await
    }

    async fn drive(&self, ctx: &ComponentContext) -> Result<Option<String>, FlowError> {
        let state = ctx.state();
        let mut step = Step::ENTRY;

        for _ in 0..self.settings.max_depth {
            let current = require_component_data(state).await?;
            step = current.step();

            let result = self.registry.activate(ctx, step.component).await?;
            if let ValidationResult::Failure(failure) = result {
                return Ok(Some(failure.message));
            }

            let current = require_component_data(state).await?;
            if current.awaiting_input {
                return Ok(None);
            }

            match next_step(step, current.component_result)? {
                Transition::Terminal => {
                    // Keep the step and its result so a later message is
                    // recognised as arriving after the path ended
                    state
                        .update_flow_state(step, Map::new(), current.component_result, false)
                        .await?;
                    tracing::info!(channel = %state.identity(), %step, "Path finished");
                    return Ok(None);
                }
                Transition::Next(next) if next == step => return Ok(None),
                Transition::Next(next) => {
                    // Working data follows the conversation within a path only
                    let data = if next.path == step.path {
                        current.data
                    } else {
                        Map::new()
                    };
                    state.update_flow_state(next, data, None, false).await?;
                    tracing::info!(channel = %state.identity(), from = %step, to = %next, "Flow transition");
                }
            }
        }

        Err(FlowConfigError::DepthExceeded {
            step,
            depth: self.settings.max_depth,
        }
        .into())
    }
}

async fn require_component_data(
    state: &StateManager,
) -> Result<crate::state::ComponentData, FlowError> {
    state.component_data().await?.ok_or_else(|| {
        ComponentError::new(ComponentErrorKind::InvalidState, "no active component").into()
    })
}
