//! Engine error taxonomy
//!
//! Expected validation outcomes are not errors; they travel as
//! [`ValidationResult::Failure`](crate::flow::ValidationResult). Everything
//! here is caught at the flow processor boundary and turned into one
//! user-facing message.

use crate::flow::{ComponentId, FlowConfigError};
use crate::ports::{ApiError, ApiErrorKind, MessagingError, MessagingErrorKind};
use crate::state::StateError;
use crate::store::StoreError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const GENERIC_ERROR_MESSAGE: &str =
    "Something went wrong on our side. Please send \"menu\" to start again.";
pub const TRY_AGAIN_MESSAGE: &str =
    "We couldn't complete that right now. Please try again in a moment.";
pub const RATE_LIMIT_MESSAGE: &str =
    "You're going a little fast! Please wait a minute and then try again.";

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error(transparent)]
    System(#[from] SystemError),
    #[error(transparent)]
    Configuration(#[from] FlowConfigError),
}

impl FlowError {
    /// Text sent to the user when this error ends a request
    pub fn user_message(&self) -> &'static str {
        match self {
            FlowError::System(e) if e.kind == SystemErrorKind::RateLimit => RATE_LIMIT_MESSAGE,
            FlowError::System(_) => TRY_AGAIN_MESSAGE,
            FlowError::Component(_) | FlowError::Configuration(_) => GENERIC_ERROR_MESSAGE,
        }
    }
}

/// Structural or programmer error
#[derive(Debug, Error)]
pub struct ComponentError {
    pub kind: ComponentErrorKind,
    pub component: Option<ComponentId>,
    pub message: String,
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.component {
            Some(component) => write!(f, "{:?} in {}: {}", self.kind, component, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl ComponentError {
    pub fn new(kind: ComponentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            component: None,
            message: message.into(),
        }
    }

    pub fn in_component(mut self, component: ComponentId) -> Self {
        self.component = Some(component);
        self
    }

    pub fn unknown_component(name: impl fmt::Display) -> Self {
        Self::new(
            ComponentErrorKind::UnknownComponent,
            format!("unknown component '{name}'"),
        )
    }

    pub fn missing_collaborator(component: ComponentId, collaborator: &str) -> Self {
        Self::new(
            ComponentErrorKind::MissingCollaborator,
            format!("{collaborator} is not configured"),
        )
        .in_component(component)
    }

    pub fn invalid_state(component: ComponentId, message: impl Into<String>) -> Self {
        Self::new(ComponentErrorKind::InvalidState, message).in_component(component)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentErrorKind {
    UnknownComponent,
    MissingCollaborator,
    /// State write rejected by the schema
    Schema,
    /// State is missing something the component requires
    InvalidState,
}

/// Collaborator failure
#[derive(Debug, Error)]
#[error("{kind:?} failure: {message}")]
pub struct SystemError {
    pub kind: SystemErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl SystemError {
    pub fn new(kind: SystemErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemErrorKind {
    Store,
    Api,
    Messaging,
    RateLimit,
}

impl From<StoreError> for FlowError {
    fn from(e: StoreError) -> Self {
        FlowError::System(SystemError::new(SystemErrorKind::Store, e.to_string()))
    }
}

impl From<StateError> for FlowError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Store(store) => store.into(),
            schema => FlowError::Component(ComponentError::new(
                ComponentErrorKind::Schema,
                schema.to_string(),
            )),
        }
    }
}

impl From<ApiError> for FlowError {
    fn from(e: ApiError) -> Self {
        let kind = match e.kind {
            ApiErrorKind::RateLimit => SystemErrorKind::RateLimit,
            _ => SystemErrorKind::Api,
        };
        FlowError::System(SystemError {
            kind,
            message: e.message,
            retry_after: e.retry_after,
        })
    }
}

impl From<MessagingError> for FlowError {
    fn from(e: MessagingError) -> Self {
        let kind = match e.kind {
            MessagingErrorKind::RateLimit => SystemErrorKind::RateLimit,
            _ => SystemErrorKind::Messaging,
        };
        FlowError::System(SystemError {
            kind,
            message: e.message,
            retry_after: e.retry_after,
        })
    }
}
