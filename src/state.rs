//! Conversation state: schema, manager, and API-response recorders
//!
//! Components and the flow engine only ever touch state through
//! [`StateManager`]. Protected fields (`channel`, `dashboard`, `auth`,
//! `action`) are written by `initialize_channel` and the recorders in this
//! module, never by a generic update.

mod manager;
mod recorder;
mod schema;

pub use manager::StateManager;
pub use schema::*;

use crate::store::StoreError;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Protected field '{field}' cannot be changed through a generic update")]
    ProtectedField { field: String },
    #[error("Invalid value for '{field}': {value} ({reason})")]
    InvalidField {
        field: String,
        value: Value,
        reason: String,
    },
    #[error("Unknown state field '{field}'")]
    UnknownField { field: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StateError {
    pub(crate) fn invalid(field: impl Into<String>, value: &Value, reason: impl ToString) -> Self {
        StateError::InvalidField {
            field: field.into(),
            value: value.clone(),
            reason: reason.to_string(),
        }
    }

    /// Name of the offending field, if the error is a schema violation
    pub fn field(&self) -> Option<&str> {
        match self {
            StateError::ProtectedField { field }
            | StateError::InvalidField { field, .. }
            | StateError::UnknownField { field } => Some(field),
            StateError::Store(_) => None,
        }
    }
}

pub type StateResult<T> = Result<T, StateError>;
