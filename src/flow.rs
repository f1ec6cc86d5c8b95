//! Conversation flow engine
//!
//! - `table`: pure routing between steps
//! - `component`: the unit of behaviour and its activation protocol
//! - `registry`: name-to-factory map and activation
//! - `processor`: the per-message request loop

mod component;
mod message;
mod processor;
mod registry;
mod table;

pub use component::{
    verified_data, Api, ApiComponent, ComponentContext, Display, DisplayComponent, Input,
    InputComponent, ValidationResult,
};
pub use message::Message;
pub use processor::{
    ConfigErrorMode, FlowProcessor, FlowSettings, ProcessOutcome, DEFAULT_MAX_DEPTH,
    DEFAULT_STATE_TTL,
};
pub use registry::ComponentRegistry;
pub use table::{
    Branch, ComponentId, Confirmation, FlowConfigError, FlowPath, LedgerNav, LoginOutcome,
    MenuChoice, Step,
};
