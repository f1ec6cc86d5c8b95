//! Collaborator ports the flow engine depends on
//!
//! Components reach the outside world only through these traits, so tests
//! swap in the recording mocks from `crate::testing`.

mod backend;
mod http_backend;
mod messaging;

pub use backend::*;
pub use http_backend::HttpBackendApi;
pub use messaging::*;
