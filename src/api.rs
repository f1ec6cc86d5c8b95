//! HTTP API: the channel webhook and a health check

mod handlers;
mod types;

pub use handlers::create_router;

use crate::flow::FlowProcessor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: FlowProcessor,
    /// Token the provider echoes during webhook verification
    pub verify_token: Option<String>,
    pub allow_mock_testing: bool,
}

impl AppState {
    pub fn new(
        processor: FlowProcessor,
        verify_token: Option<String>,
        allow_mock_testing: bool,
    ) -> Self {
        Self {
            processor,
            verify_token,
            allow_mock_testing,
        }
    }
}
