//! Login path: greet, then look the member up by phone number

use crate::error::FlowError;
use crate::flow::{
    ApiComponent, Branch, ComponentContext, DisplayComponent, LoginOutcome, ValidationResult,
};
use crate::ports::{BackendApi, LoginResponse};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct Greeting;

#[async_trait]
impl DisplayComponent for Greeting {
    async fn render(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        ctx.send_text("Welcome to Credex! Give me a moment while I find your account.")
            .await
    }
}

pub struct LoginApiCall;

#[async_trait]
impl ApiComponent for LoginApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        match api.login(ctx.recipient()).await {
            Ok(LoginResponse::Member(session)) => {
                ctx.state().record_login(&session).await?;
                Ok(ValidationResult::success(json!({
                    "registered": true,
                    "member_id": session.auth.member_id,
                })))
            }
            Ok(LoginResponse::NotMember) => {
                tracing::info!(channel = %ctx.state().identity(), "No member for phone number");
                Ok(ValidationResult::success(json!({ "registered": false })))
            }
            Err(e) => ValidationResult::from_api_error(e, "phone"),
        }
    }

    fn branch(&self, value: &Value) -> Option<Branch> {
        let outcome = if value["registered"].as_bool() == Some(true) {
            LoginOutcome::LoggedIn
        } else {
            LoginOutcome::NotMember
        };
        Some(outcome.into())
    }
}
