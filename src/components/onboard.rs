//! Onboarding path: collect a name and register the member

use super::data_str;
use super::offer::DEFAULT_DENOMINATION;
use crate::error::FlowError;
use crate::flow::{
    ApiComponent, ComponentContext, ComponentId, DisplayComponent, FlowPath, InputComponent,
    Message, Step, ValidationResult,
};
use crate::ports::{BackendApi, OnboardRequest};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct OnboardWelcome;

#[async_trait]
impl DisplayComponent for OnboardWelcome {
    async fn render(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        ctx.send_text(
            "Looks like you're new here. Let's open your Credex account, it only takes a minute.",
        )
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub enum NameInput {
    First,
    Last,
}

impl NameInput {
    fn field(self) -> &'static str {
        match self {
            NameInput::First => "first_name",
            NameInput::Last => "last_name",
        }
    }
}

/// 3 to 50 characters of letters, spaces, hyphens, or apostrophes
fn valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (3..=50).contains(&len)
        && name.chars().any(char::is_alphabetic)
        && name
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'')
}

#[async_trait]
impl InputComponent for NameInput {
    const FIELD: &'static str = "name";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let question = match self {
            NameInput::First => "What is your first name?",
            NameInput::Last => "And your last name?",
        };
        ctx.send_text(question).await
    }

    async fn parse(
        &self,
        _ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        let name = reply.reply_value();
        Ok(if valid_name(name) {
            ValidationResult::success(json!(name))
        } else {
            ValidationResult::failure(
                "Names must be 3 to 50 letters long. Please try again.",
                self.field(),
            )
        })
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(self.field().to_string(), value.clone());
        map
    }
}

pub struct OnboardMemberApiCall;

#[async_trait]
impl ApiComponent for OnboardMemberApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        let data = ctx.state().data().await?;
        let request = OnboardRequest {
            first_name: data_str(&data, "first_name", ComponentId::OnboardMemberApiCall)?,
            last_name: data_str(&data, "last_name", ComponentId::OnboardMemberApiCall)?,
            phone: ctx.recipient().to_string(),
            default_denom: DEFAULT_DENOMINATION.to_string(),
        };

        match api.onboard_member(&request).await {
            Ok(session) => {
                ctx.state().record_login(&session).await?;
                ctx.send_text(format!(
                    "Welcome aboard, {}! Your account is ready.",
                    request.first_name
                ))
                .await?;
                Ok(ValidationResult::success(
                    json!({ "member_id": session.auth.member_id }),
                ))
            }
            Err(e) => ValidationResult::from_api_error(e, "member"),
        }
    }

    fn retry_step(&self) -> Option<Step> {
        Some(Step::new(FlowPath::Onboard, ComponentId::FirstNameInput))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        assert!(valid_name("Tendai"));
        assert!(valid_name("Mary-Jane O'Neil"));
        assert!(!valid_name("Al"));
        assert!(!valid_name("R2D2"));
        assert!(!valid_name("---"));
        assert!(!valid_name(&"a".repeat(51)));
    }
}
