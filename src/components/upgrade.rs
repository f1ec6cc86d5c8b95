//! Tier upgrade path

use super::{
    ask_confirmation, confirmation_branch, confirmation_result, record_action, require_auth,
    require_dashboard,
};
use crate::error::FlowError;
use crate::flow::{
    ApiComponent, Branch, ComponentContext, ComponentId, FlowPath, InputComponent, Message, Step,
    ValidationResult,
};
use crate::ports::BackendApi;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ConfirmUpgrade;

#[async_trait]
impl InputComponent for ConfirmUpgrade {
    const FIELD: &'static str = "confirmed";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let dashboard = require_dashboard(ctx, ComponentId::ConfirmUpgrade).await?;
        let next = dashboard.member.member_tier.saturating_add(1);
        ask_confirmation(
            ctx,
            format!("Upgrade your membership to tier {next}? Fees are charged from your balance."),
        )
        .await
    }

    async fn parse(
        &self,
        _ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        Ok(confirmation_result(reply))
    }

    async fn accept(
        &self,
        ctx: &ComponentContext,
        value: &Value,
    ) -> Result<Option<Branch>, FlowError> {
        confirmation_branch(ctx, value, "Upgrade cancelled.").await
    }
}

pub struct UpgradeTierApiCall;

#[async_trait]
impl ApiComponent for UpgradeTierApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        let auth = require_auth(ctx, ComponentId::UpgradeTierApiCall).await?;
        let dashboard = require_dashboard(ctx, ComponentId::UpgradeTierApiCall).await?;
        let tier = dashboard.member.member_tier.saturating_add(1);

        match api.upgrade_tier(&auth, tier).await {
            Ok(response) => {
                record_action(ctx, response).await?;
                ctx.send_text(format!("You're now on tier {tier}.")).await?;
                Ok(ValidationResult::success(json!({ "tier": tier })))
            }
            Err(e) => ValidationResult::from_api_error(e, "tier"),
        }
    }

    fn retry_step(&self) -> Option<Step> {
        Some(Step::new(FlowPath::UpgradeTier, ComponentId::ConfirmUpgrade))
    }
}
