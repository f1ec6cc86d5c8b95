//! Ledger path: fetch a page of entries, show it, page on request

use super::{require_auth, require_dashboard};
use crate::error::{ComponentError, FlowError};
use crate::flow::{
    ApiComponent, Branch, ComponentContext, ComponentId, InputComponent, LedgerNav, Message, Step,
    ValidationResult,
};
use crate::ports::{BackendApi, InteractiveMessage, LedgerEntry, ReplyButton};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::fmt::Write;

pub const PAGE_SIZE: u32 = 5;

const MORE_ID: &str = "more";
const DONE_ID: &str = "done";

fn current_page(data: &Map<String, Value>) -> u32 {
    data.get("page")
        .and_then(Value::as_u64)
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or(0)
}

pub struct GetLedgerApiCall;

#[async_trait]
impl ApiComponent for GetLedgerApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        let auth = require_auth(ctx, ComponentId::GetLedgerApiCall).await?;
        let dashboard = require_dashboard(ctx, ComponentId::GetLedgerApiCall).await?;
        let page = current_page(&ctx.state().data().await?);

        match api
            .get_ledger(
                &auth,
                &dashboard.account.account_id,
                page.saturating_mul(PAGE_SIZE),
                PAGE_SIZE,
            )
            .await
        {
            Ok(ledger) => Ok(ValidationResult::success(json!({
                "page": page,
                "entries": ledger.entries,
                "has_more": ledger.has_more,
            }))),
            Err(e) => ValidationResult::from_api_error(e, "ledger"),
        }
    }

    fn retry_step(&self) -> Option<Step> {
        Some(Step::DASHBOARD)
    }
}

fn ledger_text(entries: &[LedgerEntry], page: u32) -> String {
    if entries.is_empty() {
        return "No transactions yet.".to_string();
    }
    let mut text = format!("Ledger, page {}:\n", page + 1);
    for entry in entries {
        let _ = writeln!(
            text,
            "{} {} {} ({})",
            entry.timestamp.format("%Y-%m-%d"),
            entry.amount,
            entry.denomination,
            entry.counterparty
        );
    }
    text
}

pub struct LedgerDisplay;

#[async_trait]
impl InputComponent for LedgerDisplay {
    const FIELD: &'static str = "ledger_nav";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let data = ctx.state().data().await?;
        let entries: Vec<LedgerEntry> = data
            .get("entries")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                ComponentError::invalid_state(
                    ComponentId::LedgerDisplay,
                    format!("unreadable ledger entries: {e}"),
                )
            })?
            .unwrap_or_default();
        let has_more = data.get("has_more").and_then(Value::as_bool).unwrap_or(false);

        let mut buttons = Vec::new();
        if has_more {
            buttons.push(ReplyButton::new(MORE_ID, "More"));
        }
        buttons.push(ReplyButton::new(DONE_ID, "Done"));

        ctx.send_interactive(InteractiveMessage::buttons(
            ledger_text(&entries, current_page(&data)),
            buttons,
        ))
        .await
    }

    async fn parse(
        &self,
        ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        let wants_more = matches!(reply.reply_value().to_lowercase().as_str(), MORE_ID | "next");
        if !wants_more {
            return Ok(ValidationResult::success(json!(DONE_ID)));
        }

        let has_more = ctx
            .state()
            .data()
            .await?
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(if has_more {
            ValidationResult::success(json!(MORE_ID))
        } else {
            ValidationResult::failure("That's the last page. Reply \"done\" to go back.", Self::FIELD)
        })
    }

    async fn accept(
        &self,
        ctx: &ComponentContext,
        value: &Value,
    ) -> Result<Option<Branch>, FlowError> {
        if value.as_str() != Some(MORE_ID) {
            return Ok(Some(LedgerNav::Done.into()));
        }
        let page = current_page(&ctx.state().data().await?);
        let mut next = Map::new();
        next.insert("page".to_string(), json!(page + 1));
        ctx.state().update_component_data(next).await?;
        Ok(Some(LedgerNav::NextPage.into()))
    }
}
