//! Account dashboard: balances plus the main menu

use super::require_dashboard;
use crate::error::FlowError;
use crate::flow::{Branch, ComponentContext, ComponentId, InputComponent, MenuChoice, Message, ValidationResult};
use crate::ports::{InteractiveMessage, ListRow, ListSection};
use crate::state::Dashboard;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write;

/// Highest member tier
const MAX_TIER: u8 = 3;

pub struct AccountDashboard;

fn menu_title(choice: MenuChoice) -> &'static str {
    match choice {
        MenuChoice::MakeOffer => "Make secured offer",
        MenuChoice::AcceptOffer => "Accept offers",
        MenuChoice::DeclineOffer => "Decline offers",
        MenuChoice::CancelOffer => "Cancel my offers",
        MenuChoice::ViewLedger => "View ledger",
        MenuChoice::UpgradeTier => "Upgrade tier",
    }
}

/// Menu entries that make sense for this dashboard
fn available_choices(dashboard: &Dashboard) -> Vec<MenuChoice> {
    MenuChoice::ALL
        .into_iter()
        .filter(|choice| match choice {
            MenuChoice::AcceptOffer | MenuChoice::DeclineOffer => !dashboard.pending_in.is_empty(),
            MenuChoice::CancelOffer => !dashboard.pending_out.is_empty(),
            MenuChoice::UpgradeTier => dashboard.member.member_tier < MAX_TIER,
            MenuChoice::MakeOffer | MenuChoice::ViewLedger => true,
        })
        .collect()
}

fn dashboard_text(dashboard: &Dashboard) -> String {
    let mut text = format!(
        "Hi {}!\n\nAccount: {} ({})\n",
        dashboard.member.first_name, dashboard.account.account_name, dashboard.account.account_handle
    );
    if dashboard.balances.is_empty() {
        text.push_str("Balance: 0.00\n");
    }
    for balance in &dashboard.balances {
        let _ = writeln!(text, "Balance: {} {}", balance.amount, balance.denomination);
    }
    let _ = write!(
        text,
        "\nPending offers: {} in, {} out",
        dashboard.pending_in.len(),
        dashboard.pending_out.len()
    );
    text
}

#[async_trait]
impl InputComponent for AccountDashboard {
    const FIELD: &'static str = "selection";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let dashboard = require_dashboard(ctx, ComponentId::AccountDashboard).await?;
        let rows = available_choices(&dashboard)
            .into_iter()
            .map(|choice| ListRow::new(choice.id(), menu_title(choice)))
            .collect();

        ctx.send_interactive(InteractiveMessage::list(
            dashboard_text(&dashboard),
            "Options",
            vec![ListSection {
                title: "What would you like to do?".to_string(),
                rows,
            }],
        ))
        .await
    }

    async fn parse(
        &self,
        ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        let dashboard = require_dashboard(ctx, ComponentId::AccountDashboard).await?;
        let available = available_choices(&dashboard);
        let value = reply.reply_value().to_lowercase();

        // Rows can be picked by id or by their position in the menu
        let choice = MenuChoice::from_id(&value).or_else(|| {
            value
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| available.get(i).copied())
        });

        Ok(match choice {
            Some(choice) if available.contains(&choice) => ValidationResult::success(json!(choice.id())),
            Some(choice) => ValidationResult::failure(
                format!("\"{}\" isn't available right now.", menu_title(choice)),
                Self::FIELD,
            ),
            None => ValidationResult::failure("Please choose an option from the menu.", Self::FIELD),
        })
    }

    async fn accept(
        &self,
        _ctx: &ComponentContext,
        value: &Value,
    ) -> Result<Option<Branch>, FlowError> {
        Ok(value.as_str().and_then(MenuChoice::from_id).map(Branch::from))
    }
}
