//! Secured offer path: amount, recipient, confirmation, create

use super::{
    ask_confirmation, confirmation_branch, confirmation_result, data_str, record_action,
    require_auth, require_dashboard,
};
use crate::error::FlowError;
use crate::flow::{
    verified_data, ApiComponent, Branch, ComponentContext, ComponentId, FlowPath, InputComponent,
    Message, Step, ValidationResult,
};
use crate::ports::{BackendApi, OfferRequest};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

pub const DEFAULT_DENOMINATION: &str = "USD";
pub const DENOMINATIONS: [&str; 5] = ["USD", "ZWG", "XAU", "CAD", "CXX"];

static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<pre>[A-Z]{3})\s*|(?P<dollar>\$)\s*)?(?P<num>\d+(?:\.\d{1,2})?)(?:\s*(?P<post>[A-Z]{3}))?$")
        .unwrap_or_else(|e| unreachable!("static amount pattern: {e}"))
});

static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_.]{3,30}$").unwrap_or_else(|e| unreachable!("static handle pattern: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    /// Two-decimal text, e.g. `"10.50"`
    pub value: String,
    pub denomination: String,
}

/// Normalise `"10.5"` to `"10.50"` and `"007"` to `"7.00"`
fn normalize_decimal(num: &str) -> String {
    let (whole, fraction) = num.split_once('.').unwrap_or((num, ""));
    let whole = whole.trim_start_matches('0');
    let whole = if whole.is_empty() { "0" } else { whole };
    format!("{whole}.{fraction:0<2}")
}

/// Parse `"100"`, `"USD 10.5"`, `"$5"`, or `"50 CXX"`
pub fn parse_amount(input: &str) -> Result<Amount, &'static str> {
    let upper = input.trim().to_uppercase();
    let caps = AMOUNT_RE.captures(&upper).ok_or("Invalid amount format")?;

    let denomination = match (caps.name("pre"), caps.name("dollar"), caps.name("post")) {
        (None, None, None) => DEFAULT_DENOMINATION.to_string(),
        (Some(code), None, None) | (None, None, Some(code)) => code.as_str().to_string(),
        (None, Some(_), None) => "USD".to_string(),
        _ => return Err("Invalid amount format"),
    };
    if !DENOMINATIONS.contains(&denomination.as_str()) {
        return Err("Unsupported denomination");
    }

    let value = normalize_decimal(&caps["num"]);
    if value.chars().all(|c| c == '0' || c == '.') {
        return Err("Amount must be greater than zero");
    }
    Ok(Amount {
        value,
        denomination,
    })
}

pub struct AmountInput;

#[async_trait]
impl InputComponent for AmountInput {
    const FIELD: &'static str = "amount";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        ctx.send_text("How much would you like to offer? For example: 100, USD 10.5, or $5")
            .await
    }

    async fn parse(
        &self,
        _ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        Ok(match parse_amount(reply.reply_value()) {
            Ok(amount) => ValidationResult::success(json!({
                "amount": amount.value,
                "denomination": amount.denomination,
            })),
            Err(message) => ValidationResult::failure_with_details(
                message,
                Self::FIELD,
                json!({ "denominations": DENOMINATIONS }),
            ),
        })
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        verified_data(value)
    }
}

pub struct HandleInput;

#[async_trait]
impl InputComponent for HandleInput {
    const FIELD: &'static str = "handle";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        ctx.send_text("Who is the offer for? Enter their account handle.")
            .await
    }

    async fn parse(
        &self,
        ctx: &ComponentContext,
        reply: &Message,
    ) -> Result<ValidationResult, FlowError> {
        let handle = reply.reply_value().trim_start_matches('@').to_lowercase();
        if !HANDLE_RE.is_match(&handle) {
            return Ok(ValidationResult::failure(
                "Handles are 3 to 30 letters, digits, dots, or underscores.",
                Self::FIELD,
            ));
        }

        let dashboard = require_dashboard(ctx, ComponentId::HandleInput).await?;
        if dashboard.account.account_handle == handle {
            return Ok(ValidationResult::failure(
                "You can't make an offer to your own account.",
                Self::FIELD,
            ));
        }
        Ok(ValidationResult::success(json!(handle)))
    }
}

pub struct ValidateHandleApiCall;

#[async_trait]
impl ApiComponent for ValidateHandleApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        let auth = require_auth(ctx, ComponentId::ValidateHandleApiCall).await?;
        let data = ctx.state().data().await?;
        let handle = data_str(&data, "handle", ComponentId::ValidateHandleApiCall)?;

        match api.validate_handle(&auth, &handle).await {
            Ok(account) => Ok(ValidationResult::success(json!({
                "receiver_account_id": account.account_id,
                "receiver_name": account.account_name,
            }))),
            Err(e) => ValidationResult::from_api_error(e, "handle"),
        }
    }

    fn retry_step(&self) -> Option<Step> {
        Some(Step::new(FlowPath::OfferSecured, ComponentId::HandleInput))
    }
}

pub struct ConfirmInput;

#[async_trait]
impl InputComponent for ConfirmInput {
    const FIELD: &'static str = "confirmed";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let data = ctx.state().data().await?;
        let amount = data_str(&data, "amount", ComponentId::ConfirmInput)?;
        let denomination = data_str(&data, "denomination", ComponentId::ConfirmInput)?;
        let receiver = data_str(&data, "receiver_name", ComponentId::ConfirmInput)?;

        ask_confirmation(
            ctx,
            format!("Offer {amount} {denomination} secured credex to {receiver}?"),
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
        confirmation_branch(ctx, value, "Offer cancelled.").await
    }
}

pub struct CreateOfferApiCall;

#[async_trait]
impl ApiComponent for CreateOfferApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        const ID: ComponentId = ComponentId::CreateOfferApiCall;
        let auth = require_auth(ctx, ID).await?;
        let dashboard = require_dashboard(ctx, ID).await?;
        let data = ctx.state().data().await?;

        let request = OfferRequest {
            issuer_account_id: dashboard.account.account_id,
            receiver_account_id: data_str(&data, "receiver_account_id", ID)?,
            amount: data_str(&data, "amount", ID)?,
            denomination: data_str(&data, "denomination", ID)?,
            secured: true,
        };

        match api.create_offer(&auth, &request).await {
            Ok(response) => {
                let offer_id = record_action(ctx, response).await?;
                ctx.send_text(format!(
                    "Offer of {} {} sent.",
                    request.amount, request.denomination
                ))
                .await?;
                Ok(ValidationResult::success(json!({ "offer_id": offer_id })))
            }
            Err(e) => ValidationResult::from_api_error(e, "amount"),
        }
    }

    fn retry_step(&self) -> Option<Step> {
        Some(Step::new(FlowPath::OfferSecured, ComponentId::AmountInput))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(input: &str) -> (String, String) {
        let amount = parse_amount(input).unwrap();
        (amount.value, amount.denomination)
    }

    #[test]
    fn test_amount_formats() {
        assert_eq!(ok("100"), ("100.00".into(), "USD".into()));
        assert_eq!(ok("USD 10.5"), ("10.50".into(), "USD".into()));
        assert_eq!(ok("$5"), ("5.00".into(), "USD".into()));
        assert_eq!(ok("50 cxx"), ("50.00".into(), "CXX".into()));
        assert_eq!(ok("zwg12.25"), ("12.25".into(), "ZWG".into()));
        assert_eq!(ok("007"), ("7.00".into(), "USD".into()));
    }

    #[test]
    fn test_rejected_amounts() {
        assert_eq!(parse_amount("abc"), Err("Invalid amount format"));
        assert_eq!(parse_amount(""), Err("Invalid amount format"));
        assert_eq!(parse_amount("10.555"), Err("Invalid amount format"));
        assert_eq!(parse_amount("USD 5 USD"), Err("Invalid amount format"));
        assert_eq!(parse_amount("-5"), Err("Invalid amount format"));
        assert_eq!(parse_amount("EUR 5"), Err("Unsupported denomination"));
        assert_eq!(parse_amount("0.00"), Err("Amount must be greater than zero"));
    }

    #[tokio::test]
    async fn test_rejected_amount_lists_denominations() {
        let harness = crate::testing::Harness::new();
        let ctx = harness.context(false);

        let result = AmountInput.parse(&ctx, &Message::text("EUR 5")).await.unwrap();

        let ValidationResult::Failure(failure) = result else {
            panic!("expected a failure, got {result:?}");
        };
        assert_eq!(failure.message, "Unsupported denomination");
        assert_eq!(failure.field, "amount");
        assert_eq!(failure.details, Some(json!({ "denominations": DENOMINATIONS })));
    }

    #[test]
    fn test_handle_pattern() {
        assert!(HANDLE_RE.is_match("bob_1"));
        assert!(!HANDLE_RE.is_match("b"));
        assert!(!HANDLE_RE.is_match("bob smith"));
    }
}
