//! Built-in conversation components
//!
//! One file per path. Helpers shared across paths live here: state lookups
//! that a component cannot run without, and the yes/no confirmation used by
//! every confirm step.

mod account;
mod ledger;
mod login;
mod offer;
mod offer_action;
mod onboard;
mod upgrade;

use crate::error::{ComponentError, FlowError};
use crate::flow::{
    Api, Branch, ComponentContext, ComponentId, ComponentRegistry, Confirmation, Display, Input,
    Message, ValidationResult,
};
use crate::ports::{ActionResponse, InteractiveMessage, ReplyButton};
use crate::state::{AuthState, Dashboard};
use serde_json::{Map, Value};

use account::AccountDashboard;
use ledger::{GetLedgerApiCall, LedgerDisplay};
use login::{Greeting, LoginApiCall};
use offer::{AmountInput, ConfirmInput, CreateOfferApiCall, HandleInput, ValidateHandleApiCall};
use offer_action::{ConfirmOfferAction, OfferAction, OfferActionApiCall, SelectOffer};
use onboard::{NameInput, OnboardMemberApiCall, OnboardWelcome};
use upgrade::{ConfirmUpgrade, UpgradeTierApiCall};

/// Register every built-in component
pub fn register_all(registry: &mut ComponentRegistry) {
    use ComponentId as C;

    // Login
    registry.register(C::Greeting, || Box::new(Display::new(C::Greeting, Greeting)));
    registry.register(C::LoginApiCall, || {
        Box::new(Api::new(C::LoginApiCall, LoginApiCall))
    });

    // Onboarding
    registry.register(C::OnboardWelcome, || {
        Box::new(Display::new(C::OnboardWelcome, OnboardWelcome))
    });
    registry.register(C::FirstNameInput, || {
        Box::new(Input::new(C::FirstNameInput, NameInput::First))
    });
    registry.register(C::LastNameInput, || {
        Box::new(Input::new(C::LastNameInput, NameInput::Last))
    });
    registry.register(C::OnboardMemberApiCall, || {
        Box::new(Api::new(C::OnboardMemberApiCall, OnboardMemberApiCall))
    });

    // Dashboard
    registry.register(C::AccountDashboard, || {
        Box::new(Input::new(C::AccountDashboard, AccountDashboard))
    });

    // Secured offer
    registry.register(C::AmountInput, || Box::new(Input::new(C::AmountInput, AmountInput)));
    registry.register(C::HandleInput, || Box::new(Input::new(C::HandleInput, HandleInput)));
    registry.register(C::ValidateHandleApiCall, || {
        Box::new(Api::new(C::ValidateHandleApiCall, ValidateHandleApiCall))
    });
    registry.register(C::ConfirmInput, || {
        Box::new(Input::new(C::ConfirmInput, ConfirmInput))
    });
    registry.register(C::CreateOfferApiCall, || {
        Box::new(Api::new(C::CreateOfferApiCall, CreateOfferApiCall))
    });

    // Accept / decline / cancel
    registry.register(C::SelectIncomingOffer, || {
        Box::new(Input::new(C::SelectIncomingOffer, SelectOffer::Incoming))
    });
    registry.register(C::SelectOutgoingOffer, || {
        Box::new(Input::new(C::SelectOutgoingOffer, SelectOffer::Outgoing))
    });
    registry.register(C::ConfirmAccept, || {
        Box::new(Input::new(C::ConfirmAccept, ConfirmOfferAction(OfferAction::Accept)))
    });
    registry.register(C::ConfirmDecline, || {
        Box::new(Input::new(C::ConfirmDecline, ConfirmOfferAction(OfferAction::Decline)))
    });
    registry.register(C::ConfirmCancel, || {
        Box::new(Input::new(C::ConfirmCancel, ConfirmOfferAction(OfferAction::Cancel)))
    });
    registry.register(C::AcceptOfferApiCall, || {
        Box::new(Api::new(C::AcceptOfferApiCall, OfferActionApiCall(OfferAction::Accept)))
    });
    registry.register(C::DeclineOfferApiCall, || {
        Box::new(Api::new(C::DeclineOfferApiCall, OfferActionApiCall(OfferAction::Decline)))
    });
    registry.register(C::CancelOfferApiCall, || {
        Box::new(Api::new(C::CancelOfferApiCall, OfferActionApiCall(OfferAction::Cancel)))
    });

    // Ledger
    registry.register(C::GetLedgerApiCall, || {
        Box::new(Api::new(C::GetLedgerApiCall, GetLedgerApiCall))
    });
    registry.register(C::LedgerDisplay, || {
        Box::new(Input::new(C::LedgerDisplay, LedgerDisplay))
    });

    // Tier upgrade
    registry.register(C::ConfirmUpgrade, || {
        Box::new(Input::new(C::ConfirmUpgrade, ConfirmUpgrade))
    });
    registry.register(C::UpgradeTierApiCall, || {
        Box::new(Api::new(C::UpgradeTierApiCall, UpgradeTierApiCall))
    });
}

// ============================================================================
// Shared helpers
// ============================================================================

async fn require_auth(ctx: &ComponentContext, component: ComponentId) -> Result<AuthState, FlowError> {
    ctx.state()
        .auth()
        .await?
        .ok_or_else(|| ComponentError::invalid_state(component, "member is not logged in").into())
}

async fn require_dashboard(
    ctx: &ComponentContext,
    component: ComponentId,
) -> Result<Dashboard, FlowError> {
    ctx.state()
        .dashboard()
        .await?
        .ok_or_else(|| ComponentError::invalid_state(component, "no dashboard loaded").into())
}

/// A string an earlier step of the path saved to component data
fn data_str(data: &Map<String, Value>, key: &str, component: ComponentId) -> Result<String, FlowError> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ComponentError::invalid_state(component, format!("'{key}' missing from component data"))
                .into()
        })
}

const CONFIRM_ID: &str = "confirm";
const CANCEL_ID: &str = "cancel";

/// Yes/no reply, accepting button ids and the usual typed answers
fn parse_confirmation(reply: &Message) -> Option<bool> {
    match reply.reply_value().to_lowercase().as_str() {
        CONFIRM_ID | "yes" | "y" | "1" | "ok" => Some(true),
        CANCEL_ID | "no" | "n" | "2" => Some(false),
        _ => None,
    }
}

fn confirmation_result(reply: &Message) -> ValidationResult {
    match parse_confirmation(reply) {
        Some(confirmed) => ValidationResult::success(Value::Bool(confirmed)),
        None => ValidationResult::failure("Please reply yes or no", "confirmed"),
    }
}

async fn ask_confirmation(ctx: &ComponentContext, body: String) -> Result<(), FlowError> {
    ctx.send_interactive(InteractiveMessage::buttons(
        body,
        vec![
            ReplyButton::new(CONFIRM_ID, "Yes"),
            ReplyButton::new(CANCEL_ID, "No"),
        ],
    ))
    .await
}

/// Branch for an accepted confirmation; a "no" also tells the user
async fn confirmation_branch(
    ctx: &ComponentContext,
    value: &Value,
    cancelled_text: &str,
) -> Result<Option<Branch>, FlowError> {
    if value.as_bool() == Some(true) {
        Ok(Some(Confirmation::Confirmed.into()))
    } else {
        ctx.send_text(format!("{cancelled_text} Send \"menu\" to return to your dashboard."))
            .await?;
        Ok(Some(Confirmation::Cancelled.into()))
    }
}

/// Persist an action response and return the action id
async fn record_action(ctx: &ComponentContext, response: ActionResponse) -> Result<String, FlowError> {
    let id = response.action.id.clone();
    ctx.state()
        .record_action(response.action, response.dashboard)
        .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_words() {
        for yes in ["yes", "Y", "confirm", "1", " OK "] {
            assert_eq!(parse_confirmation(&Message::text(yes)), Some(true), "{yes}");
        }
        for no in ["no", "N", "2"] {
            assert_eq!(parse_confirmation(&Message::text(no)), Some(false), "{no}");
        }
        assert_eq!(parse_confirmation(&Message::button("cancel", "No")), Some(false));
        assert_eq!(parse_confirmation(&Message::text("maybe")), None);
    }

    #[test]
    fn test_every_component_is_registered() {
        let mut registry = ComponentRegistry::new(std::time::Duration::from_secs(1));
        register_all(&mut registry);
        for id in ComponentId::ALL {
            assert!(registry.contains(id), "{id} not registered");
            assert_eq!(registry.create(id).unwrap().id(), id);
        }
    }
}
