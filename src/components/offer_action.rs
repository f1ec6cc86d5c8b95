//! Accept, decline, and cancel paths. One set of components serves all
//! three, parameterised by the action.

use super::{
    ask_confirmation, confirmation_branch, confirmation_result, data_str, record_action,
    require_auth, require_dashboard,
};
use crate::error::{ComponentError, FlowError};
use crate::flow::{
    verified_data, ApiComponent, Branch, ComponentContext, ComponentId, FlowPath, InputComponent,
    Message, Step, ValidationResult,
};
use crate::ports::{BackendApi, InteractiveMessage, ListRow, ListSection};
use crate::state::PendingOffer;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    Accept,
    Decline,
    Cancel,
}

impl OfferAction {
    fn verb(self) -> &'static str {
        match self {
            OfferAction::Accept => "accept",
            OfferAction::Decline => "decline",
            OfferAction::Cancel => "cancel",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            OfferAction::Accept => "accepted",
            OfferAction::Decline => "declined",
            OfferAction::Cancel => "cancelled",
        }
    }

    fn from_path(path: FlowPath) -> Option<Self> {
        match path {
            FlowPath::AcceptOffer => Some(OfferAction::Accept),
            FlowPath::DeclineOffer => Some(OfferAction::Decline),
            FlowPath::CancelOffer => Some(OfferAction::Cancel),
            _ => None,
        }
    }

    fn confirm_component(self) -> ComponentId {
        match self {
            OfferAction::Accept => ComponentId::ConfirmAccept,
            OfferAction::Decline => ComponentId::ConfirmDecline,
            OfferAction::Cancel => ComponentId::ConfirmCancel,
        }
    }

    /// Where a rejected action sends the member to pick again
    fn select_step(self) -> Step {
        match self {
            OfferAction::Accept => Step::new(FlowPath::AcceptOffer, ComponentId::SelectIncomingOffer),
            OfferAction::Decline => {
                Step::new(FlowPath::DeclineOffer, ComponentId::SelectIncomingOffer)
            }
            OfferAction::Cancel => Step::new(FlowPath::CancelOffer, ComponentId::SelectOutgoingOffer),
        }
    }

    fn api_component(self) -> ComponentId {
        match self {
            OfferAction::Accept => ComponentId::AcceptOfferApiCall,
            OfferAction::Decline => ComponentId::DeclineOfferApiCall,
            OfferAction::Cancel => ComponentId::CancelOfferApiCall,
        }
    }
}

/// Pick one pending offer from the dashboard
#[derive(Debug, Clone, Copy)]
pub enum SelectOffer {
    /// Offers made to this member (accept or decline)
    Incoming,
    /// Offers this member made (cancel)
    Outgoing,
}

impl SelectOffer {
    fn id(self) -> ComponentId {
        match self {
            SelectOffer::Incoming => ComponentId::SelectIncomingOffer,
            SelectOffer::Outgoing => ComponentId::SelectOutgoingOffer,
        }
    }

    async fn offers(self, ctx: &ComponentContext) -> Result<Vec<PendingOffer>, FlowError> {
        let dashboard = require_dashboard(ctx, self.id()).await?;
        Ok(match self {
            SelectOffer::Incoming => dashboard.pending_in,
            SelectOffer::Outgoing => dashboard.pending_out,
        })
    }
}

/// Match a reply against offers by id or by 1-based position
fn find_offer<'a>(offers: &'a [PendingOffer], reply: &str) -> Option<&'a PendingOffer> {
    offers.iter().find(|o| o.offer_id == reply).or_else(|| {
        reply
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| offers.get(i))
    })
}

#[async_trait]
impl InputComponent for SelectOffer {
    const FIELD: &'static str = "offer_id";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let offers = self.offers(ctx).await?;
        if offers.is_empty() {
            return Err(ComponentError::invalid_state(self.id(), "no pending offers to choose from").into());
        }

        let path = ctx.state().get_path().await?;
        let verb = path.and_then(OfferAction::from_path).map_or("choose", OfferAction::verb);
        let rows = offers
            .iter()
            .map(|o| ListRow::new(&o.offer_id, o.formatted_amount()).with_description(&o.counterparty))
            .collect();

        ctx.send_interactive(InteractiveMessage::list(
            format!("Which offer would you like to {verb}?"),
            "Offers",
            vec![ListSection {
                title: "Pending offers".to_string(),
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
        let offers = self.offers(ctx).await?;
        Ok(match find_offer(&offers, reply.reply_value()) {
            Some(offer) => ValidationResult::success(json!({
                "offer_id": offer.offer_id,
                "offer_amount": offer.formatted_amount(),
                "counterparty": offer.counterparty,
            })),
            None => ValidationResult::failure("Please pick one of the listed offers.", Self::FIELD),
        })
    }

    fn to_verified_data(&self, value: &Value) -> Map<String, Value> {
        verified_data(value)
    }
}

pub struct ConfirmOfferAction(pub OfferAction);

#[async_trait]
impl InputComponent for ConfirmOfferAction {
    const FIELD: &'static str = "confirmed";

    async fn prompt(&self, ctx: &ComponentContext) -> Result<(), FlowError> {
        let data = ctx.state().data().await?;
        let component = self.0.confirm_component();
        let amount = data_str(&data, "offer_amount", component)?;
        let counterparty = data_str(&data, "counterparty", component)?;

        let question = match self.0 {
            OfferAction::Accept => format!("Accept the offer of {amount} from {counterparty}?"),
            OfferAction::Decline => format!("Decline the offer of {amount} from {counterparty}?"),
            OfferAction::Cancel => format!("Cancel your offer of {amount} to {counterparty}?"),
        };
        ask_confirmation(ctx, question).await
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
        confirmation_branch(ctx, value, "Nothing was changed.").await
    }
}

pub struct OfferActionApiCall(pub OfferAction);

#[async_trait]
impl ApiComponent for OfferActionApiCall {
    async fn call(
        &self,
        ctx: &ComponentContext,
        api: &dyn BackendApi,
    ) -> Result<ValidationResult, FlowError> {
        let component = self.0.api_component();
        let auth = require_auth(ctx, component).await?;
        let data = ctx.state().data().await?;
        let offer_id = data_str(&data, "offer_id", component)?;

        let response = match self.0 {
            OfferAction::Accept => api.accept_offer(&auth, &offer_id).await,
            OfferAction::Decline => api.decline_offer(&auth, &offer_id).await,
            OfferAction::Cancel => api.cancel_offer(&auth, &offer_id).await,
        };

        match response {
            Ok(response) => {
                record_action(ctx, response).await?;
                ctx.send_text(format!("Offer {}.", self.0.past_tense())).await?;
                Ok(ValidationResult::success(json!({ "offer_id": offer_id })))
            }
            Err(e) => ValidationResult::from_api_error(e, "offer_id"),
        }
    }

    fn retry_step(&self) -> Option<Step> {
        Some(self.0.select_step())
    }
}
