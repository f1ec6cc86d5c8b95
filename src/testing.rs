//! Recording mocks and a wired-up harness for tests
//!
//! These mocks enable flow testing without real I/O.

use crate::flow::{
    ComponentContext, ComponentRegistry, FlowProcessor, FlowSettings, Message, ProcessOutcome,
    Step,
};
use crate::ports::{
    ActionResponse, ApiError, BackendApi, InteractiveMessage, LedgerPage, LoginResponse,
    MemberSession, MessagingError, MessagingPort, OfferRequest, OnboardRequest, OutboundMessage,
};
use crate::state::{
    AccountSummary, AuthState, Balance, ChannelIdentity, Dashboard, MemberProfile, PendingOffer,
    StateManager,
};
use crate::store::{AtomicStore, MemoryStore, DEFAULT_MAX_RETRIES};
use async_trait::async_trait;
use serde_json::Map;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

pub fn sample_dashboard() -> Dashboard {
    Dashboard {
        member: MemberProfile {
            member_id: "member-1".into(),
            first_name: "Alice".into(),
            last_name: "Moyo".into(),
            member_handle: "alice".into(),
            member_tier: 1,
        },
        account: AccountSummary {
            account_id: "account-1".into(),
            account_name: "Alice Moyo".into(),
            account_handle: "alice".into(),
        },
        balances: vec![Balance {
            denomination: "USD".into(),
            amount: "50.00".into(),
        }],
        pending_in: vec![PendingOffer {
            offer_id: "offer-in-1".into(),
            counterparty: "Bob".into(),
            amount: "10.00".into(),
            denomination: "USD".into(),
            secured: true,
        }],
        pending_out: vec![PendingOffer {
            offer_id: "offer-out-1".into(),
            counterparty: "Carol".into(),
            amount: "5.00".into(),
            denomination: "USD".into(),
            secured: true,
        }],
    }
}

pub fn sample_session() -> MemberSession {
    MemberSession {
        dashboard: sample_dashboard(),
        auth: AuthState {
            token: "token-1".into(),
            member_id: "member-1".into(),
        },
    }
}

// ============================================================================
// Mock Messaging
// ============================================================================

/// Records every message instead of delivering it
#[derive(Default)]
pub struct MockMessaging {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockMessaging {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for MockMessaging {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), MessagingError> {
        self.sent.lock().unwrap().push(OutboundMessage::Text {
            to: recipient.to_string(),
            body: text.to_string(),
        });
        Ok(())
    }

    async fn send_interactive(
        &self,
        recipient: &str,
        message: &InteractiveMessage,
    ) -> Result<(), MessagingError> {
        self.sent.lock().unwrap().push(OutboundMessage::Interactive {
            to: recipient.to_string(),
            message: message.clone(),
        });
        Ok(())
    }
}

// ============================================================================
// Mock Backend API
// ============================================================================

type Queue<T> = Mutex<VecDeque<Result<T, ApiError>>>;

/// Backend that returns queued responses and records which operations ran
#[derive(Default)]
pub struct MockBackendApi {
    login: Queue<LoginResponse>,
    onboard: Queue<MemberSession>,
    handles: Queue<AccountSummary>,
    actions: Queue<ActionResponse>,
    ledger: Queue<LedgerPage>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockBackendApi {
    pub fn queue_login(&self, response: Result<LoginResponse, ApiError>) {
        self.login.lock().unwrap().push_back(response);
    }

    pub fn queue_onboard(&self, response: Result<MemberSession, ApiError>) {
        self.onboard.lock().unwrap().push_back(response);
    }

    pub fn queue_handle(&self, response: Result<AccountSummary, ApiError>) {
        self.handles.lock().unwrap().push_back(response);
    }

    /// Shared by create, accept, decline, cancel, and upgrade
    pub fn queue_action(&self, response: Result<ActionResponse, ApiError>) {
        self.actions.lock().unwrap().push_back(response);
    }

    pub fn queue_ledger(&self, response: Result<LedgerPage, ApiError>) {
        self.ledger.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn next<T>(&self, call: &'static str, queue: &Queue<T>) -> Result<T, ApiError> {
        self.calls.lock().unwrap().push(call);
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::network("No mock response queued")))
    }
}

#[async_trait]
impl BackendApi for MockBackendApi {
    async fn login(&self, _phone: &str) -> Result<LoginResponse, ApiError> {
        self.next("login", &self.login)
    }

    async fn onboard_member(&self, _request: &OnboardRequest) -> Result<MemberSession, ApiError> {
        self.next("onboard_member", &self.onboard)
    }

    async fn validate_handle(
        &self,
        _auth: &AuthState,
        _handle: &str,
    ) -> Result<AccountSummary, ApiError> {
        self.next("validate_handle", &self.handles)
    }

    async fn create_offer(
        &self,
        _auth: &AuthState,
        _request: &OfferRequest,
    ) -> Result<ActionResponse, ApiError> {
        self.next("create_offer", &self.actions)
    }

    async fn accept_offer(
        &self,
        _auth: &AuthState,
        _offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        self.next("accept_offer", &self.actions)
    }

    async fn decline_offer(
        &self,
        _auth: &AuthState,
        _offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        self.next("decline_offer", &self.actions)
    }

    async fn cancel_offer(
        &self,
        _auth: &AuthState,
        _offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        self.next("cancel_offer", &self.actions)
    }

    async fn get_ledger(
        &self,
        _auth: &AuthState,
        _account_id: &str,
        _start_row: u32,
        _num_rows: u32,
    ) -> Result<LedgerPage, ApiError> {
        self.next("get_ledger", &self.ledger)
    }

    async fn upgrade_tier(&self, _auth: &AuthState, _tier: u8) -> Result<ActionResponse, ApiError> {
        self.next("upgrade_tier", &self.actions)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A processor over an in-memory store with both ports mocked
pub struct Harness {
    pub messaging: Arc<MockMessaging>,
    pub api: Arc<MockBackendApi>,
    pub processor: FlowProcessor,
    pub identity: ChannelIdentity,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(FlowSettings::default())
    }

    pub fn with_settings(settings: FlowSettings) -> Self {
        let messaging = Arc::new(MockMessaging::default());
        let api = Arc::new(MockBackendApi::default());
        let store = AtomicStore::new(Arc::new(MemoryStore::new()), DEFAULT_MAX_RETRIES);
        let registry = Arc::new(ComponentRegistry::with_defaults(Duration::from_secs(60)));
        let processor = FlowProcessor::new(
            store,
            registry,
            messaging.clone(),
            Some(api.clone()),
            settings,
        );
        Self {
            messaging,
            api,
            processor,
            identity: ChannelIdentity::whatsapp("263770000001"),
        }
    }

    pub fn state(&self) -> StateManager {
        self.processor.state_for(self.identity.clone())
    }

    pub fn context(&self, mock_testing: bool) -> ComponentContext {
        ComponentContext::new(
            self.state(),
            self.messaging.clone(),
            Some(self.api.clone()),
            mock_testing,
        )
    }

    pub fn context_without_api(&self, mock_testing: bool) -> ComponentContext {
        ComponentContext::new(self.state(), self.messaging.clone(), None, mock_testing)
    }

    /// Send a text message as the harness's channel
    pub async fn send(&self, text: &str) -> ProcessOutcome {
        self.processor
            .process(self.identity.clone(), Message::text(text), false)
            .await
            .unwrap()
    }

    /// Put a logged-in member at `step`
    pub async fn logged_in_at(&self, step: Step, awaiting_input: bool) {
        let state = self.state();
        state.initialize_channel(false).await.unwrap();
        state.record_login(&sample_session()).await.unwrap();
        state
            .update_flow_state(step, Map::new(), None, awaiting_input)
            .await
            .unwrap();
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
