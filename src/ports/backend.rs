//! Backend API port: the business operations components call

use crate::state::{AccountSummary, ActionRecord, AuthState, Dashboard};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Credentials and dashboard returned by login and onboarding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSession {
    pub dashboard: Dashboard,
    pub auth: AuthState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginResponse {
    Member(MemberSession),
    /// No member is registered for this phone number
    NotMember,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub default_denom: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRequest {
    pub issuer_account_id: String,
    pub receiver_account_id: String,
    /// Decimal amount as text
    pub amount: String,
    pub denomination: String,
    pub secured: bool,
}

/// Result of a business action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: ActionRecord,
    #[serde(default)]
    pub dashboard: Option<Dashboard>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub counterparty: String,
    /// Signed decimal amount as text, negative for outgoing
    pub amount: String,
    pub denomination: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    #[serde(default)]
    pub has_more: bool,
}

/// Backend error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// Request field the backend blamed, if any
    pub field: Option<String>,
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            retry_after: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidRequest, message)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Business, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Network issues, timeouts - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Malformed request (400 without a business message)
    InvalidRequest,
    /// The backend refused the operation with a user-facing reason
    Business,
    Unknown,
}

impl ApiErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    async fn login(&self, phone: &str) -> Result<LoginResponse, ApiError>;

    async fn onboard_member(&self, request: &OnboardRequest) -> Result<MemberSession, ApiError>;

    /// Resolve an account handle to the account it names
    async fn validate_handle(
        &self,
        auth: &AuthState,
        handle: &str,
    ) -> Result<AccountSummary, ApiError>;

    async fn create_offer(
        &self,
        auth: &AuthState,
        request: &OfferRequest,
    ) -> Result<ActionResponse, ApiError>;

    async fn accept_offer(&self, auth: &AuthState, offer_id: &str)
        -> Result<ActionResponse, ApiError>;

    async fn decline_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError>;

    async fn cancel_offer(&self, auth: &AuthState, offer_id: &str)
        -> Result<ActionResponse, ApiError>;

    async fn get_ledger(
        &self,
        auth: &AuthState,
        account_id: &str,
        start_row: u32,
        num_rows: u32,
    ) -> Result<LedgerPage, ApiError>;

    async fn upgrade_tier(&self, auth: &AuthState, tier: u8) -> Result<ActionResponse, ApiError>;
}

#[async_trait]
impl<T: BackendApi + ?Sized> BackendApi for Arc<T> {
    async fn login(&self, phone: &str) -> Result<LoginResponse, ApiError> {
        (**self).login(phone).await
    }

    async fn onboard_member(&self, request: &OnboardRequest) -> Result<MemberSession, ApiError> {
        (**self).onboard_member(request).await
    }

    async fn validate_handle(
        &self,
        auth: &AuthState,
        handle: &str,
    ) -> Result<AccountSummary, ApiError> {
        (**self).validate_handle(auth, handle).await
    }

    async fn create_offer(
        &self,
        auth: &AuthState,
        request: &OfferRequest,
    ) -> Result<ActionResponse, ApiError> {
        (**self).create_offer(auth, request).await
    }

    async fn accept_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        (**self).accept_offer(auth, offer_id).await
    }

    async fn decline_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        (**self).decline_offer(auth, offer_id).await
    }

    async fn cancel_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        (**self).cancel_offer(auth, offer_id).await
    }

    async fn get_ledger(
        &self,
        auth: &AuthState,
        account_id: &str,
        start_row: u32,
        num_rows: u32,
    ) -> Result<LedgerPage, ApiError> {
        (**self)
            .get_ledger(auth, account_id, start_row, num_rows)
            .await
    }

    async fn upgrade_tier(&self, auth: &AuthState, tier: u8) -> Result<ActionResponse, ApiError> {
        (**self).upgrade_tier(auth, tier).await
    }
}
