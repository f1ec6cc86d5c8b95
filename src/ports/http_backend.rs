//! HTTP implementation of the backend API port

use super::backend::{
    ActionResponse, ApiError, BackendApi, LedgerPage, LoginResponse, MemberSession,
    OfferRequest, OnboardRequest,
};
use crate::state::{AccountSummary, AuthState};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// JSON-over-HTTP client for the member/credex backend.
///
/// One attempt per call; retrying is left to the caller.
pub struct HttpBackendApi {
    client: Client,
    base_url: String,
}

/// Error body shape the backend uses for rejected operations
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    field: Option<String>,
}

impl HttpBackendApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        auth: Option<&AuthState>,
        body: &B,
    ) -> Result<(StatusCode, HeaderMap, String), ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.client.post(&url).json(body);
        if let Some(auth) = auth {
            request = request.bearer_auth(&auth.token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                ApiError::network(format!("Connection failed: {e}"))
            } else {
                ApiError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

        tracing::debug!(endpoint, status = status.as_u16(), "Backend call completed");
        Ok((status, headers, text))
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        auth: Option<&AuthState>,
        body: &B,
    ) -> Result<R, ApiError> {
        let (status, headers, text) = self.send(endpoint, auth, body).await?;
        if !status.is_success() {
            return Err(classify_error(status, retry_after(&headers), &text));
        }
        parse_body(endpoint, &text)
    }
}

fn parse_body<R: DeserializeOwned>(endpoint: &str, text: &str) -> Result<R, ApiError> {
    serde_json::from_str(text).map_err(|e| {
        ApiError::unknown(format!("Failed to parse {endpoint} response: {e} - body: {text}"))
    })
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn classify_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let business = parsed
        .as_ref()
        .and_then(|b| b.message.clone())
        .map(|message| {
            let err = ApiError::business(message);
            match parsed.as_ref().and_then(|b| b.field.clone()) {
                Some(field) => err.with_field(field),
                None => err,
            }
        });

    match status.as_u16() {
        401 | 403 => ApiError::auth(format!("Authentication failed: {body}")),
        429 => {
            let err = ApiError::rate_limit(format!("Rate limited: {body}"));
            match retry_after {
                Some(duration) => err.with_retry_after(duration),
                None => err,
            }
        }
        400 | 404 | 409 | 422 => business.unwrap_or_else(|| {
            if status == StatusCode::BAD_REQUEST {
                ApiError::invalid_request(format!("Invalid request: {body}"))
            } else {
                ApiError::unknown(format!("HTTP {status}: {body}"))
            }
        }),
        500..=599 => ApiError::server_error(format!("Server error: {body}")),
        _ => ApiError::unknown(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl BackendApi for HttpBackendApi {
    async fn login(&self, phone: &str) -> Result<LoginResponse, ApiError> {
        let (status, headers, text) = self.send("login", None, &json!({ "phone": phone })).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(LoginResponse::NotMember);
        }
        if !status.is_success() {
            return Err(classify_error(status, retry_after(&headers), &text));
        }
        parse_body::<MemberSession>("login", &text).map(LoginResponse::Member)
    }

    async fn onboard_member(&self, request: &OnboardRequest) -> Result<MemberSession, ApiError> {
        self.post("onboardMember", None, request).await
    }

    async fn validate_handle(
        &self,
        auth: &AuthState,
        handle: &str,
    ) -> Result<AccountSummary, ApiError> {
        self.post(
            "getAccountByHandle",
            Some(auth),
            &json!({ "accountHandle": handle }),
        )
        .await
    }

    async fn create_offer(
        &self,
        auth: &AuthState,
        request: &OfferRequest,
    ) -> Result<ActionResponse, ApiError> {
        self.post("createCredex", Some(auth), request).await
    }

    async fn accept_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        self.post("acceptCredex", Some(auth), &json!({ "credexID": offer_id }))
            .await
    }

    async fn decline_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        self.post("declineCredex", Some(auth), &json!({ "credexID": offer_id }))
            .await
    }

    async fn cancel_offer(
        &self,
        auth: &AuthState,
        offer_id: &str,
    ) -> Result<ActionResponse, ApiError> {
        self.post("cancelCredex", Some(auth), &json!({ "credexID": offer_id }))
            .await
    }

    async fn get_ledger(
        &self,
        auth: &AuthState,
        account_id: &str,
        start_row: u32,
        num_rows: u32,
    ) -> Result<LedgerPage, ApiError> {
        self.post(
            "getLedger",
            Some(auth),
            &json!({ "accountID": account_id, "startRow": start_row, "numRows": num_rows }),
        )
        .await
    }

    async fn upgrade_tier(&self, auth: &AuthState, tier: u8) -> Result<ActionResponse, ApiError> {
        self.post(
            "upgradeMemberTier",
            Some(auth),
            &json!({ "memberID": auth.member_id, "tier": tier }),
        )
        .await
    }
}
