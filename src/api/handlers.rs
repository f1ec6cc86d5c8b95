//! HTTP request handlers

use super::types::{ErrorResponse, HealthResponse, VerifyQuery, WebhookResponse};
use super::AppState;
use crate::channel::{parse_webhook, InboundMessage, WebhookPayload};
use crate::flow::ProcessOutcome;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

const MOCK_TESTING_HEADER: &str = "x-mock-testing";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify_webhook).post(receive_webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================
// Webhook
// ============================================================

async fn verify_webhook(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<String, AppError> {
    let token_matches = matches!(
        (&state.verify_token, &query.verify_token),
        (Some(expected), Some(given)) if expected == given
    );
    if query.mode.as_deref() != Some("subscribe") || !token_matches {
        tracing::warn!(mode = ?query.mode, "Webhook verification rejected");
        return Err(AppError::Forbidden("Verification failed".to_string()));
    }

    tracing::info!("Webhook verified");
    Ok(query.challenge.unwrap_or_default())
}

async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> Result<Json<WebhookResponse>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let inbound = parse_webhook(&payload);
    if inbound.is_empty() {
        tracing::debug!("Webhook delivery without user messages");
        return Ok(Json(WebhookResponse {
            processed: false,
            messages: Vec::new(),
        }));
    }

    let requested_mock = headers
        .get(MOCK_TESTING_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if requested_mock && !state.allow_mock_testing {
        tracing::warn!("Ignoring mock-testing header; mock testing is disabled");
    }
    let mock_testing = requested_mock && state.allow_mock_testing;

    let mut messages = Vec::new();
    for InboundMessage {
        identity,
        message,
        message_id,
    } in inbound
    {
        let span = tracing::info_span!(
            "inbound",
            request_id = %Uuid::new_v4(),
            channel = %identity,
            message_id = message_id.as_deref().unwrap_or("-"),
        );
        let outcome: ProcessOutcome = state
            .processor
            .process(identity, message, mock_testing)
            .instrument(span.clone())
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        span.in_scope(|| {
            tracing::debug!(
                final_step = ?outcome.final_step,
                replied = outcome.reply.is_some(),
                sent = outcome.outbound.len(),
                "Message processed"
            );
        });
        messages.extend(outcome.outbound);
    }

    Ok(Json(WebhookResponse {
        processed: true,
        messages,
    }))
}

// ============================================================
// Health
// ============================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Webhook processing failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{ComponentId, FlowPath, FlowSettings, Step};
    use crate::ports::LoginResponse;
    use crate::testing::{sample_session, Harness};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(harness: &Harness, allow_mock_testing: bool) -> Router {
        create_router(AppState::new(
            harness.processor.clone(),
            Some("secret".to_string()),
            allow_mock_testing,
        ))
    }

    fn text_delivery(from: &str, body: &str) -> Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{ "from": from, "id": "wamid.1", "type": "text", "text": { "body": body } }],
                    },
                }],
            }],
        })
    }

    fn post(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_verification_handshake() {
        let harness = Harness::new();

        let ok = router(&harness, false)
            .oneshot(
                Request::builder()
                    .uri("/webhook?hub.mode=subscribe&hub.verify_token=secret&hub.challenge=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(to_bytes(ok.into_body(), usize::MAX).await.unwrap(), "42");

        let wrong = router(&harness, false)
            .oneshot(
                Request::builder()
                    .uri("/webhook?hub.mode=subscribe&hub.verify_token=guess&hub.challenge=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_greeting_runs_the_flow() {
        let harness = Harness::new();
        harness
            .api
            .queue_login(Ok(LoginResponse::Member(sample_session())));

        let response = router(&harness, false)
            .oneshot(post(&text_delivery(&harness.identity.identifier, "hi")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["processed"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(harness.messaging.sent().len(), 2);
        assert_eq!(
            harness.state().get_component().await.unwrap(),
            Some(ComponentId::AccountDashboard)
        );
    }

    #[tokio::test]
    async fn test_status_callback_is_acknowledged() {
        let harness = Harness::new();
        let status = json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "status": "delivered" }] } }] }],
        });

        let response = router(&harness, false).oneshot(post(&status)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["processed"], false);
        assert!(harness.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mock_header_requires_opt_in() {
        let harness = Harness::new();
        harness
            .api
            .queue_login(Ok(LoginResponse::Member(sample_session())));
        let mut request = post(&text_delivery(&harness.identity.identifier, "hi"));
        request
            .headers_mut()
            .insert(MOCK_TESTING_HEADER, "true".parse().unwrap());

        router(&harness, false).oneshot(request).await.unwrap();

        assert_eq!(harness.messaging.sent().len(), 2);
        assert!(!harness.state().mock_testing().await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_testing_echoes_without_sending() {
        let harness = Harness::new();
        harness
            .api
            .queue_login(Ok(LoginResponse::Member(sample_session())));
        let mut request = post(&text_delivery(&harness.identity.identifier, "hi"));
        request
            .headers_mut()
            .insert(MOCK_TESTING_HEADER, "true".parse().unwrap());

        let response = router(&harness, true).oneshot(request).await.unwrap();

        let body = json_body(response).await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["type"], "text");
        assert!(harness.messaging.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_bad_request() {
        let harness = Harness::new();
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = router(&harness, false).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_strict_configuration_error_is_server_error() {
        let harness = Harness::with_settings(FlowSettings {
            max_depth: 1,
            ..FlowSettings::default()
        });

        let response = router(&harness, false)
            .oneshot(post(&text_delivery(&harness.identity.identifier, "hi")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(response).await["error"]
            .as_str()
            .unwrap()
            .contains(&Step::new(FlowPath::Login, ComponentId::Greeting).to_string()));
    }

    #[tokio::test]
    async fn test_health() {
        let harness = Harness::new();
        let response = router(&harness, false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }
}
