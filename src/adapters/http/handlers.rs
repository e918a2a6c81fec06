//! HTTP handlers for the billing endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use super::dto::{ErrorResponse, HealthResponse, WebhookAck};
use crate::application::billing::{ChargeError, PaymentOrchestrator, ReconcileError};
use crate::domain::foundation::{ErrorCode, RequestContext, SubscriptionId};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for the billing router.
#[derive(Clone)]
pub struct BillingAppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
}

impl BillingAppState {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// `GET /health`
pub async fn health(State(state): State<BillingAppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        gateway: state.orchestrator.gateway().name(),
    })
}

/// `POST /webhooks/payments`
///
/// Answers 401 when the signature is missing or wrong, 500 when processing
/// failed (so the processor redelivers), 200 otherwise, including for
/// duplicates and deliveries that belong to nobody.
pub async fn receive_payment_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, BillingApiError> {
    let header_name = state.orchestrator.gateway().signature_header();
    let signature = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!(target: "security", header = header_name, "webhook without signature header");
            BillingApiError::MissingSignature(header_name)
        })?;

    let mut ctx = RequestContext::system();
    if let Some(request_id) = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_correlation_id(request_id);
    }

    let outcome = state
        .orchestrator
        .reconcile_webhook(&ctx, &body, signature)
        .await?;

    Ok(Json(WebhookAck::from(&outcome)))
}

/// `GET /subscriptions/:id`
pub async fn get_subscription(
    State(state): State<BillingAppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, BillingApiError> {
    let id: SubscriptionId = id
        .parse()
        .map_err(|_| BillingApiError::BadRequest(format!("'{}' is not a subscription id", id)))?;

    let view = state.orchestrator.view(id).await?;
    Ok(Json(view))
}

/// API error type that converts application errors to HTTP responses.
#[derive(Debug)]
pub enum BillingApiError {
    MissingSignature(&'static str),
    BadRequest(String),
    Reconcile(ReconcileError),
    Charge(ChargeError),
}

impl From<ReconcileError> for BillingApiError {
    fn from(err: ReconcileError) -> Self {
        Self::Reconcile(err)
    }
}

impl From<ChargeError> for BillingApiError {
    fn from(err: ChargeError) -> Self {
        Self::Charge(err)
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
        ErrorCode::SubscriptionNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidStateTransition | ErrorCode::ConcurrentModification => {
            StatusCode::CONFLICT
        }
        ErrorCode::InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
        ErrorCode::PaymentFailed => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::GatewayError => StatusCode::BAD_GATEWAY,
        ErrorCode::AuditFailure | ErrorCode::DatabaseError | ErrorCode::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            BillingApiError::MissingSignature(header) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(
                    ErrorCode::InvalidWebhookSignature.to_string(),
                    format!("missing {} header", header),
                ),
            ),
            BillingApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new(ErrorCode::ValidationFailed.to_string(), message),
            ),
            BillingApiError::Reconcile(ReconcileError::InvalidSignature) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new(
                    ErrorCode::InvalidWebhookSignature.to_string(),
                    "webhook signature rejected",
                ),
            ),
            // Anything else must be redelivered by the processor.
            BillingApiError::Reconcile(err) => {
                tracing::error!(error = %err, code = %err.code(), "webhook processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(err.code().to_string(), "webhook processing failed"),
                )
            }
            BillingApiError::Charge(err) => {
                let status = status_for(err.code());
                if status.is_server_error() {
                    tracing::error!(error = %err, code = %err.code(), "request failed");
                }
                (status, ErrorResponse::new(err.code().to_string(), err.to_string()))
            }
        };

        (status, Json(body)).into_response()
    }
}
