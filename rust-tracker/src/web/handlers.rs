//! Tracking API and inbound reply webhook handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::WebConfig;
use crate::correlate::correlate;
use crate::cycle::apply_pairs;
use crate::error::{RegistrationError, StoreError};
use crate::mailbox::{make_snippet, parse_date};
use crate::model::{normalize_address, CampaignWindow, InboundMessage, SendStatus};
use crate::registrar::Registrar;
use crate::stats::FunnelReport;
use crate::store::{MarkTarget, TrackingStore};
use crate::web::api::{
    ErrorResponse, HealthResponse, InboundWebhookPayload, InboundWebhookResponse,
    MarkRepliedRequest, MarkRepliedResponse, RegisterRequest, RegisterResponse, StatsQuery,
    StatsResponse, TrackSendRequest, TrackSendResponse,
};
use crate::web::signature::{is_signature_verification_enabled, verify_signature, SIGNATURE_HEADER};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WebConfig>,
    pub store: Arc<dyn TrackingStore>,
    pub registrar: Registrar,
}

impl AppState {
    pub fn new(config: WebConfig, store: Arc<dyn TrackingStore>) -> Self {
        Self {
            config: Arc::new(config),
            registrar: Registrar::new(store.clone()),
            store,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

fn store_error_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Duplicate(_) => StatusCode::CONFLICT,
        StoreError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// Health Check
// =============================================================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Send Registration
// =============================================================================

/// Register a send and allocate its tracking id.
pub async fn track_send(
    State(state): State<AppState>,
    Json(request): Json<TrackSendRequest>,
) -> Response {
    match state
        .registrar
        .register(&request.to, &request.subject, &request.body)
        .await
    {
        Ok(entry) => (
            StatusCode::OK,
            Json(TrackSendResponse {
                success: true,
                tracking_id: entry.tracking_id,
                entry,
            }),
        )
            .into_response(),
        Err(e @ RegistrationError::InvalidRecipient) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(RegistrationError::Persistence(e)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Store an entry whose tracking id was allocated by the caller.
pub async fn register(
    State(state): State<AppState>,
    Json(RegisterRequest { mut entry }): Json<RegisterRequest>,
) -> Response {
    entry.recipient = normalize_address(&entry.recipient);
    if entry.recipient.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            RegistrationError::InvalidRecipient.to_string(),
        );
    }
    if entry.status != SendStatus::Sent || entry.replied_at.is_some() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "only outstanding sends can be registered".to_string(),
        );
    }

    match state.store.register_send(&entry).await {
        Ok(()) => {
            info!(
                tracking_id = %entry.tracking_id,
                recipient = %entry.recipient,
                "send_registered_remote"
            );
            (
                StatusCode::OK,
                Json(RegisterResponse {
                    success: true,
                    tracking_id: entry.tracking_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(tracking_id = %entry.tracking_id, error = %e, "register_failed");
            error_response(store_error_status(&e), e.to_string())
        }
    }
}

// =============================================================================
// Reply Marking
// =============================================================================

/// Mark a send (by id) or every outstanding send to an address as replied.
pub async fn mark_replied(
    State(state): State<AppState>,
    Json(request): Json<MarkRepliedRequest>,
) -> Response {
    let target = match (request.tracking_id, request.email.as_deref()) {
        (Some(id), _) => MarkTarget::TrackingId(id),
        (None, Some(email)) if !email.trim().is_empty() => MarkTarget::recipient(email),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "either tracking_id or email is required",
            )
        }
    };

    match state.store.mark_replied(&target).await {
        Ok(outcome) => {
            info!(target = %target, marked = outcome.marked(), "mark_replied_request");
            (
                StatusCode::OK,
                Json(MarkRepliedResponse {
                    success: true,
                    marked: outcome.marked(),
                    outcome,
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(target = %target, error = %e, "mark_replied_failed");
            error_response(store_error_status(&e), e.to_string())
        }
    }
}

// =============================================================================
// Funnel Statistics
// =============================================================================

pub async fn stats(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> Response {
    let entries = match state.store.list_sent(CampaignWindow::days(query.days)).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(days = query.days, error = %e, "stats_list_failed");
            return error_response(store_error_status(&e), e.to_string());
        }
    };

    let report = FunnelReport::compute(&entries);
    (
        StatusCode::OK,
        Json(StatsResponse {
            success: true,
            stats: report.stats,
            daily: report.daily,
            emails: entries,
        }),
    )
        .into_response()
}

// =============================================================================
// Inbound Reply Webhook
// =============================================================================

/// Correlate one pushed inbound reply against outstanding sends.
///
/// The raw body is taken as bytes so the signature covers exactly what was
/// sent.
pub async fn inbound_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if is_signature_verification_enabled(&state.config.inbound_webhook_secret) {
        let secret = state.config.inbound_webhook_secret.as_deref().unwrap_or_default();
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !verify_signature(secret, &body, signature) {
            warn!(has_signature = !signature.is_empty(), "inbound_signature_invalid");
            return error_response(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let payload: InboundWebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, body_length = body.len(), "inbound_payload_invalid");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid payload: {}", e));
        }
    };

    if payload.from.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "from is required");
    }

    info!(from = %payload.from, subject = %payload.subject, "inbound_webhook_received");

    let message = InboundMessage {
        received_at: payload
            .date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or_else(Utc::now),
        from_address: payload.from,
        subject: payload.subject,
        snippet: make_snippet(&payload.snippet),
    };

    let snapshot = match state.store.list_sent(state.config.correlation_window).await {
        Ok(entries) => entries,
        Err(e) => {
            error!(error = %e, "inbound_snapshot_failed");
            return error_response(store_error_status(&e), e.to_string());
        }
    };

    let pairs = correlate(&snapshot, std::slice::from_ref(&message));
    let tally = apply_pairs(state.store.as_ref(), &pairs).await;

    info!(
        from = %message.from_address,
        matched = pairs.len(),
        marked = tally.marked,
        failed = tally.failed,
        "inbound_webhook_processed"
    );

    (
        StatusCode::OK,
        Json(InboundWebhookResponse {
            success: tally.failed == 0,
            matched: pairs.len(),
            marked: tally.marked,
        }),
    )
        .into_response()
}
