//! Payment provider webhooks.
//!
//! The provider retries on any non-2xx answer, so the handler distinguishes
//! carefully:
//!
//! - 401 for a bad signature and 400 for a malformed body (retrying cannot help,
//!   nothing was mutated)
//! - 200 once the event is processed, including duplicates and no-ops
//! - 500 when applying the event failed and a redelivery should try again

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, instrument, warn};

use crate::services::{ApplyOutcome, PaymentEvent};
use crate::state::AppState;
use crate::webhook::{self, SIGNATURE_HEADER};

fn reply(status: StatusCode, body: serde_json::Value) -> Response {
    (status, Json(body)).into_response()
}

const fn outcome_label(outcome: &ApplyOutcome) -> &'static str {
    match outcome {
        ApplyOutcome::Applied { .. } => "applied",
        ApplyOutcome::Duplicate => "duplicate",
        ApplyOutcome::Anomaly { .. } => "anomaly",
        ApplyOutcome::Ignored => "ignored",
    }
}

/// Receive a signed payment event.
#[instrument(skip_all, fields(intent_id, event_type))]
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if !webhook::verify(&body, signature, &state.config().payment.webhook_secret) {
        warn!(has_signature = signature.is_some(), "Rejected webhook signature");
        return reply(
            StatusCode::UNAUTHORIZED,
            json!({ "error": "invalid signature" }),
        );
    }

    let event = match webhook::parse(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "Rejected malformed webhook");
            return reply(StatusCode::BAD_REQUEST, json!({ "error": "malformed event" }));
        }
    };

    let span = tracing::Span::current();
    span.record("intent_id", event.intent_id.as_str());
    span.record("event_type", tracing::field::debug(&event.kind));

    let Some(payment_event) = PaymentEvent::from_webhook(&event) else {
        debug!(kind = ?event.kind, "Acknowledging event without effect");
        return reply(StatusCode::OK, json!({ "status": "ignored" }));
    };

    match state.reconciler().apply_event(payment_event).await {
        Ok(outcome) => reply(
            StatusCode::OK,
            json!({ "status": outcome_label(&outcome) }),
        ),
        Err(err) => {
            let event_id = sentry::capture_error(&err);
            error!(
                error = %err,
                sentry_event_id = %event_id,
                "Failed to apply webhook event"
            );
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal error" }),
            )
        }
    }
}
