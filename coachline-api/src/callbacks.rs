use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use coachline_booking::{CallbackInput, CallbackReceipt};
use serde_json::Value;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;
use crate::validate::{self, Fields};

pub fn routes() -> Router<AppState> {
    Router::new().route("/payment-callbacks", post(receive_callback))
}

/// POST /payment-callbacks
/// Server-to-server result from the payment gateway. Safe to redeliver.
async fn receive_callback(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<CallbackReceipt>), AppError> {
    let body = validate::json_body(payload)?;
    let fields = Fields::new(&body);
    let input = CallbackInput {
        transaction_id: fields.string("transactionId", "string")?,
        system_transaction_id: fields.string("systemTransactionId", "string")?,
        status: fields.string("status", "string")?,
        details: fields.optional_string("details")?,
    };

    info!(
        "Payment callback {} for {} with status {}",
        input.transaction_id, input.system_transaction_id, input.status
    );
    let receipt = state.services.payments.handle_callback(input).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
