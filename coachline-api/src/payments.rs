use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use coachline_booking::PaymentInitiated;
use coachline_core::payment::BookingPayment;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;
use crate::validate::{self, Fields};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/booking-payments", get(list_payments).post(initiate_payment))
        .route("/booking-payments/paymentId/{payment_id}", get(get_payment))
        .route("/booking-payments/bookingId/{booking_id}", get(list_booking_payments))
}

/// POST /booking-payments
/// Opens a gateway session for a verified booking and returns the redirect URL.
async fn initiate_payment(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentInitiated>), AppError> {
    let body = validate::json_body(payload)?;
    let fields = Fields::new(&body);
    let booking_id = fields.number("booking")?;
    let amount = fields.optional_number("amount")?;

    let initiated = state.services.payments.initiate(booking_id, amount).await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

async fn list_payments(State(state): State<AppState>) -> Result<Json<Vec<BookingPayment>>, AppError> {
    Ok(Json(state.services.payments.list().await?))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<BookingPayment>, AppError> {
    let payment_id = validate::id_param("paymentId", &payment_id)?;
    let payment = state
        .services
        .payments
        .get(payment_id)
        .await?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(payment))
}

async fn list_booking_payments(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Vec<BookingPayment>>, AppError> {
    let booking_id = validate::id_param("bookingId", &booking_id)?;
    let payments = state.services.payments.list_by_booking(booking_id).await?;
    if payments.is_empty() {
        return Err(AppError::not_found());
    }
    Ok(Json(payments))
}
