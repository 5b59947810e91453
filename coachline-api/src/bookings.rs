use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use coachline_booking::{CreatedBooking, GatedAccess};
use coachline_core::booking::{Booking, BookingStatus, BookingView, TicketStatus};
use serde_json::Value;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;
use crate::validate::{self, Fields};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/bookings/{booking_id}/booking-status", patch(update_booking_status))
        .route("/bookings/tripId/{trip_id}", get(list_trip_bookings))
        .route("/bookings/tripId/{trip_id}/seats", get(occupied_seats))
        .route("/bookings/eTicket/{e_ticket}", get(get_ticket).patch(update_ticket_status))
}

/// POST /bookings
/// Hold a seat and email the commuter a verification code.
async fn create_booking(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedBooking>), AppError> {
    let body = validate::json_body(payload)?;
    let fields = Fields::new(&body);
    let commuter_id = fields.number("commuter")?;
    let trip_id = fields.number("trip")?;
    let seat_number = fields.number("seatNumber")?;
    let seat_number = i32::try_from(seat_number)
        .map_err(|_| AppError::Validation("seatNumber should be a number".to_string()))?;

    let created = state.services.manager.create(commuter_id, trip_id, seat_number).await?;
    info!("Booking {} created for trip {}", created.booking.booking.booking_id, trip_id);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_bookings(State(state): State<AppState>) -> Result<Json<Vec<BookingView>>, AppError> {
    Ok(Json(state.services.manager.list().await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingView>, AppError> {
    let booking_id = validate::id_param("bookingId", &booking_id)?;
    let view = state
        .services
        .manager
        .get(booking_id)
        .await?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(view))
}

async fn list_trip_bookings(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    let trip_id = validate::id_param("tripId", &trip_id)?;
    Ok(Json(state.services.manager.list_by_trip(trip_id).await?))
}

async fn occupied_seats(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Vec<i32>>, AppError> {
    let trip_id = validate::id_param("tripId", &trip_id)?;
    Ok(Json(state.services.manager.occupied_seats(trip_id).await?))
}

/// GET /bookings/eTicket/:eTicket
/// Full ticket once the e-ticket OTP is verified, otherwise `{verificationId}`.
async fn get_ticket(
    State(state): State<AppState>,
    Path(e_ticket): Path<String>,
) -> Result<Json<GatedAccess<BookingView>>, AppError> {
    let e_ticket = e_ticket.trim();
    if e_ticket.is_empty() {
        return Err(AppError::Validation("bad request, eTicket should be a String".to_string()));
    }
    Ok(Json(state.services.tickets.get_by_e_ticket(e_ticket).await?))
}

/// PATCH /bookings/:bookingId/booking-status
async fn update_booking_status(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Booking>, AppError> {
    let booking_id = validate::id_param("bookingId", &booking_id)?;
    let body = validate::json_body(payload)?;
    let requested: BookingStatus = Fields::new(&body)
        .string("bookingStatus", "String")?
        .parse()
        .map_err(|e: coachline_core::CoreError| AppError::Validation(e.to_string()))?;

    Ok(Json(state.services.manager.cancel(booking_id, requested).await?))
}

/// PATCH /bookings/eTicket/:eTicket
/// Conductor marks the ticket as used on boarding.
async fn update_ticket_status(
    State(state): State<AppState>,
    Path(e_ticket): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Booking>, AppError> {
    let body = validate::json_body(payload)?;
    let requested: TicketStatus = Fields::new(&body)
        .string("ticketStatus", "String")?
        .parse()
        .map_err(|e: coachline_core::CoreError| AppError::Validation(e.to_string()))?;

    if requested != TicketStatus::Used {
        return Err(AppError::Validation(format!("ticketStatus must be USED, got {}", requested)));
    }

    Ok(Json(state.services.manager.mark_used(e_ticket.trim()).await?))
}
