use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coachline_booking::{BookingError, OtpError, ParcelError, PaymentError, SeatError, TicketError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Unauthorized(String),
    NotFound(String),
    MethodNotAllowed,
    TooManyRequests(String),
    Internal(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    pub fn not_found() -> Self {
        AppError::NotFound("resource not found".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string()),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<SeatError> for AppError {
    fn from(err: SeatError) -> Self {
        match err {
            SeatError::OutOfRange { .. } | SeatError::AlreadyUsed { .. } => AppError::Validation(err.to_string()),
            SeatError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::NotFoundOrExpired | OtpError::AlreadyVerified => AppError::Validation(err.to_string()),
            OtpError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Seat(e) => e.into(),
            BookingError::Otp(e) => e.into(),
            BookingError::NotFound => AppError::not_found(),
            BookingError::TicketNotFound => AppError::NotFound(err.to_string()),
            BookingError::NoVerification => AppError::Unauthorized(err.to_string()),
            BookingError::Scheduling(_) | BookingError::Storage(_) => AppError::Internal(err.to_string()),
            BookingError::TripNotFound
            | BookingError::CommuterNotFound
            | BookingError::BookingDisabled
            | BookingError::TripUnavailable
            | BookingError::TicketAlreadyUsed
            | BookingError::AlreadyCancelled
            | BookingError::NotCancellable(_)
            | BookingError::UnsupportedStatus(_) => AppError::Validation(err.to_string()),
        }
    }
}

impl From<TicketError> for AppError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::NotFound => AppError::NotFound(err.to_string()),
            TicketError::Otp(e) => e.into(),
            TicketError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Otp(e) => e.into(),
            PaymentError::Booking(e) => e.into(),
            PaymentError::Ticket(e) => e.into(),
            PaymentError::NotFound => AppError::not_found(),
            PaymentError::RequestNotFound => AppError::NotFound(err.to_string()),
            PaymentError::Gateway(_) | PaymentError::GatewayTimeout | PaymentError::Storage(_) => {
                AppError::Internal(err.to_string())
            }
            PaymentError::BookingNotFound
            | PaymentError::StillCreating
            | PaymentError::Cancelled
            | PaymentError::Expired
            | PaymentError::AlreadyPaid
            | PaymentError::WindowClosed
            | PaymentError::CommuterNotVerified
            | PaymentError::MissingAmount => AppError::Validation(err.to_string()),
        }
    }
}

impl From<ParcelError> for AppError {
    fn from(err: ParcelError) -> Self {
        match err {
            ParcelError::AlreadyReported => AppError::Validation(err.to_string()),
            ParcelError::NoBookingFound | ParcelError::NotFound => AppError::NotFound(err.to_string()),
            ParcelError::Otp(e) => e.into(),
            ParcelError::Storage(_) => AppError::Internal(err.to_string()),
        }
    }
}
