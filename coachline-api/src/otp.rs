use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::patch,
    Json, Router,
};
use coachline_core::otp::OtpVerification;
use serde_json::Value;
use tracing::warn;

use crate::error::AppError;
use crate::state::AppState;
use crate::validate::{self, Fields};

pub fn routes() -> Router<AppState> {
    Router::new().route("/otp-verifications/{verification_id}", patch(submit_otp))
}

/// PATCH /otp-verifications/:verificationId
/// A wrong code answers 200 with the record still `NOT_VERIFIED`.
async fn submit_otp(
    State(state): State<AppState>,
    Path(verification_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<OtpVerification>, AppError> {
    let verification_id = validate::id_param("verificationId", &verification_id)?;
    let body = validate::json_body(payload)?;
    let otp = Fields::new(&body).digits("otp")?;

    let key = format!("ratelimit:otp:{}", verification_id);
    let limits = &state.limits;
    match state
        .limiter
        .check(&key, limits.otp_attempts_per_window, limits.otp_window_seconds)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            warn!("Too many OTP attempts for verification {}", verification_id);
            return Err(AppError::TooManyRequests(
                "too many attempts, please try again later".to_string(),
            ));
        }
        // fail open
        Err(e) => warn!("OTP rate limiter unavailable: {}", e),
    }

    Ok(Json(state.services.manager.submit_otp(verification_id, &otp).await?))
}
