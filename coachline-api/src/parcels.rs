use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use coachline_booking::{GatedAccess, ParcelReport};
use coachline_core::parcel::LostParcel;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;
use crate::validate::{self, Fields};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/lost-parcels", get(list_parcels).post(report_parcel))
        .route("/lost-parcels/{parcel_id}", get(get_parcel))
        .route("/lost-parcels/referenceId/{reference_id}", get(parcel_status))
}

/// POST /lost-parcels
async fn report_parcel(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<LostParcel>), AppError> {
    let body = validate::json_body(payload)?;
    let fields = Fields::new(&body);
    let report = ParcelReport {
        e_ticket: fields.bounded("eTicket", 50)?,
        parcel_type: fields.bounded("type", 20)?,
        name: fields.bounded("name", 50)?,
        description: fields.optional_bounded("description", 1000)?,
    };

    let parcel = state.services.parcels.report(report).await?;
    Ok((StatusCode::CREATED, Json(parcel)))
}

async fn list_parcels(State(state): State<AppState>) -> Result<Json<Vec<LostParcel>>, AppError> {
    Ok(Json(state.services.parcels.list().await?))
}

async fn get_parcel(
    State(state): State<AppState>,
    Path(parcel_id): Path<String>,
) -> Result<Json<LostParcel>, AppError> {
    let parcel_id = validate::id_param("parcelId", &parcel_id)?;
    let parcel = state
        .services
        .parcels
        .get(parcel_id)
        .await?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(parcel))
}

/// GET /lost-parcels/referenceId/:referenceId
/// Same OTP gate as the e-ticket lookup.
async fn parcel_status(
    State(state): State<AppState>,
    Path(reference_id): Path<String>,
) -> Result<Json<GatedAccess<LostParcel>>, AppError> {
    let reference_id = reference_id.trim();
    if reference_id.is_empty() {
        return Err(AppError::Validation("bad request, referenceId should be a string".to_string()));
    }
    Ok(Json(state.services.parcels.status_by_reference(reference_id).await?))
}
