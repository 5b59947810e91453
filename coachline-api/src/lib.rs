use axum::{
    extract::{ConnectInfo, State},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod callbacks;
pub mod error;
pub mod otp;
pub mod parcels;
pub mod payments;
pub mod state;
pub mod validate;
pub mod worker;

pub use error::AppError;
pub use state::{AppState, RateLimits};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::USER_AGENT]);

    let api = Router::new()
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(callbacks::routes())
        .merge(otp::routes())
        .merge(parcels::routes())
        .method_not_allowed_fallback(method_not_allowed);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .nest(&state.api_prefix, api)
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(anyhow::Error::from)?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], buffer))
}

/// Per-IP request budget. Requests without a peer address (in-process
/// callers) and limiter outages pass through.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>().copied() else {
        return next.run(req).await;
    };

    let key = format!("ratelimit:{}", addr.ip());
    match state.limiter.check(&key, state.limits.requests_per_minute, 60).await {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!("Rate limit exceeded for {}", addr.ip());
            AppError::TooManyRequests("rate limit exceeded".to_string()).into_response()
        }
        Err(e) => {
            tracing::warn!("Rate limiter unavailable: {}", e);
            next.run(req).await
        }
    }
}
