use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use coachline_api::{app, AppState, RateLimits};
use coachline_booking::{BookingSettings, InMemoryHarness};
use coachline_core::memory::InMemoryRateLimiter;
use coachline_core::otp::VerificationType;
use prometheus::Registry;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const PREFIX: &str = "/booking-service/v1";
const TRIP: i64 = 7;
const COMMUTER: i64 = 1001;

async fn setup_with(limits: RateLimits) -> (Router, InMemoryHarness) {
    let registry = Registry::new();
    let harness = InMemoryHarness::new(BookingSettings::default(), &registry).unwrap();
    harness.seed_trip(TRIP, 40, 150_000).await;
    harness.seed_commuter(COMMUTER).await;

    let state = AppState {
        services: harness.services.clone(),
        limiter: Arc::new(InMemoryRateLimiter::new()),
        limits,
        registry,
        api_prefix: PREFIX.to_string(),
    };
    (app(state), harness)
}

async fn setup() -> (Router, InMemoryHarness) {
    setup_with(RateLimits::default()).await
}

async fn send(app: &Router, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(format!("{}{}", PREFIX, path));
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_booking(app: &Router, seat: i64) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/bookings",
        Some(json!({"commuter": COMMUTER, "trip": TRIP, "seatNumber": seat})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

async fn latest_otp(harness: &InMemoryHarness, booking_id: i64, kind: VerificationType) -> (i64, String) {
    let otp = harness.services.otps.latest(booking_id, kind).await.unwrap().unwrap();
    (otp.verification_id, otp.otp)
}

#[tokio::test]
async fn test_booking_to_cancellation_over_http() {
    let (app, harness) = setup().await;

    let created = create_booking(&app, 10).await;
    assert_eq!(created["bookingStatus"], "CREATING");
    assert_eq!(created["commuter"]["commuterId"], COMMUTER);
    let booking_id = created["bookingId"].as_i64().unwrap();

    let (verification_id, code) = latest_otp(&harness, booking_id, VerificationType::CommuterVerification).await;
    assert_eq!(created["verificationId"], verification_id);
    let (status, verified) = send(
        &app,
        Method::PATCH,
        &format!("/otp-verifications/{}", verification_id),
        Some(json!({"otp": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["status"], "VERIFIED");
    assert!(verified.get("otp").is_none());

    let (status, initiated) = send(&app, Method::POST, "/booking-payments", Some(json!({"booking": booking_id}))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", initiated);
    assert_eq!(initiated["amount"], 150_000);
    let system_tx = initiated["systemTransactionId"].as_str().unwrap().to_string();
    assert!(initiated["redirectUrl"].as_str().unwrap().contains(&system_tx));

    let (status, receipt) = send(
        &app,
        Method::POST,
        "/payment-callbacks",
        Some(json!({
            "transactionId": format!("gw-{}", system_tx),
            "systemTransactionId": system_tx,
            "status": "SUCCESS",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", receipt);
    assert_eq!(receipt["paymentStatus"], "SUCCESS");
    assert_eq!(receipt["applied"], true);

    let (_, booking) = send(&app, Method::GET, &format!("/bookings/{}", booking_id), None).await;
    assert_eq!(booking["bookingStatus"], "PAID");
    let e_ticket = booking["eTicket"].as_str().unwrap().to_string();

    // first lookup only yields a challenge
    let (status, challenge) = send(&app, Method::GET, &format!("/bookings/eTicket/{}", e_ticket), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(challenge["verificationId"].is_i64());
    assert!(challenge.get("bookingId").is_none());

    // cancelling before the e-ticket OTP is verified is refused
    let (status, _) = send(
        &app,
        Method::PATCH,
        &format!("/bookings/{}/booking-status", booking_id),
        Some(json!({"bookingStatus": "CANCELLED"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    harness
        .verify_latest(booking_id, VerificationType::ETicketVerificationGet)
        .await
        .unwrap();

    let (status, ticket) = send(&app, Method::GET, &format!("/bookings/eTicket/{}", e_ticket), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["bookingId"], booking_id);

    let (status, cancelled) = send(
        &app,
        Method::PATCH,
        &format!("/bookings/{}/booking-status", booking_id),
        Some(json!({"bookingStatus": "CANCELLED"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", cancelled);
    assert_eq!(cancelled["bookingStatus"], "CANCELLED");

    assert_eq!(harness.events.count("EVN_BOOKING_PAYMENT_SUCCESS").await, 1);
    assert_eq!(harness.events.count("EVN_BOOKING_CANCELLED").await, 1);
}

#[tokio::test]
async fn test_validation_messages() {
    let (app, _) = setup().await;

    let (status, body) = send(&app, Method::POST, "/bookings", Some(json!({"trip": TRIP, "seatNumber": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "commuter is required");

    let (status, body) = send(
        &app,
        Method::POST,
        "/bookings",
        Some(json!({"commuter": COMMUTER, "trip": TRIP, "seatNumber": "window"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "seatNumber should be a number");

    let (status, body) = send(&app, Method::GET, "/bookings/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad request, bookingId should be a number");

    let (status, body) = send(&app, Method::POST, "/payment-callbacks", Some(json!({"transactionId": "t"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "systemTransactionId is required");
}

#[tokio::test]
async fn test_seat_conflicts_and_range() {
    let (app, _) = setup().await;

    create_booking(&app, 3).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/bookings",
        Some(json!({"commuter": COMMUTER, "trip": TRIP, "seatNumber": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "seat already used");

    let (status, body) = send(
        &app,
        Method::POST,
        "/bookings",
        Some(json!({"commuter": COMMUTER, "trip": TRIP, "seatNumber": 41})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "seat is outside of the expected capacity");

    let (status, seats) = send(&app, Method::GET, &format!("/bookings/tripId/{}/seats", TRIP), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seats, json!([3]));
}

#[tokio::test]
async fn test_payment_requires_verified_commuter() {
    let (app, _) = setup().await;
    let created = create_booking(&app, 5).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/booking-payments",
        Some(json!({"booking": created["bookingId"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "this booking is still creating, please pay later");
}

#[tokio::test]
async fn test_unmatched_callback_is_not_found() {
    let (app, harness) = setup().await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/payment-callbacks",
        Some(json!({"transactionId": "gw-x", "systemTransactionId": "x", "status": "SUCCESS"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(harness.store.callbacks().await.is_empty());
}

#[tokio::test]
async fn test_wrong_otp_then_rate_limit() {
    let (app, harness) = setup_with(RateLimits {
        otp_attempts_per_window: 2,
        ..RateLimits::default()
    })
    .await;
    let created = create_booking(&app, 8).await;
    let booking_id = created["bookingId"].as_i64().unwrap();
    let (verification_id, code) = latest_otp(&harness, booking_id, VerificationType::CommuterVerification).await;
    let wrong = if code == "1234" { "4321" } else { "1234" };
    let path = format!("/otp-verifications/{}", verification_id);

    let (status, body) = send(&app, Method::PATCH, &path, Some(json!({"otp": wrong}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "NOT_VERIFIED");

    let (status, _) = send(&app, Method::PATCH, &path, Some(json!({"otp": wrong}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, Method::PATCH, &path, Some(json!({"otp": code}))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_lost_parcel_report_and_status_gate() {
    let (app, harness) = setup().await;
    let created = create_booking(&app, 12).await;
    let booking_id = created["bookingId"].as_i64().unwrap();

    harness
        .verify_latest(booking_id, VerificationType::CommuterVerification)
        .await
        .unwrap();
    let initiated = harness.services.payments.initiate(booking_id, None).await.unwrap();
    harness
        .services
        .payments
        .handle_callback(coachline_booking::CallbackInput {
            transaction_id: format!("gw-{}", initiated.system_transaction_id),
            system_transaction_id: initiated.system_transaction_id.clone(),
            status: "SUCCESS".to_string(),
            details: None,
        })
        .await
        .unwrap();
    let (_, booking) = send(&app, Method::GET, &format!("/bookings/{}", booking_id), None).await;
    let e_ticket = booking["eTicket"].as_str().unwrap().to_string();

    let report = json!({"eTicket": e_ticket, "type": "BAG", "name": "Blue backpack"});
    let (status, parcel) = send(&app, Method::POST, "/lost-parcels", Some(report.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{}", parcel);
    assert_eq!(parcel["status"], "REQUESTED");
    let reference_id = parcel["referenceId"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::POST, "/lost-parcels", Some(report)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "already created a complain for this ticket");

    let (status, challenge) =
        send(&app, Method::GET, &format!("/lost-parcels/referenceId/{}", reference_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(challenge["verificationId"].is_i64());
}

#[tokio::test]
async fn test_method_not_allowed() {
    let (app, _) = setup().await;

    let (status, body) = send(&app, Method::DELETE, "/bookings", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "method not allowed");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let (app, _) = setup().await;
    create_booking(&app, 1).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("coachline_booking_transitions_total"));
}
