use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::{to_bytes, Body};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json as AxumJson, Router};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

use musafir_domain::itinerary::{
    BookingOffer, Itinerary, ItinerarySummary, ItineraryStatus, TripInput,
};
use musafir_domain::reservation::{Reservation, ReservationStatus};
use musafir_domain::util::now_ms;
use musafir_infra::config::AppConfig;
use musafir_infra::gateway::{webhook_signature, GatewayConfig, StripeGateway};
use musafir_infra::repositories::Repositories;

use crate::routes;
use crate::state::AppState;

const JWT_SECRET: &str = "test-secret";
const WEBHOOK_SECRET: &str = "whsec_test";

#[derive(Serialize)]
struct Claims {
    sub: String,
    role: String,
    exp: usize,
}

fn test_config(stripe_api_base: &str) -> AppConfig {
    AppConfig {
        app_env: "test".to_string(),
        port: 0,
        log_level: "info".to_string(),
        data_backend: "memory".to_string(),
        surreal_endpoint: "ws://127.0.0.1:8000".to_string(),
        surreal_ns: "musafir".to_string(),
        surreal_db: "trips".to_string(),
        surreal_user: "root".to_string(),
        surreal_pass: "root".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        auth_dev_bypass_enabled: false,
        stripe_api_base: stripe_api_base.to_string(),
        stripe_secret_key: "sk_test_key".to_string(),
        stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
        stripe_signature_tolerance_secs: 300,
    }
}

fn test_token(sub: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs();
    let claims = Claims {
        sub: sub.to_string(),
        role: "user".to_string(),
        exp: (now + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token")
}

async fn spawn_gateway_stub() -> String {
    async fn create_intent() -> AxumJson<Value> {
        let suffix = Uuid::now_v7().simple().to_string();
        AxumJson(json!({
            "id": format!("pi_{suffix}"),
            "client_secret": format!("pi_{suffix}_secret"),
        }))
    }

    let app = Router::new().route("/v1/payment_intents", post(create_intent));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gateway stub");
    let addr = listener.local_addr().expect("gateway stub addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve gateway stub");
    });

    format!("http://{addr}")
}

async fn test_state() -> AppState {
    let base = spawn_gateway_stub().await;
    let config = test_config(&base);
    let gateway = StripeGateway::new(GatewayConfig::from_app_config(&config));
    AppState::with_parts(config, Repositories::memory(), Arc::new(gateway))
}

async fn test_app() -> (AppState, Router) {
    let state = test_state().await;
    let app = routes::router(state.clone());
    (state, app)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn seeded_itinerary(user_id: &str) -> Itinerary {
    let mut booking_options = BTreeMap::new();
    booking_options.insert(
        "hotels".to_string(),
        vec![
            BookingOffer {
                id: "ht1".to_string(),
                quote_id: "q1".to_string(),
                name: Some("Hotel Ashoka".to_string()),
                amount: 2500,
                currency: "INR".to_string(),
            },
            BookingOffer {
                id: "ht2".to_string(),
                quote_id: "q2".to_string(),
                name: Some("Hotel Taj".to_string()),
                amount: 3200,
                currency: "INR".to_string(),
            },
        ],
    );
    booking_options.insert(
        "activities".to_string(),
        vec![BookingOffer {
            id: "act9".to_string(),
            quote_id: "qa9".to_string(),
            name: Some("Fort walk".to_string()),
            amount: 450,
            currency: "INR".to_string(),
        }],
    );
    let now = now_ms();
    Itinerary {
        itinerary_id: format!("it_{}", &Uuid::now_v7().simple().to_string()[..12]),
        user_id: user_id.to_string(),
        status: ItineraryStatus::Active,
        input: TripInput {
            destination: "Jaipur".to_string(),
            travelers: 2,
            ..TripInput::default()
        },
        summary: ItinerarySummary {
            title: "Trip to Jaipur".to_string(),
            center: None,
            days: Vec::new(),
        },
        booking_options,
        reservations: Vec::new(),
        edits: Vec::new(),
        created_at_ms: now,
        updated_at_ms: now,
    }
}

async fn seed_itinerary(state: &AppState, user_id: &str) -> String {
    let itinerary = seeded_itinerary(user_id);
    let itinerary = state
        .repos
        .itineraries
        .create(&itinerary)
        .await
        .expect("seed itinerary");
    itinerary.itinerary_id
}

async fn reserve_hotel(app: &Router, token: &str, itinerary_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(token),
            json!({
                "items": [
                    {"type": "hotel", "provider_quote_id": "q1", "amount": 2500, "currency": "INR"}
                ],
                "hold_ttl_minutes": 30
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn checkout(app: &Router, token: &str, reservation_id: &str, amount: i64) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/payments/checkout",
            Some(token),
            json!({
                "reservation_id": reservation_id,
                "amount": amount,
                "currency": "INR"
            }),
        ))
        .await
        .expect("response");
    let status = response.status();
    (status, body_json(response).await)
}

fn signed_webhook(event_type: &str, intent_id: &str) -> Request<Body> {
    let payload = json!({
        "type": event_type,
        "data": { "object": { "id": intent_id } }
    })
    .to_string();
    let signature = webhook_signature(WEBHOOK_SECRET, now_ms() / 1000, payload.as_bytes());
    Request::builder()
        .method("POST")
        .uri("/v1/payments/webhook")
        .header(CONTENT_TYPE, "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(payload))
        .expect("request")
}

async fn wait_for_payment_status(state: &AppState, payment_id: &str, status: &str) {
    for _ in 0..200 {
        let payment = state
            .repos
            .payments
            .get(payment_id)
            .await
            .expect("payment lookup");
        if payment
            .map(|payment| payment.status.as_str() == status)
            .unwrap_or(false)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("payment {payment_id} never reached status {status}");
}

#[tokio::test]
async fn health_is_public() {
    let (_, app) = test_app().await;
    let response = app
        .oneshot(get_req("/health", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_auth() {
    let (_, app) = test_app().await;
    let response = app
        .oneshot(get_req("/v1/trips", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn trips_are_created_fetched_and_owned() {
    let (_, app) = test_app().await;
    let token = test_token("user-1");

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/trips",
            Some(&token),
            json!({
                "destination": "Jaipur",
                "start_date": "2026-09-01",
                "end_date": "2026-09-05",
                "travelers": 2
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let itinerary_id = created["itinerary_id"].as_str().expect("id").to_string();
    assert_eq!(created["status"], "draft");
    assert_eq!(created["summary"]["title"], "Trip to Jaipur");
    assert_eq!(created["input"]["duration_days"], 5);

    let response = app
        .clone()
        .oneshot(get_req(&format!("/v1/trips/{itinerary_id}"), Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let stranger = test_token("user-2");
    let response = app
        .clone()
        .oneshot(get_req(&format!("/v1/trips/{itinerary_id}"), Some(&stranger)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(get_req("/v1/trips/it_missing000", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reserve_resolves_amounts_and_links_itinerary() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(&token),
            json!({
                "items": [
                    {"type": "hotel", "provider_quote_id": "q1"},
                    {"type": "activity", "provider_quote_id": "x", "amount": 300},
                    {"type": "flight", "provider_quote_id": "unknown-quote"}
                ]
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["status"], "held");
    assert_eq!(body["total_amount"], 2800);
    let items = body["items"].as_array().expect("items");
    assert_eq!(items[0]["amount"], 2500);
    assert_eq!(items[1]["amount"], 300);
    assert_eq!(items[2]["amount"], 0);
    assert!(items[0]["hold_id"].as_str().expect("hold").starts_with("hold_"));
    assert!(body["expires_at"].as_str().is_some());

    let reservation_id = body["reservation_id"].as_str().expect("id");
    let response = app
        .oneshot(get_req(&format!("/v1/trips/{itinerary_id}"), Some(&token)))
        .await
        .expect("response");
    let trip = body_json(response).await;
    let linked = trip["reservations"].as_array().expect("reservations");
    assert!(linked.iter().any(|value| value == reservation_id));
}

#[tokio::test]
async fn reserve_is_idempotent_by_key() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let body = json!({
        "items": [{"type": "hotel", "provider_quote_id": "q1"}],
        "idempotency_key": "retry-abc"
    });
    let first = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(&token),
            body.clone(),
        ))
        .await
        .expect("response");
    let first = body_json(first).await;

    let second = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(&token),
            body,
        ))
        .await
        .expect("response");
    let second = body_json(second).await;

    assert_eq!(first["reservation_id"], second["reservation_id"]);

    let third = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(&token),
            json!({
                "items": [{"type": "hotel", "provider_quote_id": "q1"}],
                "idempotency_key": "retry-def"
            }),
        ))
        .await
        .expect("response");
    let third = body_json(third).await;
    assert_ne!(first["reservation_id"], third["reservation_id"]);
}

#[tokio::test]
async fn reserve_clamps_hold_ttl() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let before = now_ms();
    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(&token),
            json!({
                "items": [{"type": "hotel", "provider_quote_id": "q1"}],
                "hold_ttl_minutes": 10_000
            }),
        ))
        .await
        .expect("response");
    let body = body_json(response).await;
    let reservation_id = body["reservation_id"].as_str().expect("id");

    let reservation = state
        .repos
        .reservations
        .get(reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    let ttl_ms = reservation.expires_at_ms - before;
    assert!(ttl_ms <= 720 * 60_000 + 5_000, "ttl not clamped: {ttl_ms}");
}

#[tokio::test]
async fn reserve_enforces_existence_and_ownership() {
    let (state, app) = test_app().await;
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let body = json!({"items": [{"type": "hotel", "provider_quote_id": "q1"}]});

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/trips/it_missing000/reserve",
            Some(&test_token("user-1")),
            body.clone(),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/reserve"),
            Some(&test_token("user-2")),
            body,
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn checkout_creates_payment_for_held_reservation() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id");

    let (status, body) = checkout(&app, &token, reservation_id, 2500).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "created");
    assert!(body["client_secret"].as_str().expect("secret").contains("secret"));

    let payment = state
        .repos
        .payments
        .get(body["payment_id"].as_str().expect("id"))
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(payment.amount, 2500);
    assert!(payment.intent_id.starts_with("pi_"));
}

#[tokio::test]
async fn checkout_rejects_non_held_reservation() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/reservations/{reservation_id}/cancel"),
            Some(&token),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = checkout(&app, &token, reservation_id, 2500).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "invalid_state");
}

#[tokio::test]
async fn checkout_rejects_expired_hold() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let now = now_ms();
    let reservation = Reservation {
        reservation_id: "res_expired0001".to_string(),
        itinerary_id,
        user_id: "user-1".to_string(),
        items: Vec::new(),
        total_amount: 2500,
        currency: "INR".to_string(),
        status: ReservationStatus::Held,
        expires_at_ms: now - 60_000,
        created_at_ms: now - 3_600_000,
        updated_at_ms: now - 3_600_000,
        cancelled_at_ms: None,
        idempotency_key: None,
    };
    state
        .repos
        .reservations
        .create(&reservation)
        .await
        .expect("seed reservation");

    let (status, body) = checkout(&app, &token, "res_expired0001", 2500).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "invalid_state");
}

#[tokio::test]
async fn webhook_requires_valid_signature() {
    let (_, app) = test_app().await;

    let payload = json!({
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_nope" } }
    })
    .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/payments/webhook")
                .header(CONTENT_TYPE, "application/json")
                .header("stripe-signature", "t=1,v1=deadbeef")
                .body(Body::from(payload.clone()))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/payments/webhook")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(payload))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn full_booking_pipeline_reaches_booked() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();
    assert_eq!(reservation["total_amount"], 2500);

    let (status, payment) = checkout(&app, &token, &reservation_id, 2500).await;
    assert_eq!(status, StatusCode::OK);
    let payment_id = payment["payment_id"].as_str().expect("id").to_string();

    let intent_id = state
        .repos
        .payments
        .get(&payment_id)
        .await
        .expect("lookup")
        .expect("present")
        .intent_id;

    let response = app
        .clone()
        .oneshot(signed_webhook("payment_intent.succeeded", &intent_id))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_payment_status(&state, &payment_id, "succeeded").await;

    let reservation = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(reservation.status, ReservationStatus::Paid);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/book"),
            Some(&token),
            json!({"reservation_id": reservation_id, "payment_id": payment_id}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let booking = body_json(response).await;
    assert_eq!(booking["status"], "confirmed");

    let reservation = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(reservation.status, ReservationStatus::Booked);

    let itinerary = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(itinerary.status, ItineraryStatus::Booked);
}

#[tokio::test]
async fn webhook_redelivery_is_idempotent() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();

    let (_, payment) = checkout(&app, &token, &reservation_id, 2500).await;
    let payment_id = payment["payment_id"].as_str().expect("id").to_string();
    let intent_id = state
        .repos
        .payments
        .get(&payment_id)
        .await
        .expect("lookup")
        .expect("present")
        .intent_id;

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(signed_webhook("payment_intent.succeeded", &intent_id))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
    wait_for_payment_status(&state, &payment_id, "succeeded").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reservation = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(reservation.status, ReservationStatus::Paid);
}

#[tokio::test]
async fn failed_payment_leaves_reservation_held_for_retry() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();

    let (_, payment) = checkout(&app, &token, &reservation_id, 2500).await;
    let payment_id = payment["payment_id"].as_str().expect("id").to_string();
    let intent_id = state
        .repos
        .payments
        .get(&payment_id)
        .await
        .expect("lookup")
        .expect("present")
        .intent_id;

    let response = app
        .clone()
        .oneshot(signed_webhook("payment_intent.payment_failed", &intent_id))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_payment_status(&state, &payment_id, "failed").await;

    let reservation = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(reservation.status, ReservationStatus::Held);

    let (status, _) = checkout(&app, &token, &reservation_id, 2500).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn two_checkouts_before_webhook_create_distinct_payments() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id");

    let (status_a, first) = checkout(&app, &token, reservation_id, 2500).await;
    let (status_b, second) = checkout(&app, &token, reservation_id, 2500).await;
    assert_eq!(status_a, StatusCode::OK);
    assert_eq!(status_b, StatusCode::OK);
    assert_ne!(first["payment_id"], second["payment_id"]);
}

#[tokio::test]
async fn finalize_requires_succeeded_payment() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();
    let (_, payment) = checkout(&app, &token, &reservation_id, 2500).await;
    let payment_id = payment["payment_id"].as_str().expect("id");

    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/book"),
            Some(&token),
            json!({"reservation_id": reservation_id, "payment_id": payment_id}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "invalid_state");
    assert!(body["error"]["message"]
        .as_str()
        .expect("message")
        .contains("payment not succeeded"));
}

#[tokio::test]
async fn finalize_is_idempotent_on_rerun() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();
    let (_, payment) = checkout(&app, &token, &reservation_id, 2500).await;
    let payment_id = payment["payment_id"].as_str().expect("id").to_string();
    let intent_id = state
        .repos
        .payments
        .get(&payment_id)
        .await
        .expect("lookup")
        .expect("present")
        .intent_id;
    app.clone()
        .oneshot(signed_webhook("payment_intent.succeeded", &intent_id))
        .await
        .expect("response");
    wait_for_payment_status(&state, &payment_id, "succeeded").await;

    let finalize = post_json(
        &format!("/v1/trips/{itinerary_id}/book"),
        Some(&token),
        json!({"reservation_id": reservation_id, "payment_id": payment_id}),
    );
    let first = body_json(
        app.clone()
            .oneshot(finalize)
            .await
            .expect("response"),
    )
    .await;

    let second = body_json(
        app.oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/book"),
            Some(&token),
            json!({"reservation_id": reservation_id, "payment_id": payment_id}),
        ))
        .await
        .expect("response"),
    )
    .await;

    assert_eq!(first["booking_id"], second["booking_id"]);
}

#[tokio::test]
async fn cancel_reservation_is_idempotent_and_unlinks() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/reservations/{reservation_id}/cancel"),
            Some(&token),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let cancelled_at = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present")
        .cancelled_at_ms
        .expect("cancelled_at set");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/reservations/{reservation_id}/cancel"),
            Some(&token),
            json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "cancelled");

    let after = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(after.cancelled_at_ms, Some(cancelled_at));

    let itinerary = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");
    assert!(!itinerary.reservations.contains(&reservation_id));
}

#[tokio::test]
async fn cancel_booking_is_idempotent_and_does_not_reverse() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let reservation = reserve_hotel(&app, &token, &itinerary_id).await;
    let reservation_id = reservation["reservation_id"].as_str().expect("id").to_string();
    let (_, payment) = checkout(&app, &token, &reservation_id, 2500).await;
    let payment_id = payment["payment_id"].as_str().expect("id").to_string();
    let intent_id = state
        .repos
        .payments
        .get(&payment_id)
        .await
        .expect("lookup")
        .expect("present")
        .intent_id;
    app.clone()
        .oneshot(signed_webhook("payment_intent.succeeded", &intent_id))
        .await
        .expect("response");
    wait_for_payment_status(&state, &payment_id, "succeeded").await;

    let booking = body_json(
        app.clone()
            .oneshot(post_json(
                &format!("/v1/trips/{itinerary_id}/book"),
                Some(&token),
                json!({"reservation_id": reservation_id, "payment_id": payment_id}),
            ))
            .await
            .expect("response"),
    )
    .await;
    let booking_id = booking["booking_id"].as_str().expect("id").to_string();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/v1/bookings/{booking_id}/cancel"),
                Some(&token),
                json!({}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "cancelled");
    }

    let reservation = state
        .repos
        .reservations
        .get(&reservation_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(reservation.status, ReservationStatus::Booked);
}

#[tokio::test]
async fn customize_applies_swap_add_remove() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/customize"),
            Some(&token),
            json!({
                "actions": [
                    {"op": "swap", "item_type": "hotel", "item_id": "q1", "alternative_id": "ht2",
                     "reason": "closer to the fort"},
                    {"op": "add", "item_type": "activity", "alternative_id": "act42"},
                    {"op": "remove", "item_type": "activity", "item_id": "act9"}
                ]
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "applied");
    assert_eq!(body["edits"], 3);

    let itinerary = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(itinerary.edits.len(), 3);
    assert_eq!(itinerary.booking_options["hotels"][0].id, "ht2");
    assert!(itinerary.booking_options["activities"].is_empty());
    assert_eq!(itinerary.summary.days[0].activities[0].id, "act42");
}

#[tokio::test]
async fn customize_batch_is_atomic() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let before = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");

    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/customize"),
            Some(&token),
            json!({
                "actions": [
                    {"op": "remove", "item_type": "activity", "item_id": "act9"},
                    {"op": "swap", "item_type": "hotel", "item_id": "q1",
                     "alternative_id": "no-such-offer"}
                ]
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let after = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(after.edits.len(), 0);
    assert_eq!(after.summary, before.summary);
    assert_eq!(after.booking_options, before.booking_options);
}

#[tokio::test]
async fn customize_remove_of_missing_target_records_edit() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;
    let before = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");

    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/customize"),
            Some(&token),
            json!({
                "actions": [
                    {"op": "remove", "item_type": "activity", "item_id": "act1"}
                ]
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let after = state
        .repos
        .itineraries
        .get(&itinerary_id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(after.edits.len(), 1);
    assert_eq!(after.summary, before.summary);
}

#[tokio::test]
async fn customize_rejects_unknown_op() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/customize"),
            Some(&token),
            json!({
                "actions": [
                    {"op": "teleport", "item_type": "hotel", "item_id": "q1"}
                ]
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alternatives_filter_by_max_price() {
    let (state, app) = test_app().await;
    let token = test_token("user-1");
    let itinerary_id = seed_itinerary(&state, "user-1").await;

    let response = app
        .oneshot(post_json(
            &format!("/v1/trips/{itinerary_id}/alternatives"),
            Some(&token),
            json!({
                "item_type": "hotel",
                "current_id": "ht1",
                "constraints": {"max_price": 3000}
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let alternatives = body["alternatives"].as_array().expect("alternatives");
    assert_eq!(alternatives.len(), 1);
    assert_eq!(alternatives[0]["id"], "ht1");
}
