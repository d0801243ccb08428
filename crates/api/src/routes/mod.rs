use axum::extract::{Extension, Path, Query, State};
use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use musafir_domain::booking::{Booking, BookingService};
use musafir_domain::customize::{CustomizeAction, CustomizeService};
use musafir_domain::error::DomainError;
use musafir_domain::identity::ActorIdentity;
use musafir_domain::itinerary::{
    AlternativesQuery, BookingOffer, EditOp, Itinerary, ItineraryService, ItineraryStatus,
    TripCreate,
};
use musafir_domain::payment::{CheckoutRequest, PaymentService};
use musafir_domain::ports::gateway::GatewayError;
use musafir_domain::reservation::{
    HoldRequest, HoldService, Reservation, ReservationItemRequest, DEFAULT_CURRENCY,
};
use musafir_domain::util::format_ms_rfc3339;

use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::{middleware as app_middleware, observability, state::AppState, validation};

const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/trips", post(create_trip).get(list_trips))
        .route("/v1/trips/:itinerary_id", get(get_trip))
        .route("/v1/trips/:itinerary_id/reserve", post(reserve))
        .route("/v1/trips/:itinerary_id/customize", post(customize))
        .route("/v1/trips/:itinerary_id/alternatives", post(alternatives))
        .route("/v1/trips/:itinerary_id/book", post(finalize_booking))
        .route("/v1/reservations", get(list_reservations))
        .route("/v1/reservations/:reservation_id", get(get_reservation))
        .route(
            "/v1/reservations/:reservation_id/cancel",
            post(cancel_reservation),
        )
        .route("/v1/payments/checkout", post(checkout))
        .route("/v1/bookings/:booking_id", get(get_booking))
        .route("/v1/bookings/:booking_id/cancel", post(cancel_booking))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/payments/webhook", post(payment_webhook))
        .merge(protected)
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .layer(middleware::from_fn(app_middleware::metrics_layer));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> impl IntoResponse {
    observability::render_metrics().unwrap_or_default()
}

#[derive(Debug, Deserialize, Validate)]
struct CreateTripRequest {
    #[validate(length(min = 1, max = 120))]
    destination: String,
    origin: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    duration_days: Option<i64>,
    budget_minor: Option<i64>,
    themes: Option<Vec<String>>,
    travelers: Option<u32>,
}

async fn create_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateTripRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;

    let service = ItineraryService::new(state.repos.itineraries.clone());
    let itinerary = service
        .create(
            actor,
            TripCreate {
                destination: payload.destination,
                origin: payload.origin,
                start_date: payload.start_date,
                end_date: payload.end_date,
                duration_days: payload.duration_days,
                budget_minor: payload.budget_minor,
                themes: payload.themes.unwrap_or_default(),
                travelers: payload.travelers,
            },
        )
        .await
        .map_err(map_domain_error)?;

    Ok((StatusCode::CREATED, Json(itinerary)))
}

#[derive(Debug, Deserialize)]
struct TripListQuery {
    status: Option<String>,
}

async fn list_trips(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TripListQuery>,
) -> Result<Json<Vec<Itinerary>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let status = query
        .status
        .as_deref()
        .map(|status| {
            status
                .parse::<ItineraryStatus>()
                .map_err(|_| ApiError::Validation(format!("unknown status filter '{status}'")))
        })
        .transpose()?;

    let service = ItineraryService::new(state.repos.itineraries.clone());
    let trips = service
        .list(&actor, status)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(trips))
}

async fn get_trip(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(itinerary_id): Path<String>,
) -> Result<Json<Itinerary>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = ItineraryService::new(state.repos.itineraries.clone());
    let itinerary = service
        .get(&actor, &itinerary_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(itinerary))
}

#[derive(Debug, Deserialize)]
struct ReserveItemBody {
    #[serde(rename = "type")]
    item_type: String,
    provider_quote_id: String,
    amount: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReserveRequest {
    items: Vec<ReserveItemBody>,
    hold_ttl_minutes: Option<i64>,
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct ReserveResponse {
    reservation_id: String,
    status: &'static str,
    expires_at: String,
    total_amount: i64,
    currency: String,
    items: Vec<musafir_domain::reservation::ResolvedItem>,
}

async fn reserve(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(itinerary_id): Path<String>,
    Json(payload): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = HoldService::new(
        state.repos.itineraries.clone(),
        state.repos.reservations.clone(),
    );
    let reservation = service
        .reserve(
            actor,
            &itinerary_id,
            HoldRequest {
                items: payload
                    .items
                    .into_iter()
                    .map(|item| ReservationItemRequest {
                        item_type: item.item_type,
                        provider_quote_id: item.provider_quote_id,
                        amount: item.amount,
                        currency: item.currency,
                    })
                    .collect(),
                hold_ttl_minutes: payload.hold_ttl_minutes,
                idempotency_key: payload.idempotency_key,
            },
        )
        .await
        .map_err(map_domain_error)?;

    Ok(Json(ReserveResponse {
        reservation_id: reservation.reservation_id,
        status: reservation.status.as_str(),
        expires_at: format_ms_rfc3339(reservation.expires_at_ms),
        total_amount: reservation.total_amount,
        currency: reservation.currency,
        items: reservation.items,
    }))
}

#[derive(Debug, Deserialize)]
struct CustomizeActionBody {
    op: String,
    item_type: String,
    item_id: Option<String>,
    alternative_id: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomizeRequest {
    actions: Vec<CustomizeActionBody>,
}

async fn customize(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(itinerary_id): Path<String>,
    Json(payload): Json<CustomizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor_identity(&auth)?;
    let actions = payload
        .actions
        .into_iter()
        .map(|action| {
            let op = action
                .op
                .parse::<EditOp>()
                .map_err(|_| ApiError::Validation(format!("invalid op '{}'", action.op)))?;
            Ok(CustomizeAction {
                op,
                item_type: action.item_type,
                item_id: action.item_id,
                alternative_id: action.alternative_id,
                reason: action.reason,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let service = CustomizeService::new(state.repos.itineraries.clone());
    let edits = service
        .customize(actor, &itinerary_id, actions)
        .await
        .map_err(map_domain_error)?;

    Ok(Json(json!({ "status": "applied", "edits": edits.len() })))
}

#[derive(Debug, Deserialize)]
struct AlternativeConstraints {
    max_price: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
struct AlternativesRequest {
    #[validate(length(min = 1, max = 64))]
    item_type: String,
    #[validate(length(min = 1, max = 128))]
    current_id: String,
    constraints: Option<AlternativeConstraints>,
}

#[derive(Serialize)]
struct AlternativesResponse {
    alternatives: Vec<BookingOffer>,
}

async fn alternatives(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(itinerary_id): Path<String>,
    Json(payload): Json<AlternativesRequest>,
) -> Result<Json<AlternativesResponse>, ApiError> {
    validation::validate(&payload)?;
    let actor = actor_identity(&auth)?;
    let service = ItineraryService::new(state.repos.itineraries.clone());
    let alternatives = service
        .alternatives(
            &actor,
            &itinerary_id,
            AlternativesQuery {
                item_type: payload.item_type,
                current_id: payload.current_id,
                max_price: payload.constraints.and_then(|c| c.max_price),
            },
        )
        .await
        .map_err(map_domain_error)?;
    Ok(Json(AlternativesResponse { alternatives }))
}

async fn list_reservations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = HoldService::new(
        state.repos.itineraries.clone(),
        state.repos.reservations.clone(),
    );
    let reservations = service.list(&actor).await.map_err(map_domain_error)?;
    Ok(Json(reservations))
}

async fn get_reservation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(reservation_id): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = HoldService::new(
        state.repos.itineraries.clone(),
        state.repos.reservations.clone(),
    );
    let reservation = service
        .get(&actor, &reservation_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(reservation))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(reservation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = HoldService::new(
        state.repos.itineraries.clone(),
        state.repos.reservations.clone(),
    );
    let reservation = service
        .cancel(&actor, &reservation_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(json!({ "status": reservation.status.as_str() })))
}

#[derive(Debug, Deserialize)]
struct CheckoutBody {
    reservation_id: String,
    amount: i64,
    currency: Option<String>,
}

async fn checkout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CheckoutBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = PaymentService::new(
        state.repos.reservations.clone(),
        state.repos.payments.clone(),
        state.gateway.clone(),
    );
    let receipt = service
        .checkout(
            actor,
            CheckoutRequest {
                reservation_id: payload.reservation_id,
                amount: payload.amount,
                currency: payload
                    .currency
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            },
        )
        .await
        .map_err(map_domain_error)?;

    Ok(Json(json!({
        "payment_id": receipt.payment.payment_id,
        "reservation_id": receipt.payment.reservation_id,
        "status": receipt.payment.status.as_str(),
        "client_secret": receipt.client_secret,
    })))
}

/// Webhook ingestion: authenticate and decode synchronously, then hand the
/// event to a background task so the processor's retry timer never waits on
/// the store.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing stripe-signature header".into()))?;

    let event = state
        .gateway
        .verify_and_parse(&body, signature)
        .map_err(|err| match err {
            GatewayError::Signature => ApiError::Unauthorized,
            GatewayError::Payload(message) => ApiError::Validation(message),
            GatewayError::Request(message) => ApiError::Upstream(message),
        })?;

    let service = PaymentService::new(
        state.repos.reservations.clone(),
        state.repos.payments.clone(),
        state.gateway.clone(),
    );
    tokio::spawn(async move {
        // Failures here are logged and swallowed; the gateway already got
        // its 200 and must not retry a recognized event forever.
        match service.apply_event(&event).await {
            Ok(outcome) => {
                observability::register_webhook_event(&event.event_type, outcome.as_str());
                tracing::info!(
                    event_type = %event.event_type,
                    intent_id = %event.intent_id,
                    outcome = outcome.as_str(),
                    "webhook event processed"
                );
            }
            Err(err) => {
                observability::register_webhook_event(&event.event_type, "error");
                tracing::error!(
                    event_type = %event.event_type,
                    intent_id = %event.intent_id,
                    error = %err,
                    "webhook event processing failed"
                );
            }
        }
    });

    Ok(Json(json!({ "received": true })))
}

#[derive(Debug, Deserialize)]
struct FinalizeRequest {
    reservation_id: String,
    payment_id: String,
}

async fn finalize_booking(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(itinerary_id): Path<String>,
    Json(payload): Json<FinalizeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor_identity(&auth)?;
    let service = booking_service(&state);
    let booking = service
        .finalize(
            actor,
            &itinerary_id,
            &payload.reservation_id,
            &payload.payment_id,
        )
        .await
        .map_err(map_domain_error)?;

    Ok(Json(json!({
        "booking_id": booking.booking_id,
        "status": booking.status.as_str(),
    })))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    let actor = actor_identity(&auth)?;
    let booking = booking_service(&state)
        .get(&actor, &booking_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(booking))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(booking_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor = actor_identity(&auth)?;
    let booking = booking_service(&state)
        .cancel(&actor, &booking_id)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(json!({ "status": booking.status.as_str() })))
}

fn booking_service(state: &AppState) -> BookingService {
    BookingService::new(
        state.repos.itineraries.clone(),
        state.repos.reservations.clone(),
        state.repos.payments.clone(),
        state.repos.bookings.clone(),
    )
}

fn actor_identity(auth: &AuthContext) -> Result<ActorIdentity, ApiError> {
    let user_id = auth
        .user_id
        .as_ref()
        .filter(|user_id| !user_id.trim().is_empty())
        .ok_or(ApiError::Unauthorized)?;
    Ok(ActorIdentity {
        user_id: user_id.to_string(),
        username: auth
            .username
            .clone()
            .unwrap_or_else(|| user_id.to_string()),
    })
}

fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::NotFound => ApiError::NotFound,
        DomainError::Forbidden => ApiError::Forbidden,
        DomainError::InvalidState(message) => ApiError::InvalidState(message),
        DomainError::Unauthorized => ApiError::Unauthorized,
        DomainError::Conflict => ApiError::Conflict,
        DomainError::Upstream(message) => {
            tracing::error!(error = %message, "payment gateway call failed");
            ApiError::Upstream(message)
        }
        DomainError::Internal(message) => {
            tracing::error!(error = %message, "unexpected persistence failure");
            ApiError::Internal
        }
    }
}
