use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::idempotency::IdempotencyResolver;
use crate::identity::ActorIdentity;
use crate::itinerary::Itinerary;
use crate::ports::itineraries::ItineraryRepository;
use crate::ports::reservations::ReservationRepository;
use crate::util::{now_ms, prefixed_id};
use crate::DomainResult;

pub const DEFAULT_HOLD_TTL_MINUTES: i64 = 30;
pub const MIN_HOLD_TTL_MINUTES: i64 = 1;
pub const MAX_HOLD_TTL_MINUTES: i64 = 720;
pub const DEFAULT_CURRENCY: &str = "INR";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Paid,
    Booked,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Paid => "paid",
            Self::Booked => "booked",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "held" => Ok(Self::Held),
            "paid" => Ok(Self::Paid),
            "booked" => Ok(Self::Booked),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err("unknown reservation status"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReservationItemRequest {
    #[serde(rename = "type")]
    pub item_type: String,
    pub provider_quote_id: String,
    /// Minor currency units; resolved from booking options when absent.
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

/// Line item after amount resolution. `hold_id` is a synthetic token carried
/// for traceability only; it reserves no provider inventory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResolvedItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub provider_quote_id: String,
    pub amount: i64,
    pub currency: String,
    pub hold_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub reservation_id: String,
    pub itinerary_id: String,
    pub user_id: String,
    pub items: Vec<ResolvedItem>,
    pub total_amount: i64,
    pub currency: String,
    pub status: ReservationStatus,
    pub expires_at_ms: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Reservation {
    pub fn assert_owned_by(&self, actor: &ActorIdentity) -> DomainResult<()> {
        if self.user_id == actor.user_id {
            Ok(())
        } else {
            Err(DomainError::Forbidden)
        }
    }

    /// A hold past its expiry is advisory-lapsed even though the stored
    /// status stays `held`; consuming paths must re-check before trusting it.
    pub fn is_lapsed(&self, now_ms: i64) -> bool {
        self.status == ReservationStatus::Held && now_ms > self.expires_at_ms
    }
}

#[derive(Clone, Debug)]
pub struct HoldRequest {
    pub items: Vec<ReservationItemRequest>,
    pub hold_ttl_minutes: Option<i64>,
    pub idempotency_key: Option<String>,
}

#[derive(Clone)]
pub struct HoldService {
    itineraries: Arc<dyn ItineraryRepository>,
    reservations: Arc<dyn ReservationRepository>,
    resolver: IdempotencyResolver,
}

impl HoldService {
    pub fn new(
        itineraries: Arc<dyn ItineraryRepository>,
        reservations: Arc<dyn ReservationRepository>,
    ) -> Self {
        let resolver = IdempotencyResolver::new(reservations.clone());
        Self {
            itineraries,
            reservations,
            resolver,
        }
    }

    pub async fn reserve(
        &self,
        actor: ActorIdentity,
        itinerary_id: &str,
        request: HoldRequest,
    ) -> DomainResult<Reservation> {
        let request = validate_hold_request(request)?;
        let itinerary = self
            .itineraries
            .get(itinerary_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        itinerary.assert_owned_by(&actor)?;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.resolver.resolve(key).await? {
                return Ok(existing);
            }
        }

        let now = now_ms();
        let items = resolve_items(&itinerary, &request.items);
        let total_amount = items.iter().map(|item| item.amount).sum();
        let currency = items
            .first()
            .map(|item| item.currency.clone())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let ttl_minutes = clamp_hold_ttl(request.hold_ttl_minutes);

        let reservation = Reservation {
            reservation_id: prefixed_id("res"),
            itinerary_id: itinerary.itinerary_id.clone(),
            user_id: actor.user_id,
            items,
            total_amount,
            currency,
            status: ReservationStatus::Held,
            expires_at_ms: now + ttl_minutes * 60_000,
            created_at_ms: now,
            updated_at_ms: now,
            cancelled_at_ms: None,
            idempotency_key: request.idempotency_key.clone(),
        };

        let reservation = match self.reservations.create(&reservation).await {
            Ok(reservation) => reservation,
            // Lost a first-submission race on the idempotency key; the
            // winner's reservation is the caller's reservation.
            Err(DomainError::Conflict) => {
                if let Some(key) = request.idempotency_key.as_deref() {
                    if let Some(existing) = self.resolver.resolve(key).await? {
                        return Ok(existing);
                    }
                }
                return Err(DomainError::Conflict);
            }
            Err(err) => return Err(err),
        };

        self.itineraries
            .append_reservation(itinerary_id, &reservation.reservation_id)
            .await?;

        Ok(reservation)
    }

    pub async fn cancel(
        &self,
        actor: &ActorIdentity,
        reservation_id: &str,
    ) -> DomainResult<Reservation> {
        let reservation = self
            .reservations
            .get(reservation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        reservation.assert_owned_by(actor)?;

        match reservation.status {
            ReservationStatus::Cancelled | ReservationStatus::Expired => Ok(reservation),
            ReservationStatus::Held => {
                let cancelled = self
                    .reservations
                    .update_status(reservation_id, ReservationStatus::Cancelled)
                    .await?;
                self.itineraries
                    .remove_reservation(&reservation.itinerary_id, reservation_id)
                    .await?;
                Ok(cancelled)
            }
            ReservationStatus::Paid | ReservationStatus::Booked => {
                Err(DomainError::InvalidState(format!(
                    "reservation is {}; only held reservations can be cancelled",
                    reservation.status.as_str()
                )))
            }
        }
    }

    pub async fn get(
        &self,
        actor: &ActorIdentity,
        reservation_id: &str,
    ) -> DomainResult<Reservation> {
        let reservation = self
            .reservations
            .get(reservation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        reservation.assert_owned_by(actor)?;
        Ok(reservation)
    }

    pub async fn list(&self, actor: &ActorIdentity) -> DomainResult<Vec<Reservation>> {
        self.reservations.list_by_user(&actor.user_id).await
    }
}

pub fn clamp_hold_ttl(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_HOLD_TTL_MINUTES)
        .clamp(MIN_HOLD_TTL_MINUTES, MAX_HOLD_TTL_MINUTES)
}

/// Per-item amount resolution: an explicit amount wins; otherwise the quote
/// is matched against every offer list by quote id or offer id; unmatched
/// items resolve to zero rather than failing, surfaced to the caller through
/// the returned item.
pub fn resolve_items(itinerary: &Itinerary, items: &[ReservationItemRequest]) -> Vec<ResolvedItem> {
    items
        .iter()
        .map(|item| {
            let amount = item.amount.unwrap_or_else(|| {
                itinerary
                    .find_offer(&item.provider_quote_id)
                    .map(|offer| offer.amount)
                    .unwrap_or(0)
            });
            ResolvedItem {
                item_type: item.item_type.clone(),
                provider_quote_id: item.provider_quote_id.clone(),
                amount,
                currency: item
                    .currency
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                hold_id: prefixed_id("hold"),
            }
        })
        .collect()
}

fn validate_hold_request(request: HoldRequest) -> Result<HoldRequest, DomainError> {
    if request.items.is_empty() {
        return Err(DomainError::Validation(
            "at least one item is required".into(),
        ));
    }
    for item in &request.items {
        if item.item_type.trim().is_empty() {
            return Err(DomainError::Validation("item type is required".into()));
        }
        if item.provider_quote_id.trim().is_empty() {
            return Err(DomainError::Validation(
                "provider_quote_id is required".into(),
            ));
        }
        if let Some(amount) = item.amount {
            if amount < 0 {
                return Err(DomainError::Validation(
                    "item amount cannot be negative".into(),
                ));
            }
        }
    }
    let HoldRequest {
        items,
        hold_ttl_minutes,
        idempotency_key,
    } = request;
    let idempotency_key = idempotency_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    Ok(HoldRequest {
        items,
        hold_ttl_minutes,
        idempotency_key,
    })
}
