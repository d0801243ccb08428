use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::itinerary::ItineraryStatus;
use crate::payment::PaymentStatus;
use crate::ports::bookings::BookingRepository;
use crate::ports::itineraries::ItineraryRepository;
use crate::ports::payments::PaymentRepository;
use crate::ports::reservations::ReservationRepository;
use crate::reservation::ReservationStatus;
use crate::util::{now_ms, prefixed_id};
use crate::DomainResult;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for BookingStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err("unknown booking status"),
        }
    }
}

/// Immutable record of a completed purchase, except for the single
/// confirmed -> cancelled transition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub booking_id: String,
    pub itinerary_id: String,
    pub reservation_id: String,
    pub payment_id: String,
    pub user_id: String,
    pub status: BookingStatus,
    /// Provider booking ids, filled by a real supplier integration.
    #[serde(default)]
    pub provider_refs: Vec<String>,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at_ms: Option<i64>,
}

impl Booking {
    pub fn assert_owned_by(&self, actor: &ActorIdentity) -> DomainResult<()> {
        if self.user_id == actor.user_id {
            Ok(())
        } else {
            Err(DomainError::Forbidden)
        }
    }
}

#[derive(Clone)]
pub struct BookingService {
    itineraries: Arc<dyn ItineraryRepository>,
    reservations: Arc<dyn ReservationRepository>,
    payments: Arc<dyn PaymentRepository>,
    bookings: Arc<dyn BookingRepository>,
}

impl BookingService {
    pub fn new(
        itineraries: Arc<dyn ItineraryRepository>,
        reservations: Arc<dyn ReservationRepository>,
        payments: Arc<dyn PaymentRepository>,
        bookings: Arc<dyn BookingRepository>,
    ) -> Self {
        Self {
            itineraries,
            reservations,
            payments,
            bookings,
        }
    }

    /// Consume a paid reservation into a confirmed booking, advancing the
    /// reservation and itinerary to `booked`. The three writes form one
    /// logical transition over three documents without a shared transaction,
    /// so re-running with the same inputs must be safe: an existing booking
    /// for the reservation is returned (after re-asserting the status
    /// lockstep) instead of creating a duplicate.
    pub async fn finalize(
        &self,
        actor: ActorIdentity,
        itinerary_id: &str,
        reservation_id: &str,
        payment_id: &str,
    ) -> DomainResult<Booking> {
        let reservation = self
            .reservations
            .get(reservation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        let payment = self
            .payments
            .get(payment_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        reservation.assert_owned_by(&actor)?;
        payment.assert_owned_by(&actor)?;

        if payment.reservation_id != reservation.reservation_id {
            return Err(DomainError::Validation(
                "payment does not belong to the reservation".into(),
            ));
        }
        if reservation.itinerary_id != itinerary_id {
            return Err(DomainError::Validation(
                "reservation does not belong to the itinerary".into(),
            ));
        }
        // The single authoritative gate preventing unpaid bookings.
        if payment.status != PaymentStatus::Succeeded {
            return Err(DomainError::InvalidState("payment not succeeded".into()));
        }
        if matches!(
            reservation.status,
            ReservationStatus::Cancelled | ReservationStatus::Expired
        ) {
            return Err(DomainError::InvalidState(format!(
                "reservation is {}",
                reservation.status.as_str()
            )));
        }

        if let Some(existing) = self.bookings.find_by_reservation_id(reservation_id).await? {
            self.ensure_booked(itinerary_id, reservation_id).await?;
            return Ok(existing);
        }

        let booking = Booking {
            booking_id: prefixed_id("bk"),
            itinerary_id: itinerary_id.to_string(),
            reservation_id: reservation_id.to_string(),
            payment_id: payment_id.to_string(),
            user_id: actor.user_id,
            status: BookingStatus::Confirmed,
            provider_refs: Vec::new(),
            created_at_ms: now_ms(),
            cancelled_at_ms: None,
        };
        let booking = match self.bookings.create(&booking).await {
            Ok(booking) => booking,
            // Lost a double-finalize race; the first booking wins.
            Err(DomainError::Conflict) => self
                .bookings
                .find_by_reservation_id(reservation_id)
                .await?
                .ok_or(DomainError::Conflict)?,
            Err(err) => return Err(err),
        };

        self.ensure_booked(itinerary_id, reservation_id).await?;
        Ok(booking)
    }

    async fn ensure_booked(&self, itinerary_id: &str, reservation_id: &str) -> DomainResult<()> {
        let reservation = self
            .reservations
            .get(reservation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if reservation.status != ReservationStatus::Booked {
            self.reservations
                .update_status(reservation_id, ReservationStatus::Booked)
                .await?;
        }

        let itinerary = self
            .itineraries
            .get(itinerary_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if itinerary.status != ItineraryStatus::Booked {
            if !itinerary.status.can_transition_to(ItineraryStatus::Booked) {
                return Err(DomainError::InvalidState(format!(
                    "itinerary is {}",
                    itinerary.status.as_str()
                )));
            }
            self.itineraries
                .set_status(itinerary_id, ItineraryStatus::Booked)
                .await?;
        }
        Ok(())
    }

    /// Idempotent; does not reverse reservation or itinerary status.
    pub async fn cancel(&self, actor: &ActorIdentity, booking_id: &str) -> DomainResult<Booking> {
        let booking = self
            .bookings
            .get(booking_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        booking.assert_owned_by(actor)?;
        if booking.status == BookingStatus::Cancelled {
            return Ok(booking);
        }
        self.bookings
            .update_status(booking_id, BookingStatus::Cancelled)
            .await
    }

    pub async fn get(&self, actor: &ActorIdentity, booking_id: &str) -> DomainResult<Booking> {
        let booking = self
            .bookings
            .get(booking_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        booking.assert_owned_by(actor)?;
        Ok(booking)
    }
}
