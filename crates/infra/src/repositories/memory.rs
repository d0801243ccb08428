use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use musafir_domain::booking::{Booking, BookingStatus};
use musafir_domain::error::DomainError;
use musafir_domain::itinerary::{EditRecord, Itinerary, ItineraryStatus};
use musafir_domain::payment::{Payment, PaymentStatus};
use musafir_domain::ports::bookings::BookingRepository;
use musafir_domain::ports::itineraries::{ItineraryMutation, ItineraryRepository};
use musafir_domain::ports::payments::PaymentRepository;
use musafir_domain::ports::reservations::ReservationRepository;
use musafir_domain::ports::BoxFuture;
use musafir_domain::reservation::{Reservation, ReservationStatus};
use musafir_domain::util::now_ms;
use musafir_domain::DomainResult;

#[derive(Default)]
pub struct InMemoryItineraryRepository {
    store: Arc<RwLock<HashMap<String, Itinerary>>>,
}

impl InMemoryItineraryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItineraryRepository for InMemoryItineraryRepository {
    fn create(&self, itinerary: &Itinerary) -> BoxFuture<'_, DomainResult<Itinerary>> {
        let itinerary = itinerary.clone();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            if store.contains_key(&itinerary.itinerary_id) {
                return Err(DomainError::Conflict);
            }
            store.insert(itinerary.itinerary_id.clone(), itinerary.clone());
            Ok(itinerary)
        })
    }

    fn get(&self, itinerary_id: &str) -> BoxFuture<'_, DomainResult<Option<Itinerary>>> {
        let itinerary_id = itinerary_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&itinerary_id).cloned()) })
    }

    fn list_by_user(
        &self,
        user_id: &str,
        status: Option<ItineraryStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Itinerary>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut itineraries: Vec<_> = store
                .read()
                .await
                .values()
                .filter(|itinerary| itinerary.user_id == user_id)
                .filter(|itinerary| status.map_or(true, |status| itinerary.status == status))
                .cloned()
                .collect();
            itineraries.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.itinerary_id.cmp(&left.itinerary_id))
            });
            Ok(itineraries)
        })
    }

    fn update_in_transaction(
        &self,
        itinerary_id: &str,
        mutation: ItineraryMutation,
    ) -> BoxFuture<'_, DomainResult<(Itinerary, Vec<EditRecord>)>> {
        let itinerary_id = itinerary_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            // The write lock is held across the mutation, so concurrent
            // transactions against the same itinerary serialize and a failed
            // mutation leaves the stored document untouched.
            let mut store = store.write().await;
            let current = store
                .get(&itinerary_id)
                .cloned()
                .ok_or(DomainError::NotFound)?;
            let (updated, delta) = mutation(current)?;
            store.insert(itinerary_id, updated.clone());
            Ok((updated, delta))
        })
    }

    fn append_reservation(
        &self,
        itinerary_id: &str,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let itinerary_id = itinerary_id.to_string();
        let reservation_id = reservation_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let itinerary = store.get_mut(&itinerary_id).ok_or(DomainError::NotFound)?;
            if !itinerary.reservations.contains(&reservation_id) {
                itinerary.reservations.push(reservation_id);
            }
            itinerary.updated_at_ms = now_ms();
            Ok(())
        })
    }

    fn remove_reservation(
        &self,
        itinerary_id: &str,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let itinerary_id = itinerary_id.to_string();
        let reservation_id = reservation_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let itinerary = store.get_mut(&itinerary_id).ok_or(DomainError::NotFound)?;
            itinerary.reservations.retain(|id| id != &reservation_id);
            itinerary.updated_at_ms = now_ms();
            Ok(())
        })
    }

    fn set_status(
        &self,
        itinerary_id: &str,
        status: ItineraryStatus,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let itinerary_id = itinerary_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let itinerary = store.get_mut(&itinerary_id).ok_or(DomainError::NotFound)?;
            itinerary.status = status;
            itinerary.updated_at_ms = now_ms();
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct InMemoryReservationRepository {
    store: Arc<RwLock<HashMap<String, Reservation>>>,
    by_key: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReservationRepository for InMemoryReservationRepository {
    fn create(&self, reservation: &Reservation) -> BoxFuture<'_, DomainResult<Reservation>> {
        let reservation = reservation.clone();
        let store = self.store.clone();
        let by_key = self.by_key.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let mut by_key = by_key.write().await;
            if store.contains_key(&reservation.reservation_id) {
                return Err(DomainError::Conflict);
            }
            if let Some(key) = reservation.idempotency_key.as_ref() {
                if by_key.contains_key(key) {
                    return Err(DomainError::Conflict);
                }
                by_key.insert(key.clone(), reservation.reservation_id.clone());
            }
            store.insert(reservation.reservation_id.clone(), reservation.clone());
            Ok(reservation)
        })
    }

    fn get(&self, reservation_id: &str) -> BoxFuture<'_, DomainResult<Option<Reservation>>> {
        let reservation_id = reservation_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&reservation_id).cloned()) })
    }

    fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Reservation>>> {
        let key = key.to_string();
        let store = self.store.clone();
        let by_key = self.by_key.clone();
        Box::pin(async move {
            let store = store.read().await;
            let by_key = by_key.read().await;
            let Some(reservation_id) = by_key.get(&key) else {
                return Ok(None);
            };
            Ok(store.get(reservation_id).cloned())
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Reservation>>> {
        let user_id = user_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut reservations: Vec<_> = store
                .read()
                .await
                .values()
                .filter(|reservation| reservation.user_id == user_id)
                .cloned()
                .collect();
            reservations.sort_by(|left, right| {
                right
                    .created_at_ms
                    .cmp(&left.created_at_ms)
                    .then_with(|| right.reservation_id.cmp(&left.reservation_id))
            });
            Ok(reservations)
        })
    }

    fn update_status(
        &self,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> BoxFuture<'_, DomainResult<Reservation>> {
        let reservation_id = reservation_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let reservation = store
                .get_mut(&reservation_id)
                .ok_or(DomainError::NotFound)?;
            let now = now_ms();
            reservation.status = status;
            reservation.updated_at_ms = now;
            if status == ReservationStatus::Cancelled && reservation.cancelled_at_ms.is_none() {
                reservation.cancelled_at_ms = Some(now);
            }
            Ok(reservation.clone())
        })
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    store: Arc<RwLock<HashMap<String, Payment>>>,
    by_intent: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PaymentRepository for InMemoryPaymentRepository {
    fn create(&self, payment: &Payment) -> BoxFuture<'_, DomainResult<Payment>> {
        let payment = payment.clone();
        let store = self.store.clone();
        let by_intent = self.by_intent.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let mut by_intent = by_intent.write().await;
            if store.contains_key(&payment.payment_id)
                || by_intent.contains_key(&payment.intent_id)
            {
                return Err(DomainError::Conflict);
            }
            by_intent.insert(payment.intent_id.clone(), payment.payment_id.clone());
            store.insert(payment.payment_id.clone(), payment.clone());
            Ok(payment)
        })
    }

    fn get(&self, payment_id: &str) -> BoxFuture<'_, DomainResult<Option<Payment>>> {
        let payment_id = payment_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&payment_id).cloned()) })
    }

    fn find_by_intent_id(&self, intent_id: &str) -> BoxFuture<'_, DomainResult<Option<Payment>>> {
        let intent_id = intent_id.to_string();
        let store = self.store.clone();
        let by_intent = self.by_intent.clone();
        Box::pin(async move {
            let store = store.read().await;
            let by_intent = by_intent.read().await;
            let Some(payment_id) = by_intent.get(&intent_id) else {
                return Ok(None);
            };
            Ok(store.get(payment_id).cloned())
        })
    }

    fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> BoxFuture<'_, DomainResult<Payment>> {
        let payment_id = payment_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let payment = store.get_mut(&payment_id).ok_or(DomainError::NotFound)?;
            payment.status = status;
            payment.updated_at_ms = now_ms();
            Ok(payment.clone())
        })
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    store: Arc<RwLock<HashMap<String, Booking>>>,
    by_reservation: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookingRepository for InMemoryBookingRepository {
    fn create(&self, booking: &Booking) -> BoxFuture<'_, DomainResult<Booking>> {
        let booking = booking.clone();
        let store = self.store.clone();
        let by_reservation = self.by_reservation.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let mut by_reservation = by_reservation.write().await;
            if store.contains_key(&booking.booking_id)
                || by_reservation.contains_key(&booking.reservation_id)
            {
                return Err(DomainError::Conflict);
            }
            by_reservation.insert(booking.reservation_id.clone(), booking.booking_id.clone());
            store.insert(booking.booking_id.clone(), booking.clone());
            Ok(booking)
        })
    }

    fn get(&self, booking_id: &str) -> BoxFuture<'_, DomainResult<Option<Booking>>> {
        let booking_id = booking_id.to_string();
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.get(&booking_id).cloned()) })
    }

    fn find_by_reservation_id(
        &self,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Booking>>> {
        let reservation_id = reservation_id.to_string();
        let store = self.store.clone();
        let by_reservation = self.by_reservation.clone();
        Box::pin(async move {
            let store = store.read().await;
            let by_reservation = by_reservation.read().await;
            let Some(booking_id) = by_reservation.get(&reservation_id) else {
                return Ok(None);
            };
            Ok(store.get(booking_id).cloned())
        })
    }

    fn update_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
    ) -> BoxFuture<'_, DomainResult<Booking>> {
        let booking_id = booking_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut store = store.write().await;
            let booking = store.get_mut(&booking_id).ok_or(DomainError::NotFound)?;
            booking.status = status;
            if status == BookingStatus::Cancelled && booking.cancelled_at_ms.is_none() {
                booking.cancelled_at_ms = Some(now_ms());
            }
            Ok(booking.clone())
        })
    }
}
