use std::sync::Arc;

use serde_json::Value;
use surrealdb::engine::remote::ws::Client;
use surrealdb::Surreal;

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

/// Bounded optimistic retry for the customize transaction; each attempt
/// re-reads the document and commits only if the version is unchanged.
const TXN_MAX_ATTEMPTS: usize = 3;

/// Unique indexes back the idempotency-key and booking-per-reservation
/// guarantees; a violated index surfaces as `Conflict` through
/// `map_surreal_error`.
pub async fn ensure_schema(client: &Surreal<Client>) -> anyhow::Result<()> {
    client
        .query(
            "DEFINE INDEX IF NOT EXISTS itinerary_id_idx ON TABLE itinerary COLUMNS itinerary_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS reservation_id_idx ON TABLE reservation COLUMNS reservation_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS reservation_dedup_idx ON TABLE reservation COLUMNS dedup_key UNIQUE;
             DEFINE INDEX IF NOT EXISTS payment_id_idx ON TABLE payment COLUMNS payment_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS payment_intent_idx ON TABLE payment COLUMNS intent_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS booking_id_idx ON TABLE booking COLUMNS booking_id UNIQUE;
             DEFINE INDEX IF NOT EXISTS booking_reservation_idx ON TABLE booking COLUMNS reservation_id UNIQUE;",
        )
        .await?;
    Ok(())
}

fn map_surreal_error(err: surrealdb::Error) -> DomainError {
    let message = err.to_string().to_lowercase();
    if message.contains("already exists")
        || message.contains("duplicate")
        || message.contains("unique")
        || message.contains("conflict")
    {
        return DomainError::Conflict;
    }
    DomainError::Internal(format!("surreal query failed: {message}"))
}

fn decode_docs<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> DomainResult<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            let doc = row
                .get("doc")
                .cloned()
                .ok_or_else(|| DomainError::Internal("row missing doc column".to_string()))?;
            serde_json::from_value::<T>(doc)
                .map_err(|err| DomainError::Internal(format!("invalid stored document: {err}")))
        })
        .collect()
}

fn to_doc<T: serde::Serialize>(value: &T) -> DomainResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| DomainError::Internal(format!("failed to serialize document: {err}")))
}

pub struct SurrealItineraryRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealItineraryRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl ItineraryRepository for SurrealItineraryRepository {
    fn create(&self, itinerary: &Itinerary) -> BoxFuture<'_, DomainResult<Itinerary>> {
        let itinerary = itinerary.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let doc = to_doc(&itinerary)?;
            client
                .query(
                    "CREATE itinerary SET \
                        itinerary_id = $itinerary_id, \
                        user_id = $user_id, \
                        status = $status, \
                        created_at_ms = $created_at_ms, \
                        version = 0, \
                        doc = $doc;",
                )
                .bind(("itinerary_id", itinerary.itinerary_id.clone()))
                .bind(("user_id", itinerary.user_id.clone()))
                .bind(("status", itinerary.status.as_str()))
                .bind(("created_at_ms", itinerary.created_at_ms))
                .bind(("doc", doc))
                .await
                .map_err(map_surreal_error)?;
            Ok(itinerary)
        })
    }

    fn get(&self, itinerary_id: &str) -> BoxFuture<'_, DomainResult<Option<Itinerary>>> {
        let itinerary_id = itinerary_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT doc FROM itinerary WHERE itinerary_id = $itinerary_id LIMIT 1")
                .bind(("itinerary_id", itinerary_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Itinerary>(rows)?.pop())
        })
    }

    fn list_by_user(
        &self,
        user_id: &str,
        status: Option<ItineraryStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Itinerary>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = match status {
                Some(status) => client
                    .query(
                        "SELECT doc FROM itinerary \
                         WHERE user_id = $user_id AND status = $status \
                         ORDER BY created_at_ms DESC",
                    )
                    .bind(("user_id", user_id))
                    .bind(("status", status.as_str()))
                    .await,
                None => client
                    .query(
                        "SELECT doc FROM itinerary WHERE user_id = $user_id \
                         ORDER BY created_at_ms DESC",
                    )
                    .bind(("user_id", user_id))
                    .await,
            }
            .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            decode_docs::<Itinerary>(rows)
        })
    }

    fn update_in_transaction(
        &self,
        itinerary_id: &str,
        mutation: ItineraryMutation,
    ) -> BoxFuture<'_, DomainResult<(Itinerary, Vec<EditRecord>)>> {
        let itinerary_id = itinerary_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            for _ in 0..TXN_MAX_ATTEMPTS {
                let mut response = client
                    .query(
                        "SELECT doc, version FROM itinerary \
                         WHERE itinerary_id = $itinerary_id LIMIT 1",
                    )
                    .bind(("itinerary_id", itinerary_id.clone()))
                    .await
                    .map_err(map_surreal_error)?;
                let rows: Vec<Value> = response
                    .take(0)
                    .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
                let Some(row) = rows.into_iter().next() else {
                    return Err(DomainError::NotFound);
                };
                let version = row.get("version").and_then(Value::as_i64).unwrap_or(0);
                let current: Itinerary = serde_json::from_value(
                    row.get("doc")
                        .cloned()
                        .ok_or_else(|| DomainError::Internal("row missing doc column".into()))?,
                )
                .map_err(|err| {
                    DomainError::Internal(format!("invalid stored document: {err}"))
                })?;

                let (updated, delta) = mutation(current)?;
                let doc = to_doc(&updated)?;

                let mut response = client
                    .query(
                        "UPDATE itinerary SET \
                            doc = $doc, \
                            status = $status, \
                            version = version + 1 \
                         WHERE itinerary_id = $itinerary_id AND version = $version \
                         RETURN AFTER;",
                    )
                    .bind(("doc", doc))
                    .bind(("status", updated.status.as_str()))
                    .bind(("itinerary_id", itinerary_id.clone()))
                    .bind(("version", version))
                    .await
                    .map_err(map_surreal_error)?;
                let committed: Vec<Value> = response
                    .take(0)
                    .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
                if !committed.is_empty() {
                    return Ok((updated, delta));
                }
                // Version moved underneath us; re-read and re-apply.
            }
            Err(DomainError::Conflict)
        })
    }

    fn append_reservation(
        &self,
        itinerary_id: &str,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let itinerary_id = itinerary_id.to_string();
        let reservation_id = reservation_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE itinerary SET \
                        doc.reservations = array::union(doc.reservations, [$reservation_id]), \
                        doc.updated_at_ms = $now \
                     WHERE itinerary_id = $itinerary_id RETURN AFTER;",
                )
                .bind(("reservation_id", reservation_id))
                .bind(("now", now_ms()))
                .bind(("itinerary_id", itinerary_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            if rows.is_empty() {
                return Err(DomainError::NotFound);
            }
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
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE itinerary SET \
                        doc.reservations -= $reservation_id, \
                        doc.updated_at_ms = $now \
                     WHERE itinerary_id = $itinerary_id RETURN AFTER;",
                )
                .bind(("reservation_id", reservation_id))
                .bind(("now", now_ms()))
                .bind(("itinerary_id", itinerary_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            if rows.is_empty() {
                return Err(DomainError::NotFound);
            }
            Ok(())
        })
    }

    fn set_status(
        &self,
        itinerary_id: &str,
        status: ItineraryStatus,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let itinerary_id = itinerary_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE itinerary SET \
                        status = $status, \
                        doc.status = $status, \
                        doc.updated_at_ms = $now \
                     WHERE itinerary_id = $itinerary_id RETURN AFTER;",
                )
                .bind(("status", status.as_str()))
                .bind(("now", now_ms()))
                .bind(("itinerary_id", itinerary_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            if rows.is_empty() {
                return Err(DomainError::NotFound);
            }
            Ok(())
        })
    }
}

pub struct SurrealReservationRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealReservationRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl ReservationRepository for SurrealReservationRepository {
    fn create(&self, reservation: &Reservation) -> BoxFuture<'_, DomainResult<Reservation>> {
        let reservation = reservation.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let doc = to_doc(&reservation)?;
            // Rows without a caller-supplied key index under their own id so
            // the unique index never pairs two keyless holds.
            let dedup_key = reservation
                .idempotency_key
                .clone()
                .unwrap_or_else(|| reservation.reservation_id.clone());
            client
                .query(
                    "CREATE reservation SET \
                        reservation_id = $reservation_id, \
                        user_id = $user_id, \
                        dedup_key = $dedup_key, \
                        created_at_ms = $created_at_ms, \
                        doc = $doc;",
                )
                .bind(("reservation_id", reservation.reservation_id.clone()))
                .bind(("user_id", reservation.user_id.clone()))
                .bind(("dedup_key", dedup_key))
                .bind(("created_at_ms", reservation.created_at_ms))
                .bind(("doc", doc))
                .await
                .map_err(map_surreal_error)?;
            Ok(reservation)
        })
    }

    fn get(&self, reservation_id: &str) -> BoxFuture<'_, DomainResult<Option<Reservation>>> {
        let reservation_id = reservation_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT doc FROM reservation WHERE reservation_id = $reservation_id LIMIT 1",
                )
                .bind(("reservation_id", reservation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Reservation>(rows)?.pop())
        })
    }

    fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Reservation>>> {
        let key = key.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT doc FROM reservation \
                     WHERE dedup_key = $key AND doc.idempotency_key = $key LIMIT 1",
                )
                .bind(("key", key))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Reservation>(rows)?.pop())
        })
    }

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Reservation>>> {
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT doc FROM reservation WHERE user_id = $user_id \
                     ORDER BY created_at_ms DESC",
                )
                .bind(("user_id", user_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            decode_docs::<Reservation>(rows)
        })
    }

    fn update_status(
        &self,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> BoxFuture<'_, DomainResult<Reservation>> {
        let reservation_id = reservation_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let query = if status == ReservationStatus::Cancelled {
                "UPDATE reservation SET \
                    doc.status = $status, \
                    doc.updated_at_ms = $now, \
                    doc.cancelled_at_ms = doc.cancelled_at_ms ?? $now \
                 WHERE reservation_id = $reservation_id RETURN AFTER;"
            } else {
                "UPDATE reservation SET \
                    doc.status = $status, \
                    doc.updated_at_ms = $now \
                 WHERE reservation_id = $reservation_id RETURN AFTER;"
            };
            let mut response = client
                .query(query)
                .bind(("status", status.as_str()))
                .bind(("now", now_ms()))
                .bind(("reservation_id", reservation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            decode_docs::<Reservation>(rows)?
                .pop()
                .ok_or(DomainError::NotFound)
        })
    }
}

pub struct SurrealPaymentRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealPaymentRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl PaymentRepository for SurrealPaymentRepository {
    fn create(&self, payment: &Payment) -> BoxFuture<'_, DomainResult<Payment>> {
        let payment = payment.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let doc = to_doc(&payment)?;
            client
                .query(
                    "CREATE payment SET \
                        payment_id = $payment_id, \
                        intent_id = $intent_id, \
                        user_id = $user_id, \
                        created_at_ms = $created_at_ms, \
                        doc = $doc;",
                )
                .bind(("payment_id", payment.payment_id.clone()))
                .bind(("intent_id", payment.intent_id.clone()))
                .bind(("user_id", payment.user_id.clone()))
                .bind(("created_at_ms", payment.created_at_ms))
                .bind(("doc", doc))
                .await
                .map_err(map_surreal_error)?;
            Ok(payment)
        })
    }

    fn get(&self, payment_id: &str) -> BoxFuture<'_, DomainResult<Option<Payment>>> {
        let payment_id = payment_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT doc FROM payment WHERE payment_id = $payment_id LIMIT 1")
                .bind(("payment_id", payment_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Payment>(rows)?.pop())
        })
    }

    fn find_by_intent_id(&self, intent_id: &str) -> BoxFuture<'_, DomainResult<Option<Payment>>> {
        let intent_id = intent_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT doc FROM payment WHERE intent_id = $intent_id LIMIT 1")
                .bind(("intent_id", intent_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Payment>(rows)?.pop())
        })
    }

    fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> BoxFuture<'_, DomainResult<Payment>> {
        let payment_id = payment_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "UPDATE payment SET \
                        doc.status = $status, \
                        doc.updated_at_ms = $now \
                     WHERE payment_id = $payment_id RETURN AFTER;",
                )
                .bind(("status", status.as_str()))
                .bind(("now", now_ms()))
                .bind(("payment_id", payment_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            decode_docs::<Payment>(rows)?
                .pop()
                .ok_or(DomainError::NotFound)
        })
    }
}

pub struct SurrealBookingRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealBookingRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }
}

impl BookingRepository for SurrealBookingRepository {
    fn create(&self, booking: &Booking) -> BoxFuture<'_, DomainResult<Booking>> {
        let booking = booking.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let doc = to_doc(&booking)?;
            client
                .query(
                    "CREATE booking SET \
                        booking_id = $booking_id, \
                        reservation_id = $reservation_id, \
                        user_id = $user_id, \
                        created_at_ms = $created_at_ms, \
                        doc = $doc;",
                )
                .bind(("booking_id", booking.booking_id.clone()))
                .bind(("reservation_id", booking.reservation_id.clone()))
                .bind(("user_id", booking.user_id.clone()))
                .bind(("created_at_ms", booking.created_at_ms))
                .bind(("doc", doc))
                .await
                .map_err(map_surreal_error)?;
            Ok(booking)
        })
    }

    fn get(&self, booking_id: &str) -> BoxFuture<'_, DomainResult<Option<Booking>>> {
        let booking_id = booking_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT doc FROM booking WHERE booking_id = $booking_id LIMIT 1")
                .bind(("booking_id", booking_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Booking>(rows)?.pop())
        })
    }

    fn find_by_reservation_id(
        &self,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Booking>>> {
        let reservation_id = reservation_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT doc FROM booking WHERE reservation_id = $reservation_id LIMIT 1")
                .bind(("reservation_id", reservation_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            Ok(decode_docs::<Booking>(rows)?.pop())
        })
    }

    fn update_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
    ) -> BoxFuture<'_, DomainResult<Booking>> {
        let booking_id = booking_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let query = if status == BookingStatus::Cancelled {
                "UPDATE booking SET \
                    doc.status = $status, \
                    doc.cancelled_at_ms = doc.cancelled_at_ms ?? $now \
                 WHERE booking_id = $booking_id RETURN AFTER;"
            } else {
                "UPDATE booking SET doc.status = $status \
                 WHERE booking_id = $booking_id RETURN AFTER;"
            };
            let mut response = client
                .query(query)
                .bind(("status", status.as_str()))
                .bind(("now", now_ms()))
                .bind(("booking_id", booking_id))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| DomainError::Internal(format!("invalid query result: {err}")))?;
            decode_docs::<Booking>(rows)?
                .pop()
                .ok_or(DomainError::NotFound)
        })
    }
}
