use std::sync::Arc;

use crate::ports::reservations::ReservationRepository;
use crate::reservation::Reservation;
use crate::DomainResult;

/// Deduplicates hold creation by caller-supplied key: a key that already
/// names a reservation short-circuits to it. The resolver alone cannot stop
/// two concurrent first submissions of the same key; the reservation
/// repository's create enforces key uniqueness inside its own isolation
/// scope, and the hold manager falls back to this lookup when that insert
/// reports a conflict.
#[derive(Clone)]
pub struct IdempotencyResolver {
    reservations: Arc<dyn ReservationRepository>,
}

impl IdempotencyResolver {
    pub fn new(reservations: Arc<dyn ReservationRepository>) -> Self {
        Self { reservations }
    }

    pub async fn resolve(&self, key: &str) -> DomainResult<Option<Reservation>> {
        let key = key.trim();
        if key.is_empty() {
            return Ok(None);
        }
        self.reservations.find_by_idempotency_key(key).await
    }
}
