use crate::ports::BoxFuture;
use crate::reservation::{Reservation, ReservationStatus};
use crate::DomainResult;

pub trait ReservationRepository: Send + Sync {
    /// Insert a new reservation. Implementations enforce uniqueness of the
    /// idempotency key inside the same isolation scope as the insert and
    /// return `Conflict` when another reservation already bears it.
    fn create(&self, reservation: &Reservation) -> BoxFuture<'_, DomainResult<Reservation>>;

    fn get(&self, reservation_id: &str) -> BoxFuture<'_, DomainResult<Option<Reservation>>>;

    fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Reservation>>>;

    fn list_by_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Reservation>>>;

    /// Write the new status, stamping `updated_at` and, on `cancelled`,
    /// `cancelled_at`. Status preconditions live in the services.
    fn update_status(
        &self,
        reservation_id: &str,
        status: ReservationStatus,
    ) -> BoxFuture<'_, DomainResult<Reservation>>;
}
