use crate::booking::{Booking, BookingStatus};
use crate::ports::BoxFuture;
use crate::DomainResult;

pub trait BookingRepository: Send + Sync {
    /// Insert a new booking. One booking per reservation: a second insert for
    /// the same reservation id returns `Conflict`.
    fn create(&self, booking: &Booking) -> BoxFuture<'_, DomainResult<Booking>>;

    fn get(&self, booking_id: &str) -> BoxFuture<'_, DomainResult<Option<Booking>>>;

    fn find_by_reservation_id(
        &self,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Booking>>>;

    fn update_status(
        &self,
        booking_id: &str,
        status: BookingStatus,
    ) -> BoxFuture<'_, DomainResult<Booking>>;
}
