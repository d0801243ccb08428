use crate::itinerary::{EditRecord, Itinerary, ItineraryStatus};
use crate::ports::BoxFuture;
use crate::DomainResult;

/// Pure mutation applied to the itinerary document inside one store
/// transaction: current state in, new state plus edit deltas out. Must not
/// perform I/O; the store layer may re-invoke it on commit conflict.
pub type ItineraryMutation =
    Box<dyn Fn(Itinerary) -> DomainResult<(Itinerary, Vec<EditRecord>)> + Send + Sync>;

pub trait ItineraryRepository: Send + Sync {
    fn create(&self, itinerary: &Itinerary) -> BoxFuture<'_, DomainResult<Itinerary>>;

    fn get(&self, itinerary_id: &str) -> BoxFuture<'_, DomainResult<Option<Itinerary>>>;

    fn list_by_user(
        &self,
        user_id: &str,
        status: Option<ItineraryStatus>,
    ) -> BoxFuture<'_, DomainResult<Vec<Itinerary>>>;

    /// Run `mutation` against the current document and commit the result
    /// atomically. Concurrent transactions against the same itinerary
    /// serialize; the committed document and the mutation's edit deltas are
    /// returned.
    fn update_in_transaction(
        &self,
        itinerary_id: &str,
        mutation: ItineraryMutation,
    ) -> BoxFuture<'_, DomainResult<(Itinerary, Vec<EditRecord>)>>;

    fn append_reservation(
        &self,
        itinerary_id: &str,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn remove_reservation(
        &self,
        itinerary_id: &str,
        reservation_id: &str,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn set_status(
        &self,
        itinerary_id: &str,
        status: ItineraryStatus,
    ) -> BoxFuture<'_, DomainResult<()>>;
}
