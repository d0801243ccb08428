use crate::payment::{Payment, PaymentStatus};
use crate::ports::BoxFuture;
use crate::DomainResult;

pub trait PaymentRepository: Send + Sync {
    fn create(&self, payment: &Payment) -> BoxFuture<'_, DomainResult<Payment>>;

    fn get(&self, payment_id: &str) -> BoxFuture<'_, DomainResult<Option<Payment>>>;

    /// Lookup by the external processor's intent identity, the only handle a
    /// webhook event carries.
    fn find_by_intent_id(&self, intent_id: &str) -> BoxFuture<'_, DomainResult<Option<Payment>>>;

    fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
    ) -> BoxFuture<'_, DomainResult<Payment>>;
}
