use thiserror::Error;

use crate::ports::BoxFuture;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("invalid webhook signature")]
    Signature,
    #[error("malformed webhook payload: {0}")]
    Payload(String),
}

/// Payment intent opened with the external processor. `client_secret` is the
/// continuation token the client completes payment with.
#[derive(Clone, Debug)]
pub struct GatewayIntent {
    pub intent_id: String,
    pub client_secret: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayEventKind {
    IntentSucceeded,
    IntentFailed,
    /// Any event kind this service does not consume.
    Other,
}

#[derive(Clone, Debug)]
pub struct GatewayEvent {
    pub kind: GatewayEventKind,
    pub intent_id: String,
    pub event_type: String,
}

pub trait PaymentGateway: Send + Sync {
    /// Open an intent for `amount` minor currency units.
    fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        reservation_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, Result<GatewayIntent, GatewayError>>;

    /// Authenticate an inbound webhook against the processor's signature
    /// scheme and decode it. Pure; no I/O.
    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<GatewayEvent, GatewayError>;
}
