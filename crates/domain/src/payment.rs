use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::ports::gateway::{GatewayError, GatewayEvent, GatewayEventKind, PaymentGateway};
use crate::ports::payments::PaymentRepository;
use crate::ports::reservations::ReservationRepository;
use crate::reservation::ReservationStatus;
use crate::util::{now_ms, prefixed_id};
use crate::DomainResult;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl FromStr for PaymentStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err("unknown payment status"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub payment_id: String,
    pub reservation_id: String,
    pub user_id: String,
    pub status: PaymentStatus,
    /// External processor's intent identity; the only handle webhook events
    /// carry back.
    pub intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Payment {
    pub fn assert_owned_by(&self, actor: &ActorIdentity) -> DomainResult<()> {
        if self.user_id == actor.user_id {
            Ok(())
        } else {
            Err(DomainError::Forbidden)
        }
    }
}

#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub reservation_id: String,
    /// Minor currency units, forwarded verbatim; the caller supplies the
    /// reservation's own recorded total and this service never recomputes it.
    pub amount: i64,
    pub currency: String,
}

#[derive(Clone, Debug)]
pub struct CheckoutReceipt {
    pub payment: Payment,
    pub client_secret: String,
}

/// What applying a webhook event actually did; the caller records it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    AlreadyApplied,
    UnknownIntent,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already_applied",
            Self::UnknownIntent => "unknown_intent",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    reservations: Arc<dyn ReservationRepository>,
    payments: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        payments: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            reservations,
            payments,
            gateway,
        }
    }

    pub async fn checkout(
        &self,
        actor: ActorIdentity,
        request: CheckoutRequest,
    ) -> DomainResult<CheckoutReceipt> {
        let request = validate_checkout_request(request)?;
        let reservation = self
            .reservations
            .get(&request.reservation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        reservation.assert_owned_by(&actor)?;

        if reservation.status != ReservationStatus::Held {
            return Err(DomainError::InvalidState(format!(
                "reservation is {}; payment requires a held reservation",
                reservation.status.as_str()
            )));
        }
        // The stored status never auto-transitions at expiry, so the hold
        // must be re-validated here rather than trusted.
        if reservation.is_lapsed(now_ms()) {
            return Err(DomainError::InvalidState(
                "reservation hold has expired".into(),
            ));
        }

        let intent = self
            .gateway
            .create_intent(
                request.amount,
                &request.currency,
                &reservation.reservation_id,
                &actor.user_id,
            )
            .await
            .map_err(map_gateway_error)?;

        let now = now_ms();
        let payment = Payment {
            payment_id: prefixed_id("pay"),
            reservation_id: reservation.reservation_id.clone(),
            user_id: actor.user_id,
            status: PaymentStatus::Created,
            intent_id: intent.intent_id,
            amount: request.amount,
            currency: request.currency,
            created_at_ms: now,
            updated_at_ms: now,
        };
        let payment = self.payments.create(&payment).await?;

        Ok(CheckoutReceipt {
            payment,
            client_secret: intent.client_secret,
        })
    }

    /// Apply an authenticated gateway event. Delivery is at-least-once and
    /// possibly out of order, so every branch is idempotent: a terminal
    /// payment is never advanced again and re-applied events no-op.
    pub async fn apply_event(&self, event: &GatewayEvent) -> DomainResult<WebhookOutcome> {
        match event.kind {
            GatewayEventKind::IntentSucceeded => self.apply_succeeded(&event.intent_id).await,
            GatewayEventKind::IntentFailed => self.apply_failed(&event.intent_id).await,
            GatewayEventKind::Other => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn apply_succeeded(&self, intent_id: &str) -> DomainResult<WebhookOutcome> {
        let Some(payment) = self.payments.find_by_intent_id(intent_id).await? else {
            return Ok(WebhookOutcome::UnknownIntent);
        };
        if payment.status.is_terminal() {
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        self.payments
            .update_status(&payment.payment_id, PaymentStatus::Succeeded)
            .await?;

        let reservation = self
            .reservations
            .get(&payment.reservation_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        if reservation.status == ReservationStatus::Held {
            self.reservations
                .update_status(&reservation.reservation_id, ReservationStatus::Paid)
                .await?;
        }
        Ok(WebhookOutcome::Applied)
    }

    async fn apply_failed(&self, intent_id: &str) -> DomainResult<WebhookOutcome> {
        let Some(payment) = self.payments.find_by_intent_id(intent_id).await? else {
            return Ok(WebhookOutcome::UnknownIntent);
        };
        if payment.status.is_terminal() {
            return Ok(WebhookOutcome::AlreadyApplied);
        }
        self.payments
            .update_status(&payment.payment_id, PaymentStatus::Failed)
            .await?;
        // The reservation stays held; the user may retry checkout.
        Ok(WebhookOutcome::Applied)
    }
}

fn map_gateway_error(err: GatewayError) -> DomainError {
    match err {
        GatewayError::Request(message) => DomainError::Upstream(message),
        GatewayError::Signature => DomainError::Unauthorized,
        GatewayError::Payload(message) => DomainError::Validation(message),
    }
}

fn validate_checkout_request(request: CheckoutRequest) -> Result<CheckoutRequest, DomainError> {
    if request.reservation_id.trim().is_empty() {
        return Err(DomainError::Validation("reservation_id is required".into()));
    }
    if request.amount <= 0 {
        return Err(DomainError::Validation(
            "amount must be a positive number of minor currency units".into(),
        ));
    }
    let currency = request.currency.trim().to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(DomainError::Validation(
            "currency must be a 3-letter code".into(),
        ));
    }
    Ok(CheckoutRequest {
        currency,
        ..request
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_requires_positive_amount() {
        let request = CheckoutRequest {
            reservation_id: "res_1".to_string(),
            amount: 0,
            currency: "INR".to_string(),
        };
        assert!(validate_checkout_request(request).is_err());
    }

    #[test]
    fn checkout_normalizes_currency() {
        let request = CheckoutRequest {
            reservation_id: "res_1".to_string(),
            amount: 2500,
            currency: "inr".to_string(),
        };
        let request = validate_checkout_request(request).expect("valid");
        assert_eq!(request.currency, "INR");
    }

    #[test]
    fn checkout_rejects_malformed_currency() {
        let request = CheckoutRequest {
            reservation_id: "res_1".to_string(),
            amount: 2500,
            currency: "rupees".to_string(),
        };
        assert!(validate_checkout_request(request).is_err());
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(!PaymentStatus::Created.is_terminal());
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
