use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use musafir_domain::ports::gateway::{
    GatewayError, GatewayEvent, GatewayEventKind, GatewayIntent, PaymentGateway,
};
use musafir_domain::ports::BoxFuture;
use musafir_domain::util::now_ms;

use crate::config::AppConfig;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER_TIMESTAMP: &str = "t";
const SIGNATURE_HEADER_SCHEME: &str = "v1";
const EVENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
const EVENT_INTENT_FAILED: &str = "payment_intent.payment_failed";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
}

impl GatewayConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_base: config.stripe_api_base.clone(),
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            signature_tolerance_secs: config.stripe_signature_tolerance_secs,
        }
    }
}

/// Stripe adapter: opens payment intents over HTTP and authenticates inbound
/// webhooks against the `t=<ts>,v1=<hex>` signature scheme. The API base is
/// configurable so tests can point it at a local stub.
pub struct StripeGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl StripeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn intents_url(&self) -> String {
        format!(
            "{}/v1/payment_intents",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

impl PaymentGateway for StripeGateway {
    fn create_intent(
        &self,
        amount: i64,
        currency: &str,
        reservation_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, Result<GatewayIntent, GatewayError>> {
        let url = self.intents_url();
        let params = [
            ("amount", amount.to_string()),
            ("currency", currency.to_lowercase()),
            ("metadata[reservation_id]", reservation_id.to_string()),
            ("metadata[user_id]", user_id.to_string()),
        ];
        Box::pin(async move {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.secret_key)
                .form(&params)
                .send()
                .await
                .map_err(|err| GatewayError::Request(err.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GatewayError::Request(format!(
                    "payment intent creation returned {status}: {body}"
                )));
            }

            let intent: IntentResponse = response
                .json()
                .await
                .map_err(|err| GatewayError::Request(err.to_string()))?;
            Ok(GatewayIntent {
                intent_id: intent.id,
                client_secret: intent.client_secret,
            })
        })
    }

    fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<GatewayEvent, GatewayError> {
        let (timestamp, signatures) = parse_signature_header(signature_header)?;

        let age_secs = (now_ms() / 1000 - timestamp).abs();
        if age_secs > self.config.signature_tolerance_secs {
            return Err(GatewayError::Signature);
        }

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|_| GatewayError::Signature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        let verified = signatures.iter().any(|candidate| {
            hex::decode(candidate)
                .ok()
                .is_some_and(|decoded| mac.clone().verify_slice(&decoded).is_ok())
        });
        if !verified {
            return Err(GatewayError::Signature);
        }

        parse_event(payload)
    }
}

fn parse_signature_header(header: &str) -> Result<(i64, Vec<String>), GatewayError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        let key = it.next().unwrap_or_default();
        let value = it.next().unwrap_or_default();
        match key {
            SIGNATURE_HEADER_TIMESTAMP => timestamp = value.parse::<i64>().ok(),
            SIGNATURE_HEADER_SCHEME => signatures.push(value.to_string()),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(GatewayError::Signature)?;
    if signatures.is_empty() {
        return Err(GatewayError::Signature);
    }
    Ok((timestamp, signatures))
}

fn parse_event(payload: &[u8]) -> Result<GatewayEvent, GatewayError> {
    let envelope: WebhookEnvelope = serde_json::from_slice(payload)
        .map_err(|err| GatewayError::Payload(err.to_string()))?;
    let kind = match envelope.event_type.as_str() {
        EVENT_INTENT_SUCCEEDED => GatewayEventKind::IntentSucceeded,
        EVENT_INTENT_FAILED => GatewayEventKind::IntentFailed,
        _ => GatewayEventKind::Other,
    };
    Ok(GatewayEvent {
        kind,
        intent_id: envelope.data.object.id,
        event_type: envelope.event_type,
    })
}

/// Produce the signature header for `payload` at `timestamp`. Counterpart of
/// `verify_and_parse`, used by tests and local webhook tooling.
pub fn webhook_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(GatewayConfig {
            api_base: "http://127.0.0.1:0".to_string(),
            secret_key: "sk_test_x".to_string(),
            webhook_secret: "whsec_test".to_string(),
            signature_tolerance_secs: 300,
        })
    }

    fn succeeded_payload() -> Vec<u8> {
        serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_123" } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn signed_payload_verifies_and_parses() {
        let gateway = gateway();
        let payload = succeeded_payload();
        let header = webhook_signature("whsec_test", now_ms() / 1000, &payload);
        let event = gateway.verify_and_parse(&payload, &header).expect("event");
        assert_eq!(event.kind, GatewayEventKind::IntentSucceeded);
        assert_eq!(event.intent_id, "pi_123");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let gateway = gateway();
        let payload = succeeded_payload();
        let header = webhook_signature("whsec_test", now_ms() / 1000, &payload);
        let mut tampered = payload.clone();
        tampered[0] ^= 1;
        assert!(matches!(
            gateway.verify_and_parse(&tampered, &header),
            Err(GatewayError::Signature)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let gateway = gateway();
        let payload = succeeded_payload();
        let header = webhook_signature("whsec_other", now_ms() / 1000, &payload);
        assert!(matches!(
            gateway.verify_and_parse(&payload, &header),
            Err(GatewayError::Signature)
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let gateway = gateway();
        let payload = succeeded_payload();
        let header = webhook_signature("whsec_test", now_ms() / 1000 - 10_000, &payload);
        assert!(matches!(
            gateway.verify_and_parse(&payload, &header),
            Err(GatewayError::Signature)
        ));
    }

    #[test]
    fn unknown_event_kinds_parse_as_other() {
        let payload = serde_json::json!({
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_9" } }
        })
        .to_string()
        .into_bytes();
        let event = parse_event(&payload).expect("event");
        assert_eq!(event.kind, GatewayEventKind::Other);
        assert_eq!(event.event_type, "charge.refunded");
    }

    #[test]
    fn garbled_header_is_rejected() {
        assert!(parse_signature_header("v1=").is_err());
        assert!(parse_signature_header("t=123").is_err());
        assert!(parse_signature_header("").is_err());
    }
}
