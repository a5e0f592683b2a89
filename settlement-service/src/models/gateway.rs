//! Gateway confirmation payloads attached to settled payments.
//!
//! Gateways are verified upstream; by the time a payload reaches this service
//! it is a normalized fact. Each known provider gets its own record so audit
//! and display code can read fields without guessing at shape. Anything else
//! is kept verbatim under [`GatewayResponse::Unrecognized`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpesaConfirmation {
    pub mpesa_receipt_number: String,
    pub phone_number: Option<String>,
    pub amount: Option<Decimal>,
    pub checkout_request_id: Option<String>,
    pub transaction_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeConfirmation {
    pub payment_intent_id: String,
    pub charge_id: Option<String>,
    /// Minor units, as reported by Stripe.
    pub amount_received: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaystackConfirmation {
    pub reference: String,
    pub transaction_id: Option<i64>,
    pub channel: Option<String>,
    /// Minor units, as reported by Paystack.
    pub amount: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum GatewayResponse {
    Mpesa(MpesaConfirmation),
    Stripe(StripeConfirmation),
    Paystack(PaystackConfirmation),
    Unrecognized { payload: serde_json::Value },
}

impl GatewayResponse {
    /// Classify a raw payload. Never fails: unknown shapes are preserved.
    pub fn from_payload(payload: serde_json::Value) -> Self {
        match serde_json::from_value::<GatewayResponse>(payload.clone()) {
            Ok(parsed) => parsed,
            Err(_) => GatewayResponse::Unrecognized { payload },
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            GatewayResponse::Mpesa(_) => "mpesa",
            GatewayResponse::Stripe(_) => "stripe",
            GatewayResponse::Paystack(_) => "paystack",
            GatewayResponse::Unrecognized { .. } => "unrecognized",
        }
    }

    /// The provider's own reference for the money movement.
    pub fn reference(&self) -> Option<&str> {
        match self {
            GatewayResponse::Mpesa(c) => Some(&c.mpesa_receipt_number),
            GatewayResponse::Stripe(c) => Some(&c.payment_intent_id),
            GatewayResponse::Paystack(c) => Some(&c.reference),
            GatewayResponse::Unrecognized { .. } => None,
        }
    }
}

/// Structured attachment stored with a payment (JSONB column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttachment {
    pub transaction_id: Option<String>,
    pub reference_number: Option<String>,
    pub gateway: Option<GatewayResponse>,
    pub recorded_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mpesa_payload_is_classified() {
        let parsed = GatewayResponse::from_payload(json!({
            "provider": "mpesa",
            "mpesa_receipt_number": "QFT12ABC34",
            "phone_number": "254700000000",
            "amount": "5000"
        }));

        assert_eq!(parsed.provider(), "mpesa");
        assert_eq!(parsed.reference(), Some("QFT12ABC34"));
        match parsed {
            GatewayResponse::Mpesa(c) => assert_eq!(c.amount, Some(Decimal::from(5000))),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_provider_is_preserved() {
        let raw = json!({ "provider": "flutterwave", "tx_ref": "abc" });
        let parsed = GatewayResponse::from_payload(raw.clone());
        assert_eq!(parsed, GatewayResponse::Unrecognized { payload: raw });
        assert_eq!(parsed.reference(), None);
    }

    #[test]
    fn test_known_provider_missing_required_field_is_preserved() {
        let raw = json!({ "provider": "stripe", "charge_id": "ch_1" });
        let parsed = GatewayResponse::from_payload(raw.clone());
        assert_eq!(parsed.provider(), "unrecognized");
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let value = serde_json::to_value(GatewayResponse::Paystack(PaystackConfirmation {
            reference: "ps_ref_1".to_string(),
            transaction_id: Some(42),
            channel: Some("card".to_string()),
            amount: Some(500000),
            status: Some("success".to_string()),
        }))
        .unwrap();
        assert_eq!(value["provider"], "paystack");
        assert_eq!(value["reference"], "ps_ref_1");
    }
}
