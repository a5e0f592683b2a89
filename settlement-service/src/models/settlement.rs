//! Settlement request/response shapes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Request to settle a set of invoices for one tenant.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SettlementRequest {
    #[validate(length(min = 1, max = 100, message = "invoice_ids must not be empty"))]
    pub invoice_ids: Vec<Uuid>,
    #[validate(length(max = 255))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 255))]
    pub reference_number: Option<String>,
    /// Defaults to `online`.
    pub payment_method: Option<String>,
    /// Raw gateway confirmation; classified per provider before storage.
    pub gateway_response: Option<serde_json::Value>,
    /// Tenant being settled for. Required when a staff member or gateway
    /// handler settles on a tenant's behalf; ignored for tenant callers.
    pub tenant_id: Option<Uuid>,
}

/// One settled invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub receipt_number: String,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub invoices_paid: usize,
    pub total_amount: Decimal,
    pub receipts: Vec<SettlementReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SettlementResponse {
    pub const NO_PAYABLE_INVOICES: &'static str = "No payable invoices";

    /// Outcome of a request that found nothing left to settle (e.g. a replay).
    pub fn nothing_payable() -> Self {
        Self {
            invoices_paid: 0,
            total_amount: Decimal::ZERO,
            receipts: Vec::new(),
            message: Some(Self::NO_PAYABLE_INVOICES.to_string()),
        }
    }

    pub fn from_receipts(receipts: Vec<SettlementReceipt>) -> Self {
        if receipts.is_empty() {
            return Self::nothing_payable();
        }
        Self {
            invoices_paid: receipts.len(),
            total_amount: receipts.iter().map(|r| r.amount).sum(),
            receipts,
            message: None,
        }
    }
}

/// Message handed to the notification collaborator after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub recipient_id: Uuid,
    pub company_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
}

impl NotificationIntent {
    pub const INVOICE_PAID: &'static str = "invoice_paid";
}
