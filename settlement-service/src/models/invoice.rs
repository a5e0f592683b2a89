//! Invoice model for settlement-service.
//!
//! Invoices are issued elsewhere; this service only reads them and flips
//! them to `paid`.

use super::UnknownVariant;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Overdue,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" => Some(InvoiceStatus::Sent),
            "overdue" => Some(InvoiceStatus::Overdue),
            "paid" => Some(InvoiceStatus::Paid),
            "void" => Some(InvoiceStatus::Void),
            _ => None,
        }
    }

    /// Statuses an explicit settlement may move to `paid`.
    pub const SETTLEABLE: [InvoiceStatus; 3] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Overdue,
    ];

    pub fn is_settleable(&self) -> bool {
        Self::SETTLEABLE.contains(self)
    }

    /// Issued and still owed: eligible for automatic amount matching.
    pub fn is_match_candidate(&self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Overdue)
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownVariant::new("invoice status", value))
    }
}

/// Invoice row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub company_id: Uuid,
    pub invoice_number: String,
    /// Tenant the invoice is billed to.
    pub issued_to: Uuid,
    /// Landlord or agent who issued it; receives the paid notification.
    pub issued_by: Uuid,
    pub invoice_type: String,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub due_date: NaiveDate,
    pub paid_date: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub property_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub lease_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Settlement summary written onto an invoice when it is paid.
#[derive(Debug, Clone)]
pub struct InvoicePaid {
    pub paid_at: DateTime<Utc>,
    pub payment_method: String,
    pub payment_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settleable_statuses() {
        assert!(InvoiceStatus::Draft.is_settleable());
        assert!(InvoiceStatus::Sent.is_settleable());
        assert!(InvoiceStatus::Overdue.is_settleable());
        assert!(!InvoiceStatus::Paid.is_settleable());
        assert!(!InvoiceStatus::Void.is_settleable());
    }

    #[test]
    fn test_drafts_are_not_matched_automatically() {
        assert!(!InvoiceStatus::Draft.is_match_candidate());
        assert!(InvoiceStatus::Sent.is_match_candidate());
        assert!(InvoiceStatus::Overdue.is_match_candidate());
    }
}
