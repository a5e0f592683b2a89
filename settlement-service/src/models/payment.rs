//! Payment model for settlement-service.

use super::gateway::PaymentAttachment;
use super::UnknownVariant;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Payment status.
///
/// ```text
/// pending ──► approved ──► completed
///    │           │  │          │
///    │           │  └──────────┴──► refunded
///    └─────┬─────┘
///          ├──► failed
///          └──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Approved,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "approved" => Some(PaymentStatus::Approved),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Approved, Completed)
                | (Approved, Failed)
                | (Approved, Cancelled)
                | (Approved, Refunded)
                | (Completed, Refunded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
                | PaymentStatus::Failed
        )
    }

    /// Settled payments back an invoice and cannot be removed.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    /// Approved or completed: the payment carries money that was received.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Completed)
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownVariant::new("payment status", value))
    }
}

/// How the money moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Cheque,
    Card,
    Online,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Card => "card",
            PaymentMethod::Online => "online",
            PaymentMethod::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "mobile_money" => Some(PaymentMethod::MobileMoney),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "cheque" => Some(PaymentMethod::Cheque),
            "card" => Some(PaymentMethod::Card),
            "online" => Some(PaymentMethod::Online),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownVariant::new("payment method", value))
    }
}

/// What the payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Rent,
    Deposit,
    Utility,
    Maintenance,
    LateFee,
    Penalty,
    Other,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Rent => "rent",
            PaymentType::Deposit => "deposit",
            PaymentType::Utility => "utility",
            PaymentType::Maintenance => "maintenance",
            PaymentType::LateFee => "late_fee",
            PaymentType::Penalty => "penalty",
            PaymentType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rent" => Some(PaymentType::Rent),
            "deposit" => Some(PaymentType::Deposit),
            "utility" => Some(PaymentType::Utility),
            "maintenance" => Some(PaymentType::Maintenance),
            "late_fee" => Some(PaymentType::LateFee),
            "penalty" => Some(PaymentType::Penalty),
            "other" => Some(PaymentType::Other),
            _ => None,
        }
    }

    /// Invoice types share the payment type vocabulary; anything else is `other`.
    pub fn from_invoice_type(invoice_type: &str) -> Self {
        Self::parse(invoice_type).unwrap_or(PaymentType::Other)
    }
}

impl TryFrom<String> for PaymentType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownVariant::new("payment type", value))
    }
}

/// Payment record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub company_id: Uuid,
    pub tenant_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub lease_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    #[sqlx(try_from = "String")]
    pub payment_type: PaymentType,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub payment_date: NaiveDate,
    pub payment_period: Option<String>,
    pub receipt_number: String,
    pub transaction_id: Option<String>,
    pub reference_number: Option<String>,
    pub approved_by: Option<Uuid>,
    pub approved_utc: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub attachment: Option<Json<PaymentAttachment>>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Payment {
    /// Whether this row was reserved ahead of funds arriving.
    pub fn is_placeholder(&self) -> bool {
        self.status == PaymentStatus::Pending
            && crate::services::receipts::is_placeholder(&self.receipt_number)
    }
}

/// Input for creating a payment.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePayment {
    pub tenant_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub lease_id: Option<Uuid>,
    pub amount: Decimal,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_type: PaymentType,
    pub payment_date: Option<NaiveDate>,
    #[validate(length(max = 50))]
    pub payment_period: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub receipt_number: Option<String>,
    #[validate(length(max = 255))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 255))]
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

/// Partial update; only provided fields are applied.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePayment {
    pub unit_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub lease_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_type: Option<PaymentType>,
    pub status: Option<PaymentStatus>,
    pub payment_date: Option<NaiveDate>,
    #[validate(length(max = 50))]
    pub payment_period: Option<String>,
    #[validate(length(max = 255))]
    pub transaction_id: Option<String>,
    #[validate(length(max = 255))]
    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

/// Body of an approval request.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ApprovePayment {
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPaymentsFilter {
    pub tenant_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_type: Option<PaymentType>,
    pub status: Option<PaymentStatus>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListPaymentsFilter {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(Self::DEFAULT_PAGE_SIZE)
            .clamp(1, 100)
    }

    /// Row offset for the current page. Wide enough that any `page` from the
    /// query string is representable.
    pub fn offset(&self) -> i64 {
        (i64::from(self.page()) - 1) * i64::from(self.page_size())
    }

    /// In-process equivalent of the SQL `WHERE` clause.
    pub fn matches(&self, payment: &Payment) -> bool {
        self.tenant_id.map_or(true, |v| payment.tenant_id == v)
            && self.property_id.map_or(true, |v| payment.property_id == Some(v))
            && self.unit_id.map_or(true, |v| payment.unit_id == Some(v))
            && self.payment_method.map_or(true, |v| payment.payment_method == v)
            && self.payment_type.map_or(true, |v| payment.payment_type == v)
            && self.status.map_or(true, |v| payment.status == v)
            && self.from_date.map_or(true, |v| payment.payment_date >= v)
            && self.to_date.map_or(true, |v| payment.payment_date <= v)
            && self.min_amount.map_or(true, |v| payment.amount >= v)
            && self.max_amount.map_or(true, |v| payment.amount <= v)
    }
}

/// One page of payments.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentPage {
    pub payments: Vec<Payment>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        let from = PaymentStatus::Pending;
        assert!(from.can_transition_to(PaymentStatus::Approved));
        assert!(from.can_transition_to(PaymentStatus::Failed));
        assert!(from.can_transition_to(PaymentStatus::Cancelled));
        assert!(!from.can_transition_to(PaymentStatus::Completed));
        assert!(!from.can_transition_to(PaymentStatus::Refunded));
    }

    #[test]
    fn test_terminal_states_only_allow_refund_from_completed() {
        for terminal in [
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
            PaymentStatus::Refunded,
        ] {
            for next in PaymentStatus::ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be rejected",
                    terminal.as_str(),
                    next.as_str()
                );
            }
        }

        let completed = PaymentStatus::Completed;
        assert!(completed.can_transition_to(PaymentStatus::Refunded));
        assert!(!completed.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn test_no_transition_back_to_pending() {
        for from in PaymentStatus::ALL {
            assert!(!from.can_transition_to(PaymentStatus::Pending));
        }
    }

    #[test]
    fn test_deletable_statuses() {
        let deletable: Vec<_> = PaymentStatus::ALL
            .into_iter()
            .filter(|s| s.is_deletable())
            .collect();
        assert_eq!(
            deletable,
            vec![
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled
            ]
        );
    }

    #[test]
    fn test_status_round_trips_through_storage_string() {
        for status in PaymentStatus::ALL {
            assert_eq!(
                PaymentStatus::try_from(status.as_str().to_string()).ok(),
                Some(status)
            );
        }
        assert!(PaymentStatus::try_from("settled".to_string()).is_err());
    }

    #[test]
    fn test_payment_type_from_invoice_type() {
        assert_eq!(PaymentType::from_invoice_type("rent"), PaymentType::Rent);
        assert_eq!(
            PaymentType::from_invoice_type("late_fee"),
            PaymentType::LateFee
        );
        assert_eq!(
            PaymentType::from_invoice_type("service_charge"),
            PaymentType::Other
        );
    }

    #[test]
    fn test_list_filter_paging() {
        let filter = ListPaymentsFilter {
            page: Some(3),
            page_size: Some(500),
            ..Default::default()
        };
        assert_eq!(filter.page_size(), 100);
        assert_eq!(filter.offset(), 200);

        let filter = ListPaymentsFilter {
            page: Some(0),
            page_size: Some(0),
            ..Default::default()
        };
        assert_eq!(filter.page(), 1);
        assert_eq!(filter.page_size(), 1);
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn test_list_filter_offset_for_last_page_number() {
        let filter = ListPaymentsFilter {
            page: Some(u32::MAX),
            page_size: Some(100),
            ..Default::default()
        };
        assert_eq!(filter.offset(), (i64::from(u32::MAX) - 1) * 100);
    }
}
