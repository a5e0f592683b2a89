//! Domain models for settlement-service.

pub mod actor;
pub mod gateway;
pub mod invoice;
pub mod payment;
pub mod settlement;
pub mod tenant;

pub use actor::{Actor, Role};
pub use gateway::{
    GatewayResponse, MpesaConfirmation, PaymentAttachment, PaystackConfirmation,
    StripeConfirmation,
};
pub use invoice::{Invoice, InvoicePaid, InvoiceStatus};
pub use payment::{
    ApprovePayment, CreatePayment, ListPaymentsFilter, Payment, PaymentMethod, PaymentPage,
    PaymentStatus, PaymentType, UpdatePayment,
};
pub use settlement::{
    NotificationIntent, SettlementReceipt, SettlementRequest, SettlementResponse,
};
pub use tenant::Tenant;

/// A stored string that does not name any variant of a closed enum.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: String) -> Self {
        Self { kind, value }
    }
}
