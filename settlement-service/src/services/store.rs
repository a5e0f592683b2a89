//! Storage seam for payments, invoices and receipt sequences.
//!
//! [`PaymentStore`] serves single-statement reads. Every mutation happens on a
//! [`StoreTransaction`], which is rolled back when dropped without
//! [`StoreTransaction::commit`].

use crate::models::{Invoice, InvoicePaid, ListPaymentsFilter, Payment, Tenant};
use crate::services::policy::ListScope;
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError>;

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError>;

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError>;

    /// Page of payments visible in `scope`, newest first, with the total count.
    async fn list_payments(
        &self,
        scope: &ListScope,
        filter: &ListPaymentsFilter,
    ) -> Result<(Vec<Payment>, i64), AppError>;

    /// Sent or overdue invoices billed to the tenant, oldest due date first.
    async fn settlement_candidates(
        &self,
        company_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError>;
}

#[async_trait]
pub trait StoreTransaction: Send {
    /// Increment and return the company's receipt sequence.
    async fn next_receipt_sequence(&mut self, company_id: Uuid) -> Result<i64, AppError>;

    /// Row-lock the given invoices (ordered by id). Unknown ids are absent
    /// from the result.
    async fn lock_invoices(&mut self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError>;

    async fn lock_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, AppError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), AppError>;

    /// Overwrite every mutable column of an existing payment.
    async fn save_payment(&mut self, payment: &Payment) -> Result<(), AppError>;

    async fn delete_payment(&mut self, payment_id: Uuid) -> Result<bool, AppError>;

    /// Pending payments linked to the invoice, oldest first.
    async fn pending_payments_for_invoice(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError>;

    /// Delete pending payments linked to the invoice except `keep`.
    async fn delete_pending_for_invoice(
        &mut self,
        invoice_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<u64, AppError>;

    /// Compare-and-set the invoice to `paid`. Returns `false` when the invoice
    /// was no longer in a settleable status.
    async fn mark_invoice_paid(
        &mut self,
        invoice_id: Uuid,
        paid: &InvoicePaid,
    ) -> Result<bool, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
