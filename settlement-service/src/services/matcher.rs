//! Invoice matching and automatic payment-to-invoice linking.

use crate::models::{Invoice, Payment};
use crate::services::metrics::record_auto_reconciliation;
use crate::services::store::PaymentStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Capability to attach a free-standing payment to the invoice it pays.
#[async_trait]
pub trait InvoiceLinker: Send + Sync {
    /// Returns the invoice the payment was linked to, or `None` when nothing
    /// matched. No match is not an error.
    async fn link(&self, payment: &Payment) -> Result<Option<Invoice>, AppError>;
}

/// First candidate whose total equals `amount` exactly in the same currency.
///
/// `candidates` must already be in due-date order; the first hit wins.
pub fn match_by_amount<'a>(
    candidates: &'a [Invoice],
    amount: Decimal,
    currency: &str,
) -> Option<&'a Invoice> {
    candidates
        .iter()
        .find(|i| i.total_amount == amount && i.currency.eq_ignore_ascii_case(currency))
}

#[derive(Clone)]
pub struct InvoiceMatcher {
    store: Arc<dyn PaymentStore>,
}

impl InvoiceMatcher {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }

    /// Open invoices (sent or overdue) for the tenant, oldest due date first.
    pub async fn find_settlement_candidates(
        &self,
        tenant_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        self.store.settlement_candidates(company_id, tenant_id).await
    }
}

#[async_trait]
impl InvoiceLinker for InvoiceMatcher {
    #[instrument(
        skip(self, payment),
        fields(payment_id = %payment.payment_id, amount = %payment.amount)
    )]
    async fn link(&self, payment: &Payment) -> Result<Option<Invoice>, AppError> {
        if payment.invoice_id.is_some() {
            return Ok(None);
        }

        let candidates = self
            .find_settlement_candidates(payment.tenant_id, payment.company_id)
            .await?;
        let Some(target) = match_by_amount(&candidates, payment.amount, &payment.currency) else {
            debug!(candidates = candidates.len(), "No invoice matches payment amount");
            record_auto_reconciliation("unmatched");
            return Ok(None);
        };
        let target_id = target.invoice_id;

        // Re-check both rows under lock; either may have moved since the read.
        let mut tx = self.store.begin().await?;
        let invoice = match tx.lock_invoices(&[target_id]).await?.into_iter().next() {
            Some(i) if i.status.is_match_candidate() && i.total_amount == payment.amount => i,
            _ => {
                record_auto_reconciliation("stale");
                return Ok(None);
            }
        };
        let mut current = match tx.lock_payment(payment.payment_id).await? {
            Some(p) if p.invoice_id.is_none() => p,
            _ => {
                record_auto_reconciliation("stale");
                return Ok(None);
            }
        };

        current.invoice_id = Some(invoice.invoice_id);
        current.unit_id = current.unit_id.or(invoice.unit_id);
        current.property_id = current.property_id.or(invoice.property_id);
        current.lease_id = current.lease_id.or(invoice.lease_id);
        current.updated_utc = Utc::now();
        tx.save_payment(&current).await?;
        tx.commit().await?;

        record_auto_reconciliation("linked");
        info!(
            invoice_id = %invoice.invoice_id,
            invoice_number = %invoice.invoice_number,
            "Payment linked to invoice"
        );
        Ok(Some(invoice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceStatus;
    use chrono::NaiveDate;

    fn invoice(amount: i64, currency: &str, due: (i32, u32, u32)) -> Invoice {
        let now = Utc::now();
        Invoice {
            invoice_id: Uuid::new_v4(),
            company_id: Uuid::nil(),
            invoice_number: format!("INV-{}", amount),
            issued_to: Uuid::nil(),
            issued_by: Uuid::nil(),
            invoice_type: "rent".to_string(),
            status: InvoiceStatus::Sent,
            total_amount: Decimal::from(amount),
            currency: currency.to_string(),
            due_date: NaiveDate::from_ymd_opt(due.0, due.1, due.2).unwrap(),
            paid_date: None,
            payment_method: None,
            payment_reference: None,
            property_id: None,
            unit_id: None,
            lease_id: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn test_first_exact_match_wins() {
        let older = invoice(3000, "KES", (2026, 1, 5));
        let newer = invoice(3000, "KES", (2026, 2, 5));
        let candidates = vec![older.clone(), newer];

        let hit = match_by_amount(&candidates, Decimal::from(3000), "KES").unwrap();
        assert_eq!(hit.invoice_id, older.invoice_id);
    }

    #[test]
    fn test_decimal_equality_ignores_scale() {
        let candidates = vec![invoice(3000, "KES", (2026, 1, 5))];
        let amount: Decimal = "3000.00".parse().unwrap();
        assert!(match_by_amount(&candidates, amount, "kes").is_some());
    }

    #[test]
    fn test_no_match_on_amount_or_currency() {
        let candidates = vec![invoice(3000, "KES", (2026, 1, 5))];
        assert!(match_by_amount(&candidates, Decimal::from(2999), "KES").is_none());
        assert!(match_by_amount(&candidates, "3000.01".parse().unwrap(), "KES").is_none());
        assert!(match_by_amount(&candidates, Decimal::from(3000), "USD").is_none());
        assert!(match_by_amount(&[], Decimal::from(3000), "KES").is_none());
    }
}
