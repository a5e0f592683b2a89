//! Payment record lifecycle: create, read, update, approve, delete.

use crate::models::{
    Actor, ApprovePayment, CreatePayment, InvoicePaid, ListPaymentsFilter, Payment, PaymentPage,
    PaymentStatus, PaymentType, UpdatePayment,
};
use crate::services::matcher::InvoiceLinker;
use crate::services::metrics::{record_invoice_settled, record_payment_operation};
use crate::services::policy::{AccessPolicy, Action, ResourceScope};
use crate::services::receipts;
use crate::services::store::PaymentStore;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

fn scope_of(payment: &Payment) -> ResourceScope {
    ResourceScope::tenant(payment.company_id, payment.tenant_id)
}

fn not_found(payment_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id))
}

fn require_positive(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Amount must be positive (got {})",
            amount
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    linker: Arc<dyn InvoiceLinker>,
    default_currency: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        linker: Arc<dyn InvoiceLinker>,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            linker,
            default_currency: default_currency.into(),
        }
    }

    #[instrument(skip(self, actor, filter), fields(user_id = %actor.user_id))]
    pub async fn list(
        &self,
        actor: &Actor,
        filter: &ListPaymentsFilter,
    ) -> Result<PaymentPage, AppError> {
        let scope = AccessPolicy::list_scope(actor)?;
        let (payments, total) = self.store.list_payments(&scope, filter).await?;
        Ok(PaymentPage {
            payments,
            page: filter.page(),
            page_size: filter.page_size(),
            total,
        })
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn get(&self, actor: &Actor, payment_id: Uuid) -> Result<Payment, AppError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| not_found(payment_id))?;
        AccessPolicy::authorize(actor, Action::ViewPayment, &scope_of(&payment))?;
        Ok(payment)
    }

    /// Record a manual payment. Starts `pending`; a matching open invoice is
    /// linked afterwards on a best-effort basis.
    #[instrument(
        skip(self, actor, input),
        fields(user_id = %actor.user_id, tenant_id = %input.tenant_id)
    )]
    pub async fn create(&self, actor: &Actor, input: CreatePayment) -> Result<Payment, AppError> {
        input.validate()?;
        require_positive(input.amount)?;
        AccessPolicy::authorize_role(actor, Action::CreatePayment)?;

        let tenant = self
            .store
            .get_tenant(input.tenant_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Tenant {} not found", input.tenant_id))
            })?;
        AccessPolicy::authorize(
            actor,
            Action::CreatePayment,
            &ResourceScope::tenant(tenant.company_id, tenant.tenant_id),
        )?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let receipt_number = match input.receipt_number {
            Some(number) => number,
            None => receipts::next_receipt_number(tx.as_mut(), tenant.company_id, now).await?,
        };

        let payment = Payment {
            payment_id: Uuid::new_v4(),
            company_id: tenant.company_id,
            tenant_id: tenant.tenant_id,
            unit_id: input.unit_id,
            property_id: input.property_id,
            lease_id: input.lease_id,
            invoice_id: None,
            amount: input.amount,
            currency: input
                .currency
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| self.default_currency.clone()),
            payment_method: input.payment_method,
            payment_type: input.payment_type,
            status: PaymentStatus::Pending,
            payment_date: input.payment_date.unwrap_or_else(|| now.date_naive()),
            payment_period: input.payment_period,
            receipt_number,
            transaction_id: input.transaction_id,
            reference_number: input.reference_number,
            approved_by: None,
            approved_utc: None,
            approval_notes: None,
            attachment: None,
            notes: input.notes,
            created_by: actor.user_id,
            created_utc: now,
            updated_utc: now,
        };
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        record_payment_operation("create", "success");
        info!(
            payment_id = %payment.payment_id,
            receipt_number = %payment.receipt_number,
            amount = %payment.amount,
            "Payment created"
        );

        match self.linker.link(&payment).await {
            Ok(Some(invoice)) => Ok(Payment {
                invoice_id: Some(invoice.invoice_id),
                unit_id: payment.unit_id.or(invoice.unit_id),
                property_id: payment.property_id.or(invoice.property_id),
                lease_id: payment.lease_id.or(invoice.lease_id),
                ..payment
            }),
            Ok(None) => Ok(payment),
            Err(e) => {
                // Log but don't fail: the payment stays unlinked for manual reconciliation.
                warn!(error = %e, payment_id = %payment.payment_id, "Auto-reconciliation failed");
                crate::services::metrics::record_auto_reconciliation("error");
                Ok(payment)
            }
        }
    }

    #[instrument(skip(self, actor, input), fields(user_id = %actor.user_id))]
    pub async fn update(
        &self,
        actor: &Actor,
        payment_id: Uuid,
        input: UpdatePayment,
    ) -> Result<Payment, AppError> {
        input.validate()?;
        AccessPolicy::authorize_role(actor, Action::UpdatePayment)?;

        let mut tx = self.store.begin().await?;
        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or_else(|| not_found(payment_id))?;
        AccessPolicy::authorize(actor, Action::UpdatePayment, &scope_of(&payment))?;

        if let Some(next) = input.status {
            if next == PaymentStatus::Approved && payment.status != PaymentStatus::Approved {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Use the approve operation to approve a payment"
                )));
            }
            if next != payment.status && !payment.status.can_transition_to(next) {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Cannot move payment from '{}' to '{}'",
                    payment.status.as_str(),
                    next.as_str()
                )));
            }
        }

        let changes_money = input.amount.is_some_and(|a| a != payment.amount)
            || input
                .currency
                .as_deref()
                .is_some_and(|c| !c.eq_ignore_ascii_case(&payment.currency));
        if changes_money && (payment.status.is_settled() || payment.status.is_terminal()) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Amount of a '{}' payment cannot change",
                payment.status.as_str()
            )));
        }
        if let Some(amount) = input.amount {
            require_positive(amount)?;
            if amount != payment.amount && payment.invoice_id.is_some() {
                // Links only hold for exact amounts.
                info!(
                    payment_id = %payment_id,
                    invoice_id = ?payment.invoice_id,
                    "Amount changed, unlinking payment from invoice"
                );
                payment.invoice_id = None;
            }
            payment.amount = amount;
        }

        if let Some(v) = input.unit_id {
            payment.unit_id = Some(v);
        }
        if let Some(v) = input.property_id {
            payment.property_id = Some(v);
        }
        if let Some(v) = input.lease_id {
            payment.lease_id = Some(v);
        }
        if let Some(v) = input.currency {
            payment.currency = v.to_uppercase();
        }
        if let Some(v) = input.payment_method {
            payment.payment_method = v;
        }
        if let Some(v) = input.payment_type {
            payment.payment_type = v;
        }
        if let Some(v) = input.status {
            payment.status = v;
        }
        if let Some(v) = input.payment_date {
            payment.payment_date = v;
        }
        if input.payment_period.is_some() {
            payment.payment_period = input.payment_period;
        }
        if input.transaction_id.is_some() {
            payment.transaction_id = input.transaction_id;
        }
        if input.reference_number.is_some() {
            payment.reference_number = input.reference_number;
        }
        if input.notes.is_some() {
            payment.notes = input.notes;
        }
        payment.updated_utc = Utc::now();

        tx.save_payment(&payment).await?;
        tx.commit().await?;

        record_payment_operation("update", "success");
        info!(payment_id = %payment_id, status = payment.status.as_str(), "Payment updated");
        Ok(payment)
    }

    /// Approve a pending payment. When it is linked to a still-open invoice
    /// whose total it covers exactly, the invoice is settled in the same
    /// transaction.
    #[instrument(skip(self, actor, input), fields(user_id = %actor.user_id))]
    pub async fn approve(
        &self,
        actor: &Actor,
        payment_id: Uuid,
        input: ApprovePayment,
    ) -> Result<Payment, AppError> {
        input.validate()?;
        AccessPolicy::authorize_role(actor, Action::ApprovePayment)?;

        // Invoice row before payment row, the same order settlement uses.
        let snapshot = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| not_found(payment_id))?;
        AccessPolicy::authorize(actor, Action::ApprovePayment, &scope_of(&snapshot))?;

        let mut tx = self.store.begin().await?;
        let invoice = match snapshot.invoice_id {
            Some(invoice_id) => tx.lock_invoices(&[invoice_id]).await?.into_iter().next(),
            None => None,
        };
        if let Some(invoice) = &invoice {
            if !invoice.status.is_settleable() {
                record_payment_operation("approve", "conflict");
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} is already '{}'",
                    invoice.invoice_number,
                    invoice.status.as_str()
                )));
            }
        }

        let mut payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or_else(|| not_found(payment_id))?;
        if payment.invoice_id != snapshot.invoice_id {
            record_payment_operation("approve", "conflict");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} was relinked while approving, retry",
                payment_id
            )));
        }

        if payment.status != PaymentStatus::Pending {
            record_payment_operation("approve", "conflict");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only pending payments can be approved (current status: '{}')",
                payment.status.as_str()
            )));
        }

        let now = Utc::now();
        let mut settled_invoice = None;
        if let Some(invoice) = invoice {
            let invoice_id = invoice.invoice_id;
            if invoice.total_amount != payment.amount
                || !invoice.currency.eq_ignore_ascii_case(&payment.currency)
            {
                record_payment_operation("approve", "conflict");
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Payment {} {} does not match invoice {} total {} {}",
                    payment.amount,
                    payment.currency,
                    invoice.invoice_number,
                    invoice.total_amount,
                    invoice.currency
                )));
            }
            if receipts::is_placeholder(&payment.receipt_number) {
                payment.receipt_number =
                    receipts::next_receipt_number(tx.as_mut(), payment.company_id, now)
                        .await?;
            }
            let paid = InvoicePaid {
                paid_at: now,
                payment_method: payment.payment_method.as_str().to_string(),
                payment_reference: payment
                    .reference_number
                    .clone()
                    .or_else(|| Some(payment.receipt_number.clone())),
            };
            if !tx.mark_invoice_paid(invoice_id, &paid).await? {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} was settled concurrently",
                    invoice.invoice_number
                )));
            }
            if payment.payment_type == PaymentType::Other {
                payment.payment_type = PaymentType::from_invoice_type(&invoice.invoice_type);
            }
            tx.delete_pending_for_invoice(invoice_id, Some(payment.payment_id)).await?;
            settled_invoice = Some(invoice);
        }

        payment.status = PaymentStatus::Approved;
        payment.approved_by = Some(actor.user_id);
        payment.approved_utc = Some(now);
        payment.approval_notes = input.notes;
        payment.updated_utc = now;
        tx.save_payment(&payment).await?;
        tx.commit().await?;

        record_payment_operation("approve", "success");
        if let Some(invoice) = &settled_invoice {
            record_invoice_settled(
                "approval",
                &invoice.currency,
                invoice.total_amount.to_f64().unwrap_or_default(),
            );
        }
        info!(
            payment_id = %payment_id,
            approved_by = %actor.user_id,
            settled_invoice_id = ?settled_invoice.as_ref().map(|i| i.invoice_id),
            "Payment approved"
        );
        Ok(payment)
    }

    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &Actor, payment_id: Uuid) -> Result<(), AppError> {
        AccessPolicy::authorize_role(actor, Action::DeletePayment)?;

        let mut tx = self.store.begin().await?;
        let payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or_else(|| not_found(payment_id))?;
        AccessPolicy::authorize(actor, Action::DeletePayment, &scope_of(&payment))?;

        if !payment.status.is_deletable() {
            record_payment_operation("delete", "conflict");
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Cannot delete a '{}' payment",
                payment.status.as_str()
            )));
        }

        tx.delete_payment(payment_id).await?;
        tx.commit().await?;

        record_payment_operation("delete", "success");
        info!(payment_id = %payment_id, "Payment deleted");
        Ok(())
    }

    /// Reserve the pending placeholder for an issued invoice. Returns the
    /// existing placeholder if one is already linked.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn reserve_placeholder(
        &self,
        actor: &Actor,
        invoice_id: Uuid,
    ) -> Result<Payment, AppError> {
        AccessPolicy::authorize_role(actor, Action::ReservePlaceholder)?;

        let mut tx = self.store.begin().await?;
        let invoice = tx
            .lock_invoices(&[invoice_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id))
            })?;
        AccessPolicy::authorize(
            actor,
            Action::ReservePlaceholder,
            &ResourceScope::tenant(invoice.company_id, invoice.issued_to),
        )?;

        if !invoice.status.is_settleable() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice {} is already '{}'",
                invoice.invoice_number,
                invoice.status.as_str()
            )));
        }

        let pending = tx.pending_payments_for_invoice(invoice_id).await?;
        if let Some(existing) = pending.into_iter().find(|p| p.is_placeholder()) {
            return Ok(existing);
        }

        let now = Utc::now();
        let payment = Payment {
            payment_id: Uuid::new_v4(),
            company_id: invoice.company_id,
            tenant_id: invoice.issued_to,
            unit_id: invoice.unit_id,
            property_id: invoice.property_id,
            lease_id: invoice.lease_id,
            invoice_id: Some(invoice.invoice_id),
            amount: invoice.total_amount,
            currency: invoice.currency.clone(),
            payment_method: crate::models::PaymentMethod::Online,
            payment_type: PaymentType::from_invoice_type(&invoice.invoice_type),
            status: PaymentStatus::Pending,
            payment_date: invoice.due_date,
            payment_period: Some(invoice.due_date.format("%B %Y").to_string()),
            receipt_number: receipts::placeholder_receipt_number(),
            transaction_id: None,
            reference_number: None,
            approved_by: None,
            approved_utc: None,
            approval_notes: None,
            attachment: None,
            notes: None,
            created_by: actor.user_id,
            created_utc: now,
            updated_utc: now,
        };
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        record_payment_operation("reserve_placeholder", "success");
        info!(
            payment_id = %payment.payment_id,
            invoice_id = %invoice_id,
            "Placeholder payment reserved"
        );
        Ok(payment)
    }
}
