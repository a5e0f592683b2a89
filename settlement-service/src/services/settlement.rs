//! Settlement of one or more invoices as a single atomic unit.
//!
//! Within one store transaction: lock the invoices, verify ownership, and
//! for each still-payable invoice flip it to `paid`, allocate a receipt and
//! record an approved payment (converting a reserved placeholder when one
//! exists). Either every invoice in the request is settled or none is.
//! Invoices already paid are skipped, which makes replays harmless.

use crate::models::{
    Actor, GatewayResponse, Invoice, InvoicePaid, NotificationIntent, Payment, PaymentAttachment,
    PaymentMethod, PaymentStatus, PaymentType, Role, SettlementReceipt, SettlementRequest,
    SettlementResponse,
};
use crate::services::metrics::{
    record_error, record_invoice_settled, record_policy_denial, record_settlement,
};
use crate::services::notifier::{dispatch, Notifier};
use crate::services::policy::{AccessPolicy, Action, ResourceScope};
use crate::services::receipts;
use crate::services::store::{PaymentStore, StoreTransaction};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use sqlx::types::Json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Validated, caller-independent parameters of one settlement.
struct SettlementPlan {
    tenant_id: Uuid,
    invoice_ids: Vec<Uuid>,
    payment_method: PaymentMethod,
    transaction_id: Option<String>,
    reference_number: Option<String>,
    gateway: Option<GatewayResponse>,
}

impl SettlementPlan {
    fn attachment(&self, at: DateTime<Utc>) -> PaymentAttachment {
        PaymentAttachment {
            transaction_id: self.transaction_id.clone(),
            reference_number: self.reference_number.clone(),
            gateway: self.gateway.clone(),
            recorded_utc: at,
        }
    }

    fn payment_reference(&self) -> Option<String> {
        self.reference_number
            .clone()
            .or_else(|| self.transaction_id.clone())
            .or_else(|| self.gateway.as_ref().and_then(|g| g.reference().map(str::to_string)))
    }
}

/// Everything a committed settlement hands back to the caller and the notifier.
struct SettledBatch {
    receipts: Vec<SettlementReceipt>,
    intents: Vec<NotificationIntent>,
}

#[derive(Clone)]
pub struct SettlementOrchestrator {
    store: Arc<dyn PaymentStore>,
    notifier: Arc<dyn Notifier>,
}

impl SettlementOrchestrator {
    pub fn new(store: Arc<dyn PaymentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    #[instrument(
        skip(self, actor, request),
        fields(user_id = %actor.user_id, invoice_count = request.invoice_ids.len())
    )]
    pub async fn settle(
        &self,
        actor: &Actor,
        request: SettlementRequest,
    ) -> Result<SettlementResponse, AppError> {
        request.validate()?;
        AccessPolicy::authorize_role(actor, Action::SettleInvoices)?;
        let plan = Self::plan(actor, request)?;

        let batch = match self.settle_in_transaction(actor, &plan).await {
            Ok(batch) => batch,
            Err(e) => return Err(Self::classify_failure(e)),
        };

        if batch.receipts.is_empty() {
            record_settlement("nothing_payable");
            info!(tenant_id = %plan.tenant_id, "No payable invoices in request");
            return Ok(SettlementResponse::nothing_payable());
        }

        record_settlement("settled");
        for receipt in &batch.receipts {
            record_invoice_settled(
                "settlement",
                &receipt.currency,
                receipt.amount.to_f64().unwrap_or_default(),
            );
        }
        let response = SettlementResponse::from_receipts(batch.receipts);
        info!(
            tenant_id = %plan.tenant_id,
            invoices_paid = response.invoices_paid,
            total_amount = %response.total_amount,
            "Settlement committed"
        );

        dispatch(self.notifier.clone(), batch.intents);
        Ok(response)
    }

    fn plan(actor: &Actor, request: SettlementRequest) -> Result<SettlementPlan, AppError> {
        let tenant_id = match actor.role {
            Role::Tenant => actor.tenant_id.ok_or_else(|| {
                AppError::Forbidden(anyhow::anyhow!("Tenant caller has no tenant identity"))
            })?,
            _ => request.tenant_id.ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "tenant_id is required when settling on a tenant's behalf"
                ))
            })?,
        };

        let payment_method = match request.payment_method.as_deref() {
            None => PaymentMethod::Online,
            Some(raw) => PaymentMethod::parse(raw).ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!("Unknown payment method '{}'", raw))
            })?,
        };

        let mut seen = HashSet::new();
        let invoice_ids = request
            .invoice_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();

        Ok(SettlementPlan {
            tenant_id,
            invoice_ids,
            payment_method,
            transaction_id: request.transaction_id,
            reference_number: request.reference_number,
            gateway: request.gateway_response.map(GatewayResponse::from_payload),
        })
    }

    /// Caller errors pass through untouched. Anything else means the unit of
    /// work was abandoned and nothing was applied.
    fn classify_failure(e: AppError) -> AppError {
        match e {
            AppError::Forbidden(_)
            | AppError::BadRequest(_)
            | AppError::ValidationError(_)
            | AppError::NotFound(_) => {
                if matches!(e, AppError::Forbidden(_)) {
                    record_settlement("forbidden");
                }
                e
            }
            other => {
                record_settlement("failed");
                record_error(other.kind());
                warn!(error = %other, "Settlement rolled back");
                AppError::TransactionFailed(anyhow::anyhow!("{}", other))
            }
        }
    }

    async fn settle_in_transaction(
        &self,
        actor: &Actor,
        plan: &SettlementPlan,
    ) -> Result<SettledBatch, AppError> {
        let mut tx = self.store.begin().await?;
        let invoices = tx.lock_invoices(&plan.invoice_ids).await?;

        for invoice in &invoices {
            Self::check_ownership(actor, plan.tenant_id, invoice)?;
        }

        let mut batch = SettledBatch {
            receipts: Vec::new(),
            intents: Vec::new(),
        };
        for invoice in invoices.iter().filter(|i| i.status.is_settleable()) {
            if let Some((receipt, intent)) =
                Self::settle_invoice(tx.as_mut(), actor, plan, invoice).await?
            {
                batch.receipts.push(receipt);
                batch.intents.push(intent);
            }
        }

        if batch.receipts.is_empty() {
            // Nothing changed; dropping the transaction releases the locks.
            return Ok(batch);
        }
        tx.commit().await?;
        Ok(batch)
    }

    fn check_ownership(actor: &Actor, tenant_id: Uuid, invoice: &Invoice) -> Result<(), AppError> {
        AccessPolicy::authorize(
            actor,
            Action::SettleInvoices,
            &ResourceScope::tenant(invoice.company_id, invoice.issued_to),
        )?;
        if invoice.issued_to != tenant_id {
            warn!(
                user_id = %actor.user_id,
                invoice_id = %invoice.invoice_id,
                issued_to = %invoice.issued_to,
                requested_tenant_id = %tenant_id,
                "Settlement request includes another tenant's invoice"
            );
            record_policy_denial(Action::SettleInvoices.as_str(), "not_own_resource");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Invoice {} belongs to another tenant",
                invoice.invoice_number
            )));
        }
        Ok(())
    }

    /// Settle one locked invoice. `None` when the invoice was paid by a
    /// concurrent writer between lock and update.
    async fn settle_invoice(
        tx: &mut dyn StoreTransaction,
        actor: &Actor,
        plan: &SettlementPlan,
        invoice: &Invoice,
    ) -> Result<Option<(SettlementReceipt, NotificationIntent)>, AppError> {
        let now = Utc::now();
        let paid = InvoicePaid {
            paid_at: now,
            payment_method: plan.payment_method.as_str().to_string(),
            payment_reference: plan.payment_reference(),
        };
        if !tx.mark_invoice_paid(invoice.invoice_id, &paid).await? {
            warn!(invoice_id = %invoice.invoice_id, "Invoice no longer payable, skipping");
            return Ok(None);
        }

        let receipt_number =
            receipts::next_receipt_number(tx, invoice.company_id, now).await?;

        let pending = tx.pending_payments_for_invoice(invoice.invoice_id).await?;
        let reserved = pending
            .iter()
            .find(|p| p.is_placeholder())
            .or_else(|| pending.first())
            .cloned();

        let payment = match reserved {
            Some(existing) => {
                let payment =
                    Self::approved_payment(existing, actor, plan, invoice, receipt_number, now);
                tx.save_payment(&payment).await?;
                payment
            }
            None => {
                let fresh = Payment {
                    payment_id: Uuid::new_v4(),
                    company_id: invoice.company_id,
                    tenant_id: invoice.issued_to,
                    unit_id: None,
                    property_id: None,
                    lease_id: None,
                    invoice_id: Some(invoice.invoice_id),
                    amount: invoice.total_amount,
                    currency: invoice.currency.clone(),
                    payment_method: plan.payment_method,
                    payment_type: PaymentType::Other,
                    status: PaymentStatus::Pending,
                    payment_date: now.date_naive(),
                    payment_period: None,
                    receipt_number: String::new(),
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
                let payment =
                    Self::approved_payment(fresh, actor, plan, invoice, receipt_number, now);
                tx.insert_payment(&payment).await?;
                payment
            }
        };

        let removed = tx
            .delete_pending_for_invoice(invoice.invoice_id, Some(payment.payment_id))
            .await?;
        if removed > 0 {
            info!(
                invoice_id = %invoice.invoice_id,
                removed = removed,
                "Removed superseded pending payments"
            );
        }

        let receipt = SettlementReceipt {
            payment_id: payment.payment_id,
            invoice_id: invoice.invoice_id,
            invoice_number: invoice.invoice_number.clone(),
            receipt_number: payment.receipt_number.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
        };
        let intent = NotificationIntent {
            recipient_id: invoice.issued_by,
            company_id: invoice.company_id,
            kind: NotificationIntent::INVOICE_PAID.to_string(),
            title: "Invoice paid".to_string(),
            message: format!(
                "Invoice {} was paid: {} {} (receipt {})",
                invoice.invoice_number, payment.amount, payment.currency, payment.receipt_number
            ),
            invoice_id: Some(invoice.invoice_id),
            payment_id: Some(payment.payment_id),
        };
        Ok(Some((receipt, intent)))
    }

    /// Stamp a payment row as the approved settlement of `invoice`.
    fn approved_payment(
        mut payment: Payment,
        actor: &Actor,
        plan: &SettlementPlan,
        invoice: &Invoice,
        receipt_number: String,
        now: DateTime<Utc>,
    ) -> Payment {
        payment.invoice_id = Some(invoice.invoice_id);
        payment.amount = invoice.total_amount;
        payment.currency = invoice.currency.clone();
        payment.unit_id = payment.unit_id.or(invoice.unit_id);
        payment.property_id = payment.property_id.or(invoice.property_id);
        payment.lease_id = payment.lease_id.or(invoice.lease_id);
        payment.payment_method = plan.payment_method;
        payment.payment_type = PaymentType::from_invoice_type(&invoice.invoice_type);
        payment.status = PaymentStatus::Approved;
        payment.payment_date = now.date_naive();
        payment.payment_period = Some(now.format("%B %Y").to_string());
        payment.receipt_number = receipt_number;
        payment.transaction_id = plan.transaction_id.clone();
        payment.reference_number = plan.reference_number.clone();
        payment.approved_by = Some(actor.user_id);
        payment.approved_utc = Some(now);
        payment.attachment = Some(Json(plan.attachment(now)));
        payment.updated_utc = now;
        payment
    }
}
