//! In-memory store for tests and local tooling.
//!
//! Transactions take the store lock for their whole lifetime and work on a
//! copy of the state that replaces the shared state on commit, so concurrent
//! transactions are serialized the way row locks serialize them in Postgres.
//! Non-transactional reads wait for any open transaction to finish.

use crate::models::{
    Invoice, InvoicePaid, InvoiceStatus, ListPaymentsFilter, Payment, PaymentStatus, Tenant,
};
use crate::services::policy::ListScope;
use crate::services::store::{PaymentStore, StoreTransaction};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub tenants: HashMap<Uuid, Tenant>,
    pub invoices: HashMap<Uuid, Invoice>,
    pub payments: HashMap<Uuid, Payment>,
    pub receipt_sequences: HashMap<Uuid, i64>,
}

#[derive(Default)]
struct FailPoints {
    fail_on_begin: RwLock<bool>,
    fail_on_commit: RwLock<bool>,
    fail_on_mark_paid: RwLock<HashSet<Uuid>>,
}

fn injected(what: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("injected failure: {}", what))
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail: Arc<FailPoints>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- Fault injection -----

    pub async fn set_fail_on_begin(&self, fail: bool) {
        *self.fail.fail_on_begin.write().await = fail;
    }

    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail.fail_on_commit.write().await = fail;
    }

    /// Make `mark_invoice_paid` error for this invoice.
    pub async fn fail_on_mark_paid(&self, invoice_id: Uuid) {
        self.fail.fail_on_mark_paid.write().await.insert(invoice_id);
    }

    // ----- Seeding -----

    pub async fn seed_tenant(&self, company_id: Uuid, full_name: &str) -> Tenant {
        let tenant = Tenant {
            tenant_id: Uuid::new_v4(),
            company_id,
            full_name: full_name.to_string(),
            email: None,
            user_id: Some(Uuid::new_v4()),
            created_utc: Utc::now(),
        };
        self.state
            .lock()
            .await
            .tenants
            .insert(tenant.tenant_id, tenant.clone());
        tenant
    }

    pub async fn seed_invoice(
        &self,
        tenant: &Tenant,
        total_amount: Decimal,
        status: InvoiceStatus,
        due_date: NaiveDate,
    ) -> Invoice {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            company_id: tenant.company_id,
            invoice_number: format!("INV-{:05}", state.invoices.len() + 1),
            issued_to: tenant.tenant_id,
            issued_by: Uuid::new_v4(),
            invoice_type: "rent".to_string(),
            status,
            total_amount,
            currency: "KES".to_string(),
            due_date,
            paid_date: None,
            payment_method: None,
            payment_reference: None,
            property_id: Some(Uuid::new_v4()),
            unit_id: Some(Uuid::new_v4()),
            lease_id: None,
            created_utc: now,
            updated_utc: now,
        };
        state.invoices.insert(invoice.invoice_id, invoice.clone());
        invoice
    }

    pub async fn seed_payment(&self, payment: Payment) {
        self.state
            .lock()
            .await
            .payments
            .insert(payment.payment_id, payment);
    }

    // ----- Inspection -----

    pub async fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        self.state.lock().await.invoices.get(&invoice_id).cloned()
    }

    pub async fn payments_for_invoice(&self, invoice_id: Uuid) -> Vec<Payment> {
        let state = self.state.lock().await;
        let mut payments: Vec<_> = state
            .payments
            .values()
            .filter(|p| p.invoice_id == Some(invoice_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_utc);
        payments
    }

    pub async fn all_payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.values().cloned().collect()
    }

    pub async fn receipt_sequence(&self, company_id: Uuid) -> i64 {
        self.state
            .lock()
            .await
            .receipt_sequences
            .get(&company_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError> {
        if *self.fail.fail_on_begin.read().await {
            return Err(injected("begin"));
        }
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            fail: self.fail.clone(),
        }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        Ok(self.state.lock().await.tenants.get(&tenant_id).cloned())
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.invoice(invoice_id).await)
    }

    async fn list_payments(
        &self,
        scope: &ListScope,
        filter: &ListPaymentsFilter,
    ) -> Result<(Vec<Payment>, i64), AppError> {
        let state = self.state.lock().await;
        let mut matching: Vec<_> = state
            .payments
            .values()
            .filter(|p| scope.contains(p.company_id, p.tenant_id) && filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then(b.payment_id.cmp(&a.payment_id))
        });

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(filter.page_size() as usize)
            .collect();
        Ok((page, total))
    }

    async fn settlement_candidates(
        &self,
        company_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<_> = state
            .invoices
            .values()
            .filter(|i| {
                i.company_id == company_id
                    && i.issued_to == tenant_id
                    && i.status.is_match_candidate()
            })
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then(a.created_utc.cmp(&b.created_utc))
        });
        Ok(invoices)
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail: Arc<FailPoints>,
}

impl MemoryTransaction {
    fn check_unique(&self, payment: &Payment) -> Result<(), AppError> {
        if let (Some(invoice_id), true) = (payment.invoice_id, payment.status.is_settled()) {
            let settled_twice = self.working.payments.values().any(|p| {
                p.payment_id != payment.payment_id
                    && p.invoice_id == Some(invoice_id)
                    && p.status.is_settled()
            });
            if settled_twice {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Invoice {} already has a settled payment",
                    invoice_id
                )));
            }
        }

        let duplicate = self.working.payments.values().any(|p| {
            p.payment_id != payment.payment_id
                && p.company_id == payment.company_id
                && p.receipt_number == payment.receipt_number
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Receipt number '{}' already exists",
                payment.receipt_number
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn next_receipt_sequence(&mut self, company_id: Uuid) -> Result<i64, AppError> {
        let value = self.working.receipt_sequences.entry(company_id).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn lock_invoices(&mut self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        let mut invoices: Vec<_> = invoice_ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| self.working.invoices.get(id).cloned())
            .collect();
        invoices.sort_by_key(|i| i.invoice_id);
        Ok(invoices)
    }

    async fn lock_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.working.payments.get(&payment_id).cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), AppError> {
        if self.working.payments.contains_key(&payment.payment_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Payment {} already exists",
                payment.payment_id
            )));
        }
        self.check_unique(payment)?;
        self.working
            .payments
            .insert(payment.payment_id, payment.clone());
        Ok(())
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), AppError> {
        if !self.working.payments.contains_key(&payment.payment_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Payment {} not found",
                payment.payment_id
            )));
        }
        self.check_unique(payment)?;
        self.working
            .payments
            .insert(payment.payment_id, payment.clone());
        Ok(())
    }

    async fn delete_payment(&mut self, payment_id: Uuid) -> Result<bool, AppError> {
        Ok(self.working.payments.remove(&payment_id).is_some())
    }

    async fn pending_payments_for_invoice(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let mut payments: Vec<_> = self
            .working
            .payments
            .values()
            .filter(|p| p.invoice_id == Some(invoice_id) && p.status == PaymentStatus::Pending)
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.created_utc
                .cmp(&b.created_utc)
                .then(a.payment_id.cmp(&b.payment_id))
        });
        Ok(payments)
    }

    async fn delete_pending_for_invoice(
        &mut self,
        invoice_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<u64, AppError> {
        let before = self.working.payments.len();
        self.working.payments.retain(|id, p| {
            !(p.invoice_id == Some(invoice_id)
                && p.status == PaymentStatus::Pending
                && Some(*id) != keep)
        });
        Ok((before - self.working.payments.len()) as u64)
    }

    async fn mark_invoice_paid(
        &mut self,
        invoice_id: Uuid,
        paid: &InvoicePaid,
    ) -> Result<bool, AppError> {
        if self.fail.fail_on_mark_paid.read().await.contains(&invoice_id) {
            return Err(injected("mark_invoice_paid"));
        }
        match self.working.invoices.get_mut(&invoice_id) {
            Some(invoice) if invoice.status.is_settleable() => {
                invoice.status = InvoiceStatus::Paid;
                invoice.paid_date = Some(paid.paid_at);
                invoice.payment_method = Some(paid.payment_method.clone());
                invoice.payment_reference = paid.payment_reference.clone();
                invoice.updated_utc = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTransaction {
            mut guard,
            working,
            fail,
        } = *self;
        if *fail.fail_on_commit.read().await {
            return Err(injected("commit"));
        }
        *guard = working;
        Ok(())
    }
}
