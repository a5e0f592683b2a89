//! PostgreSQL store for settlement-service.

use crate::models::{Invoice, InvoicePaid, ListPaymentsFilter, Payment, Tenant};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::policy::ListScope;
use crate::services::store::{PaymentStore, StoreTransaction};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "payment_id, company_id, tenant_id, unit_id, property_id, lease_id, \
    invoice_id, amount, currency, payment_method, payment_type, status, payment_date, \
    payment_period, receipt_number, transaction_id, reference_number, approved_by, approved_utc, \
    approval_notes, attachment, notes, created_by, created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "invoice_id, company_id, invoice_number, issued_to, issued_by, \
    invoice_type, status, total_amount, currency, due_date, paid_date, payment_method, \
    payment_reference, property_id, unit_id, lease_id, created_utc, updated_utc";

const PAYMENT_FILTER: &str = r#"
    WHERE ($1::uuid IS NULL OR company_id = $1)
      AND ($2::uuid IS NULL OR tenant_id = $2)
      AND ($3::uuid IS NULL OR tenant_id = $3)
      AND ($4::uuid IS NULL OR property_id = $4)
      AND ($5::uuid IS NULL OR unit_id = $5)
      AND ($6::varchar IS NULL OR payment_method = $6)
      AND ($7::varchar IS NULL OR payment_type = $7)
      AND ($8::varchar IS NULL OR status = $8)
      AND ($9::date IS NULL OR payment_date >= $9)
      AND ($10::date IS NULL OR payment_date <= $10)
      AND ($11::numeric IS NULL OR amount >= $11)
      AND ($12::numeric IS NULL OR amount <= $12)
"#;

/// Binds `$1..$12` of [`PAYMENT_FILTER`].
macro_rules! bind_payment_filter {
    ($query:expr, $scope:expr, $filter:expr) => {{
        let (scope_company, scope_tenant) = match *$scope {
            ListScope::AllCompanies => (None, None),
            ListScope::Company(company_id) => (Some(company_id), None),
            ListScope::Tenant {
                company_id,
                tenant_id,
            } => (Some(company_id), Some(tenant_id)),
        };
        $query
            .bind(scope_company)
            .bind(scope_tenant)
            .bind($filter.tenant_id)
            .bind($filter.property_id)
            .bind($filter.unit_id)
            .bind($filter.payment_method.map(|m| m.as_str()))
            .bind($filter.payment_type.map(|t| t.as_str()))
            .bind($filter.status.map(|s| s.as_str()))
            .bind($filter.from_date)
            .bind($filter.to_date)
            .bind($filter.min_amount)
            .bind($filter.max_amount)
    }};
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Partial unique index: one approved/completed payment per invoice.
const SETTLED_PER_INVOICE_INDEX: &str = "idx_payments_one_settled_per_invoice";

fn unique_conflict(db_err: &dyn sqlx::error::DatabaseError, payment: &Payment) -> AppError {
    if db_err.constraint() == Some(SETTLED_PER_INVOICE_INDEX) {
        AppError::Conflict(anyhow::anyhow!(
            "Invoice {} already has a settled payment",
            payment.invoice_id.map(|id| id.to_string()).unwrap_or_default()
        ))
    } else {
        AppError::Conflict(anyhow::anyhow!(
            "Receipt number '{}' already exists",
            payment.receipt_number
        ))
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "settlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for Database {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_tenant"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT tenant_id, company_id, full_name, email, user_id, created_utc
            FROM tenants
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get tenant", e))?;

        timer.observe_duration();
        Ok(tenant)
    }

    #[instrument(skip(self), fields(payment_id = %payment_id))]
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get payment", e))?;

        timer.observe_duration();
        Ok(payment)
    }

    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get invoice", e))?;

        timer.observe_duration();
        Ok(invoice)
    }

    #[instrument(skip(self, filter), fields(scope = ?scope))]
    async fn list_payments(
        &self,
        scope: &ListScope,
        filter: &ListPaymentsFilter,
    ) -> Result<(Vec<Payment>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let list_sql = format!(
            r#"
            SELECT {} FROM payments {}
            ORDER BY created_utc DESC, payment_id DESC
            LIMIT $13 OFFSET $14
            "#,
            PAYMENT_COLUMNS, PAYMENT_FILTER
        );
        let payments = bind_payment_filter!(sqlx::query_as::<_, Payment>(&list_sql), scope, filter)
            .bind(filter.page_size() as i64)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list payments", e))?;

        let count_sql = format!("SELECT COUNT(*) FROM payments {}", PAYMENT_FILTER);
        let total = bind_payment_filter!(sqlx::query_scalar::<_, i64>(&count_sql), scope, filter)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to count payments", e))?;

        timer.observe_duration();
        Ok((payments, total))
    }

    #[instrument(skip(self), fields(company_id = %company_id, tenant_id = %tenant_id))]
    async fn settlement_candidates(
        &self,
        company_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settlement_candidates"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE company_id = $1 AND issued_to = $2 AND status IN ('sent', 'overdue')
            ORDER BY due_date ASC, created_utc ASC
            "#,
            INVOICE_COLUMNS
        ))
        .bind(company_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find settlement candidates", e))?;

        timer.observe_duration();
        Ok(invoices)
    }
}

/// A PostgreSQL transaction. Dropping it without commit rolls back.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn next_receipt_sequence(&mut self, company_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["next_receipt_sequence"])
            .start_timer();

        // The upsert row-locks the company's counter until this transaction ends.
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO receipt_sequences (company_id, last_value)
            VALUES ($1, 1)
            ON CONFLICT (company_id)
            DO UPDATE SET last_value = receipt_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(company_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to allocate receipt sequence", e))?;

        timer.observe_duration();
        Ok(value)
    }

    async fn lock_invoices(&mut self, invoice_ids: &[Uuid]) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_invoices"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = ANY($1) ORDER BY invoice_id FOR UPDATE",
            INVOICE_COLUMNS
        ))
        .bind(invoice_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock invoices", e))?;

        timer.observe_duration();
        Ok(invoices)
    }

    async fn lock_payment(&mut self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock payment", e))?;

        timer.observe_duration();
        Ok(payment)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_payment"])
            .start_timer();

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO payments ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25)
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(payment.payment_id)
        .bind(payment.company_id)
        .bind(payment.tenant_id)
        .bind(payment.unit_id)
        .bind(payment.property_id)
        .bind(payment.lease_id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.payment_method.as_str())
        .bind(payment.payment_type.as_str())
        .bind(payment.status.as_str())
        .bind(payment.payment_date)
        .bind(&payment.payment_period)
        .bind(&payment.receipt_number)
        .bind(&payment.transaction_id)
        .bind(&payment.reference_number)
        .bind(payment.approved_by)
        .bind(payment.approved_utc)
        .bind(&payment.approval_notes)
        .bind(&payment.attachment)
        .bind(&payment.notes)
        .bind(payment.created_by)
        .bind(payment.created_utc)
        .bind(payment.updated_utc)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => {
                timer.observe_duration();
                debug!(payment_id = %payment.payment_id, "Payment inserted");
                Ok(())
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(unique_conflict(db_err.as_ref(), payment))
            }
            Err(e) => Err(db_error("Failed to insert payment", e)),
        }
    }

    async fn save_payment(&mut self, payment: &Payment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_payment"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE payments SET
                unit_id = $2, property_id = $3, lease_id = $4, invoice_id = $5,
                amount = $6, currency = $7, payment_method = $8, payment_type = $9,
                status = $10, payment_date = $11, payment_period = $12, receipt_number = $13,
                transaction_id = $14, reference_number = $15, approved_by = $16,
                approved_utc = $17, approval_notes = $18, attachment = $19, notes = $20,
                updated_utc = $21
            WHERE payment_id = $1
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.unit_id)
        .bind(payment.property_id)
        .bind(payment.lease_id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.payment_method.as_str())
        .bind(payment.payment_type.as_str())
        .bind(payment.status.as_str())
        .bind(payment.payment_date)
        .bind(&payment.payment_period)
        .bind(&payment.receipt_number)
        .bind(&payment.transaction_id)
        .bind(&payment.reference_number)
        .bind(payment.approved_by)
        .bind(payment.approved_utc)
        .bind(&payment.approval_notes)
        .bind(&payment.attachment)
        .bind(&payment.notes)
        .bind(payment.updated_utc)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                timer.observe_duration();
                Ok(())
            }
            Ok(_) => Err(AppError::NotFound(anyhow::anyhow!(
                "Payment {} not found",
                payment.payment_id
            ))),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(unique_conflict(db_err.as_ref(), payment))
            }
            Err(e) => Err(db_error("Failed to update payment", e)),
        }
    }

    async fn delete_payment(&mut self, payment_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_payment"])
            .start_timer();

        let result = sqlx::query("DELETE FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to delete payment", e))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    async fn pending_payments_for_invoice(
        &mut self,
        invoice_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["pending_payments_for_invoice"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {} FROM payments
            WHERE invoice_id = $1 AND status = 'pending'
            ORDER BY created_utc ASC, payment_id ASC
            FOR UPDATE
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to load pending payments", e))?;

        timer.observe_duration();
        Ok(payments)
    }

    async fn delete_pending_for_invoice(
        &mut self,
        invoice_id: Uuid,
        keep: Option<Uuid>,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_pending_for_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            DELETE FROM payments
            WHERE invoice_id = $1
              AND status = 'pending'
              AND ($2::uuid IS NULL OR payment_id <> $2)
            "#,
        )
        .bind(invoice_id)
        .bind(keep)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to delete stale pending payments", e))?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    async fn mark_invoice_paid(
        &mut self,
        invoice_id: Uuid,
        paid: &InvoicePaid,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_invoice_paid"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_date = $2, payment_method = $3,
                payment_reference = $4, updated_utc = NOW()
            WHERE invoice_id = $1 AND status IN ('draft', 'sent', 'overdue')
            "#,
        )
        .bind(invoice_id)
        .bind(paid.paid_at)
        .bind(&paid.payment_method)
        .bind(&paid.payment_reference)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to mark invoice paid", e))?;

        timer.observe_duration();
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }
}
