//! Settlement against PostgreSQL.
//!
//! Run with:
//! TEST_DATABASE_URL=postgres://... cargo test --test postgres_test -- --ignored

mod common;

use chrono::{NaiveDate, Utc};
use common::init_tracing;
use rust_decimal::Decimal;
use serial_test::serial;
use service_core::error::AppError;
use settlement_service::models::{
    Actor, CreatePayment, PaymentMethod, PaymentStatus, PaymentType, Role, SettlementRequest,
};
use settlement_service::services::{
    Database, InvoiceMatcher, LogNotifier, PaymentService, PaymentStore, SettlementOrchestrator,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

struct Seeded {
    db: Database,
    company_id: Uuid,
    tenant_id: Uuid,
}

async fn connect() -> Database {
    init_tracing();
    dotenvy::dotenv().ok();
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run Postgres tests");
    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

async fn seed() -> Seeded {
    let db = connect().await;
    let company_id = Uuid::new_v4();
    let tenant_id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (tenant_id, company_id, full_name) VALUES ($1, $2, $3)")
        .bind(tenant_id)
        .bind(company_id)
        .bind("Integration Tenant")
        .execute(db.pool())
        .await
        .expect("Failed to seed tenant");
    Seeded {
        db,
        company_id,
        tenant_id,
    }
}

impl Seeded {
    async fn invoice(&self, number: &str, amount: i64, status: &str) -> Uuid {
        let invoice_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO invoices (invoice_id, company_id, invoice_number, issued_to, issued_by,
                                  status, total_amount, currency, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'KES', $8)
            "#,
        )
        .bind(invoice_id)
        .bind(self.company_id)
        .bind(number)
        .bind(self.tenant_id)
        .bind(Uuid::new_v4())
        .bind(status)
        .bind(Decimal::from(amount))
        .bind(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap())
        .execute(self.db.pool())
        .await
        .expect("Failed to seed invoice");
        invoice_id
    }

    fn store(&self) -> Arc<dyn PaymentStore> {
        Arc::new(self.db.clone())
    }

    fn orchestrator(&self) -> SettlementOrchestrator {
        SettlementOrchestrator::new(self.store(), Arc::new(LogNotifier))
    }

    fn tenant_actor(&self) -> Actor {
        Actor::tenant(Uuid::new_v4(), self.company_id, self.tenant_id)
    }
}

fn settle_request(invoice_ids: Vec<Uuid>) -> SettlementRequest {
    SettlementRequest {
        invoice_ids,
        transaction_id: Some(format!("TX-{}", Uuid::new_v4().simple())),
        reference_number: None,
        payment_method: None,
        gateway_response: None,
        tenant_id: None,
    }
}

#[tokio::test]
#[serial]
#[ignore = "Requires TEST_DATABASE_URL pointing at PostgreSQL"]
async fn settlement_marks_invoice_paid_and_is_idempotent() {
    let seeded = seed().await;
    let invoice_id = seeded.invoice("INV-PG-1", 5000, "sent").await;
    let orchestrator = seeded.orchestrator();
    let actor = seeded.tenant_actor();

    let response = orchestrator
        .settle(&actor, settle_request(vec![invoice_id]))
        .await
        .expect("Settlement failed");
    assert_eq!(response.invoices_paid, 1);
    assert_eq!(response.total_amount, Decimal::from(5000));
    assert!(response.receipts[0].receipt_number.ends_with("-000001"));

    let invoice = seeded.db.get_invoice(invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.status.as_str(), "paid");
    assert!(invoice.paid_date.is_some());

    let replay = orchestrator
        .settle(&actor, settle_request(vec![invoice_id]))
        .await
        .expect("Replay failed");
    assert_eq!(replay.invoices_paid, 0);

    let approved: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payments WHERE invoice_id = $1 AND status = 'approved'",
    )
    .bind(invoice_id)
    .fetch_one(seeded.db.pool())
    .await
    .unwrap();
    assert_eq!(approved, 1);
}

#[tokio::test]
#[serial]
#[ignore = "Requires TEST_DATABASE_URL pointing at PostgreSQL"]
async fn cross_tenant_batch_leaves_database_untouched() {
    let seeded = seed().await;
    let own = seeded.invoice("INV-PG-2", 1000, "sent").await;

    let other_tenant = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (tenant_id, company_id, full_name) VALUES ($1, $2, 'Other')")
        .bind(other_tenant)
        .bind(seeded.company_id)
        .execute(seeded.db.pool())
        .await
        .unwrap();
    let foreign = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO invoices (invoice_id, company_id, invoice_number, issued_to, issued_by,
                              status, total_amount, currency, due_date)
        VALUES ($1, $2, 'INV-PG-3', $3, $4, 'sent', 2000, 'KES', CURRENT_DATE)
        "#,
    )
    .bind(foreign)
    .bind(seeded.company_id)
    .bind(other_tenant)
    .bind(Uuid::new_v4())
    .execute(seeded.db.pool())
    .await
    .unwrap();

    let result = seeded
        .orchestrator()
        .settle(&seeded.tenant_actor(), settle_request(vec![own, foreign]))
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let own_invoice = seeded.db.get_invoice(own).await.unwrap().unwrap();
    assert_eq!(own_invoice.status.as_str(), "sent");
    let sequences: Option<i64> =
        sqlx::query_scalar("SELECT last_value FROM receipt_sequences WHERE company_id = $1")
            .bind(seeded.company_id)
            .fetch_optional(seeded.db.pool())
            .await
            .unwrap();
    assert!(sequences.is_none());
}

#[tokio::test]
#[serial]
#[ignore = "Requires TEST_DATABASE_URL pointing at PostgreSQL"]
async fn concurrent_settlements_allocate_distinct_receipts() {
    let seeded = seed().await;
    let mut invoice_ids = Vec::new();
    for i in 0..20 {
        invoice_ids.push(seeded.invoice(&format!("INV-C-{}", i), 100, "sent").await);
    }

    let orchestrator = seeded.orchestrator();
    let tasks = invoice_ids.iter().map(|id| {
        let orchestrator = orchestrator.clone();
        let actor = seeded.tenant_actor();
        let request = settle_request(vec![*id]);
        async move { orchestrator.settle(&actor, request).await }
    });
    let results = futures::future::join_all(tasks).await;

    let mut receipts = HashSet::new();
    for result in results {
        let response = result.expect("Settlement failed");
        receipts.insert(response.receipts[0].receipt_number.clone());
    }
    assert_eq!(receipts.len(), 20);
}

#[tokio::test]
#[serial]
#[ignore = "Requires TEST_DATABASE_URL pointing at PostgreSQL"]
async fn approval_racing_settlement_has_one_clean_winner() {
    let seeded = seed().await;
    let store = seeded.store();
    let payments = PaymentService::new(
        store.clone(),
        Arc::new(InvoiceMatcher::new(store)),
        "KES",
    );
    let orchestrator = seeded.orchestrator();
    let landlord = Actor::staff(Uuid::new_v4(), seeded.company_id, Role::Landlord);

    for round in 0..30 {
        let invoice_id = seeded
            .invoice(&format!("INV-RACE-{}", round), 1800, "sent")
            .await;
        let payment = payments
            .create(
                &landlord,
                CreatePayment {
                    tenant_id: seeded.tenant_id,
                    unit_id: None,
                    property_id: None,
                    lease_id: None,
                    amount: Decimal::from(1800),
                    currency: None,
                    payment_method: PaymentMethod::Cash,
                    payment_type: PaymentType::Rent,
                    payment_date: None,
                    payment_period: None,
                    receipt_number: None,
                    transaction_id: None,
                    reference_number: None,
                    notes: None,
                },
            )
            .await
            .expect("Create failed");
        assert_eq!(payment.invoice_id, Some(invoice_id));

        let actor = seeded.tenant_actor();
        let (approved, settled) = tokio::join!(
            payments.approve(&landlord, payment.payment_id, Default::default()),
            orchestrator.settle(&actor, settle_request(vec![invoice_id])),
        );

        let settled = settled.unwrap_or_else(|e| panic!("round {} settle: {:?}", round, e));
        let approve_won = match approved {
            Ok(_) => true,
            Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => false,
            Err(e) => panic!("round {} approve: {:?}", round, e),
        };
        assert_ne!(
            approve_won,
            settled.invoices_paid == 1,
            "round {}: exactly one side settles the invoice",
            round
        );

        let invoice = seeded.db.get_invoice(invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.status.as_str(), "paid");
        let settled_rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE invoice_id = $1 AND status = 'approved'",
        )
        .bind(invoice_id)
        .fetch_one(seeded.db.pool())
        .await
        .unwrap();
        assert_eq!(settled_rows, 1);
    }
}

#[tokio::test]
#[serial]
#[ignore = "Requires TEST_DATABASE_URL pointing at PostgreSQL"]
async fn manual_payment_links_and_approval_settles() {
    let seeded = seed().await;
    let invoice_id = seeded.invoice("INV-PG-4", 3200, "overdue").await;
    let store = seeded.store();
    let payments = PaymentService::new(
        store.clone(),
        Arc::new(InvoiceMatcher::new(store)),
        "KES",
    );
    let landlord = Actor::staff(Uuid::new_v4(), seeded.company_id, Role::Landlord);

    let payment = payments
        .create(
            &landlord,
            CreatePayment {
                tenant_id: seeded.tenant_id,
                unit_id: None,
                property_id: None,
                lease_id: None,
                amount: Decimal::from(3200),
                currency: None,
                payment_method: PaymentMethod::BankTransfer,
                payment_type: PaymentType::Rent,
                payment_date: Some(Utc::now().date_naive()),
                payment_period: None,
                receipt_number: None,
                transaction_id: None,
                reference_number: Some("BANK-42".to_string()),
                notes: None,
            },
        )
        .await
        .expect("Create failed");
    assert_eq!(payment.invoice_id, Some(invoice_id));

    let approved = payments
        .approve(&landlord, payment.payment_id, Default::default())
        .await
        .expect("Approve failed");
    assert_eq!(approved.status, PaymentStatus::Approved);

    let invoice = seeded.db.get_invoice(invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.status.as_str(), "paid");
    assert_eq!(invoice.payment_reference.as_deref(), Some("BANK-42"));
}
