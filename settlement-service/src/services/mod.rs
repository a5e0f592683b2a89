pub mod database;
pub mod matcher;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod payments;
pub mod policy;
pub mod receipts;
pub mod settlement;
pub mod store;

pub use database::Database;
pub use matcher::{InvoiceLinker, InvoiceMatcher};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{HttpNotifier, LogNotifier, Notifier};
pub use payments::PaymentService;
pub use policy::{AccessPolicy, Action, Decision, DenyReason, ListScope, ResourceScope};
pub use settlement::SettlementOrchestrator;
pub use store::{PaymentStore, StoreTransaction};
