//! Receipt number generation.
//!
//! Numbers are `RCP-{YYYYMM}-{sequence:06}` where the sequence is a
//! per-company counter held in the store. The counter is incremented on the
//! caller's transaction, so a rolled-back payment also rolls back its number.

use crate::services::store::StoreTransaction;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const RECEIPT_PREFIX: &str = "RCP";

/// Sentinel prefix for payments reserved before funds are confirmed.
pub const PLACEHOLDER_PREFIX: &str = "PENDING-";

/// Allocate the next receipt number for `company_id` on `tx`.
#[instrument(skip(tx), fields(company_id = %company_id))]
pub async fn next_receipt_number(
    tx: &mut dyn StoreTransaction,
    company_id: Uuid,
    issued_at: DateTime<Utc>,
) -> Result<String, AppError> {
    let sequence = tx.next_receipt_sequence(company_id).await?;
    let number = format_receipt_number(issued_at, sequence);
    debug!(receipt_number = %number, "Receipt number allocated");
    Ok(number)
}

pub fn format_receipt_number(issued_at: DateTime<Utc>, sequence: i64) -> String {
    format!(
        "{}-{}-{:06}",
        RECEIPT_PREFIX,
        issued_at.format("%Y%m"),
        sequence
    )
}

/// Receipt number for a placeholder. Unique without touching the sequence.
pub fn placeholder_receipt_number() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4().simple())
}

pub fn is_placeholder(receipt_number: &str) -> bool {
    receipt_number.starts_with(PLACEHOLDER_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_receipt_number() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(format_receipt_number(at, 7), "RCP-202603-000007");
        assert_eq!(format_receipt_number(at, 1_234_567), "RCP-202603-1234567");
    }

    #[test]
    fn test_placeholder_numbers() {
        let a = placeholder_receipt_number();
        let b = placeholder_receipt_number();
        assert!(is_placeholder(&a));
        assert_ne!(a, b);
        assert!(!is_placeholder("RCP-202603-000007"));
    }
}
