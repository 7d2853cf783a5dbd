//! Feature extraction
//!
//! Four independent, stateless signal extractors plus the aggregator that
//! merges their outputs into one per-user, per-window snapshot. Extractors
//! are pure functions of the windowed input; missing or empty input yields a
//! fully-populated zero record, never an error.

pub mod credit;
pub mod income;
pub mod savings;
pub mod subscription;

pub use credit::CreditFeatures;
pub use income::{IncomeFeatures, PayFrequency};
pub use savings::SavingsFeatures;
pub use subscription::SubscriptionFeatures;

use crate::error::EngineError;
use crate::models::{Account, Liability, Transaction};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Analysis windows the snapshot key space allows.
pub const SUPPORTED_WINDOWS: [u32; 2] = [30, 180];

/// The central derived entity: computed behavioral metrics for one user and
/// one window. Never mutated after creation; superseded by a newer snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub user_id: Uuid,
    pub window_days: u32,
    pub computed_at: DateTime<Utc>,
    pub subscription: SubscriptionFeatures,
    pub savings: SavingsFeatures,
    pub credit: CreditFeatures,
    pub income: IncomeFeatures,
}

impl FeatureSnapshot {
    pub fn zero(user_id: Uuid, window_days: u32) -> Self {
        Self {
            user_id,
            window_days,
            computed_at: Utc::now(),
            subscription: SubscriptionFeatures::zero(),
            savings: SavingsFeatures::zero(),
            credit: CreditFeatures::zero(),
            income: IncomeFeatures::zero(),
        }
    }
}

/// Merge the four extractors' outputs for the transactions falling inside
/// `window_days` before `as_of` (inclusive).
pub fn compute_features(
    user_id: Uuid,
    window_days: u32,
    as_of: NaiveDate,
    accounts: &[Account],
    transactions: &[Transaction],
    liabilities: &[Liability],
) -> Result<FeatureSnapshot> {
    if !SUPPORTED_WINDOWS.contains(&window_days) {
        return Err(EngineError::InvalidWindow(window_days));
    }

    let start = as_of - chrono::Duration::days(window_days as i64);
    let windowed: Vec<Transaction> = transactions
        .iter()
        .filter(|t| t.date > start && t.date <= as_of && !t.pending)
        .cloned()
        .collect();

    debug!(
        %user_id,
        window_days,
        transaction_count = windowed.len(),
        "Computing feature snapshot"
    );

    Ok(FeatureSnapshot {
        user_id,
        window_days,
        computed_at: Utc::now(),
        subscription: subscription::extract(&windowed),
        savings: savings::extract(accounts, &windowed, window_days),
        credit: credit::extract(accounts, &windowed, liabilities),
        income: income::extract(accounts, &windowed, window_days),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountSubtype, AccountType, PaymentChannel};

    fn checking(user_id: Uuid, balance: f64) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id,
            name: "Checking".to_string(),
            account_type: AccountType::Depository,
            subtype: AccountSubtype::Checking,
            currency: "USD".to_string(),
            available_balance: Some(balance),
            current_balance: balance,
            credit_limit: None,
            interest_rate: None,
            next_payment_due: None,
            mask: None,
        }
    }

    fn expense(account_id: Uuid, date: NaiveDate, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id,
            date,
            amount: -amount,
            merchant_name: Some("Shop".to_string()),
            category_primary: "general".to_string(),
            category_detailed: "general".to_string(),
            payment_channel: PaymentChannel::InStore,
            pending: false,
        }
    }

    #[test]
    fn test_unsupported_window_rejected() {
        let user_id = Uuid::new_v4();
        let result = compute_features(
            user_id,
            90,
            NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            &[],
            &[],
            &[],
        );
        assert!(matches!(result, Err(EngineError::InvalidWindow(90))));
    }

    #[test]
    fn test_empty_window_produces_zero_snapshot() {
        let user_id = Uuid::new_v4();
        let as_of = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let account = checking(user_id, 1200.0);

        // A transaction well outside the 30-day window.
        let old = expense(account.account_id, as_of - chrono::Duration::days(120), 80.0);

        let snapshot = compute_features(user_id, 30, as_of, &[account], &[old], &[]).unwrap();
        assert_eq!(snapshot.subscription, SubscriptionFeatures::zero());
        assert_eq!(snapshot.savings, SavingsFeatures::zero());
        assert_eq!(snapshot.credit, CreditFeatures::zero());
        assert_eq!(snapshot.income, IncomeFeatures::zero());
    }

    #[test]
    fn test_windows_see_different_history() {
        let user_id = Uuid::new_v4();
        let as_of = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let account = checking(user_id, 1200.0);

        let old = expense(account.account_id, as_of - chrono::Duration::days(120), 80.0);

        let short = compute_features(user_id, 30, as_of, &[account.clone()], &[old.clone()], &[])
            .unwrap();
        let long = compute_features(user_id, 180, as_of, &[account], &[old], &[]).unwrap();

        assert_eq!(short.savings.avg_monthly_expense, 0.0);
        assert!(long.savings.avg_monthly_expense > 0.0);
    }

    #[test]
    fn test_pending_transactions_excluded() {
        let user_id = Uuid::new_v4();
        let as_of = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let account = checking(user_id, 1200.0);

        let mut pending = expense(account.account_id, as_of, 80.0);
        pending.pending = true;

        let snapshot = compute_features(user_id, 30, as_of, &[account], &[pending], &[]).unwrap();
        assert_eq!(snapshot.savings.avg_monthly_expense, 0.0);
    }
}
