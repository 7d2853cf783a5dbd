//! Credit signal extractor

use crate::models::{Account, AccountType, Liability, Transaction};
use serde::{Deserialize, Serialize};

/// Tolerance for treating a payment as "minimum only": within the larger
/// of $1 or 2% of the stated minimum.
const MIN_PAYMENT_ABS_TOLERANCE: f64 = 1.0;
const MIN_PAYMENT_REL_TOLERANCE: f64 = 0.02;

/// Consecutive minimum-sized payments required to set the flag.
const MIN_PAYMENT_STREAK: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditFeatures {
    pub card_count: u32,
    /// Highest per-card utilization, as a percentage 0–100.
    pub max_utilization_pct: f64,
    pub high_utilization_30: bool,
    pub high_utilization_50: bool,
    pub high_utilization_80: bool,
    pub minimum_payment_only: bool,
    pub interest_charges: bool,
    pub overdue: bool,
}

impl CreditFeatures {
    pub fn zero() -> Self {
        Self {
            card_count: 0,
            max_utilization_pct: 0.0,
            high_utilization_30: false,
            high_utilization_50: false,
            high_utilization_80: false,
            minimum_payment_only: false,
            interest_charges: false,
            overdue: false,
        }
    }
}

pub fn extract(
    accounts: &[Account],
    transactions: &[Transaction],
    liabilities: &[Liability],
) -> CreditFeatures {
    if transactions.is_empty() {
        return CreditFeatures::zero();
    }

    let cards: Vec<&Account> = accounts
        .iter()
        .filter(|a| a.account_type == AccountType::Credit)
        .collect();

    let mut max_utilization = 0.0f64;
    for card in &cards {
        // Cards without a limit are skipped, not treated as 0%.
        if let Some(utilization) = card.utilization() {
            max_utilization = max_utilization.max(utilization * 100.0);
        }
    }

    let minimum_payment_only = cards
        .iter()
        .any(|card| has_minimum_payment_streak(card, transactions, liabilities));

    let interest_charges = transactions
        .iter()
        .filter(|t| !t.pending)
        .any(is_interest_charge);

    let overdue = liabilities.iter().any(|l| l.is_overdue);

    CreditFeatures {
        card_count: cards.len() as u32,
        max_utilization_pct: max_utilization,
        high_utilization_30: max_utilization >= 30.0,
        high_utilization_50: max_utilization >= 50.0,
        high_utilization_80: max_utilization >= 80.0,
        minimum_payment_only,
        interest_charges,
        overdue,
    }
}

pub fn is_interest_charge(tx: &Transaction) -> bool {
    let detailed = tx.category_detailed.to_lowercase();
    let primary = tx.category_primary.to_lowercase();
    detailed.contains("interest") || primary.contains("interest") || detailed.contains("finance_charge")
}

fn is_card_payment(tx: &Transaction) -> bool {
    tx.amount > 0.0 && tx.category_detailed.to_lowercase().contains("payment")
}

/// The last `MIN_PAYMENT_STREAK` card payments in the window each landed
/// within tolerance of the liability's minimum payment.
fn has_minimum_payment_streak(
    card: &Account,
    transactions: &[Transaction],
    liabilities: &[Liability],
) -> bool {
    let Some(minimum) = liabilities
        .iter()
        .find(|l| l.account_id == card.account_id)
        .and_then(|l| l.minimum_payment)
    else {
        return false;
    };
    if minimum <= 0.0 {
        return false;
    }

    let mut payments: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.account_id == card.account_id && !t.pending && is_card_payment(t))
        .collect();
    if payments.len() < MIN_PAYMENT_STREAK {
        return false;
    }
    payments.sort_by_key(|t| t.date);

    let tolerance = MIN_PAYMENT_ABS_TOLERANCE.max(minimum * MIN_PAYMENT_REL_TOLERANCE);
    payments
        .iter()
        .rev()
        .take(MIN_PAYMENT_STREAK)
        .all(|t| (t.amount - minimum).abs() <= tolerance)
}
