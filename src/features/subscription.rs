//! Subscription signal extractor
//!
//! Detects recurring merchants by cadence, not raw counts: a merchant is
//! recurring only when its inter-transaction intervals sit in a monthly or
//! weekly band with low variance.

use crate::models::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A merchant must appear at least this many times to be considered.
const MIN_OCCURRENCES: usize = 3;
/// All occurrences must fall within this span of days.
const CADENCE_SPAN_DAYS: i64 = 90;
/// Maximum coefficient of variation of inter-transaction intervals.
const MAX_INTERVAL_CV: f64 = 0.25;

const MONTHLY_BAND: (f64, f64) = (25.0, 35.0);
const WEEKLY_BAND: (f64, f64) = (6.0, 8.0);

/// Weeks per month, for normalizing weekly cadences to monthly spend.
const WEEKS_PER_MONTH: f64 = 4.33;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFeatures {
    pub recurring_merchant_count: u32,
    /// Monthly-equivalent spend across recurring merchants.
    pub monthly_recurring_spend: f64,
    /// Recurring spend ÷ total outflow in window, 0 if no outflow.
    pub subscription_share_of_spend: f64,
}

impl SubscriptionFeatures {
    pub fn zero() -> Self {
        Self {
            recurring_merchant_count: 0,
            monthly_recurring_spend: 0.0,
            subscription_share_of_spend: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cadence {
    Monthly,
    Weekly,
}

pub fn extract(transactions: &[Transaction]) -> SubscriptionFeatures {
    if transactions.is_empty() {
        return SubscriptionFeatures::zero();
    }

    let mut by_merchant: HashMap<&str, Vec<&Transaction>> = HashMap::new();
    for tx in transactions.iter().filter(|t| t.is_outflow() && !t.pending) {
        if let Some(merchant) = tx.merchant_name.as_deref() {
            by_merchant.entry(merchant).or_default().push(tx);
        }
    }

    let total_outflow: f64 = transactions
        .iter()
        .filter(|t| t.is_outflow() && !t.pending)
        .map(|t| t.amount.abs())
        .sum();

    let mut recurring_count = 0u32;
    let mut monthly_spend = 0.0;
    let mut recurring_window_spend = 0.0;

    for occurrences in by_merchant.values_mut() {
        occurrences.sort_by_key(|t| t.date);

        let Some(cadence) = detect_cadence(occurrences) else {
            continue;
        };

        recurring_count += 1;

        let window_spend: f64 = occurrences.iter().map(|t| t.amount.abs()).sum();
        recurring_window_spend += window_spend;

        let avg_charge = window_spend / occurrences.len() as f64;
        monthly_spend += match cadence {
            Cadence::Monthly => avg_charge,
            Cadence::Weekly => avg_charge * WEEKS_PER_MONTH,
        };
    }

    let share = if total_outflow > 0.0 {
        recurring_window_spend / total_outflow
    } else {
        0.0
    };

    SubscriptionFeatures {
        recurring_merchant_count: recurring_count,
        monthly_recurring_spend: monthly_spend,
        subscription_share_of_spend: share,
    }
}

/// Classify a merchant's cadence from its date-sorted occurrences.
fn detect_cadence(occurrences: &[&Transaction]) -> Option<Cadence> {
    if occurrences.len() < MIN_OCCURRENCES {
        return None;
    }

    let first = occurrences.first()?.date;
    let last = occurrences.last()?.date;
    if (last - first).num_days() > CADENCE_SPAN_DAYS {
        return None;
    }

    let intervals: Vec<f64> = occurrences
        .windows(2)
        .map(|pair| (pair[1].date - pair[0].date).num_days() as f64)
        .collect();

    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean <= 0.0 {
        return None;
    }

    let variance = intervals
        .iter()
        .map(|gap| (gap - mean).powi(2))
        .sum::<f64>()
        / intervals.len() as f64;
    let cv = variance.sqrt() / mean;
    if cv > MAX_INTERVAL_CV {
        return None;
    }

    if mean >= MONTHLY_BAND.0 && mean <= MONTHLY_BAND.1 {
        Some(Cadence::Monthly)
    } else if mean >= WEEKLY_BAND.0 && mean <= WEEKLY_BAND.1 {
        Some(Cadence::Weekly)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentChannel;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn tx(merchant: &str, date: NaiveDate, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            date,
            amount,
            merchant_name: Some(merchant.to_string()),
            category_primary: "general".to_string(),
            category_detailed: "general".to_string(),
            payment_channel: PaymentChannel::Online,
            pending: false,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(d as i64)
    }

    #[test]
    fn test_empty_input_is_zeroed() {
        let features = extract(&[]);
        assert_eq!(features, SubscriptionFeatures::zero());
    }

    #[test]
    fn test_monthly_cadence_detected() {
        let transactions = vec![
            tx("StreamFlix", day(0), -15.99),
            tx("StreamFlix", day(30), -15.99),
            tx("StreamFlix", day(60), -15.99),
            tx("Grocer", day(5), -120.0),
        ];

        let features = extract(&transactions);
        assert_eq!(features.recurring_merchant_count, 1);
        assert!((features.monthly_recurring_spend - 15.99).abs() < 1e-9);

        let expected_share = (15.99 * 3.0) / (15.99 * 3.0 + 120.0);
        assert!((features.subscription_share_of_spend - expected_share).abs() < 1e-9);
    }

    #[test]
    fn test_weekly_cadence_normalized_to_monthly() {
        let transactions = vec![
            tx("GymPass", day(0), -10.0),
            tx("GymPass", day(7), -10.0),
            tx("GymPass", day(14), -10.0),
            tx("GymPass", day(21), -10.0),
        ];

        let features = extract(&transactions);
        assert_eq!(features.recurring_merchant_count, 1);
        assert!((features.monthly_recurring_spend - 10.0 * WEEKS_PER_MONTH).abs() < 1e-9);
    }

    #[test]
    fn test_erratic_intervals_rejected() {
        // Three visits, but with wildly inconsistent gaps.
        let transactions = vec![
            tx("CornerShop", day(0), -8.0),
            tx("CornerShop", day(3), -8.0),
            tx("CornerShop", day(50), -8.0),
        ];

        let features = extract(&transactions);
        assert_eq!(features.recurring_merchant_count, 0);
        assert_eq!(features.monthly_recurring_spend, 0.0);
    }

    #[test]
    fn test_two_occurrences_not_enough() {
        let transactions = vec![
            tx("StreamFlix", day(0), -15.99),
            tx("StreamFlix", day(30), -15.99),
        ];

        let features = extract(&transactions);
        assert_eq!(features.recurring_merchant_count, 0);
    }

    #[test]
    fn test_no_outflow_yields_zero_share() {
        let transactions = vec![tx("Employer", day(0), 2000.0)];
        let features = extract(&transactions);
        assert_eq!(features.subscription_share_of_spend, 0.0);
    }
}
