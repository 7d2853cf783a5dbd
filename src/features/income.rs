//! Income signal extractor

use crate::models::{Account, AccountSubtype, PaymentChannel, Transaction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum inflow for a transaction to count as a payroll candidate.
const PAYROLL_MIN_AMOUNT: f64 = 1000.0;

/// Median pay gap above which income is considered irregular.
const IRREGULAR_GAP_DAYS: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayFrequency {
    Weekly,
    Biweekly,
    Monthly,
    Irregular,
    Unknown,
}

impl fmt::Display for PayFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayFrequency::Weekly => "weekly",
            PayFrequency::Biweekly => "biweekly",
            PayFrequency::Monthly => "monthly",
            PayFrequency::Irregular => "irregular",
            PayFrequency::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeFeatures {
    pub payroll_deposit_count: u32,
    pub monthly_income_estimate: f64,
    pub pay_frequency: PayFrequency,
    pub median_pay_gap_days: f64,
    /// Checking balance ÷ average monthly expense.
    pub cash_flow_buffer_months: f64,
    pub is_variable_income: bool,
}

impl IncomeFeatures {
    pub fn zero() -> Self {
        Self {
            payroll_deposit_count: 0,
            monthly_income_estimate: 0.0,
            pay_frequency: PayFrequency::Unknown,
            median_pay_gap_days: 0.0,
            cash_flow_buffer_months: 0.0,
            is_variable_income: false,
        }
    }
}

pub fn extract(
    accounts: &[Account],
    transactions: &[Transaction],
    window_days: u32,
) -> IncomeFeatures {
    if transactions.is_empty() {
        return IncomeFeatures::zero();
    }

    let mut payroll: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| !t.pending && is_payroll_candidate(t))
        .collect();
    payroll.sort_by_key(|t| t.date);

    let months = window_days as f64 / 30.0;
    let total_payroll: f64 = payroll.iter().map(|t| t.amount).sum();
    let monthly_income = if months > 0.0 { total_payroll / months } else { 0.0 };

    let median_gap = median_gap_days(&payroll);
    let pay_frequency = bucket_frequency(payroll.len(), median_gap);

    let checking_balance: f64 = accounts
        .iter()
        .filter(|a| a.subtype == AccountSubtype::Checking)
        .map(|a| a.current_balance)
        .sum();

    let total_outflow: f64 = transactions
        .iter()
        .filter(|t| t.is_outflow() && !t.pending)
        .map(|t| t.amount.abs())
        .sum();
    let avg_monthly_expense = if months > 0.0 { total_outflow / months } else { 0.0 };

    let buffer = if avg_monthly_expense > 0.0 {
        checking_balance / avg_monthly_expense
    } else {
        0.0
    };

    let is_variable = median_gap > IRREGULAR_GAP_DAYS && buffer < 1.0;

    IncomeFeatures {
        payroll_deposit_count: payroll.len() as u32,
        monthly_income_estimate: monthly_income,
        pay_frequency,
        median_pay_gap_days: median_gap,
        cash_flow_buffer_months: buffer,
        is_variable_income: is_variable,
    }
}

pub fn is_payroll_candidate(tx: &Transaction) -> bool {
    if !tx.is_inflow() || tx.amount < PAYROLL_MIN_AMOUNT {
        return false;
    }

    let primary = tx.category_primary.to_lowercase();
    let detailed = tx.category_detailed.to_lowercase();
    primary.contains("income")
        || detailed.contains("payroll")
        || detailed.contains("deposit")
        || matches!(tx.payment_channel, PaymentChannel::Ach | PaymentChannel::Other)
}

fn median_gap_days(payroll: &[&Transaction]) -> f64 {
    if payroll.len() < 2 {
        return 0.0;
    }

    let mut gaps: Vec<i64> = payroll
        .windows(2)
        .map(|pair| (pair[1].date - pair[0].date).num_days())
        .collect();
    gaps.sort_unstable();

    let mid = gaps.len() / 2;
    if gaps.len() % 2 == 1 {
        gaps[mid] as f64
    } else {
        (gaps[mid - 1] + gaps[mid]) as f64 / 2.0
    }
}

fn bucket_frequency(deposit_count: usize, median_gap: f64) -> PayFrequency {
    if deposit_count < 2 {
        return PayFrequency::Unknown;
    }

    if median_gap <= 9.0 {
        PayFrequency::Weekly
    } else if median_gap <= 20.0 {
        PayFrequency::Biweekly
    } else if median_gap <= IRREGULAR_GAP_DAYS {
        PayFrequency::Monthly
    } else {
        PayFrequency::Irregular
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountType;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn checking(balance: f64) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
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

    fn deposit(day: i64, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(day),
            amount,
            merchant_name: Some("Employer".to_string()),
            category_primary: "income".to_string(),
            category_detailed: "income_payroll".to_string(),
            payment_channel: PaymentChannel::Ach,
            pending: false,
        }
    }

    fn expense(day: i64, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(day),
            amount: -amount,
            merchant_name: Some("Shop".to_string()),
            category_primary: "general".to_string(),
            category_detailed: "general".to_string(),
            payment_channel: PaymentChannel::InStore,
            pending: false,
        }
    }

    #[test]
    fn test_empty_input_is_zeroed() {
        let features = extract(&[checking(1000.0)], &[], 30);
        assert_eq!(features, IncomeFeatures::zero());
    }

    #[test]
    fn test_biweekly_frequency() {
        let transactions = vec![deposit(0, 1500.0), deposit(14, 1500.0), deposit(28, 1500.0)];
        let features = extract(&[checking(2000.0)], &transactions, 30);

        assert_eq!(features.payroll_deposit_count, 3);
        assert_eq!(features.pay_frequency, PayFrequency::Biweekly);
        assert!((features.median_pay_gap_days - 14.0).abs() < 1e-9);
        assert!((features.monthly_income_estimate - 4500.0).abs() < 1e-9);
        assert!(!features.is_variable_income);
    }

    #[test]
    fn test_small_inflow_not_payroll() {
        let transactions = vec![deposit(0, 200.0), deposit(14, 200.0), expense(5, 50.0)];
        let features = extract(&[checking(500.0)], &transactions, 30);
        assert_eq!(features.payroll_deposit_count, 0);
        assert_eq!(features.pay_frequency, PayFrequency::Unknown);
    }

    #[test]
    fn test_variable_income_requires_thin_buffer() {
        // Two deposits 60 days apart, checking buffer under a month of expenses.
        let transactions = vec![
            deposit(0, 2000.0),
            deposit(60, 2400.0),
            expense(10, 1500.0),
            expense(40, 1500.0),
            expense(70, 1500.0),
            expense(100, 1500.0),
            expense(130, 1500.0),
            expense(160, 1500.0),
        ];
        let features = extract(&[checking(500.0)], &transactions, 180);

        assert_eq!(features.pay_frequency, PayFrequency::Irregular);
        assert!(features.median_pay_gap_days > 45.0);
        assert!(features.cash_flow_buffer_months < 1.0);
        assert!(features.is_variable_income);
    }

    #[test]
    fn test_irregular_with_healthy_buffer_not_variable() {
        let transactions = vec![
            deposit(0, 2000.0),
            deposit(60, 2400.0),
            expense(10, 300.0),
            expense(100, 300.0),
        ];
        let features = extract(&[checking(5000.0)], &transactions, 180);

        assert_eq!(features.pay_frequency, PayFrequency::Irregular);
        assert!(!features.is_variable_income);
    }
}
