//! Savings signal extractor

use crate::models::{Account, AccountSubtype, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Months of expense coverage required to count as an emergency fund.
const EMERGENCY_FUND_MONTHS: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsFeatures {
    /// Net signed flow into savings-type accounts over the window.
    pub net_savings_inflow: f64,
    /// (ending − starting) ÷ starting balance; 0 when starting ≤ 0.
    pub savings_growth_rate: f64,
    pub insufficient_history: bool,
    /// Savings balance ÷ average monthly expense, 0 if no expense history.
    pub emergency_fund_months: f64,
    pub has_emergency_fund: bool,
    pub avg_monthly_expense: f64,
}

impl SavingsFeatures {
    pub fn zero() -> Self {
        Self {
            net_savings_inflow: 0.0,
            savings_growth_rate: 0.0,
            insufficient_history: false,
            emergency_fund_months: 0.0,
            has_emergency_fund: false,
            avg_monthly_expense: 0.0,
        }
    }
}

pub fn extract(
    accounts: &[Account],
    transactions: &[Transaction],
    window_days: u32,
) -> SavingsFeatures {
    // An empty window means "no data yet": the record stays zeroed so
    // downstream stages need no null-checks.
    if transactions.is_empty() {
        return SavingsFeatures::zero();
    }

    let savings_ids: HashSet<_> = accounts
        .iter()
        .filter(|a| a.subtype == AccountSubtype::Savings)
        .map(|a| a.account_id)
        .collect();

    let ending_balance: f64 = accounts
        .iter()
        .filter(|a| savings_ids.contains(&a.account_id))
        .map(|a| a.current_balance)
        .sum();

    let net_inflow: f64 = transactions
        .iter()
        .filter(|t| !t.pending && savings_ids.contains(&t.account_id))
        .map(|t| t.amount)
        .sum();

    // The window only carries flows, so the starting balance is
    // reconstructed from the ending balance.
    let starting_balance = ending_balance - net_inflow;

    let (growth_rate, insufficient_history) = if starting_balance > 0.0 {
        ((ending_balance - starting_balance) / starting_balance, false)
    } else {
        (0.0, true)
    };

    let total_outflow: f64 = transactions
        .iter()
        .filter(|t| t.is_outflow() && !t.pending)
        .map(|t| t.amount.abs())
        .sum();
    let months = window_days as f64 / 30.0;
    let avg_monthly_expense = if months > 0.0 { total_outflow / months } else { 0.0 };

    let emergency_fund_months = if avg_monthly_expense > 0.0 {
        ending_balance / avg_monthly_expense
    } else {
        0.0
    };

    SavingsFeatures {
        net_savings_inflow: net_inflow,
        savings_growth_rate: growth_rate,
        insufficient_history,
        emergency_fund_months,
        has_emergency_fund: emergency_fund_months >= EMERGENCY_FUND_MONTHS,
        avg_monthly_expense,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, PaymentChannel};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn account(subtype: AccountSubtype, balance: f64) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Account".to_string(),
            account_type: AccountType::Depository,
            subtype,
            currency: "USD".to_string(),
            available_balance: Some(balance),
            current_balance: balance,
            credit_limit: None,
            interest_rate: None,
            next_payment_due: None,
            mask: None,
        }
    }

    fn tx(account_id: Uuid, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            amount,
            merchant_name: None,
            category_primary: "transfer".to_string(),
            category_detailed: "transfer_in".to_string(),
            payment_channel: PaymentChannel::Ach,
            pending: false,
        }
    }

    #[test]
    fn test_empty_input_is_zeroed() {
        let savings = account(AccountSubtype::Savings, 5000.0);
        let features = extract(&[savings], &[], 30);
        assert_eq!(features, SavingsFeatures::zero());
    }

    #[test]
    fn test_growth_rate_from_reconstructed_start() {
        let savings = account(AccountSubtype::Savings, 1100.0);
        let checking = account(AccountSubtype::Checking, 400.0);
        let transactions = vec![
            tx(savings.account_id, 100.0),
            tx(checking.account_id, -500.0),
        ];

        let features = extract(&[savings, checking], &transactions, 30);
        assert!((features.net_savings_inflow - 100.0).abs() < 1e-9);
        // Start = 1100 − 100 = 1000, growth = 10%.
        assert!((features.savings_growth_rate - 0.1).abs() < 1e-9);
        assert!(!features.insufficient_history);
        assert!((features.avg_monthly_expense - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_starting_balance_flags_insufficient_history() {
        let savings = account(AccountSubtype::Savings, 200.0);
        let transactions = vec![tx(savings.account_id, 200.0)];

        let features = extract(&[savings], &transactions, 30);
        assert_eq!(features.savings_growth_rate, 0.0);
        assert!(features.insufficient_history);
    }

    #[test]
    fn test_emergency_fund_threshold() {
        let savings = account(AccountSubtype::Savings, 6000.0);
        let checking = account(AccountSubtype::Checking, 500.0);
        let transactions = vec![tx(checking.account_id, -2000.0)];

        let features = extract(&[savings, checking], &transactions, 30);
        assert!((features.emergency_fund_months - 3.0).abs() < 1e-9);
        assert!(features.has_emergency_fund);
    }

    #[test]
    fn test_no_expense_history_gives_zero_coverage() {
        let savings = account(AccountSubtype::Savings, 6000.0);
        let transactions = vec![tx(savings.account_id, 100.0)];

        let features = extract(&[savings], &transactions, 30);
        assert_eq!(features.emergency_fund_months, 0.0);
        assert!(!features.has_emergency_fund);
    }
}
