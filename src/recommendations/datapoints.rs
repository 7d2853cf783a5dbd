//! Data point resolution for recommendation templates.
//!
//! Templates name the fields they want to personalize with; the extractor
//! resolves each against the user's accounts, liabilities, transactions and
//! feature snapshot. Resolution never fails: a field that cannot be filled
//! is reported as unresolved and falls back to generic copy.

use crate::features::credit::is_interest_charge;
use crate::features::FeatureSnapshot;
use crate::models::{Account, AccountSubtype, Liability, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const DAYS_PER_MONTH: f64 = 30.44;

/// Fields a template body or action line can reference via `{token}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataField {
    CardLast4,
    UtilizationPct,
    CardBalance,
    CreditLimit,
    Apr,
    MinimumPayment,
    MonthlyInterestCharge,
    SavingsBalance,
    CheckingBalance,
    EmergencyFundMonths,
    AvgMonthlyExpense,
    MonthlyRecurringSpend,
    RecurringMerchantCount,
    MonthlyIncomeEstimate,
}

pub const ALL_DATA_FIELDS: &[DataField] = &[
    DataField::CardLast4,
    DataField::UtilizationPct,
    DataField::CardBalance,
    DataField::CreditLimit,
    DataField::Apr,
    DataField::MinimumPayment,
    DataField::MonthlyInterestCharge,
    DataField::SavingsBalance,
    DataField::CheckingBalance,
    DataField::EmergencyFundMonths,
    DataField::AvgMonthlyExpense,
    DataField::MonthlyRecurringSpend,
    DataField::RecurringMerchantCount,
    DataField::MonthlyIncomeEstimate,
];

impl DataField {
    pub fn token(&self) -> &'static str {
        match self {
            DataField::CardLast4 => "card_last4",
            DataField::UtilizationPct => "utilization_pct",
            DataField::CardBalance => "card_balance",
            DataField::CreditLimit => "credit_limit",
            DataField::Apr => "apr",
            DataField::MinimumPayment => "minimum_payment",
            DataField::MonthlyInterestCharge => "monthly_interest_charge",
            DataField::SavingsBalance => "savings_balance",
            DataField::CheckingBalance => "checking_balance",
            DataField::EmergencyFundMonths => "emergency_fund_months",
            DataField::AvgMonthlyExpense => "avg_monthly_expense",
            DataField::MonthlyRecurringSpend => "monthly_recurring_spend",
            DataField::RecurringMerchantCount => "recurring_merchant_count",
            DataField::MonthlyIncomeEstimate => "monthly_income_estimate",
        }
    }

    pub fn parse(token: &str) -> Option<DataField> {
        ALL_DATA_FIELDS.iter().copied().find(|f| f.token() == token)
    }

    /// Generic copy used when the field cannot be resolved for this user.
    pub fn default_text(&self) -> &'static str {
        match self {
            DataField::CardLast4 => "your card",
            DataField::UtilizationPct => "a high share of your limit",
            DataField::CardBalance => "your card balance",
            DataField::CreditLimit => "your credit limit",
            DataField::Apr => "your card's interest rate",
            DataField::MinimumPayment => "the minimum payment",
            DataField::MonthlyInterestCharge => "the interest you are paying",
            DataField::SavingsBalance => "your savings balance",
            DataField::CheckingBalance => "your checking balance",
            DataField::EmergencyFundMonths => "your current cushion",
            DataField::AvgMonthlyExpense => "your monthly spending",
            DataField::MonthlyRecurringSpend => "your recurring charges",
            DataField::RecurringMerchantCount => "several",
            DataField::MonthlyIncomeEstimate => "your monthly income",
        }
    }
}

/// A resolved value with its display format attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    Money(f64),
    Percent(f64),
    Rate(f64),
    Count(u32),
    Months(f64),
    Text(String),
}

impl DataValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DataValue::Money(v) | DataValue::Percent(v) | DataValue::Rate(v)
            | DataValue::Months(v) => Some(*v),
            DataValue::Count(v) => Some(*v as f64),
            DataValue::Text(_) => None,
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Money(v) => write!(f, "${:.2}", v),
            DataValue::Percent(v) => write!(f, "{:.1}%", v),
            DataValue::Rate(v) => write!(f, "{:.2}% APR", v),
            DataValue::Count(v) => write!(f, "{}", v),
            DataValue::Months(v) => write!(f, "{:.1} months", v),
            DataValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Outcome of resolving a template's required fields.
#[derive(Debug, Clone, Default)]
pub struct ResolvedFields {
    pub values: BTreeMap<DataField, DataValue>,
    pub unresolved: Vec<DataField>,
}

impl ResolvedFields {
    /// Fraction of requested fields that resolved. Empty requests count
    /// as fully resolved.
    pub fn resolution_ratio(&self) -> f64 {
        let total = self.values.len() + self.unresolved.len();
        if total == 0 {
            return 1.0;
        }
        self.values.len() as f64 / total as f64
    }

    pub fn render(&self, field: DataField) -> String {
        match self.values.get(&field) {
            Some(value) => value.to_string(),
            None => field.default_text().to_string(),
        }
    }
}

pub struct DataPointExtractor;

impl DataPointExtractor {
    /// Resolves `required` against the user's data. Card-level fields come
    /// from the card with the highest utilization so copy stays consistent
    /// across fields within one recommendation.
    pub fn resolve(
        accounts: &[Account],
        liabilities: &[Liability],
        transactions: &[Transaction],
        snapshot: &FeatureSnapshot,
        required: &[DataField],
        window_days: u32,
    ) -> ResolvedFields {
        let mut resolved = ResolvedFields::default();

        let hot_card = accounts
            .iter()
            .filter(|a| a.subtype == AccountSubtype::CreditCard)
            .filter_map(|a| a.utilization().map(|u| (a, u)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(a, _)| a);
        let hot_liability = hot_card
            .and_then(|card| liabilities.iter().find(|l| l.account_id == card.account_id));

        for &field in required {
            let value = Self::resolve_one(
                field,
                accounts,
                transactions,
                snapshot,
                hot_card,
                hot_liability,
                window_days,
            );
            match value {
                Some(v) => {
                    resolved.values.insert(field, v);
                }
                None => resolved.unresolved.push(field),
            }
        }

        resolved
    }

    fn resolve_one(
        field: DataField,
        accounts: &[Account],
        transactions: &[Transaction],
        snapshot: &FeatureSnapshot,
        hot_card: Option<&Account>,
        hot_liability: Option<&Liability>,
        window_days: u32,
    ) -> Option<DataValue> {
        match field {
            DataField::CardLast4 => hot_card
                .and_then(|c| c.mask.as_ref())
                .map(|mask| DataValue::Text(format!("your card ending in {}", mask))),
            DataField::UtilizationPct => hot_card
                .and_then(|c| c.utilization())
                .map(|u| DataValue::Percent(u * 100.0)),
            DataField::CardBalance => accounts
                .iter()
                .filter(|a| a.subtype == AccountSubtype::CreditCard)
                .max_by(|a, b| {
                    a.current_balance
                        .abs()
                        .partial_cmp(&b.current_balance.abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|a| DataValue::Money(a.current_balance.abs())),
            DataField::CreditLimit => hot_card
                .and_then(|c| c.credit_limit)
                .map(DataValue::Money),
            DataField::Apr => hot_liability.and_then(|l| l.apr).map(DataValue::Rate),
            DataField::MinimumPayment => hot_liability
                .and_then(|l| l.minimum_payment)
                .map(DataValue::Money),
            DataField::MonthlyInterestCharge => {
                let card = hot_card?;
                let total: f64 = transactions
                    .iter()
                    .filter(|t| t.account_id == card.account_id && is_interest_charge(t))
                    .map(|t| t.amount.abs())
                    .sum();
                if total <= 0.0 {
                    return None;
                }
                let months = (window_days as f64 / DAYS_PER_MONTH).max(1.0);
                Some(DataValue::Money(total / months))
            }
            DataField::SavingsBalance => balance_of(accounts, AccountSubtype::Savings),
            DataField::CheckingBalance => balance_of(accounts, AccountSubtype::Checking),
            DataField::EmergencyFundMonths => {
                Some(DataValue::Months(snapshot.savings.emergency_fund_months))
            }
            DataField::AvgMonthlyExpense => {
                let expense = snapshot.savings.avg_monthly_expense;
                (expense > 0.0).then(|| DataValue::Money(expense))
            }
            DataField::MonthlyRecurringSpend => {
                let spend = snapshot.subscription.monthly_recurring_spend;
                (spend > 0.0).then(|| DataValue::Money(spend))
            }
            DataField::RecurringMerchantCount => {
                let count = snapshot.subscription.recurring_merchant_count;
                (count > 0).then_some(DataValue::Count(count))
            }
            DataField::MonthlyIncomeEstimate => {
                let income = snapshot.income.monthly_income_estimate;
                (income > 0.0).then(|| DataValue::Money(income))
            }
        }
    }
}

fn balance_of(accounts: &[Account], subtype: AccountSubtype) -> Option<DataValue> {
    accounts
        .iter()
        .filter(|a| a.subtype == subtype)
        .max_by(|a, b| {
            a.current_balance
                .partial_cmp(&b.current_balance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|a| DataValue::Money(a.current_balance))
}
