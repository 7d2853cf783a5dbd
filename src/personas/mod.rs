//! Persona catalog
//!
//! Personas are declarative configuration: named predicates over a feature
//! snapshot plus a priority weight and a rationale template. The catalog is
//! validated eagerly at construction so a malformed definition fails at
//! startup, never during a user request.

pub mod engine;

pub use engine::{AssignmentOutcome, PersonaAssignmentEngine};

use crate::error::EngineError;
use crate::features::FeatureSnapshot;
use crate::models::RiskLevel;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

//
// ================= Feature Fields =================
//

/// Named metrics a predicate or reason template may reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeatureField {
    // Subscription
    RecurringMerchantCount,
    MonthlyRecurringSpend,
    SubscriptionSharePct,
    // Savings
    NetSavingsInflow,
    SavingsGrowthRatePct,
    InsufficientHistory,
    EmergencyFundMonths,
    HasEmergencyFund,
    AvgMonthlyExpense,
    // Credit
    CardCount,
    MaxUtilizationPct,
    HighUtilization30,
    HighUtilization50,
    HighUtilization80,
    MinimumPaymentOnly,
    InterestCharges,
    Overdue,
    // Income
    PayrollDepositCount,
    MonthlyIncomeEstimate,
    MedianPayGapDays,
    CashFlowBufferMonths,
    IsVariableIncome,
}

enum FieldFormat {
    Count,
    Money,
    Percent,
    Months,
    Days,
    Flag,
}

impl FeatureField {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureField::RecurringMerchantCount => "recurring_merchant_count",
            FeatureField::MonthlyRecurringSpend => "monthly_recurring_spend",
            FeatureField::SubscriptionSharePct => "subscription_share_pct",
            FeatureField::NetSavingsInflow => "net_savings_inflow",
            FeatureField::SavingsGrowthRatePct => "savings_growth_rate_pct",
            FeatureField::InsufficientHistory => "insufficient_history",
            FeatureField::EmergencyFundMonths => "emergency_fund_months",
            FeatureField::HasEmergencyFund => "has_emergency_fund",
            FeatureField::AvgMonthlyExpense => "avg_monthly_expense",
            FeatureField::CardCount => "card_count",
            FeatureField::MaxUtilizationPct => "max_utilization_pct",
            FeatureField::HighUtilization30 => "high_utilization_30",
            FeatureField::HighUtilization50 => "high_utilization_50",
            FeatureField::HighUtilization80 => "high_utilization_80",
            FeatureField::MinimumPaymentOnly => "minimum_payment_only",
            FeatureField::InterestCharges => "interest_charges",
            FeatureField::Overdue => "overdue",
            FeatureField::PayrollDepositCount => "payroll_deposit_count",
            FeatureField::MonthlyIncomeEstimate => "monthly_income_estimate",
            FeatureField::MedianPayGapDays => "median_pay_gap_days",
            FeatureField::CashFlowBufferMonths => "cash_flow_buffer_months",
            FeatureField::IsVariableIncome => "is_variable_income",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        ALL_FIELDS.iter().copied().find(|f| f.name() == name)
    }

    /// Numeric view of the field; flags read as 0/1.
    pub fn numeric(&self, s: &FeatureSnapshot) -> f64 {
        match self {
            FeatureField::RecurringMerchantCount => {
                s.subscription.recurring_merchant_count as f64
            }
            FeatureField::MonthlyRecurringSpend => s.subscription.monthly_recurring_spend,
            FeatureField::SubscriptionSharePct => {
                s.subscription.subscription_share_of_spend * 100.0
            }
            FeatureField::NetSavingsInflow => s.savings.net_savings_inflow,
            FeatureField::SavingsGrowthRatePct => s.savings.savings_growth_rate * 100.0,
            FeatureField::InsufficientHistory => flag_value(s.savings.insufficient_history),
            FeatureField::EmergencyFundMonths => s.savings.emergency_fund_months,
            FeatureField::HasEmergencyFund => flag_value(s.savings.has_emergency_fund),
            FeatureField::AvgMonthlyExpense => s.savings.avg_monthly_expense,
            FeatureField::CardCount => s.credit.card_count as f64,
            FeatureField::MaxUtilizationPct => s.credit.max_utilization_pct,
            FeatureField::HighUtilization30 => flag_value(s.credit.high_utilization_30),
            FeatureField::HighUtilization50 => flag_value(s.credit.high_utilization_50),
            FeatureField::HighUtilization80 => flag_value(s.credit.high_utilization_80),
            FeatureField::MinimumPaymentOnly => flag_value(s.credit.minimum_payment_only),
            FeatureField::InterestCharges => flag_value(s.credit.interest_charges),
            FeatureField::Overdue => flag_value(s.credit.overdue),
            FeatureField::PayrollDepositCount => s.income.payroll_deposit_count as f64,
            FeatureField::MonthlyIncomeEstimate => s.income.monthly_income_estimate,
            FeatureField::MedianPayGapDays => s.income.median_pay_gap_days,
            FeatureField::CashFlowBufferMonths => s.income.cash_flow_buffer_months,
            FeatureField::IsVariableIncome => flag_value(s.income.is_variable_income),
        }
    }

    /// Human-readable rendering for reason templates.
    pub fn display(&self, s: &FeatureSnapshot) -> String {
        let value = self.numeric(s);
        match self.format() {
            FieldFormat::Count => format!("{}", value as i64),
            FieldFormat::Money => format!("${:.2}", value),
            FieldFormat::Percent => format!("{:.1}%", value),
            FieldFormat::Months => format!("{:.1} months", value),
            FieldFormat::Days => format!("{:.0} days", value),
            FieldFormat::Flag => if value > 0.0 { "yes" } else { "no" }.to_string(),
        }
    }

    fn format(&self) -> FieldFormat {
        match self {
            FeatureField::RecurringMerchantCount
            | FeatureField::CardCount
            | FeatureField::PayrollDepositCount => FieldFormat::Count,
            FeatureField::MonthlyRecurringSpend
            | FeatureField::NetSavingsInflow
            | FeatureField::AvgMonthlyExpense
            | FeatureField::MonthlyIncomeEstimate => FieldFormat::Money,
            FeatureField::SubscriptionSharePct
            | FeatureField::SavingsGrowthRatePct
            | FeatureField::MaxUtilizationPct => FieldFormat::Percent,
            FeatureField::EmergencyFundMonths | FeatureField::CashFlowBufferMonths => {
                FieldFormat::Months
            }
            FeatureField::MedianPayGapDays => FieldFormat::Days,
            FeatureField::InsufficientHistory
            | FeatureField::HasEmergencyFund
            | FeatureField::HighUtilization30
            | FeatureField::HighUtilization50
            | FeatureField::HighUtilization80
            | FeatureField::MinimumPaymentOnly
            | FeatureField::InterestCharges
            | FeatureField::Overdue
            | FeatureField::IsVariableIncome => FieldFormat::Flag,
        }
    }
}

fn flag_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

const ALL_FIELDS: &[FeatureField] = &[
    FeatureField::RecurringMerchantCount,
    FeatureField::MonthlyRecurringSpend,
    FeatureField::SubscriptionSharePct,
    FeatureField::NetSavingsInflow,
    FeatureField::SavingsGrowthRatePct,
    FeatureField::InsufficientHistory,
    FeatureField::EmergencyFundMonths,
    FeatureField::HasEmergencyFund,
    FeatureField::AvgMonthlyExpense,
    FeatureField::CardCount,
    FeatureField::MaxUtilizationPct,
    FeatureField::HighUtilization30,
    FeatureField::HighUtilization50,
    FeatureField::HighUtilization80,
    FeatureField::MinimumPaymentOnly,
    FeatureField::InterestCharges,
    FeatureField::Overdue,
    FeatureField::PayrollDepositCount,
    FeatureField::MonthlyIncomeEstimate,
    FeatureField::MedianPayGapDays,
    FeatureField::CashFlowBufferMonths,
    FeatureField::IsVariableIncome,
];

//
// ================= Predicates =================
//

/// Tagged-variant predicate evaluator — catalog rules stay data, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Predicate {
    Flag { field: FeatureField },
    NotFlag { field: FeatureField },
    Gte { field: FeatureField, value: f64 },
    Gt { field: FeatureField, value: f64 },
    Lte { field: FeatureField, value: f64 },
    Lt { field: FeatureField, value: f64 },
}

impl Predicate {
    pub fn evaluate(&self, snapshot: &FeatureSnapshot) -> bool {
        match self {
            Predicate::Flag { field } => field.numeric(snapshot) > 0.0,
            Predicate::NotFlag { field } => field.numeric(snapshot) <= 0.0,
            Predicate::Gte { field, value } => field.numeric(snapshot) >= *value,
            Predicate::Gt { field, value } => field.numeric(snapshot) > *value,
            Predicate::Lte { field, value } => field.numeric(snapshot) <= *value,
            Predicate::Lt { field, value } => field.numeric(snapshot) < *value,
        }
    }
}

//
// ================= Criteria and Personas =================
//

/// One named check with a human-readable reason string. Reason templates may
/// reference feature fields with `{field_name}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub reason: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Every criterion in the group must hold.
    All,
    /// At least one criterion in the group must hold.
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionGroup {
    pub mode: GroupMode,
    pub criteria: Vec<Criterion>,
}

/// Static persona definition. A persona matches when all of its groups pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub id: String,
    pub display_name: String,
    pub groups: Vec<CriterionGroup>,
    pub priority_weight: f64,
    /// Static tie-break order; lower rank wins ties on points.
    pub priority_rank: u32,
    pub risk_level: RiskLevel,
    /// Must contain `{reasons}` when the persona has criteria.
    pub rationale_template: String,
}

//
// ================= Catalog =================
//

#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: Vec<PersonaDefinition>,
    default_persona_id: String,
}

impl PersonaCatalog {
    /// Build and eagerly validate a catalog. Malformed definitions fail here,
    /// before any user request is served.
    pub fn new(personas: Vec<PersonaDefinition>, default_persona_id: &str) -> Result<Self> {
        let catalog = Self {
            personas,
            default_persona_id: default_persona_id.to_string(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn personas(&self) -> &[PersonaDefinition] {
        &self.personas
    }

    pub fn default_persona(&self) -> &PersonaDefinition {
        // Validation guarantees presence.
        self.personas
            .iter()
            .find(|p| p.id == self.default_persona_id)
            .expect("validated catalog has a default persona")
    }

    pub fn get(&self, persona_id: &str) -> Option<&PersonaDefinition> {
        self.personas.iter().find(|p| p.id == persona_id)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for persona in &self.personas {
            if !seen.insert(persona.id.as_str()) {
                return Err(EngineError::MalformedCatalog(format!(
                    "duplicate persona id '{}'",
                    persona.id
                )));
            }

            if persona.priority_weight <= 0.0 {
                return Err(EngineError::MalformedCatalog(format!(
                    "persona '{}' has non-positive priority weight",
                    persona.id
                )));
            }

            let is_default = persona.id == self.default_persona_id;
            if is_default && !persona.groups.is_empty() {
                return Err(EngineError::MalformedCatalog(format!(
                    "default persona '{}' must not declare criteria",
                    persona.id
                )));
            }
            if !is_default && persona.groups.is_empty() {
                return Err(EngineError::MalformedCatalog(format!(
                    "persona '{}' has no criteria groups",
                    persona.id
                )));
            }

            if !persona.groups.is_empty() && !persona.rationale_template.contains("{reasons}") {
                return Err(EngineError::MalformedCatalog(format!(
                    "persona '{}' rationale template is missing {{reasons}}",
                    persona.id
                )));
            }

            for group in &persona.groups {
                if group.criteria.is_empty() {
                    return Err(EngineError::MalformedCatalog(format!(
                        "persona '{}' has an empty criterion group",
                        persona.id
                    )));
                }
                for criterion in &group.criteria {
                    for token in placeholder_tokens(&criterion.reason) {
                        if FeatureField::parse(&token).is_none() {
                            return Err(EngineError::MalformedCatalog(format!(
                                "persona '{}' criterion '{}' references unknown field '{}'",
                                persona.id, criterion.name, token
                            )));
                        }
                    }
                }
            }
        }

        if !seen.contains(self.default_persona_id.as_str()) {
            return Err(EngineError::MalformedCatalog(format!(
                "default persona '{}' is not defined",
                self.default_persona_id
            )));
        }

        Ok(())
    }
}

/// Extract `{token}` placeholders from a template string.
pub fn placeholder_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        tokens.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    tokens
}

/// Substitute `{field_name}` placeholders with formatted snapshot values.
pub fn render_reason(template: &str, snapshot: &FeatureSnapshot) -> String {
    let mut rendered = template.to_string();
    for token in placeholder_tokens(template) {
        if let Some(field) = FeatureField::parse(&token) {
            rendered = rendered.replace(&format!("{{{}}}", token), &field.display(snapshot));
        }
    }
    rendered
}

//
// ================= Built-in Catalog =================
//

fn criterion(name: &str, reason: &str, predicate: Predicate) -> Criterion {
    Criterion {
        name: name.to_string(),
        reason: reason.to_string(),
        predicate,
    }
}

/// The built-in persona catalog.
pub fn default_catalog() -> PersonaCatalog {
    let personas = vec![
        PersonaDefinition {
            id: "high_utilization".to_string(),
            display_name: "High Credit Utilization".to_string(),
            groups: vec![CriterionGroup {
                mode: GroupMode::Any,
                criteria: vec![
                    criterion(
                        "utilization_above_80",
                        "credit utilization at {max_utilization_pct} of your limit",
                        Predicate::Gte {
                            field: FeatureField::MaxUtilizationPct,
                            value: 80.0,
                        },
                    ),
                    criterion(
                        "interest_charges",
                        "interest charges posted this window",
                        Predicate::Flag {
                            field: FeatureField::InterestCharges,
                        },
                    ),
                    criterion(
                        "minimum_payment_only",
                        "recent payments covered only the minimum due",
                        Predicate::Flag {
                            field: FeatureField::MinimumPaymentOnly,
                        },
                    ),
                    criterion(
                        "overdue_account",
                        "an account is past due",
                        Predicate::Flag {
                            field: FeatureField::Overdue,
                        },
                    ),
                ],
            }],
            priority_weight: 3.0,
            priority_rank: 1,
            risk_level: RiskLevel::High,
            rationale_template:
                "Your credit activity needs attention: {reasons}.".to_string(),
        },
        PersonaDefinition {
            id: "variable_income".to_string(),
            display_name: "Variable Income".to_string(),
            groups: vec![CriterionGroup {
                mode: GroupMode::All,
                criteria: vec![criterion(
                    "irregular_income_thin_buffer",
                    "income arrives irregularly (median gap {median_pay_gap_days}) with under a month of cash buffer",
                    Predicate::Flag {
                        field: FeatureField::IsVariableIncome,
                    },
                )],
            }],
            priority_weight: 2.5,
            priority_rank: 2,
            risk_level: RiskLevel::Medium,
            rationale_template:
                "Your income pattern suggests planning ahead: {reasons}.".to_string(),
        },
        PersonaDefinition {
            id: "subscription_heavy".to_string(),
            display_name: "Subscription Heavy".to_string(),
            groups: vec![CriterionGroup {
                mode: GroupMode::Any,
                criteria: vec![
                    criterion(
                        "many_recurring_merchants",
                        "{recurring_merchant_count} recurring subscriptions detected",
                        Predicate::Gte {
                            field: FeatureField::RecurringMerchantCount,
                            value: 4.0,
                        },
                    ),
                    criterion(
                        "high_subscription_share",
                        "subscriptions make up {subscription_share_pct} of your spending",
                        Predicate::Gte {
                            field: FeatureField::SubscriptionSharePct,
                            value: 15.0,
                        },
                    ),
                    criterion(
                        "high_recurring_spend",
                        "about {monthly_recurring_spend} per month goes to subscriptions",
                        Predicate::Gte {
                            field: FeatureField::MonthlyRecurringSpend,
                            value: 100.0,
                        },
                    ),
                ],
            }],
            priority_weight: 2.0,
            priority_rank: 3,
            risk_level: RiskLevel::Medium,
            rationale_template:
                "Recurring charges are a big part of your spending: {reasons}.".to_string(),
        },
        PersonaDefinition {
            id: "low_savings".to_string(),
            display_name: "Building Savings".to_string(),
            groups: vec![
                // Gate on real spending history so an all-zero snapshot
                // falls through to the default persona.
                CriterionGroup {
                    mode: GroupMode::All,
                    criteria: vec![criterion(
                        "active_spending_history",
                        "regular spending activity this window",
                        Predicate::Gt {
                            field: FeatureField::AvgMonthlyExpense,
                            value: 0.0,
                        },
                    )],
                },
                CriterionGroup {
                    mode: GroupMode::Any,
                    criteria: vec![
                        criterion(
                            "thin_emergency_fund",
                            "emergency fund covers {emergency_fund_months} of expenses",
                            Predicate::Lt {
                                field: FeatureField::EmergencyFundMonths,
                                value: 1.0,
                            },
                        ),
                        criterion(
                            "declining_savings",
                            "savings balances declined this window",
                            Predicate::Lt {
                                field: FeatureField::NetSavingsInflow,
                                value: 0.0,
                            },
                        ),
                    ],
                },
            ],
            priority_weight: 2.0,
            priority_rank: 4,
            risk_level: RiskLevel::Medium,
            rationale_template:
                "Your savings cushion could be stronger: {reasons}.".to_string(),
        },
        PersonaDefinition {
            id: "wealth_builder".to_string(),
            display_name: "Wealth Builder".to_string(),
            groups: vec![
                CriterionGroup {
                    mode: GroupMode::All,
                    criteria: vec![
                        criterion(
                            "emergency_fund_in_place",
                            "emergency fund covers {emergency_fund_months} of expenses",
                            Predicate::Flag {
                                field: FeatureField::HasEmergencyFund,
                            },
                        ),
                        criterion(
                            "moderate_utilization",
                            "credit utilization stays below half of your limits",
                            Predicate::NotFlag {
                                field: FeatureField::HighUtilization50,
                            },
                        ),
                    ],
                },
                CriterionGroup {
                    mode: GroupMode::Any,
                    criteria: vec![
                        criterion(
                            "positive_savings_flow",
                            "savings grew by {net_savings_inflow} this window",
                            Predicate::Gt {
                                field: FeatureField::NetSavingsInflow,
                                value: 0.0,
                            },
                        ),
                        criterion(
                            "savings_trending_up",
                            "savings balances trending up ({savings_growth_rate_pct})",
                            Predicate::Gt {
                                field: FeatureField::SavingsGrowthRatePct,
                                value: 0.0,
                            },
                        ),
                    ],
                },
            ],
            priority_weight: 1.5,
            priority_rank: 5,
            risk_level: RiskLevel::Low,
            rationale_template:
                "You are building from a position of strength: {reasons}.".to_string(),
        },
        PersonaDefinition {
            id: "balanced".to_string(),
            display_name: "Balanced & Stable".to_string(),
            groups: vec![],
            priority_weight: 1.0,
            priority_rank: 6,
            risk_level: RiskLevel::Low,
            rationale_template:
                "Your activity this window looks steady with no elevated risk signals."
                    .to_string(),
        },
    ];

    PersonaCatalog::new(personas, "balanced").expect("built-in persona catalog is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_catalog_validates() {
        let catalog = default_catalog();
        assert_eq!(catalog.default_persona().id, "balanced");
        assert!(catalog.get("high_utilization").is_some());
    }

    #[test]
    fn test_duplicate_persona_rejected() {
        let persona = || PersonaDefinition {
            id: "balanced".to_string(),
            display_name: "Balanced".to_string(),
            groups: vec![],
            priority_weight: 1.0,
            priority_rank: 1,
            risk_level: RiskLevel::Low,
            rationale_template: "Steady.".to_string(),
        };

        let result = PersonaCatalog::new(vec![persona(), persona()], "balanced");
        assert!(matches!(result, Err(EngineError::MalformedCatalog(_))));
    }

    #[test]
    fn test_unknown_reason_field_rejected_at_load() {
        let personas = vec![
            PersonaDefinition {
                id: "broken".to_string(),
                display_name: "Broken".to_string(),
                groups: vec![CriterionGroup {
                    mode: GroupMode::All,
                    criteria: vec![criterion(
                        "bad_field",
                        "value is {no_such_metric}",
                        Predicate::Flag {
                            field: FeatureField::Overdue,
                        },
                    )],
                }],
                priority_weight: 1.0,
                priority_rank: 1,
                risk_level: RiskLevel::Low,
                rationale_template: "{reasons}".to_string(),
            },
            PersonaDefinition {
                id: "balanced".to_string(),
                display_name: "Balanced".to_string(),
                groups: vec![],
                priority_weight: 1.0,
                priority_rank: 2,
                risk_level: RiskLevel::Low,
                rationale_template: "Steady.".to_string(),
            },
        ];

        let result = PersonaCatalog::new(personas, "balanced");
        assert!(matches!(result, Err(EngineError::MalformedCatalog(_))));
    }

    #[test]
    fn test_missing_default_rejected() {
        let personas = vec![PersonaDefinition {
            id: "solo".to_string(),
            display_name: "Solo".to_string(),
            groups: vec![CriterionGroup {
                mode: GroupMode::All,
                criteria: vec![criterion(
                    "overdue",
                    "past due",
                    Predicate::Flag {
                        field: FeatureField::Overdue,
                    },
                )],
            }],
            priority_weight: 1.0,
            priority_rank: 1,
            risk_level: RiskLevel::Low,
            rationale_template: "{reasons}".to_string(),
        }];

        let result = PersonaCatalog::new(personas, "balanced");
        assert!(matches!(result, Err(EngineError::MalformedCatalog(_))));
    }

    #[test]
    fn test_reason_rendering_formats_percent() {
        let mut snapshot = FeatureSnapshot::zero(Uuid::new_v4(), 30);
        snapshot.credit.max_utilization_pct = 93.4;

        let rendered = render_reason(
            "credit utilization at {max_utilization_pct} of your limit",
            &snapshot,
        );
        assert_eq!(rendered, "credit utilization at 93.4% of your limit");
    }

    #[test]
    fn test_predicate_evaluation() {
        let mut snapshot = FeatureSnapshot::zero(Uuid::new_v4(), 30);
        snapshot.credit.interest_charges = true;
        snapshot.subscription.recurring_merchant_count = 5;

        assert!(Predicate::Flag {
            field: FeatureField::InterestCharges
        }
        .evaluate(&snapshot));
        assert!(Predicate::Gte {
            field: FeatureField::RecurringMerchantCount,
            value: 4.0
        }
        .evaluate(&snapshot));
        assert!(Predicate::NotFlag {
            field: FeatureField::Overdue
        }
        .evaluate(&snapshot));
        assert!(!Predicate::Lt {
            field: FeatureField::RecurringMerchantCount,
            value: 5.0
        }
        .evaluate(&snapshot));
    }
}
