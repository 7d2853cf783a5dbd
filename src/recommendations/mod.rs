//! Recommendation templates and catalog.
//!
//! Each template ties to one or more personas and declares the data fields
//! it wants for personalization. The catalog validates eagerly at load so a
//! bad template can never reach the generator.

pub mod datapoints;
pub mod generator;

pub use datapoints::{DataField, DataPointExtractor, DataValue, ResolvedFields};
pub use generator::RecommendationGenerator;

use crate::error::{EngineError, Result};
use crate::models::{AccountSubtype, Priority, RecommendationKind};
use crate::personas::PersonaCatalog;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default fraction of required fields that must resolve before a template
/// is eligible for a user.
pub const DEFAULT_MIN_DATA_AVAILABILITY: f64 = 0.5;

//
// ================= Disclosures =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureKind {
    Recommendation,
    PartnerOffer,
    Insight,
}

impl DisclosureKind {
    pub fn text(&self) -> &'static str {
        match self {
            DisclosureKind::Recommendation => {
                "This is educational content, not financial advice. \
                 Consider your full situation or consult a licensed advisor."
            }
            DisclosureKind::PartnerOffer => {
                "This is a partner offer. We may receive compensation if you \
                 apply. Approval is not guaranteed and terms are set by the partner."
            }
            DisclosureKind::Insight => {
                "This insight is derived from your linked account activity and \
                 may not reflect accounts held elsewhere."
            }
        }
    }
}

//
// ================= Impact =================
//

/// How a template estimates the benefit of acting on it. Rendered with the
/// `{amount}` placeholder substituted from a resolved field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImpactFormula {
    /// Twelve times a resolved monthly amount.
    YearlyFromMonthly { field: DataField, template: String },
    /// A resolved monthly amount as-is.
    MonthlyAmount { field: DataField, template: String },
    /// Static copy needing no data.
    FixedEstimate { text: String },
}

impl ImpactFormula {
    /// None when the backing field did not resolve to a number.
    pub fn render(&self, resolved: &ResolvedFields) -> Option<String> {
        match self {
            ImpactFormula::YearlyFromMonthly { field, template } => {
                let monthly = resolved.values.get(field)?.as_number()?;
                Some(template.replace("{amount}", &format!("${:.0}", monthly * 12.0)))
            }
            ImpactFormula::MonthlyAmount { field, template } => {
                let monthly = resolved.values.get(field)?.as_number()?;
                Some(template.replace("{amount}", &format!("${:.0}", monthly)))
            }
            ImpactFormula::FixedEstimate { text } => Some(text.clone()),
        }
    }

    fn backing_field(&self) -> Option<DataField> {
        match self {
            ImpactFormula::YearlyFromMonthly { field, .. }
            | ImpactFormula::MonthlyAmount { field, .. } => Some(*field),
            ImpactFormula::FixedEstimate { .. } => None,
        }
    }
}

//
// ================= Offer eligibility =================
//

/// Hard constraints a partner offer carries. Evaluated by the guardrail
/// chain, never by the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferEligibility {
    pub min_credit_score: Option<u32>,
    pub max_credit_score: Option<u32>,
    pub min_annual_income: Option<f64>,
    /// The user must not already hold an account of these subtypes.
    pub excluded_subtypes: Vec<AccountSubtype>,
    pub max_utilization_pct: Option<f64>,
}

impl OfferEligibility {
    pub fn is_unconstrained(&self) -> bool {
        self.min_credit_score.is_none()
            && self.max_credit_score.is_none()
            && self.min_annual_income.is_none()
            && self.excluded_subtypes.is_empty()
            && self.max_utilization_pct.is_none()
    }
}

//
// ================= Templates =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationTemplate {
    pub id: String,
    pub kind: RecommendationKind,
    /// Personas this template serves. A template is considered for a user
    /// when any assigned persona appears here.
    pub persona_ids: Vec<String>,
    pub title: String,
    pub body_template: String,
    pub action_templates: Vec<String>,
    pub impact: Option<ImpactFormula>,
    pub default_priority: Priority,
    /// Minimum resolution ratio over `required_fields`.
    pub min_data_availability: f64,
    pub required_fields: Vec<DataField>,
    pub eligibility: OfferEligibility,
    pub disclosure: DisclosureKind,
}

#[derive(Debug, Clone)]
pub struct RecommendationCatalog {
    templates: Vec<RecommendationTemplate>,
}

impl RecommendationCatalog {
    pub fn new(
        templates: Vec<RecommendationTemplate>,
        personas: &PersonaCatalog,
    ) -> Result<Self> {
        let catalog = Self { templates };
        catalog.validate(personas)?;
        Ok(catalog)
    }

    pub fn templates(&self) -> &[RecommendationTemplate] {
        &self.templates
    }

    pub fn template(&self, id: &str) -> Option<&RecommendationTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Templates serving a persona, in catalog order.
    pub fn templates_for_persona(&self, persona_id: &str) -> Vec<&RecommendationTemplate> {
        self.templates
            .iter()
            .filter(|t| t.persona_ids.iter().any(|p| p == persona_id))
            .collect()
    }

    fn validate(&self, personas: &PersonaCatalog) -> Result<()> {
        let known_personas: HashSet<&str> =
            personas.personas().iter().map(|p| p.id.as_str()).collect();
        let mut seen_ids = HashSet::new();

        for template in &self.templates {
            if !seen_ids.insert(template.id.as_str()) {
                return Err(EngineError::MalformedCatalog(format!(
                    "duplicate template id '{}'",
                    template.id
                )));
            }
            if template.persona_ids.is_empty() {
                return Err(EngineError::MalformedCatalog(format!(
                    "template '{}' serves no personas",
                    template.id
                )));
            }
            for persona_id in &template.persona_ids {
                if !known_personas.contains(persona_id.as_str()) {
                    return Err(EngineError::MalformedCatalog(format!(
                        "template '{}' references unknown persona '{}'",
                        template.id, persona_id
                    )));
                }
            }
            if !(0.0..=1.0).contains(&template.min_data_availability) {
                return Err(EngineError::MalformedCatalog(format!(
                    "template '{}' min_data_availability out of range",
                    template.id
                )));
            }

            let required: HashSet<DataField> =
                template.required_fields.iter().copied().collect();
            let mut referenced_texts: Vec<&str> =
                vec![template.body_template.as_str()];
            referenced_texts.extend(template.action_templates.iter().map(|s| s.as_str()));
            for text in referenced_texts {
                for token in placeholder_tokens(text) {
                    let field = DataField::parse(&token).ok_or_else(|| {
                        EngineError::MalformedCatalog(format!(
                            "template '{}' references unknown field '{}'",
                            template.id, token
                        ))
                    })?;
                    if !required.contains(&field) {
                        return Err(EngineError::MalformedCatalog(format!(
                            "template '{}' uses '{}' outside required_fields",
                            template.id, token
                        )));
                    }
                }
            }

            if let Some(field) = template.impact.as_ref().and_then(|i| i.backing_field()) {
                if !required.contains(&field) {
                    return Err(EngineError::MalformedCatalog(format!(
                        "template '{}' impact field missing from required_fields",
                        template.id
                    )));
                }
            }

            if template.kind == RecommendationKind::PartnerOffer
                && template.disclosure != DisclosureKind::PartnerOffer
            {
                return Err(EngineError::MalformedCatalog(format!(
                    "partner offer '{}' must carry the partner disclosure",
                    template.id
                )));
            }
            if template.kind == RecommendationKind::Education
                && !template.eligibility.is_unconstrained()
            {
                return Err(EngineError::MalformedCatalog(format!(
                    "education template '{}' cannot carry offer eligibility",
                    template.id
                )));
            }
        }
        Ok(())
    }
}

fn placeholder_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else { break };
        tokens.push(rest[open + 1..open + close].to_string());
        rest = &rest[open + close + 1..];
    }
    tokens
}

fn education(
    id: &str,
    persona_ids: &[&str],
    title: &str,
    body: &str,
    actions: &[&str],
    impact: Option<ImpactFormula>,
    priority: Priority,
    required: &[DataField],
) -> RecommendationTemplate {
    RecommendationTemplate {
        id: id.to_string(),
        kind: RecommendationKind::Education,
        persona_ids: persona_ids.iter().map(|s| s.to_string()).collect(),
        title: title.to_string(),
        body_template: body.to_string(),
        action_templates: actions.iter().map(|s| s.to_string()).collect(),
        impact,
        default_priority: priority,
        min_data_availability: DEFAULT_MIN_DATA_AVAILABILITY,
        required_fields: required.to_vec(),
        eligibility: OfferEligibility::default(),
        disclosure: DisclosureKind::Recommendation,
    }
}

#[allow(clippy::too_many_arguments)]
fn offer(
    id: &str,
    persona_ids: &[&str],
    title: &str,
    body: &str,
    actions: &[&str],
    priority: Priority,
    required: &[DataField],
    eligibility: OfferEligibility,
) -> RecommendationTemplate {
    RecommendationTemplate {
        id: id.to_string(),
        kind: RecommendationKind::PartnerOffer,
        persona_ids: persona_ids.iter().map(|s| s.to_string()).collect(),
        title: title.to_string(),
        body_template: body.to_string(),
        action_templates: actions.iter().map(|s| s.to_string()).collect(),
        impact: None,
        default_priority: priority,
        min_data_availability: DEFAULT_MIN_DATA_AVAILABILITY,
        required_fields: required.to_vec(),
        eligibility,
        disclosure: DisclosureKind::PartnerOffer,
    }
}

/// The built-in template catalog.
pub fn default_recommendation_catalog(personas: &PersonaCatalog) -> Result<RecommendationCatalog> {
    let templates = vec![
        // ----- Education -----
        education(
            "pay_down_high_rate_card",
            &["high_utilization"],
            "Pay down your highest-rate card first",
            "{card_last4} is at {utilization_pct} utilization. Paying the balance \
             down below 30% of the limit typically improves your credit profile \
             and cuts the interest you pay each month.",
            &[
                "List your cards by APR and target the highest one first",
                "Set up a payment above the minimum on {card_last4}",
                "Pause new charges on that card until the balance drops",
            ],
            Some(ImpactFormula::YearlyFromMonthly {
                field: DataField::MonthlyInterestCharge,
                template: "Could save roughly {amount} per year in interest".to_string(),
            }),
            Priority::High,
            &[
                DataField::CardLast4,
                DataField::UtilizationPct,
                DataField::MonthlyInterestCharge,
            ],
        ),
        education(
            "avoid_minimum_payments",
            &["high_utilization"],
            "Pay more than the minimum",
            "Minimum payments on {card_last4} mostly cover interest, so the \
             balance barely moves. Even a modest fixed amount above the minimum \
             shortens the payoff timeline substantially.",
            &[
                "Pick a fixed payment amount above {minimum_payment}",
                "Schedule it for right after your payday",
            ],
            None,
            Priority::High,
            &[DataField::CardLast4, DataField::MinimumPayment],
        ),
        education(
            "build_emergency_fund",
            &["low_savings", "variable_income"],
            "Start a dedicated emergency fund",
            "Your cushion currently covers {emergency_fund_months} of typical \
             spending. A reserve of three months ({avg_monthly_expense} per month) \
             keeps a surprise expense from turning into card debt.",
            &[
                "Open a separate savings account so the reserve stays untouched",
                "Start with a small automatic transfer each payday",
            ],
            Some(ImpactFormula::FixedEstimate {
                text: "A three-month reserve is the single biggest buffer against \
                       high-interest borrowing"
                    .to_string(),
            }),
            Priority::High,
            &[DataField::EmergencyFundMonths, DataField::AvgMonthlyExpense],
        ),
        education(
            "subscription_audit",
            &["subscription_heavy"],
            "Audit your recurring charges",
            "We count {recurring_merchant_count} recurring merchants totaling \
             {monthly_recurring_spend} per month. A quick review usually turns up \
             at least one service that is no longer earning its keep.",
            &[
                "List every recurring charge and mark the ones you used this month",
                "Cancel or downgrade anything you did not mark",
                "Check for annual billing options on the keepers",
            ],
            Some(ImpactFormula::YearlyFromMonthly {
                field: DataField::MonthlyRecurringSpend,
                template: "Recurring charges add up to about {amount} per year".to_string(),
            }),
            Priority::Medium,
            &[
                DataField::RecurringMerchantCount,
                DataField::MonthlyRecurringSpend,
            ],
        ),
        education(
            "smooth_variable_income",
            &["variable_income"],
            "Smooth out an irregular income",
            "When pay arrives irregularly, budgeting to your lowest typical month \
             and parking the rest keeps lean stretches from forcing borrowing.",
            &[
                "Base your budget on your lowest recent month of income",
                "Route surplus from strong months into a holding account",
                "Pay fixed bills from the holding account on a schedule",
            ],
            None,
            Priority::High,
            &[],
        ),
        education(
            "automate_savings",
            &["low_savings", "balanced", "wealth_builder"],
            "Automate your saving",
            "Transfers that happen automatically on payday succeed far more often \
             than saving whatever is left at month end.",
            &[
                "Set a recurring transfer for the day after each payday",
                "Increase it slightly whenever your income rises",
            ],
            None,
            Priority::Medium,
            &[],
        ),
        education(
            "diversify_savings_yield",
            &["wealth_builder"],
            "Put your cash reserve to work",
            "With {savings_balance} set aside and your near-term needs covered, \
             moving part of the reserve into a higher-yield vehicle earns more \
             without touching your safety margin.",
            &[
                "Keep three months of expenses fully liquid",
                "Compare yields on high-yield savings and short-term treasuries",
            ],
            None,
            Priority::Low,
            &[DataField::SavingsBalance],
        ),
        education(
            "review_spending_basics",
            &["balanced"],
            "Keep your momentum with a monthly review",
            "Your finances look steady. A short monthly review of spending against \
             {monthly_income_estimate} keeps small drifts from compounding.",
            &[
                "Block fifteen minutes at each month end to scan your statements",
                "Flag any category that grew two months in a row",
            ],
            None,
            Priority::Low,
            &[DataField::MonthlyIncomeEstimate],
        ),
        // ----- Partner offers -----
        offer(
            "balance_transfer_card",
            &["high_utilization"],
            "0% intro APR balance transfer card",
            "Moving the balance on {card_last4} to a card with a 0% introductory \
             period pauses interest while you pay the principal down.",
            &["Compare transfer fees against the interest you would avoid"],
            Priority::High,
            &[DataField::CardLast4],
            OfferEligibility {
                min_credit_score: Some(680),
                ..Default::default()
            },
        ),
        offer(
            "debt_consolidation_loan",
            &["high_utilization"],
            "Fixed-rate debt consolidation loan",
            "A fixed-rate personal loan can replace revolving card debt with one \
             predictable payment, often at a lower rate than {apr}.",
            &["Check your rate with a soft pull before applying"],
            Priority::Medium,
            &[DataField::Apr],
            OfferEligibility {
                min_credit_score: Some(640),
                min_annual_income: Some(30_000.0),
                excluded_subtypes: vec![AccountSubtype::PersonalLoan],
                ..Default::default()
            },
        ),
        offer(
            "high_yield_savings",
            &["low_savings", "wealth_builder", "balanced"],
            "High-yield savings account",
            "A high-yield savings account pays meaningfully more than a standard \
             one on the same balance, with no change to access or risk.",
            &["Compare current APYs and confirm there are no balance minimums"],
            Priority::Medium,
            &[],
            OfferEligibility {
                excluded_subtypes: vec![AccountSubtype::Savings],
                ..Default::default()
            },
        ),
        offer(
            "credit_builder_loan",
            &["high_utilization", "low_savings"],
            "Credit-builder loan",
            "A credit-builder loan reports on-time payments while the proceeds sit \
             in a locked savings account, so you build history and a reserve at once.",
            &["Pick a term and payment that fit well inside your monthly budget"],
            Priority::Low,
            &[],
            OfferEligibility {
                max_credit_score: Some(660),
                excluded_subtypes: vec![AccountSubtype::PersonalLoan],
                ..Default::default()
            },
        ),
    ];

    RecommendationCatalog::new(templates, personas)
}
