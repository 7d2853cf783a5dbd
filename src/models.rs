//! Core data model for the persona engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use std::cmp::Ordering;
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Depository,
    Credit,
    Loan,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccountSubtype {
    Checking,
    Savings,
    CreditCard,
    Mortgage,
    StudentLoan,
    PersonalLoan,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentChannel {
    Online,
    InStore,
    Ach,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Sort key: higher priority sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Education,
    PartnerOffer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Approved,
    Flagged,
    Rejected,
}

//
// ================= Account =================
//

/// An owned financial container. Immutable within a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub subtype: AccountSubtype,
    pub currency: String,
    pub available_balance: Option<f64>,
    pub current_balance: f64,
    /// Credit accounts only
    pub credit_limit: Option<f64>,
    /// Loan accounts only
    pub interest_rate: Option<f64>,
    pub next_payment_due: Option<NaiveDate>,
    /// Card last-4, used for personalization
    pub mask: Option<String>,
}

impl Account {
    /// Utilization as a fraction of the credit limit, if the account
    /// carries one. Cards without a limit are skipped upstream.
    pub fn utilization(&self) -> Option<f64> {
        let limit = self.credit_limit?;
        if limit <= 0.0 {
            return None;
        }
        Some(self.current_balance.abs() / limit)
    }
}

//
// ================= Transaction =================
//

/// An event on one account. Negative amount = outflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub date: NaiveDate,
    pub amount: f64,
    pub merchant_name: Option<String>,
    pub category_primary: String,
    pub category_detailed: String,
    pub payment_channel: PaymentChannel,
    pub pending: bool,
}

impl Transaction {
    pub fn is_outflow(&self) -> bool {
        self.amount < 0.0
    }

    pub fn is_inflow(&self) -> bool {
        self.amount > 0.0
    }
}

//
// ================= Liability =================
//

/// Supplemental terms for a credit or loan account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liability {
    pub liability_id: Uuid,
    pub account_id: Uuid,
    pub apr: Option<f64>,
    pub minimum_payment: Option<f64>,
    pub last_payment_amount: Option<f64>,
    pub last_payment_date: Option<NaiveDate>,
    pub next_payment_date: Option<NaiveDate>,
    pub is_overdue: bool,
    pub statement_balance: Option<f64>,
}

//
// ================= Consent =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub user_id: Uuid,
    pub consented: bool,
    pub consented_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ConsentRecord {
    pub fn not_consented(user_id: Uuid) -> Self {
        Self {
            user_id,
            consented: false,
            consented_at: None,
            revoked_at: None,
        }
    }
}

//
// ================= Persona Assignment =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaScore {
    pub persona_id: String,
    pub matched_criteria: u32,
    pub total_points: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaAssignment {
    pub user_id: Uuid,
    pub window_days: u32,
    pub primary_persona: String,
    /// Never empty: the default persona is the floor.
    pub assigned_personas: Vec<PersonaScore>,
    pub risk_level: RiskLevel,
    pub rationale: String,
    pub used_default: bool,
}

//
// ================= Recommendation =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation_id: Uuid,
    pub user_id: Uuid,
    pub template_id: String,
    pub kind: RecommendationKind,
    pub title: String,
    pub body: String,
    pub action_items: Vec<String>,
    pub expected_impact: Option<String>,
    pub priority: Priority,
    pub source_personas: Vec<String>,
    /// Separate field so UIs can style it distinctly; never folded into body.
    pub disclosure: Option<String>,
    pub status: RecommendationStatus,
    /// `None` until the first explicit status transition.
    pub status_updated_at: Option<DateTime<Utc>>,
    /// Always `false` at generation time: consent is checked before any
    /// recommendation exists. Downstream delivery systems set it when a
    /// stored recommendation outlives a later consent revocation.
    pub consent_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl Recommendation {
    /// Explicit, timestamped status transition.
    pub fn approve(&mut self) {
        self.status = RecommendationStatus::Approved;
        self.status_updated_at = Some(Utc::now());
    }

    /// Explicit, timestamped status transition.
    pub fn flag(&mut self) {
        self.status = RecommendationStatus::Flagged;
        self.status_updated_at = Some(Utc::now());
    }
}

//
// ================= Generation Options =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Education item target, clamped to 3..=5
    pub num_education: Option<usize>,
    /// Partner offer target, clamped to 1..=3
    pub num_offers: Option<usize>,
    pub credit_score: Option<u32>,
    pub annual_income: Option<f64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            num_education: None,
            num_offers: None,
            credit_score: None,
            annual_income: None,
        }
    }
}

impl GenerateOptions {
    pub fn education_target(&self) -> usize {
        self.num_education.unwrap_or(4).clamp(3, 5)
    }

    pub fn offer_target(&self) -> usize {
        self.num_offers.unwrap_or(2).clamp(1, 3)
    }
}

//
// ================= RiskLevel Ordering =================
//

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl RiskLevel {
    fn rank(&self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(
            std::cmp::max(RiskLevel::Low, RiskLevel::High),
            RiskLevel::High
        );
    }

    #[test]
    fn test_utilization_skips_missing_limit() {
        let mut account = Account {
            account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Card".to_string(),
            account_type: AccountType::Credit,
            subtype: AccountSubtype::CreditCard,
            currency: "USD".to_string(),
            available_balance: None,
            current_balance: -934.0,
            credit_limit: None,
            interest_rate: None,
            next_payment_due: None,
            mask: Some("4321".to_string()),
        };
        assert!(account.utilization().is_none());

        account.credit_limit = Some(1000.0);
        let utilization = account.utilization().unwrap();
        assert!((utilization - 0.934).abs() < 1e-9);
    }

    #[test]
    fn test_status_transition_stamps_time() {
        let mut rec = Recommendation {
            recommendation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            template_id: "t".to_string(),
            kind: RecommendationKind::Education,
            title: "Title".to_string(),
            body: "Body".to_string(),
            action_items: vec![],
            expected_impact: None,
            priority: Priority::Medium,
            source_personas: vec![],
            disclosure: None,
            status: RecommendationStatus::Pending,
            status_updated_at: None,
            consent_blocked: false,
            created_at: Utc::now(),
        };

        rec.approve();
        assert_eq!(rec.status, RecommendationStatus::Approved);
        assert!(rec.status_updated_at.is_some());

        let first = rec.status_updated_at;
        rec.flag();
        assert_eq!(rec.status, RecommendationStatus::Flagged);
        assert!(rec.status_updated_at >= first);
    }

    #[test]
    fn test_generate_options_clamped() {
        let options = GenerateOptions {
            num_education: Some(10),
            num_offers: Some(0),
            ..Default::default()
        };
        assert_eq!(options.education_target(), 5);
        assert_eq!(options.offer_target(), 1);
        assert_eq!(GenerateOptions::default().education_target(), 4);
        assert_eq!(GenerateOptions::default().offer_target(), 2);
    }
}
