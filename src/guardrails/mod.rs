//! Guardrail chain applied to generated recommendations before delivery.
//!
//! Three stages run in a fixed order: offer eligibility filtering, tone
//! sanitization, then disclosure injection. Each stage sees the previous
//! stage's output and nothing else, so a change to one stage cannot leak
//! into another.

use crate::features::FeatureSnapshot;
use crate::models::{Account, AccountSubtype, GenerateOptions, Recommendation, RecommendationKind};
use crate::recommendations::{DisclosureKind, OfferEligibility, RecommendationCatalog};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

//
// ================= Eligibility =================
//

/// An offer dropped by the eligibility filter. Internal audit record only;
/// never shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuppressedOffer {
    pub template_id: String,
    pub reason: String,
}

/// The user facts eligibility constraints are checked against. A constraint
/// whose datum is unknown fails closed.
#[derive(Debug, Clone)]
pub struct EligibilityContext {
    pub credit_score: Option<u32>,
    pub annual_income: Option<f64>,
    pub held_subtypes: HashSet<AccountSubtype>,
    pub max_utilization_pct: f64,
}

impl EligibilityContext {
    pub fn build(
        accounts: &[Account],
        snapshot: &FeatureSnapshot,
        options: &GenerateOptions,
    ) -> Self {
        Self {
            credit_score: options.credit_score,
            annual_income: options.annual_income,
            held_subtypes: accounts.iter().map(|a| a.subtype).collect(),
            max_utilization_pct: snapshot.credit.max_utilization_pct,
        }
    }

    /// None means eligible; Some carries the suppression reason.
    fn check(&self, eligibility: &OfferEligibility) -> Option<String> {
        if let Some(min) = eligibility.min_credit_score {
            match self.credit_score {
                None => return Some("credit score unavailable".to_string()),
                Some(score) if score < min => {
                    return Some(format!("credit score {} below minimum {}", score, min))
                }
                _ => {}
            }
        }
        if let Some(max) = eligibility.max_credit_score {
            match self.credit_score {
                None => return Some("credit score unavailable".to_string()),
                Some(score) if score > max => {
                    return Some(format!("credit score {} above maximum {}", score, max))
                }
                _ => {}
            }
        }
        if let Some(min) = eligibility.min_annual_income {
            match self.annual_income {
                None => return Some("annual income unavailable".to_string()),
                Some(income) if income < min => {
                    return Some(format!(
                        "annual income ${:.0} below minimum ${:.0}",
                        income, min
                    ))
                }
                _ => {}
            }
        }
        for subtype in &eligibility.excluded_subtypes {
            if self.held_subtypes.contains(subtype) {
                return Some(format!("user already holds a {:?} account", subtype));
            }
        }
        if let Some(max) = eligibility.max_utilization_pct {
            if self.max_utilization_pct > max {
                return Some(format!(
                    "utilization {:.1}% above maximum {:.1}%",
                    self.max_utilization_pct, max
                ));
            }
        }
        None
    }
}

/// Drops partner offers the user does not qualify for. Education items pass
/// through untouched.
pub struct EligibilityFilter;

impl EligibilityFilter {
    pub fn apply(
        catalog: &RecommendationCatalog,
        context: &EligibilityContext,
        recommendations: Vec<Recommendation>,
    ) -> (Vec<Recommendation>, Vec<SuppressedOffer>) {
        let mut kept = Vec::with_capacity(recommendations.len());
        let mut suppressed = Vec::new();

        for rec in recommendations {
            if rec.kind != RecommendationKind::PartnerOffer {
                kept.push(rec);
                continue;
            }
            let eligibility = catalog
                .template(&rec.template_id)
                .map(|t| t.eligibility.clone())
                .unwrap_or_default();
            match context.check(&eligibility) {
                None => kept.push(rec),
                Some(reason) => {
                    debug!(template = %rec.template_id, %reason, "Suppressing offer");
                    suppressed.push(SuppressedOffer {
                        template_id: rec.template_id.clone(),
                        reason,
                    });
                }
            }
        }

        (kept, suppressed)
    }
}

//
// ================= Tone =================
//

/// Static rewrite table. Every replacement is neutral phrasing that itself
/// contains no banned phrase, so a second pass is a no-op.
const TONE_REWRITES: &[(&str, &str)] = &[
    ("you are overspending", "your spending is trending higher than usual"),
    ("you're overspending", "your spending is trending higher than usual"),
    ("reckless spending", "elevated spending"),
    ("living beyond your means", "spending above your current income"),
    ("wasting money", "spending that may not add value"),
    ("bad habit", "pattern worth revisiting"),
    ("irresponsible", "worth a closer look"),
    ("you failed to", "you have not yet been able to"),
    ("poor financial decisions", "recent financial choices"),
    ("out of control", "running higher than planned"),
];

pub struct ToneSanitizer;

impl ToneSanitizer {
    /// Case-insensitive replacement of every banned phrase in every
    /// user-facing text field.
    pub fn apply(mut recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
        for rec in &mut recommendations {
            rec.title = Self::sanitize(&rec.title);
            rec.body = Self::sanitize(&rec.body);
            for action in &mut rec.action_items {
                *action = Self::sanitize(action);
            }
            if let Some(impact) = &rec.expected_impact {
                rec.expected_impact = Some(Self::sanitize(impact));
            }
        }
        recommendations
    }

    pub fn sanitize(text: &str) -> String {
        let mut out = text.to_string();
        for (banned, replacement) in TONE_REWRITES {
            out = replace_case_insensitive(&out, banned, replacement);
        }
        out
    }
}

fn replace_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
    let lower_needle = needle.to_lowercase();
    if lower_needle.is_empty() {
        return text.to_string();
    }

    // Lowercasing the whole haystack at once can change its byte length
    // ('İ' grows, 'ẞ' shrinks), so fold per character and keep a map from
    // each folded byte back to the start of the original character.
    let mut folded = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len() + 1);
    for (offset, ch) in text.char_indices() {
        for low in ch.to_lowercase() {
            folded.push(low);
            origin.resize(folded.len(), offset);
        }
    }
    origin.push(text.len());

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    let mut copied = 0;
    while let Some(found) = folded[cursor..].find(&lower_needle) {
        let start = cursor + found;
        let end = start + lower_needle.len();
        // A match must cover whole original characters.
        let start_aligned = start == 0 || origin[start] != origin[start - 1];
        let end_aligned = origin[end] != origin[end - 1];
        if start_aligned && end_aligned {
            out.push_str(&text[copied..origin[start]]);
            out.push_str(replacement);
            copied = origin[end];
            cursor = end;
        } else {
            cursor += found + folded[start..].chars().next().map_or(1, char::len_utf8);
        }
    }
    out.push_str(&text[copied..]);
    out
}

//
// ================= Disclosure =================
//

/// Attaches the template's disclosure text in a separate field. The body is
/// never modified.
pub struct DisclosureInjector;

impl DisclosureInjector {
    pub fn apply(
        catalog: &RecommendationCatalog,
        mut recommendations: Vec<Recommendation>,
    ) -> Vec<Recommendation> {
        for rec in &mut recommendations {
            let kind = catalog
                .template(&rec.template_id)
                .map(|t| t.disclosure)
                .unwrap_or(match rec.kind {
                    RecommendationKind::Education => DisclosureKind::Recommendation,
                    RecommendationKind::PartnerOffer => DisclosureKind::PartnerOffer,
                });
            rec.disclosure = Some(kind.text().to_string());
        }
        recommendations
    }
}

//
// ================= Chain =================
//

pub struct GuardrailChain {
    catalog: Arc<RecommendationCatalog>,
}

impl GuardrailChain {
    pub fn new(catalog: Arc<RecommendationCatalog>) -> Self {
        Self { catalog }
    }

    /// Eligibility, then tone, then disclosures. Returns the surviving
    /// recommendations and the internal suppression records.
    pub fn apply(
        &self,
        context: &EligibilityContext,
        recommendations: Vec<Recommendation>,
    ) -> (Vec<Recommendation>, Vec<SuppressedOffer>) {
        let before = recommendations.len();
        let (kept, suppressed) =
            EligibilityFilter::apply(&self.catalog, context, recommendations);
        let kept = ToneSanitizer::apply(kept);
        let kept = DisclosureInjector::apply(&self.catalog, kept);

        info!(
            kept = kept.len(),
            suppressed = suppressed.len(),
            total = before,
            "Guardrail chain complete"
        );
        (kept, suppressed)
    }
}
