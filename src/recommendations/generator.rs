//! Turns a persona assignment plus resolved data points into concrete
//! recommendations. Generation is deterministic: persona order comes from
//! the assignment, template order from the catalog, and priority sorting
//! is stable.

use crate::features::FeatureSnapshot;
use crate::models::{
    Account, GenerateOptions, Liability, PersonaAssignment, Recommendation,
    RecommendationKind, RecommendationStatus, Transaction,
};
use crate::recommendations::{
    DataField, DataPointExtractor, RecommendationCatalog, RecommendationTemplate,
    ResolvedFields,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct RecommendationGenerator {
    catalog: Arc<RecommendationCatalog>,
}

impl RecommendationGenerator {
    pub fn new(catalog: Arc<RecommendationCatalog>) -> Self {
        Self { catalog }
    }

    /// Walks assigned personas in priority order and fills the education and
    /// offer quotas. A template is used at most once per run, credited to the
    /// first persona that selected it.
    pub fn generate(
        &self,
        assignment: &PersonaAssignment,
        accounts: &[Account],
        liabilities: &[Liability],
        transactions: &[Transaction],
        snapshot: &FeatureSnapshot,
        options: &GenerateOptions,
    ) -> Vec<Recommendation> {
        let education_target = options.education_target();
        let offer_target = options.offer_target();

        let mut selected_ids: HashSet<String> = HashSet::new();
        let mut recommendations = Vec::new();
        let mut education_count = 0usize;
        let mut offer_count = 0usize;

        for score in &assignment.assigned_personas {
            // Selection walks the catalog in declaration order so a later
            // high-priority template cannot displace an earlier one when a
            // quota binds. Priority only orders the selected output.
            let chunk_start = recommendations.len();

            for template in self.catalog.templates_for_persona(&score.persona_id) {
                let quota_open = match template.kind {
                    RecommendationKind::Education => education_count < education_target,
                    RecommendationKind::PartnerOffer => offer_count < offer_target,
                };
                if !quota_open || selected_ids.contains(&template.id) {
                    continue;
                }

                let resolved = DataPointExtractor::resolve(
                    accounts,
                    liabilities,
                    transactions,
                    snapshot,
                    &template.required_fields,
                    snapshot.window_days,
                );
                if resolved.resolution_ratio() < template.min_data_availability {
                    debug!(
                        template = %template.id,
                        ratio = resolved.resolution_ratio(),
                        "Skipping template, too few data points resolved"
                    );
                    continue;
                }

                selected_ids.insert(template.id.clone());
                match template.kind {
                    RecommendationKind::Education => education_count += 1,
                    RecommendationKind::PartnerOffer => offer_count += 1,
                }
                recommendations.push(render_recommendation(
                    template,
                    &resolved,
                    assignment,
                    &score.persona_id,
                ));
            }

            recommendations[chunk_start..].sort_by_key(|r| r.priority.rank());

            if education_count >= education_target && offer_count >= offer_target {
                break;
            }
        }

        recommendations
    }
}

fn render_recommendation(
    template: &RecommendationTemplate,
    resolved: &ResolvedFields,
    assignment: &PersonaAssignment,
    persona_id: &str,
) -> Recommendation {
    Recommendation {
        recommendation_id: Uuid::new_v4(),
        user_id: assignment.user_id,
        template_id: template.id.clone(),
        kind: template.kind,
        title: template.title.clone(),
        body: substitute(&template.body_template, resolved),
        action_items: template
            .action_templates
            .iter()
            .map(|a| substitute(a, resolved))
            .collect(),
        expected_impact: template.impact.as_ref().and_then(|i| i.render(resolved)),
        priority: template.default_priority,
        source_personas: vec![persona_id.to_string()],
        disclosure: None,
        status: RecommendationStatus::Pending,
        status_updated_at: None,
        consent_blocked: false,
        created_at: Utc::now(),
    }
}

/// Replaces every `{token}` with its resolved display value, or the field's
/// generic copy when unresolved. Unknown tokens are left intact.
fn substitute(template: &str, resolved: &ResolvedFields) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let token = &rest[open + 1..open + close];
        match DataField::parse(token) {
            Some(field) => out.push_str(&resolved.render(field)),
            None => out.push_str(&rest[open..open + close + 1]),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}
