//! Persona assignment engine
//!
//! State-machine-free, pure scoring over a feature snapshot. Deterministic:
//! the same snapshot and catalog always produce the same assignment and the
//! same rationale string.

use crate::features::FeatureSnapshot;
use crate::models::{PersonaAssignment, PersonaScore};
use crate::personas::{render_reason, GroupMode, PersonaCatalog, PersonaDefinition};
use crate::trace::{compute_snapshot_hash, DecisionTrace, PersonaMatchDetail};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// An assignment together with the audit trace documenting it. The engine
/// itself never persists anything; the caller appends the trace.
#[derive(Debug, Clone)]
pub struct AssignmentOutcome {
    pub assignment: PersonaAssignment,
    pub trace: DecisionTrace,
}

pub struct PersonaAssignmentEngine {
    catalog: Arc<PersonaCatalog>,
}

struct Evaluation<'a> {
    persona: &'a PersonaDefinition,
    matched: bool,
    matched_criteria: u32,
    reasons: Vec<String>,
    unmatched_criteria: Vec<String>,
}

impl PersonaAssignmentEngine {
    pub fn new(catalog: Arc<PersonaCatalog>) -> Self {
        Self { catalog }
    }

    pub fn assign(&self, snapshot: &FeatureSnapshot) -> AssignmentOutcome {
        let evaluations: Vec<Evaluation> = self
            .catalog
            .personas()
            .iter()
            .filter(|p| !p.groups.is_empty())
            .map(|p| evaluate_persona(p, snapshot))
            .collect();

        let mut matched: Vec<&Evaluation> =
            evaluations.iter().filter(|e| e.matched).collect();

        // Highest points first; ties broken by the static priority rank.
        matched.sort_by(|a, b| {
            let a_points = a.matched_criteria as f64 * a.persona.priority_weight;
            let b_points = b.matched_criteria as f64 * b.persona.priority_weight;
            b_points
                .partial_cmp(&a_points)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.persona.priority_rank.cmp(&b.persona.priority_rank))
        });

        let used_default = matched.is_empty();
        let (primary, assigned, rationale) = if used_default {
            let default = self.catalog.default_persona();
            debug!(persona = %default.id, "No persona matched, assigning default");
            let scores = vec![PersonaScore {
                persona_id: default.id.clone(),
                matched_criteria: 0,
                total_points: 0.0,
                percentage: 100.0,
            }];
            (default, scores, default.rationale_template.clone())
        } else {
            let total: f64 = matched
                .iter()
                .map(|e| e.matched_criteria as f64 * e.persona.priority_weight)
                .sum();

            let scores: Vec<PersonaScore> = matched
                .iter()
                .map(|e| {
                    let points = e.matched_criteria as f64 * e.persona.priority_weight;
                    PersonaScore {
                        persona_id: e.persona.id.clone(),
                        matched_criteria: e.matched_criteria,
                        total_points: points,
                        percentage: if total > 0.0 { points / total * 100.0 } else { 0.0 },
                    }
                })
                .collect();

            let top = matched[0];
            let rationale = top
                .persona
                .rationale_template
                .replace("{reasons}", &top.reasons.join(", "));
            (top.persona, scores, rationale)
        };

        let assignment = PersonaAssignment {
            user_id: snapshot.user_id,
            window_days: snapshot.window_days,
            primary_persona: primary.id.clone(),
            assigned_personas: assigned,
            risk_level: primary.risk_level,
            rationale: rationale.clone(),
            used_default,
        };

        let mut matching_results = BTreeMap::new();
        for evaluation in &evaluations {
            matching_results.insert(
                evaluation.persona.id.clone(),
                PersonaMatchDetail {
                    matched: evaluation.matched,
                    matched_criteria: evaluation.matched_criteria,
                    reasons: evaluation.reasons.clone(),
                    unmatched_criteria: evaluation.unmatched_criteria.clone(),
                },
            );
        }

        let trace = DecisionTrace {
            trace_id: Uuid::new_v4(),
            user_id: snapshot.user_id,
            timestamp: Utc::now(),
            window_days: snapshot.window_days,
            primary_persona: assignment.primary_persona.clone(),
            assigned_personas: assignment
                .assigned_personas
                .iter()
                .map(|s| s.persona_id.clone())
                .collect(),
            matching_results,
            rationale,
            used_default,
            snapshot_hash: compute_snapshot_hash(snapshot),
            features_snapshot: snapshot.clone(),
        };

        info!(
            user_id = %snapshot.user_id,
            window_days = snapshot.window_days,
            primary = %assignment.primary_persona,
            matches = assignment.assigned_personas.len(),
            used_default,
            "Persona assignment complete"
        );

        AssignmentOutcome { assignment, trace }
    }
}

/// A persona matches when every group passes; matched criteria are counted
/// individually so an Any-group contributes each criterion that held.
fn evaluate_persona<'a>(
    persona: &'a PersonaDefinition,
    snapshot: &FeatureSnapshot,
) -> Evaluation<'a> {
    let mut all_groups_pass = true;
    let mut matched_criteria = 0u32;
    let mut reasons = Vec::new();
    let mut unmatched = Vec::new();

    for group in &persona.groups {
        let mut group_hits = 0usize;
        for criterion in &group.criteria {
            if criterion.predicate.evaluate(snapshot) {
                group_hits += 1;
                matched_criteria += 1;
                reasons.push(render_reason(&criterion.reason, snapshot));
            } else {
                unmatched.push(criterion.name.clone());
            }
        }

        let group_passes = match group.mode {
            GroupMode::All => group_hits == group.criteria.len(),
            GroupMode::Any => group_hits > 0,
        };
        if !group_passes {
            all_groups_pass = false;
        }
    }

    Evaluation {
        persona,
        matched: all_groups_pass,
        matched_criteria,
        reasons,
        unmatched_criteria: unmatched,
    }
}
