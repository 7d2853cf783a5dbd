//! End-to-end orchestration: features, persona assignment, generation,
//! guardrails, persistence.
//!
//! The pipeline is the only component allowed to touch the consent gate.
//! When consent is absent the run aborts before any feature is computed,
//! so no trace, recommendation, or side effect of any kind exists for
//! that invocation.

use crate::error::{EngineError, Result};
use crate::features::{compute_features, FeatureSnapshot};
use crate::guardrails::{EligibilityContext, GuardrailChain, SuppressedOffer};
use crate::models::{
    GenerateOptions, PersonaAssignment, Recommendation, RecommendationKind,
};
use crate::personas::{PersonaAssignmentEngine, PersonaCatalog};
use crate::recommendations::{RecommendationCatalog, RecommendationGenerator};
use crate::rewrite::{rewrite_or_fallback, TextRewriter};
use crate::store::{ConsentStore, DataStore, RecommendationSink};
use crate::trace::TraceStore;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a full generation run.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub assignment: PersonaAssignment,
    pub education_items: Vec<Recommendation>,
    pub partner_offers: Vec<Recommendation>,
    /// Internal audit records; never surfaced to the user.
    pub suppressed_offers: Vec<SuppressedOffer>,
}

pub struct InsightsPipeline {
    data_store: Arc<dyn DataStore>,
    consent_store: Arc<dyn ConsentStore>,
    trace_store: Arc<dyn TraceStore>,
    engine: PersonaAssignmentEngine,
    generator: RecommendationGenerator,
    guardrails: GuardrailChain,
    sink: Option<Arc<dyn RecommendationSink>>,
    rewriter: Option<Arc<dyn TextRewriter>>,
}

impl InsightsPipeline {
    pub fn new(
        data_store: Arc<dyn DataStore>,
        consent_store: Arc<dyn ConsentStore>,
        trace_store: Arc<dyn TraceStore>,
        persona_catalog: Arc<PersonaCatalog>,
        recommendation_catalog: Arc<RecommendationCatalog>,
    ) -> Self {
        Self {
            data_store,
            consent_store,
            trace_store,
            engine: PersonaAssignmentEngine::new(persona_catalog),
            generator: RecommendationGenerator::new(recommendation_catalog.clone()),
            guardrails: GuardrailChain::new(recommendation_catalog),
            sink: None,
            rewriter: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecommendationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_rewriter(mut self, rewriter: Arc<dyn TextRewriter>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn consent_store(&self) -> &Arc<dyn ConsentStore> {
        &self.consent_store
    }

    pub fn trace_store(&self) -> &Arc<dyn TraceStore> {
        &self.trace_store
    }

    async fn require_consent(&self, user_id: Uuid) -> Result<()> {
        let record = self.consent_store.get_consent(user_id).await?;
        if !record.consented {
            warn!(%user_id, "Consent absent, aborting");
            return Err(EngineError::ConsentDenied(user_id));
        }
        Ok(())
    }

    /// Computes a feature snapshot over the trailing window ending today.
    pub async fn compute_features(
        &self,
        user_id: Uuid,
        window_days: u32,
    ) -> Result<FeatureSnapshot> {
        self.require_consent(user_id).await?;

        let as_of = Utc::now().date_naive();
        let start = as_of - Duration::days(window_days as i64);

        let accounts = self.data_store.accounts(user_id).await?;
        let transactions = self.data_store.transactions(user_id, start, as_of).await?;
        let liabilities = self.data_store.liabilities(user_id).await?;

        compute_features(
            user_id,
            window_days,
            as_of,
            &accounts,
            &transactions,
            &liabilities,
        )
    }

    /// Assigns personas for a snapshot and records the decision trace.
    pub async fn assign_persona(&self, snapshot: &FeatureSnapshot) -> Result<PersonaAssignment> {
        let outcome = self.engine.assign(snapshot);
        self.trace_store.append(outcome.trace).await?;
        Ok(outcome.assignment)
    }

    /// Full run: consent gate, features, assignment, generation, optional
    /// cosmetic rewrite, guardrails, persistence.
    pub async fn generate_recommendations(
        &self,
        user_id: Uuid,
        window_days: u32,
        options: &GenerateOptions,
    ) -> Result<GenerationOutcome> {
        self.require_consent(user_id).await?;

        let as_of = Utc::now().date_naive();
        let start = as_of - Duration::days(window_days as i64);
        let accounts = self.data_store.accounts(user_id).await?;
        let transactions = self.data_store.transactions(user_id, start, as_of).await?;
        let liabilities = self.data_store.liabilities(user_id).await?;

        let snapshot = compute_features(
            user_id,
            window_days,
            as_of,
            &accounts,
            &transactions,
            &liabilities,
        )?;
        let assignment = self.assign_persona(&snapshot).await?;

        let mut recommendations = self.generator.generate(
            &assignment,
            &accounts,
            &liabilities,
            &transactions,
            &snapshot,
            options,
        );

        // The rewrite runs before the sanitizer so the sanitizer always has
        // the final say over tone.
        if let Some(rewriter) = &self.rewriter {
            for rec in &mut recommendations {
                rec.body = rewrite_or_fallback(rewriter.as_ref(), &rec.body).await;
            }
        }

        let context = EligibilityContext::build(&accounts, &snapshot, options);
        let (kept, suppressed_offers) = self.guardrails.apply(&context, recommendations);

        if let Some(sink) = &self.sink {
            sink.persist(&kept).await?;
        }

        let (education_items, partner_offers): (Vec<_>, Vec<_>) = kept
            .into_iter()
            .partition(|r| r.kind == RecommendationKind::Education);

        info!(
            %user_id,
            window_days,
            persona = %assignment.primary_persona,
            education = education_items.len(),
            offers = partner_offers.len(),
            suppressed = suppressed_offers.len(),
            "Generation run complete"
        );

        Ok(GenerationOutcome {
            assignment,
            education_items,
            partner_offers,
            suppressed_offers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Account, AccountSubtype, AccountType, Liability, PaymentChannel, Transaction,
    };
    use crate::personas::default_catalog;
    use crate::recommendations::default_recommendation_catalog;
    use crate::store::{InMemoryConsentStore, InMemoryDataStore, InMemoryRecommendationSink};
    use crate::trace::InMemoryTraceStore;
    use chrono::NaiveDate;

    fn pipeline_with(
        data_store: Arc<InMemoryDataStore>,
        consent_store: Arc<InMemoryConsentStore>,
        trace_store: Arc<InMemoryTraceStore>,
        sink: Arc<InMemoryRecommendationSink>,
    ) -> InsightsPipeline {
        let personas = Arc::new(default_catalog());
        let templates = Arc::new(default_recommendation_catalog(&personas).unwrap());
        InsightsPipeline::new(data_store, consent_store, trace_store, personas, templates)
            .with_sink(sink)
    }

    fn card(user_id: Uuid) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id,
            name: "Rewards Card".to_string(),
            account_type: AccountType::Credit,
            subtype: AccountSubtype::CreditCard,
            currency: "USD".to_string(),
            available_balance: None,
            current_balance: -934.0,
            credit_limit: Some(1000.0),
            interest_rate: None,
            next_payment_due: None,
            mask: Some("4321".to_string()),
        }
    }

    fn interest_tx(account_id: Uuid, date: NaiveDate) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id,
            date,
            amount: -24.50,
            merchant_name: None,
            category_primary: "interest".to_string(),
            category_detailed: "interest_charged".to_string(),
            payment_channel: PaymentChannel::Other,
            pending: false,
        }
    }

    #[tokio::test]
    async fn test_missing_consent_leaves_zero_side_effects() {
        let data_store = Arc::new(InMemoryDataStore::new());
        let consent_store = Arc::new(InMemoryConsentStore::new());
        let trace_store = Arc::new(InMemoryTraceStore::new());
        let sink = Arc::new(InMemoryRecommendationSink::new());
        let pipeline = pipeline_with(
            data_store.clone(),
            consent_store,
            trace_store.clone(),
            sink.clone(),
        );

        let user_id = Uuid::new_v4();
        data_store.seed_accounts(user_id, vec![card(user_id)]).await;

        let err = pipeline
            .generate_recommendations(user_id, 30, &GenerateOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ConsentDenied(id) if id == user_id));
        assert!(trace_store.list_for_user(user_id).await.unwrap().is_empty());
        assert!(sink.list_for_user(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_run_produces_items_and_one_trace() {
        let data_store = Arc::new(InMemoryDataStore::new());
        let consent_store = Arc::new(InMemoryConsentStore::new());
        let trace_store = Arc::new(InMemoryTraceStore::new());
        let sink = Arc::new(InMemoryRecommendationSink::new());
        let pipeline = pipeline_with(
            data_store.clone(),
            consent_store.clone(),
            trace_store.clone(),
            sink.clone(),
        );

        let user_id = Uuid::new_v4();
        let account = card(user_id);
        let account_id = account.account_id;
        data_store.seed_accounts(user_id, vec![account]).await;
        data_store
            .seed_transactions(
                user_id,
                vec![interest_tx(account_id, Utc::now().date_naive() - Duration::days(5))],
            )
            .await;
        data_store
            .seed_liabilities(
                user_id,
                vec![Liability {
                    liability_id: Uuid::new_v4(),
                    account_id,
                    apr: Some(24.99),
                    minimum_payment: Some(35.0),
                    last_payment_amount: None,
                    last_payment_date: None,
                    next_payment_date: None,
                    is_overdue: false,
                    statement_balance: Some(934.0),
                }],
            )
            .await;
        consent_store.grant(user_id).await.unwrap();

        let options = GenerateOptions {
            credit_score: Some(710),
            annual_income: Some(52_000.0),
            ..Default::default()
        };
        let outcome = pipeline
            .generate_recommendations(user_id, 30, &options)
            .await
            .unwrap();

        assert_eq!(outcome.assignment.primary_persona, "high_utilization");
        assert!(!outcome.education_items.is_empty());
        for rec in outcome.education_items.iter().chain(&outcome.partner_offers) {
            assert!(rec.disclosure.is_some());
        }

        let traces = trace_store.list_for_user(user_id).await.unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].primary_persona, "high_utilization");

        let persisted = sink.list_for_user(user_id).await;
        assert_eq!(
            persisted.len(),
            outcome.education_items.len() + outcome.partner_offers.len()
        );
    }

    #[tokio::test]
    async fn test_unsupported_window_rejected() {
        let data_store = Arc::new(InMemoryDataStore::new());
        let consent_store = Arc::new(InMemoryConsentStore::new());
        let pipeline = pipeline_with(
            data_store,
            consent_store.clone(),
            Arc::new(InMemoryTraceStore::new()),
            Arc::new(InMemoryRecommendationSink::new()),
        );

        let user_id = Uuid::new_v4();
        consent_store.grant(user_id).await.unwrap();

        let err = pipeline.compute_features(user_id, 90).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidWindow(90)));
    }

    #[tokio::test]
    async fn test_user_with_no_data_gets_default_persona() {
        let data_store = Arc::new(InMemoryDataStore::new());
        let consent_store = Arc::new(InMemoryConsentStore::new());
        let pipeline = pipeline_with(
            data_store,
            consent_store.clone(),
            Arc::new(InMemoryTraceStore::new()),
            Arc::new(InMemoryRecommendationSink::new()),
        );

        let user_id = Uuid::new_v4();
        consent_store.grant(user_id).await.unwrap();

        let outcome = pipeline
            .generate_recommendations(user_id, 180, &GenerateOptions::default())
            .await
            .unwrap();

        assert!(outcome.assignment.used_default);
        assert_eq!(outcome.assignment.primary_persona, "balanced");
    }
}
