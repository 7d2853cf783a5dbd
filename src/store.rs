//! Data access seams for the pipeline.
//!
//! The pipeline only ever talks to these traits, so tests and the demo run
//! fully in memory while a deployment can point the recommendation sink at
//! Postgres.

use crate::error::{EngineError, Result};
use crate::models::{Account, ConsentRecord, Liability, Recommendation, Transaction};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

//
// ================= Traits =================
//

/// Read access to a user's linked financial data.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn accounts(&self, user_id: Uuid) -> Result<Vec<Account>>;

    /// Transactions dated in `(start, end]`, sorted by date ascending.
    async fn transactions(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>>;

    async fn liabilities(&self, user_id: Uuid) -> Result<Vec<Liability>>;
}

/// Consent state. Absence of a record means consent was never given.
#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn get_consent(&self, user_id: Uuid) -> Result<ConsentRecord>;
    async fn grant(&self, user_id: Uuid) -> Result<ConsentRecord>;
    async fn revoke(&self, user_id: Uuid) -> Result<ConsentRecord>;
}

/// Destination for recommendations that survived the guardrail chain.
#[async_trait]
pub trait RecommendationSink: Send + Sync {
    async fn persist(&self, recommendations: &[Recommendation]) -> Result<()>;
}

//
// ================= In-memory =================
//

#[derive(Default)]
pub struct InMemoryDataStore {
    accounts: RwLock<HashMap<Uuid, Vec<Account>>>,
    transactions: RwLock<HashMap<Uuid, Vec<Transaction>>>,
    liabilities: RwLock<HashMap<Uuid, Vec<Liability>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_accounts(&self, user_id: Uuid, accounts: Vec<Account>) {
        self.accounts.write().await.insert(user_id, accounts);
    }

    pub async fn seed_transactions(&self, user_id: Uuid, transactions: Vec<Transaction>) {
        self.transactions.write().await.insert(user_id, transactions);
    }

    pub async fn seed_liabilities(&self, user_id: Uuid, liabilities: Vec<Liability>) {
        self.liabilities.write().await.insert(user_id, liabilities);
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn accounts(&self, user_id: Uuid) -> Result<Vec<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transactions(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = self
            .transactions
            .read()
            .await
            .get(&user_id)
            .map(|txns| {
                txns.iter()
                    .filter(|t| t.date > start && t.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|t| t.date);
        Ok(rows)
    }

    async fn liabilities(&self, user_id: Uuid) -> Result<Vec<Liability>> {
        Ok(self
            .liabilities
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryConsentStore {
    records: RwLock<HashMap<Uuid, ConsentRecord>>,
}

impl InMemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn get_consent(&self, user_id: Uuid) -> Result<ConsentRecord> {
        Ok(self
            .records
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| ConsentRecord::not_consented(user_id)))
    }

    async fn grant(&self, user_id: Uuid) -> Result<ConsentRecord> {
        let record = ConsentRecord {
            user_id,
            consented: true,
            consented_at: Some(Utc::now()),
            revoked_at: None,
        };
        self.records.write().await.insert(user_id, record.clone());
        info!(%user_id, "Consent granted");
        Ok(record)
    }

    async fn revoke(&self, user_id: Uuid) -> Result<ConsentRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id)
            .or_insert_with(|| ConsentRecord::not_consented(user_id));
        record.consented = false;
        record.revoked_at = Some(Utc::now());
        info!(%user_id, "Consent revoked");
        Ok(record.clone())
    }
}

#[derive(Default)]
pub struct InMemoryRecommendationSink {
    saved: RwLock<HashMap<Uuid, Vec<Recommendation>>>,
}

impl InMemoryRecommendationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Vec<Recommendation> {
        self.saved
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecommendationSink for InMemoryRecommendationSink {
    async fn persist(&self, recommendations: &[Recommendation]) -> Result<()> {
        let mut saved = self.saved.write().await;
        for rec in recommendations {
            saved.entry(rec.user_id).or_default().push(rec.clone());
        }
        Ok(())
    }
}

//
// ================= Postgres sink =================
//

pub struct PostgresRecommendationSink {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresRecommendationSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS recommendations (
                        recommendation_id UUID PRIMARY KEY,
                        user_id UUID NOT NULL,
                        template_id TEXT NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL,
                        payload JSONB NOT NULL
                    )
                    "#,
                )
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_recommendations_user \
                     ON recommendations (user_id, created_at)",
                )
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

                debug!("Recommendation schema ready");
                Ok::<(), EngineError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecommendationSink for PostgresRecommendationSink {
    async fn persist(&self, recommendations: &[Recommendation]) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::DatabaseError(e.to_string()))?;

        for rec in recommendations {
            let payload = serde_json::to_value(rec)?;
            sqlx::query(
                "INSERT INTO recommendations \
                 (recommendation_id, user_id, template_id, created_at, payload) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (recommendation_id) DO NOTHING",
            )
            .bind(rec.recommendation_id)
            .bind(rec.user_id)
            .bind(&rec.template_id)
            .bind(rec.created_at)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| EngineError::DatabaseError(e.to_string()))?;
        info!(count = recommendations.len(), "Recommendations persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentChannel;

    fn tx(user_account: Uuid, day: u32, amount: f64) -> Transaction {
        Transaction {
            transaction_id: Uuid::new_v4(),
            account_id: user_account,
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            amount,
            merchant_name: None,
            category_primary: "general".to_string(),
            category_detailed: "general".to_string(),
            payment_channel: PaymentChannel::Online,
            pending: false,
        }
    }

    #[tokio::test]
    async fn test_transactions_filtered_to_window_and_sorted() {
        let store = InMemoryDataStore::new();
        let user_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();
        store
            .seed_transactions(
                user_id,
                vec![
                    tx(account_id, 20, -30.0),
                    tx(account_id, 5, -10.0),
                    tx(account_id, 1, -99.0),
                ],
            )
            .await;

        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let rows = store.transactions(user_id, start, end).await.unwrap();

        // March 1 is excluded: the window is exclusive at the start.
        assert_eq!(rows.len(), 2);
        assert!(rows[0].date < rows[1].date);
    }

    #[tokio::test]
    async fn test_unknown_user_has_no_consent() {
        let store = InMemoryConsentStore::new();
        let record = store.get_consent(Uuid::new_v4()).await.unwrap();
        assert!(!record.consented);
        assert!(record.consented_at.is_none());
    }

    #[tokio::test]
    async fn test_consent_grant_then_revoke() {
        let store = InMemoryConsentStore::new();
        let user_id = Uuid::new_v4();

        let granted = store.grant(user_id).await.unwrap();
        assert!(granted.consented);
        assert!(granted.consented_at.is_some());

        let revoked = store.revoke(user_id).await.unwrap();
        assert!(!revoked.consented);
        assert!(revoked.revoked_at.is_some());

        let current = store.get_consent(user_id).await.unwrap();
        assert!(!current.consented);
    }

    #[tokio::test]
    async fn test_sink_groups_by_user() {
        use crate::models::{Priority, RecommendationKind, RecommendationStatus};

        let sink = InMemoryRecommendationSink::new();
        let user_id = Uuid::new_v4();
        let rec = Recommendation {
            recommendation_id: Uuid::new_v4(),
            user_id,
            template_id: "automate_savings".to_string(),
            kind: RecommendationKind::Education,
            title: "Automate your saving".to_string(),
            body: "body".to_string(),
            action_items: vec![],
            expected_impact: None,
            priority: Priority::Medium,
            source_personas: vec!["balanced".to_string()],
            disclosure: None,
            status: RecommendationStatus::Pending,
            status_updated_at: None,
            consent_blocked: false,
            created_at: Utc::now(),
        };

        sink.persist(&[rec]).await.unwrap();
        assert_eq!(sink.list_for_user(user_id).await.len(), 1);
        assert!(sink.list_for_user(Uuid::new_v4()).await.is_empty());
    }
}
