//! Decision trace store
//!
//! Every persona assignment writes exactly one append-only trace so a human
//! auditor can reconstruct the decision. Traces are never updated or deleted.

use crate::error::EngineError;
use crate::features::FeatureSnapshot;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

//
// ================= Trace Record =================
//

/// Per-persona matching detail. Reasons are recorded for every criterion
/// that held, even on personas that did not fully match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaMatchDetail {
    pub matched: bool,
    pub matched_criteria: u32,
    pub reasons: Vec<String>,
    pub unmatched_criteria: Vec<String>,
}

/// Immutable audit record of how a persona assignment was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub trace_id: Uuid,
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub window_days: u32,
    pub primary_persona: String,
    pub assigned_personas: Vec<String>,
    pub matching_results: BTreeMap<String, PersonaMatchDetail>,
    pub rationale: String,
    pub used_default: bool,
    pub features_snapshot: FeatureSnapshot,
    pub snapshot_hash: String,
}

/// Compute SHA256 hash of a snapshot for integrity verification.
/// Streams JSON directly into the hasher, no intermediate String.
pub fn compute_snapshot_hash(snapshot: &FeatureSnapshot) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), snapshot).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

//
// ================= Store Trait =================
//

#[async_trait::async_trait]
pub trait TraceStore: Send + Sync {
    /// Append one trace. Per-user traces keep invocation order.
    async fn append(&self, trace: DecisionTrace) -> Result<Uuid>;

    /// All traces for a user, in append order.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DecisionTrace>>;

    /// Recompute the snapshot hash for a stored trace and compare.
    async fn verify_integrity(&self, user_id: Uuid, trace_id: Uuid) -> Result<bool>;
}

//
// ================= In-memory Backend =================
//

pub struct InMemoryTraceStore {
    traces: Arc<RwLock<HashMap<Uuid, Vec<DecisionTrace>>>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self {
            traces: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryTraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn append(&self, trace: DecisionTrace) -> Result<Uuid> {
        let trace_id = trace.trace_id;
        let mut traces = self.traces.write().await;
        traces.entry(trace.user_id).or_default().push(trace);
        Ok(trace_id)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DecisionTrace>> {
        let traces = self.traces.read().await;
        Ok(traces.get(&user_id).cloned().unwrap_or_default())
    }

    async fn verify_integrity(&self, user_id: Uuid, trace_id: Uuid) -> Result<bool> {
        let traces = self.traces.read().await;
        let Some(trace) = traces
            .get(&user_id)
            .and_then(|list| list.iter().find(|t| t.trace_id == trace_id))
        else {
            return Ok(false);
        };
        Ok(compute_snapshot_hash(&trace.features_snapshot) == trace.snapshot_hash)
    }
}

//
// ================= Postgres Backend =================
//

/// Durable trace store. Schema is created lazily on first use.
pub struct PostgresTraceStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresTraceStore {
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
                    CREATE TABLE IF NOT EXISTS decision_traces (
                      trace_id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      payload JSONB NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_decision_traces_user_time
                    ON decision_traces (user_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                EngineError::DatabaseError(format!(
                    "Failed to initialize decision trace schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl TraceStore for PostgresTraceStore {
    async fn append(&self, trace: DecisionTrace) -> Result<Uuid> {
        self.ensure_schema().await?;

        let payload = serde_json::to_value(&trace)?;

        sqlx::query(
            "INSERT INTO decision_traces (trace_id, user_id, created_at, payload) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(trace.trace_id)
        .bind(trace.user_id)
        .bind(trace.timestamp)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("Failed to append trace: {}", e)))?;

        Ok(trace.trace_id)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DecisionTrace>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT payload FROM decision_traces \
             WHERE user_id = $1 \
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::DatabaseError(format!("Failed to load traces: {}", e)))?;

        let mut traces = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: serde_json::Value = row
                .try_get("payload")
                .map_err(|e| EngineError::DatabaseError(format!("Bad trace row: {}", e)))?;
            traces.push(serde_json::from_value(payload)?);
        }
        Ok(traces)
    }

    async fn verify_integrity(&self, user_id: Uuid, trace_id: Uuid) -> Result<bool> {
        let traces = self.list_for_user(user_id).await?;
        let Some(trace) = traces.iter().find(|t| t.trace_id == trace_id) else {
            return Ok(false);
        };
        Ok(compute_snapshot_hash(&trace.features_snapshot) == trace.snapshot_hash)
    }
}

/// Pick the trace backend from the environment: Postgres when a database URL
/// is configured, in-memory otherwise.
pub fn trace_store_from_env() -> Arc<dyn TraceStore> {
    let database_url = std::env::var("POSTGRES_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&url)
        {
            Ok(pool) => {
                tracing::info!("Decision trace store: Postgres backend");
                return Arc::new(PostgresTraceStore::new(pool));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Postgres unavailable, using in-memory trace store");
            }
        }
    }

    Arc::new(InMemoryTraceStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_for(user_id: Uuid, window_days: u32) -> DecisionTrace {
        let snapshot = FeatureSnapshot::zero(user_id, window_days);
        let snapshot_hash = compute_snapshot_hash(&snapshot);
        DecisionTrace {
            trace_id: Uuid::new_v4(),
            user_id,
            timestamp: Utc::now(),
            window_days,
            primary_persona: "balanced".to_string(),
            assigned_personas: vec!["balanced".to_string()],
            matching_results: BTreeMap::new(),
            rationale: "Steady.".to_string(),
            used_default: true,
            features_snapshot: snapshot,
            snapshot_hash,
        }
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemoryTraceStore::new();
        let user_id = Uuid::new_v4();

        let first = trace_for(user_id, 30);
        let second = trace_for(user_id, 180);
        store.append(first.clone()).await.unwrap();
        store.append(second.clone()).await.unwrap();

        let traces = store.list_for_user(user_id).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].trace_id, first.trace_id);
        assert_eq!(traces[1].trace_id, second.trace_id);
    }

    #[tokio::test]
    async fn test_users_isolated() {
        let store = InMemoryTraceStore::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        store.append(trace_for(user_a, 30)).await.unwrap();

        assert_eq!(store.list_for_user(user_a).await.unwrap().len(), 1);
        assert!(store.list_for_user(user_b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_integrity_verification() {
        let store = InMemoryTraceStore::new();
        let user_id = Uuid::new_v4();

        let good = trace_for(user_id, 30);
        let good_id = good.trace_id;

        let mut tampered = trace_for(user_id, 30);
        tampered.snapshot_hash = "deadbeef".to_string();
        let tampered_id = tampered.trace_id;

        store.append(good).await.unwrap();
        store.append(tampered).await.unwrap();

        assert!(store.verify_integrity(user_id, good_id).await.unwrap());
        assert!(!store.verify_integrity(user_id, tampered_id).await.unwrap());
        assert!(!store
            .verify_integrity(user_id, Uuid::new_v4())
            .await
            .unwrap());
    }

    #[test]
    fn test_snapshot_hash_is_deterministic() {
        let snapshot = FeatureSnapshot::zero(Uuid::new_v4(), 30);
        assert_eq!(
            compute_snapshot_hash(&snapshot),
            compute_snapshot_hash(&snapshot)
        );
    }

    #[test]
    fn test_trace_serializes_to_expected_shape() {
        let trace = trace_for(Uuid::new_v4(), 30);
        let json = serde_json::to_value(&trace).unwrap();
        assert!(json.get("user_id").is_some());
        assert!(json.get("primary_persona").is_some());
        assert!(json.get("matching_results").is_some());
        assert!(json.get("rationale").is_some());
        assert!(json.get("features_snapshot").is_some());
    }
}
