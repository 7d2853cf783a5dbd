//! REST API server for the persona engine.
//!
//! Exposes features, persona assignment, recommendation generation, decision
//! traces, and consent management over HTTP.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::EngineError;
use crate::models::GenerateOptions;
use crate::notify::{NotificationHub, SubscriptionEvent};
use crate::pipeline::InsightsPipeline;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub window: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub window: Option<u32>,
    pub num_education: Option<usize>,
    pub num_offers: Option<usize>,
    pub credit_score: Option<u32>,
    pub annual_income: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CancelToggleRequest {
    pub merchant: String,
    pub cancelled: bool,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_response(err: EngineError) -> (StatusCode, Json<ApiResponse>) {
    let status = match &err {
        EngineError::ConsentDenied(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidWindow(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(err.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<InsightsPipeline>,
    pub hub: NotificationHub,
}

/// =============================
/// Helpers — User Identifiers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// External callers may identify users by UUID or by an opaque string; the
/// latter maps deterministically onto a UUID.
fn resolve_user_id(raw: &str) -> uuid::Uuid {
    uuid::Uuid::parse_str(raw).unwrap_or_else(|_| stable_uuid_from_string(raw))
}

const DEFAULT_WINDOW_DAYS: u32 = 30;

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Features Endpoint
/// =============================

async fn get_features(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);
    let window = query.window.unwrap_or(DEFAULT_WINDOW_DAYS);

    match state.pipeline.compute_features(user_id, window).await {
        Ok(snapshot) => (StatusCode::OK, Json(ApiResponse::success(snapshot))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Persona Endpoint
/// =============================

async fn get_persona(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);
    let window = query.window.unwrap_or(DEFAULT_WINDOW_DAYS);

    let snapshot = match state.pipeline.compute_features(user_id, window).await {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(e),
    };
    match state.pipeline.assign_persona(&snapshot).await {
        Ok(assignment) => (StatusCode::OK, Json(ApiResponse::success(assignment))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Recommendations Endpoint
/// =============================

async fn generate_recommendations(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(req): Json<GenerateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);
    let window = req.window.unwrap_or(DEFAULT_WINDOW_DAYS);
    let options = GenerateOptions {
        num_education: req.num_education,
        num_offers: req.num_offers,
        credit_score: req.credit_score,
        annual_income: req.annual_income,
    };

    info!(%user_id, window, "Received recommendation request");

    match state
        .pipeline
        .generate_recommendations(user_id, window, &options)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "persona": outcome.assignment,
                "education_items": outcome.education_items,
                "partner_offers": outcome.partner_offers,
            }))),
        ),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Decision Traces Endpoint
/// =============================

async fn list_traces(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);

    match state.pipeline.trace_store().list_for_user(user_id).await {
        Ok(traces) => (StatusCode::OK, Json(ApiResponse::success(traces))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Consent Endpoints
/// =============================

async fn grant_consent(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);
    match state.pipeline.consent_store().grant(user_id).await {
        Ok(record) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Err(e) => error_response(e),
    }
}

async fn revoke_consent(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);
    match state.pipeline.consent_store().revoke(user_id).await {
        Ok(record) => (StatusCode::OK, Json(ApiResponse::success(record))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Subscription Actions
/// =============================

async fn toggle_subscription_cancel(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Json(req): Json<CancelToggleRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let user_id = resolve_user_id(&user_id);
    let event = SubscriptionEvent::CancelToggled {
        user_id,
        merchant: req.merchant.clone(),
        cancelled: req.cancelled,
    };
    state.hub.publish(event.clone());
    (StatusCode::OK, Json(ApiResponse::success(event)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<InsightsPipeline>, hub: NotificationHub) -> Router {
    let state = ApiState { pipeline, hub };

    Router::new()
        .route("/health", get(health))
        .route("/api/users/:user_id/features", get(get_features))
        .route("/api/users/:user_id/persona", get(get_persona))
        .route(
            "/api/users/:user_id/recommendations",
            post(generate_recommendations),
        )
        .route("/api/users/:user_id/traces", get(list_traces))
        .route("/api/users/:user_id/consent/grant", post(grant_consent))
        .route("/api/users/:user_id/consent/revoke", post(revoke_consent))
        .route(
            "/api/users/:user_id/subscriptions/cancel-toggle",
            post(toggle_subscription_cancel),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<InsightsPipeline>,
    hub: NotificationHub,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline, hub);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_stable_uuid_is_deterministic_and_valid() {
        let a = stable_uuid_from_string("user-42");
        let b = stable_uuid_from_string("user-42");
        let c = stable_uuid_from_string("user-43");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn test_resolve_user_id_prefers_real_uuid() {
        let raw = "b5d0a0a4-1f3c-4f8e-9a2d-1c6d6f1a2b3c";
        assert_eq!(resolve_user_id(raw).to_string(), raw);
        assert_eq!(resolve_user_id("opaque"), stable_uuid_from_string("opaque"));
    }

    #[test]
    fn test_error_response_status_mapping() {
        let user_id = Uuid::new_v4();
        let (status, body) = error_response(EngineError::ConsentDenied(user_id));
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!body.0.success);
        assert!(body.0.error.as_deref().unwrap().contains("Consent not granted"));

        let (status, _) = error_response(EngineError::InvalidWindow(7));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = error_response(EngineError::StoreError("down".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
