use financial_persona_engine::{
    api::start_server,
    notify::NotificationHub,
    personas::default_catalog,
    pipeline::InsightsPipeline,
    recommendations::default_recommendation_catalog,
    rewrite::GeminiRewriter,
    store::{InMemoryConsentStore, InMemoryDataStore, InMemoryRecommendationSink},
    trace::trace_store_from_env,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Financial Persona Engine - API Server");
    info!("📍 Port: {}", api_port);

    let persona_catalog = Arc::new(default_catalog());
    let recommendation_catalog =
        Arc::new(default_recommendation_catalog(&persona_catalog)?);

    let data_store = Arc::new(InMemoryDataStore::new());
    let consent_store = Arc::new(InMemoryConsentStore::new());
    let trace_store = trace_store_from_env();
    let sink = Arc::new(InMemoryRecommendationSink::new());

    let mut pipeline = InsightsPipeline::new(
        data_store,
        consent_store,
        trace_store,
        persona_catalog,
        recommendation_catalog,
    )
    .with_sink(sink);

    match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            info!("Cosmetic rewriter enabled");
            pipeline = pipeline.with_rewriter(Arc::new(GeminiRewriter::new(key)?));
        }
        _ => info!("GEMINI_API_KEY not set, recommendations use template copy as-is"),
    }

    info!("✅ Pipeline initialized");
    info!("📡 Starting API server...");

    start_server(Arc::new(pipeline), NotificationHub::new(), api_port).await?;

    Ok(())
}
