//! Optional cosmetic rewriting of recommendation copy.
//!
//! A rewriter may rephrase body text for warmth but can never change the
//! facts: the caller runs the tone sanitizer after rewriting, and any
//! failure or timeout falls back to the original template text.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Per-attempt budget. Rewriting is cosmetic, so the budget is tight.
pub const REWRITE_TIMEOUT_SECS: u64 = 4;
const REWRITE_ATTEMPTS: u32 = 2;

#[async_trait]
pub trait TextRewriter: Send + Sync {
    async fn rewrite(&self, text: &str) -> Result<String>;
}

/// Passes text through unchanged. Default when no API key is configured.
pub struct NoopRewriter;

#[async_trait]
impl TextRewriter for NoopRewriter {
    async fn rewrite(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

/// Rewrites one text with retry and a hard per-attempt timeout. On any
/// failure the original text comes back untouched.
pub async fn rewrite_or_fallback(rewriter: &dyn TextRewriter, text: &str) -> String {
    for attempt in 1..=REWRITE_ATTEMPTS {
        let budget = Duration::from_secs(REWRITE_TIMEOUT_SECS);
        match timeout(budget, rewriter.rewrite(text)).await {
            Ok(Ok(rewritten)) if !rewritten.trim().is_empty() => return rewritten,
            Ok(Ok(_)) => {
                warn!(attempt, "Rewriter returned empty text");
            }
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "Rewrite attempt failed");
            }
            Err(_) => {
                warn!(attempt, "Rewrite attempt timed out");
            }
        }
    }
    text.to_string()
}

//
// ================= Gemini =================
//

/// Reusable Gemini client (connection-pooled)
pub struct GeminiRewriter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiRewriter {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        })
    }
}

const SYSTEM_PROMPT: &str = r#"You rephrase short financial guidance text.

Rules:
- Keep every number, percentage, dollar amount, and factual claim exactly as given
- Do not add new claims, products, or advice
- Keep roughly the same length
- Warm, supportive, plain language

Return only the rephrased text."#;

#[async_trait]
impl TextRewriter for GeminiRewriter {
    async fn rewrite(&self, text: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(EngineError::RewriteError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 512,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        info!("Calling Gemini API for rewrite");

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(EngineError::RewriteError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            EngineError::RewriteError(format!("Gemini parse error: {}", e))
        })?;

        let rewritten = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.trim().to_string())
            .ok_or_else(|| EngineError::RewriteError("Empty response from Gemini".to_string()))?;

        Ok(rewritten)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
