//! Financial Persona Engine
//!
//! A deterministic financial-insights pipeline that:
//! - Extracts behavioral features from linked account data
//! - Assigns spending/saving personas from a rule catalog
//! - Generates personalized education items and partner offers
//! - Enforces eligibility, tone, and disclosure guardrails
//! - Records an auditable decision trace for every assignment
//!
//! PIPELINE:
//! DATA → FEATURES → PERSONA → RECOMMEND → GUARDRAILS → PERSIST
//!
//! Every stage is pure given its inputs; the only nondeterminism is the
//! optional LLM-backed cosmetic rewrite, which can never change facts and
//! always falls back to template copy.

pub mod api;
pub mod error;
pub mod features;
pub mod guardrails;
pub mod models;
pub mod notify;
pub mod personas;
pub mod pipeline;
pub mod recommendations;
pub mod rewrite;
pub mod store;
pub mod trace;

pub use error::{EngineError, Result};

// Re-export common types
pub use features::{compute_features, FeatureSnapshot};
pub use models::*;
pub use personas::{default_catalog, PersonaAssignmentEngine, PersonaCatalog};
pub use pipeline::{GenerationOutcome, InsightsPipeline};
pub use recommendations::{default_recommendation_catalog, RecommendationCatalog};
pub use trace::{DecisionTrace, TraceStore};
