//! Engine configuration.
//!
//! Every component takes its own config section; `AppConfig` bundles them and
//! can be deserialized from TOML. All fields carry the defaults named in the
//! design so an empty file (or `AppConfig::default()`) yields a working
//! setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GriyaError, Result};

/// Retrieval (C6) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// `hybrid`, `api_only` or `vector_only`.
    pub default_method: String,
    /// Semantic weight `w` for hybrid blending.
    pub semantic_weight: f32,
    /// Radius used by the geocoded proximity fallback.
    pub default_radius_km: f64,
    /// Widened fallback radius when the first pass returns nothing.
    pub max_radius_km: f64,
    /// Concurrent authoritative detail fetches.
    pub detail_concurrency: usize,
    /// Deadline for a single candidate-generation leg, in milliseconds.
    pub leg_deadline_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_method: "hybrid".to_string(),
            semantic_weight: 0.6,
            default_radius_km: 2.0,
            max_radius_km: 5.0,
            detail_concurrency: 8,
            leg_deadline_ms: 15_000,
        }
    }
}

/// Agent loop (C7) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on PLAN -> EXECUTE round trips per turn.
    pub max_tool_hops: usize,
    /// Whole-turn deadline, in milliseconds.
    pub turn_deadline_ms: u64,
    /// Per-tool deadline, in milliseconds.
    pub tool_deadline_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_hops: 6,
            turn_deadline_ms: 60_000,
            tool_deadline_ms: 20_000,
        }
    }
}

/// Sliding-window memory (C8) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Raw messages returned by `context()`.
    pub window: usize,
    /// Conversation length that triggers summarization of the older tail.
    pub summarize_threshold: usize,
    /// Delete summarized messages instead of keeping them on disk.
    pub compact_on_summarize: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window: 20,
            summarize_threshold: 50,
            compact_on_summarize: false,
        }
    }
}

/// Sync pipeline (C5) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minutes between scheduled cycles.
    pub interval_minutes: u64,
    /// Records pulled per cycle.
    pub batch_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            batch_limit: 200,
        }
    }
}

/// Embedding service (C3) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub cache_ttl_s: u64,
    pub cache_max: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "text-embedding-3-small".to_string(),
            cache_ttl_s: 3_600,
            cache_max: 10_000,
        }
    }
}

/// Geocoding service (C4) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub cache_ttl_s: u64,
    pub cache_max: usize,
    /// Wall-clock budget across both providers, in milliseconds.
    pub call_budget_ms: u64,
    /// City appended to bare place names before provider lookup.
    pub default_city: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_s: 86_400,
            cache_max: 500,
            call_budget_ms: 10_000,
            default_city: "Medan".to_string(),
        }
    }
}

/// Offline evaluator (C11) settings. The gold file may override both values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub threshold_t: f64,
    pub price_tolerance: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            threshold_t: 0.6,
            price_tolerance: 0.0,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retrieval: RetrievalConfig,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub sync: SyncConfig,
    pub embedding: EmbeddingConfig,
    pub geocoding: GeocodingConfig,
    pub eval: EvalConfig,
}

impl AppConfig {
    /// Parse a TOML document. Unknown keys are ignored; missing sections fall
    /// back to defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text)
            .map_err(|err| GriyaError::invalid_config(format!("config parse failed: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.retrieval.semantic_weight) {
            return Err(GriyaError::invalid_config(format!(
                "retrieval.semantic_weight must be in [0, 1], got {}",
                self.retrieval.semantic_weight
            )));
        }
        if self.retrieval.default_radius_km <= 0.0
            || self.retrieval.max_radius_km < self.retrieval.default_radius_km
        {
            return Err(GriyaError::invalid_config(
                "retrieval radii must satisfy 0 < default_radius_km <= max_radius_km",
            ));
        }
        if self.agent.max_tool_hops == 0 {
            return Err(GriyaError::invalid_config("agent.max_tool_hops must be >= 1"));
        }
        if self.memory.window == 0 {
            return Err(GriyaError::invalid_config("memory.window must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.eval.threshold_t) {
            return Err(GriyaError::invalid_config(
                "eval.threshold_t must be in [0, 1]",
            ));
        }
        Ok(())
    }
}
