//! A/B routing across retrieval strategies.
//!
//! Deterministic per-user assignment during an experiment window, with a
//! process-wide override for tests and debugging. The override cell and the
//! router are explicit dependencies passed into request handlers, never
//! hidden singletons.

use chrono::NaiveDate;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GriyaError, Result};

const WEIGHT_EPSILON: f64 = 1e-6;
const HASH_BUCKETS: u32 = 1000;

/// Retrieval strategies available to the router.
///
/// The named hybrid variants fix the semantic weight so experiment configs
/// can compare blends; `Hybrid` is the default 60/40 blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    ApiOnly,
    VectorOnly,
    Hybrid,
    Hybrid5050,
    Hybrid6040,
    Hybrid7030,
    Hybrid8020,
}

impl SearchMethod {
    /// Semantic weight `w` used by hybrid blending.
    pub fn semantic_weight(&self) -> f32 {
        match self {
            SearchMethod::ApiOnly => 0.0,
            SearchMethod::VectorOnly => 1.0,
            SearchMethod::Hybrid | SearchMethod::Hybrid6040 => 0.6,
            SearchMethod::Hybrid5050 => 0.5,
            SearchMethod::Hybrid7030 => 0.7,
            SearchMethod::Hybrid8020 => 0.8,
        }
    }

    pub fn uses_semantic(&self) -> bool {
        !matches!(self, SearchMethod::ApiOnly)
    }

    pub fn uses_backend_filter(&self) -> bool {
        !matches!(self, SearchMethod::VectorOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::ApiOnly => "api_only",
            SearchMethod::VectorOnly => "vector_only",
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::Hybrid5050 => "hybrid_50_50",
            SearchMethod::Hybrid6040 => "hybrid_60_40",
            SearchMethod::Hybrid7030 => "hybrid_70_30",
            SearchMethod::Hybrid8020 => "hybrid_80_20",
        }
    }

    /// Parse the public API's method names plus the experiment variants.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "api_only" => Some(SearchMethod::ApiOnly),
            "vector_only" => Some(SearchMethod::VectorOnly),
            "hybrid" => Some(SearchMethod::Hybrid),
            "hybrid_50_50" => Some(SearchMethod::Hybrid5050),
            "hybrid_60_40" => Some(SearchMethod::Hybrid6040),
            "hybrid_70_30" => Some(SearchMethod::Hybrid7030),
            "hybrid_80_20" => Some(SearchMethod::Hybrid8020),
            _ => None,
        }
    }
}

/// Configuration of one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    /// Assignment weights; must sum to 1 within epsilon.
    pub weights: Vec<(SearchMethod, f64)>,
    #[serde(default = "default_true")]
    pub consistent_per_user: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(GriyaError::invalid_config(
                "experiment must define at least one method weight",
            ));
        }
        let sum: f64 = self.weights.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(GriyaError::invalid_config(format!(
                "experiment weights must sum to 1.0, got {sum}"
            )));
        }
        if self.weights.iter().any(|(_, w)| *w < 0.0) {
            return Err(GriyaError::invalid_config(
                "experiment weights must be non-negative",
            ));
        }
        Ok(())
    }

    fn active_on(&self, today: NaiveDate) -> bool {
        if !self.enabled || today < self.start {
            return false;
        }
        match self.end {
            Some(end) => today <= end,
            None => true,
        }
    }
}

/// Router status report.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub experiment: Option<String>,
    pub enabled: bool,
    pub override_method: Option<&'static str>,
    pub default_method: &'static str,
    pub weights: Vec<(&'static str, f64)>,
}

/// Per-user method router with a manual override cell.
pub struct MethodRouter {
    config: Option<ExperimentConfig>,
    default_method: SearchMethod,
    override_method: Mutex<Option<SearchMethod>>,
}

impl MethodRouter {
    pub fn new(config: Option<ExperimentConfig>, default_method: SearchMethod) -> Result<Self> {
        if let Some(config) = &config {
            config.validate()?;
        }
        Ok(Self {
            config,
            default_method,
            override_method: Mutex::new(None),
        })
    }

    /// Router with no experiment: every request gets the default method.
    pub fn fixed(default_method: SearchMethod) -> Self {
        Self {
            config: None,
            default_method,
            override_method: Mutex::new(None),
        }
    }

    /// Set or clear the process-wide override.
    pub fn set_override(&self, method: Option<SearchMethod>) {
        *self.override_method.lock() = method;
        log::info!(
            "ab override set to {:?}",
            method.map(|m| m.as_str()).unwrap_or("none")
        );
    }

    /// Pick the method for a request.
    ///
    /// Override > active experiment > default. Experiment assignment is
    /// stable per user for the whole experiment window.
    pub fn method_for(&self, user_id: Option<&str>) -> SearchMethod {
        if let Some(method) = *self.override_method.lock() {
            return method;
        }

        let Some(config) = &self.config else {
            return self.default_method;
        };
        let today = chrono::Utc::now().date_naive();
        if !config.active_on(today) {
            return self.default_method;
        }

        match user_id {
            Some(user_id) if config.consistent_per_user => {
                Self::assign_by_hash(config, user_id)
            }
            _ => Self::assign_random(config),
        }
    }

    fn assign_by_hash(config: &ExperimentConfig, user_id: &str) -> SearchMethod {
        let bucket = crc32fast::hash(user_id.as_bytes()) % HASH_BUCKETS;
        let threshold = f64::from(bucket) / f64::from(HASH_BUCKETS);
        Self::pick_by_threshold(config, threshold)
    }

    fn assign_random(config: &ExperimentConfig) -> SearchMethod {
        let threshold: f64 = rand::rng().random_range(0.0..1.0);
        Self::pick_by_threshold(config, threshold)
    }

    fn pick_by_threshold(config: &ExperimentConfig, threshold: f64) -> SearchMethod {
        let mut cumulative = 0.0;
        for (method, weight) in &config.weights {
            cumulative += weight;
            if threshold < cumulative {
                return *method;
            }
        }
        // Rounding slack: fall back to the first configured method.
        config.weights[0].0
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            experiment: self.config.as_ref().map(|c| c.name.clone()),
            enabled: self.config.as_ref().map(|c| c.enabled).unwrap_or(false),
            override_method: self.override_method.lock().map(|m| m.as_str()),
            default_method: self.default_method.as_str(),
            weights: self
                .config
                .as_ref()
                .map(|c| c.weights.iter().map(|(m, w)| (m.as_str(), *w)).collect())
                .unwrap_or_default(),
        }
    }
}
