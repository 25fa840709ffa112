//! Gold file schema and evaluation result types.

use serde::{Deserialize, Serialize};

use crate::error::{GriyaError, Result};

/// Result of a single constraint check.
///
/// `Na` (constraint not specified) is excluded from denominators; `Missing`
/// (property lacks the data) counts as a failure unless the question expects
/// `no_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Fail,
    Na,
    Missing,
}

/// Expected outcome of a gold question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedResult {
    HasData,
    NoData,
}

/// Whether constraints are computed automatically or judged by a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
    #[default]
    Auto,
    Manual,
}

fn default_radius() -> f64 {
    2.0
}

/// Location block: keyword containment first, then great-circle distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConstraint {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default = "default_radius")]
    pub radius_km: f64,
}

/// Price block: either explicit bounds or a target with symmetric tolerance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceConstraint {
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    /// "harga 1M-an": around the target.
    #[serde(default)]
    pub target: Option<i64>,
    /// Overrides the file-level default when present (0.0 is meaningful).
    #[serde(default)]
    pub tolerance: Option<f64>,
}

impl PriceConstraint {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.target.is_none()
    }
}

/// Count block for bedrooms and floors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountConstraint {
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default)]
    pub exact: Option<i64>,
}

impl CountConstraint {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.exact.is_none()
    }
}

/// All constraints of one gold question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub listing_type: Option<String>,
    #[serde(default)]
    pub location: Option<LocationConstraint>,
    #[serde(default)]
    pub price: Option<PriceConstraint>,
    #[serde(default)]
    pub bedrooms: Option<CountConstraint>,
    #[serde(default)]
    pub floors: Option<CountConstraint>,
}

/// One gold question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldQuestion {
    pub id: i64,
    pub question: String,
    pub category: String,
    pub expected_result: ExpectedResult,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
}

impl GoldQuestion {
    pub fn is_manual(&self) -> bool {
        self.evaluation_mode == EvaluationMode::Manual
    }
}

/// The gold set document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldFile {
    #[serde(default)]
    pub threshold_t: Option<f64>,
    #[serde(default)]
    pub price_tolerance: Option<f64>,
    pub questions: Vec<GoldQuestion>,
}

impl GoldFile {
    pub fn from_json(text: &str) -> Result<Self> {
        let file: GoldFile = serde_json::from_str(text)
            .map_err(|err| GriyaError::bad_request(format!("gold file invalid: {err}")))?;
        file.validate()?;
        Ok(file)
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<()> {
        for question in &self.questions {
            if let Some(price) = &question.constraints.price
                && price.target.is_some()
                && (price.min.is_some() || price.max.is_some())
            {
                // Target and explicit bounds together are undefined; reject.
                return Err(GriyaError::bad_request(format!(
                    "question {}: price target and min/max are mutually exclusive",
                    question.id
                )));
            }
        }
        Ok(())
    }
}

/// Constraint check results for one returned property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyCheck {
    pub property_id: String,
    pub property_name: String,

    pub property_type_result: CheckOutcome,
    pub listing_type_result: CheckOutcome,
    pub location_result: CheckOutcome,
    pub price_result: CheckOutcome,
    pub bedrooms_result: CheckOutcome,
    pub floors_result: CheckOutcome,

    #[serde(default)]
    pub location_keyword_match: Option<String>,
    #[serde(default)]
    pub location_distance_km: Option<f64>,
    #[serde(default)]
    pub location_failure_reason: Option<String>,

    /// Manual-mode state: checks are skipped and the verdict waits for a
    /// human override.
    #[serde(default)]
    pub is_manual: bool,
    #[serde(default)]
    pub manual_result: Option<CheckOutcome>,
    #[serde(default)]
    pub manual_comment: String,
}

impl PropertyCheck {
    pub fn all_results(&self) -> [CheckOutcome; 6] {
        [
            self.property_type_result,
            self.listing_type_result,
            self.location_result,
            self.price_result,
            self.bedrooms_result,
            self.floors_result,
        ]
    }

    fn applicable(&self) -> Vec<CheckOutcome> {
        self.all_results()
            .into_iter()
            .filter(|outcome| *outcome != CheckOutcome::Na)
            .collect()
    }

    /// Constraint pass ratio in `[0, 1]`. Pending manual checks score 0.
    pub fn cpr(&self) -> f64 {
        if self.is_manual {
            return match self.manual_result {
                Some(CheckOutcome::Pass) => 1.0,
                _ => 0.0,
            };
        }
        let applicable = self.applicable();
        if applicable.is_empty() {
            return 1.0;
        }
        let passed = applicable
            .iter()
            .filter(|outcome| **outcome == CheckOutcome::Pass)
            .count();
        passed as f64 / applicable.len() as f64
    }

    /// Every applicable constraint passes.
    pub fn strict_pass(&self) -> bool {
        if self.is_manual {
            return self.manual_result == Some(CheckOutcome::Pass);
        }
        self.applicable()
            .iter()
            .all(|outcome| *outcome == CheckOutcome::Pass)
    }

    pub fn is_pending_manual(&self) -> bool {
        self.is_manual && self.manual_result.is_none()
    }
}

/// Evaluation of one gold question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvaluation {
    pub query_id: i64,
    pub question: String,
    pub category: String,
    pub expected_result: ExpectedResult,
    pub has_results: bool,
    pub property_checks: Vec<PropertyCheck>,

    #[serde(default)]
    pub is_manual: bool,
    /// Human verdict overriding the computed success.
    #[serde(default)]
    pub override_success: Option<bool>,
}

impl QueryEvaluation {
    pub fn num_properties(&self) -> usize {
        self.property_checks.len()
    }

    pub fn mean_cpr(&self) -> f64 {
        if self.property_checks.is_empty() {
            return 0.0;
        }
        self.property_checks.iter().map(PropertyCheck::cpr).sum::<f64>()
            / self.property_checks.len() as f64
    }

    pub fn strict_success_count(&self) -> usize {
        self.property_checks
            .iter()
            .filter(|check| check.strict_pass())
            .count()
    }

    pub fn has_pending_manual(&self) -> bool {
        self.property_checks.iter().any(PropertyCheck::is_pending_manual)
    }

    /// Query success at threshold T.
    pub fn is_success(&self, threshold: f64) -> bool {
        if let Some(verdict) = self.override_success {
            return verdict;
        }
        if self.is_manual && self.has_pending_manual() {
            return false;
        }
        match self.expected_result {
            ExpectedResult::NoData => !self.has_results,
            ExpectedResult::HasData => self.has_results && self.mean_cpr() >= threshold,
        }
    }

    /// Confusion cell for this query.
    ///
    /// Predicted positive means results were returned and either no property
    /// was checkable or the mean CPR clears the threshold.
    pub fn confusion_cell(&self, threshold: f64) -> ConfusionCell {
        let truth_positive = self.expected_result == ExpectedResult::HasData;
        let predicted_positive =
            self.has_results && (self.property_checks.is_empty() || self.mean_cpr() >= threshold);
        match (truth_positive, predicted_positive) {
            (true, true) => ConfusionCell::TruePositive,
            (false, true) => ConfusionCell::FalsePositive,
            (false, false) => ConfusionCell::TrueNegative,
            (true, false) => ConfusionCell::FalseNegative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfusionCell {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

/// Query-level confusion matrix.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionMatrix {
    pub fn record(&mut self, cell: ConfusionCell) {
        match cell {
            ConfusionCell::TruePositive => self.tp += 1,
            ConfusionCell::FalsePositive => self.fp += 1,
            ConfusionCell::TrueNegative => self.tn += 1,
            ConfusionCell::FalseNegative => self.fn_ += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn precision(&self) -> f64 {
        if self.tp + self.fp == 0 {
            0.0
        } else {
            self.tp as f64 / (self.tp + self.fp) as f64
        }
    }

    pub fn recall(&self) -> f64 {
        if self.tp + self.fn_ == 0 {
            0.0
        } else {
            self.tp as f64 / (self.tp + self.fn_) as f64
        }
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            (self.tp + self.tn) as f64 / self.total() as f64
        }
    }
}

/// Per-constraint accuracy; `None` when no question applied the constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerConstraintAccuracy {
    pub property_type: Option<f64>,
    pub listing_type: Option<f64>,
    pub location: Option<f64>,
    pub price: Option<f64>,
    pub bedrooms: Option<f64>,
    pub floors: Option<f64>,
}

/// Per-category breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub success_rate: f64,
    pub total_properties: usize,
    pub mean_cpr: f64,
}

/// Aggregated metrics of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub total_queries: usize,
    pub total_properties: usize,
    pub threshold_t: f64,

    pub pca: PerConstraintAccuracy,
    /// Mean CPR weighted by property count.
    pub mean_cpr: f64,
    pub strict_success_ratio: f64,
    pub query_success_rate: f64,

    pub confusion_matrix: ConfusionMatrix,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,

    pub category_metrics: std::collections::BTreeMap<String, CategoryMetrics>,
}
