//! Metric computation and manual-mode overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eval::checker::ConstraintChecker;
use crate::eval::models::{
    CategoryMetrics, CheckOutcome, ConfusionMatrix, EvaluationMetrics, GoldFile, GoldQuestion,
    PerConstraintAccuracy, PropertyCheck, QueryEvaluation,
};
use crate::property::Property;

/// The evaluation engine: checks properties, aggregates metrics, merges
/// incremental runs and applies human overrides for manual-mode questions.
pub struct Evaluator {
    threshold_t: f64,
    checker: ConstraintChecker,
}

impl Evaluator {
    pub fn new(threshold_t: f64, price_tolerance: f64) -> Self {
        Self {
            threshold_t,
            checker: ConstraintChecker::new(price_tolerance),
        }
    }

    /// Build an evaluator honoring the gold file's own threshold and
    /// tolerance when present.
    pub fn for_gold_file(file: &GoldFile, default_threshold: f64, default_tolerance: f64) -> Self {
        Self::new(
            file.threshold_t.unwrap_or(default_threshold),
            file.price_tolerance.unwrap_or(default_tolerance),
        )
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_t
    }

    /// Evaluate one question against the properties a strategy returned.
    pub fn evaluate_question(
        &self,
        question: &GoldQuestion,
        properties: &[Property],
    ) -> QueryEvaluation {
        let property_checks: Vec<PropertyCheck> = properties
            .iter()
            .map(|property| self.checker.check_property(property, question))
            .collect();

        QueryEvaluation {
            query_id: question.id,
            question: question.question.clone(),
            category: question.category.clone(),
            expected_result: question.expected_result,
            has_results: !properties.is_empty(),
            property_checks,
            is_manual: question.is_manual(),
            override_success: None,
        }
    }

    /// A question the run produced no result for at all: counts as
    /// `has_results = false` and lands in the FN column when data was
    /// expected.
    pub fn missing_result(&self, question: &GoldQuestion) -> QueryEvaluation {
        QueryEvaluation {
            query_id: question.id,
            question: question.question.clone(),
            category: question.category.clone(),
            expected_result: question.expected_result,
            has_results: false,
            property_checks: Vec::new(),
            is_manual: question.is_manual(),
            override_success: None,
        }
    }

    /// Per-constraint accuracy over every checked property.
    pub fn calculate_pca(&self, evaluations: &[QueryEvaluation]) -> PerConstraintAccuracy {
        let mut counts = [[0usize; 2]; 6];
        for evaluation in evaluations {
            for check in &evaluation.property_checks {
                for (slot, outcome) in check.all_results().into_iter().enumerate() {
                    if outcome == CheckOutcome::Na {
                        continue;
                    }
                    counts[slot][1] += 1;
                    if outcome == CheckOutcome::Pass {
                        counts[slot][0] += 1;
                    }
                }
            }
        }

        let ratio = |slot: usize| -> Option<f64> {
            let [pass, total] = counts[slot];
            if total == 0 {
                None
            } else {
                Some(pass as f64 / total as f64)
            }
        };
        PerConstraintAccuracy {
            property_type: ratio(0),
            listing_type: ratio(1),
            location: ratio(2),
            price: ratio(3),
            bedrooms: ratio(4),
            floors: ratio(5),
        }
    }

    pub fn calculate_confusion_matrix(&self, evaluations: &[QueryEvaluation]) -> ConfusionMatrix {
        let mut matrix = ConfusionMatrix::default();
        for evaluation in evaluations {
            matrix.record(evaluation.confusion_cell(self.threshold_t));
        }
        matrix
    }

    fn calculate_category_metrics(
        &self,
        evaluations: &[QueryEvaluation],
    ) -> BTreeMap<String, CategoryMetrics> {
        let mut grouped: BTreeMap<String, Vec<&QueryEvaluation>> = BTreeMap::new();
        for evaluation in evaluations {
            grouped
                .entry(evaluation.category.clone())
                .or_default()
                .push(evaluation);
        }

        grouped
            .into_iter()
            .map(|(category, group)| {
                let successful = group
                    .iter()
                    .filter(|e| e.is_success(self.threshold_t))
                    .count();
                let total_properties: usize = group.iter().map(|e| e.num_properties()).sum();
                let mean_cpr = if total_properties > 0 {
                    group
                        .iter()
                        .map(|e| e.mean_cpr() * e.num_properties() as f64)
                        .sum::<f64>()
                        / total_properties as f64
                } else {
                    0.0
                };
                let metrics = CategoryMetrics {
                    total_queries: group.len(),
                    successful_queries: successful,
                    success_rate: if group.is_empty() {
                        0.0
                    } else {
                        successful as f64 / group.len() as f64
                    },
                    total_properties,
                    mean_cpr,
                };
                (category, metrics)
            })
            .collect()
    }

    /// Aggregate everything.
    pub fn calculate_metrics(&self, evaluations: &[QueryEvaluation]) -> EvaluationMetrics {
        let total_queries = evaluations.len();
        let total_properties: usize = evaluations.iter().map(|e| e.num_properties()).sum();

        let mean_cpr = if total_properties > 0 {
            evaluations
                .iter()
                .map(|e| e.mean_cpr() * e.num_properties() as f64)
                .sum::<f64>()
                / total_properties as f64
        } else {
            0.0
        };

        let strict_total: usize = evaluations.iter().map(|e| e.strict_success_count()).sum();
        let strict_success_ratio = if total_properties > 0 {
            strict_total as f64 / total_properties as f64
        } else {
            0.0
        };

        let successful = evaluations
            .iter()
            .filter(|e| e.is_success(self.threshold_t))
            .count();
        let query_success_rate = if total_queries > 0 {
            successful as f64 / total_queries as f64
        } else {
            0.0
        };

        let confusion_matrix = self.calculate_confusion_matrix(evaluations);

        EvaluationMetrics {
            total_queries,
            total_properties,
            threshold_t: self.threshold_t,
            pca: self.calculate_pca(evaluations),
            mean_cpr,
            strict_success_ratio,
            query_success_rate,
            precision: confusion_matrix.precision(),
            recall: confusion_matrix.recall(),
            f1: confusion_matrix.f1(),
            accuracy: confusion_matrix.accuracy(),
            confusion_matrix,
            category_metrics: self.calculate_category_metrics(evaluations),
        }
    }

    /// Merge a new partial run into existing evaluations, replacing by
    /// question id. Supports incremental re-runs of a few questions.
    pub fn merge_evaluations(
        &self,
        existing: Vec<QueryEvaluation>,
        new: Vec<QueryEvaluation>,
    ) -> Vec<QueryEvaluation> {
        let mut merged: BTreeMap<i64, QueryEvaluation> = existing
            .into_iter()
            .map(|evaluation| (evaluation.query_id, evaluation))
            .collect();
        for evaluation in new {
            merged.insert(evaluation.query_id, evaluation);
        }
        merged.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Manual overrides
// ---------------------------------------------------------------------------

/// One human verdict for one property of one manual-mode question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualVerdict {
    pub question_id: i64,
    pub property_id: String,
    /// "pass" or "fail".
    pub result: String,
    #[serde(default)]
    pub comment: String,
}

/// Override file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualOverrides {
    pub verdicts: Vec<ManualVerdict>,
}

impl ManualOverrides {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Apply human verdicts to pending manual checks. Unknown ids are ignored.
pub fn apply_manual_overrides(
    evaluations: &mut [QueryEvaluation],
    overrides: &ManualOverrides,
) -> usize {
    let mut applied = 0;
    for verdict in &overrides.verdicts {
        let Some(evaluation) = evaluations
            .iter_mut()
            .find(|e| e.query_id == verdict.question_id)
        else {
            continue;
        };
        let Some(check) = evaluation
            .property_checks
            .iter_mut()
            .find(|c| c.is_manual && c.property_id == verdict.property_id)
        else {
            continue;
        };
        check.manual_result = match verdict.result.as_str() {
            "pass" => Some(CheckOutcome::Pass),
            _ => Some(CheckOutcome::Fail),
        };
        check.manual_comment = verdict.comment.clone();
        applied += 1;
    }
    applied
}
