//! Constraint-based offline evaluation.
//!
//! Loads a gold question set, runs a retrieval strategy over every question
//! and scores the returned properties against per-question constraints:
//! per-constraint accuracy (PCA), constraint pass ratio (CPR), strict
//! success, query success at threshold T and a query-level confusion matrix.
//!
//! - [`models`] - gold file schema and result types
//! - [`checker`] - per-constraint pass rules
//! - [`evaluator`] - metric computation and manual-mode overrides
//! - [`runner`] - strategy execution over a gold set

pub mod checker;
pub mod evaluator;
pub mod models;
pub mod runner;

pub use self::checker::ConstraintChecker;
pub use self::evaluator::Evaluator;
pub use self::models::{
    CheckOutcome, ConfusionMatrix, Constraints, EvaluationMetrics, EvaluationMode, ExpectedResult,
    GoldFile, GoldQuestion, PerConstraintAccuracy, PropertyCheck, QueryEvaluation,
};
pub use self::runner::{SearchRunner, criteria_from_constraints, run_gold_set};
