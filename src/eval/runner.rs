//! Strategy execution over a gold set.
//!
//! A [`SearchRunner`] turns one gold question into returned properties;
//! [`run_gold_set`] drives a runner across every question and evaluates the
//! results. The stock runner forces one retrieval method on the hybrid
//! retriever so strategies can be compared side by side.

use std::sync::Arc;

use async_trait::async_trait;

use crate::abtest::SearchMethod;
use crate::error::Result;
use crate::eval::evaluator::Evaluator;
use crate::eval::models::{GoldFile, GoldQuestion, QueryEvaluation};
use crate::property::{ListingType, Property, PropertyType, SearchCriteria};
use crate::retrieve::HybridRetriever;

/// Executes one gold question and returns the candidate properties.
#[async_trait]
pub trait SearchRunner: Send + Sync {
    async fn run(&self, question: &GoldQuestion) -> Result<Vec<Property>>;
}

/// Runner that forces a single retrieval method.
pub struct MethodRunner {
    retriever: Arc<HybridRetriever>,
    method: SearchMethod,
    limit: usize,
}

impl MethodRunner {
    pub fn new(retriever: Arc<HybridRetriever>, method: SearchMethod, limit: usize) -> Self {
        Self {
            retriever,
            method,
            limit,
        }
    }
}

#[async_trait]
impl SearchRunner for MethodRunner {
    async fn run(&self, question: &GoldQuestion) -> Result<Vec<Property>> {
        let mut criteria = criteria_from_constraints(question);
        criteria.limit = self.limit;
        let result = self
            .retriever
            .retrieve_with_method(&criteria, self.method, None)
            .await?;
        Ok(result.properties)
    }
}

/// Map a gold question's constraint blocks onto search criteria.
///
/// The question text seeds semantic re-ranking; constraint blocks become the
/// structured filters the strategies under test would have received from the
/// criteria parser.
pub fn criteria_from_constraints(question: &GoldQuestion) -> SearchCriteria {
    let constraints = &question.constraints;
    let mut criteria = SearchCriteria {
        query: Some(question.question.clone()),
        ..Default::default()
    };

    if let Some(raw) = &constraints.property_type {
        criteria.property_type = PropertyType::from_loose(raw);
    }
    if let Some(raw) = &constraints.listing_type {
        criteria.listing_type = ListingType::from_loose(raw);
    }

    if let Some(price) = &constraints.price {
        match price.target {
            Some(target) => {
                let tolerance = price.tolerance.unwrap_or(0.0);
                criteria.price_min = Some((target as f64 * (1.0 - tolerance)) as i64);
                criteria.price_max = Some((target as f64 * (1.0 + tolerance)) as i64);
            }
            None => {
                criteria.price_min = price.min;
                criteria.price_max = price.max;
            }
        }
    }

    if let Some(bedrooms) = &constraints.bedrooms {
        match bedrooms.exact {
            Some(exact) => {
                criteria.bedrooms_min = Some(exact as u32);
                criteria.bedrooms_max = Some(exact as u32);
            }
            None => {
                criteria.bedrooms_min = bedrooms.min.map(|v| v as u32);
                criteria.bedrooms_max = bedrooms.max.map(|v| v as u32);
            }
        }
    }
    if let Some(floors) = &constraints.floors {
        match floors.exact {
            Some(exact) => {
                criteria.floors_min = Some(exact as u32);
                criteria.floors_max = Some(exact as u32);
            }
            None => {
                criteria.floors_min = floors.min.map(|v| v as u32);
                criteria.floors_max = floors.max.map(|v| v as u32);
            }
        }
    }

    if let Some(location) = &constraints.location {
        if let Some(keyword) = location.keywords.first() {
            criteria.location_keyword = Some(keyword.clone());
        } else if let (Some(lat), Some(lng)) = (location.lat, location.lng) {
            criteria.latitude = Some(lat);
            criteria.longitude = Some(lng);
            criteria.radius_km = Some(location.radius_km);
        }
    }

    criteria
}

/// Run a strategy over the whole gold set.
///
/// A runner failure on one question is recorded as a missing result
/// (`has_results = false`) rather than aborting the run.
pub async fn run_gold_set(
    gold: &GoldFile,
    runner: &dyn SearchRunner,
    evaluator: &Evaluator,
) -> Vec<QueryEvaluation> {
    let mut evaluations = Vec::with_capacity(gold.questions.len());
    for question in &gold.questions {
        let evaluation = match runner.run(question).await {
            Ok(properties) => evaluator.evaluate_question(question, &properties),
            Err(err) => {
                log::warn!("gold question {} failed: {err}", question.id);
                evaluator.missing_result(question)
            }
        };
        evaluations.push(evaluation);
    }
    evaluations
}
