//! Hybrid retrieval.
//!
//! Orchestrates the structured backend call, the vector search, score
//! blending and the geocoded proximity fallback. The two candidate legs of a
//! hybrid run execute concurrently under their own deadlines; one leg may
//! fail without failing the request.
//!
//! Score model: `combined = w * semantic + (1 - w) * api_position_score`,
//! where `api_position_score = 1 - rank / |backend_list|` for backend hits
//! and 0 for vector-only hits. Backend members without an observed semantic
//! score get the median of observed scores (0.5 when none). A slug present
//! in both lists keeps the higher combined score. Everything is clamped to
//! the unit interval before weighting and ties break on slug so ordering is
//! stable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use crate::abtest::{MethodRouter, SearchMethod};
use crate::backend::PropertyBackend;
use crate::config::RetrievalConfig;
use crate::embedding::CachedEmbedder;
use crate::error::{GriyaError, Result};
use crate::geocode::Geocoder;
use crate::metrics::{MetricsSink, SearchRecord};
use crate::property::{Property, SearchCriteria};
use crate::util::clamp_unit;
use crate::vector::{MetadataFilter, VectorStore};

/// Hybrid candidate pool size for the backend leg.
const HYBRID_BACKEND_POOL: usize = 25;
/// Vector candidates fetched per unit of requested limit.
const VECTOR_OVERFETCH: usize = 3;

/// Result of one retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub properties: Vec<Property>,
    pub total: u64,
    /// Requested method, decorated with `+geo` when the proximity fallback
    /// produced the result.
    pub method_used: String,
    /// True when semantic scoring influenced the final ordering.
    pub rerank_applied: bool,
    /// Observed semantic scores by slug (clamped to `[0, 1]`).
    pub semantic_scores: HashMap<String, f32>,
    pub took_ms: u64,
}

/// Internal outcome of one method execution, before fallback decoration.
struct MethodOutcome {
    properties: Vec<Property>,
    total: u64,
    rerank_applied: bool,
    semantic_scores: HashMap<String, f32>,
    api_results: usize,
    api_latency_ms: u64,
    vector_results: usize,
    vector_latency_ms: u64,
    embedding_cache_hit: bool,
    rerank_changes: usize,
}

impl MethodOutcome {
    fn empty() -> Self {
        Self {
            properties: Vec::new(),
            total: 0,
            rerank_applied: false,
            semantic_scores: HashMap::new(),
            api_results: 0,
            api_latency_ms: 0,
            vector_results: 0,
            vector_latency_ms: 0,
            embedding_cache_hit: false,
            rerank_changes: 0,
        }
    }
}

/// The hybrid property retriever.
pub struct HybridRetriever {
    backend: Arc<dyn PropertyBackend>,
    store: Arc<VectorStore>,
    embedder: Arc<CachedEmbedder>,
    geocoder: Arc<Geocoder>,
    router: Arc<MethodRouter>,
    metrics: Arc<MetricsSink>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        backend: Arc<dyn PropertyBackend>,
        store: Arc<VectorStore>,
        embedder: Arc<CachedEmbedder>,
        geocoder: Arc<Geocoder>,
        router: Arc<MethodRouter>,
        metrics: Arc<MetricsSink>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            store,
            embedder,
            geocoder,
            router,
            metrics,
            config,
        }
    }

    /// Retrieve with the method the A/B router picks for this user.
    pub async fn retrieve(
        &self,
        criteria: &SearchCriteria,
        user_id: Option<&str>,
    ) -> Result<RetrievalResult> {
        let method = self.router.method_for(user_id);
        self.retrieve_with_method(criteria, method, user_id).await
    }

    /// Retrieve with an explicit method; the per-request override always
    /// wins over routing.
    pub async fn retrieve_with_method(
        &self,
        criteria: &SearchCriteria,
        method: SearchMethod,
        user_id: Option<&str>,
    ) -> Result<RetrievalResult> {
        criteria.validate()?;
        let started = Instant::now();

        let mut outcome = self.run_method(criteria, method).await?;
        let mut geo_fallback = false;

        if self.needs_proximity_fallback(criteria, &outcome.properties) {
            if let Some(fallback) = self.proximity_fallback(criteria, method).await? {
                outcome = fallback;
                geo_fallback = true;
            }
        }

        let took_ms = started.elapsed().as_millis() as u64;
        let method_used = if geo_fallback {
            format!("{}+geo", method.as_str())
        } else {
            method.as_str().to_string()
        };

        self.metrics.log_search(&SearchRecord {
            timestamp: MetricsSink::now_iso(),
            user_id: user_id.unwrap_or("anonymous").to_string(),
            thread_id: String::new(),
            query: criteria.semantic_query().unwrap_or_default().to_string(),
            method: method_used.clone(),
            api_results: outcome.api_results,
            api_latency_ms: outcome.api_latency_ms,
            vector_results: outcome.vector_results,
            vector_latency_ms: outcome.vector_latency_ms,
            final_results: outcome.properties.len(),
            total_latency_ms: took_ms,
            rerank_applied: outcome.rerank_applied,
            rerank_changes: outcome.rerank_changes,
            embedding_cache_hit: outcome.embedding_cache_hit,
            geo_fallback,
        });

        Ok(RetrievalResult {
            properties: outcome.properties,
            total: outcome.total,
            method_used,
            rerank_applied: outcome.rerank_applied,
            semantic_scores: outcome.semantic_scores,
            took_ms,
        })
    }

    async fn run_method(
        &self,
        criteria: &SearchCriteria,
        method: SearchMethod,
    ) -> Result<MethodOutcome> {
        match method {
            SearchMethod::ApiOnly => self.run_structured(criteria).await,
            SearchMethod::VectorOnly => self.run_vector_only(criteria).await,
            _ => self.run_hybrid(criteria, method.semantic_weight()).await,
        }
    }

    // -- STRUCTURED_ONLY ----------------------------------------------------

    async fn run_structured(&self, criteria: &SearchCriteria) -> Result<MethodOutcome> {
        let started = Instant::now();
        let page = self.backend.search(criteria).await?;
        let api_latency_ms = started.elapsed().as_millis() as u64;

        let mut properties = page.properties;
        properties.truncate(criteria.limit);
        Ok(MethodOutcome {
            api_results: properties.len(),
            api_latency_ms,
            total: page.total,
            properties,
            ..MethodOutcome::empty()
        })
    }

    // -- VECTOR_ONLY --------------------------------------------------------

    async fn run_vector_only(&self, criteria: &SearchCriteria) -> Result<MethodOutcome> {
        let query = criteria
            .semantic_query()
            .ok_or_else(|| GriyaError::bad_request("vector_only requires a non-empty query"))?;

        let started = Instant::now();
        let (embedding, cache_hit) = self.embedder.embed(query).await?;
        let filter = MetadataFilter::from_criteria(criteria);
        let hits = self.store.search(
            &embedding,
            criteria.limit * VECTOR_OVERFETCH,
            Some(&filter),
        )?;
        let vector_latency_ms = started.elapsed().as_millis() as u64;

        let semantic_scores: HashMap<String, f32> = hits
            .iter()
            .map(|(slug, score)| (slug.clone(), clamp_unit(*score)))
            .collect();

        let details = self
            .fetch_details(hits.iter().map(|(slug, _)| slug.clone()).collect())
            .await;

        let mut properties = Vec::new();
        for (slug, score) in &hits {
            if let Some(mut property) = details.get(slug).cloned() {
                property.relevance_score = Some(clamp_unit(*score));
                properties.push(property);
            }
            if properties.len() >= criteria.limit {
                break;
            }
        }

        Ok(MethodOutcome {
            total: properties.len() as u64,
            rerank_applied: !properties.is_empty(),
            vector_results: hits.len(),
            vector_latency_ms,
            embedding_cache_hit: cache_hit,
            semantic_scores,
            properties,
            ..MethodOutcome::empty()
        })
    }

    // -- HYBRID -------------------------------------------------------------

    async fn run_hybrid(&self, criteria: &SearchCriteria, weight: f32) -> Result<MethodOutcome> {
        let leg_deadline = Duration::from_millis(self.config.leg_deadline_ms);

        // Candidate generation: both legs run concurrently, each under its
        // own deadline. A late leg is cancelled and treated as a failure of
        // that leg only.
        let backend_criteria = SearchCriteria {
            page: 1,
            limit: criteria.limit.max(HYBRID_BACKEND_POOL).min(crate::property::criteria::MAX_LIMIT),
            ..criteria.clone()
        };
        let backend_leg = async {
            let started = Instant::now();
            let result = tokio::time::timeout(leg_deadline, self.backend.search(&backend_criteria))
                .await
                .map_err(|_| GriyaError::timeout("backend candidate leg"))
                .and_then(|inner| inner);
            (result, started.elapsed().as_millis() as u64)
        };

        let query = criteria.semantic_query();
        let vector_leg = async {
            let Some(query) = query else {
                return (Ok(None), 0u64, false);
            };
            let started = Instant::now();
            let result = tokio::time::timeout(leg_deadline, async {
                let (embedding, cache_hit) = self.embedder.embed(query).await?;
                let filter = MetadataFilter::from_criteria(criteria);
                let hits = self.store.search(
                    &embedding,
                    criteria.limit * VECTOR_OVERFETCH,
                    Some(&filter),
                )?;
                Ok::<_, GriyaError>((hits, cache_hit))
            })
            .await
            .map_err(|_| GriyaError::timeout("vector candidate leg"))
            .and_then(|inner| inner);
            let latency = started.elapsed().as_millis() as u64;
            match result {
                Ok((hits, cache_hit)) => (Ok(Some(hits)), latency, cache_hit),
                Err(err) => (Err(err), latency, false),
            }
        };

        let ((backend_result, api_latency_ms), (vector_result, vector_latency_ms, cache_hit)) =
            tokio::join!(backend_leg, vector_leg);

        // Per-leg failure capture: continue with whichever leg succeeded.
        let (backend_page, backend_err) = match backend_result {
            Ok(page) => (Some(page), None),
            Err(err) => {
                log::warn!("hybrid backend leg failed: {err}");
                (None, Some(err))
            }
        };
        let (vector_hits, vector_ok) = match vector_result {
            Ok(Some(hits)) => (hits, true),
            Ok(None) => (Vec::new(), false),
            Err(err) => {
                // Degrade to the structured result; never fail the request
                // for a vector store or embedding error alone.
                log::warn!("hybrid vector leg failed: {err}");
                (Vec::new(), false)
            }
        };

        if backend_page.is_none() && !vector_ok {
            // Both legs dead: surface the backend error.
            return Err(backend_err
                .unwrap_or_else(|| GriyaError::upstream("hybrid candidate generation failed")));
        }

        let backend_props = backend_page
            .as_ref()
            .map(|page| page.properties.clone())
            .unwrap_or_default();
        let api_results = backend_props.len();
        let vector_results = vector_hits.len();

        // Authoritative detail for vector-only candidates.
        let known: std::collections::HashSet<&str> =
            backend_props.iter().map(|p| p.slug.as_str()).collect();
        let missing: Vec<String> = vector_hits
            .iter()
            .filter(|(slug, _)| !known.contains(slug.as_str()))
            .map(|(slug, _)| slug.clone())
            .collect();
        let fetched = self.fetch_details(missing).await;

        let merged = merge_candidates(
            backend_props,
            &vector_hits,
            &fetched,
            weight,
            criteria.limit,
        );

        let rerank_applied = vector_ok && !merged.semantic_scores.is_empty();
        let total = backend_page
            .as_ref()
            .map(|page| page.total)
            .unwrap_or(merged.properties.len() as u64);

        Ok(MethodOutcome {
            properties: merged.properties,
            total,
            rerank_applied,
            semantic_scores: merged.semantic_scores,
            api_results,
            api_latency_ms,
            vector_results,
            vector_latency_ms,
            embedding_cache_hit: cache_hit,
            rerank_changes: merged.rerank_changes,
        })
    }

    /// Fetch authoritative details with bounded concurrency, dropping slugs
    /// whose fetch fails.
    async fn fetch_details(&self, slugs: Vec<String>) -> HashMap<String, Property> {
        let entries: Vec<(String, crate::property::SourceKind)> = slugs
            .into_iter()
            .filter_map(|slug| {
                self.store
                    .get(&slug)
                    .map(|entry| (slug, entry.source_kind))
            })
            .collect();

        let backend = &self.backend;
        stream::iter(entries)
            .map(|(slug, source_kind)| async move {
                match backend.detail(source_kind, &slug).await {
                    Ok(Some(property)) => Some((slug, property)),
                    Ok(None) => {
                        log::debug!("detail fetch: {slug} no longer exists");
                        None
                    }
                    Err(err) => {
                        log::warn!("detail fetch failed for {slug}: {err}");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.detail_concurrency.max(1))
            .filter_map(|item| async move { item })
            .collect::<HashMap<_, _>>()
            .await
    }

    // -- Proximity fallback -------------------------------------------------

    fn needs_proximity_fallback(&self, criteria: &SearchCriteria, results: &[Property]) -> bool {
        let Some(keyword) = &criteria.location_keyword else {
            return false;
        };
        results.is_empty()
            || results
                .iter()
                .all(|property| !property.matches_location_keyword(keyword))
    }

    async fn proximity_fallback(
        &self,
        criteria: &SearchCriteria,
        method: SearchMethod,
    ) -> Result<Option<MethodOutcome>> {
        let keyword = criteria
            .location_keyword
            .clone()
            .unwrap_or_default();

        let coords = match self.geocoder.geocode(&keyword).await {
            Ok(Some(coords)) => coords,
            Ok(None) => return Ok(None),
            Err(err) => {
                // Geocoding failure skips the fallback; it never fails the
                // retrieval itself.
                log::warn!("proximity fallback geocode failed for '{keyword}': {err}");
                return Ok(None);
            }
        };

        let radii = [self.config.default_radius_km, self.config.max_radius_km];
        for radius in radii {
            let geo_criteria = criteria.with_geo_fallback(coords.0, coords.1, radius);
            let outcome = self.run_method(&geo_criteria, method).await?;
            if !outcome.properties.is_empty() {
                log::info!(
                    "proximity fallback hit for '{keyword}' at radius {radius}km ({} results)",
                    outcome.properties.len()
                );
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Merge + re-rank
// ---------------------------------------------------------------------------

struct MergeOutput {
    properties: Vec<Property>,
    semantic_scores: HashMap<String, f32>,
    rerank_changes: usize,
}

/// Blend the two candidate lists per the hybrid score model.
///
/// Pure over its inputs so the ordering rules are unit-testable without any
/// I/O. `fetched` supplies authoritative snapshots for vector-only slugs;
/// vector hits without a snapshot are dropped.
fn merge_candidates(
    backend_props: Vec<Property>,
    vector_hits: &[(String, f32)],
    fetched: &HashMap<String, Property>,
    weight: f32,
    limit: usize,
) -> MergeOutput {
    let weight = weight.clamp(0.0, 1.0);
    let backend_len = backend_props.len();

    let semantic_scores: HashMap<String, f32> = vector_hits
        .iter()
        .map(|(slug, score)| (slug.clone(), clamp_unit(*score)))
        .collect();

    // Neutral semantic score for backend-only members: the median of
    // observed scores, 0.5 when the vector leg saw nothing.
    let neutral = median(semantic_scores.values().copied()).unwrap_or(0.5);

    struct Candidate {
        property: Property,
        combined: f32,
        backend_rank: Option<usize>,
    }

    let mut candidates: HashMap<String, Candidate> = HashMap::new();

    for (rank, property) in backend_props.into_iter().enumerate() {
        let api_position = 1.0 - rank as f32 / backend_len as f32;
        let semantic = semantic_scores.get(&property.slug).copied();
        // A slug in both lists keeps the higher combined score, which for
        // this formula is the max of its observed and neutral semantic
        // scores.
        let effective = match semantic {
            Some(observed) => observed.max(neutral),
            None => neutral,
        };
        let combined = weight * effective + (1.0 - weight) * clamp_unit(api_position);
        candidates.insert(
            property.slug.clone(),
            Candidate {
                property,
                combined,
                backend_rank: Some(rank),
            },
        );
    }

    for (slug, score) in vector_hits {
        if candidates.contains_key(slug) {
            continue;
        }
        let Some(property) = fetched.get(slug) else {
            continue;
        };
        let combined = weight * clamp_unit(*score);
        candidates.insert(
            slug.clone(),
            Candidate {
                property: property.clone(),
                combined,
                backend_rank: None,
            },
        );
    }

    let mut ordered: Vec<Candidate> = candidates.into_values().collect();
    ordered.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.property.slug.cmp(&b.property.slug))
    });
    ordered.truncate(limit);

    let rerank_changes = ordered
        .iter()
        .enumerate()
        .filter(|(position, candidate)| {
            candidate
                .backend_rank
                .is_some_and(|rank| rank != *position)
        })
        .count();

    let properties = ordered
        .into_iter()
        .map(|candidate| {
            let mut property = candidate.property;
            property.relevance_score = Some(clamp_unit(candidate.combined));
            property
        })
        .collect();

    MergeOutput {
        properties,
        semantic_scores,
        rerank_changes,
    }
}

fn median(values: impl Iterator<Item = f32>) -> Option<f32> {
    let mut values: Vec<f32> = values.collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(slug: &str) -> Property {
        let mut property = crate::property::tests::sample_property();
        property.slug = slug.to_string();
        property
    }

    #[test]
    fn median_of_observed_scores() {
        assert_eq!(median([0.2, 0.8, 0.5].into_iter()), Some(0.5));
        assert_eq!(median([0.2, 0.8].into_iter()), Some(0.5));
        assert_eq!(median(std::iter::empty()), None);
    }

    #[test]
    fn backend_only_members_get_the_neutral_score() {
        let backend = vec![prop("a"), prop("b")];
        let vector = vec![("a".to_string(), 0.9f32)];
        let merged = merge_candidates(backend, &vector, &HashMap::new(), 0.6, 10);

        // "a" has an observed 0.9; "b" gets the neutral (median = 0.9 here).
        assert_eq!(merged.properties.len(), 2);
        assert_eq!(merged.semantic_scores.len(), 1);
        // "a" outranks "b": same semantic, better api position.
        assert_eq!(merged.properties[0].slug, "a");
    }

    #[test]
    fn duplicate_keeps_at_least_either_lists_score() {
        // Observed semantic well below the median must not drag a backend
        // hit below what the backend list alone would have given it.
        let backend = vec![prop("low"), prop("x"), prop("y")];
        let vector = vec![
            ("low".to_string(), 0.1f32),
            ("x".to_string(), 0.9f32),
            ("y".to_string(), 0.8f32),
        ];
        let merged = merge_candidates(backend, &vector, &HashMap::new(), 0.6, 10);

        let low = merged
            .properties
            .iter()
            .find(|p| p.slug == "low")
            .unwrap();
        let combined = low.relevance_score.unwrap();
        // Vector-alone would give 0.6 * 0.1 = 0.06; backend-alone gives
        // 0.6 * median(0.8) + 0.4 * 1.0. The kept score covers both.
        assert!(combined >= 0.06);
        assert!(combined >= 0.6 * 0.8 + 0.4 * 1.0 - 1e-6);
    }

    #[test]
    fn vector_only_hits_need_a_fetched_snapshot() {
        let vector = vec![
            ("fetched".to_string(), 0.9f32),
            ("ghost".to_string(), 0.95f32),
        ];
        let mut fetched = HashMap::new();
        fetched.insert("fetched".to_string(), prop("fetched"));

        let merged = merge_candidates(Vec::new(), &vector, &fetched, 0.6, 10);
        assert_eq!(merged.properties.len(), 1);
        assert_eq!(merged.properties[0].slug, "fetched");
    }

    #[test]
    fn truncates_to_limit_with_stable_slug_ties() {
        let backend = vec![prop("b"), prop("a"), prop("c")];
        // No vector leg: every candidate has the same neutral semantic
        // score, so ordering falls back to api position then slug.
        let merged = merge_candidates(backend, &[], &HashMap::new(), 0.0, 2);
        assert_eq!(merged.properties.len(), 2);
        assert_eq!(merged.properties[0].slug, "b");
        assert_eq!(merged.properties[1].slug, "a");
    }

    #[test]
    fn pure_weight_one_ranks_by_semantics() {
        let backend = vec![prop("first"), prop("second")];
        let vector = vec![
            ("first".to_string(), 0.2f32),
            ("second".to_string(), 0.9f32),
        ];
        let merged = merge_candidates(backend, &vector, &HashMap::new(), 1.0, 10);
        assert_eq!(merged.properties[0].slug, "second");
        assert!(merged.rerank_changes > 0);
    }

    #[test]
    fn scores_are_clamped_before_weighting() {
        let backend = vec![prop("a")];
        let vector = vec![("a".to_string(), 1.7f32)];
        let merged = merge_candidates(backend, &vector, &HashMap::new(), 0.6, 10);
        assert!(merged.properties[0].relevance_score.unwrap() <= 1.0);
        assert_eq!(merged.semantic_scores["a"], 1.0);
    }
}
