//! The bounded tool registry.
//!
//! Four tools, no more: property search, authoritative detail fetch,
//! knowledge lookup, and geocoding. Tools are pure with respect to their
//! arguments plus the process-local caches; they never touch conversation
//! memory - only the agent loop writes there.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::abtest::SearchMethod;
use crate::api::PropertySummary;
use crate::backend::PropertyBackend;
use crate::error::{GriyaError, Result};
use crate::geocode::Geocoder;
use crate::llm::{ToolCall, ToolSpec};
use crate::metrics::{MetricsSink, ToolRecord};
use crate::property::{ParsedCriteria, SourceKind};
use crate::retrieve::HybridRetriever;

/// One hit from the sales-knowledge index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    pub title: String,
    pub content: String,
    pub category: String,
    pub score: f32,
}

/// External knowledge index (sales tips, certificates, processes). Ingestion
/// and storage live outside this crate.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        k: usize,
    ) -> Result<Vec<KnowledgeHit>>;
}

/// A knowledge index that knows nothing; for deployments without one.
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeIndex for NoKnowledge {
    async fn search(
        &self,
        _query: &str,
        _category: Option<&str>,
        _k: usize,
    ) -> Result<Vec<KnowledgeHit>> {
        Ok(Vec::new())
    }
}

/// The agent's tool surface.
pub struct ToolRegistry {
    retriever: Arc<HybridRetriever>,
    backend: Arc<dyn PropertyBackend>,
    knowledge: Arc<dyn KnowledgeIndex>,
    geocoder: Arc<Geocoder>,
    metrics: Arc<MetricsSink>,
}

impl ToolRegistry {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        backend: Arc<dyn PropertyBackend>,
        knowledge: Arc<dyn KnowledgeIndex>,
        geocoder: Arc<Geocoder>,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            retriever,
            backend,
            knowledge,
            geocoder,
            metrics,
        }
    }

    /// Tool declarations handed to the model on every completion.
    pub fn specs(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "search_properties".to_string(),
                description: "Cari properti berdasarkan kriteria terstruktur dan/atau teks bebas. \
                              Gunakan location_keyword untuk nama daerah atau landmark."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Kata kunci semantik, mis. 'rumah taman luas'"},
                        "property_type": {"type": "string", "enum": ["house", "shophouse", "land", "apartment", "warehouse", "office", "villa"]},
                        "listing_type": {"type": "string", "enum": ["sale", "rent"]},
                        "source_kind": {"type": "string", "enum": ["listing", "project"]},
                        "price_min": {"type": "integer"},
                        "price_max": {"type": "integer"},
                        "bedrooms_min": {"type": "integer"},
                        "bedrooms_max": {"type": "integer"},
                        "bathrooms_min": {"type": "integer"},
                        "floors_min": {"type": "integer"},
                        "floors_max": {"type": "integer"},
                        "min_land_area": {"type": "number"},
                        "min_building_area": {"type": "number"},
                        "location_keyword": {"type": "string"},
                        "in_complex": {"type": "boolean"},
                        "facing": {"type": "string"},
                        "limit": {"type": "integer", "maximum": 50}
                    }
                }),
            },
            ToolSpec {
                name: "get_property".to_string(),
                description: "Ambil detail lengkap satu properti berdasarkan slug.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "slug": {"type": "string"},
                        "source_kind": {"type": "string", "enum": ["listing", "project"]}
                    },
                    "required": ["slug"]
                }),
            },
            ToolSpec {
                name: "get_knowledge".to_string(),
                description: "Cari pengetahuan penjualan dan properti (sertifikat, pajak, teknik closing)."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "category": {"type": "string"}
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: "geocode".to_string(),
                description: "Ubah nama tempat atau landmark menjadi koordinat.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "place": {"type": "string"}
                    },
                    "required": ["place"]
                }),
            },
        ]
    }

    /// Execute one tool call and return its JSON result for the model.
    pub async fn execute(
        &self,
        call: &ToolCall,
        user_id: Option<&str>,
        method: Option<SearchMethod>,
    ) -> Result<String> {
        let started = Instant::now();
        let outcome = self.dispatch(call, user_id, method).await;

        self.metrics.log_tool(&ToolRecord {
            timestamp: MetricsSink::now_iso(),
            user_id: user_id.unwrap_or("anonymous").to_string(),
            thread_id: String::new(),
            tool_name: call.name.clone(),
            success: outcome.is_ok(),
            error_kind: outcome
                .as_ref()
                .err()
                .map(|err| err.kind().to_string())
                .unwrap_or_default(),
            latency_ms: started.elapsed().as_millis() as u64,
            result_count: 0,
        });

        outcome
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        user_id: Option<&str>,
        method: Option<SearchMethod>,
    ) -> Result<String> {
        match call.name.as_str() {
            "search_properties" => self.run_search(&call.arguments, user_id, method).await,
            "get_property" => self.run_get_property(&call.arguments).await,
            "get_knowledge" => self.run_get_knowledge(&call.arguments).await,
            "geocode" => self.run_geocode(&call.arguments).await,
            other => Err(GriyaError::bad_request(format!("unknown tool '{other}'"))),
        }
    }

    async fn run_search(
        &self,
        arguments: &Value,
        user_id: Option<&str>,
        method: Option<SearchMethod>,
    ) -> Result<String> {
        // The model's JSON is untrusted input; parse it with the same strict
        // schema as any external caller.
        let parsed = ParsedCriteria::from_llm_json(&arguments.to_string())?;
        let criteria = match parsed {
            ParsedCriteria::Ok(criteria) => criteria,
            ParsedCriteria::Clarify(reason) => {
                return Ok(json!({ "clarify": reason }).to_string());
            }
        };

        let result = match method {
            Some(method) => {
                self.retriever
                    .retrieve_with_method(&criteria, method, user_id)
                    .await?
            }
            None => self.retriever.retrieve(&criteria, user_id).await?,
        };

        let summaries: Vec<PropertySummary> = result
            .properties
            .iter()
            .map(PropertySummary::from_property)
            .collect();
        Ok(json!({
            "total_found": result.total,
            "returned": summaries.len(),
            "method_used": result.method_used,
            "rerank_applied": result.rerank_applied,
            "properties": summaries,
        })
        .to_string())
    }

    async fn run_get_property(&self, arguments: &Value) -> Result<String> {
        let slug = arguments
            .get("slug")
            .and_then(Value::as_str)
            .ok_or_else(|| GriyaError::bad_request("get_property requires 'slug'"))?;
        let kind = arguments
            .get("source_kind")
            .and_then(Value::as_str)
            .and_then(SourceKind::from_loose);

        let property = match kind {
            Some(kind) => self.backend.detail(kind, slug).await?,
            None => {
                // Kind unknown: listings first, then projects.
                match self.backend.detail(SourceKind::Listing, slug).await? {
                    Some(property) => Some(property),
                    None => self.backend.detail(SourceKind::Project, slug).await?,
                }
            }
        };

        match property {
            Some(property) => Ok(serde_json::to_string(&property)?),
            None => Ok(json!({ "found": false, "slug": slug }).to_string()),
        }
    }

    async fn run_get_knowledge(&self, arguments: &Value) -> Result<String> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| GriyaError::bad_request("get_knowledge requires 'query'"))?;
        let category = arguments.get("category").and_then(Value::as_str);

        let hits = self.knowledge.search(query, category, 5).await?;
        Ok(serde_json::to_string(&hits)?)
    }

    async fn run_geocode(&self, arguments: &Value) -> Result<String> {
        let place = arguments
            .get("place")
            .and_then(Value::as_str)
            .ok_or_else(|| GriyaError::bad_request("geocode requires 'place'"))?;

        match self.geocoder.geocode(place).await? {
            Some((lat, lng)) => Ok(json!({ "lat": lat, "lng": lng }).to_string()),
            None => Ok(json!({ "found": false, "place": place }).to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::abtest::MethodRouter;
    use crate::backend::{IngestKey, SearchPage};
    use crate::config::{EmbeddingConfig, GeocodingConfig, RetrievalConfig};
    use crate::embedding::{CachedEmbedder, Embedder};
    use crate::property::{Property, SearchCriteria};
    use crate::vector::VectorStore;

    pub(crate) struct EmptyBackend;

    #[async_trait]
    impl PropertyBackend for EmptyBackend {
        async fn search(&self, _criteria: &SearchCriteria) -> Result<SearchPage> {
            Ok(SearchPage::default())
        }

        async fn detail(&self, _kind: SourceKind, _slug: &str) -> Result<Option<Property>> {
            Ok(None)
        }

        async fn pending_ingest(&self, _limit: usize) -> Result<Vec<Property>> {
            Ok(Vec::new())
        }

        async fn mark_ingested(&self, _keys: &[IngestKey]) -> Result<()> {
            Ok(())
        }

        async fn reset_ingest(&self) -> Result<()> {
            Ok(())
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model_id(&self) -> &str {
            "fake-model"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// Registry over empty fakes; enough for loop-level tests.
    pub(crate) fn registry() -> ToolRegistry {
        let backend: Arc<dyn PropertyBackend> = Arc::new(EmptyBackend);
        let store = Arc::new(
            VectorStore::open(tempfile::tempdir().unwrap().keep(), "properties", "fake-model")
                .unwrap(),
        );
        let embedder = Arc::new(CachedEmbedder::new(
            Arc::new(UnitEmbedder),
            &EmbeddingConfig::default(),
        ));
        let geocoder = Arc::new(Geocoder::new(&GeocodingConfig::default(), Vec::new()));
        let metrics = Arc::new(MetricsSink::disabled());
        let retriever = Arc::new(HybridRetriever::new(
            backend.clone(),
            store,
            embedder,
            geocoder.clone(),
            Arc::new(MethodRouter::fixed(SearchMethod::Hybrid)),
            metrics.clone(),
            RetrievalConfig::default(),
        ));
        ToolRegistry::new(retriever, backend, Arc::new(NoKnowledge), geocoder, metrics)
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_test".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn geocode_tool_uses_the_landmark_dictionary() {
        let registry = registry();
        let result = registry
            .execute(&call("geocode", json!({"place": "USU"})), None, None)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["lat"], 3.5656);
        assert_eq!(parsed["lng"], 98.6565);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_bad_request() {
        let registry = registry();
        let err = registry
            .execute(&call("drop_database", json!({})), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[tokio::test]
    async fn search_with_unknown_keys_fails_closed() {
        let registry = registry();
        let err = registry
            .execute(
                &call("search_properties", json!({"bedrooms_min": 3, "pool": true})),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[tokio::test]
    async fn clarify_passes_through_to_the_model() {
        let registry = registry();
        let result = registry
            .execute(
                &call("search_properties", json!({"clarify": "budget belum jelas"})),
                None,
                None,
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["clarify"], "budget belum jelas");
    }

    #[tokio::test]
    async fn missing_property_reports_found_false() {
        let registry = registry();
        let result = registry
            .execute(&call("get_property", json!({"slug": "tidak-ada"})), None, None)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["found"], false);
    }

    #[test]
    fn registry_exposes_exactly_four_tools() {
        let registry = registry();
        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["search_properties", "get_property", "get_knowledge", "geocode"]
        );
    }
}
