//! Shared test doubles: an in-memory Property Backend that honors the
//! filter semantics of the real one, and a deterministic keyword embedder.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use griya::abtest::{MethodRouter, SearchMethod};
use griya::backend::{IngestKey, PropertyBackend, SearchPage};
use griya::config::{EmbeddingConfig, GeocodingConfig, RetrievalConfig};
use griya::embedding::{CachedEmbedder, Embedder};
use griya::geocode::Geocoder;
use griya::metrics::MetricsSink;
use griya::property::{
    ListingType, NumRange, Property, PropertyStatus, PropertyType, SearchCriteria, SourceKind,
};
use griya::retrieve::HybridRetriever;
use griya::sync::build_embedding_document;
use griya::vector::VectorStore;
use griya::vector::store::{EntryMetadata, IndexEntry};
use griya::{GriyaError, Result};

fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();
    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    6371.0 * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Backend double with real filter semantics over an in-memory corpus.
pub struct InMemoryBackend {
    pub properties: Vec<Property>,
    pub fail_search: bool,
}

impl InMemoryBackend {
    pub fn new(properties: Vec<Property>) -> Self {
        Self {
            properties,
            fail_search: false,
        }
    }

    fn matches(criteria: &SearchCriteria, property: &Property) -> bool {
        if let Some(expected) = criteria.property_type
            && property.property_type != expected
        {
            return false;
        }
        if let Some(expected) = criteria.listing_type
            && property.listing_type != expected
        {
            return false;
        }
        if let Some(expected) = criteria.source_kind
            && property.source_kind != expected
        {
            return false;
        }
        if !property.price.intersects(
            criteria.price_min.map(|v| v as f64),
            criteria.price_max.map(|v| v as f64),
        ) {
            return false;
        }
        let count_ok = |value: Option<NumRange>, lo: Option<u32>, hi: Option<u32>| {
            if lo.is_none() && hi.is_none() {
                return true;
            }
            match value {
                Some(range) => range.intersects(lo.map(f64::from), hi.map(f64::from)),
                None => false,
            }
        };
        if !count_ok(property.bedrooms, criteria.bedrooms_min, criteria.bedrooms_max) {
            return false;
        }
        if !count_ok(
            property.bathrooms,
            criteria.bathrooms_min,
            criteria.bathrooms_max,
        ) {
            return false;
        }
        if !count_ok(property.floors, criteria.floors_min, criteria.floors_max) {
            return false;
        }
        if let Some(min) = criteria.min_land_area {
            match property.land_area {
                Some(range) if range.max >= min => {}
                _ => return false,
            }
        }
        if let Some(min) = criteria.min_building_area {
            match property.building_area {
                Some(range) if range.max >= min => {}
                _ => return false,
            }
        }
        if let Some(keyword) = &criteria.location_keyword
            && !property.matches_location_keyword(keyword)
        {
            return false;
        }
        if criteria.has_geo() {
            let (Some(lat), Some(lng)) = (property.latitude, property.longitude) else {
                return false;
            };
            let distance = haversine_km(
                lat,
                lng,
                criteria.latitude.unwrap(),
                criteria.longitude.unwrap(),
            );
            if distance > criteria.radius_km.unwrap() {
                return false;
            }
        }
        if let Some(in_complex) = criteria.in_complex
            && property.in_complex() != in_complex
        {
            return false;
        }
        true
    }
}

#[async_trait]
impl PropertyBackend for InMemoryBackend {
    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchPage> {
        if self.fail_search {
            return Err(GriyaError::upstream("backend down"));
        }
        let mut matched: Vec<Property> = self
            .properties
            .iter()
            .filter(|property| Self::matches(criteria, property))
            .cloned()
            .collect();

        if criteria.has_geo() {
            for property in &mut matched {
                if let (Some(lat), Some(lng)) = (property.latitude, property.longitude) {
                    property.distance_km = Some(haversine_km(
                        lat,
                        lng,
                        criteria.latitude.unwrap(),
                        criteria.longitude.unwrap(),
                    ));
                }
            }
        }

        let total = matched.len() as u64;
        let start = ((criteria.page - 1) as usize) * criteria.limit;
        let page: Vec<Property> = matched.into_iter().skip(start).take(criteria.limit).collect();
        let has_more = (start + page.len()) < total as usize;
        Ok(SearchPage {
            properties: page,
            total,
            page: criteria.page,
            per_page: criteria.limit,
            has_more,
        })
    }

    async fn detail(&self, _kind: SourceKind, slug: &str) -> Result<Option<Property>> {
        Ok(self
            .properties
            .iter()
            .find(|property| property.slug == slug)
            .cloned())
    }

    async fn pending_ingest(&self, limit: usize) -> Result<Vec<Property>> {
        Ok(self.properties.iter().take(limit).cloned().collect())
    }

    async fn mark_ingested(&self, _keys: &[IngestKey]) -> Result<()> {
        Ok(())
    }

    async fn reset_ingest(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic keyword-feature embedder: each dimension flags a concept,
/// so cosine similarity is high exactly when texts share concepts.
pub struct KeywordEmbedder;

const CONCEPTS: [&str; 5] = ["taman", "garden", "hijau", "kolam", "strategis"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_id(&self) -> &str {
        "keyword-test-model"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = CONCEPTS
            .iter()
            .map(|concept| if lower.contains(concept) { 1.0 } else { 0.0 })
            .collect();
        // Bias dimension keeps zero-concept texts from degenerating.
        vector.push(0.25);
        Ok(vector)
    }
}

/// Property fixture builder.
pub fn house(id: i64, slug: &str, price: f64, bedrooms: f64, area: &str) -> Property {
    Property {
        id,
        slug: slug.to_string(),
        source_kind: SourceKind::Listing,
        title: format!("Rumah {area}"),
        property_type: PropertyType::House,
        listing_type: ListingType::Sale,
        status: PropertyStatus::Active,
        price: NumRange::point(price),
        bedrooms: Some(NumRange::point(bedrooms)),
        bathrooms: Some(NumRange::point(2.0)),
        floors: Some(NumRange::point(2.0)),
        land_area: Some(NumRange::point(120.0)),
        building_area: Some(NumRange::point(90.0)),
        city: "Medan".to_string(),
        district: "Medan Sunggal".to_string(),
        area: area.to_string(),
        address: None,
        complex_name: None,
        facing: None,
        latitude: None,
        longitude: None,
        description: Some("Rumah siap huni".to_string()),
        additional_info: None,
        features: Vec::new(),
        amenities: Vec::new(),
        certificate_type: Some("shm".to_string()),
        developer: None,
        unit_types: Vec::new(),
        url_view: None,
        distance_km: None,
        relevance_score: None,
    }
}

/// Assembled retriever over the given corpus, with the vector index fed
/// through the real embedding-document builder.
pub struct Harness {
    pub backend: Arc<InMemoryBackend>,
    pub store: Arc<VectorStore>,
    pub retriever: Arc<HybridRetriever>,
    pub embedder: Arc<CachedEmbedder>,
    _dir: tempfile::TempDir,
}

pub async fn harness(corpus: Vec<Property>, index_all: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(InMemoryBackend::new(corpus.clone()));
    let store = Arc::new(
        VectorStore::open(dir.path(), "properties", "keyword-test-model").unwrap(),
    );
    let embedder = Arc::new(CachedEmbedder::new(
        Arc::new(KeywordEmbedder),
        &EmbeddingConfig {
            model_id: "keyword-test-model".to_string(),
            ..Default::default()
        },
    ));

    if index_all {
        for property in &corpus {
            let text = build_embedding_document(property);
            let (embedding, _) = embedder.embed(&text).await.unwrap();
            store
                .upsert(IndexEntry {
                    slug: property.slug.clone(),
                    source_kind: property.source_kind,
                    embedding,
                    metadata: EntryMetadata::from_property(property),
                })
                .unwrap();
        }
    }

    let geocoder = Arc::new(Geocoder::new(&GeocodingConfig::default(), Vec::new()));
    let retriever = Arc::new(HybridRetriever::new(
        backend.clone(),
        store.clone(),
        embedder.clone(),
        geocoder,
        Arc::new(MethodRouter::fixed(SearchMethod::Hybrid)),
        Arc::new(MetricsSink::disabled()),
        RetrievalConfig::default(),
    ));

    Harness {
        backend,
        store,
        retriever,
        embedder,
        _dir: dir,
    }
}
