//! Geocoding service with preseeded landmarks and a TTL cache.
//!
//! Resolution order:
//! 1. preseeded dictionary of domain landmarks (exact lowercased key);
//! 2. runtime TTL cache (default 24 h, bounded);
//! 3. primary key-based provider;
//! 4. free fallback provider (requires a `User-Agent`).
//!
//! Provider hits are written to the runtime cache but never to the
//! dictionary. The whole provider chain runs under one wall-clock budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::GeocodingConfig;
use crate::error::{GriyaError, Result};

/// A provider that resolves a free-text place to coordinates.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the provider answered but found nothing.
    async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>>;
}

/// Landmarks that plain text search will not find but people ask for
/// constantly: campuses, malls, hospitals, industrial zones, transport hubs
/// and the well-known residential complexes of the target city.
pub fn known_landmarks() -> HashMap<String, (f64, f64)> {
    let seed: &[(&str, (f64, f64))] = &[
        // Industrial areas
        ("kim", (3.6693658, 98.6904473)),
        ("kawasan industri medan", (3.6693658, 98.6904473)),
        ("mabar", (3.6847, 98.6833)),
        // Universities
        ("usu", (3.5656, 98.6565)),
        ("universitas sumatera utara", (3.5656, 98.6565)),
        ("kampus usu", (3.5656, 98.6565)),
        ("unimed", (3.6089, 98.6833)),
        ("universitas negeri medan", (3.6089, 98.6833)),
        ("uinsu", (3.6167, 98.6833)),
        ("umsu", (3.5833, 98.6667)),
        ("unika", (3.5656, 98.6333)),
        ("mikroskil", (3.5833, 98.6667)),
        // Malls
        ("sun plaza", (3.5833, 98.6667)),
        ("sunplaza", (3.5833, 98.6667)),
        ("centre point", (3.5833, 98.6833)),
        ("centerpoint", (3.5833, 98.6833)),
        ("delipark", (3.5939, 98.6742)),
        ("podomoro city deli", (3.5939, 98.6742)),
        ("cambridge", (3.6847, 98.6453)),
        ("manhattan", (3.5833, 98.6500)),
        ("plaza medan fair", (3.5833, 98.6500)),
        ("medan fair", (3.5833, 98.6500)),
        ("lippo plaza", (3.5656, 98.6333)),
        // Hospitals
        ("rs adam malik", (3.5833, 98.6500)),
        ("adam malik", (3.5833, 98.6500)),
        ("rs columbia asia", (3.5833, 98.6667)),
        ("columbia asia", (3.5833, 98.6667)),
        ("rs elisabeth", (3.5833, 98.6833)),
        ("rs murni teguh", (3.5656, 98.6167)),
        ("murni teguh", (3.5656, 98.6167)),
        ("rs royal prima", (3.6847, 98.6453)),
        ("rs siloam", (3.5833, 98.6667)),
        // Schools
        ("sutomo", (3.5833, 98.6833)),
        ("methodist", (3.5833, 98.6667)),
        ("al azhar", (3.6167, 98.6500)),
        // City centers
        ("pusat kota medan", (3.5952, 98.6722)),
        ("inti kota", (3.5952, 98.6722)),
        // Transport hubs
        ("bandara kualanamu", (3.6422, 98.8853)),
        ("kualanamu", (3.6422, 98.8853)),
        ("stasiun medan", (3.5833, 98.6667)),
        ("terminal amplas", (3.5500, 98.6833)),
        ("terminal pinang baris", (3.5656, 98.6167)),
        // Residential complexes
        ("cemara asri", (3.6289, 98.6960)),
        ("givency one", (3.6089, 98.6171)),
        ("citraland bagya city", (3.6130, 98.7291)),
        ("citraland", (3.6130, 98.7291)),
    ];
    seed.iter()
        .map(|(name, coords)| (name.to_string(), *coords))
        .collect()
}

struct CacheEntry {
    coords: (f64, f64),
    inserted: Instant,
}

/// Place-name resolver.
pub struct Geocoder {
    landmarks: HashMap<String, (f64, f64)>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    providers: Vec<Arc<dyn GeocodeProvider>>,
    cache_ttl: Duration,
    cache_max: usize,
    call_budget: Duration,
    default_city: String,
}

impl Geocoder {
    pub fn new(config: &GeocodingConfig, providers: Vec<Arc<dyn GeocodeProvider>>) -> Self {
        Self {
            landmarks: known_landmarks(),
            cache: Mutex::new(HashMap::new()),
            providers,
            cache_ttl: Duration::from_secs(config.cache_ttl_s),
            cache_max: config.cache_max.max(1),
            call_budget: Duration::from_millis(config.call_budget_ms),
            default_city: config.default_city.clone(),
        }
    }

    /// Resolve `place` to coordinates, or `None` when nothing knows it.
    ///
    /// Never blocks longer than the configured call budget.
    pub async fn geocode(&self, place: &str) -> Result<Option<(f64, f64)>> {
        let key = place.trim().to_lowercase();
        if key.is_empty() {
            return Ok(None);
        }

        // 1. Preseeded dictionary.
        if let Some(coords) = self.landmarks.get(&key) {
            log::debug!("geocode dictionary hit: {key}");
            return Ok(Some(*coords));
        }

        // 2. Runtime cache.
        if let Some(coords) = self.cached(&key) {
            log::debug!("geocode cache hit: {key}");
            return Ok(Some(coords));
        }

        // 3/4. Provider chain under one budget.
        let query = self.augment_query(place);
        let chain = self.run_providers(&query);
        match tokio::time::timeout(self.call_budget, chain).await {
            Ok(Some(coords)) => {
                self.store(&key, coords);
                Ok(Some(coords))
            }
            Ok(None) => {
                log::warn!("geocode failed for '{place}'");
                Ok(None)
            }
            Err(_) => Err(GriyaError::geocode(format!(
                "geocoding '{place}' exceeded {}ms budget",
                self.call_budget.as_millis()
            ))),
        }
    }

    async fn run_providers(&self, query: &str) -> Option<(f64, f64)> {
        for provider in &self.providers {
            match provider.lookup(query).await {
                Ok(Some(coords)) => {
                    log::info!("geocode via {}: '{}' -> {:?}", provider.name(), query, coords);
                    return Some(coords);
                }
                Ok(None) => {
                    log::debug!("geocode {}: no result for '{}'", provider.name(), query);
                }
                Err(err) => {
                    log::warn!("geocode {} error for '{}': {}", provider.name(), query, err);
                }
            }
        }
        None
    }

    /// Append city and country context unless the text already carries it.
    fn augment_query(&self, place: &str) -> String {
        let lower = place.to_lowercase();
        if lower.contains(&self.default_city.to_lowercase()) || lower.contains("indonesia") {
            place.to_string()
        } else {
            format!("{place}, {}, Indonesia", self.default_city)
        }
    }

    fn cached(&self, key: &str) -> Option<(f64, f64)> {
        let mut cache = self.cache.lock();
        let expired = match cache.get(key) {
            Some(entry) if entry.inserted.elapsed() <= self.cache_ttl => {
                return Some(entry.coords);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.remove(key);
        }
        None
    }

    fn store(&self, key: &str, coords: (f64, f64)) {
        let mut cache = self.cache.lock();
        if cache.len() >= self.cache_max && !cache.contains_key(key) {
            // Evict the oldest entry.
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }
        cache.insert(
            key.to_string(),
            CacheEntry {
                coords,
                inserted: Instant::now(),
            },
        );
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GoogleGeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleGeocodeResult>,
}

#[derive(Deserialize)]
struct GoogleGeocodeResult {
    geometry: GoogleGeometry,
}

#[derive(Deserialize)]
struct GoogleGeometry {
    location: GoogleLatLng,
}

#[derive(Deserialize)]
struct GoogleLatLng {
    lat: f64,
    lng: f64,
}

/// Primary, key-based provider.
pub struct GoogleGeocodeProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleGeocodeProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint("https://maps.googleapis.com/maps/api/geocode/json", api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for GoogleGeocodeProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("address", query),
                ("key", &self.api_key),
                ("language", "id"),
                ("region", "id"),
            ])
            .send()
            .await
            .map_err(|err| GriyaError::geocode(format!("google geocode: {err}")))?;

        if !response.status().is_success() {
            return Err(GriyaError::geocode(format!(
                "google geocode returned {}",
                response.status()
            )));
        }

        let parsed: GoogleGeocodeResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::geocode(format!("google geocode body: {err}")))?;

        if parsed.status == "OK"
            && let Some(first) = parsed.results.first()
        {
            let loc = &first.geometry.location;
            return Ok(Some((loc.lat, loc.lng)));
        }
        Ok(None)
    }
}

#[derive(Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

/// Free fallback provider. Nominatim's usage policy requires an identifying
/// `User-Agent`.
pub struct NominatimProvider {
    client: reqwest::Client,
    endpoint: String,
    user_agent: String,
}

impl NominatimProvider {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self::with_endpoint("https://nominatim.openstreetmap.org/search", user_agent)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &str {
        "nominatim"
    }

    async fn lookup(&self, query: &str) -> Result<Option<(f64, f64)>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|err| GriyaError::geocode(format!("nominatim: {err}")))?;

        if !response.status().is_success() {
            return Err(GriyaError::geocode(format!(
                "nominatim returned {}",
                response.status()
            )));
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .map_err(|err| GriyaError::geocode(format!("nominatim body: {err}")))?;

        match results.first() {
            Some(result) => {
                let lat = result
                    .lat
                    .parse::<f64>()
                    .map_err(|_| GriyaError::geocode("nominatim returned non-numeric lat"))?;
                let lon = result
                    .lon
                    .parse::<f64>()
                    .map_err(|_| GriyaError::geocode("nominatim returned non-numeric lon"))?;
                Ok(Some((lat, lon)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        coords: Option<(f64, f64)>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeocodeProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _query: &str) -> Result<Option<(f64, f64)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.coords)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl GeocodeProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn lookup(&self, _query: &str) -> Result<Option<(f64, f64)>> {
            Err(GriyaError::geocode("boom"))
        }
    }

    fn config() -> GeocodingConfig {
        GeocodingConfig::default()
    }

    #[tokio::test]
    async fn dictionary_hit_skips_providers() {
        let provider = Arc::new(FixedProvider {
            coords: Some((0.0, 0.0)),
            calls: AtomicUsize::new(0),
        });
        let geocoder = Geocoder::new(
            &config(),
            vec![provider.clone() as Arc<dyn GeocodeProvider>],
        );

        let coords = geocoder.geocode("USU").await.unwrap();
        assert_eq!(coords, Some((3.5656, 98.6565)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_hit_lands_in_runtime_cache_only() {
        let provider = Arc::new(FixedProvider {
            coords: Some((3.6, 98.7)),
            calls: AtomicUsize::new(0),
        });
        let geocoder = Geocoder::new(
            &config(),
            vec![provider.clone() as Arc<dyn GeocodeProvider>],
        );

        let first = geocoder.geocode("Jalan Sudirman").await.unwrap();
        let second = geocoder.geocode("Jalan Sudirman").await.unwrap();

        assert_eq!(first, Some((3.6, 98.7)));
        assert_eq!(second, Some((3.6, 98.7)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(geocoder.cache_len(), 1);
        // The dictionary itself must stay untouched.
        assert!(!known_landmarks().contains_key("jalan sudirman"));
    }

    #[tokio::test]
    async fn failing_primary_falls_through_to_fallback() {
        let fallback = Arc::new(FixedProvider {
            coords: Some((3.61, 98.71)),
            calls: AtomicUsize::new(0),
        });
        let geocoder = Geocoder::new(
            &config(),
            vec![
                Arc::new(FailingProvider) as Arc<dyn GeocodeProvider>,
                fallback,
            ],
        );

        let coords = geocoder.geocode("somewhere new").await.unwrap();
        assert_eq!(coords, Some((3.61, 98.71)));
    }

    #[tokio::test]
    async fn unknown_place_resolves_to_none() {
        let provider = Arc::new(FixedProvider {
            coords: None,
            calls: AtomicUsize::new(0),
        });
        let geocoder = Geocoder::new(&config(), vec![provider as Arc<dyn GeocodeProvider>]);
        assert_eq!(geocoder.geocode("tempat antah berantah").await.unwrap(), None);
    }

    #[test]
    fn query_augmentation_adds_city_once() {
        let geocoder = Geocoder::new(&config(), Vec::new());
        assert_eq!(
            geocoder.augment_query("Cemara Hijau"),
            "Cemara Hijau, Medan, Indonesia"
        );
        assert_eq!(geocoder.augment_query("Medan Johor"), "Medan Johor");
    }
}
