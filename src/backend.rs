//! Property Backend adapter.
//!
//! The backend is the authoritative structured store of listings and
//! projects. [`PropertyBackend`] is the seam every component consumes;
//! [`HttpPropertyBackend`] speaks the backend's REST dialect and normalizes
//! field names and Indonesian synonyms on ingress, so nothing deeper in the
//! engine ever sees raw wire values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GriyaError, Result};
use crate::property::{
    ListingType, NumRange, Property, PropertyStatus, PropertyType, SearchCriteria, SourceKind,
};

/// One page of structured search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub properties: Vec<Property>,
    pub total: u64,
    pub page: u32,
    pub per_page: usize,
    pub has_more: bool,
}

/// Acknowledgement key for the sync flag protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestKey {
    pub source: SourceKind,
    pub id: i64,
}

/// Read-only contract with the authoritative property store.
#[async_trait]
pub trait PropertyBackend: Send + Sync {
    /// Structured filter search, `GET /properties`.
    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchPage>;

    /// Authoritative detail fetch by slug.
    async fn detail(&self, source_kind: SourceKind, slug: &str) -> Result<Option<Property>>;

    /// Records flagged `need_ingest=true`, already normalized.
    async fn pending_ingest(&self, limit: usize) -> Result<Vec<Property>>;

    /// Acknowledge successful indexing.
    async fn mark_ingested(&self, keys: &[IngestKey]) -> Result<()>;

    /// Republish every record for a full reindex.
    async fn reset_ingest(&self) -> Result<()>;

    /// Slugs hard-deleted upstream since `cursor`. Optional endpoint; the
    /// default implementation reports nothing.
    async fn deleted_since(&self, _cursor: Option<&str>) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct Meta {
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    current_page: Option<u32>,
    #[serde(default)]
    per_page: Option<usize>,
    #[serde(default)]
    has_more: Option<bool>,
}

#[derive(Deserialize)]
struct DetailResponse {
    data: Option<Value>,
}

#[derive(Deserialize)]
struct SuccessResponse {
    #[serde(default)]
    success: bool,
}

#[derive(Deserialize)]
struct DeletedResponse {
    #[serde(default)]
    data: Vec<String>,
}

#[derive(Serialize)]
struct MarkIngestedBody<'a> {
    ids: &'a [IngestKey],
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Backend client over the REST surface.
pub struct HttpPropertyBackend {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpPropertyBackend {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url,
            api_token,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn map_send_error(err: reqwest::Error) -> GriyaError {
        if err.is_timeout() {
            GriyaError::timeout(format!("property backend: {err}"))
        } else {
            GriyaError::upstream(format!("property backend: {err}"))
        }
    }

    fn check_status(status: reqwest::StatusCode) -> Result<()> {
        if status.as_u16() == 429 {
            return Err(GriyaError::rate_limited("property backend"));
        }
        if status.is_server_error() {
            return Err(GriyaError::upstream(format!(
                "property backend returned {status}"
            )));
        }
        if status.is_client_error() {
            return Err(GriyaError::bad_request(format!(
                "property backend rejected the request: {status}"
            )));
        }
        Ok(())
    }

    fn query_params(criteria: &SearchCriteria) -> Vec<(&'static str, String)> {
        let mut params: Vec<(&'static str, String)> = vec![
            ("page", criteria.page.to_string()),
            ("per_page", criteria.limit.to_string()),
        ];
        if let Some(query) = criteria.semantic_query() {
            params.push(("search", query.to_string()));
        }
        if let Some(keyword) = &criteria.location_keyword {
            params.push(("location", keyword.clone()));
        }
        if let Some(kind) = criteria.source_kind {
            params.push(("source", kind.as_str().to_string()));
        }
        if let Some(property_type) = criteria.property_type {
            params.push(("property_type", property_type.as_str().to_string()));
        }
        if let Some(listing_type) = criteria.listing_type {
            params.push(("listing_type", listing_type.as_str().to_string()));
        }
        if let Some(price_min) = criteria.price_min {
            params.push(("price_min", price_min.to_string()));
        }
        if let Some(price_max) = criteria.price_max {
            params.push(("price_max", price_max.to_string()));
        }
        if let Some(v) = criteria.bedrooms_min {
            params.push(("bedrooms_min", v.to_string()));
        }
        if let Some(v) = criteria.bedrooms_max {
            params.push(("bedrooms_max", v.to_string()));
        }
        if let Some(v) = criteria.bathrooms_min {
            params.push(("bathrooms_min", v.to_string()));
        }
        if let Some(v) = criteria.bathrooms_max {
            params.push(("bathrooms_max", v.to_string()));
        }
        if let Some(v) = criteria.floors_min {
            params.push(("floors_min", v.to_string()));
        }
        if let Some(v) = criteria.floors_max {
            params.push(("floors_max", v.to_string()));
        }
        if let Some(v) = criteria.min_land_area {
            params.push(("land_area_min", v.to_string()));
        }
        if let Some(v) = criteria.min_building_area {
            params.push(("building_area_min", v.to_string()));
        }
        if let Some(in_complex) = criteria.in_complex {
            params.push(("in_complex", if in_complex { "1" } else { "0" }.to_string()));
        }
        if let Some(facing) = &criteria.facing {
            params.push(("facing", facing.clone()));
        }
        for amenity in &criteria.amenities {
            params.push(("amenities[]", amenity.clone()));
        }
        if criteria.has_geo() {
            params.push(("lat", criteria.latitude.unwrap_or_default().to_string()));
            params.push(("lng", criteria.longitude.unwrap_or_default().to_string()));
            params.push(("radius", criteria.radius_km.unwrap_or_default().to_string()));
        }
        params
    }
}

#[async_trait]
impl PropertyBackend for HttpPropertyBackend {
    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchPage> {
        criteria.validate()?;
        let response = self
            .request(reqwest::Method::GET, "/properties")
            .query(&Self::query_params(criteria))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(response.status())?;

        let body: ListResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::upstream(format!("property list body: {err}")))?;

        let mut properties = Vec::with_capacity(body.data.len());
        for raw in &body.data {
            match normalize_property(raw) {
                Ok(property) => properties.push(property),
                Err(err) => {
                    log::warn!(
                        "skipping unparseable property {}: {err}",
                        raw.get("id").cloned().unwrap_or_default()
                    );
                }
            }
        }

        let meta = body.meta.unwrap_or(Meta {
            total: None,
            current_page: None,
            per_page: None,
            has_more: None,
        });
        Ok(SearchPage {
            total: meta.total.unwrap_or(properties.len() as u64),
            page: meta.current_page.unwrap_or(criteria.page),
            per_page: meta.per_page.unwrap_or(criteria.limit),
            has_more: meta.has_more.unwrap_or(false),
            properties,
        })
    }

    async fn detail(&self, source_kind: SourceKind, slug: &str) -> Result<Option<Property>> {
        let path = match source_kind {
            SourceKind::Listing => format!("/listings/{slug}"),
            SourceKind::Project => format!("/projects/{slug}"),
        };
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        Self::check_status(response.status())?;

        let body: DetailResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::upstream(format!("property detail body: {err}")))?;
        match body.data {
            Some(raw) => Ok(Some(normalize_property(&raw)?)),
            None => Ok(None),
        }
    }

    async fn pending_ingest(&self, limit: usize) -> Result<Vec<Property>> {
        let response = self
            .request(reqwest::Method::GET, "/sync/pending-ingest")
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(response.status())?;

        let body: ListResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::upstream(format!("pending-ingest body: {err}")))?;

        let mut properties = Vec::with_capacity(body.data.len());
        for raw in &body.data {
            match normalize_property(raw) {
                Ok(property) => properties.push(property),
                Err(err) => {
                    log::warn!(
                        "skipping unparseable pending record {}: {err}",
                        raw.get("id").cloned().unwrap_or_default()
                    );
                }
            }
        }
        Ok(properties)
    }

    async fn mark_ingested(&self, keys: &[IngestKey]) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/sync/mark-ingested")
            .json(&MarkIngestedBody { ids: keys })
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(response.status())?;

        let body: SuccessResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::upstream(format!("mark-ingested body: {err}")))?;
        if !body.success {
            return Err(GriyaError::upstream("mark-ingested reported failure"));
        }
        Ok(())
    }

    async fn reset_ingest(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/sync/reset-ingest")
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(response.status())?;

        let body: SuccessResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::upstream(format!("reset-ingest body: {err}")))?;
        if !body.success {
            return Err(GriyaError::upstream("reset-ingest reported failure"));
        }
        Ok(())
    }

    async fn deleted_since(&self, cursor: Option<&str>) -> Result<Vec<String>> {
        let mut request = self.request(reqwest::Method::GET, "/sync/deleted");
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = request.send().await.map_err(Self::map_send_error)?;
        if response.status().as_u16() == 404 {
            // Optional endpoint; backends without it report nothing.
            return Ok(Vec::new());
        }
        Self::check_status(response.status())?;

        let body: DeletedResponse = response
            .json()
            .await
            .map_err(|err| GriyaError::upstream(format!("deleted body: {err}")))?;
        Ok(body.data)
    }
}

// ---------------------------------------------------------------------------
// Ingress normalization
// ---------------------------------------------------------------------------

fn str_field<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Numbers arrive as numbers or as strings like `"2.0"`; coerce both.
fn num_field(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| coerce_num(raw.get(*key)?))
}

fn coerce_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn num_list(raw: &Value, key: &str) -> Vec<f64> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(coerce_num).collect())
        .unwrap_or_default()
}

fn string_list(raw: &Value, keys: &[&str]) -> Vec<String> {
    for key in keys {
        if let Some(list) = raw.get(*key).and_then(Value::as_array) {
            return list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
    }
    Vec::new()
}

fn range_from_list(values: &[f64]) -> Option<NumRange> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() || !min.is_finite() {
        None
    } else {
        Some(NumRange::new(min, max))
    }
}

fn range_from_bounds(raw: &Value, min_key: &str, max_key: &str) -> Option<NumRange> {
    let min = num_field(raw, &[min_key]);
    let max = num_field(raw, &[max_key]);
    match (min, max) {
        (Some(min), Some(max)) => Some(NumRange::new(min, max)),
        (Some(v), None) | (None, Some(v)) => Some(NumRange::point(v)),
        (None, None) => None,
    }
}

/// Normalize one raw backend record into the canonical snapshot.
///
/// Listings carry scalar numerics; projects carry `*_available` lists and
/// `*_min`/`*_max` bounds. Both collapse into [`NumRange`] intervals here.
pub fn normalize_property(raw: &Value) -> Result<Property> {
    let slug = str_field(raw, &["slug"])
        .ok_or_else(|| GriyaError::bad_request("property record is missing a slug"))?
        .to_string();
    let id = num_field(raw, &["id"])
        .map(|v| v as i64)
        .ok_or_else(|| GriyaError::bad_request("property record is missing an id"))?;

    let source_kind = str_field(raw, &["source", "source_kind"])
        .and_then(SourceKind::from_loose)
        .unwrap_or(SourceKind::Listing);

    let property_type = str_field(raw, &["property_type", "type"])
        .and_then(PropertyType::from_loose)
        .unwrap_or(PropertyType::House);
    let listing_type = str_field(raw, &["listing_type", "transaction_type"])
        .and_then(ListingType::from_loose)
        .unwrap_or(ListingType::Sale);
    let status = str_field(raw, &["status"])
        .and_then(PropertyStatus::from_loose)
        .unwrap_or(PropertyStatus::Active);

    let (price, bedrooms, bathrooms, floors, land_area, building_area) =
        if source_kind == SourceKind::Project {
            (
                range_from_bounds(raw, "price_min", "price_max")
                    .or_else(|| num_field(raw, &["price"]).map(NumRange::point))
                    .unwrap_or(NumRange::point(0.0)),
                range_from_list(&num_list(raw, "bedrooms_available"))
                    .or_else(|| num_field(raw, &["bedrooms"]).map(NumRange::point)),
                range_from_list(&num_list(raw, "bathrooms_available"))
                    .or_else(|| num_field(raw, &["bathrooms"]).map(NumRange::point)),
                range_from_list(&num_list(raw, "floors_available"))
                    .or_else(|| num_field(raw, &["floors"]).map(NumRange::point)),
                range_from_bounds(raw, "land_area_min", "land_area_max")
                    .or_else(|| num_field(raw, &["land_area"]).map(NumRange::point)),
                range_from_bounds(raw, "building_area_min", "building_area_max")
                    .or_else(|| num_field(raw, &["building_area"]).map(NumRange::point)),
            )
        } else {
            (
                num_field(raw, &["price"])
                    .map(NumRange::point)
                    .unwrap_or(NumRange::point(0.0)),
                num_field(raw, &["bedrooms", "bedroom"]).map(NumRange::point),
                num_field(raw, &["bathrooms", "bathroom"]).map(NumRange::point),
                num_field(raw, &["floors", "floor", "stories"]).map(NumRange::point),
                num_field(raw, &["land_area"]).map(NumRange::point),
                num_field(raw, &["building_area"]).map(NumRange::point),
            )
        };

    let developer = raw
        .get("developer")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            // Projects sometimes nest the developer under the handler.
            let handler = raw.get("agent").or_else(|| raw.get("handler"))?;
            if handler.get("type").and_then(Value::as_str) == Some("developer") {
                handler.get("name").and_then(Value::as_str).map(str::to_string)
            } else {
                None
            }
        });

    Ok(Property {
        id,
        slug,
        source_kind,
        title: str_field(raw, &["title", "name"]).unwrap_or_default().to_string(),
        property_type,
        listing_type,
        status,
        price,
        bedrooms,
        bathrooms,
        floors,
        land_area,
        building_area,
        city: str_field(raw, &["city"]).unwrap_or_default().to_string(),
        district: str_field(raw, &["district"]).unwrap_or_default().to_string(),
        area: str_field(raw, &["area_listing", "area", "location"])
            .unwrap_or_default()
            .to_string(),
        address: str_field(raw, &["display_address", "address"]).map(str::to_string),
        complex_name: str_field(raw, &["complex_name"]).map(str::to_string),
        facing: str_field(raw, &["facing", "hadap"]).map(|s| s.to_lowercase()),
        latitude: num_field(raw, &["latitude", "lat"]),
        longitude: num_field(raw, &["longitude", "lng"]),
        description: str_field(raw, &["description"]).map(str::to_string),
        additional_info: str_field(raw, &["additional_info"]).map(str::to_string),
        features: string_list(raw, &["features"]),
        amenities: string_list(raw, &["amenities", "facilities"]),
        certificate_type: str_field(raw, &["certificate_type"]).map(|s| s.to_lowercase()),
        developer,
        unit_types: string_list(raw, &["unit_types"]),
        url_view: str_field(raw, &["url_view"]).map(str::to_string),
        distance_km: num_field(raw, &["distance", "distance_km"]),
        relevance_score: None,
    })
}
