//! Normalized search criteria and the LLM-parse seam.

use serde::{Deserialize, Serialize};

use crate::error::{GriyaError, Result};
use crate::property::{ListingType, PropertyType, SourceKind};

/// Hard cap on page size.
pub const MAX_LIMIT: usize = 50;

/// Normalized, non-ambiguous filter. Every field is independently optional;
/// unset means unconstrained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    /// Free-text seed for semantic re-ranking. May be empty.
    pub query: Option<String>,

    pub property_type: Option<PropertyType>,
    pub listing_type: Option<ListingType>,
    pub source_kind: Option<SourceKind>,

    /// Inclusive IDR bounds.
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,

    /// Inclusive integer bounds; projects match by interval overlap.
    pub bedrooms_min: Option<u32>,
    pub bedrooms_max: Option<u32>,
    pub bathrooms_min: Option<u32>,
    pub bathrooms_max: Option<u32>,
    pub floors_min: Option<u32>,
    pub floors_max: Option<u32>,

    /// Inclusive sqm lower bounds.
    pub min_land_area: Option<f64>,
    pub min_building_area: Option<f64>,

    /// Textual area hint, checked against area/district/city.
    pub location_keyword: Option<String>,

    /// Geo-circle filter; the triplet is mutually required.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,

    /// Tri-state: inside a complex, standalone, or either.
    pub in_complex: Option<bool>,
    pub facing: Option<String>,
    pub amenities: Vec<String>,

    pub page: u32,
    pub limit: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            query: None,
            property_type: None,
            listing_type: None,
            source_kind: None,
            price_min: None,
            price_max: None,
            bedrooms_min: None,
            bedrooms_max: None,
            bathrooms_min: None,
            bathrooms_max: None,
            floors_min: None,
            floors_max: None,
            min_land_area: None,
            min_building_area: None,
            location_keyword: None,
            latitude: None,
            longitude: None,
            radius_km: None,
            in_complex: None,
            facing: None,
            amenities: Vec::new(),
            page: 1,
            limit: 10,
        }
    }
}

impl SearchCriteria {
    /// Non-empty semantic query, if any.
    pub fn semantic_query(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn has_geo(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some() && self.radius_km.is_some()
    }

    /// Validate structural rules. Contradictory numeric bounds are not an
    /// error; they simply select nothing.
    pub fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(GriyaError::bad_request("page must be >= 1"));
        }
        if self.limit < 1 || self.limit > MAX_LIMIT {
            return Err(GriyaError::bad_request(format!(
                "limit must be in 1..={MAX_LIMIT}, got {}",
                self.limit
            )));
        }
        let geo_parts = [
            self.latitude.is_some(),
            self.longitude.is_some(),
            self.radius_km.is_some(),
        ];
        let geo_count = geo_parts.iter().filter(|set| **set).count();
        if geo_count != 0 && geo_count != 3 {
            return Err(GriyaError::bad_request(
                "latitude, longitude and radius_km must be provided together",
            ));
        }
        if let Some(radius) = self.radius_km
            && radius < 0.0
        {
            return Err(GriyaError::bad_request("radius_km must be >= 0"));
        }
        if let Some(lat) = self.latitude
            && !(-90.0..=90.0).contains(&lat)
        {
            return Err(GriyaError::bad_request("latitude out of range"));
        }
        if let Some(lng) = self.longitude
            && !(-180.0..=180.0).contains(&lng)
        {
            return Err(GriyaError::bad_request("longitude out of range"));
        }
        Ok(())
    }

    /// Copy with the geo circle set and the location keyword cleared, as the
    /// proximity fallback requires.
    pub fn with_geo_fallback(&self, lat: f64, lng: f64, radius_km: f64) -> Self {
        let mut criteria = self.clone();
        criteria.latitude = Some(lat);
        criteria.longitude = Some(lng);
        criteria.radius_km = Some(radius_km);
        criteria.location_keyword = None;
        criteria
    }
}

/// Outcome of parsing LLM-extracted JSON into criteria.
///
/// The LLM is an untrusted parser: its JSON is validated against the criteria
/// schema, unknown keys are rejected, numerics are coerced, and anything else
/// fails closed as `bad_request`.
#[derive(Debug, Clone)]
pub enum ParsedCriteria {
    Ok(SearchCriteria),
    /// The model could not produce unambiguous criteria; the agent should ask
    /// a follow-up instead of searching.
    Clarify(String),
}

const KNOWN_KEYS: &[&str] = &[
    "query",
    "property_type",
    "listing_type",
    "source_kind",
    "price_min",
    "price_max",
    "bedrooms_min",
    "bedrooms_max",
    "bathrooms_min",
    "bathrooms_max",
    "floors_min",
    "floors_max",
    "min_land_area",
    "min_building_area",
    "location_keyword",
    "latitude",
    "longitude",
    "radius_km",
    "in_complex",
    "facing",
    "amenities",
    "page",
    "limit",
    "clarify",
];

impl ParsedCriteria {
    /// Parse the JSON text an LLM produced for the criteria-extraction
    /// prompt.
    pub fn from_llm_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|err| GriyaError::bad_request(format!("criteria JSON invalid: {err}")))?;
        let object = value
            .as_object()
            .ok_or_else(|| GriyaError::bad_request("criteria JSON must be an object"))?;

        if let Some(reason) = object.get("clarify").and_then(|v| v.as_str()) {
            return Ok(ParsedCriteria::Clarify(reason.to_string()));
        }

        for key in object.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(GriyaError::bad_request(format!(
                    "unknown criteria key '{key}'"
                )));
            }
        }

        let mut criteria = SearchCriteria::default();

        criteria.query = opt_string(object, "query")?;
        if let Some(raw) = opt_string(object, "property_type")? {
            criteria.property_type = Some(PropertyType::from_loose(&raw).ok_or_else(|| {
                GriyaError::bad_request(format!("unknown property_type '{raw}'"))
            })?);
        }
        if let Some(raw) = opt_string(object, "listing_type")? {
            criteria.listing_type = Some(
                ListingType::from_loose(&raw)
                    .ok_or_else(|| GriyaError::bad_request(format!("unknown listing_type '{raw}'")))?,
            );
        }
        if let Some(raw) = opt_string(object, "source_kind")? {
            criteria.source_kind = Some(
                SourceKind::from_loose(&raw)
                    .ok_or_else(|| GriyaError::bad_request(format!("unknown source_kind '{raw}'")))?,
            );
        }

        criteria.price_min = opt_i64(object, "price_min")?;
        criteria.price_max = opt_i64(object, "price_max")?;
        criteria.bedrooms_min = opt_u32(object, "bedrooms_min")?;
        criteria.bedrooms_max = opt_u32(object, "bedrooms_max")?;
        criteria.bathrooms_min = opt_u32(object, "bathrooms_min")?;
        criteria.bathrooms_max = opt_u32(object, "bathrooms_max")?;
        criteria.floors_min = opt_u32(object, "floors_min")?;
        criteria.floors_max = opt_u32(object, "floors_max")?;
        criteria.min_land_area = opt_f64(object, "min_land_area")?;
        criteria.min_building_area = opt_f64(object, "min_building_area")?;
        criteria.location_keyword = opt_string(object, "location_keyword")?;
        criteria.latitude = opt_f64(object, "latitude")?;
        criteria.longitude = opt_f64(object, "longitude")?;
        criteria.radius_km = opt_f64(object, "radius_km")?;
        criteria.in_complex = opt_bool(object, "in_complex")?;
        criteria.facing = opt_string(object, "facing")?;
        if let Some(list) = object.get("amenities").filter(|v| !v.is_null()) {
            let list = list
                .as_array()
                .ok_or_else(|| GriyaError::bad_request("amenities must be a list"))?;
            for item in list {
                let item = item
                    .as_str()
                    .ok_or_else(|| GriyaError::bad_request("amenities entries must be strings"))?;
                criteria.amenities.push(item.to_string());
            }
        }
        if let Some(page) = opt_u32(object, "page")? {
            criteria.page = page.max(1);
        }
        if let Some(limit) = opt_u32(object, "limit")? {
            criteria.limit = limit as usize;
        }

        criteria.validate()?;
        Ok(ParsedCriteria::Ok(criteria))
    }
}

type JsonMap = serde_json::Map<String, serde_json::Value>;

fn opt_string(object: &JsonMap, key: &str) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(GriyaError::bad_request(format!("'{key}' must be a string"))),
    }
}

fn opt_f64(object: &JsonMap, key: &str) -> Result<Option<f64>> {
    match object.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_f64()),
        // LLMs routinely quote numbers; coerce.
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| GriyaError::bad_request(format!("'{key}' is not numeric"))),
        Some(_) => Err(GriyaError::bad_request(format!("'{key}' must be a number"))),
    }
}

fn opt_i64(object: &JsonMap, key: &str) -> Result<Option<i64>> {
    Ok(opt_f64(object, key)?.map(|v| v as i64))
}

fn opt_u32(object: &JsonMap, key: &str) -> Result<Option<u32>> {
    match opt_f64(object, key)? {
        None => Ok(None),
        Some(v) if v < 0.0 => Err(GriyaError::bad_request(format!("'{key}' must be >= 0"))),
        Some(v) => Ok(Some(v as u32)),
    }
}

fn opt_bool(object: &JsonMap, key: &str) -> Result<Option<bool>> {
    match object.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(GriyaError::bad_request(format!("'{key}' must be a boolean"))),
    }
}
