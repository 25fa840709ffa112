//! Public HTTP surface contracts.
//!
//! Request/response envelopes for `POST /chat`, the SSE stream, `GET
//! /health` and `GET /methods`, plus the error envelope. Transport wiring
//! (router, SSE framing) lives in the embedding service binary; this module
//! only fixes the shapes.

use serde::{Deserialize, Serialize};

use crate::abtest::SearchMethod;
use crate::error::GriyaError;
use crate::property::Property;
use crate::util::format_idr;

fn default_user() -> String {
    "anonymous".to_string()
}

/// `POST /chat` and `POST /chat/stream` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Generated when absent so the reply can carry it back.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_user")]
    pub user_id: String,
    /// Per-request method override: `hybrid`, `api_only` or `vector_only`.
    #[serde(default)]
    pub method: Option<String>,
}

impl ChatRequest {
    /// Session id, minting one for first-contact requests.
    pub fn session_or_new(&self) -> String {
        self.session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn parsed_method(&self) -> Result<Option<SearchMethod>, GriyaError> {
        match &self.method {
            None => Ok(None),
            Some(raw) => SearchMethod::parse(raw)
                .map(Some)
                .ok_or_else(|| GriyaError::bad_request(format!("unknown method '{raw}'"))),
        }
    }
}

/// One property row in a chat reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySummary {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub price: i64,
    /// Indonesian listing style: `Rp 1,5 M`, `Rp 850 jt`.
    pub price_formatted: String,
    pub location: String,
    pub city: String,
    pub property_type: String,
    pub listing_type: String,
    pub source_kind: String,
    pub bedrooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub land_area: Option<f64>,
    pub building_area: Option<f64>,
    pub url: Option<String>,
}

impl PropertySummary {
    pub fn from_property(property: &Property) -> Self {
        Self {
            id: property.id,
            slug: property.slug.clone(),
            title: property.title.clone(),
            price: property.price.min as i64,
            price_formatted: format_idr(property.price.min as i64),
            location: property.area.clone(),
            city: property.city.clone(),
            property_type: property.property_type.as_str().to_string(),
            listing_type: property.listing_type.as_str().to_string(),
            source_kind: property.source_kind.as_str().to_string(),
            bedrooms: property.bedrooms.map(|r| r.min as i64),
            bathrooms: property.bathrooms.map(|r| r.min as i64),
            land_area: property.land_area.map(|r| r.min),
            building_area: property.building_area.map(|r| r.min),
            url: property.url_view.clone(),
        }
    }
}

/// Search metadata attached to a chat reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub total_found: u64,
    pub returned: usize,
    pub method_used: String,
    pub has_more: bool,
}

/// `POST /chat` response body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub properties: Vec<PropertySummary>,
    pub session_id: String,
    pub metadata: SearchMetadata,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
}

impl HealthResponse {
    pub fn ok(environment: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            version: crate::VERSION.to_string(),
            environment: environment.into(),
        }
    }
}

/// `GET /methods` response body.
#[derive(Debug, Clone, Serialize)]
pub struct MethodsResponse {
    pub methods: Vec<&'static str>,
    pub default: &'static str,
    pub descriptions: Vec<MethodDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodDescription {
    pub method: &'static str,
    pub description: &'static str,
}

impl MethodsResponse {
    pub fn current() -> Self {
        Self {
            methods: vec!["hybrid", "api_only", "vector_only"],
            default: "hybrid",
            descriptions: vec![
                MethodDescription {
                    method: "hybrid",
                    description: "Structured filtering blended with semantic re-ranking (recommended)",
                },
                MethodDescription {
                    method: "api_only",
                    description: "Structured backend filtering only",
                },
                MethodDescription {
                    method: "vector_only",
                    description: "Pure semantic vector search; requires a free-text query",
                },
            ],
        }
    }
}

/// JSON error envelope. No stack traces cross this boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &GriyaError) -> (u16, Self) {
        (
            err.http_status(),
            Self {
                error: err.kind(),
                message: err.to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_formats_prices_the_indonesian_way() {
        let property = crate::property::tests::sample_property();
        let summary = PropertySummary::from_property(&property);
        assert_eq!(summary.price, 1_500_000_000);
        assert_eq!(summary.price_formatted, "Rp 1,5 M");
        assert_eq!(summary.property_type, "house");
        assert_eq!(summary.bedrooms, Some(3));
    }

    #[test]
    fn chat_request_defaults() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"message": "cari rumah"}"#).unwrap();
        assert_eq!(request.user_id, "anonymous");
        assert!(request.method.is_none());
        assert!(!request.session_or_new().is_empty());
    }

    #[test]
    fn method_override_is_validated() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"message": "x", "method": "vector_only"}"#).unwrap();
        assert_eq!(
            request.parsed_method().unwrap(),
            Some(SearchMethod::VectorOnly)
        );

        let request: ChatRequest =
            serde_json::from_str(r#"{"message": "x", "method": "bm25"}"#).unwrap();
        assert!(request.parsed_method().is_err());
    }

    #[test]
    fn error_envelope_carries_the_taxonomy_tag() {
        let (status, envelope) =
            ErrorEnvelope::from_error(&GriyaError::bad_request("limit too large"));
        assert_eq!(status, 400);
        assert_eq!(envelope.error, "bad_request");

        let (status, envelope) =
            ErrorEnvelope::from_error(&GriyaError::upstream("backend down"));
        assert_eq!(status, 502);
        assert_eq!(envelope.error, "upstream_unavailable");
    }
}
