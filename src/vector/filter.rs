//! Metadata filtering for vector searches.
//!
//! Filter expressions are conjunctive across scalar equality and numeric
//! range predicates. Numeric predicates match by interval overlap so project
//! records with value ranges participate correctly.

use serde::{Deserialize, Serialize};

use crate::property::{ListingType, PropertyStatus, PropertyType, SearchCriteria, SourceKind};
use crate::vector::store::EntryMetadata;

/// Conjunctive metadata predicate applied during vector search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    pub property_type: Option<PropertyType>,
    pub listing_type: Option<ListingType>,
    pub source_kind: Option<SourceKind>,
    pub status: Option<PropertyStatus>,

    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub bedrooms_min: Option<f64>,
    pub bedrooms_max: Option<f64>,
    pub bathrooms_min: Option<f64>,
    pub bathrooms_max: Option<f64>,
    pub floors_min: Option<f64>,
    pub floors_max: Option<f64>,
    pub min_land_area: Option<f64>,
    pub min_building_area: Option<f64>,

    pub in_complex: Option<bool>,
    pub facing: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.property_type.is_none()
            && self.listing_type.is_none()
            && self.source_kind.is_none()
            && self.status.is_none()
            && self.price_min.is_none()
            && self.price_max.is_none()
            && self.bedrooms_min.is_none()
            && self.bedrooms_max.is_none()
            && self.bathrooms_min.is_none()
            && self.bathrooms_max.is_none()
            && self.floors_min.is_none()
            && self.floors_max.is_none()
            && self.min_land_area.is_none()
            && self.min_building_area.is_none()
            && self.in_complex.is_none()
            && self.facing.is_none()
    }

    /// Derive the vector-side filter from search criteria. Only the fields
    /// mirrored into entry metadata participate; free text and geo stay on
    /// the backend side.
    pub fn from_criteria(criteria: &SearchCriteria) -> Self {
        Self {
            property_type: criteria.property_type,
            listing_type: criteria.listing_type,
            source_kind: criteria.source_kind,
            status: None,
            price_min: criteria.price_min.map(|v| v as f64),
            price_max: criteria.price_max.map(|v| v as f64),
            bedrooms_min: criteria.bedrooms_min.map(f64::from),
            bedrooms_max: criteria.bedrooms_max.map(f64::from),
            bathrooms_min: criteria.bathrooms_min.map(f64::from),
            bathrooms_max: criteria.bathrooms_max.map(f64::from),
            floors_min: criteria.floors_min.map(f64::from),
            floors_max: criteria.floors_max.map(f64::from),
            min_land_area: criteria.min_land_area,
            min_building_area: criteria.min_building_area,
            in_complex: criteria.in_complex,
            facing: criteria.facing.clone(),
        }
    }

    /// Evaluate the conjunction against one entry's metadata.
    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        if let Some(expected) = self.property_type
            && metadata.property_type != expected
        {
            return false;
        }
        if let Some(expected) = self.listing_type
            && metadata.listing_type != expected
        {
            return false;
        }
        if let Some(expected) = self.source_kind
            && metadata.source_kind != expected
        {
            return false;
        }
        if let Some(expected) = self.status
            && metadata.status != expected
        {
            return false;
        }

        if !metadata.price.intersects(self.price_min, self.price_max) {
            return false;
        }
        if !range_matches(metadata.bedrooms, self.bedrooms_min, self.bedrooms_max) {
            return false;
        }
        if !range_matches(metadata.bathrooms, self.bathrooms_min, self.bathrooms_max) {
            return false;
        }
        if !range_matches(metadata.floors, self.floors_min, self.floors_max) {
            return false;
        }
        if !range_matches(metadata.land_area, self.min_land_area, None) {
            return false;
        }
        if !range_matches(metadata.building_area, self.min_building_area, None) {
            return false;
        }

        if let Some(expected) = self.in_complex
            && metadata.in_complex != expected
        {
            return false;
        }
        if let Some(expected) = &self.facing {
            let actual = metadata.facing.as_deref().unwrap_or("");
            if !actual.eq_ignore_ascii_case(expected) {
                return false;
            }
        }

        true
    }
}

/// A constrained field with no recorded value fails the predicate; an
/// unconstrained one always passes.
fn range_matches(
    value: Option<crate::property::NumRange>,
    lo: Option<f64>,
    hi: Option<f64>,
) -> bool {
    if lo.is_none() && hi.is_none() {
        return true;
    }
    match value {
        Some(range) => range.intersects(lo, hi),
        None => false,
    }
}
