//! Property record and query model.
//!
//! Canonical entities shared by every component: the immutable [`Property`]
//! snapshot, the classification enums, the uniform numeric interval
//! [`NumRange`], and (in [`criteria`]) the normalized [`SearchCriteria`].
//!
//! Listings and projects differ only in numeric-field cardinality, so every
//! numeric is a closed interval; listings always carry `min == max`. This
//! collapses the listing/project branching at filter-evaluation time.

pub mod criteria;

use serde::{Deserialize, Serialize};

pub use self::criteria::{ParsedCriteria, SearchCriteria};

/// A closed numeric interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumRange {
    pub min: f64,
    pub max: f64,
}

impl NumRange {
    /// Interval spanning `min..=max`. Reversed bounds are swapped.
    pub fn new(min: f64, max: f64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// Degenerate interval for a single listing value.
    pub fn point(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// True when this interval intersects `[lo, hi]`, either bound optional.
    ///
    /// A criterion `bedrooms_min = 3` becomes `intersects(Some(3.0), None)`,
    /// which a project with `bedrooms 2..=4` passes.
    pub fn intersects(&self, lo: Option<f64>, hi: Option<f64>) -> bool {
        if let Some(lo) = lo
            && self.max < lo
        {
            return false;
        }
        if let Some(hi) = hi
            && self.min > hi
        {
            return false;
        }
        true
    }
}

/// Whether a record is a resale listing or a primary-market project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Listing,
    Project,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Listing => "listing",
            SourceKind::Project => "project",
        }
    }

    /// Parse upstream values, tolerating the original API's aliases.
    pub fn from_loose(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "listing" | "secondary" => Some(SourceKind::Listing),
            "project" | "primary" => Some(SourceKind::Project),
            _ => None,
        }
    }
}

/// Standardized property types. Indonesian synonyms resolve here, at the
/// adapter boundary, and nowhere deeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    House,
    Shophouse,
    Land,
    Apartment,
    Warehouse,
    Office,
    Villa,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::House => "house",
            PropertyType::Shophouse => "shophouse",
            PropertyType::Land => "land",
            PropertyType::Apartment => "apartment",
            PropertyType::Warehouse => "warehouse",
            PropertyType::Office => "office",
            PropertyType::Villa => "villa",
        }
    }

    /// Indonesian label used in embedding documents and chat output.
    pub fn label_id(&self) -> &'static str {
        match self {
            PropertyType::House => "Rumah",
            PropertyType::Shophouse => "Ruko",
            PropertyType::Land => "Tanah",
            PropertyType::Apartment => "Apartemen",
            PropertyType::Warehouse => "Gudang",
            PropertyType::Office => "Kantor",
            PropertyType::Villa => "Villa",
        }
    }

    pub fn from_loose(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "house" | "rumah" => Some(PropertyType::House),
            "shophouse" | "ruko" => Some(PropertyType::Shophouse),
            "land" | "tanah" => Some(PropertyType::Land),
            "apartment" | "apartemen" => Some(PropertyType::Apartment),
            "warehouse" | "gudang" => Some(PropertyType::Warehouse),
            "office" | "kantor" => Some(PropertyType::Office),
            "villa" => Some(PropertyType::Villa),
            _ => None,
        }
    }
}

/// Sale or rent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Sale,
    Rent,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Sale => "sale",
            ListingType::Rent => "rent",
        }
    }

    pub fn from_loose(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sale" | "jual" | "dijual" => Some(ListingType::Sale),
            "rent" | "sewa" | "disewa" | "disewakan" => Some(ListingType::Rent),
            _ => None,
        }
    }
}

/// Availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    Active,
    Sold,
    Rented,
    Inactive,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Active => "active",
            PropertyStatus::Sold => "sold",
            PropertyStatus::Rented => "rented",
            PropertyStatus::Inactive => "inactive",
        }
    }

    pub fn from_loose(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(PropertyStatus::Active),
            "sold" | "sold_by_owner" => Some(PropertyStatus::Sold),
            "rented" | "rented_by_owner" => Some(PropertyStatus::Rented),
            "inactive" | "draft" => Some(PropertyStatus::Inactive),
            _ => None,
        }
    }
}

/// Immutable snapshot of one listing or project.
///
/// Ground truth lives in the Property Backend; the slug is the cross-system
/// key used for authoritative fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: i64,
    pub slug: String,
    pub source_kind: SourceKind,

    pub title: String,
    pub property_type: PropertyType,
    pub listing_type: ListingType,
    pub status: PropertyStatus,

    /// Price in IDR. Projects may span a range of unit prices.
    pub price: NumRange,
    pub bedrooms: Option<NumRange>,
    pub bathrooms: Option<NumRange>,
    pub floors: Option<NumRange>,
    pub land_area: Option<NumRange>,
    pub building_area: Option<NumRange>,

    pub city: String,
    pub district: String,
    pub area: String,
    pub address: Option<String>,
    pub complex_name: Option<String>,
    pub facing: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub description: Option<String>,
    pub additional_info: Option<String>,
    pub features: Vec<String>,
    pub amenities: Vec<String>,
    pub certificate_type: Option<String>,
    pub developer: Option<String>,
    /// Unit type names for projects ("Tipe 45", "Tipe 60").
    pub unit_types: Vec<String>,

    pub url_view: Option<String>,

    /// Distance from the search center, populated by geo searches.
    pub distance_km: Option<f64>,
    /// Semantic relevance, populated by re-ranking.
    pub relevance_score: Option<f32>,
}

impl Property {
    /// Location text considered by keyword checks: area, district, city and
    /// address joined together.
    pub fn location_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.area.is_empty() {
            parts.push(&self.area);
        }
        if !self.district.is_empty() {
            parts.push(&self.district);
        }
        if !self.city.is_empty() {
            parts.push(&self.city);
        }
        if let Some(address) = &self.address {
            parts.push(address);
        }
        parts.join(", ")
    }

    /// Case-insensitive keyword containment over title + location text.
    pub fn matches_location_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        if keyword.is_empty() {
            return true;
        }
        let haystack = format!("{} {}", self.title, self.location_text()).to_lowercase();
        haystack.contains(&keyword)
    }

    pub fn in_complex(&self) -> bool {
        self.complex_name
            .as_deref()
            .is_some_and(|name| !name.is_empty())
    }
}
