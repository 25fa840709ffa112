//! Embedding document construction.
//!
//! For each property a deterministic Indonesian text document is built from
//! the rich-text fields. Numeric filter fields are deliberately not embedded;
//! they live in entry metadata. The template and the mapping tables below
//! determine embedding stability: changing either invalidates every stored
//! vector and requires a full reindex via `reset_ingest`.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::property::{ListingType, NumRange, Property, SourceKind};
use crate::util::strip_html;

lazy_static! {
    /// Amenity codes translated to the phrases buyers actually search for.
    static ref AMENITY_LABELS: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("electricity", "listrik");
        map.insert("water", "air PDAM");
        map.insert("furnished", "full furnished");
        map.insert("semi_furnished", "semi furnished");
        map.insert("unfurnished", "unfurnished");
        map.insert("ceramic_floor", "lantai keramik");
        map.insert("marble_floor", "lantai marmer");
        map.insert("painted_walls", "dinding cat");
        map.insert("ac", "AC");
        map.insert("ac_installation", "instalasi AC");
        map.insert("water_heater", "water heater");
        map.insert("stair_railing", "railing tangga");
        map.insert("security_24", "security 24 jam");
        map.insert("swimming_pool", "kolam renang");
        map.insert("playground", "playground");
        map.insert("jogging_track", "jogging track");
        map.insert("clubhouse", "clubhouse");
        map.insert("garden", "taman");
        map.insert("garage", "garasi");
        map.insert("carport", "carport");
        map
    };

    /// Certificate codes spelled out.
    static ref CERTIFICATE_LABELS: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("shm", "SHM (Sertifikat Hak Milik)");
        map.insert("shgb", "SHGB (Sertifikat Hak Guna Bangunan)");
        map.insert("hgb", "HGB");
        map.insert("girik", "Girik");
        map.insert("ppjb", "PPJB");
        map
    };
}

fn push_range_line(parts: &mut Vec<String>, range: NumRange, singular: &str, plural: &str) {
    let min = range.min.round() as i64;
    let max = range.max.round() as i64;
    if min == max {
        parts.push(singular.replace("{n}", &min.to_string()));
    } else {
        parts.push(plural.replace("{min}", &min.to_string()).replace("{max}", &max.to_string()));
    }
}

/// Build the deterministic embedding document for one property.
pub fn build_embedding_document(property: &Property) -> String {
    let mut parts: Vec<String> = Vec::new();

    // 1. Title.
    if !property.title.is_empty() {
        parts.push(property.title.clone());
    }

    // 2. Transaction phrasing.
    match property.listing_type {
        ListingType::Sale => parts.push("Properti dijual".to_string()),
        ListingType::Rent => parts.push("Properti disewakan".to_string()),
    }

    // 3. Primary-market context and unit enumerations for projects.
    if property.source_kind == SourceKind::Project {
        match &property.developer {
            Some(developer) => {
                parts.push(format!("Proyek baru dari developer {developer}"));
            }
            None => parts.push("Proyek baru (primary market)".to_string()),
        }

        if !property.unit_types.is_empty() {
            parts.push(format!(
                "Tipe unit tersedia: {}",
                property.unit_types.join(", ")
            ));
        }
        if let Some(bedrooms) = property.bedrooms {
            push_range_line(
                &mut parts,
                bedrooms,
                "Tersedia rumah {n} kamar tidur",
                "Tersedia rumah {min}-{max} kamar tidur",
            );
        }
        if let Some(floors) = property.floors {
            push_range_line(
                &mut parts,
                floors,
                "Bangunan {n} lantai",
                "Bangunan {min}-{max} lantai",
            );
        }
        if let Some(building_area) = property.building_area {
            push_range_line(
                &mut parts,
                building_area,
                "Luas bangunan {n}m²",
                "Luas bangunan {min}-{max}m²",
            );
        }
        if let Some(land_area) = property.land_area {
            push_range_line(
                &mut parts,
                land_area,
                "Luas tanah {n}m²",
                "Luas tanah {min}-{max}m²",
            );
        }
    }

    // 4. Description and additional info, HTML stripped.
    if let Some(description) = &property.description {
        let cleaned = strip_html(description);
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }
    if let Some(additional) = &property.additional_info
        && property.description.as_deref() != Some(additional.as_str())
    {
        let cleaned = strip_html(additional);
        if !cleaned.is_empty() {
            parts.push(cleaned);
        }
    }

    // 5. Location.
    let mut location_parts: Vec<String> = Vec::new();
    if !property.area.is_empty() {
        location_parts.push(property.area.clone());
    }
    if let Some(complex_name) = &property.complex_name
        && !complex_name.is_empty()
    {
        location_parts.push(format!("Komplek {complex_name}"));
    }
    if !property.district.is_empty() {
        location_parts.push(property.district.clone());
    }
    if !property.city.is_empty() {
        location_parts.push(property.city.clone());
    }
    if let Some(address) = &property.address
        && !location_parts.iter().any(|p| p == address)
    {
        location_parts.push(address.clone());
    }
    if !location_parts.is_empty() {
        parts.push(format!("Lokasi: {}", location_parts.join(", ")));
    }

    // 6. Property type.
    parts.push(format!("Tipe: {}", property.property_type.label_id()));

    // 7. Certificate.
    if let Some(certificate) = &property.certificate_type {
        let key = certificate.to_lowercase();
        let label = CERTIFICATE_LABELS
            .get(key.as_str())
            .map(|l| (*l).to_string())
            .unwrap_or_else(|| certificate.to_uppercase());
        parts.push(format!("Sertifikat: {label}"));
    }

    // 8. Amenities.
    let amenities: Vec<String> = property
        .amenities
        .iter()
        .map(|code| {
            let key = code.to_lowercase();
            AMENITY_LABELS
                .get(key.as_str())
                .map(|l| (*l).to_string())
                .unwrap_or_else(|| key.replace('_', " "))
        })
        .collect();
    if !amenities.is_empty() {
        parts.push(format!("Fasilitas: {}", amenities.join(", ")));
    }

    parts.join("\n\n")
}
