//! Per-constraint pass rules.
//!
//! Checks run against canonical [`Property`] snapshots, so type synonyms are
//! already collapsed; gold files may still spell constraints in Indonesian
//! and are normalized through the same parsing used at the adapter boundary.
//! Location checks are keyword-first, then great-circle distance - the
//! ordering matters and must not be swapped.

use crate::eval::models::{
    CheckOutcome, Constraints, CountConstraint, GoldQuestion, LocationConstraint, PriceConstraint,
    PropertyCheck,
};
use crate::property::{ListingType, NumRange, Property, PropertyType};
use crate::util::haversine_km;

/// Stateless constraint checker with a default price tolerance.
pub struct ConstraintChecker {
    default_price_tolerance: f64,
}

impl ConstraintChecker {
    pub fn new(default_price_tolerance: f64) -> Self {
        Self {
            default_price_tolerance,
        }
    }

    /// Check every constraint of `question` against one property.
    pub fn check_property(&self, property: &Property, question: &GoldQuestion) -> PropertyCheck {
        if question.is_manual() {
            return self.manual_check(property);
        }

        let constraints = &question.constraints;
        let (location_result, keyword_match, distance, failure_reason) =
            self.check_location(property, constraints.location.as_ref());

        PropertyCheck {
            property_id: property.slug.clone(),
            property_name: property.title.clone(),
            property_type_result: self.check_property_type(property, constraints),
            listing_type_result: self.check_listing_type(property, constraints),
            location_result,
            price_result: self.check_price(property, constraints.price.as_ref()),
            bedrooms_result: Self::check_count(property.bedrooms, constraints.bedrooms.as_ref()),
            floors_result: Self::check_count(property.floors, constraints.floors.as_ref()),
            location_keyword_match: keyword_match,
            location_distance_km: distance,
            location_failure_reason: failure_reason,
            is_manual: false,
            manual_result: None,
            manual_comment: String::new(),
        }
    }

    /// Manual-mode check: constraint computation skipped, verdict pending.
    fn manual_check(&self, property: &Property) -> PropertyCheck {
        PropertyCheck {
            property_id: property.slug.clone(),
            property_name: property.title.clone(),
            property_type_result: CheckOutcome::Na,
            listing_type_result: CheckOutcome::Na,
            location_result: CheckOutcome::Na,
            price_result: CheckOutcome::Na,
            bedrooms_result: CheckOutcome::Na,
            floors_result: CheckOutcome::Na,
            location_keyword_match: None,
            location_distance_km: None,
            location_failure_reason: None,
            is_manual: true,
            manual_result: None,
            manual_comment: String::new(),
        }
    }

    fn check_property_type(&self, property: &Property, constraints: &Constraints) -> CheckOutcome {
        let Some(expected) = &constraints.property_type else {
            return CheckOutcome::Na;
        };
        match PropertyType::from_loose(expected) {
            Some(expected) if property.property_type == expected => CheckOutcome::Pass,
            Some(_) => CheckOutcome::Fail,
            // Unknown label in the gold file: compare normalized strings.
            None if expected.trim().eq_ignore_ascii_case(property.property_type.as_str()) => {
                CheckOutcome::Pass
            }
            None => CheckOutcome::Fail,
        }
    }

    fn check_listing_type(&self, property: &Property, constraints: &Constraints) -> CheckOutcome {
        let Some(expected) = &constraints.listing_type else {
            return CheckOutcome::Na;
        };
        match ListingType::from_loose(expected) {
            Some(expected) if property.listing_type == expected => CheckOutcome::Pass,
            Some(_) => CheckOutcome::Fail,
            None if expected.trim().eq_ignore_ascii_case(property.listing_type.as_str()) => {
                CheckOutcome::Pass
            }
            None => CheckOutcome::Fail,
        }
    }

    /// Keyword containment over title/location/address first, geo distance
    /// second. Returns (result, matched keyword, distance, failure reason).
    fn check_location(
        &self,
        property: &Property,
        constraint: Option<&LocationConstraint>,
    ) -> (CheckOutcome, Option<String>, Option<f64>, Option<String>) {
        let Some(constraint) = constraint else {
            return (CheckOutcome::Na, None, None, None);
        };

        let haystack = format!("{} {}", property.title, property.location_text()).to_lowercase();
        if !haystack.trim().is_empty() {
            for keyword in &constraint.keywords {
                if haystack.contains(&keyword.to_lowercase()) {
                    return (CheckOutcome::Pass, Some(keyword.clone()), None, None);
                }
            }
        }

        if let (Some(prop_lat), Some(prop_lng), Some(lat), Some(lng)) = (
            property.latitude,
            property.longitude,
            constraint.lat,
            constraint.lng,
        ) {
            let distance = haversine_km(prop_lat, prop_lng, lat, lng);
            if distance <= constraint.radius_km {
                return (CheckOutcome::Pass, None, Some(distance), None);
            }
            let reason = format!(
                "geo distance {distance:.1}km > radius {}km; keywords {:?} not found in '{}'",
                constraint.radius_km, constraint.keywords, haystack
            );
            return (CheckOutcome::Fail, None, Some(distance), Some(reason));
        }

        if haystack.trim().is_empty() && property.latitude.is_none() {
            return (
                CheckOutcome::Missing,
                None,
                None,
                Some("no location data available".to_string()),
            );
        }

        let reason = format!(
            "keywords {:?} not found and no geo fallback available",
            constraint.keywords
        );
        (CheckOutcome::Fail, None, None, Some(reason))
    }

    fn check_price(
        &self,
        property: &Property,
        constraint: Option<&PriceConstraint>,
    ) -> CheckOutcome {
        let Some(constraint) = constraint else {
            return CheckOutcome::Na;
        };
        if constraint.is_empty() {
            return CheckOutcome::Na;
        }

        let price = property.price;
        let tolerance = constraint.tolerance.unwrap_or(self.default_price_tolerance);

        // Target mode: "harga X-an" means around X.
        if let Some(target) = constraint.target {
            let lo = target as f64 * (1.0 - tolerance);
            let hi = target as f64 * (1.0 + tolerance);
            return if price.intersects(Some(lo), Some(hi)) {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail
            };
        }

        // Bounds mode: tolerance expands the bounds outward.
        if let Some(min) = constraint.min {
            let lo = min as f64 * (1.0 - tolerance);
            if price.max < lo {
                return CheckOutcome::Fail;
            }
        }
        if let Some(max) = constraint.max {
            let hi = max as f64 * (1.0 + tolerance);
            if price.min > hi {
                return CheckOutcome::Fail;
            }
        }
        CheckOutcome::Pass
    }

    fn check_count(value: Option<NumRange>, constraint: Option<&CountConstraint>) -> CheckOutcome {
        let Some(constraint) = constraint else {
            return CheckOutcome::Na;
        };
        if constraint.is_empty() {
            return CheckOutcome::Na;
        }
        let Some(range) = value else {
            return CheckOutcome::Missing;
        };

        if let Some(exact) = constraint.exact {
            return if range.contains(exact as f64) {
                CheckOutcome::Pass
            } else {
                CheckOutcome::Fail
            };
        }
        if range.intersects(
            constraint.min.map(|v| v as f64),
            constraint.max.map(|v| v as f64),
        ) {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::models::{EvaluationMode, ExpectedResult};

    fn question(constraints: Constraints) -> GoldQuestion {
        GoldQuestion {
            id: 1,
            question: "test".to_string(),
            category: "test".to_string(),
            expected_result: ExpectedResult::HasData,
            constraints,
            notes: String::new(),
            evaluation_mode: EvaluationMode::Auto,
        }
    }

    fn checker() -> ConstraintChecker {
        ConstraintChecker::new(0.0)
    }

    #[test]
    fn property_type_accepts_indonesian_gold_labels() {
        let property = crate::property::tests::sample_property();
        let q = question(Constraints {
            property_type: Some("rumah".to_string()),
            ..Default::default()
        });
        let check = checker().check_property(&property, &q);
        assert_eq!(check.property_type_result, CheckOutcome::Pass);

        let q = question(Constraints {
            property_type: Some("ruko".to_string()),
            ..Default::default()
        });
        let check = checker().check_property(&property, &q);
        assert_eq!(check.property_type_result, CheckOutcome::Fail);
    }

    #[test]
    fn unspecified_constraints_are_na() {
        let property = crate::property::tests::sample_property();
        let check = checker().check_property(&property, &question(Constraints::default()));
        assert!(check.all_results().iter().all(|r| *r == CheckOutcome::Na));
        assert_eq!(check.cpr(), 1.0);
    }

    #[test]
    fn keyword_match_beats_geo_distance() {
        // Coordinates far outside the radius, but the keyword matches: the
        // keyword-first ordering must pass it without computing geo.
        let mut property = crate::property::tests::sample_property();
        property.latitude = Some(0.0);
        property.longitude = Some(0.0);
        let q = question(Constraints {
            location: Some(LocationConstraint {
                keywords: vec!["cemara asri".to_string()],
                lat: Some(3.6289),
                lng: Some(98.6960),
                radius_km: 2.0,
            }),
            ..Default::default()
        });
        let check = checker().check_property(&property, &q);
        assert_eq!(check.location_result, CheckOutcome::Pass);
        assert_eq!(check.location_keyword_match.as_deref(), Some("cemara asri"));
        assert!(check.location_distance_km.is_none());
    }

    #[test]
    fn geo_fallback_applies_when_keywords_miss() {
        let mut property = crate::property::tests::sample_property();
        property.area = "Padang Bulan".to_string();
        property.title = "Rumah dekat kampus".to_string();
        property.district = String::new();
        property.address = None;
        property.city = "Medan".to_string();
        property.latitude = Some(3.5660);
        property.longitude = Some(98.6570);

        let q = question(Constraints {
            location: Some(LocationConstraint {
                keywords: vec!["sunggal".to_string()],
                lat: Some(3.5656),
                lng: Some(98.6565),
                radius_km: 2.0,
            }),
            ..Default::default()
        });
        let check = checker().check_property(&property, &q);
        assert_eq!(check.location_result, CheckOutcome::Pass);
        assert!(check.location_distance_km.unwrap() < 2.0);
    }

    #[test]
    fn price_target_mode_uses_symmetric_tolerance() {
        let mut property = crate::property::tests::sample_property();
        property.price = NumRange::point(1_100_000_000.0);
        let q = question(Constraints {
            price: Some(PriceConstraint {
                target: Some(1_000_000_000),
                tolerance: Some(0.2),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            checker().check_property(&property, &q).price_result,
            CheckOutcome::Pass
        );

        let q = question(Constraints {
            price: Some(PriceConstraint {
                target: Some(1_000_000_000),
                tolerance: Some(0.0),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            checker().check_property(&property, &q).price_result,
            CheckOutcome::Fail
        );
    }

    #[test]
    fn price_bounds_expand_with_tolerance() {
        let mut property = crate::property::tests::sample_property();
        property.price = NumRange::point(1_600_000_000.0);
        let q = question(Constraints {
            price: Some(PriceConstraint {
                max: Some(1_500_000_000),
                tolerance: Some(0.1),
                ..Default::default()
            }),
            ..Default::default()
        });
        // 1.6B <= 1.5B * 1.1 = 1.65B.
        assert_eq!(
            checker().check_property(&property, &q).price_result,
            CheckOutcome::Pass
        );
    }

    #[test]
    fn bedrooms_exact_matches_project_intervals() {
        let mut property = crate::property::tests::sample_property();
        property.bedrooms = Some(NumRange::new(3.0, 4.0));
        let q = question(Constraints {
            bedrooms: Some(CountConstraint {
                exact: Some(4),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            checker().check_property(&property, &q).bedrooms_result,
            CheckOutcome::Pass
        );
    }

    #[test]
    fn missing_floors_is_missing_not_fail_tagged() {
        let mut property = crate::property::tests::sample_property();
        property.floors = None;
        let q = question(Constraints {
            floors: Some(CountConstraint {
                min: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            checker().check_property(&property, &q).floors_result,
            CheckOutcome::Missing
        );
    }

    #[test]
    fn manual_mode_skips_all_checks() {
        let property = crate::property::tests::sample_property();
        let mut q = question(Constraints {
            property_type: Some("rumah".to_string()),
            ..Default::default()
        });
        q.evaluation_mode = EvaluationMode::Manual;
        let check = checker().check_property(&property, &q);
        assert!(check.is_manual);
        assert!(check.is_pending_manual());
        assert!(check.all_results().iter().all(|r| *r == CheckOutcome::Na));
    }
}
