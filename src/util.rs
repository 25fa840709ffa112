//! Shared helpers: great-circle distance, HTML stripping, price formatting.

use lazy_static::lazy_static;
use regex::Regex;

/// Earth's mean radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points, in kilometers.
///
/// Standard Haversine formula; inputs are degrees.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

lazy_static! {
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").expect("valid regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Strip HTML tags and collapse whitespace. Listing descriptions frequently
/// arrive as rich text from the backend CMS.
pub fn strip_html(text: &str) -> String {
    let no_tags = HTML_TAG.replace_all(text, " ");
    WHITESPACE.replace_all(&no_tags, " ").trim().to_string()
}

/// Format an IDR amount the way Indonesian listings print it:
/// `Rp 1,5 M` (milyar), `Rp 850 jt` (juta), plain rupiah below a million.
pub fn format_idr(amount: i64) -> String {
    const MILYAR: i64 = 1_000_000_000;
    const JUTA: i64 = 1_000_000;

    if amount >= MILYAR {
        let whole = amount / MILYAR;
        let frac = (amount % MILYAR) / (MILYAR / 10);
        if frac == 0 {
            format!("Rp {whole} M")
        } else {
            format!("Rp {whole},{frac} M")
        }
    } else if amount >= JUTA {
        let whole = amount / JUTA;
        let frac = (amount % JUTA) / (JUTA / 10);
        if frac == 0 {
            format!("Rp {whole} jt")
        } else {
            format!("Rp {whole},{frac} jt")
        }
    } else {
        format!("Rp {amount}")
    }
}

/// Clamp a score into the unit interval before weighting.
pub fn clamp_unit(score: f32) -> f32 {
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // USU campus to Medan city center, roughly 3.4 km.
        let d = haversine_km(3.5656, 98.6565, 3.5952, 98.6722);
        assert!(d > 3.0 && d < 4.5, "got {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let d = haversine_km(3.5656, 98.6565, 3.5656, 98.6565);
        assert!(d < 1e-9);
    }

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let cleaned = strip_html("<p>Rumah  <b>mewah</b></p>\n<br/>dekat taman");
        assert_eq!(cleaned, "Rumah mewah dekat taman");
    }

    #[test]
    fn formats_idr_amounts() {
        assert_eq!(format_idr(1_500_000_000), "Rp 1,5 M");
        assert_eq!(format_idr(2_000_000_000), "Rp 2 M");
        assert_eq!(format_idr(850_000_000), "Rp 850 jt");
        assert_eq!(format_idr(999_500_000), "Rp 999,5 jt");
        assert_eq!(format_idr(500_000), "Rp 500000");
    }

    #[test]
    fn clamps_scores() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.3), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }
}
