//! Spatial footprints from GML feature collections.
//!
//! A WFS `GetFeature` response is reduced to the envelope of all coordinates
//! it contains. `gml:boundedBy` envelopes are used when present; otherwise
//! `posList`, `pos` and GML 2 `coordinates` are scanned.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::config::validate_service_url;
use crate::error::Result;
use crate::records::check_exception;
use crate::request::set_query_param;
use crate::xml::{find_child, find_descendants, get_text};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope, normalising swapped corners.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    /// Grow to include another envelope.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// GeoJSON `Polygon` of the envelope, counter-clockwise and closed.
    ///
    /// # Examples
    /// ```
    /// use geoharvest_csw::geometry::Envelope;
    ///
    /// let polygon = Envelope::new(0.0, 0.0, 1.0, 2.0).to_geojson();
    /// assert_eq!(polygon["type"], "Polygon");
    /// assert_eq!(polygon["coordinates"][0].as_array().map(Vec::len), Some(5));
    /// ```
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [self.min_x, self.min_y],
                [self.max_x, self.min_y],
                [self.max_x, self.max_y],
                [self.min_x, self.max_y],
                [self.min_x, self.min_y],
            ]]
        })
    }
}

/// Build a WFS `GetFeature` URL for one feature type.
pub fn get_feature_url(access_url: &str, type_name: &str, max_features: u32) -> Result<Url> {
    let mut url = validate_service_url(access_url)?;
    set_query_param(&mut url, "SERVICE", "WFS");
    set_query_param(&mut url, "REQUEST", "GetFeature");
    set_query_param(&mut url, "VERSION", "2.0.0");
    set_query_param(&mut url, "TYPENAMES", type_name);
    set_query_param(&mut url, "COUNT", &max_features.to_string());
    Ok(url)
}

/// Reduce a GML feature collection to its envelope.
///
/// Returns `Ok(None)` for a collection without coordinates.
pub fn feature_collection_envelope(xml: &str) -> Result<Option<Envelope>> {
    let doc = roxmltree::Document::parse(xml)?;
    check_exception(&doc)?;
    let root = doc.root_element();

    let bounded: Option<Envelope> = find_descendants(root, "Envelope")
        .filter_map(|envelope| {
            let lower = find_child(envelope, "lowerCorner").map(get_text)?;
            let upper = find_child(envelope, "upperCorner").map(get_text)?;
            let lower = parse_ordinates(&lower);
            let upper = parse_ordinates(&upper);
            match (lower.as_slice(), upper.as_slice()) {
                ([x1, y1, ..], [x2, y2, ..]) => Some(Envelope::new(*x1, *y1, *x2, *y2)),
                _ => None,
            }
        })
        .reduce(Envelope::union);
    if bounded.is_some() {
        return Ok(bounded);
    }

    let mut envelope: Option<Envelope> = None;
    let mut include = |points: Vec<(f64, f64)>| {
        for (x, y) in points {
            let point = Envelope::point(x, y);
            envelope = Some(envelope.map_or(point, |e| e.union(point)));
        }
    };

    for node in find_descendants(root, "posList") {
        include(pairs(&parse_ordinates(&get_text(node))));
    }
    for node in find_descendants(root, "pos") {
        include(pairs(&parse_ordinates(&get_text(node))));
    }
    for node in find_descendants(root, "coordinates") {
        // GML 2: "x,y x,y ..."
        let points = get_text(node)
            .split_whitespace()
            .filter_map(|tuple| {
                let mut parts = tuple.split(',').map(str::parse::<f64>);
                match (parts.next(), parts.next()) {
                    (Some(Ok(x)), Some(Ok(y))) => Some((x, y)),
                    _ => None,
                }
            })
            .collect();
        include(points);
    }

    Ok(envelope)
}

fn parse_ordinates(text: &str) -> Vec<f64> {
    text.split_whitespace()
        .filter_map(|value| value.parse().ok())
        .collect()
}

fn pairs(ordinates: &[f64]) -> Vec<(f64, f64)> {
    ordinates
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}
