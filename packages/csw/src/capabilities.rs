//! WFS/WMS GetCapabilities parsing.
//!
//! Capabilities documents list the feature types (WFS) or layers (WMS) a
//! service offers. To couple a service with the datasets it operates on,
//! each name is indexed by the dataset identifiers the document links it to:
//! `MetadataURL` references, WMS `Identifier` elements and INSPIRE
//! `SpatialDataSetIdentifier` codes.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use url::Url;

use crate::config::validate_service_url;
use crate::error::Result;
use crate::records::check_exception;
use crate::request::{query_param, set_query_param};
use crate::xml::{
    element_children, find_by_path, find_child, find_children, find_descendants, get_attribute,
    get_text, has_tag,
};

/// OGC service type of a capabilities endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OgcService {
    Wfs,
    Wms,
}

impl OgcService {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wfs => "WFS",
            Self::Wms => "WMS",
        }
    }
}

/// Feature-type or layer names of one service, indexed by dataset identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityMap {
    by_identifier: HashMap<String, Vec<String>>,
    names: Vec<String>,
}

impl CapabilityMap {
    /// Names linked to a dataset identifier.
    pub fn names_for(&self, identifier: &str) -> Option<&[String]> {
        self.by_identifier
            .get(identifier)
            .map(Vec::as_slice)
            .filter(|names| !names.is_empty())
    }

    /// Every name offered by the service, in document order.
    pub fn all_names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn add_name(&mut self, name: String) {
        if !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    fn link(&mut self, identifier: String, name: &str) {
        let names = self.by_identifier.entry(identifier).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
}

/// Build the GetCapabilities URL for a service access URL.
///
/// Existing vendor parameters are kept; `SERVICE` and `REQUEST` are forced.
///
/// # Examples
/// ```
/// use geoharvest_csw::capabilities::{capabilities_url, OgcService};
///
/// let url = capabilities_url("https://example.org/wfs?map=plu", OgcService::Wfs).unwrap();
/// assert_eq!(url.as_str(), "https://example.org/wfs?map=plu&SERVICE=WFS&REQUEST=GetCapabilities");
/// ```
pub fn capabilities_url(access_url: &str, service: OgcService) -> Result<Url> {
    let mut url = validate_service_url(access_url)?;
    set_query_param(&mut url, "SERVICE", service.as_str());
    set_query_param(&mut url, "REQUEST", "GetCapabilities");
    Ok(url)
}

/// Extract a record identifier from a metadata link.
///
/// Looks at `id`, `uuid` and `fileIdentifier` query parameters first and the
/// URL fragment second.
///
/// # Examples
/// ```
/// use geoharvest_csw::capabilities::identifier_from_url;
///
/// assert_eq!(
///     identifier_from_url("https://example.org/csw?request=GetRecordById&id=abc-1").as_deref(),
///     Some("abc-1")
/// );
/// assert_eq!(identifier_from_url("https://example.org/md#xyz").as_deref(), Some("xyz"));
/// assert_eq!(identifier_from_url("not a url"), None);
/// ```
pub fn identifier_from_url(href: &str) -> Option<String> {
    let url = Url::parse(href.trim()).ok()?;
    ["id", "uuid", "fileIdentifier"]
        .iter()
        .find_map(|key| query_param(&url, key))
        .or_else(|| url.fragment().map(str::to_string))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Parse a WFS capabilities document (1.1 or 2.0).
pub fn parse_wfs_capabilities(xml: &str) -> Result<CapabilityMap> {
    let doc = Document::parse(xml)?;
    check_exception(&doc)?;
    let root = doc.root_element();

    let mut map = CapabilityMap::default();
    let dataset_codes = spatial_dataset_codes(root);

    for feature_type in find_descendants(root, "FeatureType") {
        let Some(name) = find_child(feature_type, "Name").map(get_text).filter(|n| !n.is_empty())
        else {
            continue;
        };
        map.add_name(name.clone());

        for id in metadata_url_identifiers(feature_type) {
            map.link(id, &name);
        }
        for code in &dataset_codes {
            map.link(code.clone(), &name);
        }
    }

    Ok(map)
}

/// Parse a WMS capabilities document (1.1.1 or 1.3.0).
pub fn parse_wms_capabilities(xml: &str) -> Result<CapabilityMap> {
    let doc = Document::parse(xml)?;
    check_exception(&doc)?;
    let root = doc.root_element();

    let mut map = CapabilityMap::default();

    for layer in find_descendants(root, "Layer") {
        let Some(name) = find_child(layer, "Name").map(get_text).filter(|n| !n.is_empty()) else {
            continue;
        };
        map.add_name(name.clone());

        for identifier in find_children(layer, "Identifier") {
            let id = get_text(identifier);
            if !id.is_empty() {
                map.link(id, &name);
            }
        }
        for id in metadata_url_identifiers(layer) {
            map.link(id, &name);
        }
    }

    Ok(map)
}

/// Parse a capabilities document of the given service type.
pub fn parse_capabilities(xml: &str, service: OgcService) -> Result<CapabilityMap> {
    match service {
        OgcService::Wfs => parse_wfs_capabilities(xml),
        OgcService::Wms => parse_wms_capabilities(xml),
    }
}

fn metadata_url_identifiers(node: Node<'_, '_>) -> Vec<String> {
    find_children(node, "MetadataURL")
        .filter_map(|metadata_url| {
            // WFS 2.0 / WMS: xlink:href on the element or a nested OnlineResource.
            // WFS 1.1: the URL is the element text.
            get_attribute(metadata_url, "href")
                .map(str::to_string)
                .or_else(|| {
                    find_child(metadata_url, "OnlineResource")
                        .and_then(|r| get_attribute(r, "href"))
                        .map(str::to_string)
                })
                .or_else(|| Some(get_text(metadata_url)).filter(|t| !t.is_empty()))
        })
        .filter_map(|href| identifier_from_url(&href))
        .collect()
}

fn spatial_dataset_codes(root: Node<'_, '_>) -> Vec<String> {
    find_descendants(root, "SpatialDataSetIdentifier")
        .filter_map(|sdi| find_by_path(sdi, "Code").map(get_text))
        .filter(|code| !code.is_empty())
        .collect()
}

/// Names of all element children, used in diagnostics.
pub fn describe_root(xml: &str) -> Option<String> {
    let doc = Document::parse(xml).ok()?;
    let root = doc.root_element();
    let children: Vec<&str> = element_children(root)
        .filter(|n| !has_tag(*n, "ExtendedCapabilities"))
        .map(|n| n.tag_name().name())
        .collect();
    Some(format!("{}[{}]", root.tag_name().name(), children.join(",")))
}
