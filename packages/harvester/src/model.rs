//! Harvested entities.

use chrono::{DateTime, Utc};
use geoharvest_csw::{Envelope, OgcService};
use serde::{Deserialize, Serialize};

/// ISO hierarchy level of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Dataset,
    Series,
    Service,
    Other,
}

impl RecordKind {
    /// Parse an `MD_ScopeCode` value.
    pub fn from_scope_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "dataset" | "" => Self::Dataset,
            "series" => Self::Series,
            "service" => Self::Service,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Series => "series",
            Self::Service => "service",
            Self::Other => "other",
        }
    }
}

/// OGC service type a distribution points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Wfs,
    Wms,
}

impl ServiceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wfs => "WFS",
            Self::Wms => "WMS",
        }
    }

    /// Detect the service type from a format, protocol or access URL.
    ///
    /// # Examples
    /// ```
    /// use geoharvest_harvester::model::ServiceType;
    ///
    /// assert_eq!(ServiceType::detect("OGC:WFS"), Some(ServiceType::Wfs));
    /// assert_eq!(ServiceType::detect("https://x/ows?SERVICE=WMS&request=GetCapabilities"), Some(ServiceType::Wms));
    /// assert_eq!(ServiceType::detect("application/zip"), None);
    /// ```
    pub fn detect(hint: &str) -> Option<Self> {
        let upper = hint.to_ascii_uppercase();
        if upper.contains("SERVICE=WFS") || upper.contains("OGC:WFS") || upper == "WFS" {
            Some(Self::Wfs)
        } else if upper.contains("SERVICE=WMS") || upper.contains("OGC:WMS") || upper == "WMS" {
            Some(Self::Wms)
        } else {
            None
        }
    }
}

impl From<ServiceType> for OgcService {
    fn from(value: ServiceType) -> Self {
        match value {
            ServiceType::Wfs => OgcService::Wfs,
            ServiceType::Wms => OgcService::Wms,
        }
    }
}

/// One online resource of a record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Distribution {
    pub access_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Feature-type or layer names resolved during coupling.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Envelope>,
    /// Resolution errors recorded during coupling.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl Distribution {
    /// OGC service type, from the declared format, the protocol or the URL.
    pub fn service_type(&self) -> Option<ServiceType> {
        self.format
            .as_deref()
            .and_then(ServiceType::detect)
            .or_else(|| self.protocol.as_deref().and_then(ServiceType::detect))
            .or_else(|| ServiceType::detect(&self.access_url))
    }
}

/// Temporal extent of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemporalExtent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// Licence of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct License {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A responsible party.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The mapped, index-ready form of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedDataset {
    pub identifier: String,
    pub kind: RecordKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_identifiers: Vec<String>,
    #[serde(default)]
    pub distributions: Vec<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    /// Dataset identifiers a service operates on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operates_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalExtent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    pub harvested_at: DateTime<Utc>,
    pub is_valid: bool,
    /// Why the record is invalid, if it is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_notes: Vec<String>,
}

impl MappedDataset {
    pub fn new(identifier: impl Into<String>, harvested_at: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: RecordKind::default(),
            title: String::new(),
            description: None,
            keywords: Vec::new(),
            resource_identifiers: Vec::new(),
            distributions: Vec::new(),
            service_type: None,
            operates_on: Vec::new(),
            bounding_box: None,
            temporal: None,
            license: None,
            contacts: Vec::new(),
            modified: None,
            harvested_at,
            is_valid: true,
            quality_notes: Vec::new(),
        }
    }

    pub fn is_service(&self) -> bool {
        self.kind == RecordKind::Service
    }

    /// Case-insensitive keyword lookup.
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword))
    }

    /// Flag the record invalid with a reason.
    pub fn invalidate(&mut self, note: impl Into<String>) {
        self.is_valid = false;
        self.quality_notes.push(note.into());
    }
}

/// One harvested record, keyed by `(source, identifier)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntity {
    pub identifier: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    pub dataset: MappedDataset,
    /// The record as delivered by the source.
    pub original_document: String,
}

impl RecordEntity {
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.identifier)
    }
}

/// Link between a service and a dataset it operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouplingEntity {
    pub dataset_identifier: String,
    pub service_id: String,
    pub service_type: ServiceType,
    pub source: String,
    pub distribution: Distribution,
}

impl CouplingEntity {
    /// Storage key: one coupling per (service, distribution, dataset).
    pub fn id(&self) -> String {
        format!(
            "{}|{}|{}",
            self.service_id, self.distribution.access_url, self.dataset_identifier
        )
    }
}

/// A catalogue that harvested records are grouped under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}
