//! Harvest job settings.
//!
//! A job is described by a YAML file. Every field except `source_id` and
//! `source_url` has a default, so a minimal job is two lines long.
//! Settings are immutable for the duration of a run; the incremental date
//! filter is added by deriving a new value with
//! [`HarvestSettings::with_modified_since`].

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geoharvest_csw::config::{validate_page_size, validate_service_url};
use geoharvest_csw::filter::{self, TYPE_PROPERTY};
use geoharvest_csw::{Credentials, HttpMethod, HttpOptions};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::postprocess::{PostProcessStep, PostProcessor};

/// Default page size (`maxRecords`).
pub const DEFAULT_MAX_RECORDS: u32 = 100;

/// Default number of parallel requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 6;

/// Default number of staged entities per bulk flush.
pub const DEFAULT_BULK_SIZE: usize = 100;

/// WFS feature types tried when capabilities do not link a dataset.
pub const DEFAULT_WFS_TYPE_NAMES: &[&str] = &[
    "plu:SpatialPlan",
    "plu:ZoningElement",
    "plu:SupplementaryRegulation",
    "plu:OfficialDocumentation",
];

/// WMS layers tried when capabilities do not link a dataset.
pub const DEFAULT_WMS_LAYER_NAMES: &[&str] = &[
    "PLU.SpatialPlan",
    "PLU.ZoningElement",
    "PLU.SupplementaryRegulation",
];

fn default_max_records() -> u32 {
    DEFAULT_MAX_RECORDS
}

fn default_start_position() -> u64 {
    1
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

fn default_bulk_size() -> usize {
    DEFAULT_BULK_SIZE
}

fn default_true() -> bool {
    true
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub proxy: Option<String>,
    pub accept_invalid_certs: bool,
    pub max_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: geoharvest_csw::config::HTTP_TIMEOUT_SECS,
            proxy: None,
            accept_invalid_certs: false,
            max_retries: geoharvest_csw::config::DEFAULT_MAX_RETRIES,
        }
    }
}

impl HttpSettings {
    pub fn to_options(&self) -> HttpOptions {
        HttpOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            proxy: self.proxy.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
            max_retries: self.max_retries,
            credentials: None,
        }
    }
}

/// Coverage thresholds for the safety check, in percent of previously known
/// records not touched by a full run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Above this, an alert is sent.
    pub warn_percent: f64,
    /// Above this, the run is rolled back.
    pub cancel_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warn_percent: 10.0,
            cancel_percent: 30.0,
        }
    }
}

/// Second, service-only pass of a full harvest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceHarvestSettings {
    pub enabled: bool,
    /// Predicate selecting service records; `type = service` when unset.
    pub filter: Option<String>,
}

impl ServiceHarvestSettings {
    pub fn predicate(&self) -> String {
        self.filter
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| filter::property_is_equal_to(TYPE_PROPERTY, "service"))
    }
}

/// Dataset-service coupling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingSettings {
    pub enabled: bool,
    /// Fetch WFS features to compute a footprint per coupled dataset.
    pub resolve_geometry: bool,
    /// Feature limit for geometry requests.
    pub max_features: u32,
    pub wfs_type_names: Vec<String>,
    pub wms_layer_names: Vec<String>,
}

impl Default for CouplingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolve_geometry: false,
            max_features: 100,
            wfs_type_names: DEFAULT_WFS_TYPE_NAMES.iter().map(|s| s.to_string()).collect(),
            wms_layer_names: DEFAULT_WMS_LAYER_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// CSW-T target catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSettings {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Page size for identifier discovery.
    #[serde(default = "default_max_records")]
    pub page_size: u32,
    /// Delete records of this source not touched by a full run.
    #[serde(default = "default_true")]
    pub delete_stale: bool,
}

impl PublishSettings {
    pub fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Settings of one harvest job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSettings {
    /// Identifies the source in storage and traceability keywords.
    pub source_id: String,
    /// CSW endpoint.
    pub source_url: String,
    #[serde(default)]
    pub http_method: HttpMethod,
    /// Page size.
    #[serde(default = "default_max_records")]
    pub max_records: u32,
    /// 1-based position of the first record.
    #[serde(default = "default_start_position")]
    pub start_position: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// OGC filter predicate applied to every GetRecords request.
    #[serde(default)]
    pub record_filter: Option<String>,
    #[serde(default)]
    pub incremental: bool,
    /// When non-empty, only these identifiers are harvested.
    #[serde(default)]
    pub allowed_ids: Vec<String>,
    #[serde(default)]
    pub blocked_ids: Vec<String>,
    /// Records without any of these keywords are skipped.
    #[serde(default)]
    pub mandatory_keywords: Vec<String>,
    #[serde(default)]
    pub catalog_id: Option<String>,
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub services: ServiceHarvestSettings,
    #[serde(default)]
    pub coupling: CouplingSettings,
    #[serde(default)]
    pub publish: Option<PublishSettings>,
    #[serde(default)]
    pub post_processing: Vec<PostProcessStep>,
}

impl HarvestSettings {
    /// Minimal settings for a source; everything else at its default.
    pub fn new(source_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source_url: source_url.into(),
            http_method: HttpMethod::default(),
            max_records: DEFAULT_MAX_RECORDS,
            start_position: 1,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            record_filter: None,
            incremental: false,
            allowed_ids: Vec::new(),
            blocked_ids: Vec::new(),
            mandatory_keywords: Vec::new(),
            catalog_id: None,
            bulk_size: DEFAULT_BULK_SIZE,
            http: HttpSettings::default(),
            thresholds: Thresholds::default(),
            services: ServiceHarvestSettings::default(),
            coupling: CouplingSettings::default(),
            publish: None,
            post_processing: Vec::new(),
        }
    }

    /// Parse settings from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load settings from a YAML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_yaml_str(&content)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply `GEOHARVEST_*` overrides from a variable lookup.
    ///
    /// Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(proxy) = lookup("GEOHARVEST_PROXY").filter(|p| !p.is_empty()) {
            self.http.proxy = Some(proxy);
        }
        if let Some(timeout) = lookup("GEOHARVEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.http.timeout_secs = timeout;
        }
        if let Some(max) = lookup("GEOHARVEST_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.max_concurrent = max;
        }
    }

    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Settings whose record filter also requires modification at or after `since`.
    #[must_use]
    pub fn with_modified_since(&self, since: DateTime<Utc>) -> Self {
        let mut settings = self.clone();
        settings.record_filter = filter::and([
            self.record_filter.clone(),
            Some(filter::modified_since(since)),
        ]);
        settings
    }

    /// Transport options for the source catalogue.
    pub fn http_options(&self) -> HttpOptions {
        self.http.to_options()
    }

    /// Check the settings before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.source_id.trim().is_empty() {
            return Err(HarvestError::InvalidSettings(
                "source_id must not be empty".to_string(),
            ));
        }
        validate_service_url(&self.source_url)
            .map_err(|e| HarvestError::InvalidSettings(format!("source_url: {e}")))?;
        validate_page_size(self.max_records)
            .map_err(|e| HarvestError::InvalidSettings(format!("max_records: {e}")))?;
        if self.start_position < 1 {
            return Err(HarvestError::InvalidSettings(
                "start_position must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(HarvestError::InvalidSettings(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.bulk_size == 0 {
            return Err(HarvestError::InvalidSettings(
                "bulk_size must be at least 1".to_string(),
            ));
        }

        let Thresholds {
            warn_percent,
            cancel_percent,
        } = self.thresholds;
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(warn_percent) || !in_range(cancel_percent) {
            return Err(HarvestError::InvalidSettings(
                "thresholds must be between 0 and 100".to_string(),
            ));
        }
        if warn_percent > cancel_percent {
            return Err(HarvestError::InvalidSettings(format!(
                "warn_percent ({warn_percent}) must not exceed cancel_percent ({cancel_percent})"
            )));
        }

        if let Some(publish) = &self.publish {
            validate_service_url(&publish.url)
                .map_err(|e| HarvestError::InvalidSettings(format!("publish.url: {e}")))?;
            validate_page_size(publish.page_size)
                .map_err(|e| HarvestError::InvalidSettings(format!("publish.page_size: {e}")))?;
        }

        PostProcessor::compile(&self.post_processing)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let settings =
            HarvestSettings::from_yaml_str("source_id: geo\nsource_url: https://example.org/csw\n")
                .unwrap();
        assert_eq!(settings, HarvestSettings::new("geo", "https://example.org/csw"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
source_id: geo
source_url: https://example.org/csw
http_method: POST
max_records: 50
max_concurrent: 2
incremental: true
blocked_ids: [bad-1]
mandatory_keywords: [inspire]
http:
  timeout_secs: 5
thresholds:
  warn_percent: 5
  cancel_percent: 20
services:
  enabled: true
coupling:
  resolve_geometry: true
publish:
  url: https://target.example.org/csw
  username: editor
  password: secret
"#;
        let settings = HarvestSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.http_method, HttpMethod::Post);
        assert_eq!(settings.max_records, 50);
        assert_eq!(settings.http.timeout_secs, 5);
        assert_eq!(settings.http.max_retries, 3);
        assert_eq!(settings.thresholds.cancel_percent, 20.0);
        assert!(settings.services.enabled);
        assert!(settings.coupling.enabled);
        assert_eq!(settings.coupling.wfs_type_names.len(), DEFAULT_WFS_TYPE_NAMES.len());
        let publish = settings.publish.as_ref().unwrap();
        assert!(publish.delete_stale);
        assert_eq!(publish.credentials().unwrap().username, "editor");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = HarvestSettings::new("geo", "https://example.org/csw");

        let mut s = base.clone();
        s.source_url = "ftp://example.org".to_string();
        assert!(s.validate().is_err());

        let mut s = base.clone();
        s.max_records = 0;
        assert!(s.validate().is_err());

        let mut s = base.clone();
        s.start_position = 0;
        assert!(s.validate().is_err());

        let mut s = base.clone();
        s.max_concurrent = 0;
        assert!(s.validate().is_err());

        let mut s = base;
        s.thresholds = Thresholds {
            warn_percent: 40.0,
            cancel_percent: 20.0,
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_with_modified_since_keeps_original() {
        let mut settings = HarvestSettings::new("geo", "https://example.org/csw");
        settings.record_filter = Some(filter::property_is_equal_to("type", "dataset"));
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let incremental = settings.with_modified_since(since);
        let combined = incremental.record_filter.unwrap();
        assert!(combined.starts_with("<ogc:And>"));
        assert!(combined.contains("2024-01-02T03:04:05Z"));
        assert!(!settings.record_filter.unwrap().contains("Modified"));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = HarvestSettings::new("geo", "https://example.org/csw");
        settings.apply_overrides(|key| match key {
            "GEOHARVEST_PROXY" => Some("http://proxy:3128".to_string()),
            "GEOHARVEST_TIMEOUT_SECS" => Some("not a number".to_string()),
            "GEOHARVEST_MAX_CONCURRENT" => Some("2".to_string()),
            _ => None,
        });
        assert_eq!(settings.http.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(settings.http.timeout_secs, 60);
        assert_eq!(settings.max_concurrent, 2);
    }

    #[test]
    fn test_service_predicate_default() {
        let services = ServiceHarvestSettings::default();
        assert!(services.predicate().contains("<ogc:Literal>service</ogc:Literal>"));
    }
}
