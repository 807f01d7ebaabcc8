//! Error types for the harvester.
//!
//! `HarvestError` is what library calls return. The orchestrator itself never
//! surfaces one: it classifies failures into the run [`Summary`] and reports
//! a single message through [`HarvestOutcome`].
//!
//! [`Summary`]: crate::summary::Summary
//! [`HarvestOutcome`]: crate::harvester::HarvestOutcome

use geoharvest_csw::CswError;
use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Catalogue or OGC service request failed.
    #[error(transparent)]
    Csw(#[from] CswError),

    /// Settings file is unusable.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// Storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Search index push failed.
    #[error("Index error: {0}")]
    Index(String),

    /// A record could not be mapped.
    #[error("Failed to map record{}: {message}", .identifier.as_ref().map(|id| format!(" {id}")).unwrap_or_default())]
    Mapping {
        identifier: Option<String>,
        message: String,
    },

    /// XML parsing failed.
    #[error("XML parsing failed: {0}")]
    XmlParse(#[from] roxmltree::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A harvest run ended with rollback.
    #[error("Harvest failed: {0}")]
    RunFailed(String),
}

impl HarvestError {
    /// Whether the failure belongs to the storage layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;
